//! Password hashing with argon2 (PHC string format).

use std::sync::LazyLock;

use argon2::Argon2;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use rand::Rng;

#[derive(Debug, thiserror::Error)]
#[error("failed to hash password: {0}")]
pub struct PasswordError(String);

/// Hash a plaintext password into a PHC string.
pub fn hash_password(password: &str) -> Result<String, PasswordError> {
    let mut salt_bytes = [0u8; 16];
    rand::rng().fill(&mut salt_bytes);
    let salt = SaltString::encode_b64(&salt_bytes).map_err(|e| PasswordError(e.to_string()))?;
    let phc = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| PasswordError(e.to_string()))?
        .to_string();
    Ok(phc)
}

/// Check a plaintext password against a PHC string. Unparseable hashes never match.
pub fn verify_password(hash: &str, password: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

/// Hash checked in place of a missing account's, so lookups that find nobody
/// still pay for one verification.
static DECOY_HASH: LazyLock<Option<String>> =
    LazyLock::new(|| hash_password("decoy-password-never-matches").ok());

/// Check `password` against `hash`, or against the decoy when there is no
/// hash. Without a hash the answer is always `false`.
pub fn verify_password_or_decoy(hash: Option<&str>, password: &str) -> bool {
    match hash {
        Some(hash) => verify_password(hash, password),
        None => {
            if let Some(decoy) = DECOY_HASH.as_deref() {
                verify_password(decoy, password);
            }
            false
        }
    }
}

/// Whether a configured secret looks like an argon2 PHC string rather than plaintext.
pub fn is_phc_hash(value: &str) -> bool {
    value.starts_with("$argon2")
}
