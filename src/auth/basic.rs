//! HTTP Basic credential verification.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use subtle::ConstantTimeEq;

use super::errors::AuthErrorKind;
use super::password::{is_phc_hash, verify_password};

/// Configured password for the basic-auth gate.
#[derive(Clone)]
pub enum BasicPassword {
    /// Plaintext, compared in constant time
    Plain(String),
    /// argon2 PHC string
    Hashed(String),
}

impl BasicPassword {
    /// Interpret a configured value, detecting argon2 PHC strings.
    pub fn from_config(value: &str) -> Self {
        if is_phc_hash(value) {
            BasicPassword::Hashed(value.to_string())
        } else {
            BasicPassword::Plain(value.to_string())
        }
    }

    fn matches(&self, candidate: &str) -> bool {
        match self {
            BasicPassword::Plain(expected) => {
                bool::from(expected.as_bytes().ct_eq(candidate.as_bytes()))
            }
            BasicPassword::Hashed(phc) => verify_password(phc, candidate),
        }
    }
}

/// Credentials accepted by the basic-auth gate. `None` password disables it.
#[derive(Clone)]
pub struct BasicAuthConfig {
    pub username: String,
    pub password: Option<BasicPassword>,
}

impl BasicAuthConfig {
    pub fn new(username: &str, password: Option<&str>) -> Self {
        Self {
            username: username.to_string(),
            password: password.map(BasicPassword::from_config),
        }
    }
}

/// Verify an `Authorization` header value of the form `Basic <base64(user:pass)>`.
///
/// Wrong scheme, wrong segment count, bad base64, missing colon and mismatched
/// pairs are all `InvalidCredentials`.
pub fn verify_basic(header_value: &str, config: &BasicAuthConfig) -> Result<(), AuthErrorKind> {
    let encoded = super::gate::split_scheme(header_value, "Basic")?;

    let decoded = STANDARD
        .decode(encoded)
        .map_err(|_| AuthErrorKind::InvalidCredentials)?;
    let decoded = String::from_utf8(decoded).map_err(|_| AuthErrorKind::InvalidCredentials)?;

    // RFC 7617: the user-id cannot contain a colon, the password can.
    let (username, password) = decoded
        .split_once(':')
        .ok_or(AuthErrorKind::InvalidCredentials)?;

    let Some(expected) = &config.password else {
        return Err(AuthErrorKind::InvalidCredentials);
    };

    let username_ok = bool::from(username.as_bytes().ct_eq(config.username.as_bytes()));
    let password_ok = expected.matches(password);

    if username_ok && password_ok {
        Ok(())
    } else {
        Err(AuthErrorKind::InvalidCredentials)
    }
}
