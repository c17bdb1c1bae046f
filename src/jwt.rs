//! Bearer token issuance and verification.

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Default token lifetime: 3 days.
pub const DEFAULT_TOKEN_EXPIRY: Duration = Duration::from_secs(3 * 24 * 60 * 60);

/// The only algorithm accepted on verification.
const ALGORITHM: Algorithm = Algorithm::HS256;

/// Session claim set carried by a bearer token. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user ID, decimal)
    pub sub: String,
    /// Issuer
    pub iss: String,
    /// Audience
    pub aud: String,
    /// Issued at (Unix timestamp)
    pub iat: u64,
    /// Expiration time (Unix timestamp)
    pub exp: u64,
    /// Not before (Unix timestamp). Optional on the wire, validated when present.
    #[serde(default)]
    pub nbf: u64,
}

impl Claims {
    /// The subject as a user ID, if it is numeric.
    pub fn user_id(&self) -> Option<i64> {
        self.sub.parse().ok()
    }
}

/// Configuration for JWT operations.
#[derive(Clone)]
pub struct JwtConfig {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    issuer: String,
    audience: String,
    expiry: Duration,
}

/// Result of issuing a token.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    /// The JWT token string
    pub token: String,
    /// Expiration timestamp (Unix seconds)
    pub expires_at: u64,
}

fn now_secs() -> Result<u64, JwtError> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .map_err(|_| JwtError::TimeError)
}

impl JwtConfig {
    /// Create a new JWT configuration.
    pub fn new(secret: &[u8], issuer: &str, audience: &str, expiry: Duration) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            issuer: issuer.to_string(),
            audience: audience.to_string(),
            expiry,
        }
    }

    /// Issue a token for a user.
    pub fn generate_token(&self, user_id: i64) -> Result<IssuedToken, JwtError> {
        let now = now_secs()?;
        let exp = now + self.expiry.as_secs();

        let claims = Claims {
            sub: user_id.to_string(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            iat: now,
            exp,
            nbf: now,
        };

        let token = jsonwebtoken::encode(&Header::new(ALGORITHM), &claims, &self.encoding_key)
            .map_err(JwtError::Encoding)?;

        Ok(IssuedToken {
            token,
            expires_at: exp,
        })
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::new(ALGORITHM);
        validation.leeway = 0;
        validation.validate_exp = true;
        validation.validate_nbf = true;
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[&self.audience]);
        validation.set_required_spec_claims(&["exp", "iss", "aud", "sub"]);
        validation
    }

    /// Verify a bearer token and return its claims.
    ///
    /// Every failure (signature, algorithm, missing or past `exp`, future
    /// `nbf`, issuer, audience, malformed structure) collapses into
    /// `JwtError::InvalidToken`.
    pub fn verify_bearer(&self, token: &str) -> Result<Claims, JwtError> {
        let token_data = jsonwebtoken::decode::<Claims>(token, &self.decoding_key, &self.validation())
            .map_err(|e| {
                tracing::debug!(error = %e, "Bearer token rejected");
                JwtError::InvalidToken
            })?;

        // The library accepts exp == now; a token is only valid strictly before it.
        if token_data.claims.exp <= now_secs()? {
            return Err(JwtError::InvalidToken);
        }

        Ok(token_data.claims)
    }
}

/// Errors that can occur during JWT operations.
#[derive(Debug, thiserror::Error)]
pub enum JwtError {
    /// Error encoding the token
    #[error("failed to encode token: {0}")]
    Encoding(#[source] jsonwebtoken::errors::Error),
    /// The token failed verification. The cause is deliberately not carried.
    #[error("invalid token")]
    InvalidToken,
    /// System time error
    #[error("system time error")]
    TimeError,
}
