//! CLI argument parsing, validation, and startup helpers.

use crate::auth::BasicAuthConfig;
use crate::db::Database;
use crate::deadline::DEFAULT_REQUEST_TIMEOUT;
use crate::mailer::LogNotifier;
use crate::rate_limit::{RateLimitConfig, RateLimitPolicyKind, build_policy};
use crate::saga::RetryPolicy;
use crate::{CacheConfig, MailConfig, ServerConfig, TokenConfig};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use url::Url;

const MIN_TOKEN_SECRET_LENGTH: usize = 32;
const TOKEN_SECRET_ENV: &str = "AUTH_TOKEN_SECRET";

#[derive(clap::ValueEnum, Clone, Debug, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
    Compact,
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "hubgate",
    about = "Content-sharing API with token auth, identity caching and rate limiting"
)]
pub struct Args {
    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value = "8080")]
    pub port: u16,

    /// Path to SQLite database file
    #[arg(short, long, env = "DATABASE", default_value = "hubgate.db")]
    pub database: String,

    /// Deployment environment. Anything but "production" sends notifications in sandbox mode
    #[arg(long, env = "ENV", default_value = "development")]
    pub env: String,

    /// Frontend base URL used in activation links
    #[arg(long, env = "FRONTEND_URL", default_value = "http://localhost:5173")]
    pub frontend_url: String,

    /// Path to file containing the token signing secret. Prefer AUTH_TOKEN_SECRET instead
    #[arg(long)]
    pub token_secret_file: Option<String>,

    /// Expected `iss` claim of bearer tokens
    #[arg(long, env = "AUTH_TOKEN_ISSUER", default_value = "hubgate")]
    pub token_issuer: String,

    /// Expected `aud` claim of bearer tokens
    #[arg(long, env = "AUTH_TOKEN_AUDIENCE", default_value = "hubgate")]
    pub token_audience: String,

    /// Bearer token lifetime in seconds
    #[arg(long, env = "AUTH_TOKEN_EXPIRY_SECS", default_value = "259200")]
    pub token_expiry_secs: u64,

    /// Username for operational endpoints
    #[arg(long, env = "AUTH_BASIC_USER", default_value = "admin")]
    pub basic_user: String,

    /// Password (plaintext or argon2 PHC string) for operational endpoints.
    /// Unset disables them
    #[arg(long, env = "AUTH_BASIC_PASS", hide_env_values = true)]
    pub basic_pass: Option<String>,

    /// Cache resolved identities in memory
    #[arg(long, env = "CACHE_ENABLED", default_value = "true", action = clap::ArgAction::Set)]
    pub cache_enabled: bool,

    /// Identity cache entry lifetime in seconds
    #[arg(long, env = "CACHE_TTL_SECS", default_value = "60")]
    pub cache_ttl_secs: u64,

    /// Maximum number of cached identities
    #[arg(long, env = "CACHE_CAPACITY", default_value = "10000")]
    pub cache_capacity: u64,

    /// Enable per-client admission control
    #[arg(long, env = "RATELIMITER_ENABLED", default_value = "true", action = clap::ArgAction::Set)]
    pub ratelimiter_enabled: bool,

    /// Requests allowed per client in each time frame
    #[arg(long, env = "RATELIMITER_REQUESTS_COUNT", default_value = "20")]
    pub ratelimiter_requests: u32,

    /// Rate limiter time frame in seconds
    #[arg(long, env = "RATELIMITER_TIME_FRAME_SECS", default_value = "5")]
    pub ratelimiter_time_frame_secs: u64,

    /// Rate limiting strategy
    #[arg(long, env = "RATELIMITER_POLICY", default_value = "fixed-window")]
    pub ratelimiter_policy: RateLimitPolicyKind,

    /// Invitation lifetime in seconds
    #[arg(long, env = "MAIL_INVITATION_EXPIRY_SECS", default_value = "259200")]
    pub invitation_expiry_secs: u64,

    /// Whole-request timeout in seconds
    #[arg(long, env = "REQUEST_TIMEOUT_SECS", default_value_t = DEFAULT_REQUEST_TIMEOUT.as_secs())]
    pub request_timeout_secs: u64,

    /// Log output format
    #[arg(short, long, default_value = "pretty")]
    pub log_format: LogFormat,
}

/// Initialize logging based on the specified format.
pub fn init_logging(format: &LogFormat) {
    match format {
        LogFormat::Pretty => tracing_subscriber::fmt::init(),
        LogFormat::Json => tracing_subscriber::fmt().json().init(),
        LogFormat::Compact => tracing_subscriber::fmt().compact().init(),
    }
}

fn check_secret_length(secret: String) -> Option<String> {
    if secret.len() < MIN_TOKEN_SECRET_LENGTH {
        error!(
            "Token secret is shorter than {} characters. Use a longer secret",
            MIN_TOKEN_SECRET_LENGTH
        );
        return None;
    }
    Some(secret)
}

/// Load the token signing secret from environment variable or file.
/// Returns None and logs an error if the secret cannot be loaded.
pub fn load_token_secret(token_secret_file: Option<&str>) -> Option<String> {
    let secret = if let Ok(secret) = std::env::var(TOKEN_SECRET_ENV) {
        // Clear the environment variable to prevent leaking
        // SAFETY: We're single-threaded at this point during startup,
        // and no other code is reading this environment variable.
        unsafe { std::env::remove_var(TOKEN_SECRET_ENV) };
        secret
    } else if let Some(path) = token_secret_file {
        match std::fs::read_to_string(path) {
            Ok(content) => content.trim().to_string(),
            Err(e) => {
                error!(path = %path, error = %e, "Failed to read token secret file");
                return None;
            }
        }
    } else {
        error!(
            "Token secret is required. Set {} environment variable (recommended) or use --token-secret-file",
            TOKEN_SECRET_ENV
        );
        return None;
    };

    check_secret_length(secret)
}

/// Parse and validate the frontend URL.
/// Returns None and logs an error if validation fails.
pub fn validate_frontend_url(frontend_url: &str) -> Option<Url> {
    let url = match Url::parse(frontend_url) {
        Ok(url) => url,
        Err(e) => {
            error!(url = %frontend_url, error = %e, "Invalid frontend URL");
            return None;
        }
    };

    if !matches!(url.scheme(), "http" | "https") {
        error!(url = %frontend_url, "Frontend URL must use http or https");
        return None;
    }

    Some(url)
}

/// Build ServerConfig from validated arguments.
/// Returns None and logs an error if the rate limiter settings are unusable.
pub fn build_config(
    args: &Args,
    db: Database,
    token_secret: String,
    frontend_url: Url,
) -> Option<ServerConfig> {
    let rate_limit = RateLimitConfig {
        enabled: args.ratelimiter_enabled,
        requests: args.ratelimiter_requests,
        time_frame: Duration::from_secs(args.ratelimiter_time_frame_secs),
        policy: args.ratelimiter_policy,
    };
    let admission = match build_policy(&rate_limit) {
        Ok(admission) => admission,
        Err(e) => {
            error!(error = %e, "Invalid rate limiter configuration");
            return None;
        }
    };

    if args.basic_pass.is_none() {
        warn!("AUTH_BASIC_PASS is not set, operational endpoints will reject every request");
    }

    Some(ServerConfig {
        db,
        token: TokenConfig {
            secret: token_secret.into_bytes(),
            issuer: args.token_issuer.clone(),
            audience: args.token_audience.clone(),
            expiry: Duration::from_secs(args.token_expiry_secs),
        },
        basic_auth: BasicAuthConfig::new(&args.basic_user, args.basic_pass.as_deref()),
        cache: CacheConfig {
            enabled: args.cache_enabled,
            ttl: Duration::from_secs(args.cache_ttl_secs),
            capacity: args.cache_capacity,
        },
        admission,
        mail: MailConfig {
            invitation_ttl: Duration::from_secs(args.invitation_expiry_secs),
            retry: RetryPolicy::default(),
        },
        frontend_url,
        env: args.env.clone(),
        request_timeout: Duration::from_secs(args.request_timeout_secs),
        notifier: Arc::new(LogNotifier),
    })
}

/// Open the database, logging errors if it fails.
pub async fn open_database(path: &str) -> Option<Database> {
    match Database::open(path).await {
        Ok(db) => {
            info!(path = %path, "Database opened");
            Some(db)
        }
        Err(e) => {
            error!(path = %path, error = %e, "Failed to open database");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let args = Args::try_parse_from(["hubgate"]).unwrap();
        assert_eq!(args.ratelimiter_requests, 20);
        assert_eq!(args.ratelimiter_time_frame_secs, 5);
        assert_eq!(args.ratelimiter_policy, RateLimitPolicyKind::FixedWindow);
        assert!(args.cache_enabled);
        assert_eq!(args.request_timeout_secs, 60);
    }

    #[test]
    fn test_policy_flag() {
        let args = Args::try_parse_from([
            "hubgate",
            "--ratelimiter-policy",
            "token-bucket",
            "--cache-enabled",
            "false",
        ])
        .unwrap();
        assert_eq!(args.ratelimiter_policy, RateLimitPolicyKind::TokenBucket);
        assert!(!args.cache_enabled);
    }

    #[test]
    fn test_short_secret_rejected() {
        assert!(check_secret_length("too-short".to_string()).is_none());
        assert!(check_secret_length("x".repeat(32)).is_some());
    }

    #[test]
    fn test_frontend_url_validation() {
        assert!(validate_frontend_url("https://hub.example.com").is_some());
        assert!(validate_frontend_url("ftp://hub.example.com").is_none());
        assert!(validate_frontend_url("not a url").is_none());
    }
}
