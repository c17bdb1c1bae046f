pub mod api;
pub mod auth;
pub mod cleanup;
pub mod cli;
pub mod cors;
pub mod db;
pub mod deadline;
pub mod identity;
pub mod jwt;
pub mod mailer;
pub mod rate_limit;
pub mod saga;

use api::{ApiContext, create_api_router};
use auth::BasicAuthConfig;
use axum::{Router, middleware};
use db::Database;
use identity::{IdentityCache, IdentityResolver, MokaIdentityCache};
use jwt::JwtConfig;
use mailer::Notifier;
use rate_limit::{AdmissionPolicy, admission_control};
use saga::{RegistrationSaga, RetryPolicy};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use url::Url;

/// Environment name that turns off notification sandboxing.
pub const PRODUCTION_ENV: &str = "production";

/// Bearer token settings.
#[derive(Clone)]
pub struct TokenConfig {
    pub secret: Vec<u8>,
    pub issuer: String,
    pub audience: String,
    pub expiry: Duration,
}

/// Identity cache settings.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub enabled: bool,
    pub ttl: Duration,
    pub capacity: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl: Duration::from_secs(60),
            capacity: 10_000,
        }
    }
}

/// Registration mail settings.
#[derive(Debug, Clone)]
pub struct MailConfig {
    pub invitation_ttl: Duration,
    pub retry: RetryPolicy,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            invitation_ttl: Duration::from_secs(3 * 24 * 60 * 60),
            retry: RetryPolicy::default(),
        }
    }
}

pub struct ServerConfig {
    /// Database connection (cloneable, uses connection pool internally)
    pub db: Database,
    pub token: TokenConfig,
    /// Credentials for operational endpoints
    pub basic_auth: BasicAuthConfig,
    pub cache: CacheConfig,
    /// Admission policy, `None` when rate limiting is disabled
    pub admission: Option<Arc<dyn AdmissionPolicy>>,
    pub mail: MailConfig,
    /// Frontend base URL used in activation links
    pub frontend_url: Url,
    /// Deployment environment name (e.g. "development", "production")
    pub env: String,
    /// Upper bound for a whole request
    pub request_timeout: Duration,
    pub notifier: Arc<dyn Notifier>,
}

/// Create the application router with the given configuration.
pub fn create_app(config: &ServerConfig) -> Router {
    let jwt = Arc::new(JwtConfig::new(
        &config.token.secret,
        &config.token.issuer,
        &config.token.audience,
        config.token.expiry,
    ));

    let cache = config
        .cache
        .enabled
        .then(|| Arc::new(MokaIdentityCache::new(config.cache.ttl, config.cache.capacity)));
    let identities = IdentityResolver::new(
        Arc::new(config.db.clone()),
        cache.clone().map(|c| c as Arc<dyn IdentityCache>),
    );

    let saga = RegistrationSaga::new(
        Arc::new(config.db.clone()),
        config.notifier.clone(),
        identities.clone(),
    )
    .with_retry(config.mail.retry)
    .with_invitation_ttl(config.mail.invitation_ttl)
    .with_activation_base_url(config.frontend_url.as_str())
    .with_sandbox(config.env != PRODUCTION_ENV);

    let mut api_router = create_api_router(ApiContext {
        db: config.db.clone(),
        jwt,
        identities,
        saga: Arc::new(saga),
        basic_auth: config.basic_auth.clone(),
        env: config.env.clone(),
        cache,
    });

    if let Some(policy) = &config.admission {
        api_router = api_router.layer(middleware::from_fn_with_state(
            policy.clone(),
            admission_control,
        ));
    }

    // The deadline wraps admission control; CORS answers preflights before either.
    Router::new()
        .nest("/v1", api_router)
        .layer(middleware::from_fn_with_state(
            config.request_timeout,
            deadline::request_deadline,
        ))
        .layer(cors::cors_layer(&config.frontend_url))
}

/// Run cleanup tasks and spawn background scheduler.
/// Call this before starting the server.
pub async fn init_cleanup(db: &Database, admission: Option<Arc<dyn AdmissionPolicy>>) {
    cleanup::run_cleanup(db).await;
    cleanup::spawn_cleanup_scheduler(db.clone(), admission);
}

/// Serve on `listener` until the server exits.
/// Call `init_cleanup` first.
pub async fn run_server(config: ServerConfig, listener: TcpListener) -> Result<(), std::io::Error> {
    let app = create_app(&config);
    let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
    axum::serve(listener, make_service).await
}
