mod auth;
mod error;
mod health;
mod posts;
mod users;

use axum::Router;
use std::sync::Arc;

use crate::auth::BasicAuthConfig;
use crate::db::Database;
use crate::identity::{IdentityResolver, MokaIdentityCache};
use crate::jwt::JwtConfig;
use crate::saga::RegistrationSaga;

pub use error::{ApiError, Envelope};

/// Everything the API handlers share.
#[derive(Clone)]
pub struct ApiContext {
    pub db: Database,
    pub jwt: Arc<JwtConfig>,
    pub identities: IdentityResolver,
    pub saga: Arc<RegistrationSaga>,
    pub basic_auth: BasicAuthConfig,
    pub env: String,
    /// Present when the in-process cache backs `identities`
    pub cache: Option<Arc<MokaIdentityCache>>,
}

/// Create the API router.
pub fn create_api_router(ctx: ApiContext) -> Router {
    let health_state = health::HealthState {
        db: ctx.db.clone(),
        env: ctx.env,
        basic_auth: ctx.basic_auth,
        cache: ctx.cache,
    };

    let auth_state = auth::AuthState {
        db: ctx.db.clone(),
        jwt: ctx.jwt.clone(),
        saga: ctx.saga.clone(),
    };

    let posts_state = posts::PostsState {
        db: ctx.db.clone(),
        jwt: ctx.jwt.clone(),
        identities: ctx.identities.clone(),
    };

    let users_state = users::UsersState {
        db: ctx.db,
        jwt: ctx.jwt,
        identities: ctx.identities,
        saga: ctx.saga,
    };

    Router::new()
        .merge(health::router(health_state))
        .nest("/auth", auth::router(auth_state))
        .nest("/posts", posts::router(posts_state))
        .nest("/users", users::router(users_state))
}
