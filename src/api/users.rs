use axum::{
    Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, put},
};
use std::sync::Arc;

use super::error::{ApiError, ResultExt, envelope};
use crate::auth::Auth;
use crate::db::{Database, StoreError};
use crate::identity::{IdentityResolver, ResolveError};
use crate::impl_has_auth_backend;
use crate::jwt::JwtConfig;
use crate::saga::RegistrationSaga;

#[derive(Clone)]
pub struct UsersState {
    pub db: Database,
    pub jwt: Arc<JwtConfig>,
    pub identities: IdentityResolver,
    pub saga: Arc<RegistrationSaga>,
}

impl_has_auth_backend!(UsersState);

pub fn router(state: UsersState) -> Router {
    Router::new()
        .route("/activate/{token}", put(activate_user))
        .route("/{id}", get(get_user))
        .route("/{id}/follow", put(follow_user))
        .route("/{id}/unfollow", put(unfollow_user))
        .with_state(state)
}

async fn activate_user(
    State(state): State<UsersState>,
    Path(token): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state.saga.activate(&token).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn get_user(
    State(state): State<UsersState>,
    Auth(_auth): Auth,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    match state.identities.resolve(id).await {
        Ok(user) => Ok(envelope(user)),
        Err(ResolveError::NotFound) => Err(ApiError::not_found("user not found")),
        Err(e) => Err(ApiError::db_error("Failed to resolve user", e)),
    }
}

/// Ensure the target exists and is not the caller.
async fn follow_target(state: &UsersState, caller: i64, target: i64) -> Result<(), ApiError> {
    if caller == target {
        return Err(ApiError::bad_request("cannot follow yourself"));
    }
    state
        .db
        .users()
        .get_by_id(target)
        .await
        .db_err("Failed to get user")?
        .ok_or_else(|| ApiError::not_found("user not found"))?;
    Ok(())
}

async fn follow_user(
    State(state): State<UsersState>,
    Auth(auth): Auth,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    follow_target(&state, auth.user.id, id).await?;

    match state.db.followers().follow(id, auth.user.id).await {
        Ok(()) => Ok(StatusCode::NO_CONTENT),
        Err(StoreError::Conflict) => Err(ApiError::conflict("already following this user")),
        Err(e) => Err(ApiError::db_error("Failed to follow user", e)),
    }
}

async fn unfollow_user(
    State(state): State<UsersState>,
    Auth(auth): Auth,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    follow_target(&state, auth.user.id, id).await?;

    state
        .db
        .followers()
        .unfollow(id, auth.user.id)
        .await
        .db_err("Failed to unfollow user")?;
    Ok(StatusCode::NO_CONTENT)
}
