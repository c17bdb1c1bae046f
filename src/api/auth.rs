//! Registration and token issuance.

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::post,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::error::{ApiError, ResultExt, envelope, validate_len};
use crate::auth::verify_password_or_decoy;
use crate::db::{Database, User};
use crate::jwt::JwtConfig;
use crate::saga::{RegistrationRequest, RegistrationSaga};

#[derive(Clone)]
pub struct AuthState {
    pub db: Database,
    pub jwt: Arc<JwtConfig>,
    pub saga: Arc<RegistrationSaga>,
}

pub fn router(state: AuthState) -> Router {
    Router::new()
        .route("/user", post(register_user))
        .route("/token", post(create_token))
        .with_state(state)
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct RegisterUserRequest {
    username: String,
    email: String,
    password: String,
}

#[derive(Serialize)]
struct UserWithToken {
    #[serde(flatten)]
    user: User,
    token: String,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct CreateTokenRequest {
    email: String,
    password: String,
}

#[derive(Serialize)]
struct TokenResponse {
    token: String,
    expires_at: u64,
}

fn validate_email(email: &str) -> Result<(), ApiError> {
    validate_len("email", email, 1, 255)?;
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(()),
        _ => Err(ApiError::bad_request("email is not a valid address")),
    }
}

async fn register_user(
    State(state): State<AuthState>,
    Json(payload): Json<RegisterUserRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let username = payload.username.trim();
    validate_len("username", username, 3, 100)?;
    let email = payload.email.trim();
    validate_email(email)?;
    validate_len("password", &payload.password, 3, 72)?;

    let run = state
        .saga
        .run(RegistrationRequest {
            username: username.to_string(),
            email: email.to_string(),
            password: payload.password,
        })
        .await;
    let registration = run.result?;

    Ok((
        StatusCode::CREATED,
        envelope(UserWithToken {
            user: registration.user,
            token: registration.token,
        }),
    ))
}

async fn create_token(
    State(state): State<AuthState>,
    Json(payload): Json<CreateTokenRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_email(payload.email.trim())?;
    validate_len("password", &payload.password, 3, 72)?;

    let user = state
        .db
        .users()
        .get_activated_by_email(payload.email.trim())
        .await
        .db_err("Failed to look up user")?;

    // Unknown and pending accounts go through the same argon2 work as a wrong password.
    let hash = user.as_ref().map(|u| u.password_hash.clone());
    let password = payload.password;
    let matches =
        tokio::task::spawn_blocking(move || verify_password_or_decoy(hash.as_deref(), &password))
            .await
            .db_err("Password verification task failed")?;

    let user = match user {
        Some(user) if matches => user,
        Some(user) => {
            tracing::warn!(user_id = user.id, "Token request with wrong password");
            return Err(ApiError::unauthorized("unauthorized"));
        }
        None => return Err(ApiError::unauthorized("unauthorized")),
    };

    let issued = state
        .jwt
        .generate_token(user.id)
        .db_err("Failed to generate token")?;

    Ok((
        StatusCode::CREATED,
        envelope(TokenResponse {
            token: issued.token,
            expires_at: issued.expires_at,
        }),
    ))
}
