//! Posts API.
//!
//! All endpoints require a bearer token. Updates are guarded by the post's
//! version; editing someone else's post needs `moderator`, deleting it `admin`.

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde::Deserialize;
use std::sync::Arc;

use super::error::{ApiError, ResultExt, envelope, validate_len};
use crate::auth::{Auth, check_resource_ownership};
use crate::db::{Database, NewPost, Post};
use crate::identity::IdentityResolver;
use crate::impl_has_auth_backend;
use crate::jwt::JwtConfig;

const MAX_TITLE: usize = 200;
const MAX_CONTENT: usize = 1000;

/// Minimum role for editing a post owned by someone else.
const EDIT_OTHERS_ROLE: &str = "moderator";
/// Minimum role for deleting a post owned by someone else.
const DELETE_OTHERS_ROLE: &str = "admin";

/// State for posts endpoints.
#[derive(Clone)]
pub struct PostsState {
    pub db: Database,
    pub jwt: Arc<JwtConfig>,
    pub identities: IdentityResolver,
}

impl_has_auth_backend!(PostsState);

pub fn router(state: PostsState) -> Router {
    Router::new()
        .route("/", post(create_post))
        .route(
            "/{id}",
            get(get_post).patch(update_post).delete(delete_post),
        )
        .route("/{id}/comments", post(create_comment))
        .with_state(state)
}

// --- Request types ---

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct CreatePostRequest {
    title: String,
    content: String,
    #[serde(default)]
    tags: Vec<String>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct UpdatePostRequest {
    title: Option<String>,
    content: Option<String>,
    /// Version the client last saw. Defaults to the version read by this request.
    version: Option<i64>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct CreateCommentRequest {
    content: String,
}

// --- Helpers ---

async fn load_post(db: &Database, id: i64) -> Result<Post, ApiError> {
    db.posts()
        .get_by_id(id)
        .await
        .db_err("Failed to get post")?
        .ok_or_else(|| ApiError::not_found("post not found"))
}

// --- Handlers ---

async fn create_post(
    State(state): State<PostsState>,
    Auth(auth): Auth,
    Json(payload): Json<CreatePostRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_len("title", &payload.title, 1, MAX_TITLE)?;
    validate_len("content", &payload.content, 1, MAX_CONTENT)?;

    let post = state
        .db
        .posts()
        .create(&NewPost {
            user_id: auth.user.id,
            title: &payload.title,
            content: &payload.content,
            tags: &payload.tags,
        })
        .await
        .db_err("Failed to create post")?;

    Ok((StatusCode::CREATED, envelope(post)))
}

async fn get_post(
    State(state): State<PostsState>,
    Auth(_auth): Auth,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let mut post = load_post(&state.db, id).await?;

    let comments = state
        .db
        .comments()
        .list_by_post(post.id)
        .await
        .db_err("Failed to list comments")?;
    post.comments = Some(comments);

    Ok(envelope(post))
}

async fn update_post(
    State(state): State<PostsState>,
    Auth(auth): Auth,
    Path(id): Path<i64>,
    Json(payload): Json<UpdatePostRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if payload.title.is_none() && payload.content.is_none() {
        return Err(ApiError::bad_request("nothing to update"));
    }
    if let Some(title) = &payload.title {
        validate_len("title", title, 1, MAX_TITLE)?;
    }
    if let Some(content) = &payload.content {
        validate_len("content", content, 1, MAX_CONTENT)?;
    }

    let post = load_post(&state.db, id).await?;
    check_resource_ownership(&state.db, &auth, post.user_id, EDIT_OTHERS_ROLE).await?;

    let expected_version = payload.version.unwrap_or(post.version);
    let title = payload.title.unwrap_or(post.title);
    let content = payload.content.unwrap_or(post.content);

    let updated = state
        .db
        .posts()
        .update_versioned(post.id, expected_version, &title, &content)
        .await
        .map_err(|e| {
            tracing::info!(post_id = id, expected_version, error = %e, "Post update rejected");
            ApiError::from_store("Failed to update post", e)
        })?;

    Ok(envelope(updated))
}

async fn delete_post(
    State(state): State<PostsState>,
    Auth(auth): Auth,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let post = load_post(&state.db, id).await?;
    check_resource_ownership(&state.db, &auth, post.user_id, DELETE_OTHERS_ROLE).await?;

    let deleted = state
        .db
        .posts()
        .delete(post.id)
        .await
        .db_err("Failed to delete post")?;

    if !deleted {
        return Err(ApiError::not_found("post not found"));
    }
    Ok(StatusCode::NO_CONTENT)
}

async fn create_comment(
    State(state): State<PostsState>,
    Auth(auth): Auth,
    Path(id): Path<i64>,
    Json(payload): Json<CreateCommentRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_len("content", &payload.content, 1, MAX_CONTENT)?;
    let post = load_post(&state.db, id).await?;

    let comment = state
        .db
        .comments()
        .create(post.id, auth.user.id, &payload.content)
        .await
        .db_err("Failed to create comment")?;

    Ok((StatusCode::CREATED, envelope(comment)))
}
