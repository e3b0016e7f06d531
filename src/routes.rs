use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;

use crate::auth::{self, AuthUser};
use crate::db::{Database, FeedSummary};
use crate::error::Error;
use crate::ingest::Ingestor;

pub struct AppState {
    pub db: Arc<Database>,
    pub ingestor: Arc<Ingestor>,
}

/// Wrapper translating domain errors into HTTP responses.
pub struct ApiError(Error);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.0.status();
        (status, Json(json!({ "message": self.0.to_string() }))).into_response()
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        ApiError(err)
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/users", post(signup))
        .route("/api/feeds", get(list_feeds))
        .route("/api/feeds/follow", post(follow))
        .route("/api/feeds/unfollow", delete(unfollow))
        .route("/api/items/:item_id/read", post(mark_read))
        .route("/api/items/read-multiple", post(mark_read_multiple))
        .route("/api/my-feeds", get(my_feeds))
        .route("/api/my-feeds/new", get(unread_all))
        .route("/api/my-feeds/old", get(read_all))
        .route("/api/my-feeds/update", post(refresh_my_feeds))
        .route("/api/my-feeds/:feed_id/new", get(unread_for_feed))
        .route("/api/my-feeds/:feed_id/old", get(read_for_feed))
        .route("/api/my-feeds/:feed_id/update", post(refresh_feed))
        .route("/health", get(health))
        .with_state(state)
}

// Route handlers

#[derive(Deserialize)]
pub struct SignupRequest {
    username: Option<String>,
    password: Option<String>,
}

async fn signup(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SignupRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let (username, password) = match (req.username, req.password) {
        (Some(u), Some(p)) if !u.is_empty() && !p.is_empty() => (u, p),
        _ => {
            return Err(Error::InvalidRequest(
                "username and password are required".to_string(),
            )
            .into())
        }
    };

    let hash = auth::hash_password(&password)?;
    state.db.create_user(&username, &hash).await?;

    Ok((StatusCode::CREATED, Json(json!({ "username": username }))))
}

async fn list_feeds(
    _user: AuthUser,
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<FeedSummary>>, ApiError> {
    let feeds = state.db.get_all_feeds().await?;
    let summaries = feeds
        .into_iter()
        .map(|f| FeedSummary { id: f.id, url: f.url })
        .collect();
    Ok(Json(summaries))
}

#[derive(Deserialize)]
pub struct FeedIdRequest {
    feed_id: Option<i64>,
}

impl FeedIdRequest {
    fn required(self) -> Result<i64, ApiError> {
        self.feed_id.ok_or_else(|| {
            Error::InvalidRequest("missing 'feed_id' in request body".to_string()).into()
        })
    }
}

async fn follow(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Json(req): Json<FeedIdRequest>,
) -> Result<StatusCode, ApiError> {
    state.db.follow(&user.0, req.required()?).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn unfollow(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Json(req): Json<FeedIdRequest>,
) -> Result<StatusCode, ApiError> {
    state.db.unfollow(&user.0, req.required()?).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn mark_read(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(item_id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    state.db.mark_read(&user.0, item_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
pub struct ReadMultipleRequest {
    item_ids: Option<Vec<String>>,
}

async fn mark_read_multiple(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Json(req): Json<ReadMultipleRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let item_ids = req.item_ids.ok_or_else(|| {
        Error::InvalidRequest("missing 'item_ids' in request body".to_string())
    })?;

    let outcomes = state.db.mark_read_bulk(&user.0, &item_ids).await?;
    Ok(Json(outcomes))
}

async fn my_feeds(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<FeedSummary>>, ApiError> {
    let feeds = state.db.feeds_followed_by(&user.0).await?;
    Ok(Json(feeds))
}

async fn unread_all(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let items = state.db.unread_for(&user.0, None).await?;
    Ok(Json(items))
}

async fn unread_for_feed(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(feed_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    ensure_followed(&state.db, &user.0, feed_id).await?;
    let items = state.db.unread_for(&user.0, Some(feed_id)).await?;
    Ok(Json(items))
}

async fn read_all(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let items = state.db.read_for(&user.0, None).await?;
    Ok(Json(items))
}

async fn read_for_feed(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(feed_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    ensure_followed(&state.db, &user.0, feed_id).await?;
    let items = state.db.read_for(&user.0, Some(feed_id)).await?;
    Ok(Json(items))
}

async fn ensure_followed(db: &Database, username: &str, feed_id: i64) -> Result<(), ApiError> {
    db.get_feed(feed_id).await?.ok_or(Error::FeedNotFound)?;
    if !db.is_following(username, feed_id).await? {
        return Err(Error::NotFollowing {
            user: username.to_string(),
            feed_id,
        }
        .into());
    }
    Ok(())
}

async fn refresh_feed(
    _user: AuthUser,
    State(state): State<Arc<AppState>>,
    Path(feed_id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    state.db.get_feed(feed_id).await?.ok_or(Error::FeedNotFound)?;
    let outcome = state.ingestor.sync_one(feed_id).await;
    Ok(Json(outcome))
}

async fn refresh_my_feeds(
    user: AuthUser,
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let outcomes = state.ingestor.sync_all(&user.0).await?;
    Ok(Json(outcomes))
}

async fn health() -> impl IntoResponse {
    "OK"
}
