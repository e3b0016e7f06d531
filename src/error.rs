use axum::http::StatusCode;
use thiserror::Error;

/// Errors produced by the ingestion engine and the read-state store.
///
/// Fetch failures are transient and retryable by the caller; malformed
/// content is not retryable until the feed's configuration or source is
/// fixed. Conflict variants describe a state the caller can observe, not
/// a bug.
#[derive(Debug, Error)]
pub enum Error {
    #[error("fetch failed: {0}")]
    Fetch(#[source] reqwest::Error),

    #[error("malformed feed content: {0}")]
    MalformedItem(String),

    #[error("feed id not found")]
    FeedNotFound,

    #[error("item id not found")]
    ItemNotFound,

    #[error("user '{user}' already follows feed '{feed_id}'")]
    AlreadyFollowing { user: String, feed_id: i64 },

    #[error("user '{user}' does not follow feed '{feed_id}'")]
    NotFollowing { user: String, feed_id: i64 },

    #[error("username '{0}' is already taken")]
    UsernameTaken(String),

    #[error("{0}")]
    InvalidRequest(String),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("password hashing failed: {0}")]
    Password(String),
}

impl Error {
    /// HTTP status the API surface maps this error to.
    pub fn status(&self) -> StatusCode {
        match self {
            Error::Fetch(_) | Error::MalformedItem(_) => StatusCode::BAD_GATEWAY,
            Error::FeedNotFound | Error::ItemNotFound => StatusCode::NOT_FOUND,
            Error::AlreadyFollowing { .. }
            | Error::NotFollowing { .. }
            | Error::UsernameTaken(_) => StatusCode::CONFLICT,
            Error::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Error::Storage(_) | Error::Password(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
