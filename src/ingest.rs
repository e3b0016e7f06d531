//! Feed ingestion and sync coordination.
//!
//! Ingestion for one feed is fetch → parse → freshness filter → one
//! transaction persisting the new items together with their unread
//! fan-out. Ingestion of the same feed is serialized through a per-feed
//! lease; different feeds run fully in parallel.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use reqwest::Client;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::db::{Database, Item};
use crate::error::{Error, Result};
use crate::parser::{self, ContentFormat};

const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncStatus {
    Successful,
    Failed,
}

/// Per-feed outcome of a sync pass. Errors are carried as descriptors,
/// never propagated, so one feed cannot abort a batch.
#[derive(Debug, Clone, Serialize)]
pub struct SyncOutcome {
    pub feed_id: i64,
    pub status: SyncStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub struct Ingestor {
    client: Client,
    db: Arc<Database>,
    feed_locks: std::sync::Mutex<HashMap<i64, Arc<Mutex<()>>>>,
}

impl Ingestor {
    pub fn new(db: Arc<Database>) -> Self {
        Self::with_timeout(db, DEFAULT_FETCH_TIMEOUT)
    }

    /// Build an ingestor whose fetches are bounded by `timeout`; the
    /// timeout elapsing surfaces as a fetch error, never a hang.
    pub fn with_timeout(db: Arc<Database>, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent("feedmark/0.1 (feed aggregator)")
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            db,
            feed_locks: std::sync::Mutex::new(HashMap::new()),
        }
    }

    fn feed_lock(&self, feed_id: i64) -> Arc<Mutex<()>> {
        let mut locks = self.feed_locks.lock().expect("feed lock registry poisoned");
        locks.entry(feed_id).or_default().clone()
    }

    /// Ingest one feed, returning the newly persisted items.
    ///
    /// The feed row is re-read under the lease so two callers can never
    /// both observe a stale watermark and double-insert.
    pub async fn ingest(&self, feed_id: i64) -> Result<Vec<Item>> {
        let lock = self.feed_lock(feed_id);
        let _lease = lock.lock().await;

        let feed = self
            .db
            .get_feed(feed_id)
            .await?
            .ok_or(Error::FeedNotFound)?;

        let body = self.fetch(&feed.url).await?;
        if body.trim().is_empty() {
            return Ok(Vec::new());
        }

        let format: ContentFormat = feed.content_format.parse()?;
        let candidates = parser::parse_items(&body, format, &feed.time_format)?;

        // Strictly newer than the watermark: re-ingesting unchanged
        // content is a no-op.
        let fresh: Vec<_> = candidates
            .into_iter()
            .filter(|c| c.published_at > feed.last_fresh_at)
            .collect();
        if fresh.is_empty() {
            return Ok(Vec::new());
        }

        let persisted = self
            .db
            .insert_items_with_fanout(feed.id, &fresh, Utc::now())
            .await?;
        info!(
            "Ingested {} new items for feed '{}'",
            persisted.len(),
            feed.url
        );
        Ok(persisted)
    }

    async fn fetch(&self, url: &str) -> Result<String> {
        let response = self.client.get(url).send().await.map_err(Error::Fetch)?;
        let response = response.error_for_status().map_err(Error::Fetch)?;
        response.text().await.map_err(Error::Fetch)
    }

    /// Ingest one feed, folding any failure into the outcome.
    pub async fn sync_one(&self, feed_id: i64) -> SyncOutcome {
        match self.ingest(feed_id).await {
            Ok(_) => SyncOutcome {
                feed_id,
                status: SyncStatus::Successful,
                error: None,
            },
            Err(e) => {
                error!("Sync failed for feed {}: {}", feed_id, e);
                SyncOutcome {
                    feed_id,
                    status: SyncStatus::Failed,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    /// Sync every feed the user follows, independently; one feed's
    /// failure never suppresses the others.
    pub async fn sync_all(&self, username: &str) -> Result<Vec<SyncOutcome>> {
        let feeds = self.db.feeds_followed_by(username).await?;
        let mut outcomes = Vec::with_capacity(feeds.len());
        for feed in feeds {
            outcomes.push(self.sync_one(feed.id).await);
        }
        Ok(outcomes)
    }

    /// Sync every registered feed, used by the periodic refresh loop.
    pub async fn refresh_all(&self) -> Result<Vec<SyncOutcome>> {
        let feeds = self.db.get_all_feeds().await?;
        info!("Refreshing {} feeds", feeds.len());

        let mut outcomes = Vec::with_capacity(feeds.len());
        for feed in feeds {
            outcomes.push(self.sync_one(feed.id).await);
        }
        Ok(outcomes)
    }
}

pub async fn start_background_refresh(ingestor: Arc<Ingestor>, interval_minutes: u64) {
    let interval = Duration::from_secs(interval_minutes * 60);

    // Do initial fetch
    info!("Starting initial feed refresh");
    if let Err(e) = ingestor.refresh_all().await {
        error!("Initial feed refresh failed: {}", e);
    }

    // Then schedule periodic refreshes
    loop {
        tokio::time::sleep(interval).await;
        info!("Starting scheduled feed refresh");
        if let Err(e) = ingestor.refresh_all().await {
            error!("Scheduled feed refresh failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_status_serializes_screaming() {
        let outcome = SyncOutcome {
            feed_id: 1,
            status: SyncStatus::Successful,
            error: None,
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "SUCCESSFUL");
        assert!(json.get("error").is_none());
    }

    #[test]
    fn test_failed_outcome_carries_error() {
        let outcome = SyncOutcome {
            feed_id: 2,
            status: SyncStatus::Failed,
            error: Some("fetch failed: timeout".to_string()),
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "FAILED");
        assert_eq!(json["error"], "fetch failed: timeout");
    }

    #[tokio::test]
    async fn test_feed_lock_is_shared_per_feed() {
        let db = Arc::new(Database::new("sqlite::memory:").await.unwrap());
        let ingestor = Ingestor::new(db);

        let a = ingestor.feed_lock(1);
        let b = ingestor.feed_lock(1);
        let c = ingestor.feed_lock(2);

        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
    }
}
