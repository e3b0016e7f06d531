use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{sqlite::SqlitePoolOptions, FromRow, SqlitePool};

use crate::config::FeedConfig;
use crate::error::{Error, Result};
use crate::parser::ParsedItem;

#[derive(Debug, Clone, FromRow)]
pub struct Feed {
    pub id: i64,
    pub url: String,
    pub content_format: String,
    pub time_format: String,
    /// Watermark separating already-ingested from not-yet-ingested items.
    /// Only ever moves forward.
    pub last_fresh_at: DateTime<Utc>,
}

/// The shape feeds are exposed with over the API.
#[derive(Debug, Clone, FromRow, Serialize, PartialEq, Eq)]
pub struct FeedSummary {
    pub id: i64,
    pub url: String,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Item {
    pub id: i64,
    pub feed_id: i64,
    pub url: String,
    pub title: String,
    pub description: String,
    pub published_at: DateTime<Utc>,
}

/// Per-item outcome of a bulk mark-read call. The id is echoed back as
/// the caller gave it, which may not be a valid item id at all.
#[derive(Debug, Clone, Serialize)]
pub struct MarkReadOutcome {
    pub item_id: String,
    pub status: MarkReadStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MarkReadStatus {
    Successful,
    Failed,
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    pub async fn initialize(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                username TEXT PRIMARY KEY,
                password TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS feeds (
                id INTEGER PRIMARY KEY,
                url TEXT NOT NULL UNIQUE,
                content_format TEXT NOT NULL,
                time_format TEXT NOT NULL,
                last_fresh_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS items (
                id INTEGER PRIMARY KEY,
                feed_id INTEGER NOT NULL REFERENCES feeds(id),
                url TEXT NOT NULL,
                title TEXT NOT NULL,
                description TEXT NOT NULL,
                published_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS follows (
                id INTEGER PRIMARY KEY,
                username TEXT NOT NULL REFERENCES users(username),
                feed_id INTEGER NOT NULL REFERENCES feeds(id),
                UNIQUE(username, feed_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS unreads (
                id INTEGER PRIMARY KEY,
                username TEXT NOT NULL REFERENCES users(username),
                item_id INTEGER NOT NULL REFERENCES items(id),
                feed_id INTEGER NOT NULL REFERENCES feeds(id),
                UNIQUE(username, item_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS reads (
                id INTEGER PRIMARY KEY,
                username TEXT NOT NULL REFERENCES users(username),
                item_id INTEGER NOT NULL REFERENCES items(id),
                feed_id INTEGER NOT NULL REFERENCES feeds(id),
                UNIQUE(username, item_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_items_feed_published
            ON items(feed_id, published_at DESC)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Upsert pre-registered feeds from configuration, keyed by URL.
    ///
    /// A brand-new feed starts its watermark at the current wall clock,
    /// so the first ingest only picks up items published afterwards.
    /// Re-registering never touches an existing watermark.
    pub async fn register_feeds(&self, configs: &[FeedConfig]) -> Result<()> {
        for config in configs {
            sqlx::query(
                r#"
                INSERT INTO feeds (url, content_format, time_format, last_fresh_at)
                VALUES (?, ?, ?, ?)
                ON CONFLICT(url) DO UPDATE SET
                    content_format = excluded.content_format,
                    time_format = excluded.time_format
                "#,
            )
            .bind(&config.url)
            .bind(&config.content_format)
            .bind(&config.time_format)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    pub async fn get_all_feeds(&self) -> Result<Vec<Feed>> {
        let feeds = sqlx::query_as::<_, Feed>("SELECT * FROM feeds ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        Ok(feeds)
    }

    pub async fn get_feed(&self, feed_id: i64) -> Result<Option<Feed>> {
        let feed = sqlx::query_as::<_, Feed>("SELECT * FROM feeds WHERE id = ?")
            .bind(feed_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(feed)
    }

    pub async fn get_item(&self, item_id: i64) -> Result<Option<Item>> {
        let item = sqlx::query_as::<_, Item>("SELECT * FROM items WHERE id = ?")
            .bind(item_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(item)
    }

    // ---- users ----

    pub async fn create_user(&self, username: &str, password_hash: &str) -> Result<()> {
        let existing: Option<(String,)> =
            sqlx::query_as("SELECT username FROM users WHERE username = ?")
                .bind(username)
                .fetch_optional(&self.pool)
                .await?;
        if existing.is_some() {
            return Err(Error::UsernameTaken(username.to_string()));
        }

        sqlx::query("INSERT INTO users (username, password) VALUES (?, ?)")
            .bind(username)
            .bind(password_hash)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn get_user_password(&self, username: &str) -> Result<Option<String>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT password FROM users WHERE username = ?")
                .bind(username)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(hash,)| hash))
    }

    // ---- follow / unfollow ----

    pub async fn is_following(&self, username: &str, feed_id: i64) -> Result<bool> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT id FROM follows WHERE username = ? AND feed_id = ?")
                .bind(username)
                .bind(feed_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.is_some())
    }

    /// Create the follow and catch the user up with one unread row per
    /// existing item of the feed, in a single transaction. Items the
    /// user already read stay read; a re-follow never resurfaces them.
    ///
    /// The conflict is decided by the insert itself, so two racing
    /// follows can never both succeed.
    pub async fn follow(&self, username: &str, feed_id: i64) -> Result<()> {
        self.get_feed(feed_id).await?.ok_or(Error::FeedNotFound)?;

        let mut tx = self.pool.begin().await?;

        sqlx::query("INSERT INTO follows (username, feed_id) VALUES (?, ?)")
            .bind(username)
            .bind(feed_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    Error::AlreadyFollowing {
                        user: username.to_string(),
                        feed_id,
                    }
                } else {
                    Error::Storage(e)
                }
            })?;

        sqlx::query(
            r#"
            INSERT INTO unreads (username, item_id, feed_id)
            SELECT ?, id, feed_id FROM items
            WHERE feed_id = ?
              AND id NOT IN (SELECT item_id FROM reads WHERE username = ?)
            "#,
        )
        .bind(username)
        .bind(feed_id)
        .bind(username)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Remove the follow and purge the user's unread rows for the feed.
    /// Read rows are left in place, so read history survives unfollow.
    pub async fn unfollow(&self, username: &str, feed_id: i64) -> Result<()> {
        self.get_feed(feed_id).await?.ok_or(Error::FeedNotFound)?;

        let mut tx = self.pool.begin().await?;

        // The delete doubles as the not-following check; dropping the
        // transaction on the error path rolls it back.
        let deleted = sqlx::query("DELETE FROM follows WHERE username = ? AND feed_id = ?")
            .bind(username)
            .bind(feed_id)
            .execute(&mut *tx)
            .await?;
        if deleted.rows_affected() == 0 {
            return Err(Error::NotFollowing {
                user: username.to_string(),
                feed_id,
            });
        }

        sqlx::query("DELETE FROM unreads WHERE username = ? AND feed_id = ?")
            .bind(username)
            .bind(feed_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    // ---- read-state transitions ----

    /// Atomically move an item from unread to read for a user.
    ///
    /// Marking an already-read item again is a no-op: the unread delete
    /// matches nothing and the read insert is ignored by its unique
    /// constraint, so no duplicate state window ever exists.
    pub async fn mark_read(&self, username: &str, item_id: i64) -> Result<()> {
        let item = self.get_item(item_id).await?.ok_or(Error::ItemNotFound)?;
        if !self.is_following(username, item.feed_id).await? {
            return Err(Error::NotFollowing {
                user: username.to_string(),
                feed_id: item.feed_id,
            });
        }

        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM unreads WHERE username = ? AND item_id = ?")
            .bind(username)
            .bind(item_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            INSERT INTO reads (username, item_id, feed_id)
            VALUES (?, ?, ?)
            ON CONFLICT(username, item_id) DO NOTHING
            "#,
        )
        .bind(username)
        .bind(item_id)
        .bind(item.feed_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Apply `mark_read` per raw id, aggregating outcomes. An id that
    /// does not parse, or fails to mark, never stops the others from
    /// being processed. Only an empty list is rejected wholesale.
    pub async fn mark_read_bulk(
        &self,
        username: &str,
        item_ids: &[String],
    ) -> Result<Vec<MarkReadOutcome>> {
        if item_ids.is_empty() {
            return Err(Error::InvalidRequest(
                "'item_ids' must not be empty".to_string(),
            ));
        }

        let mut outcomes = Vec::with_capacity(item_ids.len());
        for raw in item_ids {
            let result = match raw.parse::<i64>() {
                Ok(item_id) => self.mark_read(username, item_id).await,
                Err(_) => Err(Error::InvalidRequest(format!("invalid item id '{raw}'"))),
            };
            let outcome = match result {
                Ok(()) => MarkReadOutcome {
                    item_id: raw.clone(),
                    status: MarkReadStatus::Successful,
                    error: None,
                },
                Err(e) => MarkReadOutcome {
                    item_id: raw.clone(),
                    status: MarkReadStatus::Failed,
                    error: Some(e.to_string()),
                },
            };
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    // ---- ingestion persistence ----

    /// Persist newly ingested items, fan out one unread row per current
    /// follower per item, and advance the feed's freshness watermark,
    /// all in one transaction, so readers never observe items without
    /// their unread rows or vice versa.
    pub async fn insert_items_with_fanout(
        &self,
        feed_id: i64,
        items: &[ParsedItem],
        fresh_at: DateTime<Utc>,
    ) -> Result<Vec<Item>> {
        let mut tx = self.pool.begin().await?;

        let mut persisted = Vec::with_capacity(items.len());
        for item in items {
            let row: Item = sqlx::query_as(
                r#"
                INSERT INTO items (feed_id, url, title, description, published_at)
                VALUES (?, ?, ?, ?, ?)
                RETURNING id, feed_id, url, title, description, published_at
                "#,
            )
            .bind(feed_id)
            .bind(&item.url)
            .bind(&item.title)
            .bind(&item.description)
            .bind(item.published_at)
            .fetch_one(&mut *tx)
            .await?;

            sqlx::query(
                r#"
                INSERT INTO unreads (username, item_id, feed_id)
                SELECT username, ?, feed_id FROM follows WHERE feed_id = ?
                "#,
            )
            .bind(row.id)
            .bind(feed_id)
            .execute(&mut *tx)
            .await?;

            persisted.push(row);
        }

        // The watermark only ever moves forward.
        sqlx::query(
            "UPDATE feeds SET last_fresh_at = ? WHERE id = ? AND last_fresh_at < ?",
        )
        .bind(fresh_at)
        .bind(feed_id)
        .bind(fresh_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(persisted)
    }

    // ---- queries ----

    /// Unread items for a user, oldest publish date first; scoped to one
    /// feed when `feed_id` is given, else across all followed feeds.
    pub async fn unread_for(&self, username: &str, feed_id: Option<i64>) -> Result<Vec<Item>> {
        self.items_in_state("unreads", username, feed_id).await
    }

    /// Read items for a user, same scoping rules as [`unread_for`].
    ///
    /// [`unread_for`]: Database::unread_for
    pub async fn read_for(&self, username: &str, feed_id: Option<i64>) -> Result<Vec<Item>> {
        self.items_in_state("reads", username, feed_id).await
    }

    async fn items_in_state(
        &self,
        table: &str,
        username: &str,
        feed_id: Option<i64>,
    ) -> Result<Vec<Item>> {
        let items = match feed_id {
            Some(feed_id) => {
                let sql = format!(
                    r#"
                    SELECT i.* FROM items i
                    JOIN {table} s ON s.item_id = i.id
                    WHERE s.username = ? AND s.feed_id = ?
                    ORDER BY i.published_at
                    "#
                );
                sqlx::query_as::<_, Item>(&sql)
                    .bind(username)
                    .bind(feed_id)
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                let sql = format!(
                    r#"
                    SELECT i.* FROM items i
                    JOIN {table} s ON s.item_id = i.id
                    WHERE s.username = ?
                    ORDER BY i.published_at
                    "#
                );
                sqlx::query_as::<_, Item>(&sql)
                    .bind(username)
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        Ok(items)
    }

    pub async fn feeds_followed_by(&self, username: &str) -> Result<Vec<FeedSummary>> {
        let feeds = sqlx::query_as::<_, FeedSummary>(
            r#"
            SELECT f.id, f.url FROM feeds f
            JOIN follows fo ON fo.feed_id = f.id
            WHERE fo.username = ?
            ORDER BY f.id
            "#,
        )
        .bind(username)
        .fetch_all(&self.pool)
        .await?;
        Ok(feeds)
    }
}
