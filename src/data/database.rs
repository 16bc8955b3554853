//! SQLite database operations
//!
//! All database access goes through this module.
//! Implements the store traits on top of an SQLx pool.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::pool::PoolConnection;
use sqlx::{Pool, Sqlite, SqliteConnection, SqlitePool};
use std::path::Path;

use super::models::*;
use super::store::{ActivityStore, AggregateStore, AuthorStore, FeedStore};
use crate::error::AppError;

/// Database connection pool wrapper.
pub struct Database {
    pool: Pool<Sqlite>,
}

/// Raw `feeds` row; list columns are JSON encoded
#[derive(sqlx::FromRow)]
struct FeedRow {
    id: String,
    url: String,
    title: Option<String>,
    title_type: Option<String>,
    subtitle: Option<String>,
    subtitle_type: Option<String>,
    rights: Option<String>,
    icon: Option<String>,
    logo: Option<String>,
    generator: Option<String>,
    categories: String,
    hubs: String,
    secret: String,
    verification_token: String,
    subscription_state: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

fn typed_text(content: Option<String>, text_type: Option<String>) -> Option<TypedText> {
    content.map(|content| TypedText {
        content,
        text_type: text_type.unwrap_or_else(|| "text".to_string()),
    })
}

fn parse_string_list(raw: &str) -> Vec<String> {
    serde_json::from_str::<Vec<String>>(raw).unwrap_or_default()
}

fn encode_string_list(values: &[String]) -> Result<String, AppError> {
    serde_json::to_string(values).map_err(|e| AppError::Internal(e.into()))
}

async fn ensure_feed_exists(conn: &mut SqliteConnection, feed_id: &str) -> Result<(), AppError> {
    let exists = sqlx::query_scalar::<_, i64>("SELECT 1 FROM feeds WHERE id = ?")
        .bind(feed_id)
        .fetch_optional(&mut *conn)
        .await?;

    match exists {
        Some(_) => Ok(()),
        None => Err(AppError::NotFound),
    }
}

async fn load_feed(conn: &mut SqliteConnection, id: &str) -> Result<Option<Feed>, AppError> {
    let Some(row) = sqlx::query_as::<_, FeedRow>("SELECT * FROM feeds WHERE id = ?")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?
    else {
        return Ok(None);
    };

    let author_ids = sqlx::query_scalar::<_, String>(
        "SELECT author_id FROM feed_authors WHERE feed_id = ? AND role = 'author' ORDER BY position",
    )
    .bind(&row.id)
    .fetch_all(&mut *conn)
    .await?;

    let contributor_ids = sqlx::query_scalar::<_, String>(
        "SELECT author_id FROM feed_authors WHERE feed_id = ? AND role = 'contributor' ORDER BY position",
    )
    .bind(&row.id)
    .fetch_all(&mut *conn)
    .await?;

    let entry_ids = sqlx::query_scalar::<_, String>(
        "SELECT activity_id FROM feed_entries WHERE feed_id = ? ORDER BY position",
    )
    .bind(&row.id)
    .fetch_all(&mut *conn)
    .await?;

    let subscription_state = SubscriptionState::parse(&row.subscription_state).unwrap_or_else(|| {
        tracing::warn!(
            feed_id = %row.id,
            state = %row.subscription_state,
            "Unknown subscription state in database; treating as unsubscribed"
        );
        SubscriptionState::Unsubscribed
    });

    Ok(Some(Feed {
        metadata: FeedMetadata {
            title: typed_text(row.title, row.title_type),
            subtitle: typed_text(row.subtitle, row.subtitle_type),
            rights: row.rights,
            icon: row.icon,
            logo: row.logo,
            generator: row.generator,
            categories: parse_string_list(&row.categories),
            hubs: parse_string_list(&row.hubs),
        },
        id: row.id,
        url: row.url,
        author_ids,
        contributor_ids,
        entry_ids,
        subscription_state,
        credentials: FeedCredentials::from_parts(row.secret, row.verification_token),
        created_at: row.created_at,
        updated_at: row.updated_at,
    }))
}

async fn update_metadata(
    conn: &mut SqliteConnection,
    feed_id: &str,
    metadata: &FeedMetadata,
) -> Result<(), AppError> {
    let result = sqlx::query(
        r#"
        UPDATE feeds SET
            title = ?, title_type = ?, subtitle = ?, subtitle_type = ?,
            rights = ?, icon = ?, logo = ?, generator = ?,
            categories = ?, hubs = ?, updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(metadata.title.as_ref().map(|t| t.content.as_str()))
    .bind(metadata.title.as_ref().map(|t| t.text_type.as_str()))
    .bind(metadata.subtitle.as_ref().map(|t| t.content.as_str()))
    .bind(metadata.subtitle.as_ref().map(|t| t.text_type.as_str()))
    .bind(&metadata.rights)
    .bind(&metadata.icon)
    .bind(&metadata.logo)
    .bind(&metadata.generator)
    .bind(encode_string_list(&metadata.categories)?)
    .bind(encode_string_list(&metadata.hubs)?)
    .bind(Utc::now())
    .bind(feed_id)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(AppError::NotFound);
    }

    Ok(())
}

async fn upsert_author(
    conn: &mut SqliteConnection,
    author: &NewAuthor,
) -> Result<Author, AppError> {
    sqlx::query(
        r#"
        INSERT OR IGNORE INTO authors (id, external_id, name, uri, email, created_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(EntityId::new().0)
    .bind(&author.external_id)
    .bind(&author.name)
    .bind(&author.uri)
    .bind(&author.email)
    .bind(Utc::now())
    .execute(&mut *conn)
    .await?;

    let stored = sqlx::query_as::<_, Author>("SELECT * FROM authors WHERE external_id = ?")
        .bind(&author.external_id)
        .fetch_one(&mut *conn)
        .await?;

    Ok(stored)
}

/// Insert an activity unless its external id is already known.
async fn upsert_activity(
    conn: &mut SqliteConnection,
    feed_id: &str,
    activity: &NewActivity,
) -> Result<(Activity, bool), AppError> {
    let actor_id = match &activity.actor {
        Some(actor) => Some(upsert_author(&mut *conn, actor).await?.id),
        None => None,
    };
    let row = activity.clone().into_activity(feed_id, actor_id);

    let inserted = sqlx::query(
        r#"
        INSERT OR IGNORE INTO activities (
            id, external_id, feed_id, kind, verb, actor_id, target, title,
            content, content_type, url, source, in_reply_to, published_at, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&row.id)
    .bind(&row.external_id)
    .bind(&row.feed_id)
    .bind(&row.kind)
    .bind(&row.verb)
    .bind(&row.actor_id)
    .bind(&row.target)
    .bind(&row.title)
    .bind(&row.content)
    .bind(&row.content_type)
    .bind(&row.url)
    .bind(&row.source)
    .bind(&row.in_reply_to)
    .bind(&row.published_at)
    .bind(&row.updated_at)
    .execute(&mut *conn)
    .await?;

    if inserted.rows_affected() == 1 {
        return Ok((row, true));
    }

    let existing = sqlx::query_as::<_, Activity>("SELECT * FROM activities WHERE external_id = ?")
        .bind(&row.external_id)
        .fetch_one(&mut *conn)
        .await?;

    Ok((existing, false))
}

async fn append_entry(
    conn: &mut SqliteConnection,
    feed_id: &str,
    activity_id: &str,
) -> Result<bool, AppError> {
    let result = sqlx::query(
        r#"
        INSERT OR IGNORE INTO feed_entries (feed_id, activity_id, position, added_at)
        SELECT ?, ?, COALESCE(MAX(position), -1) + 1, ?
        FROM feed_entries WHERE feed_id = ?
        "#,
    )
    .bind(feed_id)
    .bind(activity_id)
    .bind(Utc::now())
    .bind(feed_id)
    .execute(&mut *conn)
    .await?;

    Ok(result.rows_affected() == 1)
}

async fn replace_feed_people(
    conn: &mut SqliteConnection,
    feed_id: &str,
    role: &str,
    people: &[NewAuthor],
) -> Result<(), AppError> {
    sqlx::query("DELETE FROM feed_authors WHERE feed_id = ? AND role = ?")
        .bind(feed_id)
        .bind(role)
        .execute(&mut *conn)
        .await?;

    for (position, person) in people.iter().enumerate() {
        let author = upsert_author(&mut *conn, person).await?;
        sqlx::query(
            "INSERT OR IGNORE INTO feed_authors (feed_id, author_id, role, position) VALUES (?, ?, ?, ?)",
        )
        .bind(feed_id)
        .bind(&author.id)
        .bind(role)
        .bind(position as i64)
        .execute(&mut *conn)
        .await?;
    }

    Ok(())
}

async fn apply_merge_plan(
    conn: &mut SqliteConnection,
    plan: &MergePlan,
) -> Result<Vec<Activity>, AppError> {
    ensure_feed_exists(&mut *conn, &plan.feed_id).await?;

    // 1. Scalar metadata
    update_metadata(&mut *conn, &plan.feed_id, &plan.metadata).await?;

    // 2. Authors and contributors
    replace_feed_people(&mut *conn, &plan.feed_id, "author", &plan.authors).await?;
    replace_feed_people(&mut *conn, &plan.feed_id, "contributor", &plan.contributors).await?;

    // 3. Entries
    let mut new_entries = Vec::new();
    for entry in &plan.entries {
        let (activity, created) = upsert_activity(&mut *conn, &plan.feed_id, entry).await?;
        append_entry(&mut *conn, &plan.feed_id, &activity.id).await?;

        if created {
            new_entries.push(activity);
        } else {
            tracing::debug!(
                feed_id = %plan.feed_id,
                external_id = %entry.external_id,
                "Entry already known; not re-delivering"
            );
        }
    }

    Ok(new_entries)
}

async fn load_aggregate(
    conn: &mut SqliteConnection,
    sql: &str,
    key: &str,
) -> Result<Option<Aggregate>, AppError> {
    let Some((id, feed_id, created_at)) =
        sqlx::query_as::<_, (String, String, DateTime<Utc>)>(sql)
            .bind(key)
            .fetch_optional(&mut *conn)
            .await?
    else {
        return Ok(None);
    };

    let following = sqlx::query_scalar::<_, String>(
        "SELECT feed_id FROM aggregate_following WHERE aggregate_id = ? ORDER BY rowid",
    )
    .bind(&id)
    .fetch_all(&mut *conn)
    .await?;

    let followers = sqlx::query_scalar::<_, String>(
        "SELECT feed_id FROM aggregate_followers WHERE aggregate_id = ? ORDER BY rowid",
    )
    .bind(&id)
    .fetch_all(&mut *conn)
    .await?;

    Ok(Some(Aggregate {
        id,
        feed_id,
        following,
        followers,
        created_at,
    }))
}

/// `BEGIN IMMEDIATE` transaction on a pooled connection.
///
/// A transaction dropped before `commit` or `rollback` finished (a cancelled
/// request, a failed `COMMIT`) detaches its connection from the pool. Closing
/// the detached connection makes SQLite roll the transaction back, so an open
/// transaction never goes back into the pool.
struct ImmediateTransaction {
    conn: Option<PoolConnection<Sqlite>>,
}

impl ImmediateTransaction {
    async fn begin(pool: &SqlitePool) -> Result<Self, AppError> {
        let mut tx = Self {
            conn: Some(pool.acquire().await?),
        };
        sqlx::query("BEGIN IMMEDIATE").execute(tx.conn()?).await?;
        Ok(tx)
    }

    fn conn(&mut self) -> Result<&mut SqliteConnection, AppError> {
        self.conn
            .as_deref_mut()
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("transaction already finished")))
    }

    /// Commit and hand the connection back for follow-up reads
    async fn commit(mut self) -> Result<PoolConnection<Sqlite>, AppError> {
        sqlx::query("COMMIT").execute(self.conn()?).await?;
        self.conn
            .take()
            .ok_or_else(|| AppError::Internal(anyhow::anyhow!("transaction already finished")))
    }

    async fn rollback(mut self) {
        let Ok(conn) = self.conn() else {
            return;
        };
        match sqlx::query("ROLLBACK").execute(conn).await {
            Ok(_) => {
                self.conn.take();
            }
            Err(error) => {
                tracing::warn!(%error, "Rollback failed; discarding connection");
            }
        }
    }
}

impl Drop for ImmediateTransaction {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            tracing::debug!("Abandoned transaction; closing its connection");
            drop(conn.detach());
        }
    }
}

impl Database {
    /// Connect to SQLite database
    ///
    /// Creates the database file if it doesn't exist.
    /// Runs pending migrations automatically.
    ///
    /// # Arguments
    /// * `path` - Path to SQLite database file
    ///
    /// # Errors
    /// Returns error if connection or migration fails
    pub async fn connect(path: &Path) -> Result<Self, AppError> {
        // Create parent directory if it doesn't exist
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| AppError::Database(sqlx::Error::Io(e)))?;
        }

        // Create connection string
        let connection_string = format!("sqlite:{}?mode=rwc", path.display());

        // Create connection pool
        let pool = SqlitePool::connect(&connection_string).await?;

        // Run migrations
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| {
                tracing::error!("Migration failed: {}", e);
                AppError::Internal(anyhow::anyhow!("Migration failed: {}", e))
            })?;

        tracing::info!("Database connected and migrated successfully");

        Ok(Self { pool })
    }

    /// Number of entries referenced by a feed
    pub async fn count_feed_entries(&self, feed_id: &str) -> Result<i64, AppError> {
        let count =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM feed_entries WHERE feed_id = ?")
                .bind(feed_id)
                .fetch_one(&self.pool)
                .await?;

        Ok(count)
    }

    #[cfg(test)]
    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

// =========================================================================
// Feeds
// =========================================================================

#[async_trait]
impl FeedStore for Database {
    async fn create_feed(&self, feed: &NewFeed) -> Result<Feed, AppError> {
        let id = EntityId::new().0;
        let credentials = FeedCredentials::generate();
        let now = Utc::now();

        sqlx::query(
            r#"
            INSERT INTO feeds (
                id, url, title, title_type, categories, hubs,
                secret, verification_token, subscription_state, created_at, updated_at
            ) VALUES (?, ?, ?, ?, '[]', ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&id)
        .bind(&feed.url)
        .bind(&feed.title)
        .bind(feed.title.as_ref().map(|_| "text"))
        .bind(encode_string_list(&feed.hubs)?)
        .bind(credentials.secret())
        .bind(credentials.verification_token())
        .bind(SubscriptionState::Unsubscribed.as_str())
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.find_feed(&id).await?.ok_or(AppError::NotFound)
    }

    async fn find_feed(&self, id: &str) -> Result<Option<Feed>, AppError> {
        let mut conn = self.pool.acquire().await?;
        load_feed(&mut conn, id).await
    }

    async fn find_feed_by_url(&self, url: &str) -> Result<Option<Feed>, AppError> {
        let id = sqlx::query_scalar::<_, String>("SELECT id FROM feeds WHERE url = ?")
            .bind(url)
            .fetch_optional(&self.pool)
            .await?;

        match id {
            Some(id) => self.find_feed(&id).await,
            None => Ok(None),
        }
    }

    async fn set_subscription_state(
        &self,
        feed_id: &str,
        state: SubscriptionState,
    ) -> Result<(), AppError> {
        sqlx::query("UPDATE feeds SET subscription_state = ?, updated_at = ? WHERE id = ?")
            .bind(state.as_str())
            .bind(Utc::now())
            .bind(feed_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn add_entry(&self, feed_id: &str, activity_id: &str) -> Result<bool, AppError> {
        let mut conn = self.pool.acquire().await?;
        ensure_feed_exists(&mut conn, feed_id).await?;
        append_entry(&mut conn, feed_id, activity_id).await
    }

    /// Uses an IMMEDIATE transaction so that two writers cannot both observe
    /// an entry as missing and create it twice.
    async fn commit_merge(&self, plan: &MergePlan) -> Result<MergeCommit, AppError> {
        let mut tx = ImmediateTransaction::begin(&self.pool).await?;

        let new_entries = match apply_merge_plan(tx.conn()?, plan).await {
            Ok(new_entries) => new_entries,
            Err(error) => {
                tx.rollback().await;
                return Err(error);
            }
        };

        let mut conn = tx.commit().await?;
        let feed = load_feed(&mut conn, &plan.feed_id)
            .await?
            .ok_or(AppError::NotFound)?;

        Ok(MergeCommit { feed, new_entries })
    }
}

// =========================================================================
// Activities
// =========================================================================

#[async_trait]
impl ActivityStore for Database {
    async fn find_activity(&self, id: &str) -> Result<Option<Activity>, AppError> {
        let activity = sqlx::query_as::<_, Activity>("SELECT * FROM activities WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(activity)
    }

    async fn find_activity_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<Activity>, AppError> {
        let activity =
            sqlx::query_as::<_, Activity>("SELECT * FROM activities WHERE external_id = ?")
                .bind(external_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(activity)
    }

    async fn find_or_create_activity(
        &self,
        feed_id: &str,
        activity: &NewActivity,
    ) -> Result<(Activity, bool), AppError> {
        let mut conn = self.pool.acquire().await?;
        ensure_feed_exists(&mut conn, feed_id).await?;
        upsert_activity(&mut conn, feed_id, activity).await
    }

    async fn feed_activities(&self, feed_id: &str) -> Result<Vec<Activity>, AppError> {
        let activities = sqlx::query_as::<_, Activity>(
            r#"
            SELECT a.* FROM activities a
            JOIN feed_entries e ON e.activity_id = a.id
            WHERE e.feed_id = ?
            ORDER BY e.position
            "#,
        )
        .bind(feed_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(activities)
    }
}

// =========================================================================
// Authors
// =========================================================================

#[async_trait]
impl AuthorStore for Database {
    async fn find_author(&self, id: &str) -> Result<Option<Author>, AppError> {
        let author = sqlx::query_as::<_, Author>("SELECT * FROM authors WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(author)
    }

    async fn find_author_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<Author>, AppError> {
        let author = sqlx::query_as::<_, Author>("SELECT * FROM authors WHERE external_id = ?")
            .bind(external_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(author)
    }

    async fn find_or_create_author(&self, author: &NewAuthor) -> Result<Author, AppError> {
        let mut conn = self.pool.acquire().await?;
        upsert_author(&mut conn, author).await
    }
}

// =========================================================================
// Aggregates
// =========================================================================

#[async_trait]
impl AggregateStore for Database {
    async fn create_aggregate(&self, feed_id: &str) -> Result<Aggregate, AppError> {
        let aggregate = Aggregate {
            id: EntityId::new().0,
            feed_id: feed_id.to_string(),
            following: Vec::new(),
            followers: Vec::new(),
            created_at: Utc::now(),
        };

        sqlx::query("INSERT INTO aggregates (id, feed_id, created_at) VALUES (?, ?, ?)")
            .bind(&aggregate.id)
            .bind(&aggregate.feed_id)
            .bind(&aggregate.created_at)
            .execute(&self.pool)
            .await?;

        Ok(aggregate)
    }

    async fn find_aggregate(&self, id: &str) -> Result<Option<Aggregate>, AppError> {
        let mut conn = self.pool.acquire().await?;
        load_aggregate(
            &mut conn,
            "SELECT id, feed_id, created_at FROM aggregates WHERE id = ?",
            id,
        )
        .await
    }

    async fn find_aggregate_by_feed(&self, feed_id: &str) -> Result<Option<Aggregate>, AppError> {
        let mut conn = self.pool.acquire().await?;
        load_aggregate(
            &mut conn,
            "SELECT id, feed_id, created_at FROM aggregates WHERE feed_id = ?",
            feed_id,
        )
        .await
    }

    async fn add_following(&self, aggregate_id: &str, feed_id: &str) -> Result<bool, AppError> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO aggregate_following (aggregate_id, feed_id, created_at) VALUES (?, ?, ?)",
        )
        .bind(aggregate_id)
        .bind(feed_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn remove_following(
        &self,
        aggregate_id: &str,
        feed_id: &str,
    ) -> Result<bool, AppError> {
        let result =
            sqlx::query("DELETE FROM aggregate_following WHERE aggregate_id = ? AND feed_id = ?")
                .bind(aggregate_id)
                .bind(feed_id)
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn add_follower(&self, aggregate_id: &str, feed_id: &str) -> Result<bool, AppError> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO aggregate_followers (aggregate_id, feed_id, created_at) VALUES (?, ?, ?)",
        )
        .bind(aggregate_id)
        .bind(feed_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn remove_follower(&self, aggregate_id: &str, feed_id: &str) -> Result<bool, AppError> {
        let result =
            sqlx::query("DELETE FROM aggregate_followers WHERE aggregate_id = ? AND feed_id = ?")
                .bind(aggregate_id)
                .bind(feed_id)
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected() > 0)
    }
}
