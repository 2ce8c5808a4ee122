use chrono::{DateTime, Utc};
use leadwatch_core::{
    CoreError, DatabaseError, GradeLevel, Lead, LeadStatus, LeadSummary, RedditPost, SeenPost,
    Topic,
};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Executor, QueryBuilder, Row, Sqlite};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

#[cfg(test)]
mod tests;

pub const LAST_POLL_SETTING: &str = "last_poll_at";

/// Filters for listing stored leads.
#[derive(Debug, Clone, Default)]
pub struct LeadQuery {
    pub status: Option<LeadStatus>,
    pub min_score: Option<u8>,
    pub limit: Option<u32>,
}

/// SQLite store for seen posts, leads and settings.
///
/// Seen-post rows are only ever inserted; the insert result is what decides
/// whether a post is new. Lead rows are inserted once and afterwards only
/// their review status, notes and notification time change.
#[derive(Debug)]
pub struct Database {
    connection_string: String,
    pool: Option<SqlitePool>,
}

impl Database {
    pub fn new(connection_string: impl Into<String>) -> Self {
        Self {
            connection_string: connection_string.into(),
            pool: None,
        }
    }

    /// Opens the pool, creating the database file when it does not exist.
    pub async fn connect(&mut self) -> Result<(), CoreError> {
        let options = SqliteConnectOptions::from_str(&self.connection_string)
            .map_err(|e| DatabaseError::ConnectionFailed {
                reason: format!("{}: {}", self.connection_string, e),
            })?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        // One writer; the poll loop is sequential
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| DatabaseError::ConnectionFailed {
                reason: e.to_string(),
            })?;

        info!("Connected to database {}", self.connection_string);
        self.pool = Some(pool);
        Ok(())
    }

    pub async fn run_migrations(&self) -> Result<(), CoreError> {
        sqlx::migrate!("./migrations")
            .run(self.pool()?)
            .await
            .map_err(|e| DatabaseError::MigrationFailed {
                migration: e.to_string(),
            })?;
        debug!("Database migrations applied");
        Ok(())
    }

    pub async fn close(&self) {
        if let Some(pool) = &self.pool {
            pool.close().await;
        }
    }

    fn pool(&self) -> Result<&SqlitePool, DatabaseError> {
        self.pool.as_ref().ok_or(DatabaseError::NotConnected)
    }

    pub async fn is_seen(&self, post_id: &str) -> Result<bool, CoreError> {
        let seen: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM seen_posts WHERE post_id = ?)")
                .bind(post_id)
                .fetch_one(self.pool()?)
                .await?;
        Ok(seen)
    }

    /// Inserts the record unless the id is already known. Returns `true` only
    /// for the first insert of a given post id.
    pub async fn record_seen(&self, seen: &SeenPost) -> Result<bool, CoreError> {
        insert_seen(self.pool()?, seen).await
    }

    /// Records a post as seen and, when it produced a lead, stores the lead
    /// queued for notification. Both writes commit together, so a post is
    /// never marked seen without its lead. Returns `false` for a known post.
    pub async fn record_post(&self, seen: &SeenPost, lead: Option<&Lead>) -> Result<bool, CoreError> {
        let mut tx = self.pool()?.begin().await?;

        if !insert_seen(&mut *tx, seen).await? {
            tx.rollback().await?;
            return Ok(false);
        }
        if let Some(lead) = lead {
            insert_lead(&mut *tx, lead).await?;
        }

        tx.commit().await?;
        Ok(true)
    }

    pub async fn get_seen_post(&self, post_id: &str) -> Result<Option<SeenPost>, CoreError> {
        let row = sqlx::query(
            "SELECT post_id, subreddit, seen_at, surfaced FROM seen_posts WHERE post_id = ?",
        )
        .bind(post_id)
        .fetch_optional(self.pool()?)
        .await?;

        row.map(|row| -> Result<SeenPost, CoreError> {
            Ok(SeenPost {
                post_id: row.try_get("post_id")?,
                subreddit: row.try_get("subreddit")?,
                seen_at: row.try_get("seen_at")?,
                surfaced: row.try_get("surfaced")?,
            })
        })
        .transpose()
    }

    pub async fn seen_count(&self) -> Result<u64, CoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM seen_posts")
            .fetch_one(self.pool()?)
            .await?;
        Ok(count as u64)
    }

    /// Stores a new lead queued for notification. An existing row for the
    /// same post is left untouched so review status and notes survive;
    /// returns whether a row was written.
    pub async fn save_lead(&self, lead: &Lead) -> Result<bool, CoreError> {
        insert_lead(self.pool()?, lead).await
    }

    pub async fn get_lead(&self, post_id: &str) -> Result<Option<Lead>, CoreError> {
        let row = sqlx::query("SELECT * FROM leads WHERE post_id = ?")
            .bind(post_id)
            .fetch_optional(self.pool()?)
            .await?;

        row.as_ref().map(lead_from_row).transpose()
    }

    /// Leads matching `query`, highest priority first, newest first within a
    /// priority.
    pub async fn get_leads(&self, query: &LeadQuery) -> Result<Vec<Lead>, CoreError> {
        let mut builder = QueryBuilder::<Sqlite>::new("SELECT * FROM leads WHERE 1 = 1");

        if let Some(status) = query.status {
            builder.push(" AND status = ").push_bind(status.as_str());
        }
        if let Some(min_score) = query.min_score {
            builder
                .push(" AND priority_score >= ")
                .push_bind(min_score as i64);
        }
        builder.push(" ORDER BY priority_score DESC, created_utc DESC");
        if let Some(limit) = query.limit {
            builder.push(" LIMIT ").push_bind(limit as i64);
        }

        let rows = builder.build().fetch_all(self.pool()?).await?;
        rows.iter().map(lead_from_row).collect()
    }

    /// Sets the review status. Notes are replaced only when given.
    pub async fn update_lead_status(
        &self,
        post_id: &str,
        status: LeadStatus,
        notes: Option<&str>,
    ) -> Result<(), CoreError> {
        let result = sqlx::query(
            "UPDATE leads SET status = ?, notes = COALESCE(?, notes) WHERE post_id = ?",
        )
        .bind(status.as_str())
        .bind(notes)
        .bind(post_id)
        .execute(self.pool()?)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::NotFound {
                resource: format!("lead {}", post_id),
            });
        }

        info!("Lead {} marked as {}", post_id, status);
        Ok(())
    }

    /// Leads still waiting for the notifier, in dispatch order.
    pub async fn pending_leads(&self) -> Result<Vec<Lead>, CoreError> {
        let rows = sqlx::query(
            "SELECT * FROM leads WHERE dispatch_pending = 1 ORDER BY priority_score DESC, created_utc DESC",
        )
        .fetch_all(self.pool()?)
        .await?;
        rows.iter().map(lead_from_row).collect()
    }

    pub async fn mark_notified(&self, post_id: &str, at: DateTime<Utc>) -> Result<(), CoreError> {
        sqlx::query("UPDATE leads SET notified_at = ?, dispatch_pending = 0 WHERE post_id = ?")
            .bind(at)
            .bind(post_id)
            .execute(self.pool()?)
            .await?;
        Ok(())
    }

    /// Takes a lead off the notification queue without recording a delivery.
    pub async fn mark_dispatched(&self, post_id: &str) -> Result<(), CoreError> {
        sqlx::query("UPDATE leads SET dispatch_pending = 0 WHERE post_id = ?")
            .bind(post_id)
            .execute(self.pool()?)
            .await?;
        Ok(())
    }

    /// Notification times at or after `since`, oldest first.
    pub async fn notified_since(&self, since: DateTime<Utc>) -> Result<Vec<DateTime<Utc>>, CoreError> {
        let times: Vec<DateTime<Utc>> = sqlx::query_scalar(
            "SELECT notified_at FROM leads WHERE notified_at IS NOT NULL AND notified_at >= ? ORDER BY notified_at",
        )
        .bind(since)
        .fetch_all(self.pool()?)
        .await?;
        Ok(times)
    }

    pub async fn lead_summary(&self) -> Result<LeadSummary, CoreError> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) AS total_leads,
                AVG(priority_score) AS average_priority,
                COALESCE(SUM(CASE WHEN priority_score >= 8 THEN 1 ELSE 0 END), 0) AS high_priority,
                COALESCE(SUM(is_urgent), 0) AS urgent,
                COALESCE(SUM(is_parent), 0) AS parent
            FROM leads
            "#,
        )
        .fetch_one(self.pool()?)
        .await?;

        Ok(LeadSummary {
            total_leads: row.try_get::<i64, _>("total_leads")? as u64,
            average_priority: row
                .try_get::<Option<f64>, _>("average_priority")?
                .unwrap_or(0.0),
            high_priority: row.try_get::<i64, _>("high_priority")? as u64,
            urgent: row.try_get::<i64, _>("urgent")? as u64,
            parent: row.try_get::<i64, _>("parent")? as u64,
            seen_posts: self.seen_count().await?,
        })
    }

    pub async fn save_setting(&self, key: &str, value: &str) -> Result<(), CoreError> {
        sqlx::query(
            r#"
            INSERT INTO settings (key, value, updated_at) VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(Utc::now())
        .execute(self.pool()?)
        .await?;
        Ok(())
    }

    pub async fn get_setting(&self, key: &str) -> Result<Option<String>, CoreError> {
        let value: Option<String> = sqlx::query_scalar("SELECT value FROM settings WHERE key = ?")
            .bind(key)
            .fetch_optional(self.pool()?)
            .await?;
        Ok(value)
    }
}

async fn insert_seen<'e, E>(executor: E, seen: &SeenPost) -> Result<bool, CoreError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let result = sqlx::query(
        "INSERT OR IGNORE INTO seen_posts (post_id, subreddit, seen_at, surfaced) VALUES (?, ?, ?, ?)",
    )
    .bind(&seen.post_id)
    .bind(&seen.subreddit)
    .bind(seen.seen_at)
    .bind(seen.surfaced)
    .execute(executor)
    .await?;

    Ok(result.rows_affected() == 1)
}

async fn insert_lead<'e, E>(executor: E, lead: &Lead) -> Result<bool, CoreError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let topics = lead
        .topics
        .iter()
        .map(Topic::as_str)
        .collect::<Vec<_>>()
        .join(",");
    let matched_keywords = serde_json::to_string(&lead.matched_keywords)?;

    let result = sqlx::query(
        r#"
        INSERT INTO leads (
            post_id, subreddit, title, body, author, permalink, url, created_utc,
            grade_level, topics, is_urgent, is_parent, mentions_payment, score,
            num_comments, matched_keywords, priority_score, status, notes, surfaced_at,
            dispatch_pending
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1)
        ON CONFLICT(post_id) DO NOTHING
        "#,
    )
    .bind(&lead.post.id)
    .bind(&lead.post.subreddit)
    .bind(&lead.post.title)
    .bind(&lead.post.content)
    .bind(&lead.post.author)
    .bind(&lead.post.permalink)
    .bind(&lead.post.url)
    .bind(lead.post.created_utc)
    .bind(lead.grade_level.as_str())
    .bind(topics)
    .bind(lead.is_urgent)
    .bind(lead.is_parent)
    .bind(lead.mentions_payment)
    .bind(lead.post.score)
    .bind(lead.post.num_comments as i64)
    .bind(matched_keywords)
    .bind(lead.priority_score as i64)
    .bind(lead.status.as_str())
    .bind(&lead.notes)
    .bind(lead.surfaced_at)
    .execute(executor)
    .await?;

    Ok(result.rows_affected() == 1)
}

fn invalid_record(details: String) -> CoreError {
    CoreError::Database(DatabaseError::InvalidRecord { details })
}

fn lead_from_row(row: &SqliteRow) -> Result<Lead, CoreError> {
    let post_id: String = row.try_get("post_id")?;

    let grade_level: String = row.try_get("grade_level")?;
    let grade_level = GradeLevel::from_str(&grade_level)
        .map_err(|_| invalid_record(format!("lead {}: grade level {:?}", post_id, grade_level)))?;

    let status: String = row.try_get("status")?;
    let status = LeadStatus::from_str(&status)
        .map_err(|_| invalid_record(format!("lead {}: status {:?}", post_id, status)))?;

    let topics: String = row.try_get("topics")?;
    let topics = topics
        .split(',')
        .filter(|t| !t.is_empty())
        .map(|t| {
            Topic::from_str(t)
                .map_err(|_| invalid_record(format!("lead {}: topic {:?}", post_id, t)))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let matched_keywords: String = row.try_get("matched_keywords")?;
    let matched_keywords: Vec<String> = serde_json::from_str(&matched_keywords)?;

    let priority_score: i64 = row.try_get("priority_score")?;
    let num_comments: i64 = row.try_get("num_comments")?;

    Ok(Lead {
        post: RedditPost {
            id: post_id,
            title: row.try_get("title")?,
            content: row.try_get("body")?,
            subreddit: row.try_get("subreddit")?,
            author: row.try_get("author")?,
            url: row.try_get("url")?,
            permalink: row.try_get("permalink")?,
            created_utc: row.try_get("created_utc")?,
            score: row.try_get("score")?,
            num_comments: num_comments.max(0) as u32,
        },
        grade_level,
        topics,
        is_urgent: row.try_get("is_urgent")?,
        is_parent: row.try_get("is_parent")?,
        mentions_payment: row.try_get("mentions_payment")?,
        matched_keywords,
        priority_score: priority_score.clamp(1, 10) as u8,
        status,
        notes: row.try_get("notes")?,
        surfaced_at: row.try_get("surfaced_at")?,
    })
}
