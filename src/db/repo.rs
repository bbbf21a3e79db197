use super::model::PostForAction;
use crate::model::{ActionKind, PostState, RemovalReason, Submission, TrackedPost};
use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use sqlx::{Row, Transaction};
use sqlx::{Sqlite, SqlitePool};
use tracing::instrument;

pub type Pool = SqlitePool;
type ActionItem = (i64, String, String, i32);

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let pool = SqlitePool::connect(&normalized).await?;
    // Enable WAL and stricter durability.
    sqlx::query("PRAGMA journal_mode=WAL;")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous=FULL;")
        .execute(&pool)
        .await?;
    Ok(pool)
}

/// If using a file-backed SQLite URL, expand a leading `~/`, ensure the parent
/// directory exists and ask SQLite to create the file on first open. Leaves
/// in-memory URLs untouched. Returns possibly-updated URL.
fn prepare_sqlite_url(url: &str) -> String {
    // Pass through non-sqlite schemes
    if !url.starts_with("sqlite:") {
        return url.to_string();
    }

    // In-memory URLs like sqlite::memory: or sqlite::memory:?cache=shared
    if url.starts_with("sqlite::memory") {
        return url.to_string();
    }

    // Strip prefix and optional //
    let rest = &url["sqlite:".len()..];
    let path_with_query = rest.strip_prefix("//").unwrap_or(rest);

    // Separate query string if any
    let (path_part, query_part) = match path_with_query.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (path_with_query, None),
    };

    if path_part.is_empty() {
        // nothing to normalize
        return url.to_string();
    }

    // Expand leading ~/ to HOME
    let expanded_path = if let Some(rest) = path_part.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            format!("{}/{}", home.trim_end_matches('/'), rest)
        } else {
            path_part.to_string()
        }
    } else {
        path_part.to_string()
    };

    // Ensure parent directory exists if any
    if let Some(parent) = std::path::Path::new(&expanded_path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    // Rebuild URL, prefer sqlite:// form
    let mut rebuilt = String::from("sqlite://");
    rebuilt.push_str(&expanded_path);
    match query_part {
        Some(q) => {
            // Parameter-wise check: `journal_mode=WAL` must not count as `mode=`.
            let has_mode = q.split('&').any(|kv| kv.starts_with("mode="));
            rebuilt.push('?');
            rebuilt.push_str(q);
            if !has_mode {
                rebuilt.push_str("&mode=rwc");
            }
        }
        None => rebuilt.push_str("?mode=rwc"),
    }
    rebuilt
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn post_exists(pool: &Pool, id: &str) -> Result<bool> {
    let row = sqlx::query_scalar::<_, i64>("SELECT 1 FROM posts WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row.is_some())
}

/// Record a submission the monitor has classified with no further work queued.
#[instrument(skip_all)]
pub async fn track_post(pool: &Pool, submission: &Submission, state: PostState) -> Result<()> {
    sqlx::query(
        "INSERT INTO posts (id, title, author, permalink, created_utc, state) VALUES (?, ?, ?, ?, ?, ?) \
         ON CONFLICT(id) DO NOTHING",
    )
    .bind(&submission.id)
    .bind(&submission.title)
    .bind(&submission.author)
    .bind(&submission.permalink)
    .bind(submission.created_utc)
    .bind(state.as_str())
    .execute(pool)
    .await?;
    Ok(())
}

/// Record an unflaired submission and queue its reminder in one transaction,
/// so a crash between the two writes cannot strand the post without a timer.
#[instrument(skip_all)]
pub async fn track_unflaired_post(
    pool: &Pool,
    submission: &Submission,
    reminder_due_at: DateTime<Utc>,
) -> Result<()> {
    let mut tx = pool.begin().await?;
    sqlx::query(
        "INSERT INTO posts (id, title, author, permalink, created_utc, state) VALUES (?, ?, ?, ?, ?, ?) \
         ON CONFLICT(id) DO NOTHING",
    )
    .bind(&submission.id)
    .bind(&submission.title)
    .bind(&submission.author)
    .bind(&submission.permalink)
    .bind(submission.created_utc)
    .bind(PostState::Watching.as_str())
    .execute(&mut *tx)
    .await?;
    enqueue_action_tx(&mut tx, &submission.id, ActionKind::SendReminder, reminder_due_at).await?;
    tx.commit().await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn mark_post_resolved(pool: &Pool, id: &str) -> Result<()> {
    sqlx::query("UPDATE posts SET state = ? WHERE id = ?")
        .bind(PostState::Resolved.as_str())
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Record a removed submission. Upserts so the same call works at first sight
/// (tech-support posts have no row yet) and at the removal stage (row exists).
#[instrument(skip_all)]
pub async fn record_removed(
    pool: &Pool,
    submission: &Submission,
    reason: RemovalReason,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO posts (id, title, author, permalink, created_utc, state, removal_reason, removed_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?) \
         ON CONFLICT(id) DO UPDATE SET \
             state = excluded.state, \
             removal_reason = excluded.removal_reason, \
             removed_at = excluded.removed_at",
    )
    .bind(&submission.id)
    .bind(&submission.title)
    .bind(&submission.author)
    .bind(&submission.permalink)
    .bind(submission.created_utc)
    .bind(PostState::Removed.as_str())
    .bind(reason.as_str())
    .bind(Utc::now())
    .execute(pool)
    .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn record_reminder_sent(pool: &Pool, id: &str, sent_at: DateTime<Utc>) -> Result<()> {
    sqlx::query("UPDATE posts SET reminder_sent_at = ? WHERE id = ?")
        .bind(sent_at)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn fetch_post_for_action(pool: &Pool, id: &str) -> Result<Option<PostForAction>> {
    let row = sqlx::query("SELECT state, reminder_sent_at FROM posts WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let state_str: String = row.get("state");
    let state = PostState::parse_state(&state_str)
        .ok_or_else(|| anyhow!("post {} has unknown state {}", id, state_str))?;

    Ok(Some(PostForAction {
        state,
        reminder_sent_at: row
            .try_get::<Option<DateTime<Utc>>, _>("reminder_sent_at")
            .ok()
            .flatten(),
    }))
}

pub async fn get_post(pool: &Pool, id: &str) -> Result<Option<TrackedPost>> {
    let row = sqlx::query(
        "SELECT id, title, author, permalink, created_utc, state, removal_reason, \
                first_seen_at, reminder_sent_at, removed_at \
         FROM posts WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let state_str: String = row.get("state");
    let state = PostState::parse_state(&state_str)
        .ok_or_else(|| anyhow!("post {} has unknown state {}", id, state_str))?;
    let removal_reason = row
        .try_get::<Option<String>, _>("removal_reason")
        .ok()
        .flatten()
        .and_then(|s| RemovalReason::parse_reason(&s));

    Ok(Some(TrackedPost {
        id: row.get("id"),
        title: row.get("title"),
        author: row.get("author"),
        permalink: row.get("permalink"),
        created_utc: row.get("created_utc"),
        state,
        removal_reason,
        first_seen_at: row.get("first_seen_at"),
        reminder_sent_at: row
            .try_get::<Option<DateTime<Utc>>, _>("reminder_sent_at")
            .ok()
            .flatten(),
        removed_at: row
            .try_get::<Option<DateTime<Utc>>, _>("removed_at")
            .ok()
            .flatten(),
    }))
}

/// Queue an action for a post. Returns `None` if an action of the same kind
/// is already queued for that post (the UNIQUE constraint makes enqueueing
/// idempotent across retries and restarts).
#[instrument(skip_all)]
pub async fn enqueue_action(
    pool: &Pool,
    post_id: &str,
    kind: ActionKind,
    due_at: DateTime<Utc>,
) -> Result<Option<i64>> {
    let mut tx = pool.begin().await?;
    let id = enqueue_action_tx(&mut tx, post_id, kind, due_at).await?;
    tx.commit().await?;
    Ok(id)
}

async fn enqueue_action_tx(
    tx: &mut Transaction<'_, Sqlite>,
    post_id: &str,
    kind: ActionKind,
    due_at: DateTime<Utc>,
) -> Result<Option<i64>> {
    let row = sqlx::query(
        "INSERT INTO actions (post_id, kind, attempt, due_at) VALUES (?, ?, 0, ?) \
         ON CONFLICT(post_id, kind) DO NOTHING \
         RETURNING id",
    )
    .bind(post_id)
    .bind(kind.as_str())
    .bind(due_at)
    .fetch_optional(&mut **tx)
    .await?;
    Ok(row.map(|r| r.get("id")))
}

#[instrument(skip_all)]
pub async fn next_due_action(pool: &Pool) -> Result<Option<ActionItem>> {
    let row = sqlx::query(
        "SELECT id, post_id, kind, attempt FROM actions \
         WHERE datetime(due_at) <= CURRENT_TIMESTAMP \
         ORDER BY datetime(due_at) ASC LIMIT 1",
    )
    .fetch_optional(pool)
    .await?;
    if let Some(row) = row {
        let id: i64 = row.get("id");
        let post_id: String = row.get("post_id");
        let kind: String = row.get("kind");
        let attempt: i32 = row.get("attempt");
        Ok(Some((id, post_id, kind, attempt)))
    } else {
        Ok(None)
    }
}

#[instrument(skip_all)]
pub async fn delete_action(pool: &Pool, id: i64) -> Result<()> {
    sqlx::query("DELETE FROM actions WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn backoff_action(pool: &Pool, id: i64, attempt: i32, max_cap_secs: i64) -> Result<()> {
    // Exponential backoff: 5s * 2^attempt, capped by configuration
    let secs = (5_i64) * (1_i64 << attempt.min(10));
    let cap = if max_cap_secs <= 0 {
        secs
    } else {
        max_cap_secs
    };
    let secs = secs.min(cap);
    sqlx::query(
        "UPDATE actions SET attempt = ?, due_at = datetime('now', ? || ' seconds') WHERE id = ?",
    )
    .bind(attempt + 1)
    .bind(secs)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

#[instrument(skip_all)]
pub async fn count_remaining_actions(pool: &Pool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM actions")
        .fetch_one(pool)
        .await?;
    Ok(count)
}
