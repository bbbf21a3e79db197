//! Durable action queue worker. Each row in `actions` is a reminder or a
//! removal that comes due at `due_at`; failed attempts back off and retry.

use anyhow::{anyhow, Result};
use chrono::{Duration, Utc};
use tracing::{debug, info, instrument, warn};

use crate::config::Config;
use crate::db::{self, Pool};
use crate::messages;
use crate::model::{ActionKind, PostState, RemovalReason};
use crate::monitor;
use crate::reddit::RedditService;

#[instrument(skip_all)]
pub async fn process_next_action(
    pool: &Pool,
    reddit: &dyn RedditService,
    cfg: &Config,
) -> Result<bool> {
    if let Some((id, post_id, kind, attempt)) = db::next_due_action(pool).await? {
        let kind_enum = match kind.as_str() {
            "send_reminder" => ActionKind::SendReminder,
            _ => ActionKind::RemovePost,
        };
        let res = match kind_enum {
            ActionKind::SendReminder => send_reminder(pool, reddit, cfg, &post_id).await,
            ActionKind::RemovePost => remove_unflaired(pool, reddit, cfg, &post_id).await,
        };
        match res {
            Ok(_) => {
                db::delete_action(pool, id).await?;
                info!(id, kind, post_id, "action succeeded");
            }
            Err(err) => {
                warn!(?err, id, kind, post_id, attempt, "action failed; backoff");
                db::backoff_action(pool, id, attempt, cfg.app.max_backoff_seconds as i64).await?;
            }
        }
        return Ok(true);
    }
    Ok(false)
}

/// Send the add-flair reminder for a watched post, then queue its removal.
async fn send_reminder(
    pool: &Pool,
    reddit: &dyn RedditService,
    cfg: &Config,
    post_id: &str,
) -> Result<()> {
    let Some(post) = db::fetch_post_for_action(pool, post_id).await? else {
        return Err(anyhow!("post {} is not tracked", post_id));
    };
    if post.state != PostState::Watching {
        debug!(post_id, state = post.state.as_str(), "post already settled");
        return Ok(());
    }

    let Some(submission) = reddit.submission_by_id(post_id).await? else {
        debug!(post_id, "submission gone before reminder; resolving");
        db::mark_post_resolved(pool, post_id).await?;
        return Ok(());
    };
    if submission.flair().is_some() {
        debug!(post_id, "flair added before reminder; resolving");
        db::mark_post_resolved(pool, post_id).await?;
        return Ok(());
    }

    // A crash after the send but before the row update would re-send on
    // retry; a recorded send time short-circuits straight to scheduling.
    let sent_at = match post.reminder_sent_at {
        Some(at) => {
            debug!(post_id, "reminder already sent");
            at
        }
        None => {
            let body = messages::reminder_body(
                &submission.shortlink(),
                &messages::human_window(cfg.moderation.remove_after_seconds),
            );
            reddit
                .send_message(&submission.author, messages::REMINDER_SUBJECT, &body)
                .await?;
            let now = Utc::now();
            db::record_reminder_sent(pool, post_id, now).await?;
            debug!(
                title = %submission.title,
                shortlink = %submission.shortlink(),
                "sent reminder"
            );
            now
        }
    };

    let due = sent_at + Duration::seconds(cfg.moderation.remove_after_seconds as i64);
    db::enqueue_action(pool, post_id, ActionKind::RemovePost, due).await?;
    Ok(())
}

/// Remove a post whose author never added flair, or settle it if flair
/// arrived during the removal window.
async fn remove_unflaired(
    pool: &Pool,
    reddit: &dyn RedditService,
    cfg: &Config,
    post_id: &str,
) -> Result<()> {
    let Some(post) = db::fetch_post_for_action(pool, post_id).await? else {
        return Err(anyhow!("post {} is not tracked", post_id));
    };
    if post.state != PostState::Watching {
        debug!(post_id, state = post.state.as_str(), "post already settled");
        return Ok(());
    }

    let Some(submission) = reddit.submission_by_id(post_id).await? else {
        debug!(post_id, "submission gone before removal; resolving");
        db::mark_post_resolved(pool, post_id).await?;
        return Ok(());
    };
    if submission.flair().is_some() {
        // Late flair settles the post, unless it is the tech-support flair,
        // which still gets the redirect treatment.
        if monitor::remove_if_tech_support(pool, reddit, cfg, &submission).await? {
            return Ok(());
        }
        debug!(post_id, "flair added before removal; resolving");
        db::mark_post_resolved(pool, post_id).await?;
        return Ok(());
    }

    let body = messages::removal_body(&submission.shortlink());
    reddit
        .send_message(&submission.author, messages::REMOVAL_SUBJECT, &body)
        .await?;
    reddit.remove_post(&submission.fullname()).await?;
    db::record_removed(pool, &submission, RemovalReason::NoFlair).await?;
    debug!(
        title = %submission.title,
        shortlink = %submission.shortlink(),
        "removed unflaired submission"
    );
    Ok(())
}
