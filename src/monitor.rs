//! Subreddit monitor: polls the newest submissions and classifies each one
//! the first time it is seen.

use anyhow::Result;
use chrono::Duration;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::db::{self, Pool};
use crate::messages;
use crate::model::{PostState, RemovalReason, Submission};
use crate::reddit::RedditService;

/// Run the subreddit scan loop forever.
pub async fn run(pool: &Pool, reddit: &dyn RedditService, cfg: &Config) {
    let interval = std::time::Duration::from_secs(cfg.app.scan_interval_seconds);
    loop {
        match scan_once(pool, reddit, cfg).await {
            Ok(new_count) => {
                if new_count > 0 {
                    info!(new_posts = new_count, "classified new submissions");
                } else {
                    debug!("no new submissions");
                }
            }
            Err(e) => {
                error!("scan error: {e:#}");
            }
        }
        tokio::time::sleep(interval).await;
    }
}

/// Scan the newest submissions once. Already-tracked posts are skipped; a
/// submission that fails to classify is logged and retried on the next scan
/// because no row is written for it.
pub async fn scan_once(pool: &Pool, reddit: &dyn RedditService, cfg: &Config) -> Result<usize> {
    let submissions = reddit
        .newest_submissions(&cfg.reddit.subreddit, cfg.moderation.post_grab_limit)
        .await?;

    let mut new_count = 0;
    for submission in submissions {
        if db::post_exists(pool, &submission.id).await? {
            continue;
        }
        match classify_submission(pool, reddit, cfg, &submission).await {
            Ok(()) => new_count += 1,
            Err(e) => {
                warn!(post_id = %submission.id, "failed to classify submission: {e:#}");
            }
        }
    }
    Ok(new_count)
}

async fn classify_submission(
    pool: &Pool,
    reddit: &dyn RedditService,
    cfg: &Config,
    submission: &Submission,
) -> Result<()> {
    if remove_if_tech_support(pool, reddit, cfg, submission).await? {
        return Ok(());
    }

    match submission.flair() {
        Some(flair) => {
            debug!(post_id = %submission.id, flair = %flair, "submission arrived flaired");
            db::track_post(pool, submission, PostState::Resolved).await?;
        }
        None => {
            debug!(
                title = %submission.title,
                shortlink = %submission.shortlink(),
                "new submission"
            );
            let due = submission.created_utc
                + Duration::seconds(cfg.moderation.reminder_after_seconds as i64);
            db::track_unflaired_post(pool, submission, due).await?;
        }
    }
    Ok(())
}

/// Redirect-and-remove a tech-support submission, returning `true` when the
/// post was removed. Moderator-authored and manually approved posts are
/// exempt. The moderator list is only fetched once the flair matches.
pub async fn remove_if_tech_support(
    pool: &Pool,
    reddit: &dyn RedditService,
    cfg: &Config,
    submission: &Submission,
) -> Result<bool> {
    let Some(flair) = submission.flair() else {
        return Ok(false);
    };
    if flair != cfg.moderation.tech_support_flair {
        return Ok(false);
    }

    let moderators = reddit.moderators(&cfg.reddit.subreddit).await?;
    if moderators.iter().any(|name| name == &submission.author) {
        return Ok(false);
    }
    if submission
        .approved_by
        .as_deref()
        .is_some_and(|by| !by.is_empty())
    {
        return Ok(false);
    }

    reddit
        .send_message(
            &submission.author,
            messages::TECH_SUPPORT_SUBJECT,
            messages::TECH_SUPPORT_BODY,
        )
        .await?;
    reddit.remove_post(&submission.fullname()).await?;
    db::record_removed(pool, submission, RemovalReason::TechSupport).await?;
    debug!(shortlink = %submission.shortlink(), "removed tech support submission");
    Ok(true)
}
