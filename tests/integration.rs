use anyhow::{anyhow, Result};
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;

use flairbot::actions::process_next_action;
use flairbot::config;
use flairbot::db;
use flairbot::model::{PostState, RemovalReason, Submission};
use flairbot::monitor::scan_once;
use flairbot::reddit::RedditService;

fn test_config() -> config::Config {
    serde_yaml::from_str(config::example()).unwrap()
}

async fn setup_pool() -> sqlx::SqlitePool {
    let pool = sqlx::SqlitePool::connect("sqlite::memory:").await.unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    pool
}

fn submission(id: &str, author: &str, flair: Option<&str>) -> Submission {
    Submission {
        id: id.into(),
        title: format!("post {id}"),
        author: author.into(),
        permalink: format!("/r/amd/comments/{id}/post/"),
        created_utc: Utc::now(),
        link_flair_text: flair.map(str::to_string),
        approved_by: None,
    }
}

async fn force_due(pool: &sqlx::SqlitePool) {
    sqlx::query("UPDATE actions SET due_at = datetime('now', '-1 seconds')")
        .execute(pool)
        .await
        .unwrap();
}

#[derive(Debug, Clone, PartialEq)]
struct SentMessage {
    to: String,
    subject: String,
    body: String,
}

#[derive(Clone, Default)]
struct RecordingReddit {
    listing: Arc<Mutex<Vec<Submission>>>,
    by_id: Arc<Mutex<HashMap<String, Submission>>>,
    mods: Arc<Mutex<Vec<String>>>,
    sent: Arc<Mutex<Vec<SentMessage>>>,
    removed: Arc<Mutex<Vec<String>>>,
    send_results: Arc<Mutex<VecDeque<Result<()>>>>,
}

impl RecordingReddit {
    /// Publish a submission: it shows up in the listing and by id.
    async fn add_submission(&self, sub: Submission) {
        self.by_id.lock().await.insert(sub.id.clone(), sub.clone());
        self.listing.lock().await.push(sub);
    }

    /// Replace the live view of a submission, e.g. after its author flairs it.
    async fn set_submission(&self, sub: Submission) {
        self.by_id.lock().await.insert(sub.id.clone(), sub);
    }

    async fn drop_submission(&self, id: &str) {
        self.by_id.lock().await.remove(id);
    }

    async fn set_moderators(&self, names: &[&str]) {
        *self.mods.lock().await = names.iter().map(|n| n.to_string()).collect();
    }

    async fn queue_send_result(&self, res: Result<()>) {
        self.send_results.lock().await.push_back(res);
    }

    async fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().await.clone()
    }

    async fn removed(&self) -> Vec<String> {
        self.removed.lock().await.clone()
    }
}

#[async_trait::async_trait]
impl RedditService for RecordingReddit {
    async fn newest_submissions(&self, _subreddit: &str, _limit: u32) -> Result<Vec<Submission>> {
        Ok(self.listing.lock().await.clone())
    }

    async fn submission_by_id(&self, id: &str) -> Result<Option<Submission>> {
        Ok(self.by_id.lock().await.get(id).cloned())
    }

    async fn moderators(&self, _subreddit: &str) -> Result<Vec<String>> {
        Ok(self.mods.lock().await.clone())
    }

    async fn send_message(&self, to: &str, subject: &str, body: &str) -> Result<()> {
        let queued = self.send_results.lock().await.pop_front();
        if let Some(res) = queued {
            res?;
        }
        self.sent.lock().await.push(SentMessage {
            to: to.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
        });
        Ok(())
    }

    async fn remove_post(&self, fullname: &str) -> Result<()> {
        self.removed.lock().await.push(fullname.to_string());
        Ok(())
    }
}

#[tokio::test]
async fn flaired_post_is_left_alone() {
    let pool = setup_pool().await;
    let cfg = test_config();
    let reddit = RecordingReddit::default();
    reddit
        .add_submission(submission("aaa111", "alice", Some("Discussion")))
        .await;

    let new_count = scan_once(&pool, &reddit, &cfg).await.unwrap();
    assert_eq!(new_count, 1);

    assert!(reddit.sent().await.is_empty());
    assert!(reddit.removed().await.is_empty());
    assert_eq!(db::count_remaining_actions(&pool).await.unwrap(), 0);

    let post = db::get_post(&pool, "aaa111").await.unwrap().unwrap();
    assert_eq!(post.state, PostState::Resolved);

    // A second scan finds nothing new.
    let new_count = scan_once(&pool, &reddit, &cfg).await.unwrap();
    assert_eq!(new_count, 0);
}

#[tokio::test]
async fn tech_support_post_is_redirected_and_removed() {
    let pool = setup_pool().await;
    let cfg = test_config();
    let reddit = RecordingReddit::default();
    reddit.set_moderators(&["mod_alpha"]).await;
    reddit
        .add_submission(submission("ts1", "helpme", Some("Tech Support")))
        .await;

    let new_count = scan_once(&pool, &reddit, &cfg).await.unwrap();
    assert_eq!(new_count, 1);

    let sent = reddit.sent().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "helpme");
    assert_eq!(sent[0].subject, "Tech support removed");
    assert!(sent[0].body.contains("/r/techsupport"));
    assert_eq!(reddit.removed().await, vec!["t3_ts1".to_string()]);

    let post = db::get_post(&pool, "ts1").await.unwrap().unwrap();
    assert_eq!(post.state, PostState::Removed);
    assert_eq!(post.removal_reason, Some(RemovalReason::TechSupport));
    assert!(post.removed_at.is_some());
    assert_eq!(db::count_remaining_actions(&pool).await.unwrap(), 0);
}

#[tokio::test]
async fn tech_support_by_moderator_is_untouched() {
    let pool = setup_pool().await;
    let cfg = test_config();
    let reddit = RecordingReddit::default();
    reddit.set_moderators(&["mod_alpha"]).await;
    reddit
        .add_submission(submission("ts2", "mod_alpha", Some("Tech Support")))
        .await;

    scan_once(&pool, &reddit, &cfg).await.unwrap();

    assert!(reddit.sent().await.is_empty());
    assert!(reddit.removed().await.is_empty());
    let post = db::get_post(&pool, "ts2").await.unwrap().unwrap();
    assert_eq!(post.state, PostState::Resolved);
}

#[tokio::test]
async fn approved_tech_support_is_untouched() {
    let pool = setup_pool().await;
    let cfg = test_config();
    let reddit = RecordingReddit::default();
    reddit.set_moderators(&["mod_alpha"]).await;
    let mut sub = submission("ts3", "helpme", Some("Tech Support"));
    sub.approved_by = Some("mod_alpha".into());
    reddit.add_submission(sub).await;

    scan_once(&pool, &reddit, &cfg).await.unwrap();

    assert!(reddit.sent().await.is_empty());
    assert!(reddit.removed().await.is_empty());
    let post = db::get_post(&pool, "ts3").await.unwrap().unwrap();
    assert_eq!(post.state, PostState::Resolved);
}

#[tokio::test]
async fn reminder_then_removal_flow() {
    let pool = setup_pool().await;
    let cfg = test_config();
    let reddit = RecordingReddit::default();
    reddit.add_submission(submission("nf1", "bob", None)).await;

    let new_count = scan_once(&pool, &reddit, &cfg).await.unwrap();
    assert_eq!(new_count, 1);

    let post = db::get_post(&pool, "nf1").await.unwrap().unwrap();
    assert_eq!(post.state, PostState::Watching);
    assert_eq!(db::count_remaining_actions(&pool).await.unwrap(), 1);

    // Reminder comes due.
    force_due(&pool).await;
    let processed = process_next_action(&pool, &reddit, &cfg).await.unwrap();
    assert!(processed);

    let sent = reddit.sent().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "bob");
    assert_eq!(sent[0].subject, "You have not tagged your post.");
    assert!(sent[0].body.contains("https://redd.it/nf1"));
    assert!(sent[0].body.contains("**0:20:00**"));

    // The removal is scheduled exactly one window after the reminder went out.
    let post = db::get_post(&pool, "nf1").await.unwrap().unwrap();
    let sent_at = post.reminder_sent_at.unwrap();
    let due: DateTime<Utc> = sqlx::query_scalar(
        "SELECT due_at FROM actions WHERE post_id = ? AND kind = 'remove_post'",
    )
    .bind("nf1")
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(due, sent_at + Duration::seconds(1200));

    // Removal comes due; still no flair.
    force_due(&pool).await;
    let processed = process_next_action(&pool, &reddit, &cfg).await.unwrap();
    assert!(processed);

    let sent = reddit.sent().await;
    assert_eq!(sent.len(), 2);
    assert_eq!(
        sent[1].subject,
        "You have not tagged your post within the allotted amount of time."
    );
    assert!(sent[1].body.ends_with("once it is posted.*"));
    assert_eq!(reddit.removed().await, vec!["t3_nf1".to_string()]);

    let post = db::get_post(&pool, "nf1").await.unwrap().unwrap();
    assert_eq!(post.state, PostState::Removed);
    assert_eq!(post.removal_reason, Some(RemovalReason::NoFlair));
    assert_eq!(db::count_remaining_actions(&pool).await.unwrap(), 0);
}

#[tokio::test]
async fn flair_added_before_reminder_skips_message() {
    let pool = setup_pool().await;
    let cfg = test_config();
    let reddit = RecordingReddit::default();
    reddit
        .add_submission(submission("nf2", "carol", None))
        .await;

    scan_once(&pool, &reddit, &cfg).await.unwrap();

    // Author adds flair before the reminder fires.
    reddit
        .set_submission(submission("nf2", "carol", Some("Benchmark")))
        .await;
    force_due(&pool).await;
    let processed = process_next_action(&pool, &reddit, &cfg).await.unwrap();
    assert!(processed);

    assert!(reddit.sent().await.is_empty());
    assert!(reddit.removed().await.is_empty());
    let post = db::get_post(&pool, "nf2").await.unwrap().unwrap();
    assert_eq!(post.state, PostState::Resolved);
    assert_eq!(db::count_remaining_actions(&pool).await.unwrap(), 0);
}

#[tokio::test]
async fn recorded_reminder_is_not_resent() {
    let pool = setup_pool().await;
    let cfg = test_config();
    let reddit = RecordingReddit::default();
    let sub = submission("nf3", "dave", None);
    reddit.add_submission(sub.clone()).await;

    // Simulate a prior run that already messaged the author ten minutes ago.
    db::track_unflaired_post(&pool, &sub, Utc::now() - Duration::seconds(1))
        .await
        .unwrap();
    let sent_at = Utc::now() - Duration::seconds(600);
    db::record_reminder_sent(&pool, "nf3", sent_at)
        .await
        .unwrap();

    let processed = process_next_action(&pool, &reddit, &cfg).await.unwrap();
    assert!(processed);

    // No second message; the removal keys off the recorded send time.
    assert!(reddit.sent().await.is_empty());
    let (kind, due): (String, DateTime<Utc>) =
        sqlx::query_as("SELECT kind, due_at FROM actions WHERE post_id = ?")
            .bind("nf3")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(kind, "remove_post");
    assert_eq!(due, sent_at + Duration::seconds(1200));

    // Ten minutes still to go, so nothing is due yet.
    let processed = process_next_action(&pool, &reddit, &cfg).await.unwrap();
    assert!(!processed);
}

#[tokio::test]
async fn overdue_recorded_reminder_removes_immediately() {
    let pool = setup_pool().await;
    let cfg = test_config();
    let reddit = RecordingReddit::default();
    let sub = submission("nf4", "frank", None);
    reddit.add_submission(sub.clone()).await;

    // A prior run sent the reminder, then the process was down past the
    // whole removal window.
    db::track_unflaired_post(&pool, &sub, Utc::now() - Duration::seconds(1))
        .await
        .unwrap();
    let sent_at = Utc::now() - Duration::seconds(2000);
    db::record_reminder_sent(&pool, "nf4", sent_at)
        .await
        .unwrap();

    // First pass: no resend; the removal lands in the past, already due.
    let processed = process_next_action(&pool, &reddit, &cfg).await.unwrap();
    assert!(processed);
    assert!(reddit.sent().await.is_empty());
    let due: DateTime<Utc> = sqlx::query_scalar(
        "SELECT due_at FROM actions WHERE post_id = ? AND kind = 'remove_post'",
    )
    .bind("nf4")
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(due, sent_at + Duration::seconds(1200));
    assert!(due <= Utc::now());

    // Second pass picks it up with no force_due needed.
    let processed = process_next_action(&pool, &reddit, &cfg).await.unwrap();
    assert!(processed);

    let sent = reddit.sent().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(
        sent[0].subject,
        "You have not tagged your post within the allotted amount of time."
    );
    assert_eq!(reddit.removed().await, vec!["t3_nf4".to_string()]);
    let post = db::get_post(&pool, "nf4").await.unwrap().unwrap();
    assert_eq!(post.state, PostState::Removed);
    assert_eq!(post.removal_reason, Some(RemovalReason::NoFlair));
    assert_eq!(db::count_remaining_actions(&pool).await.unwrap(), 0);
}

#[tokio::test]
async fn failed_send_backs_off_and_retries() {
    let pool = setup_pool().await;
    let cfg = test_config();
    let reddit = RecordingReddit::default();
    reddit.add_submission(submission("rt1", "erin", None)).await;
    reddit
        .queue_send_result(Err(anyhow!("reddit is down")))
        .await;

    scan_once(&pool, &reddit, &cfg).await.unwrap();
    force_due(&pool).await;

    // First attempt fails and backs off.
    let processed = process_next_action(&pool, &reddit, &cfg).await.unwrap();
    assert!(processed);
    assert!(reddit.sent().await.is_empty());

    let (kind, attempt): (String, i32) = sqlx::query_as("SELECT kind, attempt FROM actions")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(kind, "send_reminder");
    assert_eq!(attempt, 1);
    let post = db::get_post(&pool, "rt1").await.unwrap().unwrap();
    assert!(post.reminder_sent_at.is_none());

    // Retry succeeds.
    force_due(&pool).await;
    let processed = process_next_action(&pool, &reddit, &cfg).await.unwrap();
    assert!(processed);

    let sent = reddit.sent().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "erin");
    let remaining: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM actions WHERE kind = 'remove_post'")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(remaining, 1);
}

#[tokio::test]
async fn tech_support_flair_during_removal_window_is_pulled() {
    let pool = setup_pool().await;
    let cfg = test_config();
    let reddit = RecordingReddit::default();
    reddit.set_moderators(&["mod_alpha"]).await;
    reddit
        .add_submission(submission("nf4", "frank", None))
        .await;

    scan_once(&pool, &reddit, &cfg).await.unwrap();
    force_due(&pool).await;
    process_next_action(&pool, &reddit, &cfg).await.unwrap();
    assert_eq!(reddit.sent().await.len(), 1);

    // The author picks the tech-support flair during the removal window.
    reddit
        .set_submission(submission("nf4", "frank", Some("Tech Support")))
        .await;
    force_due(&pool).await;
    let processed = process_next_action(&pool, &reddit, &cfg).await.unwrap();
    assert!(processed);

    let sent = reddit.sent().await;
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[1].subject, "Tech support removed");
    assert_eq!(reddit.removed().await, vec!["t3_nf4".to_string()]);

    let post = db::get_post(&pool, "nf4").await.unwrap().unwrap();
    assert_eq!(post.state, PostState::Removed);
    assert_eq!(post.removal_reason, Some(RemovalReason::TechSupport));
    assert_eq!(db::count_remaining_actions(&pool).await.unwrap(), 0);
}

#[tokio::test]
async fn flair_added_during_removal_window_resolves() {
    let pool = setup_pool().await;
    let cfg = test_config();
    let reddit = RecordingReddit::default();
    reddit
        .add_submission(submission("nf5", "grace", None))
        .await;

    scan_once(&pool, &reddit, &cfg).await.unwrap();
    force_due(&pool).await;
    process_next_action(&pool, &reddit, &cfg).await.unwrap();
    assert_eq!(reddit.sent().await.len(), 1);

    reddit
        .set_submission(submission("nf5", "grace", Some("Photo")))
        .await;
    force_due(&pool).await;
    let processed = process_next_action(&pool, &reddit, &cfg).await.unwrap();
    assert!(processed);

    // Only the reminder went out; the post survives.
    assert_eq!(reddit.sent().await.len(), 1);
    assert!(reddit.removed().await.is_empty());
    let post = db::get_post(&pool, "nf5").await.unwrap().unwrap();
    assert_eq!(post.state, PostState::Resolved);
    assert_eq!(db::count_remaining_actions(&pool).await.unwrap(), 0);
}

#[tokio::test]
async fn deleted_post_resolves_quietly() {
    let pool = setup_pool().await;
    let cfg = test_config();
    let reddit = RecordingReddit::default();
    reddit
        .add_submission(submission("gone1", "henry", None))
        .await;

    scan_once(&pool, &reddit, &cfg).await.unwrap();
    reddit.drop_submission("gone1").await;
    force_due(&pool).await;

    let processed = process_next_action(&pool, &reddit, &cfg).await.unwrap();
    assert!(processed);

    assert!(reddit.sent().await.is_empty());
    assert!(reddit.removed().await.is_empty());
    let post = db::get_post(&pool, "gone1").await.unwrap().unwrap();
    assert_eq!(post.state, PostState::Resolved);
    assert_eq!(db::count_remaining_actions(&pool).await.unwrap(), 0);
}
