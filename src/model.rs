use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum PostState {
    Watching,
    Resolved,
    Removed,
}

impl PostState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostState::Watching => "watching",
            PostState::Resolved => "resolved",
            PostState::Removed => "removed",
        }
    }

    pub fn parse_state(s: &str) -> Option<Self> {
        match s {
            "watching" => Some(PostState::Watching),
            "resolved" => Some(PostState::Resolved),
            "removed" => Some(PostState::Removed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RemovalReason {
    NoFlair,
    TechSupport,
}

impl RemovalReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RemovalReason::NoFlair => "no_flair",
            RemovalReason::TechSupport => "tech_support",
        }
    }

    pub fn parse_reason(s: &str) -> Option<Self> {
        match s {
            "no_flair" => Some(RemovalReason::NoFlair),
            "tech_support" => Some(RemovalReason::TechSupport),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ActionKind {
    SendReminder,
    RemovePost,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::SendReminder => "send_reminder",
            ActionKind::RemovePost => "remove_post",
        }
    }
}

/// A subreddit submission as seen through the Reddit API.
///
/// Only the fields the bot acts on are carried; everything else stays on
/// Reddit's side.
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub id: String,
    pub title: String,
    pub author: String,
    pub permalink: String,
    pub created_utc: DateTime<Utc>,
    pub link_flair_text: Option<String>,
    pub approved_by: Option<String>,
}

impl Submission {
    /// The submission's flair, treating an empty string the same as no flair.
    pub fn flair(&self) -> Option<&str> {
        self.link_flair_text.as_deref().filter(|s| !s.is_empty())
    }

    pub fn shortlink(&self) -> String {
        format!("https://redd.it/{}", self.id)
    }

    /// The `t3_`-prefixed fullname used by moderation endpoints.
    pub fn fullname(&self) -> String {
        format!("t3_{}", self.id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackedPost {
    pub id: String,
    pub title: String,
    pub author: String,
    pub permalink: String,
    pub created_utc: DateTime<Utc>,
    pub state: PostState,
    pub removal_reason: Option<RemovalReason>,
    pub first_seen_at: DateTime<Utc>,
    pub reminder_sent_at: Option<DateTime<Utc>>,
    pub removed_at: Option<DateTime<Utc>>,
}
