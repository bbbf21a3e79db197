//! Wire models for the Reddit listing API.

use chrono::DateTime;
use serde::Deserialize;

use crate::model::Submission;

/// Listing envelope returned by `/r/{sub}/new`, `/api/info` and friends.
#[derive(Debug, Deserialize)]
pub struct Listing<T> {
    pub kind: String,
    pub data: ListingData<T>,
}

#[derive(Debug, Deserialize)]
pub struct ListingData<T> {
    pub children: Vec<Child<T>>,
    #[serde(default)]
    pub after: Option<String>,
    #[serde(default)]
    pub before: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct Child<T> {
    pub kind: String,
    pub data: T,
}

/// Raw submission payload. Only the fields the bot reads are listed; serde
/// skips the rest of Reddit's very wide object.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmissionData {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub author: String,
    pub permalink: String,
    #[serde(default)]
    pub url: String,
    pub created_utc: f64,
    #[serde(default)]
    pub link_flair_text: Option<String>,
    #[serde(default)]
    pub approved_by: Option<String>,
}

impl From<SubmissionData> for Submission {
    fn from(data: SubmissionData) -> Self {
        Self {
            id: data.id,
            title: data.title,
            author: data.author,
            permalink: data.permalink,
            created_utc: DateTime::from_timestamp(data.created_utc as i64, 0).unwrap_or_default(),
            link_flair_text: data.link_flair_text,
            approved_by: data.approved_by,
        }
    }
}

/// `/r/{sub}/about/moderators` envelope. Unlike listings, UserList children
/// are bare objects without a `kind`/`data` wrapper.
#[derive(Debug, Deserialize)]
pub struct UserList {
    pub kind: String,
    pub data: UserListData,
}

#[derive(Debug, Deserialize)]
pub struct UserListData {
    pub children: Vec<ModeratorEntry>,
}

#[derive(Debug, Deserialize)]
pub struct ModeratorEntry {
    pub name: String,
}
