//! Database view models used by repositories.
//!
//! Keep these structs focused on the data returned by queries. Business logic
//! should live in higher layers.

use chrono::{DateTime, Utc};

use crate::model::PostState;

/// Post slice used by the action worker to decide how to handle a due action.
#[derive(Debug, Clone)]
pub struct PostForAction {
    pub state: PostState,
    pub reminder_sent_at: Option<DateTime<Utc>>,
}
