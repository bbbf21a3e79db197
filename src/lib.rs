//! Flair-enforcement moderation bot for a single subreddit.
//!
//! The monitor polls the subreddit's newest submissions and classifies each
//! one the first time it is seen; all enforcement waits (reminder, removal)
//! live in a durable action queue drained by a worker task, so a restart
//! picks up in-flight windows instead of losing them.

pub mod actions;
pub mod config;
pub mod db;
pub mod messages;
pub mod model;
pub mod monitor;
pub mod reddit;
