//! Database module: entity models and SQL repositories.
//!
//! This module is split into two submodules:
//! - `model`: view models returned by repositories to the worker.
//! - `repo`: SQL-only functions that map rows into entities.
//!
//! External modules should import from `flairbot::db` — we re-export the
//! repository API and commonly used models for convenience.

pub mod model;
pub mod repo;

// Re-export the repository API at `crate::db::*`.
pub use repo::*;

// Surface view models used by callers (e.g., the action worker).
pub use model::PostForAction;
