// src/api/mod.rs

//! Content server HTTP API access
//!
//! This module provides:
//! - A blocking JSON client that turns non-2xx answers into errors
//! - Typed views of call reports and tasks
//! - Polling of spawned tasks until they reach a terminal state

mod client;
mod tasks;

pub use client::ApiClient;
pub use tasks::{CallReport, SpawnedTask, Task, TaskError, TaskPoller, TaskState};

/// Repository collection
pub const REPOSITORY_PATH: &str = "/pulp/api/v2/repositories/";

/// Orphaned content collection
pub const ORPHANS_PATH: &str = "/pulp/api/v2/content/orphans/";

/// Upload request collection
pub const CONTENT_UPLOAD_PATH: &str = "/pulp/api/v2/content/uploads/";

/// Server status
pub const STATUS_PATH: &str = "/pulp/api/v2/status/";

/// Path of a single repository
pub fn repository_href(repo_id: &str) -> String {
    format!("{REPOSITORY_PATH}{repo_id}/")
}
