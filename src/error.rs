// src/error.rs

//! Error types shared by the harness library

use std::time::Duration;

use crate::api::Task;

/// Errors raised while driving the content server or checking its results
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Initialization error: {0}")]
    InitError(String),

    #[error("Request failed: {0}")]
    RequestError(String),

    #[error("HTTP {status} from {method} {url}: {body}")]
    Http {
        method: String,
        url: String,
        status: u16,
        body: String,
    },

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("I/O error: {0}")]
    IoError(String),

    #[error("Task {href} ended in state '{state}': {description}")]
    TaskFailed {
        href: String,
        state: String,
        description: String,
        task: Box<Task>,
    },

    #[error("Timed out after {elapsed:?} waiting for task {href}")]
    Timeout { href: String, elapsed: Duration },

    #[error("Assertion failed ({what}): expected {expected}, got {actual}")]
    Assertion {
        what: String,
        expected: String,
        actual: String,
    },

    #[error("Skipped: {0}")]
    Skipped(String),
}

impl Error {
    /// HTTP status carried by this error, if it came from a non-2xx response
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// True when the server answered 404
    pub fn is_not_found(&self) -> bool {
        self.status() == Some(404)
    }

    /// The failed task, when this error is a task failure
    pub fn failed_task(&self) -> Option<&Task> {
        match self {
            Error::TaskFailed { task, .. } => Some(task),
            _ => None,
        }
    }
}

/// Result alias used across the crate
pub type Result<T> = std::result::Result<T, Error>;
