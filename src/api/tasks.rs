// src/api/tasks.rs
//! Asynchronous task tracking
//!
//! Long-running server actions answer 202 Accepted with a call report
//! listing spawned tasks. Each task is polled until it reaches a terminal
//! state; tasks spawned by a finished task are followed as well.

use super::client::ApiClient;
use crate::config::PollPolicy;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Reference to a task spawned by an action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpawnedTask {
    #[serde(rename = "_href")]
    pub href: String,
    pub task_id: String,
}

/// Body of a 202 Accepted answer
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CallReport {
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<Value>,
    #[serde(default)]
    pub spawned_tasks: Vec<SpawnedTask>,
}

/// Task state as reported by the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Waiting,
    Accepted,
    Running,
    Suspended,
    Finished,
    Error,
    Canceled,
    Skipped,
    #[serde(other)]
    Unknown,
}

impl TaskState {
    /// No further transitions will happen
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Finished | TaskState::Error | TaskState::Canceled | TaskState::Skipped
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Waiting => "waiting",
            TaskState::Accepted => "accepted",
            TaskState::Running => "running",
            TaskState::Suspended => "suspended",
            TaskState::Finished => "finished",
            TaskState::Error => "error",
            TaskState::Canceled => "canceled",
            TaskState::Skipped => "skipped",
            TaskState::Unknown => "unknown",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error details attached to a failed task
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskError {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub data: Option<Value>,
}

/// A server-side task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub task_id: String,
    #[serde(rename = "_href", default)]
    pub href: String,
    pub state: TaskState,
    #[serde(default)]
    pub error: Option<TaskError>,
    #[serde(default)]
    pub traceback: Option<String>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub progress_report: Value,
    #[serde(default)]
    pub spawned_tasks: Vec<SpawnedTask>,
}

impl Task {
    /// Human-readable failure description
    pub fn error_description(&self) -> String {
        self.error
            .as_ref()
            .and_then(|e| e.description.clone())
            .unwrap_or_else(|| format!("task ended in state {}", self.state))
    }

    /// Finished, or skipped without an error
    pub fn succeeded(&self) -> bool {
        match self.state {
            TaskState::Finished => true,
            TaskState::Skipped => self.error.is_none(),
            _ => false,
        }
    }

    /// Integer field of the task result (e.g., `added_count`)
    pub fn result_count(&self, field: &str) -> Option<u64> {
        self.result.as_ref()?.get(field)?.as_u64()
    }

    /// Walk the progress report along `path`
    pub fn progress(&self, path: &[&str]) -> Option<&Value> {
        path.iter()
            .try_fold(&self.progress_report, |node, key| node.get(*key))
    }
}

/// Polls tasks with backoff until they reach a terminal state
pub struct TaskPoller<'a> {
    client: &'a ApiClient,
    policy: PollPolicy,
}

impl<'a> TaskPoller<'a> {
    pub fn new(client: &'a ApiClient, policy: PollPolicy) -> Self {
        Self { client, policy }
    }

    /// Poll one task until it is terminal; returns it whatever the outcome
    pub fn wait(&self, href: &str) -> Result<Task> {
        let start = Instant::now();
        let mut delay = self.policy.interval;
        let mut attempts = 0u32;
        loop {
            attempts = attempts.saturating_add(1);
            let task: Task = self.client.get_json(href)?;
            if task.state.is_terminal() {
                debug!(
                    "Task {} reached '{}' after {} polls",
                    task.task_id, task.state, attempts
                );
                return Ok(task);
            }

            let elapsed = start.elapsed();
            if elapsed >= self.policy.timeout {
                return Err(Error::Timeout {
                    href: href.to_string(),
                    elapsed,
                });
            }
            let remaining = self.policy.timeout - elapsed;
            std::thread::sleep(delay.min(remaining).max(Duration::from_millis(1)));
            delay = self.policy.next_delay(delay);
        }
    }

    /// Poll every task of a call report, following nested spawned tasks
    ///
    /// Fails on the first task that neither finished nor was skipped
    /// cleanly.
    pub fn wait_all(&self, report: &CallReport) -> Result<Vec<Task>> {
        let mut pending: VecDeque<SpawnedTask> = report.spawned_tasks.iter().cloned().collect();
        let mut done = Vec::new();

        while let Some(spawned) = pending.pop_front() {
            let task = self.wait(&spawned.href)?;
            if !task.succeeded() {
                return Err(Error::TaskFailed {
                    href: spawned.href,
                    state: task.state.to_string(),
                    description: task.error_description(),
                    task: Box::new(task),
                });
            }
            info!("Task {} {}", task.task_id, task.state);
            pending.extend(task.spawned_tasks.iter().cloned());
            done.push(task);
        }

        Ok(done)
    }
}
