// src/harness/report.rs

//! Run results

use super::Scenario;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// How a scenario ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Passed,
    Skipped { reason: String },
    Failed { error: String },
}

impl Outcome {
    /// Map a scenario's result; [`Error::Skipped`] is a skip, not a failure
    pub fn from_result(result: Result<()>) -> Self {
        match result {
            Ok(()) => Outcome::Passed,
            Err(Error::Skipped(reason)) => Outcome::Skipped { reason },
            Err(e) => Outcome::Failed {
                error: e.to_string(),
            },
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Outcome::Failed { .. })
    }
}

/// Result of one scenario
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioReport {
    pub name: String,
    pub suite: String,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    #[serde(flatten)]
    pub outcome: Outcome,
}

impl ScenarioReport {
    pub(crate) fn start(scenario: &Scenario) -> Self {
        Self {
            name: scenario.name.to_string(),
            suite: scenario.suite.to_string(),
            started_at: Utc::now(),
            duration_ms: 0,
            outcome: Outcome::Passed,
        }
    }

    pub(crate) fn complete(&mut self, outcome: Outcome, elapsed: Duration) {
        self.outcome = outcome;
        self.duration_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
    }
}

/// Results of a whole run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub base_url: String,
    pub server_version: String,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    pub scenarios: Vec<ScenarioReport>,
}

impl RunReport {
    pub fn new(base_url: &str, server_version: &str) -> Self {
        Self {
            base_url: base_url.to_string(),
            server_version: server_version.to_string(),
            started_at: Utc::now(),
            finished_at: None,
            scenarios: Vec::new(),
        }
    }

    pub fn push(&mut self, scenario: ScenarioReport) {
        self.scenarios.push(scenario);
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    pub fn passed(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Passed))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Skipped { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(Outcome::is_failed)
    }

    fn count(&self, pred: impl Fn(&Outcome) -> bool) -> usize {
        self.scenarios.iter().filter(|s| pred(&s.outcome)).count()
    }

    /// True when no scenario failed
    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }

    /// One-line tally
    pub fn summary(&self) -> String {
        format!(
            "{} scenarios: {} passed, {} skipped, {} failed",
            self.scenarios.len(),
            self.passed(),
            self.skipped(),
            self.failed()
        )
    }

    /// Write the report as pretty-printed JSON
    pub fn write_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| Error::ParseError(format!("Failed to serialize report: {e}")))?;
        std::fs::write(path, json)
            .map_err(|e| Error::IoError(format!("Failed to write {}: {e}", path.display())))
    }
}
