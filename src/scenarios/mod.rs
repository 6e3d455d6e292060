// src/scenarios/mod.rs

//! Scenario registry
//!
//! Every scenario the harness knows, grouped by suite, in run order.

mod copy;
mod sync;

use crate::error::{Error, Result};
use crate::harness::{Scenario, Suite};

/// Every registered scenario
pub fn all() -> Vec<&'static Scenario> {
    copy::SCENARIOS.iter().chain(sync::SCENARIOS).collect()
}

/// Look a scenario up by name
pub fn find(name: &str) -> Option<&'static Scenario> {
    all().into_iter().find(|s| s.name == name)
}

/// Scenarios of `suite` (or every suite), narrowed to `names` when given
///
/// Unknown names are an error rather than an empty run.
pub fn select(suite: Option<Suite>, names: &[String]) -> Result<Vec<&'static Scenario>> {
    for name in names {
        if find(name).is_none() {
            return Err(Error::ConfigError(format!("Unknown scenario '{}'", name)));
        }
    }
    Ok(all()
        .into_iter()
        .filter(|s| suite.is_none_or(|suite| s.suite == suite))
        .filter(|s| names.is_empty() || names.iter().any(|n| n == s.name))
        .collect())
}
