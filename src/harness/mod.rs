// src/harness/mod.rs

//! Scenario execution
//!
//! A [`Scenario`] is a named function over a [`ScenarioContext`]. The
//! [`Runner`] decides whether each scenario may run against the server under
//! test (minimum version, known issues), runs it, always runs its cleanup,
//! and records the outcome in a [`RunReport`].
//!
//! Scenarios run one at a time; nothing here is shared across threads.

mod context;
mod report;

pub use context::ScenarioContext;
pub use report::{Outcome, RunReport, ScenarioReport};

use crate::api::ApiClient;
use crate::config::{HarnessConfig, PollPolicy};
use crate::driver;
use crate::error::{Error, Result};
use crate::fixtures::FixtureCatalog;
use crate::version::{RpmVersion, VersionConstraint};
use std::fmt;
use std::str::FromStr;
use std::time::Instant;
use tracing::{error, info, warn};

/// Group of related scenarios
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Suite {
    /// Copy (associate) behavior
    Copy,
    /// Sync and publish behavior
    Sync,
}

impl Suite {
    pub fn as_str(&self) -> &'static str {
        match self {
            Suite::Copy => "copy",
            Suite::Sync => "sync",
        }
    }
}

impl fmt::Display for Suite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Suite {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "copy" => Ok(Suite::Copy),
            "sync" => Ok(Suite::Sync),
            other => Err(Error::ConfigError(format!(
                "Unknown suite '{}' (expected copy or sync)",
                other
            ))),
        }
    }
}

/// Body of a scenario
pub type ScenarioFn = fn(&mut ScenarioContext<'_>) -> Result<()>;

/// A registered scenario
#[derive(Clone, Copy)]
pub struct Scenario {
    pub name: &'static str,
    pub suite: Suite,
    pub summary: &'static str,
    /// Server versions the scenario applies to, e.g. ">= 2.18.1"
    pub requires: Option<&'static str>,
    /// Issues that must be fixed on the server for the scenario to run
    pub known_issues: &'static [u32],
    pub run: ScenarioFn,
}

impl fmt::Debug for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scenario")
            .field("name", &self.name)
            .field("suite", &self.suite)
            .field("requires", &self.requires)
            .field("known_issues", &self.known_issues)
            .finish()
    }
}

/// Whether `issue` is fixed on a server of `version`
///
/// Configured issues take precedence over the built-in fix versions.
/// Issues known to neither count as fixed.
pub fn issue_fixed(config: &HarnessConfig, version: &RpmVersion, issue: u32) -> Result<bool> {
    match config.effective_issue(issue) {
        Some(known) => known.is_fixed(version),
        None => Ok(true),
    }
}

/// Runs scenarios against one server
pub struct Runner<'a> {
    client: &'a ApiClient,
    config: &'a HarnessConfig,
    catalog: FixtureCatalog,
    poll: PollPolicy,
    server_version: RpmVersion,
}

impl<'a> Runner<'a> {
    /// Create a runner; asks the server for its version unless configured
    pub fn new(client: &'a ApiClient, config: &'a HarnessConfig) -> Result<Self> {
        let server_version = match &config.server.version {
            Some(version) => RpmVersion::parse(version)?,
            None => driver::server_version(client)?,
        };
        info!("Server under test reports version {}", server_version);
        Ok(Self {
            client,
            config,
            catalog: FixtureCatalog::new(config.fixtures_url()?),
            poll: config.poll_policy()?,
            server_version,
        })
    }

    pub fn server_version(&self) -> &RpmVersion {
        &self.server_version
    }

    /// Run every scenario in order
    pub fn run(&self, scenarios: &[&Scenario]) -> RunReport {
        let mut report = RunReport::new(
            self.client.base_url().as_str(),
            &self.server_version.to_string(),
        );
        for scenario in scenarios {
            report.push(self.run_scenario(scenario));
        }
        report.finish();
        info!("{}", report.summary());
        report
    }

    /// Run one scenario, including its cleanup
    pub fn run_scenario(&self, scenario: &Scenario) -> ScenarioReport {
        let started = Instant::now();
        let mut record = ScenarioReport::start(scenario);

        let outcome = match self.skip_reason(scenario) {
            Ok(Some(reason)) => Outcome::Skipped { reason },
            Ok(None) => {
                info!("Running {} ({})", scenario.name, scenario.summary);
                let mut ctx = ScenarioContext::new(
                    self.client,
                    self.config,
                    &self.catalog,
                    self.poll,
                    &self.server_version,
                );
                let result = (scenario.run)(&mut ctx);
                ctx.cleanup();
                Outcome::from_result(result)
            }
            Err(e) => Outcome::Failed {
                error: e.to_string(),
            },
        };

        match &outcome {
            Outcome::Passed => info!("PASS {}", scenario.name),
            Outcome::Skipped { reason } => warn!("SKIP {}: {}", scenario.name, reason),
            Outcome::Failed { error: message } => error!("FAIL {}: {}", scenario.name, message),
        }
        record.complete(outcome, started.elapsed());
        record
    }

    /// Why a scenario cannot run on this server, if it cannot
    fn skip_reason(&self, scenario: &Scenario) -> Result<Option<String>> {
        if let Some(requires) = scenario.requires {
            let constraint = VersionConstraint::parse(requires)?;
            if !constraint.satisfies(&self.server_version) {
                return Ok(Some(format!(
                    "requires server {}, found {}",
                    constraint, self.server_version
                )));
            }
        }
        for issue in scenario.known_issues {
            if !issue_fixed(self.config, &self.server_version, *issue)? {
                return Ok(Some(format!("issue {} is not fixed", issue)));
            }
        }
        Ok(None)
    }
}
