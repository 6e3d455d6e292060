// src/lib.rs

//! repocopy: verification harness for a content server's unit copy
//!
//! Drives a Pulp 2 style server over its JSON API: creates repositories,
//! syncs them from fixture feeds, copies units between them with the
//! various dependency-resolution options, and checks what each copy left
//! in the destination.
//!
//! # Architecture
//!
//! - `fixtures`: request bodies and the fixture feed catalog
//! - `driver`: repository lifecycle, sync, publish and upload
//! - `copy`: associate, unassociate and orphan purge
//! - `verify` / `repodata`: unit search, repository detail, published metadata
//! - `harness` / `scenarios`: scenario registry, skips, cleanup and reports
//!
//! All copy logic runs on the server; the harness only orchestrates and
//! compares.

pub mod api;
pub mod config;
pub mod content;
pub mod copy;
pub mod driver;
mod error;
pub mod fixtures;
pub mod harness;
pub mod repodata;
pub mod scenarios;
pub mod verify;
pub mod version;

pub use api::{ApiClient, CallReport, Task, TaskPoller, TaskState};
pub use config::{HarnessConfig, PollPolicy};
pub use content::{ContentUnit, Repository, TypeId};
pub use copy::{CopyRequest, Criteria, OverrideConfig, UnitFilter};
pub use error::{Error, Result};
pub use harness::{Outcome, RunReport, Runner, Scenario, ScenarioContext, Suite};
pub use version::{RpmVersion, VersionConstraint};
