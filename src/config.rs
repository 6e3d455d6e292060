// src/config.rs
//! Configuration file parsing for the harness
//!
//! Supports TOML configuration files with the following sections:
//! - [server] - Base URL, credentials, TLS, server version
//! - [polling] - Task polling interval, backoff cap and timeout
//! - [fixtures] - Base URL of the fixture feeds
//! - [publish] - Path under which distributors publish
//! - [[known_issues]] - Server defects that turn scenarios into skips
//!
//! Environment variables override file values (see [`ConfigEnv`]).

use crate::error::{Error, Result};
use crate::version::{RpmVersion, VersionConstraint};
use anyhow::Context;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// TOML configuration file structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HarnessConfig {
    /// Content server settings
    #[serde(default)]
    pub server: ServerSection,

    /// Task polling settings
    #[serde(default)]
    pub polling: PollingSection,

    /// Fixture feed settings
    #[serde(default)]
    pub fixtures: FixturesSection,

    /// Published content settings
    #[serde(default)]
    pub publish: PublishSection,

    /// Known server defects
    #[serde(default)]
    pub known_issues: Vec<KnownIssue>,
}

/// Content server section
#[derive(Debug, Clone, Deserialize)]
pub struct ServerSection {
    /// Scheme and host of the server, e.g. `https://pulp.example.com`
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_username")]
    pub username: String,

    #[serde(default = "default_password")]
    pub password: String,

    /// Verify the server's TLS certificate
    #[serde(default = "default_true")]
    pub verify_tls: bool,

    /// Server version; read from the status endpoint when unset
    #[serde(default)]
    pub version: Option<String>,

    /// Per-request timeout (e.g., "30s")
    #[serde(default = "default_request_timeout")]
    pub request_timeout: String,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            username: default_username(),
            password: default_password(),
            verify_tls: true,
            version: None,
            request_timeout: default_request_timeout(),
        }
    }
}

fn default_base_url() -> String {
    "https://localhost".to_string()
}

fn default_username() -> String {
    "admin".to_string()
}

fn default_password() -> String {
    "admin".to_string()
}

fn default_true() -> bool {
    true
}

fn default_request_timeout() -> String {
    "30s".to_string()
}

/// Task polling section
#[derive(Debug, Clone, Deserialize)]
pub struct PollingSection {
    /// First delay between polls
    #[serde(default = "default_poll_interval")]
    pub interval: String,

    /// Upper bound for the backoff delay
    #[serde(default = "default_poll_max_interval")]
    pub max_interval: String,

    /// Give up on a task after this long
    #[serde(default = "default_poll_timeout")]
    pub timeout: String,
}

impl Default for PollingSection {
    fn default() -> Self {
        Self {
            interval: default_poll_interval(),
            max_interval: default_poll_max_interval(),
            timeout: default_poll_timeout(),
        }
    }
}

fn default_poll_interval() -> String {
    "300ms".to_string()
}

fn default_poll_max_interval() -> String {
    "5s".to_string()
}

fn default_poll_timeout() -> String {
    "30m".to_string()
}

/// Fixture feed section
#[derive(Debug, Clone, Deserialize)]
pub struct FixturesSection {
    /// Directory URL that holds every fixture feed
    #[serde(default = "default_fixtures_url")]
    pub base_url: String,
}

impl Default for FixturesSection {
    fn default() -> Self {
        Self {
            base_url: default_fixtures_url(),
        }
    }
}

fn default_fixtures_url() -> String {
    "https://repos.fedorapeople.org/pulp/pulp/fixtures/".to_string()
}

/// Published content section
#[derive(Debug, Clone, Deserialize)]
pub struct PublishSection {
    /// URL path the yum distributor publishes under
    #[serde(default = "default_publish_path")]
    pub path: String,
}

impl Default for PublishSection {
    fn default() -> Self {
        Self {
            path: default_publish_path(),
        }
    }
}

fn default_publish_path() -> String {
    "/pulp/repos/".to_string()
}

/// A server defect referenced by one or more scenarios
#[derive(Debug, Clone, Deserialize)]
pub struct KnownIssue {
    /// Issue number in the server's tracker
    pub id: u32,

    /// Explicit fixed flag; `false` marks the issue unfixed everywhere
    #[serde(default)]
    pub fixed: Option<bool>,

    /// Versions carrying the fix (e.g., ">= 2.19")
    #[serde(default)]
    pub fixed_in: Option<String>,
}

/// Fix versions of the issues scenarios reference, used when the
/// configuration does not list them
const BUILTIN_FIXED_IN: &[(u32, &str)] = &[
    (3004, ">= 2.15"),
    (3104, ">= 2.15"),
    (5449, ">= 2.21"),
];

impl KnownIssue {
    /// Built-in entry for an issue scenarios reference
    pub fn builtin(id: u32) -> Option<Self> {
        BUILTIN_FIXED_IN
            .iter()
            .find(|(issue, _)| *issue == id)
            .map(|(id, fixed_in)| KnownIssue {
                id: *id,
                fixed: None,
                fixed_in: Some(fixed_in.to_string()),
            })
    }

    /// Whether the issue is fixed on a server of the given version
    pub fn is_fixed(&self, server_version: &RpmVersion) -> Result<bool> {
        if self.fixed == Some(false) {
            return Ok(false);
        }
        match &self.fixed_in {
            Some(constraint) => Ok(VersionConstraint::parse(constraint)?.satisfies(server_version)),
            None => Ok(true),
        }
    }
}

/// Environment keys that override file configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigEnv {
    /// Path to the TOML file
    ConfigPath,
    BaseUrl,
    Username,
    Password,
    ServerVersion,
    PollTimeout,
    FixturesUrl,
}

impl ConfigEnv {
    /// Returns the canonical environment variable name
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ConfigPath => "REPOCOPY_CONFIG",
            Self::BaseUrl => "REPOCOPY_BASE_URL",
            Self::Username => "REPOCOPY_USERNAME",
            Self::Password => "REPOCOPY_PASSWORD",
            Self::ServerVersion => "REPOCOPY_SERVER_VERSION",
            Self::PollTimeout => "REPOCOPY_POLL_TIMEOUT",
            Self::FixturesUrl => "REPOCOPY_FIXTURES_URL",
        }
    }
}

impl HarnessConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::IoError(format!("Failed to read {}: {e}", path.display())))?;
        Self::from_toml(&content)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content)
            .map_err(|e| Error::ConfigError(format!("Failed to parse config: {e}")))
    }

    /// Create the default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Load from `path` (or the file named by `REPOCOPY_CONFIG`), then apply
    /// environment overrides and validate
    pub fn resolve(path: Option<&Path>) -> Result<Self> {
        let from_env = read_env(ConfigEnv::ConfigPath.as_str())?;
        let mut config = match path.map(Path::to_path_buf).or(from_env.map(Into::into)) {
            Some(path) => {
                debug!("Loading config from {}", path.display());
                Self::load(&path)?
            }
            None => Self::default(),
        };
        config.apply_env(|name| read_env(name).ok().flatten());
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from an environment lookup
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ConfigEnv::BaseUrl.as_str()) {
            self.server.base_url = value;
        }
        if let Some(value) = lookup(ConfigEnv::Username.as_str()) {
            self.server.username = value;
        }
        if let Some(value) = lookup(ConfigEnv::Password.as_str()) {
            self.server.password = value;
        }
        if let Some(value) = lookup(ConfigEnv::ServerVersion.as_str()) {
            self.server.version = Some(value);
        }
        if let Some(value) = lookup(ConfigEnv::PollTimeout.as_str()) {
            self.polling.timeout = value;
        }
        if let Some(value) = lookup(ConfigEnv::FixturesUrl.as_str()) {
            self.fixtures.base_url = value;
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        let base = self.base_url()?;
        if base.cannot_be_a_base() {
            return Err(Error::ConfigError(format!(
                "server.base_url must be a base URL: {}",
                self.server.base_url
            )));
        }
        self.fixtures_url()?;

        if !self.publish.path.starts_with('/') {
            return Err(Error::ConfigError(format!(
                "publish.path must be absolute: {}",
                self.publish.path
            )));
        }

        if self.request_timeout()?.is_zero() {
            return Err(Error::ConfigError("server.request_timeout must be > 0".to_string()));
        }
        let policy = self.poll_policy()?;
        if policy.interval.is_zero() || policy.timeout.is_zero() {
            return Err(Error::ConfigError(
                "polling.interval and polling.timeout must be > 0".to_string(),
            ));
        }
        if policy.max_interval < policy.interval {
            return Err(Error::ConfigError(
                "polling.max_interval must be >= polling.interval".to_string(),
            ));
        }

        if let Some(version) = &self.server.version {
            RpmVersion::parse(version)?;
        }
        for issue in &self.known_issues {
            if let Some(constraint) = &issue.fixed_in {
                VersionConstraint::parse(constraint)?;
            }
        }

        Ok(())
    }

    /// Parsed server base URL
    pub fn base_url(&self) -> Result<Url> {
        Url::parse(&self.server.base_url).map_err(|e| {
            Error::ConfigError(format!("Invalid server.base_url '{}': {e}", self.server.base_url))
        })
    }

    /// Parsed fixtures base URL, always ending in `/`
    pub fn fixtures_url(&self) -> Result<Url> {
        let mut raw = self.fixtures.base_url.clone();
        if !raw.ends_with('/') {
            raw.push('/');
        }
        Url::parse(&raw).map_err(|e| {
            Error::ConfigError(format!("Invalid fixtures.base_url '{}': {e}", self.fixtures.base_url))
        })
    }

    /// Parse the per-request timeout
    pub fn request_timeout(&self) -> Result<Duration> {
        to_config_error(parse_duration(&self.server.request_timeout))
    }

    /// Build the task polling policy
    pub fn poll_policy(&self) -> Result<PollPolicy> {
        Ok(PollPolicy {
            interval: to_config_error(parse_duration(&self.polling.interval))?,
            max_interval: to_config_error(parse_duration(&self.polling.max_interval))?,
            timeout: to_config_error(parse_duration(&self.polling.timeout))?,
        })
    }

    /// Look up a known issue by id
    pub fn known_issue(&self, id: u32) -> Option<&KnownIssue> {
        self.known_issues.iter().find(|issue| issue.id == id)
    }

    /// Configured entry for an issue, falling back to the built-in one
    pub fn effective_issue(&self, id: u32) -> Option<KnownIssue> {
        self.known_issue(id).cloned().or_else(|| KnownIssue::builtin(id))
    }
}

/// How long and how often task state is polled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_interval: Duration,
    pub timeout: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(300),
            max_interval: Duration::from_secs(5),
            timeout: Duration::from_secs(30 * 60),
        }
    }
}

impl PollPolicy {
    /// Delay after `delay`, growing by half and capped at `max_interval`
    pub fn next_delay(&self, delay: Duration) -> Duration {
        (delay + delay / 2).min(self.max_interval)
    }
}

fn to_config_error<T>(result: anyhow::Result<T>) -> Result<T> {
    result.map_err(|e| Error::ConfigError(format!("{e:#}")))
}

/// Read an environment variable, rejecting invalid UTF-8 and blank values
fn read_env(name: &str) -> Result<Option<String>> {
    match std::env::var_os(name) {
        None => Ok(None),
        Some(raw) => {
            let value = raw
                .into_string()
                .map_err(|_| Error::ConfigError(format!("{name} must be valid UTF-8")))?;
            if value.trim().is_empty() {
                return Err(Error::ConfigError(format!("{name} must not be empty")));
            }
            Ok(Some(value))
        }
    }
}

/// Parse a human-readable duration string (e.g., "500ms", "15m", "1h", "30s")
pub fn parse_duration(s: &str) -> anyhow::Result<Duration> {
    let s = s.trim().to_lowercase();

    if let Some(num_str) = s.strip_suffix("ms") {
        let num: u64 = num_str
            .trim()
            .parse()
            .with_context(|| format!("Invalid duration number: {}", num_str))?;
        return Ok(Duration::from_millis(num));
    }

    let (num_str, multiplier) = if s.ends_with('d') {
        (&s[..s.len() - 1], 24 * 60 * 60)
    } else if s.ends_with('h') {
        (&s[..s.len() - 1], 60 * 60)
    } else if s.ends_with('m') {
        (&s[..s.len() - 1], 60)
    } else if s.ends_with('s') {
        (&s[..s.len() - 1], 1)
    } else {
        // Assume seconds
        (s.as_str(), 1)
    };

    let num: u64 = num_str
        .trim()
        .parse()
        .with_context(|| format!("Invalid duration number: {}", num_str))?;
    let secs = num
        .checked_mul(multiplier)
        .with_context(|| format!("Duration out of range: {}", s))?;

    Ok(Duration::from_secs(secs))
}
