// src/fixtures/mod.rs

//! Request bodies for repositories and distributors, and the fixture catalog
//!
//! `gen_repo()` and `gen_distributor()` produce bodies with unique ids and
//! yum defaults; builder methods override individual fields.

mod catalog;

pub use catalog::{
    Artifact, ErrataFixture, Feed, FixtureCatalog, ModuleStream, MODULE_FIXTURES_ERRATA,
    MODULE_FIXTURES_PACKAGE_STREAM, RPM_PACKAGES_MULTIPLE_REPOS, RPM_SHA512_FEED_COUNT,
    RPM_SIGNED_FEED_COUNTS,
};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Importer download policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadPolicy {
    Immediate,
    Background,
    OnDemand,
}

/// Importer configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImporterConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feed: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_policy: Option<DownloadPolicy>,
    /// Verify the feed's TLS certificate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssl_validation: Option<bool>,
}

impl ImporterConfig {
    /// Config that only changes the feed
    pub fn feed(feed: impl Into<String>) -> Self {
        Self {
            feed: Some(feed.into()),
            ..Self::default()
        }
    }
}

/// Yum distributor configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributorConfig {
    pub http: bool,
    pub https: bool,
    pub relative_url: String,
}

/// Distributor entry of a repository create body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributorBody {
    pub distributor_id: String,
    pub distributor_type_id: String,
    pub auto_publish: bool,
    pub distributor_config: DistributorConfig,
}

impl DistributorBody {
    /// Publish after every successful sync
    pub fn with_auto_publish(mut self) -> Self {
        self.auto_publish = true;
        self
    }
}

/// Repository create body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepositoryBody {
    pub id: String,
    pub importer_type_id: String,
    pub importer_config: ImporterConfig,
    #[serde(default)]
    pub distributors: Vec<DistributorBody>,
    #[serde(default)]
    pub notes: BTreeMap<String, String>,
}

impl RepositoryBody {
    pub fn with_feed(mut self, feed: impl Into<String>) -> Self {
        self.importer_config.feed = Some(feed.into());
        self
    }

    pub fn with_download_policy(mut self, policy: DownloadPolicy) -> Self {
        self.importer_config.download_policy = Some(policy);
        self
    }

    pub fn with_ssl_validation(mut self, validate: bool) -> Self {
        self.importer_config.ssl_validation = Some(validate);
        self
    }

    pub fn with_distributor(mut self, distributor: DistributorBody) -> Self {
        self.distributors.push(distributor);
        self
    }
}

fn unique_id() -> String {
    Uuid::new_v4().to_string()
}

/// Body for a yum repository with a unique id and no feed
pub fn gen_repo() -> RepositoryBody {
    let mut notes = BTreeMap::new();
    notes.insert("_repo-type".to_string(), "rpm-repo".to_string());
    RepositoryBody {
        id: unique_id(),
        importer_type_id: "yum_importer".to_string(),
        importer_config: ImporterConfig::default(),
        distributors: Vec::new(),
        notes,
    }
}

/// Yum distributor publishing over https under a unique relative URL
pub fn gen_distributor() -> DistributorBody {
    let id = unique_id();
    DistributorBody {
        distributor_id: id.clone(),
        distributor_type_id: "yum_distributor".to_string(),
        auto_publish: false,
        distributor_config: DistributorConfig {
            http: false,
            https: true,
            relative_url: format!("{id}/"),
        },
    }
}
