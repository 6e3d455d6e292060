// src/fixtures/catalog.rs

//! Fixture feeds, artifacts and the data expected from them

use crate::error::{Error, Result};
use url::Url;

/// Fixture repositories used as importer feeds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feed {
    /// Signed RPMs, errata, groups, categories and langpacks
    RpmSigned,
    /// Unsigned RPMs including the chimpanzee dependency tree
    RpmUnsigned,
    /// Unsigned RPMs holding the dependencies missing from `RpmWithModulesModified`
    RpmUnsignedModified,
    /// RPMs with an updateinfo carrying errata
    RpmUpdatedInfo,
    /// Modular repository with some RPM dependencies removed
    RpmWithModulesModified,
    /// Repository carrying a `productid` yum metadata file
    RpmYumMetadataFile,
    /// Unsigned RPMs whose metadata is checksummed with SHA-512
    RpmWithSha512,
    /// Delta RPMs
    DrpmUnsigned,
    /// Signed source RPMs
    SrpmSigned,
    RpmMissingPrimary,
    RpmMissingFilelists,
    RpmMissingOther,
    RpmIncompleteFilelists,
    RpmIncompleteOther,
}

impl Feed {
    /// Path below the fixtures base URL
    pub fn path(&self) -> &'static str {
        match self {
            Feed::RpmSigned => "rpm-signed/",
            Feed::RpmUnsigned => "rpm-unsigned/",
            Feed::RpmUnsignedModified => "rpm-unsigned-modified/",
            Feed::RpmUpdatedInfo => "rpm-updated-updateinfo/",
            Feed::RpmWithModulesModified => "rpm-with-modules-modified/",
            Feed::RpmYumMetadataFile => "rpm-with-yum-metadata-file/",
            Feed::RpmWithSha512 => "rpm-with-sha-512/",
            Feed::DrpmUnsigned => "drpm-unsigned/",
            Feed::SrpmSigned => "srpm-signed/",
            Feed::RpmMissingPrimary => "rpm-missing-primary/",
            Feed::RpmMissingFilelists => "rpm-missing-filelists/",
            Feed::RpmMissingOther => "rpm-missing-other/",
            Feed::RpmIncompleteFilelists => "rpm-incomplete-filelists/",
            Feed::RpmIncompleteOther => "rpm-incomplete-other/",
        }
    }
}

/// Single files served next to the feeds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Artifact {
    /// `walrus-0.71`, older than the `walrus-5.21` in `RpmUnsigned`
    RpmWithOldVersion,
    /// A signed RPM absent from `RpmUnsigned`
    RpmSigned,
    /// `bear-4.1` as served by `RpmUnsigned`
    RpmUnsigned,
}

impl Artifact {
    pub fn path(&self) -> &'static str {
        match self {
            Artifact::RpmWithOldVersion => "rpm-with-old-version/walrus-0.71-1.noarch.rpm",
            Artifact::RpmSigned => "rpm-signed/bear-4.1-1.noarch.rpm",
            Artifact::RpmUnsigned => "rpm-unsigned/bear-4.1-1.noarch.rpm",
        }
    }

    /// Last path segment
    pub fn filename(&self) -> &'static str {
        let path = self.path();
        path.rsplit('/').next().unwrap_or(path)
    }
}

/// Resolves feeds and artifacts against the configured fixtures base URL
#[derive(Debug, Clone)]
pub struct FixtureCatalog {
    base: Url,
}

impl FixtureCatalog {
    pub fn new(base: Url) -> Self {
        Self { base }
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    pub fn feed(&self, feed: Feed) -> Result<String> {
        self.join(feed.path())
    }

    pub fn artifact(&self, artifact: Artifact) -> Result<Url> {
        self.base
            .join(artifact.path())
            .map_err(|e| Error::ConfigError(format!("Invalid fixture path {}: {e}", artifact.path())))
    }

    fn join(&self, path: &str) -> Result<String> {
        self.base
            .join(path)
            .map(String::from)
            .map_err(|e| Error::ConfigError(format!("Invalid fixture path {path}: {e}")))
    }
}

/// Unit counts of a synced `RpmSigned` repository
pub const RPM_SIGNED_FEED_COUNTS: &[(&str, u64)] = &[
    ("rpm", 32),
    ("erratum", 4),
    ("package_group", 2),
    ("package_category", 1),
    ("package_langpacks", 1),
];

/// RPMs in `RpmWithSha512`
pub const RPM_SHA512_FEED_COUNT: u64 = 32;

/// Sorted filenames of every RPM the `walrus:0.71` module pulls in across
/// `RpmWithModulesModified` and `RpmUnsignedModified`; the last two live in
/// the modular repository, the first two only in the unsigned one
pub const RPM_PACKAGES_MULTIPLE_REPOS: [&str; 4] = [
    "shark-0.1-1.noarch.rpm",
    "stork-0.12-2.noarch.rpm",
    "walrus-0.71-1.noarch.rpm",
    "whale-0.2-1.noarch.rpm",
];

/// A module name and stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModuleStream {
    pub name: &'static str,
    pub stream: &'static str,
}

pub const MODULE_FIXTURES_PACKAGE_STREAM: ModuleStream = ModuleStream {
    name: "walrus",
    stream: "0.71",
};

/// An erratum of `RpmWithModulesModified` and what copying it brings along
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrataFixture {
    pub errata_id: &'static str,
    /// Sorted RPM filenames, one of which only exists in `RpmUnsignedModified`
    pub packages: &'static [&'static str],
    pub errata_count: u64,
    pub modules_count: u64,
    pub module_defaults_count: u64,
}

pub const MODULE_FIXTURES_ERRATA: ErrataFixture = ErrataFixture {
    errata_id: "RHEA-2012:0059",
    packages: &["duck-0.7-1.noarch.rpm", "kangaroo-0.3-1.noarch.rpm"],
    errata_count: 1,
    modules_count: 2,
    module_defaults_count: 1,
};
