// src/content/mod.rs

//! Repository and content unit views returned by the server
//!
//! These types deserialize only the fields the harness reasons about and keep
//! everything else in `extra`, so new server fields never break decoding.

use crate::api::repository_href;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Content unit type
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum TypeId {
    Rpm,
    Srpm,
    Drpm,
    Erratum,
    Modulemd,
    ModulemdDefaults,
    YumRepoMetadataFile,
    PackageGroup,
    PackageCategory,
    PackageEnvironment,
    PackageLangpacks,
    Distribution,
    /// Any type the harness has no name for
    Other(String),
}

impl TypeId {
    pub fn as_str(&self) -> &str {
        match self {
            TypeId::Rpm => "rpm",
            TypeId::Srpm => "srpm",
            TypeId::Drpm => "drpm",
            TypeId::Erratum => "erratum",
            TypeId::Modulemd => "modulemd",
            TypeId::ModulemdDefaults => "modulemd_defaults",
            TypeId::YumRepoMetadataFile => "yum_repo_metadata_file",
            TypeId::PackageGroup => "package_group",
            TypeId::PackageCategory => "package_category",
            TypeId::PackageEnvironment => "package_environment",
            TypeId::PackageLangpacks => "package_langpacks",
            TypeId::Distribution => "distribution",
            TypeId::Other(other) => other,
        }
    }
}

impl From<String> for TypeId {
    fn from(s: String) -> Self {
        match s.as_str() {
            "rpm" => TypeId::Rpm,
            "srpm" => TypeId::Srpm,
            "drpm" => TypeId::Drpm,
            "erratum" => TypeId::Erratum,
            "modulemd" => TypeId::Modulemd,
            "modulemd_defaults" => TypeId::ModulemdDefaults,
            "yum_repo_metadata_file" => TypeId::YumRepoMetadataFile,
            "package_group" => TypeId::PackageGroup,
            "package_category" => TypeId::PackageCategory,
            "package_environment" => TypeId::PackageEnvironment,
            "package_langpacks" => TypeId::PackageLangpacks,
            "distribution" => TypeId::Distribution,
            _ => TypeId::Other(s),
        }
    }
}

impl From<&str> for TypeId {
    fn from(s: &str) -> Self {
        TypeId::from(s.to_string())
    }
}

impl From<TypeId> for String {
    fn from(t: TypeId) -> Self {
        t.as_str().to_string()
    }
}

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A distributor attached to a repository
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Distributor {
    pub id: String,
    #[serde(default)]
    pub distributor_type_id: String,
    #[serde(default)]
    pub config: Value,
}

impl Distributor {
    /// Path the distributor publishes under, relative to the publish root
    pub fn relative_url(&self) -> Option<&str> {
        self.config.get("relative_url")?.as_str()
    }
}

/// The importer attached to a repository
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Importer {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "_href", default)]
    pub href: String,
    #[serde(default)]
    pub importer_type_id: String,
    #[serde(default)]
    pub config: Value,
}

impl Importer {
    pub fn feed(&self) -> Option<&str> {
        self.config.get("feed")?.as_str()
    }
}

/// Repository as returned by create and detail calls
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Repository {
    pub id: String,
    #[serde(rename = "_href")]
    pub href: String,
    #[serde(default)]
    pub display_name: Option<String>,
    /// Unit counts by type; absent types hold no units
    #[serde(default)]
    pub content_unit_counts: BTreeMap<String, u64>,
    #[serde(default)]
    pub distributors: Vec<Distributor>,
    #[serde(default)]
    pub importers: Vec<Importer>,
}

impl Repository {
    /// Handle to a repository known only by id, e.g. one that does not exist
    pub fn reference(id: &str) -> Self {
        Self {
            id: id.to_string(),
            href: repository_href(id),
            display_name: None,
            content_unit_counts: BTreeMap::new(),
            distributors: Vec::new(),
            importers: Vec::new(),
        }
    }

    /// Number of units of one type (0 when absent)
    pub fn unit_count(&self, type_id: &TypeId) -> u64 {
        self.content_unit_counts
            .get(type_id.as_str())
            .copied()
            .unwrap_or(0)
    }

    /// Whether the counts mention a type at all
    pub fn has_type(&self, type_id: &TypeId) -> bool {
        self.content_unit_counts.contains_key(type_id.as_str())
    }

    /// Href of a repository action, e.g. `actions/associate/`
    pub fn action_href(&self, action: &str) -> String {
        format!("{}actions/{}/", self.href, action)
    }

    /// First distributor, which every fixture repository publishes with
    pub fn primary_distributor(&self) -> Option<&Distributor> {
        self.distributors.first()
    }

    /// The repository's importer; yum repositories have exactly one
    pub fn importer(&self) -> Option<&Importer> {
        self.importers.first()
    }
}

/// Metadata of a content unit
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UnitMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub epoch: Option<String>,
    /// RPM version, or the integer build version of a module
    #[serde(
        default,
        deserialize_with = "string_or_number",
        skip_serializing_if = "Option::is_none"
    )]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    /// Module stream
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<String>,
    /// Errata id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Type of a yum metadata file (e.g., `productid`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_type: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(serde::de::Error::custom(format!(
            "expected a string or number, found {other}"
        ))),
    }
}

/// A unit returned by unit search
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentUnit {
    pub unit_type_id: TypeId,
    #[serde(default)]
    pub metadata: UnitMetadata,
}

impl ContentUnit {
    pub fn name(&self) -> Option<&str> {
        self.metadata.name.as_deref()
    }

    pub fn version(&self) -> Option<&str> {
        self.metadata.version.as_deref()
    }

    pub fn filename(&self) -> Option<&str> {
        self.metadata.filename.as_deref()
    }
}
