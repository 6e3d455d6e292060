// src/copy.rs

//! Copy (associate) and removal of units between repositories
//!
//! A copy names a source repository, criteria selecting units there, and an
//! [`OverrideConfig`] deciding whether dependencies are resolved and which
//! versions win. The server performs the copy asynchronously; these helpers
//! block until every spawned task is terminal.

use crate::api::{ApiClient, Task, TaskPoller, ORPHANS_PATH};
use crate::config::PollPolicy;
use crate::content::{Repository, TypeId};
use crate::error::Result;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use tracing::info;

/// Filter over unit metadata fields, in the server's Mongo-like syntax
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct UnitFilter(Value);

impl UnitFilter {
    /// `field == value`
    pub fn eq(field: &str, value: impl Into<Value>) -> Self {
        let mut map = Map::new();
        map.insert(field.to_string(), value.into());
        UnitFilter(Value::Object(map))
    }

    /// Every `field == value` pair must hold
    pub fn fields<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        let map: Map<String, Value> = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        UnitFilter(Value::Object(map))
    }

    /// `field` is one of `values`
    pub fn one_of<V: Into<Value>>(field: &str, values: impl IntoIterator<Item = V>) -> Self {
        let values: Vec<Value> = values.into_iter().map(Into::into).collect();
        Self::eq(field, json!({ "$in": values }))
    }

    pub fn and(filters: Vec<UnitFilter>) -> Self {
        UnitFilter(json!({ "$and": filters }))
    }
}

/// Filter section of criteria
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Filters {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<UnitFilter>,
}

/// Selects the units an operation targets
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Criteria {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filters: Option<Filters>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub type_ids: Vec<TypeId>,
}

impl Criteria {
    /// Every unit, whatever its type
    pub fn all() -> Self {
        Self {
            filters: Some(Filters::default()),
            type_ids: Vec::new(),
        }
    }

    /// Every unit of the given types
    pub fn types<I: IntoIterator<Item = TypeId>>(type_ids: I) -> Self {
        Self {
            filters: Some(Filters::default()),
            type_ids: type_ids.into_iter().collect(),
        }
    }

    /// Type-only criteria as unit search expects them (no filter section)
    pub fn search<I: IntoIterator<Item = TypeId>>(type_ids: I) -> Self {
        Self {
            filters: None,
            type_ids: type_ids.into_iter().collect(),
        }
    }

    /// Narrow to units whose metadata matches `filter`
    pub fn with_unit_filter(mut self, filter: UnitFilter) -> Self {
        self.filters = Some(Filters { unit: Some(filter) });
        self
    }
}

/// How a copy treats dependencies
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OverrideConfig {
    /// Also copy transitive dependencies
    pub recursive: bool,
    /// Resolve dependencies, preferring versions already in the destination
    pub recursive_conservative: bool,
    /// Extra source repository → destination for units resolved from it
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub additional_repos: BTreeMap<String, String>,
}

impl OverrideConfig {
    pub fn new(recursive: bool, recursive_conservative: bool) -> Self {
        Self {
            recursive,
            recursive_conservative,
            additional_repos: BTreeMap::new(),
        }
    }

    pub fn recursive() -> Self {
        Self::new(true, false)
    }

    pub fn conservative() -> Self {
        Self::new(false, true)
    }

    /// Consult `source` during resolution, copying what it provides into `destination`
    pub fn with_additional_repo(
        mut self,
        source: impl Into<String>,
        destination: impl Into<String>,
    ) -> Self {
        self.additional_repos.insert(source.into(), destination.into());
        self
    }

    /// Whether the server will resolve dependencies at all
    pub fn resolves_dependencies(&self) -> bool {
        self.recursive || self.recursive_conservative
    }
}

/// Body of the associate action
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CopyRequest {
    pub source_repo_id: String,
    pub override_config: OverrideConfig,
    pub criteria: Criteria,
}

impl CopyRequest {
    pub fn new(source_repo_id: impl Into<String>, criteria: Criteria) -> Self {
        Self {
            source_repo_id: source_repo_id.into(),
            override_config: OverrideConfig::default(),
            criteria,
        }
    }

    pub fn with_override(mut self, override_config: OverrideConfig) -> Self {
        self.override_config = override_config;
        self
    }
}

#[derive(Serialize)]
struct UnassociateBody<'a> {
    criteria: &'a Criteria,
}

/// Copy units into `destination` and wait for the copy to finish
pub fn copy_units(
    client: &ApiClient,
    poll: PollPolicy,
    destination: &Repository,
    request: &CopyRequest,
) -> Result<Vec<Task>> {
    info!(
        "Copying {:?} from {} to {} (recursive={}, conservative={}, additional={})",
        request.criteria.type_ids,
        request.source_repo_id,
        destination.id,
        request.override_config.recursive,
        request.override_config.recursive_conservative,
        request.override_config.additional_repos.len()
    );
    let report = client.post_action(&destination.action_href("associate"), request)?;
    TaskPoller::new(client, poll).wait_all(&report)
}

/// Remove units matching `criteria` from `repo`
pub fn unassociate_units(
    client: &ApiClient,
    poll: PollPolicy,
    repo: &Repository,
    criteria: &Criteria,
) -> Result<Vec<Task>> {
    info!("Removing {:?} units from {}", criteria.type_ids, repo.id);
    let report =
        client.post_action(&repo.action_href("unassociate"), &UnassociateBody { criteria })?;
    TaskPoller::new(client, poll).wait_all(&report)
}

/// Purge units no repository references
pub fn delete_orphans(client: &ApiClient, poll: PollPolicy) -> Result<Vec<Task>> {
    info!("Deleting orphaned content units");
    let report = client.delete(ORPHANS_PATH)?;
    TaskPoller::new(client, poll).wait_all(&report)
}
