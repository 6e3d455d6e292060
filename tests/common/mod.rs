// tests/common/mod.rs

//! Shared test utilities
//!
//! `StubServer` is an in-process content server speaking the subset of the
//! v2 REST API the harness drives: repositories, actions, unit search,
//! uploads, orphans, tasks and status. It also serves the fixture feeds'
//! artifacts and published repomd files. Feeds are modelled in memory.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::net::TcpListener as StdTcpListener;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use repocopy::harness::ScenarioReport;
use repocopy::{scenarios, ApiClient, HarnessConfig, Outcome, RpmVersion, Runner};
use serde_json::{json, Value};
use tokio::sync::oneshot;

const API: &str = "/pulp/api/v2";

/// Knobs for the stub's behaviour
#[derive(Debug, Clone)]
pub struct StubOptions {
    /// Reported as `versions.platform_version`
    pub server_version: String,
    /// Polls answered with `running` before a task reports its outcome
    pub running_polls: u32,
    /// Tasks never leave `running`
    pub stuck_tasks: bool,
    /// Copies treat `recursive_conservative` as absent
    pub ignore_conservative: bool,
    /// Units resolved from `additional_repos` land in the main destination
    pub ignore_additional_destinations: bool,
    /// Copies replace the destination's content instead of adding to it
    pub drop_existing_units: bool,
    /// Deleting an upload request answers 500
    pub failing_upload_delete: bool,
}

impl Default for StubOptions {
    fn default() -> Self {
        Self {
            server_version: "2.21.0".to_string(),
            running_polls: 1,
            stuck_tasks: false,
            ignore_conservative: false,
            ignore_additional_destinations: false,
            drop_existing_units: false,
            failing_upload_delete: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Units and feeds
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum Dep {
    /// RPM requirement by package name
    Requires(String),
    /// Exact RPM filename (module artifacts, erratum package lists)
    Filename(String),
    /// Module name and stream
    Module(String, String),
}

#[derive(Debug, Clone)]
struct Unit {
    type_id: String,
    metadata: Value,
    deps: Vec<Dep>,
}

impl Unit {
    fn field(&self, key: &str) -> Option<&str> {
        self.metadata.get(key)?.as_str()
    }

    fn id(&self) -> String {
        let key = match self.type_id.as_str() {
            "rpm" | "srpm" | "drpm" => self.field("filename").unwrap_or_default().to_string(),
            "modulemd" | "modulemd_defaults" => format!(
                "{}:{}",
                self.field("name").unwrap_or_default(),
                self.field("stream").unwrap_or_default()
            ),
            "erratum" | "package_group" | "package_category" => {
                self.field("id").unwrap_or_default().to_string()
            }
            "yum_repo_metadata_file" => self.field("data_type").unwrap_or_default().to_string(),
            _ => self.metadata.to_string(),
        };
        format!("{}:{}", self.type_id, key)
    }

    fn evr(&self) -> Option<RpmVersion> {
        RpmVersion::from_parts(
            self.field("epoch"),
            self.field("version")?,
            self.field("release"),
        )
        .ok()
    }

    fn to_json(&self) -> Value {
        json!({
            "unit_type_id": self.type_id,
            "unit_id": self.id(),
            "metadata": self.metadata,
        })
    }
}

fn rpm(name: &str, version: &str, release: &str, requires: &[&str]) -> Unit {
    Unit {
        type_id: "rpm".to_string(),
        metadata: json!({
            "name": name,
            "epoch": "0",
            "version": version,
            "release": release,
            "arch": "noarch",
            "filename": format!("{name}-{version}-{release}.noarch.rpm"),
        }),
        deps: requires.iter().map(|r| Dep::Requires(r.to_string())).collect(),
    }
}

fn srpm(name: &str, version: &str) -> Unit {
    Unit {
        type_id: "srpm".to_string(),
        metadata: json!({
            "name": name,
            "epoch": "0",
            "version": version,
            "release": "1",
            "arch": "src",
            "filename": format!("{name}-{version}-1.src.rpm"),
        }),
        deps: Vec::new(),
    }
}

fn drpm(name: &str, old: &str, new: &str) -> Unit {
    plain(
        "drpm",
        json!({
            "name": name,
            "epoch": "0",
            "version": new,
            "release": "1",
            "oldversion": old,
            "filename": format!("drpms/{name}-{old}-1_{new}-1.noarch.drpm"),
        }),
    )
}

fn module(name: &str, stream: &str, artifacts: &[&str]) -> Unit {
    Unit {
        type_id: "modulemd".to_string(),
        metadata: json!({
            "name": name,
            "stream": stream,
            "version": 20180730223407u64,
            "context": "deadbeef",
            "arch": "noarch",
        }),
        deps: artifacts.iter().map(|a| Dep::Filename(a.to_string())).collect(),
    }
}

fn module_defaults(name: &str, stream: &str) -> Unit {
    Unit {
        type_id: "modulemd_defaults".to_string(),
        metadata: json!({"name": name, "stream": stream, "profiles": {}}),
        deps: Vec::new(),
    }
}

fn erratum(id: &str, packages: &[&str], modules: &[(&str, &str)]) -> Unit {
    let mut deps: Vec<Dep> = packages.iter().map(|p| Dep::Filename(p.to_string())).collect();
    deps.extend(
        modules
            .iter()
            .map(|(name, stream)| Dep::Module(name.to_string(), stream.to_string())),
    );
    Unit {
        type_id: "erratum".to_string(),
        metadata: json!({"id": id, "title": format!("Enhancement {id}"), "type": "enhancement"}),
        deps,
    }
}

fn plain(type_id: &str, metadata: Value) -> Unit {
    Unit {
        type_id: type_id.to_string(),
        metadata,
        deps: Vec::new(),
    }
}

const SIGNED_RPMS: [&str; 32] = [
    "bear", "camel", "cat", "cheetah", "chimpanzee", "cockateel", "cow", "crow", "dog",
    "dolphin", "duck", "elephant", "fox", "frog", "giraffe", "gorilla", "horse", "kangaroo",
    "lion", "monkey", "mouse", "penguin", "pike", "shark", "squirrel", "stork", "tiger",
    "trout", "walrus", "whale", "wolf", "zebra",
];

const INVALID_SCHEME: &str = "Invalid feed URL: scheme must be http, https or file";

/// Units behind a feed URL, or the description of the sync failure
fn feed_units(feed: &str) -> Result<Vec<Unit>, String> {
    if !["http://", "https://", "file://"]
        .iter()
        .any(|scheme| feed.starts_with(scheme))
    {
        return Err(INVALID_SCHEME.to_string());
    }
    let name = feed.trim_end_matches('/').rsplit('/').next().unwrap_or_default();
    let units = match name {
        "rpm-unsigned" => vec![
            rpm("bear", "4.1", "1", &[]),
            rpm("camel", "0.1", "1", &[]),
            rpm("cat", "1.0", "1", &[]),
            rpm("cheetah", "0.3", "1", &[]),
            rpm("chimpanzee", "0.21", "1", &["squirrel", "walrus"]),
            rpm("elephant", "8.3", "1", &[]),
            rpm("fox", "1.1", "1", &[]),
            rpm("squirrel", "0.1", "1", &["camel", "fox"]),
            rpm("walrus", "5.21", "1", &[]),
        ],
        "rpm-signed" => {
            let mut units: Vec<Unit> = SIGNED_RPMS
                .iter()
                .map(|name| {
                    let version = if *name == "bear" { "4.1" } else { "1.0" };
                    rpm(name, version, "1", &[])
                })
                .collect();
            for n in 1..=4 {
                units.push(erratum(&format!("RHEA-2012:000{n}"), &["bear-4.1-1.noarch.rpm"], &[]));
            }
            units.push(plain("package_group", json!({"id": "mammal"})));
            units.push(plain("package_group", json!({"id": "bird"})));
            units.push(plain("package_category", json!({"id": "all"})));
            units.push(plain(
                "package_langpacks",
                json!({"matches": [{"install": "%s-langpack-%s", "name": "walrus"}]}),
            ));
            units
        }
        "rpm-with-sha-512" => SIGNED_RPMS
            .iter()
            .map(|name| {
                let version = if *name == "bear" { "4.1" } else { "1.0" };
                rpm(name, version, "1", &[])
            })
            .collect(),
        "drpm-unsigned" => vec![
            rpm("walrus", "0.71", "1", &[]),
            rpm("walrus", "5.21", "1", &[]),
            drpm("walrus", "0.71", "5.21"),
        ],
        "srpm-signed" => vec![srpm("bear", "4.1"), srpm("camel", "0.1"), srpm("walrus", "5.21")],
        "rpm-updated-updateinfo" => vec![
            rpm("bear", "4.1", "1", &[]),
            rpm("camel", "0.1", "1", &[]),
            rpm("cat", "1.0", "1", &[]),
            erratum("RHEA-2012:0055", &["bear-4.1-1.noarch.rpm"], &[]),
            erratum(
                "RHEA-2012:0056",
                &["camel-0.1-1.noarch.rpm", "cat-1.0-1.noarch.rpm"],
                &[],
            ),
        ],
        "rpm-with-yum-metadata-file" => vec![
            rpm("bear", "4.1", "1", &[]),
            plain("yum_repo_metadata_file", json!({"data_type": "productid"})),
        ],
        "rpm-with-modules-modified" => vec![
            rpm("walrus", "0.71", "1", &["whale"]),
            rpm("whale", "0.2", "1", &["shark", "stork"]),
            rpm("duck", "0.7", "1", &[]),
            module("walrus", "0.71", &["walrus-0.71-1.noarch.rpm"]),
            module("duck", "0", &["duck-0.7-1.noarch.rpm"]),
            module("kangaroo", "0", &["kangaroo-0.3-1.noarch.rpm"]),
            module_defaults("walrus", "0.71"),
            module_defaults("duck", "0"),
            erratum(
                "RHEA-2012:0059",
                &["duck-0.7-1.noarch.rpm", "kangaroo-0.3-1.noarch.rpm"],
                &[("duck", "0"), ("kangaroo", "0")],
            ),
        ],
        "rpm-unsigned-modified" => vec![
            rpm("shark", "0.1", "1", &[]),
            rpm("stork", "0.12", "2", &[]),
            rpm("kangaroo", "0.3", "1", &[]),
            rpm("penguin", "0.9", "1", &[]),
        ],
        "rpm-missing-primary" | "rpm-missing-filelists" | "rpm-missing-other" => {
            let kind = name.trim_start_matches("rpm-missing-");
            return Err(format!("Error retrieving metadata: {kind} not found"));
        }
        "rpm-incomplete-filelists" | "rpm-incomplete-other" => {
            let kind = name.trim_start_matches("rpm-incomplete-");
            return Err(format!("Error parsing metadata: {kind} is truncated"));
        }
        _ => return Err(format!("Error retrieving metadata: repomd.xml not found at {feed}")),
    };
    Ok(units)
}

/// Checksum type a feed's metadata uses, kept by publishes of what it synced
fn feed_checksum_type(feed: &str) -> &'static str {
    if feed.contains("sha-512") {
        "sha512"
    } else {
        "sha256"
    }
}

/// Uploadable artifacts, encoded as unit descriptors
fn fixture_artifact(path: &str) -> Option<Unit> {
    match path {
        "rpm-with-old-version/walrus-0.71-1.noarch.rpm" => Some(rpm("walrus", "0.71", "1", &[])),
        "rpm-signed/bear-4.1-1.noarch.rpm" | "rpm-unsigned/bear-4.1-1.noarch.rpm" => {
            Some(rpm("bear", "4.1", "1", &[]))
        }
        _ => None,
    }
}

fn encode_artifact(unit: &Unit) -> Vec<u8> {
    serde_json::to_vec(&json!({"unit_type_id": unit.type_id, "metadata": unit.metadata}))
        .unwrap_or_default()
}

fn decode_artifact(bytes: &[u8]) -> Option<Unit> {
    let value: Value = serde_json::from_slice(bytes).ok()?;
    Some(plain(value["unit_type_id"].as_str()?, value["metadata"].clone()))
}

/// Minimal Mongo-style filter matching: equality, `$in`, `$and`, `$or`
fn matches_filter(metadata: &Value, filter: &Value) -> bool {
    let Some(filter) = filter.as_object() else {
        return true;
    };
    filter.iter().all(|(key, expected)| match key.as_str() {
        "$and" => expected
            .as_array()
            .is_some_and(|all| all.iter().all(|f| matches_filter(metadata, f))),
        "$or" => expected
            .as_array()
            .is_some_and(|any| any.iter().any(|f| matches_filter(metadata, f))),
        field => match expected.get("$in").and_then(Value::as_array) {
            Some(options) => options.contains(&metadata[field]),
            None => metadata.get(field) == Some(expected),
        },
    })
}

fn matches_criteria(unit: &Unit, criteria: &Value) -> bool {
    if let Some(types) = criteria["type_ids"].as_array() {
        if !types.is_empty() && !types.iter().any(|t| t.as_str() == Some(unit.type_id.as_str())) {
            return false;
        }
    }
    matches_filter(&unit.metadata, &criteria["filters"]["unit"])
}

fn repomd_xml(data_types: &[String], checksum_type: &str) -> String {
    let mut xml = String::from(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
         <repomd xmlns=\"http://linux.duke.edu/metadata/repo\" \
         xmlns:rpm=\"http://linux.duke.edu/metadata/rpm\">\n  <revision>1</revision>\n",
    );
    for data_type in data_types {
        xml.push_str(&format!(
            "  <data type=\"{data_type}\">\n    <checksum type=\"{checksum_type}\">0a1b2c</checksum>\n    \
             <location href=\"repodata/{data_type}.xml.gz\"/>\n  </data>\n"
        ));
    }
    xml.push_str("</repomd>\n");
    xml
}

// ---------------------------------------------------------------------------
// Server state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct StubRepo {
    id: String,
    importer_config: Value,
    distributors: Vec<Value>,
    notes: Value,
    units: BTreeSet<String>,
    checksum_type: String,
}

/// What a distributor published: the repomd and the units behind it
#[derive(Debug, Clone)]
struct Published {
    repomd: String,
    units: Vec<String>,
}

#[derive(Debug)]
struct StubTask {
    body: Value,
    polls_left: u32,
}

#[derive(Debug, Default)]
struct StubState {
    options: StubOptions,
    repos: BTreeMap<String, StubRepo>,
    units: HashMap<String, Unit>,
    tasks: HashMap<String, StubTask>,
    uploads: HashMap<String, Vec<u8>>,
    published: HashMap<String, Published>,
    deleted_repos: Vec<String>,
    next_id: u64,
}

type Shared = Arc<Mutex<StubState>>;

type Failure = (StatusCode, String);

fn not_found(what: impl Into<String>) -> Failure {
    (StatusCode::NOT_FOUND, what.into())
}

fn failure_response((status, message): Failure) -> Response {
    (
        status,
        Json(json!({"http_status": status.as_u16(), "error_message": message})),
    )
        .into_response()
}

fn reply(result: Result<(StatusCode, Value), Failure>) -> Response {
    match result {
        Ok((status, body)) => (status, Json(body)).into_response(),
        Err(failure) => failure_response(failure),
    }
}

impl StubState {
    fn next(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}-{}", self.next_id)
    }

    /// Record a task and return the call report that spawned it
    fn spawn(&mut self, mut body: Value) -> Value {
        let task_id = self.next("task");
        let href = format!("{API}/tasks/{task_id}/");
        body["task_id"] = json!(task_id);
        body["_href"] = json!(href);
        body["spawned_tasks"] = json!([]);
        let polls_left = self.options.running_polls;
        self.tasks.insert(task_id.clone(), StubTask { body, polls_left });
        json!({
            "result": null,
            "error": null,
            "spawned_tasks": [{"_href": href, "task_id": task_id}],
        })
    }

    fn finished(&mut self, result: Value, progress_report: Value) -> Value {
        self.spawn(json!({
            "state": "finished",
            "error": null,
            "traceback": null,
            "result": result,
            "progress_report": progress_report,
        }))
    }

    fn failed(&mut self, description: &str) -> Value {
        self.spawn(json!({
            "state": "error",
            "error": {"code": "PLP0000", "description": description, "data": {}},
            "traceback": format!(
                "Traceback (most recent call last):\n  File \"sync.py\", line 1, in run\n{description}"
            ),
            "result": null,
            "progress_report": {
                "yum_importer": {"content": {"state": "NOT_STARTED", "error_details": []}}
            },
        }))
    }

    fn repo(&self, id: &str) -> Result<&StubRepo, Failure> {
        self.repos
            .get(id)
            .ok_or_else(|| not_found(format!("Missing resource(s): repository={id}")))
    }

    fn counts(&self, repo: &StubRepo) -> BTreeMap<String, u64> {
        let mut counts = BTreeMap::new();
        for unit in repo.units.iter().filter_map(|id| self.units.get(id)) {
            *counts.entry(unit.type_id.clone()).or_insert(0) += 1;
        }
        counts
    }

    fn repo_json(&self, repo: &StubRepo) -> Value {
        json!({
            "id": repo.id,
            "_href": format!("{API}/repositories/{}/", repo.id),
            "display_name": repo.id,
            "notes": repo.notes,
            "content_unit_counts": self.counts(repo),
            "distributors": repo.distributors,
            "importers": [{
                "id": "yum_importer",
                "_href": format!("{API}/repositories/{}/importers/yum_importer/", repo.id),
                "importer_type_id": "yum_importer",
                "config": repo.importer_config,
            }],
        })
    }

    fn create_repo(&mut self, body: &Value) -> Result<(StatusCode, Value), Failure> {
        let id = body["id"]
            .as_str()
            .ok_or((StatusCode::BAD_REQUEST, "id is required".to_string()))?
            .to_string();
        if self.repos.contains_key(&id) {
            return Err((StatusCode::CONFLICT, format!("Duplicate resource: {id}")));
        }
        let distributors = body["distributors"]
            .as_array()
            .map(|list| {
                list.iter()
                    .map(|d| {
                        json!({
                            "id": d["distributor_id"],
                            "distributor_type_id": d["distributor_type_id"],
                            "auto_publish": d["auto_publish"],
                            "config": d["distributor_config"],
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        let repo = StubRepo {
            id: id.clone(),
            importer_config: body["importer_config"].clone(),
            distributors,
            notes: body["notes"].clone(),
            units: BTreeSet::new(),
            checksum_type: "sha256".to_string(),
        };
        let view = self.repo_json(&repo);
        self.repos.insert(id, repo);
        Ok((StatusCode::CREATED, view))
    }

    fn delete_repo(&mut self, id: &str) -> Result<(StatusCode, Value), Failure> {
        if self.repos.remove(id).is_none() {
            return Err(not_found(format!("Missing resource(s): repository={id}")));
        }
        self.deleted_repos.push(id.to_string());
        Ok((StatusCode::ACCEPTED, self.finished(Value::Null, json!({}))))
    }

    fn sync(&mut self, id: &str) -> Result<(StatusCode, Value), Failure> {
        let feed = self.repo(id)?.importer_config["feed"]
            .as_str()
            .map(str::to_string);
        let Some(feed) = feed else {
            return Ok((StatusCode::ACCEPTED, self.failed("Repository has no feed")));
        };
        let units = match self.feed_contents(&feed) {
            Ok(units) => units,
            Err(description) => return Ok((StatusCode::ACCEPTED, self.failed(&description))),
        };
        let mut added = 0u64;
        for unit in units {
            let unit_id = unit.id();
            self.units.entry(unit_id.clone()).or_insert(unit);
            if let Some(repo) = self.repos.get_mut(id) {
                if repo.units.insert(unit_id) {
                    added += 1;
                }
            }
        }
        let auto_publish: Vec<String> = match self.repos.get_mut(id) {
            Some(repo) => {
                repo.checksum_type = feed_checksum_type(&feed).to_string();
                repo.distributors
                    .iter()
                    .filter(|d| d["auto_publish"].as_bool() == Some(true))
                    .filter_map(|d| d["id"].as_str().map(str::to_string))
                    .collect()
            }
            None => Vec::new(),
        };
        for distributor_id in auto_publish {
            self.publish_content(id, &distributor_id)?;
        }
        let report = self.finished(
            json!({"added_count": added, "removed_count": 0, "updated_count": 0}),
            json!({
                "yum_importer": {
                    "metadata": {"state": "FINISHED"},
                    "content": {"state": "FINISHED", "error_details": []}
                }
            }),
        );
        Ok((StatusCode::ACCEPTED, report))
    }

    /// Units behind a feed; feeds below `/pulp/repos/` read published content
    fn feed_contents(&self, feed: &str) -> Result<Vec<Unit>, String> {
        let Some((_, relative_url)) = feed.split_once("/pulp/repos/") else {
            return feed_units(feed);
        };
        let published = self
            .published
            .get(relative_url.trim_matches('/'))
            .ok_or_else(|| format!("Error retrieving metadata: repomd.xml not found at {feed}"))?;
        Ok(published
            .units
            .iter()
            .filter_map(|id| self.units.get(id).cloned())
            .collect())
    }

    fn publish(&mut self, id: &str, body: &Value) -> Result<(StatusCode, Value), Failure> {
        let distributor_id = body["id"].as_str().unwrap_or_default();
        self.publish_content(id, distributor_id)?;
        Ok((StatusCode::ACCEPTED, self.finished(Value::Null, json!({}))))
    }

    fn publish_content(&mut self, id: &str, distributor_id: &str) -> Result<(), Failure> {
        let repo = self.repo(id)?;
        let distributor = repo
            .distributors
            .iter()
            .find(|d| d["id"].as_str() == Some(distributor_id))
            .ok_or_else(|| not_found(format!("Missing resource(s): distributor={distributor_id}")))?;
        let relative_url = distributor["config"]["relative_url"]
            .as_str()
            .unwrap_or(id)
            .trim_matches('/')
            .to_string();

        let mut data_types: Vec<String> =
            ["primary", "filelists", "other"].map(String::from).to_vec();
        let units: Vec<&Unit> = repo.units.iter().filter_map(|u| self.units.get(u)).collect();
        let has = |type_id: &str| units.iter().any(|u| u.type_id == type_id);
        if has("erratum") {
            data_types.push("updateinfo".to_string());
        }
        if has("package_group") {
            data_types.push("group".to_string());
        }
        if has("modulemd") {
            data_types.push("modules".to_string());
        }
        data_types.extend(
            units
                .iter()
                .filter(|u| u.type_id == "yum_repo_metadata_file")
                .filter_map(|u| u.field("data_type").map(str::to_string)),
        );

        let published = Published {
            repomd: repomd_xml(&data_types, &repo.checksum_type),
            units: repo.units.iter().cloned().collect(),
        };
        self.published.insert(relative_url, published);
        Ok(())
    }

    fn update_importer(&mut self, id: &str, body: &Value) -> Result<(StatusCode, Value), Failure> {
        self.repo(id)?;
        let changes = body["importer_config"]
            .as_object()
            .cloned()
            .ok_or((StatusCode::BAD_REQUEST, "importer_config is required".to_string()))?;
        if let Some(repo) = self.repos.get_mut(id) {
            if !repo.importer_config.is_object() {
                repo.importer_config = json!({});
            }
            for (key, value) in changes {
                repo.importer_config[key.as_str()] = value;
            }
        }
        Ok((StatusCode::ACCEPTED, self.finished(Value::Null, json!({}))))
    }

    /// Bytes of a published package, by path below the publish root
    fn published_package(&self, path: &str) -> Option<Vec<u8>> {
        let (relative_url, rest) = path.split_once("/Packages/")?;
        let filename = rest.rsplit('/').next()?;
        self.published
            .get(relative_url.trim_matches('/'))?
            .units
            .iter()
            .filter_map(|id| self.units.get(id))
            .find(|u| u.field("filename") == Some(filename))
            .map(encode_artifact)
    }

    fn matching_units(&self, repo: &StubRepo, criteria: &Value) -> Vec<String> {
        repo.units
            .iter()
            .filter(|id| {
                self.units
                    .get(*id)
                    .is_some_and(|unit| matches_criteria(unit, criteria))
            })
            .cloned()
            .collect()
    }

    /// First unit satisfying `pred`, searching sources in order
    fn find_in_sources(
        &self,
        sources: &[(String, String)],
        pred: impl Fn(&Unit) -> bool,
    ) -> Option<(String, String)> {
        sources.iter().find_map(|(src, dst)| {
            let repo = self.repos.get(src)?;
            repo.units
                .iter()
                .find(|id| self.units.get(*id).is_some_and(&pred))
                .map(|id| (dst.clone(), id.clone()))
        })
    }

    /// Highest version of an RPM, from the first source carrying it
    fn find_highest_rpm(&self, sources: &[(String, String)], name: &str) -> Option<(String, String)> {
        sources.iter().find_map(|(src, dst)| {
            let repo = self.repos.get(src)?;
            repo.units
                .iter()
                .filter_map(|id| self.units.get(id))
                .filter(|u| u.type_id == "rpm" && u.field("name") == Some(name))
                .max_by(|a, b| a.evr().cmp(&b.evr()))
                .map(|u| (dst.clone(), u.id()))
        })
    }

    /// Whether any destination already holds (or is about to hold) an RPM
    fn destinations_hold(
        &self,
        sources: &[(String, String)],
        plan: &[(String, String)],
        name: &str,
    ) -> bool {
        let is_named = |id: &String| {
            self.units
                .get(id)
                .is_some_and(|u| u.type_id == "rpm" && u.field("name") == Some(name))
        };
        let held = sources
            .iter()
            .filter_map(|(_, dst)| self.repos.get(dst))
            .any(|repo| repo.units.iter().any(is_named));
        held || plan.iter().any(|(_, id)| is_named(id))
    }

    fn associate(&mut self, destination: &str, body: &Value) -> Result<(StatusCode, Value), Failure> {
        self.repo(destination)?;
        let source_id = body["source_repo_id"].as_str().unwrap_or_default();
        let source = self.repo(source_id)?;

        let config = &body["override_config"];
        let conservative = !self.options.ignore_conservative
            && config["recursive_conservative"].as_bool().unwrap_or(false);
        let recursive = conservative || config["recursive"].as_bool().unwrap_or(false);

        let mut sources = vec![(source_id.to_string(), destination.to_string())];
        if let Some(extra) = config["additional_repos"].as_object() {
            for (src, dst) in extra {
                let dst = dst.as_str().unwrap_or_default();
                self.repo(src)?;
                self.repo(dst)?;
                let dst = if self.options.ignore_additional_destinations {
                    destination
                } else {
                    dst
                };
                sources.push((src.clone(), dst.to_string()));
            }
        }

        let mut queue: VecDeque<(String, String)> = self
            .matching_units(source, &body["criteria"])
            .into_iter()
            .map(|id| (destination.to_string(), id))
            .collect();
        let mut seen = HashSet::new();
        let mut plan: Vec<(String, String)> = Vec::new();

        while let Some((dst, unit_id)) = queue.pop_front() {
            if !seen.insert(unit_id.clone()) {
                continue;
            }
            let Some(unit) = self.units.get(&unit_id).cloned() else {
                continue;
            };
            plan.push((dst, unit_id));

            if unit.type_id == "modulemd" {
                let name = unit.field("name");
                if let Some(found) = self.find_in_sources(&sources, |u| {
                    u.type_id == "modulemd_defaults" && u.field("name") == name
                }) {
                    queue.push_back(found);
                }
            }
            if !recursive {
                continue;
            }
            for dep in &unit.deps {
                let found = match dep {
                    Dep::Requires(name) => {
                        if conservative && self.destinations_hold(&sources, &plan, name) {
                            continue;
                        }
                        self.find_highest_rpm(&sources, name)
                    }
                    Dep::Filename(filename) => self.find_in_sources(&sources, |u| {
                        u.field("filename") == Some(filename.as_str())
                    }),
                    Dep::Module(name, stream) => self.find_in_sources(&sources, |u| {
                        u.type_id == "modulemd"
                            && u.field("name") == Some(name.as_str())
                            && u.field("stream") == Some(stream.as_str())
                    }),
                };
                if let Some(found) = found {
                    queue.push_back(found);
                }
            }
        }

        if self.options.drop_existing_units {
            for (dst, _) in &sources {
                if let Some(repo) = self.repos.get_mut(dst) {
                    repo.units.clear();
                }
            }
        }
        let mut copied = Vec::new();
        for (dst, unit_id) in plan {
            if let Some(repo) = self.repos.get_mut(&dst) {
                if repo.units.insert(unit_id.clone()) {
                    copied.push(unit_id);
                }
            }
        }
        let report = self.finished(json!({"units_successful": copied}), json!({}));
        Ok((StatusCode::ACCEPTED, report))
    }

    fn unassociate(&mut self, id: &str, body: &Value) -> Result<(StatusCode, Value), Failure> {
        let removed = self.matching_units(self.repo(id)?, &body["criteria"]);
        if let Some(repo) = self.repos.get_mut(id) {
            for unit_id in &removed {
                repo.units.remove(unit_id);
            }
        }
        let report = self.finished(json!({"units_successful": removed}), json!({}));
        Ok((StatusCode::ACCEPTED, report))
    }

    fn import_upload(&mut self, id: &str, body: &Value) -> Result<(StatusCode, Value), Failure> {
        self.repo(id)?;
        let upload_id = body["upload_id"].as_str().unwrap_or_default();
        let bytes = self
            .uploads
            .get(upload_id)
            .ok_or_else(|| not_found(format!("Missing resource(s): upload_request={upload_id}")))?;
        let Some(unit) = decode_artifact(bytes) else {
            return Ok((StatusCode::ACCEPTED, self.failed("Uploaded file is not a valid unit")));
        };
        if body["unit_type_id"].as_str() != Some(unit.type_id.as_str()) {
            return Ok((StatusCode::ACCEPTED, self.failed("Unit type does not match upload")));
        }
        let unit_id = unit.id();
        self.units.entry(unit_id.clone()).or_insert(unit);
        if let Some(repo) = self.repos.get_mut(id) {
            repo.units.insert(unit_id.clone());
        }
        let report = self.finished(json!({"details": {"unit_id": unit_id}}), json!({}));
        Ok((StatusCode::ACCEPTED, report))
    }

    fn delete_orphans(&mut self) -> Value {
        let referenced: HashSet<&String> = self.repos.values().flat_map(|r| r.units.iter()).collect();
        let before = self.units.len();
        let keep: HashSet<String> = referenced.into_iter().cloned().collect();
        self.units.retain(|id, _| keep.contains(id));
        let deleted = before - self.units.len();
        self.finished(json!({"deleted": deleted}), json!({}))
    }

    fn poll_task(&mut self, task_id: &str) -> Result<(StatusCode, Value), Failure> {
        let stuck = self.options.stuck_tasks;
        let task = self
            .tasks
            .get_mut(task_id)
            .ok_or_else(|| not_found(format!("Missing resource(s): task_id={task_id}")))?;
        if stuck || task.polls_left > 0 {
            task.polls_left = task.polls_left.saturating_sub(1);
            let mut running = task.body.clone();
            running["state"] = json!("running");
            running["error"] = Value::Null;
            return Ok((StatusCode::OK, running));
        }
        Ok((StatusCode::OK, task.body.clone()))
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn status(State(state): State<Shared>) -> Response {
    let state = state.lock().unwrap();
    let version = state.options.server_version.clone();
    Json(json!({"api_version": "2", "versions": {"platform_version": version}})).into_response()
}

async fn create_repo(State(state): State<Shared>, Json(body): Json<Value>) -> Response {
    reply(state.lock().unwrap().create_repo(&body))
}

async fn repo_detail(State(state): State<Shared>, Path(id): Path<String>) -> Response {
    let state = state.lock().unwrap();
    reply(state.repo(&id).map(|repo| (StatusCode::OK, state.repo_json(repo))))
}

async fn delete_repo(State(state): State<Shared>, Path(id): Path<String>) -> Response {
    reply(state.lock().unwrap().delete_repo(&id))
}

async fn repo_action(
    State(state): State<Shared>,
    Path((id, action)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> Response {
    let mut state = state.lock().unwrap();
    let result = match action.as_str() {
        "sync" => state.sync(&id),
        "publish" => state.publish(&id, &body),
        "associate" => state.associate(&id, &body),
        "unassociate" => state.unassociate(&id, &body),
        "import_upload" => state.import_upload(&id, &body),
        other => Err(not_found(format!("Unknown action {other}"))),
    };
    reply(result)
}

async fn search_units(
    State(state): State<Shared>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    let state = state.lock().unwrap();
    let result = state.repo(&id).map(|repo| {
        let units: Vec<Value> = state
            .matching_units(repo, &body["criteria"])
            .iter()
            .filter_map(|unit_id| state.units.get(unit_id))
            .map(Unit::to_json)
            .collect();
        (StatusCode::OK, Value::from(units))
    });
    reply(result)
}

async fn create_upload(State(state): State<Shared>) -> Response {
    let mut state = state.lock().unwrap();
    let upload_id = state.next("upload");
    state.uploads.insert(upload_id.clone(), Vec::new());
    let body = json!({
        "_href": format!("{API}/content/uploads/{upload_id}/"),
        "upload_id": upload_id,
    });
    (StatusCode::CREATED, Json(body)).into_response()
}

async fn upload_bytes(
    State(state): State<Shared>,
    Path((id, _offset)): Path<(String, u64)>,
    body: Bytes,
) -> Response {
    let mut state = state.lock().unwrap();
    match state.uploads.get_mut(&id) {
        Some(buffer) => {
            buffer.extend_from_slice(&body);
            Json(Value::Null).into_response()
        }
        None => failure_response(not_found(format!("Missing resource(s): upload_request={id}"))),
    }
}

async fn delete_upload(State(state): State<Shared>, Path(id): Path<String>) -> Response {
    let mut state = state.lock().unwrap();
    if state.options.failing_upload_delete {
        return failure_response((
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Could not remove upload request {id}"),
        ));
    }
    match state.uploads.remove(&id) {
        Some(_) => Json(Value::Null).into_response(),
        None => failure_response(not_found(format!("Missing resource(s): upload_request={id}"))),
    }
}

async fn delete_orphans(State(state): State<Shared>) -> Response {
    let report = state.lock().unwrap().delete_orphans();
    (StatusCode::ACCEPTED, Json(report)).into_response()
}

async fn task_detail(State(state): State<Shared>, Path(id): Path<String>) -> Response {
    reply(state.lock().unwrap().poll_task(&id))
}

async fn fixture(Path(path): Path<String>) -> Response {
    match fixture_artifact(path.trim_start_matches('/')) {
        Some(unit) => encode_artifact(&unit).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn update_importer(
    State(state): State<Shared>,
    Path((id, _importer_id)): Path<(String, String)>,
    Json(body): Json<Value>,
) -> Response {
    reply(state.lock().unwrap().update_importer(&id, &body))
}

async fn published(State(state): State<Shared>, Path(path): Path<String>) -> Response {
    let state = state.lock().unwrap();
    let path = path.trim_start_matches('/');
    if let Some(bytes) = state.published_package(path) {
        return ([(header::CONTENT_TYPE, "application/x-rpm")], bytes).into_response();
    }
    let key = path
        .strip_suffix("/repodata/repomd.xml")
        .map(|p| p.trim_matches('/'));
    match key.and_then(|key| state.published.get(key)) {
        Some(published) => published.repomd.clone().into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

fn router(state: Shared) -> Router {
    Router::new()
        .route(&format!("{API}/status/"), get(status))
        .route(&format!("{API}/repositories/"), post(create_repo))
        .route(
            &format!("{API}/repositories/:id/"),
            get(repo_detail).delete(delete_repo),
        )
        .route(&format!("{API}/repositories/:id/actions/:action/"), post(repo_action))
        .route(&format!("{API}/repositories/:id/search/units/"), post(search_units))
        .route(
            &format!("{API}/repositories/:id/importers/:importer_id/"),
            put(update_importer),
        )
        .route(&format!("{API}/content/uploads/"), post(create_upload))
        .route(&format!("{API}/content/uploads/:id/"), delete(delete_upload))
        .route(&format!("{API}/content/uploads/:id/:offset/"), put(upload_bytes))
        .route(&format!("{API}/content/orphans/"), delete(delete_orphans))
        .route(&format!("{API}/tasks/:id/"), get(task_detail))
        .route("/fixtures/*path", get(fixture))
        .route("/pulp/repos/*path", get(published))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Running stub server; shuts down on drop
pub struct StubServer {
    base_url: String,
    state: Shared,
    shutdown: Option<oneshot::Sender<()>>,
    join: Option<JoinHandle<()>>,
}

impl StubServer {
    pub fn start() -> Self {
        Self::start_with(StubOptions::default())
    }

    pub fn start_with(options: StubOptions) -> Self {
        let state: Shared = Arc::new(Mutex::new(StubState {
            options,
            ..StubState::default()
        }));
        let listener = StdTcpListener::bind("127.0.0.1:0").expect("bind stub listener");
        listener.set_nonblocking(true).expect("set nonblocking");
        let addr = listener.local_addr().expect("stub address");
        let app = router(Arc::clone(&state));
        let (tx, rx) = oneshot::channel::<()>();

        let join = std::thread::spawn(move || {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("stub runtime");
            runtime.block_on(async move {
                let listener =
                    tokio::net::TcpListener::from_std(listener).expect("tokio listener");
                axum::serve(listener, app)
                    .with_graceful_shutdown(async {
                        let _ = rx.await;
                    })
                    .await
                    .expect("stub server");
            });
        });

        Self {
            base_url: format!("http://{addr}"),
            state,
            shutdown: Some(tx),
            join: Some(join),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Harness configuration pointing at this server, with fast polling
    pub fn config(&self) -> HarnessConfig {
        let mut config = HarnessConfig::new();
        config.server.base_url = self.base_url.clone();
        config.server.request_timeout = "10s".to_string();
        config.polling.interval = "5ms".to_string();
        config.polling.max_interval = "20ms".to_string();
        config.polling.timeout = "10s".to_string();
        config.fixtures.base_url = format!("{}/fixtures/", self.base_url);
        config
    }

    /// Ids of repositories that currently exist
    pub fn repo_ids(&self) -> Vec<String> {
        self.state.lock().unwrap().repos.keys().cloned().collect()
    }

    /// Ids of repositories deleted so far, in order
    pub fn deleted_repos(&self) -> Vec<String> {
        self.state.lock().unwrap().deleted_repos.clone()
    }

    /// Number of units known to the server, orphans included
    pub fn unit_count(&self) -> usize {
        self.state.lock().unwrap().units.len()
    }

    /// Sync `feed` into a fresh repository created directly on the server
    pub fn seed_repo(&self, id: &str, feed: &str) {
        let mut state = self.state.lock().unwrap();
        state
            .create_repo(&json!({"id": id, "importer_config": {"feed": feed}, "notes": {}}))
            .expect("seed repository");
        state.sync(id).expect("seed sync");
    }
}

impl Drop for StubServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

// ---------------------------------------------------------------------------
// Harness helpers
// ---------------------------------------------------------------------------

/// Run one registered scenario against `stub`
pub fn run_named(stub: &StubServer, name: &str) -> ScenarioReport {
    run_with_config(&stub.config(), name)
}

pub fn run_with_config(config: &HarnessConfig, name: &str) -> ScenarioReport {
    let client = ApiClient::new(config).unwrap();
    let runner = Runner::new(&client, config).unwrap();
    let scenario = scenarios::find(name).unwrap_or_else(|| panic!("no scenario {name}"));
    runner.run_scenario(scenario)
}

pub fn assert_passed(report: &ScenarioReport) {
    assert_eq!(
        report.outcome,
        Outcome::Passed,
        "scenario {} did not pass",
        report.name
    );
}

pub fn assert_skipped(report: &ScenarioReport) {
    assert!(
        matches!(report.outcome, Outcome::Skipped { .. }),
        "scenario {} was not skipped: {:?}",
        report.name,
        report.outcome
    );
}

/// The scenario ran and one of its checks did not hold
pub fn assert_failed_assertion(report: &ScenarioReport) {
    match &report.outcome {
        Outcome::Failed { error } => assert!(
            error.starts_with("Assertion failed"),
            "scenario {} failed for another reason: {error}",
            report.name
        ),
        other => panic!("scenario {} did not fail: {other:?}", report.name),
    }
}
