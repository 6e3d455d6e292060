// src/driver.rs

//! Repository lifecycle, sync, publish and upload
//!
//! Every asynchronous action posts, receives a call report and blocks until
//! all spawned tasks are terminal. A task that does not finish is returned
//! as [`Error::TaskFailed`](crate::Error::TaskFailed); nothing is retried.

use crate::api::{ApiClient, Task, TaskPoller, CONTENT_UPLOAD_PATH, REPOSITORY_PATH, STATUS_PATH};
use crate::config::PollPolicy;
use crate::content::{Repository, TypeId};
use crate::error::{Error, Result};
use crate::fixtures::{ImporterConfig, RepositoryBody};
use crate::version::RpmVersion;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};
use url::Url;

/// Create a repository and return the server's view of it
pub fn create_repo(client: &ApiClient, body: &RepositoryBody) -> Result<Repository> {
    info!("Creating repository {}", body.id);
    client.post_json(REPOSITORY_PATH, body)
}

/// Delete a repository and wait for the deletion task
pub fn delete_repo(client: &ApiClient, poll: PollPolicy, href: &str) -> Result<Vec<Task>> {
    debug!("Deleting repository {}", href);
    let report = client.delete(href)?;
    TaskPoller::new(client, poll).wait_all(&report)
}

/// Sync a repository from its importer feed
pub fn sync_repo(client: &ApiClient, poll: PollPolicy, repo: &Repository) -> Result<Vec<Task>> {
    info!("Syncing repository {}", repo.id);
    let report = client.post_action(&repo.action_href("sync"), &json!({ "override_config": {} }))?;
    TaskPoller::new(client, poll).wait_all(&report)
}

/// Publish a repository with one of its distributors
pub fn publish_repo(
    client: &ApiClient,
    poll: PollPolicy,
    repo: &Repository,
    distributor_id: &str,
) -> Result<Vec<Task>> {
    info!("Publishing repository {} with {}", repo.id, distributor_id);
    let report = client.post_action(&repo.action_href("publish"), &json!({ "id": distributor_id }))?;
    TaskPoller::new(client, poll).wait_all(&report)
}

#[derive(Serialize)]
struct ImporterUpdate<'a> {
    importer_config: &'a ImporterConfig,
}

/// Change importer settings; fields left unset keep their current value
///
/// `repo` must be a detail view so that its importer href is known.
pub fn update_importer(
    client: &ApiClient,
    poll: PollPolicy,
    repo: &Repository,
    importer_config: &ImporterConfig,
) -> Result<Vec<Task>> {
    let importer = repo
        .importer()
        .ok_or_else(|| Error::ConfigError(format!("Repository {} has no importer", repo.id)))?;
    info!("Updating importer of {}", repo.id);
    let report = client.put_json(&importer.href, &ImporterUpdate { importer_config })?;
    TaskPoller::new(client, poll).wait_all(&report)
}

#[derive(Debug, Deserialize)]
struct UploadRequest {
    #[serde(rename = "_href")]
    href: String,
    upload_id: String,
}

#[derive(Serialize)]
struct ImportUploadBody<'a> {
    upload_id: &'a str,
    unit_type_id: &'a TypeId,
    unit_key: Map<String, Value>,
    unit_metadata: Map<String, Value>,
}

/// Upload one unit's bytes and import them into `repo`
///
/// The upload request is deleted once the import has been attempted, even
/// when the import fails. A failed delete is logged and never replaces the
/// import's own result.
pub fn upload_import_unit(
    client: &ApiClient,
    poll: PollPolicy,
    repo: &Repository,
    bytes: Vec<u8>,
    unit_type_id: &TypeId,
) -> Result<Vec<Task>> {
    let upload: UploadRequest = client.post_json(CONTENT_UPLOAD_PATH, &json!({}))?;
    debug!("Created upload request {} ({} bytes)", upload.upload_id, bytes.len());

    let imported = client
        .put_bytes(&format!("{}0/", upload.href), bytes)
        .and_then(|()| {
            let body = ImportUploadBody {
                upload_id: &upload.upload_id,
                unit_type_id,
                unit_key: Map::new(),
                unit_metadata: Map::new(),
            };
            client.post_action(&repo.action_href("import_upload"), &body)
        })
        .and_then(|report| TaskPoller::new(client, poll).wait_all(&report));

    if let Err(e) = client.delete(&upload.href) {
        warn!("Failed to delete upload request {}: {}", upload.upload_id, e);
    }
    let tasks = imported?;
    info!("Imported {} unit into {}", unit_type_id, repo.id);
    Ok(tasks)
}

/// Fetch a fixture artifact
pub fn download_fixture(client: &ApiClient, url: &Url) -> Result<Vec<u8>> {
    debug!("Downloading fixture {}", url);
    client.download(url)
}

#[derive(Debug, Deserialize)]
struct StatusVersions {
    platform_version: String,
}

#[derive(Debug, Deserialize)]
struct Status {
    versions: StatusVersions,
}

/// Platform version reported by the status endpoint
pub fn server_version(client: &ApiClient) -> Result<RpmVersion> {
    let status: Status = client.get_json(STATUS_PATH)?;
    let version = RpmVersion::parse(&status.versions.platform_version)?;
    debug!("Server reports platform version {}", version);
    Ok(version)
}
