// src/harness/context.rs

//! Per-scenario state and cleanup

use super::issue_fixed;
use crate::api::{ApiClient, Task};
use crate::config::{HarnessConfig, PollPolicy};
use crate::content::{ContentUnit, Distributor, Repository, TypeId};
use crate::copy::{self, CopyRequest, Criteria};
use crate::driver;
use crate::error::{Error, Result};
use crate::fixtures::{
    gen_distributor, gen_repo, Artifact, Feed, FixtureCatalog, ImporterConfig, RepositoryBody,
};
use crate::repodata::{self, RepoMd};
use crate::verify;
use crate::version::{RpmVersion, VersionConstraint};
use tracing::{debug, warn};
use url::Url;

/// Work to undo when a scenario ends
#[derive(Debug, Clone, PartialEq, Eq)]
enum Cleanup {
    DeleteRepo { id: String, href: String },
    DeleteOrphans,
}

/// What a scenario works with
///
/// Repositories created through the context are deleted when the scenario
/// ends, whether it passed or not, in reverse order of creation.
pub struct ScenarioContext<'a> {
    client: &'a ApiClient,
    config: &'a HarnessConfig,
    catalog: &'a FixtureCatalog,
    poll: PollPolicy,
    server_version: &'a RpmVersion,
    cleanup: Vec<Cleanup>,
}

impl<'a> ScenarioContext<'a> {
    pub fn new(
        client: &'a ApiClient,
        config: &'a HarnessConfig,
        catalog: &'a FixtureCatalog,
        poll: PollPolicy,
        server_version: &'a RpmVersion,
    ) -> Self {
        Self {
            client,
            config,
            catalog,
            poll,
            server_version,
            cleanup: Vec::new(),
        }
    }

    pub fn client(&self) -> &ApiClient {
        self.client
    }

    pub fn config(&self) -> &HarnessConfig {
        self.config
    }

    pub fn poll(&self) -> PollPolicy {
        self.poll
    }

    pub fn server_version(&self) -> &RpmVersion {
        self.server_version
    }

    /// URL of a fixture feed
    pub fn feed(&self, feed: Feed) -> Result<String> {
        self.catalog.feed(feed)
    }

    /// Whether the server version satisfies `constraint` (e.g. ">= 2.19")
    pub fn server_satisfies(&self, constraint: &str) -> Result<bool> {
        Ok(VersionConstraint::parse(constraint)?.satisfies(self.server_version))
    }

    /// Whether a known issue is fixed on the server under test
    pub fn is_fixed(&self, issue: u32) -> Result<bool> {
        issue_fixed(self.config, self.server_version, issue)
    }

    /// Skip the rest of the scenario unless `issue` is fixed
    pub fn skip_unless_fixed(&self, issue: u32) -> Result<()> {
        if self.is_fixed(issue)? {
            return Ok(());
        }
        Err(Error::Skipped(format!("issue {} is not fixed", issue)))
    }

    /// Create a repository and return its detail view
    pub fn create_repo(&mut self, body: RepositoryBody) -> Result<Repository> {
        let created = driver::create_repo(self.client, &body)?;
        self.cleanup.push(Cleanup::DeleteRepo {
            id: created.id.clone(),
            href: created.href.clone(),
        });
        self.refresh(&created)
    }

    /// Create a repository with one distributor and no feed
    pub fn create_empty_repo(&mut self) -> Result<Repository> {
        self.create_repo(gen_repo().with_distributor(gen_distributor()))
    }

    /// Create a repository with a distributor, fed from `feed`, and sync it
    pub fn create_synced_repo(&mut self, feed: Feed) -> Result<Repository> {
        let body = gen_repo()
            .with_feed(self.feed(feed)?)
            .with_distributor(gen_distributor());
        let repo = self.create_repo(body)?;
        self.sync(&repo)?;
        self.refresh(&repo)
    }

    /// Fetch the current detail view of `repo`
    pub fn refresh(&self, repo: &Repository) -> Result<Repository> {
        verify::get_repository(self.client, &repo.href)
    }

    pub fn sync(&self, repo: &Repository) -> Result<Vec<Task>> {
        driver::sync_repo(self.client, self.poll, repo)
    }

    /// Publish with the repository's first distributor
    pub fn publish(&self, repo: &Repository) -> Result<Vec<Task>> {
        let distributor = distributor_of(repo)?;
        driver::publish_repo(self.client, self.poll, repo, &distributor.id)
    }

    pub fn update_importer(&self, repo: &Repository, config: &ImporterConfig) -> Result<Vec<Task>> {
        driver::update_importer(self.client, self.poll, repo, config)
    }

    pub fn copy(&self, destination: &Repository, request: &CopyRequest) -> Result<Vec<Task>> {
        copy::copy_units(self.client, self.poll, destination, request)
    }

    pub fn unassociate(&self, repo: &Repository, criteria: &Criteria) -> Result<Vec<Task>> {
        copy::unassociate_units(self.client, self.poll, repo, criteria)
    }

    pub fn delete_orphans(&self) -> Result<Vec<Task>> {
        copy::delete_orphans(self.client, self.poll)
    }

    /// Purge orphans after every repository of the scenario is gone
    pub fn defer_orphan_cleanup(&mut self) {
        if !self.cleanup.contains(&Cleanup::DeleteOrphans) {
            self.cleanup.insert(0, Cleanup::DeleteOrphans);
        }
    }

    pub fn search(&self, repo: &Repository, criteria: &Criteria) -> Result<Vec<ContentUnit>> {
        verify::search_units(self.client, repo, criteria)
    }

    /// Every unit of one type in `repo`
    pub fn units_of(&self, repo: &Repository, type_id: TypeId) -> Result<Vec<ContentUnit>> {
        self.search(repo, &Criteria::search([type_id]))
    }

    pub fn download_artifact(&self, artifact: Artifact) -> Result<Vec<u8>> {
        driver::download_fixture(self.client, &self.catalog.artifact(artifact)?)
    }

    /// Download a fixture artifact and import it into `repo`
    pub fn upload_artifact(
        &self,
        repo: &Repository,
        artifact: Artifact,
        unit_type_id: &TypeId,
    ) -> Result<Vec<Task>> {
        let bytes = self.download_artifact(artifact)?;
        driver::upload_import_unit(self.client, self.poll, repo, bytes, unit_type_id)
    }

    /// Published repomd of `repo`'s first distributor
    pub fn published_repomd(&self, repo: &Repository) -> Result<RepoMd> {
        repodata::fetch_repomd(self.client, &self.config.publish.path, distributor_of(repo)?)
    }

    /// Absolute URL of what `repo`'s first distributor publishes, usable as a feed
    pub fn published_url(&self, repo: &Repository) -> Result<Url> {
        let root = repodata::published_root(&self.config.publish.path, distributor_of(repo)?)?;
        self.client.url(&root)
    }

    /// Bytes of a package as published by `repo`'s first distributor
    pub fn download_published_package(&self, repo: &Repository, filename: &str) -> Result<Vec<u8>> {
        let url = self.published_url(repo)?;
        let href = repodata::package_href(url.as_str(), filename);
        self.client.download(&self.client.url(&href)?)
    }

    /// Run registered cleanup, newest first
    ///
    /// Failures are logged and do not stop the remaining steps.
    pub fn cleanup(&mut self) {
        while let Some(step) = self.cleanup.pop() {
            let result = match &step {
                Cleanup::DeleteRepo { id, href } => {
                    debug!("Cleaning up repository {}", id);
                    driver::delete_repo(self.client, self.poll, href)
                }
                Cleanup::DeleteOrphans => copy::delete_orphans(self.client, self.poll),
            };
            if let Err(e) = result {
                warn!("Cleanup step {:?} failed: {}", step, e);
            }
        }
    }
}

fn distributor_of(repo: &Repository) -> Result<&Distributor> {
    repo.primary_distributor()
        .ok_or_else(|| Error::ConfigError(format!("Repository {} has no distributor", repo.id)))
}

impl Drop for ScenarioContext<'_> {
    fn drop(&mut self) {
        self.cleanup();
    }
}
