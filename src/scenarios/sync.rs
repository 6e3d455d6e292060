// src/scenarios/sync.rs

//! Sync and publish scenarios

use crate::api::Task;
use crate::content::{Importer, Repository, TypeId};
use crate::driver;
use crate::error::Result;
use crate::fixtures::{
    gen_distributor, gen_repo, Artifact, Feed, ImporterConfig, RPM_SHA512_FEED_COUNT,
    RPM_SIGNED_FEED_COUNTS,
};
use crate::harness::{Scenario, ScenarioContext, Suite};
use crate::verify::{
    expect_eq, expect_not_found, expect_task_failure, expect_that, expect_unit_count,
};
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;
use uuid::Uuid;

/// Metadata state of a sync that never got to content
const NOT_STARTED: &str = "NOT_STARTED";

pub const SCENARIOS: &[Scenario] = &[
    Scenario {
        name: "sync_rpm_signed",
        suite: Suite::Sync,
        summary: "signed feed syncs cleanly and a second sync changes nothing",
        requires: None,
        known_issues: &[],
        run: sync_rpm_signed,
    },
    Scenario {
        name: "sync_drpm_unsigned",
        suite: Suite::Sync,
        summary: "delta RPM feed syncs without error details",
        requires: None,
        known_issues: &[],
        run: sync_drpm_unsigned,
    },
    Scenario {
        name: "sync_srpm_signed",
        suite: Suite::Sync,
        summary: "source RPM feed syncs without error details",
        requires: None,
        known_issues: &[],
        run: sync_srpm_signed,
    },
    Scenario {
        name: "sync_sha512_checksums",
        suite: Suite::Sync,
        summary: "auto-published SHA-512 feed keeps sha512 checksums in repomd",
        requires: Some(">= 2.18"),
        known_issues: &[],
        run: sync_sha512_checksums,
    },
    Scenario {
        name: "sync_change_feed",
        suite: Suite::Sync,
        summary: "a repository re-synced from a changed feed publishes the same RPM",
        requires: None,
        known_issues: &[3104],
        run: sync_change_feed,
    },
    Scenario {
        name: "sync_missing_primary",
        suite: Suite::Sync,
        summary: "feed without primary.xml fails before content",
        requires: None,
        known_issues: &[],
        run: sync_missing_primary,
    },
    Scenario {
        name: "sync_missing_filelists",
        suite: Suite::Sync,
        summary: "feed without filelists.xml fails before content",
        requires: None,
        known_issues: &[],
        run: sync_missing_filelists,
    },
    Scenario {
        name: "sync_missing_other",
        suite: Suite::Sync,
        summary: "feed without other.xml fails before content",
        requires: None,
        known_issues: &[],
        run: sync_missing_other,
    },
    Scenario {
        name: "sync_incomplete_filelists",
        suite: Suite::Sync,
        summary: "feed with a truncated filelists.xml fails before content",
        requires: None,
        known_issues: &[],
        run: sync_incomplete_filelists,
    },
    Scenario {
        name: "sync_incomplete_other",
        suite: Suite::Sync,
        summary: "feed with a truncated other.xml fails before content",
        requires: None,
        known_issues: &[],
        run: sync_incomplete_other,
    },
    Scenario {
        name: "sync_invalid_feed_error",
        suite: Suite::Sync,
        summary: "a feed without a scheme is reported with a descriptive error",
        requires: None,
        known_issues: &[],
        run: sync_invalid_feed_error,
    },
    Scenario {
        name: "sync_missing_filelists_error",
        suite: Suite::Sync,
        summary: "missing filelists metadata is named in the error",
        requires: Some(">= 2.19"),
        known_issues: &[],
        run: sync_missing_filelists_error,
    },
    Scenario {
        name: "sync_nonexistent_repo",
        suite: Suite::Sync,
        summary: "sync of a missing repository is not found",
        requires: None,
        known_issues: &[],
        run: sync_nonexistent_repo,
    },
    Scenario {
        name: "publish_nonexistent_repo",
        suite: Suite::Sync,
        summary: "publish of a missing repository is not found",
        requires: None,
        known_issues: &[],
        run: publish_nonexistent_repo,
    },
];

fn create_feed_repo(ctx: &mut ScenarioContext<'_>, feed: &str) -> Result<Repository> {
    ctx.create_repo(gen_repo().with_feed(feed))
}

fn sync_rpm_signed(ctx: &mut ScenarioContext<'_>) -> Result<()> {
    let feed = ctx.feed(Feed::RpmSigned)?;
    let repo = create_feed_repo(ctx, &feed)?;
    let tasks = ctx.sync(&repo)?;
    expect_no_error_details(&tasks)?;

    // Langpacks are only recognized from 2.9 on
    let langpacks = ctx.server_satisfies(">= 2.9")?;
    let expected: BTreeMap<String, u64> = RPM_SIGNED_FEED_COUNTS
        .iter()
        .filter(|(type_id, _)| langpacks || *type_id != TypeId::PackageLangpacks.as_str())
        .map(|(type_id, count)| (type_id.to_string(), *count))
        .collect();
    let repo = ctx.refresh(&repo)?;
    expect_eq("unit counts", expected, repo.content_unit_counts.clone())?;

    let resync = ctx.sync(&repo)?;
    expect_eq("tasks spawned by the second sync", 1, resync.len())?;
    for field in ["added_count", "removed_count", "updated_count"] {
        expect_eq(field, Some(0), resync[0].result_count(field))?;
    }
    Ok(())
}

fn expect_no_error_details(tasks: &[Task]) -> Result<()> {
    for task in tasks {
        let details = task.progress(&["yum_importer", "content", "error_details"]);
        expect_eq(
            &format!("error details of task {}", task.task_id),
            Some(&json!([])),
            details,
        )?;
    }
    Ok(())
}

fn sync_cleanly(ctx: &mut ScenarioContext<'_>, feed: Feed) -> Result<()> {
    let url = ctx.feed(feed)?;
    let repo = create_feed_repo(ctx, &url)?;
    let tasks = ctx.sync(&repo)?;
    expect_no_error_details(&tasks)
}

fn sync_drpm_unsigned(ctx: &mut ScenarioContext<'_>) -> Result<()> {
    sync_cleanly(ctx, Feed::DrpmUnsigned)
}

fn sync_srpm_signed(ctx: &mut ScenarioContext<'_>) -> Result<()> {
    sync_cleanly(ctx, Feed::SrpmSigned)
}

fn sync_sha512_checksums(ctx: &mut ScenarioContext<'_>) -> Result<()> {
    let body = gen_repo()
        .with_feed(ctx.feed(Feed::RpmWithSha512)?)
        .with_distributor(gen_distributor().with_auto_publish());
    let repo = ctx.create_repo(body)?;
    ctx.sync(&repo)?;
    let repo = ctx.refresh(&repo)?;

    let repomd = ctx.published_repomd(&repo)?;
    expect_eq(
        "repomd checksum types",
        BTreeSet::from(["sha512"]),
        repomd.checksum_types(),
    )?;
    expect_unit_count(&repo, &TypeId::Rpm, RPM_SHA512_FEED_COUNT)
}

/// Sync and publish two identical repositories, then point a third one at
/// the first's published content, switch it to the second's and re-sync
fn sync_change_feed(ctx: &mut ScenarioContext<'_>) -> Result<()> {
    let mut published = Vec::new();
    for _ in 0..2 {
        let repo = ctx.create_synced_repo(Feed::RpmUnsigned)?;
        ctx.publish(&repo)?;
        published.push(ctx.published_url(&repo)?.to_string());
    }

    let body = gen_repo()
        .with_feed(published[0].as_str())
        .with_ssl_validation(false)
        .with_distributor(gen_distributor());
    let repo = ctx.create_repo(body)?;
    ctx.sync(&repo)?;
    ctx.publish(&repo)?;

    ctx.update_importer(&repo, &ImporterConfig::feed(published[1].as_str()))?;
    let repo = ctx.refresh(&repo)?;
    expect_eq(
        "importer feed",
        Some(published[1].as_str()),
        repo.importer().and_then(Importer::feed),
    )?;
    ctx.sync(&repo)?;
    ctx.publish(&repo)?;

    let artifact = Artifact::RpmUnsigned;
    let expected = ctx.download_artifact(artifact)?;
    let actual = ctx.download_published_package(&repo, artifact.filename())?;
    expect_that(
        "published RPM matches the fixture",
        actual == expected,
        format!("{} bytes, fixture has {}", actual.len(), expected.len()),
    )
}

/// Sync a broken feed and return the failed task
fn failed_sync(ctx: &mut ScenarioContext<'_>, feed: &str) -> Result<Task> {
    let repo = create_feed_repo(ctx, feed)?;
    let task = expect_task_failure("sync of a broken feed", ctx.sync(&repo))?;
    debug!("Sync of {} failed as expected: {}", feed, task.error_description());
    Ok(task)
}

fn expect_not_started(ctx: &mut ScenarioContext<'_>, feed: Feed) -> Result<()> {
    ctx.defer_orphan_cleanup();
    let url = ctx.feed(feed)?;
    let task = failed_sync(ctx, &url)?;
    expect_eq(
        "content state",
        Some(&Value::from(NOT_STARTED)),
        task.progress(&["yum_importer", "content", "state"]),
    )
}

fn sync_missing_primary(ctx: &mut ScenarioContext<'_>) -> Result<()> {
    expect_not_started(ctx, Feed::RpmMissingPrimary)
}

fn sync_missing_filelists(ctx: &mut ScenarioContext<'_>) -> Result<()> {
    expect_not_started(ctx, Feed::RpmMissingFilelists)
}

fn sync_missing_other(ctx: &mut ScenarioContext<'_>) -> Result<()> {
    expect_not_started(ctx, Feed::RpmMissingOther)
}

fn sync_incomplete_filelists(ctx: &mut ScenarioContext<'_>) -> Result<()> {
    expect_not_started(ctx, Feed::RpmIncompleteFilelists)
}

fn sync_incomplete_other(ctx: &mut ScenarioContext<'_>) -> Result<()> {
    expect_not_started(ctx, Feed::RpmIncompleteOther)
}

/// Check a failed task carries a traceback and an error naming every token
fn expect_error_report(task: &Task, tokens: &[&str]) -> Result<()> {
    expect_that(
        "task traceback present",
        task.traceback.is_some(),
        format!("{:?}", task.traceback),
    )?;
    let description = task.error_description().to_lowercase();
    let missing: Vec<&str> = tokens
        .iter()
        .copied()
        .filter(|token| !description.contains(token))
        .collect();
    expect_that(
        "error description names the problem",
        missing.is_empty(),
        format!("'{}' lacks {:?}", description, missing),
    )
}

fn sync_invalid_feed_error(ctx: &mut ScenarioContext<'_>) -> Result<()> {
    let feed = Uuid::new_v4().to_string();
    let task = failed_sync(ctx, &feed)?;
    expect_error_report(&task, &["scheme", "must", "be", "http", "https", "file"])
}

fn sync_missing_filelists_error(ctx: &mut ScenarioContext<'_>) -> Result<()> {
    let feed = ctx.feed(Feed::RpmMissingFilelists)?;
    let task = failed_sync(ctx, &feed)?;
    expect_error_report(&task, &["error", "metadata", "not", "found"])
}

fn sync_nonexistent_repo(ctx: &mut ScenarioContext<'_>) -> Result<()> {
    let repo = Repository::reference(&Uuid::new_v4().to_string());
    expect_not_found("sync of a missing repository", ctx.sync(&repo))
}

fn publish_nonexistent_repo(ctx: &mut ScenarioContext<'_>) -> Result<()> {
    let repo = Repository::reference(&Uuid::new_v4().to_string());
    let distributor = Uuid::new_v4().to_string();
    expect_not_found(
        "publish of a missing repository",
        driver::publish_repo(ctx.client(), ctx.poll(), &repo, &distributor),
    )
}
