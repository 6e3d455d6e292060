// src/scenarios/copy.rs

//! Copy (associate) scenarios
//!
//! The conservative scenarios copy `chimpanzee` from the unsigned feed:
//!
//! ```text
//! chimpanzee
//! ├── squirrel
//! │   ├── camel
//! │   └── fox
//! └── walrus (5.21 in the feed, 0.71 as a standalone artifact)
//! ```
//!
//! The additional-repository scenarios copy the `walrus:0.71` module from a
//! modular feed whose `shark` and `stork` dependencies only exist in a second
//! feed.

use crate::content::{Repository, TypeId};
use crate::copy::{CopyRequest, Criteria, OverrideConfig, UnitFilter};
use crate::error::Result;
use crate::fixtures::{
    gen_distributor, gen_repo, Artifact, DownloadPolicy, Feed, MODULE_FIXTURES_ERRATA,
    MODULE_FIXTURES_PACKAGE_STREAM, RPM_PACKAGES_MULTIPLE_REPOS,
};
use crate::harness::{Scenario, ScenarioContext, Suite};
use crate::verify::{
    expect_eq, expect_not_found, expect_that, expect_unit_count, unit_filenames, unit_versions,
};
use uuid::Uuid;

/// Server release that introduced conservative copy fixes
const CONSERVATIVE_SINCE: &str = ">= 2.18.1";

/// Server release that introduced `additional_repos`
const ADDITIONAL_REPOS_SINCE: &str = ">= 2.21";

pub const SCENARIOS: &[Scenario] = &[
    Scenario {
        name: "copy_errata_recursive",
        suite: Suite::Copy,
        summary: "recursive copy of errata brings their RPMs along",
        requires: None,
        known_issues: &[3004],
        run: copy_errata_recursive,
    },
    Scenario {
        name: "copy_yum_metadata_file",
        suite: Suite::Copy,
        summary: "a copied yum metadata file outlives its source",
        requires: None,
        known_issues: &[],
        run: copy_yum_metadata_file,
    },
    Scenario {
        name: "copy_recursive_nonconservative",
        suite: Suite::Copy,
        summary: "recursive copy into an empty repository takes walrus 5.21",
        requires: Some(CONSERVATIVE_SINCE),
        known_issues: &[],
        run: copy_recursive_nonconservative,
    },
    Scenario {
        name: "copy_recursive_conservative",
        suite: Suite::Copy,
        summary: "conservative copy into an empty repository takes walrus 5.21",
        requires: Some(CONSERVATIVE_SINCE),
        known_issues: &[],
        run: copy_recursive_conservative,
    },
    Scenario {
        name: "copy_recursive_conservative_old_dependency",
        suite: Suite::Copy,
        summary: "conservative copy keeps the walrus 0.71 already present",
        requires: Some(CONSERVATIVE_SINCE),
        known_issues: &[],
        run: copy_recursive_conservative_old_dependency,
    },
    Scenario {
        name: "copy_conservative_old_dependency",
        suite: Suite::Copy,
        summary: "conservative alone resolves dependencies and keeps walrus 0.71",
        requires: Some(CONSERVATIVE_SINCE),
        known_issues: &[],
        run: copy_conservative_old_dependency,
    },
    Scenario {
        name: "copy_nonrecursive",
        suite: Suite::Copy,
        summary: "plain copy takes only the requested RPM",
        requires: Some(CONSERVATIVE_SINCE),
        known_issues: &[],
        run: copy_nonrecursive,
    },
    Scenario {
        name: "copy_recursive_nonconservative_old_dependency",
        suite: Suite::Copy,
        summary: "recursive copy adds walrus 5.21 next to walrus 0.71",
        requires: Some(CONSERVATIVE_SINCE),
        known_issues: &[],
        run: copy_recursive_nonconservative_old_dependency,
    },
    Scenario {
        name: "copy_additional_repos_one_destination",
        suite: Suite::Copy,
        summary: "module dependencies from a second source land in the same destination",
        requires: Some(ADDITIONAL_REPOS_SINCE),
        known_issues: &[],
        run: copy_additional_repos_one_destination,
    },
    Scenario {
        name: "copy_additional_repos_two_destinations",
        suite: Suite::Copy,
        summary: "module dependencies from a second source land in its own destination",
        requires: Some(ADDITIONAL_REPOS_SINCE),
        known_issues: &[],
        run: copy_additional_repos_two_destinations,
    },
    Scenario {
        name: "copy_additional_repos_errata",
        suite: Suite::Copy,
        summary: "errata packages missing from the source come from additional repos",
        requires: Some(ADDITIONAL_REPOS_SINCE),
        known_issues: &[5449],
        run: copy_additional_repos_errata,
    },
    Scenario {
        name: "copy_nonexistent_source",
        suite: Suite::Copy,
        summary: "copy from a missing repository is not found",
        requires: None,
        known_issues: &[],
        run: copy_nonexistent_source,
    },
    Scenario {
        name: "copy_unknown_type",
        suite: Suite::Copy,
        summary: "copy of an unknown unit type succeeds and copies nothing",
        requires: None,
        known_issues: &[],
        run: copy_unknown_type,
    },
];

fn copy_errata_recursive(ctx: &mut ScenarioContext<'_>) -> Result<()> {
    let source = ctx.create_synced_repo(Feed::RpmUpdatedInfo)?;
    let destination = ctx.create_repo(gen_repo())?;

    let request = CopyRequest::new(&source.id, Criteria::types([TypeId::Erratum]))
        .with_override(OverrideConfig::recursive());
    ctx.copy(&destination, &request)?;

    let rpms = ctx.units_of(&destination, TypeId::Rpm)?;
    expect_that("RPMs copied along with errata", !rpms.is_empty(), rpms.len())
}

fn copy_yum_metadata_file(ctx: &mut ScenarioContext<'_>) -> Result<()> {
    let source = ctx.create_synced_repo(Feed::RpmYumMetadataFile)?;
    let destination = ctx.create_empty_repo()?;

    let request = CopyRequest::new(&source.id, Criteria::types([TypeId::YumRepoMetadataFile]))
        .with_override(OverrideConfig::recursive());
    ctx.copy(&destination, &request)?;
    ctx.publish(&destination)?;

    // The destination must not depend on the source's copy of the unit
    ctx.unassociate(&source, &Criteria::all())?;
    ctx.delete_orphans()?;
    ctx.publish(&destination)?;

    let source = ctx.refresh(&source)?;
    let destination = ctx.refresh(&destination)?;
    expect_that(
        "source holds no yum metadata file",
        !source.has_type(&TypeId::YumRepoMetadataFile),
        format!("{:?}", source.content_unit_counts),
    )?;
    expect_unit_count(&destination, &TypeId::YumRepoMetadataFile, 1)?;

    let repomd = ctx.published_repomd(&destination)?;
    expect_that(
        "published repomd lists productid",
        repomd.has_type("productid"),
        format!("{:?}", repomd.data_types()),
    )
}

/// Copy `chimpanzee` from the unsigned feed into a fresh repository
///
/// With `old_dependency`, `walrus-0.71` is imported into the destination
/// first.
fn copy_chimpanzee(
    ctx: &mut ScenarioContext<'_>,
    recursive: bool,
    recursive_conservative: bool,
    old_dependency: bool,
) -> Result<Repository> {
    let source = ctx.create_synced_repo(Feed::RpmUnsigned)?;
    let destination = ctx.create_repo(gen_repo())?;

    if old_dependency {
        ctx.upload_artifact(&destination, Artifact::RpmWithOldVersion, &TypeId::Rpm)?;
        let units = ctx.units_of(&destination, TypeId::Rpm)?;
        expect_eq("RPMs before copy", 1, units.len())?;
    }

    let criteria =
        Criteria::types([TypeId::Rpm]).with_unit_filter(UnitFilter::eq("name", "chimpanzee"));
    let request = CopyRequest::new(&source.id, criteria)
        .with_override(OverrideConfig::new(recursive, recursive_conservative));
    ctx.copy(&destination, &request)?;

    ctx.refresh(&destination)
}

/// Check the RPM count and every `walrus` version in `repo`
fn expect_rpms(
    ctx: &ScenarioContext<'_>,
    repo: &Repository,
    count: usize,
    walrus: &[&str],
) -> Result<()> {
    let units = ctx.units_of(repo, TypeId::Rpm)?;
    let versions = unit_versions(&units, "walrus");
    expect_eq(
        "walrus versions",
        walrus.to_vec(),
        versions.iter().map(String::as_str).collect(),
    )?;
    expect_eq("RPM count", count, units.len())
}

fn copy_recursive_nonconservative(ctx: &mut ScenarioContext<'_>) -> Result<()> {
    let repo = copy_chimpanzee(ctx, true, false, false)?;
    expect_rpms(ctx, &repo, 5, &["5.21"])
}

fn copy_recursive_conservative(ctx: &mut ScenarioContext<'_>) -> Result<()> {
    let repo = copy_chimpanzee(ctx, true, true, false)?;
    expect_rpms(ctx, &repo, 5, &["5.21"])
}

fn copy_recursive_conservative_old_dependency(ctx: &mut ScenarioContext<'_>) -> Result<()> {
    let repo = copy_chimpanzee(ctx, true, true, true)?;
    expect_rpms(ctx, &repo, 5, &["0.71"])
}

fn copy_conservative_old_dependency(ctx: &mut ScenarioContext<'_>) -> Result<()> {
    let repo = copy_chimpanzee(ctx, false, true, true)?;
    expect_rpms(ctx, &repo, 5, &["0.71"])
}

fn copy_nonrecursive(ctx: &mut ScenarioContext<'_>) -> Result<()> {
    let repo = copy_chimpanzee(ctx, false, false, false)?;
    expect_rpms(ctx, &repo, 1, &[])
}

fn copy_recursive_nonconservative_old_dependency(ctx: &mut ScenarioContext<'_>) -> Result<()> {
    let repo = copy_chimpanzee(ctx, true, false, true)?;
    // Sorted: the preloaded 0.71 stays next to the copied 5.21
    expect_rpms(ctx, &repo, 6, &["0.71", "5.21"])
}

/// Create and sync an on-demand repository from `feed`
fn create_on_demand_repo(ctx: &mut ScenarioContext<'_>, feed: Feed) -> Result<Repository> {
    let body = gen_repo()
        .with_feed(ctx.feed(feed)?)
        .with_download_policy(DownloadPolicy::OnDemand)
        .with_distributor(gen_distributor());
    let repo = ctx.create_repo(body)?;
    ctx.sync(&repo)?;
    ctx.refresh(&repo)
}

fn module_criteria() -> Criteria {
    let stream = MODULE_FIXTURES_PACKAGE_STREAM;
    Criteria::types([TypeId::Modulemd]).with_unit_filter(UnitFilter::and(vec![
        UnitFilter::fields([("name", stream.name), ("stream", stream.stream)]),
    ]))
}

fn rpm_filenames(ctx: &ScenarioContext<'_>, repo: &Repository) -> Result<Vec<String>> {
    Ok(unit_filenames(&ctx.units_of(repo, TypeId::Rpm)?))
}

fn owned(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn copy_additional_repos_one_destination(ctx: &mut ScenarioContext<'_>) -> Result<()> {
    let modular = create_on_demand_repo(ctx, Feed::RpmWithModulesModified)?;
    let extra = create_on_demand_repo(ctx, Feed::RpmUnsignedModified)?;
    let destination = ctx.create_repo(gen_repo())?;

    let request = CopyRequest::new(&modular.id, module_criteria()).with_override(
        OverrideConfig::conservative().with_additional_repo(&extra.id, &destination.id),
    );
    ctx.copy(&destination, &request)?;

    let destination = ctx.refresh(&destination)?;
    expect_eq(
        "destination RPMs",
        owned(&RPM_PACKAGES_MULTIPLE_REPOS),
        rpm_filenames(ctx, &destination)?,
    )?;
    expect_unit_count(&destination, &TypeId::Modulemd, 1)?;
    expect_unit_count(&destination, &TypeId::ModulemdDefaults, 1)
}

fn copy_additional_repos_two_destinations(ctx: &mut ScenarioContext<'_>) -> Result<()> {
    let modular = create_on_demand_repo(ctx, Feed::RpmWithModulesModified)?;
    let extra = create_on_demand_repo(ctx, Feed::RpmUnsignedModified)?;
    let destination = ctx.create_repo(gen_repo())?;
    let extra_destination = ctx.create_repo(gen_repo())?;

    let request = CopyRequest::new(&modular.id, module_criteria()).with_override(
        OverrideConfig::conservative().with_additional_repo(&extra.id, &extra_destination.id),
    );
    ctx.copy(&destination, &request)?;

    let destination = ctx.refresh(&destination)?;
    let extra_destination = ctx.refresh(&extra_destination)?;

    expect_unit_count(&destination, &TypeId::Modulemd, 1)?;
    expect_unit_count(&destination, &TypeId::ModulemdDefaults, 1)?;
    expect_eq(
        "destination RPMs",
        owned(&RPM_PACKAGES_MULTIPLE_REPOS[2..]),
        rpm_filenames(ctx, &destination)?,
    )?;

    expect_eq(
        "unit types in the additional destination",
        1,
        extra_destination.content_unit_counts.len(),
    )?;
    expect_eq(
        "additional destination RPMs",
        owned(&RPM_PACKAGES_MULTIPLE_REPOS[..2]),
        rpm_filenames(ctx, &extra_destination)?,
    )
}

fn copy_additional_repos_errata(ctx: &mut ScenarioContext<'_>) -> Result<()> {
    let errata = MODULE_FIXTURES_ERRATA;

    // Issue 5449 only showed up when the copy was repeated
    for _ in 0..2 {
        let modular = create_on_demand_repo(ctx, Feed::RpmWithModulesModified)?;
        let extra = create_on_demand_repo(ctx, Feed::RpmUnsignedModified)?;
        let destination = ctx.create_repo(gen_repo())?;

        let criteria = Criteria::types([TypeId::Erratum])
            .with_unit_filter(UnitFilter::eq("id", errata.errata_id));
        let request = CopyRequest::new(&modular.id, criteria).with_override(
            OverrideConfig::conservative().with_additional_repo(&extra.id, &destination.id),
        );
        ctx.copy(&destination, &request)?;

        let destination = ctx.refresh(&destination)?;
        expect_eq(
            "destination RPMs",
            owned(errata.packages),
            rpm_filenames(ctx, &destination)?,
        )?;
        expect_unit_count(&destination, &TypeId::Erratum, errata.errata_count)?;
        expect_unit_count(&destination, &TypeId::Modulemd, errata.modules_count)?;
        expect_unit_count(
            &destination,
            &TypeId::ModulemdDefaults,
            errata.module_defaults_count,
        )?;
    }
    Ok(())
}

fn copy_nonexistent_source(ctx: &mut ScenarioContext<'_>) -> Result<()> {
    let destination = ctx.create_repo(gen_repo())?;
    let request = CopyRequest::new(Uuid::new_v4().to_string(), Criteria::types([TypeId::Rpm]));
    expect_not_found("copy from a missing repository", ctx.copy(&destination, &request))
}

fn copy_unknown_type(ctx: &mut ScenarioContext<'_>) -> Result<()> {
    let source = ctx.create_synced_repo(Feed::RpmUnsigned)?;
    let destination = ctx.create_repo(gen_repo())?;

    let request = CopyRequest::new(&source.id, Criteria::types([TypeId::from("no_such_type")]))
        .with_override(OverrideConfig::recursive());
    ctx.copy(&destination, &request)?;

    let destination = ctx.refresh(&destination)?;
    expect_that(
        "destination stays empty",
        destination.content_unit_counts.is_empty(),
        format!("{:?}", destination.content_unit_counts),
    )
}
