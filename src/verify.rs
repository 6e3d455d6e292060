// src/verify.rs

//! Queries and checks against repository state
//!
//! Search and detail calls read what a copy, sync or upload left behind.
//! The `expect_*` helpers compare it with expectations and fail with
//! [`Error::Assertion`], carrying both sides in readable form.

use crate::api::{ApiClient, Task};
use crate::content::{ContentUnit, Repository, TypeId};
use crate::copy::Criteria;
use crate::error::{Error, Result};
use serde::Serialize;
use std::fmt::{Debug, Display};
use tracing::debug;

#[derive(Serialize)]
struct SearchBody<'a> {
    criteria: &'a Criteria,
}

/// Search the units of `repo`; the order of the result is not meaningful
pub fn search_units(
    client: &ApiClient,
    repo: &Repository,
    criteria: &Criteria,
) -> Result<Vec<ContentUnit>> {
    let units: Vec<ContentUnit> =
        client.post_json(&format!("{}search/units/", repo.href), &SearchBody { criteria })?;
    debug!(
        "Search of {} for {:?} returned {} units",
        repo.id,
        criteria.type_ids,
        units.len()
    );
    Ok(units)
}

/// Repository detail, including unit counts, distributors and importers
pub fn get_repository(client: &ApiClient, href: &str) -> Result<Repository> {
    client.get_json_with_query(href, &[("details", "true")])
}

/// Sorted filenames of the units
pub fn unit_filenames(units: &[ContentUnit]) -> Vec<String> {
    sorted(units.iter().filter_map(|u| u.filename().map(str::to_string)))
}

/// Sorted versions of every unit called `name`
pub fn unit_versions(units: &[ContentUnit], name: &str) -> Vec<String> {
    sorted(
        units
            .iter()
            .filter(|u| u.name() == Some(name))
            .filter_map(|u| u.version().map(str::to_string)),
    )
}

fn sorted(items: impl Iterator<Item = String>) -> Vec<String> {
    let mut items: Vec<String> = items.collect();
    items.sort();
    items
}

/// Fail unless `actual == expected`
pub fn expect_eq<T: PartialEq + Debug>(what: &str, expected: T, actual: T) -> Result<()> {
    if expected == actual {
        return Ok(());
    }
    Err(Error::Assertion {
        what: what.to_string(),
        expected: format!("{expected:?}"),
        actual: format!("{actual:?}"),
    })
}

/// Fail unless `condition` holds; `actual` describes what was observed
pub fn expect_that(what: &str, condition: bool, actual: impl Display) -> Result<()> {
    if condition {
        return Ok(());
    }
    Err(Error::Assertion {
        what: what.to_string(),
        expected: "condition to hold".to_string(),
        actual: actual.to_string(),
    })
}

/// Fail unless `repo` holds exactly `expected` units of `type_id`
pub fn expect_unit_count(repo: &Repository, type_id: &TypeId, expected: u64) -> Result<()> {
    expect_eq(
        &format!("{} count of {}", type_id, repo.id),
        expected,
        repo.unit_count(type_id),
    )
}

/// Unwrap the task that made `result` fail
///
/// Succeeding is an assertion failure; errors other than a failed task are
/// passed through unchanged.
pub fn expect_task_failure<T: Debug>(what: &str, result: Result<T>) -> Result<Task> {
    match result {
        Err(Error::TaskFailed { task, .. }) => Ok(*task),
        Err(e) => Err(e),
        Ok(value) => Err(Error::Assertion {
            what: what.to_string(),
            expected: "a failed task".to_string(),
            actual: format!("success: {value:?}"),
        }),
    }
}

/// Fail unless `result` is an HTTP 404
pub fn expect_not_found<T: Debug>(what: &str, result: Result<T>) -> Result<()> {
    match result {
        Err(e) if e.is_not_found() => Ok(()),
        Err(e) => Err(Error::Assertion {
            what: what.to_string(),
            expected: "HTTP 404".to_string(),
            actual: e.to_string(),
        }),
        Ok(value) => Err(Error::Assertion {
            what: what.to_string(),
            expected: "HTTP 404".to_string(),
            actual: format!("success: {value:?}"),
        }),
    }
}
