// src/repodata.rs

//! Published yum metadata inspection
//!
//! After a publish, the distributor serves `repodata/repomd.xml` below the
//! publish root and its relative URL, with packages under
//! `Packages/<first letter>/`. Only the `<data type="...">` index of repomd
//! is read here: each entry's location and checksum type.

use crate::api::ApiClient;
use crate::content::Distributor;
use crate::error::{Error, Result};
use quick_xml::events::{BytesStart, Event};
use quick_xml::name::{Namespace, ResolveResult};
use quick_xml::reader::NsReader;
use std::collections::BTreeSet;
use tracing::debug;

/// Namespace of `repomd.xml` elements
pub const REPO_NAMESPACE: &str = "http://linux.duke.edu/metadata/repo";

/// One `<data>` entry of a repomd index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataEntry {
    pub data_type: String,
    /// `href` of the nested `<location>`, relative to the repository root
    pub location: Option<String>,
    /// `type` of the nested `<checksum>`, e.g. `sha256`
    pub checksum_type: Option<String>,
}

/// Parsed `repomd.xml`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepoMd {
    pub entries: Vec<DataEntry>,
}

impl RepoMd {
    /// Parse a repomd document
    ///
    /// Elements outside [`REPO_NAMESPACE`] are ignored.
    pub fn parse(xml: &str) -> Result<Self> {
        let mut reader = NsReader::from_str(xml);
        reader.trim_text(true);

        let mut entries: Vec<DataEntry> = Vec::new();
        let mut in_data = false;

        loop {
            match reader.read_resolved_event() {
                Ok((ResolveResult::Bound(Namespace(ns)), Event::Start(e)))
                    if ns == REPO_NAMESPACE.as_bytes() =>
                {
                    match e.local_name().as_ref() {
                        b"data" => {
                            entries.push(data_entry(&e)?);
                            in_data = true;
                        }
                        b"checksum" if in_data => {
                            if let Some(entry) = entries.last_mut() {
                                entry.checksum_type = attribute(&e, "type")?;
                            }
                        }
                        _ => {}
                    }
                }
                Ok((ResolveResult::Bound(Namespace(ns)), Event::Empty(e)))
                    if ns == REPO_NAMESPACE.as_bytes() =>
                {
                    match e.local_name().as_ref() {
                        b"data" => entries.push(data_entry(&e)?),
                        b"location" if in_data => {
                            if let Some(entry) = entries.last_mut() {
                                entry.location = attribute(&e, "href")?;
                            }
                        }
                        _ => {}
                    }
                }
                Ok((_, Event::End(e))) => {
                    if e.local_name().as_ref() == b"data" {
                        in_data = false;
                    }
                }
                Ok((_, Event::Eof)) => break,
                Err(e) => {
                    return Err(Error::ParseError(format!("Malformed repomd.xml: {}", e)));
                }
                _ => {}
            }
        }

        Ok(Self { entries })
    }

    /// Data types in document order
    pub fn data_types(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.data_type.as_str()).collect()
    }

    pub fn has_type(&self, data_type: &str) -> bool {
        self.entries.iter().any(|e| e.data_type == data_type)
    }

    /// Distinct checksum types across entries
    pub fn checksum_types(&self) -> BTreeSet<&str> {
        self.entries
            .iter()
            .filter_map(|e| e.checksum_type.as_deref())
            .collect()
    }
}

fn attribute(element: &BytesStart<'_>, name: &str) -> Result<Option<String>> {
    let attr = element
        .try_get_attribute(name)
        .map_err(|e| Error::ParseError(format!("Bad '{}' attribute in repomd.xml: {}", name, e)))?;
    match attr {
        Some(attr) => {
            let value = attr
                .unescape_value()
                .map_err(|e| Error::ParseError(format!("Bad '{}' value in repomd.xml: {}", name, e)))?;
            Ok(Some(value.into_owned()))
        }
        None => Ok(None),
    }
}

fn data_entry(element: &BytesStart<'_>) -> Result<DataEntry> {
    let data_type = attribute(element, "type")?
        .ok_or_else(|| Error::ParseError("repomd.xml <data> without a type".to_string()))?;
    Ok(DataEntry {
        data_type,
        location: None,
        checksum_type: None,
    })
}

/// Server path of what `distributor` publishes, ending in `/`
///
/// `publish_path` is the server path distributors publish under, e.g.
/// `/pulp/repos/`.
pub fn published_root(publish_path: &str, distributor: &Distributor) -> Result<String> {
    let relative_url = distributor.relative_url().ok_or_else(|| {
        Error::ParseError(format!("Distributor {} has no relative_url", distributor.id))
    })?;
    Ok(format!(
        "{}/{}/",
        publish_path.trim_end_matches('/'),
        relative_url.trim_matches('/')
    ))
}

/// Path of a published package below `root`
pub fn package_href(root: &str, filename: &str) -> String {
    let letter: String = filename.chars().take(1).flat_map(char::to_lowercase).collect();
    format!("{root}Packages/{letter}/{filename}")
}

/// Fetch and parse the repomd published by `distributor`
pub fn fetch_repomd(client: &ApiClient, publish_path: &str, distributor: &Distributor) -> Result<RepoMd> {
    let href = format!("{}repodata/repomd.xml", published_root(publish_path, distributor)?);
    debug!("Fetching {}", href);
    RepoMd::parse(&client.get_text(&href)?)
}
