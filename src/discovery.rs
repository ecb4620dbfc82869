//! Metadata discovery: ordering, fetching, and gating of the sources that
//! can describe a CSV.
//!
//! For a CSV entry point the candidate list runs, highest precedence
//! first: programmatic user metadata, `Link: rel="describedby"` targets,
//! then the site-wide `/.well-known/csvm` templates (whose default body
//! yields `{+url}-metadata.json` and the sibling `csv-metadata.json`).
//! The first located document that passes the compatibility gate (one of
//! its tables resolves to the CSV URL) wins; everything else is a `warn!`
//! and never an error. Embedded metadata is merged later by the reader,
//! once the effective dialect is known.

use log::warn;
use serde_json::Value;
use url::Url;

use crate::{
    error::{Result, Warning},
    fetch::{Fetched, Fetcher, METADATA_ACCEPT},
    merge,
    metadata::{self, TableGroup},
    uri_template,
};

/// Role a consumed source played, for provenance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceRole {
    CsvData,
    Metadata,
}

#[derive(Debug, Clone)]
pub struct UsedSource {
    pub url: String,
    pub role: SourceRole,
}

/// Everything discovery learned from a CSV entry point.
pub struct CsvDiscovery {
    pub csv: Fetched,
    /// User and located metadata, already left-merged (user wins). `None`
    /// when only embedded metadata will describe the table.
    pub group: Option<TableGroup>,
    pub sources: Vec<UsedSource>,
}

const WELL_KNOWN_DEFAULT: &str = "{+url}-metadata.json\ncsv-metadata.json";

/// Runs the discovery chain for a CSV URL. `link_override`, when given,
/// replaces the response's `Link` header wholesale.
pub fn discover_for_csv(
    csv_url: &Url,
    user_metadata: Option<&Value>,
    link_override: Option<&str>,
    fetcher: &dyn Fetcher,
    warnings: &mut Vec<Warning>,
) -> Result<CsvDiscovery> {
    let mut csv = fetcher.fetch(csv_url, Some("text/csv"))?;
    if let Some(link) = link_override {
        csv.describedby = crate::fetch::describedby_links(link);
    }
    let mut sources = vec![UsedSource {
        url: csv.url.clone(),
        role: SourceRole::CsvData,
    }];

    let user_group = match user_metadata {
        Some(json) => Some(metadata::parse_document(json, csv_url, warnings)?),
        None => None,
    };
    if let Some(group) = &user_group
        && !is_compatible(group, csv_url)
    {
        warnings.push(Warning::new(format!(
            "user metadata does not describe {csv_url}"
        )));
    }

    let located = locate_metadata(csv_url, &csv, fetcher, warnings, &mut sources);

    let group = match (user_group, located) {
        (Some(user), Some(found)) => Some(merge::merge(user, found)),
        (user, found) => user.or(found),
    };
    Ok(CsvDiscovery {
        csv,
        group,
        sources,
    })
}

/// Loads an authoritative metadata document (the metadata-URL entry
/// point). User metadata still merges on top.
pub fn load_metadata_url(
    metadata_url: &Url,
    user_metadata: Option<&Value>,
    fetcher: &dyn Fetcher,
    warnings: &mut Vec<Warning>,
    sources: &mut Vec<UsedSource>,
) -> Result<TableGroup> {
    let fetched = fetcher.fetch(metadata_url, Some(METADATA_ACCEPT))?;
    let json: Value = serde_json::from_slice(&fetched.body)?;
    let located = metadata::parse_document(&json, metadata_url, warnings)?;
    sources.push(UsedSource {
        url: fetched.url,
        role: SourceRole::Metadata,
    });

    Ok(match user_metadata {
        Some(json) => {
            let user = metadata::parse_document(json, metadata_url, warnings)?;
            merge::merge(user, located)
        }
        None => located,
    })
}

fn locate_metadata(
    csv_url: &Url,
    csv: &Fetched,
    fetcher: &dyn Fetcher,
    warnings: &mut Vec<Warning>,
    sources: &mut Vec<UsedSource>,
) -> Option<TableGroup> {
    for candidate in candidate_urls(csv_url, csv, fetcher) {
        let fetched = match fetcher.fetch(&candidate, Some(METADATA_ACCEPT)) {
            Ok(fetched) => fetched,
            Err(err) => {
                warn!("no metadata at {candidate}: {err}");
                continue;
            }
        };
        let json: Value = match serde_json::from_slice(&fetched.body) {
            Ok(json) => json,
            Err(err) => {
                warnings.push(Warning::new(format!(
                    "metadata at {candidate} is not valid JSON: {err}"
                )));
                continue;
            }
        };
        let group = match metadata::parse_document(&json, &candidate, warnings) {
            Ok(group) => group,
            Err(err) => {
                warnings.push(Warning::new(format!(
                    "metadata at {candidate} was skipped: {err}"
                )));
                continue;
            }
        };
        if !is_compatible(&group, csv_url) {
            warnings.push(Warning::new(format!(
                "metadata at {candidate} does not describe {csv_url}; ignored"
            )));
            continue;
        }
        sources.push(UsedSource {
            url: fetched.url,
            role: SourceRole::Metadata,
        });
        return Some(group);
    }
    None
}

/// Candidate metadata URLs in precedence order.
fn candidate_urls(csv_url: &Url, csv: &Fetched, fetcher: &dyn Fetcher) -> Vec<Url> {
    let mut candidates = Vec::new();
    for target in &csv.describedby {
        match csv_url.join(target) {
            Ok(resolved) => candidates.push(resolved),
            Err(err) => warn!("ignoring Link target '{target}': {err}"),
        }
    }

    let template_body = well_known_body(csv_url, fetcher);
    for line in template_body.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let expanded = match uri_template::expand(line, |name| {
            (name == "url").then(|| csv_url.to_string())
        }) {
            Ok(expanded) => expanded,
            Err(err) => {
                warn!("ignoring well-known template '{line}': {err}");
                continue;
            }
        };
        match csv_url.join(&expanded) {
            Ok(resolved) => candidates.push(resolved),
            Err(err) => warn!("ignoring well-known expansion '{expanded}': {err}"),
        }
    }
    candidates
}

fn well_known_body(csv_url: &Url, fetcher: &dyn Fetcher) -> String {
    let Ok(well_known) = csv_url.join("/.well-known/csvm") else {
        return WELL_KNOWN_DEFAULT.to_string();
    };
    match fetcher.fetch(&well_known, None) {
        Ok(fetched) => String::from_utf8(fetched.body)
            .unwrap_or_else(|_| WELL_KNOWN_DEFAULT.to_string()),
        Err(_) => WELL_KNOWN_DEFAULT.to_string(),
    }
}

/// The compatibility gate: some table must resolve to the CSV URL.
fn is_compatible(group: &TableGroup, csv_url: &Url) -> bool {
    group
        .tables
        .iter()
        .any(|table| table.url == csv_url.as_str())
}

/// Ensures a discovered group actually carries the table for `csv_url`,
/// appending a bare table description when only user metadata of another
/// shape was given.
pub fn ensure_table(group: &mut TableGroup, csv_url: &Url) {
    if !is_compatible(group, csv_url) {
        group.tables.push(metadata::Table {
            url: csv_url.to_string(),
            ..metadata::Table::default()
        });
    }
}
