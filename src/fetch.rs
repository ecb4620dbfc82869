//! Resource fetching: the `Fetcher` seam plus file and HTTP
//! implementations, `Link` header extraction, and content-type parsing.
//!
//! Discovery and the reader only ever talk to [`Fetcher`], so callers can
//! substitute their own transport (tests use an in-memory map). The
//! default implementation resolves `file:` URLs against the local
//! filesystem and everything else through a `ureq` agent with a global
//! timeout.

use std::{collections::HashMap, time::Duration};

use url::Url;

use crate::error::{Error, Result};

pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const METADATA_ACCEPT: &str = "application/ld+json, application/json";

/// Parsed `Content-Type` with the parameters CSVW cares about.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ContentType {
    pub media_type: String,
    pub charset: Option<String>,
    pub header_absent: bool,
}

impl ContentType {
    pub fn parse(raw: &str) -> Self {
        let mut parts = raw.split(';');
        let media_type = parts.next().unwrap_or("").trim().to_ascii_lowercase();
        let mut parsed = ContentType {
            media_type,
            ..ContentType::default()
        };
        for part in parts {
            let Some((key, value)) = part.split_once('=') else {
                continue;
            };
            let value = value.trim().trim_matches('"');
            match key.trim().to_ascii_lowercase().as_str() {
                "charset" => parsed.charset = Some(value.to_string()),
                "header" => parsed.header_absent = value.eq_ignore_ascii_case("absent"),
                _ => {}
            }
        }
        parsed
    }

    pub fn is_tsv(&self) -> bool {
        self.media_type == "text/tab-separated-values"
    }
}

/// A fetched resource with the response metadata discovery needs.
#[derive(Debug, Clone, Default)]
pub struct Fetched {
    pub url: String,
    pub body: Vec<u8>,
    pub content_type: Option<ContentType>,
    /// Targets of `Link: rel="describedby"` headers, unresolved.
    pub describedby: Vec<String>,
}

pub trait Fetcher {
    /// Fetches `url`, sending `accept` when the transport supports it.
    fn fetch(&self, url: &Url, accept: Option<&str>) -> Result<Fetched>;
}

/// Extracts `rel="describedby"` targets from a `Link` header value.
pub fn describedby_links(header: &str) -> Vec<String> {
    let mut out = Vec::new();
    for part in header.split(',') {
        let mut segments = part.split(';');
        let Some(target) = segments.next() else { continue };
        let target = target.trim();
        if !(target.starts_with('<') && target.ends_with('>')) {
            continue;
        }
        let is_describedby = segments.any(|param| {
            let Some((key, value)) = param.split_once('=') else {
                return false;
            };
            key.trim().eq_ignore_ascii_case("rel")
                && value.trim().trim_matches('"').eq_ignore_ascii_case("describedby")
        });
        if is_describedby {
            out.push(target[1..target.len() - 1].to_string());
        }
    }
    out
}

/// File-system and HTTP fetcher used when the caller supplies nothing.
pub struct DefaultFetcher {
    agent: ureq::Agent,
}

impl DefaultFetcher {
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        let config = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .build();
        DefaultFetcher {
            agent: config.into(),
        }
    }
}

impl Default for DefaultFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Fetcher for DefaultFetcher {
    fn fetch(&self, url: &Url, accept: Option<&str>) -> Result<Fetched> {
        if url.scheme() == "file" {
            let path = url
                .to_file_path()
                .map_err(|_| Error::io(format!("'{url}' is not a usable file URL")))?;
            let body = std::fs::read(&path)
                .map_err(|err| Error::io(format!("reading {}: {err}", path.display())))?;
            return Ok(Fetched {
                url: url.to_string(),
                body,
                content_type: None,
                describedby: Vec::new(),
            });
        }

        let mut request = self.agent.get(url.as_str());
        if let Some(accept) = accept {
            request = request.header("Accept", accept);
        }
        let mut response = request
            .call()
            .map_err(|err| Error::io(format!("fetching {url}: {err}")))?;

        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|value| value.to_str().ok())
            .map(ContentType::parse);
        let describedby = response
            .headers()
            .get_all("link")
            .iter()
            .filter_map(|value| value.to_str().ok())
            .flat_map(describedby_links)
            .collect();
        let body = response
            .body_mut()
            .read_to_vec()
            .map_err(|err| Error::io(format!("reading body of {url}: {err}")))?;

        Ok(Fetched {
            url: url.to_string(),
            body,
            content_type,
            describedby,
        })
    }
}

/// In-memory fetcher for tests and embedded use.
#[derive(Debug, Default)]
pub struct MapFetcher {
    resources: HashMap<String, Fetched>,
}

impl MapFetcher {
    pub fn new() -> Self {
        MapFetcher::default()
    }

    pub fn insert(&mut self, url: &str, body: impl Into<Vec<u8>>) -> &mut Self {
        self.resources.insert(
            url.to_string(),
            Fetched {
                url: url.to_string(),
                body: body.into(),
                ..Fetched::default()
            },
        );
        self
    }

    pub fn insert_full(&mut self, fetched: Fetched) -> &mut Self {
        self.resources.insert(fetched.url.clone(), fetched);
        self
    }
}

impl Fetcher for MapFetcher {
    fn fetch(&self, url: &Url, _accept: Option<&str>) -> Result<Fetched> {
        self.resources
            .get(url.as_str())
            .cloned()
            .ok_or_else(|| Error::io(format!("no resource at {url}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_type_parameters() {
        let ct = ContentType::parse("text/csv; charset=UTF-8; header=absent");
        assert_eq!(ct.media_type, "text/csv");
        assert_eq!(ct.charset.as_deref(), Some("UTF-8"));
        assert!(ct.header_absent);

        let ct = ContentType::parse("text/tab-separated-values");
        assert!(ct.is_tsv());
        assert!(!ct.header_absent);
    }

    #[test]
    fn link_header_extraction() {
        let links = describedby_links(
            "<meta.json>; rel=\"describedby\"; type=\"application/csvm+json\", <other>; rel=\"next\"",
        );
        assert_eq!(links, vec!["meta.json"]);
        assert!(describedby_links("<x>; rel=\"stylesheet\"").is_empty());
    }

    #[test]
    fn map_fetcher_round_trip() {
        let mut fetcher = MapFetcher::new();
        fetcher.insert("http://example.org/data.csv", "a,b\n1,2\n");
        let url = Url::parse("http://example.org/data.csv").unwrap();
        let fetched = fetcher.fetch(&url, None).unwrap();
        assert_eq!(fetched.body, b"a,b\n1,2\n");
        let missing = Url::parse("http://example.org/missing.csv").unwrap();
        assert!(fetcher.fetch(&missing, None).is_err());
    }
}
