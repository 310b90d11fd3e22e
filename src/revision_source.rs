// SPDX-License-Identifier: MPL-2.0
//! Retrieval of an article's complete revision history from the MediaWiki action API.
//!
//! The API returns revisions page by page; every response may carry a `continue` object
//! whose keys must be sent back on the next request. [`MediaWikiClient`] follows those
//! tokens until they are absent and returns the whole history newest-first, so a failed
//! article can simply be fetched again from the start.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDateTime, Utc};
use compact_str::CompactString;
use serde::Deserialize;
use tracing::instrument;
use url::Url;

use crate::config::SourceConfig;

// Source: https://github.com/mediawiki-utilities/python-mwtypes/blob/523a93f98fe1372938fc15872b5abb1f267cc643/mwtypes/timestamp.py#L12
const TIMESTAMP_FORMAT_LONG: &str = "%Y-%m-%dT%H:%M:%SZ";
const TIMESTAMP_FORMAT_SHORT: &str = "%Y%m%d%H%M%S";

/// Placeholder for suppressed usernames.
pub const UNKNOWN_AUTHOR: &str = "N/A";

/// One revision as returned by the history API. Lives only while its article is processed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RevisionSnapshot {
    pub revision_id: i64,
    // aka. user
    pub author: CompactString,
    pub timestamp: DateTime<Utc>,
    pub content: String,
}

impl RevisionSnapshot {
    pub fn fingerprint(&self) -> blake3::Hash {
        blake3::hash(self.content.as_bytes())
    }

    /// The timestamp in MediaWiki's own ISO-8601 rendering (`2024-01-31T12:00:00Z`).
    pub fn timestamp_iso(&self) -> String {
        self.timestamp.format(TIMESTAMP_FORMAT_LONG).to_string()
    }
}

pub fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(text, TIMESTAMP_FORMAT_LONG)
        .or_else(|_| NaiveDateTime::parse_from_str(text, TIMESTAMP_FORMAT_SHORT))
        .map(|dt| DateTime::from_naive_utc_and_offset(dt, Utc))
        .ok()
}

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("article not found: {title}")]
    NotFound { title: String },
    #[error("request to the revision API failed")]
    Network(#[from] reqwest::Error),
    #[error("not a wiki article URL: {url}")]
    InvalidUrl { url: String },
    #[error("malformed API response: {0}")]
    MalformedResponse(String),
    #[error("revision without mandatory field `{0}`")]
    MalformedRevision(&'static str),
}

/// Where an article lives: the API endpoint of its wiki, its title and the wiki's language.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArticleLocation {
    pub api_url: Url,
    pub title: String,
    pub language: String,
}

impl ArticleLocation {
    /// Derive the location from a URL like `https://en.wikipedia.org/wiki/Hsinchu`.
    pub fn from_article_url(article_url: &str) -> Result<Self, SourceError> {
        let invalid = || SourceError::InvalidUrl {
            url: article_url.to_string(),
        };

        let url = Url::parse(article_url).map_err(|_| invalid())?;
        let host = url.host_str().ok_or_else(invalid)?;
        let segment = url
            .path_segments()
            .and_then(|mut segments| segments.next_back())
            .filter(|segment| !segment.is_empty())
            .ok_or_else(invalid)?;
        let title = urlencoding::decode(segment).map_err(|_| invalid())?;

        let language = host.split('.').next().unwrap_or_default().to_string();
        let api_url = url.join("/w/api.php").map_err(|_| invalid())?;

        Ok(Self {
            api_url,
            title: title.into_owned(),
            language,
        })
    }
}

pub trait RevisionSource {
    /// The complete revision history of the article, newest revision first.
    fn fetch_revision_history(
        &self,
        article_url: &str,
    ) -> Result<Vec<RevisionSnapshot>, SourceError>;
}

#[derive(Debug, Deserialize)]
pub(crate) struct QueryResponse {
    #[serde(default)]
    query: Option<QueryPages>,
    #[serde(default, rename = "continue")]
    continuation: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(default)]
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    info: String,
}

#[derive(Debug, Deserialize)]
struct QueryPages {
    #[serde(default)]
    pages: BTreeMap<String, ApiPage>,
}

#[derive(Debug, Deserialize)]
struct ApiPage {
    #[serde(default)]
    revisions: Vec<ApiRevision>,
    #[serde(default)]
    missing: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ApiRevision {
    revid: Option<i64>,
    user: Option<String>,
    timestamp: Option<String>,
    #[serde(default)]
    slots: Option<ApiSlots>,
    #[serde(default, rename = "*")]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiSlots {
    main: Option<ApiSlot>,
}

#[derive(Debug, Deserialize)]
struct ApiSlot {
    #[serde(default, rename = "*")]
    content: Option<String>,
}

#[derive(Debug)]
struct RevisionBuilder {
    id: Option<i64>,
    timestamp: Option<DateTime<Utc>>,
    author: Option<CompactString>,
    content: Option<String>,
}

#[derive(Debug, thiserror::Error)]
#[error("missing mandatory field: {0}")]
struct BuildRevisionError(&'static str, Box<RevisionBuilder>);

impl RevisionBuilder {
    fn from_api(revision: ApiRevision) -> Self {
        let timestamp = revision.timestamp.as_deref().and_then(|text| {
            let parsed = parse_timestamp(text);
            if parsed.is_none() {
                tracing::warn!(
                    message = "Found invalid revision timestamp",
                    timestamp = text,
                    revision = revision.revid
                );
            }
            parsed
        });

        let content = revision
            .slots
            .and_then(|slots| slots.main)
            .and_then(|main| main.content)
            .or(revision.content);

        Self {
            id: revision.revid,
            timestamp,
            author: revision.user.map(CompactString::from),
            content,
        }
    }

    fn try_build(self) -> Result<RevisionSnapshot, BuildRevisionError> {
        let (Some(revision_id), Some(timestamp)) = (self.id, self.timestamp) else {
            let field = if self.id.is_none() { "revid" } else { "timestamp" };
            return Err(BuildRevisionError(field, self.into()));
        };

        Ok(RevisionSnapshot {
            revision_id,
            timestamp,
            author: self
                .author
                .unwrap_or_else(|| CompactString::from(UNKNOWN_AUTHOR)),
            // deleted or hidden content diffs like an empty revision
            content: self.content.unwrap_or_default(),
        })
    }
}

/// The revisions contained in one API response, plus the parameters for the next request.
#[derive(Debug)]
pub(crate) struct RevisionBatch {
    pub revisions: Vec<RevisionSnapshot>,
    pub continuation: Option<Vec<(String, String)>>,
}

pub(crate) fn read_batch(response: QueryResponse, title: &str) -> Result<RevisionBatch, SourceError> {
    if let Some(error) = response.error {
        return Err(SourceError::MalformedResponse(format!(
            "{}: {}",
            error.code, error.info
        )));
    }

    let query = response
        .query
        .ok_or_else(|| SourceError::MalformedResponse("missing `query` object".to_string()))?;
    let Some((page_id, page)) = query.pages.into_iter().next() else {
        return Err(SourceError::MalformedResponse(
            "response contains no pages".to_string(),
        ));
    };
    if page_id == "-1" || page.missing.is_some() {
        return Err(SourceError::NotFound {
            title: title.to_string(),
        });
    }

    let mut revisions = Vec::with_capacity(page.revisions.len());
    for api_revision in page.revisions {
        match RevisionBuilder::from_api(api_revision).try_build() {
            Ok(revision) => revisions.push(revision),
            Err(BuildRevisionError(field, partial_revision)) => {
                tracing::error!(
                    message = "Missing mandatory field in revision",
                    field,
                    partial_revision = ?partial_revision.id,
                    title
                );
                if cfg!(feature = "strict") {
                    return Err(SourceError::MalformedRevision(field));
                } else {
                    tracing::warn!("Ignoring revision with missing mandatory field");
                }
            }
        }
    }

    let continuation = response.continuation.map(|map| {
        map.into_iter()
            .map(|(key, value)| {
                let value = match value {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                };
                (key, value)
            })
            .collect()
    });

    Ok(RevisionBatch {
        revisions,
        continuation,
    })
}

fn query_params(title: &str) -> Vec<(String, String)> {
    [
        ("action", "query"),
        ("prop", "revisions"),
        ("titles", title),
        ("rvprop", "timestamp|user|ids|content"),
        ("rvslots", "main"),
        ("rvlimit", "max"),
        ("format", "json"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}

fn apply_continuation(params: &mut Vec<(String, String)>, continuation: Vec<(String, String)>) {
    for (key, value) in continuation {
        if let Some(existing) = params.iter_mut().find(|(k, _)| *k == key) {
            existing.1 = value;
        } else {
            params.push((key, value));
        }
    }
}

/// Query the history of `title` page by page until no continuation is returned.
///
/// `request` sends one query with the given parameters. Revisions keep the API's order.
pub(crate) fn collect_history<F>(
    title: &str,
    mut request: F,
) -> Result<Vec<RevisionSnapshot>, SourceError>
where
    F: FnMut(&[(String, String)]) -> Result<QueryResponse, SourceError>,
{
    let mut params = query_params(title);
    let mut revisions = Vec::new();
    let mut requests = 0usize;
    loop {
        let response = request(&params)?;
        requests += 1;

        let batch = read_batch(response, title)?;
        revisions.extend(batch.revisions);

        match batch.continuation {
            Some(continuation) => apply_continuation(&mut params, continuation),
            None => break,
        }
    }

    tracing::debug!(
        message = "Fetched revision history",
        title,
        revisions = revisions.len(),
        requests
    );

    Ok(revisions)
}

/// Blocking client for the MediaWiki action API.
#[derive(Debug, Clone)]
pub struct MediaWikiClient {
    http: reqwest::blocking::Client,
}

impl MediaWikiClient {
    pub fn new(config: &SourceConfig) -> Result<Self, SourceError> {
        let http = reqwest::blocking::Client::builder()
            .user_agent(config.user_agent.as_str())
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self { http })
    }
}

impl RevisionSource for MediaWikiClient {
    #[instrument(skip(self))]
    fn fetch_revision_history(
        &self,
        article_url: &str,
    ) -> Result<Vec<RevisionSnapshot>, SourceError> {
        let location = ArticleLocation::from_article_url(article_url)?;
        collect_history(&location.title, |params| {
            Ok(self
                .http
                .get(location.api_url.clone())
                .query(params)
                .send()?
                .error_for_status()?
                .json()?)
        })
    }
}
