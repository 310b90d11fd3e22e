// SPDX-License-Identifier: MPL-2.0
//! Persisted records.

use std::net::IpAddr;

/// An article of the corpus, created during corpus discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Article {
    pub url: String,
    /// geometry as text, e.g. `POINT(120.97 24.80)`
    pub coord: Option<String>,
}

impl Article {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            coord: None,
        }
    }
}

/// One classified, significant change of one revision.
#[derive(Debug, Clone, PartialEq)]
pub struct RevisionChange {
    /// `{revision}-{sequence:04}`, see [`change_id`]
    pub id: String,
    pub original_revision_id: i64,
    pub article_url: String,
    pub author: String,
    pub timestamp: String,
    pub before_text: String,
    pub after_text: String,
    pub change_type: String,
    pub change_description: String,
    pub bias_score_before: f64,
    pub bias_score_after: f64,
    pub bias_label_before: String,
    pub bias_label_after: String,
    pub ai_topic: String,
    pub ai_stance: String,
    pub is_ip_author: bool,
    pub classification_context: String,
}

impl RevisionChange {
    pub fn bias_delta(&self) -> f64 {
        self.bias_score_after - self.bias_score_before
    }
}

/// Identifier of the `sequence`-th surviving change of a revision. Sequences start at 1.
pub fn change_id(revision_id: i64, sequence: u32) -> String {
    format!("{revision_id}-{sequence:04}")
}

/// Anonymous edits are attributed to the editor's IPv4 or IPv6 address.
pub fn is_ip_address(author: &str) -> bool {
    let author = author.trim();
    let author = author
        .strip_prefix('[')
        .and_then(|a| a.strip_suffix(']'))
        .unwrap_or(author);
    author.parse::<IpAddr>().is_ok()
}
