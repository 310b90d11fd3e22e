// SPDX-License-Identifier: MPL-2.0
//! Pipeline configuration.
//!
//! Every value has a usable default; the binary maps its command line (and `WIKIBIAS_*`
//! environment variables) onto these types.

use std::{path::PathBuf, time::Duration};

use crate::significance::SignificanceFilter;

pub const DEFAULT_DB_PATH: &str = "data/wiki.db";
pub const DEFAULT_USER_AGENT: &str = concat!("wikibias/", env!("CARGO_PKG_VERSION"));
pub const DEFAULT_CLASSIFIER_ENDPOINT: &str = "http://127.0.0.1:8000";

pub const DEFAULT_TOPIC_LABELS: &[&str] = &[
    "Politics",
    "International Relations",
    "Conflict",
    "Geography",
    "History",
    "Culture",
    "Economy",
    "Technology",
    "Social Issues",
    "Biography",
    "Science",
    "Arts",
    "Sports",
    "Neutral",
    "Propaganda",
];

pub const DEFAULT_STANCE_LABELS: &[&str] = &[
    "Left-leaning",
    "Right-leaning",
    "Centrist",
    "Pro-government",
    "Anti-government",
    "Nationalist",
    "Neutral",
];

#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub user_agent: String,
    pub request_timeout: Duration,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            request_timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    /// Base URLs of the inference services. Worker bound to device `d` uses
    /// `endpoints[d % endpoints.len()]`.
    pub endpoints: Vec<String>,
    pub request_timeout: Duration,
    pub topic_labels: Vec<String>,
    pub stance_labels: Vec<String>,
}

impl ClassifierConfig {
    pub fn endpoint_for(&self, device: Option<usize>) -> Option<&str> {
        if self.endpoints.is_empty() {
            return None;
        }
        let index = device.unwrap_or(0) % self.endpoints.len();
        Some(self.endpoints[index].as_str())
    }
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            endpoints: vec![DEFAULT_CLASSIFIER_ENDPOINT.to_string()],
            request_timeout: Duration::from_secs(120),
            topic_labels: DEFAULT_TOPIC_LABELS.iter().map(|s| s.to_string()).collect(),
            stance_labels: DEFAULT_STANCE_LABELS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub db_path: PathBuf,
    /// process at most this many articles
    pub limit: Option<usize>,
    pub workers_per_device: usize,
    /// overrides accelerator detection when set
    pub devices: Option<usize>,
    /// how long a writer waits for a locked database before giving up on a record
    pub lock_timeout: Duration,
    pub filter: SignificanceFilter,
    pub source: SourceConfig,
    pub classifier: ClassifierConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from(DEFAULT_DB_PATH),
            limit: None,
            workers_per_device: 1,
            devices: None,
            lock_timeout: Duration::from_secs(30),
            filter: SignificanceFilter::default(),
            source: SourceConfig::default(),
            classifier: ClassifierConfig::default(),
        }
    }
}
