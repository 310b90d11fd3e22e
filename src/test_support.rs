// SPDX-License-Identifier: MPL-2.0
//! Fakes for the external services and builders for test data.

use std::{
    collections::{HashMap, HashSet},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
};

use chrono::DateTime;

use crate::{
    classify::{ClassificationBackend, ClassifierError, LabelScore},
    model::{change_id, RevisionChange},
    revision_source::{RevisionSnapshot, RevisionSource, SourceError},
};

pub mod prelude {
    pub(crate) use super::{revision_change, snapshot, MemorySource, ScriptedBackend};
}

pub fn dummy_snapshot() -> RevisionSnapshot {
    RevisionSnapshot {
        revision_id: 0,
        author: "Dummy".into(),
        timestamp: DateTime::from_timestamp_nanos(0),
        content: String::new(),
    }
}

pub fn snapshot(revision_id: i64, content: &str) -> RevisionSnapshot {
    RevisionSnapshot {
        revision_id,
        timestamp: DateTime::from_timestamp(1_700_000_000 + revision_id, 0).unwrap(),
        content: content.to_string(),
        ..dummy_snapshot()
    }
}

pub fn revision_change(article_url: &str, revision_id: i64, sequence: u32) -> RevisionChange {
    RevisionChange {
        id: change_id(revision_id, sequence),
        original_revision_id: revision_id,
        article_url: article_url.to_string(),
        author: "Dummy".to_string(),
        timestamp: "2024-01-01T00:00:00Z".to_string(),
        before_text: String::new(),
        after_text: "Inserted sentence.".to_string(),
        change_type: "Text:Sentence:Insert".to_string(),
        change_description: "Inserted Sentence".to_string(),
        bias_score_before: 0.0,
        bias_score_after: 0.5,
        bias_label_before: "Neutral".to_string(),
        bias_label_after: "Slightly Biased".to_string(),
        ai_topic: "Politics".to_string(),
        ai_stance: "Neutral".to_string(),
        is_ip_author: false,
        classification_context: "Inserted sentence.".to_string(),
    }
}

/// Revision histories keyed by article URL. Unknown articles are not found.
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    histories: HashMap<String, Vec<RevisionSnapshot>>,
    broken: HashSet<String>,
    requests: Arc<Mutex<Vec<String>>>,
}

impl MemorySource {
    /// `revisions` newest first, as the API returns them.
    pub fn with_history(mut self, article_url: &str, revisions: Vec<RevisionSnapshot>) -> Self {
        self.histories.insert(article_url.to_string(), revisions);
        self
    }

    /// Fetching this article fails with a garbled API response.
    pub fn with_broken(mut self, article_url: &str) -> Self {
        self.broken.insert(article_url.to_string());
        self
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

impl RevisionSource for MemorySource {
    fn fetch_revision_history(
        &self,
        article_url: &str,
    ) -> Result<Vec<RevisionSnapshot>, SourceError> {
        self.requests.lock().unwrap().push(article_url.to_string());
        if self.broken.contains(article_url) {
            return Err(SourceError::MalformedResponse(
                "unexpected end of JSON input".to_string(),
            ));
        }
        self.histories
            .get(article_url)
            .cloned()
            .ok_or_else(|| SourceError::NotFound {
                title: article_url.to_string(),
            })
    }
}

/// Classification backend with canned answers.
///
/// Text containing a registered phrase gets that phrase's bias score (as a mix of the neutral
/// and highly biased buckets); everything else is fully neutral. Zero-shot calls return the
/// configured ranking, or the candidates in the given order.
#[derive(Debug, Clone, Default)]
pub struct ScriptedBackend {
    bias: Vec<(String, f64)>,
    ranking: Vec<String>,
    failing: bool,
    calls: Arc<AtomicUsize>,
}

impl ScriptedBackend {
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    pub fn with_bias(mut self, phrase: &str, score: f64) -> Self {
        self.bias.push((phrase.to_string(), score));
        self
    }

    pub fn with_ranking(mut self, labels: &[&str]) -> Self {
        self.ranking = labels.iter().map(|l| l.to_string()).collect();
        self
    }

    /// Number of backend calls so far, shared between clones.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn call(&self) -> Result<(), ClassifierError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing {
            Err(ClassifierError::Empty)
        } else {
            Ok(())
        }
    }
}

impl ClassificationBackend for ScriptedBackend {
    fn bias_distribution(&self, text: &str) -> Result<Vec<LabelScore>, ClassifierError> {
        self.call()?;
        let score = self
            .bias
            .iter()
            .find(|(phrase, _)| text.contains(phrase.as_str()))
            .map_or(0.0, |(_, score)| *score);
        Ok(vec![
            LabelScore {
                label: "Neutral".to_string(),
                score: 1.0 - score,
            },
            LabelScore {
                label: "Highly Biased".to_string(),
                score,
            },
        ])
    }

    fn rank_labels(
        &self,
        _text: &str,
        candidate_labels: &[String],
    ) -> Result<Vec<String>, ClassifierError> {
        self.call()?;
        if self.ranking.is_empty() {
            Ok(candidate_labels.to_vec())
        } else {
            Ok(self.ranking.clone())
        }
    }
}
