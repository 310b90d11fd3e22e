// SPDX-License-Identifier: MPL-2.0
//! Bias, topic and stance classification.
//!
//! The models run behind an inference service; [`ClassificationBackend`] is the raw boundary
//! to it and [`ClassificationClient`] adds the policy on top: empty input never reaches the
//! service, bias buckets are folded into one score, and failures degrade to neutral labels.

use serde::{Deserialize, Serialize};

use crate::config::ClassifierConfig;

pub const NEUTRAL_LABEL: &str = "Neutral";
pub const SLIGHTLY_BIASED_LABEL: &str = "Slightly Biased";
pub const HIGHLY_BIASED_LABEL: &str = "Highly Biased";
/// Topic or stance that could not be determined.
pub const UNAVAILABLE_LABEL: &str = "N/A";

#[derive(Debug, thiserror::Error)]
pub enum ClassifierError {
    #[error("request to the classification service failed")]
    Http(#[from] reqwest::Error),
    #[error("classification service returned no usable labels")]
    Empty,
    #[error("invalid classifier endpoint: {0}")]
    InvalidEndpoint(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelScore {
    pub label: String,
    pub score: f64,
}

/// Raw access to the models.
pub trait ClassificationBackend {
    /// Probability per bias level.
    fn bias_distribution(&self, text: &str) -> Result<Vec<LabelScore>, ClassifierError>;

    /// `candidate_labels` ranked best first.
    fn rank_labels(
        &self,
        text: &str,
        candidate_labels: &[String],
    ) -> Result<Vec<String>, ClassifierError>;
}

/// Probability mass over the three bias levels.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BiasDistribution {
    pub neutral: f64,
    pub slight: f64,
    pub high: f64,
}

impl BiasDistribution {
    /// Accepts both the human readable labels and the raw `LABEL_n` ids of the model.
    /// Unknown labels are ignored.
    pub fn from_labels(scores: &[LabelScore]) -> Result<Self, ClassifierError> {
        let mut distribution = Self::default();
        let mut known = false;
        for LabelScore { label, score } in scores {
            let bucket = match label.to_ascii_lowercase().as_str() {
                "neutral" | "label_0" => &mut distribution.neutral,
                "slightly biased" | "label_1" => &mut distribution.slight,
                "highly biased" | "label_2" => &mut distribution.high,
                _ => continue,
            };
            *bucket += score;
            known = true;
        }

        if known {
            Ok(distribution)
        } else {
            Err(ClassifierError::Empty)
        }
    }

    pub fn score(&self) -> f64 {
        (0.5 * self.slight + self.high).clamp(0.0, 1.0)
    }

    /// The most probable level; ties go to the less biased one.
    pub fn label(&self) -> &'static str {
        let mut best = (NEUTRAL_LABEL, self.neutral);
        for candidate in [
            (SLIGHTLY_BIASED_LABEL, self.slight),
            (HIGHLY_BIASED_LABEL, self.high),
        ] {
            if candidate.1 > best.1 {
                best = candidate;
            }
        }
        best.0
    }
}

/// Classification with the degradation policy of the pipeline: none of these calls fail.
#[derive(Debug, Clone)]
pub struct ClassificationClient<B> {
    backend: B,
}

impl<B: ClassificationBackend> ClassificationClient<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Bias score in `[0, 1]` and the most probable bias label.
    pub fn score_bias(&self, text: &str) -> (f64, String) {
        if text.trim().is_empty() {
            return (0.0, NEUTRAL_LABEL.to_string());
        }

        let result = self
            .backend
            .bias_distribution(text)
            .and_then(|scores| BiasDistribution::from_labels(&scores));
        match result {
            Ok(distribution) => (distribution.score(), distribution.label().to_string()),
            Err(error) => {
                tracing::warn!(message = "Bias scoring failed, assuming neutral", %error);
                (0.0, NEUTRAL_LABEL.to_string())
            }
        }
    }

    pub fn classify_topic(&self, text: &str, candidate_labels: &[String]) -> String {
        self.top_label(text, candidate_labels, "topic")
    }

    pub fn classify_stance(&self, text: &str, candidate_labels: &[String]) -> String {
        self.top_label(text, candidate_labels, "stance")
    }

    fn top_label(&self, text: &str, candidate_labels: &[String], axis: &'static str) -> String {
        if text.trim().is_empty() || candidate_labels.is_empty() {
            return UNAVAILABLE_LABEL.to_string();
        }

        let result = self
            .backend
            .rank_labels(text, candidate_labels)
            .and_then(|ranked| ranked.into_iter().next().ok_or(ClassifierError::Empty));
        match result {
            Ok(label) => label,
            Err(error) => {
                tracing::warn!(message = "Zero-shot classification failed", axis, %error);
                UNAVAILABLE_LABEL.to_string()
            }
        }
    }
}

#[derive(Debug, Serialize)]
struct BiasRequest<'a> {
    inputs: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum BiasResponse {
    Flat(Vec<LabelScore>),
    // text-classification pipelines wrap single inputs in a batch
    Nested(Vec<Vec<LabelScore>>),
}

#[derive(Debug, Serialize)]
struct ZeroShotRequest<'a> {
    inputs: &'a str,
    parameters: ZeroShotParameters<'a>,
}

#[derive(Debug, Serialize)]
struct ZeroShotParameters<'a> {
    candidate_labels: &'a [String],
}

#[derive(Debug, Deserialize)]
struct ZeroShotResponse {
    labels: Vec<String>,
    #[allow(dead_code)]
    #[serde(default)]
    scores: Vec<f64>,
}

/// Backend talking JSON to an inference server exposing `POST /bias` and `POST /zero-shot`.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    http: reqwest::blocking::Client,
    bias_url: url::Url,
    zero_shot_url: url::Url,
}

impl HttpBackend {
    pub fn new(endpoint: &str, config: &ClassifierConfig) -> Result<Self, ClassifierError> {
        let invalid = || ClassifierError::InvalidEndpoint(endpoint.to_string());
        let base = url::Url::parse(&format!("{}/", endpoint.trim_end_matches('/')))
            .map_err(|_| invalid())?;

        let http = reqwest::blocking::Client::builder()
            .timeout(config.request_timeout)
            .build()?;

        Ok(Self {
            http,
            bias_url: base.join("bias").map_err(|_| invalid())?,
            zero_shot_url: base.join("zero-shot").map_err(|_| invalid())?,
        })
    }
}

impl ClassificationBackend for HttpBackend {
    fn bias_distribution(&self, text: &str) -> Result<Vec<LabelScore>, ClassifierError> {
        let response: BiasResponse = self
            .http
            .post(self.bias_url.clone())
            .json(&BiasRequest { inputs: text })
            .send()?
            .error_for_status()?
            .json()?;

        Ok(match response {
            BiasResponse::Flat(scores) => scores,
            BiasResponse::Nested(batches) => batches.into_iter().next().unwrap_or_default(),
        })
    }

    fn rank_labels(
        &self,
        text: &str,
        candidate_labels: &[String],
    ) -> Result<Vec<String>, ClassifierError> {
        let response: ZeroShotResponse = self
            .http
            .post(self.zero_shot_url.clone())
            .json(&ZeroShotRequest {
                inputs: text,
                parameters: ZeroShotParameters { candidate_labels },
            })
            .send()?
            .error_for_status()?
            .json()?;

        Ok(response.labels)
    }
}
