// SPDX-License-Identifier: MPL-2.0
//! Decides which change units are worth classifying and persisting.

use crate::wikitext;

pub const DEFAULT_DELTA_THRESHOLD: f64 = 0.1;
pub const DEFAULT_SCORE_THRESHOLD: f64 = 0.3;

/// A change is significant when its bias moved by more than `delta_threshold`, or when the
/// resulting text alone scores above `score_threshold`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignificanceFilter {
    pub delta_threshold: f64,
    pub score_threshold: f64,
}

impl Default for SignificanceFilter {
    fn default() -> Self {
        Self {
            delta_threshold: DEFAULT_DELTA_THRESHOLD,
            score_threshold: DEFAULT_SCORE_THRESHOLD,
        }
    }
}

impl SignificanceFilter {
    pub fn is_significant(&self, score_before: f64, score_after: f64) -> bool {
        (score_after - score_before).abs() > self.delta_threshold
            || score_after > self.score_threshold
    }
}

/// Plain text of both sides of a change, or `None` if nothing but markup or whitespace
/// remains on either side.
pub fn normalize_pair(before_text: &str, after_text: &str) -> Option<(String, String)> {
    let before = wikitext::strip_markup(before_text);
    let after = wikitext::strip_markup(after_text);
    if before.trim().is_empty() && after.trim().is_empty() {
        return None;
    }
    Some((before, after))
}
