// SPDX-License-Identifier: MPL-2.0
//! # wikibias
//!
//! Extracts the edits made to Wikipedia articles over their revision history, scores each edit
//! for bias, topic and political stance, and stores the significant ones in SQLite for later
//! analysis.
//!
//! ## Overview
//!
//! For every article the pipeline
//!
//! 1. fetches the complete revision history from the MediaWiki API ([`revision_source`]),
//! 2. diffs every revision against the one before it into typed change units: changed template
//!    parameters, link targets and references, and inserted, removed or rewritten sentences
//!    ([`diff`], built on the markup scanner in [`wikitext`]),
//! 3. scores the plain text of both sides of every change for bias and keeps only changes that
//!    shifted the score or ended up biased ([`significance`]),
//! 4. cuts a window of surrounding text out of the revision ([`context`]) and classifies its
//!    topic and stance ([`classify`]),
//! 5. upserts one row per kept change, keyed by `{revision}-{sequence:04}` ([`store`]).
//!
//! Articles are split over a pool of isolated workers, one or more per accelerator device
//! ([`pool`]). Workers share nothing but the database file; every record is committed on its
//! own, so an interrupted run can simply be started again.
//!
//! ## Usage
//!
//! ```no_run
//! use wikibias::config::PipelineConfig;
//! use wikibias::pipeline::run_pipeline;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PipelineConfig {
//!         limit: Some(10),
//!         ..PipelineConfig::default()
//!     };
//!     let summary = run_pipeline(&config)?;
//!     println!("stored {} changes", summary.total.changes_stored);
//!     Ok(())
//! }
//! ```
//!
//! Single pieces can be used on their own, e.g. the diff extractor:
//!
//! ```
//! use wikibias::diff::{extract_changes, ChangeKind};
//!
//! let changes = extract_changes("A city.", "A city. A great city.", "en");
//! assert_eq!(changes[0].kind, ChangeKind::SentenceInsert);
//! ```
//!
//! ## Error handling
//!
//! Failures are contained where they happen: an unparsable revision yields no changes, a
//! failed classifier call yields neutral labels, a failed fetch skips the article and a failed
//! upsert skips the record. All of them are logged through `tracing`. Enable the `strict`
//! feature to turn malformed revisions in API responses into article-level errors instead of
//! skipping them.

pub mod classify;
pub mod config;
pub mod context;
pub mod diff;
#[cfg(test)]
mod integration_tests;
pub mod model;
pub mod pipeline;
pub mod pool;
pub mod revision_source;
pub mod significance;
pub mod store;
#[cfg(test)]
mod test_support;
pub mod wikitext;
