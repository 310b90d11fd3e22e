// SPDX-License-Identifier: MPL-2.0
//! The per-worker processing loop and the orchestration of the worker pool.
//!
//! For every article a worker fetches the revision history, diffs each revision against the
//! next older one, drops insignificant changes, classifies the rest and upserts them. Errors
//! are contained at the smallest unit: a failed upsert skips one record, a failed fetch skips
//! one article, and only a worker that cannot open its store or clients gives up.

use std::ops::AddAssign;

use crate::{
    classify::{ClassificationBackend, ClassificationClient, ClassifierError, HttpBackend},
    config::PipelineConfig,
    context::build_context,
    diff::{extract_changes, ChangeUnit},
    model::{change_id, is_ip_address, Article, RevisionChange},
    pool::{self, WorkerContext},
    revision_source::{
        ArticleLocation, MediaWikiClient, RevisionSnapshot, RevisionSource, SourceError,
    },
    significance::{self, SignificanceFilter},
    store::{Store, StoreError},
    wikitext,
};

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Classifier(#[from] ClassifierError),
    #[error("no classifier endpoint configured")]
    NoClassifierEndpoint,
}

/// Counters of one worker, or of the whole run once merged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerReport {
    pub articles_processed: usize,
    pub articles_not_found: usize,
    pub articles_failed: usize,
    pub revisions_diffed: usize,
    /// revisions with the same content as their predecessor
    pub revisions_unchanged: usize,
    pub changes_extracted: usize,
    pub changes_stored: usize,
    pub store_failures: usize,
}

impl AddAssign<&WorkerReport> for WorkerReport {
    fn add_assign(&mut self, other: &WorkerReport) {
        self.articles_processed += other.articles_processed;
        self.articles_not_found += other.articles_not_found;
        self.articles_failed += other.articles_failed;
        self.revisions_diffed += other.revisions_diffed;
        self.revisions_unchanged += other.revisions_unchanged;
        self.changes_extracted += other.changes_extracted;
        self.changes_stored += other.changes_stored;
        self.store_failures += other.store_failures;
    }
}

/// Outcome of a whole run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub workers: usize,
    pub failed_workers: usize,
    pub total: WorkerReport,
}

/// Everything one worker owns.
pub struct Pipeline<S, B> {
    source: S,
    classifier: ClassificationClient<B>,
    store: Store,
    filter: SignificanceFilter,
    topic_labels: Vec<String>,
    stance_labels: Vec<String>,
}

impl<S, B> Pipeline<S, B>
where
    S: RevisionSource,
    B: ClassificationBackend,
{
    pub fn new(source: S, backend: B, store: Store, config: &PipelineConfig) -> Self {
        Self {
            source,
            classifier: ClassificationClient::new(backend),
            store,
            filter: config.filter,
            topic_labels: config.classifier.topic_labels.clone(),
            stance_labels: config.classifier.stance_labels.clone(),
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Process `articles` in order. Never fails; failed articles are counted and logged.
    pub fn process_articles(&self, articles: &[Article]) -> WorkerReport {
        let mut report = WorkerReport::default();
        for article in articles {
            match self.process_article(&article.url, &mut report) {
                Ok(()) => report.articles_processed += 1,
                Err(SourceError::NotFound { title }) => {
                    tracing::info!(
                        message = "Article not found, skipping",
                        url = article.url.as_str(),
                        title = title.as_str()
                    );
                    report.articles_not_found += 1;
                }
                Err(error) => {
                    tracing::warn!(
                        message = "Fetching article failed, skipping",
                        url = article.url.as_str(),
                        %error
                    );
                    report.articles_failed += 1;
                }
            }
        }
        report
    }

    pub fn process_article(
        &self,
        article_url: &str,
        report: &mut WorkerReport,
    ) -> Result<(), SourceError> {
        let location = ArticleLocation::from_article_url(article_url)?;
        let revisions = self.source.fetch_revision_history(article_url)?;
        tracing::info!(
            message = "Processing article",
            url = article_url,
            revisions = revisions.len()
        );

        for (i, current) in revisions.iter().enumerate() {
            let previous = revisions.get(i + 1);
            if previous.is_some_and(|p| p.fingerprint() == current.fingerprint()) {
                report.revisions_unchanged += 1;
                continue;
            }

            let previous_content = previous.map_or("", |p| p.content.as_str());
            self.process_revision(
                article_url,
                &location.language,
                current,
                previous_content,
                report,
            );
        }

        Ok(())
    }

    fn process_revision(
        &self,
        article_url: &str,
        language: &str,
        current: &RevisionSnapshot,
        previous_content: &str,
        report: &mut WorkerReport,
    ) {
        report.revisions_diffed += 1;
        let changes = extract_changes(previous_content, &current.content, language);
        if changes.is_empty() {
            tracing::debug!(
                message = "No structured changes",
                revision = current.revision_id
            );
            return;
        }
        report.changes_extracted += changes.len();

        let mut sequence = 0;
        for change in &changes {
            let Some(record) = self.classify_change(
                article_url,
                current,
                previous_content,
                change,
                sequence + 1,
            ) else {
                continue;
            };
            sequence += 1;

            match self.store.upsert(&record) {
                Ok(()) => {
                    report.changes_stored += 1;
                    tracing::debug!(
                        message = "Saved change",
                        id = record.id.as_str(),
                        topic = record.ai_topic.as_str(),
                        bias_delta = record.bias_delta()
                    );
                }
                Err(error) => {
                    report.store_failures += 1;
                    tracing::error!(
                        message = "Saving change failed",
                        id = record.id.as_str(),
                        %error
                    );
                }
            }
        }
    }

    /// The record for `change`, or `None` if it carries no text or is not significant.
    fn classify_change(
        &self,
        article_url: &str,
        current: &RevisionSnapshot,
        previous_content: &str,
        change: &ChangeUnit,
        sequence: u32,
    ) -> Option<RevisionChange> {
        let (clean_before, clean_after) =
            significance::normalize_pair(&change.before_text, &change.after_text)?;

        let (score_before, label_before) = self.classifier.score_bias(&clean_before);
        let (score_after, label_after) = self.classifier.score_bias(&clean_after);
        if !self.filter.is_significant(score_before, score_after) {
            tracing::trace!(
                message = "Dropping insignificant change",
                revision = current.revision_id,
                score_before,
                score_after
            );
            return None;
        }

        let window = build_context(
            &change.after_text,
            &change.before_text,
            &current.content,
            previous_content,
        );
        let stripped = wikitext::strip_markup(&window);
        let context = if stripped.trim().is_empty() {
            window
        } else {
            stripped
        };

        let ai_topic = self.classifier.classify_topic(&context, &self.topic_labels);
        let ai_stance = self.classifier.classify_stance(&context, &self.stance_labels);

        Some(RevisionChange {
            id: change_id(current.revision_id, sequence),
            original_revision_id: current.revision_id,
            article_url: article_url.to_string(),
            author: current.author.to_string(),
            timestamp: current.timestamp_iso(),
            before_text: change.before_text.clone(),
            after_text: change.after_text.clone(),
            change_type: change.change_type.clone(),
            change_description: change.description.clone(),
            bias_score_before: score_before,
            bias_score_after: score_after,
            bias_label_before: label_before,
            bias_label_after: label_after,
            ai_topic,
            ai_stance,
            is_ip_author: is_ip_address(&current.author),
            classification_context: context,
        })
    }
}

/// Split `articles` over one worker per context, build each worker's pipeline inside its
/// thread with `make_pipeline` and wait for all of them.
pub fn run_with<S, B, F>(
    articles: Vec<Article>,
    contexts: Vec<WorkerContext>,
    make_pipeline: F,
) -> RunSummary
where
    S: RevisionSource,
    B: ClassificationBackend,
    F: Fn(WorkerContext) -> Result<Pipeline<S, B>, PipelineError> + Sync,
{
    let partitions = pool::partition(articles, contexts.len());
    let assignments: Vec<_> = contexts
        .into_iter()
        .zip(partitions)
        .filter(|(_, partition)| !partition.is_empty())
        .collect();

    let results = pool::run_isolated(assignments, |context, partition| {
        let pipeline = make_pipeline(context)?;
        tracing::info!(message = "Worker started", articles = partition.len());
        let report = pipeline.process_articles(&partition);
        tracing::info!(
            message = "Worker finished",
            articles = report.articles_processed,
            stored = report.changes_stored
        );
        Ok::<_, PipelineError>(report)
    });

    let mut summary = RunSummary {
        workers: results.len(),
        ..RunSummary::default()
    };
    for result in results {
        match result {
            Ok(Ok(report)) => summary.total += &report,
            Ok(Err(error)) => {
                summary.failed_workers += 1;
                tracing::error!(message = "Worker could not start", %error);
            }
            Err(error) => {
                summary.failed_workers += 1;
                tracing::error!(message = "Worker died", %error);
            }
        }
    }
    summary
}

/// Run the full pipeline against the live revision API and classification services.
///
/// Fails only if the article list cannot be read from the store.
pub fn run_pipeline(config: &PipelineConfig) -> Result<RunSummary, PipelineError> {
    let articles = Store::open(&config.db_path, config.lock_timeout)?.list_articles(config.limit)?;
    let devices = config.devices.unwrap_or_else(pool::detect_devices);
    let contexts = pool::worker_contexts(devices, config.workers_per_device);
    tracing::info!(
        message = "Starting revision fetch",
        articles = articles.len(),
        devices,
        workers = contexts.len()
    );

    Ok(run_with(articles, contexts, |context| {
        let store = Store::open(&config.db_path, config.lock_timeout)?;
        let source = MediaWikiClient::new(&config.source)?;
        let endpoint = config
            .classifier
            .endpoint_for(context.device)
            .ok_or(PipelineError::NoClassifierEndpoint)?;
        let backend = HttpBackend::new(endpoint, &config.classifier)?;
        Ok(Pipeline::new(source, backend, store, config))
    }))
}
