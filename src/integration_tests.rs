// SPDX-License-Identifier: MPL-2.0
use std::{path::Path, time::Duration};

use crate::{
    config::PipelineConfig,
    model::Article,
    pipeline::{run_with, Pipeline, PipelineError, RunSummary},
    pool::{worker_contexts, WorkerContext},
    store::Store,
    test_support::prelude::*,
};

const HSINCHU: &str = "https://en.wikipedia.org/wiki/Hsinchu";

fn open(path: &Path) -> Store {
    Store::open(path, Duration::from_secs(5)).unwrap()
}

fn register(path: &Path, urls: &[&str]) -> Vec<Article> {
    let store = open(path);
    urls.iter()
        .map(|url| {
            let article = Article::new(*url);
            store.insert_article(&article).unwrap();
            article
        })
        .collect()
}

fn run(
    path: &Path,
    articles: Vec<Article>,
    contexts: Vec<WorkerContext>,
    source: &MemorySource,
    backend: &ScriptedBackend,
) -> RunSummary {
    let config = PipelineConfig {
        db_path: path.to_path_buf(),
        ..PipelineConfig::default()
    };
    run_with(articles, contexts, |_| {
        Ok::<_, PipelineError>(Pipeline::new(
            source.clone(),
            backend.clone(),
            Store::open(&config.db_path, Duration::from_secs(5))?,
            &config,
        ))
    })
}

#[test]
fn inserted_biased_sentence_is_stored_once() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("wiki.db");
    let articles = register(&path, &[HSINCHU]);

    let source = MemorySource::default().with_history(
        HSINCHU,
        vec![
            snapshot(2, "Hsinchu is a city in Taiwan. Inserted biased claim."),
            snapshot(1, "Hsinchu is a city in Taiwan."),
        ],
    );
    let backend = ScriptedBackend::default().with_bias("Inserted biased claim", 0.5);

    for _ in 0..2 {
        let summary = run(
            &path,
            articles.clone(),
            worker_contexts(0, 1),
            &source,
            &backend,
        );
        assert_eq!(summary.failed_workers, 0);
        assert_eq!(summary.total.changes_stored, 1);

        let store = open(&path);
        assert_eq!(store.count_revision_changes().unwrap(), 1);
        let change = store.get_revision_change("2-0001").unwrap().unwrap();
        assert_eq!(change.change_type, "Text:Sentence:Insert");
        assert_eq!(change.change_description, "Inserted Sentence");
        assert_eq!(change.after_text, "Inserted biased claim.");
        assert_eq!(change.bias_score_before, 0.0);
        assert_eq!(change.bias_score_after, 0.5);
        assert_eq!(change.bias_delta(), 0.5);
        assert_eq!(change.article_url, HSINCHU);
    }
}

#[test]
fn workers_cover_every_article_once() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("wiki.db");

    let urls: Vec<String> = (0..7)
        .map(|i| format!("https://en.wikipedia.org/wiki/City_{i}"))
        .collect();
    let url_refs: Vec<&str> = urls.iter().map(String::as_str).collect();
    let articles = register(&path, &url_refs);

    let mut source = MemorySource::default();
    for (i, url) in urls.iter().enumerate() {
        let revision = 100 + i as i64;
        source = source.with_history(
            url,
            vec![snapshot(revision, &format!("City {i} is here. Loaded phrase {i}."))],
        );
    }
    let backend = ScriptedBackend::default().with_bias("Loaded phrase", 0.9);

    let summary = run(&path, articles, worker_contexts(3, 1), &source, &backend);
    assert_eq!(summary.workers, 3);
    assert_eq!(summary.failed_workers, 0);
    assert_eq!(summary.total.articles_processed, 7);
    assert_eq!(summary.total.changes_stored, 7);

    let mut requested = source.requests();
    requested.sort();
    let mut expected = urls.clone();
    expected.sort();
    assert_eq!(requested, expected);

    let store = open(&path);
    assert_eq!(store.count_revision_changes().unwrap(), 7);
    for url in &urls {
        assert_eq!(store.revision_changes_for_article(url).unwrap().len(), 1);
    }
}

#[test]
fn missing_articles_and_failed_workers_are_contained() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("wiki.db");
    let taipei = "https://en.wikipedia.org/wiki/Taipei";
    let missing = "https://en.wikipedia.org/wiki/Does_not_exist";
    let articles = register(&path, &[missing, HSINCHU, taipei]);

    let source = MemorySource::default()
        .with_history(HSINCHU, vec![snapshot(1, "Loaded words.")])
        .with_history(taipei, vec![snapshot(2, "Loaded again.")]);
    let backend = ScriptedBackend::default().with_bias("Loaded", 0.9);
    let config = PipelineConfig {
        db_path: path.clone(),
        ..PipelineConfig::default()
    };

    // the second worker (holding Taipei) cannot start
    let summary = run_with(articles, worker_contexts(0, 2), |context| {
        if context.index == 1 {
            return Err(PipelineError::NoClassifierEndpoint);
        }
        Ok(Pipeline::new(
            source.clone(),
            backend.clone(),
            Store::open(&config.db_path, Duration::from_secs(5))?,
            &config,
        ))
    });

    assert_eq!(summary.workers, 2);
    assert_eq!(summary.failed_workers, 1);
    assert_eq!(summary.total.articles_not_found, 1);
    assert_eq!(summary.total.articles_processed, 1);

    let store = open(&path);
    assert!(store.get_revision_change("1-0001").unwrap().is_some());
    assert!(store.get_revision_change("2-0001").unwrap().is_none());
}

#[test]
fn fewer_surviving_changes_leave_stale_rows() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("wiki.db");
    let articles = register(&path, &[HSINCHU]);

    let source =
        MemorySource::default().with_history(HSINCHU, vec![snapshot(5, "Spin one. Spin two.")]);
    let strict = ScriptedBackend::default().with_bias("Spin", 0.9);
    run(&path, articles.clone(), worker_contexts(0, 1), &source, &strict);
    assert_eq!(open(&path).count_revision_changes().unwrap(), 2);

    // with only "Spin one" biased the second row is no longer produced but stays stored
    let lenient = ScriptedBackend::default().with_bias("Spin one", 0.9);
    let summary = run(&path, articles, worker_contexts(0, 1), &source, &lenient);
    assert_eq!(summary.total.changes_stored, 1);

    let store = open(&path);
    assert_eq!(store.count_revision_changes().unwrap(), 2);
    assert_eq!(
        store.get_revision_change("5-0002").unwrap().unwrap().after_text,
        "Spin two."
    );
}

#[test]
fn markup_only_edits_are_not_classified() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("wiki.db");
    let articles = register(&path, &[HSINCHU]);

    let source = MemorySource::default().with_history(
        HSINCHU,
        vec![
            snapshot(2, "Plain text.{{Infobox|seal=[[File:B.png]]}}"),
            snapshot(1, "Plain text.{{Infobox|seal=[[File:A.png]]}}"),
        ],
    );
    let backend = ScriptedBackend::default();

    let summary = run(&path, articles, worker_contexts(0, 1), &source, &backend);
    // first revision inserts a neutral sentence, second only swaps an image
    assert_eq!(summary.total.changes_extracted, 2);
    assert_eq!(summary.total.changes_stored, 0);
    // the empty side of the insertion and the image swap never reach the backend
    assert_eq!(backend.calls(), 1);
}
