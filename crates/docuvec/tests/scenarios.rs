//! Black-box scenarios run against the library API directly (no HTTP layer),
//! covering the round-trip, cancellation, and search-mode behaviors a
//! deployed instance must satisfy.

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use docuvec::config::Config;
use docuvec::embedding_engines::HashEmbeddingEngine;
use docuvec::ingestion::{IngestState, IngestionPipeline};
use docuvec::parser::PlainTextParser;
use docuvec::store_memory::InMemoryVectorStore;
use docuvec_core::embedding::EmbeddingEngine;
use docuvec_core::search::{search, SearchMode, SearchParams};
use docuvec_core::store::{Collection, VectorStoreClient};

fn test_config() -> Config {
    Config {
        embedding_dim: 8,
        batch_visual: 2,
        batch_text: 2,
        candidate_multiplier: 10,
        min_candidates: 50,
        search_deadline_ms: 5000,
        store_host: "127.0.0.1".into(),
        store_port: 8100,
        ingest_queue_capacity: 16,
        ingest_workers: 1,
        decode_cache_bytes: 0,
        db_path: std::path::PathBuf::from(":memory:"),
        embedding_provider: "hash".into(),
        embedding_endpoint: None,
        server_bind: "127.0.0.1:0".into(),
        chunk_max_tokens: 700,
    }
}

fn search_params(n: usize) -> SearchParams {
    SearchParams {
        n_results: n,
        candidate_multiplier: 10,
        min_candidates: 50,
        deadline_ms: 5_000,
    }
}

async fn wait_for_terminal<E, S>(pipeline: &IngestionPipeline<E, S>, doc_id: &str)
where
    E: EmbeddingEngine + ?Sized + 'static,
    S: VectorStoreClient + ?Sized + 'static,
{
    for _ in 0..300 {
        if let Some(rec) = pipeline.status(doc_id) {
            if rec.state.is_terminal() {
                return;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("document '{doc_id}' did not reach a terminal state in time");
}

/// Scenario 1 (adapted): ingest a small document and confirm the completed
/// text is searchable with the ingesting document as the top hit.
#[tokio::test]
async fn document_round_trips_from_ingestion_to_search() {
    let config = test_config();
    let engine: Arc<dyn EmbeddingEngine> = Arc::new(HashEmbeddingEngine::new(config.embedding_dim));
    let store: Arc<InMemoryVectorStore> = Arc::new(InMemoryVectorStore::new());
    let parser = Arc::new(PlainTextParser::new());
    let pipeline = IngestionPipeline::new(config, engine.clone(), store.clone(), parser);

    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "Quarterly results exceeded expectations this period.").unwrap();

    pipeline
        .submit("report-1".to_string(), file.path().to_path_buf(), "report.txt".to_string())
        .await
        .unwrap();
    wait_for_terminal(&pipeline, "report-1").await;

    let outcome = search(
        engine.as_ref(),
        store.as_ref(),
        "quarterly results",
        SearchMode::Hybrid,
        &search_params(5),
        None,
    )
    .await
    .unwrap();

    assert!(!outcome.results.is_empty());
    assert_eq!(outcome.results[0].doc_id, "report-1");
}

/// Scenario 2: identical search calls against an unchanged index return
/// byte-identical ranked results.
#[tokio::test]
async fn repeated_search_is_deterministic() {
    let config = test_config();
    let engine: Arc<dyn EmbeddingEngine> = Arc::new(HashEmbeddingEngine::new(config.embedding_dim));
    let store: Arc<InMemoryVectorStore> = Arc::new(InMemoryVectorStore::new());
    let parser = Arc::new(PlainTextParser::new());
    let pipeline = IngestionPipeline::new(config, engine.clone(), store.clone(), parser);

    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "The methods section describes our experimental setup.").unwrap();
    pipeline
        .submit("paper-1".to_string(), file.path().to_path_buf(), "paper.txt".to_string())
        .await
        .unwrap();
    wait_for_terminal(&pipeline, "paper-1").await;

    let first = search(engine.as_ref(), store.as_ref(), "methods section", SearchMode::Hybrid, &search_params(5), None)
        .await
        .unwrap();
    let second = search(engine.as_ref(), store.as_ref(), "methods section", SearchMode::Hybrid, &search_params(5), None)
        .await
        .unwrap();

    let first_ids: Vec<_> = first.results.iter().map(|r| (r.record_id.clone(), r.score)).collect();
    let second_ids: Vec<_> = second.results.iter().map(|r| (r.record_id.clone(), r.score)).collect();
    assert_eq!(first_ids, second_ids);
}

/// Scenario: deleting a document removes every record from both
/// collections, and subsequent searches never surface it again.
#[tokio::test]
async fn deleted_document_never_resurfaces_in_search() {
    let config = test_config();
    let engine: Arc<dyn EmbeddingEngine> = Arc::new(HashEmbeddingEngine::new(config.embedding_dim));
    let store: Arc<InMemoryVectorStore> = Arc::new(InMemoryVectorStore::new());
    let parser = Arc::new(PlainTextParser::new());
    let pipeline = IngestionPipeline::new(config, engine.clone(), store.clone(), parser);

    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "Ephemeral content bound for deletion.").unwrap();
    pipeline
        .submit("temp-doc".to_string(), file.path().to_path_buf(), "temp.txt".to_string())
        .await
        .unwrap();
    wait_for_terminal(&pipeline, "temp-doc").await;

    pipeline.delete("temp-doc", store.as_ref()).await.unwrap();

    let visual = store.get_many(Collection::Visual, &["temp-doc-visual-p1".to_string()]).await.unwrap();
    assert!(visual.is_empty());

    let outcome = search(
        engine.as_ref(),
        store.as_ref(),
        "ephemeral content",
        SearchMode::Hybrid,
        &search_params(5),
        None,
    )
    .await
    .unwrap();
    assert!(outcome.results.iter().all(|r| r.doc_id != "temp-doc"));
}

/// Resubmitting the same `doc_id` after a prior completed run replaces its
/// records rather than leaving duplicates (idempotent-by-id upsert).
#[tokio::test]
async fn resubmit_after_completion_replaces_records() {
    let config = test_config();
    let engine: Arc<dyn EmbeddingEngine> = Arc::new(HashEmbeddingEngine::new(config.embedding_dim));
    let store: Arc<InMemoryVectorStore> = Arc::new(InMemoryVectorStore::new());
    let parser = Arc::new(PlainTextParser::new());
    let pipeline = IngestionPipeline::new(config, engine, store.clone(), parser);

    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "version one of the document").unwrap();
    pipeline
        .submit("doc-v".to_string(), file.path().to_path_buf(), "doc.txt".to_string())
        .await
        .unwrap();
    wait_for_terminal(&pipeline, "doc-v").await;

    let mut file2 = tempfile::NamedTempFile::new().unwrap();
    write!(file2, "version two of the document").unwrap();
    pipeline
        .submit("doc-v".to_string(), file2.path().to_path_buf(), "doc.txt".to_string())
        .await
        .unwrap();
    wait_for_terminal(&pipeline, "doc-v").await;

    let visual = store.get_many(Collection::Visual, &["doc-v-visual-p1".to_string()]).await.unwrap();
    assert_eq!(visual.len(), 1);
}
