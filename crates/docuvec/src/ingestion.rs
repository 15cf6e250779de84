//! The ingestion state machine (SPEC_FULL.md §4.4): parse, embed visual,
//! embed text, enrich metadata, store, finalize — under a bounded worker
//! pool with cooperative cancellation, grounded loosely on the shape of
//! the teacher's `run_sync` (connector → chunk → embed → store) but
//! restructured from a one-shot batch sync into a concurrent, per-document
//! submit/status/delete service.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::{mpsc, Mutex as AsyncMutex, Notify};

use docuvec_core::chunk::chunk_page_text;
use docuvec_core::codec::{encode_sequence_b64, encode_structure};
use docuvec_core::embedding::{Embedding, EmbeddingEngine};
use docuvec_core::models::TextChunk;
use docuvec_core::search::{INGEST_COMPLETE_KEY, SEQUENCE_METADATA_KEY};
use docuvec_core::store::{Collection, MetaValue, Metadata, VectorStoreClient, WhereFilter};

use crate::config::Config;
use crate::parser::{ParsedPage, Parser};

/// Document-level lifecycle state (SPEC_FULL.md §4.4's state diagram).
#[derive(Debug, Clone, PartialEq)]
pub enum IngestState {
    Submitted,
    Queued,
    Parsing,
    EmbeddingVisual,
    EmbeddingText,
    Storing,
    Completed,
    Failed(String),
    Cancelled,
}

impl IngestState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            IngestState::Completed | IngestState::Failed(_) | IngestState::Cancelled
        )
    }

    fn progress(&self) -> f32 {
        match self {
            IngestState::Submitted => 0.0,
            IngestState::Queued => 0.05,
            IngestState::Parsing => 0.15,
            IngestState::EmbeddingVisual => 0.4,
            IngestState::EmbeddingText => 0.65,
            IngestState::Storing => 0.9,
            IngestState::Completed => 1.0,
            IngestState::Failed(_) | IngestState::Cancelled => 0.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StatusRecord {
    pub doc_id: String,
    pub state: IngestState,
    pub progress: f32,
    pub elapsed_ms: u64,
    pub error: Option<String>,
    /// Set by `delete` to signal the owning worker to stop at the next
    /// stage boundary. Distinct from removing the status entry, which only
    /// happens after the worker has actually exited (SPEC_FULL.md §4.4).
    pub cancel_requested: bool,
}

#[derive(Debug, Clone)]
pub struct Ack {
    pub doc_id: String,
    pub state: IngestState,
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("ingestion queue is full")]
    QueueFull,
    #[error("unknown document: {0}")]
    NotFound(String),
}

struct QueueItem {
    doc_id: String,
    file_ref: PathBuf,
    filename: String,
}

/// Why a worker stopped processing a document without reaching
/// `Completed`.
enum WorkerStop {
    Cancelled,
    Failed(String),
}

type StatusMap = Arc<RwLock<HashMap<String, StatusRecord>>>;
/// Tracks the document currently owned by each live worker, so `delete` can
/// wait for that worker to exit before touching the store (SPEC_FULL.md
/// §4.4: `delete_by` runs only after the worker has observed cancellation).
type ActiveMap = Arc<Mutex<HashMap<String, Arc<Notify>>>>;

pub struct IngestionPipeline<E, S>
where
    E: EmbeddingEngine + ?Sized + 'static,
    S: VectorStoreClient + ?Sized + 'static,
{
    config: Config,
    status: StatusMap,
    active: ActiveMap,
    queue_tx: mpsc::Sender<QueueItem>,
    _engine: std::marker::PhantomData<E>,
    _store: std::marker::PhantomData<S>,
}

impl<E, S> IngestionPipeline<E, S>
where
    E: EmbeddingEngine + ?Sized + 'static,
    S: VectorStoreClient + ?Sized + 'static,
{
    pub fn new(config: Config, engine: Arc<E>, store: Arc<S>, parser: Arc<dyn Parser>) -> Self {
        let (tx, rx) = mpsc::channel::<QueueItem>(config.ingest_queue_capacity);
        let rx = Arc::new(AsyncMutex::new(rx));
        let status: StatusMap = Arc::new(RwLock::new(HashMap::new()));
        let active: ActiveMap = Arc::new(Mutex::new(HashMap::new()));

        for _ in 0..config.ingest_workers {
            let rx = rx.clone();
            let status = status.clone();
            let active = active.clone();
            let engine = engine.clone();
            let store = store.clone();
            let parser = parser.clone();
            let config = config.clone();
            tokio::spawn(async move {
                loop {
                    let item = {
                        let mut rx = rx.lock().await;
                        rx.recv().await
                    };
                    let Some(item) = item else { break };

                    let notify = Arc::new(Notify::new());
                    active.lock().unwrap().insert(item.doc_id.clone(), notify.clone());

                    run_document(
                        item.doc_id.clone(),
                        item.file_ref,
                        item.filename,
                        &config,
                        engine.as_ref(),
                        store.as_ref(),
                        parser.as_ref(),
                        &status,
                    )
                    .await;

                    active.lock().unwrap().remove(&item.doc_id);
                    notify.notify_one();
                }
            });
        }

        Self {
            config,
            status,
            active,
            queue_tx: tx,
            _engine: std::marker::PhantomData,
            _store: std::marker::PhantomData,
        }
    }

    /// Enqueue `doc_id` for processing. Idempotent: resubmitting a
    /// `doc_id` that is currently in flight returns its existing status
    /// instead of starting a second run.
    pub async fn submit(
        &self,
        doc_id: String,
        file_ref: PathBuf,
        filename: String,
    ) -> Result<Ack, IngestError> {
        {
            let map = self.status.read().unwrap();
            if let Some(existing) = map.get(&doc_id) {
                if !existing.state.is_terminal() {
                    return Ok(Ack {
                        doc_id,
                        state: existing.state.clone(),
                    });
                }
            }
        }

        {
            let mut map = self.status.write().unwrap();
            map.insert(
                doc_id.clone(),
                StatusRecord {
                    doc_id: doc_id.clone(),
                    state: IngestState::Submitted,
                    progress: 0.0,
                    elapsed_ms: 0,
                    error: None,
                    cancel_requested: false,
                },
            );
        }

        let item = QueueItem {
            doc_id: doc_id.clone(),
            file_ref,
            filename,
        };

        match self.queue_tx.try_send(item) {
            Ok(()) => {
                let mut map = self.status.write().unwrap();
                if let Some(rec) = map.get_mut(&doc_id) {
                    rec.state = IngestState::Queued;
                    rec.progress = IngestState::Queued.progress();
                }
                Ok(Ack {
                    doc_id,
                    state: IngestState::Queued,
                })
            }
            Err(_) => {
                self.status.write().unwrap().remove(&doc_id);
                Err(IngestError::QueueFull)
            }
        }
    }

    pub fn status(&self, doc_id: &str) -> Option<StatusRecord> {
        self.status.read().unwrap().get(doc_id).cloned()
    }

    /// Remove every record for `doc_id` from both collections. Safe to call
    /// during processing: sets `cancel_requested`, which the in-flight
    /// worker checks at every stage boundary, then waits for that worker to
    /// actually exit before issuing `delete_by` — otherwise an upsert that
    /// resumes after the cancellation check but before the worker observes
    /// it would race the delete and leave an orphan record (SPEC_FULL.md
    /// §4.4, invariant 7).
    pub async fn delete(&self, doc_id: &str, store: &S) -> Result<(), IngestError> {
        let notify = {
            let mut map = self.status.write().unwrap();
            let rec = map
                .get_mut(doc_id)
                .ok_or_else(|| IngestError::NotFound(doc_id.to_string()))?;
            rec.state = IngestState::Cancelled;
            rec.progress = 0.0;
            rec.cancel_requested = true;
            self.active.lock().unwrap().get(doc_id).cloned()
        };

        if let Some(notify) = notify {
            notify.notified().await;
        }

        let _ = store.delete_by(Collection::Visual, &WhereFilter::doc_id(doc_id)).await;
        let _ = store.delete_by(Collection::Text, &WhereFilter::doc_id(doc_id)).await;
        self.status.write().unwrap().remove(doc_id);
        Ok(())
    }

    pub fn config(&self) -> &Config {
        &self.config
    }
}

fn alive(status: &StatusMap, doc_id: &str) -> bool {
    status
        .read()
        .unwrap()
        .get(doc_id)
        .map(|rec| !rec.cancel_requested)
        .unwrap_or(false)
}

fn set_state(status: &StatusMap, doc_id: &str, start: Instant, state: IngestState) {
    let mut map = status.write().unwrap();
    if let Some(rec) = map.get_mut(doc_id) {
        rec.progress = state.progress();
        rec.elapsed_ms = start.elapsed().as_millis() as u64;
        rec.state = state;
    }
}

async fn run_document<E, S>(
    doc_id: String,
    file_ref: PathBuf,
    filename: String,
    config: &Config,
    engine: &E,
    store: &S,
    parser: &dyn Parser,
    status: &StatusMap,
) where
    E: EmbeddingEngine + ?Sized,
    S: VectorStoreClient + ?Sized,
{
    let start = Instant::now();

    match process(&doc_id, &file_ref, &filename, config, engine, store, parser, status, start).await {
        Ok(()) => set_state(status, &doc_id, start, IngestState::Completed),
        Err(WorkerStop::Cancelled) => {
            // `delete` already set state to Cancelled and is waiting on our
            // exit notification; nothing further to record here.
        }
        Err(WorkerStop::Failed(msg)) => {
            {
                let mut map = status.write().unwrap();
                if let Some(rec) = map.get_mut(&doc_id) {
                    rec.state = IngestState::Failed(msg.clone());
                    rec.progress = 0.0;
                    rec.error = Some(msg);
                    rec.elapsed_ms = start.elapsed().as_millis() as u64;
                }
            }
            let _ = store.delete_by(Collection::Visual, &WhereFilter::doc_id(&doc_id)).await;
            let _ = store.delete_by(Collection::Text, &WhereFilter::doc_id(&doc_id)).await;
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn process<E, S>(
    doc_id: &str,
    file_ref: &PathBuf,
    filename: &str,
    config: &Config,
    engine: &E,
    store: &S,
    parser: &dyn Parser,
    status: &StatusMap,
    start: Instant,
) -> Result<(), WorkerStop>
where
    E: EmbeddingEngine + ?Sized,
    S: VectorStoreClient + ?Sized,
{
    macro_rules! check_alive {
        () => {
            if !alive(status, doc_id) {
                return Err(WorkerStop::Cancelled);
            }
        };
    }

    check_alive!();
    set_state(status, doc_id, start, IngestState::Parsing);
    let parsed = parser
        .parse(file_ref)
        .await
        .map_err(|e| WorkerStop::Failed(e.to_string()))?;

    check_alive!();
    set_state(status, doc_id, start, IngestState::EmbeddingVisual);
    let mut page_embeddings: Vec<(&ParsedPage, Embedding)> = Vec::with_capacity(parsed.pages.len());
    for batch in parsed.pages.chunks(config.batch_visual.max(1)) {
        check_alive!();
        let images: Vec<Vec<u8>> = batch.iter().map(|p| p.image_bytes.clone()).collect();
        let result = engine
            .embed_images(&images)
            .await
            .map_err(|e| WorkerStop::Failed(e.to_string()))?;
        for (page, maybe_emb) in batch.iter().zip(result.items) {
            let emb = maybe_emb
                .ok_or_else(|| WorkerStop::Failed(format!("visual embedding failed for page {}", page.page)))?;
            page_embeddings.push((page, emb));
        }
    }

    check_alive!();
    set_state(status, doc_id, start, IngestState::EmbeddingText);
    let mut chunks: Vec<TextChunk> = Vec::new();
    let mut next_ordinal = 0u32;
    for page in &parsed.pages {
        let (page_chunks, next) =
            chunk_page_text(doc_id, page.page, &page.text, config.chunk_max_tokens, next_ordinal);
        next_ordinal = next;
        chunks.extend(page_chunks);
    }
    let mut chunk_embeddings: Vec<(TextChunk, Embedding)> = Vec::with_capacity(chunks.len());
    for batch in chunks.chunks(config.batch_text.max(1)) {
        check_alive!();
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
        let result = engine
            .embed_texts(&texts)
            .await
            .map_err(|e| WorkerStop::Failed(e.to_string()))?;
        for (chunk, maybe_emb) in batch.iter().zip(result.items) {
            let emb = maybe_emb.ok_or_else(|| {
                WorkerStop::Failed(format!("text embedding failed for chunk {}", chunk.chunk_id))
            })?;
            chunk_embeddings.push((chunk.clone(), emb));
        }
    }

    check_alive!();
    set_state(status, doc_id, start, IngestState::Storing);

    // Bidirectional links: fill each heading's chunk_ids from chunks whose
    // parent_heading matches (SPEC_FULL.md §4.4 stage 4). PlainTextParser
    // never populates structure/context, so this is a no-op until a real
    // parser is plugged in, but the wiring is exercised by tests below.
    let mut structure_by_page = parsed.structure_by_page.clone();
    link_headings_to_chunks(&mut structure_by_page, &chunk_embeddings);

    let timestamp = chrono::Utc::now().timestamp();

    // Every record is written with `INGEST_COMPLETE_KEY = false` first, then
    // flipped to `true` only once the whole document has been stored below.
    // A concurrent search filters on that flag, so it never observes a
    // document mid-write (SPEC_FULL.md §3, §5).
    let mut stored: Vec<(Collection, String, Vec<f32>, Metadata)> =
        Vec::with_capacity(page_embeddings.len() + chunk_embeddings.len());

    for (page, emb) in &page_embeddings {
        check_alive!();
        let seq_b64 = encode_sequence_b64(&emb.multi_vector)
            .map_err(|e| WorkerStop::Failed(e.to_string()))?;
        let structure = structure_by_page.get(&page.page);
        let metadata = visual_metadata(doc_id, filename, page, timestamp, structure, &seq_b64)
            .map_err(|e| WorkerStop::Failed(e.to_string()))?;
        let id = format!("{doc_id}-visual-p{}", page.page);
        upsert_with_retry(store, Collection::Visual, &id, emb.lead_vector(), metadata.clone())
            .await
            .map_err(WorkerStop::Failed)?;
        stored.push((Collection::Visual, id, emb.lead_vector().to_vec(), metadata));
    }

    for (chunk, emb) in &chunk_embeddings {
        check_alive!();
        let seq_b64 = encode_sequence_b64(&emb.multi_vector)
            .map_err(|e| WorkerStop::Failed(e.to_string()))?;
        let metadata = text_metadata(doc_id, filename, chunk, timestamp, &seq_b64);
        upsert_with_retry(store, Collection::Text, &chunk.chunk_id, emb.lead_vector(), metadata.clone())
            .await
            .map_err(WorkerStop::Failed)?;
        stored.push((Collection::Text, chunk.chunk_id.clone(), emb.lead_vector().to_vec(), metadata));
    }

    check_alive!();
    for (collection, id, lead_vector, mut metadata) in stored {
        metadata.insert(INGEST_COMPLETE_KEY.into(), MetaValue::Bool(true));
        upsert_with_retry(store, collection, &id, &lead_vector, metadata)
            .await
            .map_err(WorkerStop::Failed)?;
    }

    Ok(())
}

fn link_headings_to_chunks(
    structure_by_page: &mut BTreeMap<u32, docuvec_core::models::DocumentStructure>,
    chunk_embeddings: &[(TextChunk, Embedding)],
) {
    for structure in structure_by_page.values_mut() {
        for heading in &mut structure.headings {
            heading.chunk_ids = chunk_embeddings
                .iter()
                .filter(|(chunk, _)| chunk.context.parent_heading.as_deref() == Some(heading.text.as_str()))
                .map(|(chunk, _)| chunk.chunk_id.clone())
                .collect();
        }
    }
}

fn visual_metadata(
    doc_id: &str,
    filename: &str,
    page: &ParsedPage,
    timestamp: i64,
    structure: Option<&docuvec_core::models::DocumentStructure>,
    embedding_full: &str,
) -> Result<Metadata, String> {
    let mut m = Metadata::new();
    m.insert("doc_id".into(), MetaValue::Text(doc_id.to_string()));
    m.insert("filename".into(), MetaValue::Text(filename.to_string()));
    m.insert("page".into(), MetaValue::Int(page.page as i64));
    m.insert("image_path".into(), MetaValue::Text(page.image_path.clone()));
    m.insert("thumb_path".into(), MetaValue::Text(page.thumb_path.clone()));
    m.insert("format".into(), MetaValue::Text(page.format.clone()));
    m.insert("mimetype".into(), MetaValue::Text(page.mimetype.clone()));
    m.insert("timestamp".into(), MetaValue::Int(timestamp));
    m.insert("image_width".into(), MetaValue::Int(page.image_width as i64));
    m.insert("image_height".into(), MetaValue::Int(page.image_height as i64));
    m.insert(SEQUENCE_METADATA_KEY.into(), MetaValue::Text(embedding_full.to_string()));
    m.insert("metadata_version".into(), MetaValue::Text("v1.0".to_string()));
    m.insert(INGEST_COMPLETE_KEY.into(), MetaValue::Bool(false));

    match structure {
        Some(s) if !s.is_empty() => {
            let encoded = encode_structure(s).map_err(|e| e.to_string())?;
            m.insert("has_structure".into(), MetaValue::Bool(true));
            m.insert("num_headings".into(), MetaValue::Int(s.headings.len() as i64));
            m.insert("num_tables".into(), MetaValue::Int(s.tables.len() as i64));
            m.insert("num_pictures".into(), MetaValue::Int(s.pictures.len() as i64));
            m.insert("max_heading_depth".into(), MetaValue::Int(s.max_heading_depth() as i64));
            m.insert("structure".into(), MetaValue::Text(encoded));
        }
        _ => {
            m.insert("has_structure".into(), MetaValue::Bool(false));
            m.insert("num_headings".into(), MetaValue::Int(0));
            m.insert("num_tables".into(), MetaValue::Int(0));
            m.insert("num_pictures".into(), MetaValue::Int(0));
            m.insert("max_heading_depth".into(), MetaValue::Int(0));
        }
    }
    Ok(m)
}

fn text_metadata(
    doc_id: &str,
    filename: &str,
    chunk: &TextChunk,
    timestamp: i64,
    embedding_full: &str,
) -> Metadata {
    let mut m = Metadata::new();
    m.insert("doc_id".into(), MetaValue::Text(doc_id.to_string()));
    m.insert("chunk_id".into(), MetaValue::Text(chunk.chunk_id.clone()));
    m.insert("page".into(), MetaValue::Int(chunk.page as i64));
    m.insert("filename".into(), MetaValue::Text(filename.to_string()));
    m.insert("text_preview".into(), MetaValue::Text(chunk.text_preview()));
    m.insert("full_text".into(), MetaValue::Text(chunk.text.clone()));
    m.insert("word_count".into(), MetaValue::Int(chunk.word_count as i64));
    m.insert("timestamp".into(), MetaValue::Int(timestamp));
    m.insert("has_context".into(), MetaValue::Bool(chunk.has_context()));
    m.insert(
        "page_nums".into(),
        MetaValue::Text(serde_json::to_string(&chunk.page_nums).unwrap_or_else(|_| "[]".into())),
    );

    let ctx = &chunk.context;
    if let Some(h) = &ctx.parent_heading {
        m.insert("parent_heading".into(), MetaValue::Text(h.clone()));
    }
    if let Some(level) = ctx.parent_heading_level {
        m.insert("parent_heading_level".into(), MetaValue::Int(level as i64));
    }
    if let Some(path) = &ctx.section_path {
        m.insert("section_path".into(), MetaValue::Text(path.clone()));
    }
    if let Some(elem) = ctx.element_type {
        m.insert("element_type".into(), MetaValue::Text(element_type_str(elem).to_string()));
    }
    m.insert("is_page_boundary".into(), MetaValue::Bool(ctx.is_page_boundary));
    m.insert(
        "related_tables".into(),
        MetaValue::Text(serde_json::to_string(&ctx.related_tables).unwrap_or_else(|_| "[]".into())),
    );
    m.insert(
        "related_pictures".into(),
        MetaValue::Text(serde_json::to_string(&ctx.related_pictures).unwrap_or_else(|_| "[]".into())),
    );
    if let Some(bbox) = &ctx.bbox {
        if let Ok(encoded) = serde_json::to_string(bbox) {
            m.insert("bbox".into(), MetaValue::Text(encoded));
        }
    }
    m.insert(SEQUENCE_METADATA_KEY.into(), MetaValue::Text(embedding_full.to_string()));
    m.insert("metadata_version".into(), MetaValue::Text("v1.0".to_string()));
    m.insert(INGEST_COMPLETE_KEY.into(), MetaValue::Bool(false));
    m
}

fn element_type_str(elem: docuvec_core::models::ElementType) -> &'static str {
    use docuvec_core::models::ElementType::*;
    match elem {
        Text => "text",
        ListItem => "list_item",
        TableCell => "table_cell",
        Caption => "caption",
        Code => "code",
        Formula => "formula",
    }
}

const UPSERT_MAX_ATTEMPTS: u32 = 3;

async fn upsert_with_retry<S: VectorStoreClient + ?Sized>(
    store: &S,
    collection: Collection,
    id: &str,
    lead_vector: &[f32],
    metadata: Metadata,
) -> Result<(), String> {
    let mut last_err = None;
    for attempt in 0..UPSERT_MAX_ATTEMPTS {
        if attempt > 0 {
            tokio::time::sleep(Duration::from_millis(200 * (1 << attempt))).await;
        }
        match store.upsert(collection, id, lead_vector, metadata.clone()).await {
            Ok(()) => return Ok(()),
            Err(e) => last_err = Some(e.to_string()),
        }
    }
    Err(last_err.unwrap_or_else(|| "upsert failed".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding_engines::HashEmbeddingEngine;
    use crate::parser::PlainTextParser;
    use crate::store_memory::InMemoryVectorStore;
    use std::io::Write;
    use std::time::Duration as StdDuration;

    fn test_config() -> Config {
        Config {
            embedding_dim: 8,
            batch_visual: 2,
            batch_text: 2,
            candidate_multiplier: 10,
            min_candidates: 100,
            search_deadline_ms: 5000,
            store_host: "127.0.0.1".into(),
            store_port: 8100,
            ingest_queue_capacity: 4,
            ingest_workers: 1,
            decode_cache_bytes: 0,
            db_path: std::path::PathBuf::from(":memory:"),
            embedding_provider: "hash".into(),
            embedding_endpoint: None,
            server_bind: "127.0.0.1:0".into(),
            chunk_max_tokens: 700,
        }
    }

    /// Wraps [`HashEmbeddingEngine`], pausing inside `embed_images` so a test
    /// can delete a document while its worker is provably still in flight.
    struct SlowEmbeddingEngine {
        inner: HashEmbeddingEngine,
        delay: StdDuration,
    }

    #[async_trait::async_trait]
    impl EmbeddingEngine for SlowEmbeddingEngine {
        async fn embed_images(
            &self,
            images: &[Vec<u8>],
        ) -> Result<docuvec_core::embedding::BatchEmbedding, docuvec_core::embedding::EmbeddingError> {
            tokio::time::sleep(self.delay).await;
            self.inner.embed_images(images).await
        }

        async fn embed_texts(
            &self,
            texts: &[String],
        ) -> Result<docuvec_core::embedding::BatchEmbedding, docuvec_core::embedding::EmbeddingError> {
            self.inner.embed_texts(texts).await
        }

        async fn embed_query(
            &self,
            query: &str,
        ) -> Result<Embedding, docuvec_core::embedding::EmbeddingError> {
            self.inner.embed_query(query).await
        }
    }

    #[tokio::test]
    async fn delete_during_processing_waits_for_worker_before_removing_records() {
        let config = test_config();
        let engine = Arc::new(SlowEmbeddingEngine {
            inner: HashEmbeddingEngine::new(config.embedding_dim),
            delay: StdDuration::from_millis(150),
        });
        let store = Arc::new(InMemoryVectorStore::new());
        let parser = Arc::new(PlainTextParser::new());
        let pipeline = IngestionPipeline::new(config, engine, store.clone(), parser);

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "Content that takes a while to embed.").unwrap();
        pipeline
            .submit("doc5".to_string(), file.path().to_path_buf(), "doc5.txt".to_string())
            .await
            .unwrap();

        // Let the worker pick the item up and enter the slow embed step.
        tokio::time::sleep(StdDuration::from_millis(30)).await;

        pipeline.delete("doc5", store.as_ref()).await.unwrap();

        // `delete` only returns once the worker has exited, so no records
        // should ever have been written for this document.
        let visual = store.get_many(Collection::Visual, &["doc5-visual-p1".to_string()]).await.unwrap();
        assert!(visual.is_empty());
        assert!(pipeline.status("doc5").is_none());
    }

    async fn wait_for_terminal<E, S>(pipeline: &IngestionPipeline<E, S>, doc_id: &str) -> StatusRecord
    where
        E: EmbeddingEngine + ?Sized + 'static,
        S: VectorStoreClient + ?Sized + 'static,
    {
        for _ in 0..200 {
            if let Some(rec) = pipeline.status(doc_id) {
                if rec.state.is_terminal() {
                    return rec;
                }
            }
            tokio::time::sleep(StdDuration::from_millis(10)).await;
        }
        panic!("document did not reach a terminal state in time");
    }

    #[tokio::test]
    async fn submit_runs_to_completion_and_stores_records() {
        let config = test_config();
        let engine = Arc::new(HashEmbeddingEngine::new(config.embedding_dim));
        let store = Arc::new(InMemoryVectorStore::new());
        let parser = Arc::new(PlainTextParser::new());
        let pipeline = IngestionPipeline::new(config, engine, store.clone(), parser);

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "First paragraph.\n\nSecond paragraph.").unwrap();

        let ack = pipeline
            .submit("doc1".to_string(), file.path().to_path_buf(), "doc1.txt".to_string())
            .await
            .unwrap();
        assert_eq!(ack.state, IngestState::Queued);

        let rec = wait_for_terminal(&pipeline, "doc1").await;
        assert_eq!(rec.state, IngestState::Completed);

        let visual = store.get_many(Collection::Visual, &["doc1-visual-p1".to_string()]).await.unwrap();
        assert_eq!(visual.len(), 1);
    }

    #[tokio::test]
    async fn resubmitting_in_flight_document_is_idempotent() {
        let config = test_config();
        let engine = Arc::new(HashEmbeddingEngine::new(config.embedding_dim));
        let store = Arc::new(InMemoryVectorStore::new());
        let parser = Arc::new(PlainTextParser::new());
        let pipeline = IngestionPipeline::new(config, engine, store, parser);

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "hello").unwrap();

        let first = pipeline
            .submit("doc2".to_string(), file.path().to_path_buf(), "doc2.txt".to_string())
            .await
            .unwrap();
        let second = pipeline
            .submit("doc2".to_string(), file.path().to_path_buf(), "doc2.txt".to_string())
            .await
            .unwrap();
        assert_eq!(first.doc_id, second.doc_id);
    }

    #[tokio::test]
    async fn parse_failure_marks_document_failed_with_no_leftover_records() {
        let config = test_config();
        let engine = Arc::new(HashEmbeddingEngine::new(config.embedding_dim));
        let store = Arc::new(InMemoryVectorStore::new());
        let parser = Arc::new(PlainTextParser::new());
        let pipeline = IngestionPipeline::new(config, engine, store.clone(), parser);

        let missing = std::path::PathBuf::from("/nonexistent/file/for/sure.txt");
        pipeline
            .submit("doc3".to_string(), missing, "doc3.txt".to_string())
            .await
            .unwrap();

        let rec = wait_for_terminal(&pipeline, "doc3").await;
        assert!(matches!(rec.state, IngestState::Failed(_)));
        assert!(rec.error.is_some());
    }

    #[tokio::test]
    async fn delete_removes_status_and_store_records() {
        let config = test_config();
        let engine = Arc::new(HashEmbeddingEngine::new(config.embedding_dim));
        let store = Arc::new(InMemoryVectorStore::new());
        let parser = Arc::new(PlainTextParser::new());
        let pipeline = IngestionPipeline::new(config, engine, store.clone(), parser);

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "content").unwrap();
        pipeline
            .submit("doc4".to_string(), file.path().to_path_buf(), "doc4.txt".to_string())
            .await
            .unwrap();
        wait_for_terminal(&pipeline, "doc4").await;

        pipeline.delete("doc4", store.as_ref()).await.unwrap();
        assert!(pipeline.status("doc4").is_none());
        let visual = store.get_many(Collection::Visual, &["doc4-visual-p1".to_string()]).await.unwrap();
        assert!(visual.is_empty());
    }
}
