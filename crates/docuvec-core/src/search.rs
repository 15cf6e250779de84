//! Two-stage retrieval: an approximate lead-vector shortlist (Stage 1)
//! followed by exact MaxSim re-ranking over full multi-vector sequences
//! (Stage 2), merged across the visual and text collections for hybrid
//! queries (SPEC_FULL.md §4.5).
//!
//! Generic over both the [`EmbeddingEngine`] and [`VectorStoreClient`]
//! contracts so it carries no I/O or configuration dependency of its own —
//! the same shape as the teacher's store-agnostic `search<S: Store>`.

use std::time::{Duration, Instant};

use thiserror::Error;

use crate::codec::{decode_sequence_b64, CodecError};
use crate::embedding::{EmbeddingEngine, EmbeddingError, MultiVector};
use crate::store::{Collection, MetaValue, Metadata, StoreError, StoreRecord, VectorStoreClient, WhereFilter};

/// Metadata key under which the codec-encoded, base64-wrapped full
/// sequence is stored (SPEC_FULL.md §6.4's `_embedding_full` field).
pub const SEQUENCE_METADATA_KEY: &str = "_embedding_full";

/// Metadata key marking a record visible to search. Ingestion writes every
/// record with this `false` and flips it to `true` only once the whole
/// document has been stored, so a concurrent search can never observe a
/// partially-written document (SPEC_FULL.md §3 lifecycle, §5 ordering).
pub const INGEST_COMPLETE_KEY: &str = "ingest_complete";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchMode {
    Hybrid,
    VisualOnly,
    TextOnly,
}

impl SearchMode {
    fn wants_visual(self) -> bool {
        matches!(self, SearchMode::Hybrid | SearchMode::VisualOnly)
    }

    fn wants_text(self) -> bool {
        matches!(self, SearchMode::Hybrid | SearchMode::TextOnly)
    }
}

#[derive(Debug, Clone)]
pub struct SearchParams {
    pub n_results: usize,
    pub candidate_multiplier: usize,
    pub min_candidates: usize,
    /// Per-call deadline (`SEARCH_DEADLINE_MS`, SPEC_FULL.md §5). Stage 1
    /// failing to return before the deadline fails the call with
    /// `SearchError::Timeout`; Stage 2 running past it returns the
    /// best-ranked partial set with `SearchOutcome.partial = true`.
    pub deadline_ms: u64,
}

impl SearchParams {
    pub fn shortlist_size(&self) -> usize {
        (self.n_results * self.candidate_multiplier).max(self.min_candidates)
    }
}

#[derive(Debug, Clone)]
pub struct SearchResultItem {
    pub record_id: String,
    pub doc_id: String,
    pub score: f32,
    pub origin: Collection,
    pub metadata: Metadata,
    /// Stage-1 cosine similarity of the lead vector. Carried through only
    /// to break ties in the final ranking (SPEC_FULL.md §4.5 step 3); not
    /// part of the returned score.
    pub stage1_similarity: f32,
}

#[derive(Debug, Clone, Default)]
pub struct SearchOutcome {
    pub results: Vec<SearchResultItem>,
    /// Candidates dropped during Stage 2 because their stored sequence
    /// failed to decode (SPEC_FULL.md §8 scenario 5).
    pub dropped_corrupt: usize,
    pub partial: bool,
}

#[derive(Debug, Error)]
pub enum SearchError {
    #[error("invalid query: {0}")]
    InvalidQuery(String),
    #[error("invalid filter: {0}")]
    InvalidFilter(String),
    #[error("embedding failed: {0}")]
    EmbeddingFailed(#[from] EmbeddingError),
    #[error("store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),
    #[error("search deadline exceeded")]
    Timeout,
}

fn doc_id_of(metadata: &Metadata) -> String {
    metadata
        .get("doc_id")
        .and_then(|v| v.as_text())
        .unwrap_or_default()
        .to_string()
}

/// Min-max normalize a list of scores into `[0, 1]`. A list with identical
/// or single scores normalizes to all-`1.0` (avoids a divide-by-zero and
/// matches the teacher's `normalize_scores` behavior at the boundary).
fn normalize_scores(scores: &[f32]) -> Vec<f32> {
    if scores.is_empty() {
        return Vec::new();
    }
    let min = scores.iter().cloned().fold(f32::INFINITY, f32::min);
    let max = scores.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    if (max - min).abs() < f32::EPSILON {
        return vec![1.0; scores.len()];
    }
    scores.iter().map(|s| (s - min) / (max - min)).collect()
}

struct ScoredCandidate {
    record: StoreRecord,
    origin: Collection,
    score: f32,
}

/// Stage 2: decode each candidate's stored sequence and score it against
/// the query multi-vector. Decode failures are dropped, not fatal. Stops
/// early and reports `partial` once `deadline` has passed, returning
/// whatever has been scored so far (SPEC_FULL.md §5 cancellation/timeouts).
fn rerank<E: EmbeddingEngine + ?Sized>(
    engine: &E,
    query_mv: &MultiVector,
    candidates: Vec<(StoreRecord, Collection)>,
    dropped_corrupt: &mut usize,
    deadline: Instant,
    partial: &mut bool,
) -> Vec<ScoredCandidate> {
    let mut scored = Vec::with_capacity(candidates.len());
    for (record, origin) in candidates {
        if Instant::now() >= deadline {
            *partial = true;
            break;
        }
        let encoded = match record.metadata.get(SEQUENCE_METADATA_KEY).and_then(|v| v.as_text()) {
            Some(s) => s,
            None => {
                *dropped_corrupt += 1;
                continue;
            }
        };
        let doc_mv = match decode_sequence_b64(encoded) {
            Ok(mv) => mv,
            Err(CodecError::CorruptPayload(_)) | Err(CodecError::SchemaMismatch(_)) => {
                *dropped_corrupt += 1;
                continue;
            }
            Err(CodecError::SizeExceeded { .. }) => {
                *dropped_corrupt += 1;
                continue;
            }
        };
        let score = engine.score_multi_vector(query_mv, &doc_mv);
        scored.push(ScoredCandidate {
            record,
            origin,
            score,
        });
    }
    scored
}

/// Run a search against the given engine and store.
///
/// `query` must be 2..=500 characters. `params.n_results` of `0` returns an
/// empty result set without error (SPEC_FULL.md §8 boundary behaviors).
pub async fn search<E, S>(
    engine: &E,
    store: &S,
    query: &str,
    mode: SearchMode,
    params: &SearchParams,
    filter: Option<&WhereFilter>,
) -> Result<SearchOutcome, SearchError>
where
    E: EmbeddingEngine + ?Sized,
    S: VectorStoreClient + ?Sized,
{
    let char_len = query.chars().count();
    if !(2..=500).contains(&char_len) {
        return Err(SearchError::InvalidQuery(format!(
            "query must be 2..=500 chars, got {char_len}"
        )));
    }

    if params.n_results == 0 {
        return Ok(SearchOutcome::default());
    }

    let started = Instant::now();
    let deadline = started + Duration::from_millis(params.deadline_ms.max(1));

    // Every query is ANDed with the visibility flag so a document mid-ingestion
    // (whose records are still tagged incomplete) never surfaces (SPEC_FULL.md
    // §3 lifecycle, §5 ordering).
    let visible = WhereFilter::Eq(INGEST_COMPLETE_KEY.to_string(), MetaValue::Bool(true));
    let visible_filter = match filter {
        Some(f) => WhereFilter::All(vec![f.clone(), visible]),
        None => visible,
    };

    let query_embedding = engine.embed_query(query).await?;
    let query_mv = &query_embedding.multi_vector;
    let k = params.shortlist_size();

    let mut visual_hits = Vec::new();
    let mut text_hits = Vec::new();

    if mode.wants_visual() {
        visual_hits = store
            .query(Collection::Visual, query_embedding.lead_vector(), k, Some(&visible_filter))
            .await?;
    }
    if mode.wants_text() {
        text_hits = store
            .query(Collection::Text, query_embedding.lead_vector(), k, Some(&visible_filter))
            .await?;
    }

    if Instant::now() >= deadline {
        return Err(SearchError::Timeout);
    }

    let mut dropped_corrupt = 0usize;
    let mut partial = false;

    let visual_candidates: Vec<_> = visual_hits.into_iter().map(|r| (r, Collection::Visual)).collect();
    let visual_scored = rerank(engine, query_mv, visual_candidates, &mut dropped_corrupt, deadline, &mut partial);

    let text_candidates: Vec<_> = text_hits.into_iter().map(|r| (r, Collection::Text)).collect();
    let text_scored = rerank(engine, query_mv, text_candidates, &mut dropped_corrupt, deadline, &mut partial);

    let merged = match mode {
        SearchMode::VisualOnly => into_items(visual_scored),
        SearchMode::TextOnly => into_items(text_scored),
        SearchMode::Hybrid => {
            let visual_norm = normalize_scores(&visual_scored.iter().map(|c| c.score).collect::<Vec<_>>());
            let text_norm = normalize_scores(&text_scored.iter().map(|c| c.score).collect::<Vec<_>>());

            let mut items: Vec<SearchResultItem> = visual_scored
                .into_iter()
                .zip(visual_norm)
                .map(|(c, norm)| to_item(c, norm))
                .collect();
            items.extend(text_scored.into_iter().zip(text_norm).map(|(c, norm)| to_item(c, norm)));
            items
        }
    };

    let grouped = group_by_document(merged);
    let ranked = rank_and_truncate(grouped, params.n_results);

    Ok(SearchOutcome {
        results: ranked,
        dropped_corrupt,
        partial,
    })
}

fn to_item(c: ScoredCandidate, score: f32) -> SearchResultItem {
    SearchResultItem {
        doc_id: doc_id_of(&c.record.metadata),
        record_id: c.record.id,
        stage1_similarity: c.record.similarity,
        score,
        origin: c.origin,
        metadata: c.record.metadata,
    }
}

fn into_items(candidates: Vec<ScoredCandidate>) -> Vec<SearchResultItem> {
    candidates
        .into_iter()
        .map(|c| {
            let score = c.score;
            to_item(c, score)
        })
        .collect()
}

/// Group merged candidates by `doc_id`, keeping only the highest-scoring
/// record per document (SPEC_FULL.md §4.5 step 4).
fn group_by_document(items: Vec<SearchResultItem>) -> Vec<SearchResultItem> {
    use std::collections::HashMap;
    let mut best: HashMap<String, SearchResultItem> = HashMap::new();
    for item in items {
        best.entry(item.doc_id.clone())
            .and_modify(|existing| {
                if item.score > existing.score {
                    *existing = item.clone();
                }
            })
            .or_insert(item);
    }
    best.into_values().collect()
}

/// Sort by score descending, ties broken by Stage-1 similarity descending,
/// then by record id ascending (stable), then truncate to `n_results`
/// (SPEC_FULL.md §4.5 step 3).
fn rank_and_truncate(mut items: Vec<SearchResultItem>, n_results: usize) -> Vec<SearchResultItem> {
    items.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.stage1_similarity.partial_cmp(&a.stage1_similarity).unwrap_or(std::cmp::Ordering::Equal))
            .then_with(|| a.record_id.cmp(&b.record_id))
    });
    items.truncate(n_results);
    items
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{BatchEmbedding, Embedding};
    use crate::store::MetaValue;
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    struct FakeEngine;

    #[async_trait]
    impl EmbeddingEngine for FakeEngine {
        async fn embed_images(&self, _images: &[Vec<u8>]) -> Result<BatchEmbedding, EmbeddingError> {
            unimplemented!()
        }
        async fn embed_texts(&self, _texts: &[String]) -> Result<BatchEmbedding, EmbeddingError> {
            unimplemented!()
        }
        async fn embed_query(&self, _query: &str) -> Result<Embedding, EmbeddingError> {
            Ok(Embedding {
                multi_vector: MultiVector::from_rows(vec![vec![1.0, 0.0]]).unwrap(),
            })
        }
    }

    struct FakeStore {
        visual: Vec<StoreRecord>,
        text: Vec<StoreRecord>,
        queries: Mutex<Vec<Collection>>,
    }

    #[async_trait]
    impl VectorStoreClient for FakeStore {
        async fn upsert(
            &self,
            _collection: Collection,
            _id: &str,
            _lead_vector: &[f32],
            _metadata: Metadata,
        ) -> Result<(), StoreError> {
            unimplemented!()
        }

        async fn query(
            &self,
            collection: Collection,
            _lead_vector: &[f32],
            _k: usize,
            where_filter: Option<&WhereFilter>,
        ) -> Result<Vec<StoreRecord>, StoreError> {
            self.queries.lock().unwrap().push(collection);
            let raw = match collection {
                Collection::Visual => &self.visual,
                Collection::Text => &self.text,
            };
            Ok(raw
                .iter()
                .filter(|r| where_filter.map(|f| f.matches(&r.metadata)).unwrap_or(true))
                .cloned()
                .collect())
        }

        async fn get_many(
            &self,
            _collection: Collection,
            _ids: &[String],
        ) -> Result<Vec<StoreRecord>, StoreError> {
            unimplemented!()
        }

        async fn delete_by(
            &self,
            _collection: Collection,
            _where_filter: &WhereFilter,
        ) -> Result<u64, StoreError> {
            unimplemented!()
        }

        async fn heartbeat(&self) -> bool {
            true
        }
    }

    fn record(id: &str, doc_id: &str, mv: MultiVector) -> StoreRecord {
        record_with_completion(id, doc_id, mv, true)
    }

    fn record_with_completion(id: &str, doc_id: &str, mv: MultiVector, complete: bool) -> StoreRecord {
        let mut metadata: Metadata = BTreeMap::new();
        metadata.insert("doc_id".into(), MetaValue::Text(doc_id.into()));
        metadata.insert(
            SEQUENCE_METADATA_KEY.into(),
            MetaValue::Text(crate::codec::encode_sequence_b64(&mv).unwrap()),
        );
        metadata.insert(INGEST_COMPLETE_KEY.into(), MetaValue::Bool(complete));
        StoreRecord {
            id: id.into(),
            similarity: 1.0,
            metadata,
        }
    }

    fn params(n: usize) -> SearchParams {
        SearchParams {
            n_results: n,
            candidate_multiplier: 10,
            min_candidates: 10,
            deadline_ms: 5_000,
        }
    }

    #[tokio::test]
    async fn text_only_mode_never_queries_visual() {
        let store = FakeStore {
            visual: vec![record(
                "v1",
                "docA",
                MultiVector::from_rows(vec![vec![1.0, 0.0]]).unwrap(),
            )],
            text: vec![record(
                "t1",
                "docB",
                MultiVector::from_rows(vec![vec![1.0, 0.0]]).unwrap(),
            )],
            queries: Mutex::new(Vec::new()),
        };
        let outcome = search(&FakeEngine, &store, "methods section", SearchMode::TextOnly, &params(5), None)
            .await
            .unwrap();
        assert_eq!(outcome.results.len(), 1);
        assert_eq!(outcome.results[0].doc_id, "docB");
        assert_eq!(*store.queries.lock().unwrap(), vec![Collection::Text]);
    }

    #[tokio::test]
    async fn hybrid_merges_and_groups_by_document() {
        let store = FakeStore {
            visual: vec![record(
                "v1",
                "docA",
                MultiVector::from_rows(vec![vec![0.0, 1.0]]).unwrap(),
            )],
            text: vec![record(
                "t1",
                "docA",
                MultiVector::from_rows(vec![vec![1.0, 0.0]]).unwrap(),
            )],
            queries: Mutex::new(Vec::new()),
        };
        let outcome = search(&FakeEngine, &store, "results page", SearchMode::Hybrid, &params(5), None)
            .await
            .unwrap();
        // Same doc_id from both collections: only the higher-scoring record survives.
        assert_eq!(outcome.results.len(), 1);
        assert_eq!(outcome.results[0].doc_id, "docA");
    }

    #[tokio::test]
    async fn query_too_short_is_rejected() {
        let store = FakeStore {
            visual: vec![],
            text: vec![],
            queries: Mutex::new(Vec::new()),
        };
        let err = search(&FakeEngine, &store, "a", SearchMode::Hybrid, &params(5), None)
            .await
            .unwrap_err();
        assert!(matches!(err, SearchError::InvalidQuery(_)));
    }

    #[tokio::test]
    async fn zero_n_results_returns_empty_without_querying() {
        let store = FakeStore {
            visual: vec![],
            text: vec![],
            queries: Mutex::new(Vec::new()),
        };
        let outcome = search(&FakeEngine, &store, "anything goes", SearchMode::Hybrid, &params(0), None)
            .await
            .unwrap();
        assert!(outcome.results.is_empty());
        assert!(store.queries.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn corrupt_candidate_is_dropped_not_fatal() {
        let mut bad = record("v1", "docA", MultiVector::from_rows(vec![vec![1.0, 0.0]]).unwrap());
        bad.metadata.insert(
            SEQUENCE_METADATA_KEY.into(),
            MetaValue::Text("not valid base64 at all!!".into()),
        );
        let good = record("v2", "docB", MultiVector::from_rows(vec![vec![1.0, 0.0]]).unwrap());
        let store = FakeStore {
            visual: vec![bad, good],
            text: vec![],
            queries: Mutex::new(Vec::new()),
        };
        let outcome = search(&FakeEngine, &store, "query text", SearchMode::VisualOnly, &params(5), None)
            .await
            .unwrap();
        assert_eq!(outcome.dropped_corrupt, 1);
        assert_eq!(outcome.results.len(), 1);
        assert_eq!(outcome.results[0].doc_id, "docB");
    }

    #[test]
    fn normalize_scores_handles_flat_list() {
        assert_eq!(normalize_scores(&[3.0, 3.0, 3.0]), vec![1.0, 1.0, 1.0]);
        assert_eq!(normalize_scores(&[]), Vec::<f32>::new());
        let scores = normalize_scores(&[0.0, 5.0, 10.0]);
        assert!((scores[0] - 0.0).abs() < 1e-6);
        assert!((scores[2] - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn incomplete_record_never_surfaces_in_search() {
        let store = FakeStore {
            visual: vec![record_with_completion(
                "v1",
                "docA",
                MultiVector::from_rows(vec![vec![1.0, 0.0]]).unwrap(),
                false,
            )],
            text: vec![],
            queries: Mutex::new(Vec::new()),
        };
        let outcome = search(&FakeEngine, &store, "query text", SearchMode::VisualOnly, &params(5), None)
            .await
            .unwrap();
        assert!(outcome.results.is_empty());
    }

    #[tokio::test]
    async fn user_filter_is_combined_with_visibility_filter() {
        let store = FakeStore {
            visual: vec![
                record("v1", "docA", MultiVector::from_rows(vec![vec![1.0, 0.0]]).unwrap()),
                record_with_completion(
                    "v2",
                    "docB",
                    MultiVector::from_rows(vec![vec![1.0, 0.0]]).unwrap(),
                    false,
                ),
            ],
            text: vec![],
            queries: Mutex::new(Vec::new()),
        };
        let filter = WhereFilter::In(
            "doc_id".into(),
            vec![MetaValue::Text("docA".into()), MetaValue::Text("docB".into())],
        );
        let outcome = search(
            &FakeEngine,
            &store,
            "query text",
            SearchMode::VisualOnly,
            &params(5),
            Some(&filter),
        )
        .await
        .unwrap();
        assert_eq!(outcome.results.len(), 1);
        assert_eq!(outcome.results[0].doc_id, "docA");
    }

    struct SlowEngine;

    #[async_trait]
    impl EmbeddingEngine for SlowEngine {
        async fn embed_images(&self, _images: &[Vec<u8>]) -> Result<BatchEmbedding, EmbeddingError> {
            unimplemented!()
        }
        async fn embed_texts(&self, _texts: &[String]) -> Result<BatchEmbedding, EmbeddingError> {
            unimplemented!()
        }
        async fn embed_query(&self, _query: &str) -> Result<Embedding, EmbeddingError> {
            // Simulate a slow embedding call so Stage 1 finishes after the deadline.
            tokio::time::sleep(Duration::from_millis(20)).await;
            Ok(Embedding {
                multi_vector: MultiVector::from_rows(vec![vec![1.0, 0.0]]).unwrap(),
            })
        }
    }

    #[tokio::test]
    async fn deadline_exceeded_after_stage_one_returns_timeout() {
        let store = FakeStore {
            visual: vec![record("v1", "docA", MultiVector::from_rows(vec![vec![1.0, 0.0]]).unwrap())],
            text: vec![],
            queries: Mutex::new(Vec::new()),
        };
        let mut p = params(5);
        p.deadline_ms = 1;
        let err = search(&SlowEngine, &store, "query text", SearchMode::VisualOnly, &p, None)
            .await
            .unwrap_err();
        assert!(matches!(err, SearchError::Timeout));
    }

    #[test]
    fn rank_and_truncate_breaks_ties_by_stage1_similarity_then_id() {
        let mut m: Metadata = BTreeMap::new();
        m.insert("doc_id".into(), MetaValue::Text("x".into()));
        let item = |id: &str, score: f32, sim: f32| SearchResultItem {
            record_id: id.to_string(),
            doc_id: id.to_string(),
            score,
            origin: Collection::Visual,
            metadata: m.clone(),
            stage1_similarity: sim,
        };
        let items = vec![item("b", 1.0, 0.5), item("a", 1.0, 0.9)];
        let ranked = rank_and_truncate(items, 5);
        assert_eq!(ranked[0].record_id, "a");
        assert_eq!(ranked[1].record_id, "b");
    }
}
