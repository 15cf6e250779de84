//! Narrow contract over the external ANN vector store (SPEC_FULL.md §4.2).
//!
//! The store itself — HNSW index, persistence, replication — is out of
//! scope; this trait is the total surface the rest of the core relies on,
//! generalizing the teacher's single-collection `Store` trait to the two
//! named collections (`visual`, `text`) and flat-metadata discipline this
//! domain requires.

use std::collections::BTreeMap;

use async_trait::async_trait;
use thiserror::Error;

/// One of the two named collections a deployment maintains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Visual,
    Text,
}

impl Collection {
    pub fn as_str(self) -> &'static str {
        match self {
            Collection::Visual => "visual",
            Collection::Text => "text",
        }
    }
}

/// Flat metadata value. Nested objects are rejected by construction: arrays
/// and structure blobs must be pre-encoded to strings by the caller (the
/// Codec) before being placed here (SPEC_FULL.md §4.2's flatness rule).
#[derive(Debug, Clone, PartialEq)]
pub enum MetaValue {
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
}

impl MetaValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            MetaValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            MetaValue::Int(i) => Some(*i),
            _ => None,
        }
    }
}

pub type Metadata = BTreeMap<String, MetaValue>;

/// A record returned from [`VectorStoreClient::query`] or
/// [`VectorStoreClient::get_many`].
#[derive(Debug, Clone)]
pub struct StoreRecord {
    pub id: String,
    pub similarity: f32,
    pub metadata: Metadata,
}

/// A structured predicate over flat metadata fields, used by `query` and
/// `delete_by` (SPEC_FULL.md §4.2).
#[derive(Debug, Clone)]
pub enum WhereFilter {
    Eq(String, MetaValue),
    In(String, Vec<MetaValue>),
    ContainsSubstring(String, String),
    ArrayNonEmpty(String),
    /// Inclusive numeric bounds on an integer field (timestamps, pages).
    /// A missing bound is unconstrained on that side.
    Range(String, Option<i64>, Option<i64>),
    All(Vec<WhereFilter>),
    Any(Vec<WhereFilter>),
}

impl WhereFilter {
    pub fn doc_id(doc_id: impl Into<String>) -> Self {
        WhereFilter::Eq("doc_id".to_string(), MetaValue::Text(doc_id.into()))
    }

    /// Evaluate the predicate against a record's metadata. Store
    /// implementations that cannot push the filter down to their own query
    /// engine may fall back to this for in-process filtering.
    pub fn matches(&self, metadata: &Metadata) -> bool {
        match self {
            WhereFilter::Eq(key, value) => metadata.get(key) == Some(value),
            WhereFilter::In(key, values) => metadata
                .get(key)
                .map(|v| values.contains(v))
                .unwrap_or(false),
            WhereFilter::ContainsSubstring(key, needle) => metadata
                .get(key)
                .and_then(MetaValue::as_text)
                .map(|s| s.contains(needle.as_str()))
                .unwrap_or(false),
            WhereFilter::ArrayNonEmpty(key) => metadata
                .get(key)
                .and_then(MetaValue::as_text)
                .map(|s| s != "[]" && !s.is_empty())
                .unwrap_or(false),
            WhereFilter::Range(key, min, max) => metadata
                .get(key)
                .and_then(MetaValue::as_int)
                .map(|v| min.map_or(true, |lo| v >= lo) && max.map_or(true, |hi| v <= hi))
                .unwrap_or(false),
            WhereFilter::All(filters) => filters.iter().all(|f| f.matches(metadata)),
            WhereFilter::Any(filters) => filters.iter().any(|f| f.matches(metadata)),
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store transport error: {0}")]
    Transport(String),
    #[error("encoded payload too large: {0}")]
    SizeExceeded(String),
    #[error("record not found: {0}")]
    NotFound(String),
    #[error("invalid filter: {0}")]
    InvalidFilter(String),
}

/// Narrow client contract over an external ANN store (SPEC_FULL.md §4.2).
///
/// Implementations must be `Send + Sync` to be shared across the ingestion
/// worker pool and concurrent search requests.
#[async_trait]
pub trait VectorStoreClient: Send + Sync {
    /// Idempotent upsert by `id`. `lead_vector` must already be
    /// unit-normalized (invariant 2, SPEC_FULL.md §3).
    async fn upsert(
        &self,
        collection: Collection,
        id: &str,
        lead_vector: &[f32],
        metadata: Metadata,
    ) -> Result<(), StoreError>;

    /// Top-`k` by cosine similarity of `lead_vector`, optionally filtered.
    async fn query(
        &self,
        collection: Collection,
        lead_vector: &[f32],
        k: usize,
        where_filter: Option<&WhereFilter>,
    ) -> Result<Vec<StoreRecord>, StoreError>;

    /// By-id fetch, used to hydrate candidates for Stage-2 re-ranking.
    async fn get_many(
        &self,
        collection: Collection,
        ids: &[String],
    ) -> Result<Vec<StoreRecord>, StoreError>;

    /// Bulk delete, used to remove every record for a `doc_id`
    /// (invariant 7, SPEC_FULL.md §3: document deletion is atomic).
    async fn delete_by(
        &self,
        collection: Collection,
        where_filter: &WhereFilter,
    ) -> Result<u64, StoreError>;

    async fn heartbeat(&self) -> bool;
}
