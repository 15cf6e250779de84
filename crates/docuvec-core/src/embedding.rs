//! Multi-vector embedding types, the [`EmbeddingEngine`] contract, and the
//! late-interaction MaxSim scoring kernel.
//!
//! The embedding model itself is out of scope; this module defines only the
//! shape the rest of the core relies on, plus the pure-math scoring
//! function both sides of that contract must agree on.

use ndarray::Array2;
use thiserror::Error;

/// An ordered sequence of unit-normalized vectors, row-major (`T` rows of
/// `D` columns). The first row is the lead vector used for Stage-1 ANN
/// shortlisting (SPEC_FULL.md §3).
#[derive(Debug, Clone, PartialEq)]
pub struct MultiVector {
    dims: usize,
    rows: Vec<f32>,
}

impl MultiVector {
    /// Builds a `MultiVector` from `T` rows of `D` values each, normalizing
    /// every row to unit length. Returns `None` for an empty sequence — a
    /// multi-vector must have at least one token (its lead vector).
    pub fn from_rows(rows: Vec<Vec<f32>>) -> Option<Self> {
        let dims = rows.first()?.len();
        if dims == 0 || rows.iter().any(|r| r.len() != dims) {
            return None;
        }
        let mut flat = Vec::with_capacity(rows.len() * dims);
        for row in &rows {
            flat.extend_from_slice(&normalize(row));
        }
        Some(Self { dims, rows: flat })
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn len(&self) -> usize {
        if self.dims == 0 {
            0
        } else {
            self.rows.len() / self.dims
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn row(&self, i: usize) -> &[f32] {
        &self.rows[i * self.dims..(i + 1) * self.dims]
    }

    /// The first token of the sequence — already unit-normalized.
    pub fn lead_vector(&self) -> &[f32] {
        self.row(0)
    }

    pub fn as_flat_slice(&self) -> &[f32] {
        &self.rows
    }

    /// View the sequence as a `T x D` matrix for the MaxSim matmul kernel.
    pub fn as_array2(&self) -> Array2<f32> {
        Array2::from_shape_vec((self.len(), self.dims), self.rows.clone())
            .expect("rows length is always len() * dims by construction")
    }

    /// Construct directly from an already-normalized flat row-major buffer,
    /// used by the codec when decoding a stored sequence.
    pub fn from_flat(dims: usize, rows: Vec<f32>) -> Option<Self> {
        if dims == 0 || rows.len() % dims != 0 {
            return None;
        }
        Some(Self { dims, rows })
    }
}

fn normalize(v: &[f32]) -> Vec<f32> {
    let norm = (v.iter().map(|x| x * x).sum::<f32>()).sqrt();
    if norm < f32::EPSILON {
        return v.to_vec();
    }
    v.iter().map(|x| x / norm).collect()
}

/// Plain cosine similarity between two equal-length vectors (reduces to a
/// dot product when both are already unit-normalized, per invariant 2 in
/// SPEC_FULL.md §3).
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a < f32::EPSILON || mag_b < f32::EPSILON {
        0.0
    } else {
        dot / (mag_a * mag_b)
    }
}

/// Late-interaction MaxSim score between a query and a document multi-vector:
/// for every query token, the best cosine similarity against any document
/// token, summed across query tokens (SPEC_FULL.md §4.5).
///
/// Implemented as a single `T_query x D` by `D x T_doc` matrix product
/// followed by a per-row max, rather than a nested scalar loop, so the
/// inner path allocates once per call regardless of `T_query`/`T_doc`.
pub fn max_sim(query: &MultiVector, doc: &MultiVector) -> f32 {
    if query.is_empty() || doc.is_empty() || query.dims() != doc.dims() {
        return 0.0;
    }
    let q = query.as_array2();
    let d = doc.as_array2();
    let sims = q.dot(&d.t());
    sims.rows()
        .into_iter()
        .map(|row| row.iter().cloned().fold(f32::MIN, f32::max))
        .sum()
}

/// A single multi-vector embedding.
#[derive(Debug, Clone)]
pub struct Embedding {
    pub multi_vector: MultiVector,
}

impl Embedding {
    pub fn lead_vector(&self) -> &[f32] {
        self.multi_vector.lead_vector()
    }
}

/// Result of a batched embedding call: one [`Embedding`] per input, in
/// input order. A `None` entry means that item failed independently of the
/// others (`BatchFailure`, SPEC_FULL.md §4.3).
#[derive(Debug, Clone, Default)]
pub struct BatchEmbedding {
    pub items: Vec<Option<Embedding>>,
}

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("embedding model unavailable: {0}")]
    ModelUnavailable(String),
    #[error("input too large: {0}")]
    InputTooLarge(String),
    #[error("batch failure: {0}")]
    BatchFailure(String),
}

/// External contract the core relies on for producing and scoring
/// embeddings. The embedding model itself is out of scope; implementations
/// live in the application crate (SPEC_FULL.md §4.3).
#[async_trait::async_trait]
pub trait EmbeddingEngine: Send + Sync {
    async fn embed_images(&self, images: &[Vec<u8>]) -> Result<BatchEmbedding, EmbeddingError>;
    async fn embed_texts(&self, texts: &[String]) -> Result<BatchEmbedding, EmbeddingError>;
    async fn embed_query(&self, query: &str) -> Result<Embedding, EmbeddingError>;

    /// Default MaxSim implementation in terms of the pure kernel above;
    /// implementations may override only if they have a faster native path.
    fn score_multi_vector(&self, query_mv: &MultiVector, doc_mv: &MultiVector) -> f32 {
        max_sim(query_mv, doc_mv)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mv(rows: Vec<Vec<f32>>) -> MultiVector {
        MultiVector::from_rows(rows).unwrap()
    }

    #[test]
    fn lead_vector_is_first_row_normalized() {
        let m = mv(vec![vec![3.0, 4.0], vec![1.0, 0.0]]);
        assert_eq!(m.lead_vector(), &[0.6, 0.8]);
    }

    #[test]
    fn cosine_similarity_edge_cases() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn max_sim_matches_naive_nested_loop() {
        let q = mv(vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
        let d = mv(vec![vec![1.0, 0.0], vec![0.7, 0.7], vec![0.0, 1.0]]);

        let mut expected = 0.0f32;
        for i in 0..q.len() {
            let mut best = f32::MIN;
            for j in 0..d.len() {
                best = best.max(cosine_similarity(q.row(i), d.row(j)));
            }
            expected += best;
        }

        assert!((max_sim(&q, &d) - expected).abs() < 1e-4);
    }

    #[test]
    fn max_sim_empty_sequence_is_zero() {
        let q = mv(vec![vec![1.0, 0.0]]);
        let empty = MultiVector::from_flat(2, vec![]).unwrap();
        assert_eq!(max_sim(&q, &empty), 0.0);
    }

    #[test]
    fn max_sim_dimension_mismatch_is_zero() {
        let q = mv(vec![vec![1.0, 0.0]]);
        let d = mv(vec![vec![1.0, 0.0, 0.0]]);
        assert_eq!(max_sim(&q, &d), 0.0);
    }
}
