//! # docuvec-core
//!
//! Store-agnostic, model-agnostic core of the multi-vector document search
//! engine: the data model, the paragraph chunker, the sequence/structure
//! codec, the [`store::VectorStoreClient`] and [`embedding::EmbeddingEngine`]
//! contracts, and the two-stage MaxSim [`search`] algorithm built on top of
//! both.
//!
//! This crate has no tokio, sqlx, or filesystem dependency — concrete store
//! backends, the ingestion pipeline, and the HTTP surface live in the
//! `docuvec` application crate.

pub mod chunk;
pub mod codec;
pub mod embedding;
pub mod models;
pub mod search;
pub mod store;
