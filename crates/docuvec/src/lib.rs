//! # Docuvec
//!
//! **Multimodal, multi-vector document search service.**
//!
//! Docuvec ingests documents page-by-page, embedding both the rendered page
//! image and its extracted text as late-interaction multi-vector sequences,
//! and serves two-stage retrieval over them: an approximate lead-vector
//! shortlist followed by exact MaxSim re-ranking (see [`docuvec_core::search`]).
//!
//! ## Data Flow
//!
//! 1. A document is submitted to the [`ingestion`] pipeline by `doc_id`.
//! 2. Each page is parsed ([`parser`]) into a raster plus extracted text.
//! 3. Pages and text chunks are embedded in batches via an
//!    [`docuvec_core::embedding::EmbeddingEngine`] ([`embedding_engines`]).
//! 4. Records are enriched with structure/context metadata and stored in
//!    the `visual` and `text` collections of a
//!    [`docuvec_core::store::VectorStoreClient`] ([`store_memory`],
//!    [`store_sqlite`]).
//! 5. Queries run through [`docuvec_core::search`]'s two-stage engine.
//! 6. Everything is exposed over HTTP by [`server`]; [`stats`] tracks
//!    rolling per-operation latencies.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | Environment-variable configuration and validation |
//! | [`db`] | SQLite connection pool with WAL mode |
//! | [`migrate`] | Database schema migrations (idempotent) |
//! | [`store_memory`] | In-process `VectorStoreClient` for tests and small deployments |
//! | [`store_sqlite`] | SQLite-backed `VectorStoreClient` |
//! | [`embedding_engines`] | `EmbeddingEngine` implementations: deterministic hash engine, HTTP adapter |
//! | [`parser`] | Document parser contract plus a plain-text stand-in |
//! | [`ingestion`] | Submit/status/delete pipeline: parse → embed → store |
//! | [`server`] | HTTP server (Axum) exposing ingestion, search, and document retrieval |
//! | [`stats`] | Rolling per-operation latency and candidate-count counters |

pub mod config;
pub mod db;
pub mod embedding_engines;
pub mod ingestion;
pub mod migrate;
pub mod parser;
pub mod server;
pub mod stats;
pub mod store_memory;
pub mod store_sqlite;
