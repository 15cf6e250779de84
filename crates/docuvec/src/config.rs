//! Process configuration, assembled once at startup from environment
//! variables (SPEC_FULL.md §6.5). Unlike the teacher's TOML-file config,
//! this spec's external interface names environment variables directly;
//! the struct+validate idiom is kept, only the source changes.

use anyhow::{bail, Result};
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Config {
    /// `EMBEDDING_DIM` — D, the multi-vector dimensionality.
    pub embedding_dim: usize,
    /// `B_VISUAL` — ingestion batch size for page images.
    pub batch_visual: usize,
    /// `B_TEXT` — ingestion batch size for text chunks.
    pub batch_text: usize,
    /// `CANDIDATE_MULTIPLIER` — Stage-1 shortlist size multiplier.
    pub candidate_multiplier: usize,
    /// `MIN_CANDIDATES` — Stage-1 shortlist floor.
    pub min_candidates: usize,
    /// `SEARCH_DEADLINE_MS` — per-query deadline.
    pub search_deadline_ms: u64,
    /// `STORE_HOST` / `STORE_PORT` — external ANN store endpoint, when the
    /// SQLite-backed client is not used.
    pub store_host: String,
    pub store_port: u16,
    /// `INGEST_QUEUE_CAPACITY` — bounded submission queue size.
    pub ingest_queue_capacity: usize,
    /// `INGEST_WORKERS` — ingestion worker pool size.
    pub ingest_workers: usize,
    /// `DECODE_CACHE_BYTES` — optional Stage-2 decoded-vector LRU budget.
    pub decode_cache_bytes: usize,
    /// Persistent SQLite database path (not named in SPEC_FULL.md §6.5, but
    /// required by the SQLite-backed `VectorStoreClient`; an ambient
    /// addition, not a spec-defined knob).
    pub db_path: PathBuf,
    /// Embedding engine backend: `"hash"` (deterministic local stand-in) or
    /// `"http"` (remote embedding service).
    pub embedding_provider: String,
    /// Base URL for the HTTP embedding engine, required when
    /// `embedding_provider = "http"`.
    pub embedding_endpoint: Option<String>,
    /// HTTP bind address for the axum server.
    pub server_bind: String,
    /// Text chunker's token budget per chunk. Not named in SPEC_FULL.md
    /// §6.5's env var list; kept as an ambient default mirroring the
    /// teacher's `config.chunking.max_tokens`.
    pub chunk_max_tokens: usize,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> Result<T> {
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|_| anyhow::anyhow!("{key} must be a valid value, got '{raw}'")),
        Err(_) => Ok(default),
    }
}

impl Config {
    /// Load configuration from environment variables, falling back to the
    /// reference defaults from SPEC_FULL.md §6.5, then validate.
    pub fn from_env() -> Result<Self> {
        let config = Config {
            embedding_dim: env_parse("EMBEDDING_DIM", 128)?,
            batch_visual: env_parse("B_VISUAL", 4)?,
            batch_text: env_parse("B_TEXT", 8)?,
            candidate_multiplier: env_parse("CANDIDATE_MULTIPLIER", 10)?,
            min_candidates: env_parse("MIN_CANDIDATES", 100)?,
            search_deadline_ms: env_parse("SEARCH_DEADLINE_MS", 5_000)?,
            store_host: env_or("STORE_HOST", "127.0.0.1"),
            store_port: env_parse("STORE_PORT", 8_100)?,
            ingest_queue_capacity: env_parse("INGEST_QUEUE_CAPACITY", 256)?,
            ingest_workers: env_parse("INGEST_WORKERS", 1)?,
            decode_cache_bytes: env_parse("DECODE_CACHE_BYTES", 0)?,
            db_path: PathBuf::from(env_or("DB_PATH", "./docuvec.db")),
            embedding_provider: env_or("EMBEDDING_PROVIDER", "hash"),
            embedding_endpoint: std::env::var("EMBEDDING_ENDPOINT").ok(),
            server_bind: env_or("SERVER_BIND", "127.0.0.1:8080"),
            chunk_max_tokens: env_parse("CHUNK_MAX_TOKENS", 700)?,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.embedding_dim == 0 {
            bail!("EMBEDDING_DIM must be > 0");
        }
        if self.batch_visual == 0 || self.batch_text == 0 {
            bail!("B_VISUAL and B_TEXT must be > 0");
        }
        if self.candidate_multiplier == 0 {
            bail!("CANDIDATE_MULTIPLIER must be > 0");
        }
        if self.ingest_workers == 0 {
            bail!("INGEST_WORKERS must be > 0");
        }
        if self.ingest_queue_capacity == 0 {
            bail!("INGEST_QUEUE_CAPACITY must be > 0");
        }
        match self.embedding_provider.as_str() {
            "hash" => {}
            "http" => {
                if self.embedding_endpoint.is_none() {
                    bail!("EMBEDDING_ENDPOINT must be set when EMBEDDING_PROVIDER=http");
                }
            }
            other => bail!("unknown EMBEDDING_PROVIDER '{other}', must be 'hash' or 'http'"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn defaults_validate_cleanly() {
        let _guard = ENV_LOCK.lock().unwrap();
        for key in [
            "EMBEDDING_DIM",
            "B_VISUAL",
            "B_TEXT",
            "CANDIDATE_MULTIPLIER",
            "MIN_CANDIDATES",
            "SEARCH_DEADLINE_MS",
            "STORE_HOST",
            "STORE_PORT",
            "INGEST_QUEUE_CAPACITY",
            "INGEST_WORKERS",
            "DECODE_CACHE_BYTES",
            "DB_PATH",
            "EMBEDDING_PROVIDER",
            "EMBEDDING_ENDPOINT",
            "SERVER_BIND",
            "CHUNK_MAX_TOKENS",
        ] {
            std::env::remove_var(key);
        }
        let config = Config::from_env().unwrap();
        assert_eq!(config.embedding_dim, 128);
        assert_eq!(config.embedding_provider, "hash");
    }

    #[test]
    fn http_provider_requires_endpoint() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var("EMBEDDING_PROVIDER", "http");
        std::env::remove_var("EMBEDDING_ENDPOINT");
        let err = Config::from_env().unwrap_err();
        assert!(err.to_string().contains("EMBEDDING_ENDPOINT"));
        std::env::remove_var("EMBEDDING_PROVIDER");
    }

    #[test]
    fn zero_candidate_multiplier_is_rejected() {
        let _guard = ENV_LOCK.lock().unwrap();
        std::env::set_var("CANDIDATE_MULTIPLIER", "0");
        let err = Config::from_env().unwrap_err();
        assert!(err.to_string().contains("CANDIDATE_MULTIPLIER"));
        std::env::remove_var("CANDIDATE_MULTIPLIER");
    }
}
