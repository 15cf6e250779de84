//! # Docuvec
//!
//! Process entry point: load configuration, run schema migrations, wire up
//! the embedding engine and vector store chosen by configuration, and start
//! the HTTP server. See [`docuvec::server`] for the exposed API.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser as ClapParser, Subcommand};

use docuvec::config::Config;
use docuvec::db;
use docuvec::embedding_engines::{HashEmbeddingEngine, HttpEmbeddingEngine};
use docuvec::migrate;
use docuvec::parser::{Parser, PlainTextParser};
use docuvec::server;
use docuvec::store_sqlite::SqliteVectorStore;

#[derive(ClapParser)]
#[command(name = "docuvec", about = "Multimodal, multi-vector document search service")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run pending schema migrations and exit.
    Migrate,
    /// Start the HTTP server (default when no subcommand is given).
    Serve,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env().context("loading configuration")?;

    let pool = db::connect(&config).await.context("connecting to database")?;
    migrate::run(&pool).await.context("running migrations")?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Migrate => {
            tracing::info!("migrations applied");
            Ok(())
        }
        Commands::Serve => {
            let engine = build_engine(&config)?;
            let store = Arc::new(SqliteVectorStore::new(pool));
            let parser: Arc<dyn Parser> = Arc::new(PlainTextParser::new());
            server::run_server(config, engine, store, parser).await
        }
    }
}

fn build_engine(config: &Config) -> Result<Arc<dyn docuvec_core::embedding::EmbeddingEngine>> {
    match config.embedding_provider.as_str() {
        "hash" => Ok(Arc::new(HashEmbeddingEngine::new(config.embedding_dim))),
        "http" => {
            let endpoint = config
                .embedding_endpoint
                .as_deref()
                .context("EMBEDDING_ENDPOINT must be set when EMBEDDING_PROVIDER=http")?;
            Ok(Arc::new(HttpEmbeddingEngine::new(endpoint)?))
        }
        other => anyhow::bail!("unknown embedding provider '{other}'"),
    }
}
