//! mimird - the mimir serving daemon.
//!
//! Wires the cached engine to the HTTP boundary from a TOML config.
//! The tensor runtime is an external collaborator linked in by
//! integrators; this binary ships with the unloaded placeholder, so a
//! bare `mimird` answers in demo mode while exercising the full cache,
//! batching, and guardrail path.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use mimir::cache::{FsSnapshotStore, SnapshotStore};
use mimir::inference::UnloadedInference;
use mimir::server::{self, AppState, Config};
use mimir::Mimir;

#[derive(Parser)]
#[command(name = "mimird", about = "On-premise LLM inference gateway serving core")]
struct Args {
    /// Path to the TOML configuration file.
    #[arg(long, env = "MIMIR_CONFIG")]
    config: Option<PathBuf>,

    /// Override the bind address from the config.
    #[arg(long)]
    address: Option<String>,
}

#[tokio::main]
async fn main() -> mimir::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    let config = Config::load(args.config.as_deref())?;

    let mut builder = Mimir::builder()
        .inference(Arc::new(UnloadedInference::new("no inference runtime linked")))
        .cache_config((&config.cache).into())
        .batcher_config((&config.batcher).into())
        .retrieval_config((&config.retrieval).into())
        .guardrail_config((&config.guardrail).into());

    if let Some(dir) = &config.cache.snapshot_dir {
        match FsSnapshotStore::new(dir) {
            Ok(store) => {
                let store: Arc<dyn SnapshotStore> = Arc::new(store);
                builder = builder.snapshot_store(store);
            }
            Err(e) => warn!(error = %e, "snapshot store unavailable, continuing without"),
        }
    }

    let engine = Arc::new(builder.build()?);
    if !engine.model_loaded() {
        info!("inference runtime not loaded; serving demo responses");
    }

    let address = args.address.unwrap_or_else(|| config.server.address.clone());
    let state = AppState::new(engine, &config.server);
    server::serve(state, &address).await
}
