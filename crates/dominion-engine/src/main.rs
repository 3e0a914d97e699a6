//! Engine binary for the Dominion territory engine.
//!
//! Loads configuration, opens the configured repository, restores state,
//! and runs the serial runner until interrupted.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from the path given as the first argument, or
//!    `dominion-config.yaml` (defaults if missing)
//! 2. Initialize structured logging (tracing)
//! 3. Open the JSON or PostgreSQL repository
//! 4. Load the snapshot into a fresh [`DominionState`]
//! 5. Spawn the runner and wait for Ctrl-C
//! 6. Shut down, flushing every pending change

mod hooks;

use std::path::{Path, PathBuf};

use anyhow::Context;
use dominion_core::config::{Backend, DominionConfig, LoggingConfig};
use dominion_core::{DominionState, Runner};
use dominion_db::{JsonFileRepository, PgRepository, PostgresPool, Repository};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::hooks::{LoggingBus, LoggingSink};

/// Default configuration path, relative to the working directory.
const DEFAULT_CONFIG_PATH: &str = "dominion-config.yaml";

/// Application entry point.
///
/// # Errors
///
/// Returns an error if configuration, the repository, or the runner fails.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .map_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from);
    let config = load_config(&config_path)?;

    init_tracing(&config.logging);
    info!(
        config = %config_path.display(),
        backend = ?config.persistence.backend,
        limit_land = config.territory.limit_land,
        max_claim_radius = config.territory.max_claim_radius,
        "dominion-engine starting"
    );

    match config.persistence.backend {
        Backend::Json => {
            let mut repo = JsonFileRepository::open(&config.persistence.data_dir)
                .context("opening JSON data directory")?;
            info!(path = %repo.path().display(), "Using JSON file repository");
            let (state, loaded) = restore(&config, &mut repo)?;
            if !loaded {
                repo.quarantine().context("moving unreadable data file aside")?;
            }
            serve(&config, state, repo).await?;
        }
        Backend::Postgres => {
            let pool = PostgresPool::connect(&config.persistence.database_url)
                .await
                .context("connecting to PostgreSQL")?;
            let mut repo = PgRepository::open(&pool)
                .await
                .context("opening PostgreSQL repository")?;
            let (state, _) = restore(&config, &mut repo)?;
            let repo = serve(&config, state, repo).await?;
            let committed = repo.shutdown().await.context("draining PostgreSQL writer")?;
            pool.close().await;
            info!(committed, "PostgreSQL writer drained");
        }
    }

    info!("dominion-engine stopped");
    Ok(())
}

/// Read the config file, falling back to defaults if it does not exist.
fn load_config(path: &Path) -> anyhow::Result<DominionConfig> {
    if path.exists() {
        DominionConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))
    } else {
        DominionConfig::parse("").context("building default config")
    }
}

fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    if logging.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    }
}

/// Build state from the repository's snapshot. The flag is false when the
/// load failed and the state starts empty.
///
/// A failed load is fatal only when `strict_load` is set.
fn restore(
    config: &DominionConfig,
    repo: &mut dyn Repository,
) -> anyhow::Result<(DominionState, bool)> {
    let mut state = DominionState::new(config);
    match repo.load_all() {
        Ok(snapshot) => {
            state.load(snapshot);
            Ok((state, true))
        }
        Err(e) if config.persistence.strict_load => Err(e).context("loading persisted state"),
        Err(e) => {
            warn!(error = %e, "Failed to load persisted state, starting empty");
            Ok((state, false))
        }
    }
}

/// Run until Ctrl-C, then stop the runner and hand back the repository.
async fn serve<R: Repository + 'static>(
    config: &DominionConfig,
    state: DominionState,
    repo: R,
) -> anyhow::Result<R> {
    let (handle, task) = Runner::new(state, repo, &config.scheduler)
        .with_bus(Box::new(LoggingBus))
        .with_sink(Box::new(LoggingSink))
        .spawn();

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("Shutdown requested");

    handle.shutdown().await?;
    let (state, repo) = task.await.context("runner task panicked")??;
    info!(
        factions = state.registry().len(),
        cells = state.grid().len(),
        "Final state saved"
    );
    Ok(repo)
}
