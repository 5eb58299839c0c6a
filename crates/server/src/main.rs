//! spindle-server: delayed-job queue over HTTP.
//!
//! Jobs carry a trigger time and become visible to consumers once it
//! passes. State lives in memory behind a snapshot persister; on startup
//! the last snapshot is restored, on ctrl-c a final one is written.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::task::spawn_blocking;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use spindle_core::{Config, Persister, SpindleError};
use spindle_server::{build_router, AppState};
use spindle_storage::SnapshotPersister;
use spindle_wheel::{Hub, MemoryMonitor, NoopMonitor, WatermarkMonitor, WheelError};

const PRUNE_INTERVAL: Duration = Duration::from_secs(30);

/// Delayed-job queue with bucketed time windows and snapshot persistence.
#[derive(Parser, Debug)]
#[command(name = "spindle-server", version, about)]
struct Cli {
    /// Bind host (overrides SPINDLE_HOST).
    #[arg(long)]
    host: Option<String>,

    /// Bind port (overrides SPINDLE_PORT).
    #[arg(long)]
    port: Option<u16>,

    /// Data directory for snapshots (overrides SPINDLE_DATA_DIR).
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Scheduling window width in milliseconds (overrides SPINDLE_SPOKE_SPAN_MS).
    #[arg(long)]
    spoke_span_ms: Option<i64>,

    /// High memory watermark in bytes (overrides SPINDLE_MAX_MEMORY_BYTES).
    #[arg(long)]
    max_memory_bytes: Option<u64>,

    /// Start empty instead of restoring the last snapshot.
    #[arg(long)]
    no_restore: bool,
}

impl Cli {
    fn apply(self, config: &mut Config) {
        if let Some(host) = self.host {
            config.server.host = host;
        }
        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(dir) = self.data_dir {
            config.storage.data_dir = dir;
        }
        if let Some(span) = self.spoke_span_ms {
            config.wheel.spoke_span_ms = span;
        }
        if let Some(high) = self.max_memory_bytes {
            config.wheel.max_memory_bytes = Some(high);
        }
        if self.no_restore {
            config.storage.restore_on_start = false;
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    spindle_core::config::load_dotenv();
    let mut config = Config::from_env();
    Cli::parse().apply(&mut config);
    config.log_summary();

    serve(config).await
}

async fn serve(config: Config) -> anyhow::Result<()> {
    let monitor: Arc<dyn MemoryMonitor> = match config.wheel.watermarks() {
        Some((high, recovery)) => {
            info!(
                high_watermark = high,
                recovery_watermark = recovery,
                "memory fence enabled"
            );
            Arc::new(WatermarkMonitor::new(high, recovery))
        }
        None => Arc::new(NoopMonitor),
    };

    let span = chrono::Duration::milliseconds(config.wheel.spoke_span_ms);
    let hub = Arc::new(Hub::new(span, monitor.clone()));
    let persister = Arc::new(SnapshotPersister::from_config(&config)?);
    let storage_name = persister.backend().to_string();

    if config.storage.restore_on_start {
        restore_last_snapshot(&hub, &persister).await?;
    }

    let state = Arc::new(AppState {
        hub: hub.clone(),
        persister: persister.clone() as Arc<dyn Persister>,
        monitor,
        storage_name,
        started_at: chrono::Utc::now(),
    });

    // Spent windows accumulate while producers schedule ahead; sweep them
    // in the background.
    let prune_hub = hub.clone();
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(PRUNE_INTERVAL);
        loop {
            tick.tick().await;
            let hub = prune_hub.clone();
            let dropped = prune_outcome(spawn_blocking(move || hub.prune()).await);
            if dropped > 0 {
                debug!(windows = dropped, "pruned spent scheduling windows");
            }
        }
    });

    let app = build_router(state);
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("listening on http://{addr}");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("shutting down; writing final snapshot");
    let final_hub = hub.clone();
    let failed = spawn_blocking(move || {
        final_hub
            .persist(persister as Arc<dyn Persister>)
            .into_iter()
            .count()
    })
    .await?;
    if failed > 0 {
        warn!(failed, "final snapshot finished with errors");
    } else {
        info!("final snapshot complete");
    }
    Ok(())
}

/// Restore the last snapshot into `hub`. A missing snapshot is a normal
/// cold start; anything else still failing at this point would silently
/// cost jobs later, so it aborts startup.
async fn restore_last_snapshot(
    hub: &Arc<Hub>,
    persister: &Arc<SnapshotPersister>,
) -> anyhow::Result<()> {
    let restore_hub = hub.clone();
    let restore_persister = persister.clone();
    let outcome = spawn_blocking(move || restore_hub.restore(restore_persister.as_ref())).await?;

    match outcome {
        Ok(stats) => {
            info!(
                restored = stats.restored,
                decode_failures = stats.decode_failures,
                add_failures = stats.add_failures,
                "snapshot restored"
            );
            Ok(())
        }
        Err(WheelError::Persistence(SpindleError::NoSnapshot(place))) => {
            info!("no snapshot at {place}; starting empty");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// Unpack a joined prune tick: a panicked task logs an error and counts
/// as zero pruned windows, so the sweep loop keeps ticking and the panic
/// still leaves a trace.
fn prune_outcome(joined: Result<usize, tokio::task::JoinError>) -> usize {
    match joined {
        Ok(dropped) => dropped,
        Err(e) => {
            error!("prune task failed: {e}");
            0
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for shutdown signal: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn prune_outcome_surfaces_a_panicked_tick() {
        let joined: Result<usize, _> = tokio::spawn(async { panic!("wheel went bad") }).await;
        let err = joined.unwrap_err();
        assert!(err.is_panic());

        assert_eq!(prune_outcome(Err(err)), 0);
        assert_eq!(prune_outcome(Ok(7)), 7);
    }
}
