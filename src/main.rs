// =============================================================================
// Weekly Watch — Main Entry Point
// =============================================================================
//
// Loads the config, seeds the watchlist, then refreshes every listed
// security on a fixed interval until Ctrl+C.
// =============================================================================

use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use weekly_watch::app_state::AppState;
use weekly_watch::runtime_config::WatchlistConfig;

const CONFIG_PATH: &str = "watchlist_config.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Weekly Watch starting up");

    let mut config = WatchlistConfig::load(CONFIG_PATH).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        WatchlistConfig::default()
    });
    config.apply_env_overrides();
    config.validate();

    let interval_secs = config.refresh_interval_secs;
    let seed = config.securities.clone();
    info!(
        securities = ?seed,
        workers = config.pool.effective_workers(),
        task_timeout_ms = config.pool.task_timeout_ms,
        "Configured watchlist"
    );

    // ── 2. Build shared state ────────────────────────────────────────────
    let state = Arc::new(AppState::from_config(config)?);

    let added = state.watchlist.seed(&seed).await?;
    if added > 0 {
        info!(added, "Watchlist seeded from config");
    }

    // ── 3. Pool status log ───────────────────────────────────────────────
    let _pool_subscription = state.registry.on_any_status_change(|name, status| {
        tracing::debug!(
            pool = name,
            busy = status.busy_workers,
            queued = status.queued,
            failed = status.failed,
            respawns = status.respawns,
            "pool status"
        );
    });

    // ── 4. Refresh loop ──────────────────────────────────────────────────
    let refresh_state = state.clone();
    let refresh_loop = tokio::spawn(async move {
        let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(interval_secs));
        loop {
            interval.tick().await;
            match refresh_state.refresh_watchlist().await {
                Ok(ok) => info!(refreshed = ok, "Watchlist refresh round finished"),
                Err(e) => error!(error = %e, "Watchlist refresh round failed"),
            }
        }
    });

    info!(interval_secs, "Refresh loop running. Press Ctrl+C to stop.");

    // ── 5. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("Shutdown signal received — stopping gracefully");

    refresh_loop.abort();
    state.registry.shutdown_all();

    if let Err(e) = state.config.read().save(CONFIG_PATH) {
        error!(error = %e, "Failed to save config on shutdown");
    }

    info!("Weekly Watch shut down complete.");
    Ok(())
}
