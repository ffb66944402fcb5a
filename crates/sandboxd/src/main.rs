//! Sandbox daemon
//!
//! Loads settings, probes the container engine once, re-adopts sessions left
//! by a previous process, and sweeps expired sessions until interrupted. On
//! Ctrl-C every live session is closed before exit.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn, Level};

use sandbox_core::{
    init_tracing, select_runtime, spawn_sweeper, RuntimeProbe, SandboxSettings, SessionManager,
    StaticToolCatalog, METRICS,
};

#[tokio::main]
async fn main() -> Result<()> {
    let json = std::env::var("SANDBOX_LOG_JSON").is_ok_and(|v| v == "1" || v == "true");
    init_tracing(json, Level::INFO);

    let settings = Arc::new(load_settings()?);
    let manager = Arc::new(build_manager(Arc::clone(&settings)).await?);

    let recovered = manager.recover().await.context("Session recovery failed")?;
    info!(
        version = sandbox_core::VERSION,
        mode = %manager.runtime_mode(),
        max_sessions = settings.max_concurrent_sessions,
        adopted = recovered.adopted,
        "sandboxd started"
    );

    let sweeper = spawn_sweeper(Arc::clone(&manager), settings.sweep_interval());

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("shutdown requested");

    sweeper.shutdown().await;
    shutdown(&manager).await;
    Ok(())
}

/// `SANDBOX_CONFIG` file (if set) overlaid with `SANDBOX_*` variables.
fn load_settings() -> Result<SandboxSettings> {
    let base = match std::env::var_os("SANDBOX_CONFIG").map(PathBuf::from) {
        Some(path) => SandboxSettings::from_toml_file(&path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?,
        None => SandboxSettings::default(),
    };
    let settings = base
        .with_overrides_from(|key| std::env::var(key).ok())
        .context("Invalid SANDBOX_* environment override")?;
    settings.validate().context("Invalid sandbox settings")?;
    Ok(settings)
}

async fn build_manager(settings: Arc<SandboxSettings>) -> Result<SessionManager> {
    let store = sandbox_state::store_from_env()
        .await
        .context("Failed to open session store")?;

    let probe = RuntimeProbe::new(Arc::clone(&settings));
    let runtime = select_runtime(&probe, Arc::clone(&settings)).await;

    let mut manager = SessionManager::new(settings, store, runtime);
    if let Some(path) = std::env::var_os("SANDBOX_TOOLS").map(PathBuf::from) {
        let catalog = StaticToolCatalog::from_toml_file(&path)
            .with_context(|| format!("Failed to load tool catalog {}", path.display()))?;
        info!(tools = catalog.len(), "tool catalog loaded");
        manager = manager.with_tool_catalog(Arc::new(catalog));
    }
    Ok(manager)
}

/// Close every live session and flush counters. Failures are logged, never
/// fatal, so the process always exits.
async fn shutdown(manager: &SessionManager) {
    match manager.close_all().await {
        Ok(closed) => info!(closed, "closed live sessions"),
        Err(e) => warn!(error = %e, "failed to close sessions on shutdown"),
    }
    METRICS.flush();
}
