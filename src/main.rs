//! wheelspin-back binary entrypoint wiring the synchronization core to its
//! in-process store and transport backends.

use std::sync::Arc;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wheelspin_back::config::SyncConfig;
use wheelspin_back::dao::memory::MemoryRoomStore;
use wheelspin_back::state::SyncCore;
use wheelspin_back::state::channels::BroadcastRegistry;

/// Per-channel event buffer for subscribers that fall behind.
const CHANNEL_CAPACITY: usize = 64;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = SyncConfig::from_env().context("loading configuration")?;
    let core = SyncCore::create(config);

    core.install_store(Arc::new(MemoryRoomStore::new())).await;
    core.install_transport(Arc::new(BroadcastRegistry::new(CHANNEL_CAPACITY)))
        .await;

    info!("synchronization core running");
    shutdown_signal().await;
    core.shutdown();

    Ok(())
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut term = signal(SignalKind::terminate()).expect("install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = term.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
