// Copyright 2026, The secret-replicator authors
// SPDX-License-Identifier: Apache-2.0
use anyhow::Result;
use kube::Client;
use tracing::info;

use secret_replicator::config::Config;
use secret_replicator::constants::OPERATOR_NAME;
use secret_replicator::reconcilers::{NamespaceWatcher, SecretWatcher};
use secret_replicator::sync::SyncManager;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    info!("Starting {}", OPERATOR_NAME);

    // Load configuration
    let config = Config::from_env()?;
    info!(
        "Configuration loaded: resync_interval={}s allow_all={} strict={} workers={}",
        config.resync_interval.as_secs(),
        config.allow_all,
        config.strict,
        config.workers
    );

    // Create Kubernetes client
    let client = Client::try_default().await?;
    info!("Connected to Kubernetes cluster");

    // Create the sync manager and wire the watchers to it
    let (sync_manager, sync_handle) = SyncManager::new(client.clone(), config);
    let secret_watcher = SecretWatcher::new(client.clone(), sync_handle.clone());
    let namespace_watcher = NamespaceWatcher::new(client, sync_handle);

    info!("Starting watchers...");

    // The manager returns after a shutdown signal; dropping the watcher
    // futures stops the watch streams.
    tokio::select! {
        res = sync_manager.run() => res?,
        res = secret_watcher.run() => res?,
        res = namespace_watcher.run() => res?,
    }

    info!("{} stopped", OPERATOR_NAME);
    Ok(())
}
