// Copyright 2026, The secret-replicator authors
// SPDX-License-Identifier: Apache-2.0
use anyhow::{Context, Result};
use std::env;
use std::time::Duration;

/// Controller configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// How often every known Secret is re-enqueued for reconciliation
    pub resync_interval: Duration,
    /// Treat every source as pullable unless it explicitly opts out
    pub allow_all: bool,
    /// Actively revert manual edits to engine-owned replicas
    pub strict: bool,
    /// Number of parallel reconciliation workers
    pub workers: usize,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let resync_secs: u64 = env::var("RESYNC_INTERVAL_SECS")
            .unwrap_or_else(|_| "60".to_string())
            .parse()
            .context("RESYNC_INTERVAL_SECS must be a number of seconds")?;
        let allow_all: bool = env::var("ALLOW_ALL")
            .unwrap_or_else(|_| "false".to_string())
            .parse()
            .unwrap_or(false);
        let strict: bool = env::var("STRICT")
            .unwrap_or_else(|_| "false".to_string())
            .parse()
            .unwrap_or(false);
        let workers: usize = env::var("WORKERS")
            .unwrap_or_else(|_| "4".to_string())
            .parse()
            .context("WORKERS must be a number")?;

        Ok(Config {
            resync_interval: Duration::from_secs(resync_secs),
            allow_all,
            strict,
            workers,
        })
    }
}
