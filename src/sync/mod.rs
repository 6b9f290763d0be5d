// Copyright 2026, The secret-replicator authors
// SPDX-License-Identifier: Apache-2.0

//! Replication engine and work scheduling.

pub mod engine;
pub mod manager;
pub mod queue;

pub use engine::ReplicationEngine;
pub use manager::{SyncEvent, SyncManager, SyncManagerHandle};
pub use queue::{Task, WorkQueue};
