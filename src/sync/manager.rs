// Copyright 2026, The secret-replicator authors
// SPDX-License-Identifier: Apache-2.0

//! Central coordinator: receives watch events, schedules per-key work, and
//! runs the reconciliation workers.

use std::sync::Arc;

use k8s_openapi::api::core::v1::{Namespace, Secret};
use kube::{Client, ResourceExt};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::index::{ObjectKey, ReplicationIndex};
use crate::kubernetes::{is_active, list_namespaces};
use crate::sync::engine::ReplicationEngine;
use crate::sync::queue::{Task, WorkQueue};

/// Events the watchers send to the SyncManager
#[derive(Debug)]
pub enum SyncEvent {
    /// A secret was created or updated (informer resyncs look the same)
    SecretApplied { secret: Secret },
    /// A secret was deleted
    SecretDeleted { secret: Secret },
    /// A namespace was created or updated
    NamespaceApplied { namespace: Namespace },
    /// A namespace was deleted
    NamespaceDeleted { namespace: Namespace },
}

/// Handle to send events to the SyncManager
#[derive(Clone)]
pub struct SyncManagerHandle {
    event_tx: mpsc::Sender<SyncEvent>,
}

impl SyncManagerHandle {
    pub async fn send(&self, event: SyncEvent) {
        if let Err(e) = self.event_tx.send(event).await {
            error!("Failed to send event to SyncManager: {}", e);
        }
    }
}

/// Central coordinator. Owns the index and the work queue, translates events
/// into per-key tasks, and drives a pool of reconciliation workers.
pub struct SyncManager {
    engine: Arc<ReplicationEngine>,
    queue: Arc<WorkQueue>,
    index: Arc<ReplicationIndex>,
    client: Client,
    config: Config,
    event_rx: mpsc::Receiver<SyncEvent>,
}

impl SyncManager {
    pub fn new(client: Client, config: Config) -> (Self, SyncManagerHandle) {
        let (event_tx, event_rx) = mpsc::channel(256);

        let index = Arc::new(ReplicationIndex::new());
        let queue = Arc::new(WorkQueue::new());
        let engine = Arc::new(ReplicationEngine::new(
            client.clone(),
            config.clone(),
            index.clone(),
            queue.clone(),
        ));

        let manager = Self {
            engine,
            queue,
            index,
            client,
            config,
            event_rx,
        };

        let handle = SyncManagerHandle { event_tx };
        (manager, handle)
    }

    /// Process events until the channel closes or a shutdown signal arrives.
    /// Workers finish their in-flight reconciliation before this returns.
    pub async fn run(mut self) -> anyhow::Result<()> {
        info!("SyncManager started, listing namespaces...");
        self.seed_namespaces().await;

        let mut workers = JoinSet::new();
        for worker in 0..self.config.workers.max(1) {
            workers.spawn(run_worker(
                worker,
                self.engine.clone(),
                self.queue.clone(),
            ));
        }
        info!("Started {} reconciliation workers", self.config.workers.max(1));

        let mut resync = tokio::time::interval(self.config.resync_interval);
        resync.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("Shutdown signal received");
                    break;
                }
                _ = resync.tick() => self.resync_all(),
                event = self.event_rx.recv() => match event {
                    Some(event) => self.handle_event(event),
                    None => {
                        info!("Event channel closed");
                        break;
                    }
                },
            }
        }

        self.queue.shutdown();
        while workers.join_next().await.is_some() {}
        info!("SyncManager stopped");
        Ok(())
    }

    /// Populate the namespace set before consuming any events, so push
    /// reconciliation from the initial secret list sees live namespaces.
    async fn seed_namespaces(&self) {
        match list_namespaces(&self.client).await {
            Ok(namespaces) => {
                let mut seeded = 0;
                for namespace in &namespaces {
                    if is_active(namespace) {
                        self.index.add_namespace(&namespace.name_any());
                        seeded += 1;
                    }
                }
                info!("Seeded {} active namespaces", seeded);
            }
            // the namespace watch delivers the same data shortly after
            Err(e) => error!("Failed to list namespaces at startup: {}", e),
        }
    }

    fn handle_event(&self, event: SyncEvent) {
        match event {
            SyncEvent::SecretApplied { secret } => self.enqueue_secret(secret, false),
            SyncEvent::SecretDeleted { secret } => self.enqueue_secret(secret, true),
            SyncEvent::NamespaceApplied { namespace } => self.engine.namespace_applied(&namespace),
            SyncEvent::NamespaceDeleted { namespace } => self.engine.namespace_deleted(&namespace),
        }
    }

    fn enqueue_secret(&self, secret: Secret, deleted: bool) {
        match ObjectKey::of(&secret) {
            Ok(key) => {
                debug!(secret = %key, deleted, "Queueing secret event");
                let task = if deleted {
                    Task::Delete(Box::new(secret))
                } else {
                    Task::Apply(Box::new(secret))
                };
                self.queue.push(key, task);
            }
            Err(e) => warn!("Ignoring secret event without identity: {}", e),
        }
    }

    fn resync_all(&self) {
        let keys = self.index.keys();
        debug!("Periodic resync of {} secrets", keys.len());
        for key in keys {
            self.queue.push_resync(key);
        }
    }
}

async fn run_worker(worker: usize, engine: Arc<ReplicationEngine>, queue: Arc<WorkQueue>) {
    while let Some((key, task)) = queue.recv().await {
        match engine.process(&key, task).await {
            Ok(()) => queue.done(&key),
            Err(e) if e.is_transient() => {
                let delay = queue.failed(&key);
                debug!(worker, secret = %key, ?delay, "Transient error, will retry: {}", e);
                let queue = queue.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    queue.push_resync(key);
                });
            }
            Err(e) => {
                error!(worker, secret = %key, "Reconciliation failed: {}", e);
                queue.done(&key);
            }
        }
    }
    debug!(worker, "Worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::annotations as keys;
    use crate::test_utils::MockService;
    use kube::api::ObjectMeta;
    use std::collections::BTreeMap;
    use std::time::Duration;

    fn make_secret(namespace: &str, name: &str, annotations: &[(&str, &str)]) -> Secret {
        let annotations: BTreeMap<String, String> = annotations
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Secret {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                resource_version: Some("1".to_string()),
                annotations: (!annotations.is_empty()).then_some(annotations),
                ..Default::default()
            },
            type_: Some("Opaque".to_string()),
            ..Default::default()
        }
    }

    fn create_test_manager() -> (SyncManager, SyncManagerHandle) {
        let config = Config {
            resync_interval: Duration::from_secs(60),
            allow_all: false,
            strict: false,
            workers: 2,
        };
        SyncManager::new(MockService::new().into_client(), config)
    }

    #[tokio::test]
    async fn test_secret_applied_event_is_queued_per_key() {
        let (manager, _handle) = create_test_manager();

        manager.handle_event(SyncEvent::SecretApplied {
            secret: make_secret("ns1", "a", &[]),
        });

        let (key, task) = manager.queue.recv().await.unwrap();
        assert_eq!(key, ObjectKey::new("ns1", "a"));
        assert!(matches!(task, Task::Apply(_)));
    }

    #[tokio::test]
    async fn test_secret_deleted_event_is_queued_as_delete() {
        let (manager, _handle) = create_test_manager();

        manager.handle_event(SyncEvent::SecretDeleted {
            secret: make_secret("ns1", "a", &[]),
        });

        let (_, task) = manager.queue.recv().await.unwrap();
        assert!(matches!(task, Task::Delete(_)));
    }

    #[tokio::test]
    async fn test_secret_event_without_identity_is_dropped() {
        let (manager, _handle) = create_test_manager();

        manager.handle_event(SyncEvent::SecretApplied {
            secret: Secret::default(),
        });

        assert!(manager.queue.is_empty());
    }

    #[tokio::test]
    async fn test_burst_of_events_coalesces_per_key() {
        let (manager, _handle) = create_test_manager();

        for _ in 0..5 {
            manager.handle_event(SyncEvent::SecretApplied {
                secret: make_secret("ns1", "a", &[]),
            });
        }
        assert_eq!(manager.queue.len(), 1);
    }

    #[tokio::test]
    async fn test_namespace_applied_reaches_the_engine() {
        let (manager, _handle) = create_test_manager();

        // index a push source, then announce a matching namespace
        let source = make_secret("ns1", "src", &[(keys::REPLICATE_TO, "ns2")]);
        manager
            .index
            .observe_secret(&ObjectKey::new("ns1", "src"), &source);

        let namespace = Namespace {
            metadata: ObjectMeta {
                name: Some("ns2".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        manager.handle_event(SyncEvent::NamespaceApplied { namespace });

        let (key, _) = manager.queue.recv().await.unwrap();
        assert_eq!(key, ObjectKey::new("ns1", "src"));
    }

    #[tokio::test]
    async fn test_resync_all_requeues_indexed_secrets() {
        let (manager, _handle) = create_test_manager();

        manager
            .index
            .observe_secret(&ObjectKey::new("ns1", "a"), &make_secret("ns1", "a", &[]));
        manager
            .index
            .observe_secret(&ObjectKey::new("ns2", "b"), &make_secret("ns2", "b", &[]));

        manager.resync_all();
        assert_eq!(manager.queue.len(), 2);
    }

    #[tokio::test]
    async fn test_handle_clone_can_be_shared() {
        let (_manager, handle) = create_test_manager();
        let _handle2 = handle.clone();
    }
}
