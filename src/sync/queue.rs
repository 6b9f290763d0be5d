// Copyright 2026, The secret-replicator authors
// SPDX-License-Identifier: Apache-2.0

//! Work queue with per-key coalescing and serialization.
//!
//! At most one task per key is pending and at most one is in flight; a newer
//! event replaces the pending task for its key, so bursts collapse into a
//! single reconciliation pass. Keys are handed out in arrival order.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use k8s_openapi::api::core::v1::Secret;
use tokio::sync::Notify;

use crate::constants::backoff;
use crate::index::ObjectKey;

/// A unit of work for one Secret key.
#[derive(Debug)]
pub enum Task {
    /// The Secret was created or updated; reconcile from the given state.
    Apply(Box<Secret>),
    /// The Secret was deleted; run the cleanup side of reconciliation.
    Delete(Box<Secret>),
    /// Re-fetch the Secret from the API and reconcile whatever is found.
    Resync,
}

#[derive(Default)]
struct QueueState {
    pending: HashMap<ObjectKey, Task>,
    order: VecDeque<ObjectKey>,
    active: HashSet<ObjectKey>,
    attempts: HashMap<ObjectKey, u32>,
    shut_down: bool,
}

#[derive(Default)]
pub struct WorkQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue `task`, replacing any pending task for the same key.
    pub fn push(&self, key: ObjectKey, task: Task) {
        {
            let mut state = self.state.lock().expect("queue lock poisoned");
            if state.shut_down {
                return;
            }
            if state.pending.insert(key.clone(), task).is_none() {
                state.order.push_back(key);
            }
        }
        self.notify.notify_one();
    }

    /// Enqueue a resync unless a real event is already pending for the key.
    pub fn push_resync(&self, key: ObjectKey) {
        {
            let mut state = self.state.lock().expect("queue lock poisoned");
            if state.shut_down || state.pending.contains_key(&key) {
                return;
            }
            state.pending.insert(key.clone(), Task::Resync);
            state.order.push_back(key);
        }
        self.notify.notify_one();
    }

    /// Wait for the next task whose key is not already in flight. Returns
    /// `None` once the queue is shut down.
    pub async fn recv(&self) -> Option<(ObjectKey, Task)> {
        loop {
            let notified = self.notify.notified();
            {
                let mut state = self.state.lock().expect("queue lock poisoned");
                if state.shut_down {
                    return None;
                }
                let position = state
                    .order
                    .iter()
                    .position(|key| !state.active.contains(key));
                if let Some(position) = position {
                    let key = state
                        .order
                        .remove(position)
                        .expect("position is within the queue");
                    let task = state
                        .pending
                        .remove(&key)
                        .expect("ordered keys always have a pending task");
                    state.active.insert(key.clone());
                    return Some((key, task));
                }
            }
            notified.await;
        }
    }

    /// Mark the in-flight task for `key` finished and reset its failure count.
    pub fn done(&self, key: &ObjectKey) {
        let requeued = {
            let mut state = self.state.lock().expect("queue lock poisoned");
            state.active.remove(key);
            state.attempts.remove(key);
            state.pending.contains_key(key)
        };
        if requeued {
            self.notify.notify_one();
        }
    }

    /// Record a failed attempt for `key` and return the delay to wait before
    /// re-enqueueing it.
    pub fn failed(&self, key: &ObjectKey) -> Duration {
        let (delay, requeued) = {
            let mut state = self.state.lock().expect("queue lock poisoned");
            state.active.remove(key);
            let attempts = {
                let entry = state.attempts.entry(key.clone()).or_insert(0);
                *entry += 1;
                *entry
            };
            (backoff_delay(attempts), state.pending.contains_key(key))
        };
        if requeued {
            self.notify.notify_one();
        }
        delay
    }

    /// Stop handing out work. In-flight tasks finish; pending tasks are
    /// dropped.
    pub fn shutdown(&self) {
        {
            let mut state = self.state.lock().expect("queue lock poisoned");
            state.shut_down = true;
            state.pending.clear();
            state.order.clear();
        }
        self.notify.notify_waiters();
    }

    /// Number of pending (not in-flight) tasks.
    pub fn len(&self) -> usize {
        self.state.lock().expect("queue lock poisoned").pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Exponential backoff for the nth consecutive failure, capped.
fn backoff_delay(attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(6);
    let seconds = (backoff::BASE_DELAY_SECS << exponent).min(backoff::MAX_DELAY_SECS);
    Duration::from_secs(seconds)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(namespace: &str, name: &str) -> ObjectKey {
        ObjectKey::new(namespace, name)
    }

    #[tokio::test]
    async fn test_push_and_recv() {
        let queue = WorkQueue::new();
        queue.push(key("ns1", "a"), Task::Resync);

        let (k, task) = queue.recv().await.unwrap();
        assert_eq!(k, key("ns1", "a"));
        assert!(matches!(task, Task::Resync));
    }

    #[tokio::test]
    async fn test_newer_event_replaces_pending() {
        let queue = WorkQueue::new();
        let secret = Secret::default();
        queue.push(key("ns1", "a"), Task::Apply(Box::new(secret.clone())));
        queue.push(key("ns1", "a"), Task::Delete(Box::new(secret)));

        let (_, task) = queue.recv().await.unwrap();
        assert!(matches!(task, Task::Delete(_)));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_resync_does_not_displace_pending_event() {
        let queue = WorkQueue::new();
        queue.push(
            key("ns1", "a"),
            Task::Apply(Box::new(Secret::default())),
        );
        queue.push_resync(key("ns1", "a"));

        let (_, task) = queue.recv().await.unwrap();
        assert!(matches!(task, Task::Apply(_)));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_in_flight_key_blocks_second_dispatch() {
        let queue = WorkQueue::new();
        queue.push(key("ns1", "a"), Task::Resync);

        let (k, _) = queue.recv().await.unwrap();
        assert_eq!(k, key("ns1", "a"));

        // the same key re-queued while in flight is not handed out yet
        queue.push_resync(key("ns1", "a"));
        queue.push(key("ns1", "b"), Task::Resync);
        let (k2, _) = queue.recv().await.unwrap();
        assert_eq!(k2, key("ns1", "b"));

        // once the first task finishes, the re-queued one becomes available
        queue.done(&key("ns1", "a"));
        let (k3, _) = queue.recv().await.unwrap();
        assert_eq!(k3, key("ns1", "a"));
    }

    #[tokio::test]
    async fn test_distinct_keys_dispatch_in_arrival_order() {
        let queue = WorkQueue::new();
        queue.push(key("ns1", "a"), Task::Resync);
        queue.push(key("ns2", "b"), Task::Resync);

        let (first, _) = queue.recv().await.unwrap();
        let (second, _) = queue.recv().await.unwrap();
        assert_eq!(first, key("ns1", "a"));
        assert_eq!(second, key("ns2", "b"));
    }

    #[tokio::test]
    async fn test_shutdown_stops_recv() {
        let queue = WorkQueue::new();
        queue.push(key("ns1", "a"), Task::Resync);
        queue.shutdown();

        assert!(queue.recv().await.is_none());
        // pushes after shutdown are dropped
        queue.push(key("ns1", "b"), Task::Resync);
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_failure_attempts_grow_and_reset() {
        let queue = WorkQueue::new();
        let k = key("ns1", "a");

        assert_eq!(queue.failed(&k), Duration::from_secs(1));
        assert_eq!(queue.failed(&k), Duration::from_secs(2));
        assert_eq!(queue.failed(&k), Duration::from_secs(4));

        queue.done(&k);
        assert_eq!(queue.failed(&k), Duration::from_secs(1));
    }

    #[test]
    fn test_backoff_delay_caps_at_maximum() {
        assert_eq!(backoff_delay(1), Duration::from_secs(1));
        assert_eq!(backoff_delay(2), Duration::from_secs(2));
        assert_eq!(backoff_delay(6), Duration::from_secs(32));
        assert_eq!(backoff_delay(7), Duration::from_secs(60));
        assert_eq!(backoff_delay(50), Duration::from_secs(60));
    }
}
