// Copyright 2026, The secret-replicator authors
// SPDX-License-Identifier: Apache-2.0

//! Namespace watcher - forwards Namespace lifecycle events to the sync
//! manager so new namespaces attract existing push sources.

use futures::{pin_mut, StreamExt};
use k8s_openapi::api::core::v1::Namespace;
use kube::{Api, Client};
use kube_runtime::watcher;
use tracing::{debug, warn};

use crate::sync::{SyncEvent, SyncManagerHandle};

pub struct NamespaceWatcher {
    client: Client,
    sync_handle: SyncManagerHandle,
}

impl NamespaceWatcher {
    pub fn new(client: Client, sync_handle: SyncManagerHandle) -> Self {
        Self {
            client,
            sync_handle,
        }
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let namespaces: Api<Namespace> = Api::all(self.client.clone());
        let stream = watcher(namespaces, watcher::Config::default());
        pin_mut!(stream);

        while let Some(event) = stream.next().await {
            match event {
                Ok(watcher::Event::Apply(namespace))
                | Ok(watcher::Event::InitApply(namespace)) => {
                    self.sync_handle
                        .send(SyncEvent::NamespaceApplied { namespace })
                        .await;
                }
                Ok(watcher::Event::Delete(namespace)) => {
                    self.sync_handle
                        .send(SyncEvent::NamespaceDeleted { namespace })
                        .await;
                }
                Ok(watcher::Event::Init) | Ok(watcher::Event::InitDone) => {
                    debug!("Namespace watch (re)initialized");
                }
                Err(e) => warn!("Namespace watch error: {}", e),
            }
        }

        Ok(())
    }
}
