// Copyright 2026, The secret-replicator authors
// SPDX-License-Identifier: Apache-2.0

//! Secret watcher - forwards Secret events to the sync manager.

use futures::{pin_mut, StreamExt};
use k8s_openapi::api::core::v1::Secret;
use kube::{Api, Client};
use kube_runtime::watcher;
use tracing::{debug, warn};

use crate::sync::{SyncEvent, SyncManagerHandle};

pub struct SecretWatcher {
    client: Client,
    sync_handle: SyncManagerHandle,
}

impl SecretWatcher {
    pub fn new(client: Client, sync_handle: SyncManagerHandle) -> Self {
        Self {
            client,
            sync_handle,
        }
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let secrets: Api<Secret> = Api::all(self.client.clone());
        let stream = watcher(secrets, watcher::Config::default());
        pin_mut!(stream);

        while let Some(event) = stream.next().await {
            match event {
                Ok(watcher::Event::Apply(secret)) | Ok(watcher::Event::InitApply(secret)) => {
                    self.sync_handle
                        .send(SyncEvent::SecretApplied { secret })
                        .await;
                }
                Ok(watcher::Event::Delete(secret)) => {
                    self.sync_handle
                        .send(SyncEvent::SecretDeleted { secret })
                        .await;
                }
                Ok(watcher::Event::Init) | Ok(watcher::Event::InitDone) => {
                    debug!("Secret watch (re)initialized");
                }
                // the watcher restarts itself; errors here are transient
                Err(e) => warn!("Secret watch error: {}", e),
            }
        }

        Ok(())
    }
}
