// Copyright 2026, The secret-replicator authors
// SPDX-License-Identifier: Apache-2.0

//! The replication engine: turns observed Secret and Namespace state into
//! create/update/delete calls against the cluster.
//!
//! Every handler is idempotent. Writes stamp the target with the source's
//! resourceVersion, so re-processing the same event (or an informer resync)
//! never issues a second write.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::Utc;
use k8s_openapi::api::core::v1::{Namespace, Secret};
use k8s_openapi::ByteString;
use kube::api::ObjectMeta;
use kube::{Client, ResourceExt};
use tracing::{debug, info, instrument, warn};

use crate::config::Config;
use crate::constants::annotations as keys;
use crate::error::Result;
use crate::index::{ObjectKey, ParsedAnnotations, ReplicationIndex, SecretRecord};
use crate::kubernetes::{create_secret, delete_secret, get_secret, is_active, replace_secret};
use crate::patterns::PatternList;
use crate::permissions::pull_allowed;
use crate::sync::queue::{Task, WorkQueue};

pub struct ReplicationEngine {
    client: Client,
    config: Config,
    index: Arc<ReplicationIndex>,
    queue: Arc<WorkQueue>,
}

impl ReplicationEngine {
    pub fn new(
        client: Client,
        config: Config,
        index: Arc<ReplicationIndex>,
        queue: Arc<WorkQueue>,
    ) -> Self {
        Self {
            client,
            config,
            index,
            queue,
        }
    }

    /// Process one queued task for `key`.
    pub async fn process(&self, key: &ObjectKey, task: Task) -> Result<()> {
        match task {
            Task::Apply(secret) => self.secret_applied(key, &secret).await,
            Task::Delete(secret) => self.secret_deleted(key, &secret).await,
            Task::Resync => match get_secret(&self.client, &key.namespace, &key.name).await? {
                Some(secret) => self.secret_applied(key, &secret).await,
                None => self.secret_missing(key).await,
            },
        }
    }

    #[instrument(skip_all, fields(secret = %key))]
    async fn secret_applied(&self, key: &ObjectKey, secret: &Secret) -> Result<()> {
        let record = self.index.observe_secret(key, secret);

        if let Some(owner) = record.annotations.owned_by.clone() {
            self.replica_event(key, secret, &owner).await?;
        }

        if let Some(source) = record.annotations.replicate_from.clone() {
            self.pull(key, secret, &source, &record).await?;
        }

        if let Some(patterns) = record.annotations.replicate_to.clone() {
            self.push(key, secret, &patterns).await?;
        }

        // a change to a pull source refreshes everything pulling from it
        for target in self.index.targets_of(key) {
            debug!(source = %key, %target, "Source changed, re-queueing pull target");
            self.queue.push_resync(target);
        }

        Ok(())
    }

    #[instrument(skip_all, fields(secret = %key))]
    async fn secret_deleted(&self, key: &ObjectKey, secret: &Secret) -> Result<()> {
        let annotations = ParsedAnnotations::parse(key, secret.metadata.annotations.as_ref());

        if let Some(owner) = &annotations.owned_by {
            // someone deleted a replica we own; its source will recreate it
            debug!(replica = %key, %owner, "Engine-owned replica deleted, re-queueing its source");
            self.queue.push_resync(owner.clone());
        }

        let owned = self.index.replicas_of(key);
        if annotations.is_push_source() || !owned.is_empty() {
            self.cascade_delete(key, annotations.replicate_to.as_ref(), owned)
                .await?;
        }

        // only forget once the cascade went through, so a retry still knows
        // which replicas are ours
        self.index.forget_secret(key);
        Ok(())
    }

    /// A resync found the Secret gone before its delete event arrived.
    async fn secret_missing(&self, key: &ObjectKey) -> Result<()> {
        let owned = self.index.replicas_of(key);
        let patterns = self
            .index
            .get(key)
            .and_then(|record| record.annotations.replicate_to);
        if patterns.is_some() || !owned.is_empty() {
            self.cascade_delete(key, patterns.as_ref(), owned).await?;
        }
        self.index.forget_secret(key);
        Ok(())
    }

    /// Pull reconciliation: make the target mirror its declared source.
    async fn pull(
        &self,
        key: &ObjectKey,
        target: &Secret,
        source_key: &ObjectKey,
        record: &SecretRecord,
    ) -> Result<()> {
        let Some(source) = get_secret(&self.client, &source_key.namespace, &source_key.name).await?
        else {
            debug!(target = %key, source = %source_key, "Pull source does not exist, leaving target as-is");
            return Ok(());
        };
        let source_annotations =
            ParsedAnnotations::parse(source_key, source.metadata.annotations.as_ref());

        // never resolve through another pull target (breaks cycles at depth 1)
        if source_annotations.is_pull_target() {
            debug!(target = %key, source = %source_key, "Pull source is itself a pull target, not resolving");
            return Ok(());
        }

        if !pull_allowed(&source_annotations, &key.namespace, self.config.allow_all) {
            debug!(target = %key, source = %source_key, "Replication not allowed by source annotations");
            return Ok(());
        }

        let source_version = source.resource_version().unwrap_or_default();
        let stamped = annotation(target, keys::REPLICATED_FROM_VERSION);
        if !self.config.strict && stamped == Some(source_version.as_str()) {
            debug!(target = %key, version = %source_version, "Target already carries the source version");
            return Ok(());
        }

        let pre_existing = record.pre_existing_keys.clone().unwrap_or_default();
        let desired = merged_pull_data(&source, target, &pre_existing);
        if stamped == Some(source_version.as_str()) && data_of(target) == desired {
            return Ok(());
        }

        info!(target = %key, source = %source_key, "Replicating data from source");
        let mut updated = target.clone();
        updated.data = (!desired.is_empty()).then_some(desired);
        updated.string_data = None;
        set_annotation(&mut updated, keys::REPLICATED_FROM_VERSION, &source_version);
        set_annotation(&mut updated, keys::REPLICATED_AT, &Utc::now().to_rfc3339());
        let written = replace_secret(&self.client, &updated).await?;
        self.index.observe_secret(key, &written);
        Ok(())
    }

    /// Push reconciliation: maintain a replica in every matching namespace.
    async fn push(&self, key: &ObjectKey, source: &Secret, patterns: &PatternList) -> Result<()> {
        for namespace in self.index.namespaces_matching(patterns) {
            if namespace == key.namespace {
                // a replica would collide with the source itself
                continue;
            }
            self.ensure_replica(key, source, &namespace).await?;
        }
        Ok(())
    }

    async fn ensure_replica(
        &self,
        source_key: &ObjectKey,
        source: &Secret,
        namespace: &str,
    ) -> Result<()> {
        let replica_key = ObjectKey::new(namespace, &source_key.name);
        let source_version = source.resource_version().unwrap_or_default();

        let Some(existing) = get_secret(&self.client, namespace, &source_key.name).await? else {
            info!(replica = %replica_key, source = %source_key, "Creating replica");
            let replica = desired_replica(source, source_key, namespace, None);
            create_secret(&self.client, &replica).await?;
            self.index.record_replica(source_key, &replica_key);
            return Ok(());
        };

        let existing_annotations =
            ParsedAnnotations::parse(&replica_key, existing.metadata.annotations.as_ref());
        match &existing_annotations.owned_by {
            Some(owner) if owner != source_key => {
                warn!(
                    replica = %replica_key,
                    %owner,
                    source = %source_key,
                    "Replica already owned by another source, not touching it"
                );
                Ok(())
            }
            Some(_) => {
                let stamped = existing_annotations.replicated_from_version.as_deref();
                if stamped == Some(source_version.as_str())
                    && (!self.config.strict || replica_in_sync(&existing, source))
                {
                    return Ok(());
                }
                info!(replica = %replica_key, source = %source_key, "Updating replica");
                let updated = desired_replica(source, source_key, namespace, Some(&existing));
                replace_secret(&self.client, &updated).await?;
                self.index.record_replica(source_key, &replica_key);
                Ok(())
            }
            None => {
                info!(replica = %replica_key, source = %source_key, "Taking over pre-existing secret");
                let updated = desired_replica(source, source_key, namespace, Some(&existing));
                replace_secret(&self.client, &updated).await?;
                self.index.record_replica(source_key, &replica_key);
                Ok(())
            }
        }
    }

    /// Delete every replica the removed source owned, at most once each.
    async fn cascade_delete(
        &self,
        source_key: &ObjectKey,
        patterns: Option<&PatternList>,
        registered: Vec<ObjectKey>,
    ) -> Result<()> {
        let mut candidates: BTreeSet<ObjectKey> = registered.into_iter().collect();
        if let Some(patterns) = patterns {
            for namespace in self.index.namespaces_matching(patterns) {
                if namespace != source_key.namespace {
                    candidates.insert(ObjectKey::new(&namespace, &source_key.name));
                }
            }
        }

        for replica_key in candidates {
            let Some(existing) =
                get_secret(&self.client, &replica_key.namespace, &replica_key.name).await?
            else {
                self.index.unregister_replica(source_key, &replica_key);
                continue;
            };
            let annotations =
                ParsedAnnotations::parse(&replica_key, existing.metadata.annotations.as_ref());
            if annotations.owned_by.as_ref() == Some(source_key) {
                info!(replica = %replica_key, source = %source_key, "Deleting replica of removed source");
                delete_secret(&self.client, &replica_key.namespace, &replica_key.name).await?;
            }
            self.index.unregister_replica(source_key, &replica_key);
        }
        Ok(())
    }

    /// A watch event on a replica the engine owns. Our own writes are
    /// recognized by the version stamp; anything else is user drift, which
    /// strict mode reverts and default mode ignores.
    async fn replica_event(
        &self,
        key: &ObjectKey,
        replica: &Secret,
        owner: &ObjectKey,
    ) -> Result<()> {
        if owner == key {
            return Ok(());
        }
        if !self.config.strict {
            return Ok(());
        }

        let Some(source) = get_secret(&self.client, &owner.namespace, &owner.name).await? else {
            debug!(replica = %key, %owner, "Owner of drifted replica is gone, leaving it to the delete cascade");
            return Ok(());
        };
        let source_annotations =
            ParsedAnnotations::parse(owner, source.metadata.annotations.as_ref());
        let pushes_here = source_annotations
            .replicate_to
            .as_ref()
            .is_some_and(|patterns| patterns.matches(&key.namespace));
        if !pushes_here {
            debug!(replica = %key, %owner, "Owner no longer pushes into this namespace, not reverting");
            return Ok(());
        }

        if replica_in_sync(replica, &source) {
            return Ok(());
        }

        info!(replica = %key, %owner, "Strict mode: reverting drifted replica");
        let corrected = desired_replica(&source, owner, &key.namespace, Some(replica));
        replace_secret(&self.client, &corrected).await?;
        Ok(())
    }

    /// A namespace was created or became active. New namespaces attract
    /// existing push sources. A namespace entering the Terminating phase is
    /// retired just like a deleted one.
    pub fn namespace_applied(&self, namespace: &Namespace) {
        let name = namespace.name_any();
        if !is_active(namespace) {
            if self.index.remove_namespace(&name) {
                debug!(namespace = %name, "Namespace is terminating, dropped from push targets");
                self.retire_namespace(&name);
            }
            return;
        }
        if self.index.add_namespace(&name) {
            let sources = self.index.push_sources_matching(&name);
            if !sources.is_empty() {
                info!(
                    namespace = %name,
                    sources = sources.len(),
                    "New namespace matches existing push sources"
                );
            }
            for source in sources {
                self.queue.push_resync(source);
            }
        }
    }

    /// A namespace is gone. Targets pulling from it keep their data; the
    /// relationship just becomes inert.
    pub fn namespace_deleted(&self, namespace: &Namespace) {
        let name = namespace.name_any();
        self.index.remove_namespace(&name);
        self.retire_namespace(&name);
    }

    /// Forget everything that lived in a namespace and re-queue the pull
    /// targets elsewhere that referenced a source in it.
    fn retire_namespace(&self, name: &str) {
        for target in self.index.targets_referencing_namespace(name) {
            debug!(%target, namespace = %name, "Source namespace gone, re-queueing pull target");
            self.queue.push_resync(target);
        }
        for key in self.index.prune_namespace(name) {
            debug!(secret = %key, "Dropped record in removed namespace");
        }
    }
}

/// Desired target data: the source's data, plus the target's current value
/// for every pre-existing key the source does not define. The source wins
/// when both define a key.
fn merged_pull_data(
    source: &Secret,
    target: &Secret,
    pre_existing: &BTreeSet<String>,
) -> BTreeMap<String, ByteString> {
    let mut merged = source.data.clone().unwrap_or_default();
    if let Some(target_data) = &target.data {
        for key in pre_existing {
            if merged.contains_key(key) {
                continue;
            }
            if let Some(value) = target_data.get(key) {
                merged.insert(key.clone(), value.clone());
            }
        }
    }
    merged
}

/// The replica the engine wants at `(namespace, source.name)`. When updating
/// an existing object, its unrelated annotations and resourceVersion are
/// preserved; replicator annotations are rewritten from scratch.
fn desired_replica(
    source: &Secret,
    source_key: &ObjectKey,
    namespace: &str,
    existing: Option<&Secret>,
) -> Secret {
    let mut annotations = existing
        .and_then(|e| e.metadata.annotations.clone())
        .unwrap_or_default();
    annotations.retain(|key, _| !key.starts_with(keys::PREFIX));
    annotations.insert(keys::OWNED_BY.to_string(), source_key.to_string());
    annotations.insert(
        keys::REPLICATED_FROM_VERSION.to_string(),
        source.resource_version().unwrap_or_default(),
    );
    annotations.insert(keys::REPLICATED_AT.to_string(), Utc::now().to_rfc3339());

    Secret {
        metadata: ObjectMeta {
            name: Some(source_key.name.clone()),
            namespace: Some(namespace.to_string()),
            annotations: Some(annotations),
            labels: source.metadata.labels.clone(),
            resource_version: existing.and_then(|e| e.metadata.resource_version.clone()),
            ..Default::default()
        },
        data: source.data.clone(),
        type_: source.type_.clone(),
        ..Default::default()
    }
}

/// Drift detection compares data and kind; annotations on replicas are not
/// managed.
fn replica_in_sync(replica: &Secret, source: &Secret) -> bool {
    data_of(replica) == data_of(source) && replica.type_ == source.type_
}

fn data_of(secret: &Secret) -> BTreeMap<String, ByteString> {
    secret.data.clone().unwrap_or_default()
}

fn annotation<'a>(secret: &'a Secret, key: &str) -> Option<&'a str> {
    secret
        .metadata
        .annotations
        .as_ref()
        .and_then(|annotations| annotations.get(key))
        .map(String::as_str)
}

fn set_annotation(secret: &mut Secret, key: &str, value: &str) {
    secret
        .metadata
        .annotations
        .get_or_insert_with(Default::default)
        .insert(key.to_string(), value.to_string());
}
