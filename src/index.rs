// Copyright 2026, The secret-replicator authors
// SPDX-License-Identifier: Apache-2.0

//! In-memory index of replication relationships, rebuilt from the initial
//! watch list at startup.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::RwLock;

use k8s_openapi::api::core::v1::Secret;
use kube::ResourceExt;
use tracing::warn;

use crate::constants::annotations as keys;
use crate::error::ReplicatorError;
use crate::patterns::PatternList;

/// Canonical identity of a namespaced object, rendered as `"ns/name"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    /// Identity of a Secret; fails when namespace or name is unset.
    pub fn of(secret: &Secret) -> Result<Self, ReplicatorError> {
        match (&secret.metadata.namespace, &secret.metadata.name) {
            (Some(namespace), Some(name)) => Ok(Self::new(namespace, name)),
            _ => Err(ReplicatorError::MissingObjectMeta),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

impl FromStr for ObjectKey {
    type Err = ReplicatorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once('/') {
            Some((namespace, name))
                if !namespace.is_empty() && !name.is_empty() && !name.contains('/') =>
            {
                Ok(Self::new(namespace, name))
            }
            _ => Err(ReplicatorError::InvalidReference(s.to_string())),
        }
    }
}

/// The replication-relevant annotations of one Secret. Classes are not
/// mutually exclusive: a Secret can be a pull source and a push source at
/// the same time.
#[derive(Debug, Clone, Default)]
pub struct ParsedAnnotations {
    pub replicate_from: Option<ObjectKey>,
    pub replication_allowed: Option<bool>,
    pub allowed_namespaces: Option<PatternList>,
    pub replicate_to: Option<PatternList>,
    pub owned_by: Option<ObjectKey>,
    pub replicated_from_version: Option<String>,
}

impl ParsedAnnotations {
    /// Parse the annotation map of the Secret identified by `key`. Unknown
    /// annotations and empty values are ignored; a malformed reference drops
    /// that relationship and logs a warning.
    pub fn parse(key: &ObjectKey, annotations: Option<&BTreeMap<String, String>>) -> Self {
        let mut parsed = Self::default();
        let Some(annotations) = annotations else {
            return parsed;
        };
        for (k, v) in annotations {
            if v.is_empty() {
                continue;
            }
            match k.as_str() {
                keys::REPLICATE_FROM => parsed.replicate_from = parse_reference(key, k, v),
                keys::REPLICATION_ALLOWED => {
                    parsed.replication_allowed = Some(v.eq_ignore_ascii_case("true"));
                }
                keys::REPLICATION_ALLOWED_NAMESPACES => {
                    parsed.allowed_namespaces = Some(PatternList::parse(v));
                }
                keys::REPLICATE_TO => parsed.replicate_to = Some(PatternList::parse(v)),
                keys::OWNED_BY => parsed.owned_by = parse_reference(key, k, v),
                keys::REPLICATED_FROM_VERSION => {
                    parsed.replicated_from_version = Some(v.clone());
                }
                _ => {}
            }
        }
        parsed
    }

    pub fn is_pull_target(&self) -> bool {
        self.replicate_from.is_some()
    }

    pub fn is_push_source(&self) -> bool {
        self.replicate_to.as_ref().is_some_and(|p| !p.is_empty())
    }

    pub fn is_replica(&self) -> bool {
        self.owned_by.is_some()
    }
}

fn parse_reference(secret: &ObjectKey, annotation: &str, value: &str) -> Option<ObjectKey> {
    match value.parse() {
        Ok(reference) => Some(reference),
        Err(_) => {
            warn!(
                secret = %secret,
                annotation,
                value,
                "Ignoring malformed object reference, expected \"namespace/name\""
            );
            None
        }
    }
}

/// What the index remembers about one observed Secret.
#[derive(Debug, Clone)]
pub struct SecretRecord {
    pub resource_version: String,
    pub annotations: ParsedAnnotations,
    /// Keys present on a pull target when it was first seen as one. These
    /// survive replication even when the source does not define them.
    pub pre_existing_keys: Option<BTreeSet<String>>,
}

#[derive(Default)]
struct IndexState {
    records: HashMap<ObjectKey, SecretRecord>,
    namespaces: BTreeSet<String>,
    replicas_by_owner: HashMap<ObjectKey, BTreeSet<ObjectKey>>,
    targets_by_source: HashMap<ObjectKey, BTreeSet<ObjectKey>>,
}

/// Index of every replication relationship the engine knows about, plus the
/// live namespace set. All access is synchronous; lock guards are never held
/// across an API call.
#[derive(Default)]
pub struct ReplicationIndex {
    state: RwLock<IndexState>,
}

impl ReplicationIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the observed state of a Secret and return the updated record.
    pub fn observe_secret(&self, key: &ObjectKey, secret: &Secret) -> SecretRecord {
        let parsed = ParsedAnnotations::parse(key, secret.metadata.annotations.as_ref());
        let mut state = self.state.write().expect("index lock poisoned");

        let previous = state.records.remove(key);
        if let Some(previous) = &previous {
            unlink(&mut state, key, &previous.annotations);
        }
        link(&mut state, key, &parsed);

        // the pre-existing snapshot is captured once, at the first sighting as
        // a pull target, and cleared when the target annotation goes away
        let pre_existing_keys = if parsed.is_pull_target() {
            previous
                .and_then(|p| p.pre_existing_keys)
                .or_else(|| Some(data_keys(secret)))
        } else {
            None
        };

        let record = SecretRecord {
            resource_version: secret.resource_version().unwrap_or_default(),
            annotations: parsed,
            pre_existing_keys,
        };
        state.records.insert(key.clone(), record.clone());
        record
    }

    /// Drop a Secret from the index, returning what was known about it.
    /// Reverse links owned by *other* records (targets still referencing this
    /// key as their source) are kept; they disappear with those records.
    pub fn forget_secret(&self, key: &ObjectKey) -> Option<SecretRecord> {
        let mut state = self.state.write().expect("index lock poisoned");
        let record = state.records.remove(key)?;
        unlink(&mut state, key, &record.annotations);
        state.replicas_by_owner.remove(key);
        Some(record)
    }

    pub fn get(&self, key: &ObjectKey) -> Option<SecretRecord> {
        let state = self.state.read().expect("index lock poisoned");
        state.records.get(key).cloned()
    }

    /// Register a replica the engine just wrote, ahead of its watch event.
    pub fn record_replica(&self, owner: &ObjectKey, replica: &ObjectKey) {
        let mut state = self.state.write().expect("index lock poisoned");
        state
            .replicas_by_owner
            .entry(owner.clone())
            .or_default()
            .insert(replica.clone());
    }

    /// Forget one owner/replica edge, after the replica was deleted.
    pub fn unregister_replica(&self, owner: &ObjectKey, replica: &ObjectKey) {
        let mut state = self.state.write().expect("index lock poisoned");
        if let Some(replicas) = state.replicas_by_owner.get_mut(owner) {
            replicas.remove(replica);
            if replicas.is_empty() {
                state.replicas_by_owner.remove(owner);
            }
        }
    }

    pub fn replicas_of(&self, owner: &ObjectKey) -> Vec<ObjectKey> {
        let state = self.state.read().expect("index lock poisoned");
        state
            .replicas_by_owner
            .get(owner)
            .map(|replicas| replicas.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Pull targets referencing the given source.
    pub fn targets_of(&self, source: &ObjectKey) -> Vec<ObjectKey> {
        let state = self.state.read().expect("index lock poisoned");
        state
            .targets_by_source
            .get(source)
            .map(|targets| targets.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Pull targets whose source lives in `namespace`.
    pub fn targets_referencing_namespace(&self, namespace: &str) -> Vec<ObjectKey> {
        let state = self.state.read().expect("index lock poisoned");
        state
            .records
            .iter()
            .filter(|(_, record)| {
                record
                    .annotations
                    .replicate_from
                    .as_ref()
                    .is_some_and(|source| source.namespace == namespace)
            })
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Push sources whose pattern list matches `namespace`.
    pub fn push_sources_matching(&self, namespace: &str) -> Vec<ObjectKey> {
        let state = self.state.read().expect("index lock poisoned");
        state
            .records
            .iter()
            .filter(|(_, record)| {
                record
                    .annotations
                    .replicate_to
                    .as_ref()
                    .is_some_and(|patterns| patterns.matches(namespace))
            })
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Returns true when the namespace was not known before.
    pub fn add_namespace(&self, name: &str) -> bool {
        let mut state = self.state.write().expect("index lock poisoned");
        state.namespaces.insert(name.to_string())
    }

    /// Returns true when the namespace was known.
    pub fn remove_namespace(&self, name: &str) -> bool {
        let mut state = self.state.write().expect("index lock poisoned");
        state.namespaces.remove(name)
    }

    /// Live namespaces matching the pattern list.
    pub fn namespaces_matching(&self, patterns: &PatternList) -> Vec<String> {
        let state = self.state.read().expect("index lock poisoned");
        state
            .namespaces
            .iter()
            .filter(|namespace| patterns.matches(namespace))
            .cloned()
            .collect()
    }

    /// Drop every record living in a deleted namespace, returning their keys.
    pub fn prune_namespace(&self, namespace: &str) -> Vec<ObjectKey> {
        let mut state = self.state.write().expect("index lock poisoned");
        let pruned: Vec<ObjectKey> = state
            .records
            .keys()
            .filter(|key| key.namespace == namespace)
            .cloned()
            .collect();
        for key in &pruned {
            if let Some(record) = state.records.remove(key) {
                unlink(&mut state, key, &record.annotations);
            }
            state.replicas_by_owner.remove(key);
        }
        pruned
    }

    /// Every indexed Secret key, for the periodic resync.
    pub fn keys(&self) -> Vec<ObjectKey> {
        let state = self.state.read().expect("index lock poisoned");
        state.records.keys().cloned().collect()
    }
}

fn link(state: &mut IndexState, key: &ObjectKey, annotations: &ParsedAnnotations) {
    if let Some(owner) = &annotations.owned_by {
        state
            .replicas_by_owner
            .entry(owner.clone())
            .or_default()
            .insert(key.clone());
    }
    if let Some(source) = &annotations.replicate_from {
        state
            .targets_by_source
            .entry(source.clone())
            .or_default()
            .insert(key.clone());
    }
}

fn unlink(state: &mut IndexState, key: &ObjectKey, annotations: &ParsedAnnotations) {
    if let Some(owner) = &annotations.owned_by {
        if let Some(replicas) = state.replicas_by_owner.get_mut(owner) {
            replicas.remove(key);
            if replicas.is_empty() {
                state.replicas_by_owner.remove(owner);
            }
        }
    }
    if let Some(source) = &annotations.replicate_from {
        if let Some(targets) = state.targets_by_source.get_mut(source) {
            targets.remove(key);
            if targets.is_empty() {
                state.targets_by_source.remove(source);
            }
        }
    }
}

fn data_keys(secret: &Secret) -> BTreeSet<String> {
    secret
        .data
        .as_ref()
        .map(|data| data.keys().cloned().collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::ByteString;
    use kube::api::ObjectMeta;

    fn make_secret(
        namespace: &str,
        name: &str,
        version: &str,
        annotations: &[(&str, &str)],
        data: &[(&str, &str)],
    ) -> Secret {
        let annotations: BTreeMap<String, String> = annotations
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let data: BTreeMap<String, ByteString> = data
            .iter()
            .map(|(k, v)| (k.to_string(), ByteString(v.as_bytes().to_vec())))
            .collect();
        Secret {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                resource_version: Some(version.to_string()),
                annotations: (!annotations.is_empty()).then_some(annotations),
                ..Default::default()
            },
            data: (!data.is_empty()).then_some(data),
            type_: Some("Opaque".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_object_key_roundtrip() {
        let key: ObjectKey = "ns1/source".parse().unwrap();
        assert_eq!(key, ObjectKey::new("ns1", "source"));
        assert_eq!(key.to_string(), "ns1/source");
    }

    #[test]
    fn test_object_key_rejects_malformed_references() {
        assert!("no-slash".parse::<ObjectKey>().is_err());
        assert!("/name".parse::<ObjectKey>().is_err());
        assert!("ns/".parse::<ObjectKey>().is_err());
        assert!("a/b/c".parse::<ObjectKey>().is_err());
    }

    #[test]
    fn test_parse_classifies_pull_target() {
        let key = ObjectKey::new("ns1", "target");
        let secret = make_secret(
            "ns1",
            "target",
            "1",
            &[(keys::REPLICATE_FROM, "ns1/source")],
            &[],
        );
        let parsed = ParsedAnnotations::parse(&key, secret.metadata.annotations.as_ref());
        assert!(parsed.is_pull_target());
        assert_eq!(parsed.replicate_from, Some(ObjectKey::new("ns1", "source")));
        assert!(!parsed.is_push_source());
        assert!(!parsed.is_replica());
    }

    #[test]
    fn test_parse_malformed_reference_is_unrelated() {
        let key = ObjectKey::new("ns1", "target");
        let secret = make_secret(
            "ns1",
            "target",
            "1",
            &[(keys::REPLICATE_FROM, "not-a-reference")],
            &[],
        );
        let parsed = ParsedAnnotations::parse(&key, secret.metadata.annotations.as_ref());
        assert!(!parsed.is_pull_target());
    }

    #[test]
    fn test_parse_tolerates_unknown_annotations_and_empty_values() {
        let key = ObjectKey::new("ns1", "s");
        let secret = make_secret(
            "ns1",
            "s",
            "1",
            &[
                ("some.other/annotation", "value"),
                (keys::REPLICATE_FROM, ""),
            ],
            &[],
        );
        let parsed = ParsedAnnotations::parse(&key, secret.metadata.annotations.as_ref());
        assert!(!parsed.is_pull_target());
    }

    #[test]
    fn test_parse_replication_allowed_is_case_insensitive() {
        let key = ObjectKey::new("ns1", "s");
        let secret = make_secret("ns1", "s", "1", &[(keys::REPLICATION_ALLOWED, "True")], &[]);
        let parsed = ParsedAnnotations::parse(&key, secret.metadata.annotations.as_ref());
        assert_eq!(parsed.replication_allowed, Some(true));
    }

    #[test]
    fn test_parse_classes_are_not_exclusive() {
        let key = ObjectKey::new("ns1", "s");
        let secret = make_secret(
            "ns1",
            "s",
            "1",
            &[
                (keys::REPLICATION_ALLOWED, "true"),
                (keys::REPLICATE_TO, "ns2"),
            ],
            &[],
        );
        let parsed = ParsedAnnotations::parse(&key, secret.metadata.annotations.as_ref());
        assert_eq!(parsed.replication_allowed, Some(true));
        assert!(parsed.is_push_source());
    }

    #[test]
    fn test_pre_existing_keys_captured_at_first_target_sighting() {
        let index = ReplicationIndex::new();
        let key = ObjectKey::new("ns1", "target");

        let secret = make_secret(
            "ns1",
            "target",
            "1",
            &[(keys::REPLICATE_FROM, "ns1/source")],
            &[("bar", "Hello Bar")],
        );
        let record = index.observe_secret(&key, &secret);
        assert_eq!(
            record.pre_existing_keys,
            Some(BTreeSet::from(["bar".to_string()]))
        );

        // later observations keep the original snapshot even when the data grew
        let updated = make_secret(
            "ns1",
            "target",
            "2",
            &[(keys::REPLICATE_FROM, "ns1/source")],
            &[("bar", "Hello Bar"), ("foo", "Hello World")],
        );
        let record = index.observe_secret(&key, &updated);
        assert_eq!(
            record.pre_existing_keys,
            Some(BTreeSet::from(["bar".to_string()]))
        );
    }

    #[test]
    fn test_pre_existing_keys_cleared_when_target_annotation_removed() {
        let index = ReplicationIndex::new();
        let key = ObjectKey::new("ns1", "target");

        let secret = make_secret(
            "ns1",
            "target",
            "1",
            &[(keys::REPLICATE_FROM, "ns1/source")],
            &[("bar", "Hello Bar")],
        );
        index.observe_secret(&key, &secret);

        let plain = make_secret("ns1", "target", "2", &[], &[("bar", "Hello Bar")]);
        let record = index.observe_secret(&key, &plain);
        assert_eq!(record.pre_existing_keys, None);

        // re-annotating re-captures from the then-current data
        let again = make_secret(
            "ns1",
            "target",
            "3",
            &[(keys::REPLICATE_FROM, "ns1/source")],
            &[("baz", "x")],
        );
        let record = index.observe_secret(&key, &again);
        assert_eq!(
            record.pre_existing_keys,
            Some(BTreeSet::from(["baz".to_string()]))
        );
    }

    #[test]
    fn test_targets_of_tracks_reverse_references() {
        let index = ReplicationIndex::new();
        let target = ObjectKey::new("ns2", "target");
        let source = ObjectKey::new("ns1", "source");

        let secret = make_secret(
            "ns2",
            "target",
            "1",
            &[(keys::REPLICATE_FROM, "ns1/source")],
            &[],
        );
        index.observe_secret(&target, &secret);
        assert_eq!(index.targets_of(&source), vec![target.clone()]);

        index.forget_secret(&target);
        assert!(index.targets_of(&source).is_empty());
    }

    #[test]
    fn test_forgetting_a_source_keeps_target_links() {
        let index = ReplicationIndex::new();
        let source = ObjectKey::new("ns1", "source");
        let target = ObjectKey::new("ns2", "target");

        index.observe_secret(
            &source,
            &make_secret(
                "ns1",
                "source",
                "1",
                &[(keys::REPLICATION_ALLOWED, "true")],
                &[],
            ),
        );
        index.observe_secret(
            &target,
            &make_secret(
                "ns2",
                "target",
                "1",
                &[(keys::REPLICATE_FROM, "ns1/source")],
                &[],
            ),
        );

        // deleting the source must not sever the reverse links of targets
        // that still reference it; a recreated source finds them again
        index.forget_secret(&source);
        assert_eq!(index.targets_of(&source), vec![target]);
    }

    #[test]
    fn test_replicas_by_owner_follow_observations() {
        let index = ReplicationIndex::new();
        let owner = ObjectKey::new("ns1", "src");
        let replica = ObjectKey::new("ns2", "src");

        let secret = make_secret("ns2", "src", "5", &[(keys::OWNED_BY, "ns1/src")], &[]);
        index.observe_secret(&replica, &secret);
        assert_eq!(index.replicas_of(&owner), vec![replica.clone()]);

        index.unregister_replica(&owner, &replica);
        assert!(index.replicas_of(&owner).is_empty());
    }

    #[test]
    fn test_record_replica_registers_ahead_of_watch() {
        let index = ReplicationIndex::new();
        let owner = ObjectKey::new("ns1", "src");
        let replica = ObjectKey::new("ns2", "src");

        index.record_replica(&owner, &replica);
        assert_eq!(index.replicas_of(&owner), vec![replica]);
    }

    #[test]
    fn test_namespace_set() {
        let index = ReplicationIndex::new();
        assert!(index.add_namespace("ns1"));
        assert!(!index.add_namespace("ns1"));
        assert!(index.add_namespace("ns2"));

        let patterns = PatternList::parse("ns*");
        let mut matching = index.namespaces_matching(&patterns);
        matching.sort();
        assert_eq!(matching, vec!["ns1".to_string(), "ns2".to_string()]);

        assert!(index.remove_namespace("ns1"));
        assert!(!index.remove_namespace("ns1"));
        assert_eq!(index.namespaces_matching(&patterns), vec!["ns2".to_string()]);
    }

    #[test]
    fn test_push_sources_matching() {
        let index = ReplicationIndex::new();
        let source = ObjectKey::new("ns1", "src");
        let secret = make_secret("ns1", "src", "1", &[(keys::REPLICATE_TO, "team-*")], &[]);
        index.observe_secret(&source, &secret);

        assert_eq!(index.push_sources_matching("team-a"), vec![source]);
        assert!(index.push_sources_matching("other").is_empty());
    }

    #[test]
    fn test_targets_referencing_namespace() {
        let index = ReplicationIndex::new();
        let target = ObjectKey::new("ns2", "target");
        let secret = make_secret(
            "ns2",
            "target",
            "1",
            &[(keys::REPLICATE_FROM, "ns1/source")],
            &[],
        );
        index.observe_secret(&target, &secret);

        assert_eq!(index.targets_referencing_namespace("ns1"), vec![target]);
        assert!(index.targets_referencing_namespace("ns2").is_empty());
    }

    #[test]
    fn test_prune_namespace_drops_records_and_links() {
        let index = ReplicationIndex::new();
        let source = ObjectKey::new("doomed", "src");
        let target = ObjectKey::new("ns1", "target");

        index.observe_secret(
            &source,
            &make_secret("doomed", "src", "1", &[(keys::REPLICATE_TO, "ns1")], &[]),
        );
        index.observe_secret(
            &target,
            &make_secret(
                "ns1",
                "target",
                "1",
                &[(keys::REPLICATE_FROM, "doomed/src")],
                &[],
            ),
        );

        let pruned = index.prune_namespace("doomed");
        assert_eq!(pruned, vec![source]);
        assert!(index.get(&ObjectKey::new("doomed", "src")).is_none());
        assert!(index.push_sources_matching("ns1").is_empty());
        // the target outside the namespace survives
        assert!(index.get(&target).is_some());
    }
}
