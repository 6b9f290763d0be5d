// Copyright 2026, The secret-replicator authors
// SPDX-License-Identifier: Apache-2.0

/// Kubernetes annotation keys understood by the replicator
pub mod annotations {
    /// Common prefix of every replicator annotation
    pub const PREFIX: &str = "secret-replicator.io/";

    /// On a target: `"<namespace>/<name>"` of the source Secret to pull data from
    pub const REPLICATE_FROM: &str = "secret-replicator.io/replicate-from";
    /// On a source: `"true"` opts the Secret into being pulled
    pub const REPLICATION_ALLOWED: &str = "secret-replicator.io/replication-allowed";
    /// On a source: comma-separated namespace patterns permitted to pull
    pub const REPLICATION_ALLOWED_NAMESPACES: &str =
        "secret-replicator.io/replication-allowed-namespaces";
    /// On a source: comma-separated namespace patterns to push copies into
    pub const REPLICATE_TO: &str = "secret-replicator.io/replicate-to";
    /// Engine-set on targets and replicas: source resourceVersion at the last write
    pub const REPLICATED_FROM_VERSION: &str = "secret-replicator.io/replicated-from-version";
    /// Engine-set: RFC3339 timestamp of the last write
    pub const REPLICATED_AT: &str = "secret-replicator.io/replicated-at";
    /// Engine-set on push replicas: `"<namespace>/<name>"` of the owning source
    pub const OWNED_BY: &str = "secret-replicator.io/owned-by";
}

/// The operator name used in logs
pub const OPERATOR_NAME: &str = "secret-replicator";

/// Retry tuning for failed reconciliations
pub mod backoff {
    /// Delay before the first retry, in seconds
    pub const BASE_DELAY_SECS: u64 = 1;
    /// Maximum retry delay in seconds (exponential backoff cap)
    pub const MAX_DELAY_SECS: u64 = 60;
}

/// Upper bound for a single cluster API call, in seconds
pub const API_TIMEOUT_SECS: u64 = 15;
