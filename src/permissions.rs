// Copyright 2026, The secret-replicator authors
// SPDX-License-Identifier: Apache-2.0

//! Pull permission checks, re-evaluated on every reconciliation.

use crate::index::ParsedAnnotations;

/// Decide whether `target_namespace` may pull from a source carrying the
/// given annotations.
///
/// The source must opt in with `replication-allowed=true` and list the target
/// in `replication-allowed-namespaces`; a missing annotation denies. With
/// `allow_all` both requirements become implicit, but an explicit
/// `replication-allowed=false` still denies.
pub fn pull_allowed(source: &ParsedAnnotations, target_namespace: &str, allow_all: bool) -> bool {
    let opted_in = match source.replication_allowed {
        Some(true) => true,
        Some(false) => return false,
        None => allow_all,
    };
    if !opted_in {
        return false;
    }

    match &source.allowed_namespaces {
        Some(patterns) => patterns.matches(target_namespace),
        None => allow_all,
    }
}
