// Copyright 2026, The secret-replicator authors
// SPDX-License-Identifier: Apache-2.0

//! Namespace listing and lifecycle-phase checks.

use k8s_openapi::api::core::v1::Namespace;
use kube::{api::ListParams, Api, Client};

use crate::error::Result;
use crate::kubernetes::secrets::bounded;

/// List every namespace in the cluster.
pub async fn list_namespaces(client: &Client) -> Result<Vec<Namespace>> {
    let api: Api<Namespace> = Api::all(client.clone());
    let list = bounded(api.list(&ListParams::default())).await?;
    Ok(list.items)
}

/// Whether the namespace can still receive objects. A terminating namespace
/// rejects creates, so it is no longer a push target.
pub fn is_active(namespace: &Namespace) -> bool {
    namespace
        .status
        .as_ref()
        .and_then(|status| status.phase.as_deref())
        .is_none_or(|phase| phase != "Terminating")
}
