// Copyright 2026, The secret-replicator authors
// SPDX-License-Identifier: Apache-2.0

//! Typed Secret API calls with bounded timeouts.

use std::future::Future;
use std::time::Duration;

use k8s_openapi::api::core::v1::Secret;
use kube::{
    api::{DeleteParams, PostParams},
    Api, Client,
};
use tracing::debug;

use crate::constants::API_TIMEOUT_SECS;
use crate::error::{ReplicatorError, Result};

/// Run one API call under the crate-wide timeout.
pub(crate) async fn bounded<T>(
    call: impl Future<Output = std::result::Result<T, kube::Error>>,
) -> Result<T> {
    tokio::time::timeout(Duration::from_secs(API_TIMEOUT_SECS), call)
        .await
        .map_err(|_| ReplicatorError::ApiTimeout(API_TIMEOUT_SECS))?
        .map_err(Into::into)
}

/// Fetch a Secret; NotFound maps to `None`.
pub async fn get_secret(client: &Client, namespace: &str, name: &str) -> Result<Option<Secret>> {
    let api: Api<Secret> = Api::namespaced(client.clone(), namespace);
    match bounded(api.get(name)).await {
        Ok(secret) => Ok(Some(secret)),
        Err(ReplicatorError::Kube(kube::Error::Api(err))) if err.code == 404 => Ok(None),
        Err(e) => Err(e),
    }
}

/// Create the Secret in the namespace recorded in its metadata.
pub async fn create_secret(client: &Client, secret: &Secret) -> Result<Secret> {
    let namespace = secret
        .metadata
        .namespace
        .as_deref()
        .ok_or(ReplicatorError::MissingObjectMeta)?;
    let api: Api<Secret> = Api::namespaced(client.clone(), namespace);
    bounded(api.create(&PostParams::default(), secret)).await
}

/// Replace the Secret. The `resourceVersion` in its metadata acts as the
/// write precondition; drift surfaces as a 409 conflict.
pub async fn replace_secret(client: &Client, secret: &Secret) -> Result<Secret> {
    let (Some(namespace), Some(name)) = (
        secret.metadata.namespace.as_deref(),
        secret.metadata.name.as_deref(),
    ) else {
        return Err(ReplicatorError::MissingObjectMeta);
    };
    let api: Api<Secret> = Api::namespaced(client.clone(), namespace);
    bounded(api.replace(name, &PostParams::default(), secret)).await
}

/// Delete a Secret; NotFound is not an error.
pub async fn delete_secret(client: &Client, namespace: &str, name: &str) -> Result<()> {
    let api: Api<Secret> = Api::namespaced(client.clone(), namespace);
    match bounded(api.delete(name, &DeleteParams::default())).await {
        Ok(_) => Ok(()),
        Err(ReplicatorError::Kube(kube::Error::Api(err))) if err.code == 404 => {
            debug!(
                secret = %format!("{}/{}", namespace, name),
                "Secret already gone, nothing to delete"
            );
            Ok(())
        }
        Err(e) => Err(e),
    }
}
