// Copyright 2026, The secret-replicator authors
// SPDX-License-Identifier: Apache-2.0

//! Thin, timeout-bounded wrappers around the cluster API.

pub mod namespaces;
pub mod secrets;

pub use namespaces::{is_active, list_namespaces};
pub use secrets::{create_secret, delete_secret, get_secret, replace_secret};
