// Copyright 2026, The secret-replicator authors
// SPDX-License-Identifier: Apache-2.0

//! Watchers that translate cluster watch streams into sync events.

pub mod namespace;
pub mod secret;

pub use namespace::NamespaceWatcher;
pub use secret::SecretWatcher;
