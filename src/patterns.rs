// Copyright 2026, The secret-replicator authors
// SPDX-License-Identifier: Apache-2.0

//! Namespace pattern lists as used by `replicate-to` and
//! `replication-allowed-namespaces`.

use regex::Regex;

/// A parsed, comma-separated list of namespace patterns. Each token is a
/// literal namespace name in which `*` matches any run of characters. A
/// namespace matches the list iff it matches any token; the empty list
/// matches nothing. Matching is case-sensitive.
#[derive(Debug, Clone)]
pub struct PatternList {
    patterns: Vec<Regex>,
}

impl PatternList {
    pub fn parse(value: &str) -> Self {
        let patterns = value
            .split(',')
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .map(compile_token)
            .collect();
        Self { patterns }
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn matches(&self, namespace: &str) -> bool {
        self.patterns.iter().any(|p| p.is_match(namespace))
    }
}

/// Compile one token to a regex anchored to the whole namespace name.
fn compile_token(token: &str) -> Regex {
    let mut pattern = String::with_capacity(token.len() + 2);
    pattern.push('^');
    for (i, part) in token.split('*').enumerate() {
        if i > 0 {
            pattern.push_str(".*");
        }
        pattern.push_str(&regex::escape(part));
    }
    pattern.push('$');
    Regex::new(&pattern).expect("escaped pattern tokens always compile")
}
