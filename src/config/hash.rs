//! Input hashing for change detection.
//!
//! This module provides deterministic hashing of resource inputs and whole
//! documents so that unchanged resources can be skipped without a field-by-field
//! comparison.

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use super::spec::StackDocument;

/// Hasher for computing input and document hashes.
#[derive(Debug, Default)]
pub struct InputHasher;

impl InputHasher {
    /// Creates a new hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes the hash of a resource's kind and resolved inputs.
    ///
    /// Maps are ordered, so equal inputs always hash equal.
    #[must_use]
    pub fn hash_inputs(&self, kind: &str, inputs: &BTreeMap<String, Value>) -> String {
        let mut hasher = Sha256::new();
        hasher.update(kind.as_bytes());
        hasher.update([0u8]);
        for (field, value) in inputs {
            hasher.update(field.as_bytes());
            hasher.update([0u8]);
            hasher.update(canonical_json(value).as_bytes());
            hasher.update([0u8]);
        }
        hex::encode(hasher.finalize())
    }

    /// Computes a hash of the whole desired-state document.
    ///
    /// This hash changes when any resource, kind or setting changes.
    #[must_use]
    pub fn hash_document(&self, document: &StackDocument) -> String {
        let mut hasher = Sha256::new();
        hasher.update(document.stack.as_bytes());
        hasher.update(canonical_json(&document.deployment).as_bytes());
        for schema in &document.kinds {
            hasher.update(canonical_json(schema).as_bytes());
        }
        for resource in &document.resources {
            hasher.update(canonical_json(resource).as_bytes());
        }
        hex::encode(hasher.finalize())
    }

    /// Computes a short hash (first 8 characters) for display purposes.
    #[must_use]
    pub fn short_hash(&self, hash: &str) -> String {
        hash.chars().take(8).collect()
    }

    /// Compares two hashes in constant time.
    #[must_use]
    pub fn hashes_match(hash1: &str, hash2: &str) -> bool {
        if hash1.len() != hash2.len() {
            return false;
        }

        hash1
            .bytes()
            .zip(hash2.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}

/// Serializes a value to JSON with object keys sorted.
fn canonical_json<T: Serialize>(value: &T) -> String {
    // serde_json::Value sorts object keys unless preserve_order is enabled
    serde_json::to_value(value)
        .map(|v| v.to_string())
        .unwrap_or_default()
}
