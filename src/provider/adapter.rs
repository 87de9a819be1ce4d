//! Provider adapter interface.
//!
//! The execution engine talks to the backend exclusively through this
//! trait. Implementations should be idempotent where the backend allows:
//! repeating a call with the same physical id must have no further effect.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::ProviderError;

/// A freshly created physical resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Created {
    /// Identifier assigned by the backend.
    pub physical_id: String,
    /// Outputs reported by the backend.
    pub outputs: BTreeMap<String, Value>,
}

/// Backend that realises resources.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Provider: Send + Sync {
    /// Creates a resource of `kind` with resolved inputs.
    async fn create(
        &self,
        kind: &str,
        inputs: &BTreeMap<String, Value>,
    ) -> Result<Created, ProviderError>;

    /// Updates an existing resource in place and returns its new outputs.
    async fn update(
        &self,
        kind: &str,
        physical_id: &str,
        inputs: &BTreeMap<String, Value>,
    ) -> Result<BTreeMap<String, Value>, ProviderError>;

    /// Deletes a resource.
    async fn delete(&self, kind: &str, physical_id: &str) -> Result<(), ProviderError>;

    /// Gets the provider name for logs.
    fn name(&self) -> &'static str;
}
