//! Desired-state document handling for cairn.
//!
//! This module handles all document-related functionality:
//! - Parsing and deserializing stack documents
//! - Validation against the schema registry
//! - Computing input hashes for change detection

mod hash;
mod parser;
mod spec;
mod validator;

pub use hash::InputHasher;
pub use parser::{
    DocumentParser, ENV_ACCOUNT_ID, ENV_MAX_ATTEMPTS, ENV_MAX_WORKERS, ENV_REGION,
};
pub use spec::{
    DeploymentConfig, InputValue, Reference, ReplacementPolicy, ResourceDefinition, SettingRef,
    StackDocument,
};
pub use validator::{DocumentValidator, ValidationReport};
