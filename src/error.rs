//! Error types for the cairn composition engine.
//!
//! This module provides the error hierarchy for every phase of a run:
//! document loading, schema validation, graph construction, reference
//! resolution, planning, provider calls and state persistence.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Exit code for a document that fails validation.
pub const EXIT_VALIDATION: u8 = 2;

/// Exit code for a document whose references form a cycle.
pub const EXIT_CYCLE: u8 = 3;

/// Exit code for every other failure.
pub const EXIT_FAILURE: u8 = 1;

/// The main error type for the cairn engine.
#[derive(Debug, Error)]
pub enum CairnError {
    /// Desired-state document and deployment configuration errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Schema registry and input validation errors.
    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    /// Dependency graph construction errors.
    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    /// Reference resolution errors.
    #[error("Resolution error: {0}")]
    Resolve(#[from] ResolveError),

    /// Provider adapter errors.
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// State management errors.
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// Planning errors.
    #[error("Planning error: {0}")]
    Plan(#[from] PlanError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Errors raised while loading the desired-state document.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The document was not found.
    #[error("Desired-state document not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The document could not be parsed.
    #[error("Failed to parse desired-state document: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// An environment override holds a value of the wrong shape.
    #[error("Invalid value for {name}: {value}")]
    InvalidOverride {
        /// Name of the environment variable.
        name: String,
        /// The rejected value.
        value: String,
    },
}

/// A single schema or document violation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldViolation {
    /// Logical id of the offending resource (or the document section).
    pub logical_id: String,
    /// Field that failed validation.
    pub field: String,
    /// Description of the violation.
    pub message: String,
}

/// Schema registry errors.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// The kind is not registered.
    #[error("Unknown resource kind: {kind}")]
    UnknownKind {
        /// The unregistered kind.
        kind: String,
    },

    /// A kind was registered twice.
    #[error("Resource kind registered twice: {kind}")]
    DuplicateKind {
        /// The duplicated kind.
        kind: String,
    },

    /// One or more resources do not match their schema.
    #[error(
        "Validation failed with {} violation(s):\n{}",
        .violations.len(),
        format_violations(.violations)
    )]
    Validation {
        /// Every violation found, not just the first.
        violations: Vec<FieldViolation>,
    },
}

/// Dependency graph errors.
#[derive(Debug, Error)]
pub enum GraphError {
    /// References and explicit dependencies form a loop.
    #[error("Cyclic reference: {}", .path.join(" -> "))]
    CyclicReference {
        /// Ordered cycle path; the first id is repeated at the end.
        path: Vec<String>,
    },

    /// A resource depends on an id that is not part of the stack.
    #[error("Resource '{logical_id}' depends on unknown resource '{dependency}'")]
    UnknownDependency {
        /// The dependent resource.
        logical_id: String,
        /// The missing dependency.
        dependency: String,
    },

    /// Two resources share a logical id.
    #[error("Duplicate logical id: {logical_id}")]
    DuplicateId {
        /// The duplicated id.
        logical_id: String,
    },
}

/// Reference resolution errors.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// The source resource has not produced the requested output yet.
    #[error("Resource '{logical_id}' references '{source_id}.{output}' which is not available")]
    Unresolved {
        /// The referencing resource.
        logical_id: String,
        /// The referenced resource.
        source_id: String,
        /// The requested output field.
        output: String,
    },

    /// A `setting` marker names a value missing from the deployment configuration.
    #[error("Resource '{logical_id}' uses unknown setting '{setting}'")]
    UnknownSetting {
        /// The referencing resource.
        logical_id: String,
        /// The missing setting.
        setting: String,
    },
}

/// Errors returned by a provider adapter.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    /// Temporary failure such as rate limiting; safe to retry.
    #[error("Transient provider failure: {message}")]
    Transient {
        /// Description of the failure.
        message: String,
        /// Delay suggested by the backend, if any.
        retry_after: Option<Duration>,
    },

    /// The backend rejected the request; retrying will not help.
    #[error("Provider rejected request: {message}")]
    Permanent {
        /// Description of the rejection.
        message: String,
    },

    /// The physical resource does not exist.
    #[error("Physical resource not found: {physical_id}")]
    NotFound {
        /// The missing physical id.
        physical_id: String,
    },
}

/// State management errors.
#[derive(Debug, Error)]
pub enum StateError {
    /// State file not found.
    #[error("State file not found: {path}")]
    NotFound {
        /// Path to the missing state file.
        path: PathBuf,
    },

    /// State is corrupted.
    #[error("State is corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// State could not be written.
    #[error("Failed to write state: {message}")]
    WriteFailed {
        /// Description of the write failure.
        message: String,
    },

    /// State lock acquisition failed.
    #[error("Failed to acquire state lock: {message}")]
    LockFailed {
        /// Description of the lock failure.
        message: String,
    },

    /// State lock is held by another process.
    #[error("State is locked by another process (lock holder: {holder}, since: {since})")]
    LockedByOther {
        /// Identifier of the lock holder.
        holder: String,
        /// When the lock was acquired.
        since: String,
    },

    /// Serialization error.
    #[error("State serialization error: {message}")]
    SerializationError {
        /// Description of the serialization error.
        message: String,
    },

    /// State version mismatch.
    #[error("State version mismatch: expected {expected}, found {found}")]
    VersionMismatch {
        /// Expected state version.
        expected: String,
        /// Found state version.
        found: String,
    },
}

/// Planning errors.
#[derive(Debug, Error)]
pub enum PlanError {
    /// A replacement is required but the resource forbids automatic replacement.
    #[error(
        "Resource '{logical_id}' requires replacement (changed: {}) but its replacement policy is manual",
        .fields.join(", ")
    )]
    ManualReplacement {
        /// The resource that needs replacing.
        logical_id: String,
        /// Replacement-trigger fields that changed.
        fields: Vec<String>,
    },

    /// The action graph could not be ordered.
    #[error("Failed to order plan actions: {message}")]
    Unorderable {
        /// Description of the ordering problem.
        message: String,
    },
}

/// Result type alias for cairn operations.
pub type Result<T> = std::result::Result<T, CairnError>;

fn format_violations(violations: &[FieldViolation]) -> String {
    violations
        .iter()
        .map(|v| format!("  - {v}"))
        .collect::<Vec<_>>()
        .join("\n")
}

impl std::fmt::Display for FieldViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}: {}", self.logical_id, self.field, self.message)
    }
}

impl FieldViolation {
    /// Creates a new violation.
    #[must_use]
    pub fn new(
        logical_id: impl Into<String>,
        field: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            logical_id: logical_id.into(),
            field: field.into(),
            message: message.into(),
        }
    }
}

impl CairnError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns true if this error is retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Provider(e) => e.is_retryable(),
            Self::State(StateError::LockFailed { .. }) => true,
            _ => false,
        }
    }

    /// Returns true if the error was raised before any resource was touched
    /// because the desired-state document is invalid.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::Config(_)
                | Self::Schema(_)
                | Self::Graph(_)
                | Self::Resolve(ResolveError::UnknownSetting { .. })
                | Self::Plan(PlanError::ManualReplacement { .. })
        )
    }

    /// Returns the process exit code for this error.
    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Graph(GraphError::CyclicReference { .. }) => EXIT_CYCLE,
            _ if self.is_validation() => EXIT_VALIDATION,
            _ => EXIT_FAILURE,
        }
    }
}

impl ConfigError {
    /// Creates a parse error without a source location.
    #[must_use]
    pub fn parse(message: impl Into<String>) -> Self {
        Self::ParseError {
            message: message.into(),
            location: None,
        }
    }
}

impl StateError {
    /// Creates a write error with the given message.
    #[must_use]
    pub fn write(message: impl Into<String>) -> Self {
        Self::WriteFailed {
            message: message.into(),
        }
    }

    /// Creates a serialization error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::SerializationError {
            message: message.into(),
        }
    }
}

impl ProviderError {
    /// Creates a transient error without a retry hint.
    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
            retry_after: None,
        }
    }

    /// Creates a permanent error.
    #[must_use]
    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent {
            message: message.into(),
        }
    }

    /// Returns true if the call may succeed when retried.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Returns the delay suggested by the backend, if any.
    #[must_use]
    pub const fn retry_delay(&self) -> Option<Duration> {
        match self {
            Self::Transient { retry_after, .. } => *retry_after,
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_message_contains_path() {
        let err = CairnError::from(GraphError::CyclicReference {
            path: vec!["a".into(), "b".into(), "a".into()],
        });
        assert!(err.to_string().contains("a -> b -> a"));
        assert_eq!(err.exit_code(), EXIT_CYCLE);
    }

    #[test]
    fn test_validation_lists_every_violation() {
        let err = CairnError::from(SchemaError::Validation {
            violations: vec![
                FieldViolation::new("vpc", "cidr", "required field is missing"),
                FieldViolation::new("sg", "vpc_id", "expected string, found integer"),
            ],
        });
        let message = err.to_string();
        assert!(message.contains("vpc.cidr"));
        assert!(message.contains("sg.vpc_id"));
        assert_eq!(err.exit_code(), EXIT_VALIDATION);
    }

    #[test]
    fn test_provider_retry_classification() {
        let transient = ProviderError::Transient {
            message: String::from("throttled"),
            retry_after: Some(Duration::from_millis(50)),
        };
        assert!(transient.is_retryable());
        assert_eq!(transient.retry_delay(), Some(Duration::from_millis(50)));

        let permanent = ProviderError::permanent("bad request");
        assert!(!permanent.is_retryable());
        assert!(!CairnError::from(permanent).is_retryable());
    }

    #[test]
    fn test_runtime_errors_exit_one() {
        let err = CairnError::from(StateError::write("disk full"));
        assert_eq!(err.exit_code(), EXIT_FAILURE);
    }
}
