//! Desired-state document types.
//!
//! This module defines the structs that map to a stack document. A document
//! declares the deployment settings, optional extra resource kinds and the
//! resources themselves, whose inputs may point at other resources' outputs.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use crate::schema::ResourceSchema;

/// The root of a desired-state document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StackDocument {
    /// Name of the deployable unit.
    #[serde(default = "default_stack")]
    pub stack: String,
    /// Deployment settings available to `setting` markers and the engine.
    #[serde(default)]
    pub deployment: DeploymentConfig,
    /// Additional resource kinds declared by the document.
    #[serde(default)]
    pub kinds: Vec<ResourceSchema>,
    /// Resources in declaration order.
    #[serde(default)]
    pub resources: Vec<ResourceDefinition>,
}

/// A single declared resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceDefinition {
    /// Logical id, unique within the stack.
    pub id: String,
    /// Kind registered in the schema registry.
    pub kind: String,
    /// Input fields.
    #[serde(default)]
    pub inputs: BTreeMap<String, InputValue>,
    /// Explicit dependencies on other logical ids.
    #[serde(default)]
    pub depends_on: BTreeSet<String>,
    /// How changes to replacement-trigger fields are handled.
    #[serde(default)]
    pub replacement: ReplacementPolicy,
}

/// Value of an input field.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum InputValue {
    /// Another resource's output.
    Reference(Reference),
    /// A value taken from the deployment configuration.
    Setting(SettingRef),
    /// A list whose items may contain markers.
    List(Vec<InputValue>),
    /// A map whose values may contain markers.
    Map(BTreeMap<String, InputValue>),
    /// A plain scalar.
    Literal(Value),
}

/// Pointer from an input field to an output field of another resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(deny_unknown_fields)]
pub struct Reference {
    /// Logical id of the resource producing the value.
    #[serde(rename = "ref")]
    pub source_id: String,
    /// Output field of the source resource.
    pub output: String,
}

/// Pointer to a deployment setting.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SettingRef {
    /// Setting path, e.g. `region` or `containers.reactapp`.
    pub setting: String,
}

/// Replacement policy of a resource.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ReplacementPolicy {
    /// Replace only when a replacement-trigger field changes.
    #[default]
    InPlace,
    /// Replace on any input change.
    Replace,
    /// Refuse to replace automatically.
    Manual,
}

/// Deployment settings passed explicitly into the planner and engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeploymentConfig {
    /// Cloud account the stack is deployed into.
    #[serde(default)]
    pub account_id: Option<String>,
    /// Target region.
    #[serde(default)]
    pub region: Option<String>,
    /// Container names by service.
    #[serde(default)]
    pub containers: BTreeMap<String, String>,
    /// Secret ARNs by name.
    #[serde(default)]
    pub secrets: BTreeMap<String, String>,
    /// Free-form parameters.
    #[serde(default)]
    pub parameters: BTreeMap<String, Value>,
    /// Maximum number of provider calls in flight.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    /// Maximum attempts per provider call for transient failures.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Base backoff delay in milliseconds.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// Upper bound on a single backoff delay in milliseconds.
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
}

fn default_stack() -> String {
    String::from("default")
}

const fn default_max_workers() -> usize {
    8
}

const fn default_max_attempts() -> u32 {
    5
}

const fn default_backoff_base_ms() -> u64 {
    200
}

const fn default_backoff_max_ms() -> u64 {
    10_000
}

impl Default for DeploymentConfig {
    fn default() -> Self {
        Self {
            account_id: None,
            region: None,
            containers: BTreeMap::new(),
            secrets: BTreeMap::new(),
            parameters: BTreeMap::new(),
            max_workers: default_max_workers(),
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            backoff_max_ms: default_backoff_max_ms(),
        }
    }
}

impl DeploymentConfig {
    /// Looks up a setting by path.
    ///
    /// Recognised paths are `account_id`, `region`, `containers.<name>`,
    /// `secrets.<name>` and `parameters.<name>`.
    #[must_use]
    pub fn setting(&self, path: &str) -> Option<Value> {
        match path.split_once('.') {
            None => match path {
                "account_id" => self.account_id.clone().map(Value::String),
                "region" => self.region.clone().map(Value::String),
                _ => None,
            },
            Some(("containers", name)) => self.containers.get(name).cloned().map(Value::String),
            Some(("secrets", name)) => self.secrets.get(name).cloned().map(Value::String),
            Some(("parameters", name)) => self.parameters.get(name).cloned(),
            Some(_) => None,
        }
    }

    /// Base delay between retries.
    #[must_use]
    pub const fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    /// Upper bound on a single retry delay.
    #[must_use]
    pub const fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }
}

impl StackDocument {
    /// Finds a resource by logical id.
    #[must_use]
    pub fn resource(&self, id: &str) -> Option<&ResourceDefinition> {
        self.resources.iter().find(|r| r.id == id)
    }

    /// Returns all logical ids in declaration order.
    #[must_use]
    pub fn resource_ids(&self) -> Vec<&str> {
        self.resources.iter().map(|r| r.id.as_str()).collect()
    }
}

impl ResourceDefinition {
    /// Creates a definition with no inputs or dependencies.
    #[must_use]
    pub fn new(id: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            inputs: BTreeMap::new(),
            depends_on: BTreeSet::new(),
            replacement: ReplacementPolicy::default(),
        }
    }

    /// Adds an input field.
    #[must_use]
    pub fn with_input(mut self, field: impl Into<String>, value: InputValue) -> Self {
        self.inputs.insert(field.into(), value);
        self
    }

    /// Adds an explicit dependency.
    #[must_use]
    pub fn with_dependency(mut self, id: impl Into<String>) -> Self {
        self.depends_on.insert(id.into());
        self
    }

    /// Sets the replacement policy.
    #[must_use]
    pub const fn with_replacement(mut self, policy: ReplacementPolicy) -> Self {
        self.replacement = policy;
        self
    }
}

impl InputValue {
    /// Builds a literal input.
    #[must_use]
    pub fn literal(value: impl Into<Value>) -> Self {
        Self::Literal(value.into())
    }

    /// Builds a reference input.
    #[must_use]
    pub fn reference(source_id: impl Into<String>, output: impl Into<String>) -> Self {
        Self::Reference(Reference::new(source_id, output))
    }

    /// Builds a setting input.
    #[must_use]
    pub fn setting(path: impl Into<String>) -> Self {
        Self::Setting(SettingRef {
            setting: path.into(),
        })
    }
}

impl Reference {
    /// Creates a reference to `source_id.output`.
    #[must_use]
    pub fn new(source_id: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            output: output.into(),
        }
    }
}

impl std::fmt::Display for Reference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.source_id, self.output)
    }
}

impl std::fmt::Display for ReplacementPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::InPlace => "in-place",
            Self::Replace => "replace",
            Self::Manual => "manual",
        };
        write!(f, "{s}")
    }
}
