//! State types for tracking realised resources.
//!
//! These types represent the recorded state of a stack, used for
//! reconciliation and idempotent operations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// Current version of the state format.
pub const STATE_VERSION: &str = "1.0";

/// Maximum number of history entries kept.
const MAX_HISTORY: usize = 100;

/// The recorded state of a stack.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StateSnapshot {
    /// State format version.
    pub version: String,
    /// Stack name.
    pub stack: String,
    /// Hash of the last applied desired-state document.
    #[serde(default)]
    pub desired_hash: String,
    /// Realised resources by logical id.
    #[serde(default)]
    pub resources: BTreeMap<String, ResourceState>,
    /// When the state was last updated.
    pub last_updated: DateTime<Utc>,
    /// Run history (recent entries).
    #[serde(default)]
    pub history: Vec<RunHistoryEntry>,
}

/// Recorded state of a single resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceState {
    /// Resource kind.
    pub kind: String,
    /// Identifier assigned by the provider.
    pub physical_id: String,
    /// Resolved inputs the resource was last realised with.
    #[serde(default)]
    pub inputs: BTreeMap<String, Value>,
    /// Outputs reported by the provider.
    #[serde(default)]
    pub outputs: BTreeMap<String, Value>,
    /// Hash of kind and inputs.
    #[serde(default)]
    pub input_hash: String,
    /// Logical ids this resource depended on when realised.
    #[serde(default)]
    pub dependencies: BTreeSet<String>,
    /// Physical ids replaced by this resource and not yet deleted.
    #[serde(default)]
    pub superseded: Vec<String>,
    /// When the resource was created.
    pub created_at: DateTime<Utc>,
    /// When the resource was last changed.
    pub updated_at: DateTime<Utc>,
}

/// A single entry in the run history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunHistoryEntry {
    /// When the run finished.
    pub timestamp: DateTime<Utc>,
    /// Desired-state hash the run applied.
    pub desired_hash: String,
    /// Logical ids changed by the run.
    pub resources: Vec<String>,
    /// Whether every action succeeded.
    pub success: bool,
    /// Optional error summary.
    #[serde(default)]
    pub error: Option<String>,
}

impl StateSnapshot {
    /// Creates a new empty snapshot.
    #[must_use]
    pub fn new(stack: &str) -> Self {
        Self {
            version: STATE_VERSION.to_string(),
            stack: stack.to_string(),
            desired_hash: String::new(),
            resources: BTreeMap::new(),
            last_updated: Utc::now(),
            history: Vec::new(),
        }
    }

    /// Gets a resource by logical id.
    #[must_use]
    pub fn get(&self, logical_id: &str) -> Option<&ResourceState> {
        self.resources.get(logical_id)
    }

    /// Gets a mutable reference to a resource.
    pub fn get_mut(&mut self, logical_id: &str) -> Option<&mut ResourceState> {
        self.resources.get_mut(logical_id)
    }

    /// Gets an output value of a resource.
    #[must_use]
    pub fn output(&self, logical_id: &str, output: &str) -> Option<&Value> {
        self.resources.get(logical_id)?.outputs.get(output)
    }

    /// Adds or replaces a resource.
    pub fn set_resource(&mut self, logical_id: &str, resource: ResourceState) {
        self.resources.insert(logical_id.to_string(), resource);
        self.last_updated = Utc::now();
    }

    /// Removes a resource by logical id.
    pub fn remove_resource(&mut self, logical_id: &str) -> Option<ResourceState> {
        let result = self.resources.remove(logical_id);
        if result.is_some() {
            self.last_updated = Utc::now();
        }
        result
    }

    /// Adds a history entry.
    pub fn add_history(&mut self, entry: RunHistoryEntry) {
        if self.history.len() >= MAX_HISTORY {
            self.history.remove(0);
        }
        self.history.push(entry);
    }

    /// Returns all logical ids.
    #[must_use]
    pub fn logical_ids(&self) -> Vec<&str> {
        self.resources.keys().map(String::as_str).collect()
    }

    /// Returns logical ids with recorded dependencies first.
    ///
    /// Dependencies on ids no longer recorded are ignored. Ties are broken
    /// by logical id. Ids caught in a recorded loop are appended in id order.
    #[must_use]
    pub fn dependency_order(&self) -> Vec<&str> {
        let mut remaining: BTreeMap<&str, usize> = self
            .resources
            .iter()
            .map(|(id, r)| {
                let live = r
                    .dependencies
                    .iter()
                    .filter(|d| self.resources.contains_key(*d))
                    .count();
                (id.as_str(), live)
            })
            .collect();

        let mut ready: BTreeSet<&str> = remaining
            .iter()
            .filter(|(_, n)| **n == 0)
            .map(|(id, _)| *id)
            .collect();

        let mut order = Vec::with_capacity(self.resources.len());
        while let Some(id) = ready.pop_first() {
            order.push(id);
            remaining.remove(id);
            for (other, resource) in &self.resources {
                if resource.dependencies.contains(id)
                    && let Some(count) = remaining.get_mut(other.as_str())
                {
                    *count -= 1;
                    if *count == 0 {
                        ready.insert(other.as_str());
                    }
                }
            }
        }

        order.extend(remaining.keys());
        order
    }
}

impl ResourceState {
    /// Creates a new resource state.
    #[must_use]
    pub fn new(kind: &str, physical_id: &str) -> Self {
        let now = Utc::now();
        Self {
            kind: kind.to_string(),
            physical_id: physical_id.to_string(),
            inputs: BTreeMap::new(),
            outputs: BTreeMap::new(),
            input_hash: String::new(),
            dependencies: BTreeSet::new(),
            superseded: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Records new inputs and outputs.
    pub fn record(
        &mut self,
        inputs: BTreeMap<String, Value>,
        outputs: BTreeMap<String, Value>,
        input_hash: String,
    ) {
        self.inputs = inputs;
        self.outputs = outputs;
        self.input_hash = input_hash;
        self.updated_at = Utc::now();
    }
}

impl RunHistoryEntry {
    /// Creates a successful history entry.
    #[must_use]
    pub fn new(desired_hash: &str, resources: Vec<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            desired_hash: desired_hash.to_string(),
            resources,
            success: true,
            error: None,
        }
    }

    /// Creates a failed history entry.
    #[must_use]
    pub fn failed(desired_hash: &str, resources: Vec<String>, error: &str) -> Self {
        Self {
            timestamp: Utc::now(),
            desired_hash: desired_hash.to_string(),
            resources,
            success: false,
            error: Some(error.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn resource(kind: &str, deps: &[&str]) -> ResourceState {
        let mut state = ResourceState::new(kind, &format!("{kind}-1"));
        state.dependencies = deps.iter().map(|d| (*d).to_string()).collect();
        state
    }

    #[test]
    fn test_output_lookup() {
        let mut snapshot = StateSnapshot::new("web");
        let mut vpc = resource("vpc", &[]);
        vpc.outputs.insert(String::from("vpc_id"), json!("vpc-1"));
        snapshot.set_resource("vpc", vpc);

        assert_eq!(snapshot.output("vpc", "vpc_id"), Some(&json!("vpc-1")));
        assert_eq!(snapshot.output("vpc", "missing"), None);
        assert_eq!(snapshot.output("ghost", "vpc_id"), None);
    }

    #[test]
    fn test_dependency_order() {
        let mut snapshot = StateSnapshot::new("web");
        snapshot.set_resource("service", resource("svc", &["cluster", "sg"]));
        snapshot.set_resource("sg", resource("sg", &["vpc"]));
        snapshot.set_resource("cluster", resource("cluster", &["vpc", "gone"]));
        snapshot.set_resource("vpc", resource("vpc", &[]));

        assert_eq!(
            snapshot.dependency_order(),
            vec!["vpc", "cluster", "sg", "service"]
        );
    }

    #[test]
    fn test_history_is_capped() {
        let mut snapshot = StateSnapshot::new("web");
        for i in 0..105 {
            snapshot.add_history(RunHistoryEntry::new(&format!("hash-{i}"), vec![]));
        }

        assert_eq!(snapshot.history.len(), MAX_HISTORY);
        assert_eq!(snapshot.history[0].desired_hash, "hash-5");
    }

    #[test]
    fn test_snapshot_serializes() {
        let mut snapshot = StateSnapshot::new("web");
        snapshot.set_resource("vpc", resource("vpc", &[]));

        let json = serde_json::to_string(&snapshot).expect("serializes");
        let back: StateSnapshot = serde_json::from_str(&json).expect("deserializes");
        assert_eq!(back, snapshot);
    }
}
