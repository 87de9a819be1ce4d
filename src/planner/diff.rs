//! Diff engine for comparing desired resources with recorded state.
//!
//! Resources are walked in evaluation order so that a resource being created
//! or replaced is known before anything referencing it is compared. Values
//! that depend on such a resource are "known after apply" and always count
//! as changed.

use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use crate::config::{InputHasher, ReplacementPolicy, ResourceDefinition};
use crate::error::{PlanError, Result};
use crate::graph::{ReferenceResolver, ResolvedField, ResourceGraph};
use crate::schema::SchemaRegistry;
use crate::state::{ResourceState, StateSnapshot};

/// Placeholder shown for values that only exist after apply.
pub const KNOWN_AFTER_APPLY: &str = "(known after apply)";

/// Engine for computing diffs between desired and recorded states.
#[derive(Debug, Default)]
pub struct DiffEngine {
    /// Input hasher.
    hasher: InputHasher,
}

/// Difference for a single resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceDiff {
    /// Logical id.
    pub logical_id: String,
    /// Desired kind, or the recorded kind for deletions.
    pub kind: String,
    /// Type of difference.
    pub diff_type: DiffType,
    /// Per-field details.
    pub details: Vec<DiffDetail>,
    /// Physical id currently recorded.
    pub physical_id: Option<String>,
    /// Old physical ids still awaiting deletion.
    pub superseded: Vec<String>,
    /// Why this diff was produced.
    pub reason: String,
}

/// Type of difference detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffType {
    /// Resource needs to be created.
    Create,
    /// Resource can be changed in place.
    Update,
    /// Resource must be recreated.
    Replace,
    /// Resource needs to be deleted.
    Delete,
    /// Resource is unchanged.
    NoChange,
}

/// Detail about a specific field difference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffDetail {
    /// Field that differs.
    pub field: String,
    /// Recorded value.
    pub old_value: Option<String>,
    /// Desired value.
    pub new_value: Option<String>,
    /// Whether this field forces a replacement.
    pub forces_replacement: bool,
}

/// Complete diff result.
#[derive(Debug, Default)]
pub struct DiffResult {
    /// Diffs for desired resources in evaluation order, then deletions.
    pub diffs: Vec<ResourceDiff>,
    /// Number of resources to create.
    pub creates: usize,
    /// Number of resources to update.
    pub updates: usize,
    /// Number of resources to replace.
    pub replaces: usize,
    /// Number of resources to delete.
    pub deletes: usize,
    /// Number of unchanged resources.
    pub unchanged: usize,
}

impl DiffEngine {
    /// Creates a new diff engine.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            hasher: InputHasher::new(),
        }
    }

    /// Computes the diff between the desired graph and the snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if a setting or recorded output cannot be resolved,
    /// or a resource with a manual replacement policy would be replaced.
    pub fn compute_diff(
        &self,
        graph: &ResourceGraph,
        registry: &SchemaRegistry,
        resolver: &ReferenceResolver<'_>,
        snapshot: &StateSnapshot,
    ) -> Result<DiffResult> {
        let mut diffs = Vec::with_capacity(graph.len());
        let mut pending = BTreeSet::new();

        for definition in graph.evaluation_order() {
            let resolved = resolver.resolve_known(definition, snapshot, &pending)?;

            let diff = match snapshot.get(&definition.id) {
                None => Self::create_diff(definition, &resolved),
                Some(prior) => self.compare(definition, prior, &resolved, registry)?,
            };

            if matches!(diff.diff_type, DiffType::Create | DiffType::Replace) {
                pending.insert(definition.id.clone());
            }
            diffs.push(diff);
        }

        for logical_id in snapshot.dependency_order().into_iter().rev() {
            if graph.position(logical_id).is_some() {
                continue;
            }
            let Some(prior) = snapshot.get(logical_id) else {
                continue;
            };

            debug!("Found orphaned resource: {logical_id}");
            diffs.push(ResourceDiff {
                logical_id: logical_id.to_string(),
                kind: prior.kind.clone(),
                diff_type: DiffType::Delete,
                details: Vec::new(),
                physical_id: Some(prior.physical_id.clone()),
                superseded: prior.superseded.clone(),
                reason: String::from("resource removed from desired state"),
            });
        }

        let count = |t: DiffType| diffs.iter().filter(|d| d.diff_type == t).count();
        Ok(DiffResult {
            creates: count(DiffType::Create),
            updates: count(DiffType::Update),
            replaces: count(DiffType::Replace),
            deletes: count(DiffType::Delete),
            unchanged: count(DiffType::NoChange),
            diffs,
        })
    }

    fn create_diff(
        definition: &ResourceDefinition,
        resolved: &BTreeMap<String, ResolvedField>,
    ) -> ResourceDiff {
        let details = resolved
            .iter()
            .map(|(field, value)| DiffDetail {
                field: field.clone(),
                old_value: None,
                new_value: Some(render(value)),
                forces_replacement: false,
            })
            .collect();

        ResourceDiff {
            logical_id: definition.id.clone(),
            kind: definition.kind.clone(),
            diff_type: DiffType::Create,
            details,
            physical_id: None,
            superseded: Vec::new(),
            reason: String::from("resource not yet created"),
        }
    }

    /// Compares a desired resource with its recorded state.
    fn compare(
        &self,
        definition: &ResourceDefinition,
        prior: &ResourceState,
        resolved: &BTreeMap<String, ResolvedField>,
        registry: &SchemaRegistry,
    ) -> Result<ResourceDiff> {
        let mut diff = ResourceDiff {
            logical_id: definition.id.clone(),
            kind: definition.kind.clone(),
            diff_type: DiffType::NoChange,
            details: Vec::new(),
            physical_id: Some(prior.physical_id.clone()),
            superseded: prior.superseded.clone(),
            reason: String::from("inputs unchanged"),
        };

        if prior.kind != definition.kind {
            if definition.replacement == ReplacementPolicy::Manual {
                return Err(PlanError::ManualReplacement {
                    logical_id: definition.id.clone(),
                    fields: vec![String::from("kind")],
                }
                .into());
            }
            diff.diff_type = DiffType::Replace;
            diff.details.push(DiffDetail {
                field: String::from("kind"),
                old_value: Some(prior.kind.clone()),
                new_value: Some(definition.kind.clone()),
                forces_replacement: true,
            });
            diff.reason = format!("kind changed from '{}' to '{}'", prior.kind, definition.kind);
            return Ok(diff);
        }

        if let Some(known) = all_known(resolved) {
            let hash = self.hasher.hash_inputs(&definition.kind, &known);
            if InputHasher::hashes_match(&hash, &prior.input_hash) {
                return Ok(diff);
            }
        }

        let schema = registry.lookup(&definition.kind)?;
        let fields: BTreeSet<&String> = resolved.keys().chain(prior.inputs.keys()).collect();

        for field in fields {
            let old = prior.inputs.get(field);
            let new = resolved.get(field);
            let changed = match (old, new) {
                (Some(o), Some(ResolvedField::Known(n))) => o != n,
                (None, None) => false,
                _ => true,
            };
            if !changed {
                continue;
            }

            let forces_replacement = match definition.replacement {
                ReplacementPolicy::Replace => true,
                ReplacementPolicy::InPlace | ReplacementPolicy::Manual => {
                    schema.is_replacement_trigger(field)
                }
            };
            diff.details.push(DiffDetail {
                field: field.clone(),
                old_value: old.map(Value::to_string),
                new_value: new.map(render),
                forces_replacement,
            });
        }

        if diff.details.is_empty() {
            return Ok(diff);
        }

        let triggers: Vec<String> = diff
            .details
            .iter()
            .filter(|d| d.forces_replacement)
            .map(|d| d.field.clone())
            .collect();

        if triggers.is_empty() {
            diff.diff_type = DiffType::Update;
            diff.reason = format!("changed: {}", diff.changed_fields().join(", "));
        } else if definition.replacement == ReplacementPolicy::Manual {
            return Err(PlanError::ManualReplacement {
                logical_id: definition.id.clone(),
                fields: triggers,
            }
            .into());
        } else {
            diff.diff_type = DiffType::Replace;
            diff.reason = format!("replacement forced by: {}", triggers.join(", "));
        }

        Ok(diff)
    }
}

/// Returns the resolved inputs if none are deferred.
fn all_known(resolved: &BTreeMap<String, ResolvedField>) -> Option<BTreeMap<String, Value>> {
    resolved
        .iter()
        .map(|(field, value)| match value {
            ResolvedField::Known(v) => Some((field.clone(), v.clone())),
            ResolvedField::Deferred => None,
        })
        .collect()
}

fn render(value: &ResolvedField) -> String {
    match value {
        ResolvedField::Known(v) => v.to_string(),
        ResolvedField::Deferred => String::from(KNOWN_AFTER_APPLY),
    }
}

impl ResourceDiff {
    /// Returns the names of changed fields.
    #[must_use]
    pub fn changed_fields(&self) -> Vec<String> {
        self.details.iter().map(|d| d.field.clone()).collect()
    }
}

impl DiffResult {
    /// Returns true if there are any changes.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        self.total_changes() > 0 || self.diffs.iter().any(|d| !d.superseded.is_empty())
    }

    /// Returns the total number of changed resources.
    #[must_use]
    pub const fn total_changes(&self) -> usize {
        self.creates + self.updates + self.replaces + self.deletes
    }

    /// Finds the diff for a logical id.
    #[must_use]
    pub fn get(&self, logical_id: &str) -> Option<&ResourceDiff> {
        self.diffs.iter().find(|d| d.logical_id == logical_id)
    }
}

impl std::fmt::Display for DiffType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Replace => "replace",
            Self::Delete => "delete",
            Self::NoChange => "no change",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for ResourceDiff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.logical_id, self.diff_type)?;
        if !self.details.is_empty() && self.diff_type != DiffType::Create {
            write!(f, " ({})", self.changed_fields().join(", "))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DeploymentConfig, InputValue};
    use crate::error::CairnError;
    use crate::graph::GraphBuilder;
    use crate::schema::{FieldType, ResourceSchema};
    use serde_json::json;

    fn registry() -> SchemaRegistry {
        let mut registry = SchemaRegistry::new();
        registry
            .insert(
                ResourceSchema::new("net")
                    .required("cidr", FieldType::String)
                    .optional("tags", FieldType::Map)
                    .output("net_id", FieldType::String)
                    .triggers(&["cidr"]),
            )
            .expect("net");
        registry
            .insert(
                ResourceSchema::new("app")
                    .required("net_id", FieldType::String)
                    .optional("size", FieldType::Integer)
                    .output("app_id", FieldType::String),
            )
            .expect("app");
        registry
    }

    fn net(cidr: &str) -> ResourceDefinition {
        ResourceDefinition::new("net", "net").with_input("cidr", InputValue::literal(cidr))
    }

    fn app(size: i64) -> ResourceDefinition {
        ResourceDefinition::new("app", "app")
            .with_input("net_id", InputValue::reference("net", "net_id"))
            .with_input("size", InputValue::literal(size))
    }

    fn recorded(kind: &str, pid: &str, inputs: Value, outputs: Value) -> ResourceState {
        let inputs: BTreeMap<String, Value> =
            serde_json::from_value(inputs).expect("inputs are a map");
        let mut state = ResourceState::new(kind, pid);
        state.input_hash = InputHasher::new().hash_inputs(kind, &inputs);
        state.inputs = inputs;
        state.outputs = serde_json::from_value(outputs).expect("outputs are a map");
        state
    }

    fn applied(cidr: &str, size: i64) -> StateSnapshot {
        let mut snapshot = StateSnapshot::new("test");
        snapshot.set_resource(
            "net",
            recorded("net", "net-1", json!({"cidr": cidr}), json!({"net_id": "net-1"})),
        );
        let mut app_state = recorded(
            "app",
            "app-1",
            json!({"net_id": "net-1", "size": size}),
            json!({"app_id": "app-1"}),
        );
        app_state.dependencies.insert(String::from("net"));
        snapshot.set_resource("app", app_state);
        snapshot
    }

    fn diff(definitions: &[ResourceDefinition], snapshot: &StateSnapshot) -> Result<DiffResult> {
        let graph = GraphBuilder::new().build(definitions)?;
        let config = DeploymentConfig::default();
        DiffEngine::new().compute_diff(
            &graph,
            &registry(),
            &ReferenceResolver::new(&config),
            snapshot,
        )
    }

    #[test]
    fn test_empty_state_creates_everything() {
        let result = diff(&[app(1), net("10.0.0.0/16")], &StateSnapshot::new("test"))
            .expect("diff");

        assert_eq!(result.creates, 2);
        let order: Vec<_> = result.diffs.iter().map(|d| d.logical_id.as_str()).collect();
        assert_eq!(order, vec!["net", "app"]);

        let app_diff = result.get("app").expect("app diff");
        let net_id = app_diff
            .details
            .iter()
            .find(|d| d.field == "net_id")
            .expect("net_id detail");
        assert_eq!(net_id.new_value.as_deref(), Some(KNOWN_AFTER_APPLY));
    }

    #[test]
    fn test_unchanged_inputs_are_noop() {
        let result = diff(&[net("10.0.0.0/16"), app(1)], &applied("10.0.0.0/16", 1))
            .expect("diff");

        assert!(!result.has_changes());
        assert_eq!(result.unchanged, 2);
    }

    #[test]
    fn test_non_trigger_change_updates() {
        let result = diff(&[net("10.0.0.0/16"), app(3)], &applied("10.0.0.0/16", 1))
            .expect("diff");

        let app_diff = result.get("app").expect("app diff");
        assert_eq!(app_diff.diff_type, DiffType::Update);
        assert_eq!(app_diff.changed_fields(), vec!["size"]);
        assert_eq!(result.get("net").map(|d| d.diff_type), Some(DiffType::NoChange));
    }

    #[test]
    fn test_trigger_change_replaces_and_defers_dependents() {
        let result = diff(&[net("10.1.0.0/16"), app(1)], &applied("10.0.0.0/16", 1))
            .expect("diff");

        assert_eq!(result.get("net").map(|d| d.diff_type), Some(DiffType::Replace));

        // The new network id is unknown until the replacement exists.
        let app_diff = result.get("app").expect("app diff");
        assert_eq!(app_diff.diff_type, DiffType::Update);
        assert_eq!(app_diff.changed_fields(), vec!["net_id"]);
    }

    #[test]
    fn test_manual_policy_refuses_replacement() {
        let manual = net("10.1.0.0/16").with_replacement(ReplacementPolicy::Manual);
        let err = diff(&[manual, app(1)], &applied("10.0.0.0/16", 1)).expect_err("manual");

        assert!(matches!(
            err,
            CairnError::Plan(PlanError::ManualReplacement { ref logical_id, .. }) if logical_id == "net"
        ));
        assert_eq!(err.exit_code(), crate::error::EXIT_VALIDATION);
    }

    #[test]
    fn test_replace_policy_replaces_on_any_change() {
        let always = app(5).with_replacement(ReplacementPolicy::Replace);
        let result = diff(&[net("10.0.0.0/16"), always], &applied("10.0.0.0/16", 1))
            .expect("diff");

        assert_eq!(result.get("app").map(|d| d.diff_type), Some(DiffType::Replace));
    }

    #[test]
    fn test_kind_change_replaces() {
        let mut snapshot = applied("10.0.0.0/16", 1);
        if let Some(net_state) = snapshot.get_mut("net") {
            net_state.kind = String::from("legacy_net");
        }

        let result = diff(&[net("10.0.0.0/16"), app(1)], &snapshot).expect("diff");
        let net_diff = result.get("net").expect("net diff");
        assert_eq!(net_diff.diff_type, DiffType::Replace);
        assert_eq!(net_diff.changed_fields(), vec!["kind"]);
    }

    #[test]
    fn test_manual_policy_refuses_kind_change() {
        let mut snapshot = applied("10.0.0.0/16", 1);
        if let Some(net_state) = snapshot.get_mut("net") {
            net_state.kind = String::from("legacy_net");
        }

        let manual = net("10.0.0.0/16").with_replacement(ReplacementPolicy::Manual);
        let err = diff(&[manual, app(1)], &snapshot).expect_err("manual");

        assert!(matches!(
            err,
            CairnError::Plan(PlanError::ManualReplacement { ref fields, .. }) if fields.len() == 1 && fields[0] == "kind"
        ));
    }

    #[test]
    fn test_orphans_are_deleted_dependents_first() {
        let result = diff(&[], &applied("10.0.0.0/16", 1)).expect("diff");

        let deletes: Vec<_> = result.diffs.iter().map(|d| d.logical_id.as_str()).collect();
        assert_eq!(deletes, vec!["app", "net"]);
        assert_eq!(result.deletes, 2);
    }
}
