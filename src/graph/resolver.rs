//! Cross-resource reference resolution.
//!
//! References are extracted eagerly to build the graph but resolved lazily:
//! the engine only asks for a value right before it acts on the resource
//! that needs it.

use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

use crate::config::{DeploymentConfig, InputValue, Reference, ResourceDefinition};
use crate::error::{GraphError, ResolveError};
use crate::state::StateSnapshot;

/// A plan-time view of one input field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedField {
    /// The value is known now.
    Known(Value),
    /// The value depends on a resource that does not exist yet.
    Deferred,
}

/// Resolves `ref` and `setting` markers into concrete values.
#[derive(Debug, Clone, Copy)]
pub struct ReferenceResolver<'a> {
    config: &'a DeploymentConfig,
}

impl<'a> ReferenceResolver<'a> {
    /// Creates a resolver over the given deployment settings.
    #[must_use]
    pub const fn new(config: &'a DeploymentConfig) -> Self {
        Self { config }
    }

    /// Returns every reference in a definition, including nested ones.
    #[must_use]
    pub fn extract_references(definition: &ResourceDefinition) -> BTreeSet<Reference> {
        let mut references = BTreeSet::new();
        for value in definition.inputs.values() {
            collect_references(value, &mut references);
        }
        references
    }

    /// Fails if a definition points at itself.
    ///
    /// # Errors
    ///
    /// Returns `CyclicReference` with the path `[id, id]`.
    pub fn check_self_reference(definition: &ResourceDefinition) -> Result<(), GraphError> {
        let referenced = Self::extract_references(definition)
            .iter()
            .any(|r| r.source_id == definition.id);

        if referenced || definition.depends_on.contains(&definition.id) {
            return Err(GraphError::CyclicReference {
                path: vec![definition.id.clone(), definition.id.clone()],
            });
        }
        Ok(())
    }

    /// Resolves a single reference against recorded state.
    ///
    /// # Errors
    ///
    /// Returns `Unresolved` if the source has not produced the output.
    pub fn resolve(
        logical_id: &str,
        reference: &Reference,
        snapshot: &StateSnapshot,
    ) -> Result<Value, ResolveError> {
        snapshot
            .output(&reference.source_id, &reference.output)
            .cloned()
            .ok_or_else(|| ResolveError::Unresolved {
                logical_id: logical_id.to_string(),
                source_id: reference.source_id.clone(),
                output: reference.output.clone(),
            })
    }

    /// Resolves a `setting` marker.
    ///
    /// # Errors
    ///
    /// Returns `UnknownSetting` if the deployment settings lack the path.
    pub fn resolve_setting(&self, logical_id: &str, path: &str) -> Result<Value, ResolveError> {
        self.config
            .setting(path)
            .ok_or_else(|| ResolveError::UnknownSetting {
                logical_id: logical_id.to_string(),
                setting: path.to_string(),
            })
    }

    /// Resolves every input of a definition for execution.
    ///
    /// # Errors
    ///
    /// Returns an error if any reference or setting cannot be resolved.
    pub fn resolve_inputs(
        &self,
        definition: &ResourceDefinition,
        snapshot: &StateSnapshot,
    ) -> Result<BTreeMap<String, Value>, ResolveError> {
        let lookup = |reference: &Reference| {
            Self::resolve(&definition.id, reference, snapshot).map(Some)
        };

        let mut resolved = BTreeMap::new();
        for (field, value) in &definition.inputs {
            if let Some(v) = self.resolve_value(&definition.id, value, &lookup)? {
                resolved.insert(field.clone(), v);
            }
        }
        Ok(resolved)
    }

    /// Resolves inputs at plan time.
    ///
    /// References to resources in `pending` (being created or replaced)
    /// are deferred; any field containing one becomes `Deferred`.
    ///
    /// # Errors
    ///
    /// Returns an error if a reference to an existing resource names an
    /// output it never produced, or a setting is unknown.
    pub fn resolve_known(
        &self,
        definition: &ResourceDefinition,
        snapshot: &StateSnapshot,
        pending: &BTreeSet<String>,
    ) -> Result<BTreeMap<String, ResolvedField>, ResolveError> {
        let lookup = |reference: &Reference| {
            if pending.contains(&reference.source_id) {
                Ok(None)
            } else {
                Self::resolve(&definition.id, reference, snapshot).map(Some)
            }
        };

        let mut resolved = BTreeMap::new();
        for (field, value) in &definition.inputs {
            let field_value = match self.resolve_value(&definition.id, value, &lookup)? {
                Some(v) => ResolvedField::Known(v),
                None => ResolvedField::Deferred,
            };
            resolved.insert(field.clone(), field_value);
        }
        Ok(resolved)
    }

    /// Resolves one value; `None` means a reference was deferred.
    fn resolve_value(
        &self,
        logical_id: &str,
        value: &InputValue,
        lookup: &dyn Fn(&Reference) -> Result<Option<Value>, ResolveError>,
    ) -> Result<Option<Value>, ResolveError> {
        match value {
            InputValue::Literal(v) => Ok(Some(v.clone())),
            InputValue::Setting(marker) => self
                .resolve_setting(logical_id, &marker.setting)
                .map(Some),
            InputValue::Reference(reference) => lookup(reference),
            InputValue::List(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    match self.resolve_value(logical_id, item, lookup)? {
                        Some(v) => out.push(v),
                        None => return Ok(None),
                    }
                }
                Ok(Some(Value::Array(out)))
            }
            InputValue::Map(entries) => {
                let mut out = serde_json::Map::new();
                for (key, item) in entries {
                    match self.resolve_value(logical_id, item, lookup)? {
                        Some(v) => {
                            out.insert(key.clone(), v);
                        }
                        None => return Ok(None),
                    }
                }
                Ok(Some(Value::Object(out)))
            }
        }
    }
}

fn collect_references(value: &InputValue, into: &mut BTreeSet<Reference>) {
    match value {
        InputValue::Reference(reference) => {
            into.insert(reference.clone());
        }
        InputValue::List(items) => {
            for item in items {
                collect_references(item, into);
            }
        }
        InputValue::Map(entries) => {
            for item in entries.values() {
                collect_references(item, into);
            }
        }
        InputValue::Literal(_) | InputValue::Setting(_) => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ResourceState;
    use serde_json::json;

    fn snapshot_with_vpc() -> StateSnapshot {
        let mut snapshot = StateSnapshot::new("test");
        let mut state = ResourceState::new("vpc", "vpc-123");
        state
            .outputs
            .insert(String::from("vpc_id"), json!("vpc-123"));
        snapshot.resources.insert(String::from("vpc"), state);
        snapshot
    }

    fn service() -> ResourceDefinition {
        ResourceDefinition::new("svc", "fargate_service")
            .with_input("security_group_id", InputValue::reference("sg", "security_group_id"))
            .with_input(
                "port_mappings",
                InputValue::List(vec![
                    InputValue::literal(80),
                    InputValue::Map(
                        [(String::from("vpc"), InputValue::reference("vpc", "vpc_id"))]
                            .into_iter()
                            .collect(),
                    ),
                ]),
            )
            .with_input("container_name", InputValue::setting("containers.web"))
    }

    #[test]
    fn test_extract_nested_references() {
        let refs = ReferenceResolver::extract_references(&service());
        let sources: Vec<_> = refs.iter().map(|r| r.source_id.as_str()).collect();

        assert_eq!(sources, vec!["sg", "vpc"]);
    }

    #[test]
    fn test_self_reference_is_a_cycle() {
        let def = ResourceDefinition::new("a", "vpc")
            .with_input("cidr", InputValue::reference("a", "vpc_id"));

        let err = ReferenceResolver::check_self_reference(&def).expect_err("self reference");
        assert!(matches!(err, GraphError::CyclicReference { ref path } if path == &["a", "a"]));
    }

    #[test]
    fn test_resolve_reports_missing_output() {
        let snapshot = snapshot_with_vpc();

        let value = ReferenceResolver::resolve("sg", &Reference::new("vpc", "vpc_id"), &snapshot)
            .expect("vpc exists");
        assert_eq!(value, json!("vpc-123"));

        let err = ReferenceResolver::resolve("svc", &Reference::new("sg", "security_group_id"), &snapshot)
            .expect_err("sg not created");
        assert!(matches!(err, ResolveError::Unresolved { ref source_id, .. } if source_id == "sg"));
    }

    #[test]
    fn test_plan_time_deferral() {
        let mut config = DeploymentConfig::default();
        config
            .containers
            .insert(String::from("web"), String::from("web-container"));
        let resolver = ReferenceResolver::new(&config);
        let pending: BTreeSet<String> = [String::from("sg")].into_iter().collect();

        let fields = resolver
            .resolve_known(&service(), &snapshot_with_vpc(), &pending)
            .expect("resolvable");

        assert_eq!(fields["security_group_id"], ResolvedField::Deferred);
        assert_eq!(
            fields["port_mappings"],
            ResolvedField::Known(json!([80, {"vpc": "vpc-123"}]))
        );
        assert_eq!(
            fields["container_name"],
            ResolvedField::Known(json!("web-container"))
        );
    }

    #[test]
    fn test_unknown_setting() {
        let config = DeploymentConfig::default();
        let resolver = ReferenceResolver::new(&config);
        let err = resolver
            .resolve_setting("svc", "containers.web")
            .expect_err("no containers configured");

        assert!(matches!(err, ResolveError::UnknownSetting { .. }));
    }
}
