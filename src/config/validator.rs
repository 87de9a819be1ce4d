//! Desired-state document validation.
//!
//! This module checks a parsed document against the schema registry before
//! any graph is built. Every violation is collected so the user can fix the
//! whole document in one pass.

use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use crate::error::{FieldViolation, SchemaError};
use crate::schema::{FieldType, SchemaRegistry};

use super::spec::{DeploymentConfig, InputValue, ResourceDefinition, StackDocument};

/// Section name used for violations outside any resource.
const DEPLOYMENT_SECTION: &str = "deployment";

/// Validator for desired-state documents.
#[derive(Debug)]
pub struct DocumentValidator<'a> {
    registry: &'a SchemaRegistry,
}

/// Outcome of a successful validation.
#[derive(Debug, Default)]
pub struct ValidationReport {
    /// Number of resources checked.
    pub resources: usize,
    /// Non-fatal findings.
    pub warnings: Vec<String>,
}

/// Scratch space shared by the individual checks.
struct Findings {
    violations: Vec<FieldViolation>,
    warnings: Vec<String>,
}

impl<'a> DocumentValidator<'a> {
    /// Creates a validator backed by a registry.
    #[must_use]
    pub const fn new(registry: &'a SchemaRegistry) -> Self {
        Self { registry }
    }

    /// Validates a document.
    ///
    /// Cycles are not detected here; they surface when the graph is built.
    ///
    /// # Errors
    ///
    /// Returns `SchemaError::Validation` listing every violation found.
    pub fn validate(&self, document: &StackDocument) -> Result<ValidationReport, SchemaError> {
        let mut findings = Findings {
            violations: Vec::new(),
            warnings: Vec::new(),
        };

        Self::validate_deployment(&document.deployment, &mut findings);

        let mut seen = BTreeSet::new();
        for resource in &document.resources {
            if !seen.insert(resource.id.as_str()) {
                findings.violations.push(FieldViolation::new(
                    resource.id.as_str(),
                    "id",
                    "duplicate logical id",
                ));
            }
        }

        let by_id: BTreeMap<&str, &ResourceDefinition> = document
            .resources
            .iter()
            .map(|r| (r.id.as_str(), r))
            .collect();

        for resource in &document.resources {
            self.validate_resource(resource, &by_id, &document.deployment, &mut findings);
        }

        if document.resources.is_empty() {
            findings
                .warnings
                .push(String::from("No resources declared; applying will delete every managed resource"));
        }

        for schema in &document.kinds {
            if !document.resources.iter().any(|r| r.kind == schema.kind) {
                findings
                    .warnings
                    .push(format!("Kind '{}' is declared but not used", schema.kind));
            }
        }

        if findings.violations.is_empty() {
            debug!(
                "Document validation passed for {} resource(s)",
                document.resources.len()
            );
            Ok(ValidationReport {
                resources: document.resources.len(),
                warnings: findings.warnings,
            })
        } else {
            Err(SchemaError::Validation {
                violations: findings.violations,
            })
        }
    }

    /// Validates engine settings.
    fn validate_deployment(config: &DeploymentConfig, findings: &mut Findings) {
        if config.max_workers == 0 {
            findings.violations.push(FieldViolation::new(
                DEPLOYMENT_SECTION,
                "max_workers",
                "must be at least 1",
            ));
        }

        if config.max_attempts == 0 {
            findings.violations.push(FieldViolation::new(
                DEPLOYMENT_SECTION,
                "max_attempts",
                "must be at least 1",
            ));
        }

        if config.backoff_base_ms > config.backoff_max_ms {
            findings.violations.push(FieldViolation::new(
                DEPLOYMENT_SECTION,
                "backoff_base_ms",
                format!(
                    "must not exceed backoff_max_ms ({})",
                    config.backoff_max_ms
                ),
            ));
        }

        if config.max_workers > 256 {
            findings.warnings.push(format!(
                "max_workers is {}; most backends throttle well below that",
                config.max_workers
            ));
        }
    }

    /// Validates one resource: id, kind, inputs and explicit dependencies.
    fn validate_resource(
        &self,
        resource: &ResourceDefinition,
        by_id: &BTreeMap<&str, &ResourceDefinition>,
        config: &DeploymentConfig,
        findings: &mut Findings,
    ) {
        let id = resource.id.as_str();

        if !is_valid_logical_id(id) {
            findings.violations.push(FieldViolation::new(
                id,
                "id",
                "must start with a letter and contain only letters, digits, '-' or '_'",
            ));
        }

        for dependency in &resource.depends_on {
            if !by_id.contains_key(dependency.as_str()) {
                findings.violations.push(FieldViolation::new(
                    id,
                    "depends_on",
                    format!("unknown resource '{dependency}'"),
                ));
            }
        }

        let Ok(schema) = self.registry.lookup(&resource.kind) else {
            findings.violations.push(FieldViolation::new(
                id,
                "kind",
                format!("unknown resource kind '{}'", resource.kind),
            ));
            return;
        };

        let mut provided = BTreeMap::new();
        for (field, value) in &resource.inputs {
            let field_type = self.input_type(id, field, value, by_id, config, findings);
            provided.insert(field.clone(), field_type);
        }

        findings
            .violations
            .extend(schema.validate(id, &provided));
    }

    /// Determines the effective type of an input, reporting bad markers.
    ///
    /// Unresolvable markers are typed `Any` so they are not reported twice.
    fn input_type(
        &self,
        id: &str,
        path: &str,
        value: &InputValue,
        by_id: &BTreeMap<&str, &ResourceDefinition>,
        config: &DeploymentConfig,
        findings: &mut Findings,
    ) -> Option<FieldType> {
        match value {
            InputValue::Literal(v) => FieldType::of(v),
            InputValue::Setting(marker) => match config.setting(&marker.setting) {
                Some(v) => FieldType::of(&v),
                None => {
                    findings.violations.push(FieldViolation::new(
                        id,
                        path,
                        format!("unknown setting '{}'", marker.setting),
                    ));
                    Some(FieldType::Any)
                }
            },
            InputValue::Reference(reference) => {
                let Some(source) = by_id.get(reference.source_id.as_str()) else {
                    findings.violations.push(FieldViolation::new(
                        id,
                        path,
                        format!("reference to unknown resource '{}'", reference.source_id),
                    ));
                    return Some(FieldType::Any);
                };

                // Unknown source kinds are reported on the source itself.
                let Ok(schema) = self.registry.lookup(&source.kind) else {
                    return Some(FieldType::Any);
                };

                if let Some(output_type) = schema.outputs.get(&reference.output) {
                    Some(*output_type)
                } else {
                    findings.violations.push(FieldViolation::new(
                        id,
                        path,
                        format!(
                            "kind '{}' has no output '{}'",
                            source.kind, reference.output
                        ),
                    ));
                    Some(FieldType::Any)
                }
            }
            InputValue::List(items) => {
                for (i, item) in items.iter().enumerate() {
                    let item_path = format!("{path}[{i}]");
                    self.input_type(id, &item_path, item, by_id, config, findings);
                }
                Some(FieldType::List)
            }
            InputValue::Map(entries) => {
                for (key, item) in entries {
                    let item_path = format!("{path}.{key}");
                    self.input_type(id, &item_path, item, by_id, config, findings);
                }
                Some(FieldType::Map)
            }
        }
    }
}

/// Validates that a logical id follows the naming convention.
/// Ids must start with a letter and contain letters, digits, '-' or '_'.
fn is_valid_logical_id(id: &str) -> bool {
    let mut chars = id.chars();

    let Some(first) = chars.next() else {
        return false;
    };

    if !first.is_ascii_alphabetic() {
        return false;
    }

    chars.all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

impl ValidationReport {
    /// Returns the number of warnings.
    #[must_use]
    pub const fn warning_count(&self) -> usize {
        self.warnings.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::spec::ReplacementPolicy;

    fn document(resources: Vec<ResourceDefinition>) -> StackDocument {
        StackDocument {
            stack: String::from("test"),
            deployment: DeploymentConfig {
                region: Some(String::from("eu-west-1")),
                ..DeploymentConfig::default()
            },
            kinds: vec![],
            resources,
        }
    }

    fn vpc(id: &str) -> ResourceDefinition {
        ResourceDefinition::new(id, "vpc").with_input("cidr", InputValue::literal("10.0.0.0/16"))
    }

    fn violations(result: Result<ValidationReport, SchemaError>) -> Vec<FieldViolation> {
        match result {
            Err(SchemaError::Validation { violations }) => violations,
            other => panic!("expected validation failure, got {other:?}"),
        }
    }

    #[test]
    fn test_valid_logical_id() {
        assert!(is_valid_logical_id("vpc"));
        assert!(is_valid_logical_id("WebService_2"));
        assert!(is_valid_logical_id("alb-public"));
    }

    #[test]
    fn test_invalid_logical_id() {
        assert!(!is_valid_logical_id(""));
        assert!(!is_valid_logical_id("1vpc"));
        assert!(!is_valid_logical_id("my vpc"));
        assert!(!is_valid_logical_id("vpc.main"));
    }

    #[test]
    fn test_valid_document() {
        let registry = SchemaRegistry::builtin();
        let doc = document(vec![
            vpc("vpc"),
            ResourceDefinition::new("sg", "security_group")
                .with_input("vpc_id", InputValue::reference("vpc", "vpc_id"))
                .with_input("description", InputValue::setting("region"))
                .with_replacement(ReplacementPolicy::Manual),
        ]);

        let report = DocumentValidator::new(&registry)
            .validate(&doc)
            .expect("document is valid");
        assert_eq!(report.resources, 2);
        assert_eq!(report.warning_count(), 0);
    }

    #[test]
    fn test_collects_every_violation() {
        let registry = SchemaRegistry::builtin();
        let doc = document(vec![
            ResourceDefinition::new("vpc", "vpc").with_input("cidr", InputValue::literal(16)),
            ResourceDefinition::new("sg", "security_group")
                .with_input("vpc_id", InputValue::reference("vpc", "no_such_output"))
                .with_dependency("ghost"),
            ResourceDefinition::new("thing", "teleporter"),
        ]);

        let found = violations(DocumentValidator::new(&registry).validate(&doc));
        let rendered: Vec<String> = found.iter().map(ToString::to_string).collect();

        // cidr type, sg.description missing, bad output, unknown dep, unknown kind
        assert_eq!(found.len(), 5, "{rendered:#?}");
        assert!(rendered.iter().any(|v| v.starts_with("vpc.cidr")));
        assert!(rendered.iter().any(|v| v.starts_with("sg.description")));
        assert!(rendered.iter().any(|v| v.starts_with("sg.vpc_id")));
        assert!(rendered.iter().any(|v| v.starts_with("sg.depends_on")));
        assert!(rendered.iter().any(|v| v.starts_with("thing.kind")));
    }

    #[test]
    fn test_reference_output_type_is_checked() {
        let registry = SchemaRegistry::builtin();
        let doc = document(vec![
            vpc("vpc"),
            ResourceDefinition::new("sg", "security_group")
                .with_input("vpc_id", InputValue::reference("vpc", "public_subnet_ids"))
                .with_input("description", InputValue::literal("web")),
        ]);

        let found = violations(DocumentValidator::new(&registry).validate(&doc));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].field, "vpc_id");
        assert!(found[0].message.contains("expected string"));
    }

    #[test]
    fn test_unknown_setting_and_duplicate_id() {
        let registry = SchemaRegistry::builtin();
        let doc = document(vec![
            vpc("vpc"),
            ResourceDefinition::new("vpc", "vpc")
                .with_input("cidr", InputValue::setting("parameters.cidr")),
        ]);

        let found = violations(DocumentValidator::new(&registry).validate(&doc));
        assert!(found.iter().any(|v| v.field == "id" && v.message.contains("duplicate")));
        assert!(found.iter().any(|v| v.field == "cidr" && v.message.contains("parameters.cidr")));
    }

    #[test]
    fn test_engine_limits() {
        let registry = SchemaRegistry::builtin();
        let mut doc = document(vec![vpc("vpc")]);
        doc.deployment.max_workers = 0;
        doc.deployment.backoff_base_ms = 50_000;

        let found = violations(DocumentValidator::new(&registry).validate(&doc));
        assert_eq!(found.len(), 2);
        assert!(found.iter().all(|v| v.logical_id == DEPLOYMENT_SECTION));
    }

    #[test]
    fn test_empty_document_warns() {
        let registry = SchemaRegistry::builtin();
        let report = DocumentValidator::new(&registry)
            .validate(&document(vec![]))
            .expect("empty document is valid");
        assert_eq!(report.warning_count(), 1);
    }
}
