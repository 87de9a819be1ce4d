//! Resource schema registry.
//!
//! Every resource kind registers the shape of its inputs and outputs and the
//! input fields that cannot change in place. Resources are plain records; all
//! kind-specific behaviour is dispatched through the schema looked up here.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use crate::error::{FieldViolation, SchemaError};

use super::catalog::builtin_schemas;

/// Type of an input or output field.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    /// UTF-8 string.
    String,
    /// Whole number.
    Integer,
    /// Any number; integers are accepted.
    Number,
    /// `true` or `false`.
    Boolean,
    /// Ordered list of values.
    List,
    /// String-keyed map.
    Map,
    /// Anything.
    Any,
}

/// Declaration of a single input field.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct FieldSpec {
    /// Field type.
    #[serde(rename = "type")]
    pub field_type: FieldType,
    /// Whether the field must be present.
    #[serde(default)]
    pub required: bool,
}

/// Schema of one resource kind.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResourceSchema {
    /// Kind name.
    pub kind: String,
    /// Input fields.
    #[serde(default)]
    pub inputs: BTreeMap<String, FieldSpec>,
    /// Output fields produced once the resource exists.
    #[serde(default)]
    pub outputs: BTreeMap<String, FieldType>,
    /// Input fields whose change forces a replacement.
    #[serde(default)]
    pub replacement_triggers: BTreeSet<String>,
}

/// Registry of known resource kinds.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    schemas: BTreeMap<String, ResourceSchema>,
}

impl FieldType {
    /// Returns the type of a JSON value, or `None` for `null`.
    #[must_use]
    pub fn of(value: &Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::Bool(_) => Some(Self::Boolean),
            Value::Number(n) if n.is_i64() || n.is_u64() => Some(Self::Integer),
            Value::Number(_) => Some(Self::Number),
            Value::String(_) => Some(Self::String),
            Value::Array(_) => Some(Self::List),
            Value::Object(_) => Some(Self::Map),
        }
    }

    /// Returns true if a value of type `other` fits a field of this type.
    #[must_use]
    pub const fn accepts(self, other: Self) -> bool {
        matches!(
            (self, other),
            (Self::Any, _)
                | (_, Self::Any)
                | (Self::Number, Self::Integer)
                | (Self::String, Self::String)
                | (Self::Integer, Self::Integer)
                | (Self::Number, Self::Number)
                | (Self::Boolean, Self::Boolean)
                | (Self::List, Self::List)
                | (Self::Map, Self::Map)
        )
    }
}

impl FieldSpec {
    /// A required field.
    #[must_use]
    pub const fn required(field_type: FieldType) -> Self {
        Self {
            field_type,
            required: true,
        }
    }

    /// An optional field.
    #[must_use]
    pub const fn optional(field_type: FieldType) -> Self {
        Self {
            field_type,
            required: false,
        }
    }
}

impl ResourceSchema {
    /// Creates an empty schema for a kind.
    #[must_use]
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            inputs: BTreeMap::new(),
            outputs: BTreeMap::new(),
            replacement_triggers: BTreeSet::new(),
        }
    }

    /// Adds a required input.
    #[must_use]
    pub fn required(mut self, field: &str, field_type: FieldType) -> Self {
        self.inputs
            .insert(field.to_string(), FieldSpec::required(field_type));
        self
    }

    /// Adds an optional input.
    #[must_use]
    pub fn optional(mut self, field: &str, field_type: FieldType) -> Self {
        self.inputs
            .insert(field.to_string(), FieldSpec::optional(field_type));
        self
    }

    /// Adds an output.
    #[must_use]
    pub fn output(mut self, field: &str, field_type: FieldType) -> Self {
        self.outputs.insert(field.to_string(), field_type);
        self
    }

    /// Marks input fields as replacement triggers.
    #[must_use]
    pub fn triggers(mut self, fields: &[&str]) -> Self {
        self.replacement_triggers
            .extend(fields.iter().map(|f| (*f).to_string()));
        self
    }

    /// Returns true if a change to `field` forces a replacement.
    #[must_use]
    pub fn is_replacement_trigger(&self, field: &str) -> bool {
        self.replacement_triggers.contains(field)
    }

    /// Checks that the schema itself is consistent.
    fn check_definition(&self) -> Vec<FieldViolation> {
        self.replacement_triggers
            .iter()
            .filter(|t| !self.inputs.contains_key(*t))
            .map(|t| {
                FieldViolation::new(
                    format!("kind:{}", self.kind),
                    t.as_str(),
                    "replacement trigger is not a declared input",
                )
            })
            .collect()
    }

    /// Validates input types against the schema.
    ///
    /// `provided` maps each supplied field to its effective type; `None`
    /// means the value is `null`. Every violation is reported.
    #[must_use]
    pub fn validate(
        &self,
        logical_id: &str,
        provided: &BTreeMap<String, Option<FieldType>>,
    ) -> Vec<FieldViolation> {
        let mut violations = Vec::new();

        for (field, spec) in &self.inputs {
            match provided.get(field) {
                None if spec.required => {
                    violations.push(FieldViolation::new(
                        logical_id,
                        field.as_str(),
                        "required field is missing",
                    ));
                }
                Some(None) if spec.required => {
                    violations.push(FieldViolation::new(
                        logical_id,
                        field.as_str(),
                        "required field must not be null",
                    ));
                }
                Some(Some(actual)) if !spec.field_type.accepts(*actual) => {
                    violations.push(FieldViolation::new(
                        logical_id,
                        field.as_str(),
                        format!("expected {}, found {actual}", spec.field_type),
                    ));
                }
                _ => {}
            }
        }

        for field in provided.keys() {
            if !self.inputs.contains_key(field) {
                violations.push(FieldViolation::new(
                    logical_id,
                    field.as_str(),
                    format!("unknown input for kind '{}'", self.kind),
                ));
            }
        }

        violations
    }

    /// Produces output values for a freshly realised resource.
    ///
    /// Outputs named like an input echo the input; identifier-like outputs
    /// carry the physical id; the rest get a placeholder of the right type.
    #[must_use]
    pub fn produce_outputs(
        &self,
        physical_id: &str,
        inputs: &BTreeMap<String, Value>,
    ) -> BTreeMap<String, Value> {
        self.outputs
            .iter()
            .map(|(name, field_type)| {
                let value = inputs.get(name).cloned().unwrap_or_else(|| {
                    placeholder_output(&self.kind, physical_id, name, *field_type)
                });
                (name.clone(), value)
            })
            .collect()
    }
}

fn placeholder_output(kind: &str, physical_id: &str, name: &str, field_type: FieldType) -> Value {
    match field_type {
        FieldType::String | FieldType::Any => {
            if name.ends_with("_arn") {
                Value::String(format!("arn:cairn:{kind}:{physical_id}"))
            } else if name == "id" || name.ends_with("_id") {
                Value::String(physical_id.to_string())
            } else {
                Value::String(format!("{physical_id}/{name}"))
            }
        }
        FieldType::Integer | FieldType::Number => Value::from(0),
        FieldType::Boolean => Value::Bool(false),
        FieldType::List => Value::Array(vec![Value::String(format!("{physical_id}/{name}/0"))]),
        FieldType::Map => Value::Object(serde_json::Map::new()),
    }
}

impl SchemaRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding the built-in kinds.
    #[must_use]
    pub fn builtin() -> Self {
        let schemas = builtin_schemas()
            .into_iter()
            .map(|s| (s.kind.clone(), s))
            .collect();
        Self { schemas }
    }

    /// Registers a kind from its parts.
    ///
    /// # Errors
    ///
    /// Returns an error if the kind is already registered or a trigger
    /// names an undeclared input.
    pub fn register(
        &mut self,
        kind: impl Into<String>,
        inputs: BTreeMap<String, FieldSpec>,
        outputs: BTreeMap<String, FieldType>,
        replacement_triggers: impl IntoIterator<Item = String>,
    ) -> Result<(), SchemaError> {
        self.insert(ResourceSchema {
            kind: kind.into(),
            inputs,
            outputs,
            replacement_triggers: replacement_triggers.into_iter().collect(),
        })
    }

    /// Registers a complete schema.
    ///
    /// # Errors
    ///
    /// Returns an error if the kind is already registered or a trigger
    /// names an undeclared input.
    pub fn insert(&mut self, schema: ResourceSchema) -> Result<(), SchemaError> {
        if self.schemas.contains_key(&schema.kind) {
            return Err(SchemaError::DuplicateKind { kind: schema.kind });
        }

        let violations = schema.check_definition();
        if !violations.is_empty() {
            return Err(SchemaError::Validation { violations });
        }

        debug!("Registered resource kind: {}", schema.kind);
        self.schemas.insert(schema.kind.clone(), schema);
        Ok(())
    }

    /// Returns a copy of this registry extended with extra kinds.
    ///
    /// # Errors
    ///
    /// Returns an error if any kind clashes or is malformed.
    pub fn extended_with(&self, kinds: &[ResourceSchema]) -> Result<Self, SchemaError> {
        let mut registry = self.clone();
        for schema in kinds {
            registry.insert(schema.clone())?;
        }
        Ok(registry)
    }

    /// Looks up a kind.
    ///
    /// # Errors
    ///
    /// Returns `UnknownKind` if the kind is not registered.
    pub fn lookup(&self, kind: &str) -> Result<&ResourceSchema, SchemaError> {
        self.schemas.get(kind).ok_or_else(|| SchemaError::UnknownKind {
            kind: kind.to_string(),
        })
    }

    /// Returns true if the kind is registered.
    #[must_use]
    pub fn contains(&self, kind: &str) -> bool {
        self.schemas.contains_key(kind)
    }

    /// Iterates over all schemas in kind order.
    pub fn schemas(&self) -> impl Iterator<Item = &ResourceSchema> {
        self.schemas.values()
    }

    /// Returns the number of registered kinds.
    #[must_use]
    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    /// Returns true if no kinds are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::List => "list",
            Self::Map => "map",
            Self::Any => "any",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn widget() -> ResourceSchema {
        ResourceSchema::new("widget")
            .required("name", FieldType::String)
            .optional("size", FieldType::Number)
            .output("widget_id", FieldType::String)
            .output("name", FieldType::String)
            .triggers(&["name"])
    }

    #[test]
    fn test_lookup_unknown_kind() {
        let registry = SchemaRegistry::new();
        let err = registry.lookup("nope").expect_err("kind is not registered");
        assert!(matches!(err, SchemaError::UnknownKind { kind } if kind == "nope"));
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = SchemaRegistry::new();
        let schema = widget();
        registry
            .register(
                "widget",
                schema.inputs.clone(),
                schema.outputs.clone(),
                vec![String::from("name")],
            )
            .expect("registration succeeds");

        let found = registry.lookup("widget").expect("registered");
        assert!(found.is_replacement_trigger("name"));
        assert!(!found.is_replacement_trigger("size"));
        assert!(matches!(
            registry.insert(widget()),
            Err(SchemaError::DuplicateKind { .. })
        ));
    }

    #[test]
    fn test_trigger_must_be_an_input() {
        let mut registry = SchemaRegistry::new();
        let bad = ResourceSchema::new("bad").triggers(&["ghost"]);
        assert!(matches!(
            registry.insert(bad),
            Err(SchemaError::Validation { .. })
        ));
    }

    #[test]
    fn test_validate_reports_every_violation() {
        let schema = widget();
        let mut provided = BTreeMap::new();
        provided.insert(String::from("size"), Some(FieldType::String));
        provided.insert(String::from("colour"), Some(FieldType::String));

        let violations = schema.validate("w1", &provided);
        let fields: Vec<_> = violations.iter().map(|v| v.field.as_str()).collect();

        assert_eq!(violations.len(), 3);
        assert!(fields.contains(&"name"));
        assert!(fields.contains(&"size"));
        assert!(fields.contains(&"colour"));
    }

    #[test]
    fn test_integer_fits_number() {
        assert!(FieldType::Number.accepts(FieldType::Integer));
        assert!(!FieldType::Integer.accepts(FieldType::Number));
        assert!(FieldType::Any.accepts(FieldType::Map));
        assert_eq!(FieldType::of(&Value::from(1.5)), Some(FieldType::Number));
        assert_eq!(FieldType::of(&Value::Null), None);
    }

    #[test]
    fn test_produce_outputs() {
        let schema = widget();
        let mut inputs = BTreeMap::new();
        inputs.insert(String::from("name"), Value::from("gear"));

        let outputs = schema.produce_outputs("widget-1", &inputs);
        assert_eq!(outputs["widget_id"], Value::from("widget-1"));
        assert_eq!(outputs["name"], Value::from("gear"));
    }

    #[test]
    fn test_builtin_catalog_is_consistent() {
        let registry = SchemaRegistry::builtin();
        assert!(registry.len() >= 10);
        for schema in registry.schemas() {
            assert!(schema.check_definition().is_empty(), "{}", schema.kind);
        }
    }
}
