//! JSON Schema generation and schema-level manifest validation.
//!
//! [`SchemaGenerator`] turns a registry into a JSON Schema document for its
//! manifests: the `registry` field is pinned to the registry's name, the
//! node variants form a `oneOf` discriminated by `node_type`, and every rule
//! definition contributes one config object discriminated by
//! `rule_def_name`, with fields derived from the declared [`ParamSpec`]s.
//! Parameter order is preserved under the `x-params-order` annotation.
//!
//! [`SchemaGenerator::validate`] is the strong manifest check the structural
//! validator cannot do on its own: it resolves every `rule_def_name` against
//! the registry and checks the supplied parameters against the declared
//! signatures.
//!
//! [`ParamSpec`]: crate::registry::ParamSpec

use crate::manifest::{LogicNode, RuleSetManifest};
use crate::registry::{ParamSpec, Registry};
use serde_json::{json, Map, Value};
use thiserror::Error;

/// Annotation key under which parameter order is preserved.
pub const X_PARAMS_ORDER: &str = "x-params-order";

/// Schema-level manifest validation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    /// The manifest names a different registry than the schema was built for.
    #[error("manifest is for registry '{found}', schema is for '{expected}'")]
    RegistryMismatch { expected: String, found: String },

    /// A leaf names a rule definition the registry does not have.
    #[error("rule '{rule_id}': unknown rule definition '{rule_def_name}'")]
    UnknownRuleDef {
        rule_id: String,
        rule_def_name: String,
    },

    /// A leaf supplies a parameter the definition does not declare.
    #[error("rule '{rule_id}': rule definition '{rule_def_name}' has no parameter '{param}'")]
    UnknownParam {
        rule_id: String,
        rule_def_name: String,
        param: String,
    },

    /// A required parameter is missing.
    #[error("rule '{rule_id}': missing required parameter '{param}' for '{rule_def_name}'")]
    MissingParam {
        rule_id: String,
        rule_def_name: String,
        param: String,
    },

    /// A supplied parameter has the wrong type.
    #[error("rule '{rule_id}': parameter '{param}' of '{rule_def_name}' expects {expected}")]
    ParamType {
        rule_id: String,
        rule_def_name: String,
        param: String,
        expected: &'static str,
    },
}

/// Builds manifest schemas for one registry.
pub struct SchemaGenerator<C> {
    registry: Registry<C>,
}

impl<C> SchemaGenerator<C> {
    pub fn new(registry: &Registry<C>) -> Self {
        SchemaGenerator {
            registry: registry.clone(),
        }
    }

    /// The JSON Schema document for this registry's manifests.
    pub fn generate(&self) -> Value {
        let registry_name = self.registry.name();
        let union_name = format!("{}RuleDef", to_pascal(registry_name));

        let mut defs = Map::new();
        let mut config_refs = Vec::new();
        for rule_name in self.registry.names() {
            let Some(def) = self.registry.get(&rule_name) else {
                continue;
            };
            let config_name = format!("{}Config", to_pascal(&rule_name));
            config_refs.push(json!({ "$ref": format!("#/$defs/{config_name}") }));
            defs.insert(
                config_name,
                rule_config_schema(&rule_name, def.desc(), def.params()),
            );
        }

        // An empty registry accepts no leaves at all.
        let union_schema = if config_refs.is_empty() {
            json!(false)
        } else {
            json!({ "title": union_name, "oneOf": config_refs })
        };
        defs.insert(union_name.clone(), union_schema);

        defs.insert(
            "LeafNode".to_string(),
            json!({
                "title": "LeafNode",
                "type": "object",
                "additionalProperties": false,
                "properties": {
                    "node_type": { "const": "leaf", "description": "Leaf node in the predicate tree" },
                    "rule": { "$ref": format!("#/$defs/{union_name}"), "description": "The rule to evaluate" }
                },
                "required": ["node_type", "rule"]
            }),
        );
        defs.insert(
            "AndNode".to_string(),
            json!({
                "title": "AndNode",
                "type": "object",
                "additionalProperties": false,
                "properties": {
                    "node_type": { "const": "and", "description": "And node in the predicate tree" },
                    "rules": {
                        "type": "array",
                        "minItems": 2,
                        "items": { "$ref": "#/$defs/LogicNode" },
                        "description": "All rules must pass"
                    }
                },
                "required": ["node_type", "rules"]
            }),
        );
        defs.insert(
            "OrNode".to_string(),
            json!({
                "title": "OrNode",
                "type": "object",
                "additionalProperties": false,
                "properties": {
                    "node_type": { "const": "or", "description": "Or node in the predicate tree" },
                    "rules": {
                        "type": "array",
                        "minItems": 2,
                        "items": { "$ref": "#/$defs/LogicNode" },
                        "description": "Any rule must pass"
                    }
                },
                "required": ["node_type", "rules"]
            }),
        );
        defs.insert(
            "NotNode".to_string(),
            json!({
                "title": "NotNode",
                "type": "object",
                "additionalProperties": false,
                "properties": {
                    "node_type": { "const": "not", "description": "Not node in the predicate tree" },
                    "rule": { "$ref": "#/$defs/LogicNode", "description": "The rule must fail" }
                },
                "required": ["node_type", "rule"]
            }),
        );
        defs.insert(
            "RefNode".to_string(),
            json!({
                "title": "RefNode",
                "type": "object",
                "additionalProperties": false,
                "properties": {
                    "node_type": { "const": "ref", "description": "Reference to a rule definition" },
                    "ref_id": { "type": "string", "description": "Rule definition ID" }
                },
                "required": ["node_type", "ref_id"]
            }),
        );
        defs.insert(
            "LogicNode".to_string(),
            json!({
                "title": "LogicNode",
                "oneOf": [
                    { "$ref": "#/$defs/LeafNode" },
                    { "$ref": "#/$defs/AndNode" },
                    { "$ref": "#/$defs/OrNode" },
                    { "$ref": "#/$defs/NotNode" },
                    { "$ref": "#/$defs/RefNode" }
                ]
            }),
        );

        json!({
            "$schema": "https://json-schema.org/draft/2020-12/schema",
            "title": format!("{}Manifest", to_pascal(registry_name)),
            "type": "object",
            "additionalProperties": false,
            "properties": {
                "registry": {
                    "const": registry_name,
                    "description": "Name of the registry containing the rule definitions"
                },
                "rules": {
                    "type": "object",
                    "additionalProperties": { "$ref": "#/$defs/LogicNode" },
                    "description": "DAG of rule definitions.",
                    "default": {}
                }
            },
            "required": ["registry"],
            "$defs": defs
        })
    }

    /// Check a structurally valid manifest against the registry: every
    /// `rule_def_name` must exist and every leaf's parameters must fit the
    /// declared signature.
    pub fn validate(&self, manifest: &RuleSetManifest) -> Result<(), SchemaError> {
        if manifest.registry() != self.registry.name() {
            return Err(SchemaError::RegistryMismatch {
                expected: self.registry.name().to_string(),
                found: manifest.registry().to_string(),
            });
        }
        for (rule_id, root) in manifest.rules() {
            let mut stack = vec![root];
            while let Some(node) = stack.pop() {
                match node {
                    LogicNode::Leaf { rule } => {
                        let def = self.registry.get(&rule.rule_def_name).ok_or_else(|| {
                            SchemaError::UnknownRuleDef {
                                rule_id: rule_id.clone(),
                                rule_def_name: rule.rule_def_name.clone(),
                            }
                        })?;
                        for param in rule.params.keys() {
                            let spec = def
                                .params()
                                .iter()
                                .find(|spec| spec.name() == param)
                                .ok_or_else(|| SchemaError::UnknownParam {
                                    rule_id: rule_id.clone(),
                                    rule_def_name: rule.rule_def_name.clone(),
                                    param: param.clone(),
                                })?;
                            let value = &rule.params[param];
                            if !spec.ty().matches(value) {
                                return Err(SchemaError::ParamType {
                                    rule_id: rule_id.clone(),
                                    rule_def_name: rule.rule_def_name.clone(),
                                    param: param.clone(),
                                    expected: spec.ty().json_type().unwrap_or("any"),
                                });
                            }
                        }
                        for spec in def.params() {
                            if spec.required() && !rule.params.contains_key(spec.name()) {
                                return Err(SchemaError::MissingParam {
                                    rule_id: rule_id.clone(),
                                    rule_def_name: rule.rule_def_name.clone(),
                                    param: spec.name().to_string(),
                                });
                            }
                        }
                    }
                    LogicNode::And { rules } | LogicNode::Or { rules } => {
                        stack.extend(rules.iter());
                    }
                    LogicNode::Not { rule } => stack.push(rule),
                    LogicNode::Ref { .. } => {}
                }
            }
        }
        Ok(())
    }
}

/// One config object schema, discriminated by its pinned `rule_def_name`.
fn rule_config_schema(rule_name: &str, desc: Option<&str>, params: &[ParamSpec]) -> Value {
    let mut properties = Map::new();
    properties.insert(
        "rule_def_name".to_string(),
        json!({
            "const": rule_name,
            "description": "Name of the rule definition in the registry"
        }),
    );
    let mut required = vec![json!("rule_def_name")];
    let mut order = Vec::new();
    for spec in params {
        order.push(json!(spec.name()));
        properties.insert(spec.name().to_string(), param_schema(spec));
        if spec.required() {
            required.push(json!(spec.name()));
        }
    }

    let mut schema = Map::new();
    schema.insert(
        "title".to_string(),
        json!(format!("{}Config", to_pascal(rule_name))),
    );
    schema.insert(
        "description".to_string(),
        json!(desc.map_or_else(|| format!("Configuration for {rule_name}"), str::to_string)),
    );
    schema.insert("type".to_string(), json!("object"));
    schema.insert("additionalProperties".to_string(), json!(false));
    schema.insert("properties".to_string(), Value::Object(properties));
    schema.insert("required".to_string(), Value::Array(required));
    schema.insert(X_PARAMS_ORDER.to_string(), Value::Array(order));
    Value::Object(schema)
}

fn param_schema(spec: &ParamSpec) -> Value {
    let mut schema = Map::new();
    if let Some(json_type) = spec.ty().json_type() {
        schema.insert("type".to_string(), json!(json_type));
    }
    if let Some(desc) = spec.desc() {
        schema.insert("description".to_string(), json!(desc));
    }
    if let Some(default) = spec.default() {
        schema.insert("default".to_string(), default.clone());
    }
    Value::Object(schema)
}

/// `snake_case`/`kebab-case` to `PascalCase`.
fn to_pascal(s: &str) -> String {
    s.split(|c: char| c == '_' || c == '-' || c == ' ')
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect()
}
