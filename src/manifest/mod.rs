//! Declarative manifests of named rule trees.
//!
//! A [`RuleSetManifest`] names a registry and maps rule ids to [`LogicNode`]
//! trees. The canonical on-wire form is JSON, discriminated by `node_type`:
//!
//! ```json
//! { "registry": "user_registry",
//!   "rules": {
//!     "adult_and_active": {
//!       "node_type": "and",
//!       "rules": [
//!         {"node_type": "leaf", "rule": {"rule_def_name": "is_adult", "min_age": 21}},
//!         {"node_type": "leaf", "rule": {"rule_def_name": "is_active"}}
//!       ]
//!     },
//!     "gate": {"node_type": "ref", "ref_id": "adult_and_active"}
//!   } }
//! ```
//!
//! Validation happens at construction, for the programmatic and the JSON
//! path alike: unknown fields are rejected at every level, `and`/`or` need
//! at least two children, and the `ref` graph must be acyclic. All walks use
//! explicit work stacks; manifests ~1000 nodes deep validate without
//! touching the host call stack.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

/// Manifest parsing and validation errors.
#[derive(Debug, Error)]
pub enum ManifestError {
    /// A field failed structural validation.
    #[error("manifest validation failed at {path}: {message}")]
    Validation { path: String, message: String },

    /// The `ref` graph contains a cycle; `ring` lists the rule ids on the
    /// cycle in reference order.
    #[error("cycle detected in rule references: {}", .ring.join(" -> "))]
    RuleDefRing { ring: Vec<String> },

    /// The manifest text was not valid JSON.
    #[error("invalid manifest JSON: {0}")]
    Json(#[from] serde_json::Error),
}

fn validation(path: &str, message: impl Into<String>) -> ManifestError {
    ManifestError::Validation {
        path: path.to_string(),
        message: message.into(),
    }
}

/// Configuration of one leaf rule: which definition to call and with what
/// parameters. Parameters are flattened alongside `rule_def_name` on the
/// wire.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleConfig {
    pub rule_def_name: String,
    #[serde(flatten)]
    pub params: Map<String, Value>,
}

impl RuleConfig {
    pub fn new(rule_def_name: impl Into<String>) -> Self {
        RuleConfig {
            rule_def_name: rule_def_name.into(),
            params: Map::new(),
        }
    }

    pub fn with_param(mut self, name: impl Into<String>, value: Value) -> Self {
        self.params.insert(name.into(), value);
        self
    }
}

/// One node of a rule tree, discriminated by `node_type`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "node_type", rename_all = "lowercase")]
pub enum LogicNode {
    /// Evaluate a registered rule definition.
    Leaf { rule: RuleConfig },
    /// All children must pass. At least two children.
    And { rules: Vec<LogicNode> },
    /// Any child must pass. At least two children.
    Or { rules: Vec<LogicNode> },
    /// The child must fail.
    Not { rule: Box<LogicNode> },
    /// Symbolic reference to another rule in the same manifest/registry.
    Ref { ref_id: String },
}

impl LogicNode {
    pub fn leaf(rule: RuleConfig) -> Self {
        LogicNode::Leaf { rule }
    }

    pub fn and(rules: Vec<LogicNode>) -> Self {
        LogicNode::And { rules }
    }

    pub fn or(rules: Vec<LogicNode>) -> Self {
        LogicNode::Or { rules }
    }

    pub fn not(rule: LogicNode) -> Self {
        LogicNode::Not {
            rule: Box::new(rule),
        }
    }

    pub fn reference(ref_id: impl Into<String>) -> Self {
        LogicNode::Ref {
            ref_id: ref_id.into(),
        }
    }

    /// The `ref_id` of every `ref` node in this tree.
    pub fn dependencies(&self) -> BTreeSet<String> {
        let mut deps = BTreeSet::new();
        let mut stack = vec![self];
        while let Some(node) = stack.pop() {
            match node {
                LogicNode::Ref { ref_id } => {
                    deps.insert(ref_id.clone());
                }
                LogicNode::And { rules } | LogicNode::Or { rules } => {
                    stack.extend(rules.iter());
                }
                LogicNode::Not { rule } => stack.push(rule),
                LogicNode::Leaf { .. } => {}
            }
        }
        deps
    }
}

/// A validated set of named rule trees for one registry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleSetManifest {
    registry: String,
    rules: BTreeMap<String, LogicNode>,
}

impl RuleSetManifest {
    /// Build and validate a manifest from in-memory nodes.
    pub fn new(
        registry: impl Into<String>,
        rules: impl IntoIterator<Item = (String, LogicNode)>,
    ) -> Result<Self, ManifestError> {
        let rules: BTreeMap<String, LogicNode> = rules.into_iter().collect();
        for (rule_id, node) in &rules {
            validate_arity(node, &format!("rules.{rule_id}"))?;
        }
        if let Some(ring) = detect_ring(&rules) {
            return Err(ManifestError::RuleDefRing { ring });
        }
        Ok(RuleSetManifest {
            registry: registry.into(),
            rules,
        })
    }

    /// Parse and validate the canonical JSON object form.
    pub fn from_value(value: &Value) -> Result<Self, ManifestError> {
        let obj = value
            .as_object()
            .ok_or_else(|| validation("$", "expected an object"))?;
        for key in obj.keys() {
            if key != "registry" && key != "rules" {
                return Err(validation("$", format!("unknown field '{key}'")));
            }
        }
        let registry = obj
            .get("registry")
            .and_then(Value::as_str)
            .ok_or_else(|| validation("$", "missing or non-string 'registry'"))?;

        let mut rules = Vec::new();
        if let Some(raw_rules) = obj.get("rules") {
            let raw = raw_rules
                .as_object()
                .ok_or_else(|| validation("rules", "expected an object"))?;
            for (rule_id, node_value) in raw {
                let node = parse_node(node_value, &format!("rules.{rule_id}"))?;
                rules.push((rule_id.clone(), node));
            }
        }
        Self::new(registry, rules)
    }

    /// Parse and validate manifest text.
    pub fn from_json(text: &str) -> Result<Self, ManifestError> {
        let value: Value = serde_json::from_str(text)?;
        Self::from_value(&value)
    }

    /// Canonical JSON object form.
    pub fn to_value(&self) -> Result<Value, ManifestError> {
        Ok(serde_json::to_value(self)?)
    }

    /// Canonical JSON text.
    pub fn to_json(&self) -> Result<String, ManifestError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn registry(&self) -> &str {
        &self.registry
    }

    pub fn rules(&self) -> &BTreeMap<String, LogicNode> {
        &self.rules
    }
}

impl<'de> Deserialize<'de> for RuleSetManifest {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        RuleSetManifest::from_value(&value).map_err(serde::de::Error::custom)
    }
}

/// Parse one node tree from its JSON form, rejecting unknown fields at every
/// level. Explicit work stack; never recurses.
fn parse_node(root: &Value, root_path: &str) -> Result<LogicNode, ManifestError> {
    enum Step<'a> {
        Enter { value: &'a Value, path: String },
        ExitAnd { count: usize },
        ExitOr { count: usize },
        ExitNot,
    }

    fn reject_unknown(
        obj: &Map<String, Value>,
        allowed: &[&str],
        path: &str,
    ) -> Result<(), ManifestError> {
        for key in obj.keys() {
            if !allowed.contains(&key.as_str()) {
                return Err(validation(path, format!("unknown field '{key}'")));
            }
        }
        Ok(())
    }

    let mut stack = vec![Step::Enter {
        value: root,
        path: root_path.to_string(),
    }];
    let mut results: Vec<LogicNode> = Vec::new();

    while let Some(step) = stack.pop() {
        match step {
            Step::Enter { value, path } => {
                let obj = value
                    .as_object()
                    .ok_or_else(|| validation(&path, "expected an object"))?;
                let node_type = obj
                    .get("node_type")
                    .and_then(Value::as_str)
                    .ok_or_else(|| validation(&path, "missing or non-string 'node_type'"))?;
                match node_type {
                    "leaf" => {
                        reject_unknown(obj, &["node_type", "rule"], &path)?;
                        let rule = obj
                            .get("rule")
                            .and_then(Value::as_object)
                            .ok_or_else(|| validation(&path, "'leaf' requires an object 'rule'"))?;
                        let rule_def_name = rule
                            .get("rule_def_name")
                            .and_then(Value::as_str)
                            .ok_or_else(|| {
                                validation(&path, "'rule' requires a string 'rule_def_name'")
                            })?;
                        let mut params = Map::new();
                        for (key, value) in rule {
                            if key != "rule_def_name" {
                                params.insert(key.clone(), value.clone());
                            }
                        }
                        results.push(LogicNode::Leaf {
                            rule: RuleConfig {
                                rule_def_name: rule_def_name.to_string(),
                                params,
                            },
                        });
                    }
                    "and" | "or" => {
                        reject_unknown(obj, &["node_type", "rules"], &path)?;
                        let rules = obj.get("rules").and_then(Value::as_array).ok_or_else(|| {
                            validation(&path, format!("'{node_type}' requires an array 'rules'"))
                        })?;
                        if rules.len() < 2 {
                            return Err(validation(
                                &path,
                                format!("'{node_type}' requires at least two children"),
                            ));
                        }
                        if node_type == "and" {
                            stack.push(Step::ExitAnd { count: rules.len() });
                        } else {
                            stack.push(Step::ExitOr { count: rules.len() });
                        }
                        for (index, child) in rules.iter().enumerate().rev() {
                            stack.push(Step::Enter {
                                value: child,
                                path: format!("{path}.rules[{index}]"),
                            });
                        }
                    }
                    "not" => {
                        reject_unknown(obj, &["node_type", "rule"], &path)?;
                        let child = obj
                            .get("rule")
                            .ok_or_else(|| validation(&path, "'not' requires a 'rule'"))?;
                        stack.push(Step::ExitNot);
                        stack.push(Step::Enter {
                            value: child,
                            path: format!("{path}.rule"),
                        });
                    }
                    "ref" => {
                        reject_unknown(obj, &["node_type", "ref_id"], &path)?;
                        let ref_id = obj.get("ref_id").and_then(Value::as_str).ok_or_else(|| {
                            validation(&path, "'ref' requires a string 'ref_id'")
                        })?;
                        results.push(LogicNode::Ref {
                            ref_id: ref_id.to_string(),
                        });
                    }
                    other => {
                        return Err(validation(&path, format!("unknown node_type '{other}'")));
                    }
                }
            }
            Step::ExitAnd { count } => {
                let children = results.split_off(results.len() - count);
                results.push(LogicNode::And { rules: children });
            }
            Step::ExitOr { count } => {
                let children = results.split_off(results.len() - count);
                results.push(LogicNode::Or { rules: children });
            }
            Step::ExitNot => {
                let child = results.pop().expect("not marker follows its operand");
                results.push(LogicNode::Not {
                    rule: Box::new(child),
                });
            }
        }
    }

    Ok(results.pop().expect("parsing leaves exactly one node"))
}

/// Enforce `and`/`or` arity on an in-memory tree (the JSON path enforces it
/// during parsing, the programmatic path here).
fn validate_arity(root: &LogicNode, root_path: &str) -> Result<(), ManifestError> {
    let mut stack = vec![(root, root_path.to_string())];
    while let Some((node, path)) = stack.pop() {
        match node {
            LogicNode::And { rules } | LogicNode::Or { rules } => {
                if rules.len() < 2 {
                    return Err(validation(&path, "'and'/'or' require at least two children"));
                }
                for (index, child) in rules.iter().enumerate() {
                    stack.push((child, format!("{path}.rules[{index}]")));
                }
            }
            LogicNode::Not { rule } => stack.push((rule, format!("{path}.rule"))),
            LogicNode::Leaf { .. } | LogicNode::Ref { .. } => {}
        }
    }
    Ok(())
}

/// Kahn's algorithm over the `rule_id -> ref_id` graph. Returns the ids on a
/// cycle, in reference order, or `None` when the graph is acyclic. Refs to
/// ids absent from the manifest cannot participate in a cycle.
fn detect_ring(rules: &BTreeMap<String, LogicNode>) -> Option<Vec<String>> {
    let graph: BTreeMap<&str, BTreeSet<String>> = rules
        .iter()
        .map(|(id, node)| (id.as_str(), node.dependencies()))
        .collect();

    let mut remaining: BTreeSet<&str> = graph.keys().copied().collect();
    loop {
        let ready: Vec<&str> = remaining
            .iter()
            .copied()
            .filter(|id| {
                graph
                    .get(id)
                    .map(|deps| deps.iter().all(|dep| !remaining.contains(dep.as_str())))
                    .unwrap_or(true)
            })
            .collect();
        if ready.is_empty() {
            break;
        }
        for id in ready {
            remaining.remove(id);
        }
    }

    if remaining.is_empty() {
        return None;
    }

    // Every leftover node keeps at least one leftover dependency, so walking
    // first-leftover-dependency edges must revisit a node; the path from that
    // first revisit onward is the ring.
    let mut path: Vec<&str> = Vec::new();
    let mut current = *remaining.iter().next()?;
    loop {
        if let Some(pos) = path.iter().position(|id| *id == current) {
            return Some(path[pos..].iter().map(|id| (*id).to_string()).collect());
        }
        path.push(current);
        current = graph
            .get(current)
            .and_then(|deps| deps.iter().map(String::as_str).find(|dep| remaining.contains(dep)))?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_dependencies_collects_all_refs() {
        let node = LogicNode::and(vec![
            LogicNode::reference("a"),
            LogicNode::not(LogicNode::or(vec![
                LogicNode::reference("b"),
                LogicNode::leaf(RuleConfig::new("is_active")),
            ])),
        ]);
        let deps = node.dependencies();
        assert_eq!(deps, BTreeSet::from(["a".to_string(), "b".to_string()]));
    }

    #[test]
    fn test_acyclic_graph_passes() {
        let manifest = RuleSetManifest::new(
            "users",
            [
                ("a".to_string(), LogicNode::reference("b")),
                ("b".to_string(), LogicNode::leaf(RuleConfig::new("is_active"))),
            ],
        );
        assert!(manifest.is_ok());
    }

    #[test]
    fn test_ref_to_absent_rule_is_not_a_cycle() {
        let manifest = RuleSetManifest::new(
            "users",
            [("a".to_string(), LogicNode::reference("ghost"))],
        );
        assert!(manifest.is_ok());
    }

    #[test]
    fn test_self_reference_is_a_ring_of_one() {
        let err = RuleSetManifest::new(
            "users",
            [("a".to_string(), LogicNode::reference("a"))],
        )
        .expect_err("self reference");
        match err {
            ManifestError::RuleDefRing { ring } => assert_eq!(ring, vec!["a".to_string()]),
            other => panic!("expected ring error, got {other}"),
        }
    }

    #[test]
    fn test_three_party_ring_is_reported_in_reference_order() {
        let err = RuleSetManifest::new(
            "users",
            [
                ("a".to_string(), LogicNode::reference("b")),
                ("b".to_string(), LogicNode::reference("c")),
                ("c".to_string(), LogicNode::reference("a")),
            ],
        )
        .expect_err("cycle");
        match err {
            ManifestError::RuleDefRing { ring } => {
                assert_eq!(ring.len(), 3);
                // Reference order: each entry points at the next, wrapping.
                for (i, id) in ring.iter().enumerate() {
                    let next = &ring[(i + 1) % ring.len()];
                    let expected = match id.as_str() {
                        "a" => "b",
                        "b" => "c",
                        _ => "a",
                    };
                    assert_eq!(next, expected);
                }
            }
            other => panic!("expected ring error, got {other}"),
        }
    }

    #[test]
    fn test_arity_enforced_for_programmatic_construction() {
        let err = RuleSetManifest::new(
            "users",
            [(
                "a".to_string(),
                LogicNode::and(vec![LogicNode::reference("b")]),
            )],
        )
        .expect_err("single child");
        assert!(matches!(err, ManifestError::Validation { .. }));
    }

    #[test]
    fn test_json_round_trip() {
        let manifest = RuleSetManifest::new(
            "users",
            [(
                "gate".to_string(),
                LogicNode::and(vec![
                    LogicNode::leaf(RuleConfig::new("is_adult").with_param("min_age", json!(21))),
                    LogicNode::not(LogicNode::reference("blocked")),
                ]),
            )],
        )
        .expect("valid manifest");
        let text = manifest.to_json().expect("serializable");
        let parsed = RuleSetManifest::from_json(&text).expect("round trip");
        assert_eq!(parsed, manifest);
    }

    #[test]
    fn test_unknown_field_rejected_at_node_level() {
        let err = RuleSetManifest::from_value(&json!({
            "registry": "users",
            "rules": {
                "a": {"node_type": "ref", "ref_id": "b", "extra": 1}
            }
        }))
        .expect_err("extra field");
        assert!(matches!(err, ManifestError::Validation { .. }));
    }
}
