//! RuleEngine lifecycle tests.
//!
//! Tests for:
//! - Manifest compilation (leaf / and / or / not / ref)
//! - Hot reload: atomic handle updates without re-fetching
//! - Lazy linking: tombstones that resolve on a later update
//! - Handle singleton identity
//! - Last-known-good retention and the opt-in purge

use rulekit::{
    predicate, Config, EvalError, LogicNode, ParamSpec, ParamType, Registry, RegistryManager,
    RuleConfig, RuleDef, RuleEngine, RuleSetManifest,
};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

// ============================================================================
// Test Helpers
// ============================================================================

#[derive(Debug, Clone)]
struct User {
    age: i64,
    active: bool,
    name: String,
}

fn adult_user() -> User {
    User {
        age: 25,
        active: true,
        name: "Alice".to_string(),
    }
}

fn minor_user() -> User {
    User {
        age: 16,
        active: false,
        name: "Bob".to_string(),
    }
}

fn user_registry(manager: &RegistryManager<User>) -> Registry<User> {
    let registry = Registry::new("user_registry", manager).expect("fresh manager");
    registry
        .register(
            RuleDef::builder("is_adult")
                .desc("Age is at least the configured threshold")
                .param(ParamSpec::new("min_age", ParamType::Integer).with_default(json!(18)))
                .producer(|params| {
                    let min_age = params.i64("min_age")?;
                    Ok(predicate(move |user: &User| user.age >= min_age, "is_adult"))
                }),
        )
        .expect("unique name");
    registry
        .register(
            RuleDef::builder("is_active")
                .producer(|_| Ok(predicate(|user: &User| user.active, "is_active"))),
        )
        .expect("unique name");
    registry
        .register(
            RuleDef::builder("is_named")
                .param(ParamSpec::new("name", ParamType::String))
                .producer(|params| {
                    let name = params.str("name")?.to_string();
                    Ok(predicate(move |user: &User| user.name == name, "is_named"))
                }),
        )
        .expect("unique name");
    registry
}

fn leaf(rule_def_name: &str) -> LogicNode {
    LogicNode::leaf(RuleConfig::new(rule_def_name))
}

fn leaf_with(rule_def_name: &str, param: &str, value: serde_json::Value) -> LogicNode {
    LogicNode::leaf(RuleConfig::new(rule_def_name).with_param(param, value))
}

fn manifest(rules: Vec<(&str, LogicNode)>) -> RuleSetManifest {
    RuleSetManifest::new(
        "user_registry",
        rules.into_iter().map(|(id, node)| (id.to_string(), node)),
    )
    .expect("valid manifest")
}

fn engine_with_rules(rules: Vec<(&str, LogicNode)>) -> RuleEngine<User> {
    let manager = RegistryManager::new();
    user_registry(&manager);
    let engine = RuleEngine::new(manager);
    engine
        .update_manifests(&[manifest(rules)])
        .expect("manifest compiles");
    engine
}

// ============================================================================
// Compilation
// ============================================================================

#[test]
fn test_compile_simple_leaf_node() {
    let engine = engine_with_rules(vec![("adult_check", leaf_with("is_adult", "min_age", json!(18)))]);
    let handle = engine.get_predicate_handle("user_registry", "adult_check");

    assert_eq!(handle.eval(&adult_user()), Ok(true));
    assert_eq!(handle.eval(&minor_user()), Ok(false));
}

#[test]
fn test_compile_leaf_with_default_parameter() {
    let engine = engine_with_rules(vec![("adult_check", leaf("is_adult"))]);
    let handle = engine.get_predicate_handle("user_registry", "adult_check");

    // min_age defaults to 18.
    assert_eq!(handle.eval(&adult_user()), Ok(true));
    assert_eq!(handle.eval(&minor_user()), Ok(false));
}

#[test]
fn test_basic_composition() {
    // S1: and[leaf(is_adult, min_age=21), leaf(is_active)]
    let engine = engine_with_rules(vec![(
        "gate",
        LogicNode::and(vec![
            leaf_with("is_adult", "min_age", json!(21)),
            leaf("is_active"),
        ]),
    )]);
    let handle = engine.get_predicate_handle("user_registry", "gate");

    assert_eq!(
        handle.eval(&User { age: 25, active: true, name: "Alice".to_string() }),
        Ok(true)
    );
    assert_eq!(
        handle.eval(&User { age: 20, active: true, name: "Alice".to_string() }),
        Ok(false)
    );
}

#[test]
fn test_or_and_not_composition() {
    let engine = engine_with_rules(vec![
        (
            "adult_or_active",
            LogicNode::or(vec![leaf("is_adult"), leaf("is_active")]),
        ),
        ("not_active", LogicNode::not(leaf("is_active"))),
    ]);

    let adult_or_active = engine.get_predicate_handle("user_registry", "adult_or_active");
    assert_eq!(adult_or_active.eval(&adult_user()), Ok(true));
    assert_eq!(adult_or_active.eval(&minor_user()), Ok(false));

    let not_active = engine.get_predicate_handle("user_registry", "not_active");
    assert_eq!(not_active.eval(&adult_user()), Ok(false));
    assert_eq!(not_active.eval(&minor_user()), Ok(true));
}

#[test]
fn test_nested_composition() {
    // (is_adult and is_active) or is_named("Bob")
    let engine = engine_with_rules(vec![(
        "gate",
        LogicNode::or(vec![
            LogicNode::and(vec![leaf("is_adult"), leaf("is_active")]),
            leaf_with("is_named", "name", json!("Bob")),
        ]),
    )]);
    let handle = engine.get_predicate_handle("user_registry", "gate");

    assert_eq!(handle.eval(&adult_user()), Ok(true));
    assert_eq!(handle.eval(&minor_user()), Ok(true)); // named Bob
    assert_eq!(
        handle.eval(&User { age: 16, active: false, name: "Carol".to_string() }),
        Ok(false)
    );
}

#[test]
fn test_static_ref_resolution() {
    let engine = engine_with_rules(vec![
        ("base", leaf("is_active")),
        ("alias", LogicNode::reference("base")),
    ]);
    let handle = engine.get_predicate_handle("user_registry", "alias");

    assert_eq!(handle.eval(&adult_user()), Ok(true));
    assert_eq!(handle.eval(&minor_user()), Ok(false));
}

#[test]
fn test_ref_of_ref_chain() {
    let engine = engine_with_rules(vec![
        ("a", LogicNode::reference("b")),
        ("b", LogicNode::reference("c")),
        ("c", leaf("is_active")),
    ]);
    let handle = engine.get_predicate_handle("user_registry", "a");

    assert_eq!(handle.eval(&adult_user()), Ok(true));
    assert_eq!(handle.eval(&minor_user()), Ok(false));
}

// ============================================================================
// Compilation Errors
// ============================================================================

#[test]
fn test_unknown_registry_is_refused() {
    let manager: RegistryManager<User> = RegistryManager::new();
    let engine = RuleEngine::new(manager);

    let m = RuleSetManifest::new(
        "ghost_registry",
        [("r".to_string(), LogicNode::reference("x"))],
    )
    .expect("structurally valid");
    let err = engine.update_manifests(&[m]).expect_err("no such registry");
    assert!(err.to_string().contains("ghost_registry"));
}

#[test]
fn test_unknown_rule_def_fails_without_partial_publish() {
    let manager = RegistryManager::new();
    user_registry(&manager);
    let engine = RuleEngine::new(manager);

    let m = manifest(vec![
        ("good", leaf("is_active")),
        ("bad", leaf("no_such_rule_def")),
    ]);
    let err = engine.update_manifests(&[m]).expect_err("unknown rule def");
    assert!(err.to_string().contains("no_such_rule_def"));

    // Nothing from the failed call was published.
    assert!(engine.rule_names("user_registry").is_empty());
    assert!(engine.manifest("user_registry").is_none());
}

// ============================================================================
// Hot Reload
// ============================================================================

#[test]
fn test_hot_reload_atomic_update() {
    // S2: load, get handle, reload, same handle reflects the new rule.
    let engine = engine_with_rules(vec![("active_check", leaf("is_active"))]);
    let handle_v1 = engine.get_predicate_handle("user_registry", "active_check");
    assert_eq!(handle_v1.eval(&adult_user()), Ok(true));

    engine
        .update_manifests(&[manifest(vec![(
            "active_check",
            leaf_with("is_adult", "min_age", json!(100)),
        )])])
        .expect("manifest compiles");

    let handle_v2 = engine.get_predicate_handle("user_registry", "active_check");
    assert!(handle_v1.ptr_eq(&handle_v2), "handle must be the same cell");
    assert_eq!(handle_v1.eval(&adult_user()), Ok(false));
    assert_eq!(handle_v2.eval(&adult_user()), Ok(false));
}

#[test]
fn test_hot_reload_only_changes_updated_rules() {
    let engine = engine_with_rules(vec![
        ("rule_a", leaf_with("is_adult", "min_age", json!(18))),
        ("rule_b", leaf("is_active")),
    ]);
    let handle_a = engine.get_predicate_handle("user_registry", "rule_a");
    let handle_b = engine.get_predicate_handle("user_registry", "rule_b");
    assert_eq!(handle_a.eval(&adult_user()), Ok(true));
    assert_eq!(handle_b.eval(&adult_user()), Ok(true));

    engine
        .update_manifests(&[manifest(vec![
            ("rule_a", leaf_with("is_adult", "min_age", json!(100))),
            ("rule_b", leaf("is_active")),
        ])])
        .expect("manifest compiles");

    assert_eq!(handle_a.eval(&adult_user()), Ok(false));
    assert_eq!(handle_b.eval(&adult_user()), Ok(true));
}

#[test]
fn test_hot_reload_reaches_through_refs() {
    let engine = engine_with_rules(vec![
        ("base", leaf("is_active")),
        ("alias", LogicNode::reference("base")),
    ]);
    let alias = engine.get_predicate_handle("user_registry", "alias");
    assert_eq!(alias.eval(&adult_user()), Ok(true));

    engine
        .update_manifests(&[manifest(vec![
            ("base", leaf_with("is_adult", "min_age", json!(100))),
            ("alias", LogicNode::reference("base")),
        ])])
        .expect("manifest compiles");

    // The alias resolves the base through its handle on every call.
    assert_eq!(alias.eval(&adult_user()), Ok(false));
}

#[test]
fn test_reapplying_a_manifest_is_a_behavioural_noop() {
    let engine = engine_with_rules(vec![("gate", leaf("is_active"))]);
    let handle = engine.get_predicate_handle("user_registry", "gate");
    assert_eq!(handle.eval(&adult_user()), Ok(true));

    engine
        .update_manifests(&[manifest(vec![("gate", leaf("is_active"))])])
        .expect("manifest compiles");

    let again = engine.get_predicate_handle("user_registry", "gate");
    assert!(handle.ptr_eq(&again));
    assert_eq!(handle.eval(&adult_user()), Ok(true));
    assert_eq!(handle.eval(&minor_user()), Ok(false));
}

// ============================================================================
// Tombstones and Lazy Linking
// ============================================================================

#[test]
fn test_missing_rule_yields_tombstone() {
    let manager = RegistryManager::new();
    user_registry(&manager);
    let engine = RuleEngine::new(manager);

    let handle = engine.get_predicate_handle("user_registry", "not_defined");
    let err = handle.eval(&adult_user()).expect_err("tombstoned");
    assert_eq!(
        err,
        EvalError::RuleRevoked {
            registry: "user_registry".to_string(),
            rule: "not_defined".to_string(),
        }
    );
}

#[test]
fn test_tombstone_resolves_after_update() {
    // S3: r_a refs r_b which does not exist yet.
    let engine = engine_with_rules(vec![("r_a", LogicNode::reference("r_b"))]);
    let handle_a = engine.get_predicate_handle("user_registry", "r_a");

    let err = handle_a.eval(&adult_user()).expect_err("target missing");
    assert_eq!(
        err,
        EvalError::RuleRevoked {
            registry: "user_registry".to_string(),
            rule: "r_b".to_string(),
        }
    );

    engine
        .update_manifests(&[manifest(vec![
            ("r_a", LogicNode::reference("r_b")),
            ("r_b", leaf("is_active")),
        ])])
        .expect("manifest compiles");

    // Same handle, now resolving through the freshly defined target.
    assert_eq!(handle_a.eval(&adult_user()), Ok(true));
    assert_eq!(handle_a.eval(&minor_user()), Ok(false));
}

#[test]
fn test_cycle_rejection_precedes_any_engine_change() {
    // S4: the ring is refused at manifest construction, before the engine
    // could observe anything.
    let manager = RegistryManager::new();
    user_registry(&manager);
    let engine = RuleEngine::new(manager);

    let err = RuleSetManifest::new(
        "user_registry",
        [
            ("a".to_string(), LogicNode::reference("b")),
            ("b".to_string(), LogicNode::reference("c")),
            ("c".to_string(), LogicNode::reference("a")),
        ],
    )
    .expect_err("ring");
    assert!(err.to_string().contains("cycle"));
    assert!(engine.rule_names("user_registry").is_empty());
}

// ============================================================================
// Retention and Purge
// ============================================================================

#[test]
fn test_rules_absent_from_new_manifest_are_retained() {
    let engine = engine_with_rules(vec![
        ("rule_a", leaf("is_active")),
        ("rule_b", leaf("is_adult")),
    ]);
    let handle_b = engine.get_predicate_handle("user_registry", "rule_b");

    engine
        .update_manifests(&[manifest(vec![("rule_a", leaf("is_active"))])])
        .expect("manifest compiles");

    // rule_b keeps its last-known-good predicate.
    assert_eq!(handle_b.eval(&adult_user()), Ok(true));
    assert_eq!(
        engine.rule_names("user_registry"),
        vec!["rule_a".to_string(), "rule_b".to_string()]
    );
}

#[test]
fn test_purge_stale_drops_retained_rules_and_tombstones_handles() {
    let engine = engine_with_rules(vec![
        ("rule_a", leaf("is_active")),
        ("rule_b", leaf("is_adult")),
    ]);
    let handle_b = engine.get_predicate_handle("user_registry", "rule_b");

    engine
        .update_manifests(&[manifest(vec![("rule_a", leaf("is_active"))])])
        .expect("manifest compiles");

    let purged = engine.purge_stale("user_registry");
    assert_eq!(purged, vec!["rule_b".to_string()]);
    assert_eq!(engine.rule_names("user_registry"), vec!["rule_a".to_string()]);

    let err = handle_b.eval(&adult_user()).expect_err("re-tombstoned");
    assert_eq!(err.kind(), rulekit::FailKind::RULE_REVOKED);

    // A later manifest revives the same handle.
    engine
        .update_manifests(&[manifest(vec![
            ("rule_a", leaf("is_active")),
            ("rule_b", leaf("is_adult")),
        ])])
        .expect("manifest compiles");
    assert_eq!(handle_b.eval(&adult_user()), Ok(true));
}

// ============================================================================
// Engine Accessors and Configuration
// ============================================================================

#[test]
fn test_manifest_accessor_returns_latest() {
    let engine = engine_with_rules(vec![("gate", leaf("is_active"))]);
    let first = engine.manifest("user_registry").expect("applied");
    assert!(first.rules().contains_key("gate"));

    engine
        .update_manifests(&[manifest(vec![("other", leaf("is_adult"))])])
        .expect("manifest compiles");
    let second = engine.manifest("user_registry").expect("applied");
    assert!(second.rules().contains_key("other"));
    assert!(!second.rules().contains_key("gate"));
}

#[test]
fn test_engine_defaults_come_from_config() {
    let manager = RegistryManager::new();
    let registry = Registry::new("user_registry", &manager).expect("fresh manager");

    let invocations = Arc::new(AtomicUsize::new(0));
    let probe = Arc::clone(&invocations);
    registry
        .register(RuleDef::builder("probe").producer(move |_| {
            let probe = Arc::clone(&probe);
            Ok(predicate(
                move |_: &User| {
                    probe.fetch_add(1, Ordering::SeqCst);
                    false
                },
                "probe",
            ))
        }))
        .expect("unique name");
    registry
        .register(
            RuleDef::builder("is_active")
                .producer(|_| Ok(predicate(|user: &User| user.active, "is_active"))),
        )
        .expect("unique name");

    let mut config = Config::default();
    config.engine.short_circuit = false;
    let engine = RuleEngine::with_config(manager, &config);
    engine
        .update_manifests(&[manifest(vec![(
            "gate",
            LogicNode::or(vec![leaf("is_active"), leaf("probe")]),
        )])])
        .expect("manifest compiles");

    let handle = engine.get_predicate_handle("user_registry", "gate");
    // Full evaluation reaches the probe even though is_active already won.
    assert_eq!(handle.eval(&adult_user()), Ok(true));
    assert_eq!(invocations.load(Ordering::SeqCst), 1);
}
