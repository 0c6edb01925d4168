//! Named registries of rule-definition producers.
//!
//! A *producer* binds rule parameters and returns a [`Predicate`]. Because
//! producers are invoked from declarative manifests, each [`RuleDef`]
//! declares its parameter signature explicitly ([`ParamSpec`]): name, type,
//! default. The schema generator and the manifest validator both consume the
//! declared specs, and [`RuleDef::produce`] resolves defaults before the
//! producer runs.
//!
//! ## Example
//!
//! ```rust,ignore
//! let manager = RegistryManager::new();
//! let registry = Registry::new("user_registry", &manager)?;
//!
//! registry.register(
//!     RuleDef::builder("is_adult")
//!         .desc("Age is at least the configured threshold")
//!         .param(ParamSpec::new("min_age", ParamType::Integer).with_default(json!(18)))
//!         .producer(|params| {
//!             let min_age = params.i64("min_age")?;
//!             Ok(predicate(move |user: &User| user.age >= min_age, "is_adult"))
//!         }),
//! )?;
//! ```

use crate::predicate::Predicate;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Registry and rule-definition errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// Two registries with the same name under one manager.
    #[error("registry '{0}' is already registered")]
    NameConflict(String),

    /// Two producers registered under the same name in one registry.
    #[error("rule def '{rule}' is already registered in '{registry}'")]
    RuleDefConflict { registry: String, rule: String },

    /// A manifest referenced an unknown registry.
    #[error("registry '{0}' not found")]
    RegistryNotFound(String),

    /// A manifest referenced an unknown rule definition.
    #[error("rule definition '{0}' not found")]
    RuleDefNotFound(String),

    /// A producer parameter was missing or had the wrong type.
    #[error("parameter '{param}': expected {expected}")]
    Param {
        param: String,
        expected: &'static str,
    },

    /// A producer failed for a rule-specific reason.
    #[error("producer failed: {0}")]
    Producer(String),
}

/// Declared type of a rule parameter, mirrored into the generated schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    Integer,
    Number,
    String,
    Boolean,
    Array,
    Object,
    /// No declared type; any JSON value is accepted.
    Any,
    /// Variadic positional parameters, collected as an array.
    VariadicList,
    /// Variadic keyword parameters, collected as an object.
    VariadicMap,
}

impl ParamType {
    /// JSON Schema `type` keyword for this parameter type, if it has one.
    pub const fn json_type(self) -> Option<&'static str> {
        match self {
            ParamType::Integer => Some("integer"),
            ParamType::Number => Some("number"),
            ParamType::String => Some("string"),
            ParamType::Boolean => Some("boolean"),
            ParamType::Array | ParamType::VariadicList => Some("array"),
            ParamType::Object | ParamType::VariadicMap => Some("object"),
            ParamType::Any => None,
        }
    }

    /// Whether `value` satisfies this type.
    pub fn matches(self, value: &Value) -> bool {
        match self {
            ParamType::Integer => value.is_i64() || value.is_u64(),
            ParamType::Number => value.is_number(),
            ParamType::String => value.is_string(),
            ParamType::Boolean => value.is_boolean(),
            ParamType::Array | ParamType::VariadicList => value.is_array(),
            ParamType::Object | ParamType::VariadicMap => value.is_object(),
            ParamType::Any => true,
        }
    }

    const fn is_variadic(self) -> bool {
        matches!(self, ParamType::VariadicList | ParamType::VariadicMap)
    }
}

/// Declared signature of one producer parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamSpec {
    name: String,
    ty: ParamType,
    desc: Option<String>,
    default: Option<Value>,
}

impl ParamSpec {
    pub fn new(name: impl Into<String>, ty: ParamType) -> Self {
        ParamSpec {
            name: name.into(),
            ty,
            desc: None,
            default: None,
        }
    }

    pub fn with_desc(mut self, desc: impl Into<String>) -> Self {
        self.desc = Some(desc.into());
        self
    }

    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ty(&self) -> ParamType {
        self.ty
    }

    pub fn desc(&self) -> Option<&str> {
        self.desc.as_deref()
    }

    pub fn default(&self) -> Option<&Value> {
        self.default.as_ref()
    }

    /// A parameter is required when it has no default and is not variadic
    /// (variadics default to empty).
    pub fn required(&self) -> bool {
        self.default.is_none() && !self.ty.is_variadic()
    }
}

/// Resolved parameter values handed to a producer: declared defaults
/// overlaid with the manifest-supplied fields.
#[derive(Debug, Clone, Default)]
pub struct Params {
    values: Map<String, Value>,
}

impl Params {
    pub(crate) fn new(values: Map<String, Value>) -> Self {
        Params { values }
    }

    /// Raw value, if present.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn i64(&self, name: &str) -> Result<i64, RegistryError> {
        self.get(name).and_then(Value::as_i64).ok_or_else(|| {
            RegistryError::Param {
                param: name.to_string(),
                expected: "integer",
            }
        })
    }

    pub fn f64(&self, name: &str) -> Result<f64, RegistryError> {
        self.get(name).and_then(Value::as_f64).ok_or_else(|| {
            RegistryError::Param {
                param: name.to_string(),
                expected: "number",
            }
        })
    }

    pub fn str(&self, name: &str) -> Result<&str, RegistryError> {
        self.get(name).and_then(Value::as_str).ok_or_else(|| {
            RegistryError::Param {
                param: name.to_string(),
                expected: "string",
            }
        })
    }

    pub fn bool(&self, name: &str) -> Result<bool, RegistryError> {
        self.get(name).and_then(Value::as_bool).ok_or_else(|| {
            RegistryError::Param {
                param: name.to_string(),
                expected: "boolean",
            }
        })
    }

    pub fn array(&self, name: &str) -> Result<&Vec<Value>, RegistryError> {
        self.get(name).and_then(Value::as_array).ok_or_else(|| {
            RegistryError::Param {
                param: name.to_string(),
                expected: "array",
            }
        })
    }

    pub fn object(&self, name: &str) -> Result<&Map<String, Value>, RegistryError> {
        self.get(name).and_then(Value::as_object).ok_or_else(|| {
            RegistryError::Param {
                param: name.to_string(),
                expected: "object",
            }
        })
    }
}

/// Producer callable: binds parameters, returns a predicate.
pub type ProducerFn<C> = Arc<dyn Fn(&Params) -> Result<Predicate<C>, RegistryError> + Send + Sync>;

/// A named rule definition: declared parameter signature plus the producer.
pub struct RuleDef<C> {
    name: String,
    desc: Option<String>,
    params: Vec<ParamSpec>,
    producer: ProducerFn<C>,
}

impl<C> RuleDef<C> {
    pub fn builder(name: impl Into<String>) -> RuleDefBuilder<C> {
        RuleDefBuilder {
            name: name.into(),
            desc: None,
            params: Vec::new(),
            _marker: std::marker::PhantomData,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn desc(&self) -> Option<&str> {
        self.desc.as_deref()
    }

    pub fn params(&self) -> &[ParamSpec] {
        &self.params
    }

    /// Invoke the producer with `supplied` overlaid on the declared defaults.
    pub fn produce(&self, supplied: &Map<String, Value>) -> Result<Predicate<C>, RegistryError> {
        let mut resolved = Map::new();
        for spec in &self.params {
            if let Some(default) = spec.default() {
                resolved.insert(spec.name().to_string(), default.clone());
            }
        }
        for (key, value) in supplied {
            resolved.insert(key.clone(), value.clone());
        }
        (self.producer)(&Params::new(resolved))
    }
}

impl<C> fmt::Debug for RuleDef<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuleDef")
            .field("name", &self.name)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

/// Builder for [`RuleDef`]. Finalised by [`RuleDefBuilder::producer`], so a
/// definition without a producer cannot be constructed.
pub struct RuleDefBuilder<C> {
    name: String,
    desc: Option<String>,
    params: Vec<ParamSpec>,
    _marker: std::marker::PhantomData<fn() -> C>,
}

impl<C> RuleDefBuilder<C> {
    pub fn desc(mut self, desc: impl Into<String>) -> Self {
        self.desc = Some(desc.into());
        self
    }

    pub fn param(mut self, spec: ParamSpec) -> Self {
        self.params.push(spec);
        self
    }

    pub fn producer<F>(self, producer: F) -> RuleDef<C>
    where
        F: Fn(&Params) -> Result<Predicate<C>, RegistryError> + Send + Sync + 'static,
    {
        RuleDef {
            name: self.name,
            desc: self.desc,
            params: self.params,
            producer: Arc::new(producer),
        }
    }
}

struct DefTable<C> {
    order: Vec<String>,
    defs: HashMap<String, Arc<RuleDef<C>>>,
}

impl<C> Default for DefTable<C> {
    fn default() -> Self {
        DefTable {
            order: Vec::new(),
            defs: HashMap::new(),
        }
    }
}

struct RegistryInner<C> {
    name: String,
    table: RwLock<DefTable<C>>,
}

/// A named, thread-safe collection of rule definitions.
///
/// Cloning a registry clones a shared handle; registration through any clone
/// is visible to all of them. Iteration order is insertion order.
pub struct Registry<C> {
    inner: Arc<RegistryInner<C>>,
}

impl<C> Clone for Registry<C> {
    fn clone(&self) -> Self {
        Registry {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<C> Registry<C> {
    /// Create a registry and add it to `manager`.
    pub fn new(name: impl Into<String>, manager: &RegistryManager<C>) -> Result<Self, RegistryError> {
        let registry = Registry {
            inner: Arc::new(RegistryInner {
                name: name.into(),
                table: RwLock::new(DefTable::default()),
            }),
        };
        manager.add(registry.clone())?;
        Ok(registry)
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Register a rule definition under its declared name.
    pub fn register(&self, def: RuleDef<C>) -> Result<(), RegistryError> {
        let mut table = self.inner.table.write();
        if table.defs.contains_key(def.name()) {
            return Err(RegistryError::RuleDefConflict {
                registry: self.inner.name.clone(),
                rule: def.name().to_string(),
            });
        }
        let name = def.name().to_string();
        table.order.push(name.clone());
        table.defs.insert(name.clone(), Arc::new(def));
        debug!(registry = %self.inner.name, rule_def = %name, "rule_def_registered");
        Ok(())
    }

    /// Look up a rule definition by name.
    pub fn get(&self, name: &str) -> Option<Arc<RuleDef<C>>> {
        self.inner.table.read().defs.get(name).cloned()
    }

    /// Registered names, in insertion order.
    pub fn names(&self) -> Vec<String> {
        self.inner.table.read().order.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.table.read().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<C> fmt::Debug for Registry<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("name", &self.inner.name)
            .field("rule_defs", &self.names())
            .finish()
    }
}

/// Indexes registries by name. Name collisions are refused.
pub struct RegistryManager<C> {
    registries: Arc<DashMap<String, Registry<C>>>,
}

impl<C> Clone for RegistryManager<C> {
    fn clone(&self) -> Self {
        RegistryManager {
            registries: Arc::clone(&self.registries),
        }
    }
}

impl<C> Default for RegistryManager<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> RegistryManager<C> {
    pub fn new() -> Self {
        RegistryManager {
            registries: Arc::new(DashMap::new()),
        }
    }

    /// Add a registry under its own name.
    pub fn add(&self, registry: Registry<C>) -> Result<(), RegistryError> {
        match self.registries.entry(registry.name().to_string()) {
            Entry::Occupied(_) => Err(RegistryError::NameConflict(registry.name().to_string())),
            Entry::Vacant(slot) => {
                slot.insert(registry);
                Ok(())
            }
        }
    }

    /// Look up a registry by name.
    pub fn get(&self, name: &str) -> Option<Registry<C>> {
        self.registries.get(name).map(|entry| entry.value().clone())
    }

    /// Names of all registries, in no particular order.
    pub fn names(&self) -> Vec<String> {
        self.registries.iter().map(|entry| entry.key().clone()).collect()
    }
}

impl<C> fmt::Debug for RegistryManager<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryManager")
            .field("registries", &self.names())
            .finish()
    }
}
