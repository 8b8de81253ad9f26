//! Capability trait and catalog
//!
//! Capabilities are stateless fetch-and-format operations exposed to the
//! decision process. The catalog is ordered and frozen once built.

use crate::error::AnalystError;
use crate::models::{CapabilityInfo, Language};
use crate::Result;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

pub mod invoker;
pub use invoker::{CapabilityInvoker, RawArguments};

/// Names with this prefix are implementation-only and never shown to users.
pub const INTERNAL_PREFIX: &str = "_";

pub fn is_internal(name: &str) -> bool {
    name.starts_with(INTERNAL_PREFIX)
}

/// Trait for a single capability
#[async_trait::async_trait]
pub trait Capability: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    fn input_shape(&self) -> InputShape;
    async fn execute(&self, args: &Arguments) -> Result<String>;
}

//
// ================= Input Shape =================
//

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    String,
    Integer,
}

impl ParamKind {
    fn json_type(&self) -> &'static str {
        match self {
            ParamKind::String => "string",
            ParamKind::Integer => "integer",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamKind,
    pub description: &'static str,
    pub required: bool,
    /// Applied when an optional parameter is absent from the call.
    pub default: Option<Value>,
}

impl ParamSpec {
    pub fn required(name: &'static str, kind: ParamKind, description: &'static str) -> Self {
        Self {
            name,
            kind,
            description,
            required: true,
            default: None,
        }
    }

    pub fn optional(
        name: &'static str,
        kind: ParamKind,
        description: &'static str,
        default: Option<Value>,
    ) -> Self {
        Self {
            name,
            kind,
            description,
            required: false,
            default,
        }
    }
}

/// Ordered parameter list. The first parameter is the primary argument.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InputShape {
    params: Vec<ParamSpec>,
}

impl InputShape {
    pub fn new(params: Vec<ParamSpec>) -> Self {
        Self { params }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn params(&self) -> &[ParamSpec] {
        &self.params
    }

    pub fn primary(&self) -> Option<&ParamSpec> {
        self.params.first()
    }

    pub fn get(&self, name: &str) -> Option<&ParamSpec> {
        self.params.iter().find(|p| p.name == name)
    }

    /// JSON schema advertised to the decision process.
    pub fn to_json_schema(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();

        for param in &self.params {
            let mut prop = json!({
                "type": param.kind.json_type(),
                "description": param.description,
            });
            if let Some(default) = &param.default {
                prop["default"] = default.clone();
            }
            properties.insert(param.name.to_string(), prop);
            if param.required {
                required.push(Value::String(param.name.to_string()));
            }
        }

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }
}

//
// ================= Normalized Arguments =================
//

/// Arguments after normalization against an [`InputShape`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Arguments {
    values: Map<String, Value>,
}

impl Arguments {
    pub fn new(values: Map<String, Value>) -> Self {
        Self { values }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name).filter(|v| !v.is_null())
    }

    pub fn str(&self, name: &str) -> Result<&str> {
        self.get(name).and_then(Value::as_str).ok_or_else(|| {
            AnalystError::Capability(format!("missing string argument '{}'", name))
        })
    }

    pub fn opt_i64(&self, name: &str) -> Option<i64> {
        self.get(name).and_then(Value::as_i64)
    }

    /// Unknown or missing language falls back to the default.
    pub fn language(&self, name: &str) -> Language {
        match self.get(name).and_then(Value::as_str) {
            Some(lang) => crate::validators::validate_language(lang).unwrap_or_default(),
            None => Language::default(),
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.values
    }
}

//
// ================= Catalog =================
//

/// Ordered, immutable set of capabilities.
pub struct CapabilityCatalog {
    entries: Vec<Arc<dyn Capability>>,
    index: HashMap<String, usize>,
}

impl CapabilityCatalog {
    pub fn builder() -> CatalogBuilder {
        CatalogBuilder::default()
    }

    /// Capabilities in registration order.
    pub fn list(&self) -> &[Arc<dyn Capability>] {
        &self.entries
    }

    pub fn resolve(&self, name: &str) -> Result<Arc<dyn Capability>> {
        self.index
            .get(name)
            .map(|&i| Arc::clone(&self.entries[i]))
            .ok_or_else(|| AnalystError::NotFound(name.to_string()))
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.entries.iter().map(|c| c.name()).collect()
    }

    pub fn infos(&self) -> Vec<CapabilityInfo> {
        self.entries
            .iter()
            .map(|c| CapabilityInfo {
                name: c.name().to_string(),
                description: c.description().to_string(),
                parameters: c.input_shape().to_json_schema(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Default)]
pub struct CatalogBuilder {
    entries: Vec<Arc<dyn Capability>>,
}

impl CatalogBuilder {
    pub fn register(mut self, capability: Arc<dyn Capability>) -> Self {
        self.entries.push(capability);
        self
    }

    /// Fails on duplicate names.
    pub fn build(self) -> Result<CapabilityCatalog> {
        let mut index = HashMap::with_capacity(self.entries.len());
        for (i, capability) in self.entries.iter().enumerate() {
            if index.insert(capability.name().to_string(), i).is_some() {
                return Err(AnalystError::Config(format!(
                    "duplicate capability name: {}",
                    capability.name()
                )));
            }
        }

        Ok(CapabilityCatalog {
            entries: self.entries,
            index,
        })
    }
}
