//! Capability invocation with argument normalization
//!
//! Decision processes hand over arguments in whatever shape they like: a
//! bare value, a `{"__arg1": ..}` wrapper, one named entry, or a full map.
//! Everything is normalized against the capability's [`InputShape`] before
//! dispatch. Invocation never fails outward; errors become observations.

use super::{Arguments, CapabilityCatalog, InputShape, ParamKind, ParamSpec};
use crate::error::AnalystError;
use crate::models::{InvocationRequest, InvocationResult};
use crate::Result;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Keys some decision processes use to wrap a single generic argument.
const GENERIC_KEYS: [&str; 2] = ["__arg1", "input"];

/// Argument payload as received, before binding to an input shape.
#[derive(Debug, Clone, PartialEq)]
pub enum RawArguments {
    /// Value carried under a reserved generic key, already unwrapped.
    Generic(Value),
    /// Exactly one value with no positional form.
    Single(Value),
    Named(Map<String, Value>),
    Empty,
}

impl RawArguments {
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Null => RawArguments::Empty,
            Value::Object(mut map) => {
                for key in GENERIC_KEYS {
                    if let Some(inner) = map.remove(key) {
                        return RawArguments::Generic(inner);
                    }
                }
                match map.len() {
                    0 => RawArguments::Empty,
                    1 => match map.into_iter().next() {
                        Some((_, v)) => RawArguments::Single(v),
                        None => RawArguments::Empty,
                    },
                    _ => RawArguments::Named(map),
                }
            }
            other => RawArguments::Single(other),
        }
    }

    /// Providers transmit arguments as a JSON-encoded string. Text that is
    /// not JSON is treated as a bare value.
    pub fn from_json_str(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.is_empty() {
            return RawArguments::Empty;
        }
        match serde_json::from_str::<Value>(raw) {
            Ok(value) => Self::from_value(value),
            Err(_) => RawArguments::Single(Value::String(raw.to_string())),
        }
    }

    /// Bind to `shape`, applying declared defaults.
    pub fn normalize(self, shape: &InputShape) -> Result<Arguments> {
        let mut values = Map::new();

        match self {
            RawArguments::Empty => {}
            RawArguments::Generic(value) | RawArguments::Single(value) => {
                if !value.is_null() {
                    let primary = shape.primary().ok_or_else(|| {
                        AnalystError::Capability("capability takes no arguments".to_string())
                    })?;
                    values.insert(primary.name.to_string(), coerce(primary, value)?);
                }
            }
            RawArguments::Named(map) => {
                for (key, value) in map {
                    let param = shape.get(&key).ok_or_else(|| {
                        AnalystError::Capability(format!("unexpected argument '{}'", key))
                    })?;
                    if !value.is_null() {
                        values.insert(key, coerce(param, value)?);
                    }
                }
            }
        }

        for param in shape.params() {
            if values.contains_key(param.name) {
                continue;
            }
            if let Some(default) = &param.default {
                values.insert(param.name.to_string(), default.clone());
            } else if param.required {
                return Err(AnalystError::Capability(format!(
                    "missing required argument '{}'",
                    param.name
                )));
            }
        }

        Ok(Arguments::new(values))
    }
}

/// Lenient scalar coercion: numeric strings for integers, numbers for strings.
fn coerce(param: &ParamSpec, value: Value) -> Result<Value> {
    let mismatch = |v: &Value| {
        AnalystError::Capability(format!(
            "argument '{}' expects {:?}, got {}",
            param.name, param.kind, v
        ))
    };

    match (param.kind, value) {
        (ParamKind::String, Value::String(s)) => Ok(Value::String(s)),
        (ParamKind::String, Value::Number(n)) => Ok(Value::String(n.to_string())),
        (ParamKind::Integer, Value::Number(n)) => n
            .as_i64()
            .map(Value::from)
            .ok_or_else(|| mismatch(&Value::Number(n))),
        (ParamKind::Integer, Value::String(s)) => s
            .trim()
            .parse::<i64>()
            .map(Value::from)
            .map_err(|_| mismatch(&Value::String(s))),
        (_, other) => Err(mismatch(&other)),
    }
}

/// Resolves and executes capabilities from a catalog.
#[derive(Clone)]
pub struct CapabilityInvoker {
    catalog: Arc<CapabilityCatalog>,
}

impl CapabilityInvoker {
    pub fn new(catalog: Arc<CapabilityCatalog>) -> Self {
        Self { catalog }
    }

    pub fn catalog(&self) -> &Arc<CapabilityCatalog> {
        &self.catalog
    }

    pub async fn invoke(&self, request: &InvocationRequest) -> InvocationResult {
        self.invoke_raw(
            &request.capability,
            RawArguments::from_value(request.arguments.clone()),
        )
        .await
    }

    /// Resolve, normalize and execute. Every failure is captured in the result.
    pub async fn invoke_raw(&self, name: &str, raw: RawArguments) -> InvocationResult {
        let start = Instant::now();

        let capability = match self.catalog.resolve(name) {
            Ok(c) => c,
            Err(_) => {
                warn!(capability = %name, "Unknown capability requested");
                return InvocationResult::failure(name, format!("unknown capability '{}'", name));
            }
        };

        let args = match raw.normalize(&capability.input_shape()) {
            Ok(args) => args,
            Err(e) => {
                warn!(capability = %name, error = %e, "Argument mismatch");
                return InvocationResult::failure(name, e.to_string());
            }
        };

        debug!(capability = %name, args = ?args.as_map(), "Invoking capability");

        match capability.execute(&args).await {
            Ok(output) => {
                info!(
                    capability = %name,
                    output_len = output.len(),
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Capability completed"
                );
                InvocationResult::success(name, output)
            }
            Err(e) => {
                warn!(
                    capability = %name,
                    error = %e,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Capability failed"
                );
                InvocationResult::failure(name, e.to_string())
            }
        }
    }
}
