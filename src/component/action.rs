//! Component action system.
//!
//! An action is a named, parameter-validated operation a component
//! exposes for synchronous invocation — by another component through the
//! orchestrator, or by an external API caller. Declared constraints are
//! enforced *before* the component handler runs; a validation failure
//! prevents invocation entirely.

use serde_json::{json, Value};

// ---------------------------------------------------------------------------
// Parameter descriptors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Integer,
    Float,
    String,
    Boolean,
    Array,
    Object,
}

impl ParamKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Integer => "integer",
            Self::Float => "float",
            Self::String => "string",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
        }
    }
}

/// One declared action parameter.
///
/// Numeric bounds are active only when `min != max`; the string length
/// bound only when `max_length > 0`.
#[derive(Debug, Clone)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamKind,
    pub required: bool,
    pub min: f64,
    pub max: f64,
    pub max_length: usize,
}

impl ParamSpec {
    pub fn float(name: &'static str, min: f64, max: f64) -> Self {
        Self {
            name,
            kind: ParamKind::Float,
            required: true,
            min,
            max,
            max_length: 0,
        }
    }

    pub fn integer(name: &'static str, min: f64, max: f64) -> Self {
        Self {
            name,
            kind: ParamKind::Integer,
            required: true,
            min,
            max,
            max_length: 0,
        }
    }

    pub fn boolean(name: &'static str) -> Self {
        Self {
            name,
            kind: ParamKind::Boolean,
            required: true,
            min: 0.0,
            max: 0.0,
            max_length: 0,
        }
    }

    pub fn string(name: &'static str, max_length: usize) -> Self {
        Self {
            name,
            kind: ParamKind::String,
            required: true,
            min: 0.0,
            max: 0.0,
            max_length,
        }
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }
}

// ---------------------------------------------------------------------------
// Action descriptor
// ---------------------------------------------------------------------------

/// A component action definition.
///
/// `timeout_ms` is declarative metadata for callers and monitoring; the
/// scheduler has no preemption primitive and never aborts a running
/// handler.
#[derive(Debug, Clone)]
pub struct ActionSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub timeout_ms: u32,
    pub requires_ready: bool,
    pub params: Vec<ParamSpec>,
}

impl ActionSpec {
    pub fn new(name: &'static str, description: &'static str) -> Self {
        Self {
            name,
            description,
            timeout_ms: 30_000,
            requires_ready: true,
            params: Vec::new(),
        }
    }

    pub fn timeout(mut self, timeout_ms: u32) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn any_state(mut self) -> Self {
        self.requires_ready = false;
        self
    }

    pub fn param(mut self, param: ParamSpec) -> Self {
        self.params.push(param);
        self
    }

    /// API-facing description of this action and its parameters.
    pub fn to_json(&self) -> Value {
        let params: Vec<Value> = self
            .params
            .iter()
            .map(|p| {
                json!({
                    "name": p.name,
                    "type": p.kind.as_str(),
                    "required": p.required,
                    "min": p.min,
                    "max": p.max,
                    "max_length": p.max_length,
                })
            })
            .collect();
        json!({
            "name": self.name,
            "description": self.description,
            "timeout_ms": self.timeout_ms,
            "requires_ready": self.requires_ready,
            "parameters": params,
        })
    }
}

// ---------------------------------------------------------------------------
// Action result
// ---------------------------------------------------------------------------

/// Outcome of one action invocation.
#[derive(Debug, Clone, Default)]
pub struct ActionResult {
    pub success: bool,
    pub message: String,
    pub data: Value,
    pub elapsed_ms: u32,
    pub action: String,
}

impl ActionResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            ..Self::default()
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            ..Self::default()
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }
}

// ---------------------------------------------------------------------------
// Parameter validation
// ---------------------------------------------------------------------------

/// Validate a parameter object against an action's declared constraints.
///
/// Checks, in order, for every declared parameter: required-and-present,
/// kind match, numeric bounds (when `min != max`), string length (when
/// `max_length > 0`). Undeclared extra parameters are ignored — the
/// handler only reads what it declared.
pub fn validate_params(spec: &ActionSpec, params: &Value) -> Result<(), String> {
    for param in &spec.params {
        let Some(value) = params.get(param.name) else {
            if param.required {
                return Err(format!("missing required parameter '{}'", param.name));
            }
            continue;
        };

        match param.kind {
            ParamKind::Integer => {
                if value.as_i64().is_none() && value.as_u64().is_none() {
                    return Err(format!("parameter '{}' must be an integer", param.name));
                }
            }
            ParamKind::Float => {
                if value.as_f64().is_none() {
                    return Err(format!("parameter '{}' must be a number", param.name));
                }
            }
            ParamKind::String => {
                if !value.is_string() {
                    return Err(format!("parameter '{}' must be a string", param.name));
                }
            }
            ParamKind::Boolean => {
                if !value.is_boolean() {
                    return Err(format!("parameter '{}' must be a boolean", param.name));
                }
            }
            ParamKind::Array => {
                if !value.is_array() {
                    return Err(format!("parameter '{}' must be an array", param.name));
                }
            }
            ParamKind::Object => {
                if !value.is_object() {
                    return Err(format!("parameter '{}' must be an object", param.name));
                }
            }
        }

        if (param.min - param.max).abs() > f64::EPSILON {
            if let Some(n) = value.as_f64() {
                if n < param.min || n > param.max {
                    return Err(format!(
                        "parameter '{}' out of range [{}, {}]",
                        param.name, param.min, param.max
                    ));
                }
            }
        }

        if param.max_length > 0 {
            if let Some(s) = value.as_str() {
                if s.len() > param.max_length {
                    return Err(format!(
                        "parameter '{}' exceeds max length {}",
                        param.name, param.max_length
                    ));
                }
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dose_spec() -> ActionSpec {
        ActionSpec::new("dose", "dispense a volume")
            .timeout(10_000)
            .param(ParamSpec::float("volume_ml", 0.1, 500.0))
            .param(ParamSpec::float("flow_rate", 0.1, 100.0).optional())
    }

    #[test]
    fn valid_params_pass() {
        let spec = dose_spec();
        assert!(validate_params(&spec, &json!({"volume_ml": 25.0})).is_ok());
        assert!(validate_params(&spec, &json!({"volume_ml": 25.0, "flow_rate": 40.0})).is_ok());
    }

    #[test]
    fn missing_required_param_fails() {
        let err = validate_params(&dose_spec(), &json!({})).unwrap_err();
        assert!(err.contains("volume_ml"));
    }

    #[test]
    fn optional_param_may_be_absent() {
        assert!(validate_params(&dose_spec(), &json!({"volume_ml": 1.0})).is_ok());
    }

    #[test]
    fn type_mismatch_fails() {
        let err = validate_params(&dose_spec(), &json!({"volume_ml": "lots"})).unwrap_err();
        assert!(err.contains("number"));
    }

    #[test]
    fn bounds_enforced_when_min_ne_max() {
        let err = validate_params(&dose_spec(), &json!({"volume_ml": 9000.0})).unwrap_err();
        assert!(err.contains("out of range"));
    }

    #[test]
    fn bounds_ignored_when_min_eq_max() {
        let spec = ActionSpec::new("set", "").param(ParamSpec::float("level", 0.0, 0.0));
        assert!(validate_params(&spec, &json!({"level": 1e9})).is_ok());
    }

    #[test]
    fn string_length_enforced() {
        let spec = ActionSpec::new("label", "").param(ParamSpec::string("name", 4));
        assert!(validate_params(&spec, &json!({"name": "abcd"})).is_ok());
        assert!(validate_params(&spec, &json!({"name": "abcde"})).is_err());
    }

    #[test]
    fn boolean_param_checked() {
        let spec = ActionSpec::new("set_output", "").param(ParamSpec::boolean("state"));
        assert!(validate_params(&spec, &json!({"state": true})).is_ok());
        assert!(validate_params(&spec, &json!({"state": 1})).is_err());
    }
}
