//! Schema-driven configuration support.
//!
//! Every component declares a [`ConfigSchema`]: its property names, kinds,
//! bounds, and — crucially — a default for every property. Hydration
//! (see [`crate::component::Component::initialize`]) guarantees that a
//! live configuration never has a missing field: absence always resolves
//! to the schema default, so "required field" is not a failure mode
//! anywhere in the system.
//!
//! Internally components keep typed fields; the untyped JSON map only
//! exists at the storage/wire boundary, read back through the fallback
//! accessors at the bottom of this module.

use serde_json::{json, Map, Value};

// ---------------------------------------------------------------------------
// Property and schema descriptors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyKind {
    Integer,
    Float,
    String,
    Boolean,
    Array,
    Object,
}

impl PropertyKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Integer => "integer",
            Self::Float => "number",
            Self::String => "string",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
        }
    }
}

/// One configuration property: kind, optional numeric bounds, default.
#[derive(Debug, Clone)]
pub struct PropertySpec {
    pub name: &'static str,
    pub kind: PropertyKind,
    pub default: Value,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub description: &'static str,
}

impl PropertySpec {
    pub fn integer(name: &'static str, default: i64, description: &'static str) -> Self {
        Self {
            name,
            kind: PropertyKind::Integer,
            default: json!(default),
            min: None,
            max: None,
            description,
        }
    }

    pub fn float(name: &'static str, default: f64, description: &'static str) -> Self {
        Self {
            name,
            kind: PropertyKind::Float,
            default: json!(default),
            min: None,
            max: None,
            description,
        }
    }

    pub fn string(name: &'static str, default: &str, description: &'static str) -> Self {
        Self {
            name,
            kind: PropertyKind::String,
            default: json!(default),
            min: None,
            max: None,
            description,
        }
    }

    pub fn boolean(name: &'static str, default: bool, description: &'static str) -> Self {
        Self {
            name,
            kind: PropertyKind::Boolean,
            default: json!(default),
            min: None,
            max: None,
            description,
        }
    }

    pub fn array(name: &'static str, default: Value, description: &'static str) -> Self {
        Self {
            name,
            kind: PropertyKind::Array,
            default,
            min: None,
            max: None,
            description,
        }
    }

    /// Attach inclusive numeric bounds (advisory; exposed via the schema
    /// JSON for API consumers).
    pub fn range(mut self, min: f64, max: f64) -> Self {
        self.min = Some(min);
        self.max = Some(max);
        self
    }
}

/// A component type's full configuration schema.
#[derive(Debug, Clone)]
pub struct ConfigSchema {
    pub version: u32,
    pub kind: &'static str,
    pub description: &'static str,
    pub properties: Vec<PropertySpec>,
}

impl ConfigSchema {
    pub fn new(kind: &'static str, description: &'static str) -> Self {
        Self {
            version: 1,
            kind,
            description,
            properties: Vec::new(),
        }
    }

    pub fn property(mut self, prop: PropertySpec) -> Self {
        self.properties.push(prop);
        self
    }

    /// An empty schema signals a programming error in the component; it
    /// fails initialization.
    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    /// Extract the default value of every property into a flat config
    /// object — the baseline every hydration starts from.
    pub fn defaults(&self) -> Value {
        let mut map = Map::new();
        for prop in &self.properties {
            map.insert(prop.name.to_string(), prop.default.clone());
        }
        Value::Object(map)
    }

    /// Full schema document for API consumers.
    pub fn to_json(&self) -> Value {
        let mut properties = Map::new();
        for prop in &self.properties {
            let mut entry = Map::new();
            entry.insert("type".into(), json!(prop.kind.as_str()));
            entry.insert("default".into(), prop.default.clone());
            if let Some(min) = prop.min {
                entry.insert("minimum".into(), json!(min));
            }
            if let Some(max) = prop.max {
                entry.insert("maximum".into(), json!(max));
            }
            entry.insert("description".into(), json!(prop.description));
            properties.insert(prop.name.to_string(), Value::Object(entry));
        }
        json!({
            "version": self.version,
            "type": self.kind,
            "description": self.description,
            "properties": Value::Object(properties),
        })
    }
}

// ---------------------------------------------------------------------------
// Merge & field counting
// ---------------------------------------------------------------------------

/// Merge two flat config objects key-by-key, override wins.
///
/// Non-object inputs degrade gracefully: the other side is returned.
pub fn merge(defaults: &Value, overrides: &Value) -> Value {
    let Some(base) = defaults.as_object() else {
        return overrides.clone();
    };
    let mut merged = base.clone();
    if let Some(over) = overrides.as_object() {
        for (key, value) in over {
            merged.insert(key.clone(), value.clone());
        }
    }
    Value::Object(merged)
}

/// Number of top-level fields in a config object. Used by the
/// expand-and-resave reconciliation to detect schema growth.
pub fn field_count(config: &Value) -> usize {
    config.as_object().map_or(0, Map::len)
}

/// True when a config carries no usable override (null or empty object).
pub fn is_empty_config(config: &Value) -> bool {
    match config {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// Fallback accessors (the hydration read side)
//
// Every `apply_config` reads its fields through these: a missing or
// mistyped field falls back to the caller-supplied current value, never
// to an error.
// ---------------------------------------------------------------------------

pub fn get_f32(config: &Value, key: &str, current: f32) -> f32 {
    config.get(key).and_then(Value::as_f64).map_or(current, |v| v as f32)
}

pub fn get_u64(config: &Value, key: &str, current: u64) -> u64 {
    config.get(key).and_then(Value::as_u64).unwrap_or(current)
}

pub fn get_u32(config: &Value, key: &str, current: u32) -> u32 {
    config
        .get(key)
        .and_then(Value::as_u64)
        .map_or(current, |v| v as u32)
}

pub fn get_u16(config: &Value, key: &str, current: u16) -> u16 {
    config
        .get(key)
        .and_then(Value::as_u64)
        .map_or(current, |v| v as u16)
}

pub fn get_u8(config: &Value, key: &str, current: u8) -> u8 {
    config
        .get(key)
        .and_then(Value::as_u64)
        .map_or(current, |v| v as u8)
}

pub fn get_bool(config: &Value, key: &str, current: bool) -> bool {
    config.get(key).and_then(Value::as_bool).unwrap_or(current)
}

pub fn get_string(config: &Value, key: &str, current: &str) -> String {
    config
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or(current)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_schema() -> ConfigSchema {
        ConfigSchema::new("Sample", "test schema")
            .property(PropertySpec::integer("gpio_pin", 36, "ADC pin").range(0.0, 39.0))
            .property(PropertySpec::float("threshold", 2.0, "sigma threshold"))
            .property(PropertySpec::string("source_id", "", "upstream id"))
            .property(PropertySpec::boolean("enabled", true, "enable flag"))
    }

    #[test]
    fn defaults_cover_every_property() {
        let schema = sample_schema();
        let defaults = schema.defaults();
        assert_eq!(field_count(&defaults), schema.properties.len());
        assert_eq!(defaults["gpio_pin"], json!(36));
        assert_eq!(defaults["enabled"], json!(true));
    }

    #[test]
    fn merge_override_wins_key_by_key() {
        let schema = sample_schema();
        let merged = merge(&schema.defaults(), &json!({"gpio_pin": 0, "extra": 1}));
        assert_eq!(merged["gpio_pin"], json!(0));
        assert_eq!(merged["threshold"], json!(2.0));
        assert_eq!(merged["extra"], json!(1));
        assert_eq!(field_count(&merged), 5);
    }

    #[test]
    fn merge_with_empty_override_is_defaults() {
        let schema = sample_schema();
        let merged = merge(&schema.defaults(), &json!({}));
        assert_eq!(merged, schema.defaults());
    }

    #[test]
    fn empty_config_detection() {
        assert!(is_empty_config(&Value::Null));
        assert!(is_empty_config(&json!({})));
        assert!(!is_empty_config(&json!({"a": 1})));
    }

    #[test]
    fn fallback_accessors_keep_current_on_missing_or_mistyped() {
        let cfg = json!({"pin": "not a number", "rate": 4.5});
        assert_eq!(get_u8(&cfg, "pin", 26), 26);
        assert_eq!(get_u8(&cfg, "absent", 26), 26);
        assert_eq!(get_f32(&cfg, "rate", 1.0), 4.5);
        assert_eq!(get_string(&cfg, "absent", "fallback"), "fallback");
    }

    #[test]
    fn schema_json_carries_bounds() {
        let doc = sample_schema().to_json();
        assert_eq!(doc["properties"]["gpio_pin"]["minimum"], json!(0.0));
        assert_eq!(doc["properties"]["gpio_pin"]["maximum"], json!(39.0));
        assert_eq!(doc["properties"]["threshold"]["type"], json!("number"));
    }
}
