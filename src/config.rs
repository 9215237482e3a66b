//! System-level configuration.
//!
//! Orchestrator-scoped settings persisted as the single system blob in
//! the config store. Component settings live in their own per-id blobs;
//! nothing component-specific belongs here.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::component::schema;

/// Bounds accepted for the system-check cadence (1 s – 5 min).
pub const MIN_SYSTEM_CHECK_MS: u64 = 1_000;
pub const MAX_SYSTEM_CHECK_MS: u64 = 300_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemConfig {
    /// Cadence of the advisory health/resource check.
    pub system_check_interval_ms: u64,
    /// Registry capacity.
    pub max_components: usize,
    /// Whether the component execution loop is paused.
    pub loop_paused: bool,
    /// Default timeout handed to the remote fetch service.
    pub http_timeout_ms: u32,
    /// Blob format marker for future migrations.
    pub config_version: u32,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            system_check_interval_ms: 30_000,
            max_components: 10,
            loop_paused: false,
            http_timeout_ms: 5_000,
            config_version: 1,
        }
    }
}

impl SystemConfig {
    /// Hydrate from a stored blob with fallback-to-default semantics —
    /// a partial or older blob never fails, missing fields keep their
    /// defaults.
    pub fn from_value(config: &Value) -> Self {
        let d = Self::default();
        let mut loaded = Self {
            system_check_interval_ms: schema::get_u64(
                config,
                "system_check_interval_ms",
                d.system_check_interval_ms,
            ),
            max_components: schema::get_u64(config, "max_components", d.max_components as u64)
                as usize,
            loop_paused: schema::get_bool(config, "loop_paused", d.loop_paused),
            http_timeout_ms: schema::get_u32(config, "http_timeout_ms", d.http_timeout_ms),
            config_version: schema::get_u32(config, "config_version", d.config_version),
        };
        loaded.system_check_interval_ms = loaded
            .system_check_interval_ms
            .clamp(MIN_SYSTEM_CHECK_MS, MAX_SYSTEM_CHECK_MS);
        if loaded.max_components == 0 {
            loaded.max_components = d.max_components;
        }
        loaded
    }

    pub fn to_value(&self) -> Value {
        json!({
            "system_check_interval_ms": self.system_check_interval_ms,
            "max_components": self.max_components,
            "loop_paused": self.loop_paused,
            "http_timeout_ms": self.http_timeout_ms,
            "config_version": self.config_version,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_sane() {
        let c = SystemConfig::default();
        assert!(c.max_components > 0);
        assert!(c.system_check_interval_ms >= MIN_SYSTEM_CHECK_MS);
        assert!(c.system_check_interval_ms <= MAX_SYSTEM_CHECK_MS);
        assert!(c.http_timeout_ms > 0);
        assert!(!c.loop_paused);
    }

    #[test]
    fn serde_roundtrip() {
        let c = SystemConfig::default();
        let blob = serde_json::to_string(&c).unwrap();
        let c2: SystemConfig = serde_json::from_str(&blob).unwrap();
        assert_eq!(c.max_components, c2.max_components);
        assert_eq!(c.system_check_interval_ms, c2.system_check_interval_ms);
    }

    #[test]
    fn value_roundtrip() {
        let c = SystemConfig::default();
        let c2 = SystemConfig::from_value(&c.to_value());
        assert_eq!(c.max_components, c2.max_components);
        assert_eq!(c.loop_paused, c2.loop_paused);
    }

    #[test]
    fn partial_blob_keeps_defaults() {
        let c = SystemConfig::from_value(&json!({"max_components": 4}));
        assert_eq!(c.max_components, 4);
        assert_eq!(
            c.system_check_interval_ms,
            SystemConfig::default().system_check_interval_ms
        );
    }

    #[test]
    fn check_interval_clamped() {
        let low = SystemConfig::from_value(&json!({"system_check_interval_ms": 10}));
        assert_eq!(low.system_check_interval_ms, MIN_SYSTEM_CHECK_MS);
        let high = SystemConfig::from_value(&json!({"system_check_interval_ms": 9_000_000}));
        assert_eq!(high.system_check_interval_ms, MAX_SYSTEM_CHECK_MS);
    }

    #[test]
    fn zero_capacity_rejected() {
        let c = SystemConfig::from_value(&json!({"max_components": 0}));
        assert_eq!(c.max_components, SystemConfig::default().max_components);
    }
}
