//! Port traits — the hexagonal boundary between the scheduling/sampling
//! core and the outside world.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ Component / Orchestrator (domain)
//! ```
//!
//! Driven adapters (ADC readers, relays, the config filesystem, the HTTP
//! client) implement these traits. The domain core consumes them through
//! trait objects injected at construction, so the scheduling and
//! calibration logic never touches a transport directly and the whole
//! crate tests on the host with mock adapters.

use std::collections::HashMap;
use std::time::Instant;

use serde_json::Value;

use crate::component::action::ActionResult;
use crate::error::{HttpError, StorageError};

// ───────────────────────────────────────────────────────────────
// Clock port
// ───────────────────────────────────────────────────────────────

/// Monotonic millisecond clock.
///
/// Components never read the wall clock; every timestamp in the system is
/// milliseconds since boot from this port, which makes the scheduler and
/// the sampling windows fully deterministic under test.
pub trait Clock {
    fn now_ms(&self) -> u64;
}

/// Host clock backed by `std::time::Instant`.
pub struct MonotonicClock {
    start: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

// ───────────────────────────────────────────────────────────────
// Config store port (domain ↔ persistent configuration)
// ───────────────────────────────────────────────────────────────

/// Bound on a single stored blob. Mirrors the flash filesystem's
/// per-file budget; oversized configs are a bug, not a storage concern.
pub const MAX_BLOB_BYTES: usize = 8192;

/// Durable key/value store: one JSON blob per component id plus one
/// system-wide blob.
///
/// Single-writer by construction (one logical thread); no cross-key
/// atomicity is provided or required — each component's configuration is
/// an independent unit of storage.
pub trait ConfigStore {
    /// Persist a component's configuration blob, overwriting any
    /// previous one.
    fn save_component_config(&mut self, id: &str, config: &Value) -> Result<(), StorageError>;

    /// Load a component's configuration blob.
    fn load_component_config(&self, id: &str) -> Result<Value, StorageError>;

    /// Check for a stored blob without loading it.
    fn has_component_config(&self, id: &str) -> bool;

    /// Delete a component's blob. `Ok` even if it did not exist.
    fn delete_component_config(&mut self, id: &str) -> Result<(), StorageError>;

    /// Ids of all stored component configurations.
    fn list_component_configs(&self) -> Vec<String>;

    /// Persist the system-wide configuration blob.
    fn save_system_config(&mut self, config: &Value) -> Result<(), StorageError>;

    /// Load the system-wide configuration blob.
    fn load_system_config(&self) -> Result<Value, StorageError>;
}

/// In-memory [`ConfigStore`] used by the host simulation and tests.
///
/// Serializes through the same JSON-string boundary a filesystem adapter
/// would, so size bounds and corruption paths are exercised identically.
pub struct MemoryStore {
    components: HashMap<String, String>,
    system: Option<String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            components: HashMap::new(),
            system: None,
        }
    }

    fn encode(config: &Value) -> Result<String, StorageError> {
        let blob = serde_json::to_string(config).map_err(|_| StorageError::Corrupted)?;
        if blob.len() > MAX_BLOB_BYTES {
            return Err(StorageError::TooLarge);
        }
        Ok(blob)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigStore for MemoryStore {
    fn save_component_config(&mut self, id: &str, config: &Value) -> Result<(), StorageError> {
        let blob = Self::encode(config)?;
        self.components.insert(id.to_string(), blob);
        Ok(())
    }

    fn load_component_config(&self, id: &str) -> Result<Value, StorageError> {
        let blob = self.components.get(id).ok_or(StorageError::NotFound)?;
        serde_json::from_str(blob).map_err(|_| StorageError::Corrupted)
    }

    fn has_component_config(&self, id: &str) -> bool {
        self.components.contains_key(id)
    }

    fn delete_component_config(&mut self, id: &str) -> Result<(), StorageError> {
        self.components.remove(id);
        Ok(())
    }

    fn list_component_configs(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.components.keys().cloned().collect();
        ids.sort();
        ids
    }

    fn save_system_config(&mut self, config: &Value) -> Result<(), StorageError> {
        self.system = Some(Self::encode(config)?);
        Ok(())
    }

    fn load_system_config(&self) -> Result<Value, StorageError> {
        let blob = self.system.as_ref().ok_or(StorageError::NotFound)?;
        serde_json::from_str(blob).map_err(|_| StorageError::Corrupted)
    }
}

// ───────────────────────────────────────────────────────────────
// HTTP fetch port (domain → network)
// ───────────────────────────────────────────────────────────────

/// Blocking HTTP GET returning the response body.
///
/// The backoff policy lives in [`crate::http`], not here — adapters are
/// dumb transports.
pub trait HttpFetch {
    fn get(&mut self, url: &str, timeout_ms: u32) -> Result<String, HttpError>;
}

/// Adapter for builds without network access: every request fails with
/// [`HttpError::Connect`], which exercises the backoff/deferral paths.
pub struct NullHttp;

impl HttpFetch for NullHttp {
    fn get(&mut self, _url: &str, _timeout_ms: u32) -> Result<String, HttpError> {
        Err(HttpError::Connect)
    }
}

// ───────────────────────────────────────────────────────────────
// Sensor/actuator ports (domain ↔ hardware)
// ───────────────────────────────────────────────────────────────

/// Raw ADC counts for an analog probe pin.
///
/// Returns `None` on a failed conversion; the probe counts the failure
/// and keeps sampling.
pub trait AdcPort {
    fn read_counts(&mut self, pin: u8) -> Option<u16>;
}

/// Combined temperature/humidity reading (DHT22-class device). The
/// one-wire protocol itself lives in the adapter.
pub trait ClimatePort {
    /// `(temperature_c, humidity_pct)`, or `None` on a failed exchange.
    fn read(&mut self, pin: u8) -> Option<(f32, f32)>;
}

/// Ambient light level in lux (TSL2561-class device).
pub trait LuxPort {
    fn read_lux(&mut self) -> Option<f32>;
}

/// Single relay/GPIO output (pump motor, excitation supply).
pub trait RelayPort {
    /// Drive the output. Returns `false` if the write failed.
    fn set(&mut self, pin: u8, on: bool) -> bool;
}

// ───────────────────────────────────────────────────────────────
// Orchestrator port (component → orchestrator services)
// ───────────────────────────────────────────────────────────────

/// Services the orchestrator provides to a component while it executes
/// or handles an action.
///
/// This is the *only* channel for cross-component coordination: enabling
/// an excitation supply, triggering a pump dose, or fetching a
/// temperature reading all go through [`call_action`](Self::call_action),
/// the same synchronous dispatch path external API callers use. While a
/// component is being executed it is absent from the registry, so a
/// handler can never re-enter the execute path for its own id.
pub trait OrchestratorPort {
    /// Milliseconds since boot.
    fn now_ms(&self) -> u64;

    /// Invoke an action on another component by id.
    fn call_action(&mut self, component_id: &str, action: &str, params: &Value) -> ActionResult;

    /// Reschedule another component's next wake time. `false` if the id
    /// is unknown.
    fn reschedule(&mut self, component_id: &str, wake_at_ms: u64) -> bool;

    /// Fetch remote JSON through the orchestrator's backoff-aware HTTP
    /// service. See [`crate::http::RemoteFetcher::get_json`] for the
    /// result shape.
    fn fetch_remote(&mut self, url: &str, timeout_ms: u32) -> Value;

    /// Persist a component configuration blob (used by components that
    /// self-save after calibration or counter updates).
    fn save_component_config(&mut self, id: &str, config: &Value) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn memory_store_roundtrip() {
        let mut store = MemoryStore::new();
        let cfg = json!({"gpio_pin": 36, "sample_size": 10});
        store.save_component_config("ph-1", &cfg).unwrap();

        assert!(store.has_component_config("ph-1"));
        assert_eq!(store.load_component_config("ph-1").unwrap(), cfg);
        assert_eq!(store.list_component_configs(), vec!["ph-1".to_string()]);
    }

    #[test]
    fn memory_store_missing_blob() {
        let store = MemoryStore::new();
        assert_eq!(
            store.load_component_config("nope"),
            Err(StorageError::NotFound)
        );
        assert!(!store.has_component_config("nope"));
    }

    #[test]
    fn memory_store_rejects_oversized_blob() {
        let mut store = MemoryStore::new();
        let huge = json!({"blob": "x".repeat(MAX_BLOB_BYTES)});
        assert_eq!(
            store.save_component_config("big", &huge),
            Err(StorageError::TooLarge)
        );
        assert!(!store.has_component_config("big"));
    }

    #[test]
    fn memory_store_delete_is_idempotent() {
        let mut store = MemoryStore::new();
        store.save_component_config("ph-1", &json!({"a": 1})).unwrap();

        assert!(store.delete_component_config("ph-1").is_ok());
        assert!(!store.has_component_config("ph-1"));
        // Deleting a missing blob is still Ok.
        assert!(store.delete_component_config("ph-1").is_ok());
    }

    #[test]
    fn memory_store_system_blob_independent() {
        let mut store = MemoryStore::new();
        store.save_system_config(&json!({"max_components": 4})).unwrap();
        assert!(store.load_component_config("sys").is_err());
        assert_eq!(
            store.load_system_config().unwrap()["max_components"],
            json!(4)
        );
    }

    #[test]
    fn null_http_always_fails() {
        let mut http = NullHttp;
        assert_eq!(http.get("http://example/", 1000), Err(HttpError::Connect));
    }
}
