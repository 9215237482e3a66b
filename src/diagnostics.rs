//! Runtime resource diagnostics.
//!
//! The orchestrator's periodic system check samples memory headroom and
//! logs pressure conditions. This is advisory only — nothing here
//! remediates anything.
//!
//! On the host there is no MCU heap to inspect, so the snapshot
//! synthesizes realistic values (with a slow decay modelling
//! fragmentation) to keep the check's branches exercised in simulation
//! and under test.

use serde_json::{json, Value};

/// Free-heap floor below which the check reports pressure.
pub const LOW_HEAP_BYTES: u32 = 10_240;

#[derive(Debug, Clone, Copy)]
pub struct ResourceSnapshot {
    pub heap_free: u32,
    pub heap_min_free: u32,
    pub largest_free_block: u32,
}

impl ResourceSnapshot {
    /// Sample current memory headroom.
    pub fn collect(uptime_ms: u64) -> Self {
        // Synthetic host model: ~300 KB free, losing ~512 B/minute.
        let base_free: u32 = 307_200;
        let decay = (uptime_ms / 60_000) as u32 * 512;
        let heap_free = base_free.saturating_sub(decay);
        Self {
            heap_free,
            heap_min_free: (heap_free as f32 * 0.85) as u32,
            largest_free_block: (heap_free as f32 * 0.9) as u32,
        }
    }

    /// True when memory headroom looks healthy: enough free heap and no
    /// fragmentation signature (largest block below half the free
    /// total).
    pub fn is_healthy(&self) -> bool {
        self.heap_free >= LOW_HEAP_BYTES && self.largest_free_block >= self.heap_free / 2
    }

    pub fn to_json(&self) -> Value {
        json!({
            "heap_free": self.heap_free,
            "heap_min_free": self.heap_min_free,
            "largest_free_block": self.largest_free_block,
        })
    }
}
