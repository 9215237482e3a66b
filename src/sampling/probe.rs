//! Probe execution engine.
//!
//! The pH and EC components share one execute skeleton: open a sampling
//! window, raise the excitation supply and wait out its stabilization
//! delay, collect raw readings on a cadence, then close the window and
//! reduce the samples. This engine owns that skeleton plus the counters;
//! the owning component supplies the raw signal source and the
//! signal→physical conversion.
//!
//! ```text
//!  SLEEPING ──open──▶ SAMPLING ──window complete──▶ SLEEPING (repeat)
//!      │
//!      └── MOCK (pin 0): same pipeline, synthetic source
//! ```

use log::{debug, warn};
use serde_json::{json, Value};

use crate::component::action::ActionResult;
use crate::ports::OrchestratorPort;
use crate::sampling::stats;
use crate::sampling::window::SampleWindow;

/// Probe operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeMode {
    /// No sampling window active.
    Sleeping,
    /// Window open, collecting raw readings.
    Sampling,
    /// No physical pin configured (pin 0); synthetic source, same
    /// pipeline.
    Mock,
}

impl ProbeMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sleeping => "SLEEPING",
            Self::Sampling => "SAMPLING",
            Self::Mock => "MOCK",
        }
    }
}

pub struct ProbeEngine {
    window: SampleWindow,
    reading_interval_ms: u64,
    outlier_threshold: f32,
    excite_component_id: String,
    excite_stabilize_ms: u64,
    excite_on: bool,
    excite_on_ms: u64,
    last_reading_ms: u64,
    total_readings: u32,
    failed_readings: u32,
    outliers_removed: u32,
}

impl ProbeEngine {
    pub fn new(sample_size: usize, period_ms: u64, reading_interval_ms: u64) -> Self {
        Self {
            window: SampleWindow::new(sample_size, period_ms),
            reading_interval_ms,
            outlier_threshold: 2.0,
            excite_component_id: String::new(),
            excite_stabilize_ms: 500,
            excite_on: false,
            excite_on_ms: 0,
            last_reading_ms: 0,
            total_readings: 0,
            failed_readings: 0,
            outliers_removed: 0,
        }
    }

    // ── Configuration ─────────────────────────────────────────

    pub fn configure(
        &mut self,
        sample_size: usize,
        period_ms: u64,
        reading_interval_ms: u64,
        outlier_threshold: f32,
        excite_component_id: String,
        excite_stabilize_ms: u64,
    ) {
        self.window.set_capacity(sample_size);
        self.window.set_period_ms(period_ms);
        self.reading_interval_ms = reading_interval_ms;
        self.outlier_threshold = outlier_threshold;
        self.excite_component_id = excite_component_id;
        self.excite_stabilize_ms = excite_stabilize_ms;
    }

    pub fn sample_size(&self) -> usize {
        self.window.capacity()
    }

    pub fn period_ms(&self) -> u64 {
        self.window.period_ms()
    }

    pub fn reading_interval_ms(&self) -> u64 {
        self.reading_interval_ms
    }

    pub fn outlier_threshold(&self) -> f32 {
        self.outlier_threshold
    }

    pub fn excite_component_id(&self) -> &str {
        &self.excite_component_id
    }

    pub fn excite_stabilize_ms(&self) -> u64 {
        self.excite_stabilize_ms
    }

    // ── Window lifecycle ──────────────────────────────────────

    pub fn window_open(&self) -> bool {
        self.window.is_open()
    }

    pub fn window_complete(&self, now_ms: u64) -> bool {
        self.window.is_complete(now_ms)
    }

    /// Open a fresh window and raise the excitation supply.
    pub fn begin_window(&mut self, tag: &str, now_ms: u64, services: &mut dyn OrchestratorPort) {
        self.window.open(now_ms);
        debug!(
            "{tag}: sampling window open ({} ms, {} samples max)",
            self.window.period_ms(),
            self.window.capacity()
        );
        self.set_excitation(tag, true, services);
    }

    /// Readings are trusted only once the excitation supply has had its
    /// stabilization delay; without a configured supply this is always
    /// true.
    pub fn excitation_stable(&self, now_ms: u64) -> bool {
        if self.excite_component_id.is_empty() {
            return true;
        }
        self.excite_on && now_ms.saturating_sub(self.excite_on_ms) >= self.excite_stabilize_ms
    }

    /// Offer one raw reading at the configured cadence. `None` counts a
    /// failed reading. Returns `true` when a sample entered the buffer.
    pub fn offer_reading(&mut self, tag: &str, now_ms: u64, raw: Option<f32>) -> bool {
        if !self.window.is_open() || !self.excitation_stable(now_ms) {
            return false;
        }
        if now_ms.saturating_sub(self.last_reading_ms) < self.reading_interval_ms {
            return false;
        }

        match raw {
            Some(value) => {
                self.window.push(value);
                self.total_readings += 1;
                self.last_reading_ms = now_ms;
                debug!(
                    "{tag}: sample {}/{}: {value:.4} V",
                    self.window.len(),
                    self.window.capacity()
                );
                true
            }
            None => {
                self.failed_readings += 1;
                warn!("{tag}: raw signal read failed");
                false
            }
        }
    }

    /// Close the window, drop the excitation supply, strip outliers, and
    /// reduce to the final signal (mean of survivors). Zero for an empty
    /// window.
    pub fn finish_window(
        &mut self,
        tag: &str,
        now_ms: u64,
        services: &mut dyn OrchestratorPort,
    ) -> f32 {
        self.window.close();
        self.set_excitation(tag, false, services);

        let (kept, removed) = stats::strip_outliers(self.window.samples(), self.outlier_threshold);
        self.outliers_removed += removed as u32;
        if removed > 0 {
            debug!(
                "{tag}: removed {removed} outliers (threshold {:.1} sigma)",
                self.outlier_threshold
            );
        }
        debug!(
            "{tag}: window closed after {} ms, {} samples kept",
            now_ms.saturating_sub(self.window.started_ms()),
            kept.len()
        );
        stats::mean(&kept)
    }

    /// Self-pacing policy (see [`SampleWindow::next_execution_ms`]).
    pub fn next_execution_ms(&self, now_ms: u64) -> u64 {
        self.window.next_execution_ms(now_ms, self.reading_interval_ms)
    }

    // ── Counters & snapshots ──────────────────────────────────

    pub fn total_readings(&self) -> u32 {
        self.total_readings
    }

    pub fn failed_readings(&self) -> u32 {
        self.failed_readings
    }

    pub fn outliers_removed(&self) -> u32 {
        self.outliers_removed
    }

    pub fn sample_count(&self) -> usize {
        self.window.len()
    }

    pub fn samples_json(&self) -> Value {
        Value::Array(
            self.window
                .samples()
                .iter()
                .map(|v| json!(*v))
                .collect(),
        )
    }

    /// Window status fields merged into a probe's execution data.
    pub fn status_json(&self) -> Value {
        json!({
            "sampling_active": self.window.is_open(),
            "sampling_start_ms": self.window.started_ms(),
            "sampling_deadline_ms": self.window.deadline_ms(),
            "sampling_period_ms": self.window.period_ms(),
            "sample_size": self.window.capacity(),
            "buffer_wrapped": self.window.wrapped(),
            "total_readings": self.total_readings,
            "failed_readings": self.failed_readings,
            "outliers_removed": self.outliers_removed,
        })
    }

    // ── Internal ──────────────────────────────────────────────

    /// Drive the excitation supply through its `set_output` action. A
    /// missing or failing supply component is logged and sampling
    /// continues untrusted until stabilization is reported.
    fn set_excitation(&mut self, tag: &str, on: bool, services: &mut dyn OrchestratorPort) {
        if self.excite_component_id.is_empty() {
            return;
        }

        let result: ActionResult = services.call_action(
            &self.excite_component_id,
            "set_output",
            &json!({ "state": on }),
        );

        if result.success {
            self.excite_on = on;
            if on {
                self.excite_on_ms = services.now_ms();
                debug!("{tag}: excitation enabled");
            } else {
                debug!("{tag}: excitation disabled");
            }
        } else {
            warn!(
                "{tag}: excitation control via '{}' failed: {}",
                self.excite_component_id, result.message
            );
        }
    }
}
