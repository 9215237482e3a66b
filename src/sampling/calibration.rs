//! Multi-point probe calibration.
//!
//! A probe carries exactly three canonical calibration points — (measured
//! voltage, known reference value) pairs with validity flags. Conversion
//! from a measured signal to a physical value interpolates piecewise-
//! linearly between the two valid points bracketing the signal and
//! extrapolates beyond the range with the nearest pair's slope.
//!
//! At least 2 valid points are required before a probe reports a usable
//! physical reading; below that, conversion short-circuits to the
//! explicit [`UNCALIBRATED`] sentinel — never a fabricated number.

use serde_json::{json, Value};

use crate::component::schema;

/// Sentinel reported while a probe has fewer than 2 valid points.
pub const UNCALIBRATED: f32 = -1.0;

/// One (voltage, reference) calibration pair.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationPoint {
    /// Known physical value of the calibration solution.
    pub reference: f32,
    /// Voltage measured in that solution.
    pub voltage: f32,
    pub valid: bool,
    pub timestamp_ms: u64,
}

impl CalibrationPoint {
    fn canonical(reference: f32) -> Self {
        Self {
            reference,
            voltage: 0.0,
            valid: false,
            timestamp_ms: 0,
        }
    }
}

/// Matching policy for single-point calibration updates.
#[derive(Debug, Clone, Copy)]
pub enum PointMatch {
    /// Nearest point within an absolute reference distance (pH probes:
    /// within 1.0 pH unit).
    Absolute(f32),
    /// Nearest point within a relative tolerance of its reference (EC
    /// probes: 50%); the zero-reference dry point always matches.
    Relative(f32),
}

/// Three-point calibration table.
#[derive(Debug, Clone)]
pub struct CalibrationTable {
    points: [CalibrationPoint; 3],
}

impl CalibrationTable {
    /// New table with canonical reference values and no valid points.
    pub fn new(references: [f32; 3]) -> Self {
        Self {
            points: references.map(CalibrationPoint::canonical),
        }
    }

    pub fn points(&self) -> &[CalibrationPoint; 3] {
        &self.points
    }

    pub fn valid_count(&self) -> usize {
        self.points.iter().filter(|p| p.valid).count()
    }

    /// Linear interpolation needs at least 2 valid points.
    pub fn is_calibrated(&self) -> bool {
        self.valid_count() >= 2
    }

    /// Set all three points at once (full calibration run). References
    /// may be overridden per point.
    pub fn set_all(&mut self, pairs: [(f32, f32); 3], now_ms: u64) {
        for (point, (reference, voltage)) in self.points.iter_mut().zip(pairs) {
            *point = CalibrationPoint {
                reference,
                voltage,
                valid: true,
                timestamp_ms: now_ms,
            };
        }
    }

    /// Single-point update: find the nearest canonical point by
    /// reference distance and update it if the match policy accepts.
    /// Returns `false` — with **no point mutated** — when nothing
    /// matches.
    pub fn update_nearest(
        &mut self,
        reference: f32,
        voltage: f32,
        policy: PointMatch,
        now_ms: u64,
    ) -> bool {
        let mut best: Option<(usize, f32)> = None;
        for (i, point) in self.points.iter().enumerate() {
            let diff = (reference - point.reference).abs();
            if best.is_none_or(|(_, d)| diff < d) {
                best = Some((i, diff));
            }
        }
        let Some((index, diff)) = best else {
            return false;
        };

        let accepted = match policy {
            PointMatch::Absolute(max_diff) => diff < max_diff,
            PointMatch::Relative(fraction) => {
                // The dry point (reference 0) is always re-calibratable.
                self.points[index].reference == 0.0
                    || diff <= self.points[index].reference * fraction
            }
        };
        if !accepted {
            return false;
        }

        self.points[index] = CalibrationPoint {
            reference,
            voltage,
            valid: true,
            timestamp_ms: now_ms,
        };
        true
    }

    /// Invalidate all points; canonical references are kept.
    pub fn clear(&mut self) {
        for point in &mut self.points {
            point.voltage = 0.0;
            point.valid = false;
            point.timestamp_ms = 0;
        }
    }

    /// Convert a measured voltage to a physical value.
    ///
    /// `None` below 2 valid points. Valid points are sorted by voltage;
    /// a signal between two points interpolates linearly, a signal
    /// outside the range extrapolates with the nearest pair's slope —
    /// except below a dry point (reference exactly 0), where the result
    /// clamps to 0 instead of extrapolating negative.
    pub fn convert(&self, voltage: f32) -> Option<f32> {
        let mut valid: Vec<(f32, f32)> = self
            .points
            .iter()
            .filter(|p| p.valid)
            .map(|p| (p.voltage, p.reference))
            .collect();
        if valid.len() < 2 {
            return None;
        }
        valid.sort_by(|a, b| a.0.total_cmp(&b.0));

        let first = valid[0];
        let last = valid[valid.len() - 1];

        if voltage <= first.0 {
            if first.1 == 0.0 {
                return Some(0.0); // dry point: clamp, don't extrapolate
            }
            let (lo, hi) = (valid[0], valid[1]);
            return Some(lo.1 + slope(lo, hi) * (voltage - lo.0));
        }

        if voltage >= last.0 {
            let (lo, hi) = (valid[valid.len() - 2], valid[valid.len() - 1]);
            return Some(hi.1 + slope(lo, hi) * (voltage - hi.0));
        }

        for pair in valid.windows(2) {
            let (lo, hi) = (pair[0], pair[1]);
            if voltage >= lo.0 && voltage <= hi.0 {
                return Some(lo.1 + slope(lo, hi) * (voltage - lo.0));
            }
        }

        None
    }

    // ── Config-blob boundary ──────────────────────────────────

    /// Serialize as a config array; `reference_key` names the physical
    /// unit field (`"ph"`, `"ec_us_cm"`).
    pub fn to_json(&self, reference_key: &str) -> Value {
        Value::Array(
            self.points
                .iter()
                .map(|p| {
                    let mut entry = serde_json::Map::new();
                    entry.insert(reference_key.to_string(), json!(p.reference));
                    entry.insert("voltage".to_string(), json!(p.voltage));
                    entry.insert("valid".to_string(), json!(p.valid));
                    entry.insert("timestamp_ms".to_string(), json!(p.timestamp_ms));
                    Value::Object(entry)
                })
                .collect(),
        )
    }

    /// Apply a stored config array with fallback-to-current semantics;
    /// absent or short arrays leave points untouched.
    pub fn apply_json(&mut self, config: &Value, reference_key: &str) {
        let Some(stored) = config.as_array() else {
            return;
        };
        for (point, entry) in self.points.iter_mut().zip(stored) {
            point.reference = schema::get_f32(entry, reference_key, point.reference);
            point.voltage = schema::get_f32(entry, "voltage", point.voltage);
            point.valid = schema::get_bool(entry, "valid", point.valid);
            point.timestamp_ms = schema::get_u64(entry, "timestamp_ms", point.timestamp_ms);
        }
    }
}

fn slope(lo: (f32, f32), hi: (f32, f32)) -> f32 {
    (hi.1 - lo.1) / (hi.0 - lo.0)
}

// ---------------------------------------------------------------------------
// Temperature compensation
// ---------------------------------------------------------------------------

/// Additive compensation: `value + coeff × (T − 25)`. Used by pH probes
/// (small negative coefficient).
pub fn compensate_additive(value: f32, temperature_c: f32, coefficient: f32) -> f32 {
    value + coefficient * (temperature_c - 25.0)
}

/// Ratiometric normalization to 25 °C: `value / (1 + coeff%/100 × (T − 25))`.
/// Used by EC probes (≈2%/°C).
pub fn compensate_ratiometric(value: f32, temperature_c: f32, coeff_percent_per_deg: f32) -> f32 {
    let factor = 1.0 + (coeff_percent_per_deg / 100.0) * (temperature_c - 25.0);
    if factor <= 0.0 {
        return value;
    }
    value / factor
}
