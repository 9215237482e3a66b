//! Calibration & sampling engine.
//!
//! Hardware-agnostic algorithms shared by the analog probes:
//!
//! - [`stats`] — mean, sample standard deviation, z-score outlier
//!   stripping with a never-empty guarantee;
//! - [`window`] — the time-boxed circular sample buffer and its
//!   self-pacing policy;
//! - [`calibration`] — 3-point calibration tables, piecewise-linear
//!   interpolation/extrapolation, temperature compensation;
//! - [`probe`] — the per-probe execution engine tying the above to the
//!   excitation-voltage handshake and reading cadence.
//!
//! Nothing in here performs I/O; raw signals come in as numbers and the
//! excitation supply is reached through the action bus.

pub mod calibration;
pub mod probe;
pub mod stats;
pub mod window;

pub use calibration::{CalibrationPoint, CalibrationTable, UNCALIBRATED};
pub use probe::{ProbeEngine, ProbeMode};
pub use window::{SampleWindow, MAX_SAMPLES};
