//! Concrete components.
//!
//! Each type implements the [`crate::component::Component`] contract:
//! probes own a [`crate::sampling::ProbeEngine`] and a calibration
//! table, actuators own their relay/remote endpoints, and the light
//! orchestrator coordinates the others purely through the action bus.

pub mod climate;
pub mod ec_probe;
pub mod light_orchestrator;
pub mod light_sensor;
pub mod ph_sensor;
pub mod pump;
pub mod servo_dimmer;

pub use climate::ClimateComponent;
pub use ec_probe::EcProbeComponent;
pub use light_orchestrator::LightOrchestratorComponent;
pub use light_sensor::LightSensorComponent;
pub use ph_sensor::PhSensorComponent;
pub use pump::PeristalticPumpComponent;
pub use servo_dimmer::ServoDimmerComponent;
