//! Temperature/humidity component (DHT22-class sensor).
//!
//! The one-wire exchange lives behind [`ClimatePort`]; this component
//! owns cadence, offsets, failure counting, and the `get_reading` action
//! the probes use for temperature compensation. Pin 0 selects mock mode
//! with a slow synthetic drift around room conditions.

use log::info;
use serde_json::{json, Value};

use crate::component::action::{ActionResult, ActionSpec};
use crate::component::schema::{self, ConfigSchema, PropertySpec};
use crate::component::{Component, ComponentCore, ComponentState, ExecutionResult};
use crate::error::Result;
use crate::ports::{ClimatePort, OrchestratorPort};

pub const KIND: &str = "Climate";

pub struct ClimateComponent {
    core: ComponentCore,
    sensor: Box<dyn ClimatePort>,

    // Persisted configuration
    gpio_pin: u8,
    sampling_interval_ms: u64,
    temperature_offset_c: f32,
    humidity_offset_pct: f32,
    config_version: u32,

    // Live outputs
    temperature_c: f32,
    humidity_pct: f32,
    has_reading: bool,
    failed_readings: u32,
    mock_counter: u32,
}

impl ClimateComponent {
    pub fn new(id: impl Into<String>, name: impl Into<String>, sensor: Box<dyn ClimatePort>) -> Self {
        Self {
            core: ComponentCore::new(id, KIND, name),
            sensor,
            gpio_pin: 15,
            sampling_interval_ms: 5_000,
            temperature_offset_c: 0.0,
            humidity_offset_pct: 0.0,
            config_version: 1,
            temperature_c: 25.0,
            humidity_pct: 50.0,
            has_reading: false,
            failed_readings: 0,
            mock_counter: 0,
        }
    }

    pub fn temperature_c(&self) -> f32 {
        self.temperature_c
    }

    pub fn humidity_pct(&self) -> f32 {
        self.humidity_pct
    }

    fn in_mock_mode(&self) -> bool {
        self.gpio_pin == 0
    }

    fn read_sensor(&mut self) -> Option<(f32, f32)> {
        if self.in_mock_mode() {
            self.mock_counter += 1;
            let n = self.mock_counter as f32;
            let temperature = 24.0 + (n * 0.05).sin() * 1.5;
            let humidity = 55.0 + (n * 0.03).cos() * 8.0;
            return Some((temperature, humidity));
        }
        self.sensor.read(self.gpio_pin)
    }

    fn reading_json(&self) -> Value {
        json!({
            "temperature_c": self.temperature_c,
            "humidity_pct": self.humidity_pct,
            "valid": self.has_reading,
            "timestamp_ms": self.core.last_execution_ms(),
        })
    }
}

impl Component for ClimateComponent {
    fn core(&self) -> &ComponentCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ComponentCore {
        &mut self.core
    }

    fn default_schema(&self) -> ConfigSchema {
        ConfigSchema::new(KIND, "temperature/humidity sensor")
            .property(PropertySpec::integer("gpio_pin", 15, "data pin (0 = mock mode)").range(0.0, 39.0))
            .property(PropertySpec::integer("sampling_interval_ms", 5_000, "read cadence").range(2000.0, 3_600_000.0))
            .property(PropertySpec::float("temperature_offset_c", 0.0, "calibration offset"))
            .property(PropertySpec::float("humidity_offset_pct", 0.0, "calibration offset"))
    }

    fn current_config(&self) -> Value {
        json!({
            "component_kind": KIND,
            "config_version": self.config_version,
            "gpio_pin": self.gpio_pin,
            "sampling_interval_ms": self.sampling_interval_ms,
            "temperature_offset_c": self.temperature_offset_c,
            "humidity_offset_pct": self.humidity_offset_pct,
        })
    }

    fn apply_config(&mut self, config: &Value) -> Result<()> {
        self.gpio_pin = schema::get_u8(config, "gpio_pin", self.gpio_pin);
        self.sampling_interval_ms =
            schema::get_u64(config, "sampling_interval_ms", self.sampling_interval_ms);
        // The DHT22 cannot be polled faster than every 2 seconds.
        self.sampling_interval_ms = self.sampling_interval_ms.max(2_000);
        self.temperature_offset_c =
            schema::get_f32(config, "temperature_offset_c", self.temperature_offset_c);
        self.humidity_offset_pct =
            schema::get_f32(config, "humidity_offset_pct", self.humidity_offset_pct);
        self.config_version = schema::get_u32(config, "config_version", self.config_version);
        Ok(())
    }

    fn init_hardware(&mut self, now_ms: u64) -> Result<()> {
        self.core
            .set_next_execution_ms(now_ms + self.sampling_interval_ms);
        info!(
            "{}: initialized on GPIO {}{}",
            self.core.tag(),
            self.gpio_pin,
            if self.in_mock_mode() { " (mock)" } else { "" }
        );
        Ok(())
    }

    fn execute(&mut self, services: &mut dyn OrchestratorPort) -> ExecutionResult {
        let started_ms = services.now_ms();
        self.core.set_state(ComponentState::Executing);
        let now = services.now_ms();

        let success = match self.read_sensor() {
            Some((temperature, humidity)) => {
                self.temperature_c = temperature + self.temperature_offset_c;
                self.humidity_pct = (humidity + self.humidity_offset_pct).clamp(0.0, 100.0);
                self.has_reading = true;
                true
            }
            None => {
                self.failed_readings += 1;
                false
            }
        };

        let data = json!({
            "timestamp_ms": now,
            "gpio_pin": self.gpio_pin,
            "temperature_c": self.temperature_c,
            "humidity_pct": self.humidity_pct,
            "valid": self.has_reading,
            "failed_readings": self.failed_readings,
        });

        self.core.set_next_execution_ms(now + self.sampling_interval_ms);
        self.core.mark_executed(now);
        self.core.store_last_data(data.clone());

        if success {
            self.core.set_state(ComponentState::Ready);
            ExecutionResult::ok(data, services.now_ms().saturating_sub(started_ms) as u32)
        } else {
            // A missed exchange is routine for this sensor family; stay
            // READY and retry on the next cadence.
            self.core.set_state(ComponentState::Ready);
            ExecutionResult::failure(
                "sensor exchange failed",
                services.now_ms().saturating_sub(started_ms) as u32,
            )
        }
    }

    fn cleanup(&mut self) {
        info!("{}: cleanup", self.core.tag());
    }

    fn supported_actions(&self) -> Vec<ActionSpec> {
        vec![ActionSpec::new("get_reading", "Last temperature/humidity reading")
            .timeout(3_000)
            .any_state()]
    }

    fn perform_action(
        &mut self,
        action: &str,
        _params: &Value,
        _services: &mut dyn OrchestratorPort,
    ) -> ActionResult {
        match action {
            "get_reading" => ActionResult::ok("").with_data(self.reading_json()),
            other => ActionResult::failure(format!("unknown action: {other}")),
        }
    }

    fn core_data(&self) -> Value {
        self.reading_json()
    }
}
