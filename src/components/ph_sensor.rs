//! pH probe component.
//!
//! Windowed analog sampling with z-score outlier rejection, 3-point
//! calibration (pH 4.0 / 7.0 / 10.0) and additive temperature
//! compensation. Pin 0 selects mock mode: a deterministic synthetic
//! signal runs through the exact same pipeline, so the full path is
//! exercised without hardware.
//!
//! Temperature for compensation comes from a configured climate
//! component via its `get_reading` action; absent that, 25 °C.

use log::info;
use serde_json::{json, Value};

use crate::component::action::{ActionResult, ActionSpec, ParamSpec};
use crate::component::schema::{self, ConfigSchema, PropertySpec};
use crate::component::{Component, ComponentCore, ComponentState, ExecutionResult};
use crate::error::Result;
use crate::ports::{AdcPort, OrchestratorPort};
use crate::sampling::calibration::{self, CalibrationTable, PointMatch, UNCALIBRATED};
use crate::sampling::{ProbeEngine, ProbeMode};

pub const KIND: &str = "PHSensor";

/// Neutral-point voltage the mock generator oscillates around.
const MOCK_BASE_VOLTS: f32 = 1.65;

pub struct PhSensorComponent {
    core: ComponentCore,
    adc: Box<dyn AdcPort>,

    // Persisted configuration
    gpio_pin: u8,
    temp_coefficient: f32,
    adc_voltage_ref: f32,
    adc_resolution: u16,
    temperature_source_id: String,
    config_version: u32,

    engine: ProbeEngine,
    calibration: CalibrationTable,

    // Live outputs
    mode: ProbeMode,
    current_volts: f32,
    current_temp: f32,
    current_ph: f32,
    min_recorded_ph: f32,
    max_recorded_ph: f32,
    mock_counter: u32,
}

impl PhSensorComponent {
    pub fn new(id: impl Into<String>, name: impl Into<String>, adc: Box<dyn AdcPort>) -> Self {
        Self {
            core: ComponentCore::new(id, KIND, name),
            adc,
            gpio_pin: 36,
            temp_coefficient: -0.0198,
            adc_voltage_ref: 3.3,
            adc_resolution: 4096,
            temperature_source_id: String::new(),
            config_version: 1,
            engine: ProbeEngine::new(10, 10_000, 1_000),
            calibration: CalibrationTable::new([4.0, 7.0, 10.0]),
            mode: ProbeMode::Sleeping,
            current_volts: 0.0,
            current_temp: 25.0,
            current_ph: UNCALIBRATED,
            min_recorded_ph: 14.0,
            max_recorded_ph: 0.0,
            mock_counter: 0,
        }
    }

    pub fn is_calibrated(&self) -> bool {
        self.calibration.is_calibrated()
    }

    pub fn current_ph(&self) -> f32 {
        self.current_ph
    }

    pub fn mode(&self) -> ProbeMode {
        self.mode
    }

    fn in_mock_mode(&self) -> bool {
        self.gpio_pin == 0
    }

    fn update_mode(&mut self) {
        self.mode = if self.in_mock_mode() {
            ProbeMode::Mock
        } else if self.engine.window_open() {
            ProbeMode::Sampling
        } else {
            ProbeMode::Sleeping
        };
    }

    /// One raw voltage reading; `None` on a failed ADC conversion.
    fn read_raw_voltage(&mut self) -> Option<f32> {
        if self.in_mock_mode() {
            self.mock_counter += 1;
            let n = self.mock_counter as f32;
            let noise = (n * 0.1).sin() * 0.05 + (self.mock_counter % 7) as f32 * 0.01;
            return Some(MOCK_BASE_VOLTS + noise);
        }

        let counts = self.adc.read_counts(self.gpio_pin)?;
        Some(f32::from(counts) * self.adc_voltage_ref / f32::from(self.adc_resolution))
    }

    /// Voltage → pH with temperature compensation, clamped to [0, 14].
    /// [`UNCALIBRATED`] below 2 valid calibration points.
    fn convert(&self, voltage: f32, temperature_c: f32) -> f32 {
        if self.mode == ProbeMode::Mock {
            // Synthetic conversion for hardware-less demos: ~10 pH units
            // per volt around the neutral point, no calibration needed.
            let ph = 7.0 - (voltage - MOCK_BASE_VOLTS) * 10.0;
            let ph = calibration::compensate_additive(ph, temperature_c, self.temp_coefficient);
            return ph.clamp(0.0, 14.0);
        }

        let Some(ph) = self.calibration.convert(voltage) else {
            return UNCALIBRATED;
        };
        let ph = calibration::compensate_additive(ph, temperature_c, self.temp_coefficient);
        ph.clamp(0.0, 14.0)
    }

    /// Temperature from the configured climate component, default 25 °C.
    fn temperature_reading(&self, services: &mut dyn OrchestratorPort) -> f32 {
        if self.temperature_source_id.is_empty() {
            return 25.0;
        }
        let result = services.call_action(&self.temperature_source_id, "get_reading", &json!({}));
        if !result.success {
            return 25.0;
        }
        result.data["temperature_c"].as_f64().map_or(25.0, |t| t as f32)
    }

    fn persist(&self, services: &mut dyn OrchestratorPort) {
        let _ = services.save_component_config(self.core.id(), &self.current_config());
    }

    fn log_calibration_status(&self) {
        for point in self.calibration.points().iter().filter(|p| p.valid) {
            info!(
                "{}: calibration point pH {:.1} = {:.3} V",
                self.core.tag(),
                point.reference,
                point.voltage
            );
        }
        info!(
            "{}: calibration {}/3 points valid, {}",
            self.core.tag(),
            self.calibration.valid_count(),
            if self.is_calibrated() { "usable" } else { "needs calibration" }
        );
    }
}

impl Component for PhSensorComponent {
    fn core(&self) -> &ComponentCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ComponentCore {
        &mut self.core
    }

    fn default_schema(&self) -> ConfigSchema {
        ConfigSchema::new(KIND, "pH probe with 3-point calibration and temperature compensation")
            .property(PropertySpec::integer("gpio_pin", 36, "ADC pin (0 = mock mode)").range(0.0, 39.0))
            .property(PropertySpec::float("temp_coefficient", -0.0198, "pH/degC compensation coefficient"))
            .property(PropertySpec::integer("sample_size", 10, "samples per window").range(1.0, 100.0))
            .property(PropertySpec::float("adc_voltage_ref", 3.3, "ADC reference voltage"))
            .property(PropertySpec::integer("adc_resolution", 4096, "ADC full-scale counts"))
            .property(PropertySpec::integer("reading_interval_ms", 1000, "cadence between raw readings"))
            .property(PropertySpec::integer("sampling_period_ms", 10_000, "sampling window duration"))
            .property(PropertySpec::float("outlier_threshold", 2.0, "z-score outlier threshold"))
            .property(PropertySpec::string("temperature_source_id", "", "climate component id for compensation"))
            .property(PropertySpec::string("excite_component_id", "", "excitation supply component id"))
            .property(PropertySpec::integer("excite_stabilize_ms", 500, "excitation settle time"))
            .property(PropertySpec::array(
                "calibration_points",
                CalibrationTable::new([4.0, 7.0, 10.0]).to_json("ph"),
                "pH 4/7/10 calibration pairs",
            ))
    }

    fn current_config(&self) -> Value {
        json!({
            "component_kind": KIND,
            "config_version": self.config_version,
            "gpio_pin": self.gpio_pin,
            "temp_coefficient": self.temp_coefficient,
            "sample_size": self.engine.sample_size(),
            "adc_voltage_ref": self.adc_voltage_ref,
            "adc_resolution": self.adc_resolution,
            "reading_interval_ms": self.engine.reading_interval_ms(),
            "sampling_period_ms": self.engine.period_ms(),
            "outlier_threshold": self.engine.outlier_threshold(),
            "temperature_source_id": self.temperature_source_id,
            "excite_component_id": self.engine.excite_component_id(),
            "excite_stabilize_ms": self.engine.excite_stabilize_ms(),
            "calibration_points": self.calibration.to_json("ph"),
        })
    }

    fn apply_config(&mut self, config: &Value) -> Result<()> {
        self.gpio_pin = schema::get_u8(config, "gpio_pin", self.gpio_pin);
        self.temp_coefficient = schema::get_f32(config, "temp_coefficient", self.temp_coefficient);
        self.adc_voltage_ref = schema::get_f32(config, "adc_voltage_ref", self.adc_voltage_ref);
        self.adc_resolution = schema::get_u16(config, "adc_resolution", self.adc_resolution);
        self.temperature_source_id =
            schema::get_string(config, "temperature_source_id", &self.temperature_source_id);
        self.config_version = schema::get_u32(config, "config_version", self.config_version);

        self.engine.configure(
            schema::get_u64(config, "sample_size", self.engine.sample_size() as u64) as usize,
            schema::get_u64(config, "sampling_period_ms", self.engine.period_ms()),
            schema::get_u64(config, "reading_interval_ms", self.engine.reading_interval_ms()),
            schema::get_f32(config, "outlier_threshold", self.engine.outlier_threshold()),
            schema::get_string(config, "excite_component_id", self.engine.excite_component_id()),
            schema::get_u64(config, "excite_stabilize_ms", self.engine.excite_stabilize_ms()),
        );

        if let Some(points) = config.get("calibration_points") {
            self.calibration.apply_json(points, "ph");
        }
        Ok(())
    }

    fn init_hardware(&mut self, now_ms: u64) -> Result<()> {
        self.update_mode();
        self.log_calibration_status();
        self.core
            .set_next_execution_ms(now_ms + self.engine.reading_interval_ms());
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
        let tag = self.core.tag().to_string();

        if !self.engine.window_open() {
            self.engine.begin_window(&tag, now, services);
        }
        self.update_mode();

        if self.engine.window_open() && !self.engine.window_complete(now) {
            let raw = self.read_raw_voltage();
            self.engine.offer_reading(&tag, now, raw);
        }

        if self.engine.window_open() && self.engine.window_complete(now) {
            let sample_count = self.engine.sample_count();
            self.current_volts = self.engine.finish_window(&tag, now, services);
            self.current_temp = self.temperature_reading(services);
            self.current_ph = self.convert(self.current_volts, self.current_temp);

            if self.current_ph >= 0.0 {
                self.min_recorded_ph = self.min_recorded_ph.min(self.current_ph);
                self.max_recorded_ph = self.max_recorded_ph.max(self.current_ph);
            }
            self.update_mode();

            info!(
                "{tag}: window complete, {sample_count} samples, pH = {:.2} ({:.4} V at {:.1} C)",
                self.current_ph, self.current_volts, self.current_temp
            );
        }

        let mut data = json!({
            "timestamp_ms": now,
            "gpio_pin": self.gpio_pin,
            "mode": self.mode.as_str(),
            "current_volts": self.current_volts,
            "current_temp": self.current_temp,
            "current_ph": self.current_ph,
            "is_calibrated": self.is_calibrated(),
            "calibration_points_valid": self.calibration.valid_count(),
            "min_recorded_ph": self.min_recorded_ph,
            "max_recorded_ph": self.max_recorded_ph,
            "last_readings": self.engine.samples_json(),
        });
        if let (Some(data_map), Some(status)) =
            (data.as_object_mut(), self.engine.status_json().as_object())
        {
            for (key, value) in status {
                data_map.insert(key.clone(), value.clone());
            }
        }

        self.core.set_next_execution_ms(self.engine.next_execution_ms(now));
        self.core.mark_executed(now);
        self.core.store_last_data(data.clone());
        self.core.set_state(ComponentState::Ready);

        ExecutionResult::ok(data, services.now_ms().saturating_sub(started_ms) as u32)
    }

    fn cleanup(&mut self) {
        info!("{}: cleanup", self.core.tag());
        self.mode = ProbeMode::Sleeping;
    }

    fn supported_actions(&self) -> Vec<ActionSpec> {
        vec![
            ActionSpec::new("calibrate", "Perform 3-point pH calibration")
                .param(ParamSpec::float("ph4_voltage", 0.0, 5.0))
                .param(ParamSpec::float("ph7_voltage", 0.0, 5.0))
                .param(ParamSpec::float("ph10_voltage", 0.0, 5.0)),
            ActionSpec::new("calibrate_point", "Calibrate a single pH point")
                .timeout(10_000)
                .param(ParamSpec::float("ph_value", 0.0, 14.0))
                .param(ParamSpec::float("voltage", 0.0, 5.0)),
            ActionSpec::new("clear_calibration", "Clear all calibration data").timeout(5_000),
        ]
    }

    fn perform_action(
        &mut self,
        action: &str,
        params: &Value,
        services: &mut dyn OrchestratorPort,
    ) -> ActionResult {
        match action {
            "calibrate" => {
                let now = services.now_ms();
                self.calibration.set_all(
                    [
                        (4.0, params["ph4_voltage"].as_f64().unwrap_or(0.0) as f32),
                        (7.0, params["ph7_voltage"].as_f64().unwrap_or(0.0) as f32),
                        (10.0, params["ph10_voltage"].as_f64().unwrap_or(0.0) as f32),
                    ],
                    now,
                );
                self.log_calibration_status();
                self.persist(services);
                ActionResult::ok("3-point calibration completed")
            }
            "calibrate_point" => {
                let ph_value = params["ph_value"].as_f64().unwrap_or(0.0) as f32;
                let voltage = params["voltage"].as_f64().unwrap_or(0.0) as f32;
                let now = services.now_ms();

                if self
                    .calibration
                    .update_nearest(ph_value, voltage, PointMatch::Absolute(1.0), now)
                {
                    info!(
                        "{}: calibration point updated: pH {ph_value:.1} = {voltage:.3} V",
                        self.core.tag()
                    );
                    self.persist(services);
                    ActionResult::ok(format!("calibration point updated for pH {ph_value:.1}"))
                } else {
                    ActionResult::failure(format!(
                        "no calibration point within 1.0 pH of {ph_value:.1}"
                    ))
                }
            }
            "clear_calibration" => {
                self.calibration.clear();
                self.persist(services);
                ActionResult::ok("calibration data cleared")
            }
            other => ActionResult::failure(format!("unknown action: {other}")),
        }
    }

    fn core_data(&self) -> Value {
        json!({
            "ph": self.current_ph,
            "temperature_c": self.current_temp,
            "voltage": self.current_volts,
            "calibrated": self.is_calibrated(),
            "timestamp_ms": self.core.last_execution_ms(),
        })
    }
}
