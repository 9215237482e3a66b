//! EC (electrical conductivity) probe component.
//!
//! Same windowed pipeline as the pH probe with the EC-specific pieces:
//! dry/low/high calibration (0 / 84 / 1413 µS/cm canonical solutions),
//! ratiometric temperature normalization to 25 °C, and a TDS (ppm)
//! derivation from the compensated EC value.
//!
//! Single-point recalibration matches the nearest canonical point within
//! a 50% relative tolerance; the dry point is always re-calibratable.

use log::info;
use serde_json::{json, Value};

use crate::component::action::{ActionResult, ActionSpec, ParamSpec};
use crate::component::schema::{self, ConfigSchema, PropertySpec};
use crate::component::{Component, ComponentCore, ComponentState, ExecutionResult};
use crate::error::Result;
use crate::ports::{AdcPort, OrchestratorPort};
use crate::sampling::calibration::{self, CalibrationTable, PointMatch, UNCALIBRATED};
use crate::sampling::{ProbeEngine, ProbeMode};

pub const KIND: &str = "ECProbe";

const DEFAULT_LOW_EC: f32 = 84.0;
const DEFAULT_HIGH_EC: f32 = 1413.0;

/// Mid-range voltage the mock generator oscillates around.
const MOCK_BASE_VOLTS: f32 = 1.2;

pub struct EcProbeComponent {
    core: ComponentCore,
    adc: Box<dyn AdcPort>,

    // Persisted configuration
    gpio_pin: u8,
    temp_coefficient: f32,
    adc_voltage_ref: f32,
    adc_resolution: u16,
    tds_conversion_factor: f32,
    temperature_source_id: String,
    config_version: u32,

    engine: ProbeEngine,
    calibration: CalibrationTable,

    // Live outputs
    mode: ProbeMode,
    current_volts: f32,
    current_temp: f32,
    current_ec: f32,
    current_tds: f32,
    min_recorded_ec: f32,
    max_recorded_ec: f32,
    mock_counter: u32,
}

impl EcProbeComponent {
    pub fn new(id: impl Into<String>, name: impl Into<String>, adc: Box<dyn AdcPort>) -> Self {
        Self {
            core: ComponentCore::new(id, KIND, name),
            adc,
            gpio_pin: 35,
            temp_coefficient: 2.0,
            adc_voltage_ref: 3.3,
            adc_resolution: 4096,
            tds_conversion_factor: 0.64,
            temperature_source_id: String::new(),
            config_version: 1,
            engine: ProbeEngine::new(15, 15_000, 800),
            calibration: CalibrationTable::new([0.0, DEFAULT_LOW_EC, DEFAULT_HIGH_EC]),
            mode: ProbeMode::Sleeping,
            current_volts: 0.0,
            current_temp: 25.0,
            current_ec: UNCALIBRATED,
            current_tds: UNCALIBRATED,
            min_recorded_ec: f32::MAX,
            max_recorded_ec: 0.0,
            mock_counter: 0,
        }
    }

    pub fn is_calibrated(&self) -> bool {
        self.calibration.is_calibrated()
    }

    pub fn current_ec(&self) -> f32 {
        self.current_ec
    }

    pub fn current_tds(&self) -> f32 {
        self.current_tds
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

    fn read_raw_voltage(&mut self) -> Option<f32> {
        if self.in_mock_mode() {
            self.mock_counter += 1;
            let n = self.mock_counter as f32;
            let noise = (n * 0.15).sin() * 0.08 + (self.mock_counter % 11) as f32 * 0.015;
            return Some(MOCK_BASE_VOLTS + noise);
        }

        let counts = self.adc.read_counts(self.gpio_pin)?;
        Some(f32::from(counts) * self.adc_voltage_ref / f32::from(self.adc_resolution))
    }

    /// Voltage → EC (µS/cm) normalized to 25 °C, never negative.
    /// [`UNCALIBRATED`] below 2 valid calibration points.
    fn convert(&self, voltage: f32, temperature_c: f32) -> f32 {
        if self.mode == ProbeMode::Mock {
            let ec = 400.0 + (voltage - MOCK_BASE_VOLTS) * 500.0;
            let ec = calibration::compensate_ratiometric(ec, temperature_c, self.temp_coefficient);
            return ec.clamp(0.0, 5000.0);
        }

        let Some(ec) = self.calibration.convert(voltage) else {
            return UNCALIBRATED;
        };
        let ec = calibration::compensate_ratiometric(ec, temperature_c, self.temp_coefficient);
        ec.max(0.0)
    }

    /// Compensated EC → total dissolved solids (ppm).
    fn ec_to_tds(&self, ec_us_cm: f32) -> f32 {
        if ec_us_cm < 0.0 {
            return UNCALIBRATED;
        }
        ec_us_cm * self.tds_conversion_factor
    }

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
        let labels = ["dry", "low", "high"];
        for (label, point) in labels.iter().zip(self.calibration.points()) {
            if point.valid {
                info!(
                    "{}: {label} calibration point {:.1} uS/cm = {:.3} V",
                    self.core.tag(),
                    point.reference,
                    point.voltage
                );
            }
        }
        info!(
            "{}: calibration {}/3 points valid, {}",
            self.core.tag(),
            self.calibration.valid_count(),
            if self.is_calibrated() { "usable" } else { "needs calibration" }
        );
    }
}

impl Component for EcProbeComponent {
    fn core(&self) -> &ComponentCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ComponentCore {
        &mut self.core
    }

    fn default_schema(&self) -> ConfigSchema {
        ConfigSchema::new(KIND, "conductivity probe with 3-point calibration and temperature normalization")
            .property(PropertySpec::integer("gpio_pin", 35, "ADC pin (0 = mock mode)").range(0.0, 39.0))
            .property(PropertySpec::float("temp_coefficient", 2.0, "percent per degC normalization coefficient"))
            .property(PropertySpec::integer("sample_size", 15, "samples per window").range(1.0, 100.0))
            .property(PropertySpec::float("adc_voltage_ref", 3.3, "ADC reference voltage"))
            .property(PropertySpec::integer("adc_resolution", 4096, "ADC full-scale counts"))
            .property(PropertySpec::integer("reading_interval_ms", 800, "cadence between raw readings"))
            .property(PropertySpec::integer("sampling_period_ms", 15_000, "sampling window duration"))
            .property(PropertySpec::float("outlier_threshold", 2.5, "z-score outlier threshold"))
            .property(PropertySpec::float("tds_conversion_factor", 0.64, "EC to TDS (ppm) factor"))
            .property(PropertySpec::string("temperature_source_id", "", "climate component id for normalization"))
            .property(PropertySpec::string("excite_component_id", "", "excitation supply component id"))
            .property(PropertySpec::integer("excite_stabilize_ms", 1000, "excitation settle time"))
            .property(PropertySpec::array(
                "calibration_points",
                CalibrationTable::new([0.0, DEFAULT_LOW_EC, DEFAULT_HIGH_EC]).to_json("ec_us_cm"),
                "dry/low/high calibration pairs",
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
            "tds_conversion_factor": self.tds_conversion_factor,
            "temperature_source_id": self.temperature_source_id,
            "excite_component_id": self.engine.excite_component_id(),
            "excite_stabilize_ms": self.engine.excite_stabilize_ms(),
            "calibration_points": self.calibration.to_json("ec_us_cm"),
        })
    }

    fn apply_config(&mut self, config: &Value) -> Result<()> {
        self.gpio_pin = schema::get_u8(config, "gpio_pin", self.gpio_pin);
        self.temp_coefficient = schema::get_f32(config, "temp_coefficient", self.temp_coefficient);
        self.adc_voltage_ref = schema::get_f32(config, "adc_voltage_ref", self.adc_voltage_ref);
        self.adc_resolution = schema::get_u16(config, "adc_resolution", self.adc_resolution);
        self.tds_conversion_factor =
            schema::get_f32(config, "tds_conversion_factor", self.tds_conversion_factor);
        if self.tds_conversion_factor <= 0.0 {
            self.tds_conversion_factor = 0.64;
        }
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
            self.calibration.apply_json(points, "ec_us_cm");
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
            self.current_ec = self.convert(self.current_volts, self.current_temp);
            self.current_tds = self.ec_to_tds(self.current_ec);

            if self.current_ec >= 0.0 {
                self.min_recorded_ec = self.min_recorded_ec.min(self.current_ec);
                self.max_recorded_ec = self.max_recorded_ec.max(self.current_ec);
            }
            self.update_mode();

            info!(
                "{tag}: window complete, {sample_count} samples, EC = {:.1} uS/cm, TDS = {:.1} ppm",
                self.current_ec, self.current_tds
            );
        }

        let min_recorded = if self.min_recorded_ec == f32::MAX {
            0.0
        } else {
            self.min_recorded_ec
        };
        let mut data = json!({
            "timestamp_ms": now,
            "gpio_pin": self.gpio_pin,
            "mode": self.mode.as_str(),
            "current_volts": self.current_volts,
            "current_temp": self.current_temp,
            "current_ec": self.current_ec,
            "current_tds": self.current_tds,
            "tds_conversion_factor": self.tds_conversion_factor,
            "is_calibrated": self.is_calibrated(),
            "calibration_points_valid": self.calibration.valid_count(),
            "min_recorded_ec": min_recorded,
            "max_recorded_ec": self.max_recorded_ec,
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
            ActionSpec::new("calibrate", "Perform 3-point EC calibration (dry, low, high)")
                .param(ParamSpec::float("dry_voltage", 0.0, 5.0))
                .param(ParamSpec::float("low_ec_voltage", 0.0, 5.0))
                .param(ParamSpec::float("high_ec_voltage", 0.0, 5.0))
                .param(ParamSpec::float("low_ec_value", 1.0, 10_000.0).optional())
                .param(ParamSpec::float("high_ec_value", 100.0, 50_000.0).optional()),
            ActionSpec::new("calibrate_point", "Calibrate a single EC point")
                .timeout(10_000)
                .param(ParamSpec::float("ec_value", 0.0, 50_000.0))
                .param(ParamSpec::float("voltage", 0.0, 5.0)),
            ActionSpec::new("clear_calibration", "Clear all EC calibration data").timeout(5_000),
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
                let low_value = params["low_ec_value"].as_f64().unwrap_or(f64::from(DEFAULT_LOW_EC)) as f32;
                let high_value =
                    params["high_ec_value"].as_f64().unwrap_or(f64::from(DEFAULT_HIGH_EC)) as f32;
                self.calibration.set_all(
                    [
                        (0.0, params["dry_voltage"].as_f64().unwrap_or(0.0) as f32),
                        (low_value, params["low_ec_voltage"].as_f64().unwrap_or(0.0) as f32),
                        (high_value, params["high_ec_voltage"].as_f64().unwrap_or(0.0) as f32),
                    ],
                    now,
                );
                self.log_calibration_status();
                self.persist(services);
                ActionResult::ok("3-point EC calibration completed")
            }
            "calibrate_point" => {
                let ec_value = params["ec_value"].as_f64().unwrap_or(0.0) as f32;
                let voltage = params["voltage"].as_f64().unwrap_or(0.0) as f32;
                let now = services.now_ms();

                if self
                    .calibration
                    .update_nearest(ec_value, voltage, PointMatch::Relative(0.5), now)
                {
                    info!(
                        "{}: calibration point updated: {ec_value:.1} uS/cm = {voltage:.3} V",
                        self.core.tag()
                    );
                    self.persist(services);
                    ActionResult::ok(format!(
                        "calibration point updated for {ec_value:.1} uS/cm"
                    ))
                } else {
                    ActionResult::failure(format!(
                        "no calibration point within tolerance of {ec_value:.1} uS/cm"
                    ))
                }
            }
            "clear_calibration" => {
                self.calibration.clear();
                self.persist(services);
                ActionResult::ok("EC calibration data cleared")
            }
            other => ActionResult::failure(format!("unknown action: {other}")),
        }
    }

    fn core_data(&self) -> Value {
        json!({
            "ec_us_cm": self.current_ec,
            "tds_ppm": self.current_tds,
            "temperature_c": self.current_temp,
            "voltage": self.current_volts,
            "calibrated": self.is_calibrated(),
            "timestamp_ms": self.core.last_execution_ms(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::MemoryStore;
    use std::cell::Cell;
    use std::rc::Rc;

    struct FixedAdc(u16);

    impl AdcPort for FixedAdc {
        fn read_counts(&mut self, _pin: u8) -> Option<u16> {
            Some(self.0)
        }
    }

    struct ProbeBus {
        now: Rc<Cell<u64>>,
        temperature_c: Option<f32>,
        saves: u32,
    }

    impl ProbeBus {
        fn new() -> Self {
            Self {
                now: Rc::new(Cell::new(0)),
                temperature_c: None,
                saves: 0,
            }
        }
    }

    impl OrchestratorPort for ProbeBus {
        fn now_ms(&self) -> u64 {
            self.now.get()
        }

        fn call_action(&mut self, _id: &str, action: &str, _params: &Value) -> ActionResult {
            if action == "get_reading" {
                if let Some(t) = self.temperature_c {
                    return ActionResult::ok("").with_data(json!({"temperature_c": t}));
                }
            }
            ActionResult::failure("component not found")
        }

        fn reschedule(&mut self, _id: &str, _wake_at_ms: u64) -> bool {
            false
        }

        fn fetch_remote(&mut self, _url: &str, _timeout_ms: u32) -> Value {
            Value::Null
        }

        fn save_component_config(&mut self, _id: &str, _config: &Value) -> bool {
            self.saves += 1;
            true
        }
    }

    fn run_one_window(probe: &mut EcProbeComponent, bus: &mut ProbeBus) {
        let deadline = bus.now.get() + probe.engine.period_ms() + 5_000;
        while bus.now.get() < deadline {
            probe.execute(bus);
            if !probe.engine.window_open() {
                return;
            }
            bus.now.set(bus.now.get() + probe.engine.reading_interval_ms());
        }
        panic!("window never completed");
    }

    fn calibrated_probe(adc: Box<dyn AdcPort>) -> EcProbeComponent {
        let mut probe = EcProbeComponent::new("ec-1", "EC Probe", adc);
        let mut store = MemoryStore::new();
        probe
            .initialize(
                &json!({"gpio_pin": 34, "reading_interval_ms": 100, "sampling_period_ms": 1000, "sample_size": 5}),
                &mut store,
                0,
            )
            .unwrap();
        // 0.2 V dry, 0.5 V in 84 uS/cm, 2.2 V in 1413 uS/cm.
        probe
            .calibration
            .set_all([(0.0, 0.2), (84.0, 0.5), (1413.0, 2.2)], 0);
        probe
    }

    #[test]
    fn low_solution_voltage_reads_reference_value() {
        // 0.5 V = 620.6 counts; use 621 and accept small ADC rounding.
        let mut probe = calibrated_probe(Box::new(FixedAdc(621)));
        let mut bus = ProbeBus::new();

        run_one_window(&mut probe, &mut bus);
        assert!((probe.current_ec() - 84.0).abs() < 2.0);
        assert!((probe.current_tds() - probe.current_ec() * 0.64).abs() < 0.01);
    }

    #[test]
    fn uncalibrated_probe_reports_sentinels() {
        let mut probe = EcProbeComponent::new("ec-1", "EC Probe", Box::new(FixedAdc(1000)));
        let mut store = MemoryStore::new();
        probe
            .initialize(
                &json!({"gpio_pin": 34, "reading_interval_ms": 100, "sampling_period_ms": 1000, "sample_size": 5}),
                &mut store,
                0,
            )
            .unwrap();

        let mut bus = ProbeBus::new();
        run_one_window(&mut probe, &mut bus);
        assert_eq!(probe.current_ec(), UNCALIBRATED);
        assert_eq!(probe.current_tds(), UNCALIBRATED);
    }

    #[test]
    fn ratiometric_normalization_from_temperature_source() {
        let mut probe = calibrated_probe(Box::new(FixedAdc(621)));
        probe.temperature_source_id = "climate-1".to_string();

        let mut bus = ProbeBus::new();
        bus.temperature_c = Some(30.0);
        run_one_window(&mut probe, &mut bus);

        // Normalized down by 1 + 2%/°C × 5 °C = 1.1.
        assert!((probe.current_ec() - 84.0 / 1.1).abs() < 2.0);
    }

    #[test]
    fn dry_voltage_reads_zero() {
        let mut probe = calibrated_probe(Box::new(FixedAdc(124))); // ~0.1 V
        let mut bus = ProbeBus::new();
        run_one_window(&mut probe, &mut bus);
        assert_eq!(probe.current_ec(), 0.0);
        assert_eq!(probe.current_tds(), 0.0);
    }

    #[test]
    fn calibrate_point_far_from_all_references_rejected() {
        let mut probe = calibrated_probe(Box::new(FixedAdc(621)));
        let before = *probe.calibration.points();
        let mut bus = ProbeBus::new();

        // 5000 uS/cm is >50% from 1413 and not the dry point.
        let result = probe.execute_action(
            "calibrate_point",
            &json!({"ec_value": 5000.0, "voltage": 2.9}),
            &mut bus,
        );
        assert!(!result.success);
        assert_eq!(*probe.calibration.points(), before);
        assert_eq!(bus.saves, 0);
    }

    #[test]
    fn calibrate_point_within_tolerance_accepted() {
        let mut probe = calibrated_probe(Box::new(FixedAdc(621)));
        let mut bus = ProbeBus::new();

        let result = probe.execute_action(
            "calibrate_point",
            &json!({"ec_value": 1500.0, "voltage": 2.3}),
            &mut bus,
        );
        assert!(result.success);
        assert_eq!(probe.calibration.points()[2].reference, 1500.0);
        assert_eq!(bus.saves, 1);
    }

    #[test]
    fn calibrate_accepts_reference_overrides() {
        let mut probe = calibrated_probe(Box::new(FixedAdc(621)));
        let mut bus = ProbeBus::new();

        let result = probe.execute_action(
            "calibrate",
            &json!({
                "dry_voltage": 0.15,
                "low_ec_voltage": 0.6,
                "high_ec_voltage": 2.4,
                "low_ec_value": 100.0,
                "high_ec_value": 2000.0,
            }),
            &mut bus,
        );
        assert!(result.success);
        assert_eq!(probe.calibration.points()[1].reference, 100.0);
        assert_eq!(probe.calibration.points()[2].reference, 2000.0);
    }

    #[test]
    fn mock_mode_produces_plausible_ec() {
        let mut probe = EcProbeComponent::new("ec-1", "EC Probe (Mock)", Box::new(FixedAdc(0)));
        let mut store = MemoryStore::new();
        probe
            .initialize(
                &json!({"gpio_pin": 0, "reading_interval_ms": 100, "sampling_period_ms": 1000, "sample_size": 5}),
                &mut store,
                0,
            )
            .unwrap();

        let mut bus = ProbeBus::new();
        run_one_window(&mut probe, &mut bus);

        assert_eq!(probe.mode(), ProbeMode::Mock);
        assert!(probe.current_ec() > 300.0 && probe.current_ec() < 500.0);
    }

    #[test]
    fn config_roundtrip_preserves_calibration() {
        let probe = calibrated_probe(Box::new(FixedAdc(621)));
        let blob = probe.current_config();

        let mut restored = EcProbeComponent::new("ec-1", "EC Probe", Box::new(FixedAdc(621)));
        restored.apply_config(&blob).unwrap();
        assert_eq!(restored.calibration.points(), probe.calibration.points());
        assert_eq!(restored.current_config(), blob);
    }
}
