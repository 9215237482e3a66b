//! Lighting coordinator component.
//!
//! Closes the loop between the light sensors and the servo dimmer,
//! purely through the action bus: read every configured sensor's
//! `get_reading`, average the fresh ones, and nudge the dimmer toward
//! the lumen target in bounded increments on a fixed cadence. Ships
//! time-of-day lumen presets and a sweep test (0 → 100 → 0 in 5%
//! steps) for commissioning a fixture.

use log::{debug, info, warn};
use serde_json::{json, Value};

use crate::component::action::{ActionResult, ActionSpec, ParamSpec};
use crate::component::schema::{self, ConfigSchema, PropertySpec};
use crate::component::{Component, ComponentCore, ComponentState, ExecutionResult};
use crate::error::Result;
use crate::ports::OrchestratorPort;

pub const KIND: &str = "LightOrchestrator";

/// Sweep test stepping.
const SWEEP_STEP_PCT: i32 = 5;
const SWEEP_INTERVAL_MS: u64 = 2_000;

/// Time-of-day lighting presets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LightingMode {
    Morning,
    Noon,
    Twilight,
    Night,
}

impl LightingMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Morning => "morning",
            Self::Noon => "noon",
            Self::Twilight => "twilight",
            Self::Night => "night",
        }
    }

    fn from_str(mode: &str) -> Option<Self> {
        match mode {
            "morning" => Some(Self::Morning),
            "noon" => Some(Self::Noon),
            "twilight" => Some(Self::Twilight),
            "night" => Some(Self::Night),
            _ => None,
        }
    }

    fn index(self) -> usize {
        match self {
            Self::Morning => 0,
            Self::Noon => 1,
            Self::Twilight => 2,
            Self::Night => 3,
        }
    }
}

#[derive(Debug, Clone)]
struct SensorSlot {
    component_id: String,
    last_lux: f32,
    last_update_ms: u64,
    valid: bool,
}

pub struct LightOrchestratorComponent {
    core: ComponentCore,

    // Persisted configuration
    target_lumens: f32,
    min_lumens: f32,
    max_lumens: f32,
    sensor_ids: Vec<String>,
    dimmer_id: String,
    adjustment_interval_ms: u64,
    increment_step: f32,
    sensor_timeout_ms: u64,
    mode_lumens: [f32; 4],
    config_version: u32,

    // Control state
    mode: LightingMode,
    sensors: Vec<SensorSlot>,
    last_adjustment_ms: u64,
    current_dimmer_position: f32,
    adjustment_count: u32,
    sensor_read_errors: u32,
    dimmer_command_errors: u32,

    // Sweep test
    sweep_active: bool,
    sweep_position: i32,
    sweep_upward: bool,
    sweep_last_move_ms: u64,
}

impl LightOrchestratorComponent {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            core: ComponentCore::new(id, KIND, name),
            target_lumens: 500.0,
            min_lumens: 50.0,
            max_lumens: 1000.0,
            sensor_ids: Vec::new(),
            dimmer_id: "servo-dimmer-1".to_string(),
            adjustment_interval_ms: 10_000,
            increment_step: 0.10,
            sensor_timeout_ms: 30_000,
            mode_lumens: [300.0, 800.0, 200.0, 100.0],
            config_version: 1,
            mode: LightingMode::Morning,
            sensors: Vec::new(),
            last_adjustment_ms: 0,
            current_dimmer_position: 0.0,
            adjustment_count: 0,
            sensor_read_errors: 0,
            dimmer_command_errors: 0,
            sweep_active: false,
            sweep_position: 0,
            sweep_upward: true,
            sweep_last_move_ms: 0,
        }
    }

    pub fn target_lumens(&self) -> f32 {
        self.target_lumens
    }

    pub fn mode(&self) -> LightingMode {
        self.mode
    }

    pub fn sweep_active(&self) -> bool {
        self.sweep_active
    }

    fn rebuild_sensor_slots(&mut self) {
        self.sensors = self
            .sensor_ids
            .iter()
            .map(|id| SensorSlot {
                component_id: id.clone(),
                last_lux: 0.0,
                last_update_ms: 0,
                valid: false,
            })
            .collect();
    }

    fn read_sensors(&mut self, now_ms: u64, services: &mut dyn OrchestratorPort) {
        for slot in &mut self.sensors {
            let result = services.call_action(&slot.component_id, "get_reading", &json!({}));
            if result.success && result.data["valid"].as_bool().unwrap_or(false) {
                if let Some(lux) = result.data["lux"].as_f64() {
                    slot.last_lux = lux as f32;
                    slot.last_update_ms = now_ms;
                    slot.valid = true;
                    continue;
                }
            }
            self.sensor_read_errors += 1;
        }
    }

    /// Average over sensors with a fresh reading.
    fn average_lux(&self, now_ms: u64) -> Option<f32> {
        let fresh: Vec<f32> = self
            .sensors
            .iter()
            .filter(|s| s.valid && now_ms.saturating_sub(s.last_update_ms) <= self.sensor_timeout_ms)
            .map(|s| s.last_lux)
            .collect();
        if fresh.is_empty() {
            return None;
        }
        Some(fresh.iter().sum::<f32>() / fresh.len() as f32)
    }

    fn send_dimmer_position(&mut self, position: f32, services: &mut dyn OrchestratorPort) -> bool {
        let position = position.clamp(0.0, 100.0);
        let result = services.call_action(
            &self.dimmer_id,
            "set_position",
            &json!({"position": position.round() as i64}),
        );
        if result.success {
            self.current_dimmer_position = position;
            true
        } else {
            self.dimmer_command_errors += 1;
            warn!(
                "{}: dimmer command failed: {}",
                self.core.tag(),
                result.message
            );
            false
        }
    }

    /// Bounded nudge toward the lumen target. The measured/target ratio
    /// decides direction; each adjustment moves at most `increment_step`
    /// of full scale so a misreading cannot slam the fixture.
    fn adjust_toward_target(
        &mut self,
        measured_lux: f32,
        now_ms: u64,
        services: &mut dyn OrchestratorPort,
    ) {
        if now_ms.saturating_sub(self.last_adjustment_ms) < self.adjustment_interval_ms {
            return;
        }

        let deadband = self.target_lumens * 0.05;
        let error = self.target_lumens - measured_lux;
        if error.abs() <= deadband {
            return;
        }

        let step = self.increment_step * 100.0;
        let delta = if error > 0.0 { step } else { -step };
        let next = (self.current_dimmer_position + delta).clamp(0.0, 100.0);
        if (next - self.current_dimmer_position).abs() < f32::EPSILON {
            return;
        }

        debug!(
            "{}: {measured_lux:.0} lx vs target {:.0} lx, position {:.0}% -> {next:.0}%",
            self.core.tag(),
            self.target_lumens,
            self.current_dimmer_position
        );
        if self.send_dimmer_position(next, services) {
            self.adjustment_count += 1;
            self.last_adjustment_ms = now_ms;
        }
    }

    /// Commissioning sweep: 0 → 100 → 0 in fixed steps, then resume
    /// normal control.
    fn update_sweep(&mut self, now_ms: u64, services: &mut dyn OrchestratorPort) {
        if now_ms.saturating_sub(self.sweep_last_move_ms) < SWEEP_INTERVAL_MS {
            return;
        }

        if self.sweep_upward {
            self.sweep_position += SWEEP_STEP_PCT;
            if self.sweep_position >= 100 {
                self.sweep_position = 100;
                self.sweep_upward = false;
            }
        } else {
            self.sweep_position -= SWEEP_STEP_PCT;
            if self.sweep_position <= 0 {
                self.sweep_position = 0;
                self.sweep_active = false;
                info!("{}: sweep test complete", self.core.tag());
            }
        }

        self.send_dimmer_position(self.sweep_position as f32, services);
        self.sweep_last_move_ms = now_ms;
    }
}

impl Component for LightOrchestratorComponent {
    fn core(&self) -> &ComponentCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ComponentCore {
        &mut self.core
    }

    fn default_schema(&self) -> ConfigSchema {
        ConfigSchema::new(KIND, "closed-loop lighting coordinator")
            .property(PropertySpec::float("target_lumens", 500.0, "lumen setpoint"))
            .property(PropertySpec::float("min_lumens", 50.0, "lower setpoint bound"))
            .property(PropertySpec::float("max_lumens", 1000.0, "upper setpoint bound"))
            .property(PropertySpec::array("sensor_ids", json!([]), "light sensor component ids"))
            .property(PropertySpec::string("dimmer_id", "servo-dimmer-1", "servo dimmer component id"))
            .property(PropertySpec::integer("adjustment_interval_ms", 10_000, "time between nudges").range(1000.0, 3_600_000.0))
            .property(PropertySpec::float("increment_step", 0.10, "max nudge fraction of full scale").range(0.01, 1.0))
            .property(PropertySpec::integer("sensor_timeout_ms", 30_000, "reading freshness bound"))
            .property(PropertySpec::array(
                "mode_lumens",
                json!([300.0, 800.0, 200.0, 100.0]),
                "morning/noon/twilight/night setpoints",
            ))
    }

    fn current_config(&self) -> Value {
        json!({
            "component_kind": KIND,
            "config_version": self.config_version,
            "target_lumens": self.target_lumens,
            "min_lumens": self.min_lumens,
            "max_lumens": self.max_lumens,
            "sensor_ids": self.sensor_ids,
            "dimmer_id": self.dimmer_id,
            "adjustment_interval_ms": self.adjustment_interval_ms,
            "increment_step": self.increment_step,
            "sensor_timeout_ms": self.sensor_timeout_ms,
            "mode_lumens": self.mode_lumens.to_vec(),
        })
    }

    fn apply_config(&mut self, config: &Value) -> Result<()> {
        self.target_lumens = schema::get_f32(config, "target_lumens", self.target_lumens);
        self.min_lumens = schema::get_f32(config, "min_lumens", self.min_lumens);
        self.max_lumens = schema::get_f32(config, "max_lumens", self.max_lumens);
        self.dimmer_id = schema::get_string(config, "dimmer_id", &self.dimmer_id);
        self.adjustment_interval_ms = schema::get_u64(
            config,
            "adjustment_interval_ms",
            self.adjustment_interval_ms,
        );
        self.increment_step = schema::get_f32(config, "increment_step", self.increment_step)
            .clamp(0.01, 1.0);
        self.sensor_timeout_ms =
            schema::get_u64(config, "sensor_timeout_ms", self.sensor_timeout_ms);
        self.config_version = schema::get_u32(config, "config_version", self.config_version);

        if let Some(ids) = config.get("sensor_ids").and_then(Value::as_array) {
            self.sensor_ids = ids
                .iter()
                .filter_map(Value::as_str)
                .map(String::from)
                .collect();
            self.rebuild_sensor_slots();
        }
        if let Some(levels) = config.get("mode_lumens").and_then(Value::as_array) {
            for (slot, level) in self.mode_lumens.iter_mut().zip(levels) {
                if let Some(v) = level.as_f64() {
                    *slot = v as f32;
                }
            }
        }
        self.target_lumens = self.target_lumens.clamp(self.min_lumens, self.max_lumens);
        Ok(())
    }

    fn init_hardware(&mut self, now_ms: u64) -> Result<()> {
        self.core.set_next_execution_ms(now_ms + 1_000);
        info!(
            "{}: initialized, {} sensors, dimmer '{}', target {:.0} lm",
            self.core.tag(),
            self.sensor_ids.len(),
            self.dimmer_id,
            self.target_lumens
        );
        Ok(())
    }

    fn execute(&mut self, services: &mut dyn OrchestratorPort) -> ExecutionResult {
        let started_ms = services.now_ms();
        self.core.set_state(ComponentState::Executing);
        let now = services.now_ms();

        let average = if self.sweep_active {
            self.update_sweep(now, services);
            None
        } else {
            self.read_sensors(now, services);
            let average = self.average_lux(now);
            if let Some(lux) = average {
                self.adjust_toward_target(lux, now, services);
            }
            average
        };

        let data = json!({
            "timestamp_ms": now,
            "mode": self.mode.as_str(),
            "target_lumens": self.target_lumens,
            "average_lux": average,
            "dimmer_position": self.current_dimmer_position,
            "adjustment_count": self.adjustment_count,
            "sensor_read_errors": self.sensor_read_errors,
            "dimmer_command_errors": self.dimmer_command_errors,
            "sweep_active": self.sweep_active,
            "sensors": self.sensors.iter().map(|s| json!({
                "id": s.component_id,
                "lux": s.last_lux,
                "valid": s.valid,
                "last_update_ms": s.last_update_ms,
            })).collect::<Vec<_>>(),
        });

        // Sweep mode needs the tighter cadence to hit its step timing.
        let cadence = if self.sweep_active {
            SWEEP_INTERVAL_MS
        } else {
            self.adjustment_interval_ms.min(10_000)
        };
        self.core.set_next_execution_ms(now + cadence);
        self.core.mark_executed(now);
        self.core.store_last_data(data.clone());
        self.core.set_state(ComponentState::Ready);

        ExecutionResult::ok(data, services.now_ms().saturating_sub(started_ms) as u32)
    }

    fn cleanup(&mut self) {
        info!("{}: cleanup", self.core.tag());
        self.sweep_active = false;
    }

    fn supported_actions(&self) -> Vec<ActionSpec> {
        vec![
            ActionSpec::new("set_target_lumens", "Change the lumen setpoint")
                .timeout(3_000)
                .param(ParamSpec::float("lumens", 0.0, 100_000.0)),
            ActionSpec::new("set_mode", "Select a time-of-day preset")
                .timeout(3_000)
                .param(ParamSpec::string("mode", 16)),
            ActionSpec::new("start_sweep", "Run the 0-100-0 sweep test").timeout(5_000),
            ActionSpec::new("stop_sweep", "Abort the sweep test").timeout(3_000).any_state(),
        ]
    }

    fn perform_action(
        &mut self,
        action: &str,
        params: &Value,
        services: &mut dyn OrchestratorPort,
    ) -> ActionResult {
        match action {
            "set_target_lumens" => {
                let lumens = params["lumens"].as_f64().unwrap_or(0.0) as f32;
                self.target_lumens = lumens.clamp(self.min_lumens, self.max_lumens);
                let _ = services.save_component_config(self.core.id(), &self.current_config());
                ActionResult::ok(format!("target set to {:.0} lm", self.target_lumens))
            }
            "set_mode" => {
                let Some(mode) = params["mode"].as_str().and_then(LightingMode::from_str) else {
                    return ActionResult::failure("unknown mode (morning/noon/twilight/night)");
                };
                self.mode = mode;
                self.target_lumens = self.mode_lumens[mode.index()]
                    .clamp(self.min_lumens, self.max_lumens);
                info!(
                    "{}: mode {} -> target {:.0} lm",
                    self.core.tag(),
                    mode.as_str(),
                    self.target_lumens
                );
                ActionResult::ok(format!("mode set to {}", mode.as_str()))
            }
            "start_sweep" => {
                if self.sweep_active {
                    return ActionResult::failure("sweep already running");
                }
                self.sweep_active = true;
                self.sweep_position = 0;
                self.sweep_upward = true;
                self.sweep_last_move_ms = 0;
                info!("{}: sweep test started", self.core.tag());
                ActionResult::ok("sweep test started")
            }
            "stop_sweep" => {
                self.sweep_active = false;
                self.send_dimmer_position(0.0, services);
                ActionResult::ok("sweep test stopped")
            }
            other => ActionResult::failure(format!("unknown action: {other}")),
        }
    }

    fn core_data(&self) -> Value {
        json!({
            "target_lumens": self.target_lumens,
            "dimmer_position": self.current_dimmer_position,
            "mode": self.mode.as_str(),
            "sweep_active": self.sweep_active,
            "timestamp_ms": self.core.last_execution_ms(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::MemoryStore;

    /// Bus simulating the light sensors and the dimmer.
    struct LightBus {
        now: u64,
        lux_by_id: Vec<(String, f32)>,
        dimmer_positions: Vec<i64>,
        dimmer_ok: bool,
    }

    impl OrchestratorPort for LightBus {
        fn now_ms(&self) -> u64 {
            self.now
        }

        fn call_action(&mut self, id: &str, action: &str, params: &Value) -> ActionResult {
            match action {
                "get_reading" => {
                    for (sensor_id, lux) in &self.lux_by_id {
                        if sensor_id == id {
                            return ActionResult::ok("")
                                .with_data(json!({"lux": lux, "valid": true}));
                        }
                    }
                    ActionResult::failure("component not found")
                }
                "set_position" => {
                    if self.dimmer_ok {
                        self.dimmer_positions.push(params["position"].as_i64().unwrap());
                        ActionResult::ok("moved")
                    } else {
                        ActionResult::failure("offline")
                    }
                }
                _ => ActionResult::failure("unknown"),
            }
        }

        fn reschedule(&mut self, _id: &str, _w: u64) -> bool {
            false
        }

        fn fetch_remote(&mut self, _u: &str, _t: u32) -> Value {
            Value::Null
        }

        fn save_component_config(&mut self, _id: &str, _c: &Value) -> bool {
            true
        }
    }

    fn coordinator() -> LightOrchestratorComponent {
        let mut c = LightOrchestratorComponent::new("light-1", "Lighting Coordinator");
        let mut store = MemoryStore::new();
        c.initialize(
            &json!({
                "sensor_ids": ["tsl-1", "tsl-2"],
                "dimmer_id": "servo-1",
                "target_lumens": 500.0,
                "adjustment_interval_ms": 1000,
            }),
            &mut store,
            0,
        )
        .unwrap();
        c
    }

    #[test]
    fn averages_fresh_sensors_and_nudges_up() {
        let mut c = coordinator();
        let mut bus = LightBus {
            now: 10_000,
            lux_by_id: vec![("tsl-1".into(), 100.0), ("tsl-2".into(), 200.0)],
            dimmer_positions: Vec::new(),
            dimmer_ok: true,
        };

        let result = c.execute(&mut bus);
        assert!(result.success);
        assert_eq!(result.data["average_lux"], json!(150.0));
        // 150 lx below 500 lm target: one +10% step.
        assert_eq!(bus.dimmer_positions, vec![10]);
        assert_eq!(c.adjustment_count, 1);
    }

    #[test]
    fn nudges_down_when_over_target() {
        let mut c = coordinator();
        c.current_dimmer_position = 50.0;
        let mut bus = LightBus {
            now: 10_000,
            lux_by_id: vec![("tsl-1".into(), 900.0), ("tsl-2".into(), 900.0)],
            dimmer_positions: Vec::new(),
            dimmer_ok: true,
        };

        c.execute(&mut bus);
        assert_eq!(bus.dimmer_positions, vec![40]);
    }

    #[test]
    fn within_deadband_no_adjustment() {
        let mut c = coordinator();
        let mut bus = LightBus {
            now: 10_000,
            lux_by_id: vec![("tsl-1".into(), 510.0), ("tsl-2".into(), 495.0)],
            dimmer_positions: Vec::new(),
            dimmer_ok: true,
        };

        c.execute(&mut bus);
        assert!(bus.dimmer_positions.is_empty());
        assert_eq!(c.adjustment_count, 0);
    }

    #[test]
    fn adjustment_cadence_respected() {
        let mut c = coordinator();
        let mut bus = LightBus {
            now: 10_000,
            lux_by_id: vec![("tsl-1".into(), 100.0), ("tsl-2".into(), 100.0)],
            dimmer_positions: Vec::new(),
            dimmer_ok: true,
        };

        c.execute(&mut bus);
        // Second execute 200 ms later: within the adjustment interval.
        bus.now = 10_200;
        c.execute(&mut bus);
        assert_eq!(bus.dimmer_positions.len(), 1);

        bus.now = 12_000;
        c.execute(&mut bus);
        assert_eq!(bus.dimmer_positions.len(), 2);
    }

    #[test]
    fn unreachable_sensors_mean_no_adjustment() {
        let mut c = coordinator();
        let mut bus = LightBus {
            now: 10_000,
            lux_by_id: Vec::new(),
            dimmer_positions: Vec::new(),
            dimmer_ok: true,
        };

        let result = c.execute(&mut bus);
        assert!(result.success);
        assert_eq!(result.data["average_lux"], Value::Null);
        assert!(bus.dimmer_positions.is_empty());
        assert_eq!(c.sensor_read_errors, 2);
    }

    #[test]
    fn mode_preset_updates_target() {
        let mut c = coordinator();
        let mut bus = LightBus {
            now: 0,
            lux_by_id: Vec::new(),
            dimmer_positions: Vec::new(),
            dimmer_ok: true,
        };

        let result = c.execute_action("set_mode", &json!({"mode": "noon"}), &mut bus);
        assert!(result.success);
        assert_eq!(c.mode(), LightingMode::Noon);
        assert_eq!(c.target_lumens(), 800.0);

        let bad = c.execute_action("set_mode", &json!({"mode": "midnight"}), &mut bus);
        assert!(!bad.success);
    }

    #[test]
    fn target_clamped_to_bounds() {
        let mut c = coordinator();
        let mut bus = LightBus {
            now: 0,
            lux_by_id: Vec::new(),
            dimmer_positions: Vec::new(),
            dimmer_ok: true,
        };

        c.execute_action("set_target_lumens", &json!({"lumens": 99_999.0}), &mut bus);
        assert_eq!(c.target_lumens(), 1000.0);
        c.execute_action("set_target_lumens", &json!({"lumens": 1.0}), &mut bus);
        assert_eq!(c.target_lumens(), 50.0);
    }

    #[test]
    fn sweep_walks_up_and_back_down() {
        let mut c = coordinator();
        let mut bus = LightBus {
            now: 0,
            lux_by_id: Vec::new(),
            dimmer_positions: Vec::new(),
            dimmer_ok: true,
        };

        assert!(c.execute_action("start_sweep", &json!({}), &mut bus).success);

        // 20 steps up + 20 steps down at 2 s each.
        for step in 1..=41 {
            bus.now = step * SWEEP_INTERVAL_MS;
            c.execute(&mut bus);
            if !c.sweep_active() {
                break;
            }
        }

        assert!(!c.sweep_active());
        assert_eq!(*bus.dimmer_positions.iter().max().unwrap(), 100);
        assert_eq!(*bus.dimmer_positions.last().unwrap(), 0);
        // No sensor polling happened during the sweep.
        assert_eq!(c.sensor_read_errors, 0);
    }

    #[test]
    fn stop_sweep_resets_dimmer() {
        let mut c = coordinator();
        let mut bus = LightBus {
            now: 0,
            lux_by_id: Vec::new(),
            dimmer_positions: Vec::new(),
            dimmer_ok: true,
        };

        c.execute_action("start_sweep", &json!({}), &mut bus);
        bus.now = SWEEP_INTERVAL_MS;
        c.execute(&mut bus);
        assert!(c.sweep_active());

        c.execute_action("stop_sweep", &json!({}), &mut bus);
        assert!(!c.sweep_active());
        assert_eq!(*bus.dimmer_positions.last().unwrap(), 0);
    }
}
