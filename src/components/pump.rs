//! Peristaltic dosing pump component.
//!
//! Relay-driven pump with a volume-dosing state machine:
//!
//! ```text
//!  IDLE ──dose(v)──▶ DOSE ──volume reached──▶ IDLE
//!    │                 │
//!    └──start──▶ CONTINUOUS ──stop / max runtime──▶ IDLE
//! ```
//!
//! Volume is derived from runtime × calibrated flow rate. A hard
//! max-runtime cutoff backstops every mode. The raw `set_output` action
//! doubles as the probes' excitation-voltage control, which is why it is
//! not Ready-gated the way dosing is.

use log::{info, warn};
use serde_json::{json, Value};

use crate::component::action::{ActionResult, ActionSpec, ParamSpec};
use crate::component::schema::{self, ConfigSchema, PropertySpec};
use crate::component::{Component, ComponentCore, ComponentState, ExecutionResult};
use crate::error::Result;
use crate::ports::{OrchestratorPort, RelayPort};

pub const KIND: &str = "PeristalticPump";

/// Check cadence while the motor runs / while idle.
const RUNNING_CHECK_MS: u64 = 1_000;
const IDLE_CHECK_MS: u64 = 30_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispenseMode {
    Idle,
    Dose,
    Continuous,
}

impl DispenseMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "IDLE",
            Self::Dose => "DOSE",
            Self::Continuous => "CONTINUOUS",
        }
    }
}

pub struct PeristalticPumpComponent {
    core: ComponentCore,
    relay: Box<dyn RelayPort>,

    // Persisted configuration
    pin_no: u8,
    mls_per_sec: f32,
    board_ref: String,
    liquid_name: String,
    liquid_concentration: f32,
    max_runtime_ms: u64,
    relay_inverted: bool,
    config_version: u32,

    // Dispense state machine
    mode: DispenseMode,
    running: bool,
    started_ms: u64,
    target_duration_ms: u64,
    dispense_target_ml: f32,
    current_volume_ml: f32,

    // Totals
    total_volume_ml: f32,
    total_runtime_ms: u64,
    dose_count: u32,
}

impl PeristalticPumpComponent {
    pub fn new(id: impl Into<String>, name: impl Into<String>, relay: Box<dyn RelayPort>) -> Self {
        Self {
            core: ComponentCore::new(id, KIND, name),
            relay,
            pin_no: 26,
            mls_per_sec: 40.0,
            board_ref: "BOARD_1".to_string(),
            liquid_name: "Unknown".to_string(),
            liquid_concentration: 100.0,
            max_runtime_ms: 60_000,
            relay_inverted: true,
            config_version: 2,
            mode: DispenseMode::Idle,
            running: false,
            started_ms: 0,
            target_duration_ms: 0,
            dispense_target_ml: 0.0,
            current_volume_ml: 0.0,
            total_volume_ml: 0.0,
            total_runtime_ms: 0,
            dose_count: 0,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn mode(&self) -> DispenseMode {
        self.mode
    }

    pub fn total_volume_ml(&self) -> f32 {
        self.total_volume_ml
    }

    fn drive_relay(&mut self, on: bool) -> bool {
        let level = if self.relay_inverted { !on } else { on };
        self.relay.set(self.pin_no, level)
    }

    fn start_motor(&mut self, now_ms: u64) -> bool {
        if !self.drive_relay(true) {
            return false;
        }
        self.running = true;
        self.started_ms = now_ms;
        self.current_volume_ml = 0.0;
        true
    }

    fn stop_motor(&mut self, now_ms: u64) {
        if !self.drive_relay(false) {
            warn!("{}: relay off command failed", self.core.tag());
        }
        if self.running {
            let elapsed = now_ms.saturating_sub(self.started_ms);
            self.total_runtime_ms += elapsed;
        }
        self.running = false;
        self.mode = DispenseMode::Idle;
        self.target_duration_ms = 0;
    }

    /// Advance the dispense state machine: live volume, dose
    /// completion, max-runtime safety cutoff.
    fn update_dispense_state(&mut self, now_ms: u64) {
        if !self.running {
            return;
        }
        let elapsed = now_ms.saturating_sub(self.started_ms);
        self.current_volume_ml = elapsed as f32 / 1000.0 * self.mls_per_sec;

        if elapsed >= self.max_runtime_ms {
            warn!("{}: max runtime reached, stopping", self.core.tag());
            self.total_volume_ml += self.current_volume_ml;
            self.stop_motor(now_ms);
            return;
        }

        if self.mode == DispenseMode::Dose
            && self.target_duration_ms > 0
            && elapsed >= self.target_duration_ms
        {
            self.total_volume_ml += self.current_volume_ml;
            self.dose_count += 1;
            info!(
                "{}: dose complete, {:.1} ml of {}",
                self.core.tag(),
                self.current_volume_ml,
                self.liquid_name
            );
            self.stop_motor(now_ms);
        }
    }

    fn dose(&mut self, volume_ml: f32, flow_rate: Option<f32>, now_ms: u64) -> ActionResult {
        if self.running {
            return ActionResult::failure("pump already running");
        }
        if volume_ml <= 0.0 {
            return ActionResult::failure("dose volume must be positive");
        }

        let rate = flow_rate.filter(|r| *r > 0.0).unwrap_or(self.mls_per_sec);
        let duration_ms = (volume_ml / rate * 1000.0) as u64;
        if duration_ms > self.max_runtime_ms {
            return ActionResult::failure(format!(
                "dose of {volume_ml:.1} ml needs {duration_ms} ms, over the {} ms safety limit",
                self.max_runtime_ms
            ));
        }

        self.mode = DispenseMode::Dose;
        self.dispense_target_ml = volume_ml;
        self.target_duration_ms = duration_ms;
        if !self.start_motor(now_ms) {
            self.mode = DispenseMode::Idle;
            return ActionResult::failure("relay on command failed");
        }

        info!(
            "{}: dosing {volume_ml:.1} ml of {} at {rate:.1} ml/s ({duration_ms} ms)",
            self.core.tag(),
            self.liquid_name
        );
        ActionResult::ok(format!("dosing {volume_ml:.1} ml")).with_data(json!({
            "volume_ml": volume_ml,
            "duration_ms": duration_ms,
        }))
    }

    fn start_continuous(&mut self, now_ms: u64) -> ActionResult {
        if self.running {
            return ActionResult::failure("pump already running");
        }
        self.mode = DispenseMode::Continuous;
        self.dispense_target_ml = 0.0;
        self.target_duration_ms = 0;
        if !self.start_motor(now_ms) {
            self.mode = DispenseMode::Idle;
            return ActionResult::failure("relay on command failed");
        }
        info!("{}: continuous run started", self.core.tag());
        ActionResult::ok("continuous run started")
    }

    fn stop(&mut self, now_ms: u64) -> ActionResult {
        if !self.running {
            return ActionResult::ok("pump already stopped");
        }
        self.total_volume_ml += self.current_volume_ml;
        self.stop_motor(now_ms);
        info!("{}: stopped", self.core.tag());
        ActionResult::ok("pump stopped")
    }

    /// Raw relay control for excitation-supply duty. On = continuous
    /// run (max-runtime backstop still applies), off = stop.
    fn set_output(&mut self, on: bool, now_ms: u64) -> ActionResult {
        if on {
            if self.running {
                return ActionResult::ok("output already on");
            }
            self.start_continuous(now_ms)
        } else {
            self.stop(now_ms)
        }
    }
}

impl Component for PeristalticPumpComponent {
    fn core(&self) -> &ComponentCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ComponentCore {
        &mut self.core
    }

    fn default_schema(&self) -> ConfigSchema {
        ConfigSchema::new(KIND, "relay-driven peristaltic dosing pump")
            .property(PropertySpec::integer("pin_no", 26, "relay GPIO pin").range(0.0, 39.0))
            .property(PropertySpec::float("mls_per_sec", 40.0, "calibrated flow rate").range(0.1, 100.0))
            .property(PropertySpec::string("board_ref", "BOARD_1", "relay board reference"))
            .property(PropertySpec::string("liquid_name", "Unknown", "liquid being pumped"))
            .property(PropertySpec::float("liquid_concentration", 100.0, "concentration percent").range(0.0, 100.0))
            .property(PropertySpec::integer("max_runtime_ms", 60_000, "safety cutoff").range(1000.0, 300_000.0))
            .property(PropertySpec::boolean("relay_inverted", true, "LOW = active relay logic"))
    }

    fn current_config(&self) -> Value {
        json!({
            "component_kind": KIND,
            "config_version": self.config_version,
            "pin_no": self.pin_no,
            "mls_per_sec": self.mls_per_sec,
            "board_ref": self.board_ref,
            "liquid_name": self.liquid_name,
            "liquid_concentration": self.liquid_concentration,
            "max_runtime_ms": self.max_runtime_ms,
            "relay_inverted": self.relay_inverted,
        })
    }

    fn apply_config(&mut self, config: &Value) -> Result<()> {
        self.pin_no = schema::get_u8(config, "pin_no", self.pin_no);
        self.mls_per_sec = schema::get_f32(config, "mls_per_sec", self.mls_per_sec);
        self.board_ref = schema::get_string(config, "board_ref", &self.board_ref);
        self.liquid_name = schema::get_string(config, "liquid_name", &self.liquid_name);
        self.liquid_concentration = schema::get_f32(
            config,
            "liquid_concentration",
            self.liquid_concentration,
        )
        .clamp(0.0, 100.0);
        self.max_runtime_ms = schema::get_u64(config, "max_runtime_ms", self.max_runtime_ms);
        self.relay_inverted = schema::get_bool(config, "relay_inverted", self.relay_inverted);
        self.config_version = schema::get_u32(config, "config_version", self.config_version);
        Ok(())
    }

    fn init_hardware(&mut self, now_ms: u64) -> Result<()> {
        // Motor must be off before anything else happens.
        if !self.drive_relay(false) {
            return Err(crate::error::ComponentError::Hardware("relay init failed"));
        }
        self.mode = DispenseMode::Idle;
        self.running = false;
        self.core.set_next_execution_ms(now_ms + IDLE_CHECK_MS);
        info!(
            "{}: initialized on GPIO {}, {} at {:.0}%, {:.1} ml/s",
            self.core.tag(),
            self.pin_no,
            self.liquid_name,
            self.liquid_concentration,
            self.mls_per_sec
        );
        Ok(())
    }

    fn execute(&mut self, services: &mut dyn OrchestratorPort) -> ExecutionResult {
        let started_ms = services.now_ms();
        self.core.set_state(ComponentState::Executing);
        let now = services.now_ms();

        self.update_dispense_state(now);

        let elapsed_run = if self.running {
            now.saturating_sub(self.started_ms)
        } else {
            0
        };
        let progress = if self.running && self.target_duration_ms > 0 {
            (elapsed_run as f32 / self.target_duration_ms as f32).min(1.0)
        } else {
            0.0
        };

        let data = json!({
            "timestamp_ms": now,
            "pin_no": self.pin_no,
            "mode": self.mode.as_str(),
            "is_running": self.running,
            "elapsed_ms": elapsed_run,
            "dose_progress": progress,
            "dispense_target_ml": self.dispense_target_ml,
            "current_volume_ml": self.current_volume_ml,
            "total_volume_ml": self.total_volume_ml,
            "total_runtime_ms": self.total_runtime_ms,
            "dose_count": self.dose_count,
            "flow_rate_ml_s": self.mls_per_sec,
            "liquid_name": self.liquid_name,
            "liquid_concentration": self.liquid_concentration,
            "board_ref": self.board_ref,
        });

        // Tight checks while the motor runs; relaxed cadence when idle.
        let cadence = if self.running { RUNNING_CHECK_MS } else { IDLE_CHECK_MS };
        self.core.set_next_execution_ms(now + cadence);
        self.core.mark_executed(now);
        self.core.store_last_data(data.clone());
        self.core.set_state(ComponentState::Ready);

        ExecutionResult::ok(data, services.now_ms().saturating_sub(started_ms) as u32)
    }

    fn cleanup(&mut self) {
        info!("{}: cleanup, forcing relay off", self.core.tag());
        let _ = self.drive_relay(false);
        self.running = false;
        self.mode = DispenseMode::Idle;
    }

    fn supported_actions(&self) -> Vec<ActionSpec> {
        vec![
            ActionSpec::new("dose", "Dispense a calibrated volume")
                .timeout(10_000)
                .param(ParamSpec::float("volume_ml", 0.1, 1_000.0))
                .param(ParamSpec::float("flow_rate", 0.1, 100.0).optional()),
            ActionSpec::new("start", "Start a continuous run").timeout(5_000),
            ActionSpec::new("stop", "Stop the pump").timeout(5_000).any_state(),
            ActionSpec::new("set_output", "Raw relay control (excitation supply duty)")
                .timeout(5_000)
                .param(ParamSpec::boolean("state")),
        ]
    }

    fn perform_action(
        &mut self,
        action: &str,
        params: &Value,
        services: &mut dyn OrchestratorPort,
    ) -> ActionResult {
        let now = services.now_ms();
        match action {
            "dose" => {
                let volume_ml = params["volume_ml"].as_f64().unwrap_or(0.0) as f32;
                let flow_rate = params["flow_rate"].as_f64().map(|v| v as f32);
                let result = self.dose(volume_ml, flow_rate, now);
                if result.success {
                    // Keep the dispense state machine serviced while running.
                    self.core.set_next_execution_ms(now + RUNNING_CHECK_MS);
                }
                result
            }
            "start" => {
                let result = self.start_continuous(now);
                if result.success {
                    self.core.set_next_execution_ms(now + RUNNING_CHECK_MS);
                }
                result
            }
            "stop" => self.stop(now),
            "set_output" => {
                let on = params["state"].as_bool().unwrap_or(false);
                let result = self.set_output(on, now);
                if result.success && on {
                    self.core.set_next_execution_ms(now + RUNNING_CHECK_MS);
                }
                result
            }
            other => ActionResult::failure(format!("unknown action: {other}")),
        }
    }

    fn core_data(&self) -> Value {
        json!({
            "is_running": self.running,
            "mode": self.mode.as_str(),
            "total_volume_ml": self.total_volume_ml,
            "dose_count": self.dose_count,
            "liquid_name": self.liquid_name,
            "timestamp_ms": self.core.last_execution_ms(),
        })
    }
}
