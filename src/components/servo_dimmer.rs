//! Remote servo dimmer component.
//!
//! A servo on another controller throttles a grow-light fixture; this
//! component talks to it over its small HTTP API through the
//! orchestrator's fetch service. Execution is a status poll plus, when
//! the target differs from the device position, a movement command.
//! Backoff deferrals from the fetch service reschedule the poll instead
//! of counting as communication errors.

use log::{debug, info, warn};
use serde_json::{json, Value};

use crate::component::action::{ActionResult, ActionSpec, ParamSpec};
use crate::component::schema::{self, ConfigSchema, PropertySpec};
use crate::component::{Component, ComponentCore, ComponentState, ExecutionResult};
use crate::error::Result;
use crate::ports::OrchestratorPort;

pub const KIND: &str = "ServoDimmer";

pub struct ServoDimmerComponent {
    core: ComponentCore,

    // Persisted configuration
    device_host: String,
    device_port: u16,
    base_lumens: f32,
    check_interval_ms: u64,
    http_timeout_ms: u32,
    enable_movement: bool,
    config_version: u32,

    // Device state
    current_position: i32,
    target_position: i32,
    /// False until a caller sets a target; before that the poll adopts
    /// the device's own position instead of commanding a move.
    target_commanded: bool,
    device_online: bool,
    communication_errors: u32,
}

impl ServoDimmerComponent {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            core: ComponentCore::new(id, KIND, name),
            device_host: "192.168.1.161".to_string(),
            device_port: 80,
            base_lumens: 1000.0,
            check_interval_ms: 30_000,
            http_timeout_ms: 5_000,
            enable_movement: true,
            config_version: 1,
            current_position: 0,
            target_position: 0,
            target_commanded: false,
            device_online: false,
            communication_errors: 0,
        }
    }

    pub fn current_position(&self) -> i32 {
        self.current_position
    }

    pub fn target_position(&self) -> i32 {
        self.target_position
    }

    /// Lumen output at the current position (linear model).
    pub fn current_lumens(&self) -> f32 {
        self.base_lumens * self.current_position as f32 / 100.0
    }

    fn status_url(&self) -> String {
        format!("http://{}:{}/status", self.device_host, self.device_port)
    }

    fn set_url(&self, position: i32) -> String {
        format!(
            "http://{}:{}/set?position={position}",
            self.device_host, self.device_port
        )
    }

    fn position_from_lumens(&self, lumens: f32) -> i32 {
        if self.base_lumens <= 0.0 {
            return 0;
        }
        ((lumens / self.base_lumens) * 100.0).round().clamp(0.0, 100.0) as i32
    }

    /// `Err(retry_at)` on a backoff deferral.
    fn poll_status(
        &mut self,
        services: &mut dyn OrchestratorPort,
    ) -> core::result::Result<bool, u64> {
        let response = services.fetch_remote(&self.status_url(), self.http_timeout_ms);
        if response["shouldDefer"].as_bool().unwrap_or(false) {
            return Err(response["nextRetryMs"].as_u64().unwrap_or(0));
        }
        if !response["success"].as_bool().unwrap_or(false) {
            self.device_online = false;
            self.communication_errors += 1;
            return Ok(false);
        }

        self.device_online = true;
        if let Some(position) = response["position"].as_i64() {
            self.current_position = (position as i32).clamp(0, 100);
            if !self.target_commanded {
                self.target_position = self.current_position;
            }
        }
        Ok(true)
    }

    fn send_move(&mut self, services: &mut dyn OrchestratorPort) -> bool {
        let target = self.target_position;
        let response = services.fetch_remote(&self.set_url(target), self.http_timeout_ms);
        if response["success"].as_bool().unwrap_or(false) {
            info!("{}: moved to {target}%", self.core.tag());
            self.current_position = target;
            true
        } else {
            warn!("{}: move command failed", self.core.tag());
            self.communication_errors += 1;
            false
        }
    }
}

impl Component for ServoDimmerComponent {
    fn core(&self) -> &ComponentCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ComponentCore {
        &mut self.core
    }

    fn default_schema(&self) -> ConfigSchema {
        ConfigSchema::new(KIND, "HTTP-controlled servo light dimmer")
            .property(PropertySpec::string("device_host", "192.168.1.161", "dimmer device host"))
            .property(PropertySpec::integer("device_port", 80, "dimmer device port").range(1.0, 65_535.0))
            .property(PropertySpec::float("base_lumens", 1000.0, "lumen output at 100%"))
            .property(PropertySpec::integer("check_interval_ms", 30_000, "status poll cadence").range(1000.0, 3_600_000.0))
            .property(PropertySpec::integer("http_timeout_ms", 5_000, "request timeout"))
            .property(PropertySpec::boolean("enable_movement", true, "allow position changes"))
    }

    fn current_config(&self) -> Value {
        json!({
            "component_kind": KIND,
            "config_version": self.config_version,
            "device_host": self.device_host,
            "device_port": self.device_port,
            "base_lumens": self.base_lumens,
            "check_interval_ms": self.check_interval_ms,
            "http_timeout_ms": self.http_timeout_ms,
            "enable_movement": self.enable_movement,
        })
    }

    fn apply_config(&mut self, config: &Value) -> Result<()> {
        self.device_host = schema::get_string(config, "device_host", &self.device_host);
        self.device_port = schema::get_u16(config, "device_port", self.device_port);
        self.base_lumens = schema::get_f32(config, "base_lumens", self.base_lumens);
        self.check_interval_ms =
            schema::get_u64(config, "check_interval_ms", self.check_interval_ms);
        self.http_timeout_ms = schema::get_u32(config, "http_timeout_ms", self.http_timeout_ms);
        self.enable_movement = schema::get_bool(config, "enable_movement", self.enable_movement);
        self.config_version = schema::get_u32(config, "config_version", self.config_version);
        Ok(())
    }

    fn init_hardware(&mut self, now_ms: u64) -> Result<()> {
        self.core.set_next_execution_ms(now_ms + 1_000);
        info!(
            "{}: initialized for {}:{}",
            self.core.tag(),
            self.device_host,
            self.device_port
        );
        Ok(())
    }

    fn execute(&mut self, services: &mut dyn OrchestratorPort) -> ExecutionResult {
        let started_ms = services.now_ms();
        self.core.set_state(ComponentState::Executing);
        let now = services.now_ms();

        let mut deferred_until = None;
        let polled = match self.poll_status(services) {
            Ok(ok) => ok,
            Err(retry_at) => {
                deferred_until = Some(retry_at.max(now + self.check_interval_ms));
                false
            }
        };

        if polled
            && self.enable_movement
            && self.target_commanded
            && self.target_position != self.current_position
        {
            debug!(
                "{}: position {} -> target {}",
                self.core.tag(),
                self.current_position,
                self.target_position
            );
            self.send_move(services);
        }

        let data = json!({
            "timestamp_ms": now,
            "device_online": self.device_online,
            "current_position": self.current_position,
            "target_position": self.target_position,
            "current_lumens": self.current_lumens(),
            "communication_errors": self.communication_errors,
            "movement_enabled": self.enable_movement,
        });

        self.core
            .set_next_execution_ms(deferred_until.unwrap_or(now + self.check_interval_ms));
        self.core.mark_executed(now);
        self.core.store_last_data(data.clone());
        self.core.set_state(ComponentState::Ready);

        let elapsed = services.now_ms().saturating_sub(started_ms) as u32;
        if polled {
            ExecutionResult::ok(data, elapsed)
        } else {
            ExecutionResult {
                success: false,
                message: if deferred_until.is_some() {
                    "device poll deferred".to_string()
                } else {
                    "device unreachable".to_string()
                },
                data,
                elapsed_ms: elapsed,
            }
        }
    }

    fn cleanup(&mut self) {
        info!("{}: cleanup", self.core.tag());
    }

    fn supported_actions(&self) -> Vec<ActionSpec> {
        vec![
            ActionSpec::new("set_position", "Move the dimmer to a position")
                .timeout(10_000)
                .param(ParamSpec::integer("position", 0.0, 100.0)),
            ActionSpec::new("set_lumens", "Target a lumen output")
                .timeout(10_000)
                .param(ParamSpec::float("lumens", 0.0, 100_000.0)),
            ActionSpec::new("get_status", "Device status snapshot")
                .timeout(3_000)
                .any_state(),
        ]
    }

    fn perform_action(
        &mut self,
        action: &str,
        params: &Value,
        services: &mut dyn OrchestratorPort,
    ) -> ActionResult {
        match action {
            "set_position" => {
                if !self.enable_movement {
                    return ActionResult::failure("movement disabled by configuration");
                }
                let position = params["position"].as_i64().unwrap_or(0) as i32;
                self.target_position = position.clamp(0, 100);
                self.target_commanded = true;
                // Move immediately rather than waiting for the poll.
                if self.send_move(services) {
                    ActionResult::ok(format!("position set to {}%", self.target_position))
                } else {
                    ActionResult::failure("device rejected move command")
                }
            }
            "set_lumens" => {
                if !self.enable_movement {
                    return ActionResult::failure("movement disabled by configuration");
                }
                let lumens = params["lumens"].as_f64().unwrap_or(0.0) as f32;
                self.target_position = self.position_from_lumens(lumens);
                self.target_commanded = true;
                if self.send_move(services) {
                    ActionResult::ok(format!(
                        "targeting {lumens:.0} lm at {}%",
                        self.target_position
                    ))
                    .with_data(json!({"position": self.target_position}))
                } else {
                    ActionResult::failure("device rejected move command")
                }
            }
            "get_status" => ActionResult::ok("").with_data(json!({
                "device_online": self.device_online,
                "current_position": self.current_position,
                "target_position": self.target_position,
                "current_lumens": self.current_lumens(),
                "communication_errors": self.communication_errors,
            })),
            other => ActionResult::failure(format!("unknown action: {other}")),
        }
    }

    fn core_data(&self) -> Value {
        json!({
            "position": self.current_position,
            "lumens": self.current_lumens(),
            "online": self.device_online,
            "timestamp_ms": self.core.last_execution_ms(),
        })
    }
}
