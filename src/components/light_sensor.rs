//! Ambient light component (TSL2561-class sensor).
//!
//! Three sources, picked by configuration:
//!
//! - **remote** — another controller exposes the lux value over HTTP;
//!   fetched through the orchestrator's backoff-aware service. A
//!   `shouldDefer` answer reschedules this component to the indicated
//!   retry time instead of counting a failure.
//! - **local** — an I2C device behind [`LuxPort`].
//! - **mock** — pin 0 and no remote: synthetic daylight curve.

use log::{debug, info};
use serde_json::{json, Value};

use crate::component::action::{ActionResult, ActionSpec};
use crate::component::schema::{self, ConfigSchema, PropertySpec};
use crate::component::{Component, ComponentCore, ComponentState, ExecutionResult};
use crate::error::Result;
use crate::ports::{LuxPort, OrchestratorPort};

pub const KIND: &str = "LightSensor";

pub struct LightSensorComponent {
    core: ComponentCore,
    sensor: Option<Box<dyn LuxPort>>,

    // Persisted configuration
    use_remote: bool,
    remote_host: String,
    remote_port: u16,
    remote_path: String,
    http_timeout_ms: u32,
    sampling_interval_ms: u64,
    gpio_pin: u8,
    config_version: u32,

    // Live outputs
    lux: f32,
    has_reading: bool,
    failed_readings: u32,
    deferrals: u32,
    mock_counter: u32,
}

impl LightSensorComponent {
    pub fn new(id: impl Into<String>, name: impl Into<String>, sensor: Option<Box<dyn LuxPort>>) -> Self {
        Self {
            core: ComponentCore::new(id, KIND, name),
            sensor,
            use_remote: false,
            remote_host: String::new(),
            remote_port: 80,
            remote_path: "/light".to_string(),
            http_timeout_ms: 5_000,
            sampling_interval_ms: 3_000,
            gpio_pin: 0,
            config_version: 1,
            lux: 0.0,
            has_reading: false,
            failed_readings: 0,
            deferrals: 0,
            mock_counter: 0,
        }
    }

    pub fn lux(&self) -> f32 {
        self.lux
    }

    fn remote_url(&self) -> String {
        format!("http://{}:{}{}", self.remote_host, self.remote_port, self.remote_path)
    }

    fn mock_lux(&mut self) -> f32 {
        self.mock_counter += 1;
        let n = self.mock_counter as f32;
        // Slow synthetic daylight swing around 400 lx.
        400.0 + (n * 0.02).sin() * 250.0
    }

    /// Remote read through the fetch service. `Err(retry_at)` signals a
    /// deferral; `Ok(None)` a plain failure.
    fn read_remote(&mut self, services: &mut dyn OrchestratorPort) -> core::result::Result<Option<f32>, u64> {
        let response = services.fetch_remote(&self.remote_url(), self.http_timeout_ms);

        if response["shouldDefer"].as_bool().unwrap_or(false) {
            let retry_at = response["nextRetryMs"].as_u64().unwrap_or(0);
            return Err(retry_at);
        }
        if !response["success"].as_bool().unwrap_or(false) {
            return Ok(None);
        }
        Ok(response["lux"].as_f64().map(|v| v as f32))
    }

    fn reading_json(&self) -> Value {
        json!({
            "lux": self.lux,
            "valid": self.has_reading,
            "timestamp_ms": self.core.last_execution_ms(),
        })
    }
}

impl Component for LightSensorComponent {
    fn core(&self) -> &ComponentCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut ComponentCore {
        &mut self.core
    }

    fn default_schema(&self) -> ConfigSchema {
        ConfigSchema::new(KIND, "ambient light sensor, local or remote")
            .property(PropertySpec::boolean("use_remote", false, "fetch lux over HTTP"))
            .property(PropertySpec::string("remote_host", "", "remote sensor host"))
            .property(PropertySpec::integer("remote_port", 80, "remote sensor port").range(1.0, 65_535.0))
            .property(PropertySpec::string("remote_path", "/light", "remote sensor path"))
            .property(PropertySpec::integer("http_timeout_ms", 5_000, "fetch timeout"))
            .property(PropertySpec::integer("sampling_interval_ms", 3_000, "read cadence").range(250.0, 3_600_000.0))
            .property(PropertySpec::integer("gpio_pin", 0, "I2C enable pin (0 = mock when not remote)").range(0.0, 39.0))
    }

    fn current_config(&self) -> Value {
        json!({
            "component_kind": KIND,
            "config_version": self.config_version,
            "use_remote": self.use_remote,
            "remote_host": self.remote_host,
            "remote_port": self.remote_port,
            "remote_path": self.remote_path,
            "http_timeout_ms": self.http_timeout_ms,
            "sampling_interval_ms": self.sampling_interval_ms,
            "gpio_pin": self.gpio_pin,
        })
    }

    fn apply_config(&mut self, config: &Value) -> Result<()> {
        self.use_remote = schema::get_bool(config, "use_remote", self.use_remote);
        self.remote_host = schema::get_string(config, "remote_host", &self.remote_host);
        self.remote_port = schema::get_u16(config, "remote_port", self.remote_port);
        self.remote_path = schema::get_string(config, "remote_path", &self.remote_path);
        self.http_timeout_ms = schema::get_u32(config, "http_timeout_ms", self.http_timeout_ms);
        self.sampling_interval_ms =
            schema::get_u64(config, "sampling_interval_ms", self.sampling_interval_ms);
        self.gpio_pin = schema::get_u8(config, "gpio_pin", self.gpio_pin);
        self.config_version = schema::get_u32(config, "config_version", self.config_version);
        Ok(())
    }

    fn init_hardware(&mut self, now_ms: u64) -> Result<()> {
        self.core
            .set_next_execution_ms(now_ms + self.sampling_interval_ms);
        info!(
            "{}: initialized ({})",
            self.core.tag(),
            if self.use_remote {
                "remote"
            } else if self.sensor.is_some() && self.gpio_pin != 0 {
                "local"
            } else {
                "mock"
            }
        );
        Ok(())
    }

    fn execute(&mut self, services: &mut dyn OrchestratorPort) -> ExecutionResult {
        let started_ms = services.now_ms();
        self.core.set_state(ComponentState::Executing);
        let now = services.now_ms();

        let mut deferred_until = None;
        let reading = if self.use_remote {
            match self.read_remote(services) {
                Ok(lux) => lux,
                Err(retry_at) => {
                    deferred_until = Some(retry_at.max(now + self.sampling_interval_ms));
                    None
                }
            }
        } else if self.gpio_pin != 0 {
            self.sensor.as_mut().and_then(|s| s.read_lux())
        } else {
            Some(self.mock_lux())
        };

        let success = match reading {
            Some(lux) => {
                self.lux = lux.max(0.0);
                self.has_reading = true;
                true
            }
            None => {
                if deferred_until.is_none() {
                    self.failed_readings += 1;
                }
                false
            }
        };

        let source = if self.use_remote {
            "remote"
        } else if self.gpio_pin != 0 {
            "local"
        } else {
            "mock"
        };
        let data = json!({
            "timestamp_ms": now,
            "lux": self.lux,
            "valid": self.has_reading,
            "failed_readings": self.failed_readings,
            "deferrals": self.deferrals,
            "source": source,
        });

        // A deferral reschedules to the endpoint's retry window instead
        // of the normal cadence; that is the whole point of the signal.
        if let Some(retry_at) = deferred_until {
            self.deferrals += 1;
            debug!("{}: remote deferred until {} ms", self.core.tag(), retry_at);
            self.core.set_next_execution_ms(retry_at);
        } else {
            self.core.set_next_execution_ms(now + self.sampling_interval_ms);
        }
        self.core.mark_executed(now);
        self.core.store_last_data(data.clone());
        self.core.set_state(ComponentState::Ready);

        let elapsed = services.now_ms().saturating_sub(started_ms) as u32;
        if success {
            ExecutionResult::ok(data, elapsed)
        } else if deferred_until.is_some() {
            ExecutionResult {
                success: false,
                message: "remote fetch deferred".to_string(),
                data,
                elapsed_ms: elapsed,
            }
        } else {
            ExecutionResult {
                success: false,
                message: "light reading failed".to_string(),
                data,
                elapsed_ms: elapsed,
            }
        }
    }

    fn cleanup(&mut self) {
        info!("{}: cleanup", self.core.tag());
    }

    fn supported_actions(&self) -> Vec<ActionSpec> {
        vec![ActionSpec::new("get_reading", "Last lux reading")
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
