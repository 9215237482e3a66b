//! Orchestrator — component registry and cooperative scheduler.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                       Orchestrator                           │
//! │                                                              │
//! │  tick() ─▶ for each registered component, in order:          │
//! │              ready?  =  READY && (count==0 || now >= wake)   │
//! │              yes ──▶ take slot ──▶ execute(bus) ──▶ restore  │
//! │                                                              │
//! │  bus (OrchestratorPort): call_action · reschedule ·          │
//! │                          fetch_remote · save config          │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Scheduling is round-robin in registration order, non-preemptive, one
//! unit of work per ready component per tick. A failing component is
//! logged and counted but never halts the loop or touches its
//! neighbours.
//!
//! While a component executes, its registry slot is empty — a handler
//! that tries to reach back into its own id gets "component not found",
//! which is what makes reentrancy structurally impossible rather than
//! merely discouraged.

use log::{debug, info, warn};
use serde_json::{json, Map, Value};

use crate::component::action::ActionResult;
use crate::component::{Component, ComponentState, ExecutionResult};
use crate::config::{SystemConfig, MAX_SYSTEM_CHECK_MS, MIN_SYSTEM_CHECK_MS};
use crate::diagnostics::ResourceSnapshot;
use crate::http::RemoteFetcher;
use crate::ports::{Clock, ConfigStore, HttpFetch, OrchestratorPort};

/// Recreates components from their stored `component_kind` tags during
/// bootstrap. Lives with the board wiring, since construction needs
/// hardware ports.
pub trait ComponentFactory {
    fn create(&self, id: &str, kind: &str) -> Option<Box<dyn Component>>;
}

type Slot = Option<Box<dyn Component>>;

pub struct Orchestrator {
    components: Vec<Slot>,
    store: Box<dyn ConfigStore>,
    fetcher: RemoteFetcher,
    clock: Box<dyn Clock>,
    config: SystemConfig,

    initialized: bool,
    running: bool,
    start_ms: u64,
    last_system_check_ms: u64,

    total_executions: u64,
    total_errors: u64,
    loop_count: u64,
}

impl Orchestrator {
    pub fn new(store: Box<dyn ConfigStore>, http: Box<dyn HttpFetch>, clock: Box<dyn Clock>) -> Self {
        Self {
            components: Vec::new(),
            store,
            fetcher: RemoteFetcher::new(http),
            clock,
            config: SystemConfig::default(),
            initialized: false,
            running: false,
            start_ms: 0,
            last_system_check_ms: 0,
            total_executions: 0,
            total_errors: 0,
            loop_count: 0,
        }
    }

    /// Bring the orchestrator up: load system configuration and start
    /// the loop. Components are installed separately.
    pub fn init(&mut self) {
        info!("orchestrator: initializing");
        self.start_ms = self.clock.now_ms();
        self.last_system_check_ms = self.start_ms;
        self.load_system_config();
        self.fetcher.set_default_timeout(self.config.http_timeout_ms);
        self.initialized = true;
        self.running = true;
        info!("orchestrator: initialization complete");
    }

    /// Cleanup every component and persist system configuration.
    pub fn shutdown(&mut self) {
        if !self.running {
            return;
        }
        info!("orchestrator: shutting down");
        self.running = false;

        for slot in &mut self.components {
            if let Some(component) = slot.as_mut() {
                debug!("orchestrator: cleaning up {}", component.core().id());
                component.cleanup();
            }
        }
        self.components.clear();
        self.save_system_config();
        info!("orchestrator: shutdown complete");
    }

    // ── Component management ──────────────────────────────────

    /// Register an already-initialized component. Rejects duplicate ids
    /// and a registry at capacity.
    pub fn register_component(&mut self, component: Box<dyn Component>) -> bool {
        let id = component.core().id().to_string();

        if self.position_of(&id).is_some() {
            warn!("orchestrator: component already registered: {id}");
            return false;
        }
        if self.component_count() >= self.config.max_components {
            log::error!(
                "orchestrator: component limit reached ({})",
                self.config.max_components
            );
            return false;
        }

        info!(
            "orchestrator: registered {id} ({})",
            component.core().kind()
        );
        self.components.push(Some(component));
        true
    }

    /// Initialize a component against the store, then register it.
    /// The failed component is dropped on either failure.
    pub fn install_component(
        &mut self,
        mut component: Box<dyn Component>,
        config: &Value,
    ) -> bool {
        let now = self.clock.now_ms();
        let id = component.core().id().to_string();
        if let Err(e) = component.initialize(config, self.store.as_mut(), now) {
            log::error!("orchestrator: failed to initialize {id}: {e}");
            return false;
        }
        self.register_component(component)
    }

    /// Recreate components from stored configurations via the factory.
    /// Returns how many came up; the caller falls back to a default set
    /// when none did.
    pub fn bootstrap_components(&mut self, factory: &dyn ComponentFactory) -> usize {
        let stored_ids = self.store.list_component_configs();
        info!(
            "orchestrator: found {} stored component configurations",
            stored_ids.len()
        );

        let mut loaded = 0;
        for id in stored_ids {
            let kind = match self.store.load_component_config(&id) {
                Ok(config) => config
                    .get("component_kind")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                Err(e) => {
                    warn!("orchestrator: cannot load stored config for {id}: {e}");
                    continue;
                }
            };
            if kind.is_empty() {
                warn!("orchestrator: stored config for {id} lacks component_kind, skipping");
                continue;
            }

            let Some(component) = factory.create(&id, &kind) else {
                warn!("orchestrator: unknown component kind '{kind}' for {id}");
                continue;
            };
            // Empty override: the stored blob drives hydration.
            if self.install_component(component, &Value::Null) {
                loaded += 1;
            }
        }

        info!("orchestrator: loaded {loaded} components from storage");
        loaded
    }

    /// Cleanup and remove a component. `false` if the id is unknown.
    pub fn unregister_component(&mut self, id: &str) -> bool {
        let Some(index) = self.position_of(id) else {
            warn!("orchestrator: component not found for unregistration: {id}");
            return false;
        };

        if let Some(mut component) = self.components.remove(index) {
            component.cleanup();
        }
        info!("orchestrator: unregistered {id}");
        true
    }

    pub fn find_component(&self, id: &str) -> Option<&dyn Component> {
        self.components
            .iter()
            .filter_map(Option::as_deref)
            .find(|c| c.core().id() == id)
    }

    pub fn find_component_mut(&mut self, id: &str) -> Option<&mut (dyn Component + 'static)> {
        self.components
            .iter_mut()
            .filter_map(|slot| slot.as_deref_mut())
            .find(|c| c.core().id() == id)
    }

    pub fn component_count(&self) -> usize {
        self.components.iter().filter(|s| s.is_some()).count()
    }

    pub fn component_ids(&self) -> Vec<String> {
        self.components
            .iter()
            .filter_map(Option::as_deref)
            .map(|c| c.core().id().to_string())
            .collect()
    }

    /// Let one component (or an API caller) reschedule another.
    pub fn update_next_check(&mut self, id: &str, wake_at_ms: u64) -> bool {
        let Some(component) = self.find_component_mut(id) else {
            warn!("orchestrator: cannot update schedule, component not found: {id}");
            return false;
        };
        let old = component.core().next_execution_ms();
        component.core_mut().set_next_execution_ms(wake_at_ms);
        debug!("orchestrator: schedule for {id}: {old} ms -> {wake_at_ms} ms");
        true
    }

    // ── Scheduler loop ────────────────────────────────────────

    /// One cooperative tick: execute every due component once, then run
    /// the periodic system check if its cadence elapsed.
    pub fn tick(&mut self) {
        if !self.initialized || !self.running {
            return;
        }
        self.loop_count += 1;

        if !self.config.loop_paused {
            let executed = self.execute_ready_components();
            if executed > 0 {
                debug!("orchestrator: executed {executed} components");
            }
        }

        let now = self.clock.now_ms();
        if now.saturating_sub(self.last_system_check_ms) >= self.config.system_check_interval_ms {
            self.perform_system_check();
            self.last_system_check_ms = now;
        }
    }

    fn execute_ready_components(&mut self) -> usize {
        let mut executed = 0;
        for index in 0..self.components.len() {
            let due = {
                let Some(component) = self.components[index].as_deref() else {
                    continue;
                };
                component.core().is_ready_to_execute(self.clock.now_ms())
            };
            if !due {
                continue;
            }

            let Some(mut component) = self.components[index].take() else {
                continue;
            };
            debug!("orchestrator: executing {}", component.core().id());
            let result = {
                let mut bus = Services { orch: self };
                component.execute(&mut bus)
            };
            self.handle_execution_result(component.as_ref(), &result);
            self.components[index] = Some(component);
            executed += 1;
        }
        executed
    }

    fn handle_execution_result(&mut self, component: &dyn Component, result: &ExecutionResult) {
        self.total_executions += 1;
        if result.success {
            debug!(
                "orchestrator: {} executed ({} ms)",
                component.core().id(),
                result.elapsed_ms
            );
        } else {
            self.total_errors += 1;
            warn!(
                "orchestrator: {} execution failed: {}",
                component.core().id(),
                result.message
            );
        }
    }

    /// Advisory health sweep: log error-state components and resource
    /// pressure. Never remediates.
    fn perform_system_check(&mut self) {
        debug!("orchestrator: system health check");

        let snapshot = ResourceSnapshot::collect(self.uptime_ms());
        if !snapshot.is_healthy() {
            warn!(
                "orchestrator: resource pressure (heap free {} B, largest block {} B)",
                snapshot.heap_free, snapshot.largest_free_block
            );
        }

        let mut error_components = 0;
        for component in self.components.iter().filter_map(Option::as_deref) {
            if component.core().state() == ComponentState::Error {
                error_components += 1;
                warn!(
                    "orchestrator: component in error state: {} - {}",
                    component.core().id(),
                    component.core().last_error()
                );
            }
        }
        if error_components > 0 {
            warn!("orchestrator: {error_components} components in error state");
        }

        info!(
            "orchestrator: uptime {} s, {} components, {} executions, {} errors",
            self.uptime_ms() / 1000,
            self.component_count(),
            self.total_executions,
            self.total_errors
        );
    }

    // ── Inter-component actions & remote fetch ────────────────

    /// Dispatch an action to a component by id — the sole cross-
    /// component coordination path, shared with external API callers.
    pub fn execute_component_action(
        &mut self,
        id: &str,
        action: &str,
        params: &Value,
    ) -> ActionResult {
        let Some(index) = self.position_of(id) else {
            let mut result = ActionResult::failure(format!("component not found: {id}"));
            result.action = action.to_string();
            return result;
        };

        let state = self.components[index]
            .as_deref()
            .map(|c| c.core().state());
        match state {
            Some(ComponentState::Error) => {
                let mut result = ActionResult::failure(format!(
                    "cannot execute action on component in ERROR state: {id}"
                ));
                result.action = action.to_string();
                return result;
            }
            Some(ComponentState::Disabled) => {
                let mut result =
                    ActionResult::failure(format!("cannot execute action on disabled component: {id}"));
                result.action = action.to_string();
                return result;
            }
            _ => {}
        }

        let Some(mut component) = self.components[index].take() else {
            let mut result = ActionResult::failure(format!("component not found: {id}"));
            result.action = action.to_string();
            return result;
        };
        let result = {
            let mut bus = Services { orch: self };
            component.execute_action(action, params, &mut bus)
        };
        self.components[index] = Some(component);

        if result.success {
            debug!("orchestrator: action {id}/{action} completed ({} ms)", result.elapsed_ms);
        } else {
            warn!("orchestrator: action {id}/{action} failed: {}", result.message);
        }
        result
    }

    /// Backoff-aware remote JSON fetch on behalf of components.
    pub fn fetch_remote(&mut self, url: &str, timeout_ms: u32) -> Value {
        let now = self.clock.now_ms();
        self.fetcher.get_json(url, timeout_ms, now)
    }

    // ── System status ─────────────────────────────────────────

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn uptime_ms(&self) -> u64 {
        self.clock.now_ms().saturating_sub(self.start_ms)
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    pub fn system_stats(&self) -> Value {
        let mut states = Map::new();
        for component in self.components.iter().filter_map(Option::as_deref) {
            states.insert(
                component.core().id().to_string(),
                json!(component.core().state().as_str()),
            );
        }

        json!({
            "uptime_ms": self.uptime_ms(),
            "component_count": self.component_count(),
            "total_executions": self.total_executions,
            "total_errors": self.total_errors,
            "loop_count": self.loop_count,
            "initialized": self.initialized,
            "running": self.running,
            "resources": ResourceSnapshot::collect(self.uptime_ms()).to_json(),
            "component_states": Value::Object(states),
            "url_failures": self.fetcher.tracker().stats_json(),
        })
    }

    /// Health classification: `degraded` when anything is in error,
    /// `critical` when components exist but none are ready.
    pub fn health_status(&self) -> Value {
        let snapshot = ResourceSnapshot::collect(self.uptime_ms());
        let mut components = Map::new();
        let mut healthy = 0usize;
        let mut errors = 0usize;

        for component in self.components.iter().filter_map(Option::as_deref) {
            let id = component.core().id().to_string();
            match component.core().state() {
                ComponentState::Ready => {
                    components.insert(id, json!("healthy"));
                    healthy += 1;
                }
                ComponentState::Error => {
                    components.insert(id, json!("error"));
                    errors += 1;
                }
                other => {
                    components.insert(id, json!(other.as_str()));
                }
            }
        }

        let overall = if errors > 0 {
            "degraded"
        } else if healthy == 0 && self.component_count() > 0 {
            "critical"
        } else {
            "healthy"
        };

        let heap_health = if snapshot.is_healthy() { "good" } else { "critical" };
        json!({
            "overall": overall,
            "timestamp_ms": self.clock.now_ms(),
            "resources": {
                "heap_free": snapshot.heap_free,
                "heap_health": heap_health,
            },
            "components": Value::Object(components),
            "healthy_components": healthy,
            "error_components": errors,
        })
    }

    // ── Execution loop control ────────────────────────────────

    pub fn pause_loop(&mut self) -> bool {
        if !self.initialized {
            return false;
        }
        self.config.loop_paused = true;
        info!("orchestrator: execution loop paused");
        true
    }

    pub fn resume_loop(&mut self) -> bool {
        if !self.initialized {
            return false;
        }
        self.config.loop_paused = false;
        info!("orchestrator: execution loop resumed");
        true
    }

    pub fn is_loop_paused(&self) -> bool {
        self.config.loop_paused
    }

    pub fn loop_config(&self) -> Value {
        json!({
            "paused": self.config.loop_paused,
            "system_check_interval_ms": self.config.system_check_interval_ms,
            "max_components": self.config.max_components,
            "total_executions": self.total_executions,
            "total_errors": self.total_errors,
            "loop_count": self.loop_count,
            "uptime_ms": self.uptime_ms(),
        })
    }

    /// Apply loop settings from an API caller and persist them. An
    /// out-of-range check interval rejects the whole update.
    pub fn update_loop_config(&mut self, config: &Value) -> bool {
        if !self.initialized {
            return false;
        }

        if let Some(interval) = config
            .get("system_check_interval_ms")
            .and_then(Value::as_u64)
        {
            if !(MIN_SYSTEM_CHECK_MS..=MAX_SYSTEM_CHECK_MS).contains(&interval) {
                warn!("orchestrator: invalid system check interval: {interval}");
                return false;
            }
            self.config.system_check_interval_ms = interval;
            info!("orchestrator: system check interval set to {interval} ms");
        }

        if let Some(paused) = config.get("paused").and_then(Value::as_bool) {
            if paused {
                self.pause_loop();
            } else {
                self.resume_loop();
            }
        }

        self.save_system_config();
        true
    }

    // ── System configuration ──────────────────────────────────

    pub fn config(&self) -> &SystemConfig {
        &self.config
    }

    pub fn store_mut(&mut self) -> &mut dyn ConfigStore {
        self.store.as_mut()
    }

    fn load_system_config(&mut self) {
        match self.store.load_system_config() {
            Ok(blob) => {
                self.config = SystemConfig::from_value(&blob);
                info!("orchestrator: system configuration loaded");
            }
            Err(_) => {
                info!("orchestrator: no system configuration found, using defaults");
            }
        }
    }

    pub fn save_system_config(&mut self) {
        if let Err(e) = self.store.save_system_config(&self.config.to_value()) {
            log::error!("orchestrator: failed to save system configuration: {e}");
        } else {
            debug!("orchestrator: system configuration saved");
        }
    }

    // ── Internal ──────────────────────────────────────────────

    fn position_of(&self, id: &str) -> Option<usize> {
        self.components.iter().position(|slot| {
            slot.as_deref()
                .is_some_and(|c| c.core().id() == id)
        })
    }
}

// ---------------------------------------------------------------------------
// Service bus handed to executing components
// ---------------------------------------------------------------------------

/// [`OrchestratorPort`] implementation borrowing the orchestrator while
/// one component's slot is checked out.
struct Services<'a> {
    orch: &'a mut Orchestrator,
}

impl OrchestratorPort for Services<'_> {
    fn now_ms(&self) -> u64 {
        self.orch.clock.now_ms()
    }

    fn call_action(&mut self, component_id: &str, action: &str, params: &Value) -> ActionResult {
        self.orch.execute_component_action(component_id, action, params)
    }

    fn reschedule(&mut self, component_id: &str, wake_at_ms: u64) -> bool {
        self.orch.update_next_check(component_id, wake_at_ms)
    }

    fn fetch_remote(&mut self, url: &str, timeout_ms: u32) -> Value {
        self.orch.fetch_remote(url, timeout_ms)
    }

    fn save_component_config(&mut self, id: &str, config: &Value) -> bool {
        match self.orch.store.save_component_config(id, config) {
            Ok(()) => true,
            Err(e) => {
                warn!("orchestrator: config persist for {id} failed: {e}");
                false
            }
        }
    }
}
