//! Component contract — lifecycle, configuration hydration, actions.
//!
//! Every capability in the system (sensor, actuator, coordinator) is a
//! [`Component`]: a named, typed, stateful unit of work the orchestrator
//! schedules cooperatively.
//!
//! ```text
//!  UNINITIALIZED ──▶ INITIALIZING ──▶ READY ⇄ EXECUTING
//!                         │             │
//!                         └──────▶    ERROR ──(clear_error)──▶ READY
//!                                       │
//!                  DISABLED ◀───────────┘  (administrative, any state)
//! ```
//!
//! The trait splits into two layers: *required* methods each concrete
//! component supplies (schema, config serialization/application, the
//! actual work, the action table) and *provided* methods implementing the
//! shared protocol — configuration hydration with persistent-storage
//! reconciliation, and parameter-validated action dispatch. Concrete
//! components must not reimplement the provided layer.

pub mod action;
pub mod schema;

use log::{debug, info, warn};
use serde_json::{json, Value};

use crate::error::{ComponentError, Result};
use crate::ports::{ConfigStore, OrchestratorPort};
use action::{validate_params, ActionResult, ActionSpec};
use schema::ConfigSchema;

// ---------------------------------------------------------------------------
// Component state
// ---------------------------------------------------------------------------

/// Component execution states.
///
/// Only `Ready` components are eligible for execution. `Executing` is
/// transient and always returns to `Ready` or `Error` within one
/// execution cycle. `Error` is recoverable only via
/// [`ComponentCore::clear_error`]. `Disabled` is administrative and
/// excluded from scheduling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentState {
    Uninitialized,
    Initializing,
    Ready,
    Executing,
    Error,
    Disabled,
}

impl ComponentState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Uninitialized => "UNINITIALIZED",
            Self::Initializing => "INITIALIZING",
            Self::Ready => "READY",
            Self::Executing => "EXECUTING",
            Self::Error => "ERROR",
            Self::Disabled => "DISABLED",
        }
    }
}

// ---------------------------------------------------------------------------
// Execution result
// ---------------------------------------------------------------------------

/// Outcome of one `execute()` cycle.
#[derive(Debug, Clone, Default)]
pub struct ExecutionResult {
    pub success: bool,
    pub message: String,
    pub data: Value,
    pub elapsed_ms: u32,
}

impl ExecutionResult {
    pub fn ok(data: Value, elapsed_ms: u32) -> Self {
        Self {
            success: true,
            message: String::new(),
            data,
            elapsed_ms,
        }
    }

    pub fn failure(message: impl Into<String>, elapsed_ms: u32) -> Self {
        Self {
            success: false,
            message: message.into(),
            data: Value::Null,
            elapsed_ms,
        }
    }
}

// ---------------------------------------------------------------------------
// Shared bookkeeping
// ---------------------------------------------------------------------------

/// Identity, state, and execution-timing bookkeeping common to every
/// component. Concrete components embed one and expose it through
/// [`Component::core`] / [`Component::core_mut`].
pub struct ComponentCore {
    id: String,
    kind: &'static str,
    name: String,
    tag: String,
    state: ComponentState,
    last_error: String,
    next_execution_ms: u64,
    last_execution_ms: u64,
    execution_count: u32,
    error_count: u32,
    last_data: Value,
}

impl ComponentCore {
    pub fn new(id: impl Into<String>, kind: &'static str, name: impl Into<String>) -> Self {
        let id = id.into();
        let tag = format!("{kind}:{id}");
        debug!("{tag}: component created");
        Self {
            id,
            kind,
            name: name.into(),
            tag,
            state: ComponentState::Uninitialized,
            last_error: String::new(),
            next_execution_ms: 0,
            last_execution_ms: 0,
            execution_count: 0,
            error_count: 0,
            last_data: Value::Null,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// `kind:id` log prefix.
    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn state(&self) -> ComponentState {
        self.state
    }

    pub fn set_state(&mut self, new_state: ComponentState) {
        if self.state != new_state {
            info!(
                "{}: state {} -> {}",
                self.tag,
                self.state.as_str(),
                new_state.as_str()
            );
            self.state = new_state;
        }
    }

    /// Record a failure: message, error counter, `Error` state.
    pub fn set_error(&mut self, error: impl Into<String>) {
        self.last_error = error.into();
        self.error_count += 1;
        log::error!("{}: {}", self.tag, self.last_error);
        self.set_state(ComponentState::Error);
    }

    /// Explicit recovery: the only path out of `Error`.
    pub fn clear_error(&mut self) {
        self.last_error.clear();
        if self.state == ComponentState::Error {
            self.set_state(ComponentState::Ready);
        }
    }

    pub fn last_error(&self) -> &str {
        &self.last_error
    }

    pub fn error_count(&self) -> u32 {
        self.error_count
    }

    pub fn execution_count(&self) -> u32 {
        self.execution_count
    }

    pub fn next_execution_ms(&self) -> u64 {
        self.next_execution_ms
    }

    pub fn set_next_execution_ms(&mut self, wake_at_ms: u64) {
        self.next_execution_ms = wake_at_ms;
    }

    pub fn last_execution_ms(&self) -> u64 {
        self.last_execution_ms
    }

    /// Scheduling eligibility.
    ///
    /// Cold-start guarantee: a component that has never executed is due
    /// immediately regardless of `next_execution_ms`, as long as it is
    /// `Ready`.
    pub fn is_ready_to_execute(&self, now_ms: u64) -> bool {
        self.state == ComponentState::Ready
            && (self.execution_count == 0 || now_ms >= self.next_execution_ms)
    }

    /// Execution-stats updater: call from every `execute()`.
    pub fn mark_executed(&mut self, now_ms: u64) {
        self.last_execution_ms = now_ms;
        self.execution_count += 1;
    }

    /// Snapshot of the last execution's data, for API/dashboard access.
    pub fn store_last_data(&mut self, data: Value) {
        self.last_data = data;
    }

    pub fn last_data(&self) -> &Value {
        &self.last_data
    }

    /// Execution statistics view.
    pub fn statistics(&self, now_ms: u64) -> Value {
        json!({
            "component_id": self.id,
            "component_kind": self.kind,
            "state": self.state.as_str(),
            "execution_count": self.execution_count,
            "error_count": self.error_count,
            "last_execution_ms": self.last_execution_ms,
            "next_execution_ms": self.next_execution_ms,
            "uptime_ms": now_ms,
        })
    }
}

// ---------------------------------------------------------------------------
// Component trait
// ---------------------------------------------------------------------------

/// The component contract.
///
/// Concrete components implement the required methods; the provided
/// methods carry the shared hydration and action protocols and must not
/// be overridden.
pub trait Component {
    // ── Required: identity & bookkeeping ──────────────────────

    fn core(&self) -> &ComponentCore;
    fn core_mut(&mut self) -> &mut ComponentCore;

    // ── Required: configuration ───────────────────────────────

    /// The baseline schema with a default for every property. Must never
    /// be empty — an empty schema is a programming error and fails
    /// initialization.
    fn default_schema(&self) -> ConfigSchema;

    /// Serialize every live field (including the `config_version`
    /// marker) into the schema's configuration shape.
    fn current_config(&self) -> Value;

    /// Apply a configuration with fallback-to-current semantics: a
    /// missing or mistyped field keeps its current value. Partial
    /// updates therefore never destroy unspecified fields, and missing
    /// fields are never an error.
    fn apply_config(&mut self, config: &Value) -> Result<()>;

    // ── Required: lifecycle work ──────────────────────────────

    /// Acquire hardware/resources and set the first wake time.
    fn init_hardware(&mut self, now_ms: u64) -> Result<()>;

    /// One unit of work. Must set `Executing`, do the work, call
    /// [`ComponentCore::mark_executed`], set the next wake time, and
    /// return to `Ready` (or `Error` on failure).
    fn execute(&mut self, services: &mut dyn OrchestratorPort) -> ExecutionResult;

    /// Release resources. Idempotent.
    fn cleanup(&mut self);

    // ── Required: actions ─────────────────────────────────────

    /// The action table for this component type.
    fn supported_actions(&self) -> Vec<ActionSpec>;

    /// Component-specific action handler. Parameters arrive already
    /// validated against the declared constraints.
    fn perform_action(
        &mut self,
        action: &str,
        params: &Value,
        services: &mut dyn OrchestratorPort,
    ) -> ActionResult;

    // ── Optional: dashboard data ──────────────────────────────

    /// Essential-values subset of the last execution data for
    /// lightweight dashboard display. Defaults to the full snapshot.
    fn core_data(&self) -> Value {
        self.core().last_data().clone()
    }

    // ── Provided: configuration hydration protocol ────────────

    /// Initialize the component: hydrate configuration, apply it,
    /// acquire hardware, transition to `Ready`.
    ///
    /// Hydration is the self-healing expand-and-resave algorithm:
    ///
    /// 1. A non-empty `config` is an override: schema defaults merged
    ///    with it (override wins key-by-key) are applied and persisted,
    ///    always overwriting any previously stored configuration.
    /// 2. An empty `config` loads the stored blob if present and applies
    ///    it; if the live configuration serialized back has strictly
    ///    more top-level fields than the stored blob, the expanded
    ///    version is re-saved (new schema fields picked up their
    ///    defaults and are now persisted).
    /// 3. With nothing stored, schema defaults are applied and saved as
    ///    the initial snapshot.
    ///
    /// A persist failure is logged but does not fail initialization;
    /// schema, apply, and hardware failures do, recording the error and
    /// leaving the component in `Error`.
    fn initialize(
        &mut self,
        config: &Value,
        store: &mut dyn ConfigStore,
        now_ms: u64,
    ) -> Result<()> {
        self.core_mut().set_state(ComponentState::Initializing);

        let component_schema = self.default_schema();
        if component_schema.is_empty() {
            self.core_mut().set_error("default schema is empty");
            return Err(ComponentError::EmptySchema);
        }

        let id = self.core().id().to_string();
        let tag = self.core().tag().to_string();

        if !schema::is_empty_config(config) {
            // Override path: defaults + override, override wins; the
            // merged snapshot replaces whatever was stored before.
            let merged = schema::merge(&component_schema.defaults(), config);
            if let Err(e) = self.apply_config(&merged) {
                self.core_mut().set_error(format!("apply failed: {e}"));
                return Err(e);
            }
            // Exactly merge(defaults, override) goes to storage; any extra
            // live-only fields get folded in by the next expand-and-resave.
            persist(store, &id, &tag, &merged);
        } else {
            match store.load_component_config(&id) {
                Ok(stored) => {
                    if let Err(e) = self.apply_config(&stored) {
                        self.core_mut().set_error(format!("stored config rejected: {e}"));
                        return Err(e);
                    }
                    let live = self.current_config();
                    if schema::field_count(&live) > schema::field_count(&stored) {
                        info!(
                            "{tag}: stored config expanded {} -> {} fields, re-saving",
                            schema::field_count(&stored),
                            schema::field_count(&live)
                        );
                        persist(store, &id, &tag, &live);
                    }
                }
                Err(e) => {
                    if e != crate::error::StorageError::NotFound {
                        // A corrupted blob is recoverable: fall back to
                        // defaults and overwrite it.
                        warn!("{tag}: stored config unreadable ({e}), rebuilding from defaults");
                    }
                    let defaults = component_schema.defaults();
                    if let Err(e) = self.apply_config(&defaults) {
                        self.core_mut().set_error(format!("defaults rejected: {e}"));
                        return Err(e);
                    }
                    info!("{tag}: no stored config, saving defaults");
                    persist(store, &id, &tag, &self.current_config());
                }
            }
        }

        if let Err(e) = self.init_hardware(now_ms) {
            self.core_mut().set_error(format!("hardware init failed: {e}"));
            return Err(e);
        }

        self.core_mut().set_state(ComponentState::Ready);
        Ok(())
    }

    // ── Provided: action execution protocol ───────────────────

    /// Execute a named action with parameter validation and state
    /// discipline: look up → Ready gate → validate → snapshot state,
    /// `Executing`, handler, restore → timed result. Handler failures
    /// come back as result values; nothing propagates to the scheduler.
    fn execute_action(
        &mut self,
        name: &str,
        params: &Value,
        services: &mut dyn OrchestratorPort,
    ) -> ActionResult {
        let started_ms = services.now_ms();

        let Some(spec) = self
            .supported_actions()
            .into_iter()
            .find(|a| a.name == name)
        else {
            let mut result = ActionResult::failure(format!("action not supported: {name}"));
            result.action = name.to_string();
            return result;
        };

        let state = self.core().state();
        if spec.requires_ready && state != ComponentState::Ready {
            let mut result = ActionResult::failure(format!(
                "action '{name}' requires READY state (current: {})",
                state.as_str()
            ));
            result.action = name.to_string();
            return result;
        }

        if let Err(msg) = validate_params(&spec, params) {
            warn!("{}: action '{name}' rejected: {msg}", self.core().tag());
            let mut result = ActionResult::failure(msg);
            result.action = name.to_string();
            return result;
        }

        let prior = self.core().state();
        self.core_mut().set_state(ComponentState::Executing);
        let mut result = self.perform_action(name, params, services);
        self.core_mut().set_state(prior);

        result.action = name.to_string();
        result.elapsed_ms = services.now_ms().saturating_sub(started_ms) as u32;
        result
    }

    // ── Provided: API accessors ───────────────────────────────

    /// Full schema document for API consumers.
    fn schema_json(&self) -> Value {
        self.default_schema().to_json()
    }

    /// Declared actions for API consumers.
    fn actions_json(&self) -> Value {
        Value::Array(
            self.supported_actions()
                .iter()
                .map(ActionSpec::to_json)
                .collect(),
        )
    }
}

/// Best-effort config persist; a storage failure is advisory.
fn persist(store: &mut dyn ConfigStore, id: &str, tag: &str, config: &Value) {
    if let Err(e) = store.save_component_config(id, config) {
        warn!("{tag}: config persist failed: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::MemoryStore;
    use super::action::ParamSpec;
    use super::schema::PropertySpec;

    /// Minimal concrete component for protocol tests: two config fields,
    /// one gated action, one ungated action.
    struct Fixture {
        core: ComponentCore,
        interval_ms: u64,
        label: String,
        config_version: u32,
        pokes: u32,
    }

    impl Fixture {
        fn new(id: &str) -> Self {
            Self {
                core: ComponentCore::new(id, "Fixture", "Test Fixture"),
                interval_ms: 5000,
                label: "default".to_string(),
                config_version: 1,
                pokes: 0,
            }
        }
    }

    impl Component for Fixture {
        fn core(&self) -> &ComponentCore {
            &self.core
        }

        fn core_mut(&mut self) -> &mut ComponentCore {
            &mut self.core
        }

        fn default_schema(&self) -> ConfigSchema {
            ConfigSchema::new("Fixture", "protocol test fixture")
                .property(PropertySpec::integer("interval_ms", 5000, "wake cadence"))
                .property(PropertySpec::string("label", "default", "display label"))
        }

        fn current_config(&self) -> Value {
            json!({
                "interval_ms": self.interval_ms,
                "label": self.label,
                "config_version": self.config_version,
            })
        }

        fn apply_config(&mut self, config: &Value) -> Result<()> {
            self.interval_ms = schema::get_u64(config, "interval_ms", self.interval_ms);
            self.label = schema::get_string(config, "label", &self.label);
            self.config_version = schema::get_u32(config, "config_version", self.config_version);
            Ok(())
        }

        fn init_hardware(&mut self, now_ms: u64) -> Result<()> {
            self.core.set_next_execution_ms(now_ms + self.interval_ms);
            Ok(())
        }

        fn execute(&mut self, services: &mut dyn OrchestratorPort) -> ExecutionResult {
            let now = services.now_ms();
            self.core.set_state(ComponentState::Executing);
            self.core.mark_executed(now);
            self.core.set_next_execution_ms(now + self.interval_ms);
            self.core.set_state(ComponentState::Ready);
            ExecutionResult::ok(json!({"label": self.label}), 0)
        }

        fn cleanup(&mut self) {}

        fn supported_actions(&self) -> Vec<ActionSpec> {
            vec![
                ActionSpec::new("poke", "increment the poke counter")
                    .param(ParamSpec::integer("amount", 1.0, 10.0)),
                ActionSpec::new("status", "read counters").any_state(),
            ]
        }

        fn perform_action(
            &mut self,
            action: &str,
            params: &Value,
            _services: &mut dyn OrchestratorPort,
        ) -> ActionResult {
            match action {
                "poke" => {
                    let amount = params["amount"].as_u64().unwrap_or(1) as u32;
                    self.pokes += amount;
                    ActionResult::ok("poked").with_data(json!({"pokes": self.pokes}))
                }
                "status" => ActionResult::ok("").with_data(json!({"pokes": self.pokes})),
                other => ActionResult::failure(format!("unknown action: {other}")),
            }
        }
    }

    /// Bus stub with a fixed clock and no peers.
    struct StubBus {
        now: u64,
    }

    impl OrchestratorPort for StubBus {
        fn now_ms(&self) -> u64 {
            self.now
        }

        fn call_action(&mut self, id: &str, _action: &str, _params: &Value) -> ActionResult {
            ActionResult::failure(format!("component not found: {id}"))
        }

        fn reschedule(&mut self, _id: &str, _wake_at_ms: u64) -> bool {
            false
        }

        fn fetch_remote(&mut self, _url: &str, _timeout_ms: u32) -> Value {
            json!({"error": "no network"})
        }

        fn save_component_config(&mut self, _id: &str, _config: &Value) -> bool {
            true
        }
    }

    #[test]
    fn initialize_with_defaults_persists_snapshot() {
        let mut store = MemoryStore::new();
        let mut c = Fixture::new("fix-1");

        c.initialize(&Value::Null, &mut store, 1000).unwrap();

        assert_eq!(c.core().state(), ComponentState::Ready);
        let stored = store.load_component_config("fix-1").unwrap();
        assert_eq!(stored["interval_ms"], json!(5000));
        assert_eq!(stored["label"], json!("default"));
    }

    #[test]
    fn initialize_override_always_wins_over_stored() {
        let mut store = MemoryStore::new();
        store
            .save_component_config("fix-1", &json!({"interval_ms": 111, "label": "old"}))
            .unwrap();

        let mut c = Fixture::new("fix-1");
        c.initialize(&json!({"label": "fresh"}), &mut store, 0).unwrap();

        // Stored blob is exactly merge(defaults, override).
        let stored = store.load_component_config("fix-1").unwrap();
        assert_eq!(stored["interval_ms"], json!(5000));
        assert_eq!(stored["label"], json!("fresh"));
    }

    #[test]
    fn initialize_expands_and_resaves_smaller_stored_blob() {
        let mut store = MemoryStore::new();
        // A blob from an older firmware with fewer fields.
        store
            .save_component_config("fix-1", &json!({"interval_ms": 2500}))
            .unwrap();

        let mut c = Fixture::new("fix-1");
        c.initialize(&Value::Null, &mut store, 0).unwrap();

        assert_eq!(c.interval_ms, 2500); // stored value kept
        let stored = store.load_component_config("fix-1").unwrap();
        // Re-saved with the new fields merged in.
        assert!(stored.get("label").is_some());
        assert!(stored.get("config_version").is_some());
    }

    #[test]
    fn hydration_is_idempotent() {
        let mut c = Fixture::new("fix-1");
        c.apply_config(&json!({"interval_ms": 750, "label": "x"})).unwrap();

        let first = c.current_config();
        c.apply_config(&first).unwrap();
        let second = c.current_config();
        c.apply_config(&second).unwrap();

        assert_eq!(first, second);
        assert_eq!(second, c.current_config());
    }

    #[test]
    fn cold_start_guarantee() {
        let mut c = Fixture::new("fix-1");
        let mut store = MemoryStore::new();
        c.initialize(&Value::Null, &mut store, 1000).unwrap();

        // next_execution is in the future, but execution_count == 0.
        assert!(c.core().next_execution_ms() > 1000);
        assert!(c.core().is_ready_to_execute(1000));

        let mut bus = StubBus { now: 1000 };
        c.execute(&mut bus);
        // Now the schedule applies.
        assert!(!c.core().is_ready_to_execute(1000));
        assert!(c.core().is_ready_to_execute(1000 + 5000));
    }

    #[test]
    fn cold_start_does_not_override_state_gate() {
        let c = Fixture::new("fix-1");
        // Uninitialized, execution_count == 0: still not eligible.
        assert!(!c.core().is_ready_to_execute(0));
    }

    #[test]
    fn action_unknown_name_fails() {
        let mut c = Fixture::new("fix-1");
        let mut bus = StubBus { now: 0 };
        let result = c.execute_action("explode", &json!({}), &mut bus);
        assert!(!result.success);
        assert!(result.message.contains("not supported"));
    }

    #[test]
    fn action_ready_gate_enforced() {
        let mut c = Fixture::new("fix-1"); // still Uninitialized
        let mut bus = StubBus { now: 0 };

        let gated = c.execute_action("poke", &json!({"amount": 1}), &mut bus);
        assert!(!gated.success);
        assert!(gated.message.contains("READY"));

        // `status` is declared any-state and goes through.
        let open = c.execute_action("status", &json!({}), &mut bus);
        assert!(open.success);
    }

    #[test]
    fn action_validation_failure_prevents_handler() {
        let mut store = MemoryStore::new();
        let mut c = Fixture::new("fix-1");
        c.initialize(&Value::Null, &mut store, 0).unwrap();
        let mut bus = StubBus { now: 0 };

        let result = c.execute_action("poke", &json!({"amount": 99}), &mut bus);
        assert!(!result.success);
        assert_eq!(c.pokes, 0, "handler must not run on validation failure");
    }

    #[test]
    fn action_restores_prior_state() {
        let mut store = MemoryStore::new();
        let mut c = Fixture::new("fix-1");
        c.initialize(&Value::Null, &mut store, 0).unwrap();
        let mut bus = StubBus { now: 0 };

        let result = c.execute_action("poke", &json!({"amount": 3}), &mut bus);
        assert!(result.success);
        assert_eq!(result.action, "poke");
        assert_eq!(c.core().state(), ComponentState::Ready);
        assert_eq!(c.pokes, 3);
    }

    #[test]
    fn error_state_recovers_only_via_clear() {
        let mut c = Fixture::new("fix-1");
        c.core_mut().set_state(ComponentState::Ready);
        c.core_mut().set_error("boom");

        assert_eq!(c.core().state(), ComponentState::Error);
        assert_eq!(c.core().error_count(), 1);
        assert!(!c.core().is_ready_to_execute(u64::MAX));

        c.core_mut().clear_error();
        assert_eq!(c.core().state(), ComponentState::Ready);
        assert!(c.core().last_error().is_empty());
    }

    #[test]
    fn statistics_reflect_counters() {
        let mut c = Fixture::new("fix-1");
        c.core_mut().mark_executed(500);
        c.core_mut().mark_executed(900);

        let stats = c.core().statistics(1000);
        assert_eq!(stats["execution_count"], json!(2));
        assert_eq!(stats["last_execution_ms"], json!(900));
        assert_eq!(stats["component_kind"], json!("Fixture"));
    }
}
