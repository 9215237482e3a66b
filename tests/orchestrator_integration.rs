//! Orchestrator integration tests over the real component fleet in mock
//! mode: registry behaviour, cooperative scheduling, fault isolation,
//! and the cross-component action paths.

mod common;

use common::{FixedClimate, ScriptedAdc, SimClock};
use serde_json::{json, Value};

use hydropod::component::{Component, ComponentState};
use hydropod::components::{ClimateComponent, PeristalticPumpComponent, PhSensorComponent};
use hydropod::orchestrator::Orchestrator;
use hydropod::ports::{ConfigStore, MemoryStore, NullHttp, RelayPort};

struct OkRelay;

impl RelayPort for OkRelay {
    fn set(&mut self, _pin: u8, _on: bool) -> bool {
        true
    }
}

fn mock_fleet(clock: &SimClock) -> Orchestrator {
    let mut orch = Orchestrator::new(
        Box::new(MemoryStore::new()),
        Box::new(NullHttp),
        Box::new(clock.clone()),
    );
    orch.init();

    assert!(orch.install_component(
        Box::new(ClimateComponent::new(
            "climate-1",
            "Room Climate",
            Box::new(FixedClimate(25.0, 55.0)),
        )),
        &json!({"gpio_pin": 0}),
    ));
    assert!(orch.install_component(
        Box::new(PhSensorComponent::new(
            "ph-sensor-1",
            "Reservoir pH",
            Box::new(ScriptedAdc::new(&[])),
        )),
        &json!({
            "gpio_pin": 0,
            "sample_size": 5,
            "reading_interval_ms": 500,
            "sampling_period_ms": 5_000,
            "temperature_source_id": "climate-1",
        }),
    ));
    assert!(orch.install_component(
        Box::new(PeristalticPumpComponent::new(
            "pump-1",
            "Nutrient A",
            Box::new(OkRelay),
        )),
        &json!({"pin_no": 26}),
    ));

    orch
}

#[test]
fn fleet_cold_start_executes_every_component_once() {
    let clock = SimClock::new();
    let mut orch = mock_fleet(&clock);

    orch.tick();

    for id in ["climate-1", "ph-sensor-1", "pump-1"] {
        assert_eq!(
            orch.find_component(id).unwrap().core().execution_count(),
            1,
            "{id} must run on the cold-start tick"
        );
    }
}

#[test]
fn components_self_pace_after_cold_start() {
    let clock = SimClock::new();
    let mut orch = mock_fleet(&clock);

    orch.tick();
    // Immediately again: nothing is due.
    orch.tick();
    assert_eq!(
        orch.find_component("climate-1").unwrap().core().execution_count(),
        1
    );

    // Probe paces fast while its window is open; pump idles for 30 s.
    clock.advance(500);
    orch.tick();
    assert_eq!(
        orch.find_component("ph-sensor-1").unwrap().core().execution_count(),
        2
    );
    assert_eq!(
        orch.find_component("pump-1").unwrap().core().execution_count(),
        1
    );
}

#[test]
fn mock_probe_produces_reading_through_scheduler() {
    let clock = SimClock::new();
    let mut orch = mock_fleet(&clock);

    // Run well past one full sampling window.
    for _ in 0..40 {
        orch.tick();
        clock.advance(500);
    }

    let snapshot = orch.find_component("ph-sensor-1").unwrap().core_data();
    let ph = snapshot["ph"].as_f64().unwrap();
    assert!(ph > 6.0 && ph < 8.0, "mock probe should read near neutral, got {ph}");
}

#[test]
fn probe_pulls_temperature_from_climate_component() {
    let clock = SimClock::new();
    let mut orch = Orchestrator::new(
        Box::new(MemoryStore::new()),
        Box::new(NullHttp),
        Box::new(clock.clone()),
    );
    orch.init();

    orch.install_component(
        Box::new(ClimateComponent::new(
            "climate-1",
            "Room Climate",
            Box::new(FixedClimate(31.0, 40.0)),
        )),
        &json!({"gpio_pin": 4}),
    );
    orch.install_component(
        Box::new(PhSensorComponent::new(
            "ph-sensor-1",
            "Reservoir pH",
            Box::new(ScriptedAdc::new(&[])),
        )),
        &json!({
            "gpio_pin": 0,
            "sample_size": 3,
            "reading_interval_ms": 500,
            "sampling_period_ms": 3_000,
            "temperature_source_id": "climate-1",
        }),
    );

    for _ in 0..20 {
        orch.tick();
        clock.advance(500);
    }

    let snapshot = orch.find_component("ph-sensor-1").unwrap().core_data();
    assert_eq!(snapshot["temperature_c"], json!(31.0));
}

#[test]
fn error_component_is_isolated_and_reported() {
    let clock = SimClock::new();
    let mut orch = mock_fleet(&clock);

    orch.find_component_mut("ph-sensor-1")
        .unwrap()
        .core_mut()
        .set_error("probe disconnected");

    orch.tick();

    // The rest of the fleet keeps running.
    assert_eq!(
        orch.find_component("climate-1").unwrap().core().execution_count(),
        1
    );
    assert_eq!(
        orch.find_component("ph-sensor-1").unwrap().core().execution_count(),
        0
    );

    let health = orch.health_status();
    assert_eq!(health["overall"], json!("degraded"));
    assert_eq!(health["components"]["ph-sensor-1"], json!("error"));
    assert_eq!(health["error_components"], json!(1));

    // Explicit recovery path.
    orch.find_component_mut("ph-sensor-1")
        .unwrap()
        .core_mut()
        .clear_error();
    assert_eq!(orch.health_status()["overall"], json!("healthy"));
}

#[test]
fn registry_capacity_blocks_new_registrations() {
    let clock = SimClock::new();
    let mut orch = Orchestrator::new(
        Box::new(MemoryStore::new()),
        Box::new(NullHttp),
        Box::new(clock.clone()),
    );
    orch.store_mut()
        .save_system_config(&json!({"max_components": 1}))
        .unwrap();
    orch.init();

    assert!(orch.install_component(
        Box::new(ClimateComponent::new(
            "climate-1",
            "Climate",
            Box::new(FixedClimate(25.0, 50.0)),
        )),
        &json!({"gpio_pin": 0}),
    ));
    assert!(!orch.install_component(
        Box::new(ClimateComponent::new(
            "climate-2",
            "Climate",
            Box::new(FixedClimate(25.0, 50.0)),
        )),
        &json!({"gpio_pin": 0}),
    ));
    assert_eq!(orch.component_count(), 1);
}

#[test]
fn external_action_dispatch_drives_pump() {
    let clock = SimClock::new();
    let mut orch = mock_fleet(&clock);

    let result = orch.execute_component_action("pump-1", "dose", &json!({"volume_ml": 40.0}));
    assert!(result.success, "{}", result.message);
    assert_eq!(result.action, "dose");

    // 40 ml at 40 ml/s = 1 s; run the loop past completion.
    clock.advance(1_500);
    orch.tick();

    let snapshot = orch.find_component("pump-1").unwrap().core_data();
    assert_eq!(snapshot["is_running"], json!(false));
    assert_eq!(snapshot["dose_count"], json!(1));
    assert!(snapshot["total_volume_ml"].as_f64().unwrap() > 39.0);
}

#[test]
fn action_parameter_validation_blocks_bad_dispatch() {
    let clock = SimClock::new();
    let mut orch = mock_fleet(&clock);

    let result = orch.execute_component_action("pump-1", "dose", &json!({"volume_ml": "lots"}));
    assert!(!result.success);
    assert!(result.message.contains("number"));

    let missing = orch.execute_component_action("pump-1", "dose", &json!({}));
    assert!(!missing.success);
    assert!(missing.message.contains("volume_ml"));

    let unknown = orch.execute_component_action("pump-1", "explode", &json!({}));
    assert!(!unknown.success);
    assert!(unknown.message.contains("not supported"));
}

#[test]
fn stored_configuration_survives_reinstall() {
    let clock = SimClock::new();
    let mut orch = mock_fleet(&clock);

    // Change the pump's stored config through a fresh override install.
    orch.unregister_component("pump-1");
    assert!(orch.install_component(
        Box::new(PeristalticPumpComponent::new(
            "pump-1",
            "Nutrient A",
            Box::new(OkRelay),
        )),
        &json!({"mls_per_sec": 20.0, "liquid_name": "pH Down"}),
    ));

    // A later install with no override hydrates from storage.
    orch.unregister_component("pump-1");
    assert!(orch.install_component(
        Box::new(PeristalticPumpComponent::new(
            "pump-1",
            "Nutrient A",
            Box::new(OkRelay),
        )),
        &Value::Null,
    ));

    let config = orch.find_component("pump-1").unwrap().current_config();
    assert_eq!(config["mls_per_sec"], json!(20.0));
    assert_eq!(config["liquid_name"], json!("pH Down"));
}

#[test]
fn disabled_component_excluded_from_everything() {
    let clock = SimClock::new();
    let mut orch = mock_fleet(&clock);

    orch.find_component_mut("pump-1")
        .unwrap()
        .core_mut()
        .set_state(ComponentState::Disabled);

    clock.advance(60_000);
    orch.tick();
    assert_eq!(
        orch.find_component("pump-1").unwrap().core().execution_count(),
        0
    );

    let action = orch.execute_component_action("pump-1", "stop", &json!({}));
    assert!(!action.success);
    assert!(action.message.contains("disabled"));
}

#[test]
fn system_stats_aggregate_counters() {
    let clock = SimClock::new();
    let mut orch = mock_fleet(&clock);

    orch.tick();
    clock.advance(500);
    orch.tick();

    let stats = orch.system_stats();
    assert_eq!(stats["component_count"], json!(3));
    assert_eq!(stats["loop_count"], json!(2));
    assert!(stats["total_executions"].as_u64().unwrap() >= 3);
    assert_eq!(stats["component_states"]["climate-1"], json!("READY"));
    assert_eq!(stats["uptime_ms"], json!(500));
}
