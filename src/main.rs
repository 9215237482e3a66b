//! Host simulation binary.
//!
//! Wires the orchestrator to simulated ports and runs the default
//! component set in mock mode: two probes, the climate sensor, a light
//! sensor, a dosing pump, and the lighting coordinator. Useful for
//! exercising the scheduler and the sampling pipeline without a board
//! attached.
//!
//! ```text
//! cargo run --bin hydropod-sim
//! ```

use std::io::Write as _;

use anyhow::Result;
use log::{info, LevelFilter};
use serde_json::{json, Value};

use hydropod::component::Component;
use hydropod::components::{
    ClimateComponent, EcProbeComponent, LightOrchestratorComponent, LightSensorComponent,
    PeristalticPumpComponent, PhSensorComponent,
};
use hydropod::orchestrator::Orchestrator;
use hydropod::ports::{AdcPort, ClimatePort, MemoryStore, MonotonicClock, NullHttp, RelayPort};

/// Console logger for the simulation (the real build routes `log`
/// through the board's UART appender).
struct ConsoleLogger;

impl log::Log for ConsoleLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= log::Level::Info
    }

    fn log(&self, record: &log::Record) {
        if self.enabled(record.metadata()) {
            let mut out = std::io::stdout().lock();
            let _ = writeln!(out, "[{:5}] {}", record.level(), record.args());
        }
    }

    fn flush(&self) {}
}

static LOGGER: ConsoleLogger = ConsoleLogger;

/// Simulated ports; everything runs in mock mode, so these only have to
/// exist, not answer.
struct SimAdc;

impl AdcPort for SimAdc {
    fn read_counts(&mut self, _pin: u8) -> Option<u16> {
        None
    }
}

struct SimClimate;

impl ClimatePort for SimClimate {
    fn read(&mut self, _pin: u8) -> Option<(f32, f32)> {
        None
    }
}

struct SimRelay;

impl RelayPort for SimRelay {
    fn set(&mut self, _pin: u8, _on: bool) -> bool {
        true
    }
}

fn install_default_components(orch: &mut Orchestrator) -> Result<()> {
    let installed = [
        orch.install_component(
            Box::new(ClimateComponent::new(
                "climate-1",
                "Room Climate",
                Box::new(SimClimate),
            )),
            &json!({"gpio_pin": 0}),
        ),
        orch.install_component(
            Box::new(PhSensorComponent::new(
                "ph-sensor-1",
                "Reservoir pH (Mock)",
                Box::new(SimAdc),
            )),
            &json!({
                "gpio_pin": 0,
                "sample_size": 10,
                "reading_interval_ms": 500,
                "sampling_period_ms": 10_000,
                "temperature_source_id": "climate-1",
            }),
        ),
        orch.install_component(
            Box::new(EcProbeComponent::new(
                "ec-probe-1",
                "Reservoir EC (Mock)",
                Box::new(SimAdc),
            )),
            &json!({
                "gpio_pin": 0,
                "sample_size": 15,
                "reading_interval_ms": 800,
                "sampling_period_ms": 15_000,
                "temperature_source_id": "climate-1",
            }),
        ),
        orch.install_component(
            Box::new(PeristalticPumpComponent::new(
                "pump-1",
                "Nutrient A",
                Box::new(SimRelay),
            )),
            &json!({"pin_no": 26, "mls_per_sec": 40.0, "liquid_name": "Base nutrients"}),
        ),
        orch.install_component(
            Box::new(LightSensorComponent::new("tsl2561-1", "Canopy Light", None)),
            &json!({"sampling_interval_ms": 3_000}),
        ),
        orch.install_component(
            Box::new(LightOrchestratorComponent::new(
                "light-orchestrator-1",
                "Lighting Coordinator",
            )),
            &json!({
                "sensor_ids": ["tsl2561-1"],
                "dimmer_id": "servo-dimmer-1",
                "target_lumens": 400.0,
            }),
        ),
    ];

    let up = installed.iter().filter(|ok| **ok).count();
    anyhow::ensure!(up > 0, "no components came up");
    info!("simulation: {up}/{} components installed", installed.len());
    Ok(())
}

fn main() -> Result<()> {
    log::set_logger(&LOGGER).map_err(|e| anyhow::anyhow!("logger init: {e}"))?;
    log::set_max_level(LevelFilter::Info);

    let mut orch = Orchestrator::new(
        Box::new(MemoryStore::new()),
        Box::new(NullHttp),
        Box::new(MonotonicClock::new()),
    );
    orch.init();
    install_default_components(&mut orch)?;

    info!("simulation: running for 60 seconds of loop time");
    let started = std::time::Instant::now();
    while started.elapsed().as_secs() < 60 {
        orch.tick();
        std::thread::sleep(std::time::Duration::from_millis(50));
    }

    let stats = orch.system_stats();
    let health = orch.health_status();
    println!("--- system stats ---");
    println!("{}", serde_json::to_string_pretty(&stats)?);
    println!("--- health ---");
    println!("{}", serde_json::to_string_pretty(&health)?);
    println!("--- probe snapshots ---");
    for id in ["ph-sensor-1", "ec-probe-1"] {
        let snapshot = orch
            .find_component(id)
            .map_or(Value::Null, |c| c.core_data());
        println!("{id}: {snapshot}");
    }

    orch.shutdown();
    Ok(())
}
