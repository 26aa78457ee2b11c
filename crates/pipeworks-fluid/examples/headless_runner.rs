//! Headless runner: loads a scene, runs both loops, prints liveness and fill levels.
//!
//! Run with: `cargo run --package pipeworks-fluid --example headless_runner [config.toml]`

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use pipeworks_core::clock::PauseFlag;
use pipeworks_core::config::SimConfig;
use pipeworks_core::world::SimulationWorld;
use pipeworks_fluid::loader::load_scene_str;
use pipeworks_fluid::registry::{ConnectorProperties, ConnectorShape, PipeKind, PipeKindRegistryBuilder};
use pipeworks_fluid::{FluidContainer, PipeNetwork};
use pipeworks_physics::PhysicsWorld;

const SECONDS: u64 = 3;

const STRAIGHT: &str = r#"(
    ports: [
        (offset: (-1.0, 0.0, 0.0), container: 0),
        (offset: (1.0, 0.0, 0.0), container: 0),
    ],
    container_volumes: [10.0],
    half_extents: (1.0, 0.25, 0.25),
    mass: 0.0,
    connector: 0,
)"#;

const SCENE: &str = r#"(
    pipes: [
        (id: "tank", kind: "straight", position: (0.0, 0.0, 0.0), contents: [1.0]),
        (id: "mid", kind: "straight", position: (2.0, 0.0, 0.0)),
        (id: "tail", kind: "straight", position: (4.0, 0.0, 0.0)),
    ],
    connectors: [
        (id: "j1", position: (1.0, 0.0, 0.0), a: Some("tank"), b: Some("mid")),
        (id: "j2", position: (3.0, 0.0, 0.0), a: Some("mid"), b: Some("tail")),
    ],
)"#;

fn main() {
    tracing_subscriber::fmt().with_target(false).init();

    let config = match std::env::args().nth(1) {
        Some(path) => SimConfig::from_toml_file(Path::new(&path)).expect("failed to load config"),
        None => SimConfig::default(),
    };

    let mut builder = PipeKindRegistryBuilder::new();
    builder.register_properties(
        "small",
        ConnectorProperties {
            shape: ConnectorShape::Round,
            connector_diameter: 0.5,
            flow_area_diameter: 0.4,
        },
    );
    let straight: PipeKind = ron::from_str(STRAIGHT).expect("bad pipe kind");
    builder.register_kind("straight", straight);
    let registry = Arc::new(builder.build().expect("bad registry"));

    let pause = PauseFlag::new();
    let world = Arc::new(SimulationWorld::with_pause(&config, pause.clone()));
    let physics = Arc::new(PhysicsWorld::new(&config, pause));
    let network: PipeNetwork<FluidContainer> =
        PipeNetwork::new(&config, Arc::clone(&world), Arc::clone(&physics), registry);

    let report = load_scene_str(&network, SCENE).expect("failed to load scene");
    let mut names: Vec<_> = report.pipes.iter().map(|(n, id)| (n.clone(), *id)).collect();
    names.sort();

    let ticker = world.start_ticking().expect("tick loop did not start");
    let stepper = physics.run().expect("physics loop did not start");

    println!("=== pipeworks headless runner ===");
    println!(
        "tick {} Hz, physics {} Hz, {} entities\n",
        config.tick_rate,
        config.physics_rate,
        world.entity_count()
    );

    for _ in 0..SECONDS * 4 {
        std::thread::sleep(Duration::from_millis(250));
        let levels: Vec<String> = names
            .iter()
            .filter_map(|(name, id)| {
                let f = network.pipe(*id)?.fullness(0)?;
                Some(format!("{name}={:.3}", f.to_f64()))
            })
            .collect();
        println!(
            "[tick {} {:>5}] [physics {} {:>5}] {}",
            world.liveness_glyph(),
            world.tick_count(),
            physics.liveness_glyph(),
            physics.step_count(),
            levels.join(" ")
        );
    }

    ticker.stop().expect("tick loop panicked");
    stepper.stop().expect("physics loop panicked");
    println!("\nstopped after {} ticks", world.tick_count());
}
