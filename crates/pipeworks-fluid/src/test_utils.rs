//! Fixtures for tests, benches, and downstream crates.

use std::sync::Arc;

use pipeworks_core::clock::PauseFlag;
use pipeworks_core::config::SimConfig;
use pipeworks_core::fixed::{Portion, Volume};
use pipeworks_core::world::SimulationWorld;
use pipeworks_physics::PhysicsWorld;

use crate::container::FluidContainer;
use crate::id::{ConnectorPropertiesId, PipeKindId};
use crate::network::PipeNetwork;
use crate::registry::{
    ConnectorProperties, ConnectorShape, PipeKind, PipeKindRegistry, PipeKindRegistryBuilder, PortDef,
};

pub const STRAIGHT: &str = "straight";
pub const TEE: &str = "tee";
pub const STUB: &str = "stub";
pub const SMALL: &str = "small";

pub fn container(volume: f64, fullness: f64) -> FluidContainer {
    FluidContainer::new(Volume::from_f64(volume), Portion::from_f64(fullness))
}

/// A 2 m pipe along X with one 10 m³ container and a port at each end.
pub fn straight_kind(connector: ConnectorPropertiesId) -> PipeKind {
    PipeKind {
        ports: vec![
            PortDef {
                offset: [-1.0, 0.0, 0.0],
                container: 0,
            },
            PortDef {
                offset: [1.0, 0.0, 0.0],
                container: 0,
            },
        ],
        container_volumes: vec![10.0],
        half_extents: [1.0, 0.25, 0.25],
        mass: 0.0,
        connector,
    }
}

/// A three-port junction with a port on +Z as well.
pub fn tee_kind(connector: ConnectorPropertiesId) -> PipeKind {
    let mut kind = straight_kind(connector);
    kind.ports.push(PortDef {
        offset: [0.0, 0.0, 1.0],
        container: 0,
    });
    kind.half_extents = [1.0, 0.25, 1.0];
    kind
}

/// A 0.2 m coupling whose ports sit closer together than a connector is
/// wide, so a port's own connector overlaps its neighbour.
pub fn stub_kind(connector: ConnectorPropertiesId) -> PipeKind {
    PipeKind {
        ports: vec![
            PortDef {
                offset: [-0.1, 0.0, 0.0],
                container: 0,
            },
            PortDef {
                offset: [0.1, 0.0, 0.0],
                container: 0,
            },
        ],
        container_volumes: vec![1.0],
        half_extents: [0.1, 0.2, 0.2],
        mass: 0.0,
        connector,
    }
}

pub fn small_properties() -> ConnectorProperties {
    ConnectorProperties {
        shape: ConnectorShape::Round,
        connector_diameter: 0.5,
        flow_area_diameter: 0.4,
    }
}

/// Registry holding [`STRAIGHT`], [`TEE`], and [`STUB`], all using
/// [`SMALL`] connectors.
pub fn test_registry() -> Arc<PipeKindRegistry> {
    let mut b = PipeKindRegistryBuilder::new();
    let small = b.register_properties(SMALL, small_properties());
    b.register_kind(STRAIGHT, straight_kind(small));
    b.register_kind(TEE, tee_kind(small));
    b.register_kind(STUB, stub_kind(small));
    match b.build() {
        Ok(reg) => Arc::new(reg),
        Err(e) => panic!("test registry is invalid: {e}"),
    }
}

/// A world, a physics world, and a network over them, not yet running.
pub struct Rig {
    pub config: SimConfig,
    pub world: Arc<SimulationWorld>,
    pub physics: Arc<PhysicsWorld>,
    pub network: PipeNetwork<FluidContainer>,
}

impl Rig {
    pub fn new() -> Self {
        Self::with_config(SimConfig::default())
    }

    pub fn with_config(config: SimConfig) -> Self {
        let pause = PauseFlag::new();
        let world = Arc::new(SimulationWorld::with_pause(&config, pause.clone()));
        let physics = Arc::new(PhysicsWorld::new(&config, pause));
        let network = PipeNetwork::new(&config, Arc::clone(&world), Arc::clone(&physics), test_registry());
        Self {
            config,
            world,
            physics,
            network,
        }
    }

    pub fn kind(&self, name: &str) -> PipeKindId {
        match self.network.registry().kind_id(name) {
            Some(id) => id,
            None => panic!("no pipe kind named {name}"),
        }
    }
}

impl Default for Rig {
    fn default() -> Self {
        Self::new()
    }
}
