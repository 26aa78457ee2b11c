//! Pipe segments: containers, ports, and a physics body.

use std::any::Any;
use std::sync::{Arc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use glam::Vec3;
use parking_lot::{Mutex, MutexGuard};
use pipeworks_core::entity::{Entity, TickContext};
use pipeworks_core::fixed::{Portion, Volume};
use pipeworks_core::id::{ReferenceId, next_reference};
use pipeworks_physics::{PhysicsObject, PhysicsWorld, Transform};

use crate::container::ResourceContainer;
use crate::id::{ConnectorId, PipeId, PipeKindId};
use crate::network::NetworkArena;
use crate::registry::PipeKind;

/// Mutable part of a pipe, guarded by the pipe's own lock.
#[derive(Debug)]
pub struct PipeState<C> {
    pub containers: Vec<C>,
    connectors: Vec<Option<ConnectorId>>,
}

impl<C> PipeState<C> {
    pub fn connector_at(&self, port: usize) -> Option<ConnectorId> {
        self.connectors.get(port).copied().flatten()
    }
}

/// A pipe segment. Holds connector ids for its ports, never the connectors
/// themselves.
///
/// Destroying a pipe, whoever triggers it, releases its body and detaches
/// it from the arena it was built in.
#[derive(Debug)]
pub struct Pipe<C: ResourceContainer> {
    id: PipeId,
    reference: ReferenceId,
    kind: PipeKindId,
    transform: Transform,
    ports: Vec<(Vec3, usize)>,
    body: PhysicsObject,
    physics: Arc<PhysicsWorld>,
    arena: Weak<NetworkArena<C>>,
    state: Mutex<PipeState<C>>,
    interactions: AtomicU64,
}

impl<C: ResourceContainer> Pipe<C> {
    /// Build a pipe of `kind` with every container filled to the matching
    /// entry of `fullness` (missing entries mean empty).
    pub fn create(
        id: PipeId,
        kind_id: PipeKindId,
        kind: &PipeKind,
        transform: Transform,
        fullness: &[Portion],
        physics: Arc<PhysicsWorld>,
        arena: Weak<NetworkArena<C>>,
    ) -> Arc<Self> {
        let containers: Vec<C> = kind
            .volumes()
            .enumerate()
            .map(|(i, volume)| {
                let mut c = C::with_volume(volume);
                c.fill_to(fullness.get(i).copied().unwrap_or(Portion::ZERO));
                c
            })
            .collect();
        let ports = kind
            .ports
            .iter()
            .map(|p| (Vec3::from_array(p.offset), p.container))
            .collect();

        Arc::new_cyclic(|weak| {
            let body = physics.add_object(
                kind.collider_shape(),
                transform,
                kind.mass,
                kind.mass <= 0.0,
                weak.clone(),
            );
            Self {
                id,
                reference: next_reference(),
                kind: kind_id,
                transform,
                ports,
                body,
                physics: Arc::clone(&physics),
                arena,
                state: Mutex::new(PipeState {
                    connectors: vec![None; kind.ports.len()],
                    containers,
                }),
                interactions: AtomicU64::new(0),
            }
        })
    }

    pub fn id(&self) -> PipeId {
        self.id
    }

    pub fn kind(&self) -> PipeKindId {
        self.kind
    }

    pub fn transform(&self) -> Transform {
        self.transform
    }

    pub fn body(&self) -> &PhysicsObject {
        &self.body
    }

    pub fn is_destroyed(&self) -> bool {
        self.body.is_destroyed()
    }

    pub fn port_count(&self) -> usize {
        self.ports.len()
    }

    /// World position of `port`.
    pub fn port_position(&self, port: usize) -> Option<Vec3> {
        self.ports
            .get(port)
            .map(|(offset, _)| self.transform.transform_point(*offset))
    }

    /// The port closest to `point`.
    pub fn nearest_port(&self, point: Vec3) -> Option<usize> {
        (0..self.ports.len())
            .filter_map(|i| self.port_position(i).map(|p| (i, p.distance_squared(point))))
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(i, _)| i)
    }

    /// Index of the container drained through `port`.
    pub fn port_container(&self, port: usize) -> Option<usize> {
        self.ports.get(port).map(|(_, c)| *c)
    }

    pub fn connector_at(&self, port: usize) -> Option<ConnectorId> {
        self.state.lock().connector_at(port)
    }

    /// Every bound port with its connector.
    pub fn connectors(&self) -> Vec<(usize, ConnectorId)> {
        let state = self.state.lock();
        state
            .connectors
            .iter()
            .enumerate()
            .filter_map(|(port, c)| c.map(|c| (port, c)))
            .collect()
    }

    /// Bind or clear a port. Returns the previous binding.
    pub(crate) fn set_connector(&self, port: usize, connector: Option<ConnectorId>) -> Option<ConnectorId> {
        let mut state = self.state.lock();
        match state.connectors.get_mut(port) {
            Some(slot) => std::mem::replace(slot, connector),
            None => None,
        }
    }

    pub fn fullness(&self, container: usize) -> Option<Portion> {
        self.state.lock().containers.get(container).map(|c| c.fullness())
    }

    pub fn contents(&self, container: usize) -> Option<Volume> {
        self.state.lock().containers.get(container).map(|c| c.contents())
    }

    /// Total volume held across every container.
    pub fn total_contents(&self) -> Volume {
        self.state
            .lock()
            .containers
            .iter()
            .fold(Volume::ZERO, |acc, c| acc + c.contents())
    }

    pub fn fill(&self, container: usize, fullness: Portion) -> bool {
        match self.state.lock().containers.get_mut(container) {
            Some(c) => {
                c.fill_to(fullness);
                true
            }
            None => false,
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, PipeState<C>> {
        self.state.lock()
    }

    pub fn interaction_count(&self) -> u64 {
        self.interactions.load(Ordering::Relaxed)
    }
}

impl<C: ResourceContainer> Entity for Pipe<C> {
    fn reference(&self) -> ReferenceId {
        self.reference
    }

    fn tick(&self, ctx: &TickContext) {
        let mut state = self.state.lock();
        for container in &mut state.containers {
            container.tick(ctx.interval);
        }
    }

    fn interacted(&self) {
        self.interactions.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(pipe = ?self.id, "pipe interacted");
    }

    fn destroy(&self) {
        self.physics.destroy_object(&self.body);
        if let Some(arena) = self.arena.upgrade() {
            arena.release_pipe(self.id);
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Lock two distinct pipes in ascending id order and hand back their
/// states in argument order.
pub(crate) fn lock_pair<'a, C: ResourceContainer>(
    a: &'a Pipe<C>,
    b: &'a Pipe<C>,
) -> (MutexGuard<'a, PipeState<C>>, MutexGuard<'a, PipeState<C>>) {
    if a.id <= b.id {
        let ga = a.state.lock();
        let gb = b.state.lock();
        (ga, gb)
    } else {
        let gb = b.state.lock();
        let ga = a.state.lock();
        (ga, gb)
    }
}
