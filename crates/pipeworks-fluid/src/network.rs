//! The pipe network: an arena of pipes and connectors plus the operations
//! that keep them, the simulation world, and the physics world in step.
//!
//! # Architecture
//!
//! [`NetworkArena`] owns every pipe and connector in two slotmaps. Pipes
//! hold connector ids for their ports and connectors hold pipe ids for their
//! sides, so neither owns the other. Entities keep a `Weak` back to the
//! arena, which is how a pipe destroyed through
//! [`SimulationWorld::remove_entity`] still gets detached from its
//! connectors.
//!
//! # Lock order
//!
//! Outermost first: world registry, connector, arena, pipes (ascending
//! [`PipeId`]), physics. Listener callbacks run with no lock held. Network
//! mutations are serialized by a construction lock taken before any of
//! these.

use std::sync::Arc;

use glam::Vec3;
use parking_lot::{Mutex, RwLock};
use pipeworks_core::config::SimConfig;
use pipeworks_core::entity::Entity;
use pipeworks_core::event::{Listeners, SubscriptionToken};
use pipeworks_core::fixed::Portion;
use pipeworks_core::world::{SimulationWorld, WorldError};
use pipeworks_physics::{PhysicsError, PhysicsWorld, Transform};
use slotmap::SlotMap;

use crate::connector::{ConnectorError, Side, Transition};
use crate::container::{FluidContainer, ResourceContainer};
use crate::id::{ConnectorId, ConnectorPropertiesId, PipeId, PipeKindId, PortRef};
use crate::pipe::Pipe;
use crate::pipe_connector::{Disposition, PipeConnector};
use crate::registry::PipeKindRegistry;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    #[error("unknown pipe kind: {0}")]
    UnknownKind(String),
    #[error("pipe {0:?} does not exist")]
    DanglingPipe(PipeId),
    #[error("connector {0:?} does not exist")]
    DanglingConnector(ConnectorId),
    #[error("a connector cannot join a pipe to itself")]
    SelfConnection,
    #[error("pipe {pipe:?} has no port {port}")]
    InvalidPort { pipe: PipeId, port: usize },
    #[error("port {port} of pipe {pipe:?} is already bound")]
    PortOccupied { pipe: PipeId, port: usize },
    #[error(transparent)]
    World(#[from] WorldError),
    #[error(transparent)]
    Connector(#[from] ConnectorError),
    #[error(transparent)]
    Physics(#[from] PhysicsError),
}

/// Structural changes, delivered after they happen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkEvent {
    PipeBuilt(PipeId),
    PipeRemoved(PipeId),
    Connected(ConnectorId),
    Disconnected { connector: ConnectorId, pipe: PipeId },
    ConnectorDisposed(ConnectorId),
}

// ---------------------------------------------------------------------------
// Arena
// ---------------------------------------------------------------------------

/// Owner of every pipe and connector of one network, plus the construction
/// lock and listeners shared by every path that changes them.
#[derive(Debug)]
pub struct NetworkArena<C: ResourceContainer> {
    pipes: RwLock<SlotMap<PipeId, Arc<Pipe<C>>>>,
    connectors: RwLock<SlotMap<ConnectorId, Arc<PipeConnector<C>>>>,
    world: Arc<SimulationWorld>,
    events: Listeners<NetworkEvent>,
    construction: Mutex<()>,
}

impl<C: ResourceContainer> NetworkArena<C> {
    pub(crate) fn new(world: Arc<SimulationWorld>) -> Self {
        Self {
            pipes: RwLock::new(SlotMap::with_key()),
            connectors: RwLock::new(SlotMap::with_key()),
            world,
            events: Listeners::new(),
            construction: Mutex::new(()),
        }
    }

    pub fn pipe(&self, id: PipeId) -> Option<Arc<Pipe<C>>> {
        self.pipes.read().get(id).cloned()
    }

    pub fn connector(&self, id: ConnectorId) -> Option<Arc<PipeConnector<C>>> {
        self.connectors.read().get(id).cloned()
    }

    pub fn pipe_ids(&self) -> Vec<PipeId> {
        self.pipes.read().keys().collect()
    }

    pub fn connector_ids(&self) -> Vec<ConnectorId> {
        self.connectors.read().keys().collect()
    }

    pub fn pipe_count(&self) -> usize {
        self.pipes.read().len()
    }

    pub fn connector_count(&self) -> usize {
        self.connectors.read().len()
    }

    fn emit_all(&self, events: &[NetworkEvent]) {
        for event in events {
            self.events.emit(event);
        }
    }

    /// Detach a pipe that was destroyed from outside the network. A pipe
    /// the network has already taken out of the arena is left alone, which
    /// also keeps this from re-entering the construction lock.
    pub(crate) fn release_pipe(&self, id: PipeId) {
        if self.pipe(id).is_none() {
            return;
        }
        let guard = self.construction.lock();
        let events = self.remove_pipe_locked(id);
        drop(guard);
        if !events.is_empty() {
            tracing::debug!(pipe = ?id, "destroyed pipe detached from network");
        }
        self.emit_all(&events);
    }

    /// Detach `id` from every connector (disposing those left empty),
    /// remove it from the arena, then from the world. Caller holds the
    /// construction lock.
    fn remove_pipe_locked(&self, id: PipeId) -> Vec<NetworkEvent> {
        let mut events = Vec::new();
        let Some(pipe) = self.pipe(id) else {
            return events;
        };
        for (port, cid) in pipe.connectors() {
            pipe.set_connector(port, None);
            let Some(connector) = self.connector(cid) else {
                continue;
            };
            let Some(side) = connector.side_of(PortRef::new(id, port)) else {
                continue;
            };
            match connector.disconnect(side) {
                Ok((_, disposition)) => {
                    events.push(NetworkEvent::Disconnected { connector: cid, pipe: id });
                    if disposition == Disposition::Dispose {
                        self.dispose_connector(cid);
                        events.push(NetworkEvent::ConnectorDisposed(cid));
                    }
                }
                Err(e) => tracing::warn!(pipe = ?id, connector = ?cid, error = %e, "detach failed"),
            }
        }
        self.pipes.write().remove(id);
        if !self.world.remove_entity(pipe.reference()) {
            pipe.destroy();
        }
        events.push(NetworkEvent::PipeRemoved(id));
        tracing::debug!(pipe = ?id, "pipe deconstructed");
        events
    }

    fn dispose_connector(&self, id: ConnectorId) {
        let removed = self.connectors.write().remove(id);
        if let Some(connector) = removed {
            if !self.world.remove_entity(connector.reference()) {
                connector.destroy();
            }
            tracing::debug!(connector = ?id, "connector disposed");
        }
    }
}

// ---------------------------------------------------------------------------
// PipeNetwork
// ---------------------------------------------------------------------------

/// Builds, joins, and tears down pipes.
pub struct PipeNetwork<C: ResourceContainer = FluidContainer> {
    arena: Arc<NetworkArena<C>>,
    physics: Arc<PhysicsWorld>,
    registry: Arc<PipeKindRegistry>,
    flow_epsilon: Portion,
}

impl<C: ResourceContainer> std::fmt::Debug for PipeNetwork<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipeNetwork")
            .field("pipes", &self.arena.pipe_count())
            .field("connectors", &self.arena.connector_count())
            .field("listeners", &self.arena.events.len())
            .finish()
    }
}

impl<C: ResourceContainer> PipeNetwork<C> {
    pub fn new(
        config: &SimConfig,
        world: Arc<SimulationWorld>,
        physics: Arc<PhysicsWorld>,
        registry: Arc<PipeKindRegistry>,
    ) -> Self {
        Self {
            arena: Arc::new(NetworkArena::new(world)),
            physics,
            registry,
            flow_epsilon: config.flow_epsilon(),
        }
    }

    // -- Accessors ---------------------------------------------------------

    pub fn arena(&self) -> &Arc<NetworkArena<C>> {
        &self.arena
    }

    pub fn world(&self) -> &Arc<SimulationWorld> {
        &self.arena.world
    }

    pub fn physics(&self) -> &Arc<PhysicsWorld> {
        &self.physics
    }

    pub fn registry(&self) -> &PipeKindRegistry {
        &self.registry
    }

    pub fn pipe(&self, id: PipeId) -> Option<Arc<Pipe<C>>> {
        self.arena.pipe(id)
    }

    pub fn connector(&self, id: ConnectorId) -> Option<Arc<PipeConnector<C>>> {
        self.arena.connector(id)
    }

    pub fn pipe_count(&self) -> usize {
        self.arena.pipe_count()
    }

    pub fn connector_count(&self) -> usize {
        self.arena.connector_count()
    }

    // -- Events ------------------------------------------------------------

    pub fn subscribe<F>(&self, callback: F) -> SubscriptionToken
    where
        F: Fn(&NetworkEvent) + Send + Sync + 'static,
    {
        self.arena.events.subscribe(callback)
    }

    pub fn unsubscribe(&self, token: SubscriptionToken) -> bool {
        self.arena.events.unsubscribe(token)
    }

    // -- Construction ------------------------------------------------------

    /// Place a pipe of `kind` at `transform`.
    ///
    /// Each port joins a half-open connector already sitting at the port's
    /// position, if any; otherwise a fresh half-open connector is created
    /// there. On failure everything created so far is torn down.
    pub fn build_pipe(&self, kind: PipeKindId, transform: Transform) -> Result<PipeId, NetworkError> {
        let guard = self.arena.construction.lock();
        let pipe = self.insert_pipe(kind, transform, &[])?;
        let id = pipe.id();
        let mut events = vec![NetworkEvent::PipeBuilt(id)];

        for port in 0..pipe.port_count() {
            match self.attach_port(&pipe, port) {
                Ok(Some(event)) => events.push(event),
                Ok(None) => {}
                Err(e) => {
                    self.arena.remove_pipe_locked(id);
                    tracing::warn!(pipe = ?id, port, error = %e, "pipe build rolled back");
                    return Err(e);
                }
            }
        }

        tracing::debug!(pipe = ?id, kind = ?kind, "pipe built");
        drop(guard);
        self.arena.emit_all(&events);
        Ok(id)
    }

    /// Join `port` to a half-open connector at its position, or open a new
    /// one. Returns the event to report if a junction was completed.
    fn attach_port(&self, pipe: &Arc<Pipe<C>>, port: usize) -> Result<Option<NetworkEvent>, NetworkError> {
        let position = pipe.port_position(port).ok_or(NetworkError::InvalidPort {
            pipe: pipe.id(),
            port,
        })?;
        let target = PortRef::new(pipe.id(), port);

        if let Some(existing) = self.find_open_connector(position, pipe.id()) {
            if let Ok(transition) = existing.connect(target) {
                pipe.set_connector(port, Some(existing.id()));
                return Ok((transition == Transition::Connected).then(|| NetworkEvent::Connected(existing.id())));
            }
        }

        let kind = self
            .registry
            .kind(pipe.kind())
            .ok_or_else(|| NetworkError::UnknownKind(format!("{:?}", pipe.kind())))?;
        let connector = self.insert_connector(Transform::from_translation(position), kind.connector)?;
        connector.connect(target)?;
        pipe.set_connector(port, Some(connector.id()));
        Ok(None)
    }

    /// A half-open connector overlapping `point` that is not already
    /// attached to `exclude`. Candidates are filtered during enumeration, so
    /// the last qualifying connector wins.
    fn find_open_connector(&self, point: Vec3, exclude: PipeId) -> Option<Arc<PipeConnector<C>>> {
        let hit = self
            .physics
            .approx_overlap_point_filtered::<PipeConnector<C>>(point, |obj| {
                obj.is_enabled()
                    && obj
                        .owner()
                        .and_then(|owner| owner.downcast_ref::<PipeConnector<C>>().and_then(|c| c.open_end()))
                        .is_some_and(|pipe| pipe != exclude)
            })?;
        let owner = hit.owner()?;
        let id = owner.downcast_ref::<PipeConnector<C>>()?.id();
        self.arena.connector(id)
    }

    /// Create a pipe skeleton, register it with the world, and leave every
    /// port unbound.
    pub fn insert_pipe(
        &self,
        kind_id: PipeKindId,
        transform: Transform,
        fullness: &[Portion],
    ) -> Result<Arc<Pipe<C>>, NetworkError> {
        let kind = self
            .registry
            .kind(kind_id)
            .ok_or_else(|| NetworkError::UnknownKind(format!("{kind_id:?}")))?;
        let pipe = {
            let mut pipes = self.arena.pipes.write();
            let id = pipes.insert_with_key(|id| {
                Pipe::create(
                    id,
                    kind_id,
                    kind,
                    transform,
                    fullness,
                    Arc::clone(&self.physics),
                    Arc::downgrade(&self.arena),
                )
            });
            Arc::clone(&pipes[id])
        };
        if let Err(e) = self.arena.world.add_entity(pipe.clone()) {
            self.arena.pipes.write().remove(pipe.id());
            pipe.destroy();
            return Err(e.into());
        }
        Ok(pipe)
    }

    /// Create an unbound connector, register it with the world, and enable
    /// its junction collider.
    pub fn insert_connector(
        &self,
        transform: Transform,
        properties: ConnectorPropertiesId,
    ) -> Result<Arc<PipeConnector<C>>, NetworkError> {
        let props = self
            .registry
            .properties(properties)
            .ok_or_else(|| NetworkError::UnknownKind(format!("{properties:?}")))?;
        let connector = {
            let mut connectors = self.arena.connectors.write();
            let id = connectors.insert_with_key(|id| {
                PipeConnector::create(
                    id,
                    properties,
                    props.collider_shape(),
                    transform,
                    self.flow_epsilon,
                    Arc::downgrade(&self.arena),
                    Arc::clone(&self.physics),
                )
            });
            Arc::clone(&connectors[id])
        };
        if let Err(e) = self.arena.world.add_entity(connector.clone()) {
            self.arena.connectors.write().remove(connector.id());
            connector.destroy();
            return Err(e.into());
        }
        Ok(connector)
    }

    /// Tear down a pipe: detach it from every connector (disposing those
    /// left empty), deregister it, and release its body.
    pub fn deconstruct_pipe(&self, pipe: PipeId) -> Result<(), NetworkError> {
        let guard = self.arena.construction.lock();
        if self.arena.pipe(pipe).is_none() {
            return Err(NetworkError::DanglingPipe(pipe));
        }
        let events = self.arena.remove_pipe_locked(pipe);
        drop(guard);
        self.arena.emit_all(&events);
        Ok(())
    }

    /// Remove a pipe without reporting it. Used to roll back a failed load.
    pub(crate) fn discard_pipe(&self, id: PipeId) {
        let _guard = self.arena.construction.lock();
        self.arena.remove_pipe_locked(id);
    }

    /// Remove a connector whatever its state. Used to roll back a failed
    /// load.
    pub(crate) fn discard_connector(&self, id: ConnectorId) {
        let _guard = self.arena.construction.lock();
        self.arena.dispose_connector(id);
    }

    /// Report a batch of changes made outside the usual entry points.
    pub(crate) fn announce(&self, events: &[NetworkEvent]) {
        self.arena.emit_all(events);
    }

    // -- Joining -----------------------------------------------------------

    /// Attach `port` of `pipe` to the vacant side of `connector`.
    pub fn connect(&self, connector: ConnectorId, pipe: PipeId, port: usize) -> Result<Transition, NetworkError> {
        let guard = self.arena.construction.lock();
        let c = self
            .arena
            .connector(connector)
            .ok_or(NetworkError::DanglingConnector(connector))?;
        let p = self.arena.pipe(pipe).ok_or(NetworkError::DanglingPipe(pipe))?;
        if port >= p.port_count() {
            return Err(NetworkError::InvalidPort { pipe, port });
        }
        if p.connector_at(port).is_some() {
            return Err(NetworkError::PortOccupied { pipe, port });
        }
        if c.occupants().iter().flatten().any(|o| o.pipe == pipe) {
            return Err(NetworkError::SelfConnection);
        }
        let transition = c.connect(PortRef::new(pipe, port))?;
        p.set_connector(port, Some(connector));
        drop(guard);
        if transition == Transition::Connected {
            self.arena.events.emit(&NetworkEvent::Connected(connector));
        }
        Ok(transition)
    }

    /// Detach whatever is on `side` of `connector`. A connector left with
    /// both sides empty is disposed.
    pub fn disconnect(&self, connector: ConnectorId, side: Side) -> Result<Disposition, NetworkError> {
        let guard = self.arena.construction.lock();
        let c = self
            .arena
            .connector(connector)
            .ok_or(NetworkError::DanglingConnector(connector))?;
        let (port, disposition) = c.disconnect(side)?;
        if let Some(p) = self.arena.pipe(port.pipe) {
            p.set_connector(port.port, None);
        }
        let mut events = vec![NetworkEvent::Disconnected {
            connector,
            pipe: port.pipe,
        }];
        if disposition == Disposition::Dispose {
            self.arena.dispose_connector(connector);
            events.push(NetworkEvent::ConnectorDisposed(connector));
        }
        drop(guard);
        self.arena.emit_all(&events);
        Ok(disposition)
    }

    // -- Picking -----------------------------------------------------------

    /// The pipe under a ray, for interaction.
    pub fn pick_pipe(&self, origin: Vec3, direction: Vec3, max_distance: f32) -> Option<PipeId> {
        let hit = self.physics.raycast::<Pipe<C>>(origin, direction, max_distance)?;
        let owner = hit.owner()?;
        owner.downcast_ref::<Pipe<C>>().map(|p| p.id())
    }

    /// The open connector under a ray.
    pub fn pick_connector(&self, origin: Vec3, direction: Vec3, max_distance: f32) -> Option<ConnectorId> {
        let hit = self
            .physics
            .raycast::<PipeConnector<C>>(origin, direction, max_distance)?;
        let owner = hit.owner()?;
        owner.downcast_ref::<PipeConnector<C>>().map(|c| c.id())
    }

    /// Forward an interaction to the pipe.
    pub fn interact(&self, pipe: PipeId) -> bool {
        match self.arena.pipe(pipe) {
            Some(p) => self.arena.world.interact(p.reference()),
            None => false,
        }
    }
}
