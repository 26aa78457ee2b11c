//! The connector entity: a [`Connector`] between two pipe ports, its
//! physics colliders, and the per-tick flow rule.
//!
//! # Colliders
//!
//! Every connector owns a junction collider. While half open the collider
//! is enabled and a preview proxy is present: a kinematic, disabled body
//! that build mode can inspect without it taking part in queries. Once both
//! sides are filled the collider is disabled and the preview removed. A
//! disconnect re-enables the collider and regenerates the preview.
//!
//! # Flow
//!
//! On each tick a connected connector locks both pipes (ascending
//! [`PipeId`](crate::id::PipeId) order) and runs
//! [`equalize`](crate::container::equalize) on the containers at its ports.
//! A connector with a vacant side carries nothing, and neither does one
//! whose pipe has been destroyed.

use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use pipeworks_core::entity::{Entity, TickContext};
use pipeworks_core::fixed::{Fixed64, Portion};
use pipeworks_core::id::{ReferenceId, next_reference};
use pipeworks_physics::backend::BodyDesc;
use pipeworks_physics::{PhysicsObject, PhysicsWorld, Shape, Transform};
use slotmap::{Key, KeyData};

use crate::connector::{Connector, ConnectorError, ConnectorState, Side, Transition};
use crate::container::{Flow, ResourceContainer, equalize};
use crate::id::{ConnectorId, ConnectorPropertiesId, PipeId, PortRef};
use crate::network::NetworkArena;
use crate::pipe::lock_pair;

/// What the caller must do after a disconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Keep,
    /// Both sides are empty. Remove the connector from the world and arena.
    Dispose,
}

#[derive(Debug)]
struct Inner {
    link: Connector<PortRef>,
    collider: Option<PhysicsObject>,
    preview: Option<PhysicsObject>,
}

/// A junction between two pipe ports.
#[derive(Debug)]
pub struct PipeConnector<C: ResourceContainer> {
    id: ConnectorId,
    reference: ReferenceId,
    properties: ConnectorPropertiesId,
    shape: Shape,
    transform: Transform,
    flow_epsilon: Portion,
    arena: Weak<NetworkArena<C>>,
    physics: Arc<PhysicsWorld>,
    inner: Mutex<Inner>,
    /// Pipe on the filled side while half open, as raw key bits; 0 otherwise.
    open_end: AtomicU64,
}

impl<C: ResourceContainer> PipeConnector<C> {
    /// Create an unbound connector with an enabled junction collider.
    pub(crate) fn create(
        id: ConnectorId,
        properties: ConnectorPropertiesId,
        shape: Shape,
        transform: Transform,
        flow_epsilon: Portion,
        arena: Weak<NetworkArena<C>>,
        physics: Arc<PhysicsWorld>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Self>| {
            let collider = physics.add_object(shape.clone(), transform, 0.0, true, weak.clone());
            Self {
                id,
                reference: next_reference(),
                properties,
                shape,
                transform,
                flow_epsilon,
                arena,
                physics: Arc::clone(&physics),
                inner: Mutex::new(Inner {
                    link: Connector::unbound(id),
                    collider: Some(collider),
                    preview: None,
                }),
                open_end: AtomicU64::new(0),
            }
        })
    }

    pub fn id(&self) -> ConnectorId {
        self.id
    }

    pub fn properties(&self) -> ConnectorPropertiesId {
        self.properties
    }

    pub fn transform(&self) -> Transform {
        self.transform
    }

    pub fn state(&self) -> ConnectorState {
        self.inner.lock().link.state()
    }

    pub fn vacant_side(&self) -> Option<Side> {
        self.inner.lock().link.vacant_side()
    }

    pub fn occupant(&self, side: Side) -> Option<PortRef> {
        self.inner.lock().link.occupant(side)
    }

    pub fn occupants(&self) -> [Option<PortRef>; 2] {
        self.inner.lock().link.occupants()
    }

    /// A snapshot of the state machine.
    pub fn link(&self) -> Connector<PortRef> {
        self.inner.lock().link.clone()
    }

    pub fn collider(&self) -> Option<PhysicsObject> {
        self.inner.lock().collider.clone()
    }

    pub fn preview(&self) -> Option<PhysicsObject> {
        self.inner.lock().preview.clone()
    }

    /// The pipe holding the filled side, if the connector is half open.
    /// Lock-free, so physics query filters may call it.
    pub fn open_end(&self) -> Option<PipeId> {
        match self.open_end.load(Ordering::Acquire) {
            0 => None,
            bits => Some(PipeId::from(KeyData::from_ffi(bits))),
        }
    }

    // -- Transitions -------------------------------------------------------

    /// Attach `port` on the vacant side.
    pub fn connect(self: &Arc<Self>, port: PortRef) -> Result<Transition, ConnectorError> {
        let mut inner = self.inner.lock();
        let transition = inner.link.connect(port)?;
        self.apply(&mut inner, transition);
        Ok(transition)
    }

    /// Attach `port` on `side`, which must be empty.
    pub fn connect_at(self: &Arc<Self>, side: Side, port: PortRef) -> Result<Transition, ConnectorError> {
        let mut inner = self.inner.lock();
        let transition = inner.link.connect_at(side, port)?;
        self.apply(&mut inner, transition);
        Ok(transition)
    }

    /// Detach the port on `side`.
    pub fn disconnect(self: &Arc<Self>, side: Side) -> Result<(PortRef, Disposition), ConnectorError> {
        let mut inner = self.inner.lock();
        let (port, transition) = inner.link.disconnect(side)?;
        self.apply(&mut inner, transition);
        let disposition = match transition {
            Transition::Emptied => Disposition::Dispose,
            _ => Disposition::Keep,
        };
        Ok((port, disposition))
    }

    /// Side holding `port`, if it is attached here.
    pub fn side_of(&self, port: PortRef) -> Option<Side> {
        self.inner.lock().link.side_of(port)
    }

    fn apply(self: &Arc<Self>, inner: &mut Inner, transition: Transition) {
        match transition {
            Transition::HalfOpen { .. } => {
                self.set_collider_enabled(inner, true);
                self.ensure_preview(inner);
            }
            Transition::Connected => {
                self.set_collider_enabled(inner, false);
                if let Some(preview) = inner.preview.take() {
                    self.physics.destroy_object(&preview);
                }
            }
            Transition::Opened { .. } => {
                self.set_collider_enabled(inner, true);
                if let Some(old) = inner.preview.take() {
                    self.physics.destroy_object(&old);
                }
                self.ensure_preview(inner);
            }
            Transition::Emptied => {}
        }
        self.publish_open_end(inner);
        tracing::debug!(connector = ?self.id, ?transition, "connector transition");
    }

    fn publish_open_end(&self, inner: &Inner) {
        let bits = match inner.link.state() {
            ConnectorState::HalfOpen(vacant) => inner
                .link
                .occupant(vacant.opposite())
                .map_or(0, |port| port.pipe.data().as_ffi()),
            _ => 0,
        };
        self.open_end.store(bits, Ordering::Release);
    }

    fn set_collider_enabled(&self, inner: &Inner, enabled: bool) {
        if let Some(collider) = &inner.collider {
            if let Err(e) = self.physics.set_enabled(collider, enabled) {
                tracing::warn!(connector = ?self.id, error = %e, "collider missing during transition");
            }
        }
    }

    fn ensure_preview(self: &Arc<Self>, inner: &mut Inner) {
        if inner.preview.is_some() {
            return;
        }
        let desc = BodyDesc {
            shape: self.shape.clone(),
            transform: self.transform,
            mass: 0.0,
            kinematic: true,
            enabled: false,
        };
        let preview = self.physics.add_object_with(desc, Arc::downgrade(self));
        if let Err(e) = self.physics.set_receives_raycasts(&preview, false) {
            tracing::warn!(connector = ?self.id, error = %e, "preview vanished on creation");
        }
        inner.preview = Some(preview);
    }

    // -- Flow --------------------------------------------------------------

    /// One application of the flow rule. Returns `None` when the connector
    /// is open, a pipe is gone or destroyed, or the two sides are balanced.
    pub fn flow(&self, interval: Fixed64) -> Option<Flow> {
        let inner = self.inner.lock();
        let [Some(a), Some(b)] = inner.link.occupants() else {
            return None;
        };
        if a.pipe == b.pipe {
            return None;
        }
        let arena = self.arena.upgrade()?;
        let pipe_a = arena.pipe(a.pipe)?;
        let pipe_b = arena.pipe(b.pipe)?;
        if pipe_a.is_destroyed() || pipe_b.is_destroyed() {
            return None;
        }
        let ca = pipe_a.port_container(a.port)?;
        let cb = pipe_b.port_container(b.port)?;

        let (mut sa, mut sb) = lock_pair(&*pipe_a, &*pipe_b);
        let side_a = sa.containers.get_mut(ca)?;
        let side_b = sb.containers.get_mut(cb)?;
        equalize(side_a, side_b, interval, self.flow_epsilon)
    }
}

impl<C: ResourceContainer> Entity for PipeConnector<C> {
    fn reference(&self) -> ReferenceId {
        self.reference
    }

    fn tick(&self, ctx: &TickContext) {
        self.flow(ctx.interval);
    }

    fn destroy(&self) {
        let mut inner = self.inner.lock();
        inner.link.dispose();
        self.publish_open_end(&inner);
        if let Some(collider) = inner.collider.take() {
            self.physics.destroy_object(&collider);
        }
        if let Some(preview) = inner.preview.take() {
            self.physics.destroy_object(&preview);
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
