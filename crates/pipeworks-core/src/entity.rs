//! The entity capability: anything tickable, interactable, and destructible.

use std::any::Any;
use std::time::Duration;

use crate::fixed::{Fixed64, Ticks};
use crate::id::ReferenceId;

/// Passed to every [`Entity::tick`] of one pass.
#[derive(Debug, Clone, Copy)]
pub struct TickContext {
    /// Tick number of this pass, starting at 1.
    pub tick: Ticks,
    /// Fixed tick interval in seconds. Simulation math uses this, never
    /// `elapsed`.
    pub interval: Fixed64,
    /// Measured wall time since the previous pass.
    pub elapsed: Duration,
}

/// Anything registered with a [`SimulationWorld`](crate::world::SimulationWorld).
///
/// Entities are shared behind `Arc` and mutated through their own interior
/// locks, so every method takes `&self`. The default `tick` and `interacted`
/// are no-ops.
pub trait Entity: Send + Sync + 'static {
    /// The stable identity of this entity.
    fn reference(&self) -> ReferenceId;

    /// Called once per tick pass while the entity is registered.
    fn tick(&self, ctx: &TickContext) {
        let _ = ctx;
    }

    /// Called when a player interacts with the entity.
    fn interacted(&self) {}

    /// Release everything the entity owns (physics bodies, subscriptions).
    /// The world calls this exactly once, after removing the entity.
    fn destroy(&self);

    /// Downcast support for capability filtering.
    fn as_any(&self) -> &dyn Any;
}

impl dyn Entity {
    /// Whether this entity is a `T`.
    pub fn is<T: Entity>(&self) -> bool {
        self.as_any().is::<T>()
    }

    pub fn downcast_ref<T: Entity>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }
}

impl std::fmt::Debug for dyn Entity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Entity({})", self.reference())
    }
}
