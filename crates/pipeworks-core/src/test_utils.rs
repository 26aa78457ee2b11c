//! Helpers shared by unit tests and by downstream crates' tests.

use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::entity::{Entity, TickContext};
use crate::fixed::{Fixed64, Ticks};
use crate::id::{ReferenceId, next_reference};

pub fn fixed(v: f64) -> Fixed64 {
    Fixed64::from_num(v)
}

/// An entity that records what the world did to it.
#[derive(Debug)]
pub struct TrackedEntity {
    reference: ReferenceId,
    ticks: AtomicU64,
    last_tick: AtomicU64,
    destroys: AtomicU64,
    interactions: AtomicU64,
    panic_at: Option<Ticks>,
    tick_delay: Option<Duration>,
}

impl TrackedEntity {
    pub fn new() -> Self {
        Self {
            reference: next_reference(),
            ticks: AtomicU64::new(0),
            last_tick: AtomicU64::new(0),
            destroys: AtomicU64::new(0),
            interactions: AtomicU64::new(0),
            panic_at: None,
            tick_delay: None,
        }
    }

    /// Panics when ticked with tick number `tick`.
    pub fn panicking_at(tick: Ticks) -> Self {
        Self {
            panic_at: Some(tick),
            ..Self::new()
        }
    }

    /// Sleeps for `delay` inside every tick.
    pub fn slow(delay: Duration) -> Self {
        Self {
            tick_delay: Some(delay),
            ..Self::new()
        }
    }

    pub fn tick_count(&self) -> u64 {
        self.ticks.load(Ordering::Acquire)
    }

    pub fn last_tick(&self) -> Ticks {
        self.last_tick.load(Ordering::Acquire)
    }

    pub fn destroy_count(&self) -> u64 {
        self.destroys.load(Ordering::Acquire)
    }

    pub fn interaction_count(&self) -> u64 {
        self.interactions.load(Ordering::Acquire)
    }
}

impl Default for TrackedEntity {
    fn default() -> Self {
        Self::new()
    }
}

impl Entity for TrackedEntity {
    fn reference(&self) -> ReferenceId {
        self.reference
    }

    fn tick(&self, ctx: &TickContext) {
        if self.panic_at == Some(ctx.tick) {
            panic!("tracker {} asked to panic at tick {}", self.reference, ctx.tick);
        }
        if let Some(delay) = self.tick_delay {
            std::thread::sleep(delay);
        }
        self.last_tick.store(ctx.tick, Ordering::Release);
        self.ticks.fetch_add(1, Ordering::AcqRel);
    }

    fn interacted(&self) {
        self.interactions.fetch_add(1, Ordering::AcqRel);
    }

    fn destroy(&self) {
        self.destroys.fetch_add(1, Ordering::AcqRel);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
