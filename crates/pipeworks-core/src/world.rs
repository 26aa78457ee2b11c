//! The entity registry and its dedicated tick thread.
//!
//! # Architecture
//!
//! The `SimulationWorld` owns:
//! - The registry: `ReferenceId -> Arc<dyn Entity>` behind one coarse lock
//! - The tick counter, last pass duration, and tick [`Liveness`]
//! - The shared [`PauseFlag`]
//! - A load gate that keeps ticking from starting mid-load
//!
//! The registry lock is held for a whole tick pass and for every structural
//! change, so no entity is ever added or removed while another is ticking and
//! no two entities tick concurrently. [`Entity::destroy`] runs after the
//! lock is released.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::clock::{Clock, Liveness, LoopHandle, LoopTiming, PauseFlag, spawn_fixed_loop};
use crate::config::SimConfig;
use crate::entity::{Entity, TickContext};
use crate::fixed::Ticks;
use crate::id::ReferenceId;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors that can occur during world operations.
#[derive(Debug, thiserror::Error)]
pub enum WorldError {
    #[error("entity {0} is already registered")]
    DuplicateEntity(ReferenceId),
    #[error("the tick loop is already running")]
    AlreadyTicking,
    #[error("cannot start ticking while {pending} load(s) are in progress")]
    LoadInProgress { pending: usize },
    #[error("failed to spawn loop thread: {0}")]
    Spawn(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// SimulationWorld
// ---------------------------------------------------------------------------

/// Owns the entity registry and drives [`Entity::tick`] at a fixed rate.
#[derive(Debug)]
pub struct SimulationWorld {
    entities: Mutex<BTreeMap<ReferenceId, Arc<dyn Entity>>>,
    clock: Clock,
    max_catch_up: u32,
    tick_count: AtomicU64,
    last_pass_nanos: AtomicU64,
    liveness: Arc<Liveness>,
    pause: PauseFlag,
    pending_loads: AtomicUsize,
    ticking: AtomicBool,
}

impl SimulationWorld {
    /// Create a world with its own pause flag.
    pub fn new(config: &SimConfig) -> Self {
        Self::with_pause(config, PauseFlag::new())
    }

    /// Create a world that observes a pause flag shared with other loops.
    pub fn with_pause(config: &SimConfig, pause: PauseFlag) -> Self {
        Self {
            entities: Mutex::new(BTreeMap::new()),
            clock: config.clock(),
            max_catch_up: config.max_catch_up,
            tick_count: AtomicU64::new(0),
            last_pass_nanos: AtomicU64::new(0),
            liveness: Arc::new(Liveness::new()),
            pause,
            pending_loads: AtomicUsize::new(0),
            ticking: AtomicBool::new(false),
        }
    }

    // -- Registry ----------------------------------------------------------

    /// Register an entity. Fails without touching the registry if an entity
    /// with the same reference is already present.
    pub fn add_entity(&self, entity: Arc<dyn Entity>) -> Result<(), WorldError> {
        let reference = entity.reference();
        let mut entities = self.entities.lock();
        if entities.contains_key(&reference) {
            return Err(WorldError::DuplicateEntity(reference));
        }
        entities.insert(reference, entity);
        Ok(())
    }

    /// Remove an entity and destroy it. Returns false (and destroys nothing)
    /// if it was not registered.
    pub fn remove_entity(&self, reference: ReferenceId) -> bool {
        let removed = self.entities.lock().remove(&reference);
        match removed {
            Some(entity) => {
                entity.destroy();
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, reference: ReferenceId) -> bool {
        self.entities.lock().contains_key(&reference)
    }

    pub fn get(&self, reference: ReferenceId) -> Option<Arc<dyn Entity>> {
        self.entities.lock().get(&reference).cloned()
    }

    pub fn entity_count(&self) -> usize {
        self.entities.lock().len()
    }

    /// Forward a player interaction to a registered entity.
    pub fn interact(&self, reference: ReferenceId) -> bool {
        match self.get(reference) {
            Some(entity) => {
                entity.interacted();
                true
            }
            None => false,
        }
    }

    // -- Ticking -----------------------------------------------------------

    /// Run one tick pass synchronously on the calling thread.
    pub fn tick_once(&self) -> Ticks {
        self.run_pass(self.clock.tick.interval())
    }

    fn run_pass(&self, elapsed: Duration) -> Ticks {
        let started = Instant::now();
        let tick = self.tick_count.fetch_add(1, Ordering::AcqRel) + 1;
        let ctx = TickContext {
            tick,
            interval: self.clock.tick.interval_fixed(),
            elapsed,
        };
        {
            let entities = self.entities.lock();
            for entity in entities.values() {
                entity.tick(&ctx);
            }
        }
        let nanos = started.elapsed().as_nanos().min(u64::MAX as u128) as u64;
        self.last_pass_nanos.store(nanos, Ordering::Relaxed);
        tick
    }

    /// Spawn the tick thread.
    ///
    /// Fails if the thread is already running or a load is in progress. The
    /// loop has no supervisor: a panic inside a tick ends this thread only.
    pub fn start_ticking(self: &Arc<Self>) -> Result<LoopHandle, WorldError> {
        let pending = self.pending_loads.load(Ordering::Acquire);
        if pending > 0 {
            return Err(WorldError::LoadInProgress { pending });
        }
        if self.ticking.swap(true, Ordering::AcqRel) {
            return Err(WorldError::AlreadyTicking);
        }

        let world = Arc::clone(self);
        let timing = LoopTiming {
            rate: self.clock.tick,
            wait: self.clock.wait,
            max_catch_up: self.max_catch_up,
        };
        let spawned = spawn_fixed_loop("pipeworks-tick", timing, Arc::clone(&self.liveness), move |elapsed| {
            if world.pause.is_paused() {
                return false;
            }
            world.run_pass(elapsed);
            true
        });
        match spawned {
            Ok(handle) => Ok(handle),
            Err(e) => {
                self.ticking.store(false, Ordering::Release);
                Err(WorldError::Spawn(e))
            }
        }
    }

    pub fn is_ticking(&self) -> bool {
        self.ticking.load(Ordering::Acquire)
    }

    // -- Load gate ---------------------------------------------------------

    /// Hold ticking back until the returned guard is dropped.
    pub fn begin_load(&self) -> LoadGuard<'_> {
        self.pending_loads.fetch_add(1, Ordering::AcqRel);
        LoadGuard { world: self }
    }

    pub fn pending_loads(&self) -> usize {
        self.pending_loads.load(Ordering::Acquire)
    }

    // -- Observation -------------------------------------------------------

    pub fn tick_count(&self) -> Ticks {
        self.tick_count.load(Ordering::Acquire)
    }

    /// Wall time spent inside the most recent pass.
    pub fn last_tick_duration(&self) -> Duration {
        Duration::from_nanos(self.last_pass_nanos.load(Ordering::Relaxed))
    }

    pub fn liveness_glyph(&self) -> char {
        self.liveness.glyph()
    }

    pub fn liveness(&self) -> &Liveness {
        &self.liveness
    }

    pub fn pause_flag(&self) -> &PauseFlag {
        &self.pause
    }

    pub fn is_paused(&self) -> bool {
        self.pause.is_paused()
    }

    pub fn set_paused(&self, paused: bool) {
        self.pause.set_paused(paused);
    }

    pub fn clock(&self) -> &Clock {
        &self.clock
    }
}

/// Keeps [`SimulationWorld::start_ticking`] from succeeding while alive.
#[derive(Debug)]
pub struct LoadGuard<'a> {
    world: &'a SimulationWorld,
}

impl Drop for LoadGuard<'_> {
    fn drop(&mut self) {
        self.world.pending_loads.fetch_sub(1, Ordering::AcqRel);
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::TrackedEntity;

    fn world() -> SimulationWorld {
        SimulationWorld::new(&SimConfig::default())
    }

    // -----------------------------------------------------------------------
    // Test 1: add and remove
    // -----------------------------------------------------------------------
    #[test]
    fn add_then_remove_destroys_once() {
        let world = world();
        let tracker = Arc::new(TrackedEntity::new());
        world.add_entity(tracker.clone()).unwrap();
        assert_eq!(world.entity_count(), 1);

        assert!(world.remove_entity(tracker.reference()));
        assert_eq!(world.entity_count(), 0);
        assert_eq!(tracker.destroy_count(), 1);
    }

    // -----------------------------------------------------------------------
    // Test 2: duplicate add leaves one entry
    // -----------------------------------------------------------------------
    #[test]
    fn duplicate_add_is_rejected() {
        let world = world();
        let tracker = Arc::new(TrackedEntity::new());
        world.add_entity(tracker.clone()).unwrap();
        let err = world.add_entity(tracker.clone()).unwrap_err();
        assert!(matches!(err, WorldError::DuplicateEntity(r) if r == tracker.reference()));
        assert_eq!(world.entity_count(), 1);
    }

    // -----------------------------------------------------------------------
    // Test 3: removing an absent entity is a no-op
    // -----------------------------------------------------------------------
    #[test]
    fn remove_absent_is_noop() {
        let world = world();
        let tracker = Arc::new(TrackedEntity::new());
        assert!(!world.remove_entity(tracker.reference()));
        assert_eq!(tracker.destroy_count(), 0);
    }

    // -----------------------------------------------------------------------
    // Test 4: a pass ticks every entity once
    // -----------------------------------------------------------------------
    #[test]
    fn tick_once_ticks_every_entity() {
        let world = world();
        let trackers: Vec<_> = (0..5).map(|_| Arc::new(TrackedEntity::new())).collect();
        for p in &trackers {
            world.add_entity(p.clone()).unwrap();
        }
        assert_eq!(world.tick_once(), 1);
        assert_eq!(world.tick_once(), 2);
        for p in &trackers {
            assert_eq!(p.tick_count(), 2);
            assert_eq!(p.last_tick(), 2);
        }
        assert_eq!(world.tick_count(), 2);
    }

    // -----------------------------------------------------------------------
    // Test 5: removed entities stop ticking
    // -----------------------------------------------------------------------
    #[test]
    fn removed_entity_is_not_ticked() {
        let world = world();
        let tracker = Arc::new(TrackedEntity::new());
        world.add_entity(tracker.clone()).unwrap();
        world.tick_once();
        world.remove_entity(tracker.reference());
        world.tick_once();
        assert_eq!(tracker.tick_count(), 1);
    }

    // -----------------------------------------------------------------------
    // Test 6: interaction is forwarded
    // -----------------------------------------------------------------------
    #[test]
    fn interact_forwards_to_entity() {
        let world = world();
        let tracker = Arc::new(TrackedEntity::new());
        world.add_entity(tracker.clone()).unwrap();
        assert!(world.interact(tracker.reference()));
        assert!(!world.interact(ReferenceId(u64::MAX)));
        assert_eq!(tracker.interaction_count(), 1);
    }

    // -----------------------------------------------------------------------
    // Test 7: load gate blocks ticking
    // -----------------------------------------------------------------------
    #[test]
    fn load_guard_blocks_start_ticking() {
        let world = Arc::new(world());
        {
            let _guard = world.begin_load();
            let err = world.start_ticking().unwrap_err();
            assert!(matches!(err, WorldError::LoadInProgress { pending: 1 }));
        }
        assert_eq!(world.pending_loads(), 0);
        let handle = world.start_ticking().unwrap();
        handle.stop().unwrap();
    }

    // -----------------------------------------------------------------------
    // Test 8: second start is rejected
    // -----------------------------------------------------------------------
    #[test]
    fn start_ticking_twice_is_rejected() {
        let world = Arc::new(world());
        let handle = world.start_ticking().unwrap();
        assert!(matches!(world.start_ticking(), Err(WorldError::AlreadyTicking)));
        handle.stop().unwrap();
    }

    // -----------------------------------------------------------------------
    // Test 9: pause stops passes but not the thread
    // -----------------------------------------------------------------------
    #[test]
    fn paused_world_does_not_tick() {
        let world = Arc::new(world());
        world.set_paused(true);
        let handle = world.start_ticking().unwrap();
        std::thread::sleep(Duration::from_millis(100));
        assert_eq!(world.tick_count(), 0);
        assert!(!handle.is_finished());

        world.set_paused(false);
        std::thread::sleep(Duration::from_millis(100));
        handle.stop().unwrap();
        assert!(world.tick_count() > 0);
    }

    // -----------------------------------------------------------------------
    // Test 10: a panicking entity ends the tick thread only
    // -----------------------------------------------------------------------
    #[test]
    fn panic_in_tick_kills_only_the_tick_thread() {
        let world = Arc::new(world());
        let tracker = Arc::new(TrackedEntity::panicking_at(3));
        world.add_entity(tracker.clone()).unwrap();
        let handle = world.start_ticking().unwrap();
        std::thread::sleep(Duration::from_millis(300));

        assert!(handle.is_finished());
        assert_eq!(world.tick_count(), 3);
        // The registry lock was released during unwind.
        assert_eq!(world.entity_count(), 1);
        assert!(handle.stop().is_err());
    }
}
