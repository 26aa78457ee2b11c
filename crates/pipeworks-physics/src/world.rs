//! The lock-guarded physics façade and its dedicated step thread.
//!
//! # Architecture
//!
//! `PhysicsWorld` owns:
//! - The backend (the rigid-body engine) behind one world-wide lock
//! - `objects: SlotMap<ObjectId, Record>` mapping façade ids to backend bodies
//! - `by_body: HashMap<BodyHandle, ObjectId>` for query results
//! - A convex hull cache keyed by mesh identity, behind its own lock
//! - The physics [`Liveness`] and step counter
//!
//! Every operation that touches the backend takes the world lock for the
//! duration of the call. Transform reads from another thread are atomic per
//! call, not relative to a whole tick pass.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use std::sync::Weak;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use glam::Vec3;
use parking_lot::{Mutex, RwLock};
use pipeworks_core::clock::{FixedRate, Liveness, LoopHandle, LoopTiming, PauseFlag, WaitThresholds, spawn_fixed_loop};
use pipeworks_core::config::SimConfig;
use pipeworks_core::entity::Entity;
use slotmap::SlotMap;

use crate::backend::{BodyDesc, BodyHandle, PhysicsBackend, RayControl};
use crate::object::{ObjectId, PhysicsObject};
use crate::shape::{Aabb, ConvexHull, Mesh, MeshId, Ray, Shape, Transform};
use crate::rapier::RapierBackend;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors that can occur during physics operations.
#[derive(Debug, thiserror::Error)]
pub enum PhysicsError {
    #[error("physics object {0:?} has been destroyed")]
    DanglingReference(ObjectId),
    #[error("cannot reshape enabled physics object {0:?} in place")]
    UnsupportedShapeReshape(ObjectId),
    #[error("mesh has no usable vertices for a convex hull")]
    EmptyHull,
    #[error("the physics loop is already running")]
    AlreadyRunning,
    #[error("failed to spawn physics thread: {0}")]
    Spawn(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct Record {
    body: BodyHandle,
    object: PhysicsObject,
    mass: f32,
    kinematic: bool,
}

struct State {
    backend: Box<dyn PhysicsBackend>,
    objects: SlotMap<ObjectId, Record>,
    by_body: HashMap<BodyHandle, ObjectId>,
}

impl State {
    fn record(&self, obj: &PhysicsObject) -> Result<&Record, PhysicsError> {
        self.objects
            .get(obj.id)
            .filter(|r| r.object == *obj && !obj.is_destroyed())
            .ok_or(PhysicsError::DanglingReference(obj.id))
    }

    fn record_mut(&mut self, obj: &PhysicsObject) -> Result<&mut Record, PhysicsError> {
        self.objects
            .get_mut(obj.id)
            .filter(|r| r.object == *obj && !obj.is_destroyed())
            .ok_or(PhysicsError::DanglingReference(obj.id))
    }

    fn object_for(&self, body: BodyHandle) -> Option<&PhysicsObject> {
        let id = self.by_body.get(&body)?;
        self.objects.get(*id).map(|r| &r.object)
    }
}

// ---------------------------------------------------------------------------
// PhysicsWorld
// ---------------------------------------------------------------------------

/// Façade over a [`PhysicsBackend`], shared between the tick thread, the
/// physics thread, and interactive callers.
pub struct PhysicsWorld {
    state: Mutex<State>,
    hulls: RwLock<HashMap<MeshId, Arc<ConvexHull>>>,
    rate: FixedRate,
    wait: WaitThresholds,
    max_catch_up: u32,
    liveness: Arc<Liveness>,
    steps: AtomicU64,
    pause: PauseFlag,
    honors_pause: bool,
    running: AtomicBool,
}

impl std::fmt::Debug for PhysicsWorld {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhysicsWorld")
            .field("rate", &self.rate)
            .field("objects", &self.object_count())
            .field("steps", &self.step_count())
            .field("honors_pause", &self.honors_pause)
            .finish()
    }
}

impl PhysicsWorld {
    /// A world backed by [`RapierBackend`] with the configured gravity.
    pub fn new(config: &SimConfig, pause: PauseFlag) -> Self {
        let backend = RapierBackend::new(Vec3::from_array(config.gravity));
        Self::with_backend(config, pause, Box::new(backend))
    }

    pub fn with_backend(config: &SimConfig, pause: PauseFlag, backend: Box<dyn PhysicsBackend>) -> Self {
        let clock = config.clock();
        Self {
            state: Mutex::new(State {
                backend,
                objects: SlotMap::with_key(),
                by_body: HashMap::new(),
            }),
            hulls: RwLock::new(HashMap::new()),
            rate: clock.physics,
            wait: clock.wait,
            max_catch_up: config.max_catch_up,
            liveness: Arc::new(Liveness::new()),
            steps: AtomicU64::new(0),
            pause,
            honors_pause: config.physics_honors_pause,
            running: AtomicBool::new(false),
        }
    }

    // -- Objects -----------------------------------------------------------

    /// Create an enabled body owned by `owner`. The body is dynamic when
    /// `mass > 0` and it is not kinematic.
    pub fn add_object<E: Entity>(
        &self,
        shape: Shape,
        transform: Transform,
        mass: f32,
        kinematic: bool,
        owner: Weak<E>,
    ) -> PhysicsObject {
        self.add_object_with(
            BodyDesc {
                shape,
                transform,
                mass,
                kinematic,
                enabled: true,
            },
            owner,
        )
    }

    pub fn add_object_with<E: Entity>(&self, desc: BodyDesc, owner: Weak<E>) -> PhysicsObject {
        let mut state = self.state.lock();
        let mass = desc.mass;
        let kinematic = desc.kinematic;
        let enabled = desc.enabled;
        let dynamic = desc.is_dynamic();
        let body = state.backend.insert_body(desc);
        let id = state.objects.insert_with_key(|id| Record {
            body,
            object: PhysicsObject::new(id, owner, enabled),
            mass,
            kinematic,
        });
        state.by_body.insert(body, id);
        tracing::debug!(object = ?id, dynamic, enabled, "physics object created");
        state.objects[id].object.clone()
    }

    /// Remove `obj` from the backend. Idempotent.
    pub fn destroy_object(&self, obj: &PhysicsObject) {
        if obj.flags.destroyed.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut state = self.state.lock();
        let owned = state
            .objects
            .get(obj.id)
            .is_some_and(|r| r.object == *obj);
        if !owned {
            return;
        }
        if let Some(record) = state.objects.remove(obj.id) {
            state.by_body.remove(&record.body);
            state.backend.remove_body(record.body);
            tracing::debug!(object = ?obj.id, "physics object destroyed");
        }
    }

    pub fn contains(&self, obj: &PhysicsObject) -> bool {
        self.state.lock().record(obj).is_ok()
    }

    pub fn transform(&self, obj: &PhysicsObject) -> Result<Transform, PhysicsError> {
        let state = self.state.lock();
        let body = state.record(obj)?.body;
        state
            .backend
            .body_transform(body)
            .ok_or(PhysicsError::DanglingReference(obj.id))
    }

    pub fn set_transform(&self, obj: &PhysicsObject, transform: Transform) -> Result<(), PhysicsError> {
        let mut state = self.state.lock();
        let body = state.record(obj)?.body;
        state.backend.set_body_transform(body, transform);
        Ok(())
    }

    /// Enable or disable a body. Disabled bodies are invisible to queries
    /// and frozen in the simulation.
    pub fn set_enabled(&self, obj: &PhysicsObject, enabled: bool) -> Result<(), PhysicsError> {
        let mut state = self.state.lock();
        let body = state.record(obj)?.body;
        state.backend.set_body_enabled(body, enabled);
        obj.flags.enabled.store(enabled, Ordering::Release);
        Ok(())
    }

    pub fn set_receives_raycasts(&self, obj: &PhysicsObject, receives: bool) -> Result<(), PhysicsError> {
        let state = self.state.lock();
        state.record(obj)?;
        obj.flags.receives_raycasts.store(receives, Ordering::Release);
        Ok(())
    }

    // -- Reshaping ---------------------------------------------------------

    /// Replace the collider by removing the body and creating a new one at
    /// the same pose. The [`ObjectId`] and every clone of `obj` stay valid.
    pub fn reshape(&self, obj: &PhysicsObject, shape: Shape) -> Result<(), PhysicsError> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let (old, mass, kinematic) = {
            let r = state.record(obj)?;
            (r.body, r.mass, r.kinematic)
        };
        let transform = state
            .backend
            .body_transform(old)
            .ok_or(PhysicsError::DanglingReference(obj.id))?;
        state.backend.remove_body(old);
        state.by_body.remove(&old);
        let body = state.backend.insert_body(BodyDesc {
            shape,
            transform,
            mass,
            kinematic,
            enabled: obj.is_enabled(),
        });
        state.by_body.insert(body, obj.id);
        state.record_mut(obj)?.body = body;
        tracing::debug!(object = ?obj.id, "physics object recreated with new shape");
        Ok(())
    }

    /// Swap the collider of a live body. Rejected while the body is enabled,
    /// since changing an active collider destabilizes the solver.
    pub fn reshape_in_place(&self, obj: &PhysicsObject, shape: Shape) -> Result<(), PhysicsError> {
        let mut state = self.state.lock();
        let body = state.record(obj)?.body;
        if obj.is_enabled() {
            return Err(PhysicsError::UnsupportedShapeReshape(obj.id));
        }
        state.backend.set_body_shape(body, shape);
        Ok(())
    }

    // -- Queries -----------------------------------------------------------

    /// First object along the ray whose owner is a `T` and which is enabled
    /// and receives raycasts.
    pub fn raycast<T: Entity>(&self, origin: Vec3, direction: Vec3, max_distance: f32) -> Option<PhysicsObject> {
        let ray = Ray::new(origin, direction)?;
        let guard = self.state.lock();
        let state: &State = &guard;
        let mut found: Option<PhysicsObject> = None;
        state.backend.cast_ray(&ray, max_distance, &mut |body, _toi| {
            if found.is_some() {
                return RayControl::Stop;
            }
            match state.object_for(body) {
                Some(obj) if obj.is_enabled() && obj.receives_raycasts() && obj.owner_is::<T>() => {
                    found = Some(obj.clone());
                    RayControl::Stop
                }
                _ => RayControl::Continue,
            }
        });
        found
    }

    /// Broad-phase overlap at a zero-volume box around `point`. When several
    /// `T`-owned objects overlap, the last one the engine enumerates wins.
    pub fn approx_overlap_point<T: Entity>(&self, point: Vec3) -> Option<PhysicsObject> {
        self.approx_overlap_point_filtered::<T>(point, |_| true)
    }

    /// Like [`approx_overlap_point`](Self::approx_overlap_point) with an
    /// extra predicate. `accept` runs under the world lock and must not call
    /// back into this world.
    pub fn approx_overlap_point_filtered<T: Entity>(
        &self,
        point: Vec3,
        accept: impl Fn(&PhysicsObject) -> bool,
    ) -> Option<PhysicsObject> {
        let guard = self.state.lock();
        let state: &State = &guard;
        let mut found: Option<PhysicsObject> = None;
        state.backend.query_aabb(&Aabb::from_point(point), &mut |body| {
            if let Some(obj) = state.object_for(body) {
                if obj.owner_is::<T>() && accept(obj) {
                    found = Some(obj.clone());
                }
            }
        });
        found
    }

    /// Convex hull for `mesh`, computed once and cached by mesh identity.
    /// Concurrent first callers may both compute; the first insert wins and
    /// every caller gets the cached hull.
    pub fn convex_hull_for_mesh(&self, mesh: &Mesh) -> Result<Arc<ConvexHull>, PhysicsError> {
        if let Some(hull) = self.hulls.read().get(&mesh.id) {
            return Ok(Arc::clone(hull));
        }
        let computed = self
            .state
            .lock()
            .backend
            .convex_hull(&mesh.vertices)
            .ok_or(PhysicsError::EmptyHull)?;
        let mut hulls = self.hulls.write();
        match hulls.entry(mesh.id) {
            Entry::Occupied(cached) => {
                tracing::warn!(mesh = ?mesh.id, "redundant convex hull computation discarded");
                Ok(Arc::clone(cached.get()))
            }
            Entry::Vacant(slot) => Ok(Arc::clone(slot.insert(Arc::new(computed)))),
        }
    }

    pub fn cached_hull_count(&self) -> usize {
        self.hulls.read().len()
    }

    // -- Stepping ----------------------------------------------------------

    /// Advance the backend by one fixed physics interval.
    pub fn step(&self) -> u64 {
        let dt = self.rate.interval_secs_f32();
        self.state.lock().backend.step(dt);
        self.steps.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Spawn the physics thread. It ignores the pause flag unless
    /// `physics_honors_pause` was configured.
    pub fn run(self: &Arc<Self>) -> Result<LoopHandle, PhysicsError> {
        if self.running.swap(true, Ordering::AcqRel) {
            return Err(PhysicsError::AlreadyRunning);
        }
        let world = Arc::clone(self);
        let timing = LoopTiming {
            rate: self.rate,
            wait: self.wait,
            max_catch_up: self.max_catch_up,
        };
        let spawned = spawn_fixed_loop("pipeworks-physics", timing, Arc::clone(&self.liveness), move |_| {
            if world.honors_pause && world.pause.is_paused() {
                return false;
            }
            world.step();
            true
        });
        spawned.map_err(|e| {
            self.running.store(false, Ordering::Release);
            PhysicsError::Spawn(e)
        })
    }

    // -- Observation -------------------------------------------------------

    pub fn object_count(&self) -> usize {
        self.state.lock().objects.len()
    }

    pub fn body_count(&self) -> usize {
        self.state.lock().backend.body_count()
    }

    pub fn step_count(&self) -> u64 {
        self.steps.load(Ordering::Acquire)
    }

    pub fn liveness_glyph(&self) -> char {
        self.liveness.glyph()
    }

    pub fn liveness(&self) -> &Liveness {
        &self.liveness
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn honors_pause(&self) -> bool {
        self.honors_pause
    }

    pub fn rate(&self) -> FixedRate {
        self.rate
    }
}

// ===========================================================================
// Tests
// ===========================================================================
