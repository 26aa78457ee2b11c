//! The boundary to the rigid-body engine.
//!
//! [`PhysicsWorld`](crate::world::PhysicsWorld) only ever talks to the engine
//! through [`PhysicsBackend`]: body add/remove by description, pose access,
//! broad-phase queries, hull construction, and stepping. Contact resolution
//! lives behind this trait and is not modelled here.

use glam::Vec3;
use slotmap::new_key_type;

use crate::shape::{Aabb, ConvexHull, Ray, Shape, Transform};

new_key_type! {
    /// Handle to a body inside a backend.
    pub struct BodyHandle;
}

/// Everything a backend needs to create a body.
#[derive(Debug, Clone, PartialEq)]
pub struct BodyDesc {
    pub shape: Shape,
    pub transform: Transform,
    pub mass: f32,
    pub kinematic: bool,
    pub enabled: bool,
}

impl BodyDesc {
    /// Dynamic bodies are simulated; everything else only moves when told.
    pub fn is_dynamic(&self) -> bool {
        self.mass > 0.0 && !self.kinematic
    }
}

/// Returned by a ray callback to keep or stop the traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RayControl {
    Continue,
    Stop,
}

/// A rigid-body engine as seen by the façade.
///
/// Implementations are single-threaded; the façade serializes every call
/// behind its own lock. Operations on unknown handles are ignored or return
/// `None`.
pub trait PhysicsBackend: Send + 'static {
    fn insert_body(&mut self, desc: BodyDesc) -> BodyHandle;

    /// Returns false if the handle was unknown.
    fn remove_body(&mut self, body: BodyHandle) -> bool;

    fn body_transform(&self, body: BodyHandle) -> Option<Transform>;

    fn set_body_transform(&mut self, body: BodyHandle, transform: Transform) -> bool;

    /// Disabled bodies neither simulate nor show up in queries.
    fn set_body_enabled(&mut self, body: BodyHandle, enabled: bool) -> bool;

    /// Replace a live body's collider in place.
    fn set_body_shape(&mut self, body: BodyHandle, shape: Shape) -> bool;

    /// Visit enabled bodies whose shape `ray` hits within `max_toi`,
    /// nearest first, until the callback returns [`RayControl::Stop`].
    fn cast_ray(
        &self,
        ray: &Ray,
        max_toi: f32,
        visit: &mut dyn FnMut(BodyHandle, f32) -> RayControl,
    );

    /// Visit every enabled body whose bounds overlap `aabb`. Broad phase
    /// only: no narrow-phase refinement.
    fn query_aabb(&self, aabb: &Aabb, visit: &mut dyn FnMut(BodyHandle));

    fn convex_hull(&self, points: &[Vec3]) -> Option<ConvexHull> {
        ConvexHull::from_points(points)
    }

    /// Advance the simulation by `dt` seconds.
    fn step(&mut self, dt: f32);

    fn body_count(&self) -> usize;
}
