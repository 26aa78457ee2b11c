//! The default engine: rapier3d behind the [`PhysicsBackend`] boundary.
//!
//! Every façade body is one rigid body with one collider attached at its
//! origin. The collider's `user_data` carries the [`BodyHandle`] so query
//! results map straight back to façade ids. The query pipeline is rebuilt
//! after each mutation, so queries always see the latest poses and flags.

use glam::{Quat, Vec3};
use rapier3d::dynamics::{
    CCDSolver, ImpulseJointSet, IntegrationParameters, IslandManager, MultibodyJointSet, RigidBodyBuilder,
    RigidBodyHandle, RigidBodySet,
};
use rapier3d::geometry::{
    Collider, ColliderBuilder, ColliderHandle, ColliderSet, DefaultBroadPhase, NarrowPhase, SharedShape,
};
use rapier3d::na::{Isometry3, Point3, Quaternion, Translation3, UnitQuaternion, Vector3};
use rapier3d::parry::bounding_volume::Aabb as EngineAabb;
use rapier3d::parry::query::Ray as EngineRay;
use rapier3d::pipeline::{PhysicsPipeline, QueryFilter, QueryPipeline};
use slotmap::{Key, KeyData, SlotMap};

use crate::backend::{BodyDesc, BodyHandle, PhysicsBackend, RayControl};
use crate::shape::{Aabb, Ray, Shape, Transform};

/// Thinnest half extent used when a flat hull falls back to a box.
const MIN_HALF_EXTENT: f32 = 1e-3;

#[derive(Debug, Clone, Copy)]
struct Body {
    rigid: RigidBodyHandle,
    collider: ColliderHandle,
}

/// [`PhysicsBackend`] over a rapier3d pipeline.
pub struct RapierBackend {
    gravity: Vector3<f32>,
    params: IntegrationParameters,
    pipeline: PhysicsPipeline,
    islands: IslandManager,
    broad_phase: DefaultBroadPhase,
    narrow_phase: NarrowPhase,
    rigid_bodies: RigidBodySet,
    colliders: ColliderSet,
    impulse_joints: ImpulseJointSet,
    multibody_joints: MultibodyJointSet,
    ccd: CCDSolver,
    query: QueryPipeline,
    bodies: SlotMap<BodyHandle, Body>,
}

impl std::fmt::Debug for RapierBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RapierBackend")
            .field("gravity", &self.gravity())
            .field("bodies", &self.bodies.len())
            .finish()
    }
}

impl RapierBackend {
    pub fn new(gravity: Vec3) -> Self {
        Self {
            gravity: Vector3::new(gravity.x, gravity.y, gravity.z),
            params: IntegrationParameters::default(),
            pipeline: PhysicsPipeline::new(),
            islands: IslandManager::new(),
            broad_phase: DefaultBroadPhase::new(),
            narrow_phase: NarrowPhase::new(),
            rigid_bodies: RigidBodySet::new(),
            colliders: ColliderSet::new(),
            impulse_joints: ImpulseJointSet::new(),
            multibody_joints: MultibodyJointSet::new(),
            ccd: CCDSolver::new(),
            query: QueryPipeline::new(),
            bodies: SlotMap::with_key(),
        }
    }

    pub fn gravity(&self) -> Vec3 {
        Vec3::new(self.gravity.x, self.gravity.y, self.gravity.z)
    }

    pub fn body_velocity(&self, body: BodyHandle) -> Option<Vec3> {
        let entry = self.bodies.get(body)?;
        let v = self.rigid_bodies.get(entry.rigid)?.linvel();
        Some(Vec3::new(v.x, v.y, v.z))
    }

    /// The façade handle stored on `collider`, if it is still live.
    fn body_of(&self, collider: ColliderHandle) -> Option<BodyHandle> {
        let raw = self.colliders.get(collider)?.user_data;
        let body = BodyHandle::from(KeyData::from_ffi(raw as u64));
        self.bodies.contains_key(body).then_some(body)
    }

    fn refresh_queries(&mut self) {
        self.query.update(&self.colliders);
    }
}

impl Default for RapierBackend {
    fn default() -> Self {
        Self::new(Vec3::new(0.0, -9.81, 0.0))
    }
}

// ---------------------------------------------------------------------------
// Conversions
// ---------------------------------------------------------------------------

fn point(v: Vec3) -> Point3<f32> {
    Point3::new(v.x, v.y, v.z)
}

fn isometry(t: &Transform) -> Isometry3<f32> {
    let q = t.rotation;
    Isometry3::from_parts(
        Translation3::new(t.translation.x, t.translation.y, t.translation.z),
        UnitQuaternion::from_quaternion(Quaternion::new(q.w, q.x, q.y, q.z)),
    )
}

fn transform(iso: &Isometry3<f32>) -> Transform {
    let t = iso.translation.vector;
    let q = iso.rotation.quaternion();
    Transform::new(Vec3::new(t.x, t.y, t.z), Quat::from_xyzw(q.i, q.j, q.k, q.w))
}

fn shared_shape(shape: &Shape) -> SharedShape {
    match shape {
        Shape::Ball { radius } => SharedShape::ball(*radius),
        Shape::Cuboid { half_extents } => SharedShape::cuboid(half_extents.x, half_extents.y, half_extents.z),
        Shape::Hull(hull) => {
            let points: Vec<Point3<f32>> = hull.points().iter().copied().map(point).collect();
            SharedShape::convex_hull(&points).unwrap_or_else(|| {
                // Flat or tiny clouds have no volume; bound them with a thin box.
                let bounds = hull.local_aabb();
                let half = bounds.half_extents().max(Vec3::splat(MIN_HALF_EXTENT));
                let center = bounds.center();
                SharedShape::compound(vec![(
                    Isometry3::translation(center.x, center.y, center.z),
                    SharedShape::cuboid(half.x, half.y, half.z),
                )])
            })
        }
    }
}

// ---------------------------------------------------------------------------
// PhysicsBackend
// ---------------------------------------------------------------------------

impl PhysicsBackend for RapierBackend {
    fn insert_body(&mut self, desc: BodyDesc) -> BodyHandle {
        let builder = if desc.is_dynamic() {
            RigidBodyBuilder::dynamic()
        } else if desc.kinematic {
            RigidBodyBuilder::kinematic_position_based()
        } else {
            RigidBodyBuilder::fixed()
        };
        let pose = isometry(&desc.transform);
        let rigid_body = builder.position(pose).enabled(desc.enabled).build();
        let shape = shared_shape(&desc.shape);

        let Self {
            rigid_bodies,
            colliders,
            bodies,
            ..
        } = self;
        let handle = bodies.insert_with_key(|key| {
            let rigid = rigid_bodies.insert(rigid_body);
            let collider = ColliderBuilder::new(shape)
                .mass(desc.mass.max(0.0))
                .enabled(desc.enabled)
                .user_data(u128::from(key.data().as_ffi()))
                .build();
            let collider = colliders.insert_with_parent(collider, rigid, rigid_bodies);
            if let Some(c) = colliders.get_mut(collider) {
                c.set_position(pose);
            }
            Body { rigid, collider }
        });
        self.refresh_queries();
        handle
    }

    fn remove_body(&mut self, body: BodyHandle) -> bool {
        let Some(entry) = self.bodies.remove(body) else {
            return false;
        };
        self.rigid_bodies.remove(
            entry.rigid,
            &mut self.islands,
            &mut self.colliders,
            &mut self.impulse_joints,
            &mut self.multibody_joints,
            true,
        );
        self.refresh_queries();
        true
    }

    fn body_transform(&self, body: BodyHandle) -> Option<Transform> {
        let entry = self.bodies.get(body)?;
        self.rigid_bodies.get(entry.rigid).map(|rb| transform(rb.position()))
    }

    fn set_body_transform(&mut self, body: BodyHandle, t: Transform) -> bool {
        let Some(entry) = self.bodies.get(body).copied() else {
            return false;
        };
        let pose = isometry(&t);
        if let Some(rb) = self.rigid_bodies.get_mut(entry.rigid) {
            rb.set_position(pose, true);
        }
        if let Some(c) = self.colliders.get_mut(entry.collider) {
            c.set_position(pose);
        }
        self.refresh_queries();
        true
    }

    fn set_body_enabled(&mut self, body: BodyHandle, enabled: bool) -> bool {
        let Some(entry) = self.bodies.get(body).copied() else {
            return false;
        };
        if let Some(rb) = self.rigid_bodies.get_mut(entry.rigid) {
            rb.set_enabled(enabled);
            if !enabled {
                rb.set_linvel(Vector3::zeros(), false);
            }
        }
        if let Some(c) = self.colliders.get_mut(entry.collider) {
            c.set_enabled(enabled);
        }
        self.refresh_queries();
        true
    }

    fn set_body_shape(&mut self, body: BodyHandle, shape: Shape) -> bool {
        let Some(entry) = self.bodies.get(body).copied() else {
            return false;
        };
        let Some(c) = self.colliders.get_mut(entry.collider) else {
            return false;
        };
        c.set_shape(shared_shape(&shape));
        self.refresh_queries();
        true
    }

    fn cast_ray(&self, ray: &Ray, max_toi: f32, visit: &mut dyn FnMut(BodyHandle, f32) -> RayControl) {
        let engine_ray = EngineRay::new(point(ray.origin), Vector3::new(ray.dir.x, ray.dir.y, ray.dir.z));
        // Each cast returns the nearest collider not yet reported, so hits
        // arrive in distance order.
        let mut seen: Vec<ColliderHandle> = Vec::new();
        loop {
            let unseen = |handle: ColliderHandle, collider: &Collider| collider.is_enabled() && !seen.contains(&handle);
            let filter = QueryFilter::new().predicate(&unseen);
            let Some((handle, toi)) =
                self.query
                    .cast_ray(&self.rigid_bodies, &self.colliders, &engine_ray, max_toi, true, filter)
            else {
                return;
            };
            seen.push(handle);
            let Some(body) = self.body_of(handle) else {
                continue;
            };
            if visit(body, toi) == RayControl::Stop {
                return;
            }
        }
    }

    fn query_aabb(&self, aabb: &Aabb, visit: &mut dyn FnMut(BodyHandle)) {
        let bounds = EngineAabb::new(point(aabb.min), point(aabb.max));
        self.query.colliders_with_aabb_intersecting_aabb(&bounds, |handle| {
            let enabled = self.colliders.get(*handle).is_some_and(|c| c.is_enabled());
            if let Some(body) = self.body_of(*handle).filter(|_| enabled) {
                visit(body);
            }
            true
        });
    }

    fn step(&mut self, dt: f32) {
        self.params.dt = dt;
        self.pipeline.step(
            &self.gravity,
            &self.params,
            &mut self.islands,
            &mut self.broad_phase,
            &mut self.narrow_phase,
            &mut self.rigid_bodies,
            &mut self.colliders,
            &mut self.impulse_joints,
            &mut self.multibody_joints,
            &mut self.ccd,
            Some(&mut self.query),
            &(),
            &(),
        );
    }

    fn body_count(&self) -> usize {
        self.bodies.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shape::ConvexHull;
    use std::sync::Arc;

    fn desc(at: Vec3, mass: f32, kinematic: bool) -> BodyDesc {
        BodyDesc {
            shape: Shape::cuboid(Vec3::splat(0.5)),
            transform: Transform::from_translation(at),
            mass,
            kinematic,
            enabled: true,
        }
    }

    fn hits(backend: &RapierBackend, origin: Vec3, dir: Vec3) -> Vec<BodyHandle> {
        let ray = Ray::new(origin, dir).unwrap();
        let mut order = Vec::new();
        backend.cast_ray(&ray, 100.0, &mut |h, _| {
            order.push(h);
            RayControl::Continue
        });
        order
    }

    // -----------------------------------------------------------------------
    // Test 1: gravity moves dynamic bodies only
    // -----------------------------------------------------------------------
    #[test]
    fn step_integrates_dynamic_bodies_only() {
        let mut backend = RapierBackend::default();
        let falling = backend.insert_body(desc(Vec3::ZERO, 1.0, false));
        let kinematic = backend.insert_body(desc(Vec3::new(5.0, 0.0, 0.0), 1.0, true));
        let massless = backend.insert_body(desc(Vec3::new(-5.0, 0.0, 0.0), 0.0, false));

        backend.step(0.1);
        assert!(backend.body_transform(falling).unwrap().translation.y < 0.0);
        assert!(backend.body_velocity(falling).unwrap().y < 0.0);
        assert_eq!(backend.body_transform(kinematic).unwrap().translation, Vec3::new(5.0, 0.0, 0.0));
        assert_eq!(backend.body_transform(massless).unwrap().translation, Vec3::new(-5.0, 0.0, 0.0));
    }

    // -----------------------------------------------------------------------
    // Test 2: disabled bodies neither fall nor appear in queries
    // -----------------------------------------------------------------------
    #[test]
    fn disabled_body_is_frozen_and_invisible() {
        let mut backend = RapierBackend::default();
        let body = backend.insert_body(desc(Vec3::ZERO, 1.0, false));
        backend.set_body_enabled(body, false);
        backend.step(0.1);
        assert_eq!(backend.body_transform(body).unwrap().translation, Vec3::ZERO);

        let mut seen = 0;
        backend.query_aabb(&Aabb::from_point(Vec3::ZERO), &mut |_| seen += 1);
        assert_eq!(seen, 0);
        assert!(hits(&backend, Vec3::new(-5.0, 0.0, 0.0), Vec3::X).is_empty());

        backend.set_body_enabled(body, true);
        backend.query_aabb(&Aabb::from_point(Vec3::ZERO), &mut |_| seen += 1);
        assert_eq!(seen, 1);
    }

    // -----------------------------------------------------------------------
    // Test 3: ray hits arrive nearest first and stop on request
    // -----------------------------------------------------------------------
    #[test]
    fn cast_ray_orders_by_distance_and_stops() {
        let mut backend = RapierBackend::default();
        let far = backend.insert_body(desc(Vec3::new(10.0, 0.0, 0.0), 0.0, true));
        let near = backend.insert_body(desc(Vec3::new(3.0, 0.0, 0.0), 0.0, true));
        assert_eq!(hits(&backend, Vec3::ZERO, Vec3::X), vec![near, far]);

        let ray = Ray::new(Vec3::ZERO, Vec3::X).unwrap();
        let mut first = Vec::new();
        backend.cast_ray(&ray, 100.0, &mut |h, toi| {
            first.push((h, toi));
            RayControl::Stop
        });
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].0, near);
        assert!((first[0].1 - 2.5).abs() < 1e-4);
    }

    // -----------------------------------------------------------------------
    // Test 4: narrow phase, not bounds
    // -----------------------------------------------------------------------
    #[test]
    fn ray_through_bounds_corner_misses_ball_and_rotated_box() {
        let mut backend = RapierBackend::default();
        let ball = backend.insert_body(BodyDesc {
            shape: Shape::ball(1.0),
            ..desc(Vec3::ZERO, 0.0, true)
        });
        assert!(hits(&backend, Vec3::new(-5.0, 0.9, 0.9), Vec3::X).is_empty());
        assert_eq!(hits(&backend, Vec3::new(-5.0, 0.0, 0.0), Vec3::X), vec![ball]);
        backend.remove_body(ball);

        // Turned 45 degrees about Z, the cube's bounds cover (1.2, 1.2) but
        // its faces satisfy |x| + |y| <= 1.41.
        let tilted = Transform::new(Vec3::ZERO, Quat::from_rotation_z(std::f32::consts::FRAC_PI_4));
        let cube = backend.insert_body(BodyDesc {
            shape: Shape::cuboid(Vec3::ONE),
            transform: tilted,
            ..desc(Vec3::ZERO, 0.0, true)
        });
        assert!(hits(&backend, Vec3::new(1.2, 1.2, -5.0), Vec3::Z).is_empty());
        assert_eq!(hits(&backend, Vec3::new(0.5, 0.5, -5.0), Vec3::Z), vec![cube]);
    }

    // -----------------------------------------------------------------------
    // Test 5: moves and reshapes are visible to queries at once
    // -----------------------------------------------------------------------
    #[test]
    fn moved_and_reshaped_bodies_are_queried_at_new_pose() {
        let mut backend = RapierBackend::default();
        let body = backend.insert_body(desc(Vec3::ZERO, 0.0, true));
        backend.set_body_transform(body, Transform::from_translation(Vec3::new(0.0, 0.0, 8.0)));
        assert!(hits(&backend, Vec3::new(-5.0, 0.0, 0.0), Vec3::X).is_empty());
        assert_eq!(hits(&backend, Vec3::new(-5.0, 0.0, 8.0), Vec3::X), vec![body]);

        let mut seen = Vec::new();
        backend.query_aabb(&Aabb::from_point(Vec3::new(0.0, 1.5, 8.0)), &mut |h| seen.push(h));
        assert!(seen.is_empty());
        backend.set_body_shape(body, Shape::ball(2.0));
        backend.query_aabb(&Aabb::from_point(Vec3::new(0.0, 1.5, 8.0)), &mut |h| seen.push(h));
        assert_eq!(seen, vec![body]);
    }

    #[test]
    fn hull_bodies_collide_with_rays() {
        let mut backend = RapierBackend::default();
        let cloud = [
            Vec3::new(-1.0, -1.0, -1.0),
            Vec3::new(1.0, -1.0, -1.0),
            Vec3::new(0.0, 1.0, -1.0),
            Vec3::new(0.0, 0.0, 1.0),
        ];
        let hull = Arc::new(ConvexHull::from_points(&cloud).unwrap());
        let body = backend.insert_body(BodyDesc {
            shape: Shape::Hull(hull),
            ..desc(Vec3::ZERO, 0.0, true)
        });
        assert_eq!(hits(&backend, Vec3::new(0.0, 0.0, -5.0), Vec3::Z), vec![body]);
        assert!(hits(&backend, Vec3::new(0.9, 0.9, -5.0), Vec3::Z).is_empty());
    }

    // -----------------------------------------------------------------------
    // Test 6: removal
    // -----------------------------------------------------------------------
    #[test]
    fn removed_body_is_gone() {
        let mut backend = RapierBackend::default();
        let body = backend.insert_body(desc(Vec3::ZERO, 0.0, true));
        assert!(backend.remove_body(body));
        assert!(!backend.remove_body(body));
        assert!(backend.body_transform(body).is_none());
        assert!(!backend.set_body_enabled(body, true));
        assert_eq!(backend.body_count(), 0);
        assert!(hits(&backend, Vec3::new(-5.0, 0.0, 0.0), Vec3::X).is_empty());
    }
}
