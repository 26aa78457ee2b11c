//! Geometry shared by the backend and the façade: poses, rays, bounding
//! boxes, collider shapes, and convex hulls.

use std::sync::Arc;

use glam::{Quat, Vec3};
use rapier3d::na::Point3;
use rapier3d::parry::transformation::try_convex_hull;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Transform
// ---------------------------------------------------------------------------

/// A rigid pose: rotation followed by translation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub translation: Vec3,
    pub rotation: Quat,
}

impl Transform {
    pub const IDENTITY: Transform = Transform {
        translation: Vec3::ZERO,
        rotation: Quat::IDENTITY,
    };

    pub fn new(translation: Vec3, rotation: Quat) -> Self {
        Self {
            translation,
            rotation,
        }
    }

    pub fn from_translation(translation: Vec3) -> Self {
        Self {
            translation,
            rotation: Quat::IDENTITY,
        }
    }

    /// Map a point from local to world space.
    pub fn transform_point(&self, local: Vec3) -> Vec3 {
        self.rotation * local + self.translation
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

// ---------------------------------------------------------------------------
// Ray
// ---------------------------------------------------------------------------

/// A half-line with a unit direction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ray {
    pub origin: Vec3,
    pub dir: Vec3,
}

impl Ray {
    /// Returns `None` for a zero or non-finite direction.
    pub fn new(origin: Vec3, direction: Vec3) -> Option<Self> {
        let dir = direction.try_normalize()?;
        Some(Self { origin, dir })
    }
}

// ---------------------------------------------------------------------------
// Aabb
// ---------------------------------------------------------------------------

/// Axis-aligned bounding box. A degenerate box (`min == max`) is a point
/// query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub fn new(a: Vec3, b: Vec3) -> Self {
        Self {
            min: a.min(b),
            max: a.max(b),
        }
    }

    /// The zero-volume box at `p`.
    pub fn from_point(p: Vec3) -> Self {
        Self { min: p, max: p }
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn half_extents(&self) -> Vec3 {
        (self.max - self.min) * 0.5
    }
}

// ---------------------------------------------------------------------------
// Convex hulls
// ---------------------------------------------------------------------------

/// Identity of a render mesh, used as the hull cache key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MeshId(pub u64);

/// A mesh as far as collision is concerned: an id and its vertex cloud.
#[derive(Debug, Clone)]
pub struct Mesh {
    pub id: MeshId,
    pub vertices: Vec<Vec3>,
}

/// The extreme points of a vertex cloud.
#[derive(Debug, Clone, PartialEq)]
pub struct ConvexHull {
    points: Vec<Vec3>,
}

impl ConvexHull {
    /// Quickhull over the distinct points of `points`. Flat clouds keep
    /// their planar hull. Returns `None` for an empty or non-finite cloud.
    pub fn from_points(points: &[Vec3]) -> Option<Self> {
        if points.is_empty() || points.iter().any(|p| !p.is_finite()) {
            return None;
        }
        let mut unique = points.to_vec();
        unique.sort_by(lexicographic);
        unique.dedup();
        if unique.len() < 4 {
            return Some(Self { points: unique });
        }

        let cloud: Vec<Point3<f32>> = unique.iter().map(|p| Point3::new(p.x, p.y, p.z)).collect();
        match try_convex_hull(&cloud) {
            Ok((vertices, _)) if !vertices.is_empty() => {
                // Quickhull rescales internally; snap back to the input points.
                let mut points: Vec<Vec3> = vertices
                    .iter()
                    .filter_map(|v| nearest(&unique, Vec3::new(v.x, v.y, v.z)))
                    .collect();
                points.sort_by(lexicographic);
                points.dedup();
                Some(Self { points })
            }
            // Collinear clouds; every point is on the hull's boundary.
            _ => Some(Self { points: unique }),
        }
    }

    pub fn points(&self) -> &[Vec3] {
        &self.points
    }

    pub fn local_aabb(&self) -> Aabb {
        let mut min = Vec3::splat(f32::INFINITY);
        let mut max = Vec3::splat(f32::NEG_INFINITY);
        for p in &self.points {
            min = min.min(*p);
            max = max.max(*p);
        }
        Aabb { min, max }
    }
}

fn lexicographic(a: &Vec3, b: &Vec3) -> std::cmp::Ordering {
    a.x.total_cmp(&b.x)
        .then(a.y.total_cmp(&b.y))
        .then(a.z.total_cmp(&b.z))
}

fn nearest(cloud: &[Vec3], target: Vec3) -> Option<Vec3> {
    cloud
        .iter()
        .copied()
        .min_by(|a, b| a.distance_squared(target).total_cmp(&b.distance_squared(target)))
}

// ---------------------------------------------------------------------------
// Shape
// ---------------------------------------------------------------------------

/// A collider shape.
#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    Ball { radius: f32 },
    Cuboid { half_extents: Vec3 },
    Hull(Arc<ConvexHull>),
}

impl Shape {
    pub fn ball(radius: f32) -> Self {
        Shape::Ball {
            radius: radius.abs(),
        }
    }

    pub fn cuboid(half_extents: Vec3) -> Self {
        Shape::Cuboid {
            half_extents: half_extents.abs(),
        }
    }
}
