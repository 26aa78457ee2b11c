//! Pipeworks Physics -- a thin, lock-guarded façade over a rigid-body engine.
//!
//! Entities own [`object::PhysicsObject`]s created through
//! [`world::PhysicsWorld`]. The façade adds what the engine does not know
//! about: which entity owns a body, whether it is enabled, and whether it
//! receives raycasts. Queries filter on those, by owner type.
//!
//! # Key Types
//!
//! - [`world::PhysicsWorld`] -- Façade, hull cache, and physics step thread.
//! - [`object::PhysicsObject`] -- Shared handle to one collider.
//! - [`backend::PhysicsBackend`] -- The engine boundary.
//! - [`rapier::RapierBackend`] -- The rapier3d engine used by default.
//! - [`shape::Shape`] / [`shape::Aabb`] / [`shape::Ray`] -- Geometry.

pub mod backend;
pub mod object;
pub mod rapier;
pub mod shape;
pub mod world;

pub use object::{ObjectId, PhysicsObject};
pub use shape::{Shape, Transform};
pub use world::{PhysicsError, PhysicsWorld};
