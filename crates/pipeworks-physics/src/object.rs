//! Handles to façade-managed physics objects.

use std::any::TypeId;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use pipeworks_core::entity::Entity;
use slotmap::new_key_type;

new_key_type! {
    /// Stable identity of a physics object. Survives a reshape.
    pub struct ObjectId;
}

#[derive(Debug)]
pub(crate) struct ObjectFlags {
    pub(crate) enabled: AtomicBool,
    pub(crate) receives_raycasts: AtomicBool,
    pub(crate) destroyed: AtomicBool,
}

/// A collider owned by an entity.
///
/// Cheap to clone; every clone observes the same flags. The owning entity is
/// held weakly, so an object never keeps its owner alive.
#[derive(Clone)]
pub struct PhysicsObject {
    pub(crate) id: ObjectId,
    owner: Weak<dyn Entity>,
    owner_type: TypeId,
    pub(crate) flags: Arc<ObjectFlags>,
}

impl PhysicsObject {
    pub(crate) fn new<E: Entity>(id: ObjectId, owner: Weak<E>, enabled: bool) -> Self {
        let owner: Weak<dyn Entity> = owner;
        Self {
            id,
            owner,
            owner_type: TypeId::of::<E>(),
            flags: Arc::new(ObjectFlags {
                enabled: AtomicBool::new(enabled),
                receives_raycasts: AtomicBool::new(true),
                destroyed: AtomicBool::new(false),
            }),
        }
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// The owning entity, if it is still alive.
    pub fn owner(&self) -> Option<Arc<dyn Entity>> {
        self.owner.upgrade()
    }

    /// Whether the owner is a live `T`.
    pub fn owner_is<T: Entity>(&self) -> bool {
        self.owner_type == TypeId::of::<T>() && self.owner.strong_count() > 0
    }

    pub fn is_enabled(&self) -> bool {
        self.flags.enabled.load(Ordering::Acquire)
    }

    pub fn receives_raycasts(&self) -> bool {
        self.flags.receives_raycasts.load(Ordering::Acquire)
    }

    pub fn is_destroyed(&self) -> bool {
        self.flags.destroyed.load(Ordering::Acquire)
    }
}

impl PartialEq for PhysicsObject {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && Arc::ptr_eq(&self.flags, &other.flags)
    }
}

impl Eq for PhysicsObject {}

impl fmt::Debug for PhysicsObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PhysicsObject")
            .field("id", &self.id)
            .field("enabled", &self.is_enabled())
            .field("receives_raycasts", &self.receives_raycasts())
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}
