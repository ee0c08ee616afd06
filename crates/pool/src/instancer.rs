//! Host collaborator seam.
//!
//! The pool never builds, shows, hides, moves or destroys instances itself;
//! it asks an [`Instancer`]. In a game engine this is where the scene graph
//! lives.

use crate::entry::Entry;
use crate::error::BoxError;

/// Where an instance is attached in the host hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parent<'a> {
    /// Parked under the holding context of the pool with this identifier.
    Holding(&'a str),
    /// Detached from any pool context while in use.
    Detached,
}

/// Builds and manages instances on behalf of a pool.
///
/// Only [`manufacture`](Instancer::manufacture) is required; the remaining
/// callbacks default to no-ops (and `destroy` to a plain drop).
///
/// `activate`, `deactivate` and `reparent` run with the instance locked.
pub trait Instancer: Send + Sync + 'static {
    /// The prototype new instances are built from.
    type Template: Send + Sync + 'static;

    /// The pooled instance type.
    type Instance: Send + 'static;

    /// Build a brand-new, inactive instance from `template`.
    fn manufacture(&self, template: &Self::Template) -> Result<Self::Instance, BoxError>;

    /// Called once on every freshly wrapped entry, before it is first issued.
    ///
    /// This is where template-level listeners are attached.
    fn prepare(&self, _entry: &Entry<Self::Instance>) {}

    /// Make the instance live for a client.
    fn activate(&self, _instance: &mut Self::Instance) {}

    /// Put the instance to sleep while it waits in the free list.
    fn deactivate(&self, _instance: &mut Self::Instance) {}

    /// Move the instance in the host hierarchy.
    fn reparent(&self, _instance: &mut Self::Instance, _parent: Parent<'_>) {}

    /// Permanently discard the instance.
    fn destroy(&self, instance: Self::Instance) {
        drop(instance);
    }
}
