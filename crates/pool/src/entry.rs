//! Poolable handle wrapping one reusable instance.
//!
//! An [`Entry`] is shared between the client holding it and the pool that
//! tracks it. It is bound to a pool by identifier, resolved through the
//! [`Registry`] on demand, and keeps a weak link to the pool that built it so
//! a detached entry can always be cleaned out of its origin.

use std::sync::{Arc, Weak};
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{MappedMutexGuard, Mutex, MutexGuard, RwLock};

use crate::error::{Error, Rejected, Result};
use crate::events::{DestroyReason, PoolEvent};
use crate::instancer::Instancer;
use crate::listener::{self, Listener, ListenerId, Listeners, Notification, NotificationKind};
use crate::pool::{Home, Pool};
use crate::registry::Registry;

/// Identifier of an entry, unique within the pool that built it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryId(u64);

impl EntryId {
    pub(crate) const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw numeric value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for EntryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Token for one issue of an entry. Zero means "never issued".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Lease(pub(crate) u64);

struct Shared<T> {
    id: EntryId,
    origin: String,
    home: Option<Weak<dyn Home<T>>>,
    owner: RwLock<Option<String>>,
    urgent: AtomicBool,
    instance: Mutex<Option<T>>,
    listeners: RwLock<Listeners>,
}

/// Handle to a pooled instance.
///
/// Obtained from [`Pool::get`] and given back with [`Pool::release`] or
/// [`Entry::release`]. A handle kept after its entry was forcibly evicted
/// is stale: releasing it is rejected.
pub struct Entry<T> {
    shared: Arc<Shared<T>>,
    lease: Lease,
}

impl<T> Entry<T> {
    pub(crate) fn new(
        id: EntryId,
        origin: &str,
        home: Option<Weak<dyn Home<T>>>,
        instance: T,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                id,
                origin: origin.to_string(),
                home,
                owner: RwLock::new(Some(origin.to_string())),
                urgent: AtomicBool::new(false),
                instance: Mutex::new(Some(instance)),
                listeners: RwLock::new(Listeners::default()),
            }),
            lease: Lease(0),
        }
    }

    /// A second handle to the same entry carrying `lease`.
    pub(crate) fn issue(&self, lease: Lease) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            lease,
        }
    }

    /// A second handle to the same entry and lease.
    pub(crate) fn duplicate(&self) -> Self {
        self.issue(self.lease)
    }

    pub(crate) fn lease(&self) -> Lease {
        self.lease
    }

    pub(crate) fn same_entry(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// Whether `pool` is the pool that built this entry.
    pub(crate) fn comes_from<P>(&self, pool: &Arc<P>) -> bool {
        self.shared
            .home
            .as_ref()
            .is_some_and(|home| std::ptr::addr_eq(home.as_ptr(), Arc::as_ptr(pool)))
    }

    fn home(&self) -> Option<Arc<dyn Home<T>>> {
        self.shared.home.as_ref().and_then(Weak::upgrade)
    }

    /// Entry identifier.
    #[must_use]
    pub fn id(&self) -> EntryId {
        self.shared.id
    }

    /// Identifier of the pool that built this entry.
    #[must_use]
    pub fn origin(&self) -> &str {
        &self.shared.origin
    }

    /// Identifier of the pool this entry is bound to, if any.
    #[must_use]
    pub fn pool_id(&self) -> Option<String> {
        self.shared.owner.read().clone()
    }

    pub(crate) fn is_bound_to(&self, pool_id: &str) -> bool {
        self.shared.owner.read().as_deref() == Some(pool_id)
    }

    /// Whether the entry has been asked to hurry since its last release.
    #[must_use]
    pub fn is_urgent(&self) -> bool {
        self.shared.urgent.load(Ordering::Acquire)
    }

    /// Whether the instance has been permanently discarded.
    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.shared.instance.lock().is_none()
    }

    /// Lock the instance for use. `None` once the entry was destroyed.
    ///
    /// While the guard is alive the entry cannot be released (the release is
    /// refused) or forcibly evicted (a starved pool skips it). Do not hold it
    /// across [`Pool::shutdown`] or a registry teardown on the same thread:
    /// destroying the instance waits for the lock.
    pub fn lock(&self) -> Option<MappedMutexGuard<'_, T>> {
        MutexGuard::try_map(self.shared.instance.lock(), Option::as_mut).ok()
    }

    pub(crate) fn is_locked(&self) -> bool {
        self.shared.instance.is_locked()
    }

    pub(crate) fn with_instance<R>(&self, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        self.shared.instance.lock().as_mut().map(f)
    }

    /// Run `f` on the instance unless someone holds the lock.
    ///
    /// Returns `false` only when the lock was taken.
    pub(crate) fn try_with_instance(&self, f: impl FnOnce(&mut T)) -> bool {
        match self.shared.instance.try_lock() {
            Some(mut instance) => {
                if let Some(instance) = instance.as_mut() {
                    f(instance);
                }
                true
            }
            None => false,
        }
    }

    pub(crate) fn take_instance(&self) -> Option<T> {
        self.shared.instance.lock().take()
    }

    /// Rebind the entry to `pool`, or clear its binding with `None`.
    ///
    /// A detached entry is discarded by [`Entry::release`] instead of
    /// being returned to a pool.
    pub fn set_pool<I>(&self, pool: Option<&Pool<I>>)
    where
        I: Instancer<Instance = T>,
    {
        *self.shared.owner.write() = pool.map(|p| p.id().to_string());
    }

    pub(crate) fn bind(&self, pool_id: &str) {
        let mut owner = self.shared.owner.write();
        if owner.as_deref() != Some(pool_id) {
            *owner = Some(pool_id.to_string());
        }
    }

    pub(crate) fn clear_owner(&self) {
        *self.shared.owner.write() = None;
    }

    /// Register a listener for when the entry is handed out.
    ///
    /// Listeners registered with `on_*` stay attached across every later
    /// issue of the entry until removed.
    pub fn on_acquired<L: Listener + 'static>(&self, listener: L) -> ListenerId {
        self.add_listener(NotificationKind::Acquired, false, listener)
    }

    /// Register a listener for when the entry returns to its pool.
    pub fn on_released<L: Listener + 'static>(&self, listener: L) -> ListenerId {
        self.add_listener(NotificationKind::Released, false, listener)
    }

    /// Register a listener for hurry requests.
    pub fn on_hurry<L: Listener + 'static>(&self, listener: L) -> ListenerId {
        self.add_listener(NotificationKind::HurryRequested, false, listener)
    }

    /// Register a release listener for the current holder only.
    ///
    /// It fires on the next release and is dropped with it.
    pub fn on_released_while_held<L: Listener + 'static>(&self, listener: L) -> ListenerId {
        self.add_listener(NotificationKind::Released, true, listener)
    }

    /// Register a hurry listener for the current holder only.
    ///
    /// It is dropped when the entry is released, so the next holder does not
    /// inherit it.
    pub fn on_hurry_while_held<L: Listener + 'static>(&self, listener: L) -> ListenerId {
        self.add_listener(NotificationKind::HurryRequested, true, listener)
    }

    /// Remove a listener. Returns whether it was still registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.shared.listeners.write().remove(id)
    }

    fn add_listener<L: Listener + 'static>(
        &self,
        kind: NotificationKind,
        scoped: bool,
        listener: L,
    ) -> ListenerId {
        self.shared
            .listeners
            .write()
            .push(kind, scoped, Arc::new(listener))
    }

    pub(crate) fn drop_scoped_listeners(&self) {
        self.shared.listeners.write().drop_scoped();
    }

    /// Number of listeners registered for `kind`.
    #[must_use]
    pub fn listener_count(&self, kind: NotificationKind) -> usize {
        self.shared.listeners.read().len(kind)
    }

    /// Ask the entry to wrap up early.
    ///
    /// Fires the hurry listeners once; later calls are no-ops until the
    /// entry is released. Returns whether the listeners were fired.
    pub fn request_hurry(&self) -> Result<bool> {
        if self.shared.urgent.swap(true, Ordering::AcqRel) {
            return Ok(false);
        }
        self.notify(NotificationKind::HurryRequested)?;
        Ok(true)
    }

    /// Clear the urgency flag, returning its previous value.
    pub(crate) fn clear_urgent(&self) -> bool {
        self.shared.urgent.swap(false, Ordering::AcqRel)
    }

    pub(crate) fn restore_urgent(&self, urgent: bool) {
        self.shared.urgent.store(urgent, Ordering::Release);
    }

    pub(crate) fn notify(&self, kind: NotificationKind) -> Result<()> {
        // Snapshot under the lock, then run listeners without it.
        let listeners = self.shared.listeners.read().snapshot(kind);
        if listeners.is_empty() {
            return Ok(());
        }
        let notification = Notification {
            kind,
            entry_id: self.id(),
            pool_id: self.pool_id(),
        };
        listener::dispatch(&listeners, &notification)
    }

    /// Return the entry to the pool it is bound to.
    ///
    /// If the entry is bound to no live pool it is discarded for good
    /// instead: its origin pool drops it from its collections and destroys
    /// the instance, whether or not that pool is registered.
    pub fn release<I>(self, registry: &Registry<I>) -> std::result::Result<(), Rejected<T>>
    where
        I: Instancer<Instance = T>,
    {
        let Some(owner) = self.pool_id() else {
            return self.discard(registry);
        };
        if owner == self.origin()
            && let Some(home) = self.home()
        {
            return home.release(self);
        }
        match registry.lookup(&owner) {
            Some(pool) => pool.release(self),
            None => self.discard(registry),
        }
    }

    fn discard<I>(self, registry: &Registry<I>) -> std::result::Result<(), Rejected<T>>
    where
        I: Instancer<Instance = T>,
    {
        if let Some(home) = self.home() {
            return home.discard(self);
        }

        // The origin pool is gone altogether; only the instance is left.
        if self.is_locked() {
            let error = Error::invalid_entry(
                self.origin(),
                self.id(),
                "instance is locked by its holder",
            );
            return Err(Rejected::new(error, self));
        }
        if let Some(instance) = self.take_instance() {
            registry.instancer().destroy(instance);
            registry.events().emit(PoolEvent::Destroyed {
                pool_id: self.origin().to_string(),
                entry_id: self.id(),
                reason: DestroyReason::Detached,
            });
        }
        #[cfg(feature = "tracing")]
        tracing::debug!(
            pool_id = self.origin(),
            entry_id = %self.id(),
            "Discarded entry of a dropped pool"
        );
        Ok(())
    }
}

impl<T> std::fmt::Debug for Entry<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Entry")
            .field("id", &self.shared.id)
            .field("pool_id", &*self.shared.owner.read())
            .field("urgent", &self.is_urgent())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BoxError;
    use std::sync::atomic::AtomicU32;

    fn entry() -> Entry<String> {
        Entry::new(EntryId::new(1), "sparks", None, "spark".to_string())
    }

    #[test]
    fn new_entry_is_bound_to_origin() {
        let entry = entry();
        assert_eq!(entry.pool_id().as_deref(), Some("sparks"));
        assert_eq!(entry.origin(), "sparks");
        assert!(!entry.is_urgent());
        assert_eq!(entry.id().to_string(), "#1");
    }

    #[test]
    fn request_hurry_fires_once() {
        let entry = entry();
        let fired = Arc::new(AtomicU32::new(0));
        let fired_c = Arc::clone(&fired);
        entry.on_hurry(move |_: &Notification| -> std::result::Result<(), BoxError> {
            fired_c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        assert!(entry.request_hurry().unwrap());
        assert!(!entry.request_hurry().unwrap());
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(entry.is_urgent());

        assert!(entry.clear_urgent());
        assert!(entry.request_hurry().unwrap());
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn hurry_notification_carries_binding() {
        let entry = entry();
        let seen = Arc::new(Mutex::new(None));
        let seen_c = Arc::clone(&seen);
        entry.on_hurry(move |n: &Notification| -> std::result::Result<(), BoxError> {
            *seen_c.lock() = Some(n.clone());
            Ok(())
        });
        entry.request_hurry().unwrap();

        let seen = seen.lock().clone().unwrap();
        assert_eq!(seen.kind, NotificationKind::HurryRequested);
        assert_eq!(seen.pool_id.as_deref(), Some("sparks"));
        assert_eq!(seen.entry_id, EntryId::new(1));
    }

    #[test]
    fn lock_returns_none_after_take() {
        let entry = entry();
        assert_eq!(entry.lock().as_deref().map(String::as_str), Some("spark"));
        assert_eq!(entry.take_instance().as_deref(), Some("spark"));
        assert!(entry.lock().is_none());
        assert!(entry.is_destroyed());
    }

    #[test]
    fn issued_handles_share_state() {
        let entry = entry();
        let other = entry.issue(Lease(4));
        assert!(entry.same_entry(&other));
        assert_eq!(other.lease(), Lease(4));
        other.clear_owner();
        assert_eq!(entry.pool_id(), None);
    }

    #[test]
    fn removed_listener_no_longer_fires() {
        let entry = entry();
        let fired = Arc::new(AtomicU32::new(0));
        let fired_c = Arc::clone(&fired);
        let id = entry.on_hurry(move |_: &Notification| -> std::result::Result<(), BoxError> {
            fired_c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        assert!(entry.remove_listener(id));
        assert!(!entry.remove_listener(id));
        assert!(entry.request_hurry().unwrap());
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(entry.listener_count(NotificationKind::HurryRequested), 0);
    }

    #[test]
    fn try_with_instance_refuses_while_locked() {
        let entry = entry();
        let guard = entry.lock();
        assert!(entry.is_locked());
        assert!(!entry.try_with_instance(|s| s.push('!')));
        drop(guard);
        assert!(entry.try_with_instance(|s| s.push('!')));
        assert_eq!(entry.lock().as_deref().map(String::as_str), Some("spark!"));
    }
}
