//! Object pool with cooperative "hurry" eviction.
//!
//! `Pool<I>` hands out [`Entry`] handles built by an [`Instancer`], keeps the
//! idle ones in a LIFO free list and the issued ones in acquisition order.
//! When the free list runs low it asks the oldest active entries to finish
//! early; when it is starved it can forcibly reclaim the oldest one.
//!
//! No lock is held while listeners or instancer callbacks run, so both may
//! call back into the pool.

pub mod config;

use std::collections::VecDeque;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::entry::{Entry, EntryId, Lease};
use crate::error::{Error, Rejected, Result};
use crate::events::{DestroyReason, EventBus, PoolEvent};
use crate::instancer::{Instancer, Parent};
use crate::listener::NotificationKind;
use crate::registry::Registry;

pub use config::{PoolConfig, PoolsConfig};

// ---------------------------------------------------------------------------
// Pool internals
// ---------------------------------------------------------------------------

/// Pool statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Total successful acquisitions.
    pub acquisitions: u64,
    /// Total releases back to the free list (forced evictions included).
    pub releases: u64,
    /// Total entries ever built.
    pub manufactured: u64,
    /// Total entries ever destroyed.
    pub destroyed: u64,
    /// Total hurry requests that reached an entry.
    pub hurried: u64,
    /// Total forced evictions.
    pub evicted: u64,
    /// Total `get` calls refused for lack of capacity.
    pub exhausted: u64,
    /// Current number of issued entries.
    pub active: usize,
    /// Current number of idle entries.
    pub idle: usize,
}

/// Outcome of removing a detached entry from its origin pool.
enum Forget {
    Removed,
    NotListed,
    Stale(Error),
}

struct State<T> {
    /// Idle entries, popped LIFO.
    free: Vec<Entry<T>>,
    /// Issued entries, oldest first.
    active: VecDeque<Entry<T>>,
    /// Entries alive: free + active + in transit. Never exceeds `capacity_max`.
    alive: usize,
    next_id: u64,
    next_lease: u64,
    prewarmed: bool,
    closed: bool,
    stats: PoolStats,
}

impl<T> State<T> {
    fn new(capacity: usize) -> Self {
        Self {
            free: Vec::with_capacity(capacity),
            active: VecDeque::with_capacity(capacity),
            alive: 0,
            next_id: 1,
            next_lease: 1,
            prewarmed: false,
            closed: false,
            stats: PoolStats::default(),
        }
    }

    fn position(&self, entry: &Entry<T>) -> Option<usize> {
        self.active
            .iter()
            .position(|e| e.same_entry(entry) && e.lease() == entry.lease())
    }
}

struct PoolInner<I: Instancer> {
    id: String,
    instancer: Arc<I>,
    template: I::Template,
    config: PoolConfig,
    state: Mutex<State<I::Instance>>,
    events: Arc<EventBus>,
}

/// Weak link from an entry back to the pool that built it.
pub(crate) trait Home<T>: Send + Sync {
    fn release(self: Arc<Self>, entry: Entry<T>) -> std::result::Result<(), Rejected<T>>;
    fn discard(self: Arc<Self>, entry: Entry<T>) -> std::result::Result<(), Rejected<T>>;
}

impl<I: Instancer> Home<I::Instance> for PoolInner<I> {
    fn release(
        self: Arc<Self>,
        entry: Entry<I::Instance>,
    ) -> std::result::Result<(), Rejected<I::Instance>> {
        Pool { inner: self }.release(entry)
    }

    fn discard(
        self: Arc<Self>,
        entry: Entry<I::Instance>,
    ) -> std::result::Result<(), Rejected<I::Instance>> {
        Pool { inner: self }.discard(entry)
    }
}

// ---------------------------------------------------------------------------
// Pool<I>
// ---------------------------------------------------------------------------

/// Bounded pool of reusable entries built from one template.
///
/// Cheap to clone: clones share the same pool.
pub struct Pool<I: Instancer> {
    inner: Arc<PoolInner<I>>,
}

impl<I: Instancer> Clone for Pool<I> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<I: Instancer> std::fmt::Debug for Pool<I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("id", &self.inner.id)
            .field("config", &self.inner.config)
            .field("stats", &self.stats())
            .finish()
    }
}

impl<I: Instancer> Pool<I> {
    /// Create a pool with its own event bus and pre-warm it with
    /// `capacity_default` entries.
    ///
    /// # Errors
    /// Returns error if `config` is invalid or pre-warming fails.
    pub fn new(
        id: impl Into<String>,
        instancer: I,
        template: I::Template,
        config: PoolConfig,
    ) -> Result<Self> {
        Self::with_events(
            id,
            Arc::new(instancer),
            template,
            config,
            Arc::new(EventBus::default()),
        )
    }

    /// Create a pool sharing `instancer` that reports to `events`.
    pub fn with_events(
        id: impl Into<String>,
        instancer: Arc<I>,
        template: I::Template,
        config: PoolConfig,
        events: Arc<EventBus>,
    ) -> Result<Self> {
        config.validate()?;
        let capacity = config.capacity_max;
        let pool = Self {
            inner: Arc::new(PoolInner {
                id: id.into(),
                instancer,
                template,
                state: Mutex::new(State::new(capacity)),
                config,
                events,
            }),
        };

        if pool.inner.config.capacity_default > 0 {
            pool.create_base_capacity(pool.inner.config.capacity_default)?;
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(
            pool_id = %pool.inner.id,
            capacity_default = pool.inner.config.capacity_default,
            capacity_max = pool.inner.config.capacity_max,
            "Created pool"
        );
        Ok(pool)
    }

    /// Pool identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// The prototype entries are built from.
    #[must_use]
    pub fn template(&self) -> &I::Template {
        &self.inner.template
    }

    /// Pool settings.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// The instancer entries are built with.
    #[must_use]
    pub fn instancer(&self) -> &I {
        &self.inner.instancer
    }

    /// The bus this pool reports to.
    #[must_use]
    pub fn events(&self) -> &Arc<EventBus> {
        &self.inner.events
    }

    /// Whether two handles refer to the same pool.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Get current pool statistics.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let state = self.inner.state.lock();
        let mut stats = state.stats.clone();
        stats.active = state.active.len();
        stats.idle = state.free.len();
        stats
    }

    /// Number of idle entries.
    #[must_use]
    pub fn free_count(&self) -> usize {
        self.inner.state.lock().free.len()
    }

    /// Number of issued entries.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.inner.state.lock().active.len()
    }

    /// Number of alive entries, including those in transit.
    #[must_use]
    pub fn alive(&self) -> usize {
        self.inner.state.lock().alive
    }

    /// Fraction of the hard cap currently issued.
    #[must_use]
    pub fn utilization(&self) -> f32 {
        self.active_count() as f32 / self.inner.config.capacity_max as f32
    }

    /// Whether the pool has been shut down.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// Whether `entry` is currently issued by this pool under its lease.
    #[must_use]
    pub fn is_active(&self, entry: &Entry<I::Instance>) -> bool {
        self.inner.state.lock().position(entry).is_some()
    }

    /// Identifiers of the issued entries, oldest first.
    #[must_use]
    pub fn active_ids(&self) -> Vec<EntryId> {
        self.inner.state.lock().active.iter().map(Entry::id).collect()
    }

    /// Hand out an entry.
    ///
    /// May hurry active entries and, when starved, forcibly release the
    /// oldest one before serving the request.
    pub fn get(&self) -> Result<Entry<I::Instance>> {
        let config = &self.inner.config;
        let free = {
            let state = self.inner.state.lock();
            if state.closed {
                return Err(self.closed_error());
            }
            state.free.len()
        };

        if config.hurry_enabled && free <= config.hurry_threshold {
            self.hurry(config.hurry_batch_size)?;
        }

        if let Some((victim, pos)) = self.starved_victim() {
            let entry_id = victim.id();
            if let Err((error, _)) = self.complete_release(victim, pos) {
                return Err(error);
            }
            self.inner.state.lock().stats.evicted += 1;
            self.inner.events.emit(PoolEvent::Evicted {
                pool_id: self.inner.id.clone(),
                entry_id,
            });
            #[cfg(feature = "tracing")]
            tracing::debug!(pool_id = %self.inner.id, entry_id = %entry_id, "Evicted oldest active entry");
        }

        let entry = self.take_or_manufacture()?;
        self.issue(entry)
    }

    /// Give an entry back.
    ///
    /// An entry this pool built whose binding was cleared with
    /// [`Entry::set_pool`]`(None)` is discarded for good instead of parked.
    ///
    /// Rejects entries bound to another pool, entries that are not issued,
    /// stale handles and entries whose instance is locked; the entry is
    /// returned untouched in [`Rejected`].
    pub fn release(
        &self,
        entry: Entry<I::Instance>,
    ) -> std::result::Result<(), Rejected<I::Instance>> {
        if entry.pool_id().is_none() && entry.comes_from(&self.inner) {
            return self.discard(entry);
        }
        let pos = match self.begin_release(&entry) {
            Ok(pos) => pos,
            Err(error) => return Err(Rejected::new(error, entry)),
        };
        self.complete_release(entry, pos)
            .map_err(|(error, entry)| Rejected::new(error, entry))
    }

    /// Ask up to `quantity` active entries that are not urgent yet to
    /// finish early, oldest first. Returns how many were hurried.
    ///
    /// Advisory only: no capacity is freed unless an entry releases itself.
    pub fn hurry(&self, quantity: usize) -> Result<usize> {
        if quantity == 0 {
            return Ok(0);
        }
        let candidates: Vec<Entry<I::Instance>> = {
            let state = self.inner.state.lock();
            state
                .active
                .iter()
                .filter(|e| !e.is_urgent() && e.is_bound_to(&self.inner.id))
                .take(quantity)
                .map(Entry::duplicate)
                .collect()
        };

        let mut hurried = 0;
        for entry in candidates {
            if entry.request_hurry()? {
                hurried += 1;
                self.inner.state.lock().stats.hurried += 1;
                self.inner.events.emit(PoolEvent::HurryRequested {
                    pool_id: self.inner.id.clone(),
                    entry_id: entry.id(),
                });
            }
        }

        if hurried > 0 {
            #[cfg(feature = "tracing")]
            tracing::debug!(pool_id = %self.inner.id, hurried, "Hurried active entries");
        }
        Ok(hurried)
    }

    /// Pre-warm the pool with `quantity` idle entries.
    ///
    /// Entries are acquired through the factory and immediately released.
    /// Allowed once, before any entry exists; `quantity` is clamped to
    /// `capacity_max`.
    pub fn create_base_capacity(&self, quantity: usize) -> Result<()> {
        {
            let mut state = self.inner.state.lock();
            if state.closed {
                return Err(self.closed_error());
            }
            if state.prewarmed || state.alive > 0 || state.stats.acquisitions > 0 {
                return Err(Error::invalid_state(
                    &self.inner.id,
                    "base capacity can only be created once, before first use",
                ));
            }
            state.prewarmed = true;
        }

        let quantity = quantity.min(self.inner.config.capacity_max);
        let mut issued = Vec::with_capacity(quantity);
        for _ in 0..quantity {
            match self.take_or_manufacture().and_then(|e| self.issue(e)) {
                Ok(entry) => issued.push(entry),
                Err(error) => {
                    for entry in issued {
                        if matches!(self.forget(&entry), Forget::Removed) {
                            self.destroy_entry(&entry, DestroyReason::Teardown);
                        }
                    }
                    #[cfg(feature = "tracing")]
                    tracing::warn!(pool_id = %self.inner.id, error = %error, "Pre-warm failed");
                    self.inner.state.lock().prewarmed = false;
                    return Err(error);
                }
            }
        }

        for entry in issued.into_iter().rev() {
            self.release(entry).map_err(Error::from)?;
        }
        Ok(())
    }

    /// Close the pool and destroy every entry, issued ones included.
    ///
    /// Later `get` calls fail with [`Error::InvalidState`].
    pub fn shutdown(&self) {
        let entries: Vec<Entry<I::Instance>> = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            let mut entries: Vec<_> = state.free.drain(..).collect();
            entries.extend(state.active.drain(..));
            state.alive -= entries.len();
            entries
        };

        for entry in &entries {
            entry.clear_owner();
            self.destroy_entry(entry, DestroyReason::Teardown);
        }

        self.inner.events.emit(PoolEvent::PoolDestroyed {
            pool_id: self.inner.id.clone(),
        });
        #[cfg(feature = "tracing")]
        tracing::debug!(pool_id = %self.inner.id, destroyed = entries.len(), "Shut down pool");
    }

    /// Shut the pool down and unregister it, but only if `registry` still
    /// maps this pool's identifier to this very pool.
    ///
    /// Returns whether the registry entry was removed.
    pub fn teardown(&self, registry: &Registry<I>) -> bool {
        self.shutdown();
        registry.remove_pool(self)
    }

    // -----------------------------------------------------------------------
    // internals
    // -----------------------------------------------------------------------

    fn closed_error(&self) -> Error {
        Error::invalid_state(&self.inner.id, "pool has been shut down")
    }

    fn locked_error(&self, entry: &Entry<I::Instance>) -> Error {
        Error::invalid_entry(&self.inner.id, entry.id(), "instance is locked by its holder")
    }

    /// Pick and detach the oldest active entry when the pool is starved.
    fn starved_victim(&self) -> Option<(Entry<I::Instance>, usize)> {
        let config = &self.inner.config;
        if !config.evict_oldest_when_starved || config.hurry_batch_size == 0 {
            return None;
        }
        let mut state = self.inner.state.lock();
        let has_free = state.free.iter().any(|e| !e.is_locked());
        if has_free || state.alive < config.capacity_max {
            return None;
        }
        // A holder inside `Entry::lock` cannot be parked without waiting on it.
        let pos = state
            .active
            .iter()
            .position(|e| e.is_bound_to(&self.inner.id) && !e.is_locked())?;
        let victim = state.active.remove(pos)?;
        Some((victim, pos))
    }

    /// Pop an idle entry, or build one if the hard cap allows it.
    fn take_or_manufacture(&self) -> Result<Entry<I::Instance>> {
        let raw_id = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return Err(self.closed_error());
            }
            let unlocked = state.free.iter().rposition(|e| !e.is_locked());
            if let Some(pos) = unlocked {
                return Ok(state.free.remove(pos));
            }
            if state.alive >= self.inner.config.capacity_max {
                state.stats.exhausted += 1;
                let active = state.active.len();
                drop(state);
                self.inner.events.emit(PoolEvent::Exhausted {
                    pool_id: self.inner.id.clone(),
                    capacity_max: self.inner.config.capacity_max,
                });
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    pool_id = %self.inner.id,
                    active,
                    capacity_max = self.inner.config.capacity_max,
                    "Pool exhausted"
                );
                return Err(Error::capacity_exhausted(
                    &self.inner.id,
                    active,
                    self.inner.config.capacity_max,
                ));
            }
            // Reserve the slot before building outside the lock.
            state.alive += 1;
            let raw_id = state.next_id;
            state.next_id += 1;
            raw_id
        };

        let instance = match self.inner.instancer.manufacture(&self.inner.template) {
            Ok(instance) => instance,
            Err(source) => {
                self.inner.state.lock().alive -= 1;
                #[cfg(feature = "tracing")]
                tracing::warn!(pool_id = %self.inner.id, error = %source, "Manufacture failed");
                return Err(Error::Manufacture {
                    pool_id: self.inner.id.clone(),
                    source,
                });
            }
        };

        let home: Weak<dyn Home<I::Instance>> = Arc::<PoolInner<I>>::downgrade(&self.inner);
        let entry = Entry::new(EntryId::new(raw_id), &self.inner.id, Some(home), instance);
        self.inner.instancer.prepare(&entry);
        self.inner.state.lock().stats.manufactured += 1;
        self.inner.events.emit(PoolEvent::Manufactured {
            pool_id: self.inner.id.clone(),
            entry_id: entry.id(),
        });
        Ok(entry)
    }

    /// Issue `entry` under a fresh lease and make it live.
    fn issue(&self, entry: Entry<I::Instance>) -> Result<Entry<I::Instance>> {
        let handle = {
            let mut state = self.inner.state.lock();
            if state.closed {
                state.alive -= 1;
                drop(state);
                self.destroy_entry(&entry, DestroyReason::Teardown);
                return Err(self.closed_error());
            }
            let lease = Lease(state.next_lease);
            state.next_lease += 1;
            entry.bind(&self.inner.id);
            let handle = entry.issue(lease);
            state.active.push_back(handle.duplicate());
            state.stats.acquisitions += 1;
            handle
        };
        if let Err(error) = handle.notify(NotificationKind::Acquired) {
            let mut state = self.inner.state.lock();
            let pos = state.position(&handle);
            if let Some(pos) = pos {
                state.active.remove(pos);
                state.stats.acquisitions -= 1;
                if state.closed {
                    state.alive -= 1;
                    drop(state);
                    self.destroy_entry(&entry, DestroyReason::Teardown);
                } else {
                    state.free.push(entry);
                }
            }
            return Err(error);
        }

        let instancer = &self.inner.instancer;
        handle.with_instance(|instance| {
            instancer.reparent(instance, Parent::Detached);
            instancer.activate(instance);
        });
        self.inner.events.emit(PoolEvent::Acquired {
            pool_id: self.inner.id.clone(),
            entry_id: handle.id(),
        });
        Ok(handle)
    }

    /// Validate `entry` and take it out of the active set.
    fn begin_release(&self, entry: &Entry<I::Instance>) -> Result<usize> {
        let id = &self.inner.id;
        if !entry.is_bound_to(id) {
            return Err(Error::invalid_entry(
                id,
                entry.id(),
                "entry is not bound to this pool",
            ));
        }
        let mut state = self.inner.state.lock();
        if let Some(pos) = state.position(entry) {
            state.active.remove(pos);
            return Ok(pos);
        }
        let reason = if state.active.iter().any(|e| e.same_entry(entry)) {
            "stale handle: the entry was issued again"
        } else if state.free.iter().any(|e| e.same_entry(entry)) {
            "entry is already idle"
        } else {
            "entry is not issued by this pool"
        };
        Err(Error::invalid_entry(id, entry.id(), reason))
    }

    /// Notify, park and free an entry already taken out of the active set.
    ///
    /// On listener failure the entry goes back to its active position.
    fn complete_release(
        &self,
        entry: Entry<I::Instance>,
        pos: usize,
    ) -> std::result::Result<(), (Error, Entry<I::Instance>)> {
        if entry.is_locked() {
            self.restore_active(&entry, pos);
            return Err((self.locked_error(&entry), entry));
        }
        let was_urgent = entry.clear_urgent();
        if let Err(error) = entry.notify(NotificationKind::Released) {
            entry.restore_urgent(was_urgent);
            self.restore_active(&entry, pos);
            return Err((error, entry));
        }

        let instancer = &self.inner.instancer;
        let parked = entry.try_with_instance(|instance| {
            instancer.reparent(instance, Parent::Holding(&self.inner.id));
            instancer.deactivate(instance);
        });
        if !parked {
            // A listener left the instance locked.
            entry.restore_urgent(was_urgent);
            self.restore_active(&entry, pos);
            return Err((self.locked_error(&entry), entry));
        }
        entry.drop_scoped_listeners();

        let mut state = self.inner.state.lock();
        if state.closed {
            // Torn down by a listener while in transit.
            state.alive -= 1;
            drop(state);
            entry.clear_owner();
            self.destroy_entry(&entry, DestroyReason::Teardown);
            return Ok(());
        }
        let entry_id = entry.id();
        state.free.push(entry);
        state.stats.releases += 1;
        drop(state);

        self.inner.events.emit(PoolEvent::Released {
            pool_id: self.inner.id.clone(),
            entry_id,
        });
        Ok(())
    }

    /// Put an entry whose release failed back at its active position.
    fn restore_active(&self, entry: &Entry<I::Instance>, pos: usize) {
        let mut state = self.inner.state.lock();
        if !state.closed {
            let pos = pos.min(state.active.len());
            state.active.insert(pos, entry.duplicate());
        }
    }

    /// Drop a detached entry from the collections and destroy its instance.
    pub(crate) fn discard(
        &self,
        entry: Entry<I::Instance>,
    ) -> std::result::Result<(), Rejected<I::Instance>> {
        if entry.is_locked() {
            let error = self.locked_error(&entry);
            return Err(Rejected::new(error, entry));
        }
        if let Forget::Stale(error) = self.forget(&entry) {
            return Err(Rejected::new(error, entry));
        }
        self.destroy_entry(&entry, DestroyReason::Detached);

        #[cfg(feature = "tracing")]
        tracing::debug!(pool_id = %self.inner.id, entry_id = %entry.id(), "Discarded detached entry");
        Ok(())
    }

    /// Remove `entry` from the collections without notifying anyone.
    fn forget(&self, entry: &Entry<I::Instance>) -> Forget {
        let mut state = self.inner.state.lock();
        let pos = state.position(entry);
        if let Some(pos) = pos {
            state.active.remove(pos);
            state.alive -= 1;
            return Forget::Removed;
        }
        let listed = state.active.iter().any(|e| e.same_entry(entry))
            || state.free.iter().any(|e| e.same_entry(entry));
        if listed {
            Forget::Stale(Error::invalid_entry(
                &self.inner.id,
                entry.id(),
                "stale handle: the entry is no longer issued to its holder",
            ))
        } else {
            Forget::NotListed
        }
    }

    /// Hand the instance to the instancer for good.
    fn destroy_entry(&self, entry: &Entry<I::Instance>, reason: DestroyReason) {
        if let Some(instance) = entry.take_instance() {
            self.inner.instancer.destroy(instance);
            self.inner.state.lock().stats.destroyed += 1;
            self.inner.events.emit(PoolEvent::Destroyed {
                pool_id: self.inner.id.clone(),
                entry_id: entry.id(),
                reason,
            });
        }
    }
}
