//! Pool registry: identifier to pool directory.
//!
//! A [`Registry`] is an explicit context object: create one per process (or
//! per scene) and pass it to whoever needs pools. Its map is initialised
//! lazily by the first call that needs it and can be shut down and
//! initialised again.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::entry::Entry;
use crate::error::{Error, Rejected, Result};
use crate::events::{EventBus, PoolEvent};
use crate::instancer::Instancer;
use crate::pool::{Pool, PoolConfig, PoolsConfig};

/// Directory of pools sharing one instancer.
///
/// Holds at most one pool per identifier.
pub struct Registry<I: Instancer> {
    instancer: Arc<I>,
    events: Arc<EventBus>,
    /// `None` until initialised.
    pools: RwLock<Option<HashMap<String, Pool<I>>>>,
}

impl<I: Instancer> Registry<I> {
    /// Create a registry with its own event bus.
    pub fn new(instancer: I) -> Self {
        Self::with_event_bus(instancer, Arc::new(EventBus::default()))
    }

    /// Create a registry whose pools report to `events`.
    pub fn with_event_bus(instancer: I, events: Arc<EventBus>) -> Self {
        Self {
            instancer: Arc::new(instancer),
            events,
            pools: RwLock::new(None),
        }
    }

    /// Initialise the pool map. Later calls are no-ops.
    pub fn init(&self) {
        let mut pools = self.pools.write();
        if pools.is_none() {
            *pools = Some(HashMap::new());
            #[cfg(feature = "tracing")]
            tracing::debug!("Initialized pool registry");
        }
    }

    /// Whether the pool map has been initialised.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.pools.read().is_some()
    }

    /// Tear down every pool and return to the uninitialised state.
    pub fn shutdown(&self) {
        let pools = self.pools.write().take();
        let Some(pools) = pools else {
            return;
        };
        #[cfg(feature = "tracing")]
        tracing::debug!(pool_count = pools.len(), "Shutting down pool registry");
        for pool in pools.into_values() {
            pool.shutdown();
        }
    }

    /// The instancer shared by every pool.
    #[must_use]
    pub fn instancer(&self) -> &I {
        &self.instancer
    }

    /// The bus pools report to.
    #[must_use]
    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    fn read<R>(&self, f: impl FnOnce(&HashMap<String, Pool<I>>) -> R) -> R {
        {
            let pools = self.pools.read();
            if let Some(map) = pools.as_ref() {
                return f(map);
            }
        }
        // First access: initialise under the write lock, then read through it.
        let mut pools = self.pools.write();
        if pools.is_none() {
            #[cfg(feature = "tracing")]
            tracing::debug!("Initialized pool registry");
        }
        f(pools.get_or_insert_with(HashMap::new))
    }

    fn write<R>(&self, f: impl FnOnce(&mut HashMap<String, Pool<I>>) -> R) -> R {
        let mut pools = self.pools.write();
        f(pools.get_or_insert_with(HashMap::new))
    }

    /// Whether a pool is registered under `pool_id`.
    #[must_use]
    pub fn has_pool(&self, pool_id: &str) -> bool {
        self.read(|pools| pools.contains_key(pool_id))
    }

    /// Look up a pool.
    pub fn get_pool(&self, pool_id: &str) -> Result<Pool<I>> {
        self.lookup(pool_id).ok_or_else(|| Error::not_found(pool_id))
    }

    pub(crate) fn lookup(&self, pool_id: &str) -> Option<Pool<I>> {
        self.read(|pools| pools.get(pool_id).cloned())
    }

    /// Build, pre-warm and register a new pool.
    ///
    /// Fails with [`Error::AlreadyExists`] without touching the existing pool.
    pub fn create_pool(
        &self,
        pool_id: impl Into<String>,
        template: I::Template,
        config: PoolConfig,
    ) -> Result<Pool<I>> {
        let pool_id = pool_id.into();
        if self.has_pool(&pool_id) {
            #[cfg(feature = "tracing")]
            tracing::error!(pool_id = %pool_id, "Pool already exists");
            return Err(Error::already_exists(pool_id));
        }

        let pool = Pool::with_events(
            pool_id,
            Arc::clone(&self.instancer),
            template,
            config,
            Arc::clone(&self.events),
        )?;
        if let Err(error) = self.add_pool(pool.clone()) {
            pool.shutdown();
            return Err(error);
        }
        Ok(pool)
    }

    /// Build every pool described by `config`, taking templates from
    /// `template_for`.
    ///
    /// Either all pools are created or none are.
    pub fn create_pools<F>(&self, config: &PoolsConfig, mut template_for: F) -> Result<Vec<Pool<I>>>
    where
        F: FnMut(&str) -> I::Template,
    {
        config.validate()?;
        if let Some(taken) = config.pools.keys().find(|id| self.has_pool(id)) {
            return Err(Error::already_exists(taken.clone()));
        }

        let mut created: Vec<Pool<I>> = Vec::with_capacity(config.pools.len());
        for (pool_id, pool_config) in &config.pools {
            match self.create_pool(pool_id.clone(), template_for(pool_id), pool_config.clone()) {
                Ok(pool) => created.push(pool),
                Err(error) => {
                    for pool in &created {
                        pool.teardown(self);
                    }
                    return Err(error);
                }
            }
        }
        Ok(created)
    }

    /// Register an existing pool under its own identifier.
    pub fn add_pool(&self, pool: Pool<I>) -> Result<()> {
        let pool_id = pool.id().to_string();
        self.write(|pools| {
            if pools.contains_key(&pool_id) {
                return Err(Error::already_exists(pool_id.clone()));
            }
            pools.insert(pool_id.clone(), pool);
            Ok(())
        })?;

        self.events.emit(PoolEvent::PoolCreated {
            pool_id: pool_id.clone(),
        });
        #[cfg(feature = "tracing")]
        tracing::debug!(pool_id = %pool_id, "Registered pool");
        Ok(())
    }

    /// Unregister `pool` if it is the pool currently registered under its
    /// identifier. Returns whether it was removed.
    pub fn remove_pool(&self, pool: &Pool<I>) -> bool {
        self.write(|pools| match pools.get(pool.id()) {
            Some(current) if current.ptr_eq(pool) => {
                pools.remove(pool.id());
                true
            }
            _ => false,
        })
    }

    /// Unregister and tear down the pool registered under `pool_id`.
    pub fn destroy_pool(&self, pool_id: &str) -> Result<()> {
        let Some(pool) = self.write(|pools| pools.remove(pool_id)) else {
            #[cfg(feature = "tracing")]
            tracing::error!(pool_id, "Pool doesn't exist");
            return Err(Error::not_found(pool_id));
        };
        pool.shutdown();
        Ok(())
    }

    /// Return `entry` to its pool, or discard it if it has none.
    pub fn release(
        &self,
        entry: Entry<I::Instance>,
    ) -> std::result::Result<(), Rejected<I::Instance>> {
        entry.release(self)
    }

    /// Release `candidate` if it is a pooled entry of this registry's kind.
    ///
    /// Returns `Ok(false)` for anything that is not an entry.
    pub fn try_release(&self, candidate: &dyn Any) -> Result<bool> {
        let Some(entry) = candidate.downcast_ref::<Entry<I::Instance>>() else {
            return Ok(false);
        };
        entry.duplicate().release(self)?;
        Ok(true)
    }

    /// Number of registered pools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read(HashMap::len)
    }

    /// Whether no pool is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registered identifiers, sorted.
    #[must_use]
    pub fn ids(&self) -> Vec<String> {
        let mut ids = self.read(|pools| pools.keys().cloned().collect::<Vec<_>>());
        ids.sort();
        ids
    }
}

impl<I: Instancer> std::fmt::Debug for Registry<I> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("initialized", &self.is_initialized())
            .field("pool_ids", &self.ids())
            .finish()
    }
}
