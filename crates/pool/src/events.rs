//! Event broadcasting for pool lifecycle observability.
//!
//! Provides [`PoolEvent`] variants emitted by pools and the registry, and an
//! [`EventBus`] backed by `tokio::sync::broadcast`. Emitting never needs a
//! runtime; receivers may poll with `try_recv` or await `recv`.

use tokio::sync::broadcast;

use crate::entry::EntryId;

// ---------------------------------------------------------------------------
// PoolEvent
// ---------------------------------------------------------------------------

/// Events emitted during pool and entry lifecycle operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolEvent {
    /// A pool was registered.
    PoolCreated {
        /// The pool identifier.
        pool_id: String,
    },
    /// A pool was torn down.
    PoolDestroyed {
        /// The pool identifier.
        pool_id: String,
    },
    /// A new entry was built by the instancer.
    Manufactured {
        /// The pool identifier.
        pool_id: String,
        /// The new entry.
        entry_id: EntryId,
    },
    /// An entry was handed out.
    Acquired {
        /// The pool identifier.
        pool_id: String,
        /// The issued entry.
        entry_id: EntryId,
    },
    /// An entry returned to the free list.
    Released {
        /// The pool identifier.
        pool_id: String,
        /// The returned entry.
        entry_id: EntryId,
    },
    /// An active entry was asked to finish early.
    HurryRequested {
        /// The pool identifier.
        pool_id: String,
        /// The hurried entry.
        entry_id: EntryId,
    },
    /// The oldest active entry was forcibly released to serve a `get`.
    Evicted {
        /// The pool identifier.
        pool_id: String,
        /// The evicted entry.
        entry_id: EntryId,
    },
    /// A `get` could not be served.
    Exhausted {
        /// The pool identifier.
        pool_id: String,
        /// Hard cap on alive entries.
        capacity_max: usize,
    },
    /// An entry was permanently discarded.
    Destroyed {
        /// The pool the entry came from.
        pool_id: String,
        /// The discarded entry.
        entry_id: EntryId,
        /// Why it was discarded.
        reason: DestroyReason,
    },
}

// ---------------------------------------------------------------------------
// DestroyReason
// ---------------------------------------------------------------------------

/// Reason an entry was permanently discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DestroyReason {
    /// Its pool was torn down.
    Teardown,
    /// It was released while bound to no live pool.
    Detached,
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Broadcast-based event bus for pool lifecycle events.
///
/// Emission is fire-and-forget: if no subscribers are listening or the
/// channel is full, events are silently dropped.
pub struct EventBus {
    sender: broadcast::Sender<PoolEvent>,
}

impl EventBus {
    /// Create a new event bus with the given buffer size.
    #[must_use]
    pub fn new(buffer_size: usize) -> Self {
        let (sender, _) = broadcast::channel(buffer_size);
        Self { sender }
    }

    /// Emit an event to all current subscribers.
    pub fn emit(&self, event: PoolEvent) {
        // No receivers is not an error.
        let _ = self.sender.send(event);
    }

    /// Subscribe to events emitted after this call.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<PoolEvent> {
        self.sender.subscribe()
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.sender.receiver_count())
            .finish()
    }
}
