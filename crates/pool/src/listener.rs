//! Lifecycle listeners attached to pooled entries.
//!
//! Listeners are notified synchronously, in registration order, when an entry
//! is acquired, released, or asked to hurry. A listener error stops the
//! fan-out and is propagated to the caller of the operation that fired it.

use std::sync::Arc;

use crate::entry::EntryId;
use crate::error::{BoxError, Error, Result};

// ---------------------------------------------------------------------------
// NotificationKind
// ---------------------------------------------------------------------------

/// The lifecycle point a listener is notified about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationKind {
    /// The entry was handed out by its pool.
    Acquired,
    /// The entry went back to its pool's free list.
    Released,
    /// The pool is running low and asks the entry to finish early.
    HurryRequested,
}

impl std::fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Acquired => write!(f, "Acquired"),
            Self::Released => write!(f, "Released"),
            Self::HurryRequested => write!(f, "HurryRequested"),
        }
    }
}

/// Payload passed to every listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// What happened.
    pub kind: NotificationKind,
    /// The notified entry.
    pub entry_id: EntryId,
    /// The pool the entry is bound to, if any.
    pub pool_id: Option<String>,
}

// ---------------------------------------------------------------------------
// Listener trait
// ---------------------------------------------------------------------------

/// Observer of entry lifecycle notifications.
///
/// Implemented for every `Fn(&Notification) -> Result<(), BoxError>` closure.
pub trait Listener: Send + Sync {
    /// Handle one notification.
    fn notify(&self, notification: &Notification) -> std::result::Result<(), BoxError>;
}

impl<F> Listener for F
where
    F: Fn(&Notification) -> std::result::Result<(), BoxError> + Send + Sync,
{
    fn notify(&self, notification: &Notification) -> std::result::Result<(), BoxError> {
        self(notification)
    }
}

// ---------------------------------------------------------------------------
// Listeners
// ---------------------------------------------------------------------------

/// Handle for removing a registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Registered {
    id: ListenerId,
    /// Dropped when the current holder releases the entry.
    scoped: bool,
    listener: Arc<dyn Listener>,
}

/// Registration-ordered listener lists, one per notification kind.
#[derive(Default)]
pub(crate) struct Listeners {
    next_id: u64,
    acquired: Vec<Registered>,
    released: Vec<Registered>,
    hurry: Vec<Registered>,
}

impl Listeners {
    pub(crate) fn push(
        &mut self,
        kind: NotificationKind,
        scoped: bool,
        listener: Arc<dyn Listener>,
    ) -> ListenerId {
        self.next_id += 1;
        let id = ListenerId(self.next_id);
        self.list_mut(kind).push(Registered {
            id,
            scoped,
            listener,
        });
        id
    }

    /// Remove the listener registered as `id`. Returns whether it was found.
    pub(crate) fn remove(&mut self, id: ListenerId) -> bool {
        for list in [&mut self.acquired, &mut self.released, &mut self.hurry] {
            if let Some(pos) = list.iter().position(|r| r.id == id) {
                list.remove(pos);
                return true;
            }
        }
        false
    }

    /// Drop every listener scoped to the current holder.
    pub(crate) fn drop_scoped(&mut self) {
        for list in [&mut self.acquired, &mut self.released, &mut self.hurry] {
            list.retain(|r| !r.scoped);
        }
    }

    /// Clone the listeners for `kind` so they can run without the lock held.
    pub(crate) fn snapshot(&self, kind: NotificationKind) -> Vec<Arc<dyn Listener>> {
        self.list(kind)
            .iter()
            .map(|r| Arc::clone(&r.listener))
            .collect()
    }

    pub(crate) fn len(&self, kind: NotificationKind) -> usize {
        self.list(kind).len()
    }

    fn list(&self, kind: NotificationKind) -> &Vec<Registered> {
        match kind {
            NotificationKind::Acquired => &self.acquired,
            NotificationKind::Released => &self.released,
            NotificationKind::HurryRequested => &self.hurry,
        }
    }

    fn list_mut(&mut self, kind: NotificationKind) -> &mut Vec<Registered> {
        match kind {
            NotificationKind::Acquired => &mut self.acquired,
            NotificationKind::Released => &mut self.released,
            NotificationKind::HurryRequested => &mut self.hurry,
        }
    }
}

/// Run `listeners` in order, stopping at the first failure.
pub(crate) fn dispatch(listeners: &[Arc<dyn Listener>], notification: &Notification) -> Result<()> {
    for listener in listeners {
        if let Err(source) = listener.notify(notification) {
            #[cfg(feature = "tracing")]
            tracing::warn!(
                entry_id = %notification.entry_id,
                pool_id = notification.pool_id.as_deref().unwrap_or(""),
                notification = %notification.kind,
                error = %source,
                "Listener failed"
            );
            return Err(Error::Listener {
                pool_id: notification.pool_id.clone().unwrap_or_default(),
                entry_id: notification.entry_id,
                notification: notification.kind,
                source,
            });
        }
    }
    Ok(())
}
