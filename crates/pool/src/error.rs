//! Error types for pool and registry operations
use thiserror::Error;

use crate::entry::{Entry, EntryId};
use crate::listener::NotificationKind;

/// Result type for pool operations
pub type Result<T> = std::result::Result<T, Error>;

/// Boxed error returned by host collaborators (instancers and listeners).
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Error type for pool and registry operations.
///
/// Every variant is a synchronous signal: a failed operation leaves both the
/// pool and the registry exactly as they were before the call.
#[derive(Error, Debug)]
pub enum Error {
    /// A pool with this identifier is already registered
    #[error("Pool '{pool_id}' already exists")]
    AlreadyExists {
        /// The pool identifier
        pool_id: String,
    },

    /// No pool is registered under this identifier
    #[error("Pool '{pool_id}' not found")]
    NotFound {
        /// The pool identifier
        pool_id: String,
    },

    /// The entry does not belong to the pool it was handed to
    #[error("Invalid entry {entry_id} for pool '{pool_id}': {reason}")]
    InvalidEntry {
        /// The pool that rejected the entry
        pool_id: String,
        /// The rejected entry
        entry_id: EntryId,
        /// Why the entry was rejected
        reason: String,
    },

    /// No entry could be produced, even after eviction
    #[error("Pool '{pool_id}' exhausted: {active}/{capacity_max} entries in use")]
    CapacityExhausted {
        /// The pool identifier
        pool_id: String,
        /// Entries currently issued
        active: usize,
        /// Hard cap on alive entries
        capacity_max: usize,
    },

    /// Pool settings are invalid
    #[error("Configuration error: {message}")]
    Configuration {
        /// The error message
        message: String,
    },

    /// The instancer failed to build a new instance
    #[error("Failed to manufacture an entry for pool '{pool_id}'")]
    Manufacture {
        /// The pool identifier
        pool_id: String,
        /// The instancer error
        #[source]
        source: BoxError,
    },

    /// A lifecycle listener returned an error
    #[error("Listener failed on {notification} for entry {entry_id} of pool '{pool_id}'")]
    Listener {
        /// The pool the entry is bound to (empty when detached)
        pool_id: String,
        /// The notified entry
        entry_id: EntryId,
        /// Which notification was being dispatched
        notification: NotificationKind,
        /// The listener error
        #[source]
        source: BoxError,
    },

    /// The pool cannot perform the operation in its current state
    #[error("Pool '{pool_id}' is in an invalid state: {reason}")]
    InvalidState {
        /// The pool identifier
        pool_id: String,
        /// What is wrong
        reason: String,
    },
}

impl Error {
    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an already-exists error
    pub fn already_exists<S: Into<String>>(pool_id: S) -> Self {
        Self::AlreadyExists {
            pool_id: pool_id.into(),
        }
    }

    /// Create a not-found error
    pub fn not_found<S: Into<String>>(pool_id: S) -> Self {
        Self::NotFound {
            pool_id: pool_id.into(),
        }
    }

    /// Create an invalid-entry error
    pub fn invalid_entry<S: Into<String>, R: Into<String>>(
        pool_id: S,
        entry_id: EntryId,
        reason: R,
    ) -> Self {
        Self::InvalidEntry {
            pool_id: pool_id.into(),
            entry_id,
            reason: reason.into(),
        }
    }

    /// Create a capacity-exhausted error
    pub fn capacity_exhausted<S: Into<String>>(
        pool_id: S,
        active: usize,
        capacity_max: usize,
    ) -> Self {
        Self::CapacityExhausted {
            pool_id: pool_id.into(),
            active,
            capacity_max,
        }
    }

    /// Create an invalid-state error
    pub fn invalid_state<S: Into<String>, R: Into<String>>(pool_id: S, reason: R) -> Self {
        Self::InvalidState {
            pool_id: pool_id.into(),
            reason: reason.into(),
        }
    }

    /// Check if this error is retryable
    ///
    /// Exhaustion is transient: hurried entries may release themselves
    /// before the next `get`.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::CapacityExhausted { .. })
    }

    /// Get the pool ID associated with this error (if any)
    #[must_use]
    pub fn pool_id(&self) -> Option<&str> {
        match self {
            Self::Configuration { .. } => None,
            Self::AlreadyExists { pool_id }
            | Self::NotFound { pool_id }
            | Self::InvalidEntry { pool_id, .. }
            | Self::CapacityExhausted { pool_id, .. }
            | Self::Manufacture { pool_id, .. }
            | Self::Listener { pool_id, .. }
            | Self::InvalidState { pool_id, .. } => Some(pool_id),
        }
    }
}

/// A release that was refused.
///
/// Carries the entry back to the caller untouched, so a rejected release
/// never loses the instance.
#[derive(Error)]
#[error("{error}")]
pub struct Rejected<T> {
    #[source]
    error: Error,
    entry: Entry<T>,
}

impl<T> Rejected<T> {
    pub(crate) fn new(error: Error, entry: Entry<T>) -> Self {
        Self { error, entry }
    }

    /// The reason the release was refused.
    #[must_use]
    pub fn error(&self) -> &Error {
        &self.error
    }

    /// Take the entry back.
    #[must_use]
    pub fn into_entry(self) -> Entry<T> {
        self.entry
    }

    /// Split into the error and the entry.
    #[must_use]
    pub fn into_parts(self) -> (Error, Entry<T>) {
        (self.error, self.entry)
    }
}

impl<T> std::fmt::Debug for Rejected<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Rejected")
            .field("error", &self.error)
            .field("entry_id", &self.entry.id())
            .finish()
    }
}

impl<T> From<Rejected<T>> for Error {
    fn from(rejected: Rejected<T>) -> Self {
        rejected.error
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhaustion_is_retryable() {
        assert!(Error::capacity_exhausted("fx", 3, 3).is_retryable());
        assert!(!Error::not_found("fx").is_retryable());
        assert!(!Error::configuration("bad").is_retryable());
    }

    #[test]
    fn pool_id_is_reported() {
        assert_eq!(Error::already_exists("bullets").pool_id(), Some("bullets"));
        assert_eq!(
            Error::invalid_state("bullets", "closed").pool_id(),
            Some("bullets")
        );
        assert_eq!(Error::configuration("bad").pool_id(), None);
    }

    #[test]
    fn display_includes_counts() {
        let err = Error::capacity_exhausted("sparks", 30, 30);
        assert_eq!(err.to_string(), "Pool 'sparks' exhausted: 30/30 entries in use");
    }
}
