//! # Flwr Pool
//!
//! Reusable object pools for hosts that build expensive instances from a
//! template: bullets, particles, UI rows, network buffers.
//!
//! - [`Pool`] keeps idle entries in a free list and issued ones in
//!   acquisition order, under a hard cap.
//! - When the free list runs low the pool asks its oldest active entries to
//!   *hurry* (finish early and release themselves); when it is starved it
//!   can forcibly reclaim the oldest one.
//! - [`Registry`] maps identifiers to pools and discards entries that no
//!   longer belong to any pool.
//! - The host plugs in through the [`Instancer`] trait.
//!
//! ```
//! use flwr_pool::{BoxError, Instancer, PoolConfig, Registry};
//!
//! struct Sparks;
//!
//! impl Instancer for Sparks {
//!     type Template = &'static str;
//!     type Instance = String;
//!
//!     fn manufacture(&self, template: &&'static str) -> Result<String, BoxError> {
//!         Ok(template.to_string())
//!     }
//! }
//!
//! let registry = Registry::new(Sparks);
//! let pool = registry.create_pool("sparks", "spark", PoolConfig::default())?;
//! let entry = pool.get()?;
//! assert_eq!(pool.active_count(), 1);
//! registry.release(entry)?;
//! assert_eq!(pool.active_count(), 0);
//! # Ok::<(), flwr_pool::Error>(())
//! ```

pub mod entry;
pub mod error;
pub mod events;
pub mod instancer;
pub mod listener;
pub mod pool;
pub mod registry;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use entry::{Entry, EntryId};
pub use error::{BoxError, Error, Rejected, Result};
pub use events::{DestroyReason, EventBus, PoolEvent};
pub use instancer::{Instancer, Parent};
pub use listener::{Listener, ListenerId, Notification, NotificationKind};
pub use pool::{Pool, PoolConfig, PoolStats, PoolsConfig};
pub use registry::Registry;
