//! Testing utilities for pools
//!
//! [`RecordingInstancer`] builds [`Puppet`] instances and keeps a history of
//! every callback the pool made, so tests can assert on the exact sequence.

use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::Mutex;

use crate::entry::{Entry, EntryId};
use crate::error::BoxError;
use crate::instancer::{Instancer, Parent};

/// Stand-in for a host object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Puppet {
    /// Build order, starting at 1.
    pub serial: u32,
    /// The template it was built from.
    pub template: String,
    /// Whether it is currently live.
    pub active: bool,
    /// Holding context it is parked under, `None` while in use.
    pub parent: Option<String>,
}

/// One recorded instancer callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Manufacture(u32),
    Prepare(EntryId),
    Activate(u32),
    Deactivate(u32),
    Reparent(u32, Option<String>),
    Destroy(u32),
}

/// Instancer that records its calls.
#[derive(Debug, Default)]
pub struct RecordingInstancer {
    built: AtomicU32,
    fail_after: Option<u32>,
    calls: Mutex<Vec<Call>>,
}

impl RecordingInstancer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds `successes` puppets, then fails every later `manufacture`.
    #[must_use]
    pub fn failing_after(successes: u32) -> Self {
        Self {
            fail_after: Some(successes),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.lock().iter().filter(|c| pred(c)).count()
    }

    pub fn clear(&self) {
        self.calls.lock().clear();
    }

    fn record(&self, call: Call) {
        self.calls.lock().push(call);
    }
}

impl Instancer for RecordingInstancer {
    type Template = String;
    type Instance = Puppet;

    fn manufacture(&self, template: &String) -> Result<Puppet, BoxError> {
        if let Some(limit) = self.fail_after
            && self.built.load(Ordering::SeqCst) >= limit
        {
            return Err(format!("refusing to build more than {limit} puppets").into());
        }
        let serial = self.built.fetch_add(1, Ordering::SeqCst) + 1;
        self.record(Call::Manufacture(serial));
        Ok(Puppet {
            serial,
            template: template.clone(),
            active: false,
            parent: None,
        })
    }

    fn prepare(&self, entry: &Entry<Puppet>) {
        self.record(Call::Prepare(entry.id()));
    }

    fn activate(&self, instance: &mut Puppet) {
        instance.active = true;
        self.record(Call::Activate(instance.serial));
    }

    fn deactivate(&self, instance: &mut Puppet) {
        instance.active = false;
        self.record(Call::Deactivate(instance.serial));
    }

    fn reparent(&self, instance: &mut Puppet, parent: Parent<'_>) {
        instance.parent = match parent {
            Parent::Holding(id) => Some(id.to_string()),
            Parent::Detached => None,
        };
        self.record(Call::Reparent(instance.serial, instance.parent.clone()));
    }

    fn destroy(&self, instance: Puppet) {
        self.record(Call::Destroy(instance.serial));
    }
}
