//! Listener dispatch through the public pool API

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use flwr_pool::{
    BoxError, Entry, Error, Instancer, Notification, NotificationKind, Pool, PoolConfig,
};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;

/// Attaches a journaling listener to every entry it builds.
#[derive(Default)]
struct Journaling {
    journal: Arc<Mutex<Vec<(NotificationKind, u64)>>>,
}

impl Instancer for Journaling {
    type Template = ();
    type Instance = u32;

    fn manufacture(&self, _template: &()) -> Result<u32, BoxError> {
        Ok(0)
    }

    fn prepare(&self, entry: &Entry<u32>) {
        for kind in [NotificationKind::Acquired, NotificationKind::Released] {
            let journal = Arc::clone(&self.journal);
            let listener = move |n: &Notification| -> Result<(), BoxError> {
                journal.lock().push((n.kind, n.entry_id.as_u64()));
                Ok(())
            };
            match kind {
                NotificationKind::Acquired => entry.on_acquired(listener),
                _ => entry.on_released(listener),
            };
        }
    }

    fn activate(&self, instance: &mut u32) {
        *instance += 1;
    }
}

#[test]
fn prepared_listeners_follow_every_lease() {
    let instancer = Journaling::default();
    let journal = Arc::clone(&instancer.journal);
    let pool = Pool::new("uses", instancer, (), PoolConfig::without_emergency(1, 1)).unwrap();
    journal.lock().clear();

    for _ in 0..2 {
        let entry = pool.get().unwrap();
        pool.release(entry).unwrap();
    }

    assert_eq!(
        *journal.lock(),
        vec![
            (NotificationKind::Acquired, 1),
            (NotificationKind::Released, 1),
            (NotificationKind::Acquired, 1),
            (NotificationKind::Released, 1),
        ]
    );
    let entry = pool.get().unwrap();
    // Once during pre-warm, then three gets.
    assert_eq!(entry.lock().map(|n| *n), Some(4));
}

#[test]
fn listeners_run_in_registration_order() {
    let pool = Pool::new(
        "order",
        Journaling::default(),
        (),
        PoolConfig::without_emergency(0, 1),
    )
    .unwrap();
    let entry = pool.get().unwrap();
    let order = Arc::new(Mutex::new(Vec::new()));
    for name in ["first", "second"] {
        let order = Arc::clone(&order);
        entry.on_hurry(move |_: &Notification| -> Result<(), BoxError> {
            order.lock().push(name);
            Ok(())
        });
    }
    assert_eq!(entry.listener_count(NotificationKind::HurryRequested), 2);

    assert!(entry.request_hurry().unwrap());
    assert_eq!(*order.lock(), vec!["first", "second"]);
}

#[test]
fn failing_hurry_listener_surfaces_from_get() {
    let pool = Pool::new(
        "fussy",
        Journaling::default(),
        (),
        PoolConfig {
            capacity_default: 0,
            capacity_max: 4,
            hurry_enabled: true,
            hurry_threshold: 0,
            hurry_batch_size: 1,
            evict_oldest_when_starved: false,
        },
    )
    .unwrap();
    let entry = pool.get().unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let calls_c = Arc::clone(&calls);
    entry.on_hurry(move |_: &Notification| -> Result<(), BoxError> {
        calls_c.fetch_add(1, Ordering::SeqCst);
        Err("cannot stop now".into())
    });

    let err = pool.get().unwrap_err();
    assert!(matches!(
        err,
        Error::Listener {
            notification: NotificationKind::HurryRequested,
            ..
        }
    ));
    assert_eq!(pool.active_count(), 1);
    assert!(entry.is_urgent());

    // Already urgent: the next get does not ask again.
    let _second = pool.get().unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}
