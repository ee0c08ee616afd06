//! Hurry protocol and forced eviction

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use flwr_pool::testing::{Call, RecordingInstancer};
use flwr_pool::{
    BoxError, Entry, Error, Notification, NotificationKind, Pool, PoolConfig, Registry,
};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;

fn scenario_config() -> PoolConfig {
    PoolConfig {
        capacity_default: 5,
        capacity_max: 30,
        hurry_enabled: true,
        hurry_threshold: 2,
        hurry_batch_size: 3,
        evict_oldest_when_starved: true,
    }
}

#[test]
fn sixth_get_manufactures_beyond_prewarm() {
    let pool = Pool::new(
        "sparks",
        RecordingInstancer::new(),
        "spark".to_string(),
        scenario_config(),
    )
    .unwrap();
    assert_eq!((pool.free_count(), pool.active_count()), (5, 0));

    let mut held: Vec<_> = (0..5).map(|_| pool.get().unwrap()).collect();
    assert_eq!((pool.free_count(), pool.active_count()), (0, 5));
    assert_eq!(pool.stats().manufactured, 5);

    held.push(pool.get().unwrap());
    assert_eq!(held[5].id().as_u64(), 6);
    assert_eq!((pool.free_count(), pool.active_count()), (0, 6));
    assert_eq!(pool.stats().manufactured, 6);
    assert_eq!(pool.stats().evicted, 0);

    // Hurry only ever reaches entries issued before the triggering get.
    let urgent: Vec<bool> = held.iter().map(Entry::is_urgent).collect();
    assert_eq!(urgent, vec![true, true, true, true, true, false]);
    let order: Vec<u64> = pool.active_ids().iter().map(|id| id.as_u64()).collect();
    assert_eq!(order, vec![1, 2, 3, 4, 5, 6]);
}

#[test]
fn hurry_batch_caps_each_trigger() {
    let pool = Pool::new(
        "sparks",
        RecordingInstancer::new(),
        "spark".to_string(),
        PoolConfig::without_emergency(0, 10),
    )
    .unwrap();
    let held: Vec<_> = (0..6).map(|_| pool.get().unwrap()).collect();

    assert_eq!(pool.hurry(4).unwrap(), 4);
    let urgent: Vec<bool> = held.iter().map(Entry::is_urgent).collect();
    assert_eq!(urgent, vec![true, true, true, true, false, false]);
}

#[test]
fn self_releasing_entries_refill_the_free_list() {
    let registry = Arc::new(Registry::new(RecordingInstancer::new()));
    let pool = registry
        .create_pool(
            "sparks",
            "spark".to_string(),
            PoolConfig {
                capacity_default: 3,
                capacity_max: 3,
                hurry_enabled: true,
                hurry_threshold: 0,
                hurry_batch_size: 3,
                evict_oldest_when_starved: false,
            },
        )
        .unwrap();

    // Free counts stay 3/2/1 while the holders collect their entries, so
    // nobody is hurried until the fourth get. Each holder parks its handle
    // where its hurry listener can reach it.
    let fired = Arc::new(AtomicU32::new(0));
    for _ in 0..3 {
        let entry = pool.get().unwrap();
        let slot = Arc::new(Mutex::new(None::<Entry<_>>));
        let listener_slot = Arc::clone(&slot);
        let listener_registry = Arc::clone(&registry);
        let listener_fired = Arc::clone(&fired);
        entry.on_hurry_while_held(move |_: &Notification| -> Result<(), BoxError> {
            listener_fired.fetch_add(1, Ordering::SeqCst);
            let held = listener_slot.lock().take();
            if let Some(held) = held {
                listener_registry
                    .release(held)
                    .map_err(|r| Box::new(Error::from(r)) as BoxError)?;
            }
            Ok(())
        });
        *slot.lock() = Some(entry);
    }
    assert_eq!(pool.active_count(), 3);
    assert_eq!(pool.stats().hurried, 0);

    // The fourth get hurries everyone; all three hand their entries back.
    let fourth = pool.get().unwrap();
    assert_eq!(fired.load(Ordering::SeqCst), 3);
    assert_eq!((pool.free_count(), pool.active_count()), (2, 1));
    assert_eq!(pool.stats().manufactured, 3);
    assert!(!fourth.is_urgent());
    // The previous holder's hurry listener left with it.
    assert_eq!(fourth.listener_count(NotificationKind::HurryRequested), 0);
}

#[test]
fn previous_holder_listener_stays_quiet() {
    let pool = Pool::new(
        "sparks",
        RecordingInstancer::new(),
        "spark".to_string(),
        PoolConfig::without_emergency(1, 1),
    )
    .unwrap();
    let fired = Arc::new(AtomicU32::new(0));

    let first = pool.get().unwrap();
    let fired_c = Arc::clone(&fired);
    let kept = first.on_hurry(move |_: &Notification| -> Result<(), BoxError> {
        fired_c.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    let fired_c = Arc::clone(&fired);
    first.on_hurry_while_held(move |_: &Notification| -> Result<(), BoxError> {
        fired_c.fetch_add(10, Ordering::SeqCst);
        Ok(())
    });
    pool.release(first).unwrap();

    // Same entry, new holder: only the persistent listener is left, and it
    // can be removed as well.
    let second = pool.get().unwrap();
    assert_eq!(second.listener_count(NotificationKind::HurryRequested), 1);
    pool.hurry(1).unwrap();
    assert_eq!(fired.load(Ordering::SeqCst), 1);

    assert!(second.remove_listener(kept));
    pool.release(second).unwrap();
    let third = pool.get().unwrap();
    pool.hurry(1).unwrap();
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert!(third.is_urgent());
}

#[test]
fn forced_eviction_releases_oldest_through_listeners() {
    let pool = Pool::new(
        "sparks",
        RecordingInstancer::new(),
        "spark".to_string(),
        PoolConfig {
            capacity_default: 0,
            capacity_max: 2,
            hurry_enabled: true,
            hurry_threshold: 0,
            hurry_batch_size: 1,
            evict_oldest_when_starved: true,
        },
    )
    .unwrap();

    let oldest = pool.get().unwrap();
    let released = Arc::new(AtomicU32::new(0));
    let released_c = Arc::clone(&released);
    oldest.on_released(move |_: &Notification| -> Result<(), BoxError> {
        released_c.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    let _newer = pool.get().unwrap();
    pool.instancer().clear();

    let served = pool.get().unwrap();
    assert_eq!(served.id(), oldest.id());
    assert_eq!(released.load(Ordering::SeqCst), 1);
    assert_eq!(pool.stats().evicted, 1);
    assert_eq!(
        pool.instancer().calls(),
        vec![
            Call::Reparent(1, Some("sparks".into())),
            Call::Deactivate(1),
            Call::Reparent(1, None),
            Call::Activate(1),
        ]
    );

    let rejected = pool.release(oldest).unwrap_err();
    assert!(rejected.error().to_string().contains("stale"));
}
