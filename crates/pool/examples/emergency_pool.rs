//! Emergency pool example
//!
//! Runs a small particle pool through the hurry protocol: the free list runs
//! dry, active particles are asked to finish early, and the ones that agree
//! hand themselves back before the next request is served.
//!
//! Run with `RUST_LOG=flwr_pool=debug` to see the pool's own logging.

use std::sync::Arc;

use flwr_pool::{
    BoxError, Entry, Error, Instancer, Notification, Parent, PoolConfig, PoolEvent, Registry,
};
use parking_lot::Mutex;
use tracing_subscriber::EnvFilter;

/// A particle with a remaining lifetime in frames.
#[derive(Debug)]
struct Particle {
    kind: String,
    frames_left: u32,
    attached_to: Option<String>,
}

/// Builds particles from a kind name.
struct ParticleFactory;

impl Instancer for ParticleFactory {
    type Template = String;
    type Instance = Particle;

    fn manufacture(&self, template: &String) -> Result<Particle, BoxError> {
        Ok(Particle {
            kind: template.clone(),
            frames_left: 0,
            attached_to: None,
        })
    }

    fn activate(&self, particle: &mut Particle) {
        particle.frames_left = 120;
    }

    fn deactivate(&self, particle: &mut Particle) {
        particle.frames_left = 0;
    }

    fn reparent(&self, particle: &mut Particle, parent: Parent<'_>) {
        particle.attached_to = match parent {
            Parent::Holding(id) => Some(format!("{id}-holder")),
            Parent::Detached => None,
        };
    }
}

type Slot = Arc<Mutex<Option<Entry<Particle>>>>;

fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    println!("=== Emergency Pool Example ===\n");

    let registry = Arc::new(Registry::new(ParticleFactory));
    let mut events = registry.events().subscribe();

    let config = PoolConfig {
        capacity_default: 3,
        capacity_max: 4,
        hurry_enabled: true,
        hurry_threshold: 1,
        hurry_batch_size: 2,
        evict_oldest_when_starved: true,
    };
    let pool = registry.create_pool("sparks", "spark".to_string(), config)?;
    println!("Pool created: {} idle, cap {}", pool.free_count(), pool.config().capacity_max);

    // Particles that agree to hurry cut their lifetime short and release
    // themselves through the registry.
    let mut slots: Vec<Slot> = Vec::new();
    for frame in 0..6 {
        let entry = pool.get()?;
        if let Some(particle) = entry.lock() {
            println!(
                "frame {frame}: got {} {} ({} frames left)",
                particle.kind,
                entry.id(),
                particle.frames_left
            );
        }

        let slot: Slot = Arc::new(Mutex::new(None));
        if frame % 2 == 0 {
            let listener_slot = Arc::clone(&slot);
            let listener_registry = Arc::clone(&registry);
            entry.on_hurry_while_held(move |notification: &Notification| -> Result<(), BoxError> {
                println!("  {} hurries and releases itself", notification.entry_id);
                let held = listener_slot.lock().take();
                if let Some(held) = held {
                    listener_registry
                        .release(held)
                        .map_err(|rejected| Box::new(Error::from(rejected)) as BoxError)?;
                }
                Ok(())
            });
        }
        *slot.lock() = Some(entry);
        slots.push(slot);

        let stats = pool.stats();
        println!(
            "  idle {}, active {}, hurried {}, evicted {}",
            stats.idle, stats.active, stats.hurried, stats.evicted
        );
    }

    // Whatever is still held goes back the normal way.
    for slot in slots {
        let held = slot.lock().take();
        if let Some(entry) = held {
            if let Err(rejected) = registry.release(entry) {
                println!("  release refused: {}", rejected.error());
            }
        }
    }

    println!("\nFinal stats: {:?}", pool.stats());

    registry.shutdown();
    let mut evictions = 0;
    while let Ok(event) = events.try_recv() {
        if matches!(event, PoolEvent::Evicted { .. }) {
            evictions += 1;
        }
    }
    println!("Evictions observed on the bus: {evictions}");

    Ok(())
}
