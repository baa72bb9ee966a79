use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{interval, MissedTickBehavior},
};

use crate::cache::WindowStore;

pub fn sweep_once<S: WindowStore + ?Sized>(store: &S, now: Instant, ttl: Duration) -> usize {
    let removed = store.sweep_expired(now, ttl);
    if removed > 0 {
        tracing::debug!(removed, remaining = store.len(), "swept expired entries");
    }
    removed
}

/// Runs `sweep_once` every `every` until `shutdown` turns true or its sender
/// is dropped. The first sweep happens one full interval after spawning.
pub fn spawn_sweeper<S>(
    store: Arc<S>,
    every: Duration,
    ttl: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()>
where
    S: WindowStore + ?Sized + 'static,
{
    tokio::spawn(async move {
        tracing::info!(interval_secs = every.as_secs(), "cache sweeper started");

        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    sweep_once(store.as_ref(), Instant::now(), ttl);
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!("cache sweeper stopped");
    })
}
