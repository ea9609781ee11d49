use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};

use super::ResourceCache;
use crate::utils::futures::CancelOnDrop;

/// Periodically evicts stale entries from a [`ResourceCache`].
///
/// The janitor only removes entries that are already invisible to lookups, so it has no
/// effect on loads that are running while it sweeps.
#[derive(Debug)]
pub struct Janitor {
    cache: ResourceCache,
    interval: Duration,
}

impl Janitor {
    pub fn new(cache: ResourceCache, interval: Duration) -> Self {
        Self { cache, interval }
    }

    /// Runs one sweep, returning the number of evicted entries.
    pub fn sweep(&self) -> usize {
        let evicted = self.cache.sweep_expired();
        if evicted > 0 {
            tracing::debug!(evicted, "Evicted expired images from cache");
        }
        metric!(counter("janitor.evicted") += evicted as i64);
        evicted
    }

    /// Spawns the sweep loop on the current runtime.
    ///
    /// The first sweep happens one interval from now. The loop stops when the returned
    /// handle is dropped.
    pub fn spawn(self) -> JanitorHandle {
        let interval = self.interval.max(Duration::from_millis(1));
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.sweep();
            }
        });
        JanitorHandle {
            task: CancelOnDrop::new(task),
        }
    }
}

/// Keeps a spawned [`Janitor`] running.
#[derive(Debug)]
pub struct JanitorHandle {
    task: CancelOnDrop<()>,
}

impl JanitorHandle {
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ResolvedResource;

    #[tokio::test(start_paused = true)]
    async fn test_janitor_sweeps_on_interval() {
        let cache = ResourceCache::new(Duration::from_secs(300), 16);
        cache.put("img://a".into(), ResolvedResource::Substitute("img://a".into()));

        let handle = Janitor::new(cache.clone(), Duration::from_secs(60)).spawn();
        assert!(handle.is_running());

        // 5 sweeps happen before the entry expires
        tokio::time::sleep(Duration::from_secs(301)).await;
        assert_eq!(cache.raw_len(), 1);

        // the next sweep at 360s evicts it
        tokio::time::sleep(Duration::from_secs(60)).await;
        assert_eq!(cache.raw_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweep_counts() {
        let cache = ResourceCache::new(Duration::from_secs(1), 16);
        cache.put("img://a".into(), ResolvedResource::Substitute("img://a".into()));
        cache.put("img://b".into(), ResolvedResource::Substitute("img://b".into()));

        let janitor = Janitor::new(cache, Duration::from_secs(60));
        assert_eq!(janitor.sweep(), 0);
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(janitor.sweep(), 2);
    }
}
