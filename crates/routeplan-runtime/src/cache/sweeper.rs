//! Background expiry sweep.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use super::AssemblyCache;

/// Shortest sweep period accepted; `tokio::time::interval` rejects zero.
const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(1);

/// Handle to a running sweeper. Dropping it aborts the task.
#[derive(Debug)]
pub struct SweeperHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl SweeperHandle {
    /// Stop the sweeper and wait for it to exit.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map_or(true, JoinHandle::is_finished)
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Run `cache.sweep()` every `interval`, starting one interval from now.
///
/// Must be called from within a tokio runtime.
pub fn spawn_sweeper<P>(cache: Arc<AssemblyCache<P>>, interval: Duration) -> SweeperHandle
where
    P: Clone + Send + Sync + 'static,
{
    let period = interval.max(MIN_SWEEP_INTERVAL);
    let (tx, mut rx) = oneshot::channel();

    let task = tokio::spawn(async move {
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    cache.sweep();
                }
                _ = &mut rx => break,
            }
        }
        tracing::debug!("Assembly cache sweeper stopped");
    });

    tracing::debug!(interval = ?period, "Started assembly cache sweeper");
    SweeperHandle {
        shutdown: Some(tx),
        task: Some(task),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::AssemblyKey;

    fn key(vm: &str) -> AssemblyKey {
        AssemblyKey::new(vm, &[])
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_runs_on_its_own_interval() {
        let cache = Arc::new(AssemblyCache::<String>::new(16));
        cache.put(key("default"), "p".to_string(), Duration::from_secs(1));

        let handle = spawn_sweeper(cache.clone(), Duration::from_secs(5));

        time::sleep(Duration::from_secs(2)).await;
        // expired, but not yet swept
        assert_eq!(cache.get(&key("default")), None);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.stats().sweeps, 0);

        time::sleep(Duration::from_secs(4)).await;
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.stats().sweeps, 1);

        time::sleep(Duration::from_secs(5)).await;
        assert_eq!(cache.stats().sweeps, 2);

        handle.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_leaves_live_entries() {
        let cache = Arc::new(AssemblyCache::<String>::new(16));
        cache.put(key("long"), "p".to_string(), Duration::from_secs(60));
        let _handle = spawn_sweeper(cache.clone(), Duration::from_secs(5));

        time::sleep(Duration::from_secs(11)).await;
        assert_eq!(cache.stats().sweeps, 2);
        assert_eq!(cache.get(&key("long")).as_deref(), Some("p"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_sweeping() {
        let cache = Arc::new(AssemblyCache::<String>::new(16));
        let handle = spawn_sweeper(cache.clone(), Duration::from_secs(1));

        time::sleep(Duration::from_millis(1_500)).await;
        handle.shutdown().await;
        let sweeps = cache.stats().sweeps;

        time::sleep(Duration::from_secs(10)).await;
        assert_eq!(cache.stats().sweeps, sweeps);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_is_clamped() {
        let cache = Arc::new(AssemblyCache::<String>::new(16));
        let handle = spawn_sweeper(cache.clone(), Duration::ZERO);
        time::sleep(Duration::from_millis(5)).await;
        assert!(cache.stats().sweeps >= 1);
        assert!(!handle.is_finished());
    }
}
