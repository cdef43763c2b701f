//! Bounded fan-out for per-source sub-requests.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

/// Smallest and largest worker pool a source may ask for.
pub const MIN_WORKERS: usize = 2;
pub const MAX_WORKERS: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FanOutConfig {
    /// Items processed concurrently per batch (clamped to 2..=10).
    pub workers: usize,
    /// Pause between batches.
    pub batch_delay: Duration,
}

impl Default for FanOutConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            batch_delay: Duration::from_millis(500),
        }
    }
}

impl FanOutConfig {
    pub fn worker_count(&self) -> usize {
        self.workers.clamp(MIN_WORKERS, MAX_WORKERS)
    }
}

/// Run `task` over `items` in batches of `config.workers`, sleeping
/// `config.batch_delay` between batches. Results keep the input order.
pub async fn fan_out<T, R, F, Fut>(items: Vec<T>, config: &FanOutConfig, task: F) -> Vec<R>
where
    F: Fn(T) -> Fut,
    Fut: Future<Output = R>,
{
    let workers = config.worker_count();
    let total = items.len();
    let mut results = Vec::with_capacity(total);
    let mut pending = items.into_iter().peekable();
    let mut batch_index = 0usize;

    while pending.peek().is_some() {
        if batch_index > 0 && !config.batch_delay.is_zero() {
            tokio::time::sleep(config.batch_delay).await;
        }

        let futures: Vec<_> = pending.by_ref().take(workers).map(&task).collect();
        debug!(
            "Fan-out batch {}: {} of {} items",
            batch_index + 1,
            futures.len(),
            total
        );
        results.extend(futures::future::join_all(futures).await);
        batch_index += 1;
    }

    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn test_batches_with_delay_and_keeps_order() {
        let config = FanOutConfig {
            workers: 2,
            batch_delay: Duration::from_secs(1),
        };
        let start = Instant::now();

        let results = fan_out((1..=5).collect(), &config, |n: u32| async move {
            (n * 10, Instant::now().duration_since(start).as_secs())
        })
        .await;

        let values: Vec<u32> = results.iter().map(|(v, _)| *v).collect();
        assert_eq!(values, vec![10, 20, 30, 40, 50]);
        let started: Vec<u64> = results.iter().map(|(_, t)| *t).collect();
        assert_eq!(started, vec![0, 0, 1, 1, 2]);
    }

    #[tokio::test]
    async fn test_never_exceeds_worker_count() {
        let config = FanOutConfig {
            workers: 3,
            batch_delay: Duration::ZERO,
        };
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        fan_out((0..9).collect::<Vec<u32>>(), &config, |_| {
            let active = active.clone();
            let peak = peak.clone();
            async move {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::task::yield_now().await;
                active.fetch_sub(1, Ordering::SeqCst);
            }
        })
        .await;

        assert_eq!(peak.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_worker_count_clamped() {
        let mut config = FanOutConfig::default();
        config.workers = 1;
        assert_eq!(config.worker_count(), 2);
        config.workers = 50;
        assert_eq!(config.worker_count(), 10);
    }

    #[tokio::test]
    async fn test_empty_input() {
        let results: Vec<u32> = fan_out(Vec::<u32>::new(), &FanOutConfig::default(), |n| async move { n }).await;
        assert!(results.is_empty());
    }
}
