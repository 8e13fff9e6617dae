//! Periodic pool health reporting
//!
//! Spawns a background task that publishes resource counts as gauges and logs
//! a summary line. The task runs independently of dispatch and only takes the
//! pool lock long enough to count.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::pool::ResourcePool;

/// Resource counts observed in one reporting cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolCounts {
    pub total: usize,
    pub active: usize,
    pub suspended: usize,
}

/// Spawn a background task that reports pool health every `interval`.
///
/// Returns a `JoinHandle` for the spawned task.
pub fn spawn_health_reporter<S>(
    pool: Arc<ResourcePool<S>>,
    interval: Duration,
) -> tokio::task::JoinHandle<()>
where
    S: Send + Sync + 'static,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // Skip the immediate first tick; the pool was just loaded
        ticker.tick().await;

        loop {
            ticker.tick().await;
            report_cycle(&pool).await;
        }
    })
}

/// Run one reporting cycle: publish gauges and log the counts.
pub async fn report_cycle<S>(pool: &ResourcePool<S>) -> PoolCounts
where
    S: Send + Sync + 'static,
{
    let (total, active, suspended) = pool.counts().await;

    metrics::gauge!("pool_resources", "status" => "active").set(active as f64);
    metrics::gauge!("pool_resources", "status" => "suspended").set(suspended as f64);

    if total > 0 && active == 0 {
        warn!(total, suspended, "no active resources left in pool");
    } else {
        info!(total, active, suspended, "pool health");
    }

    PoolCounts {
        total,
        active,
        suspended,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::ResourceOptions;

    async fn test_pool(ids: &[&str]) -> Arc<ResourcePool<()>> {
        let pool = ResourcePool::new(1).unwrap();
        for id in ids {
            pool.register(*id, (), ResourceOptions::default())
                .await
                .unwrap();
        }
        Arc::new(pool)
    }

    #[tokio::test]
    async fn report_cycle_counts_statuses() {
        let pool = test_pool(&["a", "b", "c"]).await;
        // Threshold 1: the second failure suspends
        pool.record_outcome("b", false).await.unwrap();
        pool.record_outcome("b", false).await.unwrap();

        let counts = report_cycle(&pool).await;
        assert_eq!(
            counts,
            PoolCounts {
                total: 3,
                active: 2,
                suspended: 1
            }
        );
    }

    #[tokio::test]
    async fn report_cycle_on_empty_pool() {
        let pool = test_pool(&[]).await;
        let counts = report_cycle(&pool).await;
        assert_eq!(counts.total, 0);
        assert_eq!(counts.active, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn reporter_task_keeps_running() {
        let pool = test_pool(&["a"]).await;
        let handle = spawn_health_reporter(pool, Duration::from_secs(30));

        tokio::time::sleep(Duration::from_secs(95)).await;
        assert!(!handle.is_finished());
        handle.abort();
    }
}
