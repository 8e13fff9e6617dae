//! Resource registry and round-robin selection
//!
//! The pool owns every `ResourceHandle` behind a single exclusive lock. Each
//! public operation is a short critical section with no I/O inside it, so the
//! lock is never held while an operation talks to the network.
//!
//! Registration order is preserved and defines the stable order used for
//! dispatch snapshots and round-robin selection.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::handle::{HandleSnapshot, ResourceHandle, ResourceOptions, ResourceStatus, Transition};

/// Failures tolerated before a resource is suspended, unless overridden.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;

/// A resource picked by `ResourcePool::select`, with its session.
#[derive(Debug)]
pub struct SelectedResource<S> {
    pub id: String,
    pub session: Arc<S>,
}

/// Mapping plus registration order, guarded as one unit.
struct Registry<S> {
    order: Vec<String>,
    handles: HashMap<String, ResourceHandle<S>>,
}

impl<S> Registry<S> {
    fn get_mut(&mut self, id: &str) -> Result<&mut ResourceHandle<S>> {
        self.handles
            .get_mut(id)
            .ok_or_else(|| Error::ResourceNotFound(id.to_string()))
    }

    fn counts(&self) -> (usize, usize, usize) {
        let active = self.handles.values().filter(|h| h.is_active()).count();
        let total = self.handles.len();
        (total, active, total - active)
    }
}

/// Thread-safe registry of session handles keyed by id.
///
/// `S` is the opaque session state. It is stored behind an `Arc` and handed
/// out read-only; the pool never inspects it.
pub struct ResourcePool<S> {
    registry: Mutex<Registry<S>>,
    failure_threshold: u32,
    next_index: AtomicUsize,
}

impl<S> ResourcePool<S>
where
    S: Send + Sync + 'static,
{
    /// Create an empty pool. `failure_threshold` applies to every resource
    /// registered without an override and must be at least 1.
    pub fn new(failure_threshold: u32) -> Result<Self> {
        if failure_threshold == 0 {
            return Err(Error::InvalidFailureThreshold);
        }
        info!(failure_threshold, "pool initialized");
        Ok(Self {
            registry: Mutex::new(Registry {
                order: Vec::new(),
                handles: HashMap::new(),
            }),
            failure_threshold,
            next_index: AtomicUsize::new(0),
        })
    }

    pub fn failure_threshold(&self) -> u32 {
        self.failure_threshold
    }

    /// Register a new session as Active with zeroed stats.
    ///
    /// Fails with `DuplicateResource` if `id` is already present, or with
    /// `InvalidFailureThreshold` for a zero override; the pool is left
    /// unchanged in both cases.
    pub async fn register(
        &self,
        id: impl Into<String>,
        session: S,
        options: ResourceOptions,
    ) -> Result<()> {
        let id = id.into();
        let threshold = options.failure_threshold.unwrap_or(self.failure_threshold);
        if threshold == 0 {
            return Err(Error::InvalidFailureThreshold);
        }
        let mut registry = self.registry.lock().await;
        if registry.handles.contains_key(&id) {
            return Err(Error::DuplicateResource(id));
        }
        registry
            .handles
            .insert(id.clone(), ResourceHandle::new(id.clone(), session, threshold));
        registry.order.push(id.clone());
        info!(resource_id = %id, failure_threshold = threshold, "resource registered");
        Ok(())
    }

    /// Read access to a session. Updates `last_used` and counts a request.
    ///
    /// Does not check status; callers filter by status before dispatching.
    pub async fn acquire(&self, id: &str) -> Result<Arc<S>> {
        let mut registry = self.registry.lock().await;
        Ok(registry.get_mut(id)?.touch())
    }

    /// Record a job outcome and return the resulting status.
    ///
    /// Failures past the handle's threshold suspend it. Runs entirely under
    /// the pool lock so concurrent reports for the same id serialize.
    pub async fn record_outcome(&self, id: &str, success: bool) -> Result<ResourceStatus> {
        let mut registry = self.registry.lock().await;
        let handle = registry.get_mut(id)?;
        if handle.record(success) == Transition::Suspended {
            let errors = handle.snapshot().stats.errors;
            warn!(resource_id = id, errors, "resource suspended (failure threshold exceeded)");
            metrics::counter!("pool_suspensions_total").increment(1);
        }
        Ok(handle.status())
    }

    /// Ids with status Active, in registration order.
    ///
    /// The result is a snapshot and may be stale as soon as the lock drops.
    pub async fn list_active(&self) -> Vec<String> {
        let registry = self.registry.lock().await;
        registry
            .order
            .iter()
            .filter(|id| registry.handles.get(*id).is_some_and(|h| h.is_active()))
            .cloned()
            .collect()
    }

    /// Remove a resource entirely.
    pub async fn evict(&self, id: &str) -> Result<()> {
        let mut registry = self.registry.lock().await;
        if registry.handles.remove(id).is_none() {
            return Err(Error::ResourceNotFound(id.to_string()));
        }
        registry.order.retain(|existing| existing != id);
        info!(resource_id = id, "resource evicted");
        Ok(())
    }

    /// Return a suspended resource to service with its error count cleared.
    pub async fn reactivate(&self, id: &str) -> Result<()> {
        let mut registry = self.registry.lock().await;
        let handle = registry.get_mut(id)?;
        let previous = handle.status();
        handle.reactivate();
        info!(resource_id = id, previous = previous.label(), "resource reactivated");
        Ok(())
    }

    /// Select the next Active resource via round-robin across calls.
    ///
    /// The cursor persists between calls. Suspended resources are skipped.
    /// Counts as an `acquire` on the chosen resource. Returns `PoolExhausted`
    /// with pool counts if nothing is Active.
    pub async fn select(&self) -> Result<SelectedResource<S>> {
        let mut registry = self.registry.lock().await;
        let n = registry.order.len();
        if n > 0 {
            let start = self.next_index.fetch_add(1, Ordering::Relaxed) % n;
            for offset in 0..n {
                let id = registry.order[(start + offset) % n].clone();
                let handle = registry.get_mut(&id)?;
                if !handle.is_active() {
                    continue;
                }
                let session = handle.touch();
                debug!(resource_id = %id, "resource selected");
                return Ok(SelectedResource { id, session });
            }
        }

        let (total, active, suspended) = registry.counts();
        Err(Error::PoolExhausted(exhausted_message(total, active, suspended)))
    }

    /// Snapshot of a single resource.
    pub async fn snapshot(&self, id: &str) -> Result<HandleSnapshot> {
        let registry = self.registry.lock().await;
        registry
            .handles
            .get(id)
            .map(|h| h.snapshot())
            .ok_or_else(|| Error::ResourceNotFound(id.to_string()))
    }

    /// Snapshots of every resource in registration order.
    pub async fn snapshots(&self) -> Vec<HandleSnapshot> {
        let registry = self.registry.lock().await;
        registry
            .order
            .iter()
            .filter_map(|id| registry.handles.get(id))
            .map(|h| h.snapshot())
            .collect()
    }

    /// Counts as `(total, active, suspended)`.
    pub async fn counts(&self) -> (usize, usize, usize) {
        self.registry.lock().await.counts()
    }

    pub async fn len(&self) -> usize {
        self.registry.lock().await.handles.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Pool health summary.
    ///
    /// Status mapping: all active → healthy, some active → degraded,
    /// none active (or empty) → unhealthy.
    pub async fn health(&self) -> serde_json::Value {
        let resources = self.snapshots().await;
        let total = resources.len();
        let active = resources
            .iter()
            .filter(|r| r.status == ResourceStatus::Active)
            .count();

        let status = if active == total && total > 0 {
            "healthy"
        } else if active > 0 {
            "degraded"
        } else {
            "unhealthy"
        };

        serde_json::json!({
            "status": status,
            "resources_total": total,
            "resources_active": active,
            "resources_suspended": total - active,
            "resources": resources,
        })
    }
}

/// Build the exhausted error message JSON.
fn exhausted_message(total: usize, active: usize, suspended: usize) -> String {
    serde_json::json!({
        "error": {
            "type": "pool_exhausted",
            "message": "No active resources",
            "pool": {
                "resources_total": total,
                "resources_active": active,
                "resources_suspended": suspended
            }
        }
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_pool(ids: &[&str]) -> ResourcePool<String> {
        let pool = ResourcePool::new(DEFAULT_FAILURE_THRESHOLD).unwrap();
        for id in ids {
            pool.register(*id, format!("session_{id}"), ResourceOptions::default())
                .await
                .unwrap();
        }
        pool
    }

    async fn fail_times(pool: &ResourcePool<String>, id: &str, n: usize) -> ResourceStatus {
        let mut status = ResourceStatus::Active;
        for _ in 0..n {
            status = pool.record_outcome(id, false).await.unwrap();
        }
        status
    }

    #[tokio::test]
    async fn register_unique_ids_grows_pool() {
        let pool = test_pool(&["a", "b", "c", "d"]).await;
        assert_eq!(pool.len().await, 4);
        assert_eq!(pool.list_active().await, vec!["a", "b", "c", "d"]);
    }

    #[tokio::test]
    async fn duplicate_register_fails_and_leaves_pool_unchanged() {
        let pool = test_pool(&["a", "b"]).await;
        pool.acquire("a").await.unwrap();

        let err = pool
            .register("a", "other".into(), ResourceOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateResource(ref id) if id == "a"));

        assert_eq!(pool.len().await, 2);
        let snap = pool.snapshot("a").await.unwrap();
        assert_eq!(snap.stats.requests, 1, "existing handle must be untouched");
        assert_eq!(*pool.acquire("a").await.unwrap(), "session_a");
    }

    #[tokio::test]
    async fn acquire_returns_session_and_counts_request() {
        let pool = test_pool(&["a"]).await;
        let session = pool.acquire("a").await.unwrap();
        assert_eq!(*session, "session_a");

        let snap = pool.snapshot("a").await.unwrap();
        assert_eq!(snap.stats.requests, 1);
        assert!(snap.last_used.is_some());
    }

    #[tokio::test]
    async fn acquire_unknown_is_not_found() {
        let pool = test_pool(&["a"]).await;
        let err = pool.acquire("ghost").await.unwrap_err();
        assert!(matches!(err, Error::ResourceNotFound(ref id) if id == "ghost"));
    }

    #[tokio::test]
    async fn acquire_ignores_status() {
        let pool = test_pool(&["a"]).await;
        fail_times(&pool, "a", 4).await;
        assert!(pool.acquire("a").await.is_ok());
    }

    #[tokio::test]
    async fn suspension_after_fourth_failure_with_default_threshold() {
        let pool = test_pool(&["a"]).await;

        assert_eq!(fail_times(&pool, "a", 3).await, ResourceStatus::Active);
        assert_eq!(
            pool.record_outcome("a", false).await.unwrap(),
            ResourceStatus::Suspended
        );
        assert_eq!(
            pool.snapshot("a").await.unwrap().status,
            ResourceStatus::Suspended
        );
    }

    #[tokio::test]
    async fn per_resource_threshold_override() {
        let pool = ResourcePool::new(DEFAULT_FAILURE_THRESHOLD).unwrap();
        pool.register("strict", (), ResourceOptions::with_failure_threshold(1))
            .await
            .unwrap();

        assert_eq!(
            pool.record_outcome("strict", false).await.unwrap(),
            ResourceStatus::Active
        );
        assert_eq!(
            pool.record_outcome("strict", false).await.unwrap(),
            ResourceStatus::Suspended
        );
    }

    #[tokio::test]
    async fn success_increments_successes() {
        let pool = test_pool(&["a"]).await;
        pool.record_outcome("a", true).await.unwrap();
        pool.record_outcome("a", true).await.unwrap();

        let stats = pool.snapshot("a").await.unwrap().stats;
        assert_eq!(stats.successes, 2);
        assert_eq!(stats.errors, 0);
    }

    #[tokio::test]
    async fn record_outcome_unknown_is_not_found() {
        let pool = test_pool(&[]).await;
        assert!(matches!(
            pool.record_outcome("ghost", true).await,
            Err(Error::ResourceNotFound(_))
        ));
    }

    #[tokio::test]
    async fn list_active_excludes_suspended() {
        let pool = test_pool(&["a", "b", "c"]).await;
        fail_times(&pool, "b", 4).await;
        assert_eq!(pool.list_active().await, vec!["a", "c"]);
    }

    #[tokio::test]
    async fn evict_removes_handle() {
        let pool = test_pool(&["a", "b"]).await;
        pool.evict("a").await.unwrap();

        assert_eq!(pool.len().await, 1);
        assert_eq!(pool.list_active().await, vec!["b"]);
        assert!(matches!(
            pool.acquire("a").await,
            Err(Error::ResourceNotFound(_))
        ));
    }

    #[tokio::test]
    async fn evict_unknown_is_not_found() {
        let pool = test_pool(&["a"]).await;
        assert!(matches!(
            pool.evict("ghost").await,
            Err(Error::ResourceNotFound(_))
        ));
        assert_eq!(pool.len().await, 1);
    }

    #[tokio::test]
    async fn evicted_id_can_be_registered_again() {
        let pool = test_pool(&["a", "b"]).await;
        pool.evict("a").await.unwrap();
        pool.register("a", "fresh".into(), ResourceOptions::default())
            .await
            .unwrap();

        // Re-registered ids go to the back of the rotation order
        assert_eq!(pool.list_active().await, vec!["b", "a"]);
        assert_eq!(*pool.acquire("a").await.unwrap(), "fresh");
    }

    #[tokio::test]
    async fn reactivate_returns_resource_to_rotation() {
        let pool = test_pool(&["a", "b"]).await;
        fail_times(&pool, "a", 4).await;
        assert_eq!(pool.list_active().await, vec!["b"]);

        pool.reactivate("a").await.unwrap();
        assert_eq!(pool.list_active().await, vec!["a", "b"]);
        assert_eq!(pool.snapshot("a").await.unwrap().stats.errors, 0);
    }

    #[tokio::test]
    async fn reactivate_unknown_is_not_found() {
        let pool = test_pool(&[]).await;
        assert!(matches!(
            pool.reactivate("ghost").await,
            Err(Error::ResourceNotFound(_))
        ));
    }

    #[tokio::test]
    async fn select_cycles_through_resources() {
        let pool = test_pool(&["a", "b"]).await;

        let s1 = pool.select().await.unwrap();
        let s2 = pool.select().await.unwrap();
        let s3 = pool.select().await.unwrap();

        assert_eq!(s1.id, "a");
        assert_eq!(s2.id, "b");
        assert_eq!(s3.id, "a");
        assert_eq!(*s1.session, "session_a");
        assert_eq!(pool.snapshot("a").await.unwrap().stats.requests, 2);
    }

    #[tokio::test]
    async fn select_skips_suspended_resources() {
        let pool = test_pool(&["a", "b"]).await;
        fail_times(&pool, "a", 4).await;

        for _ in 0..5 {
            let s = pool.select().await.unwrap();
            assert_eq!(s.id, "b");
        }
    }

    #[tokio::test]
    async fn select_all_suspended_returns_exhausted_with_counts() {
        let pool = test_pool(&["a", "b"]).await;
        fail_times(&pool, "a", 4).await;
        fail_times(&pool, "b", 4).await;

        let err = pool.select().await.unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("pool_exhausted"), "error: {msg}");

        let json: serde_json::Value =
            serde_json::from_str(msg.strip_prefix("pool exhausted: ").unwrap_or(&msg)).unwrap();
        assert_eq!(json["error"]["pool"]["resources_total"], 2);
        assert_eq!(json["error"]["pool"]["resources_active"], 0);
        assert_eq!(json["error"]["pool"]["resources_suspended"], 2);
    }

    #[tokio::test]
    async fn select_empty_pool_returns_exhausted() {
        let pool = test_pool(&[]).await;
        let err = pool.select().await.unwrap_err();
        assert!(err.to_string().contains("pool_exhausted"));
    }

    #[tokio::test]
    async fn health_all_active_is_healthy() {
        let pool = test_pool(&["a", "b"]).await;
        let health = pool.health().await;
        assert_eq!(health["status"], "healthy");
        assert_eq!(health["resources_total"], 2);
        assert_eq!(health["resources_active"], 2);
    }

    #[tokio::test]
    async fn health_some_suspended_is_degraded() {
        let pool = test_pool(&["a", "b"]).await;
        fail_times(&pool, "a", 4).await;

        let health = pool.health().await;
        assert_eq!(health["status"], "degraded");
        assert_eq!(health["resources_suspended"], 1);
        let resources = health["resources"].as_array().unwrap();
        assert_eq!(resources[0]["id"], "a");
        assert_eq!(resources[0]["status"], "suspended");
        assert_eq!(resources[0]["stats"]["errors"], 4);
    }

    #[tokio::test]
    async fn health_empty_pool_is_unhealthy() {
        let pool = test_pool(&[]).await;
        let health = pool.health().await;
        assert_eq!(health["status"], "unhealthy");
        assert_eq!(health["resources_total"], 0);
    }

    #[test]
    fn zero_failure_threshold_is_rejected() {
        assert!(matches!(
            ResourcePool::<()>::new(0),
            Err(Error::InvalidFailureThreshold)
        ));
    }

    #[tokio::test]
    async fn zero_threshold_override_is_rejected() {
        let pool = test_pool(&[]).await;
        let err = pool
            .register("a", String::new(), ResourceOptions::with_failure_threshold(0))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidFailureThreshold));
        assert!(pool.is_empty().await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_outcomes_are_not_lost() {
        let pool = Arc::new(test_pool(&["a"]).await);
        let mut handles = vec![];
        for i in 0..50 {
            let pool = pool.clone();
            handles.push(tokio::spawn(async move {
                pool.acquire("a").await.unwrap();
                pool.record_outcome("a", i % 2 == 0).await.unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let stats = pool.snapshot("a").await.unwrap().stats;
        assert_eq!(stats.requests, 50);
        assert_eq!(stats.successes, 25);
        assert_eq!(stats.errors, 25);
    }
}
