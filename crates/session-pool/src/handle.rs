//! Per-resource session handle, usage statistics and status
//!
//! A `ResourceHandle` is only ever mutated through the pool's lock; this module
//! defines the state machine edges so they can be exercised directly.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

/// Runtime status of a pooled resource.
///
/// Transitions:
/// - Active → Suspended (errors exceed the failure threshold)
/// - Suspended → Active (explicit `reactivate` only)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
    Active,
    Suspended,
}

impl ResourceStatus {
    /// Status label for health/logging.
    pub fn label(&self) -> &'static str {
        match self {
            ResourceStatus::Active => "active",
            ResourceStatus::Suspended => "suspended",
        }
    }
}

/// Usage counters for one resource.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ResourceStats {
    pub requests: u64,
    pub successes: u64,
    pub errors: u64,
}

/// Per-resource registration options.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResourceOptions {
    /// Overrides the pool-wide failure threshold for this resource.
    pub failure_threshold: Option<u32>,
}

impl ResourceOptions {
    pub fn with_failure_threshold(threshold: u32) -> Self {
        Self {
            failure_threshold: Some(threshold),
        }
    }
}

/// Status change caused by recording an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Unchanged,
    Suspended,
}

/// One managed session plus its bookkeeping.
#[derive(Debug)]
pub(crate) struct ResourceHandle<S> {
    id: String,
    session: Arc<S>,
    last_used: Option<u64>,
    status: ResourceStatus,
    stats: ResourceStats,
    failure_threshold: u32,
}

impl<S> ResourceHandle<S> {
    pub(crate) fn new(id: String, session: S, failure_threshold: u32) -> Self {
        Self {
            id,
            session: Arc::new(session),
            last_used: None,
            status: ResourceStatus::Active,
            stats: ResourceStats::default(),
            failure_threshold,
        }
    }

    pub(crate) fn status(&self) -> ResourceStatus {
        self.status
    }

    pub(crate) fn is_active(&self) -> bool {
        self.status == ResourceStatus::Active
    }

    /// Record an access: bump `requests`, stamp `last_used`, hand out the session.
    pub(crate) fn touch(&mut self) -> Arc<S> {
        self.stats.requests += 1;
        self.last_used = Some(now_millis());
        Arc::clone(&self.session)
    }

    /// Apply a job outcome.
    ///
    /// A failure suspends the handle once `errors` is strictly greater than
    /// the threshold. Already-suspended handles keep counting but never
    /// transition again.
    pub(crate) fn record(&mut self, success: bool) -> Transition {
        if success {
            self.stats.successes += 1;
            return Transition::Unchanged;
        }
        self.stats.errors += 1;
        if self.is_active() && self.stats.errors > u64::from(self.failure_threshold) {
            self.status = ResourceStatus::Suspended;
            return Transition::Suspended;
        }
        Transition::Unchanged
    }

    /// Return to Active with a fresh failure budget.
    pub(crate) fn reactivate(&mut self) {
        self.status = ResourceStatus::Active;
        self.stats.errors = 0;
    }

    pub(crate) fn snapshot(&self) -> HandleSnapshot {
        HandleSnapshot {
            id: self.id.clone(),
            status: self.status,
            stats: self.stats,
            last_used: self.last_used,
            failure_threshold: self.failure_threshold,
        }
    }
}

/// Read-only copy of a handle's observable state. Never includes the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HandleSnapshot {
    pub id: String,
    pub status: ResourceStatus,
    pub stats: ResourceStats,
    /// Unix timestamp in milliseconds of the last access, if any
    pub last_used: Option<u64>,
    pub failure_threshold: u32,
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
