//! Batch dispatch across pooled resources
//!
//! A batch snapshots the active ids once, assigns every target to a resource
//! with the configured `SelectionPolicy`, then runs the jobs as tokio tasks
//! with at most `parallelism` in flight. Outcomes are collected as jobs finish,
//! so their order does not follow the input order; each outcome carries its
//! target for re-correlation.
//!
//! A handle suspended partway through a batch still receives the jobs already
//! assigned to it. Suspension only affects the snapshot of later batches.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::stream::{self, StreamExt};
use operation::Operation;
use serde::Serialize;
use tracing::{debug, error, info, instrument};

use crate::error::{Error, JobFailure, Result};
use crate::pool::ResourcePool;
use crate::selection::SelectionPolicy;

/// Whether a job succeeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Success,
    Failure,
}

/// Result of one (resource, target) job.
#[derive(Debug)]
pub struct Outcome<T, O> {
    pub resource_id: String,
    pub target: T,
    pub result: std::result::Result<O, JobFailure>,
}

impl<T, O> Outcome<T, O> {
    pub fn status(&self) -> OutcomeStatus {
        if self.result.is_ok() {
            OutcomeStatus::Success
        } else {
            OutcomeStatus::Failure
        }
    }

    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Fans batches of targets out over a shared pool.
pub struct Dispatcher<S> {
    pool: Arc<ResourcePool<S>>,
    parallelism: usize,
    job_timeout: Option<Duration>,
    policy: SelectionPolicy,
}

impl<S> Dispatcher<S>
where
    S: Send + Sync + 'static,
{
    /// Create a dispatcher running at most `parallelism` jobs at once.
    pub fn new(pool: Arc<ResourcePool<S>>, parallelism: usize) -> Result<Self> {
        if parallelism == 0 {
            return Err(Error::InvalidParallelism);
        }
        Ok(Self {
            pool,
            parallelism,
            job_timeout: None,
            policy: SelectionPolicy::RoundRobin,
        })
    }

    /// Fail any job whose operation runs longer than `timeout`.
    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = Some(timeout);
        self
    }

    pub fn with_policy(mut self, policy: SelectionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn pool(&self) -> &Arc<ResourcePool<S>> {
        &self.pool
    }

    pub fn parallelism(&self) -> usize {
        self.parallelism
    }

    /// Run `operation` once per target and return one outcome per target.
    ///
    /// Fails with `NoResourceAvailable` before starting any job if the pool
    /// has no active resource. Job failures never abort the batch; they are
    /// returned as `Failure` outcomes and counted against the resource.
    pub async fn dispatch<T, Op>(
        &self,
        operation: Arc<Op>,
        targets: Vec<T>,
    ) -> Result<Vec<Outcome<T, Op::Output>>>
    where
        T: Clone + Send + Sync + 'static,
        Op: Operation<S, T> + ?Sized + 'static,
    {
        self.dispatch_with(operation, targets, self.parallelism).await
    }

    /// Like `dispatch`, with the in-flight bound given for this batch only.
    ///
    /// Fails with `InvalidParallelism` for a bound of 0.
    #[instrument(skip_all, fields(operation = operation.name(), targets = targets.len()))]
    pub async fn dispatch_with<T, Op>(
        &self,
        operation: Arc<Op>,
        targets: Vec<T>,
        parallelism: usize,
    ) -> Result<Vec<Outcome<T, Op::Output>>>
    where
        T: Clone + Send + Sync + 'static,
        Op: Operation<S, T> + ?Sized + 'static,
    {
        if parallelism == 0 {
            return Err(Error::InvalidParallelism);
        }
        let snapshot = self.pool.list_active().await;
        if snapshot.is_empty() {
            return Err(Error::NoResourceAvailable);
        }
        if targets.is_empty() {
            return Ok(Vec::new());
        }

        let batch_size = targets.len();
        let assignment = self.policy.assign(batch_size, snapshot.len());
        info!(
            resources = snapshot.len(),
            parallelism,
            policy = self.policy.label(),
            "dispatching batch"
        );

        let started = Instant::now();
        let jobs = targets.into_iter().zip(assignment).map(|(target, idx)| {
            let resource_id = snapshot[idx].clone();
            let pool = Arc::clone(&self.pool);
            let operation = Arc::clone(&operation);
            let timeout = self.job_timeout;
            async move {
                let target = Arc::new(target);
                let task = tokio::spawn(run_job(
                    pool,
                    operation,
                    resource_id.clone(),
                    Arc::clone(&target),
                    timeout,
                ));
                let joined = task.await;
                (resource_id, Arc::unwrap_or_clone(target), joined)
            }
        });

        let mut completed = stream::iter(jobs).buffer_unordered(parallelism);
        let mut outcomes = Vec::with_capacity(batch_size);
        while let Some((resource_id, target, joined)) = completed.next().await {
            let result = match joined {
                Ok(result) => result,
                Err(e) => {
                    error!(resource_id = %resource_id, error = %e, "job task failed to complete");
                    if let Err(e) = self.pool.record_outcome(&resource_id, false).await {
                        debug!(resource_id = %resource_id, error = %e, "could not record panicked job");
                    }
                    Err(JobFailure::Panicked(e.to_string()))
                }
            };
            let label = match &result {
                Ok(_) => "success",
                Err(failure) => failure.kind(),
            };
            metrics::counter!("pool_jobs_total", "outcome" => label).increment(1);
            outcomes.push(Outcome {
                resource_id,
                target,
                result,
            });
        }

        let failed = outcomes.iter().filter(|o| !o.is_success()).count();
        info!(
            succeeded = outcomes.len() - failed,
            failed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "batch complete"
        );
        Ok(outcomes)
    }
}

/// Execute one job: acquire the session, run the operation, report back.
///
/// The pool lock is only taken for `acquire` and `record_outcome`; the
/// operation itself runs without it.
async fn run_job<S, T, Op>(
    pool: Arc<ResourcePool<S>>,
    operation: Arc<Op>,
    resource_id: String,
    target: Arc<T>,
    timeout: Option<Duration>,
) -> std::result::Result<Op::Output, JobFailure>
where
    S: Send + Sync + 'static,
    T: Send + Sync + 'static,
    Op: Operation<S, T> + ?Sized + 'static,
{
    let session = match pool.acquire(&resource_id).await {
        Ok(session) => session,
        Err(_) => {
            debug!(resource_id = %resource_id, "resource evicted before job ran");
            return Err(JobFailure::ResourceGone(resource_id));
        }
    };

    let started = Instant::now();
    let execution = operation.execute(&*session, &*target);
    let result = match timeout {
        Some(limit) => match tokio::time::timeout(limit, execution).await {
            Ok(result) => result.map_err(JobFailure::from),
            Err(_) => Err(JobFailure::Timeout(limit)),
        },
        None => execution.await.map_err(JobFailure::from),
    };
    metrics::histogram!("pool_job_duration_seconds").record(started.elapsed().as_secs_f64());

    if let Err(failure) = &result {
        debug!(resource_id = %resource_id, error = %failure, "job failed");
    }
    if let Err(e) = pool.record_outcome(&resource_id, result.is_ok()).await {
        debug!(resource_id = %resource_id, error = %e, "resource evicted before outcome was recorded");
    }
    result
}
