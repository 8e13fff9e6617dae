//! Operation abstraction for pooled session work
//!
//! Defines the `Operation` trait that decouples the dispatcher from what a job
//! actually does with a session. The dispatcher owns rotation, concurrency and
//! health accounting; an operation only sees one session and one target and
//! reports success or an `OperationError`.
//!
//! Operations carry their own options as fields of the implementing value, so
//! the dispatcher never has to know about them.

pub mod function;

pub use function::FnOperation;

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Errors an operation may report for a single job.
///
/// Every variant counts as one failure against the session that ran the job.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OperationError {
    #[error("operation failed: {0}")]
    Failed(String),

    /// The remote side answered, but with a non-success status
    #[error("target rejected request with status {status}")]
    Rejected { status: u16 },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("operation timed out after {0:?}")]
    Timeout(Duration),
}

impl OperationError {
    /// Short label for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            OperationError::Failed(_) => "failed",
            OperationError::Rejected { .. } => "rejected",
            OperationError::Transport(_) => "transport",
            OperationError::Timeout(_) => "timeout",
        }
    }
}

/// Result alias for operation execution.
pub type Result<T> = std::result::Result<T, OperationError>;

/// Boxed future returned by `Operation::execute`.
pub type OperationFuture<'a, O> = Pin<Box<dyn Future<Output = Result<O>> + Send + 'a>>;

/// A unit of work applied to one session for one target.
///
/// Uses `Pin<Box<dyn Future>>` return types so implementations stay
/// dyn-compatible (`Arc<dyn Operation<S, T, Output = O>>`).
///
/// Implementations must not assume they are retried; the dispatcher runs each
/// (session, target) pair exactly once.
pub trait Operation<S, T>: Send + Sync {
    /// Value produced by a successful job.
    type Output: Send + 'static;

    /// Identifier for logging and metrics (e.g. "http_request")
    fn name(&self) -> &str;

    /// Run the operation against `target` using `session`.
    ///
    /// May block on network I/O; the dispatcher never holds pool locks while
    /// this future is pending.
    fn execute<'a>(&'a self, session: &'a S, target: &'a T) -> OperationFuture<'a, Self::Output>;
}
