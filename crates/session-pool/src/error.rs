//! Error types for pool and dispatch operations

use std::time::Duration;

/// Errors from pool operations, surfaced synchronously to the caller.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("resource already registered: {0}")]
    DuplicateResource(String),

    #[error("resource not found: {0}")]
    ResourceNotFound(String),

    #[error("no resource available for dispatch")]
    NoResourceAvailable,

    #[error("pool exhausted: {0}")]
    PoolExhausted(String),

    #[error("bounded parallelism must be at least 1")]
    InvalidParallelism,

    #[error("failure threshold must be at least 1")]
    InvalidFailureThreshold,
}

/// Result alias for pool operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Why a single job failed. Captured in that job's `Outcome`, never raised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobFailure {
    #[error(transparent)]
    Operation(#[from] operation::OperationError),

    #[error("job exceeded timeout of {0:?}")]
    Timeout(Duration),

    /// The handle was evicted between snapshot and execution
    #[error("resource {0} was evicted before the job ran")]
    ResourceGone(String),

    #[error("job panicked: {0}")]
    Panicked(String),
}

impl JobFailure {
    /// Short label for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            JobFailure::Operation(e) => e.kind(),
            JobFailure::Timeout(_) => "job_timeout",
            JobFailure::ResourceGone(_) => "resource_gone",
            JobFailure::Panicked(_) => "panicked",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use operation::OperationError;

    #[test]
    fn pool_error_messages_name_the_resource() {
        assert_eq!(
            Error::DuplicateResource("a".into()).to_string(),
            "resource already registered: a"
        );
        assert_eq!(
            Error::ResourceNotFound("ghost".into()).to_string(),
            "resource not found: ghost"
        );
    }

    #[test]
    fn job_failure_wraps_operation_error_transparently() {
        let failure: JobFailure = OperationError::Rejected { status: 401 }.into();
        assert_eq!(
            failure.to_string(),
            "target rejected request with status 401"
        );
        assert_eq!(failure.kind(), "rejected");
    }

    #[test]
    fn job_failure_kinds() {
        assert_eq!(
            JobFailure::Timeout(Duration::from_millis(5)).kind(),
            "job_timeout"
        );
        assert_eq!(JobFailure::ResourceGone("a".into()).kind(), "resource_gone");
        assert_eq!(JobFailure::Panicked("boom".into()).kind(), "panicked");
    }
}
