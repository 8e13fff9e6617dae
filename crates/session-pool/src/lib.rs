//! Keyed pool of stateful sessions with health-aware rotation
//!
//! Manages many independent sessions (credentials, cookies, header sets) keyed
//! by id, dispatches batches of work across them round-robin on a bounded
//! worker pool, and retires sessions that keep failing.
//!
//! Resource lifecycle:
//! 1. Caller registers a session via `ResourcePool::register` → status `Active`
//! 2. `Dispatcher::dispatch` snapshots the active ids and assigns target `i` to `ids[i % R]`
//! 3. Each job acquires its session, runs the `Operation`, and reports the outcome
//! 4. Failures past the threshold move the handle to `Suspended`
//! 5. Suspended handles are left out of later snapshots until `reactivate`
//! 6. `evict` removes a handle entirely

pub mod dispatch;
pub mod error;
pub mod handle;
pub mod pool;
pub mod reporter;
pub mod selection;

pub use dispatch::{Dispatcher, Outcome, OutcomeStatus};
pub use error::{Error, JobFailure, Result};
pub use handle::{HandleSnapshot, ResourceOptions, ResourceStats, ResourceStatus};
pub use pool::{DEFAULT_FAILURE_THRESHOLD, ResourcePool, SelectedResource};
pub use reporter::{PoolCounts, spawn_health_reporter};
pub use selection::SelectionPolicy;
