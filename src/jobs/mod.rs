//! Job subsystem.
//!
//! - [`store::JobStore`] owns every job record and validates state
//!   transitions.
//! - [`queue::PendingQueue`] is the FIFO of pending job ids the worker
//!   pool feeds from.
//! - [`scheduler::JobScheduler`] is the front door: validation,
//!   deduplication, status reads and cancellation.
//! - [`worker::WorkerPool`] runs the executors and handles retries,
//!   cancellation and graceful drain.

pub mod queue;
pub mod scheduler;
pub mod store;
pub mod worker;

pub use queue::PendingQueue;
pub use scheduler::JobScheduler;
pub use store::JobStore;
pub use worker::{CancelRegistry, DrainReport, WorkerPool};
