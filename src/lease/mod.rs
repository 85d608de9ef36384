//! Lease table and worker liveness

pub mod liveness;
pub mod table;

pub use liveness::{WorkerRecord, WorkerRegistry, WorkerSnapshot, WorkerStatus};
pub use table::{ExpiredLease, ExpiryReason, Lease, LeaseId, LeaseTable, LeaseToken, WorkerId};
