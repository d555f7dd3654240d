pub mod dispatch_queue;
pub mod engine;
pub mod idempotency;
pub mod policy;
pub mod recorder;
pub mod retry;

#[cfg(test)]
pub(crate) mod test_support;

pub use crate::domain::model::{AuditRecord, PayoutOutcome, PayoutRequest};
pub use crate::domain::ports::{AuditStore, BalanceSource, DisbursementClient, IdGenerator};
pub use crate::utils::error::Result;
