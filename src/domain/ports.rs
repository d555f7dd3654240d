use crate::domain::model::{AuditRecord, Disbursement, PayoutRequest};
use crate::utils::error::{ProviderError, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;

/// Where the current account balance comes from.
#[async_trait]
pub trait BalanceSource: Send + Sync {
    async fn balance(&self) -> Result<Decimal>;
}

/// One provider call per `submit`. Implementations must not retry on their own.
#[async_trait]
pub trait DisbursementClient: Send + Sync {
    async fn submit(&self, request: &PayoutRequest) -> std::result::Result<Disbursement, ProviderError>;
}

/// Append-only sink for audit records.
#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn append(&self, record: &AuditRecord) -> Result<()>;

    fn name(&self) -> &'static str;

    /// Releases any held resources. Further appends may fail.
    async fn close(&self) {}
}

pub trait IdGenerator: Send + Sync {
    fn new_batch_id(&self) -> String;
    fn new_item_id(&self) -> String;
}
