use crate::domain::model::{AuditRecord, PayoutOutcome, PayoutRequest};
use crate::domain::ports::AuditStore;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Which sink ended up holding an audit record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordedTo {
    Primary,
    Fallback,
    /// Both sinks failed; the record only exists in the diagnostic log.
    DiagnosticsOnly,
}

/// Writes exactly one audit record per terminal payout outcome.
///
/// The primary store is optional and decided at startup. A failing primary write falls
/// through to the fallback store; errors never reach the caller.
pub struct DurableRecorder {
    primary: Option<Arc<dyn AuditStore>>,
    fallback: Arc<dyn AuditStore>,
}

impl DurableRecorder {
    pub fn new(primary: Option<Arc<dyn AuditStore>>, fallback: Arc<dyn AuditStore>) -> Self {
        match &primary {
            Some(store) => info!(
                "Audit records go to {} (fallback: {})",
                store.name(),
                fallback.name()
            ),
            None => info!(
                "No primary audit store configured. Falling back to {}",
                fallback.name()
            ),
        }
        Self { primary, fallback }
    }

    pub fn has_primary(&self) -> bool {
        self.primary.is_some()
    }

    pub async fn record(&self, request: &PayoutRequest, outcome: &PayoutOutcome) -> RecordedTo {
        let record = AuditRecord::from_outcome(request, outcome);

        match outcome {
            PayoutOutcome::Success { transaction_id, .. } => info!(
                batch_id = %request.batch_id,
                amount = %request.amount,
                recipient = %request.recipient,
                transaction_id = %transaction_id,
                "Payout successful"
            ),
            PayoutOutcome::Failure {
                error_kind,
                error_message,
                attempts_made,
                ..
            } => error!(
                batch_id = %request.batch_id,
                amount = %request.amount,
                recipient = %request.recipient,
                kind = %error_kind,
                attempts = attempts_made,
                "Payout failed: {}",
                error_message
            ),
        }

        if let Some(primary) = &self.primary {
            match primary.append(&record).await {
                Ok(()) => return RecordedTo::Primary,
                Err(e) => warn!(
                    store = primary.name(),
                    error = %e,
                    "Primary audit store write failed, using fallback"
                ),
            }
        }

        match self.fallback.append(&record).await {
            Ok(()) => RecordedTo::Fallback,
            Err(e) => {
                // 最後手段：至少讓紀錄留在診斷輸出中
                error!(
                    store = self.fallback.name(),
                    error = %e,
                    record = %serde_json::to_string(&record).unwrap_or_else(|_| format!("{:?}", record)),
                    "Audit record could not be persisted"
                );
                RecordedTo::DiagnosticsOnly
            }
        }
    }

    pub async fn close(&self) {
        if let Some(primary) = &self.primary {
            primary.close().await;
            info!("{} audit store closed", primary.name());
        }
        self.fallback.close().await;
    }
}
