use crate::core::dispatch_queue::{DispatchQueue, DispatchTicket};
use crate::core::policy::PolicyEvaluator;
use crate::domain::model::PayoutRequest;
use crate::utils::error::Result;

/// Ties the balance policy to the dispatch queue. One `trigger` is one scheduled run.
pub struct PayoutEngine {
    evaluator: PolicyEvaluator,
    queue: DispatchQueue,
}

impl PayoutEngine {
    pub fn new(evaluator: PolicyEvaluator, queue: DispatchQueue) -> Self {
        Self { evaluator, queue }
    }

    pub fn queue(&self) -> &DispatchQueue {
        &self.queue
    }

    /// Evaluates the balance and enqueues a payout if one is due.
    pub async fn trigger(&self) -> Result<Option<DispatchTicket>> {
        match self.evaluator.evaluate().await? {
            Some(request) => {
                tracing::info!(
                    batch_id = %request.batch_id,
                    amount = %request.amount,
                    "Queueing payout"
                );
                Ok(Some(self.queue.enqueue(request)?))
            }
            None => Ok(None),
        }
    }

    /// Same decision as `trigger`, without dispatching anything.
    pub async fn dry_run(&self) -> Result<Option<PayoutRequest>> {
        self.evaluator.evaluate().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::balance::StaticBalanceSource;
    use crate::core::idempotency::UuidKeyGenerator;
    use crate::core::recorder::DurableRecorder;
    use crate::core::retry::{RetryController, RetryPolicy};
    use crate::core::test_support::{MemoryAuditStore, ScriptedClient};
    use crate::utils::shutdown::Shutdown;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    fn engine(balance: Decimal, client: Arc<ScriptedClient>) -> PayoutEngine {
        let evaluator = PolicyEvaluator::new(
            Arc::new(StaticBalanceSource::new(balance)),
            Arc::new(UuidKeyGenerator::new()),
            dec!(20.00),
            "payee@example.com",
        );
        let recorder = Arc::new(DurableRecorder::new(None, Arc::new(MemoryAuditStore::new())));
        let (queue, _worker) = DispatchQueue::start(
            RetryController::new(client, RetryPolicy::default()),
            recorder,
            Shutdown::new(),
        );
        PayoutEngine::new(evaluator, queue)
    }

    #[tokio::test]
    async fn test_trigger_dispatches_surplus() {
        let client = Arc::new(ScriptedClient::new().then_succeed("PB-ENGINE"));
        let engine = engine(dec!(150.00), client.clone());

        let ticket = engine.trigger().await.unwrap().expect("payout due");
        let outcome = ticket.outcome().await.unwrap();

        assert!(outcome.is_success());
        assert_eq!(client.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_trigger_below_floor_does_nothing() {
        let client = Arc::new(ScriptedClient::new());
        let engine = engine(dec!(10.00), client.clone());

        assert!(engine.trigger().await.unwrap().is_none());
        assert!(client.calls().is_empty());
    }

    #[tokio::test]
    async fn test_dry_run_never_submits() {
        let client = Arc::new(ScriptedClient::new());
        let engine = engine(dec!(150.00), client.clone());

        let request = engine.dry_run().await.unwrap().unwrap();
        assert_eq!(request.amount.value(), dec!(130.00));
        assert!(client.calls().is_empty());
    }
}
