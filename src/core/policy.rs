use crate::domain::model::{Amount, PayoutRequest};
use crate::domain::ports::{BalanceSource, IdGenerator};
use crate::utils::error::Result;
use rust_decimal::Decimal;
use std::sync::Arc;

/// Decides whether the current balance warrants a payout, and for how much.
pub struct PolicyEvaluator {
    balance_source: Arc<dyn BalanceSource>,
    ids: Arc<dyn IdGenerator>,
    minimum_balance: Decimal,
    recipient: String,
}

impl PolicyEvaluator {
    pub fn new(
        balance_source: Arc<dyn BalanceSource>,
        ids: Arc<dyn IdGenerator>,
        minimum_balance: Decimal,
        recipient: impl Into<String>,
    ) -> Self {
        Self {
            balance_source,
            ids,
            minimum_balance,
            recipient: recipient.into(),
        }
    }

    pub fn minimum_balance(&self) -> Decimal {
        self.minimum_balance
    }

    /// Returns a request for everything above the floor, or `None` when the balance is too low.
    pub async fn evaluate(&self) -> Result<Option<PayoutRequest>> {
        let balance = self.balance_source.balance().await?;

        if balance <= self.minimum_balance {
            tracing::info!(
                "Balance too low. Current balance: {}. Minimum required: {}.",
                balance,
                self.minimum_balance
            );
            return Ok(None);
        }

        // 餘額只比門檻多出不到一分錢時同樣不付款
        let amount = match Amount::new(balance - self.minimum_balance) {
            Ok(amount) => amount,
            Err(e) => {
                tracing::info!("Surplus above minimum balance is not payable: {}", e);
                return Ok(None);
            }
        };

        tracing::info!(
            "Balance is sufficient, sending {} to {}",
            amount,
            self.recipient
        );
        Ok(Some(PayoutRequest::new(
            amount,
            self.recipient.clone(),
            self.ids.as_ref(),
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::balance::StaticBalanceSource;
    use crate::core::idempotency::UuidKeyGenerator;
    use crate::utils::error::PayoutError;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;

    fn evaluator(balance: Decimal, floor: Decimal) -> PolicyEvaluator {
        PolicyEvaluator::new(
            Arc::new(StaticBalanceSource::new(balance)),
            Arc::new(UuidKeyGenerator::new()),
            floor,
            "payee@example.com",
        )
    }

    #[tokio::test]
    async fn test_surplus_above_floor_is_paid_out() {
        let request = evaluator(dec!(150.00), dec!(20.00))
            .evaluate()
            .await
            .unwrap()
            .expect("payout expected");

        assert_eq!(request.amount.value(), dec!(130.00));
        assert_eq!(request.recipient, "payee@example.com");
        assert!(request.batch_id.starts_with("batch_"));
    }

    #[tokio::test]
    async fn test_balance_below_floor_produces_nothing() {
        let request = evaluator(dec!(10.00), dec!(20.00)).evaluate().await.unwrap();
        assert!(request.is_none());
    }

    #[tokio::test]
    async fn test_balance_equal_to_floor_produces_nothing() {
        let request = evaluator(dec!(20.00), dec!(20.00)).evaluate().await.unwrap();
        assert!(request.is_none());
    }

    #[tokio::test]
    async fn test_sub_cent_surplus_produces_nothing() {
        let request = evaluator(dec!(20.004), dec!(20.00)).evaluate().await.unwrap();
        assert!(request.is_none());
    }

    #[tokio::test]
    async fn test_each_evaluation_gets_fresh_ids() {
        let evaluator = evaluator(dec!(150.00), dec!(20.00));
        let first = evaluator.evaluate().await.unwrap().unwrap();
        let second = evaluator.evaluate().await.unwrap().unwrap();
        assert_ne!(first.batch_id, second.batch_id);
        assert_ne!(first.item_id, second.item_id);
    }

    struct FailingBalance;

    #[async_trait]
    impl BalanceSource for FailingBalance {
        async fn balance(&self) -> Result<Decimal> {
            Err(PayoutError::Balance {
                message: "upstream unavailable".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn test_balance_failure_is_propagated() {
        let evaluator = PolicyEvaluator::new(
            Arc::new(FailingBalance),
            Arc::new(UuidKeyGenerator::new()),
            dec!(20.00),
            "payee@example.com",
        );

        let err = evaluator.evaluate().await.unwrap_err();
        assert!(matches!(err, PayoutError::Balance { .. }));
    }
}
