use crate::adapters::paypal::PaypalClient;
use crate::domain::ports::BalanceSource;
use crate::utils::error::{PayoutError, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::Arc;

/// Reports a configured constant. Used when the live balance API is not wanted.
#[derive(Debug, Clone, Copy)]
pub struct StaticBalanceSource {
    balance: Decimal,
}

impl StaticBalanceSource {
    pub fn new(balance: Decimal) -> Self {
        Self { balance }
    }
}

#[async_trait]
impl BalanceSource for StaticBalanceSource {
    async fn balance(&self) -> Result<Decimal> {
        Ok(self.balance)
    }
}

/// Reads the available balance from the PayPal reporting API.
pub struct PaypalBalanceSource {
    client: Arc<PaypalClient>,
}

impl PaypalBalanceSource {
    pub fn new(client: Arc<PaypalClient>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl BalanceSource for PaypalBalanceSource {
    async fn balance(&self) -> Result<Decimal> {
        self.client
            .available_balance()
            .await
            .map_err(|e| PayoutError::Balance {
                message: e.to_string(),
            })
    }
}
