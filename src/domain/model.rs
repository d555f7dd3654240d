use crate::domain::ports::IdGenerator;
use crate::utils::error::{PayoutError, Result};
use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Classification of a failed payout, shared by the provider adapter and the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Configuration,
    ProviderAuth,
    ProviderValidation,
    ProviderTransient,
    Persistence,
    Cancelled,
}

impl ErrorKind {
    /// Only transient provider failures are worth another attempt.
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::ProviderTransient)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Configuration => "configuration",
            ErrorKind::ProviderAuth => "provider_auth",
            ErrorKind::ProviderValidation => "provider_validation",
            ErrorKind::ProviderTransient => "provider_transient",
            ErrorKind::Persistence => "persistence",
            ErrorKind::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A strictly positive money amount, scaled to two decimal places.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Amount(Decimal);

impl Amount {
    pub const SCALE: u32 = 2;

    /// Truncates toward zero so a payout never exceeds the surplus it was computed from.
    pub fn new(value: Decimal) -> Result<Self> {
        let scaled = value.round_dp_with_strategy(Self::SCALE, RoundingStrategy::ToZero);
        if scaled <= Decimal::ZERO {
            return Err(PayoutError::InvalidAmount {
                message: format!("amount must be positive, got {}", value),
            });
        }
        Ok(Self(scaled))
    }

    pub fn value(&self) -> Decimal {
        self.0
    }
}

impl TryFrom<Decimal> for Amount {
    type Error = PayoutError;

    fn try_from(value: Decimal) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Amount> for Decimal {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

/// One logical payout. The identifiers are fixed at construction and reused by every retry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutRequest {
    pub amount: Amount,
    pub recipient: String,
    pub batch_id: String,
    pub item_id: String,
}

impl PayoutRequest {
    pub fn new(amount: Amount, recipient: impl Into<String>, ids: &dyn IdGenerator) -> Self {
        Self {
            amount,
            recipient: recipient.into(),
            batch_id: ids.new_batch_id(),
            item_id: ids.new_item_id(),
        }
    }
}

/// What the provider hands back for an accepted payout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Disbursement {
    pub transaction_id: String,
    pub batch_status: Option<String>,
}

/// Terminal result of a payout after the retry loop has finished.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PayoutOutcome {
    Success {
        transaction_id: String,
        timestamp: DateTime<Utc>,
    },
    Failure {
        error_kind: ErrorKind,
        error_message: String,
        timestamp: DateTime<Utc>,
        attempts_made: u32,
    },
}

impl PayoutOutcome {
    pub fn success(transaction_id: impl Into<String>) -> Self {
        PayoutOutcome::Success {
            transaction_id: transaction_id.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn failure(error_kind: ErrorKind, error_message: impl Into<String>, attempts_made: u32) -> Self {
        PayoutOutcome::Failure {
            error_kind,
            error_message: error_message.into(),
            timestamp: Utc::now(),
            attempts_made,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, PayoutOutcome::Success { .. })
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            PayoutOutcome::Success { timestamp, .. } | PayoutOutcome::Failure { timestamp, .. } => {
                *timestamp
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditStatus {
    Success,
    Failed,
}

impl AuditStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditStatus::Success => "success",
            AuditStatus::Failed => "failed",
        }
    }
}

/// Row in `payout_history`; the persisted view of a request and its terminal outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub recipient_email: String,
    pub amount: Decimal,
    pub status: AuditStatus,
    pub transaction_id: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl AuditRecord {
    pub fn from_outcome(request: &PayoutRequest, outcome: &PayoutOutcome) -> Self {
        let (status, transaction_id, error_message) = match outcome {
            PayoutOutcome::Success { transaction_id, .. } => {
                (AuditStatus::Success, Some(transaction_id.clone()), None)
            }
            PayoutOutcome::Failure {
                error_kind,
                error_message,
                attempts_made,
                ..
            } => (
                AuditStatus::Failed,
                None,
                Some(format!(
                    "[{}] {} (after {} attempt(s))",
                    error_kind, error_message, attempts_made
                )),
            ),
        };

        Self {
            recipient_email: request.recipient.clone(),
            amount: request.amount.value(),
            status,
            transaction_id,
            error_message,
            created_at: outcome.timestamp(),
        }
    }
}
