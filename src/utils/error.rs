use crate::domain::model::ErrorKind;
use thiserror::Error;

/// Failure reported by a disbursement provider for a single `submit` call.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct ProviderError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ProviderError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ProviderAuth, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ProviderValidation, message)
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ProviderTransient, message)
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        // 連線、逾時等網路層錯誤一律視為暫時性
        if e.is_decode() {
            Self::transient(format!("Malformed provider response: {}", e))
        } else {
            Self::transient(format!("Network error: {}", e))
        }
    }
}

#[derive(Error, Debug)]
pub enum PayoutError {
    #[error("API request failed: {0}")]
    ApiError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Balance lookup failed: {message}")]
    Balance { message: String },

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Missing required configuration: {field}")]
    MissingConfigError { field: String },

    #[error("Invalid value '{value}' for {field}: {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Invalid payout amount: {message}")]
    InvalidAmount { message: String },

    #[error("Dispatch queue is closed")]
    QueueClosed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Provider,
    Persistence,
    Network,
    Internal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl PayoutError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            PayoutError::ConfigError { .. }
            | PayoutError::MissingConfigError { .. }
            | PayoutError::InvalidConfigValueError { .. } => ErrorCategory::Configuration,
            PayoutError::Provider(_) | PayoutError::Balance { .. } => ErrorCategory::Provider,
            PayoutError::Database(_) | PayoutError::Pool(_) | PayoutError::IoError(_) => {
                ErrorCategory::Persistence
            }
            PayoutError::ApiError(_) => ErrorCategory::Network,
            PayoutError::SerializationError(_)
            | PayoutError::InvalidAmount { .. }
            | PayoutError::QueueClosed => ErrorCategory::Internal,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            PayoutError::ConfigError { .. }
            | PayoutError::MissingConfigError { .. }
            | PayoutError::InvalidConfigValueError { .. } => ErrorSeverity::Critical,
            PayoutError::Provider(e) if !e.is_retryable() => ErrorSeverity::High,
            PayoutError::Provider(_) | PayoutError::ApiError(_) | PayoutError::Balance { .. } => {
                ErrorSeverity::Medium
            }
            PayoutError::QueueClosed => ErrorSeverity::Low,
            _ => ErrorSeverity::High,
        }
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self.category() {
            ErrorCategory::Configuration => {
                "Check the environment variables or the TOML config file and restart"
            }
            ErrorCategory::Provider => {
                "Verify the PayPal credentials and account status, then wait for the next run"
            }
            ErrorCategory::Persistence => {
                "Check that the database path and log file are writable"
            }
            ErrorCategory::Network => "Check network connectivity to the PayPal API",
            ErrorCategory::Internal => "Re-run with --verbose and inspect the logs",
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self {
            PayoutError::MissingConfigError { field } => {
                format!("Required setting '{}' is not set", field)
            }
            PayoutError::InvalidConfigValueError { field, reason, .. } => {
                format!("Setting '{}' is invalid: {}", field, reason)
            }
            PayoutError::Balance { .. } => "Could not read the account balance".to_string(),
            PayoutError::Provider(e) => format!("PayPal rejected the payout ({})", e.kind),
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, PayoutError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_errors_are_critical() {
        let e = PayoutError::MissingConfigError {
            field: "RECIPIENT_EMAIL".to_string(),
        };
        assert_eq!(e.category(), ErrorCategory::Configuration);
        assert_eq!(e.severity(), ErrorSeverity::Critical);
        assert!(e.user_friendly_message().contains("RECIPIENT_EMAIL"));
    }

    #[test]
    fn test_provider_error_severity_follows_retryability() {
        let transient = PayoutError::Provider(ProviderError::transient("timeout"));
        let invalid = PayoutError::Provider(ProviderError::validation("bad receiver"));
        assert_eq!(transient.severity(), ErrorSeverity::Medium);
        assert_eq!(invalid.severity(), ErrorSeverity::High);
    }

    #[test]
    fn test_provider_error_display() {
        let e = ProviderError::auth("invalid_client");
        assert_eq!(e.to_string(), "provider_auth: invalid_client");
    }
}
