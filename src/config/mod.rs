#[cfg(feature = "cli")]
pub mod cli;
pub mod toml_config;

use crate::app::scheduler::DailySchedule;
use crate::core::retry::{RetryPolicy, ShutdownPolicy};
use crate::utils::error::{PayoutError, Result};
use crate::utils::validation::{self, Validate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

#[cfg(feature = "cli")]
pub use cli::CliArgs;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaypalMode {
    #[default]
    Sandbox,
    Live,
}

impl PaypalMode {
    pub fn base_url(self) -> &'static str {
        match self {
            PaypalMode::Sandbox => "https://api-m.sandbox.paypal.com",
            PaypalMode::Live => "https://api-m.paypal.com",
        }
    }
}

impl FromStr for PaypalMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sandbox" => Ok(PaypalMode::Sandbox),
            "live" => Ok(PaypalMode::Live),
            other => Err(format!("expected 'sandbox' or 'live', got '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BalanceSourceKind {
    #[default]
    Static,
    Paypal,
}

impl FromStr for BalanceSourceKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "static" => Ok(BalanceSourceKind::Static),
            "paypal" => Ok(BalanceSourceKind::Paypal),
            other => Err(format!("expected 'static' or 'paypal', got '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayoutConfig {
    pub provider: ProviderConfig,
    pub payout: PayoutSettings,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub audit: AuditConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub shutdown: ShutdownConfig,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub mode: PaypalMode,
    pub client_id: String,
    pub client_secret: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default = "default_email_subject")]
    pub email_subject: String,
    #[serde(default = "default_email_message")]
    pub email_message: String,
    #[serde(default = "default_note")]
    pub note: String,
}

impl ProviderConfig {
    pub fn base_url(&self) -> &str {
        self.base_url
            .as_deref()
            .unwrap_or_else(|| self.mode.base_url())
    }
}

// 避免在 --verbose 日誌中洩漏密鑰
impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("mode", &self.mode)
            .field("client_id", &self.client_id)
            .field("client_secret", &"***")
            .field("base_url", &self.base_url())
            .field("timeout_seconds", &self.timeout_seconds)
            .field("currency", &self.currency)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayoutSettings {
    pub recipient_email: String,
    #[serde(default = "default_minimum_balance")]
    pub minimum_balance: Decimal,
    #[serde(default)]
    pub balance_source: BalanceSourceKind,
    #[serde(default = "default_static_balance")]
    pub static_balance: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    /// Upper bound on any single backoff wait.
    #[serde(default = "default_max_delay_seconds")]
    pub max_delay_seconds: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_multiplier: default_backoff_multiplier(),
            max_delay_seconds: default_max_delay_seconds(),
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            backoff_multiplier: self.backoff_multiplier,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(self.max_delay_seconds),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    /// SQLite file. Without it every record goes to the fallback log.
    #[serde(default)]
    pub database_path: Option<String>,
    #[serde(default = "default_fallback_log_path")]
    pub fallback_log_path: String,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            fallback_log_path: default_fallback_log_path(),
        }
    }
}

impl AuditConfig {
    pub fn database_path(&self) -> Option<PathBuf> {
        self.database_path.as_ref().map(PathBuf::from)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_schedule_time")]
    pub time: String,
    /// IANA zone name, e.g. `America/New_York`.
    #[serde(default = "default_timezone")]
    pub timezone: String,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            time: default_schedule_time(),
            timezone: default_timezone(),
        }
    }
}

impl ScheduleConfig {
    pub fn to_schedule(&self) -> Result<DailySchedule> {
        DailySchedule::parse(&self.time, &self.timezone)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutdownConfig {
    #[serde(default = "default_grace_seconds")]
    pub grace_seconds: u64,
    #[serde(default)]
    pub in_flight: ShutdownPolicy,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            grace_seconds: default_grace_seconds(),
            in_flight: ShutdownPolicy::default(),
        }
    }
}

impl ShutdownConfig {
    pub fn grace(&self) -> Duration {
        Duration::from_secs(self.grace_seconds)
    }
}

fn default_timeout_seconds() -> u64 {
    30
}

fn default_currency() -> String {
    "USD".to_string()
}

fn default_email_subject() -> String {
    "You have a payment".to_string()
}

fn default_email_message() -> String {
    "You have received a payment from us!".to_string()
}

fn default_note() -> String {
    "Automatic payout every 24 hours".to_string()
}

fn default_minimum_balance() -> Decimal {
    Decimal::new(2000, 2)
}

fn default_static_balance() -> Decimal {
    Decimal::new(15000, 2)
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_max_delay_seconds() -> u64 {
    300
}

fn default_fallback_log_path() -> String {
    "payout_logs.log".to_string()
}

fn default_schedule_time() -> String {
    "00:00".to_string()
}

fn default_timezone() -> String {
    "America/New_York".to_string()
}

fn default_grace_seconds() -> u64 {
    30
}

/// Loads a `.env` file into the process environment without overriding variables that are
/// already set. `None` searches the current directory and its parents.
///
/// Returns the file that was loaded, or `None` when there is none.
pub fn load_env_file(path: Option<&Path>) -> Result<Option<PathBuf>> {
    let loaded = match path {
        Some(path) => dotenvy::from_path(path).map(|()| path.to_path_buf()),
        None => dotenvy::dotenv(),
    };

    match loaded {
        Ok(path) => Ok(Some(path)),
        Err(e) if e.not_found() => Ok(None),
        Err(e) => Err(PayoutError::ConfigError {
            message: format!("failed to load .env file: {}", e),
        }),
    }
}

impl PayoutConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from any key/value source. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let required = |key: &str| {
            get(key).ok_or_else(|| PayoutError::MissingConfigError {
                field: key.to_string(),
            })
        };

        Ok(Self {
            provider: ProviderConfig {
                mode: parse_or(get("PAYPAL_MODE"), "PAYPAL_MODE", PaypalMode::default())?,
                client_id: required("PAYPAL_CLIENT_ID")?,
                client_secret: required("PAYPAL_CLIENT_SECRET")?,
                base_url: get("PAYPAL_API_BASE"),
                timeout_seconds: parse_or(
                    get("PAYPAL_TIMEOUT_SECONDS"),
                    "PAYPAL_TIMEOUT_SECONDS",
                    default_timeout_seconds(),
                )?,
                currency: get("PAYOUT_CURRENCY").unwrap_or_else(default_currency),
                email_subject: get("PAYOUT_EMAIL_SUBJECT").unwrap_or_else(default_email_subject),
                email_message: get("PAYOUT_EMAIL_MESSAGE").unwrap_or_else(default_email_message),
                note: get("PAYOUT_NOTE").unwrap_or_else(default_note),
            },
            payout: PayoutSettings {
                recipient_email: required("RECIPIENT_EMAIL")?,
                minimum_balance: parse_or(
                    get("MINIMUM_BALANCE"),
                    "MINIMUM_BALANCE",
                    default_minimum_balance(),
                )?,
                balance_source: parse_or(
                    get("BALANCE_SOURCE"),
                    "BALANCE_SOURCE",
                    BalanceSourceKind::default(),
                )?,
                static_balance: parse_or(
                    get("STATIC_BALANCE"),
                    "STATIC_BALANCE",
                    default_static_balance(),
                )?,
            },
            retry: RetryConfig {
                max_retries: parse_or(get("MAX_RETRIES"), "MAX_RETRIES", default_max_retries())?,
                backoff_multiplier: parse_or(
                    get("BACKOFF_MULTIPLIER"),
                    "BACKOFF_MULTIPLIER",
                    default_backoff_multiplier(),
                )?,
                max_delay_seconds: parse_or(
                    get("RETRY_MAX_DELAY_SECONDS"),
                    "RETRY_MAX_DELAY_SECONDS",
                    default_max_delay_seconds(),
                )?,
            },
            audit: AuditConfig {
                database_path: get("DATABASE_PATH"),
                fallback_log_path: get("PAYOUT_LOG_FILE").unwrap_or_else(default_fallback_log_path),
            },
            schedule: ScheduleConfig {
                time: get("PAYOUT_SCHEDULE_TIME").unwrap_or_else(default_schedule_time),
                timezone: get("PAYOUT_TIMEZONE").unwrap_or_else(default_timezone),
            },
            shutdown: ShutdownConfig {
                grace_seconds: parse_or(
                    get("SHUTDOWN_GRACE_SECONDS"),
                    "SHUTDOWN_GRACE_SECONDS",
                    default_grace_seconds(),
                )?,
                in_flight: parse_or(
                    get("SHUTDOWN_IN_FLIGHT"),
                    "SHUTDOWN_IN_FLIGHT",
                    ShutdownPolicy::default(),
                )?,
            },
        })
    }
}

fn parse_or<T>(raw: Option<String>, field: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match raw {
        None => Ok(default),
        Some(value) => value
            .trim()
            .parse()
            .map_err(|e: T::Err| PayoutError::InvalidConfigValueError {
                field: field.to_string(),
                value,
                reason: e.to_string(),
            }),
    }
}

impl Validate for PayoutConfig {
    fn validate(&self) -> Result<()> {
        use validation::*;

        // 驗證 PayPal 設定
        validate_non_empty_string("provider.client_id", &self.provider.client_id)?;
        validate_non_empty_string("provider.client_secret", &self.provider.client_secret)?;
        validate_url("provider.base_url", self.provider.base_url())?;
        validate_range("provider.timeout_seconds", self.provider.timeout_seconds, 1, 300)?;
        validate_currency_code("provider.currency", &self.provider.currency)?;

        // 驗證付款設定
        validate_email("payout.recipient_email", &self.payout.recipient_email)?;
        validate_non_negative("payout.minimum_balance", self.payout.minimum_balance)?;
        validate_non_negative("payout.static_balance", self.payout.static_balance)?;

        // 驗證重試設定
        validate_range("retry.max_retries", self.retry.max_retries, 0, 20)?;
        if !self.retry.backoff_multiplier.is_finite() {
            return Err(PayoutError::InvalidConfigValueError {
                field: "retry.backoff_multiplier".to_string(),
                value: self.retry.backoff_multiplier.to_string(),
                reason: "Value must be a finite number".to_string(),
            });
        }
        validate_range("retry.backoff_multiplier", self.retry.backoff_multiplier, 1.0, 10.0)?;
        validate_range("retry.max_delay_seconds", self.retry.max_delay_seconds, 1, 3600)?;

        // 驗證稽核紀錄路徑
        validate_path("audit.fallback_log_path", &self.audit.fallback_log_path)?;
        if let Some(db_path) = &self.audit.database_path {
            validate_path("audit.database_path", db_path)?;
        }

        self.schedule.to_schedule()?;
        validate_range("shutdown.grace_seconds", self.shutdown.grace_seconds, 1, 3600)?;

        tracing::debug!("✅ Payout configuration validation passed");
        Ok(())
    }
}
