//! PayPal REST adapter: OAuth client-credentials token, Payouts and balance reporting.

use crate::config::ProviderConfig;
use crate::domain::model::{Disbursement, PayoutRequest};
use crate::domain::ports::DisbursementClient;
use crate::utils::error::{ProviderError, Result};
use async_trait::async_trait;
use reqwest::{header, Client, Response, StatusCode};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Refresh the token this long before PayPal says it expires.
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

#[derive(Debug, Serialize)]
struct CreatePayoutRequest<'a> {
    sender_batch_header: SenderBatchHeader<'a>,
    items: [PayoutItem<'a>; 1],
}

#[derive(Debug, Serialize)]
struct SenderBatchHeader<'a> {
    sender_batch_id: &'a str,
    email_subject: &'a str,
    email_message: &'a str,
}

#[derive(Debug, Serialize)]
struct PayoutItem<'a> {
    recipient_type: &'static str,
    amount: Money,
    receiver: &'a str,
    note: &'a str,
    sender_item_id: &'a str,
}

#[derive(Debug, Serialize, Deserialize)]
struct Money {
    value: String,
    currency: String,
}

#[derive(Debug, Deserialize)]
struct CreatePayoutResponse {
    batch_header: BatchHeader,
}

#[derive(Debug, Deserialize)]
struct BatchHeader {
    payout_batch_id: String,
    #[serde(default)]
    batch_status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    message: Option<String>,
    // OAuth endpoints use a different shape
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
    #[serde(default)]
    details: Vec<ApiErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    #[serde(default)]
    field: Option<String>,
    #[serde(default)]
    issue: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BalancesResponse {
    #[serde(default)]
    balances: Vec<BalanceEntry>,
}

#[derive(Debug, Deserialize)]
struct BalanceEntry {
    currency: String,
    available_balance: Option<BalanceMoney>,
}

#[derive(Debug, Deserialize)]
struct BalanceMoney {
    value: String,
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

pub struct PaypalClient {
    http: Client,
    base_url: String,
    client_id: String,
    client_secret: String,
    currency: String,
    email_subject: String,
    email_message: String,
    note: String,
    token: Mutex<Option<CachedToken>>,
}

impl PaypalClient {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Self {
            http,
            base_url: config.base_url().trim_end_matches('/').to_string(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            currency: config.currency.clone(),
            email_subject: config.email_subject.clone(),
            email_message: config.email_message.clone(),
            note: config.note.clone(),
            token: Mutex::new(None),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    async fn access_token(&self) -> std::result::Result<String, ProviderError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.expires_at {
                return Ok(token.value.clone());
            }
        }

        debug!("Requesting PayPal access token");
        let response = self
            .http
            .post(format!("{}/v1/oauth2/token", self.base_url))
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .header(header::ACCEPT, "application/json")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body("grant_type=client_credentials")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let err = error_from_response(response).await;
            // 憑證錯誤不可能靠重試解決
            return Err(if status.is_client_error() && status != StatusCode::TOO_MANY_REQUESTS {
                ProviderError::auth(err.message)
            } else {
                err
            });
        }

        let token: TokenResponse = response.json().await?;
        let lifetime = Duration::from_secs(token.expires_in.unwrap_or(0));
        *cached = Some(CachedToken {
            value: token.access_token.clone(),
            expires_at: Instant::now() + lifetime.saturating_sub(TOKEN_EXPIRY_MARGIN),
        });
        Ok(token.access_token)
    }

    async fn invalidate_token(&self) {
        self.token.lock().await.take();
    }

    /// Available balance for the configured currency.
    pub async fn available_balance(&self) -> std::result::Result<Decimal, ProviderError> {
        let token = self.access_token().await?;
        let response = self
            .http
            .get(format!("{}/v1/reporting/balances", self.base_url))
            .query(&[("currency_code", self.currency.as_str())])
            .bearer_auth(&token)
            .header(header::ACCEPT, "application/json")
            .send()
            .await?;

        if !response.status().is_success() {
            if response.status() == StatusCode::UNAUTHORIZED {
                self.invalidate_token().await;
            }
            return Err(error_from_response(response).await);
        }

        let body: BalancesResponse = response.json().await?;
        let entry = body
            .balances
            .into_iter()
            .find(|b| b.currency.eq_ignore_ascii_case(&self.currency))
            .ok_or_else(|| {
                ProviderError::validation(format!("no {} balance on the account", self.currency))
            })?;
        let value = entry
            .available_balance
            .ok_or_else(|| ProviderError::validation("balance entry has no available_balance"))?
            .value;

        Decimal::from_str(&value)
            .map_err(|e| ProviderError::validation(format!("unparseable balance '{}': {}", value, e)))
    }
}

#[async_trait]
impl DisbursementClient for PaypalClient {
    async fn submit(&self, request: &PayoutRequest) -> std::result::Result<Disbursement, ProviderError> {
        let token = self.access_token().await?;

        let body = CreatePayoutRequest {
            sender_batch_header: SenderBatchHeader {
                sender_batch_id: &request.batch_id,
                email_subject: &self.email_subject,
                email_message: &self.email_message,
            },
            items: [PayoutItem {
                recipient_type: "EMAIL",
                amount: Money {
                    value: request.amount.to_string(),
                    currency: self.currency.clone(),
                },
                receiver: &request.recipient,
                note: &self.note,
                sender_item_id: &request.item_id,
            }],
        };

        debug!(
            batch_id = %request.batch_id,
            item_id = %request.item_id,
            amount = %request.amount,
            "Submitting PayPal payout"
        );

        let response = self
            .http
            .post(format!("{}/v1/payments/payouts", self.base_url))
            .bearer_auth(&token)
            .header("PayPal-Request-Id", request.batch_id.as_str())
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            if status == StatusCode::UNAUTHORIZED {
                self.invalidate_token().await;
            }
            let err = error_from_response(response).await;
            warn!(batch_id = %request.batch_id, status = status.as_u16(), error = %err, "PayPal rejected payout");
            return Err(err);
        }

        let created: CreatePayoutResponse = response.json().await?;
        Ok(Disbursement {
            transaction_id: created.batch_header.payout_batch_id,
            batch_status: created.batch_header.batch_status,
        })
    }
}

/// Maps an HTTP status onto the engine's taxonomy.
pub(crate) fn classify_status(status: StatusCode, message: String) -> ProviderError {
    match status.as_u16() {
        401 | 403 => ProviderError::auth(message),
        408 | 409 | 425 | 429 => ProviderError::transient(message),
        s if s >= 500 => ProviderError::transient(message),
        _ => ProviderError::validation(message),
    }
}

async fn error_from_response(response: Response) -> ProviderError {
    let status = response.status();
    let text = response.text().await.unwrap_or_default();
    let body: ApiErrorBody = serde_json::from_str(&text).unwrap_or_default();

    let name = body.name.or(body.error).unwrap_or_else(|| {
        status
            .canonical_reason()
            .unwrap_or("UNKNOWN")
            .to_string()
    });
    let mut message = format!(
        "HTTP {} {}: {}",
        status.as_u16(),
        name,
        body.message
            .or(body.error_description)
            .unwrap_or_else(|| text.chars().take(200).collect())
    );
    for detail in &body.details {
        if let (Some(field), Some(issue)) = (&detail.field, &detail.issue) {
            message.push_str(&format!(" [{}: {}]", field, issue));
        }
    }

    classify_status(status, message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::ErrorKind;

    #[test]
    fn test_classify_status() {
        let kind = |code: u16| {
            classify_status(StatusCode::from_u16(code).unwrap(), String::new()).kind
        };
        assert_eq!(kind(400), ErrorKind::ProviderValidation);
        assert_eq!(kind(422), ErrorKind::ProviderValidation);
        assert_eq!(kind(401), ErrorKind::ProviderAuth);
        assert_eq!(kind(403), ErrorKind::ProviderAuth);
        assert_eq!(kind(429), ErrorKind::ProviderTransient);
        assert_eq!(kind(503), ErrorKind::ProviderTransient);
        assert_eq!(kind(408), ErrorKind::ProviderTransient);
    }

    #[test]
    fn test_payout_body_shape() {
        let body = CreatePayoutRequest {
            sender_batch_header: SenderBatchHeader {
                sender_batch_id: "batch_1",
                email_subject: "You have a payment",
                email_message: "You have received a payment from us!",
            },
            items: [PayoutItem {
                recipient_type: "EMAIL",
                amount: Money {
                    value: "130.00".to_string(),
                    currency: "USD".to_string(),
                },
                receiver: "payee@example.com",
                note: "Automatic payout every 24 hours",
                sender_item_id: "item_1",
            }],
        };

        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["sender_batch_header"]["sender_batch_id"], "batch_1");
        assert_eq!(json["items"][0]["recipient_type"], "EMAIL");
        assert_eq!(json["items"][0]["amount"]["value"], "130.00");
        assert_eq!(json["items"][0]["sender_item_id"], "item_1");
    }
}
