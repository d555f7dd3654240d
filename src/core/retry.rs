use crate::domain::model::{ErrorKind, PayoutOutcome, PayoutRequest};
use crate::domain::ports::DisbursementClient;
use crate::utils::shutdown::Shutdown;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Bounded exponential backoff: the wait before retry `n` (0-based) is
/// `base_delay * backoff_multiplier^n`, capped at `max_delay`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_multiplier: f64,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_multiplier: 2.0,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(300),
        }
    }
}

impl RetryPolicy {
    pub fn delay_for(&self, retry: u32) -> Duration {
        let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
        let secs = self.base_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        // 溢位或 NaN 一律視為上限
        Duration::try_from_secs_f64(secs).map_or(self.max_delay, |d| d.min(self.max_delay))
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// What an in-flight payout does when shutdown is requested.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShutdownPolicy {
    /// Keep retrying; the grace period is the only bound.
    #[default]
    Complete,
    /// Stop at the next backoff wait and record what happened so far.
    Abandon,
}

impl std::str::FromStr for ShutdownPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "complete" => Ok(ShutdownPolicy::Complete),
            "abandon" => Ok(ShutdownPolicy::Abandon),
            other => Err(format!("expected 'complete' or 'abandon', got '{}'", other)),
        }
    }
}

pub struct RetryController {
    client: Arc<dyn DisbursementClient>,
    policy: RetryPolicy,
    shutdown: Shutdown,
    on_shutdown: ShutdownPolicy,
}

impl RetryController {
    pub fn new(client: Arc<dyn DisbursementClient>, policy: RetryPolicy) -> Self {
        Self {
            client,
            policy,
            shutdown: Shutdown::new(),
            on_shutdown: ShutdownPolicy::Complete,
        }
    }

    pub fn with_shutdown(mut self, shutdown: Shutdown, on_shutdown: ShutdownPolicy) -> Self {
        self.shutdown = shutdown;
        self.on_shutdown = on_shutdown;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Submits `request` until it succeeds, fails permanently, or runs out of retries.
    ///
    /// The same request (and therefore the same idempotency keys) is sent on every attempt.
    pub async fn dispatch_with_retry(&self, request: &PayoutRequest) -> PayoutOutcome {
        self.dispatch_tracked(request, &AtomicU32::new(0)).await
    }

    /// Like `dispatch_with_retry`, publishing the number of submissions started to `started`
    /// so an observer can account for a payout that is aborted mid-flight.
    pub(crate) async fn dispatch_tracked(
        &self,
        request: &PayoutRequest,
        started: &AtomicU32,
    ) -> PayoutOutcome {
        let mut attempts_made: u32 = 0;

        loop {
            started.store(attempts_made + 1, Ordering::SeqCst);
            let result = self.client.submit(request).await;
            attempts_made += 1;

            let err = match result {
                Ok(disbursement) => {
                    info!(
                        batch_id = %request.batch_id,
                        transaction_id = %disbursement.transaction_id,
                        attempts = attempts_made,
                        "Payout accepted"
                    );
                    return PayoutOutcome::success(disbursement.transaction_id);
                }
                Err(err) => err,
            };

            if !err.is_retryable() {
                error!(
                    batch_id = %request.batch_id,
                    attempt = attempts_made,
                    error = %err,
                    "Payout rejected, not retrying"
                );
                return PayoutOutcome::failure(err.kind, err.message, attempts_made);
            }

            let retry = attempts_made - 1;
            if retry >= self.policy.max_retries {
                error!(
                    batch_id = %request.batch_id,
                    attempts = attempts_made,
                    error = %err,
                    "Payout failed after all retries"
                );
                return PayoutOutcome::failure(err.kind, err.message, attempts_made);
            }

            let delay = self.policy.delay_for(retry);
            warn!(
                batch_id = %request.batch_id,
                attempt = attempts_made,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %err,
                "Retry attempt #{} after error",
                attempts_made
            );

            if !self.backoff(delay).await {
                warn!(
                    batch_id = %request.batch_id,
                    attempts = attempts_made,
                    "Shutdown requested during backoff, abandoning payout"
                );
                return PayoutOutcome::failure(
                    ErrorKind::Cancelled,
                    format!("abandoned on shutdown; last error: {}", err),
                    attempts_made,
                );
            }
        }
    }

    /// Returns `false` if the wait was cut short by shutdown.
    async fn backoff(&self, delay: Duration) -> bool {
        match self.on_shutdown {
            ShutdownPolicy::Complete => {
                tokio::time::sleep(delay).await;
                true
            }
            ShutdownPolicy::Abandon => {
                if self.shutdown.is_triggered() {
                    return false;
                }
                tokio::select! {
                    _ = tokio::time::sleep(delay) => true,
                    _ = self.shutdown.wait() => false,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::test_support::ScriptedClient;
    use crate::domain::model::Amount;
    use crate::utils::error::ProviderError;
    use rust_decimal_macros::dec;

    fn request() -> PayoutRequest {
        PayoutRequest {
            amount: Amount::new(dec!(130.00)).unwrap(),
            recipient: "payee@example.com".to_string(),
            batch_id: "batch_1".to_string(),
            item_id: "item_1".to_string(),
        }
    }

    #[test]
    fn test_delay_for_grows_exponentially() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
        assert_eq!(policy.max_attempts(), 4);
    }

    #[test]
    fn test_delay_for_fractional_multiplier() {
        let policy = RetryPolicy {
            backoff_multiplier: 1.5,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.delay_for(2), Duration::from_millis(2250));
    }

    #[test]
    fn test_delay_for_is_capped_at_max_delay() {
        let policy = RetryPolicy {
            max_retries: 20,
            backoff_multiplier: 10.0,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.delay_for(2), Duration::from_secs(100));
        assert_eq!(policy.delay_for(3), Duration::from_secs(300));
        assert_eq!(policy.delay_for(19), Duration::from_secs(300));
        // 10^400 overflows f64 to infinity
        assert_eq!(policy.delay_for(400), Duration::from_secs(300));
        assert_eq!(policy.delay_for(u32::MAX), Duration::from_secs(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_worst_case_retry_schedule_finishes() {
        let client = Arc::new(
            ScriptedClient::new().then_fail_times(21, ProviderError::transient("HTTP 503")),
        );
        let policy = RetryPolicy {
            max_retries: 20,
            backoff_multiplier: 10.0,
            ..RetryPolicy::default()
        };
        let controller = RetryController::new(client.clone(), policy);

        let start = tokio::time::Instant::now();
        let outcome = controller.dispatch_with_retry(&request()).await;

        assert!(matches!(outcome, PayoutOutcome::Failure { attempts_made: 21, .. }));
        // 1 + 10 + 100 + 17 * 300 seconds
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(5211), "{:?}", elapsed);
        assert!(elapsed < Duration::from_secs(5212), "{:?}", elapsed);
    }

    #[test]
    fn test_shutdown_policy_from_str() {
        assert_eq!("abandon".parse::<ShutdownPolicy>(), Ok(ShutdownPolicy::Abandon));
        assert_eq!(" Complete ".parse::<ShutdownPolicy>(), Ok(ShutdownPolicy::Complete));
        assert!("later".parse::<ShutdownPolicy>().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_on_third_attempt_with_stable_ids() {
        let client = Arc::new(
            ScriptedClient::new()
                .then_fail_times(2, ProviderError::transient("HTTP 503"))
                .then_succeed("PB-OK"),
        );
        let controller = RetryController::new(client.clone(), RetryPolicy::default());

        let outcome = controller.dispatch_with_retry(&request()).await;

        match outcome {
            PayoutOutcome::Success { transaction_id, .. } => assert_eq!(transaction_id, "PB-OK"),
            other => panic!("expected success, got {:?}", other),
        }

        let calls = client.calls();
        assert_eq!(calls.len(), 3);
        for call in &calls {
            assert_eq!(call.batch_id, "batch_1");
            assert_eq!(call.item_id, "item_1");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausts_retries_and_reports_attempts() {
        let client = Arc::new(
            ScriptedClient::new().then_fail_times(10, ProviderError::transient("connection reset")),
        );
        let controller = RetryController::new(client.clone(), RetryPolicy::default());

        let outcome = controller.dispatch_with_retry(&request()).await;

        match outcome {
            PayoutOutcome::Failure {
                error_kind,
                error_message,
                attempts_made,
                ..
            } => {
                assert_eq!(error_kind, ErrorKind::ProviderTransient);
                assert_eq!(error_message, "connection reset");
                assert_eq!(attempts_made, 4);
            }
            other => panic!("expected failure, got {:?}", other),
        }
        assert_eq!(client.calls().len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_waits_match_multiplier_powers() {
        let client = Arc::new(
            ScriptedClient::new().then_fail_times(10, ProviderError::transient("HTTP 500")),
        );
        let controller = RetryController::new(client.clone(), RetryPolicy::default());

        controller.dispatch_with_retry(&request()).await;

        let calls = client.calls();
        let gaps: Vec<Duration> = calls.windows(2).map(|w| w[1].at - w[0].at).collect();
        assert_eq!(
            gaps,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4)
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_validation_error_is_not_retried() {
        let client = Arc::new(
            ScriptedClient::new().then_fail(ProviderError::validation("receiver is invalid")),
        );
        let controller = RetryController::new(client.clone(), RetryPolicy::default());

        let outcome = controller.dispatch_with_retry(&request()).await;

        assert!(matches!(
            outcome,
            PayoutOutcome::Failure {
                error_kind: ErrorKind::ProviderValidation,
                attempts_made: 1,
                ..
            }
        ));
        assert_eq!(client.calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_error_is_not_retried() {
        let client = Arc::new(ScriptedClient::new().then_fail(ProviderError::auth("invalid_client")));
        let controller = RetryController::new(client.clone(), RetryPolicy::default());

        let outcome = controller.dispatch_with_retry(&request()).await;

        assert!(matches!(
            outcome,
            PayoutOutcome::Failure {
                error_kind: ErrorKind::ProviderAuth,
                attempts_made: 1,
                ..
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_retries_means_single_attempt() {
        let client = Arc::new(ScriptedClient::new().then_fail(ProviderError::transient("timeout")));
        let policy = RetryPolicy {
            max_retries: 0,
            ..RetryPolicy::default()
        };
        let controller = RetryController::new(client.clone(), policy);

        let outcome = controller.dispatch_with_retry(&request()).await;

        assert!(matches!(outcome, PayoutOutcome::Failure { attempts_made: 1, .. }));
        assert_eq!(client.calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandon_policy_stops_during_backoff() {
        let client = Arc::new(
            ScriptedClient::new().then_fail_times(10, ProviderError::transient("HTTP 502")),
        );
        let shutdown = Shutdown::new();
        let controller = RetryController::new(client.clone(), RetryPolicy::default())
            .with_shutdown(shutdown.clone(), ShutdownPolicy::Abandon);

        let trigger = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            trigger.trigger();
        });

        let outcome = controller.dispatch_with_retry(&request()).await;

        match outcome {
            PayoutOutcome::Failure {
                error_kind,
                attempts_made,
                error_message,
                ..
            } => {
                assert_eq!(error_kind, ErrorKind::Cancelled);
                assert_eq!(attempts_made, 1);
                assert!(error_message.contains("HTTP 502"));
            }
            other => panic!("expected cancellation, got {:?}", other),
        }
        assert_eq!(client.calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_complete_policy_ignores_shutdown() {
        let client = Arc::new(
            ScriptedClient::new()
                .then_fail(ProviderError::transient("HTTP 502"))
                .then_succeed("PB-LATE"),
        );
        let shutdown = Shutdown::new();
        shutdown.trigger();
        let controller = RetryController::new(client.clone(), RetryPolicy::default())
            .with_shutdown(shutdown, ShutdownPolicy::Complete);

        let outcome = controller.dispatch_with_retry(&request()).await;
        assert!(outcome.is_success());
    }
}
