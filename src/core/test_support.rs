//! Test doubles shared by the core unit tests.

use crate::domain::model::{AuditRecord, Disbursement, PayoutRequest};
use crate::domain::ports::{AuditStore, DisbursementClient};
use crate::utils::error::{PayoutError, ProviderError, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct SubmitCall {
    pub at: Instant,
    pub batch_id: String,
    pub item_id: String,
}

/// Replays queued results in order, then succeeds. Tracks concurrency and call timing.
#[derive(Default)]
pub struct ScriptedClient {
    script: Mutex<VecDeque<std::result::Result<Disbursement, ProviderError>>>,
    calls: Mutex<Vec<SubmitCall>>,
    latency: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn then_fail(self, error: ProviderError) -> Self {
        self.script.lock().unwrap().push_back(Err(error));
        self
    }

    pub fn then_fail_times(self, times: usize, error: ProviderError) -> Self {
        for _ in 0..times {
            self.script.lock().unwrap().push_back(Err(error.clone()));
        }
        self
    }

    pub fn then_succeed(self, transaction_id: &str) -> Self {
        self.script.lock().unwrap().push_back(Ok(Disbursement {
            transaction_id: transaction_id.to_string(),
            batch_status: Some("PENDING".to_string()),
        }));
        self
    }

    pub fn calls(&self) -> Vec<SubmitCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DisbursementClient for ScriptedClient {
    async fn submit(&self, request: &PayoutRequest) -> std::result::Result<Disbursement, ProviderError> {
        let now_in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now_in_flight, Ordering::SeqCst);

        self.calls.lock().unwrap().push(SubmitCall {
            at: Instant::now(),
            batch_id: request.batch_id.clone(),
            item_id: request.item_id.clone(),
        });

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let next = self.script.lock().unwrap().pop_front();
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        next.unwrap_or_else(|| {
            Ok(Disbursement {
                transaction_id: format!("PB-{}", request.batch_id),
                batch_status: Some("PENDING".to_string()),
            })
        })
    }
}

/// In-memory audit store that can be switched into a failing state.
#[derive(Default)]
pub struct MemoryAuditStore {
    records: Mutex<Vec<AuditRecord>>,
    failing: AtomicBool,
    closed: AtomicBool,
}

impl MemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        let store = Self::default();
        store.failing.store(true, Ordering::SeqCst);
        store
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().unwrap().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AuditStore for MemoryAuditStore {
    async fn append(&self, record: &AuditRecord) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(PayoutError::IoError(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "store unreachable",
            )));
        }
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
