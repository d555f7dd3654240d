//! Single-flight payout dispatch.
//!
//! Producers hold a cloneable [`DispatchQueue`] handle and push requests onto an unbounded
//! channel. One worker task drains the channel in order, running each request through the
//! retry controller and the recorder before it looks at the next one, so the provider never
//! sees two concurrent payouts.

use crate::core::recorder::DurableRecorder;
use crate::core::retry::RetryController;
use crate::domain::model::{ErrorKind, PayoutOutcome, PayoutRequest};
use crate::utils::error::{PayoutError, Result};
use crate::utils::shutdown::Shutdown;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

struct Job {
    request: PayoutRequest,
    reply: oneshot::Sender<PayoutOutcome>,
}

#[derive(Default)]
struct QueueState {
    busy: AtomicBool,
    pending: AtomicUsize,
    /// The payout being dispatched, held until its outcome is recorded.
    in_flight: Mutex<Option<PayoutRequest>>,
    attempts_started: AtomicU32,
}

impl QueueState {
    fn set_in_flight(&self, request: Option<PayoutRequest>) {
        if let Ok(mut slot) = self.in_flight.lock() {
            *slot = request;
        }
    }

    fn take_in_flight(&self) -> Option<PayoutRequest> {
        self.in_flight.lock().ok().and_then(|mut slot| slot.take())
    }
}

/// Resolves to the terminal outcome of one enqueued payout.
pub struct DispatchTicket {
    batch_id: String,
    rx: oneshot::Receiver<PayoutOutcome>,
}

impl DispatchTicket {
    pub fn batch_id(&self) -> &str {
        &self.batch_id
    }

    /// Fails with `QueueClosed` if the payout was discarded before it was attempted, or if the
    /// worker was aborted mid-flight. An aborted payout is still recorded as `cancelled`.
    pub async fn outcome(self) -> Result<PayoutOutcome> {
        self.rx.await.map_err(|_| PayoutError::QueueClosed)
    }
}

#[derive(Clone)]
pub struct DispatchQueue {
    tx: mpsc::UnboundedSender<Job>,
    state: Arc<QueueState>,
    shutdown: Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// The worker finished its in-flight payout and stopped.
    Drained,
    /// The grace period ran out and the worker was aborted.
    Aborted { was_busy: bool },
    Panicked,
}

pub struct DispatchWorker {
    handle: JoinHandle<()>,
    state: Arc<QueueState>,
    shutdown: Shutdown,
    recorder: Arc<DurableRecorder>,
}

impl DispatchQueue {
    /// Spawns the worker task. Must be called inside a tokio runtime.
    pub fn start(
        retry: RetryController,
        recorder: Arc<DurableRecorder>,
        shutdown: Shutdown,
    ) -> (Self, DispatchWorker) {
        let (tx, rx) = mpsc::unbounded_channel();
        let state = Arc::new(QueueState::default());

        let handle = tokio::spawn(run_worker(
            rx,
            retry,
            recorder.clone(),
            state.clone(),
            shutdown.clone(),
        ));

        let queue = Self {
            tx,
            state: state.clone(),
            shutdown: shutdown.clone(),
        };
        let worker = DispatchWorker {
            handle,
            state,
            shutdown,
            recorder,
        };
        (queue, worker)
    }

    pub fn enqueue(&self, request: PayoutRequest) -> Result<DispatchTicket> {
        if self.shutdown.is_triggered() {
            return Err(PayoutError::QueueClosed);
        }

        let (reply, rx) = oneshot::channel();
        let batch_id = request.batch_id.clone();

        self.state.pending.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(Job { request, reply }).is_err() {
            self.state.pending.fetch_sub(1, Ordering::SeqCst);
            return Err(PayoutError::QueueClosed);
        }

        debug!(
            batch_id = %batch_id,
            pending = self.pending(),
            busy = self.is_busy(),
            "Payout enqueued"
        );
        Ok(DispatchTicket { batch_id, rx })
    }

    pub fn is_busy(&self) -> bool {
        self.state.busy.load(Ordering::SeqCst)
    }

    /// Requests admitted but not yet started.
    pub fn pending(&self) -> usize {
        self.state.pending.load(Ordering::SeqCst)
    }
}

impl DispatchWorker {
    pub fn is_busy(&self) -> bool {
        self.state.busy.load(Ordering::SeqCst)
    }

    /// Stops admitting work, waits up to `grace` for the in-flight payout, then closes the
    /// recorder.
    pub async fn shutdown(self, grace: Duration) -> WorkerExit {
        self.shutdown.trigger();

        let mut handle = self.handle;
        let waited = tokio::time::timeout(grace, &mut handle).await;
        let exit = match waited {
            Ok(Ok(())) => WorkerExit::Drained,
            Ok(Err(e)) => {
                error!("Dispatch worker panicked: {}", e);
                WorkerExit::Panicked
            }
            Err(_) => {
                handle.abort();
                // 等待任務真正結束，避免與 worker 同時寫入紀錄
                let _ = handle.await;
                let was_busy = self.state.busy.load(Ordering::SeqCst);
                if let Some(request) = self.state.take_in_flight() {
                    let attempts = self.state.attempts_started.load(Ordering::SeqCst);
                    error!(
                        batch_id = %request.batch_id,
                        attempts,
                        grace_secs = grace.as_secs(),
                        "Grace period expired with a payout in flight; recording it as cancelled"
                    );
                    let outcome = PayoutOutcome::failure(
                        ErrorKind::Cancelled,
                        "aborted after grace period; provider outcome unknown",
                        attempts,
                    );
                    self.recorder.record(&request, &outcome).await;
                }
                WorkerExit::Aborted { was_busy }
            }
        };

        self.recorder.close().await;
        exit
    }
}

async fn run_worker(
    mut rx: mpsc::UnboundedReceiver<Job>,
    retry: RetryController,
    recorder: Arc<DurableRecorder>,
    state: Arc<QueueState>,
    shutdown: Shutdown,
) {
    loop {
        let job = tokio::select! {
            biased;
            _ = shutdown.wait() => break,
            job = rx.recv() => match job {
                Some(job) => job,
                None => break,
            },
        };

        state.busy.store(true, Ordering::SeqCst);
        state.pending.fetch_sub(1, Ordering::SeqCst);
        state.attempts_started.store(0, Ordering::SeqCst);
        state.set_in_flight(Some(job.request.clone()));

        let outcome = retry
            .dispatch_tracked(&job.request, &state.attempts_started)
            .await;
        recorder.record(&job.request, &outcome).await;

        state.set_in_flight(None);
        state.busy.store(false, Ordering::SeqCst);
        // 呼叫端可能已不在等待結果
        let _ = job.reply.send(outcome);
    }

    rx.close();
    while let Ok(job) = rx.try_recv() {
        state.pending.fetch_sub(1, Ordering::SeqCst);
        warn!(
            batch_id = %job.request.batch_id,
            amount = %job.request.amount,
            "Discarding queued payout on shutdown; it was never submitted"
        );
    }
    info!("Dispatch worker stopped");
}
