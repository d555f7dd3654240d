pub mod adapters;
pub mod app;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::CliArgs;

pub use app::scheduler::{run_scheduler, DailySchedule};
pub use config::PayoutConfig;
pub use core::{
    dispatch_queue::{DispatchQueue, DispatchTicket, DispatchWorker, WorkerExit},
    engine::PayoutEngine,
    recorder::DurableRecorder,
    retry::{RetryController, RetryPolicy, ShutdownPolicy},
};
pub use domain::model::{Amount, AuditRecord, ErrorKind, PayoutOutcome, PayoutRequest};
pub use utils::error::{PayoutError, ProviderError, Result};
