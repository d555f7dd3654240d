use anyhow::Context;
use auto_payout::adapters::balance::{PaypalBalanceSource, StaticBalanceSource};
use auto_payout::adapters::file_log::FileAuditLog;
use auto_payout::adapters::paypal::PaypalClient;
use auto_payout::adapters::sqlite::{PoolConfig, SqliteAuditStore};
use auto_payout::config::{load_env_file, BalanceSourceKind};
use auto_payout::core::idempotency::UuidKeyGenerator;
use auto_payout::core::policy::PolicyEvaluator;
use auto_payout::domain::ports::{AuditStore, BalanceSource};
use auto_payout::utils::error::ErrorSeverity;
use auto_payout::utils::shutdown::{wait_for_termination, Shutdown};
use auto_payout::utils::{logger, validation::Validate};
use auto_payout::{
    run_scheduler, CliArgs, DispatchQueue, DurableRecorder, PayoutConfig, PayoutEngine,
    PayoutError, PayoutOutcome, RetryController, WorkerExit,
};
use clap::Parser;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();

    // 先載入 .env，讓 RUST_LOG 等設定也能生效
    let env_file = load_env_file(args.env_file.as_deref());

    // 初始化日誌
    if args.json_logs {
        logger::init_json_logger(args.verbose);
    } else {
        logger::init_cli_logger(args.verbose);
    }

    tracing::info!("Starting auto-payout");
    match env_file {
        Ok(Some(path)) => tracing::info!("📄 Loaded environment from {}", path.display()),
        Ok(None) => match &args.env_file {
            Some(path) => tracing::warn!("⚠️ Env file {} not found", path.display()),
            None => tracing::debug!("No .env file found, using process environment only"),
        },
        Err(e) => exit_on_startup_error(&e),
    }

    let config = match args.load_config().and_then(|config| {
        config.validate()?;
        Ok(config)
    }) {
        Ok(config) => config,
        Err(e) => exit_on_startup_error(&e),
    };
    if args.verbose {
        tracing::debug!("Config: {:?}", config);
    }

    let client = Arc::new(PaypalClient::new(&config.provider).context("building PayPal client")?);
    tracing::info!(
        "🔗 PayPal endpoint: {} ({:?})",
        client.base_url(),
        config.provider.mode
    );

    let balance_source: Arc<dyn BalanceSource> = match config.payout.balance_source {
        BalanceSourceKind::Static => {
            tracing::info!(
                "💰 Using static balance of {}",
                config.payout.static_balance
            );
            Arc::new(StaticBalanceSource::new(config.payout.static_balance))
        }
        BalanceSourceKind::Paypal => Arc::new(PaypalBalanceSource::new(client.clone())),
    };

    let evaluator = PolicyEvaluator::new(
        balance_source,
        Arc::new(UuidKeyGenerator::new()),
        config.payout.minimum_balance,
        config.payout.recipient_email.clone(),
    );

    if args.dry_run {
        return match evaluator.evaluate().await {
            Ok(Some(request)) => {
                println!(
                    "Would pay {} to {} (batch {})",
                    request.amount, request.recipient, request.batch_id
                );
                Ok(())
            }
            Ok(None) => {
                println!("No payout due");
                Ok(())
            }
            Err(e) => exit_on_startup_error(&e),
        };
    }

    let recorder = Arc::new(build_recorder(&config));
    let shutdown = Shutdown::new();
    let retry = RetryController::new(client, config.retry.policy())
        .with_shutdown(shutdown.clone(), config.shutdown.in_flight);
    let (queue, worker) = DispatchQueue::start(retry, recorder, shutdown.clone());
    let engine = Arc::new(PayoutEngine::new(evaluator, queue));

    let mut exit_code = 0;

    if args.once {
        match engine.trigger().await {
            Ok(Some(ticket)) => match ticket.outcome().await {
                Ok(PayoutOutcome::Success { transaction_id, .. }) => {
                    println!("✅ Payout sent, batch {}", transaction_id);
                }
                Ok(PayoutOutcome::Failure {
                    error_kind,
                    error_message,
                    ..
                }) => {
                    eprintln!("❌ Payout failed [{}]: {}", error_kind, error_message);
                    exit_code = 2;
                }
                Err(e) => {
                    eprintln!("❌ {}", e.user_friendly_message());
                    exit_code = 1;
                }
            },
            Ok(None) => println!("No payout due"),
            Err(e) => {
                tracing::error!("❌ Payout run failed: {}", e);
                eprintln!("❌ {}", e.user_friendly_message());
                eprintln!("💡 建議: {}", e.recovery_suggestion());
                exit_code = 1;
            }
        }
    } else {
        let schedule = config.schedule.to_schedule()?;
        let scheduler = tokio::spawn(run_scheduler(engine, schedule, shutdown.clone()));

        wait_for_termination().await;
        shutdown.trigger();
        if let Err(e) = scheduler.await {
            tracing::error!("Scheduler task failed: {}", e);
        }
    }

    match worker.shutdown(config.shutdown.grace()).await {
        WorkerExit::Drained => tracing::info!("✅ Dispatch worker stopped cleanly"),
        WorkerExit::Aborted { was_busy } => {
            tracing::warn!(was_busy, "⚠️ Dispatch worker aborted after grace period");
        }
        WorkerExit::Panicked => tracing::error!("❌ Dispatch worker panicked"),
    }

    if exit_code > 0 {
        std::process::exit(exit_code);
    }
    Ok(())
}

/// SQLite is optional; failing to open it degrades to the fallback log only.
fn build_recorder(config: &PayoutConfig) -> DurableRecorder {
    let fallback: Arc<dyn AuditStore> =
        Arc::new(FileAuditLog::new(&config.audit.fallback_log_path));

    let primary: Option<Arc<dyn AuditStore>> =
        config.audit.database_path().and_then(|path| {
            match SqliteAuditStore::open(&path, PoolConfig::default()) {
                Ok(store) => {
                    tracing::info!("🗄️ Audit database: {}", path.display());
                    Some(Arc::new(store) as Arc<dyn AuditStore>)
                }
                Err(e) => {
                    tracing::warn!(
                        "⚠️ Could not open audit database {}: {}. Recording to {} only",
                        path.display(),
                        e,
                        config.audit.fallback_log_path
                    );
                    None
                }
            }
        });

    if primary.is_none() {
        tracing::info!(
            "📝 Recording payouts to {}",
            config.audit.fallback_log_path
        );
    }

    DurableRecorder::new(primary, fallback)
}

fn exit_on_startup_error(e: &PayoutError) -> ! {
    tracing::error!(
        "❌ Startup failed: {} (Category: {:?}, Severity: {:?})",
        e,
        e.category(),
        e.severity()
    );
    tracing::error!("💡 Suggestion: {}", e.recovery_suggestion());
    eprintln!("❌ {}", e.user_friendly_message());

    // 根據錯誤嚴重程度決定退出碼
    let exit_code = match e.severity() {
        ErrorSeverity::Low | ErrorSeverity::High => 1,
        ErrorSeverity::Medium => 2,
        ErrorSeverity::Critical => 3,
    };
    std::process::exit(exit_code)
}
