use crate::core::engine::PayoutEngine;
use crate::utils::error::{PayoutError, Result};
use crate::utils::shutdown::Shutdown;
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use std::sync::Arc;

/// A once-a-day wall-clock time in an IANA time zone. Daylight saving is followed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DailySchedule {
    pub time: NaiveTime,
    pub timezone: Tz,
}

impl DailySchedule {
    pub fn new(time: NaiveTime, timezone: Tz) -> Self {
        Self { time, timezone }
    }

    /// Parses `HH:MM` and a zone name such as `America/New_York`.
    pub fn parse(time: &str, timezone: &str) -> Result<Self> {
        let parsed_time = NaiveTime::parse_from_str(time.trim(), "%H:%M").map_err(|e| {
            PayoutError::InvalidConfigValueError {
                field: "schedule.time".to_string(),
                value: time.to_string(),
                reason: format!("expected HH:MM ({})", e),
            }
        })?;
        let zone: Tz = timezone.trim().parse().map_err(|e| {
            PayoutError::InvalidConfigValueError {
                field: "schedule.timezone".to_string(),
                value: timezone.to_string(),
                reason: format!("expected an IANA zone name such as America/New_York ({})", e),
            }
        })?;
        Ok(Self::new(parsed_time, zone))
    }

    /// Next occurrence of `time` in `timezone`, strictly after `now`.
    pub fn next_fire_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let mut date = now.with_timezone(&self.timezone).date_naive();
        loop {
            if let Some(fire) = self.fire_on(date) {
                if fire > now {
                    return fire;
                }
            }
            date = match date.succ_opt() {
                Some(next) => next,
                None => return now,
            };
        }
    }

    /// The fire instant on a local date. A time repeated by a DST fall-back resolves to its
    /// first occurrence; a time skipped by spring-forward moves one hour later.
    fn fire_on(&self, date: NaiveDate) -> Option<DateTime<Utc>> {
        let local = date.and_time(self.time);
        self.timezone
            .from_local_datetime(&local)
            .earliest()
            .or_else(|| {
                self.timezone
                    .from_local_datetime(&(local + Duration::hours(1)))
                    .earliest()
            })
            .map(|fire| fire.with_timezone(&Utc))
    }
}

/// Fires `engine.trigger()` once per day until shutdown.
pub async fn run_scheduler(engine: Arc<PayoutEngine>, schedule: DailySchedule, shutdown: Shutdown) {
    let mut last_fire: Option<DateTime<Utc>> = None;

    loop {
        // 以上次觸發時間為下限，避免時鐘偏差造成同一天重複觸發
        let now = Utc::now();
        let after = last_fire.map_or(now, |last| last.max(now));
        let next = schedule.next_fire_after(after);
        let wait = (next - now).to_std().unwrap_or_default();

        tracing::info!("⏰ Next payout run at {}", next.with_timezone(&schedule.timezone));

        tokio::select! {
            biased;
            _ = shutdown.wait() => {
                tracing::info!("🛑 Scheduler stopping");
                return;
            }
            _ = tokio::time::sleep(wait) => {}
        }

        last_fire = Some(next);
        match engine.trigger().await {
            Ok(Some(ticket)) => {
                tracing::info!("📤 Payout {} queued", ticket.batch_id());
            }
            Ok(None) => {
                tracing::info!("💤 Balance at or below the floor, nothing to pay out");
            }
            Err(PayoutError::QueueClosed) => {
                tracing::warn!("Dispatch queue closed, scheduler stopping");
                return;
            }
            Err(e) => {
                tracing::error!(error = %e, "❌ Payout run skipped");
                tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());
            }
        }
    }
}
