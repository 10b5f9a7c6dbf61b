use chrono::{DateTime, Duration, TimeZone, Utc};
use common::{ScheduleMode, SchedulerConfig};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{info, warn};

/// Next run strictly after `now`, or `None` when the schedule has nothing to run.
pub fn next_run(config: &SchedulerConfig, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match config.mode {
        ScheduleMode::Interval => {
            let minutes = config.interval_minutes.filter(|m| *m > 0)?;
            let step = Duration::try_minutes(i64::try_from(minutes).ok()?)?;
            now.checked_add_signed(step)
        }
        ScheduleMode::Daily => {
            let times = config.daily_times();
            let today = now.date_naive();
            if let Some(t) = times.iter().find(|t| Utc.from_utc_datetime(&today.and_time(**t)) > now) {
                return Some(Utc.from_utc_datetime(&today.and_time(*t)));
            }
            let tomorrow = today.succ_opt()?;
            times.first().map(|t| Utc.from_utc_datetime(&tomorrow.and_time(*t)))
        }
    }
}

/// Run `job` on the configured cadence until `shutdown` is notified.
/// A job that is running when shutdown arrives is allowed to finish.
pub async fn run_schedule<F, Fut>(config: &SchedulerConfig, shutdown: Arc<Notify>, mut job: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    loop {
        let now = Utc::now();
        let Some(at) = next_run(config, now) else {
            warn!("scheduler has no upcoming run; stopping");
            return;
        };
        let wait = (at - now).to_std().unwrap_or_default();
        info!(next_run = %at, "scheduler: waiting for next run");

        tokio::select! {
            _ = tokio::time::sleep(wait) => {
                job().await;
            }
            _ = shutdown.notified() => {
                info!("scheduler: shutdown requested");
                return;
            }
        }
    }
}
