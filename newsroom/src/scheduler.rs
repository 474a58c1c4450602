use std::future::Future;

use chrono::{Datelike, Duration, Local, NaiveDateTime, NaiveTime, Weekday};
use tracing::{error, info};

use crate::config::ScheduleConfig;
use crate::types::Result;

/// A fixed weekday and local time of day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeeklySchedule {
    pub weekday: Weekday,
    pub time: NaiveTime,
}

impl WeeklySchedule {
    pub fn from_config(config: &ScheduleConfig) -> Result<Self> {
        Ok(Self {
            weekday: config.weekday()?,
            time: config.time_of_day()?,
        })
    }

    /// The first scheduled moment strictly after `now`.
    pub fn next_run_after(&self, now: NaiveDateTime) -> NaiveDateTime {
        let days_ahead = (7 + self.weekday.num_days_from_monday() as i64
            - now.weekday().num_days_from_monday() as i64)
            % 7;
        let candidate = (now.date() + Duration::days(days_ahead)).and_time(self.time);
        if candidate > now {
            candidate
        } else {
            candidate + Duration::days(7)
        }
    }
}

/// Run `job` once now, then on every scheduled moment until Ctrl-C.
/// A failing run is logged and the schedule continues.
pub async fn run_weekly<F, Fut, T>(schedule: WeeklySchedule, mut job: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    info!("Scheduler started: every {:?} at {}", schedule.weekday, schedule.time.format("%H:%M"));

    if let Err(e) = job().await {
        error!("Initial run failed: {}", e);
    }

    loop {
        let now = Local::now().naive_local();
        let next = schedule.next_run_after(now);
        let wait = (next - now).to_std().unwrap_or_default();
        info!("Next run at {} (in {} minutes)", next.format("%Y-%m-%d %H:%M"), wait.as_secs() / 60);

        tokio::select! {
            _ = tokio::time::sleep(wait) => {
                if let Err(e) = job().await {
                    error!("Scheduled run failed: {}", e);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Scheduler stopped");
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, 0)
            .unwrap()
    }

    fn monday_nine() -> WeeklySchedule {
        WeeklySchedule::from_config(&ScheduleConfig::default()).unwrap()
    }

    #[test]
    fn later_the_same_day() {
        // 2024-05-06 is a Monday.
        assert_eq!(monday_nine().next_run_after(at(2024, 5, 6, 8, 0)), at(2024, 5, 6, 9, 0));
    }

    #[test]
    fn exactly_at_run_time_moves_a_week() {
        assert_eq!(monday_nine().next_run_after(at(2024, 5, 6, 9, 0)), at(2024, 5, 13, 9, 0));
    }

    #[test]
    fn midweek_waits_for_next_monday() {
        assert_eq!(monday_nine().next_run_after(at(2024, 5, 8, 12, 30)), at(2024, 5, 13, 9, 0));
    }

    #[test]
    fn other_weekdays() {
        let schedule = WeeklySchedule::from_config(&ScheduleConfig {
            day: "Friday".to_string(),
            time: "17:45".to_string(),
        })
        .unwrap();
        assert_eq!(schedule.next_run_after(at(2024, 5, 6, 9, 0)), at(2024, 5, 10, 17, 45));
        assert_eq!(schedule.next_run_after(at(2024, 5, 11, 9, 0)), at(2024, 5, 17, 17, 45));
    }
}
