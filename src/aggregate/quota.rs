//! Daily request budgets for metered sources.

use std::sync::Mutex;

use chrono::{DateTime, NaiveDate, Utc};
use tracing::info;

#[derive(Debug)]
struct QuotaWindow {
    day: NaiveDate,
    used: u32,
}

/// Request counter that resets at midnight UTC.
#[derive(Debug)]
pub struct DailyQuota {
    limit: u32,
    window: Mutex<QuotaWindow>,
}

impl DailyQuota {
    pub fn new(limit: u32) -> Self {
        Self {
            limit,
            window: Mutex::new(QuotaWindow {
                day: Utc::now().date_naive(),
                used: 0,
            }),
        }
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Run `f` on the window for `now`'s day, rolling it over if needed.
    fn with_window<T>(&self, now: DateTime<Utc>, f: impl FnOnce(&mut QuotaWindow) -> T) -> T {
        let mut window = self.window.lock().unwrap_or_else(|e| e.into_inner());
        let today = now.date_naive();
        if window.day != today {
            if window.used >= self.limit {
                info!("Daily quota reset ({} requests available)", self.limit);
            }
            window.day = today;
            window.used = 0;
        }
        f(&mut window)
    }

    /// Consume one request if any remain today.
    pub fn try_consume(&self) -> bool {
        self.try_consume_at(Utc::now())
    }

    pub fn try_consume_at(&self, now: DateTime<Utc>) -> bool {
        self.with_window(now, |window| {
            if window.used >= self.limit {
                return false;
            }
            window.used += 1;
            true
        })
    }

    pub fn remaining(&self) -> u32 {
        self.remaining_at(Utc::now())
    }

    pub fn remaining_at(&self, now: DateTime<Utc>) -> u32 {
        self.with_window(now, |window| self.limit.saturating_sub(window.used))
    }

    pub fn is_exhausted(&self) -> bool {
        self.is_exhausted_at(Utc::now())
    }

    pub fn is_exhausted_at(&self, now: DateTime<Utc>) -> bool {
        self.remaining_at(now) == 0
    }

    /// Use up the rest of today's budget, e.g. after the remote side
    /// reported the quota as spent.
    pub fn exhaust_at(&self, now: DateTime<Utc>) {
        self.with_window(now, |window| window.used = self.limit);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    #[test]
    fn test_consumes_until_exhausted() {
        let quota = DailyQuota::new(2);
        let now = Utc::now();
        assert!(quota.try_consume_at(now));
        assert!(quota.try_consume_at(now));
        assert!(!quota.try_consume_at(now));
        assert!(quota.is_exhausted_at(now));
        assert_eq!(quota.remaining_at(now), 0);
    }

    #[test]
    fn test_resets_next_utc_day() {
        let quota = DailyQuota::new(1);
        let late = Utc.with_ymd_and_hms(2026, 3, 1, 23, 59, 0).unwrap();
        assert!(quota.try_consume_at(late));
        assert!(quota.is_exhausted_at(late));

        let next_day = late + Duration::minutes(2);
        assert!(!quota.is_exhausted_at(next_day));
        assert_eq!(quota.remaining_at(next_day), 1);
    }

    #[test]
    fn test_exhaust() {
        let quota = DailyQuota::new(100);
        let now = Utc::now();
        quota.exhaust_at(now);
        assert!(quota.is_exhausted_at(now));
    }
}
