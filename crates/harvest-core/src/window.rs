//! Collection window selection.

use chrono::{DateTime, FixedOffset};
use serde::Serialize;

use crate::period::{CalendarScheme, Period};

/// The time range a run harvests: `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CollectionWindow {
    pub start: DateTime<FixedOffset>,
    pub end: DateTime<FixedOffset>,
    /// True when the store held no messages and the window opened at the epoch.
    pub first_run: bool,
}

impl CollectionWindow {
    /// Choose the window for a run at `now`.
    ///
    /// With prior data the window reopens the previous period so late
    /// arrivals and thread replies are picked up; otherwise it starts at
    /// `epoch`.
    pub fn compute(
        has_previous_data: bool,
        now: DateTime<FixedOffset>,
        scheme: CalendarScheme,
        epoch: DateTime<FixedOffset>,
    ) -> Self {
        if has_previous_data {
            let start = Period::containing(&now, scheme).previous().start();
            Self {
                start,
                end: now,
                first_run: false,
            }
        } else {
            Self {
                start: epoch,
                end: now,
                first_run: true,
            }
        }
    }

    /// Lower bound as an API timestamp (`seconds.micros`).
    pub fn oldest_ts(&self) -> String {
        to_api_ts(self.start)
    }

    pub fn latest_ts(&self) -> String {
        to_api_ts(self.end)
    }
}

fn to_api_ts(instant: DateTime<FixedOffset>) -> String {
    format!(
        "{}.{:06}",
        instant.timestamp(),
        instant.timestamp_subsec_micros()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::period::midnight;
    use chrono::NaiveDate;

    fn day(y: i32, m: u32, d: u32) -> DateTime<FixedOffset> {
        midnight(NaiveDate::from_ymd_opt(y, m, d).unwrap())
    }

    #[test]
    fn test_first_run_starts_at_epoch() {
        let now = day(2025, 10, 20);
        let window = CollectionWindow::compute(false, now, CalendarScheme::Monthly, day(2025, 9, 1));
        assert!(window.first_run);
        assert_eq!(window.start, day(2025, 9, 1));
        assert_eq!(window.end, now);
    }

    #[test]
    fn test_subsequent_run_reopens_previous_period() {
        let now = day(2025, 10, 20);
        let monthly = CollectionWindow::compute(true, now, CalendarScheme::Monthly, day(2025, 9, 1));
        assert!(!monthly.first_run);
        assert_eq!(monthly.start, day(2025, 9, 1));

        // 2025-10-20 is a Monday; the previous week starts on the 13th.
        let weekly = CollectionWindow::compute(true, now, CalendarScheme::Weekly, day(2025, 9, 1));
        assert_eq!(weekly.start, day(2025, 10, 13));
    }

    #[test]
    fn test_api_timestamps() {
        let window = CollectionWindow::compute(false, day(2025, 9, 2), CalendarScheme::Weekly, day(2025, 9, 1));
        // 2025-09-01T00:00+09:00 == 2025-08-31T15:00Z
        assert_eq!(window.oldest_ts(), "1756652400.000000");
        assert_eq!(window.latest_ts(), "1756738800.000000");
    }
}
