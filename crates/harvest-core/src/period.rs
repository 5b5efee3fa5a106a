//! Calendar periods in the fixed UTC+9 reporting zone.

use std::fmt;
use std::str::FromStr;

use chrono::{
    DateTime, Datelike, Duration, FixedOffset, Months, NaiveDate, NaiveTime, Offset, TimeZone, Utc,
};
use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Offset of the reporting zone, in seconds east of UTC.
pub const ZONE_OFFSET_SECS: i32 = 9 * 3600;

/// The fixed reporting zone (UTC+9).
pub fn zone() -> FixedOffset {
    FixedOffset::east_opt(ZONE_OFFSET_SECS).unwrap_or_else(|| Utc.fix())
}

/// Current instant in the reporting zone.
pub fn now_in_zone() -> DateTime<FixedOffset> {
    Utc::now().with_timezone(&zone())
}

/// Midnight of `date` in the reporting zone.
pub fn midnight(date: NaiveDate) -> DateTime<FixedOffset> {
    let zone = zone();
    let local = date.and_time(NaiveTime::MIN);
    let utc = local - Duration::seconds(i64::from(zone.local_minus_utc()));
    DateTime::from_naive_utc_and_offset(utc, zone)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CalendarScheme {
    Weekly,
    Monthly,
}

impl CalendarScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            CalendarScheme::Weekly => "weekly",
            CalendarScheme::Monthly => "monthly",
        }
    }

    /// Day of month before which the still-open period is not analysed.
    ///
    /// Only the monthly scheme has a cutoff.
    pub fn analysis_cutoff_day(&self) -> Option<u32> {
        match self {
            CalendarScheme::Weekly => None,
            CalendarScheme::Monthly => Some(15),
        }
    }
}

impl fmt::Display for CalendarScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CalendarScheme {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "weekly" | "week" => Ok(CalendarScheme::Weekly),
            "monthly" | "month" => Ok(CalendarScheme::Monthly),
            other => Err(ConfigError::UnknownScheme(other.to_string())),
        }
    }
}

/// A half-open calendar interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Period {
    start: DateTime<FixedOffset>,
    scheme: CalendarScheme,
}

impl Period {
    /// The period of `scheme` that contains `instant`.
    pub fn containing<Tz: TimeZone>(instant: &DateTime<Tz>, scheme: CalendarScheme) -> Self {
        let local = instant.with_timezone(&zone()).date_naive();
        let first_day = match scheme {
            CalendarScheme::Weekly => {
                local - Duration::days(i64::from(local.weekday().num_days_from_monday()))
            }
            CalendarScheme::Monthly => local.with_day(1).unwrap_or(local),
        };
        Self {
            start: midnight(first_day),
            scheme,
        }
    }

    pub fn start(&self) -> DateTime<FixedOffset> {
        self.start
    }

    pub fn scheme(&self) -> CalendarScheme {
        self.scheme
    }

    /// Exclusive end of the period.
    pub fn end(&self) -> DateTime<FixedOffset> {
        let first = self.start.date_naive();
        let next = match self.scheme {
            CalendarScheme::Weekly => first + Duration::days(7),
            CalendarScheme::Monthly => first
                .checked_add_months(Months::new(1))
                .unwrap_or(first + Duration::days(31)),
        };
        midnight(next)
    }

    /// The period immediately before this one.
    pub fn previous(&self) -> Self {
        let first = self.start.date_naive();
        let prev = match self.scheme {
            CalendarScheme::Weekly => first - Duration::days(7),
            CalendarScheme::Monthly => first
                .checked_sub_months(Months::new(1))
                .unwrap_or(first - Duration::days(28)),
        };
        Self {
            start: midnight(prev),
            scheme: self.scheme,
        }
    }

    pub fn contains<Tz: TimeZone>(&self, instant: &DateTime<Tz>) -> bool {
        let local = instant.with_timezone(&zone());
        local >= self.start && local < self.end()
    }

    /// Human-readable label: `September 2025` or `2025-09-01 ~ 2025-09-07`.
    pub fn label(&self) -> String {
        match self.scheme {
            CalendarScheme::Monthly => self.start.format("%B %Y").to_string(),
            CalendarScheme::Weekly => {
                let last_day = self.end().date_naive() - Duration::days(1);
                format!(
                    "{} ~ {}",
                    self.start.format("%Y-%m-%d"),
                    last_day.format("%Y-%m-%d")
                )
            }
        }
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}
