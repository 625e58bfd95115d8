//! Pure overdue arithmetic: how many minutes or days a loan is past its due
//! date, after its grace period has been taken into account.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Minutes in an hour.
pub const MINUTES_IN_HOUR: i64 = 60;
/// Minutes in a day.
pub const MINUTES_IN_DAY: i64 = 24 * MINUTES_IN_HOUR;
/// Minutes in a week.
pub const MINUTES_IN_WEEK: i64 = 7 * MINUTES_IN_DAY;
/// Minutes in a month. Calendar-month precision is intentionally
/// approximated as 31 days.
pub const MINUTES_IN_MONTH: i64 = 31 * MINUTES_IN_DAY;

/// The unit a grace period duration is expressed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Interval {
    /// Minutes.
    Minutes,
    /// Hours.
    Hours,
    /// Days.
    Days,
    /// Weeks.
    Weeks,
    /// Months, approximated as 31 days.
    Months,
}

impl Interval {
    /// Returns the fixed number of minutes in one unit of this interval.
    pub fn minutes(self) -> i64 {
        match self {
            Self::Minutes => 1,
            Self::Hours => MINUTES_IN_HOUR,
            Self::Days => MINUTES_IN_DAY,
            Self::Weeks => MINUTES_IN_WEEK,
            Self::Months => MINUTES_IN_MONTH,
        }
    }
}

/// A loan policy's grace period: overdue amounts no greater than the grace
/// period are forgiven entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GracePeriod {
    /// How many units the grace period lasts.
    pub duration: u32,
    /// The unit `duration` is expressed in.
    pub interval: Interval,
}

impl GracePeriod {
    /// Returns the grace period converted to minutes.
    pub fn minutes(&self) -> i64 {
        i64::from(self.duration) * self.interval.minutes()
    }
}

/// Returns how many minutes past due a loan is at `now`.
///
/// A loan that is not yet due is overdue by zero minutes. The grace period
/// fully absorbs small overdue amounts: the result is the raw overdue
/// minutes only when they strictly exceed the grace period, and zero
/// otherwise; there is no partial credit.
pub fn overdue_minutes(
    due_date: DateTime<Utc>,
    grace_period: Option<&GracePeriod>,
    now: DateTime<Utc>,
) -> i64 {
    if due_date >= now {
        return 0;
    }
    let raw = (now - due_date).num_minutes();
    let grace = grace_period.map_or(0, GracePeriod::minutes);
    if raw > grace { raw } else { 0 }
}

/// Returns the overdue minutes rounded up to whole days.
///
/// Used only by the recall-overdue-by-days rule.
pub fn overdue_days(minutes: i64) -> i64 {
    if minutes <= 0 {
        0
    } else {
        (minutes as u64).div_ceil(MINUTES_IN_DAY as u64) as i64
    }
}
