use chrono::{DateTime, Duration, NaiveDate, Utc};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
#[error("cannot go back {days} days from {now}")]
pub struct DateRangeError {
    pub now: DateTime<Utc>,
    pub days: i64,
}

/// Inclusive `[from, to]` window over `order.created_at`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl DateRange {
    pub fn new(from: DateTime<Utc>, to: DateTime<Utc>) -> Self {
        DateRange { from, to }
    }

    /// The `days` days leading up to `now`, both ends included.
    /// Fails when the start would fall outside the representable calendar.
    pub fn last_days(now: DateTime<Utc>, days: i64) -> Result<Self, DateRangeError> {
        let from = Duration::try_days(days)
            .and_then(|span| now.checked_sub_signed(span))
            .ok_or(DateRangeError { now, days })?;
        Ok(DateRange { from, to: now })
    }

    /// Whole calendar days from the start of `first` to the last millisecond of `last`
    pub fn days(first: NaiveDate, last: NaiveDate) -> Self {
        let from = first.and_time(chrono::NaiveTime::MIN).and_utc();
        let to = (last + Duration::days(1)).and_time(chrono::NaiveTime::MIN).and_utc()
            - Duration::milliseconds(1);
        DateRange { from, to }
    }

    pub fn is_valid(&self) -> bool {
        self.from <= self.to
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.from <= at && at <= self.to
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} .. {}",
            crate::order::format_timestamp(self.from),
            crate::order::format_timestamp(self.to)
        )
    }
}
