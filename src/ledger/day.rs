use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveTime, Offset, TimeZone, Utc};

/// Decides which calendar day an instant falls on for the daily counters.
///
/// Counters reset when the calendar date changes in the configured offset, never by elapsed
/// time, so a counter last touched at 23:59 resets one minute later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayBoundary {
    offset: FixedOffset,
}

impl DayBoundary {
    pub fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }

    pub fn utc() -> Self {
        Self {
            offset: Utc.fix(),
        }
    }

    pub fn day_of(&self, at: DateTime<Utc>) -> NaiveDate {
        at.with_timezone(&self.offset).date_naive()
    }

    pub fn same_day(&self, a: DateTime<Utc>, b: DateTime<Utc>) -> bool {
        self.day_of(a) == self.day_of(b)
    }

    /// The next local midnight strictly after `now`
    pub fn next_reset(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.day_of(now)
            .succ_opt()
            .map(|tomorrow| tomorrow.and_time(NaiveTime::MIN))
            .and_then(|midnight| self.offset.from_local_datetime(&midnight).single())
            .map(|midnight| midnight.with_timezone(&Utc))
            .unwrap_or_else(|| now + Duration::days(1))
    }
}

impl Default for DayBoundary {
    fn default() -> Self {
        Self::utc()
    }
}
