use chrono::{DateTime, Utc};
use tracing::instrument;

use crate::db::models::counter::{DailyCounter, Feature, RemainingView};
use crate::db::models::user::UserId;
use crate::db::prelude::{CounterRepository, Tx};
use crate::ledger::day::DayBoundary;
use crate::ledger::{LedgerError, LedgerResult};

/// Per-user, per-feature daily quota.
///
/// The limiter only ever resets and inspects a counter; spending a use is a separate `consume`
/// call made by the settlement once everything else has succeeded, which lets free plays skip it.
#[derive(Debug, Clone, Copy, Default)]
pub struct DailyLimiter {
    boundary: DayBoundary,
}

impl DailyLimiter {
    pub fn new(boundary: DayBoundary) -> Self {
        Self { boundary }
    }

    /// Restores the counter to its daily maximum if it was last reset on an earlier calendar
    /// day. Returns whether a reset happened; repeated calls within a day are no-ops.
    pub fn refresh(&self, counter: &mut DailyCounter, now: DateTime<Utc>) -> bool {
        if self.boundary.same_day(counter.last_reset, now) {
            return false;
        }

        counter.remaining = counter.feature.daily_max();
        counter.used = 0;
        counter.limit_reached = false;
        counter.last_reset = now;

        true
    }

    /// Refreshes, then permits the action if any uses remain. On refusal the counter's
    /// `limit_reached` flag is set so it can be persisted for clients to read.
    pub fn check(&self, counter: &mut DailyCounter, now: DateTime<Utc>) -> LedgerResult<()> {
        self.refresh(counter, now);

        if counter.remaining > 0 {
            Ok(())
        } else {
            counter.limit_reached = true;
            Err(LedgerError::DailyLimitReached(counter.feature))
        }
    }

    pub fn consume(&self, counter: &mut DailyCounter) {
        counter.remaining = (counter.remaining - 1).max(0);
        counter.used += 1;
        counter.limit_reached = counter.remaining == 0;
    }

    pub fn status(&self, counter: &DailyCounter, now: DateTime<Utc>) -> RemainingView {
        let mut current = counter.clone();
        self.refresh(&mut current, now);

        RemainingView {
            feature: current.feature,
            remaining_redemptions: current.remaining,
            daily_limit_reached: current.remaining == 0,
            next_reset_timestamp: self.boundary.next_reset(now),
        }
    }

    /// Locks the counter row for the rest of the transaction, or starts a full counter if the
    /// user has never used `feature`
    #[instrument(skip(self, tx))]
    pub async fn load(
        &self,
        tx: &mut Tx<'_>,
        user_id: &UserId,
        feature: Feature,
        now: DateTime<Utc>,
    ) -> LedgerResult<DailyCounter> {
        Ok(CounterRepository::lock(tx, user_id, feature)
            .await?
            .unwrap_or_else(|| DailyCounter::full(user_id.clone(), feature, now)))
    }
}

/// Whether a refused settlement must still write its counter back before returning, so the
/// `limit_reached` flag set by `check` is visible to clients
pub fn persists_refusal(err: &LedgerError) -> bool {
    matches!(err, LedgerError::DailyLimitReached(_))
}

#[cfg(test)]
mod test {
    use chrono::Duration;

    use super::*;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn counter(remaining: i32, last_reset: DateTime<Utc>) -> DailyCounter {
        DailyCounter {
            user_id: UserId::from("consumer"),
            feature: Feature::SpinTheWheel,
            remaining,
            used: 3 - remaining,
            last_reset,
            limit_reached: remaining == 0,
        }
    }

    #[test]
    fn test_new_counter_starts_full() {
        let now = Utc::now();
        let c = DailyCounter::full(UserId::from("u"), Feature::PromoRedemption, now);

        assert_eq!(c.remaining, 3);
        assert!(DailyLimiter::default().check(&mut c.clone(), now).is_ok());
    }

    #[test]
    fn test_exhausted_counter_is_refused_and_flagged() {
        let limiter = DailyLimiter::default();
        let now = at("2025-03-01T12:00:00Z");
        let mut c = counter(1, at("2025-03-01T08:00:00Z"));
        c.limit_reached = false;

        limiter.check(&mut c, now).unwrap();
        limiter.consume(&mut c);
        assert_eq!(c.remaining, 0);

        let err = limiter.check(&mut c, now).unwrap_err();
        assert!(matches!(
            err,
            LedgerError::DailyLimitReached(Feature::SpinTheWheel)
        ));
        assert!(c.limit_reached);
    }

    #[test]
    fn test_reset_at_midnight_not_after_24h() {
        let limiter = DailyLimiter::default();
        let mut c = counter(0, at("2025-03-01T23:59:00Z"));

        // one minute later is a new calendar day
        assert!(limiter.check(&mut c, at("2025-03-02T00:00:30Z")).is_ok());
        assert_eq!(c.remaining, 3);
        assert!(!c.limit_reached);
    }

    #[test]
    fn test_reset_regardless_of_days_elapsed() {
        let limiter = DailyLimiter::default();
        let mut c = counter(0, at("2025-01-01T10:00:00Z"));

        assert!(limiter.refresh(&mut c, at("2025-03-14T10:00:00Z")));
        assert_eq!(c.remaining, 3);
        assert_eq!(c.used, 0);
    }

    #[test]
    fn test_refresh_is_idempotent_within_a_day() {
        let limiter = DailyLimiter::default();
        let morning = at("2025-03-02T07:00:00Z");
        let mut c = counter(0, at("2025-03-01T10:00:00Z"));

        assert!(limiter.refresh(&mut c, morning));
        limiter.consume(&mut c);

        assert!(!limiter.refresh(&mut c, morning + Duration::hours(5)));
        assert_eq!(c.remaining, 2);
    }

    #[test]
    fn test_remaining_never_increases_within_a_day() {
        let limiter = DailyLimiter::default();
        let start = at("2025-03-01T00:00:00Z");
        let mut c = DailyCounter::full(UserId::from("u"), Feature::SlotMachine, start);

        let mut previous = c.remaining;
        for hour in 0..24 {
            let now = start + Duration::hours(hour);
            if limiter.check(&mut c, now).is_ok() {
                limiter.consume(&mut c);
            }
            assert!(c.remaining <= previous);
            previous = c.remaining;
        }

        assert_eq!(c.remaining, 0);
        assert_eq!(c.used, 3);
    }

    #[test]
    fn test_only_limit_refusals_are_persisted() {
        let limiter = DailyLimiter::default();
        let now = at("2025-03-01T12:00:00Z");
        let mut c = counter(0, at("2025-03-01T08:00:00Z"));
        c.limit_reached = false;

        let err = limiter.check(&mut c, now).unwrap_err();
        assert!(persists_refusal(&err));
        assert!(c.limit_reached);

        assert!(!persists_refusal(&LedgerError::AlreadyRedeemed("SAVE10".into())));
        assert!(!persists_refusal(&LedgerError::InvalidRetailer));
    }

    #[test]
    fn test_status_reports_next_midnight() {
        let limiter = DailyLimiter::default();
        let c = counter(0, at("2025-03-01T09:00:00Z"));

        let same_day = limiter.status(&c, at("2025-03-01T18:00:00Z"));
        assert_eq!(same_day.remaining_redemptions, 0);
        assert!(same_day.daily_limit_reached);
        assert_eq!(same_day.next_reset_timestamp, at("2025-03-02T00:00:00Z"));

        let next_day = limiter.status(&c, at("2025-03-02T01:00:00Z"));
        assert_eq!(next_day.remaining_redemptions, 3);
        assert!(!next_day.daily_limit_reached);
    }
}
