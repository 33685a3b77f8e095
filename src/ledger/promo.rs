use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::constants::{DEFAULT_PROMO_POINTS, RETAILER_POINTS_PER_REDEMPTION};
use crate::db::models::counter::{DailyCounter, Feature, RemainingView};
use crate::db::models::promo::{PromoCode, PromoCodeImport, PromoRedemption};
use crate::db::models::user::{UserAccount, UserId};
use crate::db::models::{PaginatedResponse, Pagination};
use crate::db::prelude::{CounterRepository, PromoCodeRepository, Repository, Tx, UserRepository};
use crate::db::pubsub::{BalanceNotification, NotifyReason};
use crate::ledger::account::AccountLedger;
use crate::ledger::limiter::{DailyLimiter, persists_refusal};
use crate::ledger::{Ledger, LedgerError, LedgerResult, required, required_str};
use crate::util::new_id;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedeemRequest {
    pub code: Option<String>,
    pub user_id: Option<UserId>,
    pub shop_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedemptionOutcome {
    pub code: String,
    pub points_awarded: i64,
    pub consumer_id: UserId,
    pub consumer_points: i64,
    pub retailer_id: UserId,
    pub retailer_points: i64,
    pub remaining_redemptions: i32,
}

impl RedemptionOutcome {
    pub fn notifications(&self) -> Vec<BalanceNotification> {
        vec![
            BalanceNotification {
                user_id: self.consumer_id.clone(),
                points: self.consumer_points,
                delta: self.points_awarded,
                reason: NotifyReason::PromoRedeemed,
            },
            BalanceNotification {
                user_id: self.retailer_id.clone(),
                points: self.retailer_points,
                delta: RETAILER_POINTS_PER_REDEMPTION,
                reason: NotifyReason::RedemptionCredit,
            },
        ]
    }
}

/// Everything a successful redemption writes, decided before anything is written
#[derive(Debug, Clone)]
pub struct RedemptionPlan {
    pub code: PromoCode,
    pub counter: DailyCounter,
    pub consumer_points: i64,
    pub retailer_id: UserId,
    pub retailer_points: i64,
    pub history: PromoRedemption,
}

/// Runs the redemption checks in order and returns the settled state.
///
/// The counter is refreshed in place even when the plan is refused, so a `DailyLimitReached`
/// refusal can still persist the `limit_reached` flag.
pub fn plan_redemption(
    limiter: &DailyLimiter,
    code: Option<&PromoCode>,
    consumer: Option<&UserAccount>,
    counter: &mut DailyCounter,
    retailer: Option<&UserAccount>,
    now: DateTime<Utc>,
) -> LedgerResult<RedemptionPlan> {
    let code = code.ok_or_else(|| LedgerError::CodeNotFound(String::new()))?;
    if code.is_redeemed() {
        return Err(LedgerError::AlreadyRedeemed(code.code.clone()));
    }

    let consumer = consumer
        .filter(|c| c.is_consumer())
        .ok_or(LedgerError::InvalidConsumer)?;

    limiter.check(counter, now)?;

    let retailer = retailer
        .filter(|r| r.is_verified_retailer())
        .ok_or(LedgerError::InvalidRetailer)?;
    let shop_name = retailer.shop_name.clone().unwrap_or_default();

    let mut settled_counter = counter.clone();
    limiter.consume(&mut settled_counter);

    let mut settled_code = code.clone();
    settled_code.redeemed_by_consumer = Some(consumer.id.clone());
    settled_code.redeemed_by_retailer = Some(retailer.id.clone());
    settled_code.shop_name = Some(shop_name.clone());
    settled_code.redeemed_at = Some(now);

    Ok(RedemptionPlan {
        consumer_points: consumer.points + code.points,
        retailer_id: retailer.id.clone(),
        retailer_points: retailer.points + RETAILER_POINTS_PER_REDEMPTION,
        history: PromoRedemption {
            id: new_id(),
            user_id: consumer.id.clone(),
            code: code.code.clone(),
            shop_name,
            points: code.points,
            redeemed_at: now,
        },
        code: settled_code,
        counter: settled_counter,
    })
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteCodesRequest {
    /// Codes to delete; when absent every redeemed code is removed
    #[serde(default)]
    pub codes: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportSummary {
    pub submitted: usize,
    pub imported: u64,
}

/// Uppercases, drops blanks and fills in the default value
pub fn prepare_import(items: &[PromoCodeImport]) -> LedgerResult<Vec<(String, i64)>> {
    let mut codes = Vec::with_capacity(items.len());
    for item in items {
        let code = PromoCode::normalize(&item.code);
        if code.is_empty() {
            continue;
        }

        let points = item.points.unwrap_or(DEFAULT_PROMO_POINTS);
        if points < 0 {
            return Err(LedgerError::InvalidInput(format!(
                "promo code '{code}' has a negative value"
            )));
        }

        codes.push((code, points));
    }

    Ok(codes)
}

impl Ledger {
    #[instrument(skip(self))]
    pub async fn redeem_promo(&self, req: RedeemRequest) -> LedgerResult<RedemptionOutcome> {
        let code = PromoCode::normalize(&required_str(req.code, "code")?);
        let user_id = required(req.user_id, "userId")?;
        let shop_name = required_str(req.shop_name, "shopName")?;
        let now = Utc::now();

        let mut tx = Tx::begin(self.pool).await?;

        let promo = PromoCodeRepository::lock(&mut tx, &code).await?;
        let retailer_id = UserRepository::id_by_shop_name(&mut tx, &shop_name).await?;
        let (consumer, retailer) = match &retailer_id {
            Some(retailer_id) => {
                let mut locked = AccountLedger::lock_all(&mut tx, &[&user_id, retailer_id])
                    .await?
                    .into_iter();
                (locked.next().flatten(), locked.next().flatten())
            }
            None => (
                AccountLedger::lock_all(&mut tx, &[&user_id])
                    .await?
                    .into_iter()
                    .next()
                    .flatten(),
                None,
            ),
        };
        // the shop may have been renamed between the lookup and the lock
        let retailer = retailer.filter(|r| r.shop_name.as_deref() == Some(shop_name.as_str()));
        let mut counter = self
            .limiter
            .load(&mut tx, &user_id, Feature::PromoRedemption, now)
            .await?;

        let plan = match plan_redemption(
            &self.limiter,
            promo.as_ref(),
            consumer.as_ref(),
            &mut counter,
            retailer.as_ref(),
            now,
        ) {
            Ok(plan) => plan,
            Err(LedgerError::CodeNotFound(_)) => return Err(LedgerError::CodeNotFound(code)),
            Err(e) if persists_refusal(&e) => {
                CounterRepository::save(&mut tx, &counter).await?;
                tx.commit().await?;
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        if !PromoCodeRepository::mark_redeemed(
            &mut tx,
            &plan.code.code,
            &user_id,
            &plan.retailer_id,
            &plan.history.shop_name,
            now,
        )
        .await?
        {
            return Err(LedgerError::AlreadyRedeemed(code));
        }

        let consumer_points = AccountLedger::credit(&mut tx, &user_id, plan.history.points).await?;
        let retailer_points =
            AccountLedger::credit(&mut tx, &plan.retailer_id, RETAILER_POINTS_PER_REDEMPTION)
                .await?;
        CounterRepository::save(&mut tx, &plan.counter).await?;
        PromoCodeRepository::insert_redemption(&mut tx, &plan.history).await?;

        tx.commit().await?;

        tracing::info!(
            code,
            consumer = %user_id,
            shop = plan.history.shop_name,
            points = plan.history.points,
            "promo code redeemed"
        );

        Ok(RedemptionOutcome {
            code,
            points_awarded: plan.history.points,
            consumer_id: user_id,
            consumer_points,
            retailer_id: plan.retailer_id,
            retailer_points,
            remaining_redemptions: plan.counter.remaining,
        })
    }

    #[instrument(skip(self))]
    pub async fn remaining_redemptions(&self, user_id: &UserId) -> LedgerResult<RemainingView> {
        if !UserRepository::new(self.pool).exists(user_id).await? {
            return Err(LedgerError::UserNotFound(user_id.clone()));
        }

        let now = Utc::now();
        let counter = CounterRepository::new(self.pool)
            .get(user_id, Feature::PromoRedemption)
            .await?
            .unwrap_or_else(|| DailyCounter::full(user_id.clone(), Feature::PromoRedemption, now));

        Ok(self.limiter.status(&counter, now))
    }

    #[instrument(skip(self))]
    pub async fn redemption_history(
        &self,
        user_id: &UserId,
        page: Pagination,
    ) -> LedgerResult<PaginatedResponse<PromoRedemption>> {
        if !UserRepository::new(self.pool).exists(user_id).await? {
            return Err(LedgerError::UserNotFound(user_id.clone()));
        }

        let (limit, offset) = page.bounds();
        let (items, total) = PromoCodeRepository::new(self.pool)
            .history(user_id, limit, offset)
            .await?;

        Ok(PaginatedResponse::new(items, total, limit, page.page.max(0)))
    }

    #[instrument(skip(self, items), fields(count = items.len()))]
    pub async fn import_codes(&self, items: Vec<PromoCodeImport>) -> LedgerResult<ImportSummary> {
        let codes = prepare_import(&items)?;

        let mut tx = Tx::begin(self.pool).await?;
        let imported = PromoCodeRepository::insert_many(&mut tx, &codes).await?;
        tx.commit().await?;

        tracing::info!(submitted = items.len(), imported, "promo codes imported");
        Ok(ImportSummary {
            submitted: items.len(),
            imported,
        })
    }

    #[instrument(skip(self))]
    pub async fn delete_codes(&self, req: DeleteCodesRequest) -> LedgerResult<u64> {
        let repo = PromoCodeRepository::new(self.pool);
        let deleted = match req.codes {
            Some(codes) => {
                let codes: Vec<String> = codes.iter().map(|c| PromoCode::normalize(c)).collect();
                repo.delete_many(&codes).await?
            }
            None => repo.delete_redeemed().await?,
        };

        tracing::info!(deleted, "promo codes deleted");
        Ok(deleted)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::db::models::user::Role;
    use crate::db::models::user::fixture::TestAccount;

    fn code(value: &str, points: i64) -> PromoCode {
        PromoCode {
            code: value.to_string(),
            points,
            redeemed_by_consumer: None,
            redeemed_by_retailer: None,
            shop_name: None,
            redeemed_at: None,
            created_at: Utc::now(),
        }
    }

    fn shop_a(points: i64) -> UserAccount {
        let mut retailer = UserAccount::generate_test_account(Role::Retailer, points);
        retailer.shop_name = Some(String::from("ShopA"));
        retailer
    }

    #[test]
    fn test_save10_scenario() {
        let limiter = DailyLimiter::default();
        let now = Utc::now();

        let save10 = code("SAVE10", 10);
        let consumer = UserAccount::generate_test_account(Role::Consumer, 0);
        let retailer = shop_a(5);
        let mut counter = DailyCounter::full(consumer.id.clone(), Feature::PromoRedemption, now);

        let plan = plan_redemption(
            &limiter,
            Some(&save10),
            Some(&consumer),
            &mut counter,
            Some(&retailer),
            now,
        )
        .unwrap();

        assert_eq!(plan.consumer_points, 10);
        assert_eq!(plan.counter.remaining, 2);
        assert_eq!(plan.retailer_points, 6);
        assert_eq!(plan.code.redeemed_by_consumer, Some(consumer.id.clone()));
        assert_eq!(plan.code.redeemed_by_retailer, Some(retailer.id.clone()));
        assert_eq!(plan.code.shop_name.as_deref(), Some("ShopA"));
        assert_eq!(plan.history.points, 10);
    }

    #[test]
    fn test_second_redemption_is_refused() {
        let limiter = DailyLimiter::default();
        let now = Utc::now();

        let save10 = code("SAVE10", 10);
        let first = UserAccount::generate_test_account(Role::Consumer, 0);
        let second = UserAccount::generate_test_account(Role::Consumer, 0);
        let retailer = shop_a(5);

        let mut counter = DailyCounter::full(first.id.clone(), Feature::PromoRedemption, now);
        let plan = plan_redemption(
            &limiter,
            Some(&save10),
            Some(&first),
            &mut counter,
            Some(&retailer),
            now,
        )
        .unwrap();

        let mut counter = DailyCounter::full(second.id.clone(), Feature::PromoRedemption, now);
        let untouched = counter.clone();
        let err = plan_redemption(
            &limiter,
            Some(&plan.code),
            Some(&second),
            &mut counter,
            Some(&retailer),
            now,
        )
        .unwrap_err();

        // the counter is left as it was, nothing to write back
        assert!(!persists_refusal(&err));
        assert!(matches!(err, LedgerError::AlreadyRedeemed(c) if c == "SAVE10"));
        assert_eq!(counter, untouched);
    }

    #[test]
    fn test_check_order() {
        let limiter = DailyLimiter::default();
        let now = Utc::now();
        let save10 = code("SAVE10", 10);
        let consumer = UserAccount::generate_test_account(Role::Consumer, 0);
        let retailer = shop_a(0);
        let mut counter = DailyCounter::full(consumer.id.clone(), Feature::PromoRedemption, now);

        let missing = plan_redemption(&limiter, None, Some(&consumer), &mut counter, None, now);
        assert!(matches!(missing, Err(LedgerError::CodeNotFound(_))));

        // retailers can't redeem as consumers
        let wrong_role = plan_redemption(
            &limiter,
            Some(&save10),
            Some(&retailer),
            &mut counter,
            Some(&retailer),
            now,
        );
        assert!(matches!(wrong_role, Err(LedgerError::InvalidConsumer)));

        let mut unverified = retailer.clone();
        unverified.verification = crate::db::models::user::Verification::NotVerified;
        let not_verified = plan_redemption(
            &limiter,
            Some(&save10),
            Some(&consumer),
            &mut counter,
            Some(&unverified),
            now,
        );
        assert!(matches!(not_verified, Err(LedgerError::InvalidRetailer)));

        let no_shop = plan_redemption(&limiter, Some(&save10), Some(&consumer), &mut counter, None, now);
        assert!(matches!(no_shop, Err(LedgerError::InvalidRetailer)));

        // none of the refusals spent a redemption
        assert_eq!(counter.remaining, 3);
    }

    #[test]
    fn test_limit_checked_before_retailer() {
        let limiter = DailyLimiter::default();
        let now = Utc::now();
        let consumer = UserAccount::generate_test_account(Role::Consumer, 0);
        let mut counter = DailyCounter {
            remaining: 0,
            used: 3,
            last_reset: now,
            ..DailyCounter::full(consumer.id.clone(), Feature::PromoRedemption, now)
        };

        let err = plan_redemption(
            &limiter,
            Some(&code("SAVE10", 10)),
            Some(&consumer),
            &mut counter,
            None,
            now,
        )
        .unwrap_err();

        assert!(matches!(
            err,
            LedgerError::DailyLimitReached(Feature::PromoRedemption)
        ));
        // the flagged counter is saved and committed before the refusal is returned
        assert!(persists_refusal(&err));
        assert!(counter.limit_reached);
        assert_eq!(counter.remaining, 0);
    }

    #[test]
    fn test_prepare_import() {
        let items = vec![
            PromoCodeImport {
                code: String::from(" save10 "),
                points: None,
            },
            PromoCodeImport {
                code: String::from("   "),
                points: Some(5),
            },
            PromoCodeImport {
                code: String::from("bonus25"),
                points: Some(25),
            },
        ];

        assert_eq!(
            prepare_import(&items).unwrap(),
            vec![(String::from("SAVE10"), 10), (String::from("BONUS25"), 25)]
        );

        let negative = vec![PromoCodeImport {
            code: String::from("bad"),
            points: Some(-1),
        }];
        assert!(matches!(
            prepare_import(&negative),
            Err(LedgerError::InvalidInput(_))
        ));
    }
}
