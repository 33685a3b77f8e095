use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::db::models::reward::{Reward, RewardClaim};
use crate::db::models::user::{UserAccount, UserId};
use crate::db::prelude::{Repository, RewardRepository, Tx, UserRepository};
use crate::db::pubsub::{BalanceNotification, NotifyReason};
use crate::ledger::account::AccountLedger;
use crate::ledger::{Ledger, LedgerError, LedgerResult, required, required_str};
use crate::util::new_id;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimRequest {
    pub user_id: Option<UserId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimOutcome {
    pub message: String,
    pub reward_id: String,
    pub user_id: UserId,
    pub points_spent: i64,
    pub points: i64,
    pub stock_available: i32,
}

impl ClaimOutcome {
    pub fn notifications(&self) -> Vec<BalanceNotification> {
        vec![BalanceNotification {
            user_id: self.user_id.clone(),
            points: self.points,
            delta: -self.points_spent,
            reason: NotifyReason::RewardClaimed,
        }]
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimPlan {
    pub points_after: i64,
    pub stock_after: i32,
}

/// Stock is checked before balance, so an empty shelf reports `OutOfStock` even to a user who
/// couldn't afford the item anyway
pub fn plan_claim(reward: &Reward, user: &UserAccount) -> LedgerResult<ClaimPlan> {
    if reward.stock_available <= 0 {
        return Err(LedgerError::OutOfStock(reward.name.clone()));
    }

    if user.points < reward.points_required {
        return Err(LedgerError::InsufficientPoints {
            required: reward.points_required,
            available: user.points,
        });
    }

    Ok(ClaimPlan {
        points_after: user.points - reward.points_required,
        stock_after: reward.stock_available - 1,
    })
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewReward {
    pub name: Option<String>,
    pub points_required: Option<i64>,
    #[serde(default)]
    pub stock_available: i32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RestockRequest {
    pub amount: Option<i32>,
}

pub fn validate_reward(req: NewReward, now: DateTime<Utc>) -> LedgerResult<Reward> {
    let name = required_str(req.name, "name")?;
    let points_required = required(req.points_required, "pointsRequired")?;

    if points_required < 0 || req.stock_available < 0 {
        return Err(LedgerError::InvalidInput(String::from(
            "reward cost and stock must not be negative",
        )));
    }

    Ok(Reward {
        id: new_id(),
        name,
        points_required,
        stock_available: req.stock_available,
        created_at: now,
        updated_at: now,
    })
}

impl Ledger {
    #[instrument(skip(self))]
    pub async fn rewards(&self, limit: i64, offset: i64) -> LedgerResult<Vec<Reward>> {
        Ok(RewardRepository::new(self.pool)
            .get_by_range(limit, offset)
            .await?)
    }

    #[instrument(skip(self))]
    pub async fn claim_reward(&self, reward_id: &str, req: ClaimRequest) -> LedgerResult<ClaimOutcome> {
        let user_id = required(req.user_id, "userId")?;

        let mut tx = Tx::begin(self.pool).await?;

        let reward = RewardRepository::lock(&mut tx, reward_id)
            .await?
            .ok_or_else(|| LedgerError::RewardNotFound(reward_id.to_string()))?;
        let user = UserRepository::lock(&mut tx, &user_id)
            .await?
            .ok_or_else(|| LedgerError::UserNotFound(user_id.clone()))?;

        plan_claim(&reward, &user)?;

        let points = AccountLedger::debit(&mut tx, &user_id, reward.points_required).await?;
        let stock_available = RewardRepository::take_stock(&mut tx, reward_id)
            .await?
            .ok_or_else(|| LedgerError::OutOfStock(reward.name.clone()))?;

        RewardRepository::insert_claim(
            &mut tx,
            &RewardClaim {
                id: new_id(),
                reward_id: reward.id.clone(),
                user_id: user_id.clone(),
                user_name: user.display_name.clone(),
                claimed_at: Utc::now(),
            },
        )
        .await?;

        tx.commit().await?;

        tracing::info!(
            reward = reward.name,
            user = %user_id,
            points,
            stock_available,
            "reward claimed"
        );

        Ok(ClaimOutcome {
            message: format!("{} claimed", reward.name),
            reward_id: reward.id,
            user_id,
            points_spent: reward.points_required,
            points,
            stock_available,
        })
    }

    #[instrument(skip(self))]
    pub async fn reward_claims(&self, reward_id: &str) -> LedgerResult<Vec<RewardClaim>> {
        let repo = RewardRepository::new(self.pool);
        if !repo.exists(&reward_id.to_string()).await? {
            return Err(LedgerError::RewardNotFound(reward_id.to_string()));
        }

        Ok(repo.claims(reward_id).await?)
    }

    #[instrument(skip(self))]
    pub async fn create_reward(&self, req: NewReward) -> LedgerResult<Reward> {
        let reward = validate_reward(req, Utc::now())?;

        RewardRepository::new(self.pool)
            .insert(&reward)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(db) if db.is_unique_violation() => LedgerError::InvalidInput(
                    format!("a reward named '{}' already exists", reward.name),
                ),
                other => other.into(),
            })?;

        Ok(reward)
    }

    #[instrument(skip(self))]
    pub async fn restock_reward(&self, reward_id: &str, req: RestockRequest) -> LedgerResult<Reward> {
        let amount = required(req.amount, "amount")?;
        if amount <= 0 {
            return Err(LedgerError::InvalidInput(String::from(
                "restock amount must be positive",
            )));
        }

        RewardRepository::new(self.pool)
            .restock(reward_id, amount)
            .await?
            .ok_or_else(|| LedgerError::RewardNotFound(reward_id.to_string()))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::db::models::user::Role;
    use crate::db::models::user::fixture::TestAccount;

    fn t_shirt(stock: i32) -> Reward {
        validate_reward(
            NewReward {
                name: Some(String::from("T-Shirt")),
                points_required: Some(200),
                stock_available: stock,
            },
            Utc::now(),
        )
        .unwrap()
    }

    #[test]
    fn test_t_shirt_scenario() {
        let mut reward = t_shirt(1);
        let a = UserAccount::generate_test_account(Role::Consumer, 150);
        let b = UserAccount::generate_test_account(Role::Consumer, 250);

        let err = plan_claim(&reward, &a).unwrap_err();
        assert!(matches!(
            err,
            LedgerError::InsufficientPoints {
                required: 200,
                available: 150
            }
        ));
        assert_eq!(reward.stock_available, 1);

        let plan = plan_claim(&reward, &b).unwrap();
        assert_eq!(plan.stock_after, 0);
        assert_eq!(plan.points_after, 50);

        reward.stock_available = plan.stock_after;
        assert!(matches!(
            plan_claim(&reward, &b),
            Err(LedgerError::OutOfStock(name)) if name == "T-Shirt"
        ));
    }

    #[test]
    fn test_exact_balance_is_enough() {
        let reward = t_shirt(3);
        let user = UserAccount::generate_test_account(Role::Consumer, 200);

        assert_eq!(
            plan_claim(&reward, &user).unwrap(),
            ClaimPlan {
                points_after: 0,
                stock_after: 2
            }
        );
    }

    #[test]
    fn test_validate_reward() {
        assert!(matches!(
            validate_reward(NewReward::default(), Utc::now()),
            Err(LedgerError::MissingField("name"))
        ));

        let negative = NewReward {
            name: Some(String::from("Mug")),
            points_required: Some(-1),
            stock_available: 2,
        };
        assert!(matches!(
            validate_reward(negative, Utc::now()),
            Err(LedgerError::InvalidInput(_))
        ));
    }
}
