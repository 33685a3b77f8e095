//! The only code allowed to change a balance.
//!
//! Every mutation is a single conditional `UPDATE ... RETURNING points`, so concurrent requests
//! against the same account can't lose each other's writes.

use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::db::prelude::{Tx, UserRepository};
use crate::db::models::user::{UserAccount, UserId};
use crate::db::pubsub::{BalanceNotification, NotifyReason};
use crate::ledger::{Ledger, LedgerError, LedgerResult, required};

pub struct AccountLedger;

/// Order in which a settlement touching several accounts takes their row locks
pub fn lock_order<'a>(ids: &[&'a UserId]) -> Vec<&'a UserId> {
    let mut ordered = ids.to_vec();
    ordered.sort_by(|a, b| a.0.cmp(&b.0));
    ordered.dedup();
    ordered
}

impl AccountLedger {
    /// Locks every listed account in ascending id order, so two settlements sharing a pair of
    /// accounts always queue on the same row first. Results line up with `ids`.
    #[instrument(skip(tx))]
    pub async fn lock_all(
        tx: &mut Tx<'_>,
        ids: &[&UserId],
    ) -> LedgerResult<Vec<Option<UserAccount>>> {
        let mut locked = Vec::with_capacity(ids.len());
        for id in lock_order(ids) {
            if let Some(account) = UserRepository::lock(tx, id).await? {
                locked.push(account);
            }
        }

        Ok(ids
            .iter()
            .map(|id| locked.iter().find(|a| &a.id == *id).cloned())
            .collect())
    }

    #[instrument(skip(tx))]
    pub async fn credit(tx: &mut Tx<'_>, user_id: &UserId, amount: i64) -> LedgerResult<i64> {
        if amount < 0 {
            return Err(LedgerError::InvalidInput(format!(
                "credit amount must not be negative (got {amount})"
            )));
        }

        UserRepository::credit_points(tx, user_id, amount)
            .await?
            .ok_or_else(|| LedgerError::UserNotFound(user_id.clone()))
    }

    #[instrument(skip(tx))]
    pub async fn debit(tx: &mut Tx<'_>, user_id: &UserId, amount: i64) -> LedgerResult<i64> {
        if amount < 0 {
            return Err(LedgerError::InvalidInput(format!(
                "debit amount must not be negative (got {amount})"
            )));
        }

        if let Some(points) = UserRepository::debit_points(tx, user_id, amount).await? {
            return Ok(points);
        }

        // the conditional update touched nothing; work out which precondition failed
        match UserRepository::lock(tx, user_id).await? {
            Some(account) => Err(LedgerError::InsufficientPoints {
                required: amount,
                available: account.points,
            }),
            None => Err(LedgerError::UserNotFound(user_id.clone())),
        }
    }

    /// Moves `amount` from one account to another, returning both new balances
    #[instrument(skip(tx))]
    pub async fn transfer(
        tx: &mut Tx<'_>,
        from: &UserId,
        to: &UserId,
        amount: i64,
    ) -> LedgerResult<(i64, i64)> {
        if from == to {
            return Err(LedgerError::InvalidInput(String::from(
                "cannot transfer points to the same account",
            )));
        }

        Self::lock_all(tx, &[from, to]).await?;

        let from_points = Self::debit(tx, from, amount).await?;
        let to_points = Self::credit(tx, to, amount).await?;

        Ok((from_points, to_points))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdjustRequest {
    pub user_id: Option<UserId>,
    /// Positive credits, negative debits
    pub delta: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRequest {
    pub from: Option<UserId>,
    pub to: Option<UserId>,
    pub amount: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceChange {
    pub user_id: UserId,
    pub points: i64,
    pub delta: i64,
}

impl BalanceChange {
    pub fn notification(&self, reason: NotifyReason) -> BalanceNotification {
        BalanceNotification {
            user_id: self.user_id.clone(),
            points: self.points,
            delta: self.delta,
            reason,
        }
    }
}

impl Ledger {
    #[instrument(skip(self))]
    pub async fn adjust_points(&self, req: AdjustRequest) -> LedgerResult<BalanceChange> {
        let user_id = required(req.user_id, "userId")?;
        let delta = required(req.delta, "delta")?;

        let mut tx = Tx::begin(self.pool).await?;
        let points = if delta >= 0 {
            AccountLedger::credit(&mut tx, &user_id, delta).await?
        } else {
            AccountLedger::debit(&mut tx, &user_id, -delta).await?
        };
        tx.commit().await?;

        tracing::info!(user = %user_id, delta, points, "balance adjusted");
        Ok(BalanceChange {
            user_id,
            points,
            delta,
        })
    }

    #[instrument(skip(self))]
    pub async fn transfer_points(&self, req: TransferRequest) -> LedgerResult<Vec<BalanceChange>> {
        let from = required(req.from, "from")?;
        let to = required(req.to, "to")?;
        let amount = required(req.amount, "amount")?;

        if amount <= 0 {
            return Err(LedgerError::InvalidInput(String::from(
                "transfer amount must be positive",
            )));
        }

        let mut tx = Tx::begin(self.pool).await?;
        let (from_points, to_points) = AccountLedger::transfer(&mut tx, &from, &to, amount).await?;
        tx.commit().await?;

        tracing::info!(%from, %to, amount, "points transferred");
        Ok(vec![
            BalanceChange {
                user_id: from,
                points: from_points,
                delta: -amount,
            },
            BalanceChange {
                user_id: to,
                points: to_points,
                delta: amount,
            },
        ])
    }
}
