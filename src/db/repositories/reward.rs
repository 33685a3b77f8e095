use sqlx::{Pool, Postgres, Result as SqlxResult};
use tracing::instrument;

use super::sql_fragment;
use crate::db::models::reward::{Reward, RewardClaim};
use crate::db::prelude::Tx;
use crate::db::repositories::Repository;

#[derive(Debug)]
pub struct RewardRepository {
    pool: &'static Pool<Postgres>,
}

#[async_trait::async_trait]
impl Repository for RewardRepository {
    type Ident = String;
    type Output = Reward;

    const BASE_FIELDS: &'static str = sql_fragment::REWARD_FIELDS;
    const TABLE_NAME: &'static str = "reward";
    const ORDER_BY: &'static str = "points_required ASC, name ASC";

    fn new(pool: &'static Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn pool(&self) -> &'static Pool<Postgres> {
        self.pool
    }
}

impl RewardRepository {
    #[instrument(skip(self, item), fields(name = item.name))]
    pub async fn insert(&self, item: &Reward) -> SqlxResult<()> {
        sqlx::query(
            r#"
            INSERT INTO reward (
                id,
                name,
                points_required,
                stock_available,
                created_at,
                updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(&item.id)
        .bind(&item.name)
        .bind(item.points_required)
        .bind(item.stock_available)
        .bind(item.created_at)
        .bind(item.updated_at)
        .execute(self.pool)
        .await
        .inspect_err(|e| tracing::error!(error = ?e, "failure during reward insertion"))?;

        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn restock(&self, id: &str, amount: i32) -> SqlxResult<Option<Reward>> {
        sqlx::query_as::<_, Reward>(&format!(
            r#"
            UPDATE reward
            SET stock_available = stock_available + $2,
                updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            sql_fragment::REWARD_FIELDS
        ))
        .bind(id)
        .bind(amount)
        .fetch_optional(self.pool)
        .await
    }

    #[instrument(skip(self))]
    pub async fn claims(&self, reward_id: &str) -> SqlxResult<Vec<RewardClaim>> {
        sqlx::query_as::<_, RewardClaim>(
            r#"
            SELECT id, reward_id, user_id, user_name, claimed_at
            FROM reward_claim
            WHERE reward_id = $1
            ORDER BY claimed_at ASC
            "#,
        )
        .bind(reward_id)
        .fetch_all(self.pool)
        .await
    }

    #[instrument(skip(tx))]
    pub async fn lock(tx: &mut Tx<'_>, id: &str) -> SqlxResult<Option<Reward>> {
        sqlx::query_as::<_, Reward>(&format!(
            "SELECT {} FROM reward WHERE id = $1 FOR UPDATE",
            sql_fragment::REWARD_FIELDS
        ))
        .bind(id)
        .fetch_optional(tx.conn()?)
        .await
    }

    /// Takes one unit of stock if any is left, returning the new stock level
    #[instrument(skip(tx))]
    pub async fn take_stock(tx: &mut Tx<'_>, id: &str) -> SqlxResult<Option<i32>> {
        sqlx::query_scalar::<_, i32>(
            r#"
            UPDATE reward
            SET stock_available = stock_available - 1,
                updated_at = NOW()
            WHERE id = $1
            AND stock_available > 0
            RETURNING stock_available
            "#,
        )
        .bind(id)
        .fetch_optional(tx.conn()?)
        .await
    }

    #[instrument(skip(tx, claim), fields(reward = claim.reward_id, user = %claim.user_id))]
    pub async fn insert_claim(tx: &mut Tx<'_>, claim: &RewardClaim) -> SqlxResult<()> {
        sqlx::query(
            r#"
            INSERT INTO reward_claim (
                id,
                reward_id,
                user_id,
                user_name,
                claimed_at
            )
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(&claim.id)
        .bind(&claim.reward_id)
        .bind(&claim.user_id)
        .bind(&claim.user_name)
        .bind(claim.claimed_at)
        .execute(tx.conn()?)
        .await?;

        Ok(())
    }
}
