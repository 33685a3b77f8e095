use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres, Result as SqlxResult};
use tracing::instrument;

use super::sql_fragment;
use crate::db::models::flash_promo::FlashPromo;
use crate::db::models::user::UserId;
use crate::db::prelude::Tx;
use crate::db::repositories::Repository;

#[derive(Debug)]
pub struct FlashPromoRepository {
    pool: &'static Pool<Postgres>,
}

#[async_trait::async_trait]
impl Repository for FlashPromoRepository {
    type Ident = String;
    type Output = FlashPromo;

    const BASE_FIELDS: &'static str = sql_fragment::FLASH_PROMO_FIELDS;
    const TABLE_NAME: &'static str = "flash_promo";
    const ORDER_BY: &'static str = "starts_at DESC";

    fn new(pool: &'static Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn pool(&self) -> &'static Pool<Postgres> {
        self.pool
    }
}

impl FlashPromoRepository {
    #[instrument(skip(self, item), fields(name = item.name))]
    pub async fn insert(&self, item: &FlashPromo) -> SqlxResult<()> {
        sqlx::query(
            r#"
            INSERT INTO flash_promo (
                id,
                name,
                multiplier,
                starts_at,
                ends_at,
                is_active,
                max_participants,
                current_participants,
                created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, 0, $8)
            "#,
        )
        .bind(&item.id)
        .bind(&item.name)
        .bind(item.multiplier)
        .bind(item.starts_at)
        .bind(item.ends_at)
        .bind(item.is_active)
        .bind(item.max_participants)
        .bind(item.created_at)
        .execute(self.pool)
        .await
        .inspect_err(|e| tracing::error!(error = ?e, "failure during flash promo insertion"))?;

        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn live(&self, now: DateTime<Utc>) -> SqlxResult<Vec<FlashPromo>> {
        sqlx::query_as::<_, FlashPromo>(&format!(
            r#"
            SELECT {} FROM flash_promo
            WHERE is_active
            AND starts_at <= $1
            AND ends_at >= $1
            ORDER BY ends_at ASC
            "#,
            sql_fragment::FLASH_PROMO_FIELDS
        ))
        .bind(now)
        .fetch_all(self.pool)
        .await
    }

    #[instrument(skip(self))]
    pub async fn exclude(&self, promo_id: &str, user_id: &UserId) -> SqlxResult<bool> {
        let res = sqlx::query(
            r#"
            INSERT INTO flash_promo_exclusion (promo_id, user_id)
            VALUES ($1, $2)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(promo_id)
        .bind(user_id)
        .execute(self.pool)
        .await?;

        Ok(res.rows_affected() == 1)
    }

    /// Live promos `user_id` is not excluded from
    #[instrument(skip(tx))]
    pub async fn live_for_user(
        tx: &mut Tx<'_>,
        user_id: &UserId,
        now: DateTime<Utc>,
    ) -> SqlxResult<Vec<FlashPromo>> {
        sqlx::query_as::<_, FlashPromo>(&format!(
            r#"
            SELECT {} FROM flash_promo p
            WHERE p.is_active
            AND p.starts_at <= $2
            AND p.ends_at >= $2
            AND NOT EXISTS (
                SELECT 1 FROM flash_promo_exclusion e
                WHERE e.promo_id = p.id
                AND e.user_id = $1
            )
            "#,
            sql_fragment::FLASH_PROMO_FIELDS
        ))
        .bind(user_id)
        .bind(now)
        .fetch_all(tx.conn()?)
        .await
    }

    #[instrument(skip(tx))]
    pub async fn lock(tx: &mut Tx<'_>, id: &str) -> SqlxResult<Option<FlashPromo>> {
        sqlx::query_as::<_, FlashPromo>(&format!(
            "SELECT {} FROM flash_promo WHERE id = $1 FOR UPDATE",
            sql_fragment::FLASH_PROMO_FIELDS
        ))
        .bind(id)
        .fetch_optional(tx.conn()?)
        .await
    }

    #[instrument(skip(tx))]
    pub async fn is_participant(tx: &mut Tx<'_>, id: &str, user_id: &UserId) -> SqlxResult<bool> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM flash_promo_participant WHERE promo_id = $1 AND user_id = $2)",
        )
        .bind(id)
        .bind(user_id)
        .fetch_one(tx.conn()?)
        .await
    }

    /// Adds the participant and bumps the count while there is room; `None` when full or
    /// already joined
    #[instrument(skip(tx))]
    pub async fn join(tx: &mut Tx<'_>, id: &str, user_id: &UserId) -> SqlxResult<Option<i32>> {
        let inserted = sqlx::query(
            r#"
            INSERT INTO flash_promo_participant (promo_id, user_id, joined_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(id)
        .bind(user_id)
        .execute(tx.conn()?)
        .await?
        .rows_affected();

        if inserted == 0 {
            return Ok(None);
        }

        sqlx::query_scalar::<_, i32>(
            r#"
            UPDATE flash_promo
            SET current_participants = current_participants + 1
            WHERE id = $1
            AND current_participants < max_participants
            RETURNING current_participants
            "#,
        )
        .bind(id)
        .fetch_optional(tx.conn()?)
        .await
    }
}
