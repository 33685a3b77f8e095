use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres, Result as SqlxResult};
use tracing::instrument;

use super::sql_fragment;
use crate::db::models::promo::{PromoCode, PromoRedemption};
use crate::db::models::user::UserId;
use crate::db::prelude::Tx;
use crate::db::repositories::Repository;

#[derive(Debug)]
pub struct PromoCodeRepository {
    pool: &'static Pool<Postgres>,
}

#[async_trait::async_trait]
impl Repository for PromoCodeRepository {
    type Ident = String;
    type Output = PromoCode;

    const BASE_FIELDS: &'static str = sql_fragment::PROMO_CODE_FIELDS;
    const TABLE_NAME: &'static str = "promo_code";
    const ID_COLUMN: &'static str = "code";

    fn new(pool: &'static Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn pool(&self) -> &'static Pool<Postgres> {
        self.pool
    }
}

impl PromoCodeRepository {
    /// Inserts codes that don't exist yet, returning how many were new
    #[instrument(skip(tx, codes), fields(count = codes.len()))]
    pub async fn insert_many(tx: &mut Tx<'_>, codes: &[(String, i64)]) -> SqlxResult<u64> {
        let mut inserted = 0;
        for (code, points) in codes {
            inserted += sqlx::query(
                r#"
                INSERT INTO promo_code (code, points, created_at)
                VALUES ($1, $2, NOW())
                ON CONFLICT (code)
                DO NOTHING
                "#,
            )
            .bind(code)
            .bind(points)
            .execute(tx.conn()?)
            .await
            .inspect_err(|e| tracing::error!(error = ?e, code, "promo code insert failure"))?
            .rows_affected();
        }

        Ok(inserted)
    }

    #[instrument(skip(self))]
    pub async fn delete_redeemed(&self) -> SqlxResult<u64> {
        Ok(sqlx::query("DELETE FROM promo_code WHERE redeemed_at IS NOT NULL")
            .execute(self.pool)
            .await?
            .rows_affected())
    }

    #[instrument(skip(self, codes), fields(count = codes.len()))]
    pub async fn delete_many(&self, codes: &[String]) -> SqlxResult<u64> {
        Ok(sqlx::query("DELETE FROM promo_code WHERE code = ANY($1)")
            .bind(codes)
            .execute(self.pool)
            .await?
            .rows_affected())
    }

    #[instrument(skip(tx))]
    pub async fn lock(tx: &mut Tx<'_>, code: &str) -> SqlxResult<Option<PromoCode>> {
        sqlx::query_as::<_, PromoCode>(&format!(
            "SELECT {} FROM promo_code WHERE code = $1 FOR UPDATE",
            sql_fragment::PROMO_CODE_FIELDS
        ))
        .bind(code)
        .fetch_optional(tx.conn()?)
        .await
    }

    /// One-way transition to redeemed. Returns `false` if someone else got there first.
    #[instrument(skip(tx))]
    pub async fn mark_redeemed(
        tx: &mut Tx<'_>,
        code: &str,
        consumer: &UserId,
        retailer: &UserId,
        shop_name: &str,
        at: DateTime<Utc>,
    ) -> SqlxResult<bool> {
        let res = sqlx::query(
            r#"
            UPDATE promo_code
            SET redeemed_by_consumer = $2,
                redeemed_by_retailer = $3,
                shop_name = $4,
                redeemed_at = $5
            WHERE code = $1
            AND redeemed_at IS NULL
            "#,
        )
        .bind(code)
        .bind(consumer)
        .bind(retailer)
        .bind(shop_name)
        .bind(at)
        .execute(tx.conn()?)
        .await?;

        Ok(res.rows_affected() == 1)
    }

    #[instrument(skip(tx, entry), fields(user = %entry.user_id, code = entry.code))]
    pub async fn insert_redemption(tx: &mut Tx<'_>, entry: &PromoRedemption) -> SqlxResult<()> {
        sqlx::query(
            r#"
            INSERT INTO promo_redemption (
                id,
                user_id,
                code,
                shop_name,
                points,
                redeemed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(&entry.id)
        .bind(&entry.user_id)
        .bind(&entry.code)
        .bind(&entry.shop_name)
        .bind(entry.points)
        .bind(entry.redeemed_at)
        .execute(tx.conn()?)
        .await?;

        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn history(
        &self,
        user_id: &UserId,
        limit: i64,
        offset: i64,
    ) -> SqlxResult<(Vec<PromoRedemption>, i64)> {
        let items = sqlx::query_as::<_, PromoRedemption>(
            r#"
            SELECT id, user_id, code, shop_name, points, redeemed_at
            FROM promo_redemption
            WHERE user_id = $1
            ORDER BY redeemed_at DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(self.pool)
        .await?;

        let total = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM promo_redemption WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_one(self.pool)
        .await?;

        Ok((items, total))
    }
}
