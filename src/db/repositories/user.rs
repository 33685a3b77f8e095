use sqlx::{Pool, Postgres, Result as SqlxResult};
use tracing::instrument;

use super::sql_fragment;
use crate::db::models::user::{UserAccount, UserId, Verification};
use crate::db::prelude::Tx;
use crate::db::repositories::Repository;

#[derive(Debug)]
pub struct UserRepository {
    pool: &'static Pool<Postgres>,
}

#[async_trait::async_trait]
impl Repository for UserRepository {
    type Ident = UserId;
    type Output = UserAccount;

    const BASE_FIELDS: &'static str = sql_fragment::USER_FIELDS;
    const TABLE_NAME: &'static str = "app_user";

    fn new(pool: &'static Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn pool(&self) -> &'static Pool<Postgres> {
        self.pool
    }
}

impl UserRepository {
    #[instrument(skip(self, item), fields(email = item.email))]
    pub async fn insert(&self, item: &UserAccount) -> SqlxResult<()> {
        sqlx::query(
            r#"
            INSERT INTO app_user (
                id,
                email,
                password_hash,
                display_name,
                role,
                shop_name,
                verification,
                rank,
                points,
                free_spins,
                created_at,
                updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(&item.id)
        .bind(&item.email)
        .bind(&item.password_hash)
        .bind(&item.display_name)
        .bind(item.role.as_str())
        .bind(&item.shop_name)
        .bind(item.verification.as_str())
        .bind(item.rank.as_str())
        .bind(item.points)
        .bind(item.free_spins)
        .bind(item.created_at)
        .bind(item.updated_at)
        .execute(self.pool)
        .await
        .inspect_err(|e| tracing::error!(error = ?e, "failure during user insertion"))?;

        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn get_by_email(&self, email: &str) -> SqlxResult<Option<UserAccount>> {
        sqlx::query_as::<_, UserAccount>(&format!(
            "SELECT {} FROM app_user WHERE lower(email) = lower($1)",
            sql_fragment::USER_FIELDS
        ))
        .bind(email)
        .fetch_optional(self.pool)
        .await
    }

    #[instrument(skip(self))]
    pub async fn set_verification(
        &self,
        id: &UserId,
        verification: Verification,
    ) -> SqlxResult<Option<UserAccount>> {
        sqlx::query_as::<_, UserAccount>(&format!(
            r#"
            UPDATE app_user
            SET verification = $2,
                updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            sql_fragment::USER_FIELDS
        ))
        .bind(id)
        .bind(verification.as_str())
        .fetch_optional(self.pool)
        .await
    }

    /// Row-locks the account for the rest of the transaction
    #[instrument(skip(tx))]
    pub async fn lock(tx: &mut Tx<'_>, id: &UserId) -> SqlxResult<Option<UserAccount>> {
        sqlx::query_as::<_, UserAccount>(&format!(
            "SELECT {} FROM app_user WHERE id = $1 FOR UPDATE",
            sql_fragment::USER_FIELDS
        ))
        .bind(id)
        .fetch_optional(tx.conn()?)
        .await
    }

    /// Unlocked lookup; the row itself is locked afterwards with the rest of a settlement's accounts
    #[instrument(skip(tx))]
    pub async fn id_by_shop_name(tx: &mut Tx<'_>, shop_name: &str) -> SqlxResult<Option<UserId>> {
        sqlx::query_scalar::<_, UserId>("SELECT id FROM app_user WHERE shop_name = $1")
            .bind(shop_name)
            .fetch_optional(tx.conn()?)
            .await
    }

    /// Adds `amount` to the balance, returning the new balance if the account exists
    #[instrument(skip(tx))]
    pub async fn credit_points(
        tx: &mut Tx<'_>,
        id: &UserId,
        amount: i64,
    ) -> SqlxResult<Option<i64>> {
        sqlx::query_scalar::<_, i64>(
            r#"
            UPDATE app_user
            SET points = points + $2,
                updated_at = NOW()
            WHERE id = $1
            RETURNING points
            "#,
        )
        .bind(id)
        .bind(amount)
        .fetch_optional(tx.conn()?)
        .await
    }

    /// Subtracts `amount` only if the balance covers it; `None` means missing account or short
    /// balance
    #[instrument(skip(tx))]
    pub async fn debit_points(
        tx: &mut Tx<'_>,
        id: &UserId,
        amount: i64,
    ) -> SqlxResult<Option<i64>> {
        sqlx::query_scalar::<_, i64>(
            r#"
            UPDATE app_user
            SET points = points - $2,
                updated_at = NOW()
            WHERE id = $1
            AND points >= $2
            RETURNING points
            "#,
        )
        .bind(id)
        .bind(amount)
        .fetch_optional(tx.conn()?)
        .await
    }

    #[instrument(skip(tx))]
    pub async fn add_free_spins(tx: &mut Tx<'_>, id: &UserId, count: i32) -> SqlxResult<Option<i32>> {
        sqlx::query_scalar::<_, i32>(
            r#"
            UPDATE app_user
            SET free_spins = free_spins + $2,
                updated_at = NOW()
            WHERE id = $1
            RETURNING free_spins
            "#,
        )
        .bind(id)
        .bind(count)
        .fetch_optional(tx.conn()?)
        .await
    }

    /// Consumes one free-spin token if the user holds any
    #[instrument(skip(tx))]
    pub async fn take_free_spin(tx: &mut Tx<'_>, id: &UserId) -> SqlxResult<Option<i32>> {
        sqlx::query_scalar::<_, i32>(
            r#"
            UPDATE app_user
            SET free_spins = free_spins - 1,
                updated_at = NOW()
            WHERE id = $1
            AND free_spins > 0
            RETURNING free_spins
            "#,
        )
        .bind(id)
        .fetch_optional(tx.conn()?)
        .await
    }
}
