use core::fmt;

use async_trait::async_trait;
use sqlx::{PgConnection, Pool, Postgres, Result as SqlxResult, Transaction};
use tracing::instrument;

pub mod counter;
pub mod flash_promo;
pub mod game;
pub mod promo;
pub mod reward;
pub mod user;

/// Unit of work for one settlement.
///
/// Dropping a `Tx` without calling `commit` rolls it back, so an early `?` return from a
/// settlement never leaves half the rows written.
pub struct Tx<'a> {
    inner: Option<Transaction<'a, Postgres>>,
}

impl<'a> Tx<'a> {
    #[instrument(skip(pool))]
    pub async fn begin(pool: &'static Pool<Postgres>) -> SqlxResult<Tx<'static>> {
        let inner = pool.begin().await?;
        Ok(Tx { inner: Some(inner) })
    }

    #[instrument(skip(self))]
    pub async fn commit(&mut self) -> SqlxResult<()> {
        if let Some(tx) = self.inner.take() {
            tx.commit().await
        } else {
            Err(sqlx::Error::Protocol(
                "Transaction already completed".into(),
            ))
        }
    }

    /// Connection to run queries against while the transaction is open
    pub fn conn(&mut self) -> SqlxResult<&mut PgConnection> {
        self.inner
            .as_mut()
            .map(|tx| &mut **tx)
            .ok_or_else(|| sqlx::Error::Protocol("Transaction already completed".into()))
    }
}

pub mod sql_fragment {
    pub const USER_FIELDS: &str = r#"
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
    "#;

    pub const COUNTER_FIELDS: &str = r#"
        user_id,
        feature,
        remaining,
        used,
        last_reset,
        limit_reached
    "#;

    pub const PROMO_CODE_FIELDS: &str = r#"
        code,
        points,
        redeemed_by_consumer,
        redeemed_by_retailer,
        shop_name,
        redeemed_at,
        created_at
    "#;

    pub const GAME_FIELDS: &str = r#"
        id,
        game_type,
        name,
        cost,
        prizes,
        featured,
        created_at,
        updated_at
    "#;

    /// Most recently updated featured game of type `$1`
    pub const FEATURED_GAME_FILTER: &str = r#"
        WHERE game_type = $1
        AND featured
        ORDER BY updated_at DESC
        LIMIT 1
    "#;

    pub const REWARD_FIELDS: &str = r#"
        id,
        name,
        points_required,
        stock_available,
        created_at,
        updated_at
    "#;

    pub const FLASH_PROMO_FIELDS: &str = r#"
        id,
        name,
        multiplier,
        starts_at,
        ends_at,
        is_active,
        max_participants,
        current_participants,
        created_at
    "#;
}

/// Read-side helpers shared by every table keyed on a single `id` column
#[async_trait]
pub trait Repository {
    type Ident: for<'q> sqlx::Encode<'q, Postgres> + sqlx::Type<Postgres> + Send + Sync + fmt::Debug;
    type Output: for<'r> sqlx::FromRow<'r, <Postgres as sqlx::Database>::Row>
        + Sized
        + Unpin
        + Send
        + fmt::Debug;

    const BASE_FIELDS: &'static str;
    const TABLE_NAME: &'static str;
    const ID_COLUMN: &'static str = "id";
    const ORDER_BY: &'static str = "created_at DESC";

    fn new(pool: &'static Pool<Postgres>) -> Self
    where
        Self: Sized;

    fn pool(&self) -> &'static Pool<Postgres>;

    #[instrument(skip(self, id))]
    async fn exists(&self, id: &Self::Ident) -> SqlxResult<bool> {
        sqlx::query_scalar::<_, bool>(&format!(
            "SELECT EXISTS (SELECT 1 FROM {} WHERE {} = $1)",
            Self::TABLE_NAME,
            Self::ID_COLUMN
        ))
        .bind(id)
        .fetch_one(self.pool())
        .await
        .inspect_err(|e| {
            tracing::error!(error = ?e, table = ?Self::TABLE_NAME, "failed to check row existence")
        })
    }

    #[instrument(skip(self, id))]
    async fn get_by_id(&self, id: &Self::Ident) -> SqlxResult<Option<Self::Output>> {
        sqlx::query_as::<_, Self::Output>(&format!(
            "SELECT {} FROM {} WHERE {} = $1",
            Self::BASE_FIELDS,
            Self::TABLE_NAME,
            Self::ID_COLUMN
        ))
        .bind(id)
        .fetch_optional(self.pool())
        .await
    }

    #[instrument(skip(self, limit, offset))]
    async fn get_by_range(&self, limit: i64, offset: i64) -> SqlxResult<Vec<Self::Output>> {
        sqlx::query_as::<_, Self::Output>(&format!(
            "SELECT {} FROM {} ORDER BY {} LIMIT $1 OFFSET $2",
            Self::BASE_FIELDS,
            Self::TABLE_NAME,
            Self::ORDER_BY,
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(self.pool())
        .await
    }
}
