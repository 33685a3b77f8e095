use sqlx::{Pool, Postgres, Result as SqlxResult};
use tracing::instrument;

use super::sql_fragment;
use crate::db::models::counter::{DailyCounter, Feature};
use crate::db::models::user::UserId;
use crate::db::prelude::Tx;

#[derive(Debug)]
pub struct CounterRepository {
    pool: &'static Pool<Postgres>,
}

impl CounterRepository {
    pub fn new(pool: &'static Pool<Postgres>) -> Self {
        Self { pool }
    }

    #[instrument(skip(self))]
    pub async fn get(&self, user_id: &UserId, feature: Feature) -> SqlxResult<Option<DailyCounter>> {
        sqlx::query_as::<_, DailyCounter>(&format!(
            "SELECT {} FROM daily_counter WHERE user_id = $1 AND feature = $2",
            sql_fragment::COUNTER_FIELDS
        ))
        .bind(user_id)
        .bind(feature.as_str())
        .fetch_optional(self.pool)
        .await
    }

    #[instrument(skip(self))]
    pub async fn get_all(&self, user_id: &UserId) -> SqlxResult<Vec<DailyCounter>> {
        sqlx::query_as::<_, DailyCounter>(&format!(
            "SELECT {} FROM daily_counter WHERE user_id = $1 ORDER BY feature",
            sql_fragment::COUNTER_FIELDS
        ))
        .bind(user_id)
        .fetch_all(self.pool)
        .await
    }

    /// Row-locks the counter so two requests can't both spend the last play
    #[instrument(skip(tx))]
    pub async fn lock(
        tx: &mut Tx<'_>,
        user_id: &UserId,
        feature: Feature,
    ) -> SqlxResult<Option<DailyCounter>> {
        sqlx::query_as::<_, DailyCounter>(&format!(
            "SELECT {} FROM daily_counter WHERE user_id = $1 AND feature = $2 FOR UPDATE",
            sql_fragment::COUNTER_FIELDS
        ))
        .bind(user_id)
        .bind(feature.as_str())
        .fetch_optional(tx.conn()?)
        .await
    }

    #[instrument(skip(tx, counter), fields(user = %counter.user_id, feature = %counter.feature))]
    pub async fn save(tx: &mut Tx<'_>, counter: &DailyCounter) -> SqlxResult<()> {
        sqlx::query(
            r#"
            INSERT INTO daily_counter (
                user_id,
                feature,
                remaining,
                used,
                last_reset,
                limit_reached
            )
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (user_id, feature)
            DO UPDATE SET
                remaining = EXCLUDED.remaining,
                used = EXCLUDED.used,
                last_reset = EXCLUDED.last_reset,
                limit_reached = EXCLUDED.limit_reached
            "#,
        )
        .bind(&counter.user_id)
        .bind(counter.feature.as_str())
        .bind(counter.remaining)
        .bind(counter.used)
        .bind(counter.last_reset)
        .bind(counter.limit_reached)
        .execute(tx.conn()?)
        .await?;

        Ok(())
    }
}
