use sqlx::types::Json;
use sqlx::{Pool, Postgres, Result as SqlxResult};
use tracing::instrument;

use super::sql_fragment;
use crate::db::models::game::{Game, GameType};
use crate::db::prelude::Tx;
use crate::db::repositories::Repository;

#[derive(Debug)]
pub struct GameRepository {
    pool: &'static Pool<Postgres>,
}

#[async_trait::async_trait]
impl Repository for GameRepository {
    type Ident = String;
    type Output = Game;

    const BASE_FIELDS: &'static str = sql_fragment::GAME_FIELDS;
    const TABLE_NAME: &'static str = "game";

    fn new(pool: &'static Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn pool(&self) -> &'static Pool<Postgres> {
        self.pool
    }
}

fn featured_query() -> String {
    format!(
        "SELECT {} FROM game {}",
        sql_fragment::GAME_FIELDS,
        sql_fragment::FEATURED_GAME_FILTER
    )
}

impl GameRepository {
    #[instrument(skip(self))]
    pub async fn featured(&self, game_type: GameType) -> SqlxResult<Option<Game>> {
        sqlx::query_as::<_, Game>(&featured_query())
        .bind(game_type.as_str())
        .fetch_optional(self.pool)
        .await
    }

    /// Featured game for a play; shares the settlement transaction
    #[instrument(skip(tx))]
    pub async fn featured_in_tx(tx: &mut Tx<'_>, game_type: GameType) -> SqlxResult<Option<Game>> {
        sqlx::query_as::<_, Game>(&featured_query())
        .bind(game_type.as_str())
        .fetch_optional(tx.conn()?)
        .await
    }

    #[instrument(skip(self, game), fields(id = game.id, game_type = %game.game_type))]
    pub async fn upsert(&self, game: &Game) -> SqlxResult<Game> {
        sqlx::query_as::<_, Game>(&format!(
            r#"
            INSERT INTO game (
                id,
                game_type,
                name,
                cost,
                prizes,
                featured,
                created_at,
                updated_at
            )
            VALUES ($1, $2, $3, $4, $5, FALSE, NOW(), NOW())
            ON CONFLICT (id)
            DO UPDATE SET
                game_type = EXCLUDED.game_type,
                name = EXCLUDED.name,
                cost = EXCLUDED.cost,
                prizes = EXCLUDED.prizes,
                updated_at = NOW()
            RETURNING {}
            "#,
            sql_fragment::GAME_FIELDS
        ))
        .bind(&game.id)
        .bind(game.game_type.as_str())
        .bind(&game.name)
        .bind(game.cost)
        .bind(Json(&game.prizes.0))
        .fetch_one(self.pool)
        .await
    }

    /// Features `id` and un-features every other game of the same type
    #[instrument(skip(tx))]
    pub async fn set_featured(tx: &mut Tx<'_>, id: &str) -> SqlxResult<Option<Game>> {
        let game_type = sqlx::query_scalar::<_, String>(
            "SELECT game_type FROM game WHERE id = $1 FOR UPDATE",
        )
        .bind(id)
        .fetch_optional(tx.conn()?)
        .await?;

        let Some(game_type) = game_type else {
            return Ok(None);
        };

        sqlx::query("UPDATE game SET featured = FALSE, updated_at = NOW() WHERE game_type = $1 AND id <> $2")
            .bind(&game_type)
            .bind(id)
            .execute(tx.conn()?)
            .await?;

        sqlx::query_as::<_, Game>(&format!(
            "UPDATE game SET featured = TRUE, updated_at = NOW() WHERE id = $1 RETURNING {}",
            sql_fragment::GAME_FIELDS
        ))
        .bind(id)
        .fetch_optional(tx.conn()?)
        .await
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_featured_query_selects_one_game_of_the_type() {
        let sql = featured_query();

        assert!(sql.contains("FROM game"));
        assert!(sql.contains("game_type = $1"));
        assert!(sql.contains("AND featured"));
        assert!(sql.contains("LIMIT 1"));
    }
}
