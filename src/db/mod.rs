use std::sync::LazyLock;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::instrument;

use crate::util::env;
use crate::util::env::Var;
use crate::var;

pub mod models;
pub mod pubsub;
pub mod repositories;

pub mod prelude {
    pub use crate::db::PgError;
    pub use crate::db::db_pool;

    pub use crate::db::models::counter::{DailyCounter, Feature};
    pub use crate::db::models::flash_promo::FlashPromo;
    pub use crate::db::models::game::{Game, GameType, Prize, PrizeKind};
    pub use crate::db::models::promo::{PromoCode, PromoRedemption};
    pub use crate::db::models::reward::{Reward, RewardClaim};
    pub use crate::db::models::user::{Role, UserAccount, UserId, Verification};

    pub use crate::db::repositories::Repository;
    pub use crate::db::repositories::Tx;
    pub use crate::db::repositories::counter::CounterRepository;
    pub use crate::db::repositories::flash_promo::FlashPromoRepository;
    pub use crate::db::repositories::game::GameRepository;
    pub use crate::db::repositories::promo::PromoCodeRepository;
    pub use crate::db::repositories::reward::RewardRepository;
    pub use crate::db::repositories::user::UserRepository;
}

static DB_POOL: LazyLock<OnceCell<Db>> = LazyLock::new(OnceCell::new);
pub async fn db_pool() -> PgResult<&'static PgPool> {
    Ok(&DB_POOL
        .get_or_try_init(|| async { Db::new_pool().await })
        .await?
        .pool)
}

struct Db {
    pool: PgPool,
}

impl Db {
    #[instrument]
    pub async fn new_pool() -> PgResult<Self> {
        let db_url = var!(Var::DatabaseUrl).await?;
        let pool = PgPoolOptions::new()
            .max_connections(20)
            .connect(db_url)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;
        tracing::info!("database migrations applied");

        Ok(Self { pool })
    }
}

pub type PgResult<T> = core::result::Result<T, PgError>;

#[allow(clippy::enum_variant_names)]
#[derive(Debug, Error)]
pub enum PgError {
    #[error(transparent)]
    SqlxError(#[from] sqlx::Error),

    #[error(transparent)]
    MigrateError(#[from] sqlx::migrate::MigrateError),

    #[error("{0}")]
    EnvError(#[from] env::EnvErr),
}
