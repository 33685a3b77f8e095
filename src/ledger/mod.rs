//! Points & redemption ledger.
//!
//! Every settlement (promo redemption, minigame play, reward claim, flash promo join) runs inside
//! a single postgres transaction. Contested rows are locked `FOR UPDATE` and every balance or stock
//! mutation is a conditional update, so a check that passed can't be invalidated before the write.
//!
//! Each submodule keeps its decision logic in a plain function over already-loaded rows (the
//! "planner") and a thin async method on [`Ledger`] that loads, plans, writes and commits.

use sqlx::PgPool;
use thiserror::Error;

use crate::db::PgError;
use crate::db::models::counter::Feature;
use crate::db::models::game::GameType;
use crate::db::models::user::UserId;
use crate::util::password::PasswordErr;

pub mod account;
pub mod day;
pub mod flash;
pub mod limiter;
pub mod minigame;
pub mod promo;
pub mod reward;
pub mod user;

use day::DayBoundary;
use limiter::DailyLimiter;

/// Entry point for every points-affecting operation
#[derive(Debug, Clone)]
pub struct Ledger {
    pool: &'static PgPool,
    limiter: DailyLimiter,
    starting_points: i64,
}

impl Ledger {
    pub fn new(pool: &'static PgPool, boundary: DayBoundary, starting_points: i64) -> Self {
        Self {
            pool,
            limiter: DailyLimiter::new(boundary),
            starting_points,
        }
    }

    pub fn pool(&self) -> &'static PgPool {
        self.pool
    }
}

/// Coarse error class; decides the response status at the api boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Conflict,
    Validation,
    Internal,
}

impl ErrorKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Validation => "validation",
            ErrorKind::Internal => "internal",
        }
    }
}

pub type LedgerResult<T> = core::result::Result<T, LedgerError>;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("promo code '{0}' does not exist")]
    CodeNotFound(String),

    #[error("user '{0}' does not exist")]
    UserNotFound(UserId),

    #[error("reward '{0}' does not exist")]
    RewardNotFound(String),

    #[error("no featured {0} game is available")]
    GameNotAvailable(GameType),

    #[error("flash promo '{0}' does not exist")]
    PromoNotFound(String),

    #[error("promo code '{0}' has already been redeemed")]
    AlreadyRedeemed(String),

    #[error("daily limit reached for {0}")]
    DailyLimitReached(Feature),

    #[error("reward '{0}' is out of stock")]
    OutOfStock(String),

    #[error("insufficient points: {required} required, {available} available")]
    InsufficientPoints { required: i64, available: i64 },

    #[error("user has already joined flash promo '{0}'")]
    AlreadyJoined(String),

    #[error("flash promo '{0}' is full")]
    PromoFull(String),

    #[error("flash promo '{0}' is not currently active")]
    PromoInactive(String),

    #[error("email address is already registered")]
    EmailTaken,

    #[error("shop name is already registered")]
    ShopNameTaken,

    #[error("missing required field '{0}'")]
    MissingField(&'static str),

    #[error("user is not a valid consumer")]
    InvalidConsumer,

    #[error("shop is not a verified retailer")]
    InvalidRetailer,

    #[error("invalid outcome request: {0}")]
    InvalidOutcomeRequest(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid email or password")]
    InvalidCredentials,

    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Pool(#[from] PgError),

    #[error(transparent)]
    Password(#[from] PasswordErr),
}

impl LedgerError {
    pub fn kind(&self) -> ErrorKind {
        use LedgerError::*;

        match self {
            CodeNotFound(_) | UserNotFound(_) | RewardNotFound(_) | GameNotAvailable(_)
            | PromoNotFound(_) => ErrorKind::NotFound,

            AlreadyRedeemed(_) | DailyLimitReached(_) | OutOfStock(_)
            | InsufficientPoints { .. } | AlreadyJoined(_) | PromoFull(_) | PromoInactive(_)
            | EmailTaken | ShopNameTaken => ErrorKind::Conflict,

            MissingField(_) | InvalidConsumer | InvalidRetailer | InvalidOutcomeRequest(_)
            | InvalidInput(_) | InvalidCredentials => ErrorKind::Validation,

            Database(_) | Pool(_) | Password(_) => ErrorKind::Internal,
        }
    }

    /// Stable machine-checkable name for the failure
    pub fn code(&self) -> &'static str {
        use LedgerError::*;

        match self {
            CodeNotFound(_) => "CodeNotFound",
            UserNotFound(_) => "UserNotFound",
            RewardNotFound(_) => "RewardNotFound",
            GameNotAvailable(_) => "GameNotAvailable",
            PromoNotFound(_) => "PromoNotFound",
            AlreadyRedeemed(_) => "AlreadyRedeemed",
            DailyLimitReached(_) => "DailyLimitReached",
            OutOfStock(_) => "OutOfStock",
            InsufficientPoints { .. } => "InsufficientPoints",
            AlreadyJoined(_) => "AlreadyJoined",
            PromoFull(_) => "PromoFull",
            PromoInactive(_) => "PromoInactive",
            EmailTaken => "EmailTaken",
            ShopNameTaken => "ShopNameTaken",
            MissingField(_) => "MissingField",
            InvalidConsumer => "InvalidConsumer",
            InvalidRetailer => "InvalidRetailer",
            InvalidOutcomeRequest(_) => "InvalidOutcomeRequest",
            InvalidInput(_) => "InvalidInput",
            InvalidCredentials => "InvalidCredentials",
            Database(_) | Pool(_) | Password(_) => "Internal",
        }
    }
}

/// Unwraps a required request field or fails with `MissingField`
pub(crate) fn required<T>(value: Option<T>, name: &'static str) -> LedgerResult<T> {
    value.ok_or(LedgerError::MissingField(name))
}

/// Like [`required`], but also rejects blank strings
pub(crate) fn required_str(value: Option<String>, name: &'static str) -> LedgerResult<String> {
    match value {
        Some(s) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        _ => Err(LedgerError::MissingField(name)),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            LedgerError::CodeNotFound("X".into()).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            LedgerError::DailyLimitReached(Feature::PromoRedemption).kind(),
            ErrorKind::Conflict
        );
        assert_eq!(
            LedgerError::InsufficientPoints {
                required: 200,
                available: 150
            }
            .kind(),
            ErrorKind::Conflict
        );
        assert_eq!(LedgerError::InvalidRetailer.kind(), ErrorKind::Validation);
        assert_eq!(
            LedgerError::Database(sqlx::Error::RowNotFound).kind(),
            ErrorKind::Internal
        );
    }

    #[test]
    fn test_required_fields() {
        assert_eq!(required(Some(3), "n").unwrap(), 3);
        assert!(matches!(
            required::<i32>(None, "n"),
            Err(LedgerError::MissingField("n"))
        ));

        assert_eq!(required_str(Some(" ShopA ".into()), "shop").unwrap(), "ShopA");
        assert!(matches!(
            required_str(Some("   ".into()), "shop"),
            Err(LedgerError::MissingField("shop"))
        ));
    }
}
