use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::game::GameType;
use super::user::UserId;
use crate::constants::{DAILY_GAME_PLAYS, DAILY_PROMO_REDEMPTIONS};

/// Anything a user may only do a fixed number of times per calendar day
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    PromoRedemption,
    SpinTheWheel,
    SlotMachine,
    CardMatchingGame,
}

text_enum!(Feature {
    PromoRedemption => "promo_redemption",
    SpinTheWheel => "spin_the_wheel",
    SlotMachine => "slot_machine",
    CardMatchingGame => "card_matching_game",
});

impl Feature {
    pub const fn daily_max(&self) -> i32 {
        match self {
            Feature::PromoRedemption => DAILY_PROMO_REDEMPTIONS,
            _ => DAILY_GAME_PLAYS,
        }
    }
}

impl From<GameType> for Feature {
    fn from(value: GameType) -> Self {
        match value {
            GameType::SpinTheWheel => Feature::SpinTheWheel,
            GameType::SlotMachine => Feature::SlotMachine,
            GameType::CardMatchingGame => Feature::CardMatchingGame,
        }
    }
}

/// Base `daily_counter` table model, one row per (user, feature)
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct DailyCounter {
    pub user_id: UserId,
    #[sqlx(try_from = "String")]
    pub feature: Feature,
    pub remaining: i32,
    pub used: i32,
    pub last_reset: DateTime<Utc>,
    pub limit_reached: bool,
}

impl DailyCounter {
    /// Counter for a user that has never touched `feature`; starts full
    pub fn full(user_id: UserId, feature: Feature, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            feature,
            remaining: feature.daily_max(),
            used: 0,
            last_reset: now,
            limit_reached: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemainingView {
    pub feature: Feature,
    pub remaining_redemptions: i32,
    pub daily_limit_reached: bool,
    pub next_reset_timestamp: DateTime<Utc>,
}
