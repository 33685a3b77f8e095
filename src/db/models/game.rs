use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameType {
    SpinTheWheel,
    SlotMachine,
    CardMatchingGame,
}

text_enum!(GameType {
    SpinTheWheel => "spin_the_wheel",
    SlotMachine => "slot_machine",
    CardMatchingGame => "card_matching_game",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrizeKind {
    /// Pays `points`
    Points,
    TryAgain,
    /// Grants one free-spin token
    FreeSpin,
    /// A named prize handed out off-ledger
    Major,
}

/// One wheel slice or slot symbol.
///
/// For slot machines `points` is the symbol's base value and `jackpot` marks the special
/// symbol; for wheels `kind` decides the payout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Prize {
    pub name: String,
    pub kind: PrizeKind,
    #[serde(default)]
    pub points: i64,
    pub weight: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multiplier: Option<f64>,
    #[serde(default)]
    pub jackpot: bool,
}

/// Base `game` table model
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Game {
    pub id: String,
    #[sqlx(try_from = "String")]
    pub game_type: GameType,
    pub name: String,
    pub cost: i64,
    pub prizes: Json<Vec<Prize>>,
    pub featured: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameView {
    pub id: String,
    pub game_type: GameType,
    pub name: String,
    pub cost: i64,
    pub prizes: Vec<Prize>,
    pub featured: bool,
}

impl From<Game> for GameView {
    fn from(value: Game) -> Self {
        Self {
            id: value.id,
            game_type: value.game_type,
            name: value.name,
            cost: value.cost,
            prizes: value.prizes.0,
            featured: value.featured,
        }
    }
}
