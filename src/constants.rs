pub const SERVER_PORT: u16 = 3000;

// DAILY LIMITS
//
// Every limited feature shares the same ceiling for now.
pub const DAILY_PROMO_REDEMPTIONS: i32 = 3;
pub const DAILY_GAME_PLAYS: i32 = 3;

/// Balance given to accounts created without an explicit `STARTING_POINTS` override
pub const DEFAULT_STARTING_POINTS: i64 = 50;
pub const DEFAULT_PROMO_POINTS: i64 = 10;

/// Retailers earn a flat amount per redemption regardless of the code's value.
pub const RETAILER_POINTS_PER_REDEMPTION: i64 = 1;

pub const SLOT_JACKPOT_PAYOUT: i64 = 100;
pub const SLOT_REEL_COUNT: usize = 3;
pub const SLOT_TRIPLE_MULTIPLIER: i64 = 3;
pub const SLOT_PAIR_MULTIPLIER: i64 = 2;

/// Ceiling on a single prize table entry's value
pub const MAX_PRIZE_POINTS: i64 = 1_000_000;

pub const NOTIFY_CHANNEL_PREFIX: &str = "points:";

pub const PASSWORD_HASH_ITERATIONS: u32 = 100_000;
pub const PASSWORD_SALT_LEN: usize = 16;

pub const HISTORY_PAGE_MAX: i64 = 100;
