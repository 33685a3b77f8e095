//! Minigame outcome resolution and settlement.
//!
//! Outcomes can be drawn by the client (symbols, slice index, pairs found) or by the server; in
//! both cases the resolver only ever pays out from the featured game's prize table.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tinyrand::{Rand, Seeded, StdRand};
use tinyrand_std::ClockSeed;
use tracing::instrument;

use crate::constants::{
    MAX_PRIZE_POINTS, SLOT_JACKPOT_PAYOUT, SLOT_PAIR_MULTIPLIER, SLOT_REEL_COUNT,
    SLOT_TRIPLE_MULTIPLIER,
};
use crate::db::models::counter::{DailyCounter, Feature};
use crate::db::models::flash_promo::FlashPromo;
use crate::db::models::game::{Game, GameType, GameView, Prize, PrizeKind};
use crate::db::models::user::{UserAccount, UserId};
use crate::db::prelude::{
    CounterRepository, FlashPromoRepository, GameRepository, Repository, Tx, UserRepository,
};
use crate::db::pubsub::{BalanceNotification, NotifyReason};
use crate::ledger::account::AccountLedger;
use crate::ledger::limiter::{DailyLimiter, persists_refusal};
use crate::ledger::{Ledger, LedgerError, LedgerResult, required, required_str};
use crate::util::new_id;

/// Uniform draws for server-side outcomes
pub struct SpinRng {
    inner: StdRand,
}

impl SpinRng {
    pub fn from_clock() -> Self {
        Self::seeded(ClockSeed::default().next_u64())
    }

    /// Fixed seed so a disputed play can be replayed
    pub fn seeded(seed: u64) -> Self {
        Self {
            inner: StdRand::seed(seed),
        }
    }

    /// Uniform value in `[0, 1)`
    pub fn unit(&mut self) -> f64 {
        (self.inner.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }
}

/// Cumulative-probability slice selection.
///
/// Weights are normalised to sum to 1 and the first slice whose cumulative share is `>= draw`
/// wins. Zero-weight slices can never be selected.
pub fn pick_slice(prizes: &[Prize], draw: f64) -> LedgerResult<usize> {
    if prizes.iter().any(|p| !p.weight.is_finite() || p.weight < 0.0) {
        return Err(LedgerError::InvalidOutcomeRequest(String::from(
            "prize weights must be finite and non-negative",
        )));
    }

    let total: f64 = prizes.iter().map(|p| p.weight).sum();
    if total <= 0.0 {
        return Err(LedgerError::InvalidOutcomeRequest(String::from(
            "prize table has no drawable outcome",
        )));
    }

    let mut cumulative = 0.0;
    let mut last_drawable = 0;
    for (idx, prize) in prizes.iter().enumerate() {
        if prize.weight == 0.0 {
            continue;
        }

        cumulative += prize.weight / total;
        last_drawable = idx;
        if cumulative >= draw {
            return Ok(idx);
        }
    }

    // float rounding can leave the final cumulative sum a hair under 1.0
    Ok(last_drawable)
}

/// Highest multiplier among promos live at `now`, never below 1
pub fn best_multiplier(promos: &[FlashPromo], now: DateTime<Utc>) -> f64 {
    promos
        .iter()
        .filter(|p| p.is_live(now))
        .map(|p| p.multiplier)
        .fold(1.0, f64::max)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resolution {
    pub points_won: i64,
    pub special_prize_won: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub special_prize: Option<String>,
    pub free_spin_won: bool,
    /// What landed: the slice name, the three symbol names, or the card pairs
    pub landed: Vec<String>,
}

fn payout_overflow() -> LedgerError {
    LedgerError::InvalidOutcomeRequest(String::from("payout exceeds the points range"))
}

impl Resolution {
    fn plain(points_won: i64, landed: Vec<String>) -> Self {
        Self {
            points_won,
            special_prize_won: false,
            special_prize: None,
            free_spin_won: false,
            landed,
        }
    }
}

pub fn resolve_wheel(prizes: &[Prize], slice: usize, flash_multiplier: f64) -> LedgerResult<Resolution> {
    let prize = prizes.get(slice).ok_or_else(|| {
        LedgerError::InvalidOutcomeRequest(format!(
            "slice index {slice} is outside the {} slice wheel",
            prizes.len()
        ))
    })?;
    let landed = vec![prize.name.clone()];

    Ok(match prize.kind {
        PrizeKind::Points => {
            let payout = (prize.points as f64
                * prize.multiplier.unwrap_or(1.0)
                * flash_multiplier.max(1.0))
            .round();
            if !payout.is_finite() || payout < 0.0 || payout >= i64::MAX as f64 {
                return Err(payout_overflow());
            }
            Resolution::plain(payout as i64, landed)
        }
        PrizeKind::TryAgain => Resolution::plain(0, landed),
        PrizeKind::FreeSpin => Resolution {
            free_spin_won: true,
            ..Resolution::plain(0, landed)
        },
        PrizeKind::Major => Resolution {
            special_prize_won: true,
            special_prize: Some(prize.name.clone()),
            ..Resolution::plain(0, landed)
        },
    })
}

/// Maps client-reported symbol names onto prize-table indices
pub fn symbol_indices(prizes: &[Prize], symbols: &[String]) -> LedgerResult<Vec<usize>> {
    symbols
        .iter()
        .map(|name| {
            prizes
                .iter()
                .position(|p| p.name.eq_ignore_ascii_case(name))
                .ok_or_else(|| {
                    LedgerError::InvalidOutcomeRequest(format!("unknown slot symbol '{name}'"))
                })
        })
        .collect()
}

pub fn draw_slot(prizes: &[Prize], rng: &mut SpinRng) -> LedgerResult<Vec<usize>> {
    (0..SLOT_REEL_COUNT)
        .map(|_| pick_slice(prizes, rng.unit()))
        .collect()
}

/// Pays a three-reel spin: all jackpot symbols, then a triple, then the first matching pair
/// in the order (0,1), (1,2), (0,2)
pub fn resolve_slot(prizes: &[Prize], reels: &[usize]) -> LedgerResult<Resolution> {
    if reels.len() != SLOT_REEL_COUNT {
        return Err(LedgerError::InvalidOutcomeRequest(format!(
            "expected {SLOT_REEL_COUNT} symbols, got {}",
            reels.len()
        )));
    }

    let symbols = reels
        .iter()
        .map(|&idx| {
            prizes.get(idx).ok_or_else(|| {
                LedgerError::InvalidOutcomeRequest(format!("symbol index {idx} is out of range"))
            })
        })
        .collect::<LedgerResult<Vec<&Prize>>>()?;
    let landed = symbols.iter().map(|s| s.name.clone()).collect();

    if symbols.iter().all(|s| s.jackpot) {
        return Ok(Resolution {
            special_prize_won: true,
            special_prize: Some(symbols[0].name.clone()),
            ..Resolution::plain(SLOT_JACKPOT_PAYOUT, landed)
        });
    }

    if reels[0] == reels[1] && reels[1] == reels[2] {
        let payout = SLOT_TRIPLE_MULTIPLIER
            .checked_mul(symbols[0].points)
            .ok_or_else(payout_overflow)?;
        return Ok(Resolution::plain(payout, landed));
    }

    for (a, b) in [(0, 1), (1, 2), (0, 2)] {
        if reels[a] == reels[b] {
            let payout = SLOT_PAIR_MULTIPLIER
                .checked_mul(symbols[a].points)
                .ok_or_else(payout_overflow)?;
            return Ok(Resolution::plain(payout, landed));
        }
    }

    Ok(Resolution::plain(0, landed))
}

/// Awards the game's first points prize once per pair found
pub fn resolve_card_match(
    prizes: &[Prize],
    pairs_found: u32,
    pairs_total: u32,
) -> LedgerResult<Resolution> {
    if pairs_total == 0 || pairs_found > pairs_total {
        return Err(LedgerError::InvalidOutcomeRequest(format!(
            "{pairs_found} of {pairs_total} pairs is not a valid result"
        )));
    }

    let per_pair = prizes
        .iter()
        .find(|p| p.kind == PrizeKind::Points)
        .map(|p| p.points)
        .unwrap_or(0);

    let payout = per_pair
        .checked_mul(i64::from(pairs_found))
        .ok_or_else(payout_overflow)?;

    Ok(Resolution::plain(
        payout,
        vec![format!("{pairs_found}/{pairs_total}")],
    ))
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayRequest {
    pub user_id: Option<UserId>,
    /// Echo of the advertised cost; rejected if it doesn't match the featured game
    #[serde(default)]
    pub cost: Option<i64>,
    #[serde(default)]
    pub symbols: Option<Vec<String>>,
    #[serde(default)]
    pub slice_index: Option<usize>,
    #[serde(default)]
    pub pairs_found: Option<u32>,
    #[serde(default)]
    pub pairs_total: Option<u32>,
    #[serde(default)]
    pub use_free_spin: bool,
    #[serde(default)]
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayOutcome {
    pub play_id: String,
    pub user_id: UserId,
    pub game_type: GameType,
    pub game_id: String,
    pub cost_paid: i64,
    pub flash_multiplier: f64,
    #[serde(flatten)]
    pub resolution: Resolution,
    pub total_points: i64,
    pub free_spins: i32,
    pub plays_remaining: i32,
}

impl PlayOutcome {
    pub fn notifications(&self) -> Vec<BalanceNotification> {
        vec![BalanceNotification {
            user_id: self.user_id.clone(),
            points: self.total_points,
            delta: self.resolution.points_won - self.cost_paid,
            reason: NotifyReason::GamePlayed,
        }]
    }
}

/// How a play is paid for, decided before anything is written
#[derive(Debug, Clone, PartialEq)]
pub struct PlayPlan {
    pub cost_paid: i64,
    pub use_free_spin: bool,
    /// Counter as it should be saved once the play settles
    pub counter: DailyCounter,
}

/// Validates a play against the locked account, game and counter.
///
/// Checks run in order: free spin eligibility, cost echo, the daily limit, then the means to pay.
/// A free spin still has to pass the daily limit but neither pays the cost nor spends a play.
pub fn plan_play(
    limiter: &DailyLimiter,
    account: &UserAccount,
    game: &Game,
    req: &PlayRequest,
    counter: &mut DailyCounter,
    now: DateTime<Utc>,
) -> LedgerResult<PlayPlan> {
    if req.use_free_spin && game.game_type != GameType::SpinTheWheel {
        return Err(LedgerError::InvalidOutcomeRequest(String::from(
            "free spins can only be used on the wheel",
        )));
    }

    if req.cost.is_some_and(|cost| cost != game.cost) {
        return Err(LedgerError::InvalidOutcomeRequest(format!(
            "cost does not match the featured game ({} points)",
            game.cost
        )));
    }

    limiter.check(counter, now)?;

    let mut settled_counter = counter.clone();
    if req.use_free_spin {
        if account.free_spins <= 0 {
            return Err(LedgerError::InvalidOutcomeRequest(String::from(
                "no free spins available",
            )));
        }

        return Ok(PlayPlan {
            cost_paid: 0,
            use_free_spin: true,
            counter: settled_counter,
        });
    }

    if account.points < game.cost {
        return Err(LedgerError::InsufficientPoints {
            required: game.cost,
            available: account.points,
        });
    }

    limiter.consume(&mut settled_counter);
    Ok(PlayPlan {
        cost_paid: game.cost,
        use_free_spin: false,
        counter: settled_counter,
    })
}

/// Decides what the play landed on, from the request if the client drew it or from `rng`
pub fn resolve_play(
    game: &Game,
    req: &PlayRequest,
    flash_multiplier: f64,
    rng: &mut SpinRng,
) -> LedgerResult<Resolution> {
    let prizes = &game.prizes.0;
    if prizes.is_empty() {
        return Err(LedgerError::GameNotAvailable(game.game_type));
    }

    match game.game_type {
        GameType::SpinTheWheel => {
            let slice = match req.slice_index {
                Some(idx) => idx,
                None => pick_slice(prizes, rng.unit())?,
            };
            resolve_wheel(prizes, slice, flash_multiplier)
        }
        GameType::SlotMachine => {
            let reels = match &req.symbols {
                Some(symbols) => symbol_indices(prizes, symbols)?,
                None => draw_slot(prizes, rng)?,
            };
            resolve_slot(prizes, &reels)
        }
        GameType::CardMatchingGame => {
            let pairs_found = req.pairs_found.ok_or_else(|| {
                LedgerError::InvalidOutcomeRequest(String::from("pairsFound is required"))
            })?;
            let pairs_total = req.pairs_total.ok_or_else(|| {
                LedgerError::InvalidOutcomeRequest(String::from("pairsTotal is required"))
            })?;
            resolve_card_match(prizes, pairs_found, pairs_total)
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameConfig {
    #[serde(default)]
    pub id: Option<String>,
    pub game_type: Option<GameType>,
    pub name: Option<String>,
    pub cost: Option<i64>,
    #[serde(default)]
    pub prizes: Vec<Prize>,
}

/// Rejects prize tables the resolver couldn't draw from
pub fn validate_game(config: GameConfig, now: DateTime<Utc>) -> LedgerResult<Game> {
    let game_type = required(config.game_type, "gameType")?;
    let name = required_str(config.name, "name")?;
    let cost = required(config.cost, "cost")?;

    if cost < 0 {
        return Err(LedgerError::InvalidInput(String::from(
            "game cost must not be negative",
        )));
    }
    if config.prizes.is_empty() {
        return Err(LedgerError::InvalidInput(String::from(
            "a game needs at least one prize",
        )));
    }
    if game_type != GameType::CardMatchingGame {
        pick_slice(&config.prizes, 0.0)
            .map_err(|e| LedgerError::InvalidInput(e.to_string()))?;
    }
    if config
        .prizes
        .iter()
        .any(|p| !(0..=MAX_PRIZE_POINTS).contains(&p.points))
    {
        return Err(LedgerError::InvalidInput(format!(
            "prize values must be between 0 and {MAX_PRIZE_POINTS}"
        )));
    }
    if config
        .prizes
        .iter()
        .filter_map(|p| p.multiplier)
        .any(|m| !m.is_finite() || m < 0.0)
    {
        return Err(LedgerError::InvalidInput(String::from(
            "prize multipliers must be finite and non-negative",
        )));
    }

    Ok(Game {
        id: config.id.unwrap_or_else(new_id),
        game_type,
        name,
        cost,
        prizes: sqlx::types::Json(config.prizes),
        featured: false,
        created_at: now,
        updated_at: now,
    })
}

impl Ledger {
    #[instrument(skip(self))]
    pub async fn featured_game(&self, game_type: GameType) -> LedgerResult<GameView> {
        GameRepository::new(self.pool)
            .featured(game_type)
            .await?
            .map(GameView::from)
            .ok_or(LedgerError::GameNotAvailable(game_type))
    }

    #[instrument(skip(self, req), fields(user = ?req.user_id))]
    pub async fn play(&self, game_type: GameType, req: PlayRequest) -> LedgerResult<PlayOutcome> {
        let user_id = required(req.user_id.clone(), "userId")?;
        let feature = Feature::from(game_type);
        let now = Utc::now();

        let mut tx = Tx::begin(self.pool).await?;

        let account = UserRepository::lock(&mut tx, &user_id)
            .await?
            .ok_or_else(|| LedgerError::UserNotFound(user_id.clone()))?;
        let game = GameRepository::featured_in_tx(&mut tx, game_type)
            .await?
            .ok_or(LedgerError::GameNotAvailable(game_type))?;

        let mut counter = self.limiter.load(&mut tx, &user_id, feature, now).await?;
        let plan = match plan_play(&self.limiter, &account, &game, &req, &mut counter, now) {
            Ok(plan) => plan,
            Err(e) if persists_refusal(&e) => {
                CounterRepository::save(&mut tx, &counter).await?;
                tx.commit().await?;
                return Err(e);
            }
            Err(e) => return Err(e),
        };

        let flash_multiplier = match game_type {
            GameType::SpinTheWheel => {
                let promos = FlashPromoRepository::live_for_user(&mut tx, &user_id, now).await?;
                best_multiplier(&promos, now)
            }
            _ => 1.0,
        };

        let mut rng = req.seed.map(SpinRng::seeded).unwrap_or_else(SpinRng::from_clock);
        let resolution = resolve_play(&game, &req, flash_multiplier, &mut rng)?;

        let mut free_spins = account.free_spins;
        if plan.use_free_spin {
            free_spins = UserRepository::take_free_spin(&mut tx, &user_id)
                .await?
                .ok_or_else(|| {
                    LedgerError::InvalidOutcomeRequest(String::from("no free spins available"))
                })?;
        } else if plan.cost_paid > 0 {
            AccountLedger::debit(&mut tx, &user_id, plan.cost_paid).await?;
        }
        CounterRepository::save(&mut tx, &plan.counter).await?;

        let total_points = AccountLedger::credit(&mut tx, &user_id, resolution.points_won).await?;
        if resolution.free_spin_won {
            free_spins = UserRepository::add_free_spins(&mut tx, &user_id, 1)
                .await?
                .unwrap_or(free_spins + 1);
        }

        tx.commit().await?;

        tracing::info!(
            user = %user_id,
            %game_type,
            points_won = resolution.points_won,
            cost_paid = plan.cost_paid,
            flash_multiplier,
            "minigame settled"
        );

        Ok(PlayOutcome {
            play_id: new_id(),
            user_id,
            game_type,
            game_id: game.id,
            cost_paid: plan.cost_paid,
            flash_multiplier,
            resolution,
            total_points,
            free_spins,
            plays_remaining: plan.counter.remaining,
        })
    }

    #[instrument(skip(self, config))]
    pub async fn save_game(&self, config: GameConfig) -> LedgerResult<GameView> {
        let game = validate_game(config, Utc::now())?;
        let saved = GameRepository::new(self.pool).upsert(&game).await?;

        tracing::info!(id = saved.id, game_type = %saved.game_type, "game saved");
        Ok(saved.into())
    }

    #[instrument(skip(self))]
    pub async fn feature_game(&self, id: &str) -> LedgerResult<GameView> {
        let mut tx = Tx::begin(self.pool).await?;
        let game = GameRepository::set_featured(&mut tx, id)
            .await?
            .ok_or_else(|| LedgerError::InvalidInput(format!("game '{id}' does not exist")))?;
        tx.commit().await?;

        tracing::info!(id, game_type = %game.game_type, "game featured");
        Ok(game.into())
    }
}

#[cfg(test)]
mod test {
    use chrono::Duration;
    use sqlx::types::Json;

    use super::*;
    use crate::db::models::user::Role;
    use crate::db::models::user::fixture::TestAccount;

    fn prize(name: &str, kind: PrizeKind, points: i64, weight: f64) -> Prize {
        Prize {
            name: name.to_string(),
            kind,
            points,
            weight,
            multiplier: None,
            jackpot: false,
        }
    }

    fn slot_table() -> Vec<Prize> {
        vec![
            prize("cherry", PrizeKind::Points, 5, 0.5),
            prize("lemon", PrizeKind::Points, 8, 0.3),
            Prize {
                jackpot: true,
                ..prize("seven", PrizeKind::Points, 20, 0.2)
            },
        ]
    }

    fn game(game_type: GameType, prizes: Vec<Prize>) -> Game {
        Game {
            id: String::from("g"),
            game_type,
            name: String::from("featured"),
            cost: 5,
            prizes: Json(prizes),
            featured: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_wheel_cumulative_boundaries() {
        let wheel = vec![
            prize("Try again", PrizeKind::TryAgain, 0, 0.5),
            prize("10pts", PrizeKind::Points, 10, 0.5),
        ];

        assert_eq!(pick_slice(&wheel, 0.4).unwrap(), 0);
        assert_eq!(pick_slice(&wheel, 0.5).unwrap(), 0);
        assert_eq!(pick_slice(&wheel, 0.6).unwrap(), 1);

        assert_eq!(resolve_wheel(&wheel, 0, 1.0).unwrap().points_won, 0);
        assert_eq!(resolve_wheel(&wheel, 1, 1.0).unwrap().points_won, 10);
    }

    #[test]
    fn test_weights_are_normalised() {
        let wheel = vec![
            prize("a", PrizeKind::Points, 1, 2.0),
            prize("b", PrizeKind::Points, 2, 6.0),
        ];

        assert_eq!(pick_slice(&wheel, 0.25).unwrap(), 0);
        assert_eq!(pick_slice(&wheel, 0.26).unwrap(), 1);
        assert_eq!(pick_slice(&wheel, 0.999_999).unwrap(), 1);
    }

    #[test]
    fn test_zero_weight_slices_are_never_drawn() {
        let wheel = vec![
            prize("never", PrizeKind::Major, 0, 0.0),
            prize("always", PrizeKind::Points, 3, 1.0),
            prize("never either", PrizeKind::Points, 50, 0.0),
        ];

        for draw in [0.0, 0.3, 0.999] {
            assert_eq!(pick_slice(&wheel, draw).unwrap(), 1);
        }

        let empty = vec![prize("none", PrizeKind::Points, 1, 0.0)];
        assert!(matches!(
            pick_slice(&empty, 0.5),
            Err(LedgerError::InvalidOutcomeRequest(_))
        ));
    }

    #[test]
    fn test_wheel_applies_flash_and_slice_multipliers() {
        let wheel = vec![Prize {
            multiplier: Some(1.5),
            ..prize("10pts", PrizeKind::Points, 10, 1.0)
        }];

        assert_eq!(resolve_wheel(&wheel, 0, 1.0).unwrap().points_won, 15);
        assert_eq!(resolve_wheel(&wheel, 0, 2.0).unwrap().points_won, 30);
        // multipliers below 1 never reduce a payout
        assert_eq!(resolve_wheel(&wheel, 0, 0.5).unwrap().points_won, 15);
    }

    #[test]
    fn test_wheel_special_slices() {
        let wheel = vec![
            prize("Free spin", PrizeKind::FreeSpin, 0, 1.0),
            prize("Headphones", PrizeKind::Major, 0, 1.0),
        ];

        let free = resolve_wheel(&wheel, 0, 3.0).unwrap();
        assert!(free.free_spin_won);
        assert_eq!(free.points_won, 0);

        let major = resolve_wheel(&wheel, 1, 3.0).unwrap();
        assert!(major.special_prize_won);
        assert_eq!(major.special_prize.as_deref(), Some("Headphones"));

        assert!(matches!(
            resolve_wheel(&wheel, 2, 1.0),
            Err(LedgerError::InvalidOutcomeRequest(_))
        ));
    }

    #[test]
    fn test_slot_jackpot() {
        let table = slot_table();
        let outcome = resolve_slot(&table, &[2, 2, 2]).unwrap();

        assert_eq!(outcome.points_won, 100);
        assert!(outcome.special_prize_won);
        assert_eq!(outcome.special_prize.as_deref(), Some("seven"));
    }

    #[test]
    fn test_slot_triples_and_pairs() {
        let table = slot_table();

        assert_eq!(resolve_slot(&table, &[1, 1, 1]).unwrap().points_won, 24);

        // every pair position pays 2V of the matched symbol
        assert_eq!(resolve_slot(&table, &[0, 0, 1]).unwrap().points_won, 10);
        assert_eq!(resolve_slot(&table, &[2, 1, 1]).unwrap().points_won, 16);
        assert_eq!(resolve_slot(&table, &[1, 0, 1]).unwrap().points_won, 16);

        let pair = resolve_slot(&table, &[0, 0, 2]).unwrap();
        assert!(!pair.special_prize_won);

        assert_eq!(resolve_slot(&table, &[0, 1, 2]).unwrap().points_won, 0);
    }

    #[test]
    fn test_slot_rejects_malformed_reels() {
        let table = slot_table();

        assert!(matches!(
            resolve_slot(&table, &[0, 0]),
            Err(LedgerError::InvalidOutcomeRequest(_))
        ));
        assert!(matches!(
            resolve_slot(&table, &[0, 0, 9]),
            Err(LedgerError::InvalidOutcomeRequest(_))
        ));
        assert!(matches!(
            symbol_indices(&table, &[String::from("banana")]),
            Err(LedgerError::InvalidOutcomeRequest(_))
        ));
        assert_eq!(
            symbol_indices(&table, &[String::from("Seven"), String::from("cherry")]).unwrap(),
            vec![2, 0]
        );
    }

    #[test]
    fn test_server_drawn_slot_is_always_payable() {
        let table = slot_table();
        let mut rng = SpinRng::seeded(42);

        for _ in 0..200 {
            let reels = draw_slot(&table, &mut rng).unwrap();
            let outcome = resolve_slot(&table, &reels).unwrap();
            assert!(outcome.points_won >= 0 && outcome.points_won <= 100);
        }
    }

    #[test]
    fn test_seeded_draws_replay() {
        let mut a = SpinRng::seeded(7);
        let mut b = SpinRng::seeded(7);

        for _ in 0..16 {
            let (x, y) = (a.unit(), b.unit());
            assert_eq!(x, y);
            assert!((0.0..1.0).contains(&x));
        }
    }

    #[test]
    fn test_card_match() {
        let table = vec![
            prize("Try again", PrizeKind::TryAgain, 0, 1.0),
            prize("pair", PrizeKind::Points, 4, 1.0),
        ];

        assert_eq!(resolve_card_match(&table, 3, 6).unwrap().points_won, 12);
        assert_eq!(resolve_card_match(&table, 0, 6).unwrap().points_won, 0);
        assert!(resolve_card_match(&table, 7, 6).is_err());
        assert!(resolve_card_match(&table, 0, 0).is_err());
    }

    #[test]
    fn test_oversized_payouts_are_refused() {
        let huge = vec![prize("pair", PrizeKind::Points, i64::MAX / 2, 1.0)];
        assert!(matches!(
            resolve_card_match(&huge, 3, 6),
            Err(LedgerError::InvalidOutcomeRequest(_))
        ));
        assert!(matches!(
            resolve_slot(&huge, &[0, 0, 0]),
            Err(LedgerError::InvalidOutcomeRequest(_))
        ));

        let negative = vec![Prize {
            multiplier: Some(-2.0),
            ..prize("10pts", PrizeKind::Points, 10, 1.0)
        }];
        assert!(matches!(
            resolve_wheel(&negative, 0, 1.0),
            Err(LedgerError::InvalidOutcomeRequest(_))
        ));

        let unbounded = vec![Prize {
            multiplier: Some(f64::INFINITY),
            ..prize("10pts", PrizeKind::Points, 10, 1.0)
        }];
        assert!(resolve_wheel(&unbounded, 0, 1.0).is_err());
    }

    #[test]
    fn test_best_multiplier_ignores_dead_promos() {
        let now = Utc::now();
        let promo = |multiplier: f64, live: bool| FlashPromo {
            id: new_id(),
            name: String::from("happy hour"),
            multiplier,
            starts_at: now - Duration::hours(1),
            ends_at: if live {
                now + Duration::hours(1)
            } else {
                now - Duration::minutes(1)
            },
            is_active: true,
            max_participants: 100,
            current_participants: 0,
            created_at: now,
        };

        assert_eq!(best_multiplier(&[], now), 1.0);
        assert_eq!(
            best_multiplier(&[promo(2.0, true), promo(3.0, true), promo(5.0, false)], now),
            3.0
        );
    }

    #[test]
    fn test_resolve_play_prefers_client_draw() {
        let wheel = game(
            GameType::SpinTheWheel,
            vec![
                prize("Try again", PrizeKind::TryAgain, 0, 0.5),
                prize("10pts", PrizeKind::Points, 10, 0.5),
            ],
        );
        let req = PlayRequest {
            slice_index: Some(1),
            ..Default::default()
        };

        let outcome = resolve_play(&wheel, &req, 2.0, &mut SpinRng::seeded(1)).unwrap();
        assert_eq!(outcome.points_won, 20);
        assert_eq!(outcome.landed, vec![String::from("10pts")]);

        let cards = game(GameType::CardMatchingGame, vec![prize("pair", PrizeKind::Points, 2, 1.0)]);
        assert!(matches!(
            resolve_play(&cards, &PlayRequest::default(), 1.0, &mut SpinRng::seeded(1)),
            Err(LedgerError::InvalidOutcomeRequest(_))
        ));
    }

    #[test]
    fn test_validate_game() {
        let config = GameConfig {
            id: None,
            game_type: Some(GameType::SlotMachine),
            name: Some(String::from("Lucky 7s")),
            cost: Some(5),
            prizes: slot_table(),
        };
        let game = validate_game(config.clone(), Utc::now()).unwrap();
        assert!(!game.featured);
        assert_eq!(game.prizes.0.len(), 3);

        let no_weights = GameConfig {
            prizes: vec![prize("x", PrizeKind::Points, 1, 0.0)],
            ..config.clone()
        };
        assert!(matches!(
            validate_game(no_weights, Utc::now()),
            Err(LedgerError::InvalidInput(_))
        ));

        for multiplier in [-2.0, f64::NAN, f64::INFINITY] {
            let bad_multiplier = GameConfig {
                prizes: vec![Prize {
                    multiplier: Some(multiplier),
                    ..prize("10pts", PrizeKind::Points, 10, 1.0)
                }],
                ..config.clone()
            };
            assert!(matches!(
                validate_game(bad_multiplier, Utc::now()),
                Err(LedgerError::InvalidInput(_))
            ));
        }

        let too_valuable = GameConfig {
            prizes: vec![prize("x", PrizeKind::Points, MAX_PRIZE_POINTS + 1, 1.0)],
            ..config.clone()
        };
        assert!(matches!(
            validate_game(too_valuable, Utc::now()),
            Err(LedgerError::InvalidInput(_))
        ));

        let missing_cost = GameConfig { cost: None, ..config };
        assert!(matches!(
            validate_game(missing_cost, Utc::now()),
            Err(LedgerError::MissingField("cost"))
        ));
    }

    fn wheel_game() -> Game {
        game(
            GameType::SpinTheWheel,
            vec![
                prize("Try again", PrizeKind::TryAgain, 0, 0.5),
                prize("10pts", PrizeKind::Points, 10, 0.5),
            ],
        )
    }

    fn spin_counter(user: &UserAccount, remaining: i32, now: DateTime<Utc>) -> DailyCounter {
        DailyCounter {
            remaining,
            used: 3 - remaining,
            ..DailyCounter::full(user.id.clone(), Feature::SpinTheWheel, now)
        }
    }

    #[test]
    fn test_paid_play_spends_cost_and_a_play() {
        let limiter = DailyLimiter::default();
        let now = Utc::now();
        let player = UserAccount::generate_test_account(Role::Consumer, 50);
        let mut counter = spin_counter(&player, 3, now);

        let plan = plan_play(
            &limiter,
            &player,
            &wheel_game(),
            &PlayRequest::default(),
            &mut counter,
            now,
        )
        .unwrap();

        assert_eq!(plan.cost_paid, 5);
        assert!(!plan.use_free_spin);
        assert_eq!(plan.counter.remaining, 2);
        assert_eq!(plan.counter.used, 1);
    }

    #[test]
    fn test_free_spin_skips_cost_and_daily_decrement() {
        let limiter = DailyLimiter::default();
        let now = Utc::now();
        let mut player = UserAccount::generate_test_account(Role::Consumer, 0);
        player.free_spins = 1;
        let req = PlayRequest {
            use_free_spin: true,
            ..Default::default()
        };

        let mut counter = spin_counter(&player, 1, now);
        let plan = plan_play(&limiter, &player, &wheel_game(), &req, &mut counter, now).unwrap();
        assert_eq!(plan.cost_paid, 0);
        assert!(plan.use_free_spin);
        assert_eq!(plan.counter.remaining, 1);

        // the daily limit still applies to free spins
        let mut exhausted = spin_counter(&player, 0, now);
        let err = plan_play(&limiter, &player, &wheel_game(), &req, &mut exhausted, now).unwrap_err();
        assert!(matches!(
            err,
            LedgerError::DailyLimitReached(Feature::SpinTheWheel)
        ));
        assert!(persists_refusal(&err));
        assert!(exhausted.limit_reached);
    }

    #[test]
    fn test_free_spin_needs_a_token_and_the_wheel() {
        let limiter = DailyLimiter::default();
        let now = Utc::now();
        let player = UserAccount::generate_test_account(Role::Consumer, 50);
        let req = PlayRequest {
            use_free_spin: true,
            ..Default::default()
        };

        let mut counter = spin_counter(&player, 3, now);
        assert!(matches!(
            plan_play(&limiter, &player, &wheel_game(), &req, &mut counter, now),
            Err(LedgerError::InvalidOutcomeRequest(_))
        ));

        let mut with_token = player.clone();
        with_token.free_spins = 2;
        let slot = game(GameType::SlotMachine, slot_table());
        assert!(matches!(
            plan_play(&limiter, &with_token, &slot, &req, &mut counter, now),
            Err(LedgerError::InvalidOutcomeRequest(_))
        ));
        assert_eq!(counter.remaining, 3);
    }

    #[test]
    fn test_cost_echo_must_match() {
        let limiter = DailyLimiter::default();
        let now = Utc::now();
        let player = UserAccount::generate_test_account(Role::Consumer, 50);
        let mut counter = spin_counter(&player, 3, now);

        let wrong_cost = PlayRequest {
            cost: Some(1),
            ..Default::default()
        };
        let err = plan_play(&limiter, &player, &wheel_game(), &wrong_cost, &mut counter, now)
            .unwrap_err();
        assert!(!persists_refusal(&err));
        assert!(matches!(err, LedgerError::InvalidOutcomeRequest(_)));
        assert_eq!(counter.remaining, 3);

        let right_cost = PlayRequest {
            cost: Some(5),
            ..Default::default()
        };
        assert!(plan_play(&limiter, &player, &wheel_game(), &right_cost, &mut counter, now).is_ok());
    }

    #[test]
    fn test_play_needs_enough_points() {
        let limiter = DailyLimiter::default();
        let now = Utc::now();
        let player = UserAccount::generate_test_account(Role::Consumer, 4);
        let mut counter = spin_counter(&player, 3, now);

        let err = plan_play(
            &limiter,
            &player,
            &wheel_game(),
            &PlayRequest::default(),
            &mut counter,
            now,
        )
        .unwrap_err();

        assert!(matches!(
            err,
            LedgerError::InsufficientPoints {
                required: 5,
                available: 4
            }
        ));
    }
}
