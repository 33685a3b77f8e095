use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use serde::Serialize;
use tracing::instrument;

use crate::api::server::{AppState, JsonResult};
use crate::db::models::counter::RemainingView;
use crate::db::models::flash_promo::FlashPromo;
use crate::db::models::game::{GameType, GameView};
use crate::db::models::promo::{PromoCodeImport, PromoRedemption};
use crate::db::models::reward::{Reward, RewardClaim};
use crate::db::models::user::{AccountView, UserId};
use crate::db::models::{PaginatedResponse, Pagination};
use crate::db::pubsub::NotifyReason;
use crate::ledger::LedgerError;
use crate::ledger::account::{AdjustRequest, BalanceChange, TransferRequest};
use crate::ledger::flash::{ExcludeRequest, JoinOutcome, JoinRequest, NewFlashPromo};
use crate::ledger::minigame::{GameConfig, PlayOutcome, PlayRequest};
use crate::ledger::promo::{DeleteCodesRequest, ImportSummary, RedeemRequest, RedemptionOutcome};
use crate::ledger::reward::{ClaimOutcome, ClaimRequest, NewReward, RestockRequest};
use crate::ledger::user::{AccountSummary, LoginRequest, RegisterRequest, VerifyRequest};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteSummary {
    pub deleted: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExcludeSummary {
    pub promo_id: String,
    pub newly_excluded: bool,
}

fn parse_game_type(raw: &str) -> Result<GameType, LedgerError> {
    raw.parse::<GameType>()
        .map_err(|e| LedgerError::InvalidInput(e.to_string()))
}

//
// accounts

#[instrument(skip(state, body))]
pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RegisterRequest>,
) -> JsonResult<AccountView> {
    Ok(Json(state.ledger.register(body).await?))
}

#[instrument(skip(state, body))]
pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(body): Json<LoginRequest>,
) -> JsonResult<AccountView> {
    Ok(Json(state.ledger.login(body).await?))
}

#[instrument(skip(state))]
pub async fn account(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> JsonResult<AccountSummary> {
    Ok(Json(state.ledger.account(&UserId::from(id)).await?))
}

#[instrument(skip(state))]
pub async fn redemption_history(
    Query(param): Query<Pagination>,
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> JsonResult<PaginatedResponse<PromoRedemption>> {
    let page = state
        .ledger
        .redemption_history(&UserId::from(id), param)
        .await?;

    Ok(Json(page))
}

//
// promo codes

#[instrument(skip(state))]
pub async fn redeem_promo(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RedeemRequest>,
) -> JsonResult<RedemptionOutcome> {
    let outcome = state.ledger.redeem_promo(body).await?;
    state.redis_pool.publish_all(&outcome.notifications()).await;

    Ok(Json(outcome))
}

#[instrument(skip(state))]
pub async fn remaining_redemptions(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> JsonResult<RemainingView> {
    let view = state
        .ledger
        .remaining_redemptions(&UserId::from(user_id))
        .await?;

    Ok(Json(view))
}

//
// minigames

#[instrument(skip(state))]
pub async fn featured_game(
    State(state): State<Arc<AppState>>,
    Path(game_type): Path<String>,
) -> JsonResult<GameView> {
    let game_type = parse_game_type(&game_type)?;
    Ok(Json(state.ledger.featured_game(game_type).await?))
}

#[instrument(skip(state, body))]
pub async fn play_game(
    State(state): State<Arc<AppState>>,
    Path(game_type): Path<String>,
    Json(body): Json<PlayRequest>,
) -> JsonResult<PlayOutcome> {
    let game_type = parse_game_type(&game_type)?;

    let outcome = state.ledger.play(game_type, body).await?;
    state.redis_pool.publish_all(&outcome.notifications()).await;

    Ok(Json(outcome))
}

//
// rewards

#[instrument(skip(state))]
pub async fn rewards(
    Query(param): Query<Pagination>,
    State(state): State<Arc<AppState>>,
) -> JsonResult<Vec<Reward>> {
    let (limit, offset) = param.bounds();
    Ok(Json(state.ledger.rewards(limit, offset).await?))
}

#[instrument(skip(state))]
pub async fn claim_reward(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<ClaimRequest>,
) -> JsonResult<ClaimOutcome> {
    let outcome = state.ledger.claim_reward(&id, body).await?;
    state.redis_pool.publish_all(&outcome.notifications()).await;

    Ok(Json(outcome))
}

//
// flash promos

#[instrument(skip(state))]
pub async fn live_flash_promos(State(state): State<Arc<AppState>>) -> JsonResult<Vec<FlashPromo>> {
    Ok(Json(state.ledger.live_flash_promos().await?))
}

#[instrument(skip(state))]
pub async fn join_flash_promo(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<JoinRequest>,
) -> JsonResult<JoinOutcome> {
    Ok(Json(state.ledger.join_flash_promo(&id, body).await?))
}

//
// admin

#[instrument(skip(state, body), fields(count = body.len()))]
pub async fn import_promo_codes(
    State(state): State<Arc<AppState>>,
    Json(body): Json<Vec<PromoCodeImport>>,
) -> JsonResult<ImportSummary> {
    Ok(Json(state.ledger.import_codes(body).await?))
}

#[instrument(skip(state))]
pub async fn delete_promo_codes(
    State(state): State<Arc<AppState>>,
    Json(body): Json<DeleteCodesRequest>,
) -> JsonResult<DeleteSummary> {
    let deleted = state.ledger.delete_codes(body).await?;
    Ok(Json(DeleteSummary { deleted }))
}

#[instrument(skip(state, body))]
pub async fn save_game(
    State(state): State<Arc<AppState>>,
    Json(body): Json<GameConfig>,
) -> JsonResult<GameView> {
    Ok(Json(state.ledger.save_game(body).await?))
}

#[instrument(skip(state))]
pub async fn feature_game(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> JsonResult<GameView> {
    Ok(Json(state.ledger.feature_game(&id).await?))
}

#[instrument(skip(state))]
pub async fn create_reward(
    State(state): State<Arc<AppState>>,
    Json(body): Json<NewReward>,
) -> JsonResult<Reward> {
    Ok(Json(state.ledger.create_reward(body).await?))
}

#[instrument(skip(state))]
pub async fn restock_reward(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<RestockRequest>,
) -> JsonResult<Reward> {
    Ok(Json(state.ledger.restock_reward(&id, body).await?))
}

#[instrument(skip(state))]
pub async fn reward_claims(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> JsonResult<Vec<RewardClaim>> {
    Ok(Json(state.ledger.reward_claims(&id).await?))
}

#[instrument(skip(state))]
pub async fn create_flash_promo(
    State(state): State<Arc<AppState>>,
    Json(body): Json<NewFlashPromo>,
) -> JsonResult<FlashPromo> {
    Ok(Json(state.ledger.create_flash_promo(body).await?))
}

#[instrument(skip(state))]
pub async fn exclude_from_flash_promo(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<ExcludeRequest>,
) -> JsonResult<ExcludeSummary> {
    let newly_excluded = state.ledger.exclude_from_flash_promo(&id, body).await?;
    Ok(Json(ExcludeSummary {
        promo_id: id,
        newly_excluded,
    }))
}

#[instrument(skip(state))]
pub async fn verify_retailer(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<VerifyRequest>,
) -> JsonResult<AccountView> {
    Ok(Json(
        state
            .ledger
            .set_verification(&UserId::from(id), body)
            .await?,
    ))
}

#[instrument(skip(state))]
pub async fn adjust_points(
    State(state): State<Arc<AppState>>,
    Json(body): Json<AdjustRequest>,
) -> JsonResult<BalanceChange> {
    let change = state.ledger.adjust_points(body).await?;
    state
        .redis_pool
        .publish_all(&[change.notification(NotifyReason::Adjustment)])
        .await;

    Ok(Json(change))
}

#[instrument(skip(state))]
pub async fn transfer_points(
    State(state): State<Arc<AppState>>,
    Json(body): Json<TransferRequest>,
) -> JsonResult<Vec<BalanceChange>> {
    let changes = state.ledger.transfer_points(body).await?;
    let notifications: Vec<_> = changes
        .iter()
        .map(|c| c.notification(NotifyReason::Transfer))
        .collect();
    state.redis_pool.publish_all(&notifications).await;

    Ok(Json(changes))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse_game_type_from_path() {
        assert_eq!(parse_game_type("slot_machine").unwrap(), GameType::SlotMachine);
        assert!(matches!(
            parse_game_type("roulette"),
            Err(LedgerError::InvalidInput(_))
        ));
    }
}
