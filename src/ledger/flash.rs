use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::db::models::flash_promo::FlashPromo;
use crate::db::models::user::UserId;
use crate::db::prelude::{FlashPromoRepository, Repository, Tx, UserRepository};
use crate::ledger::{Ledger, LedgerError, LedgerResult, required, required_str};
use crate::util::new_id;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRequest {
    pub user_id: Option<UserId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinOutcome {
    pub promo_id: String,
    pub user_id: UserId,
    pub current_participants: i32,
    pub max_participants: i32,
}

pub fn check_join(promo: &FlashPromo, already_joined: bool, now: DateTime<Utc>) -> LedgerResult<()> {
    if !promo.is_live(now) {
        return Err(LedgerError::PromoInactive(promo.id.clone()));
    }

    if already_joined {
        return Err(LedgerError::AlreadyJoined(promo.id.clone()));
    }

    if promo.is_full() {
        return Err(LedgerError::PromoFull(promo.id.clone()));
    }

    Ok(())
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewFlashPromo {
    pub name: Option<String>,
    pub multiplier: Option<f64>,
    pub starts_at: Option<DateTime<Utc>>,
    pub ends_at: Option<DateTime<Utc>>,
    pub max_participants: Option<i32>,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExcludeRequest {
    pub user_id: Option<UserId>,
}

pub fn validate_flash_promo(req: NewFlashPromo, now: DateTime<Utc>) -> LedgerResult<FlashPromo> {
    let name = required_str(req.name, "name")?;
    let multiplier = required(req.multiplier, "multiplier")?;
    let starts_at = req.starts_at.unwrap_or(now);
    let ends_at = required(req.ends_at, "endsAt")?;
    let max_participants = required(req.max_participants, "maxParticipants")?;

    if !multiplier.is_finite() || multiplier < 1.0 {
        return Err(LedgerError::InvalidInput(String::from(
            "multiplier must be at least 1",
        )));
    }
    if ends_at <= starts_at {
        return Err(LedgerError::InvalidInput(String::from(
            "flash promo must end after it starts",
        )));
    }
    if max_participants < 0 {
        return Err(LedgerError::InvalidInput(String::from(
            "maxParticipants must not be negative",
        )));
    }

    Ok(FlashPromo {
        id: new_id(),
        name,
        multiplier,
        starts_at,
        ends_at,
        is_active: req.is_active,
        max_participants,
        current_participants: 0,
        created_at: now,
    })
}

impl Ledger {
    #[instrument(skip(self))]
    pub async fn live_flash_promos(&self) -> LedgerResult<Vec<FlashPromo>> {
        Ok(FlashPromoRepository::new(self.pool).live(Utc::now()).await?)
    }

    #[instrument(skip(self))]
    pub async fn join_flash_promo(&self, promo_id: &str, req: JoinRequest) -> LedgerResult<JoinOutcome> {
        let user_id = required(req.user_id, "userId")?;
        let now = Utc::now();

        let mut tx = Tx::begin(self.pool).await?;

        let promo = FlashPromoRepository::lock(&mut tx, promo_id)
            .await?
            .ok_or_else(|| LedgerError::PromoNotFound(promo_id.to_string()))?;
        if UserRepository::lock(&mut tx, &user_id).await?.is_none() {
            return Err(LedgerError::UserNotFound(user_id));
        }

        let already_joined = FlashPromoRepository::is_participant(&mut tx, promo_id, &user_id).await?;
        check_join(&promo, already_joined, now)?;

        let current_participants = FlashPromoRepository::join(&mut tx, promo_id, &user_id)
            .await?
            .ok_or_else(|| LedgerError::PromoFull(promo_id.to_string()))?;

        tx.commit().await?;

        tracing::info!(promo = promo_id, user = %user_id, current_participants, "joined flash promo");
        Ok(JoinOutcome {
            promo_id: promo.id,
            user_id,
            current_participants,
            max_participants: promo.max_participants,
        })
    }

    #[instrument(skip(self))]
    pub async fn create_flash_promo(&self, req: NewFlashPromo) -> LedgerResult<FlashPromo> {
        let promo = validate_flash_promo(req, Utc::now())?;
        FlashPromoRepository::new(self.pool).insert(&promo).await?;

        Ok(promo)
    }

    /// Keeps `user_id` out of a promo's payout multiplier
    #[instrument(skip(self))]
    pub async fn exclude_from_flash_promo(&self, promo_id: &str, req: ExcludeRequest) -> LedgerResult<bool> {
        let user_id = required(req.user_id, "userId")?;

        let repo = FlashPromoRepository::new(self.pool);
        if !repo.exists(&promo_id.to_string()).await? {
            return Err(LedgerError::PromoNotFound(promo_id.to_string()));
        }
        if !UserRepository::new(self.pool).exists(&user_id).await? {
            return Err(LedgerError::UserNotFound(user_id));
        }

        Ok(repo.exclude(promo_id, &user_id).await?)
    }
}
