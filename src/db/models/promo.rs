use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::user::UserId;

/// Base `promo_code` table model
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PromoCode {
    pub code: String,
    pub points: i64,
    pub redeemed_by_consumer: Option<UserId>,
    pub redeemed_by_retailer: Option<UserId>,
    pub shop_name: Option<String>,
    pub redeemed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl PromoCode {
    pub fn is_redeemed(&self) -> bool {
        self.redeemed_at.is_some()
    }

    /// Codes are matched case-insensitively by storing them uppercased
    pub fn normalize(code: &str) -> String {
        code.trim().to_uppercase()
    }
}

/// Base `promo_redemption` table model; the consumer's redemption history
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct PromoRedemption {
    pub id: String,
    pub user_id: UserId,
    pub code: String,
    pub shop_name: String,
    pub points: i64,
    pub redeemed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PromoCodeImport {
    pub code: String,
    #[serde(default)]
    pub points: Option<i64>,
}
