//! Balance change fan-out over redis publish/subscribe.
//!
//! Settlement never depends on this: notifications go out after commit and a failed publish is
//! only logged.

use std::sync::LazyLock;

use redis::AsyncCommands;
use redis::aio::{ConnectionManager, PubSub};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::instrument;

use crate::constants::NOTIFY_CHANNEL_PREFIX;
use crate::db::models::user::UserId;
use crate::util::env::{EnvErr, Var};
use crate::var;

static REDIS_POOL: LazyLock<OnceCell<RedisPool>> = LazyLock::new(OnceCell::new);
pub async fn redis_pool() -> RedisResult<&'static RedisPool> {
    REDIS_POOL
        .get_or_try_init(|| async { RedisPool::new().await })
        .await
}

pub struct RedisPool {
    pub client: redis::Client,
    pub manager: ConnectionManager,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotifyReason {
    PromoRedeemed,
    RedemptionCredit,
    GamePlayed,
    RewardClaimed,
    Adjustment,
    Transfer,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceNotification {
    pub user_id: UserId,
    pub points: i64,
    pub delta: i64,
    pub reason: NotifyReason,
}

pub fn channel_for(user_id: &UserId) -> String {
    format!("{NOTIFY_CHANNEL_PREFIX}{user_id}")
}

impl RedisPool {
    #[instrument]
    pub async fn new() -> RedisResult<Self> {
        let redis_url = var!(Var::RedisUrl).await?;
        tracing::debug!(redis_url, "connecting to redis server");

        let client = redis::Client::open(redis_url)?;
        let manager = ConnectionManager::new(client.clone()).await?;

        Ok(Self { client, manager })
    }

    #[instrument(skip(self), fields(user = %notification.user_id))]
    pub async fn publish(&self, notification: &BalanceNotification) -> RedisResult<()> {
        let payload = serde_json::to_string(notification)?;
        let mut conn = self.manager.clone();

        let receivers: i64 = conn
            .publish(channel_for(&notification.user_id), payload)
            .await?;
        tracing::trace!(receivers, "published balance notification");

        Ok(())
    }

    /// Publishes every notification, logging rather than returning failures
    pub async fn publish_all(&self, notifications: &[BalanceNotification]) {
        for n in notifications {
            if let Err(e) = self.publish(n).await {
                tracing::warn!(error = ?e, user = %n.user_id, "failed to publish balance notification");
            }
        }
    }

    /// Dedicated pubsub connection listening on a single user's channel
    #[instrument(skip(self))]
    pub async fn subscribe(&self, user_id: &UserId) -> RedisResult<PubSub> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(channel_for(user_id)).await?;

        Ok(pubsub)
    }
}

pub type RedisResult<T> = core::result::Result<T, RedisErr>;

#[derive(Debug, Error)]
pub enum RedisErr {
    #[error(transparent)]
    EnvErr(#[from] EnvErr),

    #[error(transparent)]
    RedisClientError(#[from] redis::RedisError),

    #[error(transparent)]
    SerdeError(#[from] serde_json::Error),
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_channel_name() {
        assert_eq!(channel_for(&UserId::from("abc")), "points:abc");
    }

    #[test]
    fn test_notification_shape() {
        let n = BalanceNotification {
            user_id: UserId::from("abc"),
            points: 60,
            delta: 10,
            reason: NotifyReason::PromoRedeemed,
        };
        let json = serde_json::to_value(&n).unwrap();

        assert_eq!(json["userId"], "abc");
        assert_eq!(json["reason"], "promo_redeemed");
    }
}
