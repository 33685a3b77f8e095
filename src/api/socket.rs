//! Pushes balance notifications to a user's open sessions.
//!
//! Each websocket gets its own redis subscription on `points:{user_id}`; messages are forwarded
//! verbatim until either side goes away.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use tracing::instrument;

use crate::api::server::{AppState, RouteError};
use crate::db::models::user::UserId;
use crate::db::prelude::{Repository, UserRepository};
use crate::db::pubsub::RedisPool;
use crate::ledger::LedgerError;

#[instrument(skip(state, ws))]
pub async fn balance_socket(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Result<Response, RouteError> {
    let user_id = UserId::from(user_id);
    if !UserRepository::new(state.ledger.pool())
        .exists(&user_id)
        .await
        .map_err(LedgerError::from)?
    {
        return Err(LedgerError::UserNotFound(user_id).into());
    }

    let redis_pool = state.redis_pool;
    Ok(ws.on_upgrade(move |socket| forward_notifications(socket, redis_pool, user_id)))
}

#[instrument(skip(socket, redis_pool))]
async fn forward_notifications(socket: WebSocket, redis_pool: &'static RedisPool, user_id: UserId) {
    let pubsub = match redis_pool.subscribe(&user_id).await {
        Ok(pubsub) => pubsub,
        Err(e) => {
            tracing::error!(error = ?e, "unable to subscribe to balance notifications");
            return;
        }
    };

    let (mut sender, mut receiver) = socket.split();
    let mut notifications = std::pin::pin!(pubsub.into_on_message());
    tracing::debug!("balance socket opened");

    loop {
        tokio::select! {
            msg = notifications.next() => {
                let Some(msg) = msg else {
                    tracing::warn!("redis subscription closed");
                    break;
                };

                let payload: String = match msg.get_payload() {
                    Ok(payload) => payload,
                    Err(e) => {
                        tracing::warn!(error = ?e, "dropping undecodable notification");
                        continue;
                    }
                };

                if sender.send(Message::Text(payload.into())).await.is_err() {
                    break;
                }
            }

            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!(error = ?e, "websocket read failure");
                        break;
                    }
                    // clients have nothing to say on this socket
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    tracing::debug!("balance socket closed");
}
