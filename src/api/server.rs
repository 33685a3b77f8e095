use std::net::SocketAddr;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{MatchedPath, Request};
use axum::middleware::{self, Next, from_fn};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use http::StatusCode;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;
use tracing::instrument;

use crate::api::handler::*;
use crate::api::middleware::verify_internal::verify_internal_ident;
use crate::api::middleware::{self as internal_mw, MiddlewareErr};
use crate::api::socket::balance_socket;
use crate::db::prelude::*;
use crate::db::pubsub::{RedisErr, RedisPool, redis_pool};
use crate::ledger::day::DayBoundary;
use crate::ledger::{ErrorKind, Ledger, LedgerError};
use crate::util::env::{self, EnvErr};

pub type JsonResult<T> = core::result::Result<Json<T>, RouteError>;

#[derive(Clone)]
pub struct AppState {
    pub ledger: Ledger,
    pub redis_pool: &'static RedisPool,
}

impl AppState {
    pub async fn new() -> Result<Self, RouteError> {
        let vars = env::env().await?;
        let boundary = DayBoundary::new(vars.ledger_offset()?);
        let starting_points = vars.starting_points()?;

        tracing::info!(?boundary, starting_points, "ledger configured");

        Ok(Self {
            ledger: Ledger::new(db_pool().await?, boundary, starting_points),
            redis_pool: redis_pool().await?,
        })
    }
}

pub fn routes(state: Arc<AppState>) -> Router {
    let admin_routes = Router::new()
        .route("/admin/promo/import", post(import_promo_codes))
        .route("/admin/promo", delete(delete_promo_codes))
        .route("/admin/game", post(save_game))
        .route("/admin/game/{id}/feature", post(feature_game))
        .route("/admin/reward", post(create_reward))
        .route("/admin/reward/{id}/restock", post(restock_reward))
        .route("/admin/reward/{id}/claims", get(reward_claims))
        .route("/admin/flash-promo", post(create_flash_promo))
        .route("/admin/flash-promo/{id}/exclude", post(exclude_from_flash_promo))
        .route("/admin/user/{id}/verify", post(verify_retailer))
        .route("/admin/points/adjust", post(adjust_points))
        .route("/admin/points/transfer", post(transfer_points))
        .route_layer(middleware::from_fn(verify_internal_ident));

    Router::new()
        .merge(admin_routes)
        //
        // general
        .route("/", get(|| async { Response::new(Body::empty()) }))
        //
        // accounts
        .route("/user/register", post(register))
        .route("/user/login", post(login))
        .route("/user/{id}", get(account))
        .route("/user/{id}/history", get(redemption_history))
        //
        // promo codes
        .route("/promo/redeem", post(redeem_promo))
        .route("/promo/remaining/{user_id}", get(remaining_redemptions))
        //
        // minigames
        .route("/game/{game_type}", get(featured_game))
        .route("/game/{game_type}/play", post(play_game))
        //
        // rewards and flash promos
        .route("/reward", get(rewards))
        .route("/reward/{id}/claim", post(claim_reward))
        .route("/flash-promo", get(live_flash_promos))
        .route("/flash-promo/{id}/join", post(join_flash_promo))
        //
        // balance notifications
        .route("/ws/{user_id}", get(balance_socket))
        .layer(
            TraceLayer::new_for_http().make_span_with(|req: &axum::http::Request<_>| {
                let method = req.method();
                let uri = req.uri();

                let matched_path = req
                    .extensions()
                    .get::<MatchedPath>()
                    .map(|matched| matched.as_str());

                tracing::debug_span!("api_request", ?method, ?uri, ?matched_path)
            }),
        )
        .layer(from_fn(log_route_errors))
        .with_state(state)
}

#[instrument(skip(tx))]
pub async fn router(tx: UnboundedSender<SocketAddr>) -> Result<(), RouteError> {
    let state = Arc::new(AppState::new().await?);
    let cors = internal_mw::cors().await?;
    let app = routes(state).layer(cors);

    let port = env::env().await?.port()?;
    let socket_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(0, 0, 0, 0)), port);
    let listener = tokio::net::TcpListener::bind(socket_addr).await?;

    if tx.send(socket_addr).is_err() {
        tracing::warn!("server ready listener dropped");
    }

    axum::serve(listener, app).await?;
    Ok(())
}

/// Custom error trace handler for `RouteError`-type responses
///
/// Only internal failures are attached to the response, so expected refusals (limit reached,
/// out of stock...) don't flood the error log.
#[instrument(skip(request, next), fields(uri = request.uri().to_string()))]
async fn log_route_errors(request: Request, next: Next) -> Response {
    let res = next.run(request).await;
    if let Some(err) = res.extensions().get::<Arc<RouteError>>() {
        tracing::error!(error = ?err, "error occurred inside route handler");
    }

    res
}

#[instrument(skip(tx, rx))]
pub async fn start_server(
    tx: UnboundedSender<SocketAddr>,
    mut rx: UnboundedReceiver<SocketAddr>,
) -> Result<Vec<JoinHandle<()>>, RouteError> {
    tracing::info!("starting server");
    let server_handle = tokio::task::spawn(async move {
        if let Err(e) = router(tx).await {
            tracing::error!(error = ?e, "api server exited");
        }
    });

    let logging_handle = tokio::task::spawn(async move {
        if let Some(addr) = rx.recv().await {
            tracing::info!(
                server_url = &format!("http://127.0.0.1:{}", addr.port()),
                "server ready"
            );
        }
    });

    Ok(vec![server_handle, logging_handle])
}

#[derive(Debug, Error)]
pub enum RouteError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    QueryError(#[from] PgError),

    #[error(transparent)]
    RedisError(#[from] RedisErr),

    #[error(transparent)]
    EnvError(#[from] EnvErr),

    #[error(transparent)]
    MiddlewareError(#[from] MiddlewareErr),

    #[error(transparent)]
    IoError(#[from] std::io::Error),
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub kind: &'static str,
    pub error: &'static str,
    pub message: String,
}

impl RouteError {
    fn kind(&self) -> ErrorKind {
        match self {
            RouteError::Ledger(err) => err.kind(),
            _ => ErrorKind::Internal,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            RouteError::Ledger(err) => err.code(),
            _ => "Internal",
        }
    }
}

pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::Validation => StatusCode::BAD_REQUEST,
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for RouteError {
    fn into_response(self) -> Response {
        let kind = self.kind();
        let body = ErrorResponse {
            kind: kind.as_str(),
            error: self.code(),
            message: match kind {
                // don't leak driver errors to clients
                ErrorKind::Internal => String::from("internal server error"),
                _ => self.to_string(),
            },
        };

        let mut response = (status_for(kind), Json(body)).into_response();
        if kind == ErrorKind::Internal {
            response.extensions_mut().insert(Arc::new(self));
        }

        response
    }
}
