use axum::extract::Request;
use axum::middleware::Next;
use axum::response::Response;
use http::StatusCode;
use http::header::AUTHORIZATION;

use crate::util::constant_time_cmp;
use crate::util::env::Var;
use crate::var;

/// Gate for the `/admin` routes: the `Authorization` header must carry `INTERNAL_TOKEN`, with
/// or without a `Bearer ` prefix
pub async fn verify_internal_ident(req: Request, next: Next) -> Result<Response, StatusCode> {
    let header = req
        .headers()
        .get(AUTHORIZATION)
        .ok_or(StatusCode::UNAUTHORIZED)?
        .to_str()
        .map_err(|_| StatusCode::BAD_REQUEST)?;

    let internal_token = var!(Var::InternalToken)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    if token_matches(header, internal_token) {
        Ok(next.run(req).await)
    } else {
        tracing::warn!(uri = %req.uri(), "rejected admin request with a bad token");
        Err(StatusCode::UNAUTHORIZED)
    }
}

fn token_matches(header: &str, expected: &str) -> bool {
    // an unset token must never authorize anything
    if expected.is_empty() {
        return false;
    }

    let presented = header.strip_prefix("Bearer ").unwrap_or(header);
    constant_time_cmp(presented, expected)
}
