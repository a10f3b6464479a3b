use axum::{
    body::Body,
    extract::State,
    http::{Request, header::AUTHORIZATION},
    middleware::Next,
    response::Response,
};

use crate::{error::AppError, state::SharedState};

const BEARER_PREFIX: &str = "Bearer ";

/// Verify the `Authorization: Bearer` token and attach the caller identity to the request.
pub async fn require_caller(
    State(state): State<SharedState>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    let token = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix(BEARER_PREFIX))
        .map(|value| value.trim().to_owned())
        .ok_or_else(|| AppError::Unauthorized("missing bearer token".into()))?;

    let caller = state.verifier().verify(&token).await?;
    req.extensions_mut().insert(caller);
    Ok(next.run(req).await)
}
