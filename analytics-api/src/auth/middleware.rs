use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use tracing::trace;

use crate::AppState;
use crate::auth::verify_api_key;
use crate::errors::Error;

/// Reject requests whose credential header is missing or wrong.
///
/// A header value that is not valid visible ASCII is treated as missing.
pub async fn require_api_key(State(state): State<AppState>, request: Request, next: Next) -> Result<Response, Error> {
    let auth = &state.config.auth;
    let provided = request
        .headers()
        .get(auth.header_name.as_str())
        .and_then(|value| value.to_str().ok());

    verify_api_key(provided, auth)?;
    trace!("Credential accepted for {}", request.uri().path());

    Ok(next.run(request).await)
}
