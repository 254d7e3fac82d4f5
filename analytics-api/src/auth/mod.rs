//! Shared-secret credential check.
//!
//! Every analytics route sits behind [`middleware::require_api_key`], which reads the configured
//! header (`X-API-Key` by default) and compares it to the single configured key. There is one
//! key, no rotation and no per-caller identity; a mismatch or a missing header is a 401 before
//! any cache or warehouse work happens.

use crate::config::AuthConfig;
use crate::errors::Error;

pub mod middleware;

/// Accept `provided` iff it equals the configured key, returning it on success.
pub fn verify_api_key<'a>(provided: Option<&'a str>, config: &AuthConfig) -> Result<&'a str, Error> {
    match provided {
        Some(key) if key == config.api_key => Ok(key),
        _ => Err(Error::Unauthenticated),
    }
}
