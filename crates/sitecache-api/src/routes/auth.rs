//! Management authentication

use axum::{
    extract::{FromRef, FromRequestParts},
    http::{header::AUTHORIZATION, request::Parts},
};
use tracing::{debug, warn};

use crate::error::ApiError;
use crate::state::AppState;

/// Extractor for callers holding the admin bearer token
///
/// With no token configured every management request is refused.
pub struct RequireAdmin;

impl<S> FromRequestParts<S> for RequireAdmin
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let app_state = AppState::from_ref(state);

        let Some(expected) = app_state.admin_token.as_deref() else {
            warn!("Management request refused: no admin token configured");
            return Err(ApiError::Unauthorized);
        };

        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .and_then(|h| h.strip_prefix("Bearer "))
            .ok_or(ApiError::Unauthorized)?;

        if !tokens_match(token.as_bytes(), expected.as_bytes()) {
            debug!("Management request with wrong token");
            return Err(ApiError::Unauthorized);
        }

        Ok(RequireAdmin)
    }
}

/// Compare without short-circuiting on the first differing byte
fn tokens_match(given: &[u8], expected: &[u8]) -> bool {
    given.len() == expected.len()
        && given
            .iter()
            .zip(expected)
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokens_match() {
        assert!(tokens_match(b"s3cret", b"s3cret"));
        assert!(!tokens_match(b"s3cre", b"s3cret"));
        assert!(!tokens_match(b"s3crex", b"s3cret"));
        assert!(!tokens_match(b"", b"s3cret"));
    }
}
