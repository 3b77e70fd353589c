use super::handler::RelayService;
use axum::{
    extract::{FromRequestParts, Query},
    http::{header, request::Parts},
};
use core::convert::Infallible;
use serde::Deserialize;

/// Whether the caller presented the configured token.
///
/// Never rejects: producers receive the flag and decide for themselves what
/// an unauthenticated caller may see.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Authenticated(pub bool);

#[derive(Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

impl FromRequestParts<RelayService> for Authenticated {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        service: &RelayService,
    ) -> Result<Self, Self::Rejection> {
        let Some(expected) = service.auth_token() else {
            return Ok(Self(true));
        };

        let from_header = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(bearer_token);

        let presented = match from_header {
            Some(token) => Some(token.to_string()),
            None => Query::<TokenQuery>::try_from_uri(&parts.uri)
                .ok()
                .and_then(|Query(query)| query.token),
        };

        Ok(Self(presented.as_deref() == Some(expected)))
    }
}

/// Extracts `<t>` from `token <t>` or `Bearer <t>`.
fn bearer_token(value: &str) -> Option<&str> {
    let (scheme, token) = value.trim().split_once(' ')?;
    if scheme.eq_ignore_ascii_case("token") || scheme.eq_ignore_ascii_case("bearer") {
        Some(token.trim())
    } else {
        None
    }
}
