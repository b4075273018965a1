use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{header, request::Parts, HeaderMap},
};
use tracing::warn;

use crate::{error::ApiError, state::AppState, users::repo::User};

use super::jwt::JwtKeys;

/// The authenticated identity attached to a protected request. The wrapped
/// user has been re-loaded from the store, so a deleted account fails here
/// even while its access token is still cryptographically valid.
pub struct Principal {
    pub user: User,
}

pub(crate) fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    let raw = headers.get(header::COOKIE)?.to_str().ok()?;
    raw.split(';').map(str::trim).find_map(|pair| {
        let (k, v) = pair.split_once('=')?;
        (k == name).then(|| v.to_string())
    })
}

fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|v| v.to_string())
}

#[async_trait]
impl FromRequestParts<AppState> for Principal {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = cookie_value(&parts.headers, "accessToken")
            .or_else(|| bearer_token(&parts.headers))
            .ok_or_else(|| ApiError::Unauthorized("Missing access token".into()))?;

        let keys = JwtKeys::from_ref(state);
        let claims = keys.verify_access(&token).map_err(|e| {
            warn!(error = %e, "access token rejected");
            ApiError::Unauthorized("Invalid or expired access token".into())
        })?;

        let user = state
            .users
            .find_by_id(claims.sub)
            .await?
            .ok_or_else(|| ApiError::Unauthorized("User not found".into()))?;

        Ok(Principal { user })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers_with_cookie(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn cookie_value_finds_named_cookie() {
        let headers = headers_with_cookie("accessToken=abc.def.ghi; refreshToken=zzz");
        assert_eq!(
            cookie_value(&headers, "accessToken").as_deref(),
            Some("abc.def.ghi")
        );
        assert_eq!(cookie_value(&headers, "refreshToken").as_deref(), Some("zzz"));
    }

    #[test]
    fn cookie_value_requires_exact_name() {
        let headers = headers_with_cookie("accessTokenOld=nope");
        assert_eq!(cookie_value(&headers, "accessToken"), None);
    }

    #[test]
    fn bearer_token_requires_scheme() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Token abc"));
        assert_eq!(bearer_token(&headers), None);

        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer abc"),
        );
        assert_eq!(bearer_token(&headers).as_deref(), Some("abc"));
    }
}
