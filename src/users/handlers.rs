use std::time::Duration;

use axum::{
    extract::{FromRef, Multipart, Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    Json,
};
use serde_json::json;
use tracing::instrument;
use uuid::Uuid;

use crate::{
    auth::{
        extractors::{cookie_value, Principal},
        jwt::JwtKeys,
    },
    error::ApiError,
    response::ApiResponse,
    state::AppState,
};

use super::{
    dto::{
        ChangePasswordRequest, LoginRequest, PublicUser, RefreshRequest, SessionData, TokenData,
    },
    services::{self, AssetUpload, RegisterInput, TokenPair},
};

const ACCESS_COOKIE: &str = "accessToken";
const REFRESH_COOKIE: &str = "refreshToken";

fn auth_cookie(name: &str, value: &str, max_age: Duration) -> HeaderValue {
    format!(
        "{}={}; Path=/; HttpOnly; Secure; SameSite=Strict; Max-Age={}",
        name,
        value,
        max_age.as_secs()
    )
    .parse()
    .unwrap()
}

fn session_cookies(keys: &JwtKeys, pair: &TokenPair) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.append(
        header::SET_COOKIE,
        auth_cookie(ACCESS_COOKIE, &pair.access_token, keys.access_ttl),
    );
    headers.append(
        header::SET_COOKIE,
        auth_cookie(REFRESH_COOKIE, &pair.refresh_token, keys.refresh_ttl),
    );
    headers
}

fn clear_session_cookies() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.append(
        header::SET_COOKIE,
        auth_cookie(ACCESS_COOKIE, "", Duration::ZERO),
    );
    headers.append(
        header::SET_COOKIE,
        auth_cookie(REFRESH_COOKIE, "", Duration::ZERO),
    );
    headers
}

fn bad_part(e: axum::extract::multipart::MultipartError) -> ApiError {
    ApiError::Validation(format!("Invalid multipart body: {e}"))
}

#[instrument(skip(state, multipart))]
pub async fn register(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<ApiResponse<PublicUser>>), ApiError> {
    let mut full_name = String::new();
    let mut email = String::new();
    let mut username = String::new();
    let mut password = String::new();
    let mut avatar = None;
    let mut cover = None;

    while let Some(field) = multipart.next_field().await.map_err(bad_part)? {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };
        match name.as_str() {
            "fullName" => full_name = field.text().await.map_err(bad_part)?,
            "email" => email = field.text().await.map_err(bad_part)?,
            "username" => username = field.text().await.map_err(bad_part)?,
            "password" => password = field.text().await.map_err(bad_part)?,
            "avatar" | "coverImage" => {
                let content_type = field
                    .content_type()
                    .map(str::to_string)
                    .unwrap_or_else(|| "application/octet-stream".into());
                let bytes = field.bytes().await.map_err(bad_part)?;
                let upload = AssetUpload {
                    bytes,
                    content_type,
                };
                if name == "avatar" {
                    avatar = Some(upload);
                } else {
                    cover = Some(upload);
                }
            }
            _ => {}
        }
    }

    let input = RegisterInput {
        full_name,
        email,
        username,
        password,
    };
    let user = services::register_user(&state, input, avatar, cover).await?;

    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::new(
            201,
            "User created successfully",
            PublicUser::from(user),
        )),
    ))
}

#[instrument(skip(state, payload))]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<(HeaderMap, Json<ApiResponse<SessionData>>), ApiError> {
    let (user, pair) =
        services::login(&state, payload.username, payload.email, payload.password).await?;

    let keys = JwtKeys::from_ref(&state);
    let headers = session_cookies(&keys, &pair);
    Ok((
        headers,
        Json(ApiResponse::new(
            200,
            "User logged in successfully",
            SessionData {
                user: user.into(),
                access_token: pair.access_token,
                refresh_token: pair.refresh_token,
            },
        )),
    ))
}

#[instrument(skip(state, principal))]
pub async fn logout(
    State(state): State<AppState>,
    principal: Principal,
) -> Result<(HeaderMap, Json<ApiResponse<serde_json::Value>>), ApiError> {
    services::logout(&state, principal.user.id).await?;
    Ok((
        clear_session_cookies(),
        Json(ApiResponse::new(200, "User logged out successfully", json!({}))),
    ))
}

#[instrument(skip(state, headers, body))]
pub async fn refresh(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Option<Json<RefreshRequest>>,
) -> Result<(HeaderMap, Json<ApiResponse<TokenData>>), ApiError> {
    let presented = body
        .and_then(|Json(b)| b.refresh_token)
        .or_else(|| cookie_value(&headers, REFRESH_COOKIE))
        .ok_or_else(|| ApiError::Unauthorized("Refresh token is required".into()))?;

    let (_user, pair) = services::refresh_session(&state, &presented).await?;

    let keys = JwtKeys::from_ref(&state);
    let response_headers = session_cookies(&keys, &pair);
    Ok((
        response_headers,
        Json(ApiResponse::new(
            200,
            "Access token refreshed successfully",
            TokenData {
                access_token: pair.access_token,
                refresh_token: pair.refresh_token,
            },
        )),
    ))
}

#[instrument(skip(state, principal, payload))]
pub async fn change_password(
    State(state): State<AppState>,
    principal: Principal,
    Json(payload): Json<ChangePasswordRequest>,
) -> Result<Json<ApiResponse<serde_json::Value>>, ApiError> {
    services::change_password(
        &state,
        principal.user.id,
        payload.old_password,
        payload.new_password,
    )
    .await?;
    Ok(Json(ApiResponse::new(
        200,
        "Password updated successfully",
        json!({}),
    )))
}

#[instrument(skip(principal))]
pub async fn current_user(principal: Principal) -> Json<ApiResponse<PublicUser>> {
    Json(ApiResponse::new(
        200,
        "Current user data",
        principal.user.into(),
    ))
}

#[instrument(skip(state))]
pub async fn list_users(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Vec<PublicUser>>>, ApiError> {
    let users = state.users.list().await?;
    Ok(Json(ApiResponse::new(
        200,
        "Users fetched successfully",
        users.into_iter().map(PublicUser::from).collect::<Vec<_>>(),
    )))
}

#[instrument(skip(state, _principal))]
pub async fn get_user(
    State(state): State<AppState>,
    _principal: Principal,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<PublicUser>>, ApiError> {
    let user = state
        .users
        .find_by_id(id)
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".into()))?;
    Ok(Json(ApiResponse::new(
        200,
        "User fetched successfully",
        user.into(),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cookie_values(headers: &HeaderMap) -> Vec<String> {
        headers
            .get_all(header::SET_COOKIE)
            .iter()
            .map(|v| v.to_str().unwrap().to_string())
            .collect()
    }

    #[test]
    fn session_cookies_are_http_only_and_same_site() {
        let state = AppState::fake();
        let keys = JwtKeys::from_ref(&state);
        let pair = TokenPair {
            access_token: "aaa.bbb.ccc".into(),
            refresh_token: "ddd.eee.fff".into(),
        };

        let cookies = cookie_values(&session_cookies(&keys, &pair));
        assert_eq!(cookies.len(), 2);
        assert!(cookies[0].starts_with("accessToken=aaa.bbb.ccc;"));
        assert!(cookies[1].starts_with("refreshToken=ddd.eee.fff;"));
        for cookie in &cookies {
            assert!(cookie.contains("HttpOnly"));
            assert!(cookie.contains("Secure"));
            assert!(cookie.contains("SameSite=Strict"));
            assert!(cookie.contains("Path=/"));
        }
    }

    #[test]
    fn session_cookie_max_age_follows_token_ttls() {
        let state = AppState::fake();
        let keys = JwtKeys::from_ref(&state);
        let pair = TokenPair {
            access_token: "a".into(),
            refresh_token: "r".into(),
        };
        let cookies = cookie_values(&session_cookies(&keys, &pair));
        assert!(cookies[0].ends_with(&format!("Max-Age={}", keys.access_ttl.as_secs())));
        assert!(cookies[1].ends_with(&format!("Max-Age={}", keys.refresh_ttl.as_secs())));
    }

    #[test]
    fn clearing_cookies_expires_both_immediately() {
        let cookies = cookie_values(&clear_session_cookies());
        assert_eq!(cookies.len(), 2);
        assert!(cookies[0].starts_with("accessToken=;"));
        assert!(cookies[1].starts_with("refreshToken=;"));
        for cookie in &cookies {
            assert!(cookie.contains("Max-Age=0"));
        }
    }
}
