use axum::extract::FromRef;
use bytes::Bytes;
use lazy_static::lazy_static;
use regex::Regex;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::{
    auth::{
        jwt::JwtKeys,
        password::{hash_password, verify_password},
    },
    error::ApiError,
    state::AppState,
    storage::{ext_from_mime, StoredAsset},
};

use super::repo::{NewUser, User};

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

#[derive(Debug)]
pub struct RegisterInput {
    pub full_name: String,
    pub email: String,
    pub username: String,
    pub password: String,
}

/// An in-flight file part from the registration form.
pub struct AssetUpload {
    pub bytes: Bytes,
    pub content_type: String,
}

#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

async fn upload_asset(
    state: &AppState,
    prefix: &str,
    upload: &AssetUpload,
) -> anyhow::Result<StoredAsset> {
    let ext = ext_from_mime(&upload.content_type).unwrap_or("bin");
    let key = format!("{}/{}.{}", prefix, Uuid::new_v4(), ext);
    state
        .assets
        .upload(&key, upload.bytes.clone(), &upload.content_type)
        .await
}

/// Best-effort deletion of uploaded assets after a failed registration.
/// Deletion failures are logged; the original error is what the caller
/// surfaces.
async fn discard_assets(state: &AppState, avatar: &StoredAsset, cover: Option<&StoredAsset>) {
    for asset in std::iter::once(avatar).chain(cover) {
        if let Err(e) = state.assets.delete(&asset.key).await {
            warn!(error = %e, key = %asset.key, "failed to delete asset during rollback");
        }
    }
}

/// Registration workflow: validate, check uniqueness, upload assets,
/// create the record, re-fetch it sanitized. If the record step fails the
/// uploaded assets are deleted; upload failures before that point leave no
/// persisted state to compensate.
pub async fn register_user(
    state: &AppState,
    input: RegisterInput,
    avatar: Option<AssetUpload>,
    cover: Option<AssetUpload>,
) -> Result<User, ApiError> {
    let full_name = input.full_name.trim().to_string();
    let email = input.email.trim().to_lowercase();
    let username = input.username.trim().to_lowercase();
    if full_name.is_empty()
        || email.is_empty()
        || username.is_empty()
        || input.password.trim().is_empty()
    {
        return Err(ApiError::Validation("All fields are required".into()));
    }
    if !is_valid_email(&email) {
        return Err(ApiError::Validation("Invalid email".into()));
    }

    if let Some(existing) = state
        .users
        .find_by_identity(Some(&username), Some(&email))
        .await?
    {
        let mut fields = Vec::new();
        if existing.username.eq_ignore_ascii_case(&username) {
            fields.push("username".to_string());
        }
        if existing.email.eq_ignore_ascii_case(&email) {
            fields.push("email".to_string());
        }
        warn!(%username, %email, "registration conflict");
        return Err(ApiError::Conflict {
            message: format!(
                "User with email: {email} or username: {username} already exists"
            ),
            fields,
        });
    }

    let avatar = avatar.ok_or_else(|| ApiError::Validation("Avatar file is missing".into()))?;

    let stored_avatar = upload_asset(state, "avatars", &avatar).await.map_err(|e| {
        error!(error = %e, "avatar upload failed");
        ApiError::Upload("Failed to upload avatar".into())
    })?;

    let mut stored_cover = None;
    if let Some(cover) = cover {
        match upload_asset(state, "covers", &cover).await {
            Ok(asset) => stored_cover = Some(asset),
            Err(e) => {
                error!(error = %e, "cover image upload failed");
                return Err(ApiError::Upload("Failed to upload cover image".into()));
            }
        }
    }

    let new_user = NewUser {
        username,
        email,
        full_name,
        password_hash: hash_password(&input.password)?,
        avatar_key: stored_avatar.key.clone(),
        avatar_url: stored_avatar.url.clone(),
        cover_image_key: stored_cover.as_ref().map(|a| a.key.clone()),
        cover_image_url: stored_cover.as_ref().map(|a| a.url.clone()),
    };

    let created = match state.users.create(new_user).await {
        Ok(user) => user,
        Err(e) => {
            error!(error = %e, "user creation failed, deleting uploaded assets");
            discard_assets(state, &stored_avatar, stored_cover.as_ref()).await;
            return Err(e.into());
        }
    };

    let fetched = match state.users.find_by_id(created.id).await {
        Ok(Some(user)) => user,
        Ok(None) => {
            error!(user_id = %created.id, "created user could not be re-fetched");
            discard_assets(state, &stored_avatar, stored_cover.as_ref()).await;
            return Err(ApiError::Internal(anyhow::anyhow!(
                "created user {} could not be re-fetched",
                created.id
            )));
        }
        Err(e) => {
            discard_assets(state, &stored_avatar, stored_cover.as_ref()).await;
            return Err(e.into());
        }
    };

    info!(user_id = %fetched.id, username = %fetched.username, "user registered");
    Ok(fetched)
}

/// Sign a fresh access/refresh pair and persist the refresh token,
/// overwriting whatever was stored before. Any previously issued refresh
/// token stops working at this point.
pub async fn issue_session(state: &AppState, user_id: Uuid) -> Result<TokenPair, ApiError> {
    let keys = JwtKeys::from_ref(state);
    let access_token = keys.sign_access(user_id)?;
    let refresh_token = keys.sign_refresh(user_id)?;
    state
        .users
        .set_refresh_token(user_id, Some(&refresh_token))
        .await?;
    Ok(TokenPair {
        access_token,
        refresh_token,
    })
}

pub async fn login(
    state: &AppState,
    username: Option<String>,
    email: Option<String>,
    password: Option<String>,
) -> Result<(User, TokenPair), ApiError> {
    let username = username
        .map(|u| u.trim().to_lowercase())
        .filter(|u| !u.is_empty());
    let email = email
        .map(|e| e.trim().to_lowercase())
        .filter(|e| !e.is_empty());
    // Both identifiers are required even though the lookup matches either.
    let (Some(username), Some(email)) = (username, email) else {
        return Err(ApiError::Validation("username or email is required".into()));
    };

    let user = state
        .users
        .find_by_identity(Some(&username), Some(&email))
        .await?
        .ok_or_else(|| ApiError::NotFound("User does not exist".into()))?;

    if !verify_password(password.as_deref().unwrap_or_default(), &user.password_hash)? {
        warn!(user_id = %user.id, "login with invalid password");
        return Err(ApiError::Unauthorized("Invalid user credentials".into()));
    }

    let pair = issue_session(state, user.id).await?;
    info!(user_id = %user.id, "user logged in");
    Ok((user, pair))
}

pub async fn logout(state: &AppState, user_id: Uuid) -> Result<(), ApiError> {
    state.users.set_refresh_token(user_id, None).await?;
    info!(%user_id, "user logged out");
    Ok(())
}

/// Rotate a session: verify the presented refresh token, then swap the
/// stored token for a new one in a single conditional update. A token that
/// verifies but no longer matches the stored value has been superseded
/// (prior refresh or logout) and is rejected.
pub async fn refresh_session(
    state: &AppState,
    presented: &str,
) -> Result<(User, TokenPair), ApiError> {
    let keys = JwtKeys::from_ref(state);
    let claims = keys.verify_refresh(presented).map_err(|e| {
        warn!(error = %e, "refresh token rejected");
        ApiError::Unauthorized("Invalid refresh token".into())
    })?;

    let user = state
        .users
        .find_by_id(claims.sub)
        .await?
        .ok_or_else(|| ApiError::Unauthorized("Invalid refresh token".into()))?;

    let access_token = keys.sign_access(user.id)?;
    let refresh_token = keys.sign_refresh(user.id)?;

    let swapped = state
        .users
        .compare_and_swap_refresh_token(user.id, presented, &refresh_token)
        .await?;
    if !swapped {
        warn!(user_id = %user.id, "superseded refresh token presented");
        return Err(ApiError::Unauthorized("Invalid refresh token".into()));
    }

    info!(user_id = %user.id, "session refreshed");
    Ok((
        user,
        TokenPair {
            access_token,
            refresh_token,
        },
    ))
}

pub async fn change_password(
    state: &AppState,
    user_id: Uuid,
    old_password: Option<String>,
    new_password: Option<String>,
) -> Result<(), ApiError> {
    if old_password.is_none() && new_password.is_none() {
        return Err(ApiError::Validation("Password is required".into()));
    }

    let user = state
        .users
        .find_by_id(user_id)
        .await?
        .ok_or_else(|| ApiError::Unauthorized("User not found".into()))?;

    if !verify_password(
        old_password.as_deref().unwrap_or_default(),
        &user.password_hash,
    )? {
        warn!(%user_id, "password change with incorrect old password");
        return Err(ApiError::Unauthorized("Old password is incorrect".into()));
    }

    let hash = hash_password(new_password.as_deref().unwrap_or_default())?;
    state.users.update_password(user_id, &hash).await?;
    // The stored refresh token is left untouched; the active session
    // survives a password change.
    info!(%user_id, "password updated");
    Ok(())
}
