use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use super::repo::User;

/// Login requires both identifiers in the body even though the lookup
/// matches on either one.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshRequest {
    #[serde(default)]
    pub refresh_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    pub old_password: Option<String>,
    pub new_password: Option<String>,
}

/// Public projection of a user record.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicUser {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub full_name: String,
    pub avatar_url: String,
    pub cover_image_url: Option<String>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl From<User> for PublicUser {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username,
            email: user.email,
            full_name: user.full_name,
            avatar_url: user.avatar_url,
            cover_image_url: user.cover_image_url,
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }
}

/// Body payload for login: the tokens are also set as cookies.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionData {
    pub user: PublicUser,
    pub access_token: String,
    pub refresh_token: String,
}

/// Body payload for refresh.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenData {
    pub access_token: String,
    pub refresh_token: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_user() -> User {
        let now = OffsetDateTime::now_utc();
        User {
            id: Uuid::new_v4(),
            username: "alice".into(),
            email: "alice@example.com".into(),
            full_name: "Alice Example".into(),
            password_hash: "$argon2id$v=19$secret".into(),
            avatar_key: "avatars/a.png".into(),
            avatar_url: "https://assets.test/avatars/a.png".into(),
            cover_image_key: None,
            cover_image_url: None,
            refresh_token: Some("live-refresh-token".into()),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn public_user_omits_secret_fields() {
        let json = serde_json::to_string(&PublicUser::from(sample_user())).unwrap();
        assert!(json.contains("\"fullName\":\"Alice Example\""));
        assert!(json.contains("\"avatarUrl\""));
        assert!(!json.contains("passwordHash"));
        assert!(!json.contains("$argon2id"));
        assert!(!json.contains("refreshToken"));
        assert!(!json.contains("live-refresh-token"));
    }

    #[test]
    fn requests_deserialize_camel_case() {
        let login: LoginRequest = serde_json::from_str(
            r#"{"username":"alice","email":"alice@example.com","password":"pw"}"#,
        )
        .unwrap();
        assert_eq!(login.username.as_deref(), Some("alice"));

        let refresh: RefreshRequest =
            serde_json::from_str(r#"{"refreshToken":"tok"}"#).unwrap();
        assert_eq!(refresh.refresh_token.as_deref(), Some("tok"));

        let change: ChangePasswordRequest =
            serde_json::from_str(r#"{"oldPassword":"a","newPassword":"b"}"#).unwrap();
        assert_eq!(change.old_password.as_deref(), Some("a"));
        assert_eq!(change.new_password.as_deref(), Some("b"));
    }
}
