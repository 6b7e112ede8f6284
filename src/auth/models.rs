//! Authentication Models
//! Mission: request/response shapes for the auth surface.

use crate::store::{Role, User};
use serde::{Deserialize, Serialize};

/// JWT Claims payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String, // subject (user id)
    pub username: String,
    pub role: Role,
    pub exp: usize, // expiration timestamp
}

impl Claims {
    pub fn user_id(&self) -> Option<i64> {
        self.sub.parse().ok()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
    pub display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub token: String,
    pub expires_in: usize, // seconds until expiration
    pub user: UserResponse,
}

/// User response (sanitized)
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserResponse {
    pub id: i64,
    pub username: String,
    pub display_name: String,
    pub avatar: String,
    pub role: Role,
    pub cash: f64,
    pub stocks: i64,
    pub debt: f64,
    pub daily_borrowed: f64,
    pub first_sign_in: bool,
    pub is_employee: bool,
}

impl UserResponse {
    pub fn from_user(user: &User) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            display_name: user.display_name.clone(),
            avatar: user.avatar.clone(),
            role: user.role,
            cash: user.cash,
            stocks: user.stocks,
            debt: user.debt,
            daily_borrowed: user.daily_borrowed,
            first_sign_in: user.first_sign_in,
            is_employee: user.is_employee,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AvatarUpdateRequest {
    pub avatar: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountUpdateRequest {
    pub display_name: Option<String>,
    pub password: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claims_user_id_parsing() {
        let claims = Claims {
            sub: "42".to_string(),
            username: "trader".to_string(),
            role: Role::User,
            exp: 0,
        };
        assert_eq!(claims.user_id(), Some(42));

        let bad = Claims {
            sub: "not-a-number".to_string(),
            username: "trader".to_string(),
            role: Role::User,
            exp: 0,
        };
        assert_eq!(bad.user_id(), None);
    }

    #[test]
    fn test_role_serialization() {
        assert_eq!(serde_json::to_string(&Role::Admin).unwrap(), r#""ADMIN""#);
        let role: Role = serde_json::from_str(r#""USER""#).unwrap();
        assert_eq!(role, Role::User);
    }
}
