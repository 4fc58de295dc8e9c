use serde::{Deserialize, Serialize};

use crate::models::{Message, User};

// -- Accounts --

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub username: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateUserResponse {
    pub ok: bool,
    pub pin: String,
    pub username: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub pin: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub ok: bool,
    pub user: UserSummary,
}

/// HTTP view of a [`User`]; clients read the name as `username`.
#[derive(Debug, Serialize, Deserialize)]
pub struct UserSummary {
    pub pin: String,
    pub username: String,
}

impl From<User> for UserSummary {
    fn from(user: User) -> Self {
        Self {
            pin: user.pin,
            username: user.display_name,
        }
    }
}

// -- History --

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatHistoryResponse {
    pub ok: bool,
    pub channel_id: String,
    pub messages: Vec<Message>,
}

// -- Errors / status --

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub ok: bool,
    pub message: String,
}
