use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use tracing::info;

use onlyus_types::api::{
    CreateUserRequest, CreateUserResponse, LoginRequest, LoginResponse, StatusResponse,
};
use onlyus_types::models::User;
use onlyus_types::pin::is_valid_pin;

use crate::error::ApiError;
use crate::{AppState, with_db};

pub async fn health() -> impl IntoResponse {
    Json(StatusResponse {
        ok: true,
        message: "ONLYUS server running".into(),
    })
}

/// Create an account under a fresh PIN. The PIN is the whole credential.
pub async fn create_user(
    State(state): State<AppState>,
    Json(req): Json<CreateUserRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user = with_db(&state, move |db| db.create_user(&req.username)).await?;
    info!("Account created for {} ({})", user.display_name, user.pin);

    Ok((
        StatusCode::OK,
        Json(CreateUserResponse {
            ok: true,
            pin: user.pin,
            username: user.display_name,
        }),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if !is_valid_pin(&req.pin) {
        return Err(ApiError::NotFound("Invalid PIN"));
    }

    let user = with_db(&state, move |db| db.get_user_by_pin(&req.pin))
        .await?
        .ok_or(ApiError::NotFound("Invalid PIN"))?;

    Ok(Json(LoginResponse {
        ok: true,
        user: User::from(user).into(),
    }))
}
