use axum::{
    Json,
    extract::{Path, State},
    response::IntoResponse,
};

use onlyus_types::api::ChatHistoryResponse;
use onlyus_types::channel::derive_channel_id;
use onlyus_types::models::Message;
use onlyus_types::pin::is_valid_pin;

use crate::error::ApiError;
use crate::{AppState, with_db};

enum Lookup {
    UnknownMe,
    UnknownOther,
    Found(Vec<Message>),
}

/// Read-only history for a PIN pair. Unlike the gateway's open-channel this
/// never creates the channel.
pub async fn get_history(
    State(state): State<AppState>,
    Path((my_pin, other_pin)): Path<(String, String)>,
) -> Result<impl IntoResponse, ApiError> {
    let channel_id = derive_channel_id(&my_pin, &other_pin);

    let cid = channel_id.clone();
    let lookup = with_db(&state, move |db| {
        if !is_valid_pin(&my_pin) || db.get_user_by_pin(&my_pin)?.is_none() {
            return Ok(Lookup::UnknownMe);
        }
        if !is_valid_pin(&other_pin) || db.get_user_by_pin(&other_pin)?.is_none() {
            return Ok(Lookup::UnknownOther);
        }
        let messages = db.list_messages(&cid)?.into_iter().map(Message::from).collect();
        Ok(Lookup::Found(messages))
    })
    .await?;

    match lookup {
        Lookup::UnknownMe => Err(ApiError::NotFound("Your PIN not found")),
        Lookup::UnknownOther => Err(ApiError::NotFound("Other PIN not found")),
        Lookup::Found(messages) => Ok(Json(ChatHistoryResponse {
            ok: true,
            channel_id,
            messages,
        })),
    }
}
