pub mod chats;
pub mod error;
pub mod users;

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post},
};
use onlyus_db::Database;
use tracing::error;

use crate::error::ApiError;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
}

/// Account and history routes. The gateway WebSocket is mounted by the server.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(users::health))
        .route("/api/user/create", post(users::create_user))
        .route("/api/user/login", post(users::login))
        .route("/api/chat/{my_pin}/{other_pin}", get(chats::get_history))
        .with_state(state)
}

/// Run a blocking DB call off the async runtime.
pub(crate) async fn with_db<F, T>(state: &AppState, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let db = state.db.clone();
    tokio::task::spawn_blocking(move || f(&db))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ApiError::Internal(anyhow::anyhow!("blocking task failed"))
        })?
        .map_err(ApiError::from)
}
