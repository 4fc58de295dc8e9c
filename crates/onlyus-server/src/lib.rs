pub mod config;

use std::sync::Arc;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    response::IntoResponse,
    routing::get,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use onlyus_api::AppStateInner;
use onlyus_db::Database;
use onlyus_gateway::connection;
use onlyus_gateway::dispatcher::Dispatcher;

#[derive(Clone)]
struct ServerState {
    db: Arc<Database>,
    dispatcher: Dispatcher,
}

/// Full application: HTTP account/history routes plus the `/gateway`
/// WebSocket, sharing one store and one dispatcher.
pub fn build_app(db: Arc<Database>) -> Router {
    let state = ServerState {
        db: db.clone(),
        dispatcher: Dispatcher::new(),
    };

    let api_routes = onlyus_api::router(Arc::new(AppStateInner { db }));

    let ws_route = Router::new()
        .route("/gateway", get(ws_upgrade))
        .with_state(state);

    Router::new()
        .merge(api_routes)
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn ws_upgrade(State(state): State<ServerState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| connection::handle_connection(socket, state.dispatcher, state.db))
}
