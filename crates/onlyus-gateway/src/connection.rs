use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

use onlyus_db::Database;
use onlyus_types::events::GatewayCommand;

use crate::dispatcher::Dispatcher;
use crate::session::Session;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// How much of an unparseable frame ends up in the log.
const BAD_FRAME_LOG_CHARS: usize = 200;

/// Drive one WebSocket connection until either side goes away.
///
/// Outbound traffic (channel broadcasts, targeted events, pings) runs in its
/// own task. Inbound commands are handled one at a time on this task, so a
/// command always finishes even if the socket closes halfway through.
pub async fn handle_connection(socket: WebSocket, dispatcher: Dispatcher, db: Arc<Database>) {
    let (mut sender, mut receiver) = socket.split();

    let (conn, mut conn_rx) = dispatcher.register_connection().await;
    let conn_id = conn.conn_id();
    info!("Connection {} opened", conn_id);

    let mut broadcast_rx = dispatcher.subscribe();

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();

    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = broadcast_rx.recv() => {
                    let msg = match result {
                        Ok(msg) => msg,
                        Err(RecvError::Lagged(n)) => {
                            warn!("Connection {} lagged by {} broadcasts", conn_id, n);
                            continue;
                        }
                        Err(RecvError::Closed) => break,
                    };

                    if !msg.reaches(conn_id) {
                        continue;
                    }

                    if sender.send(Message::Text(msg.json.to_string().into())).await.is_err() {
                        break;
                    }
                }
                event = conn_rx.recv() => {
                    let Some(event) = event else { break };
                    let text = match serde_json::to_string(&event) {
                        Ok(text) => text,
                        Err(e) => {
                            error!("Failed to serialize event for {}: {}", conn_id, e);
                            continue;
                        }
                    };
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!(
                                "Connection {} heartbeat timeout (missed {} pongs)",
                                conn_id, missed_heartbeats
                            );
                            break;
                        }
                    }
                    if sender.send(Message::Ping(Bytes::new())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let mut session = Session::new(dispatcher, db, conn);

    loop {
        tokio::select! {
            _ = &mut send_task => break,
            frame = receiver.next() => {
                let msg = match frame {
                    Some(Ok(msg)) => msg,
                    Some(Err(e)) => {
                        warn!("Connection {} read error: {}", conn_id, e);
                        break;
                    }
                    None => break,
                };

                match msg {
                    Message::Text(text) => match serde_json::from_str::<GatewayCommand>(&text) {
                        Ok(cmd) => session.handle(cmd).await,
                        Err(e) => {
                            let raw: String = text.chars().take(BAD_FRAME_LOG_CHARS).collect();
                            warn!("Connection {} bad command: {} -- raw: {}", conn_id, e, raw);
                        }
                    },
                    Message::Pong(_) => {
                        pong_received.store(true, Ordering::Release);
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
        }
    }

    send_task.abort();
    session.close().await;
    info!("Connection {} closed", conn_id);
}
