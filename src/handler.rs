//! WebSocket connection handler
//!
//! Handles individual client connections: WebSocket handshake with session capture,
//! identity resolution, message parsing, and bidirectional communication with the hub.

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::header::COOKIE;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::connection::{Connection, CLIENT_BUFFER_SIZE};
use crate::error::AppError;
use crate::events;
use crate::identity;
use crate::message::{ClientMessage, ServerMessage};
use crate::multiplexer;
use crate::state::AppState;
use crate::types::ConnectionId;

/// Handle a new TCP connection
///
/// Performs the WebSocket handshake, resolves the session, sets up bidirectional
/// communication, and manages the connection lifecycle.
pub async fn handle_connection(stream: TcpStream, state: AppState) -> Result<(), AppError> {
    let peer_addr = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "unknown".to_string());

    debug!("New TCP connection from {}", peer_addr);

    // WebSocket handshake, capturing the session token on the way
    let mut token = None;
    let capture = |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
        let cookie = req.headers().get(COOKIE).and_then(|v| v.to_str().ok());
        token = identity::session_token(cookie, req.uri().query());
        Ok(resp)
    };
    let ws_stream = tokio_tungstenite::accept_hdr_async(stream, capture).await?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    let conn_id = ConnectionId::new();

    // Channel for hub -> client messages
    let (msg_tx, mut msg_rx) = mpsc::channel::<ServerMessage>(CLIENT_BUFFER_SIZE);

    if let Err(e) = state.hub.register(conn_id, msg_tx.clone()).await {
        error!("Failed to register connection {} - hub closed", conn_id);
        return Err(e);
    }

    let user = match identity::resolve_by_session(state.store.as_ref(), token.as_deref()).await {
        Ok(user) => Some(user),
        Err(AppError::Unauthorized) => None,
        Err(e) => {
            error!("Session lookup failed for {}: {}", conn_id, e);
            None
        }
    };
    let conn = Connection::new(conn_id, user, msg_tx);
    info!(
        "Connection {} from {} as {}",
        conn_id,
        peer_addr,
        conn.display_name()
    );

    if conn.is_authenticated() {
        if let Err(e) = multiplexer::establish(&state, &conn).await {
            warn!("Connection {} setup incomplete: {}", conn_id, e);
        }
    } else if conn.send(AppError::Unauthorized.into()).is_err() {
        debug!("Connection {} closed during setup", conn_id);
    }

    // Read task (WebSocket -> dispatch), one event at a time in arrival order
    let read_state = state.clone();
    let mut read_task = tokio::spawn(async move {
        while let Some(msg_result) = ws_receiver.next().await {
            match msg_result {
                Ok(Message::Text(text)) => match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(client_msg) => events::dispatch(&read_state, &conn, client_msg).await,
                    Err(e) => {
                        warn!("Invalid JSON from {}: {}", conn.id, e);
                        if conn.send(AppError::Json(e).into()).is_err() {
                            break;
                        }
                    }
                },
                Ok(Message::Close(_)) => {
                    debug!("Connection {} sent close frame", conn.id);
                    break;
                }
                Ok(Message::Ping(_)) => {
                    // Pong is handled automatically by tungstenite
                    debug!("Ping from {}", conn.id);
                }
                Ok(_) => {
                    // Binary and pong frames are ignored
                }
                Err(e) => {
                    error!("WebSocket error for {}: {}", conn.id, e);
                    break;
                }
            }
        }
        debug!("Read task ended for {}", conn.id);
    });

    // Write task (ServerMessage -> WebSocket)
    let mut write_task = tokio::spawn(async move {
        while let Some(msg) = msg_rx.recv().await {
            match serde_json::to_string(&msg) {
                Ok(json) => {
                    if ws_sender.send(Message::Text(json.into())).await.is_err() {
                        debug!("WebSocket send failed, ending write task");
                        break;
                    }
                }
                Err(e) => {
                    error!("Failed to serialize message: {}", e);
                }
            }
        }
        debug!("Write task ended for connection");

        let _ = ws_sender.close().await;
    });

    // Wait for either task to complete
    tokio::select! {
        _ = &mut read_task => {
            debug!("Read task completed for {}", conn_id);
        }
        _ = &mut write_task => {
            debug!("Write task completed for {}", conn_id);
            read_task.abort();
        }
    }

    // Leaves every room; in-flight persistence still reports to the rooms it targeted
    let _ = state.hub.unregister(conn_id).await;

    info!("Connection {} disconnected", conn_id);

    Ok(())
}
