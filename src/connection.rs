//! Per-connection context
//!
//! Created once the WebSocket handshake completes and dropped on disconnect. The
//! identity is resolved at connect time and cached here for the connection's lifetime.

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::error::{AppError, SendError};
use crate::message::ServerMessage;
use crate::model::User;
use crate::types::ConnectionId;

/// Outbound queue capacity per connection
pub const CLIENT_BUFFER_SIZE: usize = 64;

/// Live connection state
#[derive(Debug, Clone)]
pub struct Connection {
    /// Unique identifier for this connection
    pub id: ConnectionId,
    /// Authenticated user (None when the session did not resolve)
    user: Option<User>,
    /// Server → Client message channel
    sender: mpsc::Sender<ServerMessage>,
}

impl Connection {
    pub fn new(
        id: ConnectionId,
        user: Option<User>,
        sender: mpsc::Sender<ServerMessage>,
    ) -> Self {
        Self { id, user, sender }
    }

    /// Send a message to this connection only
    ///
    /// Never waits: fails if the client disconnected or stopped draining its queue.
    pub fn send(&self, msg: ServerMessage) -> Result<(), SendError> {
        self.sender.try_send(msg).map_err(|e| match e {
            TrySendError::Full(_) => SendError::Full,
            TrySendError::Closed(_) => SendError::ChannelClosed,
        })
    }

    /// The authenticated actor, or `Unauthorized`
    pub fn user(&self) -> Result<&User, AppError> {
        self.user.as_ref().ok_or(AppError::Unauthorized)
    }

    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }

    /// Display name for logs
    pub fn display_name(&self) -> &str {
        self.user.as_ref().map_or("anonymous", |u| u.name.as_str())
    }
}
