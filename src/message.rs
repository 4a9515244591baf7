//! Message protocol definitions
//!
//! JSON-based bidirectional message protocol using Serde's tagged enum
//! for type-safe serialization/deserialization.

use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::model::{ChatMessage, ConversationSummary, User};
use crate::types::{ConversationId, ShortCode, TempId, UserId};

/// Client → Server message
///
/// All messages from client to server. Uses tagged enum with snake_case naming.
/// Conversations are addressed by the peer's short code.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Open the 1:1 conversation with a peer
    JoinConversation {
        #[serde(alias = "peer_code")]
        conversation_id: String,
    },
    /// Ask a peer to connect
    RequestConnection {
        #[serde(alias = "conversation_id")]
        peer_code: String,
    },
    /// Accept a pending request from a user
    AcceptConnectionRequest { from_user_id: UserId },
    /// Reject a pending request from a user
    RejectConnectionRequest { from_user_id: UserId },
    /// Send a text or media message to a peer
    SendMessage {
        #[serde(alias = "peer_code")]
        conversation_id: String,
        #[serde(default)]
        content: Option<String>,
        #[serde(default)]
        media_url: Option<String>,
    },
    /// Load recent history with a peer
    LoadMessages {
        #[serde(alias = "peer_code")]
        conversation_id: String,
    },
    /// List all 1:1 conversations of the caller
    ListConversations,
}

/// Server → Client message
///
/// All messages from server to client. Uses tagged enum with snake_case naming.
/// Deserialize is required to carry events across instances on the fanout bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Identity resolved for this connection
    Session {
        user_id: UserId,
        name: String,
        avatar_url: Option<String>,
        code: ShortCode,
    },
    /// Conversation with a peer is open
    Connected {
        conversation_id: ConversationId,
        peer_name: String,
        peer_avatar: Option<String>,
        peer_code: ShortCode,
    },
    /// Outcome of a request_connection
    RequestSent {
        ok: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        already_connected: Option<bool>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pending: Option<bool>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        peer_code: Option<ShortCode>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        conversation_id: Option<ConversationId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// Someone wants to connect
    ConnectionRequest {
        from_user_id: UserId,
        from_name: String,
        from_avatar: Option<String>,
        from_code: ShortCode,
    },
    /// A request this user sent was accepted
    ConnectionRequestAccepted {
        conversation_id: ConversationId,
        peer_name: String,
        peer_avatar: Option<String>,
        peer_code: ShortCode,
    },
    /// A request this user sent was rejected
    RequestRejected { by_name: String },
    /// Provisional message (optimistic)
    ReceiveMessage(ChatMessage),
    /// Provisional message persisted
    MessageConfirmed { temp_id: TempId, message: ChatMessage },
    /// Provisional message could not be persisted (sender only)
    MessageFailed { temp_id: TempId, error: String },
    /// Recent history, oldest first
    PreviousMessages { messages: Vec<ChatMessage> },
    /// Conversations of the caller, newest first
    Conversations {
        conversations: Vec<ConversationSummary>,
    },
    /// Error occurred
    Error { code: ErrorCode, message: String },
}

impl ServerMessage {
    pub fn session(user: &User) -> Self {
        ServerMessage::Session {
            user_id: user.id,
            name: user.name.clone(),
            avatar_url: user.avatar_url.clone(),
            code: user.code(),
        }
    }

    /// `connected` as seen by the holder of `peer`'s counterpart
    pub fn connected(conversation_id: ConversationId, peer: &User) -> Self {
        ServerMessage::Connected {
            conversation_id,
            peer_name: peer.name.clone(),
            peer_avatar: peer.avatar_url.clone(),
            peer_code: peer.code(),
        }
    }

    pub fn connection_request(from: &User) -> Self {
        ServerMessage::ConnectionRequest {
            from_user_id: from.id,
            from_name: from.name.clone(),
            from_avatar: from.avatar_url.clone(),
            from_code: from.code(),
        }
    }

    /// Successful request_sent with no flags
    pub fn request_sent() -> Self {
        ServerMessage::RequestSent {
            ok: true,
            already_connected: None,
            pending: None,
            peer_code: None,
            conversation_id: None,
            error: None,
        }
    }

    /// Failed request_sent carrying the reason
    pub fn request_failed(error: String) -> Self {
        ServerMessage::RequestSent {
            ok: false,
            already_connected: None,
            pending: None,
            peer_code: None,
            conversation_id: None,
            error: Some(error),
        }
    }
}

/// Error codes for ServerMessage::Error
///
/// Represents different error scenarios that can be communicated to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// No authenticated identity on the connection
    Unauthorized,
    /// Short code matches no user
    UserNotFound,
    /// Short code matches several users
    AmbiguousCode,
    /// Tried to connect to oneself
    SelfConnection,
    /// No pending request for the pair
    RequestNotFound,
    /// Not a member of the conversation
    NotParticipant,
    /// Invalid message format or content
    InvalidMessage,
    /// Server-side failure
    Internal,
}

/// Convert AppError to ServerMessage for client notification
impl From<AppError> for ServerMessage {
    fn from(err: AppError) -> Self {
        let (code, message) = match &err {
            AppError::Unauthorized => (ErrorCode::Unauthorized, "Unauthorized".to_string()),
            AppError::UserNotFound(code) => (
                ErrorCode::UserNotFound,
                format!("User not found for code '{}'", code),
            ),
            AppError::AmbiguousCode(code) => (
                ErrorCode::AmbiguousCode,
                format!("Code '{}' matches more than one user", code),
            ),
            AppError::SelfConnection => (ErrorCode::SelfConnection, err.to_string()),
            AppError::RequestNotFound => (ErrorCode::RequestNotFound, err.to_string()),
            AppError::NotParticipant => (ErrorCode::NotParticipant, err.to_string()),
            AppError::EmptyMessage | AppError::MessageTooLong(_) => {
                (ErrorCode::InvalidMessage, err.to_string())
            }
            AppError::Json(e) => (
                ErrorCode::InvalidMessage,
                format!("Invalid message format: {}", e),
            ),
            // Store, bus and transport details stay in the server log
            _ => (ErrorCode::Internal, "Internal error".to_string()),
        };
        ServerMessage::Error { code, message }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MessageKind;

    #[test]
    fn test_client_message_deserialize() {
        let json = r#"{"type": "send_message", "conversation_id": "abc12345", "content": "hi"}"#;
        let msg: ClientMessage = serde_json::from_str(json).unwrap();
        match msg {
            ClientMessage::SendMessage {
                conversation_id,
                content,
                media_url,
            } => {
                assert_eq!(conversation_id, "abc12345");
                assert_eq!(content.as_deref(), Some("hi"));
                assert!(media_url.is_none());
            }
            _ => panic!("Wrong variant"),
        }
    }

    #[test]
    fn test_request_connection_accepts_peer_code() {
        let json = r#"{"type": "request_connection", "peer_code": "abc12345"}"#;
        let msg: ClientMessage = serde_json::from_str(json).unwrap();
        assert!(matches!(msg, ClientMessage::RequestConnection { peer_code } if peer_code == "abc12345"));
    }

    #[test]
    fn test_request_sent_omits_unset_flags() {
        let json = serde_json::to_string(&ServerMessage::request_sent()).unwrap();
        assert_eq!(json, r#"{"type":"request_sent","ok":true}"#);
    }

    #[test]
    fn test_receive_message_is_flattened() {
        let user = User {
            id: UserId::new(),
            name: "Alice".to_string(),
            avatar_url: None,
        };
        let msg = ChatMessage::provisional(
            TempId("tmp_1_abc".to_string()),
            ConversationId::new(),
            &user,
            Some("hi".to_string()),
            None,
        );
        let json = serde_json::to_value(ServerMessage::ReceiveMessage(msg.clone())).unwrap();
        assert_eq!(json["type"], "receive_message");
        assert_eq!(json["temp_id"], "tmp_1_abc");
        assert_eq!(json["optimistic"], true);
        assert_eq!(json["message_type"], "text");

        let back: ServerMessage = serde_json::from_value(json).unwrap();
        assert_eq!(back, ServerMessage::ReceiveMessage(msg));
        assert_eq!(MessageKind::Text.as_str(), "text");
    }

    #[test]
    fn test_error_code_serialize() {
        let msg: ServerMessage = AppError::RequestNotFound.into();
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"code\":\"request_not_found\""));
    }

    #[test]
    fn test_internal_errors_are_not_leaked() {
        let msg: ServerMessage = AppError::ChannelSend.into();
        assert_eq!(
            msg,
            ServerMessage::Error {
                code: ErrorCode::Internal,
                message: "Internal error".to_string()
            }
        );
    }
}
