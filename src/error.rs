//! Error types for the chat server
//!
//! Defines handler-level errors, store errors, bus errors and message send errors.
//! Uses thiserror for ergonomic error definitions.

use thiserror::Error;

/// Application-level errors
///
/// Covers both fatal errors (connection termination) and
/// business errors (send error message to client).
#[derive(Debug, Error)]
pub enum AppError {
    /// WebSocket protocol error (fatal)
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// JSON serialization/deserialization error
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// Hub command channel closed (fatal - internal channel broken)
    #[error("Channel send error")]
    ChannelSend,

    /// Relational store failure
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Outbound channel of the connection closed
    #[error("Send error: {0}")]
    Send(#[from] SendError),

    /// No resolvable identity on the connection
    #[error("Unauthorized")]
    Unauthorized,

    /// Short code matches no user
    #[error("User not found: {0}")]
    UserNotFound(String),

    /// Short code matches more than one user
    #[error("Ambiguous code: {0}")]
    AmbiguousCode(String),

    /// Connection request addressed to oneself
    #[error("Cannot connect to yourself")]
    SelfConnection,

    /// No pending connection request for the pair
    #[error("Request not found or already handled")]
    RequestNotFound,

    /// Actor is not a participant of the conversation
    #[error("Not a participant")]
    NotParticipant,

    /// Message has neither text nor media
    #[error("Message is empty")]
    EmptyMessage,

    /// Message text exceeds the configured limit
    #[error("Message too long (max {0} chars)")]
    MessageTooLong(usize),
}

impl AppError {
    /// Server-side failure whose details stay in the log
    pub fn is_internal(&self) -> bool {
        !matches!(
            self,
            AppError::Json(_)
                | AppError::Unauthorized
                | AppError::UserNotFound(_)
                | AppError::AmbiguousCode(_)
                | AppError::SelfConnection
                | AppError::RequestNotFound
                | AppError::NotParticipant
                | AppError::EmptyMessage
                | AppError::MessageTooLong(_)
        )
    }
}

/// Relational store errors
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Row content that does not decode (bad uuid, unknown enum value)
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

/// Fanout bus errors
#[derive(Debug, Error)]
pub enum BusError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("envelope encoding error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Message send errors
///
/// Occurs when attempting to send messages through closed channels.
#[derive(Debug, Error)]
pub enum SendError {
    /// The receiving end of the channel has been closed
    #[error("Channel closed")]
    ChannelClosed,
    /// The client is not draining its outbound queue
    #[error("Outbound queue full")]
    Full,
}
