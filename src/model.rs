//! Domain records read from and written to the relational store

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{ConversationId, MessageId, ShortCode, TempId, UserId};

/// A user as issued by the external identity provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub avatar_url: Option<String>,
}

impl User {
    pub fn code(&self) -> ShortCode {
        ShortCode::of(&self.id)
    }
}

/// Connection request status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Accepted,
    Rejected,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Accepted => "accepted",
            RequestStatus::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(RequestStatus::Pending),
            "accepted" => Some(RequestStatus::Accepted),
            "rejected" => Some(RequestStatus::Rejected),
            _ => None,
        }
    }
}

/// Message content type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    Image,
    Video,
}

const VIDEO_EXTENSIONS: [&str; 4] = [".mp4", ".webm", ".mov", ".m4v"];

impl MessageKind {
    /// Classify a message by its media reference
    ///
    /// No media is text. Media whose path (query string ignored) ends in a
    /// video extension is video, anything else is image.
    pub fn classify(media_url: Option<&str>) -> Self {
        let Some(url) = media_url else {
            return MessageKind::Text;
        };
        let path = url.split(['?', '#']).next().unwrap_or(url).to_lowercase();
        if VIDEO_EXTENSIONS.iter().any(|ext| path.ends_with(ext)) {
            MessageKind::Video
        } else {
            MessageKind::Image
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::Image => "image",
            MessageKind::Video => "video",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "text" => Some(MessageKind::Text),
            "image" => Some(MessageKind::Image),
            "video" => Some(MessageKind::Video),
            _ => None,
        }
    }
}

/// A chat message as seen by clients
///
/// Provisional messages carry `temp_id` and `optimistic = true` and no `id`.
/// Committed messages carry the store-assigned `id` and `optimistic = false`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<MessageId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_id: Option<TempId>,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub sender_name: Option<String>,
    pub sender_avatar: Option<String>,
    pub message_type: MessageKind,
    pub content: Option<String>,
    pub media_url: Option<String>,
    pub created_at: DateTime<Utc>,
    pub optimistic: bool,
}

impl ChatMessage {
    /// Build the provisional form of a send
    pub fn provisional(
        temp_id: TempId,
        conversation_id: ConversationId,
        sender: &User,
        content: Option<String>,
        media_url: Option<String>,
    ) -> Self {
        Self {
            id: None,
            temp_id: Some(temp_id),
            conversation_id,
            sender_id: sender.id,
            sender_name: Some(sender.name.clone()),
            sender_avatar: sender.avatar_url.clone(),
            message_type: MessageKind::classify(media_url.as_deref()),
            content,
            media_url,
            created_at: Utc::now(),
            optimistic: true,
        }
    }

    /// Payload handed to the store for persistence
    pub fn to_new(&self) -> NewMessage {
        NewMessage {
            conversation_id: self.conversation_id,
            sender_id: self.sender_id,
            kind: self.message_type,
            content: self.content.clone(),
            media_url: self.media_url.clone(),
            created_at: self.created_at,
        }
    }
}

/// Message awaiting persistence
#[derive(Debug, Clone, PartialEq)]
pub struct NewMessage {
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub kind: MessageKind,
    pub content: Option<String>,
    pub media_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// One 1:1 conversation from the point of view of one participant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub conversation_id: ConversationId,
    pub peer_id: UserId,
    pub peer_code: ShortCode,
    pub peer_name: String,
    pub peer_avatar: Option<String>,
}
