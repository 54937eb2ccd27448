use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Conversation, ConversationKind, DeliveryStatus, Message, Participant};

// -- JWT Claims --

/// Claims shared by the REST middleware and the WebSocket upgrade. Identity
/// issuance lives outside this system; we only verify and extract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub username: String,
    pub exp: usize,
}

// -- Conversations --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateConversationRequest {
    pub participant_ids: Vec<Uuid>,
    pub kind: ConversationKind,
    pub title: Option<String>,
}

/// A conversation the caller participates in, with its most recent
/// non-deleted message attached (or none if the history is empty).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationPreview {
    pub conversation: Conversation,
    pub last_message: Option<Message>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationDetail {
    pub conversation: Conversation,
    pub participants: Vec<Participant>,
}

// -- Messages --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateMessageRequest {
    pub content: String,
    pub kind: String,
}

#[derive(Debug, Deserialize)]
pub struct MessagePageQuery {
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

fn default_page() -> u32 {
    1
}

fn default_page_size() -> u32 {
    50
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SetStatusRequest {
    pub status: DeliveryStatus,
}

// -- Errors --

/// Structured error body returned by API-style callers.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}

// -- Misc --

#[derive(Debug, Serialize, Deserialize)]
pub struct MarkReadRequest {
    pub at: Option<DateTime<Utc>>,
}
