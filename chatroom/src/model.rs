use serde::{Deserialize, Serialize};

use crate::error::ChatError;

/// Who produced a message in a conversation.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl std::str::FromStr for Role {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            other => Err(ChatError::Storage(format!("unknown role `{other}`"))),
        }
    }
}

/// Whether `content` holds plain text or a base64 encoded image.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Text,
    Image,
}

impl ContentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::Text => "text",
            ContentKind::Image => "image",
        }
    }
}

impl std::str::FromStr for ContentKind {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(ContentKind::Text),
            "image" => Ok(ContentKind::Image),
            other => Err(ChatError::Storage(format!("unknown content kind `{other}`"))),
        }
    }
}

/// A chat room together with the summary of its latest message.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    #[serde(rename = "roomId")]
    pub id: i64,
    #[serde(rename = "roomName")]
    pub name: String,
    pub last_sender: Option<String>,
    pub last_content: Option<String>,
    /// Unix milliseconds of the message the preview was taken from.
    pub last_time: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(rename = "messageId")]
    pub id: i64,
    pub room_id: i64,
    pub profile_id: i64,
    pub sender: String,
    pub role: Role,
    pub kind: ContentKind,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caption: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    /// Unix milliseconds, assigned by the server.
    pub created_at: i64,
}

impl Message {
    /// Text shown in the room list for this message.
    pub fn preview_text(&self) -> String {
        match self.kind {
            ContentKind::Text => self.content.clone(),
            ContentKind::Image => self
                .caption
                .clone()
                .filter(|c| !c.trim().is_empty())
                .unwrap_or_else(|| "[image]".into()),
        }
    }
}

/// Input for appending a message; id and timestamp are assigned on insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub room_id: i64,
    pub profile_id: i64,
    pub sender: String,
    pub role: Role,
    pub kind: ContentKind,
    pub content: String,
    pub caption: Option<String>,
    pub media_type: Option<String>,
}

impl NewMessage {
    /// A plain text message from a room participant.
    pub fn text(room_id: i64, sender: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            room_id,
            profile_id: 0,
            sender: sender.into(),
            role: Role::User,
            kind: ContentKind::Text,
            content: content.into(),
            caption: None,
            media_type: None,
        }
    }

    pub fn with_profile(mut self, profile_id: i64) -> Self {
        self.profile_id = profile_id;
        self
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }

    /// An image message; `content` must already be base64 encoded.
    pub fn image(
        room_id: i64,
        sender: impl Into<String>,
        content: impl Into<String>,
        media_type: Option<String>,
        caption: Option<String>,
    ) -> Self {
        Self {
            room_id,
            profile_id: 0,
            sender: sender.into(),
            role: Role::User,
            kind: ContentKind::Image,
            content: content.into(),
            caption,
            media_type,
        }
    }
}
