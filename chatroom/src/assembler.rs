use serde::{Deserialize, Serialize};

use crate::model::{ContentKind, Message, Role};

/// Media type assumed for images stored without one.
pub const FALLBACK_IMAGE_TYPE: &str = "image/jpeg";

/// One entry of the `messages` array sent to the completion API.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: Vec<ContentBlock>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock::Text { text: text.into() }
    }

    /// An inline `data:` url carrying base64 image bytes.
    pub fn inline_image(media_type: &str, base64: &str) -> Self {
        ContentBlock::ImageUrl {
            image_url: ImageUrl {
                url: format!("data:{media_type};base64,{base64}"),
            },
        }
    }
}

/// Convert a room's history into completion payload entries, preserving order.
pub fn assemble(history: &[Message]) -> Vec<ChatMessage> {
    history.iter().map(to_chat_message).collect()
}

fn to_chat_message(msg: &Message) -> ChatMessage {
    let content = match msg.kind {
        ContentKind::Text => vec![ContentBlock::text(msg.content.as_str())],
        ContentKind::Image => {
            let media_type = msg.media_type.as_deref().unwrap_or(FALLBACK_IMAGE_TYPE);
            vec![
                ContentBlock::text(msg.caption.clone().unwrap_or_default()),
                ContentBlock::inline_image(media_type, &msg.content),
            ]
        }
    };
    ChatMessage {
        role: msg.role,
        content,
    }
}
