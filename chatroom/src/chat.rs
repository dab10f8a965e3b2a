use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use bytes::Bytes;
use serde::Serialize;
use tracing::{info, warn};

use crate::completion::CompletionGateway;
use crate::db::{with_conn, DbPool};
use crate::error::{ChatError, Result};
use crate::messages;
use crate::model::{Message, NewMessage, Role};

/// An image uploaded alongside a user turn.
#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub data: Bytes,
    pub file_name: Option<String>,
    pub content_type: Option<String>,
}

impl ImageUpload {
    /// Work out the image's MIME type from its bytes, then its declared type,
    /// then its file name. Anything that is not an image is rejected.
    pub fn media_type(&self) -> Result<String> {
        let detected = infer::get(&self.data)
            .map(|t| t.mime_type().to_string())
            .or_else(|| {
                self.content_type
                    .clone()
                    .filter(|c| c.starts_with("image/"))
            })
            .or_else(|| {
                self.file_name
                    .as_deref()
                    .and_then(|n| mime_guess::from_path(n).first())
                    .map(|m| m.to_string())
            });
        match detected {
            Some(mime) if mime.starts_with("image/") => Ok(mime),
            Some(mime) => Err(ChatError::validation(format!(
                "upload is not an image ({mime})"
            ))),
            None => Err(ChatError::validation("upload is not an image")),
        }
    }
}

/// Input for one user turn in a conversation.
#[derive(Debug, Clone, Default)]
pub struct UserTurn {
    pub sender: Option<String>,
    pub text: String,
    pub image: Option<ImageUpload>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TurnResult {
    pub user_message: Message,
    pub ai_message: Message,
}

impl UserTurn {
    fn into_new_message(self, room_id: i64) -> Result<NewMessage> {
        let sender = self
            .sender
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| Role::User.as_str().into());
        match self.image {
            Some(image) => {
                if image.data.is_empty() {
                    return Err(ChatError::validation("image is empty"));
                }
                let media_type = image.media_type()?;
                let caption = Some(self.text).filter(|t| !t.trim().is_empty());
                Ok(NewMessage::image(
                    room_id,
                    sender,
                    STANDARD.encode(&image.data),
                    Some(media_type),
                    caption,
                ))
            }
            None => {
                if self.text.trim().is_empty() {
                    return Err(ChatError::validation("text or image is required"));
                }
                Ok(NewMessage::text(room_id, sender, self.text))
            }
        }
    }
}

/// Run one user turn: persist the user's message, ask the model, persist the reply.
///
/// The user's message stays stored when the completion fails; no assistant
/// message is written in that case.
pub async fn run_turn(
    pool: &DbPool,
    gateway: &CompletionGateway,
    room_id: i64,
    turn: UserTurn,
) -> Result<TurnResult> {
    let new_msg = turn.into_new_message(room_id)?;
    let user_message =
        with_conn(pool, move |conn| messages::append_with_preview(conn, new_msg)).await?;

    let reply = match gateway.complete_room(pool, room_id).await {
        Ok(reply) => reply,
        Err(e) => {
            warn!(room_id, error = %e, "completion failed");
            return Err(e);
        }
    };

    if reply.trim().is_empty() {
        warn!(room_id, "completion returned an empty reply");
        return Err(ChatError::MalformedResponse("empty message content".into()));
    }

    let ai_msg = NewMessage::text(room_id, Role::Assistant.as_str(), reply).with_role(Role::Assistant);
    let ai_message =
        with_conn(pool, move |conn| messages::append_with_preview(conn, ai_msg)).await?;
    info!(
        room_id,
        user_message = user_message.id,
        ai_message = ai_message.id,
        "turn completed"
    );
    Ok(TurnResult {
        user_message,
        ai_message,
    })
}
