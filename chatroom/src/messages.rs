use crate::db::now_millis;
use crate::error::{is_foreign_key_violation, ChatError, Result};
use crate::model::{ContentKind, Message, NewMessage};
use crate::rooms::{self, check_room_id};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rusqlite::{params, Connection, TransactionBehavior};
use tracing::info;

const MESSAGE_COLUMNS: &str =
    "id, room_id, profile_id, sender, role, kind, content, caption, media_type, created_at";

fn row_to_msg(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let role: String = row.get(4)?;
    let kind: String = row.get(5)?;
    let parse_err = |idx: usize, e: ChatError| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
    };
    Ok(Message {
        id: row.get(0)?,
        room_id: row.get(1)?,
        profile_id: row.get(2)?,
        sender: row.get(3)?,
        role: role.parse().map_err(|e| parse_err(4, e))?,
        kind: kind.parse().map_err(|e| parse_err(5, e))?,
        content: row.get(6)?,
        caption: row.get(7)?,
        media_type: row.get(8)?,
        created_at: row.get(9)?,
    })
}

fn validate(msg: &NewMessage) -> Result<()> {
    check_room_id(msg.room_id)?;
    if msg.sender.trim().is_empty() {
        return Err(ChatError::validation("sender is required"));
    }
    match msg.kind {
        ContentKind::Text => {
            if msg.content.trim().is_empty() {
                return Err(ChatError::validation("content is required"));
            }
        }
        ContentKind::Image => {
            if msg.content.is_empty() || STANDARD.decode(&msg.content).is_err() {
                return Err(ChatError::validation("image content must be base64"));
            }
        }
    }
    Ok(())
}

/// Append a message to a room's log. The room preview is left untouched.
pub fn append(conn: &Connection, msg: NewMessage) -> Result<Message> {
    validate(&msg)?;
    let now = now_millis();
    let res = conn.execute(
        "INSERT INTO messages (room_id, profile_id, sender, role, kind, content, caption, media_type, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            msg.room_id,
            msg.profile_id,
            msg.sender,
            msg.role.as_str(),
            msg.kind.as_str(),
            msg.content,
            msg.caption,
            msg.media_type,
            now
        ],
    );
    match res {
        Ok(_) => {}
        Err(e) if is_foreign_key_violation(&e) => {
            return Err(ChatError::NotFound(format!("room {}", msg.room_id)))
        }
        Err(e) => return Err(e.into()),
    }
    let id = conn.last_insert_rowid();
    Ok(Message {
        id,
        room_id: msg.room_id,
        profile_id: msg.profile_id,
        sender: msg.sender,
        role: msg.role,
        kind: msg.kind,
        content: msg.content,
        caption: msg.caption,
        media_type: msg.media_type,
        created_at: now,
    })
}

/// Append a message and refresh its room's preview in one transaction.
///
/// The write lock is taken before the timestamp is read, so concurrent
/// writers commit in `created_at` order and the preview always names the
/// newest message.
pub fn append_with_preview(conn: &mut Connection, msg: NewMessage) -> Result<Message> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let message = append(&tx, msg)?;
    rooms::refresh_preview(
        &tx,
        message.room_id,
        &message.sender,
        &message.preview_text(),
        message.created_at,
    )?;
    tx.commit()?;
    info!(
        message_id = message.id,
        room_id = message.room_id,
        kind = message.kind.as_str(),
        "message added"
    );
    Ok(message)
}

/// All messages of a room, oldest first.
pub fn list_by_room(conn: &Connection, room_id: i64) -> Result<Vec<Message>> {
    check_room_id(room_id)?;
    let mut stmt = conn.prepare(&format!(
        "SELECT {MESSAGE_COLUMNS} FROM messages WHERE room_id = ?1 ORDER BY created_at ASC, id ASC"
    ))?;
    let msgs = stmt
        .query_map([room_id], row_to_msg)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(msgs)
}
