pub use crate::model::Room;
use crate::error::{is_constraint_violation, ChatError, Result};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::info;

const ROOM_COLUMNS: &str = "id, name, last_sender, last_content, last_time";

fn row_to_room(row: &rusqlite::Row<'_>) -> rusqlite::Result<Room> {
    Ok(Room {
        id: row.get(0)?,
        name: row.get(1)?,
        last_sender: row.get(2)?,
        last_content: row.get(3)?,
        last_time: row.get(4)?,
    })
}

fn clean_name(name: &str) -> Result<&str> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ChatError::validation("room name is required"));
    }
    Ok(name)
}

pub(crate) fn check_room_id(room_id: i64) -> Result<()> {
    if room_id <= 0 {
        return Err(ChatError::validation("invalid room id"));
    }
    Ok(())
}

/// Create a room with a unique name.
pub fn create_room(conn: &Connection, name: &str) -> Result<Room> {
    let name = clean_name(name)?;
    match conn.execute("INSERT INTO rooms (name) VALUES (?1)", [name]) {
        Ok(_) => {
            let id = conn.last_insert_rowid();
            info!(room_id = id, name, "room created");
            Ok(Room {
                id,
                name: name.into(),
                last_sender: None,
                last_content: None,
                last_time: None,
            })
        }
        Err(e) if is_constraint_violation(&e) => Err(ChatError::DuplicateName(name.into())),
        Err(e) => Err(e.into()),
    }
}

pub fn get_room(conn: &Connection, room_id: i64) -> Result<Option<Room>> {
    let room = conn
        .query_row(
            &format!("SELECT {ROOM_COLUMNS} FROM rooms WHERE id = ?1"),
            [room_id],
            row_to_room,
        )
        .optional()?;
    Ok(room)
}

/// List rooms, most recently active first; rooms without messages come last.
pub fn list_rooms(conn: &Connection) -> Result<Vec<Room>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {ROOM_COLUMNS} FROM rooms ORDER BY last_time IS NULL, last_time DESC, id ASC"
    ))?;
    let rooms = stmt
        .query_map([], row_to_room)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rooms)
}

/// Rename a room, keeping names unique.
pub fn rename_room(conn: &Connection, room_id: i64, name: &str) -> Result<Room> {
    check_room_id(room_id)?;
    let name = clean_name(name)?;
    let changed = match conn.execute(
        "UPDATE rooms SET name = ?2 WHERE id = ?1",
        params![room_id, name],
    ) {
        Ok(n) => n,
        Err(e) if is_constraint_violation(&e) => {
            return Err(ChatError::DuplicateName(name.into()))
        }
        Err(e) => return Err(e.into()),
    };
    if changed == 0 {
        return Err(ChatError::NotFound(format!("room {room_id}")));
    }
    get_room(conn, room_id)?.ok_or_else(|| ChatError::NotFound(format!("room {room_id}")))
}

/// Delete a room together with its messages.
pub fn delete_room(conn: &mut Connection, room_id: i64) -> Result<()> {
    check_room_id(room_id)?;
    let tx = conn.transaction()?;
    tx.execute("DELETE FROM messages WHERE room_id = ?1", [room_id])?;
    let changed = tx.execute("DELETE FROM rooms WHERE id = ?1", [room_id])?;
    if changed == 0 {
        return Err(ChatError::NotFound(format!("room {room_id}")));
    }
    tx.commit()?;
    info!(room_id, "room deleted");
    Ok(())
}

/// Overwrite a room's preview fields with the given values.
pub fn refresh_preview(
    conn: &Connection,
    room_id: i64,
    sender: &str,
    content: &str,
    time: i64,
) -> Result<()> {
    let changed = conn.execute(
        "UPDATE rooms SET last_sender = ?2, last_content = ?3, last_time = ?4 WHERE id = ?1",
        params![room_id, sender, content, time],
    )?;
    if changed == 0 {
        return Err(ChatError::NotFound(format!("room {room_id}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    #[test]
    fn names_are_unique_and_trimmed() {
        let conn = db::init_db(":memory:").unwrap();
        let room = create_room(&conn, "  general ").unwrap();
        assert_eq!(room.name, "general");
        assert!(matches!(
            create_room(&conn, "general"),
            Err(ChatError::DuplicateName(_))
        ));
        assert!(matches!(
            create_room(&conn, "   "),
            Err(ChatError::Validation(_))
        ));
    }

    #[test]
    fn list_orders_by_last_time_with_empty_rooms_last() {
        let conn = db::init_db(":memory:").unwrap();
        let quiet = create_room(&conn, "quiet").unwrap();
        let old = create_room(&conn, "old").unwrap();
        let fresh = create_room(&conn, "fresh").unwrap();
        refresh_preview(&conn, old.id, "alice", "hi", 1_000).unwrap();
        refresh_preview(&conn, fresh.id, "bob", "yo", 2_000).unwrap();
        let ids: Vec<i64> = list_rooms(&conn).unwrap().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![fresh.id, old.id, quiet.id]);
    }

    #[test]
    fn refresh_preview_is_reflected_exactly() {
        let conn = db::init_db(":memory:").unwrap();
        let room = create_room(&conn, "general").unwrap();
        refresh_preview(&conn, room.id, "alice", "hi", 42).unwrap();
        let rooms = list_rooms(&conn).unwrap();
        assert_eq!(rooms[0].last_sender.as_deref(), Some("alice"));
        assert_eq!(rooms[0].last_content.as_deref(), Some("hi"));
        assert_eq!(rooms[0].last_time, Some(42));
        assert_eq!(list_rooms(&conn).unwrap(), rooms);
        assert!(matches!(
            refresh_preview(&conn, 999, "a", "b", 1),
            Err(ChatError::NotFound(_))
        ));
    }

    #[test]
    fn delete_missing_room_is_not_found() {
        let mut conn = db::init_db(":memory:").unwrap();
        assert!(matches!(
            delete_room(&mut conn, 9999),
            Err(ChatError::NotFound(_))
        ));
        assert!(matches!(
            delete_room(&mut conn, 0),
            Err(ChatError::Validation(_))
        ));
    }

    #[test]
    fn rename_checks_conflicts() {
        let conn = db::init_db(":memory:").unwrap();
        let a = create_room(&conn, "a").unwrap();
        create_room(&conn, "b").unwrap();
        assert!(matches!(
            rename_room(&conn, a.id, "b"),
            Err(ChatError::DuplicateName(_))
        ));
        let renamed = rename_room(&conn, a.id, "c").unwrap();
        assert_eq!(renamed.name, "c");
        assert!(matches!(
            rename_room(&conn, 77, "d"),
            Err(ChatError::NotFound(_))
        ));
    }
}
