use thiserror::Error;

/// Failures surfaced by the room, message and completion components.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("room name already exists: {0}")]
    DuplicateName(String),
    #[error("storage failure: {0}")]
    Storage(String),
    #[error("completion request failed: {0}")]
    Completion(String),
    #[error("malformed completion response: {0}")]
    MalformedResponse(String),
    #[error("completion request timed out after {0}s")]
    Timeout(u64),
}

impl ChatError {
    /// Numeric code carried in the response envelope; also used as HTTP status.
    pub fn code(&self) -> u16 {
        match self {
            ChatError::Validation(_) => 400,
            ChatError::NotFound(_) => 404,
            ChatError::DuplicateName(_) => 409,
            ChatError::Storage(_) => 500,
            ChatError::Completion(_) | ChatError::MalformedResponse(_) => 502,
            ChatError::Timeout(_) => 504,
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        ChatError::Validation(msg.into())
    }
}

impl From<rusqlite::Error> for ChatError {
    fn from(e: rusqlite::Error) -> Self {
        ChatError::Storage(e.to_string())
    }
}

impl From<r2d2::Error> for ChatError {
    fn from(e: r2d2::Error) -> Self {
        ChatError::Storage(e.to_string())
    }
}

/// True when a SQLite error is a constraint violation (unique, foreign key, check).
pub(crate) fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e.sqlite_error_code(),
        Some(rusqlite::ErrorCode::ConstraintViolation)
    )
}

/// True when a SQLite error is a foreign key violation.
pub(crate) fn is_foreign_key_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY
    )
}

pub type Result<T, E = ChatError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_follow_taxonomy() {
        assert_eq!(ChatError::validation("x").code(), 400);
        assert_eq!(ChatError::NotFound("room 1".into()).code(), 404);
        assert_eq!(ChatError::DuplicateName("general".into()).code(), 409);
        assert_eq!(ChatError::MalformedResponse("no choices".into()).code(), 502);
        assert_eq!(ChatError::Timeout(3).code(), 504);
    }

    #[test]
    fn foreign_key_violations_are_told_apart() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "PRAGMA foreign_keys = ON;
             CREATE TABLE parent (id INTEGER PRIMARY KEY, name TEXT UNIQUE);
             CREATE TABLE child (parent_id INTEGER NOT NULL REFERENCES parent(id));
             INSERT INTO parent (id, name) VALUES (1, 'a');",
        )
        .unwrap();

        let fk = conn
            .execute("INSERT INTO child (parent_id) VALUES (7)", [])
            .unwrap_err();
        assert!(is_constraint_violation(&fk));
        assert!(is_foreign_key_violation(&fk));

        let unique = conn
            .execute("INSERT INTO parent (id, name) VALUES (2, 'a')", [])
            .unwrap_err();
        assert!(is_constraint_violation(&unique));
        assert!(!is_foreign_key_violation(&unique));
    }

    #[test]
    fn sqlite_errors_become_storage() {
        let err: ChatError = rusqlite::Error::InvalidQuery.into();
        assert!(matches!(err, ChatError::Storage(_)));
    }
}
