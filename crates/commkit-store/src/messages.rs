//! Typed CRUD helpers for the chat message list, plus the [`MessageStore`]
//! trait the chat orchestrator consumes.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use rusqlite::params;
use uuid::Uuid;

use commkit_shared::{ChatMessage, ChatMessageStatus, FileAttachment, FileType, Identity};

use crate::database::Database;
use crate::error::{Result, StoreError};

/// Persistence boundary for the chat orchestrator. [`Database`] is the
/// production implementation; tests may substitute their own.
pub trait MessageStore: Send {
    /// The full message list, ascending by creation time.
    fn fetch_all(&self) -> Result<Vec<ChatMessage>>;

    fn insert(&self, message: &ChatMessage) -> Result<()>;

    /// Update server id, status, invalidation flag and attachment bytes.
    /// The status write is monotonic: a stored `Read` never regresses.
    fn update(&self, message: &ChatMessage) -> Result<()>;

    fn delete(&self, id: Uuid) -> Result<bool>;

    fn contains(&self, id: Uuid) -> Result<bool>;
}

impl MessageStore for Database {
    fn fetch_all(&self) -> Result<Vec<ChatMessage>> {
        let mut stmt = self.conn().prepare(
            "SELECT m.id, m.chat_message_id, m.sender, m.sender_is_local, m.body,
                    m.created_at, m.status, m.is_invalidated,
                    f.id, f.remote_id, f.name, f.file_type, f.bytes
             FROM chat_messages m
             LEFT JOIN files f ON f.message_id = m.id
             ORDER BY m.created_at ASC",
        )?;

        let rows = stmt.query_map([], row_to_chat_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }

    fn insert(&self, message: &ChatMessage) -> Result<()> {
        let (sender, sender_is_local) = encode_identity(&message.sender);
        self.conn().execute(
            "INSERT INTO chat_messages
                 (id, chat_message_id, sender, sender_is_local, body, created_at,
                  status, is_invalidated)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                message.id.to_string(),
                message.chat_message_id,
                sender,
                sender_is_local,
                message.body,
                message.created_at.to_rfc3339(),
                message.status as i64,
                message.is_invalidated,
            ],
        )?;
        if let Some(attachment) = &message.attachment {
            self.upsert_attachment(message.id, attachment)?;
        }
        Ok(())
    }

    fn update(&self, message: &ChatMessage) -> Result<()> {
        // MAX keeps the stored status monotonic even if the caller hands us
        // a stale snapshot.
        let affected = self.conn().execute(
            "UPDATE chat_messages
             SET chat_message_id = ?2,
                 body = ?3,
                 status = MAX(status, ?4),
                 is_invalidated = ?5
             WHERE id = ?1",
            params![
                message.id.to_string(),
                message.chat_message_id,
                message.body,
                message.status as i64,
                message.is_invalidated,
            ],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        if let Some(attachment) = &message.attachment {
            self.upsert_attachment(message.id, attachment)?;
        } else {
            self.conn().execute(
                "DELETE FROM files WHERE message_id = ?1",
                params![message.id.to_string()],
            )?;
        }
        Ok(())
    }

    fn delete(&self, id: Uuid) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM chat_messages WHERE id = ?1",
            params![id.to_string()],
        )?;
        Ok(affected > 0)
    }

    fn contains(&self, id: Uuid) -> Result<bool> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM chat_messages WHERE id = ?1",
            params![id.to_string()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }
}

impl Database {
    fn upsert_attachment(&self, message_id: Uuid, attachment: &FileAttachment) -> Result<()> {
        self.conn().execute(
            "INSERT INTO files (id, message_id, remote_id, name, file_type, bytes)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET
                 remote_id = excluded.remote_id,
                 bytes = excluded.bytes",
            params![
                attachment.id.to_string(),
                message_id.to_string(),
                attachment.remote_id,
                attachment.name,
                attachment.file_type.as_str(),
                attachment.bytes.as_ref().map(|b| b.as_ref()),
            ],
        )?;
        Ok(())
    }
}

fn encode_identity(identity: &Identity) -> (Option<String>, i64) {
    match identity {
        Identity::Local(id) => (Some(id.clone()), 1),
        Identity::External(id) => (Some(id.clone()), 0),
        Identity::Unknown => (None, 0),
    }
}

fn row_to_chat_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChatMessage> {
    let id_str: String = row.get(0)?;
    let chat_message_id: Option<String> = row.get(1)?;
    let sender_raw: Option<String> = row.get(2)?;
    let sender_is_local: i64 = row.get(3)?;
    let body: Option<String> = row.get(4)?;
    let ts_str: String = row.get(5)?;
    let status_raw: i64 = row.get(6)?;
    let is_invalidated: bool = row.get(7)?;

    let id = Uuid::parse_str(&id_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let sender = match sender_raw {
        Some(raw) if sender_is_local == 1 => Identity::Local(raw),
        Some(raw) => Identity::External(raw),
        None => Identity::Unknown,
    };

    let created_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&ts_str)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
        })?;

    let status = ChatMessageStatus::from_i64(status_raw).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            6,
            rusqlite::types::Type::Integer,
            format!("invalid message status {status_raw}").into(),
        )
    })?;

    let attachment = match row.get::<_, Option<String>>(8)? {
        Some(file_id_str) => {
            let file_id = Uuid::parse_str(&file_id_str).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    8,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })?;
            let remote_id: Option<String> = row.get(9)?;
            let name: String = row.get(10)?;
            let type_raw: String = row.get(11)?;
            let file_type = FileType::parse(&type_raw).ok_or_else(|| {
                rusqlite::Error::FromSqlConversionFailure(
                    11,
                    rusqlite::types::Type::Text,
                    format!("invalid file type {type_raw:?}").into(),
                )
            })?;
            let bytes: Option<Vec<u8>> = row.get(12)?;
            Some(FileAttachment {
                id: file_id,
                remote_id,
                name,
                file_type,
                bytes: bytes.map(Bytes::from),
            })
        }
        None => None,
    };

    Ok(ChatMessage {
        id,
        chat_message_id,
        sender,
        body,
        attachment,
        created_at,
        status,
        is_invalidated,
    })
}
