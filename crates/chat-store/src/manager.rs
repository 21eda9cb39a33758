use std::sync::{Arc, Mutex};

use chat_core::types::{ChunkId, ConversationId, MessageId, MessageRole};
use dashmap::DashMap;
use rusqlite::Connection;
use tracing::debug;

use crate::error::StoreError;
use crate::types::{Conversation, ConversationExport, Message, NewMessage};

/// Durable conversation/message/summary store, backed by a single SQLite
/// connection behind a mutex — writes are serialised at the connection
/// level, matching how every other store in this codebase talks to SQLite.
///
/// Separately, [`ConversationStore::conversation_lock`] hands out a
/// per-conversation async lock used by callers (the conversation engine) to
/// serialise logical read-modify-write sequences — append-then-maybe-
/// summarise, or two summarisation tasks racing on the same conversation —
/// that span more than one SQL statement.
pub struct ConversationStore {
    db: Mutex<Connection>,
    locks: DashMap<ConversationId, Arc<tokio::sync::Mutex<()>>>,
}

impl ConversationStore {
    pub fn new(conn: Connection) -> Self {
        Self {
            db: Mutex::new(conn),
            locks: DashMap::new(),
        }
    }

    /// Get (creating if absent) the async lock guarding this conversation's
    /// append/summarise critical sections.
    pub fn conversation_lock(&self, id: &ConversationId) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .entry(id.clone())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    pub fn create_conversation(&self) -> Result<ConversationId, StoreError> {
        let id = ConversationId::new();
        let now = chrono::Utc::now().to_rfc3339();
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO conversations (id, created_at, updated_at, summary, summary_covered_upto_seq)
             VALUES (?1, ?2, ?2, NULL, 0)",
            rusqlite::params![id.as_str(), now],
        )?;
        Ok(id)
    }

    pub fn get(&self, id: &ConversationId) -> Result<Conversation, StoreError> {
        let db = self.db.lock().unwrap();
        row_to_conversation(&db, id)
    }

    pub fn exists(&self, id: &ConversationId) -> Result<bool, StoreError> {
        let db = self.db.lock().unwrap();
        let found: Option<i64> = db
            .query_row(
                "SELECT 1 FROM conversations WHERE id = ?1",
                rusqlite::params![id.as_str()],
                |row| row.get(0),
            )
            .ok();
        Ok(found.is_some())
    }

    /// Append a message, assigning it the next sequence number for this
    /// conversation. Serialisable with other appends to the same
    /// conversation via the connection-level mutex; returns the assigned
    /// seq.
    pub fn append_message(
        &self,
        conv_id: &ConversationId,
        msg: NewMessage,
    ) -> Result<i64, StoreError> {
        let db = self.db.lock().unwrap();

        // Ensure the conversation exists before assigning a seq under it.
        let exists: Option<i64> = db
            .query_row(
                "SELECT 1 FROM conversations WHERE id = ?1",
                rusqlite::params![conv_id.as_str()],
                |row| row.get(0),
            )
            .ok();
        if exists.is_none() {
            return Err(StoreError::ConversationNotFound {
                id: conv_id.as_str().to_string(),
            });
        }

        let next_seq: i64 = db.query_row(
            "SELECT COALESCE(MAX(seq), 0) + 1 FROM messages WHERE conversation_id = ?1",
            rusqlite::params![conv_id.as_str()],
            |row| row.get(0),
        )?;

        let id = MessageId::new();
        let now = chrono::Utc::now().to_rfc3339();
        let sources_json = serde_json::to_string(&msg.sources)?;

        db.execute(
            "INSERT INTO messages (id, conversation_id, seq, role, content, timestamp, emotion, sources, chunk_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            rusqlite::params![
                id.as_str(),
                conv_id.as_str(),
                next_seq,
                msg.role.to_string(),
                msg.content,
                now,
                msg.emotion,
                sources_json,
                msg.chunk_id.as_ref().map(ChunkId::as_str),
            ],
        )?;
        db.execute(
            "UPDATE conversations SET updated_at = ?1 WHERE id = ?2",
            rusqlite::params![now, conv_id.as_str()],
        )?;

        Ok(next_seq)
    }

    /// Up to `n` most-recent messages, chronological order (oldest first).
    pub fn load_window(&self, conv_id: &ConversationId, n: usize) -> Result<Vec<Message>, StoreError> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, conversation_id, seq, role, content, timestamp, emotion, sources, chunk_id
             FROM messages WHERE conversation_id = ?1 ORDER BY seq DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(rusqlite::params![conv_id.as_str(), n as i64], row_to_message)?;
        let mut messages: Vec<Message> = rows.filter_map(|r| r.ok()).collect();
        messages.reverse();
        Ok(messages)
    }

    /// All messages, chronological order — used by admin export.
    pub fn load_all(&self, conv_id: &ConversationId) -> Result<Vec<Message>, StoreError> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, conversation_id, seq, role, content, timestamp, emotion, sources, chunk_id
             FROM messages WHERE conversation_id = ?1 ORDER BY seq ASC",
        )?;
        let rows = stmt.query_map(rusqlite::params![conv_id.as_str()], row_to_message)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Atomically replace the rolling summary. Rejects if `covered_upto_seq`
    /// would regress relative to the stored value.
    pub fn update_summary(
        &self,
        conv_id: &ConversationId,
        summary: &str,
        covered_upto_seq: i64,
    ) -> Result<(), StoreError> {
        let db = self.db.lock().unwrap();
        let current: i64 = db.query_row(
            "SELECT summary_covered_upto_seq FROM conversations WHERE id = ?1",
            rusqlite::params![conv_id.as_str()],
            |row| row.get(0),
        )?;
        if covered_upto_seq < current {
            return Err(StoreError::SummaryRegression {
                current,
                attempted: covered_upto_seq,
            });
        }
        let now = chrono::Utc::now().to_rfc3339();
        db.execute(
            "UPDATE conversations SET summary = ?1, summary_covered_upto_seq = ?2, updated_at = ?3 WHERE id = ?4",
            rusqlite::params![summary, covered_upto_seq, now, conv_id.as_str()],
        )?;
        debug!(conversation_id = %conv_id, covered_upto_seq, "summary updated");
        Ok(())
    }

    /// Count of messages with seq strictly greater than the conversation's
    /// `summary_covered_upto_seq` — the summarisation trigger's input.
    pub fn uncovered_count(&self, conv_id: &ConversationId) -> Result<usize, StoreError> {
        let db = self.db.lock().unwrap();
        let (covered, total): (i64, i64) = db.query_row(
            "SELECT c.summary_covered_upto_seq, COALESCE(MAX(m.seq), 0)
             FROM conversations c LEFT JOIN messages m ON m.conversation_id = c.id
             WHERE c.id = ?1",
            rusqlite::params![conv_id.as_str()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok((total - covered).max(0) as usize)
    }

    pub fn list(&self, limit: usize, offset: usize) -> Result<(usize, Vec<Conversation>), StoreError> {
        let db = self.db.lock().unwrap();
        let total: i64 = db.query_row("SELECT COUNT(*) FROM conversations", [], |row| row.get(0))?;
        let mut stmt = db.prepare(
            "SELECT id, created_at, updated_at, summary, summary_covered_upto_seq
             FROM conversations ORDER BY updated_at DESC LIMIT ?1 OFFSET ?2",
        )?;
        let rows = stmt.query_map(rusqlite::params![limit as i64, offset as i64], |row| {
            Ok(Conversation {
                id: ConversationId::from(row.get::<_, String>(0)?),
                created_at: row.get(1)?,
                updated_at: row.get(2)?,
                summary: row.get(3)?,
                summary_covered_upto_seq: row.get(4)?,
            })
        })?;
        Ok((total as usize, rows.filter_map(|r| r.ok()).collect()))
    }

    /// Remove a conversation and all its messages atomically.
    pub fn delete(&self, conv_id: &ConversationId) -> Result<(), StoreError> {
        let mut db = self.db.lock().unwrap();
        let tx = db.transaction()?;
        tx.execute(
            "DELETE FROM messages WHERE conversation_id = ?1",
            rusqlite::params![conv_id.as_str()],
        )?;
        let affected = tx.execute(
            "DELETE FROM conversations WHERE id = ?1",
            rusqlite::params![conv_id.as_str()],
        )?;
        tx.commit()?;
        if affected == 0 {
            return Err(StoreError::ConversationNotFound {
                id: conv_id.as_str().to_string(),
            });
        }
        self.locks.remove(conv_id);
        Ok(())
    }

    pub fn export(&self, conv_id: &ConversationId) -> Result<ConversationExport, StoreError> {
        let conversation = self.get(conv_id)?;
        let messages = self.load_all(conv_id)?;
        Ok(ConversationExport { conversation, messages })
    }
}

fn row_to_conversation(db: &Connection, id: &ConversationId) -> Result<Conversation, StoreError> {
    db.query_row(
        "SELECT id, created_at, updated_at, summary, summary_covered_upto_seq
         FROM conversations WHERE id = ?1",
        rusqlite::params![id.as_str()],
        |row| {
            Ok(Conversation {
                id: ConversationId::from(row.get::<_, String>(0)?),
                created_at: row.get(1)?,
                updated_at: row.get(2)?,
                summary: row.get(3)?,
                summary_covered_upto_seq: row.get(4)?,
            })
        },
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => StoreError::ConversationNotFound {
            id: id.as_str().to_string(),
        },
        other => StoreError::Database(other),
    })
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let role_str: String = row.get(3)?;
    let sources_json: String = row.get(7)?;
    let chunk_id_str: Option<String> = row.get(8)?;
    Ok(Message {
        id: MessageId(row.get(0)?),
        conversation_id: ConversationId::from(row.get::<_, String>(1)?),
        seq: row.get(2)?,
        role: role_str.parse().unwrap_or(MessageRole::User),
        content: row.get(4)?,
        timestamp: row.get(5)?,
        emotion: row.get(6)?,
        sources: serde_json::from_str(&sources_json).unwrap_or_default(),
        chunk_id: chunk_id_str.map(ChunkId),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> ConversationStore {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::init_db(&conn).unwrap();
        ConversationStore::new(conn)
    }

    #[test]
    fn append_assigns_increasing_seq() {
        let store = store();
        let id = store.create_conversation().unwrap();
        let s1 = store.append_message(&id, NewMessage::user("hi")).unwrap();
        let s2 = store
            .append_message(&id, NewMessage::assistant("hello", "neutral", vec![], ChunkId::new()))
            .unwrap();
        assert_eq!(s1, 1);
        assert_eq!(s2, 2);
    }

    #[test]
    fn load_window_returns_chronological_order() {
        let store = store();
        let id = store.create_conversation().unwrap();
        for i in 0..5 {
            store.append_message(&id, NewMessage::user(format!("msg{i}"))).unwrap();
        }
        let window = store.load_window(&id, 3).unwrap();
        let contents: Vec<_> = window.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["msg2", "msg3", "msg4"]);
    }

    #[test]
    fn summary_update_rejects_regression() {
        let store = store();
        let id = store.create_conversation().unwrap();
        store.append_message(&id, NewMessage::user("a")).unwrap();
        store.append_message(&id, NewMessage::user("b")).unwrap();
        store.update_summary(&id, "summary covering 1-2", 2).unwrap();

        let err = store.update_summary(&id, "stale", 1).unwrap_err();
        assert!(matches!(err, StoreError::SummaryRegression { .. }));
    }

    #[test]
    fn delete_removes_conversation_and_messages() {
        let store = store();
        let id = store.create_conversation().unwrap();
        store.append_message(&id, NewMessage::user("a")).unwrap();
        store.delete(&id).unwrap();
        assert!(store.get(&id).is_err());
    }
}
