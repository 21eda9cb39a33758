use rusqlite::{Connection, Result};

/// Initialise conversation-store tables. Safe to call on every startup
/// (idempotent).
pub fn init_db(conn: &Connection) -> Result<()> {
    create_conversations_table(conn)?;
    create_messages_table(conn)?;
    Ok(())
}

fn create_conversations_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS conversations (
            id                        TEXT PRIMARY KEY,
            created_at                TEXT NOT NULL,
            updated_at                TEXT NOT NULL,
            summary                   TEXT,
            summary_covered_upto_seq  INTEGER NOT NULL DEFAULT 0
        );
        CREATE INDEX IF NOT EXISTS idx_conversations_updated
            ON conversations(updated_at DESC);",
    )
}

fn create_messages_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS messages (
            id               TEXT PRIMARY KEY,
            conversation_id  TEXT NOT NULL,
            seq              INTEGER NOT NULL,
            role             TEXT NOT NULL,
            content          TEXT NOT NULL,
            timestamp        TEXT NOT NULL,
            emotion          TEXT,
            sources          TEXT NOT NULL DEFAULT '[]',
            chunk_id         TEXT,
            UNIQUE(conversation_id, seq)
        );
        CREATE INDEX IF NOT EXISTS idx_messages_conv
            ON messages(conversation_id, seq);",
    )
}
