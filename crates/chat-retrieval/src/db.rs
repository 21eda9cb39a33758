use rusqlite::{Connection, Result};

/// Initialise retrieval-store tables. Safe to call on every startup
/// (idempotent).
pub fn init_db(conn: &Connection) -> Result<()> {
    create_documents_table(conn)?;
    create_chunks_table(conn)?;
    create_index_meta_table(conn)?;
    Ok(())
}

fn create_documents_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS documents (
            id           TEXT PRIMARY KEY,
            content_hash TEXT NOT NULL,
            ingested_at  TEXT NOT NULL
        );",
    )
}

fn create_chunks_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS chunks (
            document_id  TEXT NOT NULL,
            chunk_index  INTEGER NOT NULL,
            text         TEXT NOT NULL,
            vector       BLOB NOT NULL,
            PRIMARY KEY (document_id, chunk_index)
        );
        CREATE INDEX IF NOT EXISTS idx_chunks_document
            ON chunks(document_id);",
    )
}

/// Single-row table recording the embedding model used to build the index.
/// A dimension/model mismatch on startup means the on-disk vectors are
/// incompatible and the whole folder must be reingested.
fn create_index_meta_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS index_meta (
            id         INTEGER PRIMARY KEY CHECK (id = 0),
            model_id   TEXT NOT NULL,
            dimension  INTEGER NOT NULL
        );",
    )
}

pub fn vector_to_blob(v: &[f32]) -> Vec<u8> {
    v.iter().flat_map(|f| f.to_le_bytes()).collect()
}

pub fn blob_to_vector(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vector_blob_round_trips() {
        let v = vec![0.1_f32, -2.5, 3.75, 0.0];
        let blob = vector_to_blob(&v);
        let back = blob_to_vector(&blob);
        assert_eq!(v, back);
    }
}
