use crate::codec;
use chrono::{DateTime, Utc};
use mien_core::{Embedding, PersonRecord, PersonStore, Recognition, SimilarityIndex, StoreError};
use rusqlite::{params, Connection, ErrorCode};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS persons (
        id          INTEGER PRIMARY KEY,
        name        TEXT NOT NULL UNIQUE,
        notes       TEXT,
        created_at  TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS embeddings (
        id          INTEGER PRIMARY KEY,
        person_id   INTEGER NOT NULL REFERENCES persons(id) ON DELETE CASCADE,
        vector      BLOB NOT NULL,
        meta        TEXT,
        created_at  TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_embeddings_person ON embeddings(person_id);
";

/// [`PersonStore`] backed by a SQLite database.
///
/// Every similarity query re-reads the embeddings table, so deletes are
/// visible to the next search without any cache invalidation.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    index: SimilarityIndex,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path`.
    pub fn open(path: &Path, index: SimilarityIndex) -> Result<Self, StoreError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Backend(format!("create {}: {e}", parent.display())))?;
        }
        let conn = Connection::open(path).map_err(backend)?;
        tracing::info!(path = %path.display(), threshold = index.threshold(), "opened face store");
        Self::with_connection(conn, index)
    }

    /// A private in-memory database.
    pub fn open_in_memory(index: SimilarityIndex) -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory().map_err(backend)?, index)
    }

    fn with_connection(conn: Connection, index: SimilarityIndex) -> Result<Self, StoreError> {
        conn.pragma_update(None, "foreign_keys", true).map_err(backend)?;
        conn.execute_batch(SCHEMA).map_err(backend)?;
        Ok(Self {
            conn: Mutex::new(conn),
            index,
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Backend("connection lock poisoned".into()))
    }
}

fn backend(err: rusqlite::Error) -> StoreError {
    StoreError::Backend(err.to_string())
}

fn column(err: rusqlite::types::FromSqlError) -> StoreError {
    StoreError::Backend(format!("unexpected column type: {err}"))
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation
    )
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Backend(format!("bad timestamp {raw:?}: {e}")))
}

impl PersonStore for SqliteStore {
    fn add_person(
        &self,
        name: &str,
        embeddings: &[Embedding],
        notes: Option<&str>,
    ) -> Result<PersonRecord, StoreError> {
        let mut conn = self.conn()?;
        let created_at = Utc::now();
        let stamp = created_at.to_rfc3339();

        // Person and embeddings commit together or not at all.
        let tx = conn.transaction().map_err(backend)?;
        tx.execute(
            "INSERT INTO persons (name, notes, created_at) VALUES (?1, ?2, ?3)",
            params![name, notes, stamp],
        )
        .map_err(|e| {
            if is_unique_violation(&e) {
                StoreError::DuplicateIdentity(name.to_string())
            } else {
                backend(e)
            }
        })?;
        let id = tx.last_insert_rowid();

        {
            let mut insert = tx
                .prepare("INSERT INTO embeddings (person_id, vector, meta, created_at) VALUES (?1, ?2, '{}', ?3)")
                .map_err(backend)?;
            for embedding in embeddings {
                insert
                    .execute(params![id, codec::encode(&embedding.values), stamp])
                    .map_err(backend)?;
            }
        }
        tx.commit().map_err(backend)?;

        tracing::info!(id, name, embeddings = embeddings.len(), "added person");

        Ok(PersonRecord {
            id,
            name: name.to_string(),
            notes: notes.map(str::to_string),
            embedding_count: embeddings.len(),
            created_at,
        })
    }

    fn delete_person(&self, id: i64) -> Result<bool, StoreError> {
        let conn = self.conn()?;
        let deleted = conn
            .execute("DELETE FROM persons WHERE id = ?1", params![id])
            .map_err(backend)?;
        Ok(deleted > 0)
    }

    fn list_persons(&self, limit: usize, offset: usize) -> Result<(Vec<PersonRecord>, usize), StoreError> {
        let conn = self.conn()?;
        let total: i64 = conn
            .query_row("SELECT COUNT(*) FROM persons", [], |row| row.get(0))
            .map_err(backend)?;

        let mut stmt = conn
            .prepare(
                "SELECT p.id, p.name, p.notes, p.created_at,
                        (SELECT COUNT(*) FROM embeddings e WHERE e.person_id = p.id)
                 FROM persons p
                 ORDER BY p.created_at DESC, p.id DESC
                 LIMIT ?1 OFFSET ?2",
            )
            .map_err(backend)?;
        let rows = stmt
            .query_map(params![limit as i64, offset as i64], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, i64>(4)?,
                ))
            })
            .map_err(backend)?;

        let mut persons = Vec::new();
        for row in rows {
            let (id, name, notes, created_at, count) = row.map_err(backend)?;
            persons.push(PersonRecord {
                id,
                name,
                notes,
                embedding_count: count as usize,
                created_at: parse_timestamp(&created_at)?,
            });
        }

        Ok((persons, total as usize))
    }

    fn topk_similar(&self, query: &[f32], top_k: usize) -> Result<Vec<Recognition>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT p.name, e.vector
                 FROM embeddings e JOIN persons p ON p.id = e.person_id
                 ORDER BY e.id",
            )
            .map_err(backend)?;
        let mut rows = stmt.query([]).map_err(backend)?;

        let mut ranking = self.index.ranking(query, top_k);
        let mut buf = Vec::with_capacity(query.len());
        while let Some(row) = rows.next().map_err(backend)? {
            let name = row.get_ref(0).map_err(backend)?.as_str().map_err(column)?;
            let blob = row.get_ref(1).map_err(backend)?.as_blob().map_err(column)?;
            codec::decode_into(blob, &mut buf)?;
            ranking.offer(name, &buf);
        }

        Ok(ranking.finish())
    }
}
