use std::path::Path;

use rusqlite::{Connection, OpenFlags, OptionalExtension, params};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::model::ChunkMetadata;
use crate::semantic::{cosine_distance, decode_embedding_blob, encode_embedding_blob};

/// Identity of the embedding space an index was built in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexMeta {
    pub model_id: String,
    pub dimensions: usize,
    pub built_at: String,
    pub chunk_count: usize,
    pub checksum: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredEntry {
    pub metadata: ChunkMetadata,
    pub vector: Vec<f32>,
}

/// Upsert/query contract of the persistent similarity index.
pub trait VectorStore {
    /// Clears the collection and upserts `entries` keyed by chunk_id, atomically.
    fn rebuild(&mut self, meta: &IndexMeta, entries: &[StoredEntry]) -> Result<(), StoreError>;

    /// `None` until the first successful build.
    fn index_meta(&self) -> Result<Option<IndexMeta>, StoreError>;

    fn entry_count(&self) -> Result<usize, StoreError>;

    /// Entries in insertion order.
    fn entries(&self) -> Result<Vec<StoredEntry>, StoreError>;

    /// Up to `top_k` entries by ascending distance; ties keep insertion order.
    fn nearest(
        &self,
        query: &[f32],
        top_k: usize,
        doc_id: Option<&str>,
    ) -> Result<Vec<(ChunkMetadata, f64)>, StoreError>;
}

fn rank_by_distance(
    mut scored: Vec<(ChunkMetadata, f64)>,
    top_k: usize,
) -> Vec<(ChunkMetadata, f64)> {
    // sort_by is stable, so equal distances stay in insertion order
    scored.sort_by(|left, right| left.1.total_cmp(&right.1));
    scored.truncate(top_k);
    scored
}

pub struct SqliteVectorStore {
    connection: Connection,
}

impl SqliteVectorStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let connection = Connection::open(path)?;
        connection.pragma_update(None, "journal_mode", "WAL")?;
        connection.pragma_update(None, "synchronous", "NORMAL")?;
        ensure_schema(&connection)?;
        Ok(Self { connection })
    }

    /// Query-path handle; never mutates the index.
    pub fn open_read_only(path: &Path) -> Result<Self, StoreError> {
        let connection = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        Ok(Self { connection })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let connection = Connection::open_in_memory()?;
        ensure_schema(&connection)?;
        Ok(Self { connection })
    }

    fn has_table(&self, name: &str) -> Result<bool, StoreError> {
        let found = self
            .connection
            .query_row(
                "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1 LIMIT 1",
                [name],
                |row| row.get::<_, i64>(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn dimensions(&self) -> Result<Option<usize>, StoreError> {
        Ok(self.index_meta()?.map(|meta| meta.dimensions))
    }
}

fn ensure_schema(connection: &Connection) -> Result<(), StoreError> {
    connection.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS index_meta (
          id INTEGER PRIMARY KEY CHECK (id = 1),
          model_id TEXT NOT NULL,
          dimensions INTEGER NOT NULL,
          built_at TEXT NOT NULL,
          chunk_count INTEGER NOT NULL,
          checksum TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS entries (
          chunk_id TEXT PRIMARY KEY,
          seq INTEGER NOT NULL,
          doc_id TEXT NOT NULL,
          title TEXT NOT NULL,
          page INTEGER NOT NULL,
          char_start INTEGER NOT NULL,
          char_end INTEGER NOT NULL,
          text TEXT NOT NULL,
          embedding BLOB NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_entries_doc_id ON entries(doc_id);
        ",
    )?;
    Ok(())
}

impl VectorStore for SqliteVectorStore {
    fn rebuild(&mut self, meta: &IndexMeta, entries: &[StoredEntry]) -> Result<(), StoreError> {
        let tx = self.connection.transaction()?;
        tx.execute("DELETE FROM entries", [])?;
        tx.execute("DELETE FROM index_meta", [])?;

        {
            let mut statement = tx.prepare(
                "
                INSERT INTO entries(chunk_id, seq, doc_id, title, page, char_start, char_end, text, embedding)
                VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                ON CONFLICT(chunk_id) DO UPDATE SET
                  doc_id=excluded.doc_id,
                  title=excluded.title,
                  page=excluded.page,
                  char_start=excluded.char_start,
                  char_end=excluded.char_end,
                  text=excluded.text,
                  embedding=excluded.embedding
                ",
            )?;
            for (seq, entry) in entries.iter().enumerate() {
                let metadata = &entry.metadata;
                statement.execute(params![
                    metadata.chunk_id,
                    seq as i64,
                    metadata.doc_id,
                    metadata.title,
                    i64::from(metadata.page),
                    metadata.char_start as i64,
                    metadata.char_end as i64,
                    metadata.text,
                    encode_embedding_blob(&entry.vector),
                ])?;
            }
        }

        tx.execute(
            "
            INSERT INTO index_meta(id, model_id, dimensions, built_at, chunk_count, checksum)
            VALUES(1, ?1, ?2, ?3, ?4, ?5)
            ",
            params![
                meta.model_id,
                meta.dimensions as i64,
                meta.built_at,
                meta.chunk_count as i64,
                meta.checksum,
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn index_meta(&self) -> Result<Option<IndexMeta>, StoreError> {
        if !self.has_table("index_meta")? {
            return Ok(None);
        }

        let meta = self
            .connection
            .query_row(
                "SELECT model_id, dimensions, built_at, chunk_count, checksum FROM index_meta WHERE id = 1",
                [],
                |row| {
                    Ok(IndexMeta {
                        model_id: row.get(0)?,
                        dimensions: row.get::<_, i64>(1)? as usize,
                        built_at: row.get(2)?,
                        chunk_count: row.get::<_, i64>(3)? as usize,
                        checksum: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(meta)
    }

    fn entry_count(&self) -> Result<usize, StoreError> {
        if !self.has_table("entries")? {
            return Ok(0);
        }
        let count: i64 = self
            .connection
            .query_row("SELECT COUNT(*) FROM entries", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn entries(&self) -> Result<Vec<StoredEntry>, StoreError> {
        let Some(dimensions) = self.dimensions()? else {
            return Ok(Vec::new());
        };
        let mut statement = self.connection.prepare(
            "
            SELECT chunk_id, doc_id, title, page, char_start, char_end, text, embedding
            FROM entries
            ORDER BY seq ASC
            ",
        )?;
        let mut rows = statement.query([])?;
        let mut out = Vec::<StoredEntry>::new();
        while let Some(row) = rows.next()? {
            let metadata = metadata_from_row(row)?;
            let blob = row.get::<_, Vec<u8>>(7)?;
            let vector = decode_vector(&metadata.chunk_id, &blob, dimensions)?;
            out.push(StoredEntry { metadata, vector });
        }
        Ok(out)
    }

    fn nearest(
        &self,
        query: &[f32],
        top_k: usize,
        doc_id: Option<&str>,
    ) -> Result<Vec<(ChunkMetadata, f64)>, StoreError> {
        let Some(dimensions) = self.dimensions()? else {
            return Ok(Vec::new());
        };
        let mut statement = self.connection.prepare(
            "
            SELECT chunk_id, doc_id, title, page, char_start, char_end, text, embedding
            FROM entries
            WHERE (?1 IS NULL OR doc_id = ?1)
            ORDER BY seq ASC
            ",
        )?;
        let mut rows = statement.query(params![doc_id])?;
        let mut scored = Vec::<(ChunkMetadata, f64)>::new();
        while let Some(row) = rows.next()? {
            let metadata = metadata_from_row(row)?;
            let blob = row.get::<_, Vec<u8>>(7)?;
            let vector = decode_vector(&metadata.chunk_id, &blob, dimensions)?;
            let distance = cosine_distance(query, &vector);
            scored.push((metadata, distance));
        }
        Ok(rank_by_distance(scored, top_k))
    }
}

fn metadata_from_row(row: &rusqlite::Row<'_>) -> Result<ChunkMetadata, StoreError> {
    Ok(ChunkMetadata {
        chunk_id: row.get(0)?,
        doc_id: row.get(1)?,
        title: row.get(2)?,
        page: row.get::<_, i64>(3)? as u32,
        char_start: row.get::<_, i64>(4)? as usize,
        char_end: row.get::<_, i64>(5)? as usize,
        text: row.get(6)?,
    })
}

fn decode_vector(chunk_id: &str, blob: &[u8], dimensions: usize) -> Result<Vec<f32>, StoreError> {
    decode_embedding_blob(blob, dimensions).ok_or_else(|| StoreError::Corrupt {
        chunk_id: chunk_id.to_string(),
        reason: format!(
            "embedding blob of {} bytes does not hold {} dimensions",
            blob.len(),
            dimensions
        ),
    })
}

/// In-process store with the same contract, for tests and throwaway indexes.
#[derive(Debug, Default)]
pub struct MemoryVectorStore {
    meta: Option<IndexMeta>,
    entries: Vec<StoredEntry>,
}

impl VectorStore for MemoryVectorStore {
    fn rebuild(&mut self, meta: &IndexMeta, entries: &[StoredEntry]) -> Result<(), StoreError> {
        let mut next = Vec::<StoredEntry>::with_capacity(entries.len());
        for entry in entries {
            match next
                .iter_mut()
                .find(|existing| existing.metadata.chunk_id == entry.metadata.chunk_id)
            {
                Some(existing) => *existing = entry.clone(),
                None => next.push(entry.clone()),
            }
        }
        self.entries = next;
        self.meta = Some(meta.clone());
        Ok(())
    }

    fn index_meta(&self) -> Result<Option<IndexMeta>, StoreError> {
        Ok(self.meta.clone())
    }

    fn entry_count(&self) -> Result<usize, StoreError> {
        Ok(self.entries.len())
    }

    fn entries(&self) -> Result<Vec<StoredEntry>, StoreError> {
        Ok(self.entries.clone())
    }

    fn nearest(
        &self,
        query: &[f32],
        top_k: usize,
        doc_id: Option<&str>,
    ) -> Result<Vec<(ChunkMetadata, f64)>, StoreError> {
        let scored = self
            .entries
            .iter()
            .filter(|entry| doc_id.is_none_or(|wanted| entry.metadata.doc_id == wanted))
            .map(|entry| {
                (
                    entry.metadata.clone(),
                    cosine_distance(query, &entry.vector),
                )
            })
            .collect::<Vec<_>>();
        Ok(rank_by_distance(scored, top_k))
    }
}
