use anyhow::{anyhow, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard};

use crate::embedding::{from_blob, to_blob};

/// One enrolled identity.
///
/// `embedding` is stored normalized. `id` is assigned by the store on first
/// insert; inserting an entry whose `id` already exists replaces that row.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GalleryEntry {
    pub id: Option<i64>,
    pub name: String,
    pub embedding: Vec<f32>,
    pub tracking_id: Option<i64>,
    pub last_seen_ms: u64,
}

impl GalleryEntry {
    pub fn new(name: &str, embedding: Vec<f32>, last_seen_ms: u64) -> Self {
        Self {
            id: None,
            name: name.to_string(),
            embedding,
            tracking_id: None,
            last_seen_ms,
        }
    }
}

/// Persisted collection of named face embeddings.
///
/// Single-row, non-transactional operations. Reads may run concurrently with
/// writes; a match that loaded its snapshot before an enroll will not see it.
/// Names are not unique: two entries may share a name.
pub trait GalleryStore: Send + Sync {
    /// Insert or replace (by id). Returns the row id.
    fn insert(&self, entry: &GalleryEntry) -> Result<i64>;

    /// Full snapshot, ordered by id.
    fn get_all(&self) -> Result<Vec<GalleryEntry>>;

    /// Lowest-id entry carrying `name`.
    fn get_by_name(&self, name: &str) -> Result<Option<GalleryEntry>>;

    /// Delete every entry carrying `name`. Returns rows removed.
    fn delete_by_name(&self, name: &str) -> Result<usize>;

    /// Delete everything. Returns rows removed.
    fn delete_all(&self) -> Result<usize>;

    /// Update the last-seen timestamp of one entry. Returns false if absent.
    fn mark_seen(&self, id: i64, seen_ms: u64) -> Result<bool>;
}

pub struct SqliteGalleryStore {
    conn: Mutex<Connection>,
}

impl SqliteGalleryStore {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = crate::open_db_connection(db_path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.ensure_schema()?;
        Ok(store)
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("gallery connection lock poisoned"))
    }

    fn ensure_schema(&self) -> Result<()> {
        self.conn()?.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS gallery_entries (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              name TEXT NOT NULL,
              embedding BLOB NOT NULL,
              tracking_id INTEGER,
              last_seen_ms INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_gallery_name ON gallery_entries(name);
            "#,
        )?;
        Ok(())
    }
}

fn row_to_entry(row: &Row<'_>) -> rusqlite::Result<(i64, String, Vec<u8>, Option<i64>, i64)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

fn decode_entry(raw: (i64, String, Vec<u8>, Option<i64>, i64)) -> Result<GalleryEntry> {
    let (id, name, blob, tracking_id, last_seen_ms) = raw;
    let embedding = from_blob(&blob).map_err(|e| anyhow!("gallery entry {}: {}", id, e))?;
    Ok(GalleryEntry {
        id: Some(id),
        name,
        embedding,
        tracking_id,
        last_seen_ms: u64::try_from(last_seen_ms)
            .map_err(|_| anyhow!("gallery entry {}: negative last_seen_ms", id))?,
    })
}

fn to_sql_ms(ms: u64) -> Result<i64> {
    i64::try_from(ms).map_err(|_| anyhow!("timestamp {} exceeds i64 range", ms))
}

impl GalleryStore for SqliteGalleryStore {
    fn insert(&self, entry: &GalleryEntry) -> Result<i64> {
        let conn = self.conn()?;
        conn.execute(
            r#"
            INSERT OR REPLACE INTO gallery_entries(id, name, embedding, tracking_id, last_seen_ms)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                entry.id,
                entry.name,
                to_blob(&entry.embedding),
                entry.tracking_id,
                to_sql_ms(entry.last_seen_ms)?
            ],
        )?;
        Ok(entry.id.unwrap_or_else(|| conn.last_insert_rowid()))
    }

    fn get_all(&self) -> Result<Vec<GalleryEntry>> {
        let rows = {
            let conn = self.conn()?;
            let mut stmt = conn.prepare(
                "SELECT id, name, embedding, tracking_id, last_seen_ms FROM gallery_entries ORDER BY id ASC",
            )?;
            let rows = stmt
                .query_map([], row_to_entry)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            rows
        };
        rows.into_iter().map(decode_entry).collect()
    }

    fn get_by_name(&self, name: &str) -> Result<Option<GalleryEntry>> {
        let raw = self
            .conn()?
            .query_row(
                "SELECT id, name, embedding, tracking_id, last_seen_ms FROM gallery_entries WHERE name = ?1 ORDER BY id ASC LIMIT 1",
                params![name],
                row_to_entry,
            )
            .optional()?;
        raw.map(decode_entry).transpose()
    }

    fn delete_by_name(&self, name: &str) -> Result<usize> {
        Ok(self
            .conn()?
            .execute("DELETE FROM gallery_entries WHERE name = ?1", params![name])?)
    }

    fn delete_all(&self) -> Result<usize> {
        Ok(self.conn()?.execute("DELETE FROM gallery_entries", [])?)
    }

    fn mark_seen(&self, id: i64, seen_ms: u64) -> Result<bool> {
        let changed = self.conn()?.execute(
            "UPDATE gallery_entries SET last_seen_ms = ?1 WHERE id = ?2",
            params![to_sql_ms(seen_ms)?, id],
        )?;
        Ok(changed > 0)
    }
}

#[derive(Debug, Default)]
struct InMemoryGallery {
    entries: Vec<GalleryEntry>,
    next_id: i64,
}

/// Gallery held in process memory. Same semantics as the SQLite store.
#[derive(Debug, Default)]
pub struct InMemoryGalleryStore {
    inner: Mutex<InMemoryGallery>,
}

impl InMemoryGalleryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn inner(&self) -> Result<MutexGuard<'_, InMemoryGallery>> {
        self.inner
            .lock()
            .map_err(|_| anyhow!("gallery lock poisoned"))
    }
}

impl GalleryStore for InMemoryGalleryStore {
    fn insert(&self, entry: &GalleryEntry) -> Result<i64> {
        let mut inner = self.inner()?;
        let id = match entry.id {
            Some(id) => id,
            None => inner.next_id + 1,
        };
        inner.next_id = inner.next_id.max(id);
        let mut stored = entry.clone();
        stored.id = Some(id);
        match inner.entries.iter().position(|e| e.id == Some(id)) {
            Some(index) => inner.entries[index] = stored,
            None => {
                inner.entries.push(stored);
                inner.entries.sort_by_key(|e| e.id);
            }
        }
        Ok(id)
    }

    fn get_all(&self) -> Result<Vec<GalleryEntry>> {
        Ok(self.inner()?.entries.clone())
    }

    fn get_by_name(&self, name: &str) -> Result<Option<GalleryEntry>> {
        Ok(self
            .inner()?
            .entries
            .iter()
            .find(|e| e.name == name)
            .cloned())
    }

    fn delete_by_name(&self, name: &str) -> Result<usize> {
        let mut inner = self.inner()?;
        let before = inner.entries.len();
        inner.entries.retain(|e| e.name != name);
        Ok(before - inner.entries.len())
    }

    fn delete_all(&self) -> Result<usize> {
        let mut inner = self.inner()?;
        let removed = inner.entries.len();
        inner.entries.clear();
        Ok(removed)
    }

    fn mark_seen(&self, id: i64, seen_ms: u64) -> Result<bool> {
        let mut inner = self.inner()?;
        match inner.entries.iter_mut().find(|e| e.id == Some(id)) {
            Some(entry) => {
                entry.last_seen_ms = seen_ms;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stores() -> Vec<Box<dyn GalleryStore>> {
        vec![
            Box::new(InMemoryGalleryStore::new()),
            Box::new(SqliteGalleryStore::open(&crate::shared_memory_uri()).expect("open sqlite")),
        ]
    }

    #[test]
    fn insert_assigns_increasing_ids() -> Result<()> {
        for store in stores() {
            let a = store.insert(&GalleryEntry::new("alice", vec![1.0, 0.0], 10))?;
            let b = store.insert(&GalleryEntry::new("bob", vec![0.0, 1.0], 20))?;
            assert!(b > a);
            let all = store.get_all()?;
            assert_eq!(all.len(), 2);
            assert_eq!(all[0].id, Some(a));
            assert_eq!(all[1].name, "bob");
            assert_eq!(all[1].embedding, vec![0.0, 1.0]);
        }
        Ok(())
    }

    #[test]
    fn duplicate_names_coexist() -> Result<()> {
        for store in stores() {
            let first = store.insert(&GalleryEntry::new("alice", vec![1.0, 0.0], 1))?;
            store.insert(&GalleryEntry::new("alice", vec![0.0, 1.0], 2))?;
            assert_eq!(store.get_all()?.len(), 2);
            let found = store.get_by_name("alice")?.expect("alice enrolled");
            assert_eq!(found.id, Some(first));
        }
        Ok(())
    }

    #[test]
    fn insert_with_existing_id_replaces_row() -> Result<()> {
        for store in stores() {
            let id = store.insert(&GalleryEntry::new("alice", vec![1.0, 0.0], 1))?;
            let mut updated = GalleryEntry::new("alice", vec![0.0, 1.0], 5);
            updated.id = Some(id);
            updated.tracking_id = Some(42);
            assert_eq!(store.insert(&updated)?, id);

            let all = store.get_all()?;
            assert_eq!(all.len(), 1);
            assert_eq!(all[0], updated);
        }
        Ok(())
    }

    #[test]
    fn delete_by_name_removes_every_copy() -> Result<()> {
        for store in stores() {
            store.insert(&GalleryEntry::new("alice", vec![1.0], 1))?;
            store.insert(&GalleryEntry::new("alice", vec![1.0], 2))?;
            store.insert(&GalleryEntry::new("bob", vec![1.0], 3))?;
            assert_eq!(store.delete_by_name("alice")?, 2);
            assert!(store.get_by_name("alice")?.is_none());
            assert_eq!(store.delete_by_name("carol")?, 0);
            assert_eq!(store.get_all()?.len(), 1);
        }
        Ok(())
    }

    #[test]
    fn delete_all_empties_gallery() -> Result<()> {
        for store in stores() {
            store.insert(&GalleryEntry::new("alice", vec![1.0], 1))?;
            store.insert(&GalleryEntry::new("bob", vec![1.0], 2))?;
            assert_eq!(store.delete_all()?, 2);
            assert!(store.get_all()?.is_empty());
        }
        Ok(())
    }

    #[test]
    fn mark_seen_updates_timestamp() -> Result<()> {
        for store in stores() {
            let id = store.insert(&GalleryEntry::new("alice", vec![1.0], 1))?;
            assert!(store.mark_seen(id, 99)?);
            assert!(!store.mark_seen(id + 100, 99)?);
            assert_eq!(store.get_by_name("alice")?.unwrap().last_seen_ms, 99);
        }
        Ok(())
    }
}
