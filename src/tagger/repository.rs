use super::error::{PipelineError, Result};
use super::schema::{ImageRecord, RecordKey, StoragePath};
use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Arc;

/// Keyed document store for [`ImageRecord`]s.
#[async_trait]
pub trait RecordRepository: Send + Sync {
    /// Key of the (at most one) record whose `storagePath` equals `storage_path`.
    async fn find_key_by_storage_path(
        &self,
        storage_path: &StoragePath,
    ) -> Result<Option<RecordKey>>;

    /// A fresh key that no stored record uses yet.
    async fn allocate_key(&self) -> Result<RecordKey>;

    /// Replace the record stored under `key` with `record`. Returns the key
    /// the record now lives under, which is the existing key when another
    /// writer already stored the same storage path.
    async fn save(&self, key: &RecordKey, record: &ImageRecord) -> Result<RecordKey>;

    async fn delete(&self, key: &RecordKey) -> Result<()>;

    async fn get(&self, key: &RecordKey) -> Result<Option<ImageRecord>>;
}

/// SQLite-backed repository. `storage_path` is unique per collection, so a
/// save racing another process for the same path updates the existing row
/// instead of inserting a duplicate.
pub struct SqliteRecordRepository {
    conn: Arc<Mutex<Connection>>,
    collection: String,
}

impl SqliteRecordRepository {
    pub fn new(db_path: &Path, collection: &str) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                PipelineError::io(format!("failed to create {}", parent.display()), e)
            })?;
        }
        let conn = Connection::open(db_path).map_err(|e| {
            PipelineError::Repository(format!("failed to open {}: {e}", db_path.display()))
        })?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous  = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )
        .map_err(repository_error("configure connection"))?;
        Self::from_connection(conn, collection)
    }

    pub fn open_in_memory(collection: &str) -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(repository_error("open in-memory db"))?;
        Self::from_connection(conn, collection)
    }

    fn from_connection(conn: Connection, collection: &str) -> Result<Self> {
        Self::init_schema(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            collection: collection.to_string(),
        })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS images (
                key             TEXT PRIMARY KEY,
                collection      TEXT NOT NULL,
                storage_path    TEXT NOT NULL,
                tags            TEXT NOT NULL,
                thumbnail_path  TEXT NOT NULL,
                updated_at      TEXT NOT NULL,
                UNIQUE (collection, storage_path)
            );",
        )
        .map_err(repository_error("init schema"))
    }

    /// Number of records in this repository's collection.
    pub async fn count(&self) -> Result<usize> {
        let collection = self.collection.clone();
        self.with_conn("count", move |conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM images WHERE collection = ?1",
                params![collection],
                |row| row.get::<_, i64>(0),
            )
            .map(|n| usize::try_from(n).unwrap_or(0))
        })
        .await
    }

    async fn with_conn<T, F>(&self, op: &'static str, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> rusqlite::Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock();
            f(&conn)
        })
        .await
        .map_err(|e| PipelineError::Repository(format!("{op}: worker failed: {e}")))?
        .map_err(repository_error(op))
    }
}

fn repository_error(op: &'static str) -> impl Fn(rusqlite::Error) -> PipelineError {
    move |e| PipelineError::Repository(format!("{op}: {e}"))
}

fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<ImageRecord> {
    let tags: String = row.get(1)?;
    let tags = serde_json::from_str(&tags).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(ImageRecord {
        storage_path: StoragePath::from_raw(row.get(0)?),
        tags,
        thumbnail_path: StoragePath::from_raw(row.get(2)?),
    })
}

#[async_trait]
impl RecordRepository for SqliteRecordRepository {
    async fn find_key_by_storage_path(
        &self,
        storage_path: &StoragePath,
    ) -> Result<Option<RecordKey>> {
        let collection = self.collection.clone();
        let path = storage_path.as_str().to_string();
        self.with_conn("query by storage path", move |conn| {
            conn.query_row(
                "SELECT key FROM images WHERE collection = ?1 AND storage_path = ?2 LIMIT 1",
                params![collection, path],
                |row| row.get::<_, String>(0),
            )
            .optional()
            .map(|key| key.map(RecordKey::new))
        })
        .await
    }

    async fn allocate_key(&self) -> Result<RecordKey> {
        Ok(RecordKey::generate())
    }

    async fn save(&self, key: &RecordKey, record: &ImageRecord) -> Result<RecordKey> {
        let tags = serde_json::to_string(&record.tags)
            .map_err(|e| PipelineError::Repository(format!("encode tags: {e}")))?;
        let collection = self.collection.clone();
        let key = key.as_str().to_string();
        let storage_path = record.storage_path.as_str().to_string();
        let thumbnail_path = record.thumbnail_path.as_str().to_string();
        let now = chrono::Utc::now().to_rfc3339();

        self.with_conn("save", move |conn| {
            conn.query_row(
                "INSERT INTO images
                    (key, collection, storage_path, tags, thumbnail_path, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT(key) DO UPDATE SET
                    collection = excluded.collection,
                    storage_path = excluded.storage_path,
                    tags = excluded.tags,
                    thumbnail_path = excluded.thumbnail_path,
                    updated_at = excluded.updated_at
                 ON CONFLICT(collection, storage_path) DO UPDATE SET
                    tags = excluded.tags,
                    thumbnail_path = excluded.thumbnail_path,
                    updated_at = excluded.updated_at
                 RETURNING key",
                params![key, collection, storage_path, tags, thumbnail_path, now],
                |row| row.get::<_, String>(0),
            )
            .map(RecordKey::new)
        })
        .await
    }

    async fn delete(&self, key: &RecordKey) -> Result<()> {
        let collection = self.collection.clone();
        let key = key.as_str().to_string();
        self.with_conn("delete", move |conn| {
            conn.execute(
                "DELETE FROM images WHERE key = ?1 AND collection = ?2",
                params![key, collection],
            )
            .map(|_| ())
        })
        .await
    }

    async fn get(&self, key: &RecordKey) -> Result<Option<ImageRecord>> {
        let collection = self.collection.clone();
        let key = key.as_str().to_string();
        self.with_conn("get", move |conn| {
            conn.query_row(
                "SELECT storage_path, tags, thumbnail_path FROM images
                 WHERE key = ?1 AND collection = ?2",
                params![key, collection],
                row_to_record,
            )
            .optional()
        })
        .await
    }
}
