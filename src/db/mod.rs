//! Vector store on SQLite and sqlite-vec.
//!
//! A store is a directory holding one `<collection>.sqlite3` file. The vector
//! table's width is fixed when the store is created, so the embedding model
//! and its dimensions are recorded in `store_meta` and checked on open.
use anyhow::Context;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OpenFlags, OptionalExtension, Result, params};
use sqlite_vec::sqlite3_vec_init;
use std::path::{Path, PathBuf};
use std::sync::Once;
use tracing::{debug, info};

use crate::config::ConfigError;

pub mod models;
pub mod search;
pub mod techniques;

pub use models::StoreInfo;

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS store_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS techniques (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    technique_id TEXT NOT NULL,
    name TEXT NOT NULL,
    record TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_technique_id ON techniques(technique_id COLLATE NOCASE);

CREATE TABLE IF NOT EXISTS chunks (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    technique_row INTEGER NOT NULL,
    position INTEGER NOT NULL,
    content TEXT NOT NULL,
    FOREIGN KEY (technique_row) REFERENCES techniques(id) ON DELETE CASCADE
);

CREATE INDEX IF NOT EXISTS idx_chunk_technique ON chunks(technique_row);
"#;

static INIT_VEC: Once = Once::new();

/// Initialize the sqlite-vec extension. Safe to call multiple times.
fn init_sqlite_vec() {
    INIT_VEC.call_once(|| unsafe {
        rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
            sqlite3_vec_init as *const (),
        )));
    });
}

/// Path of the SQLite file for `collection` inside a store directory.
pub fn store_file(dir: &Path, collection: &str) -> PathBuf {
    dir.join(format!("{collection}.sqlite3"))
}

pub(crate) fn conversion_error<E>(col: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(col, Type::Text, Box::new(err))
}

/// A SQLite connection with sqlite-vec loaded and the store schema in place.
pub struct Db {
    pub(crate) conn: Connection,
    dimensions: usize,
}

impl Db {
    /// Create a fresh store for `info` inside the existing directory `dir`.
    pub fn create(dir: &Path, info: &StoreInfo) -> Result<Self> {
        let path = store_file(dir, &info.collection);
        info!("Creating vector store: {}", path.display());

        init_sqlite_vec();
        let conn = Connection::open(&path)?;
        Self::initialize(conn, info)
    }

    /// Open an existing store. Fails if the collection file does not exist.
    pub fn open(dir: &Path, collection: &str) -> Result<Self> {
        let path = store_file(dir, collection);
        debug!("Opening vector store: {}", path.display());

        init_sqlite_vec();
        let conn = Connection::open_with_flags(
            &path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        let mut db = Self {
            conn,
            dimensions: 0,
        };
        db.dimensions = db.store_info()?.dimensions;
        Ok(db)
    }

    /// Open an in-memory store (useful for testing).
    pub fn open_in_memory(info: &StoreInfo) -> Result<Self> {
        init_sqlite_vec();
        let conn = Connection::open_in_memory()?;
        Self::initialize(conn, info)
    }

    fn initialize(conn: Connection, info: &StoreInfo) -> Result<Self> {
        let vec_version: String = conn.query_row("SELECT vec_version()", [], |row| row.get(0))?;
        debug!("sqlite-vec version: {}", vec_version);

        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA_SQL)?;
        conn.execute_batch(&format!(
            "CREATE VIRTUAL TABLE IF NOT EXISTS vec_chunks USING vec0(embedding FLOAT[{}]);",
            info.dimensions
        ))?;

        let entries = [
            ("provider", info.provider.clone()),
            ("model", info.model.clone()),
            ("dimensions", info.dimensions.to_string()),
            ("collection", info.collection.clone()),
            ("created_at", info.created_at.to_rfc3339()),
        ];
        for (key, value) in entries {
            conn.execute(
                "INSERT INTO store_meta (key, value) VALUES (?, ?)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                params![key, value],
            )?;
        }

        Ok(Self {
            conn,
            dimensions: info.dimensions,
        })
    }

    /// Width of the stored vectors.
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Read back the metadata recorded when the store was created.
    pub fn store_info(&self) -> Result<StoreInfo> {
        let get = |key: &str| -> Result<String> {
            self.conn
                .query_row(
                    "SELECT value FROM store_meta WHERE key = ?",
                    params![key],
                    |row| row.get(0),
                )
                .optional()?
                .ok_or(rusqlite::Error::QueryReturnedNoRows)
        };

        let dimensions = get("dimensions")?
            .parse::<usize>()
            .map_err(|e| conversion_error(0, e))?;
        let created_at = DateTime::parse_from_rfc3339(&get("created_at")?)
            .map_err(|e| conversion_error(0, e))?
            .with_timezone(&Utc);

        Ok(StoreInfo {
            provider: get("provider")?,
            model: get("model")?,
            dimensions,
            collection: get("collection")?,
            created_at,
        })
    }
}

/// Open an existing store, reporting a missing one as [`ConfigError::MissingStore`].
pub fn open_store(dir: &Path, collection: &str) -> anyhow::Result<Db> {
    if !store_file(dir, collection).exists() {
        return Err(ConfigError::MissingStore(dir.to_path_buf()).into());
    }
    Db::open(dir, collection)
        .with_context(|| format!("failed to open vector store in {}", dir.display()))
}

/// Fails with [`ConfigError::StoreMismatch`] unless the store was built with
/// `model` at `dimensions`.
pub fn ensure_compatible(db: &Db, model: &str, dimensions: usize) -> anyhow::Result<()> {
    let stored = db.store_info()?;
    if stored.model != model || stored.dimensions != dimensions {
        return Err(ConfigError::StoreMismatch {
            stored_model: stored.model,
            stored_dimensions: stored.dimensions,
            model: model.to_string(),
            dimensions,
        }
        .into());
    }
    Ok(())
}

/// Fails fast when the store was indexed by another provider, before any
/// embedder (and its model download) is built.
pub fn ensure_provider(db: &Db, provider: &str) -> anyhow::Result<()> {
    let stored = db.store_info()?.provider;
    if stored != provider {
        return Err(ConfigError::ProviderMismatch {
            stored,
            selected: provider.to_string(),
        }
        .into());
    }
    Ok(())
}

/// Helper to serialize a float32 vector into bytes for vec0 virtual table
pub fn serialize_vector(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_init() {
        let db = Db::open_in_memory(&StoreInfo::new("local", "test-model", 8, "mitre"))
            .expect("Failed to open in-memory DB");

        let tables: i64 = db
            .conn
            .query_row(
                "SELECT count(*) FROM sqlite_master WHERE type='table' AND name IN ('store_meta', 'techniques', 'chunks', 'vec_chunks');",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 4);
        assert_eq!(db.dimensions(), 8);
    }

    #[test]
    fn test_store_info_roundtrip_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let store_dir = dir.path().join("store");
        let info = StoreInfo::new("openai", "text-embedding-3-small", 16, "mitre_attack_techniques");

        std::fs::create_dir_all(&store_dir).unwrap();
        drop(Db::create(&store_dir, &info).unwrap());
        assert!(store_file(&store_dir, "mitre_attack_techniques").exists());

        let db = Db::open(&store_dir, "mitre_attack_techniques").unwrap();
        let read = db.store_info().unwrap();
        assert_eq!(read.provider, "openai");
        assert_eq!(read.model, "text-embedding-3-small");
        assert_eq!(read.dimensions, 16);
        assert_eq!(read.created_at.timestamp(), info.created_at.timestamp());
        assert_eq!(db.dimensions(), 16);
    }

    #[test]
    fn test_open_missing_collection_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Db::open(dir.path(), "absent").is_err());
    }

    #[test]
    fn test_open_store_reports_missing_store() {
        let dir = tempfile::tempdir().unwrap();
        let err = open_store(&dir.path().join("nowhere"), "mitre").err().unwrap();
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::MissingStore(_))
        ));
    }

    #[test]
    fn test_ensure_compatible() {
        let db = Db::open_in_memory(&StoreInfo::new("local", "mini", 4, "mitre")).unwrap();
        assert!(ensure_compatible(&db, "mini", 4).is_ok());

        let err = ensure_compatible(&db, "text-embedding-3-small", 1536).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<ConfigError>(),
            Some(ConfigError::StoreMismatch { stored_dimensions: 4, .. })
        ));
    }

    #[test]
    fn test_ensure_provider() {
        let db = Db::open_in_memory(&StoreInfo::new("openai", "text-embedding-3-small", 4, "mitre"))
            .unwrap();
        assert!(ensure_provider(&db, "openai").is_ok());

        let err = ensure_provider(&db, "local").unwrap_err();
        match err.downcast_ref::<ConfigError>() {
            Some(ConfigError::ProviderMismatch { stored, selected }) => {
                assert_eq!(stored, "openai");
                assert_eq!(selected, "local");
            }
            other => panic!("expected provider mismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_serialize_vector() {
        let bytes = serialize_vector(&[1.0, 2.0, -3.5]);
        assert_eq!(bytes.len(), 12);
        assert_eq!(&bytes[0..4], &[0x00, 0x00, 0x80, 0x3f]);
        assert_eq!(&bytes[4..8], &[0x00, 0x00, 0x00, 0x40]);
        assert_eq!(&bytes[8..12], &[0x00, 0x00, 0x60, 0xc0]);
    }
}
