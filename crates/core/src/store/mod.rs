//! SQLite checkpoint of per-binary inventories.
//!
//! The reducer records every merged inventory together with the SHA-256 of
//! the member file and the fingerprint of the extraction options. A later run
//! over the same corpus reloads inventories whose content hash and options
//! fingerprint both still match instead of extracting them again.

use std::collections::HashMap;
use std::path::Path;

use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;

use crate::index::BinaryInventory;

/// Minimum schema version we know how to handle.
///
/// `0` means "no schema yet" (fresh DB).
const MIN_SUPPORTED_SCHEMA_VERSION: i32 = 0;

/// Latest schema version this crate knows about.
pub const CURRENT_SCHEMA_VERSION: i32 = 3;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sql(#[from] rusqlite::Error),

    #[error("Failed to (de)serialize inventory: {0}")]
    Json(#[from] serde_json::Error),

    /// The checkpoint was written by a newer version of this crate.
    #[error(
        "Unsupported schema version {found}; supported range is {min_supported}..={max_supported}"
    )]
    UnsupportedSchemaVersion { found: i32, min_supported: i32, max_supported: i32 },
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Summary of one finished run, kept alongside the inventories.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRecord {
    pub started_at: String,
    pub finished_at: String,
    pub processed: i64,
    pub resumed: i64,
    pub cancelled: bool,
}

#[derive(Debug)]
pub struct CheckpointDb {
    conn: Connection,
}

impl CheckpointDb {
    /// Open (or create) a checkpoint database and bring its schema up to date.
    pub fn open(path: &Path) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        apply_migrations(&conn)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        apply_migrations(&conn)?;
        Ok(Self { conn })
    }

    pub fn schema_version(&self) -> StoreResult<i32> {
        current_schema_version(&self.conn)
    }

    /// Insert or replace the inventory of one binary, extracted under the
    /// options with fingerprint `options_hash`.
    pub fn record(&self, inventory: &BinaryInventory, options_hash: &str, recorded_at: &str) -> StoreResult<()> {
        let json = serde_json::to_string(inventory)?;
        self.conn.execute(
            r#"
            INSERT OR REPLACE INTO inventories
                (binary, package, content_hash, inventory, recorded_at, options_hash)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
            params![
                inventory.binary.key(),
                inventory.binary.package,
                inventory.content_hash,
                json,
                recorded_at,
                options_hash
            ],
        )?;
        Ok(())
    }

    /// Load the inventory recorded for `binary` if it was taken from content
    /// with hash `content_hash` under options `options_hash`.
    pub fn load(&self, binary: &str, content_hash: &str, options_hash: &str) -> StoreResult<Option<BinaryInventory>> {
        let json: Option<String> = self
            .conn
            .query_row(
                r#"
                SELECT inventory FROM inventories
                WHERE binary = ?1 AND content_hash = ?2 AND options_hash = ?3
                "#,
                params![binary, content_hash, options_hash],
                |row| row.get(0),
            )
            .optional()?;
        match json {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Binary key → content hash for every inventory recorded under
    /// `options_hash`.
    pub fn recorded_hashes(&self, options_hash: &str) -> StoreResult<HashMap<String, String>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT binary, content_hash FROM inventories
            WHERE content_hash IS NOT NULL AND options_hash = ?1
            "#,
        )?;
        let rows = stmt.query_map(params![options_hash], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut out = HashMap::new();
        for row in rows {
            let (binary, hash) = row?;
            out.insert(binary, hash);
        }
        Ok(out)
    }

    pub fn count(&self) -> StoreResult<usize> {
        let count: i64 = self.conn.query_row("SELECT COUNT(*) FROM inventories", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Recorded binary keys, sorted.
    pub fn list_keys(&self) -> StoreResult<Vec<String>> {
        let mut stmt = self.conn.prepare("SELECT binary FROM inventories ORDER BY binary")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn insert_run(&self, run: &RunRecord) -> StoreResult<i64> {
        self.conn.execute(
            r#"
            INSERT INTO runs (started_at, finished_at, processed, resumed, cancelled)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
            params![
                run.started_at,
                run.finished_at,
                run.processed,
                run.resumed,
                if run.cancelled { 1 } else { 0 }
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// All recorded runs, oldest first.
    pub fn list_runs(&self) -> StoreResult<Vec<RunRecord>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT started_at, finished_at, processed, resumed, cancelled
            FROM runs
            ORDER BY id
            "#,
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(RunRecord {
                started_at: row.get(0)?,
                finished_at: row.get(1)?,
                processed: row.get(2)?,
                resumed: row.get(3)?,
                cancelled: row.get::<_, i64>(4)? != 0,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }
}

fn apply_migrations(conn: &Connection) -> StoreResult<()> {
    let mut current_version = current_schema_version(conn)?;

    if current_version > CURRENT_SCHEMA_VERSION {
        return Err(StoreError::UnsupportedSchemaVersion {
            found: current_version,
            min_supported: MIN_SUPPORTED_SCHEMA_VERSION,
            max_supported: CURRENT_SCHEMA_VERSION,
        });
    }

    if current_version == 0 {
        conn.execute_batch(
            r#"
            BEGIN;
            CREATE TABLE IF NOT EXISTS inventories (
                binary       TEXT PRIMARY KEY,
                package      TEXT NOT NULL,
                content_hash TEXT,
                inventory    TEXT NOT NULL,
                recorded_at  TEXT NOT NULL
            );

            PRAGMA user_version = 1;
            COMMIT;
            "#,
        )?;
        current_version = 1;
    }

    if current_version < 2 {
        conn.execute_batch(
            r#"
            BEGIN;
            CREATE TABLE IF NOT EXISTS runs (
                id          INTEGER PRIMARY KEY AUTOINCREMENT,
                started_at  TEXT NOT NULL,
                finished_at TEXT NOT NULL,
                processed   INTEGER NOT NULL,
                resumed     INTEGER NOT NULL,
                cancelled   INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS inventories_package ON inventories (package);

            PRAGMA user_version = 2;
            COMMIT;
            "#,
        )?;
        current_version = 2;
    }

    if current_version < 3 {
        // Rows from older schemas have no options fingerprint and are never reused.
        conn.execute_batch(
            r#"
            BEGIN;
            ALTER TABLE inventories ADD COLUMN options_hash TEXT;

            PRAGMA user_version = 3;
            COMMIT;
            "#,
        )?;
    }

    Ok(())
}

fn current_schema_version(conn: &Connection) -> StoreResult<i32> {
    let version: i32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    Ok(version)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::classify::Label;
    use crate::extract::ExtractOptions;
    use crate::model::{BinaryId, StringValue, SymbolFeatures};

    fn inventory(hash: &str) -> BinaryInventory {
        let mut labels = BTreeMap::new();
        labels.insert(Label::FilesystemPath, vec![StringValue::from("/etc/foo.conf")]);
        BinaryInventory {
            binary: BinaryId::new("foo_1_amd64", "foo"),
            binary_index: 0,
            package_index: 0,
            arch: "x86_64".into(),
            content_hash: Some(hash.into()),
            labels,
            symbols: SymbolFeatures::default(),
            warnings: vec![],
        }
    }

    #[test]
    fn fresh_db_is_at_current_version() {
        let db = CheckpointDb::open_in_memory().unwrap();
        assert_eq!(db.schema_version().unwrap(), CURRENT_SCHEMA_VERSION);
        assert_eq!(db.count().unwrap(), 0);
    }

    #[test]
    fn inventories_reload_only_for_matching_hash() {
        let db = CheckpointDb::open_in_memory().unwrap();
        let inv = inventory("abc");
        db.record(&inv, "opts", "2026-01-01T00:00:00Z").unwrap();
        db.record(&inv, "opts", "2026-01-02T00:00:00Z").unwrap();
        assert_eq!(db.count().unwrap(), 1);
        assert_eq!(db.load("foo_1_amd64/foo", "abc", "opts").unwrap(), Some(inv));
        assert_eq!(db.load("foo_1_amd64/foo", "def", "opts").unwrap(), None);
        assert_eq!(db.recorded_hashes("opts").unwrap()["foo_1_amd64/foo"], "abc");
        assert_eq!(db.list_keys().unwrap(), vec!["foo_1_amd64/foo"]);
    }

    #[test]
    fn inventories_reload_only_for_matching_options() {
        let db = CheckpointDb::open_in_memory().unwrap();
        db.record(&inventory("abc"), "min4", "2026-01-01T00:00:00Z").unwrap();
        assert_eq!(db.load("foo_1_amd64/foo", "abc", "min8").unwrap(), None);
        assert!(db.recorded_hashes("min8").unwrap().is_empty());
        assert_eq!(db.recorded_hashes("min4").unwrap().len(), 1);
    }

    #[test]
    fn version_two_rows_are_kept_but_never_reused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoint.db");
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch(
                r#"
                CREATE TABLE inventories (
                    binary       TEXT PRIMARY KEY,
                    package      TEXT NOT NULL,
                    content_hash TEXT,
                    inventory    TEXT NOT NULL,
                    recorded_at  TEXT NOT NULL
                );
                CREATE TABLE runs (
                    id          INTEGER PRIMARY KEY AUTOINCREMENT,
                    started_at  TEXT NOT NULL,
                    finished_at TEXT NOT NULL,
                    processed   INTEGER NOT NULL,
                    resumed     INTEGER NOT NULL,
                    cancelled   INTEGER NOT NULL
                );
                INSERT INTO inventories VALUES ('foo_1_amd64/foo', 'foo_1_amd64', 'abc', '{}', 'then');
                PRAGMA user_version = 2;
                "#,
            )
            .unwrap();
        }
        let db = CheckpointDb::open(&path).unwrap();
        assert_eq!(db.schema_version().unwrap(), CURRENT_SCHEMA_VERSION);
        assert_eq!(db.count().unwrap(), 1);
        assert!(db.recorded_hashes(&ExtractOptions::default().fingerprint()).unwrap().is_empty());
    }

    #[test]
    fn runs_are_listed_in_insertion_order() {
        let db = CheckpointDb::open_in_memory().unwrap();
        let run = RunRecord {
            started_at: "a".into(),
            finished_at: "b".into(),
            processed: 3,
            resumed: 1,
            cancelled: true,
        };
        db.insert_run(&run).unwrap();
        assert_eq!(db.list_runs().unwrap(), vec![run]);
    }

    #[test]
    fn newer_schema_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("checkpoint.db");
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch("PRAGMA user_version = 99;").unwrap();
        }
        let err = CheckpointDb::open(&path).unwrap_err();
        assert!(matches!(err, StoreError::UnsupportedSchemaVersion { found: 99, .. }));
    }
}
