//! SQLite implementation of the content store.

use chrono::{DateTime, SecondsFormat, Utc};
use color_eyre::{eyre::eyre, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, warn};

use super::traits::{day_range, ContentIndex, ContentStore};
use crate::model::{ContentRecord, PageSnapshotRecord};

/// Ordered schema migrations. Entry `n` upgrades `user_version` n to n + 1.
const MIGRATIONS: &[&str] = &[SCHEMA_V1, SCHEMA_V2];

/// Current schema version.
pub const SCHEMA_VERSION: i64 = MIGRATIONS.len() as i64;

const SCHEMA_V1: &str = r#"
-- Content items (serialized JSON plus indexed columns)
CREATE TABLE IF NOT EXISTS content_items (
    id TEXT PRIMARY KEY,
    content_type TEXT NOT NULL,
    published_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    data BLOB NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_content_items_type ON content_items(content_type);
CREATE INDEX IF NOT EXISTS idx_content_items_published ON content_items(published_at);

-- Rendered page snapshots, one per path
CREATE TABLE IF NOT EXISTS page_snapshots (
    id TEXT PRIMARY KEY,
    content TEXT NOT NULL,
    cached_at TEXT NOT NULL
);
"#;

const SCHEMA_V2: &str = r#"
-- Last successful reconciliation per collection
CREATE TABLE IF NOT EXISTS collection_sync (
    collection TEXT PRIMARY KEY,
    synced_at TEXT NOT NULL,
    record_count INTEGER NOT NULL
);

-- Collection to item mapping (preserves fetch order)
CREATE TABLE IF NOT EXISTS collection_members (
    collection TEXT NOT NULL,
    id TEXT NOT NULL,
    position INTEGER NOT NULL,
    PRIMARY KEY (collection, id)
);

CREATE INDEX IF NOT EXISTS idx_collection_members_id ON collection_members(id);
"#;

/// SQLite-backed content store.
pub struct SqliteStore {
  conn: Mutex<Connection>,
}

impl SqliteStore {
  /// Open (or create) the store at `path`, upgrading the schema if needed.
  pub fn open(path: &Path) -> Result<Self> {
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;
    conn
      .busy_timeout(Duration::from_secs(5))
      .map_err(|e| eyre!("Failed to set busy timeout: {}", e))?;
    conn
      .pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get::<_, String>(0))
      .map_err(|e| eyre!("Failed to enable WAL: {}", e))?;

    Self::from_connection(conn)
  }

  /// Open a private in-memory store.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;
    Self::from_connection(conn)
  }

  fn from_connection(mut conn: Connection) -> Result<Self> {
    run_migrations(&mut conn)?;
    Ok(Self {
      conn: Mutex::new(conn),
    })
  }

  fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
    self
      .conn
      .lock()
      .map_err(|e| eyre!("Lock poisoned: {}", e))
  }

  pub fn schema_version(&self) -> Result<i64> {
    let conn = self.conn()?;
    user_version(&conn)
  }
}

fn user_version(conn: &Connection) -> Result<i64> {
  conn
    .query_row("PRAGMA user_version", [], |row| row.get(0))
    .map_err(|e| eyre!("Failed to read schema version: {}", e))
}

fn run_migrations(conn: &mut Connection) -> Result<()> {
  let current = user_version(conn)?;
  if current > SCHEMA_VERSION {
    return Err(eyre!(
      "Cache schema version {} is newer than supported version {}",
      current,
      SCHEMA_VERSION
    ));
  }

  for (idx, migration) in MIGRATIONS.iter().enumerate().skip(current as usize) {
    let version = idx as i64 + 1;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin migration: {}", e))?;
    tx.execute_batch(migration)
      .map_err(|e| eyre!("Failed to run cache migration {}: {}", version, e))?;
    tx.pragma_update(None, "user_version", version)
      .map_err(|e| eyre!("Failed to record schema version {}: {}", version, e))?;
    tx.commit()
      .map_err(|e| eyre!("Failed to commit migration {}: {}", version, e))?;
    debug!(version, "Applied cache migration");
  }

  Ok(())
}

/// Fixed-width UTC timestamps so that text ordering matches time ordering.
fn format_ts(dt: &DateTime<Utc>) -> String {
  dt.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}

fn upsert_record(conn: &Connection, record: &ContentRecord) -> Result<()> {
  let data =
    serde_json::to_vec(record).map_err(|e| eyre!("Failed to serialize record: {}", e))?;

  conn
    .execute(
      "INSERT INTO content_items (id, content_type, published_at, updated_at, data)
       VALUES (?1, ?2, ?3, ?4, ?5)
       ON CONFLICT(id) DO UPDATE SET
         content_type = excluded.content_type,
         published_at = excluded.published_at,
         updated_at = excluded.updated_at,
         data = excluded.data",
      params![
        record.id,
        record.content_type,
        format_ts(&record.published_at),
        format_ts(&record.updated_at),
        data
      ],
    )
    .map_err(|e| eyre!("Failed to store record {}: {}", record.id, e))?;

  Ok(())
}

/// Decode rows of serialized records, skipping any that no longer parse.
fn decode_records(rows: Vec<Vec<u8>>) -> Vec<ContentRecord> {
  rows
    .into_iter()
    .filter_map(|data| match serde_json::from_slice(&data) {
      Ok(record) => Some(record),
      Err(e) => {
        warn!("Skipping undecodable cached record: {}", e);
        None
      }
    })
    .collect()
}

fn query_records(
  conn: &Connection,
  sql: &str,
  params: impl rusqlite::Params,
) -> Result<Vec<ContentRecord>> {
  let mut stmt = conn
    .prepare(sql)
    .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

  let rows = stmt
    .query_map(params, |row| row.get::<_, Vec<u8>>(0))
    .map_err(|e| eyre!("Failed to query records: {}", e))?
    .collect::<rusqlite::Result<Vec<_>>>()
    .map_err(|e| eyre!("Failed to read records: {}", e))?;

  Ok(decode_records(rows))
}

impl ContentStore for SqliteStore {
  fn upsert_many(&self, items: &[ContentRecord]) -> Result<()> {
    let mut conn = self.conn()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    for item in items {
      upsert_record(&tx, item)?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
    Ok(())
  }

  fn replace_collection(
    &self,
    collection: &str,
    items: &[ContentRecord],
    synced_at: DateTime<Utc>,
  ) -> Result<usize> {
    let mut conn = self.conn()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    let previous: Vec<String> = {
      let mut stmt = tx
        .prepare("SELECT id FROM collection_members WHERE collection = ?")
        .map_err(|e| eyre!("Failed to prepare member query: {}", e))?;
      let ids = stmt
        .query_map(params![collection], |row| row.get(0))
        .map_err(|e| eyre!("Failed to query members: {}", e))?
        .collect::<rusqlite::Result<Vec<String>>>()
        .map_err(|e| eyre!("Failed to read members: {}", e))?;
      ids
    };

    tx.execute(
      "DELETE FROM collection_members WHERE collection = ?",
      params![collection],
    )
    .map_err(|e| eyre!("Failed to delete old members: {}", e))?;

    for (position, item) in items.iter().enumerate() {
      upsert_record(&tx, item)?;
      tx.execute(
        "INSERT OR REPLACE INTO collection_members (collection, id, position)
         VALUES (?, ?, ?)",
        params![collection, item.id, position as i64],
      )
      .map_err(|e| eyre!("Failed to store member {}: {}", item.id, e))?;
    }

    let current: HashSet<&str> = items.iter().map(|i| i.id.as_str()).collect();
    let mut removed = 0;
    for id in previous.iter().filter(|id| !current.contains(id.as_str())) {
      removed += tx
        .execute(
          "DELETE FROM content_items WHERE id = ?1
           AND NOT EXISTS (SELECT 1 FROM collection_members WHERE id = ?1)",
          params![id],
        )
        .map_err(|e| eyre!("Failed to delete record {}: {}", id, e))?;
    }

    tx.execute(
      "INSERT OR REPLACE INTO collection_sync (collection, synced_at, record_count)
       VALUES (?, ?, ?)",
      params![collection, format_ts(&synced_at), items.len() as i64],
    )
    .map_err(|e| eyre!("Failed to update sync metadata: {}", e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(removed)
  }

  fn get_all(&self) -> Result<Vec<ContentRecord>> {
    let conn = self.conn()?;
    query_records(&conn, "SELECT data FROM content_items", [])
  }

  fn get_collection(&self, collection: &str) -> Result<Vec<ContentRecord>> {
    let conn = self.conn()?;
    query_records(
      &conn,
      "SELECT ci.data FROM content_items ci
       INNER JOIN collection_members cm ON cm.id = ci.id
       WHERE cm.collection = ?
       ORDER BY cm.position",
      params![collection],
    )
  }

  fn collection_synced_at(&self, collection: &str) -> Result<Option<DateTime<Utc>>> {
    let conn = self.conn()?;
    let synced: Option<String> = conn
      .query_row(
        "SELECT synced_at FROM collection_sync WHERE collection = ?",
        params![collection],
        |row| row.get(0),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read sync metadata: {}", e))?;

    synced.as_deref().map(parse_ts).transpose()
  }

  fn get_by_index(&self, index: ContentIndex, value: &str) -> Result<Vec<ContentRecord>> {
    let conn = self.conn()?;
    match index {
      ContentIndex::ContentType => query_records(
        &conn,
        "SELECT data FROM content_items WHERE content_type = ? ORDER BY published_at DESC",
        params![value],
      ),
      ContentIndex::PublishedOn => {
        let (start, end) = day_range(value)?;
        query_records(
          &conn,
          "SELECT data FROM content_items
           WHERE published_at >= ? AND published_at < ?
           ORDER BY published_at DESC",
          params![format_ts(&start), format_ts(&end)],
        )
      }
    }
  }

  fn put_page_snapshot(&self, path: &str, content: &str, cached_at: DateTime<Utc>) -> Result<()> {
    let conn = self.conn()?;
    conn
      .execute(
        "INSERT OR REPLACE INTO page_snapshots (id, content, cached_at) VALUES (?, ?, ?)",
        params![path, content, format_ts(&cached_at)],
      )
      .map_err(|e| eyre!("Failed to store page snapshot {}: {}", path, e))?;
    Ok(())
  }

  fn get_page_snapshot(&self, path: &str) -> Result<Option<PageSnapshotRecord>> {
    let conn = self.conn()?;
    let row: Option<(String, String)> = conn
      .query_row(
        "SELECT content, cached_at FROM page_snapshots WHERE id = ?",
        params![path],
        |row| Ok((row.get(0)?, row.get(1)?)),
      )
      .optional()
      .map_err(|e| eyre!("Failed to read page snapshot {}: {}", path, e))?;

    match row {
      Some((content, cached_at)) => Ok(Some(PageSnapshotRecord {
        id: path.to_string(),
        content,
        cached_at: parse_ts(&cached_at)?,
      })),
      None => Ok(None),
    }
  }

  fn page_snapshot_paths(&self) -> Result<Vec<String>> {
    let conn = self.conn()?;
    let mut stmt = conn
      .prepare("SELECT id FROM page_snapshots ORDER BY id")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;
    let paths = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to query page snapshots: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read page snapshots: {}", e))?;
    Ok(paths)
  }

  fn clear(&self) -> Result<()> {
    let mut conn = self.conn()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;
    tx.execute_batch(
      "DELETE FROM collection_members;
       DELETE FROM collection_sync;
       DELETE FROM content_items;
       DELETE FROM page_snapshots;",
    )
    .map_err(|e| eyre!("Failed to clear cache: {}", e))?;
    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;
    Ok(())
  }
}
