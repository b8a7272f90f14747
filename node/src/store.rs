// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Durable Event Store
//!
//! One append-only SQLite table holding every event that survived a flush.
//!
//! # Table
//! ```text
//! tlytics(key TEXT NOT NULL, timestamp DATETIME NOT NULL, data TEXT)
//! ```
//! - `timestamp` is fixed-width RFC3339 UTC with nanoseconds, so text order
//!   equals time order
//! - `data` is the JSON encoding of the payload
//! - no primary key, no secondary index, no deletes
//!
//! # Guarantees
//! - A batch is committed in one transaction or not at all
//! - The connection sits behind one mutex: a read takes its count and its
//!   page in the same transaction, so `total` always matches the rows served

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OpenFlags};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;
use tlytics::{Event, Payload};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS tlytics (
    key TEXT NOT NULL CHECK (length(key) > 0),
    timestamp DATETIME NOT NULL,
    data TEXT
);
"#;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Payload encoding error: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("Invalid stored timestamp {0:?}")]
    Timestamp(String),

    #[error("Store lock poisoned")]
    Poisoned,

    #[error("Store task failed: {0}")]
    Join(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// One newest-first slice of the event history.
#[derive(Debug, Clone, Default)]
pub struct EventPage {
    pub events: Vec<Event>,
    /// Full row count at query time, independent of limit/offset.
    pub total: u64,
}

pub struct EventStore {
    conn: Mutex<Connection>,
    path: Option<PathBuf>,
}

impl EventStore {
    /// Open (or create) the database file and its table.
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        // WAL lets the CLI read while the node writes
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        conn.execute_batch(SCHEMA)?;

        Ok(Self {
            conn: Mutex::new(conn),
            path: Some(path.to_path_buf()),
        })
    }

    /// Open an existing database without touching it: no journal switch,
    /// no schema, and writes fail.
    pub fn open_read_only(path: &Path) -> Result<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.busy_timeout(std::time::Duration::from_secs(5))?;

        tracing::debug!("Event store opened read-only at {:?}", path);
        Ok(Self {
            conn: Mutex::new(conn),
            path: Some(path.to_path_buf()),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: None,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    /// Insert a batch atomically. Returns the number of rows written.
    ///
    /// Any row failure rolls back the whole batch; readers never see a
    /// partial batch.
    pub fn insert_batch(&self, events: &[Event]) -> Result<usize> {
        if events.is_empty() {
            return Ok(0);
        }

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        {
            let mut stmt =
                tx.prepare_cached("INSERT INTO tlytics (key, timestamp, data) VALUES (?1, ?2, ?3)")?;
            let now = Utc::now();
            for event in events {
                let data = serde_json::to_string(event.data())?;
                let ts = encode_timestamp(event.timestamp().unwrap_or(now));
                stmt.execute(params![event.key(), ts, data])?;
            }
        }
        // Dropping `tx` on any early return above rolls back
        tx.commit()?;

        tracing::debug!("Inserted batch of {} events", events.len());
        Ok(events.len())
    }

    /// Newest-first page plus the total row count.
    ///
    /// `limit == 0` or an offset past the end gives an empty page.
    pub fn get_events(&self, limit: usize, offset: usize) -> Result<EventPage> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let total: i64 = tx.query_row("SELECT COUNT(*) FROM tlytics", [], |row| row.get(0))?;
        let total = total.max(0) as u64;

        if limit == 0 || offset as u64 >= total {
            return Ok(EventPage {
                events: Vec::new(),
                total,
            });
        }

        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let offset = i64::try_from(offset).unwrap_or(i64::MAX);

        let rows: Vec<(String, String, Option<String>)> = {
            let mut stmt = tx.prepare_cached(
                "SELECT key, timestamp, data FROM tlytics \
                 ORDER BY timestamp DESC, rowid DESC LIMIT ?1 OFFSET ?2",
            )?;
            let mapped = stmt.query_map(params![limit, offset], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?;
            mapped.collect::<std::result::Result<_, _>>()?
        };
        tx.commit()?;

        let mut events = Vec::with_capacity(rows.len());
        for (key, ts, data) in rows {
            let payload: Payload = match data {
                Some(json) if !json.is_empty() => serde_json::from_str(&json)?,
                _ => Payload::new(),
            };
            events.push(Event::new(key).with_data(payload).at(decode_timestamp(&ts)?));
        }

        Ok(EventPage { events, total })
    }

    pub fn count(&self) -> Result<u64> {
        let conn = self.lock()?;
        let total: i64 = conn.query_row("SELECT COUNT(*) FROM tlytics", [], |row| row.get(0))?;
        Ok(total.max(0) as u64)
    }
}

fn encode_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn decode_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|_| StoreError::Timestamp(raw.to_string()))
}
