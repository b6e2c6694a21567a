//! SQLite target store.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, Result as SqlResult};
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use super::models::*;
use super::{StoreError, TargetStore};

/// Thread-safe SQLite store.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

/// A target row as read from the database, before validation.
struct TargetRow {
    id: String,
    name: String,
    url: String,
    status: String,
    last_checked: Option<String>,
    created_at: String,
    last_error: Option<String>,
}

/// A check record row as read from the database, before validation.
struct RecordRow {
    timestamp: String,
    status: String,
    response_time_millis: Option<i64>,
}

impl SqliteStore {
    /// Open (or create) the database at `path` and run migrations.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init()?;
        Ok(store)
    }

    /// Open a private in-memory database.
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init()?;
        Ok(store)
    }

    fn init(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);

        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(include_str!("../../migrations/000001_init.up.sql"))
            .map_err(|e| StoreError::Migration(format!("Migration 1 failed: {}", e)))?;

        Ok(())
    }

    fn read_rows(
        conn: &Connection,
    ) -> Result<(Vec<TargetRow>, HashMap<String, Vec<RecordRow>>), StoreError> {
        let mut stmt = conn.prepare(
            "SELECT id, name, url, status, last_checked, created_at, last_error FROM targets",
        )?;
        let targets = stmt
            .query_map([], |row| {
                Ok(TargetRow {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    url: row.get(2)?,
                    status: row.get(3)?,
                    last_checked: row.get(4)?,
                    created_at: row.get(5)?,
                    last_error: row.get(6)?,
                })
            })?
            .collect::<SqlResult<Vec<_>>>()?;

        let mut stmt = conn.prepare(
            "SELECT target_id, timestamp, status, response_time_millis
             FROM check_records ORDER BY target_id, seq ASC",
        )?;
        let mut records: HashMap<String, Vec<RecordRow>> = HashMap::new();
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                RecordRow {
                    timestamp: row.get(1)?,
                    status: row.get(2)?,
                    response_time_millis: row.get(3)?,
                },
            ))
        })?;
        for row in rows {
            let (target_id, record) = row?;
            records.entry(target_id).or_default().push(record);
        }

        Ok((targets, records))
    }
}

impl TargetStore for SqliteStore {
    fn load_all(&self) -> Result<Vec<Target>, StoreError> {
        let (rows, mut records) = {
            let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
            Self::read_rows(&conn)?
        };

        let mut targets = Vec::with_capacity(rows.len());
        for row in rows {
            let history = records.remove(&row.id).unwrap_or_default();
            let id = row.id.clone();
            match decode_target(row, history) {
                Ok(target) => targets.push(target),
                Err(e) => tracing::warn!("Dropping invalid stored target {}: {}", id, e),
            }
        }

        Ok(targets)
    }

    fn save_all(&self, targets: &[Target]) -> Result<(), StoreError> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let tx = conn.unchecked_transaction()?;

        tx.execute("DELETE FROM check_records", [])?;
        tx.execute("DELETE FROM targets", [])?;

        {
            let mut target_stmt = tx.prepare(
                "INSERT INTO targets (id, name, url, status, last_checked, created_at, last_error)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            let mut record_stmt = tx.prepare(
                "INSERT INTO check_records (target_id, seq, timestamp, status, response_time_millis)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;

            for t in targets {
                target_stmt.execute(params![
                    t.id.as_str(),
                    t.name,
                    t.url,
                    t.status.as_str(),
                    t.last_checked.map(format_db_time),
                    format_db_time(t.created_at),
                    t.last_error,
                ])?;

                for (seq, r) in t.history.iter().enumerate() {
                    record_stmt.execute(params![
                        t.id.as_str(),
                        seq as i64,
                        format_db_time(r.timestamp),
                        r.status.as_str(),
                        r.response_time_millis.map(|ms| ms as i64),
                    ])?;
                }
            }
        }

        tx.commit()?;
        Ok(())
    }
}

fn decode_target(row: TargetRow, records: Vec<RecordRow>) -> Result<Target, String> {
    let status: Status = row.status.parse()?;
    let created_at = parse_db_time(&row.created_at)
        .ok_or_else(|| format!("bad created_at: {}", row.created_at))?;
    let last_checked = match row.last_checked {
        Some(s) => Some(parse_db_time(&s).ok_or_else(|| format!("bad last_checked: {}", s))?),
        None => None,
    };

    let history = records
        .into_iter()
        .map(decode_record)
        .collect::<Result<VecDeque<_>, _>>()?;

    let target = Target {
        id: TargetId::from(row.id),
        name: row.name,
        url: row.url,
        status,
        last_checked,
        created_at,
        history,
        last_error: row.last_error,
    };

    target.validate().map_err(|e| e.to_string())
}

fn decode_record(row: RecordRow) -> Result<CheckRecord, String> {
    let timestamp =
        parse_db_time(&row.timestamp).ok_or_else(|| format!("bad timestamp: {}", row.timestamp))?;
    let status: CheckStatus = row.status.parse()?;
    let response_time_millis = match row.response_time_millis {
        Some(ms) => Some(u64::try_from(ms).map_err(|_| format!("negative response time: {}", ms))?),
        None => None,
    };

    Ok(CheckRecord {
        timestamp,
        status,
        response_time_millis,
    })
}

fn format_db_time(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse a datetime string from the database.
fn parse_db_time(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    let formats = ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%d %H:%M:%S"];
    for fmt in &formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
        }
    }

    None
}
