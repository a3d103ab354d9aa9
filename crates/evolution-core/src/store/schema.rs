//! History store DDL and format stamp.
//!
//! `evolution_meta.store_format` records the layout of the history tables.
//! A store stamped by a newer release is refused instead of being misread:
//! its Versions may carry signatures this release cannot compare.

use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use crate::errors::{EvolutionError, EvolutionResult};

/// Layout of the history tables written by this release.
pub const STORE_FORMAT: i64 = 1;

const FORMAT_KEY: &str = "store_format";

/// DDL for the history tables, safe to replay on an initialised database.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS evolution_meta (
        key TEXT PRIMARY KEY,
        value TEXT NOT NULL
    );",
    "CREATE TABLE IF NOT EXISTS evolution_version (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        signature TEXT NOT NULL,
        signature_hash TEXT NOT NULL,
        created_at TEXT NOT NULL
    );",
    "CREATE TABLE IF NOT EXISTS evolution_record (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        version_id INTEGER NOT NULL REFERENCES evolution_version(id),
        app_label TEXT NOT NULL,
        label TEXT NOT NULL
    );",
    "CREATE INDEX IF NOT EXISTS idx_evolution_record_app ON evolution_record(app_label);",
    "CREATE INDEX IF NOT EXISTS idx_evolution_record_version ON evolution_record(version_id);",
];

/// Stamp an unstamped store with [`STORE_FORMAT`], or check the existing
/// stamp.  Returns the format the store is at.
pub fn check_store_format(conn: &Connection) -> EvolutionResult<i64> {
    let stamped: Option<String> = conn
        .query_row(
            "SELECT value FROM evolution_meta WHERE key = ?1;",
            params![FORMAT_KEY],
            |row| row.get(0),
        )
        .optional()?;

    let Some(raw) = stamped else {
        conn.execute(
            "INSERT INTO evolution_meta(key, value) VALUES (?1, ?2);",
            params![FORMAT_KEY, STORE_FORMAT.to_string()],
        )?;
        debug!(format = STORE_FORMAT, "history store stamped");
        return Ok(STORE_FORMAT);
    };

    let found: i64 = raw
        .trim()
        .parse()
        .map_err(|_| EvolutionError::Database(format!("unreadable history store format '{raw}'")))?;
    if found > STORE_FORMAT {
        return Err(EvolutionError::UnsupportedStore {
            found,
            supported: STORE_FORMAT,
        });
    }
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        for stmt in SCHEMA_STATEMENTS {
            conn.execute_batch(stmt).unwrap();
        }
        conn
    }

    fn stamp(conn: &Connection, value: &str) {
        conn.execute(
            "INSERT OR REPLACE INTO evolution_meta(key, value) VALUES ('store_format', ?1);",
            params![value],
        )
        .unwrap();
    }

    #[test]
    fn test_fresh_store_is_stamped_once() {
        let conn = fresh();
        assert_eq!(check_store_format(&conn).unwrap(), STORE_FORMAT);
        assert_eq!(check_store_format(&conn).unwrap(), STORE_FORMAT);
        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM evolution_meta", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[test]
    fn test_newer_store_is_refused() {
        let conn = fresh();
        stamp(&conn, "2");
        match check_store_format(&conn).unwrap_err() {
            EvolutionError::UnsupportedStore { found, supported } => {
                assert_eq!(found, 2);
                assert_eq!(supported, STORE_FORMAT);
            }
            other => panic!("unexpected {other}"),
        }
    }

    #[test]
    fn test_unreadable_stamp_is_refused() {
        let conn = fresh();
        stamp(&conn, "two");
        assert!(matches!(check_store_format(&conn), Err(EvolutionError::Database(_))));
    }
}
