//! SQLite-backed history store.
//!
//! Holds the append-only sequence of Versions (serialized project signatures)
//! and Evolution records (which script label of which application was
//! applied under which Version).  Every public method opens its own
//! connection so callers never manage connection lifetime.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use tracing::{debug, info};

use crate::config::expand_tilde;
use crate::errors::{EvolutionError, EvolutionResult};
use crate::models::ProjectSignature;
use crate::store::schema;

/// One stored signature snapshot.
#[derive(Clone, Debug, PartialEq)]
pub struct Version {
    pub id: i64,
    pub signature: ProjectSignature,
    pub signature_hash: String,
    pub created_at: DateTime<Utc>,
}

/// One applied evolution script.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EvolutionRecord {
    pub id: i64,
    pub version_id: i64,
    pub app_label: String,
    pub label: String,
}

/// Handle on the database holding both the live schema and the history
/// tables.
#[derive(Clone, Debug)]
pub struct Database {
    db_path: PathBuf,
}

impl Database {
    /// The path is tilde-expanded and resolved against the working
    /// directory; parent directories are created when missing.
    pub fn new(db_path: impl AsRef<Path>) -> EvolutionResult<Self> {
        let resolved = resolve_path(db_path.as_ref())?;
        if let Some(parent) = resolved.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Self { db_path: resolved })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Open a new connection with `foreign_keys` enabled.
    pub fn connect(&self) -> EvolutionResult<Connection> {
        let conn = Connection::open(&self.db_path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(conn)
    }

    /// Create the history tables and check the store format.  Fails with
    /// [`EvolutionError::UnsupportedStore`] on a store from a newer release.
    pub fn init_schema(&self) -> EvolutionResult<()> {
        let conn = self.connect()?;
        for stmt in schema::SCHEMA_STATEMENTS {
            conn.execute_batch(stmt)?;
        }
        schema::check_store_format(&conn)?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Most recent Version, the evolution baseline.
    pub fn latest_version(&self) -> EvolutionResult<Option<Version>> {
        let conn = self.connect()?;
        let raw = conn
            .query_row(
                "SELECT id, signature, signature_hash, created_at FROM evolution_version \
                 ORDER BY id DESC LIMIT 1;",
                [],
                raw_version,
            )
            .optional()?;
        raw.map(RawVersion::into_version).transpose()
    }

    /// Every Version, oldest first.
    pub fn versions(&self) -> EvolutionResult<Vec<Version>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT id, signature, signature_hash, created_at FROM evolution_version ORDER BY id;",
        )?;
        let rows = stmt
            .query_map([], raw_version)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(RawVersion::into_version).collect()
    }

    /// Script labels already applied for `app_label`.
    pub fn applied_evolutions(&self, app_label: &str) -> EvolutionResult<BTreeSet<String>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare("SELECT label FROM evolution_record WHERE app_label = ?1;")?;
        let labels = stmt
            .query_map(params![app_label], |row| row.get::<_, String>(0))?
            .collect::<Result<BTreeSet<_>, _>>()?;
        Ok(labels)
    }

    pub fn evolution_records(&self) -> EvolutionResult<Vec<EvolutionRecord>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT id, version_id, app_label, label FROM evolution_record ORDER BY id;",
        )?;
        let records = stmt
            .query_map([], |row| {
                Ok(EvolutionRecord {
                    id: row.get(0)?,
                    version_id: row.get(1)?,
                    app_label: row.get(2)?,
                    label: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    /// Store `signature` as a new Version and mark `labels` as applied,
    /// executing nothing.  Returns the Version id.
    pub fn record_baseline(
        &self,
        signature: &ProjectSignature,
        labels: &[(String, String)],
    ) -> EvolutionResult<i64> {
        let mut conn = self.connect()?;
        let tx = conn.transaction()?;
        let version_id = insert_version(&tx, signature)?;
        insert_records(&tx, version_id, labels)?;
        tx.commit()?;
        info!(version_id, labels = labels.len(), "evolution baseline recorded");
        Ok(version_id)
    }

    /// Execute `statements` in order and persist the resulting Version and
    /// Evolution records, all inside one transaction.  A failing statement
    /// rolls everything back and writes no history.
    ///
    /// Foreign keys are not enforced while the statements run, since a table
    /// rebuild drops a table other rows still reference.  The whole database
    /// is checked with `foreign_key_check` before committing instead.
    pub fn apply_evolution(
        &self,
        statements: &[String],
        signature: &ProjectSignature,
        labels: &[(String, String)],
    ) -> EvolutionResult<i64> {
        let mut conn = self.connect()?;
        // Has no effect once a transaction is open.
        conn.execute_batch("PRAGMA foreign_keys = OFF;")?;
        let tx = conn.transaction()?;
        for (index, statement) in statements.iter().enumerate() {
            debug!(index, statement = statement.as_str(), "executing");
            tx.execute_batch(statement)
                .map_err(|e| EvolutionError::Execution {
                    index: index + 1,
                    statement: statement.clone(),
                    message: e.to_string(),
                })?;
        }
        let version_id = commit_evolution(tx, signature, labels)?;
        info!(version_id, statements = statements.len(), "evolution applied");
        Ok(version_id)
    }

    /// Copy the whole database to `destination` with the SQLite backup API.
    /// Returns the resolved destination.
    pub fn backup_to(&self, destination: impl AsRef<Path>) -> EvolutionResult<PathBuf> {
        let resolved = resolve_path(destination.as_ref())?;
        if let Some(parent) = resolved.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let src_conn = self.connect()?;
        let mut dst_conn = Connection::open(&resolved)?;
        let backup = rusqlite::backup::Backup::new(&src_conn, &mut dst_conn)?;
        backup.run_to_completion(100, std::time::Duration::from_millis(10), None)?;
        info!(path = %resolved.display(), "database backed up");
        Ok(resolved)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn resolve_path(path: &Path) -> EvolutionResult<PathBuf> {
    let expanded = expand_tilde(&path.to_string_lossy());
    Ok(if expanded.is_absolute() {
        expanded
    } else {
        std::env::current_dir()?.join(expanded)
    })
}

struct RawVersion {
    id: i64,
    signature: String,
    signature_hash: String,
    created_at: String,
}

impl RawVersion {
    fn into_version(self) -> EvolutionResult<Version> {
        let created_at = DateTime::parse_from_rfc3339(&self.created_at)
            .map_err(|e| EvolutionError::Database(format!("bad timestamp on version {}: {e}", self.id)))?
            .with_timezone(&Utc);
        Ok(Version {
            id: self.id,
            signature: ProjectSignature::from_json(&self.signature)?,
            signature_hash: self.signature_hash,
            created_at,
        })
    }
}

fn raw_version(row: &Row<'_>) -> rusqlite::Result<RawVersion> {
    Ok(RawVersion {
        id: row.get(0)?,
        signature: row.get(1)?,
        signature_hash: row.get(2)?,
        created_at: row.get(3)?,
    })
}

fn insert_version(conn: &Connection, signature: &ProjectSignature) -> EvolutionResult<i64> {
    conn.execute(
        "INSERT INTO evolution_version(signature, signature_hash, created_at) VALUES (?1, ?2, ?3);",
        params![
            signature.to_json()?,
            signature.fingerprint()?,
            Utc::now().to_rfc3339()
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Check integrity, write history and commit.  Every failure here is a
/// [`EvolutionError::Commit`]; dropping `tx` rolls back.
fn commit_evolution(
    tx: Transaction<'_>,
    signature: &ProjectSignature,
    labels: &[(String, String)],
) -> EvolutionResult<i64> {
    let violations = foreign_key_violations(&tx).map_err(|e| EvolutionError::Commit(e.to_string()))?;
    if !violations.is_empty() {
        return Err(EvolutionError::Commit(format!(
            "foreign key violations: {}",
            violations.join(", ")
        )));
    }
    let version_id = insert_version(&tx, signature).map_err(|e| EvolutionError::Commit(e.to_string()))?;
    insert_records(&tx, version_id, labels).map_err(|e| EvolutionError::Commit(e.to_string()))?;
    tx.commit().map_err(|e| EvolutionError::Commit(e.to_string()))?;
    Ok(version_id)
}

/// One `child -> parent` entry per row `PRAGMA foreign_key_check` reports.
fn foreign_key_violations(conn: &Connection) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare("PRAGMA foreign_key_check;")?;
    let violations = stmt
        .query_map([], |row| {
            let child: String = row.get(0)?;
            let parent: String = row.get(2)?;
            Ok(format!("{child} -> {parent}"))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(violations)
}

fn insert_records(conn: &Connection, version_id: i64, labels: &[(String, String)]) -> EvolutionResult<()> {
    let mut stmt =
        conn.prepare("INSERT INTO evolution_record(version_id, app_label, label) VALUES (?1, ?2, ?3);")?;
    for (app_label, label) in labels {
        stmt.execute(params![version_id, app_label, label])?;
    }
    Ok(())
}
