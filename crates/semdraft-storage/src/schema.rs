//! Opening a model database and bringing its tables up to date.
//!
//! The `semantic_models` table is created by the embedded migrations below,
//! tracked through SQLite's `user_version`. Several `semdraft` processes may
//! point at the same file, so file databases wait for a busy writer instead
//! of failing the save.

use std::time::Duration;

use rusqlite::Connection;
use rusqlite_migration::{Migrations, M};

use crate::error::StorageError;

/// How long a save waits for another process holding the write lock.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const MIGRATIONS: &[&str] = &[include_str!("migrations/001_initial_schema.sql")];

/// Where a model database lives.
#[derive(Debug, Clone, Copy)]
pub enum Location<'a> {
    File(&'a str),
    Memory,
}

fn migrations() -> Migrations<'static> {
    Migrations::new(MIGRATIONS.iter().map(|sql| M::up(*sql)).collect())
}

/// Opens the database at `location` and applies pending migrations.
pub fn open(location: Location<'_>) -> Result<Connection, StorageError> {
    let mut conn = match location {
        Location::File(path) => {
            let conn = Connection::open(path)?;
            // Readers (`list`, `show`) keep working while a save commits.
            conn.pragma_update(None, "journal_mode", "WAL")?;
            conn.pragma_update(None, "synchronous", "NORMAL")?;
            conn.busy_timeout(BUSY_TIMEOUT)?;
            conn
        }
        Location::Memory => Connection::open_in_memory()?,
    };
    migrations()
        .to_latest(&mut conn)
        .map_err(|e| StorageError::Migration(e.to_string()))?;
    Ok(conn)
}

/// Number of migrations applied to `conn`.
pub fn schema_version(conn: &Connection) -> Result<usize, StorageError> {
    let version: i64 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    Ok(usize::try_from(version).unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_validate() {
        assert!(migrations().validate().is_ok());
    }

    #[test]
    fn memory_database_is_fully_migrated() {
        let conn = open(Location::Memory).unwrap();
        assert_eq!(schema_version(&conn).unwrap(), MIGRATIONS.len());
        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM semantic_models", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, 0);
    }

    #[test]
    fn reopening_a_file_keeps_its_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("models.db");
        let path = path.to_str().unwrap();
        drop(open(Location::File(path)).unwrap());

        let conn = open(Location::File(path)).unwrap();
        assert_eq!(schema_version(&conn).unwrap(), MIGRATIONS.len());
        let mode: String = conn
            .pragma_query_value(None, "journal_mode", |row| row.get(0))
            .unwrap();
        assert_eq!(mode, "wal");
    }
}
