//! SQLite side of a persisted index: chunk text, offsets and source metadata keyed by
//! insertion position.

use std::path::Path;

use rusqlite::{Connection, OpenFlags, OptionalExtension};

use crate::error::AppError;

struct Migration {
    name: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[Migration {
    name: "0001_chunk_store.sql",
    sql: include_str!(concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/../../migrations/0001_chunk_store.sql"
    )),
}];

fn db_error(code: &str, message: impl Into<String>, err: rusqlite::Error) -> AppError {
    AppError::new(code, message).with_details(err.to_string())
}

pub fn open(path: &Path) -> Result<Connection, AppError> {
    Connection::open(path).map_err(|e| {
        AppError::new("DB_OPEN_FAILED", "Failed to open SQLite chunk store")
            .with_details(format!("path={}; err={}", path.display(), e))
    })
}

/// Open an existing chunk store without creating it or taking write locks.
pub fn open_read_only(path: &Path) -> Result<Connection, AppError> {
    Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .map_err(|e| {
        AppError::new("DB_OPEN_FAILED", "Failed to open SQLite chunk store for reading")
            .with_details(format!("path={}; err={}", path.display(), e))
    })
}

pub fn open_in_memory() -> Result<Connection, AppError> {
    Connection::open_in_memory()
        .map_err(|e| db_error("DB_OPEN_FAILED", "Failed to open in-memory SQLite database", e))
}

/// Apply pending migrations in order. Each one runs in its own transaction together with
/// its `_migrations` bookkeeping row.
pub fn migrate(conn: &mut Connection) -> Result<(), AppError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
           name TEXT PRIMARY KEY NOT NULL,
           applied_at TEXT NOT NULL
         );",
    )
    .map_err(|e| {
        db_error(
            "DB_MIGRATIONS_TABLE_FAILED",
            "Failed to ensure migrations table exists",
            e,
        )
    })?;

    for m in MIGRATIONS {
        let applied = conn
            .query_row(
                "SELECT 1 FROM _migrations WHERE name = ?1",
                [m.name],
                |_| Ok(()),
            )
            .optional()
            .map_err(|e| {
                db_error("DB_MIGRATIONS_QUERY_FAILED", "Failed to query applied migrations", e)
            })?
            .is_some();
        if applied {
            continue;
        }

        let tx = conn
            .transaction()
            .map_err(|e| db_error("DB_TX_FAILED", "Failed to start migration transaction", e))?;
        tx.execute_batch(m.sql).map_err(|e| {
            db_error("DB_MIGRATION_FAILED", format!("Migration {} failed", m.name), e)
        })?;
        tx.execute(
            "INSERT INTO _migrations(name, applied_at) VALUES (?1, strftime('%Y-%m-%dT%H:%M:%fZ','now'))",
            [m.name],
        )
        .map_err(|e| {
            db_error(
                "DB_MIGRATION_FAILED",
                format!("Failed to record migration {}", m.name),
                e,
            )
        })?;
        tx.commit()
            .map_err(|e| db_error("DB_TX_FAILED", "Failed to commit migration transaction", e))?;
    }

    Ok(())
}
