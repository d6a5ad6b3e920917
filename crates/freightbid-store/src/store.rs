use std::sync::Mutex;
use std::time::Duration;

use freightbid_models::schema::{MARKETPLACE_DDL, SCHEMA_VERSION};
use rusqlite::{Connection, TransactionBehavior};
use tracing::{error, warn};

use crate::error::StoreError;

/// Handle to the marketplace database.
///
/// One handle is opened per process and shared behind an `Arc`. Access to the
/// connection is serialized with a `Mutex` since `rusqlite::Connection` is not
/// `Sync`. Multi-row writes run in `BEGIN IMMEDIATE` transactions so that
/// other processes on the same file (WAL mode) queue behind the writer
/// instead of interleaving.
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Open (or create) the database file. Enables WAL and foreign keys and
    /// creates the schema if it doesn't exist.
    pub fn open(path: &str) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        Self::init(conn)
    }

    /// Open an in-memory database. Useful for testing - creates the schema automatically.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.busy_timeout(Duration::from_secs(5))?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(MARKETPLACE_DDL)?;
        conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run a read (or single-statement write) against the connection.
    pub(crate) fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let conn = self
            .conn
            .lock()
            .map_err(|e| StoreError::Unavailable(format!("SQLite mutex poisoned: {e}")))?;
        f(&conn)
    }

    /// Run `f` inside an immediate transaction.
    ///
    /// Commits when `f` succeeds. When `f` fails every write it made is rolled
    /// back; if the rollback itself fails the original error is escalated to
    /// `StoreError::RollbackFailed`.
    pub(crate) fn with_tx<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| StoreError::Unavailable(format!("SQLite mutex poisoned: {e}")))?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        match f(&tx) {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(cause) => match tx.rollback() {
                Ok(()) => {
                    warn!(error = %cause, "Transaction rolled back");
                    Err(cause)
                }
                Err(rollback) => {
                    error!(error = %cause, rollback_error = %rollback, "Rollback failed");
                    Err(StoreError::RollbackFailed {
                        cause: cause.to_string(),
                        rollback: rollback.to_string(),
                    })
                }
            },
        }
    }

    /// Schema version recorded in the database file.
    pub fn schema_version(&self) -> Result<i32, StoreError> {
        self.with_conn(|conn| {
            Ok(conn.query_row("PRAGMA user_version", [], |row| row.get(0))?)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_in_memory_creates_schema() {
        let store = Store::open_in_memory().unwrap();
        assert_eq!(store.schema_version().unwrap(), SCHEMA_VERSION);

        let tables: i64 = store
            .with_conn(|conn| {
                Ok(conn.query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'",
                    [],
                    |row| row.get(0),
                )?)
            })
            .unwrap();
        assert_eq!(tables, 6);
    }

    #[test]
    fn failed_transaction_leaves_no_writes() {
        let store = Store::open_in_memory().unwrap();
        let result: Result<(), StoreError> = store.with_tx(|conn| {
            conn.execute(
                "INSERT INTO shippers (id, user_id, created_at) VALUES ('a', 'u', 'now')",
                [],
            )?;
            Err(StoreError::Unavailable("injected".to_string()))
        });
        assert!(matches!(result, Err(StoreError::Unavailable(_))));

        let count: i64 = store
            .with_conn(|conn| {
                Ok(conn.query_row("SELECT COUNT(*) FROM shippers", [], |row| row.get(0))?)
            })
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn foreign_keys_are_enforced() {
        let store = Store::open_in_memory().unwrap();
        let err = store
            .with_conn(|conn| {
                conn.execute(
                    "INSERT INTO vehicles (id, carrier_id, registration_number, created_at) \
                     VALUES ('v', 'missing-carrier', 'KA-01', 'now')",
                    [],
                )?;
                Ok(())
            })
            .unwrap_err();
        assert!(err.is_constraint_violation());
    }

    #[test]
    fn wal_mode_on_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("freight.db");
        let store = Store::open(path.to_str().unwrap()).unwrap();
        let mode: String = store
            .with_conn(|conn| Ok(conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))?))
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
    }
}
