use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Corrupt {table} row: {detail}")]
    Corrupt { table: &'static str, detail: String },

    #[error("Store not available: {0}")]
    Unavailable(String),

    /// A transaction failed and could not be rolled back either. The database
    /// may hold a partial write and needs out-of-band reconciliation.
    #[error("Rollback failed after '{cause}': {rollback}")]
    RollbackFailed { cause: String, rollback: String },
}

impl StoreError {
    pub(crate) fn corrupt(table: &'static str, detail: impl Into<String>) -> Self {
        StoreError::Corrupt {
            table,
            detail: detail.into(),
        }
    }

    /// True when SQLite rejected a write because of a CHECK, UNIQUE or
    /// FOREIGN KEY constraint.
    pub fn is_constraint_violation(&self) -> bool {
        matches!(
            self,
            StoreError::Sqlite(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation
        )
    }
}
