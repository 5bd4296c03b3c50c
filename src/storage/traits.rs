use async_trait::async_trait;
use crate::model::SleeveSnapshotView;
use sqlx::AnyPool;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    /// Missing or invalid key on input. Nothing was written.
    #[error("invalid {entity}: {reason}")]
    Validation {
        entity: &'static str,
        reason: String,
    },
    /// A statement failed inside a write. The transaction was rolled back.
    #[error("{entity} {operation} failed: {source}")]
    Persistence {
        entity: &'static str,
        operation: &'static str,
        #[source]
        source: sqlx::Error,
    },
    /// `begin()` called while another transaction on this store is open
    #[error("a transaction is already open on this store")]
    TransactionActive,
    #[error("Storage backend error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn validation(entity: &'static str, reason: impl Into<String>) -> Self {
        Self::Validation { entity, reason: reason.into() }
    }

    /// Adapter for `map_err` on a write statement.
    pub(crate) fn persistence(entity: &'static str, operation: &'static str) -> impl FnOnce(sqlx::Error) -> Self {
        move |source| Self::Persistence { entity, operation, source }
    }

    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }
}

/// True when the database rejected a statement because a column doesn't
/// exist (an older store layout).
#[must_use]
pub fn is_missing_column(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::ColumnNotFound(_) => true,
        sqlx::Error::Database(db) => {
            let msg = db.message().to_ascii_lowercase();
            // sqlite: "no such column: x"; mysql: 1054 "Unknown column 'x' in 'field list'"
            msg.contains("no such column")
                || msg.contains("unknown column")
                || db.code().is_some_and(|c| c == "42S22")
        }
        _ => false,
    }
}

/// One physical layout of the `sleeve_snapshots` table.
///
/// The loader tries layouts newest first and falls through to the next one
/// only when the current one hits a missing column.
#[async_trait]
pub trait SnapshotLayout: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Read every snapshot row. Malformed column values decode to defaults;
    /// only statement-level failures are returned.
    async fn read_all(&self, pool: &AnyPool) -> Result<Vec<SleeveSnapshotView>, sqlx::Error>;
}
