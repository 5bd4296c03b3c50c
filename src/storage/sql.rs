// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! SQL connection and transaction ownership.
//!
//! The ledger is a single-writer store: one pool (one connection by
//! default) and at most one open transaction per [`SqlStore`] at a time.
//! A second `begin()` while a [`StoreTx`] is alive fails with
//! [`StoreError::TransactionActive`] rather than queueing behind the first.
//!
//! ## sqlx Any Driver Quirks
//!
//! The `Any` driver must be installed at runtime before the first connect.
//! Statements that differ between SQLite and MySQL (DDL, upsert syntax) are
//! picked on `is_sqlite`.

use super::schema;
use super::traits::StoreError;
use crate::config::{SleeveEngineConfig, Verbosity};
use crate::resilience::retry::{retry, RetryConfig};
use sqlx::any::AnyPoolOptions;
use sqlx::{Any, AnyConnection, AnyPool, Transaction};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Once};
use tracing::{debug, info};

// SQLx `Any` driver requires runtime installation
static INSTALL_DRIVERS: Once = Once::new();

fn install_drivers() {
    INSTALL_DRIVERS.call_once(|| {
        sqlx::any::install_default_drivers();
    });
}

/// Pool plus the single-transaction guard.
#[derive(Clone)]
pub struct SqlStore {
    pool: AnyPool,
    is_sqlite: bool,
    tx_open: Arc<AtomicBool>,
    verbosity: Verbosity,
}

impl SqlStore {
    /// Connect with startup-mode retry, enable WAL on SQLite and create
    /// any missing tables.
    pub async fn connect(config: &SleeveEngineConfig) -> Result<Self, StoreError> {
        install_drivers();

        let url = config.database_url.as_str();
        let pool = retry("sql_connect", &RetryConfig::startup(), || async {
            AnyPoolOptions::new()
                .max_connections(config.max_connections.max(1))
                .acquire_timeout(config.acquire_timeout())
                .connect(url)
                .await
                .map_err(|e| StoreError::Backend(e.to_string()))
        })
        .await?;

        let store = Self::from_pool(pool, config.is_sqlite(), config.verbosity);
        if store.is_sqlite {
            store.enable_wal_mode().await?;
        }
        store.init_schema().await?;

        if config.verbosity.summaries() {
            info!(sqlite = store.is_sqlite, "Sleeve store connected");
        }
        Ok(store)
    }

    /// Wrap an existing pool. The schema is not touched.
    pub fn from_pool(pool: AnyPool, is_sqlite: bool, verbosity: Verbosity) -> Self {
        Self {
            pool,
            is_sqlite,
            tx_open: Arc::new(AtomicBool::new(false)),
            verbosity,
        }
    }

    /// Shared pool, e.g. for host-side read-only queries.
    #[must_use]
    pub fn pool(&self) -> &AnyPool {
        &self.pool
    }

    #[must_use]
    pub fn is_sqlite(&self) -> bool {
        self.is_sqlite
    }

    #[must_use]
    pub fn verbosity(&self) -> Verbosity {
        self.verbosity
    }

    async fn enable_wal_mode(&self) -> Result<(), StoreError> {
        sqlx::query("PRAGMA journal_mode = WAL")
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(format!("Failed to enable WAL mode: {}", e)))?;

        sqlx::query("PRAGMA synchronous = NORMAL")
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(format!("Failed to set synchronous mode: {}", e)))?;

        Ok(())
    }

    /// Create missing tables and indexes. Idempotent.
    pub async fn init_schema(&self) -> Result<(), StoreError> {
        let statements = if self.is_sqlite { schema::SQLITE } else { schema::MYSQL };

        for sql in statements {
            retry("sql_init_schema", &RetryConfig::startup(), || async {
                sqlx::query(sql)
                    .execute(&self.pool)
                    .await
                    .map_err(|e| StoreError::Backend(e.to_string()))
            })
            .await?;
        }

        debug!(statements = statements.len(), "Schema ready");
        Ok(())
    }

    /// Open the store's one exclusive transaction.
    ///
    /// Fails with [`StoreError::TransactionActive`] if a [`StoreTx`] from
    /// this store (or a clone of it) is still alive.
    pub async fn begin(&self) -> Result<StoreTx, StoreError> {
        if self
            .tx_open
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(StoreError::TransactionActive);
        }
        // Guard first so a failed begin still releases the flag.
        let guard = TxGuard { flag: Arc::clone(&self.tx_open) };

        let inner = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Backend(format!("Failed to begin transaction: {}", e)))?;

        Ok(StoreTx { inner, _guard: guard })
    }

    #[must_use]
    pub fn in_transaction(&self) -> bool {
        self.tx_open.load(Ordering::Acquire)
    }
}

/// Releases the store's transaction flag when the transaction ends,
/// whether by commit, rollback or drop.
struct TxGuard {
    flag: Arc<AtomicBool>,
}

impl Drop for TxGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// The store's open transaction. Dropping it without `commit` rolls back.
pub struct StoreTx {
    inner: Transaction<'static, Any>,
    _guard: TxGuard,
}

impl StoreTx {
    /// Connection to run statements on inside this transaction.
    pub fn conn(&mut self) -> &mut AnyConnection {
        &mut self.inner
    }

    pub async fn commit(self) -> Result<(), StoreError> {
        self.inner
            .commit()
            .await
            .map_err(|e| StoreError::Backend(format!("Failed to commit: {}", e)))
    }

    pub async fn rollback(self) -> Result<(), StoreError> {
        self.inner
            .rollback()
            .await
            .map_err(|e| StoreError::Backend(format!("Failed to roll back: {}", e)))
    }
}
