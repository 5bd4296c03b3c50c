// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Upsert and batch-save engine.
//!
//! The [`SleeveEngine`] resolves every cluster and combined sleeve it is
//! given to a stored row by content identity, writes it, and cascades the
//! matching tier flag down onto the clash zones it covers.
//!
//! # Single save
//!
//! ```text
//! dedupe constituents → identity (none → instance-id keying)
//!   → look up by identity, then by instance id
//!   → update in place (keep created_at) | insert
//!   → raise tier flag + owner link on covered zones
//! ```
//!
//! # Batch save
//!
//! ```text
//! validate all → collapse repeated identities (last wins)
//!   → BEGIN → delete every row of every touched scope
//!   → insert every record → cascade → COMMIT
//! ```
//!
//! Any failure rolls the whole batch back. Markers are never touched inside
//! a batch; advance them with the [`IncrementalScanner`] after commit.
//!
//! # Example
//!
//! ```rust,no_run
//! use sleeve_engine::{ClusterSleeve, ScopeKey, SleeveEngine, SleeveEngineConfig};
//! use uuid::Uuid;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let config = SleeveEngineConfig::sqlite("sleeves.db");
//! let engine = SleeveEngine::connect(config).await.expect("connect");
//!
//! let mut cluster = ClusterSleeve::new(
//!     ScopeKey::new(1, 1, "Pipes"),
//!     vec![Uuid::from_u128(1), Uuid::from_u128(2)],
//! )
//! .with_instance_id(4242);
//!
//! let outcome = engine.save_cluster(&mut cluster).await.expect("save");
//! println!("{} row {}", outcome.action, outcome.row_id);
//! # }
//! ```

mod cascade;
mod cluster_api;
mod combined_api;
mod reset;
mod types;

pub use types::{BatchSaveReport, IdentityMode, RedetectionReport, SaveAction, SaveOutcome};

use crate::config::SleeveEngineConfig;
use crate::markers::{IncrementalScanner, MarkerStore};
use crate::metrics;
use crate::snapshot_index::SnapshotIndex;
use crate::storage::records::RecordStore;
use crate::storage::sql::{SqlStore, StoreTx};
use crate::storage::traits::StoreError;
use tracing::warn;

pub struct SleeveEngine {
    config: SleeveEngineConfig,
    store: SqlStore,
    records: RecordStore,
    markers: MarkerStore,
    scanner: IncrementalScanner,
}

impl SleeveEngine {
    /// Connect to `config.database_url`, creating the schema if needed.
    pub async fn connect(config: SleeveEngineConfig) -> Result<Self, StoreError> {
        let store = SqlStore::connect(&config).await?;
        Ok(Self::new(store, config))
    }

    /// Build on an already connected store.
    #[must_use]
    pub fn new(store: SqlStore, config: SleeveEngineConfig) -> Self {
        let records = RecordStore::new(store.clone(), &config);
        let markers = MarkerStore::new(store.clone(), &config);
        let scanner = IncrementalScanner::new(markers.clone(), config.marker_sample_size);
        Self { config, store, records, markers, scanner }
    }

    #[must_use]
    pub fn config(&self) -> &SleeveEngineConfig {
        &self.config
    }

    #[must_use]
    pub fn store(&self) -> &SqlStore {
        &self.store
    }

    #[must_use]
    pub fn records(&self) -> &RecordStore {
        &self.records
    }

    #[must_use]
    pub fn markers(&self) -> &MarkerStore {
        &self.markers
    }

    #[must_use]
    pub fn scanner(&self) -> &IncrementalScanner {
        &self.scanner
    }

    /// Open the store's one transaction for a processing pass. Pass it to the
    /// `*_in` operations; commit when the pass is done.
    pub async fn begin(&self) -> Result<StoreTx, StoreError> {
        self.store.begin().await
    }

    /// Load every persisted snapshot into a fresh read-only index.
    ///
    /// Must not be called while a transaction from this engine is open.
    pub async fn snapshot_index(&self) -> SnapshotIndex {
        SnapshotIndex::build(&self.records).await
    }

    /// Commit on success, roll back on failure. The original error wins over
    /// a failed rollback.
    async fn finish<T>(
        &self,
        tx: StoreTx,
        result: Result<T, StoreError>,
        entity: &'static str,
        operation: &'static str,
    ) -> Result<T, StoreError> {
        match result {
            Ok(value) => {
                tx.commit().await?;
                Ok(value)
            }
            Err(e) => {
                metrics::record_rollback(entity, operation);
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(entity, operation, error = %rollback_err, "Rollback failed");
                }
                warn!(entity, operation, error = %e, "Write rolled back");
                Err(e)
            }
        }
    }
}
