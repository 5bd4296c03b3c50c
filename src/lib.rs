//! # Sleeve Engine
//!
//! Persistence and resolution ledger for MEP penetration sleeves.
//!
//! Every intersection between an MEP element and a host (wall, floor,
//! framing) is a clash zone. A zone is resolved by exactly one of three
//! tiers of sleeve, and the ledger remembers which, so repeated placement
//! passes stay idempotent.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       SleeveEngine                          │
//! │  • save / batch-save cluster and combined sleeves           │
//! │  • cascade tier flags onto covered clash zones              │
//! │  • forced re-detection                                      │
//! └─────────────────────────────────────────────────────────────┘
//!          │                  │                     │
//!          ▼                  ▼                     ▼
//! ┌─────────────────┐ ┌──────────────────┐ ┌──────────────────┐
//! │ Identity        │ │ MarkerStore      │ │ SnapshotIndex    │
//! │ • cluster GUID  │ │ • per-category   │ │ • read-only maps │
//! │ • combined hash │ │   high-water     │ │   by sleeve,     │
//! │ • zone GUID     │ │ • new-only scan  │ │   cluster, zone  │
//! └─────────────────┘ └──────────────────┘ └──────────────────┘
//!                             │                     │
//!                             ▼                     ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │              RecordStore / SqlStore (SQLite, MySQL)          │
//! │  • one transaction at a time, WAL journal on SQLite         │
//! │  • reads degrade to empty results, writes propagate errors  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use sleeve_engine::{ClusterSleeve, ScopeKey, SleeveEngine, SleeveEngineConfig};
//! use uuid::Uuid;
//!
//! #[tokio::main]
//! async fn main() {
//!     let engine = SleeveEngine::connect(SleeveEngineConfig::sqlite("ledger.db"))
//!         .await
//!         .expect("Failed to open ledger");
//!
//!     // Only the elements added since the last pass need work
//!     let ids = [101, 102, 103];
//!     let fresh = engine.scanner().new_sleeves_only(&ids, "Pipes").await;
//!     println!("{} new elements", fresh.len());
//!
//!     let cluster = ClusterSleeve::new(
//!         ScopeKey::new(1, 1, "Pipes"),
//!         vec![Uuid::from_u128(1), Uuid::from_u128(2)],
//!     );
//!     let report = engine.batch_save_clusters(vec![cluster]).await.expect("Batch failed");
//!     println!("{} written, {} ghosts removed", report.inserted, report.ghosts_removed);
//!
//!     engine.scanner().mark_category_processed("Pipes", &ids).await;
//! }
//! ```
//!
//! ## Modules
//!
//! - [`engine`]: the [`SleeveEngine`] upsert, batch and cascade operations
//! - [`identity`]: deterministic content identities
//! - [`markers`]: per-category processing markers and incremental scanning
//! - [`snapshot_index`]: in-memory snapshot lookups
//! - [`storage`]: SQL persistence (SQLite and MySQL)
//! - [`resilience`]: retry with exponential backoff
//! - [`model`]: record types

pub mod config;
pub mod engine;
pub mod identity;
pub mod markers;
pub mod metrics;
pub mod model;
pub mod resilience;
pub mod snapshot_index;
pub mod storage;

pub use config::{SleeveEngineConfig, Verbosity};
pub use engine::{BatchSaveReport, IdentityMode, RedetectionReport, SaveAction, SaveOutcome, SleeveEngine};
pub use identity::{
    clash_zone_guid, cluster_identity, combined_identity, ClusterRef, ConstituentKey, ContentHash, IdentityParseError,
};
pub use markers::{IncrementalScanner, Marker, MarkerStore};
pub use metrics::LatencyTimer;
pub use model::{
    ClashZone, ClusterSleeve, CombinedConstituent, CombinedScope, CombinedSleeve, ConstituentType, Corners,
    ParameterMap, Point3, ResolutionFlags, ResolutionState, ResolutionTier, ScopeKey, SleeveConstituent,
    SleeveGeometry, SleeveSnapshotView, ZonePlacement,
};
pub use resilience::retry::RetryConfig;
pub use snapshot_index::{CombinedSnapshot, SnapshotIndex};
pub use storage::records::{RecordStore, WithParameters};
pub use storage::sql::{SqlStore, StoreTx};
pub use storage::traits::StoreError;
