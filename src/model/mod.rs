//! Records persisted by the ledger.
//!
//! - [`ClashZone`]: one MEP/host intersection (tier 1)
//! - [`ClusterSleeve`]: several zones of one category sharing an opening (tier 2)
//! - [`CombinedSleeve`]: zones and clusters across categories sharing an opening (tier 3)
//! - [`SleeveSnapshotView`]: captured parameter values for downstream transfer

mod clash_zone;
mod cluster;
mod combined;
mod geometry;
mod snapshot;

pub use clash_zone::{ClashZone, ResolutionFlags, ResolutionState, ResolutionTier, UNASSIGNED};
pub use cluster::{ClusterSleeve, ScopeKey};
pub use combined::{CombinedConstituent, CombinedScope, CombinedSleeve, ConstituentType, SleeveConstituent};
pub use geometry::{Corners, Point3, SleeveGeometry, ZonePlacement};
pub use snapshot::{ParameterMap, SleeveSnapshotView};

/// Current time as epoch millis.
pub(crate) fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
