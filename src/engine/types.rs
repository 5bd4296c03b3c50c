//! Result types returned by the engine's write operations.

use std::fmt;

/// Whether a single save created a row or rewrote one in place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveAction {
    Inserted,
    Updated,
}

impl SaveAction {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Inserted => "inserted",
            Self::Updated => "updated",
        }
    }
}

impl fmt::Display for SaveAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a record was keyed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityMode {
    /// Found and stored under its content identity
    Content,
    /// No constituents, so no content identity; keyed by host instance id only
    InstanceOnly,
}

/// Outcome of one `save_*` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveOutcome {
    pub row_id: i64,
    pub action: SaveAction,
    pub identity: IdentityMode,
    /// Clash zones whose tier flag was raised
    pub cascaded: u64,
    /// Repeated constituents dropped before hashing
    pub duplicates_dropped: usize,
}

/// Outcome of one `batch_save_*` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchSaveReport {
    /// Correlates the log lines of one batch
    pub batch_id: String,
    /// Distinct scopes replaced
    pub scopes: usize,
    /// Rows deleted from the replaced scopes that were not written back
    pub ghosts_removed: u64,
    pub inserted: usize,
    /// Clash zones whose tier flag was raised
    pub cascaded: u64,
    /// Records dropped for repeating another record's identity, plus
    /// repeated constituents dropped inside records
    pub duplicates_dropped: usize,
}

impl BatchSaveReport {
    pub(crate) fn new() -> Self {
        Self {
            batch_id: uuid::Uuid::new_v4().to_string(),
            scopes: 0,
            ghosts_removed: 0,
            inserted: 0,
            cascaded: 0,
            duplicates_dropped: 0,
        }
    }
}

/// Outcome of a forced re-detection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RedetectionReport {
    pub zones_reset: u64,
    pub clusters_removed: u64,
    pub combined_removed: u64,
    /// False if the marker reset failed (logged); the record reset still stands
    pub markers_reset: bool,
}
