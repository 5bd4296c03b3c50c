//! Individual clash zones and the resolution state machine.
//!
//! ```text
//! Unresolved ──► IndividuallyResolved ──► ClusterResolved ──► CombinedResolved
//!      ▲                                                              │
//!      └────────────────────── force re-detection ◄───────────────────┘
//! ```
//!
//! Flags are additive. Reaching a higher tier never clears a lower one; the
//! set of raised flags records every tier the zone has passed through. Only
//! an explicit reset returns a zone to `Unresolved`.

use super::geometry::{Point3, ZonePlacement};
use crate::identity::clash_zone_guid;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Sentinel for "no host instance assigned yet".
pub const UNASSIGNED: i64 = -1;

/// A resolution tier, and the columns that record it on a clash zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResolutionTier {
    Individual,
    Cluster,
    Combined,
}

impl ResolutionTier {
    /// Flag column on `clash_zones`.
    #[must_use]
    pub fn flag_column(self) -> &'static str {
        match self {
            Self::Individual => "is_resolved",
            Self::Cluster => "is_cluster_resolved",
            Self::Combined => "is_combined_resolved",
        }
    }

    /// Owner link column on `clash_zones`.
    #[must_use]
    pub fn link_column(self) -> &'static str {
        match self {
            Self::Individual => "sleeve_instance_id",
            Self::Cluster => "cluster_instance_id",
            Self::Combined => "combined_instance_id",
        }
    }
}

impl fmt::Display for ResolutionTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Individual => write!(f, "individual"),
            Self::Cluster => write!(f, "cluster"),
            Self::Combined => write!(f, "combined"),
        }
    }
}

/// Highest tier a zone has reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ResolutionState {
    Unresolved,
    IndividuallyResolved,
    ClusterResolved,
    CombinedResolved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ResolutionFlags {
    pub is_resolved: bool,
    pub is_cluster_resolved: bool,
    pub is_combined_resolved: bool,
    pub is_current_clash: bool,
}

impl ResolutionFlags {
    #[must_use]
    pub fn state(&self) -> ResolutionState {
        if self.is_combined_resolved {
            ResolutionState::CombinedResolved
        } else if self.is_cluster_resolved {
            ResolutionState::ClusterResolved
        } else if self.is_resolved {
            ResolutionState::IndividuallyResolved
        } else {
            ResolutionState::Unresolved
        }
    }

    #[must_use]
    pub fn is_set(&self, tier: ResolutionTier) -> bool {
        match tier {
            ResolutionTier::Individual => self.is_resolved,
            ResolutionTier::Cluster => self.is_cluster_resolved,
            ResolutionTier::Combined => self.is_combined_resolved,
        }
    }

    /// Raise one tier, leaving the others as they are.
    pub fn raise(&mut self, tier: ResolutionTier) {
        match tier {
            ResolutionTier::Individual => self.is_resolved = true,
            ResolutionTier::Cluster => self.is_cluster_resolved = true,
            ResolutionTier::Combined => self.is_combined_resolved = true,
        }
    }
}

/// One intersection between a single MEP element and a single host element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClashZone {
    /// Content GUID, immutable once computed
    pub guid: Uuid,
    pub category: String,
    pub mep_element_id: i64,
    pub host_element_id: i64,
    pub intersection: Point3,
    pub flags: ResolutionFlags,
    /// Individual sleeve placed for this zone, or [`UNASSIGNED`]
    pub sleeve_instance_id: i64,
    /// Owning cluster sleeve, or [`UNASSIGNED`]
    pub cluster_instance_id: i64,
    /// Owning combined sleeve, or [`UNASSIGNED`]
    pub combined_instance_id: i64,
    pub placement: ZonePlacement,
    pub created_at: i64,
    pub updated_at: i64,
}

impl ClashZone {
    /// A freshly detected zone. The GUID is derived from the rounded
    /// intersection point and the two element ids.
    #[must_use]
    pub fn detected(
        category: impl Into<String>,
        mep_element_id: i64,
        host_element_id: i64,
        intersection: Point3,
        rounding_digits: u32,
    ) -> Self {
        let now = super::now_millis();
        Self {
            guid: clash_zone_guid(intersection, mep_element_id, host_element_id, rounding_digits),
            category: category.into(),
            mep_element_id,
            host_element_id,
            intersection,
            flags: ResolutionFlags {
                is_current_clash: true,
                ..Default::default()
            },
            sleeve_instance_id: UNASSIGNED,
            cluster_instance_id: UNASSIGNED,
            combined_instance_id: UNASSIGNED,
            placement: ZonePlacement::default(),
            created_at: now,
            updated_at: now,
        }
    }

    #[must_use]
    pub fn with_placement(mut self, placement: ZonePlacement) -> Self {
        self.placement = placement;
        self
    }

    #[must_use]
    pub fn state(&self) -> ResolutionState {
        self.flags.state()
    }

    /// Instance id recorded for a tier, `None` if unassigned.
    #[must_use]
    pub fn link(&self, tier: ResolutionTier) -> Option<i64> {
        let id = match tier {
            ResolutionTier::Individual => self.sleeve_instance_id,
            ResolutionTier::Cluster => self.cluster_instance_id,
            ResolutionTier::Combined => self.combined_instance_id,
        };
        (id > 0).then_some(id)
    }
}
