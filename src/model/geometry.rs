//! Placement geometry carried for bookkeeping only. Nothing here is
//! recomputed by the engine; values round-trip to the host unchanged.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Point3 {
    #[must_use]
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

/// Four corners of an opening's face, in host order.
pub type Corners = [Point3; 4];

/// Placement data of an individual sleeve.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ZonePlacement {
    pub corners: Corners,
    pub width: f64,
    pub height: f64,
    pub diameter: f64,
    pub rotation: f64,
}

/// Placement data of a cluster or combined sleeve.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SleeveGeometry {
    pub bbox_min: Point3,
    pub bbox_max: Point3,
    pub width: f64,
    pub height: f64,
    pub depth: f64,
    pub rotation: f64,
    pub is_rotated: bool,
    pub placement: Point3,
    pub corners: Corners,
}
