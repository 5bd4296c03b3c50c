//! Column decode/bind helpers shared by the record tables.
//!
//! ## sqlx Any driver quirks
//!
//! MySQL TEXT/LONGTEXT arrive as BLOB through the `Any` driver, so text is
//! read as `String` first and as UTF-8 bytes second. Flags are stored as
//! integers on both backends.

use super::traits::StoreError;
use crate::config::Verbosity;
use crate::model::{Corners, Point3, SleeveGeometry};
use serde::de::DeserializeOwned;
use sqlx::any::{AnyArguments, AnyQueryResult, AnyRow};
use sqlx::query::Query;
use sqlx::{Any, AnyConnection, Row};
use tracing::{debug, warn};
use uuid::Uuid;

pub(crate) type AnyQuery<'q> = Query<'q, Any, AnyArguments<'q>>;

/// Geometry columns shared by cluster and combined sleeves, in bind/select order.
pub(crate) const GEOMETRY_COLUMNS: &str = "bbox_min_x, bbox_min_y, bbox_min_z, bbox_max_x, bbox_max_y, bbox_max_z, \
     width, height, depth, rotation, is_rotated, placement_x, placement_y, placement_z, \
     c1_x, c1_y, c1_z, c2_x, c2_y, c2_z, c3_x, c3_y, c3_z, c4_x, c4_y, c4_z";

/// Number of bind parameters in [`GEOMETRY_COLUMNS`].
pub(crate) const GEOMETRY_ARITY: usize = 26;

pub(crate) fn text(row: &AnyRow, col: &str) -> Option<String> {
    row.try_get::<Option<String>, _>(col)
        .ok()
        .flatten()
        .or_else(|| {
            row.try_get::<Option<Vec<u8>>, _>(col)
                .ok()
                .flatten()
                .and_then(|bytes| String::from_utf8(bytes).ok())
        })
}

pub(crate) fn int(row: &AnyRow, col: &str, default: i64) -> i64 {
    opt_int(row, col).unwrap_or(default)
}

pub(crate) fn opt_int(row: &AnyRow, col: &str) -> Option<i64> {
    row.try_get::<Option<i64>, _>(col).ok().flatten()
}

pub(crate) fn real(row: &AnyRow, col: &str) -> f64 {
    row.try_get::<Option<f64>, _>(col)
        .ok()
        .flatten()
        .or_else(|| opt_int(row, col).map(|v| v as f64))
        .unwrap_or(0.0)
}

pub(crate) fn flag(row: &AnyRow, col: &str) -> bool {
    int(row, col, 0) != 0
}

pub(crate) fn point(row: &AnyRow, prefix: &str) -> Point3 {
    Point3::new(
        real(row, &format!("{}_x", prefix)),
        real(row, &format!("{}_y", prefix)),
        real(row, &format!("{}_z", prefix)),
    )
}

pub(crate) fn corners(row: &AnyRow) -> Corners {
    [point(row, "c1"), point(row, "c2"), point(row, "c3"), point(row, "c4")]
}

pub(crate) fn geometry(row: &AnyRow) -> SleeveGeometry {
    SleeveGeometry {
        bbox_min: point(row, "bbox_min"),
        bbox_max: point(row, "bbox_max"),
        width: real(row, "width"),
        height: real(row, "height"),
        depth: real(row, "depth"),
        rotation: real(row, "rotation"),
        is_rotated: flag(row, "is_rotated"),
        placement: point(row, "placement"),
        corners: corners(row),
    }
}

/// Parse a GUID column. Malformed values are logged and yield `None`.
pub(crate) fn guid(row: &AnyRow, col: &str, entity: &str) -> Option<Uuid> {
    let raw = text(row, col)?;
    match Uuid::parse_str(raw.trim()) {
        Ok(g) => Some(g),
        Err(e) => {
            warn!(entity, column = col, value = %raw, error = %e, "Malformed GUID column");
            None
        }
    }
}

/// Decode a JSON column, substituting the default on absence or malformed input.
pub(crate) fn json_or_default<T>(row: &AnyRow, col: &str, entity: &str, verbosity: Verbosity) -> T
where
    T: DeserializeOwned + Default,
{
    let Some(raw) = text(row, col) else {
        if verbosity.per_row() {
            debug!(entity, column = col, "JSON column empty, using default");
        }
        return T::default();
    };
    if raw.trim().is_empty() {
        return T::default();
    }
    match serde_json::from_str(&raw) {
        Ok(v) => v,
        Err(e) => {
            warn!(entity, column = col, error = %e, "Malformed JSON column, using default");
            T::default()
        }
    }
}

pub(crate) fn to_json<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "null".to_string())
}

pub(crate) fn bind_point<'q>(query: AnyQuery<'q>, p: &Point3) -> AnyQuery<'q> {
    query.bind(p.x).bind(p.y).bind(p.z)
}

pub(crate) fn bind_corners<'q>(mut query: AnyQuery<'q>, corners: &Corners) -> AnyQuery<'q> {
    for c in corners {
        query = bind_point(query, c);
    }
    query
}

/// Bind in [`GEOMETRY_COLUMNS`] order.
pub(crate) fn bind_geometry<'q>(query: AnyQuery<'q>, g: &SleeveGeometry) -> AnyQuery<'q> {
    let query = bind_point(query, &g.bbox_min);
    let query = bind_point(query, &g.bbox_max);
    let query = query
        .bind(g.width)
        .bind(g.height)
        .bind(g.depth)
        .bind(g.rotation)
        .bind(g.is_rotated as i64);
    let query = bind_point(query, &g.placement);
    bind_corners(query, &g.corners)
}

/// Id of the row just inserted on `conn`.
///
/// The `Any` driver only fills `last_insert_id` for MySQL. SQLite is asked
/// for `last_insert_rowid()`, which must run on the same connection.
pub(crate) async fn inserted_id(
    conn: &mut AnyConnection,
    result: &AnyQueryResult,
    entity: &'static str,
) -> Result<i64, StoreError> {
    if let Some(id) = result.last_insert_id() {
        return Ok(id);
    }
    sqlx::query_scalar::<_, i64>("SELECT last_insert_rowid()")
        .fetch_one(&mut *conn)
        .await
        .map_err(StoreError::persistence(entity, "insert"))
}

/// `?, ?, ?` with `n` placeholders.
pub(crate) fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}
