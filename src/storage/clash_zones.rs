// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! `clash_zones` table.
//!
//! Refreshing a detected zone never touches its resolution flags or owner
//! links. Flags only move up through [`raise_tier`] and only move down
//! through [`reset`].

use super::rows::{self, bind_corners, bind_point, placeholders, AnyQuery};
use super::traits::StoreError;
use crate::config::Verbosity;
use crate::model::{now_millis, ClashZone, ParameterMap, ResolutionFlags, ResolutionTier, ZonePlacement, UNASSIGNED};
use sqlx::any::AnyRow;
use sqlx::AnyConnection;
use tracing::debug;
use uuid::Uuid;

const ENTITY: &str = "ClashZone";

const COLUMNS: &str = "content_guid, mep_category, mep_element_id, host_element_id, point_x, point_y, point_z, \
     is_resolved, is_cluster_resolved, is_combined_resolved, is_current_clash, \
     sleeve_instance_id, cluster_instance_id, combined_instance_id, \
     c1_x, c1_y, c1_z, c2_x, c2_y, c2_z, c3_x, c3_y, c3_z, c4_x, c4_y, c4_z, \
     width, height, diameter, rotation, created_at, updated_at";

const ARITY: usize = 32;

/// Columns refreshed when a zone is detected again.
const REFRESHED: [&str; 22] = [
    "mep_category", "mep_element_id", "host_element_id", "point_x", "point_y", "point_z",
    "c1_x", "c1_y", "c1_z", "c2_x", "c2_y", "c2_z", "c3_x", "c3_y", "c3_z", "c4_x", "c4_y", "c4_z",
    "width", "height", "diameter", "rotation",
];

pub(crate) fn from_row(row: &AnyRow) -> Option<ClashZone> {
    let guid = rows::guid(row, "content_guid", ENTITY)?;
    Some(ClashZone {
        guid,
        category: rows::text(row, "mep_category").unwrap_or_default(),
        mep_element_id: rows::int(row, "mep_element_id", 0),
        host_element_id: rows::int(row, "host_element_id", 0),
        intersection: rows::point(row, "point"),
        flags: ResolutionFlags {
            is_resolved: rows::flag(row, "is_resolved"),
            is_cluster_resolved: rows::flag(row, "is_cluster_resolved"),
            is_combined_resolved: rows::flag(row, "is_combined_resolved"),
            is_current_clash: rows::flag(row, "is_current_clash"),
        },
        sleeve_instance_id: rows::int(row, "sleeve_instance_id", UNASSIGNED),
        cluster_instance_id: rows::int(row, "cluster_instance_id", UNASSIGNED),
        combined_instance_id: rows::int(row, "combined_instance_id", UNASSIGNED),
        placement: ZonePlacement {
            corners: rows::corners(row),
            width: rows::real(row, "width"),
            height: rows::real(row, "height"),
            diameter: rows::real(row, "diameter"),
            rotation: rows::real(row, "rotation"),
        },
        created_at: rows::int(row, "created_at", 0),
        updated_at: rows::int(row, "updated_at", 0),
    })
}

fn bind_zone<'q>(query: AnyQuery<'q>, zone: &ClashZone, now: i64) -> AnyQuery<'q> {
    let query = query
        .bind(zone.guid.to_string())
        .bind(zone.category.clone())
        .bind(zone.mep_element_id)
        .bind(zone.host_element_id);
    let query = bind_point(query, &zone.intersection)
        .bind(zone.flags.is_resolved as i64)
        .bind(zone.flags.is_cluster_resolved as i64)
        .bind(zone.flags.is_combined_resolved as i64)
        .bind(zone.flags.is_current_clash as i64)
        .bind(zone.sleeve_instance_id)
        .bind(zone.cluster_instance_id)
        .bind(zone.combined_instance_id);
    bind_corners(query, &zone.placement.corners)
        .bind(zone.placement.width)
        .bind(zone.placement.height)
        .bind(zone.placement.diameter)
        .bind(zone.placement.rotation)
        .bind(zone.created_at)
        .bind(now)
}

fn upsert_sql(is_sqlite: bool) -> String {
    let insert = format!("INSERT INTO clash_zones ({}) VALUES ({})", COLUMNS, placeholders(ARITY));
    if is_sqlite {
        let updates: Vec<String> = REFRESHED.iter().map(|c| format!("{c} = excluded.{c}")).collect();
        format!(
            "{} ON CONFLICT(content_guid) DO UPDATE SET {}, is_current_clash = 1, updated_at = excluded.updated_at",
            insert,
            updates.join(", ")
        )
    } else {
        let updates: Vec<String> = REFRESHED.iter().map(|c| format!("{c} = VALUES({c})")).collect();
        format!(
            "{} ON DUPLICATE KEY UPDATE {}, is_current_clash = 1, updated_at = VALUES(updated_at)",
            insert,
            updates.join(", ")
        )
    }
}

/// Insert new zones; refresh detection data of existing ones.
pub(crate) async fn upsert(
    conn: &mut AnyConnection,
    is_sqlite: bool,
    zones: &[ClashZone],
    verbosity: Verbosity,
) -> Result<u64, StoreError> {
    let sql = upsert_sql(is_sqlite);
    let now = now_millis();
    let mut affected = 0;
    for zone in zones {
        let result = bind_zone(sqlx::query(&sql), zone, now)
            .execute(&mut *conn)
            .await
            .map_err(StoreError::persistence(ENTITY, "upsert"))?;
        affected += result.rows_affected();
        if verbosity.per_row() {
            debug!(guid = %zone.guid, category = %zone.category, "Clash zone upserted");
        }
    }
    Ok(affected)
}

pub(crate) async fn get(conn: &mut AnyConnection, guid: Uuid) -> Result<Option<ClashZone>, sqlx::Error> {
    let sql = format!("SELECT {} FROM clash_zones WHERE content_guid = ?", COLUMNS);
    let row = sqlx::query(&sql)
        .bind(guid.to_string())
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row.as_ref().and_then(from_row))
}

/// Zones linked to a host instance at any tier.
pub(crate) async fn by_instance(conn: &mut AnyConnection, instance_id: i64) -> Result<Vec<ClashZone>, sqlx::Error> {
    let sql = format!(
        "SELECT {} FROM clash_zones \
         WHERE sleeve_instance_id = ? OR cluster_instance_id = ? OR combined_instance_id = ? \
         ORDER BY content_guid",
        COLUMNS
    );
    let rows = sqlx::query(&sql)
        .bind(instance_id)
        .bind(instance_id)
        .bind(instance_id)
        .fetch_all(&mut *conn)
        .await?;
    Ok(rows.iter().filter_map(from_row).collect())
}

pub(crate) async fn by_category(conn: &mut AnyConnection, category: &str) -> Result<Vec<ClashZone>, sqlx::Error> {
    let sql = format!(
        "SELECT {} FROM clash_zones WHERE mep_category = ? ORDER BY content_guid",
        COLUMNS
    );
    let rows = sqlx::query(&sql).bind(category).fetch_all(&mut *conn).await?;
    Ok(rows.iter().filter_map(from_row).collect())
}

pub(crate) async fn all(conn: &mut AnyConnection) -> Result<Vec<ClashZone>, sqlx::Error> {
    let sql = format!("SELECT {} FROM clash_zones ORDER BY content_guid", COLUMNS);
    let rows = sqlx::query(&sql).fetch_all(&mut *conn).await?;
    Ok(rows.iter().filter_map(from_row).collect())
}

/// Raise one tier flag on the given zones and, when `owner_instance_id` is
/// set, record it as the tier's owner link. Other tiers are left alone.
pub(crate) async fn raise_tier(
    conn: &mut AnyConnection,
    guids: &[Uuid],
    tier: ResolutionTier,
    owner_instance_id: Option<i64>,
    chunk_size: usize,
) -> Result<u64, StoreError> {
    let now = now_millis();
    let mut affected = 0;
    for chunk in guids.chunks(chunk_size.max(1)) {
        let sql = match owner_instance_id {
            Some(_) => format!(
                "UPDATE clash_zones SET {} = 1, {} = ?, updated_at = ? WHERE content_guid IN ({})",
                tier.flag_column(),
                tier.link_column(),
                placeholders(chunk.len())
            ),
            None => format!(
                "UPDATE clash_zones SET {} = 1, updated_at = ? WHERE content_guid IN ({})",
                tier.flag_column(),
                placeholders(chunk.len())
            ),
        };
        let mut query = sqlx::query(&sql);
        if let Some(owner) = owner_instance_id {
            query = query.bind(owner);
        }
        query = query.bind(now);
        for guid in chunk {
            query = query.bind(guid.to_string());
        }
        let result = query
            .execute(&mut *conn)
            .await
            .map_err(StoreError::persistence(ENTITY, "raise_tier"))?;
        affected += result.rows_affected();
    }
    Ok(affected)
}

/// `is_current_clash = 1` for the listed zones, 0 for the rest of the category.
pub(crate) async fn mark_current(
    conn: &mut AnyConnection,
    category: &str,
    current: &[Uuid],
    chunk_size: usize,
) -> Result<u64, StoreError> {
    let now = now_millis();
    sqlx::query("UPDATE clash_zones SET is_current_clash = 0, updated_at = ? WHERE mep_category = ?")
        .bind(now)
        .bind(category)
        .execute(&mut *conn)
        .await
        .map_err(StoreError::persistence(ENTITY, "mark_current_clashes"))?;

    let mut marked = 0;
    for chunk in current.chunks(chunk_size.max(1)) {
        let sql = format!(
            "UPDATE clash_zones SET is_current_clash = 1, updated_at = ? WHERE mep_category = ? AND content_guid IN ({})",
            placeholders(chunk.len())
        );
        let mut query = sqlx::query(&sql).bind(now).bind(category);
        for guid in chunk {
            query = query.bind(guid.to_string());
        }
        marked += query
            .execute(&mut *conn)
            .await
            .map_err(StoreError::persistence(ENTITY, "mark_current_clashes"))?
            .rows_affected();
    }
    Ok(marked)
}

/// Clear every tier flag and owner link. Content GUIDs are kept.
pub(crate) async fn reset(conn: &mut AnyConnection, category: Option<&str>) -> Result<u64, StoreError> {
    let mut sql = String::from(
        "UPDATE clash_zones SET is_resolved = 0, is_cluster_resolved = 0, is_combined_resolved = 0, \
         sleeve_instance_id = -1, cluster_instance_id = -1, combined_instance_id = -1, updated_at = ?",
    );
    if category.is_some() {
        sql.push_str(" WHERE mep_category = ?");
    }
    let mut query = sqlx::query(&sql).bind(now_millis());
    if let Some(category) = category {
        query = query.bind(category);
    }
    Ok(query
        .execute(&mut *conn)
        .await
        .map_err(StoreError::persistence(ENTITY, "reset"))?
        .rows_affected())
}

pub(crate) async fn delete_category(conn: &mut AnyConnection, category: &str) -> Result<u64, StoreError> {
    Ok(sqlx::query("DELETE FROM clash_zones WHERE mep_category = ?")
        .bind(category)
        .execute(&mut *conn)
        .await
        .map_err(StoreError::persistence(ENTITY, "delete"))?
        .rows_affected())
}

/// Write the individual sleeve's instance id. Only placed sleeves
/// (`instance_id > 0`) can be linked.
pub(crate) async fn set_sleeve_instance(
    conn: &mut AnyConnection,
    guid: Uuid,
    instance_id: i64,
) -> Result<bool, StoreError> {
    if instance_id <= 0 {
        return Err(StoreError::validation(ENTITY, "sleeve instance id must be positive"));
    }
    let result = sqlx::query("UPDATE clash_zones SET sleeve_instance_id = ?, updated_at = ? WHERE content_guid = ?")
        .bind(instance_id)
        .bind(now_millis())
        .bind(guid.to_string())
        .execute(&mut *conn)
        .await
        .map_err(StoreError::persistence(ENTITY, "set_sleeve_instance"))?;
    Ok(result.rows_affected() > 0)
}

/// Every zone with its snapshot parameters. Zones without a snapshot get
/// empty parameter maps.
pub(crate) async fn with_parameters(
    conn: &mut AnyConnection,
    category: Option<&str>,
    verbosity: Verbosity,
) -> Result<Vec<(ClashZone, ParameterMap, ParameterMap)>, sqlx::Error> {
    let zone_columns: Vec<String> = COLUMNS.split(',').map(|c| format!("z.{}", c.trim())).collect();
    let mut sql = format!(
        "SELECT {}, s.mep_parameters_json, s.host_parameters_json \
         FROM clash_zones z LEFT JOIN sleeve_snapshots s ON s.clash_zone_guid = z.content_guid",
        zone_columns.join(", ")
    );
    if category.is_some() {
        sql.push_str(" WHERE z.mep_category = ?");
    }
    sql.push_str(" ORDER BY z.content_guid");

    let mut query = sqlx::query(&sql);
    if let Some(category) = category {
        query = query.bind(category);
    }
    let joined = query.fetch_all(&mut *conn).await?;

    let mut out: Vec<(ClashZone, _, _)> = Vec::with_capacity(joined.len());
    for row in &joined {
        let Some(zone) = from_row(row) else { continue };
        // Several snapshots for one zone: keep the first row.
        if out.last().is_some_and(|(z, _, _)| z.guid == zone.guid) {
            continue;
        }
        let mep = rows::json_or_default(row, "mep_parameters_json", "SleeveSnapshot", verbosity);
        let host = rows::json_or_default(row, "host_parameters_json", "SleeveSnapshot", verbosity);
        out.push((zone, mep, host));
    }
    Ok(out)
}
