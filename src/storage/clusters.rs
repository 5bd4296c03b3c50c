//! `cluster_sleeves` table.

use super::rows::{self, bind_geometry, placeholders, GEOMETRY_ARITY, GEOMETRY_COLUMNS};
use super::traits::StoreError;
use crate::config::Verbosity;
use crate::model::{now_millis, ClusterSleeve, ParameterMap, ScopeKey, UNASSIGNED};
use sqlx::any::AnyRow;
use sqlx::AnyConnection;
use std::collections::HashMap;
use uuid::Uuid;

const ENTITY: &str = "ClusterSleeve";

fn select_sql(filter: &str) -> String {
    format!(
        "SELECT cluster_sleeve_id, cluster_instance_id, content_guid, combo_id, filter_id, category, {}, \
         constituent_guids_json, created_at, updated_at FROM cluster_sleeves {} ORDER BY cluster_sleeve_id",
        GEOMETRY_COLUMNS, filter
    )
}

pub(crate) fn from_row(row: &AnyRow, verbosity: Verbosity) -> ClusterSleeve {
    let constituents: Vec<Uuid> = rows::json_or_default(row, "constituent_guids_json", ENTITY, verbosity);
    ClusterSleeve {
        id: rows::opt_int(row, "cluster_sleeve_id"),
        instance_id: rows::int(row, "cluster_instance_id", UNASSIGNED),
        content_guid: rows::guid(row, "content_guid", ENTITY),
        scope: ScopeKey {
            combo_id: rows::int(row, "combo_id", 0),
            filter_id: rows::int(row, "filter_id", 0),
            category: rows::text(row, "category").unwrap_or_default(),
        },
        geometry: rows::geometry(row),
        constituents,
        created_at: rows::int(row, "created_at", 0),
        updated_at: rows::int(row, "updated_at", 0),
    }
}

/// Insert a row and return its id.
pub(crate) async fn insert(conn: &mut AnyConnection, cluster: &ClusterSleeve) -> Result<i64, StoreError> {
    let sql = format!(
        "INSERT INTO cluster_sleeves (cluster_instance_id, content_guid, combo_id, filter_id, category, {}, \
         constituent_guids_json, created_at, updated_at) VALUES ({})",
        GEOMETRY_COLUMNS,
        placeholders(GEOMETRY_ARITY + 8)
    );
    let query = sqlx::query(&sql)
        .bind(cluster.instance_id)
        .bind(cluster.content_guid.map(|g| g.to_string()))
        .bind(cluster.scope.combo_id)
        .bind(cluster.scope.filter_id)
        .bind(cluster.scope.category.clone());
    let result = bind_geometry(query, &cluster.geometry)
        .bind(rows::to_json(&cluster.constituents))
        .bind(cluster.created_at)
        .bind(cluster.updated_at)
        .execute(&mut *conn)
        .await
        .map_err(StoreError::persistence(ENTITY, "insert"))?;

    rows::inserted_id(conn, &result, ENTITY).await
}

/// Overwrite a row in place. `created_at` is kept.
pub(crate) async fn update(conn: &mut AnyConnection, id: i64, cluster: &ClusterSleeve) -> Result<(), StoreError> {
    let geometry_sets: Vec<String> = GEOMETRY_COLUMNS.split(',').map(|c| format!("{} = ?", c.trim())).collect();
    let sql = format!(
        "UPDATE cluster_sleeves SET cluster_instance_id = ?, content_guid = ?, combo_id = ?, filter_id = ?, \
         category = ?, {}, constituent_guids_json = ?, updated_at = ? WHERE cluster_sleeve_id = ?",
        geometry_sets.join(", ")
    );
    let query = sqlx::query(&sql)
        .bind(cluster.instance_id)
        .bind(cluster.content_guid.map(|g| g.to_string()))
        .bind(cluster.scope.combo_id)
        .bind(cluster.scope.filter_id)
        .bind(cluster.scope.category.clone());
    bind_geometry(query, &cluster.geometry)
        .bind(rows::to_json(&cluster.constituents))
        .bind(now_millis())
        .bind(id)
        .execute(&mut *conn)
        .await
        .map_err(StoreError::persistence(ENTITY, "update"))?;
    Ok(())
}

pub(crate) async fn by_guid(
    conn: &mut AnyConnection,
    guid: Uuid,
    verbosity: Verbosity,
) -> Result<Option<ClusterSleeve>, sqlx::Error> {
    let row = sqlx::query(&select_sql("WHERE content_guid = ?"))
        .bind(guid.to_string())
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row.map(|r| from_row(&r, verbosity)))
}

pub(crate) async fn by_instance(
    conn: &mut AnyConnection,
    instance_id: i64,
    verbosity: Verbosity,
) -> Result<Option<ClusterSleeve>, sqlx::Error> {
    if instance_id <= 0 {
        return Ok(None);
    }
    let row = sqlx::query(&select_sql("WHERE cluster_instance_id = ?"))
        .bind(instance_id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row.map(|r| from_row(&r, verbosity)))
}

pub(crate) async fn by_row_id(
    conn: &mut AnyConnection,
    id: i64,
    verbosity: Verbosity,
) -> Result<Option<ClusterSleeve>, sqlx::Error> {
    let row = sqlx::query(&select_sql("WHERE cluster_sleeve_id = ?"))
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(row.map(|r| from_row(&r, verbosity)))
}

pub(crate) async fn by_scope(
    conn: &mut AnyConnection,
    scope: &ScopeKey,
    verbosity: Verbosity,
) -> Result<Vec<ClusterSleeve>, sqlx::Error> {
    let rows = sqlx::query(&select_sql("WHERE combo_id = ? AND filter_id = ? AND category = ?"))
        .bind(scope.combo_id)
        .bind(scope.filter_id)
        .bind(scope.category.as_str())
        .fetch_all(&mut *conn)
        .await?;
    Ok(rows.iter().map(|r| from_row(r, verbosity)).collect())
}

pub(crate) async fn all(conn: &mut AnyConnection, verbosity: Verbosity) -> Result<Vec<ClusterSleeve>, sqlx::Error> {
    let rows = sqlx::query(&select_sql("")).fetch_all(&mut *conn).await?;
    Ok(rows.iter().map(|r| from_row(r, verbosity)).collect())
}

/// `created_at` of existing rows carrying any of the given GUIDs.
pub(crate) async fn created_at_by_guid(
    conn: &mut AnyConnection,
    guids: &[Uuid],
    chunk_size: usize,
) -> Result<HashMap<Uuid, i64>, StoreError> {
    let mut out = HashMap::new();
    for chunk in guids.chunks(chunk_size.max(1)) {
        let sql = format!(
            "SELECT content_guid, created_at FROM cluster_sleeves WHERE content_guid IN ({})",
            placeholders(chunk.len())
        );
        let mut query = sqlx::query(&sql);
        for guid in chunk {
            query = query.bind(guid.to_string());
        }
        let found = query
            .fetch_all(&mut *conn)
            .await
            .map_err(StoreError::persistence(ENTITY, "lookup"))?;
        for row in &found {
            if let Some(guid) = rows::guid(row, "content_guid", ENTITY) {
                out.insert(guid, rows::int(row, "created_at", 0));
            }
        }
    }
    Ok(out)
}

pub(crate) async fn delete_scope(conn: &mut AnyConnection, scope: &ScopeKey) -> Result<u64, StoreError> {
    Ok(sqlx::query("DELETE FROM cluster_sleeves WHERE combo_id = ? AND filter_id = ? AND category = ?")
        .bind(scope.combo_id)
        .bind(scope.filter_id)
        .bind(scope.category.as_str())
        .execute(&mut *conn)
        .await
        .map_err(StoreError::persistence(ENTITY, "delete_scope"))?
        .rows_affected())
}

/// Delete rows holding any of the given GUIDs, wherever their scope.
pub(crate) async fn delete_by_guids(
    conn: &mut AnyConnection,
    guids: &[Uuid],
    chunk_size: usize,
) -> Result<u64, StoreError> {
    let mut deleted = 0;
    for chunk in guids.chunks(chunk_size.max(1)) {
        let sql = format!(
            "DELETE FROM cluster_sleeves WHERE content_guid IN ({})",
            placeholders(chunk.len())
        );
        let mut query = sqlx::query(&sql);
        for guid in chunk {
            query = query.bind(guid.to_string());
        }
        deleted += query
            .execute(&mut *conn)
            .await
            .map_err(StoreError::persistence(ENTITY, "delete"))?
            .rows_affected();
    }
    Ok(deleted)
}

pub(crate) async fn delete_category(conn: &mut AnyConnection, category: &str) -> Result<u64, StoreError> {
    Ok(sqlx::query("DELETE FROM cluster_sleeves WHERE category = ?")
        .bind(category)
        .execute(&mut *conn)
        .await
        .map_err(StoreError::persistence(ENTITY, "delete_category"))?
        .rows_affected())
}

pub(crate) async fn delete_all(conn: &mut AnyConnection) -> Result<u64, StoreError> {
    Ok(sqlx::query("DELETE FROM cluster_sleeves")
        .execute(&mut *conn)
        .await
        .map_err(StoreError::persistence(ENTITY, "delete_all"))?
        .rows_affected())
}

/// Every cluster with its snapshot parameters, joined on the cluster's
/// instance id. Clusters without a snapshot get empty parameter maps.
pub(crate) async fn with_parameters(
    conn: &mut AnyConnection,
    verbosity: Verbosity,
) -> Result<Vec<(ClusterSleeve, ParameterMap, ParameterMap)>, sqlx::Error> {
    let geometry: Vec<String> = GEOMETRY_COLUMNS.split(',').map(|c| format!("c.{}", c.trim())).collect();
    let sql = format!(
        "SELECT c.cluster_sleeve_id, c.cluster_instance_id, c.content_guid, c.combo_id, c.filter_id, c.category, {}, \
         c.constituent_guids_json, c.created_at, c.updated_at, s.mep_parameters_json, s.host_parameters_json \
         FROM cluster_sleeves c LEFT JOIN sleeve_snapshots s \
         ON c.cluster_instance_id > 0 AND s.cluster_instance_id = c.cluster_instance_id \
         ORDER BY c.cluster_sleeve_id",
        geometry.join(", ")
    );
    let joined = sqlx::query(&sql).fetch_all(&mut *conn).await?;

    let mut out: Vec<(ClusterSleeve, ParameterMap, ParameterMap)> = Vec::with_capacity(joined.len());
    for row in &joined {
        let cluster = from_row(row, verbosity);
        // Several snapshots for one cluster: keep the first row.
        if out.last().is_some_and(|(c, _, _)| c.id == cluster.id) {
            continue;
        }
        let mep = rows::json_or_default(row, "mep_parameters_json", "SleeveSnapshot", verbosity);
        let host = rows::json_or_default(row, "host_parameters_json", "SleeveSnapshot", verbosity);
        out.push((cluster, mep, host));
    }
    Ok(out)
}
