// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! `combined_sleeves` and `combined_sleeve_constituents` tables.
//!
//! Constituent rows are owned by their parent: they are rewritten whenever
//! the parent is, and deleted before it.

use super::rows::{self, bind_geometry, placeholders, GEOMETRY_ARITY, GEOMETRY_COLUMNS};
use super::traits::StoreError;
use crate::config::Verbosity;
use crate::identity::{ClusterRef, ConstituentKey, ContentHash};
use crate::model::{
    now_millis, CombinedConstituent, CombinedScope, CombinedSleeve, ConstituentType, SleeveConstituent, UNASSIGNED,
};
use sqlx::any::AnyRow;
use sqlx::AnyConnection;
use std::collections::HashMap;
use tracing::{debug, warn};

const ENTITY: &str = "CombinedSleeve";
const CHILD: &str = "SleeveConstituent";

fn select_sql(filter: &str) -> String {
    format!(
        "SELECT combined_sleeve_id, combined_instance_id, content_hash, combo_id, filter_id, categories, {}, \
         created_at, updated_at FROM combined_sleeves {} ORDER BY combined_sleeve_id",
        GEOMETRY_COLUMNS, filter
    )
}

fn from_row(row: &AnyRow) -> CombinedSleeve {
    let content_hash = rows::text(row, "content_hash").and_then(|raw| match ContentHash::from_hex(&raw) {
        Ok(hash) => Some(hash),
        Err(e) => {
            warn!(entity = ENTITY, error = %e, "Malformed content hash column");
            None
        }
    });
    CombinedSleeve {
        id: rows::opt_int(row, "combined_sleeve_id"),
        instance_id: rows::int(row, "combined_instance_id", UNASSIGNED),
        content_hash,
        scope: CombinedScope {
            combo_id: rows::int(row, "combo_id", 0),
            filter_id: rows::int(row, "filter_id", 0),
        },
        categories: CombinedSleeve::parse_categories(&rows::text(row, "categories").unwrap_or_default()),
        geometry: rows::geometry(row),
        constituents: Vec::new(),
        created_at: rows::int(row, "created_at", 0),
        updated_at: rows::int(row, "updated_at", 0),
    }
}

fn constituent_from_row(row: &AnyRow, verbosity: Verbosity) -> Option<SleeveConstituent> {
    let id = rows::int(row, "constituent_id", 0);
    let raw_type = rows::text(row, "constituent_type").unwrap_or_default();
    let key = match ConstituentType::parse(&raw_type) {
        Some(ConstituentType::Individual) => rows::guid(row, "clash_zone_guid", CHILD).map(ConstituentKey::Individual),
        Some(ConstituentType::Cluster) => ConstituentKey::cluster(
            rows::int(row, "cluster_instance_id", UNASSIGNED),
            rows::opt_int(row, "cluster_sleeve_id"),
        ),
        None => None,
    };
    let Some(key) = key else {
        if verbosity.summaries() {
            warn!(entity = CHILD, constituent_id = id, constituent_type = %raw_type, "Skipping unreadable constituent row");
        }
        return None;
    };
    Some(SleeveConstituent {
        id,
        combined_sleeve_id: rows::int(row, "combined_sleeve_id", 0),
        constituent: CombinedConstituent {
            key,
            category: rows::text(row, "category").unwrap_or_default(),
        },
    })
}

async fn insert_constituents(
    conn: &mut AnyConnection,
    combined_sleeve_id: i64,
    constituents: &[CombinedConstituent],
    verbosity: Verbosity,
) -> Result<(), StoreError> {
    for c in constituents {
        let (guid, instance, row_id) = match c.key {
            ConstituentKey::Individual(guid) => (Some(guid.to_string()), None, None),
            ConstituentKey::Cluster(ClusterRef::Instance(id)) => (None, Some(id), None),
            ConstituentKey::Cluster(ClusterRef::Row(id)) => (None, None, Some(id)),
        };
        sqlx::query(
            "INSERT INTO combined_sleeve_constituents \
             (combined_sleeve_id, constituent_type, category, clash_zone_guid, cluster_instance_id, cluster_sleeve_id) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(combined_sleeve_id)
        .bind(c.constituent_type().as_str())
        .bind(c.category.clone())
        .bind(guid)
        .bind(instance)
        .bind(row_id)
        .execute(&mut *conn)
        .await
        .map_err(StoreError::persistence(CHILD, "insert"))?;

        if verbosity.per_row() {
            debug!(combined_sleeve_id, key = %c.key, category = %c.category, "Constituent written");
        }
    }
    Ok(())
}

async fn delete_constituents(conn: &mut AnyConnection, combined_sleeve_id: i64) -> Result<u64, StoreError> {
    Ok(sqlx::query("DELETE FROM combined_sleeve_constituents WHERE combined_sleeve_id = ?")
        .bind(combined_sleeve_id)
        .execute(&mut *conn)
        .await
        .map_err(StoreError::persistence(CHILD, "delete"))?
        .rows_affected())
}

/// Insert the parent row and its constituents; returns the parent id.
pub(crate) async fn insert(
    conn: &mut AnyConnection,
    combined: &CombinedSleeve,
    verbosity: Verbosity,
) -> Result<i64, StoreError> {
    let sql = format!(
        "INSERT INTO combined_sleeves (combined_instance_id, content_hash, combo_id, filter_id, categories, {}, \
         created_at, updated_at) VALUES ({})",
        GEOMETRY_COLUMNS,
        placeholders(GEOMETRY_ARITY + 7)
    );
    let query = sqlx::query(&sql)
        .bind(combined.instance_id)
        .bind(combined.content_hash.map(|h| h.to_hex()))
        .bind(combined.scope.combo_id)
        .bind(combined.scope.filter_id)
        .bind(combined.categories_csv());
    let result = bind_geometry(query, &combined.geometry)
        .bind(combined.created_at)
        .bind(combined.updated_at)
        .execute(&mut *conn)
        .await
        .map_err(StoreError::persistence(ENTITY, "insert"))?;
    let id = rows::inserted_id(conn, &result, ENTITY).await?;

    insert_constituents(conn, id, &combined.constituents, verbosity).await?;
    Ok(id)
}

/// Overwrite the parent row in place (keeping `created_at`) and rewrite
/// its constituents.
pub(crate) async fn update(
    conn: &mut AnyConnection,
    id: i64,
    combined: &CombinedSleeve,
    verbosity: Verbosity,
) -> Result<(), StoreError> {
    let geometry_sets: Vec<String> = GEOMETRY_COLUMNS.split(',').map(|c| format!("{} = ?", c.trim())).collect();
    let sql = format!(
        "UPDATE combined_sleeves SET combined_instance_id = ?, content_hash = ?, combo_id = ?, filter_id = ?, \
         categories = ?, {}, updated_at = ? WHERE combined_sleeve_id = ?",
        geometry_sets.join(", ")
    );
    let query = sqlx::query(&sql)
        .bind(combined.instance_id)
        .bind(combined.content_hash.map(|h| h.to_hex()))
        .bind(combined.scope.combo_id)
        .bind(combined.scope.filter_id)
        .bind(combined.categories_csv());
    bind_geometry(query, &combined.geometry)
        .bind(now_millis())
        .bind(id)
        .execute(&mut *conn)
        .await
        .map_err(StoreError::persistence(ENTITY, "update"))?;

    delete_constituents(conn, id).await?;
    insert_constituents(conn, id, &combined.constituents, verbosity).await
}

/// Child rows of one combined sleeve.
pub(crate) async fn constituents_of(
    conn: &mut AnyConnection,
    combined_sleeve_id: i64,
    verbosity: Verbosity,
) -> Result<Vec<SleeveConstituent>, sqlx::Error> {
    let found = sqlx::query(
        "SELECT constituent_id, combined_sleeve_id, constituent_type, category, clash_zone_guid, \
         cluster_instance_id, cluster_sleeve_id FROM combined_sleeve_constituents \
         WHERE combined_sleeve_id = ? ORDER BY constituent_id",
    )
    .bind(combined_sleeve_id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(found.iter().filter_map(|r| constituent_from_row(r, verbosity)).collect())
}

async fn with_constituents(
    conn: &mut AnyConnection,
    mut sleeves: Vec<CombinedSleeve>,
    verbosity: Verbosity,
) -> Result<Vec<CombinedSleeve>, sqlx::Error> {
    for sleeve in &mut sleeves {
        if let Some(id) = sleeve.id {
            sleeve.constituents = constituents_of(conn, id, verbosity)
                .await?
                .into_iter()
                .map(|c| c.constituent)
                .collect();
        }
    }
    Ok(sleeves)
}

async fn fetch_one(
    conn: &mut AnyConnection,
    row: Option<AnyRow>,
    verbosity: Verbosity,
) -> Result<Option<CombinedSleeve>, sqlx::Error> {
    match row {
        Some(row) => Ok(with_constituents(conn, vec![from_row(&row)], verbosity).await?.pop()),
        None => Ok(None),
    }
}

pub(crate) async fn by_hash(
    conn: &mut AnyConnection,
    hash: &ContentHash,
    verbosity: Verbosity,
) -> Result<Option<CombinedSleeve>, sqlx::Error> {
    let row = sqlx::query(&select_sql("WHERE content_hash = ?"))
        .bind(hash.to_hex())
        .fetch_optional(&mut *conn)
        .await?;
    fetch_one(conn, row, verbosity).await
}

pub(crate) async fn by_instance(
    conn: &mut AnyConnection,
    instance_id: i64,
    verbosity: Verbosity,
) -> Result<Option<CombinedSleeve>, sqlx::Error> {
    if instance_id <= 0 {
        return Ok(None);
    }
    let row = sqlx::query(&select_sql("WHERE combined_instance_id = ?"))
        .bind(instance_id)
        .fetch_optional(&mut *conn)
        .await?;
    fetch_one(conn, row, verbosity).await
}

pub(crate) async fn by_scope(
    conn: &mut AnyConnection,
    scope: CombinedScope,
    verbosity: Verbosity,
) -> Result<Vec<CombinedSleeve>, sqlx::Error> {
    let found = sqlx::query(&select_sql("WHERE combo_id = ? AND filter_id = ?"))
        .bind(scope.combo_id)
        .bind(scope.filter_id)
        .fetch_all(&mut *conn)
        .await?;
    let sleeves = found.iter().map(from_row).collect();
    with_constituents(conn, sleeves, verbosity).await
}

pub(crate) async fn all(conn: &mut AnyConnection, verbosity: Verbosity) -> Result<Vec<CombinedSleeve>, sqlx::Error> {
    let found = sqlx::query(&select_sql("")).fetch_all(&mut *conn).await?;
    let sleeves = found.iter().map(from_row).collect();
    with_constituents(conn, sleeves, verbosity).await
}

/// `created_at` of existing rows carrying any of the given hashes.
pub(crate) async fn created_at_by_hash(
    conn: &mut AnyConnection,
    hashes: &[ContentHash],
    chunk_size: usize,
) -> Result<HashMap<ContentHash, i64>, StoreError> {
    let mut out = HashMap::new();
    for chunk in hashes.chunks(chunk_size.max(1)) {
        let sql = format!(
            "SELECT content_hash, created_at FROM combined_sleeves WHERE content_hash IN ({})",
            placeholders(chunk.len())
        );
        let mut query = sqlx::query(&sql);
        for hash in chunk {
            query = query.bind(hash.to_hex());
        }
        let found = query
            .fetch_all(&mut *conn)
            .await
            .map_err(StoreError::persistence(ENTITY, "lookup"))?;
        for row in &found {
            if let Some(hash) = rows::text(row, "content_hash").and_then(|h| ContentHash::from_hex(&h).ok()) {
                out.insert(hash, rows::int(row, "created_at", 0));
            }
        }
    }
    Ok(out)
}

async fn delete_where(
    conn: &mut AnyConnection,
    filter: &str,
    binds: &[String],
    operation: &'static str,
) -> Result<u64, StoreError> {
    let child_sql = format!(
        "DELETE FROM combined_sleeve_constituents WHERE combined_sleeve_id IN \
         (SELECT combined_sleeve_id FROM combined_sleeves WHERE {})",
        filter
    );
    let mut child = sqlx::query(&child_sql);
    for b in binds {
        child = child.bind(b.as_str());
    }
    child
        .execute(&mut *conn)
        .await
        .map_err(StoreError::persistence(CHILD, operation))?;

    let parent_sql = format!("DELETE FROM combined_sleeves WHERE {}", filter);
    let mut parent = sqlx::query(&parent_sql);
    for b in binds {
        parent = parent.bind(b.as_str());
    }
    Ok(parent
        .execute(&mut *conn)
        .await
        .map_err(StoreError::persistence(ENTITY, operation))?
        .rows_affected())
}

pub(crate) async fn delete_scope(conn: &mut AnyConnection, scope: CombinedScope) -> Result<u64, StoreError> {
    let mut deleted_children = 0;
    let ids: Vec<i64> = sqlx::query("SELECT combined_sleeve_id FROM combined_sleeves WHERE combo_id = ? AND filter_id = ?")
        .bind(scope.combo_id)
        .bind(scope.filter_id)
        .fetch_all(&mut *conn)
        .await
        .map_err(StoreError::persistence(ENTITY, "delete_scope"))?
        .iter()
        .map(|r| rows::int(r, "combined_sleeve_id", 0))
        .collect();
    for id in &ids {
        deleted_children += delete_constituents(conn, *id).await?;
    }
    let deleted = sqlx::query("DELETE FROM combined_sleeves WHERE combo_id = ? AND filter_id = ?")
        .bind(scope.combo_id)
        .bind(scope.filter_id)
        .execute(&mut *conn)
        .await
        .map_err(StoreError::persistence(ENTITY, "delete_scope"))?
        .rows_affected();
    debug!(scope = %scope, deleted, deleted_children, "Combined scope cleared");
    Ok(deleted)
}

/// Delete rows holding any of the given hashes, wherever their scope.
pub(crate) async fn delete_by_hashes(
    conn: &mut AnyConnection,
    hashes: &[ContentHash],
    chunk_size: usize,
) -> Result<u64, StoreError> {
    let mut deleted = 0;
    for chunk in hashes.chunks(chunk_size.max(1)) {
        let filter = format!("content_hash IN ({})", placeholders(chunk.len()));
        let binds: Vec<String> = chunk.iter().map(ContentHash::to_hex).collect();
        deleted += delete_where(conn, &filter, &binds, "delete").await?;
    }
    Ok(deleted)
}

pub(crate) async fn delete_all(conn: &mut AnyConnection) -> Result<u64, StoreError> {
    delete_where(conn, "1 = 1", &[], "delete_all").await
}

/// Delete every combined sleeve listing `category` among its categories.
pub(crate) async fn delete_category(
    conn: &mut AnyConnection,
    category: &str,
    verbosity: Verbosity,
) -> Result<u64, StoreError> {
    let ids: Vec<i64> = all(conn, verbosity)
        .await
        .map_err(StoreError::persistence(ENTITY, "delete_category"))?
        .into_iter()
        .filter(|c| c.categories.iter().any(|cat| cat == category))
        .filter_map(|c| c.id)
        .collect();

    let mut deleted = 0;
    for id in ids {
        delete_constituents(conn, id).await?;
        deleted += sqlx::query("DELETE FROM combined_sleeves WHERE combined_sleeve_id = ?")
            .bind(id)
            .execute(&mut *conn)
            .await
            .map_err(StoreError::persistence(ENTITY, "delete_category"))?
            .rows_affected();
    }
    Ok(deleted)
}
