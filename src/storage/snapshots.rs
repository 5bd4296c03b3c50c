// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! `sleeve_snapshots` table and its layout versions.
//!
//! ```text
//! current: mep_parameters_json | host_parameters_json | *_element_ids_json | constituent_refs_json
//! legacy:  parameters_json = {"mep": {..}, "host": {..}}
//! ```
//!
//! [`load`] tries [`CurrentLayout`] first and drops to [`LegacyLayout`] only
//! when the database reports a missing column. Malformed JSON in any column
//! decodes to the empty default with a warning; it never fails the load.

use super::rows;
use super::traits::{is_missing_column, SnapshotLayout, StoreError};
use crate::config::Verbosity;
use crate::model::{ParameterMap, SleeveSnapshotView};
use async_trait::async_trait;
use serde::Deserialize;
use sqlx::any::AnyRow;
use sqlx::{AnyConnection, AnyPool};
use tracing::{debug, info, warn};

const ENTITY: &str = "SleeveSnapshot";

fn owner_ids(row: &AnyRow, view: &mut SleeveSnapshotView) {
    view.snapshot_id = rows::opt_int(row, "snapshot_id");
    view.sleeve_instance_id = rows::opt_int(row, "sleeve_instance_id");
    view.cluster_instance_id = rows::opt_int(row, "cluster_instance_id");
    view.clash_zone_guid = rows::guid(row, "clash_zone_guid", ENTITY);
}

pub struct CurrentLayout {
    verbosity: Verbosity,
}

impl CurrentLayout {
    #[must_use]
    pub fn new(verbosity: Verbosity) -> Self {
        Self { verbosity }
    }
}

#[async_trait]
impl SnapshotLayout for CurrentLayout {
    fn name(&self) -> &'static str {
        "current"
    }

    async fn read_all(&self, pool: &AnyPool) -> Result<Vec<SleeveSnapshotView>, sqlx::Error> {
        let found = sqlx::query(
            "SELECT snapshot_id, sleeve_instance_id, cluster_instance_id, combined_instance_id, clash_zone_guid, \
             mep_parameters_json, host_parameters_json, source_doc_keys_json, mep_element_ids_json, \
             host_element_ids_json, constituent_refs_json, captured_at \
             FROM sleeve_snapshots ORDER BY snapshot_id",
        )
        .fetch_all(pool)
        .await?;

        let v = self.verbosity;
        Ok(found
            .iter()
            .map(|row| {
                let mut view = SleeveSnapshotView {
                    combined_instance_id: rows::opt_int(row, "combined_instance_id"),
                    mep_parameters: rows::json_or_default(row, "mep_parameters_json", ENTITY, v),
                    host_parameters: rows::json_or_default(row, "host_parameters_json", ENTITY, v),
                    source_doc_keys: rows::json_or_default(row, "source_doc_keys_json", ENTITY, v),
                    mep_element_ids: rows::json_or_default(row, "mep_element_ids_json", ENTITY, v),
                    host_element_ids: rows::json_or_default(row, "host_element_ids_json", ENTITY, v),
                    constituent_refs: rows::json_or_default(row, "constituent_refs_json", ENTITY, v),
                    captured_at: rows::int(row, "captured_at", 0),
                    ..Default::default()
                };
                owner_ids(row, &mut view);
                view
            })
            .collect())
    }
}

/// Parameters of the older single-column layout.
#[derive(Debug, Default, Deserialize)]
struct LegacyParameters {
    #[serde(default)]
    mep: ParameterMap,
    #[serde(default)]
    host: ParameterMap,
}

/// Older layout: one `parameters_json` column, no element id lists, no
/// combined owner, no constituent refs.
pub struct LegacyLayout {
    verbosity: Verbosity,
}

impl LegacyLayout {
    #[must_use]
    pub fn new(verbosity: Verbosity) -> Self {
        Self { verbosity }
    }
}

#[async_trait]
impl SnapshotLayout for LegacyLayout {
    fn name(&self) -> &'static str {
        "legacy"
    }

    async fn read_all(&self, pool: &AnyPool) -> Result<Vec<SleeveSnapshotView>, sqlx::Error> {
        let found = sqlx::query(
            "SELECT snapshot_id, sleeve_instance_id, cluster_instance_id, clash_zone_guid, parameters_json \
             FROM sleeve_snapshots ORDER BY snapshot_id",
        )
        .fetch_all(pool)
        .await?;

        Ok(found
            .iter()
            .map(|row| {
                let params: LegacyParameters = rows::json_or_default(row, "parameters_json", ENTITY, self.verbosity);
                let mut view = SleeveSnapshotView {
                    mep_parameters: params.mep,
                    host_parameters: params.host,
                    ..Default::default()
                };
                owner_ids(row, &mut view);
                view
            })
            .collect())
    }
}

/// Read every snapshot with the newest layout the table supports.
///
/// Returns the rows and the name of the layout that produced them.
pub(crate) async fn load(
    pool: &AnyPool,
    verbosity: Verbosity,
) -> Result<(Vec<SleeveSnapshotView>, &'static str), sqlx::Error> {
    let layouts: [Box<dyn SnapshotLayout>; 2] =
        [Box::new(CurrentLayout::new(verbosity)), Box::new(LegacyLayout::new(verbosity))];

    let mut last_err = None;
    for layout in &layouts {
        match layout.read_all(pool).await {
            Ok(views) => {
                if verbosity.summaries() {
                    debug!(layout = layout.name(), count = views.len(), "Snapshots loaded");
                }
                return Ok((views, layout.name()));
            }
            Err(e) if is_missing_column(&e) => {
                if verbosity.summaries() {
                    info!(layout = layout.name(), error = %e, "Snapshot layout not present, trying older layout");
                }
                last_err = Some(e);
            }
            Err(e) => return Err(e),
        }
    }
    let err = last_err.unwrap_or(sqlx::Error::RowNotFound);
    warn!(error = %err, "No snapshot layout matched");
    Err(err)
}

/// Insert one snapshot row (current layout) and return its id.
pub(crate) async fn save(conn: &mut AnyConnection, view: &SleeveSnapshotView) -> Result<i64, StoreError> {
    let result = sqlx::query(
        "INSERT INTO sleeve_snapshots (sleeve_instance_id, cluster_instance_id, combined_instance_id, \
         clash_zone_guid, mep_parameters_json, host_parameters_json, source_doc_keys_json, \
         mep_element_ids_json, host_element_ids_json, constituent_refs_json, captured_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(view.sleeve_instance_id)
    .bind(view.cluster_instance_id)
    .bind(view.combined_instance_id)
    .bind(view.clash_zone_guid.map(|g| g.to_string()))
    .bind(rows::to_json(&view.mep_parameters))
    .bind(rows::to_json(&view.host_parameters))
    .bind(rows::to_json(&view.source_doc_keys))
    .bind(rows::to_json(&view.mep_element_ids))
    .bind(rows::to_json(&view.host_element_ids))
    .bind(rows::to_json(&view.constituent_refs))
    .bind(view.captured_at)
    .execute(&mut *conn)
    .await
    .map_err(StoreError::persistence(ENTITY, "insert"))?;

    rows::inserted_id(conn, &result, ENTITY).await
}
