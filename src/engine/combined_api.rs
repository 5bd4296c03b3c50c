// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Combined sleeve saves.

use super::cascade;
use super::types::{BatchSaveReport, IdentityMode, SaveAction, SaveOutcome};
use super::SleeveEngine;
use crate::config::Verbosity;
use crate::identity::{ConstituentKey, ContentHash};
use crate::metrics::{self, LatencyTimer};
use crate::model::{now_millis, CombinedScope, CombinedSleeve, ResolutionTier};
use crate::storage::combined;
use crate::storage::sql::StoreTx;
use crate::storage::traits::StoreError;
use sqlx::AnyConnection;
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, info, instrument, warn};

const ENTITY: &str = "CombinedSleeve";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum BatchKey {
    Content(ContentHash),
    Instance(i64),
}

fn batch_key(sleeve: &CombinedSleeve) -> BatchKey {
    match sleeve.content_hash {
        Some(hash) => BatchKey::Content(hash),
        None => BatchKey::Instance(sleeve.instance_id),
    }
}

fn validate(sleeve: &CombinedSleeve) -> Result<IdentityMode, StoreError> {
    if sleeve.constituents.iter().any(|c| c.category.trim().is_empty()) {
        return Err(StoreError::validation(ENTITY, "constituent without category"));
    }
    match sleeve.content_hash {
        Some(_) => Ok(IdentityMode::Content),
        None if sleeve.instance_id > 0 => Ok(IdentityMode::InstanceOnly),
        None => Err(StoreError::validation(
            ENTITY,
            format!("no constituents and no instance id in scope {}", sleeve.scope),
        )),
    }
}

fn keys(sleeve: &CombinedSleeve) -> Vec<ConstituentKey> {
    sleeve.constituents.iter().map(|c| c.key).collect()
}

fn warn_if_unstable(sleeve: &CombinedSleeve, verbosity: Verbosity) {
    if sleeve.has_unstable_identity() && verbosity.summaries() {
        warn!(
            scope = %sleeve.scope,
            hash = ?sleeve.content_hash,
            "Combined identity uses a cluster row id; it will change once the cluster is placed"
        );
    }
}

impl SleeveEngine {
    /// Insert or update one combined sleeve and its constituent rows in
    /// its own transaction.
    #[instrument(skip(self, sleeve), fields(scope = %sleeve.scope, instance = sleeve.instance_id))]
    pub async fn save_combined(&self, sleeve: &mut CombinedSleeve) -> Result<SaveOutcome, StoreError> {
        let _timer = LatencyTimer::new("combined", "save");
        let mut tx = self.store.begin().await?;
        let result = self.save_combined_in(&mut tx, sleeve).await;
        self.finish(tx, result, ENTITY, "save").await
    }

    /// [`save_combined`](Self::save_combined) inside an open transaction.
    pub async fn save_combined_in(
        &self,
        tx: &mut StoreTx,
        sleeve: &mut CombinedSleeve,
    ) -> Result<SaveOutcome, StoreError> {
        let duplicates_dropped = sleeve.normalize();
        let identity = validate(sleeve)?;
        let verbosity = self.config.verbosity;
        warn_if_unstable(sleeve, verbosity);
        let conn = tx.conn();

        let existing = match &sleeve.content_hash {
            Some(hash) => combined::by_hash(conn, hash, verbosity).await,
            None => Ok(None),
        }
        .map_err(StoreError::persistence(ENTITY, "lookup"))?;
        let existing = match existing {
            Some(found) => Some(found),
            None => combined::by_instance(conn, sleeve.instance_id, verbosity)
                .await
                .map_err(StoreError::persistence(ENTITY, "lookup"))?,
        };

        let (row_id, action) = match existing.and_then(|e| e.id.map(|id| (id, e.created_at))) {
            Some((id, created_at)) => {
                sleeve.created_at = created_at;
                sleeve.updated_at = now_millis();
                combined::update(conn, id, sleeve, verbosity).await?;
                (id, SaveAction::Updated)
            }
            None => {
                let now = now_millis();
                sleeve.created_at = now;
                sleeve.updated_at = now;
                (combined::insert(conn, sleeve, verbosity).await?, SaveAction::Inserted)
            }
        };
        sleeve.id = Some(row_id);

        let cascaded = self.cascade_combined(conn, sleeve).await?;

        metrics::record_saves("combined", action.as_str(), 1);
        if identity == IdentityMode::InstanceOnly {
            warn!(scope = %sleeve.scope, instance = sleeve.instance_id, "Combined sleeve saved without content identity");
        }
        if verbosity.summaries() {
            debug!(row_id, %action, hash = ?sleeve.content_hash, cascaded, "Combined sleeve saved");
        }

        Ok(SaveOutcome { row_id, action, identity, cascaded, duplicates_dropped })
    }

    /// Replace every combined sleeve of every scope present in `batch`,
    /// in one transaction.
    #[instrument(skip(self, batch), fields(count = batch.len()))]
    pub async fn batch_save_combined(&self, batch: Vec<CombinedSleeve>) -> Result<BatchSaveReport, StoreError> {
        let _timer = LatencyTimer::new("combined", "batch_save");
        let mut tx = self.store.begin().await?;
        let result = self.batch_save_combined_in(&mut tx, batch).await;
        self.finish(tx, result, ENTITY, "batch_save").await
    }

    /// [`batch_save_combined`](Self::batch_save_combined) inside an open transaction.
    pub async fn batch_save_combined_in(
        &self,
        tx: &mut StoreTx,
        batch: Vec<CombinedSleeve>,
    ) -> Result<BatchSaveReport, StoreError> {
        let mut report = BatchSaveReport::new();
        let verbosity = self.config.verbosity;
        let chunk = self.config.batch_chunk_size;
        metrics::record_batch_size("combined", batch.len());

        let mut records: Vec<CombinedSleeve> = Vec::with_capacity(batch.len());
        let mut slots: HashMap<BatchKey, usize> = HashMap::new();
        for mut sleeve in batch {
            report.duplicates_dropped += sleeve.normalize();
            validate(&sleeve)?;
            warn_if_unstable(&sleeve, verbosity);
            match slots.get(&batch_key(&sleeve)) {
                Some(&slot) => {
                    report.duplicates_dropped += 1;
                    records[slot] = sleeve;
                }
                None => {
                    slots.insert(batch_key(&sleeve), records.len());
                    records.push(sleeve);
                }
            }
        }

        let conn = tx.conn();
        let scopes: BTreeSet<CombinedScope> = records.iter().map(|c| c.scope).collect();
        let hashes: Vec<ContentHash> = records.iter().filter_map(|c| c.content_hash).collect();
        let created = combined::created_at_by_hash(conn, &hashes, chunk).await?;

        report.scopes = scopes.len();
        for scope in &scopes {
            report.ghosts_removed += count_ghosts(conn, *scope, &slots, verbosity).await?;
            combined::delete_scope(conn, *scope).await?;
        }
        combined::delete_by_hashes(conn, &hashes, chunk).await?;

        let now = now_millis();
        for sleeve in &mut records {
            sleeve.created_at = sleeve.content_hash.and_then(|h| created.get(&h).copied()).unwrap_or(now);
            sleeve.updated_at = now;
            sleeve.id = Some(combined::insert(conn, sleeve, verbosity).await?);
            report.inserted += 1;
            report.cascaded += self.cascade_combined(conn, sleeve).await?;

            if verbosity.per_row() {
                debug!(
                    batch_id = %report.batch_id,
                    hash = ?sleeve.content_hash,
                    categories = %sleeve.categories_csv(),
                    "Combined sleeve written"
                );
            }
        }

        metrics::record_ghosts_removed("combined", report.ghosts_removed);
        metrics::record_saves("combined", "inserted", report.inserted as u64);
        if verbosity.summaries() {
            info!(
                batch_id = %report.batch_id,
                scopes = report.scopes,
                inserted = report.inserted,
                ghosts_removed = report.ghosts_removed,
                cascaded = report.cascaded,
                duplicates_dropped = report.duplicates_dropped,
                "Combined batch saved"
            );
        }
        Ok(report)
    }

    /// Raise the combined tier on every zone the sleeve covers, directly or
    /// through its clusters.
    async fn cascade_combined(&self, conn: &mut AnyConnection, sleeve: &CombinedSleeve) -> Result<u64, StoreError> {
        let verbosity = self.config.verbosity;
        let zones = cascade::covered_zones(conn, &keys(sleeve), verbosity).await?;
        cascade::raise(
            conn,
            ResolutionTier::Combined,
            &zones,
            sleeve.instance_id,
            self.config.batch_chunk_size,
            verbosity,
        )
        .await
    }
}

async fn count_ghosts(
    conn: &mut AnyConnection,
    scope: CombinedScope,
    incoming: &HashMap<BatchKey, usize>,
    verbosity: Verbosity,
) -> Result<u64, StoreError> {
    let existing = combined::by_scope(conn, scope, verbosity)
        .await
        .map_err(StoreError::persistence(ENTITY, "lookup"))?;
    let mut ghosts = 0;
    for sleeve in existing.iter().filter(|s| !incoming.contains_key(&batch_key(s))) {
        ghosts += 1;
        if verbosity.per_row() {
            debug!(scope = %scope, hash = ?sleeve.content_hash, row = ?sleeve.id, "Removing ghost combined sleeve");
        }
    }
    Ok(ghosts)
}
