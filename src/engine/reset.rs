use super::types::RedetectionReport;
use super::SleeveEngine;
use crate::storage::traits::StoreError;
use crate::storage::{clash_zones, clusters, combined};
use tracing::{info, instrument, warn};

impl SleeveEngine {
    /// Forget every resolution decision for `category` (or every category)
    /// so the next pass detects from scratch.
    ///
    /// Flags and instance links are cleared and the cluster and combined rows
    /// are deleted in one transaction. Markers are reset after the commit.
    #[instrument(skip(self))]
    pub async fn force_redetection(&self, category: Option<&str>) -> Result<RedetectionReport, StoreError> {
        let verbosity = self.config.verbosity;
        let mut tx = self.store.begin().await?;
        let result = async {
            let conn = tx.conn();
            let zones_reset = clash_zones::reset(conn, category).await?;
            let (clusters_removed, combined_removed) = match category {
                Some(category) => (
                    clusters::delete_category(conn, category).await?,
                    combined::delete_category(conn, category, verbosity).await?,
                ),
                None => (clusters::delete_all(conn).await?, combined::delete_all(conn).await?),
            };
            Ok::<_, StoreError>(RedetectionReport { zones_reset, clusters_removed, combined_removed, markers_reset: false })
        }
        .await;
        let mut report = self.finish(tx, result, "ClashZone", "force_redetection").await?;

        report.markers_reset = match category {
            Some(category) => self.markers.reset_marker(category).await,
            None => self.markers.reset_all_markers().await,
        };
        if !report.markers_reset {
            warn!(category = ?category, "Records reset but markers were not");
        }

        info!(
            category = category.unwrap_or("*"),
            zones_reset = report.zones_reset,
            clusters_removed = report.clusters_removed,
            combined_removed = report.combined_removed,
            "Re-detection forced"
        );
        Ok(report)
    }
}
