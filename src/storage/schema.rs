// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Table definitions for both backends.
//!
//! ```text
//! clash_zones ◄──(content guid)── cluster_sleeves.constituent_guids_json
//!      ▲                                   ▲
//!      │ clash_zone_guid                   │ cluster_instance_id / cluster_sleeve_id
//! combined_sleeve_constituents ──► combined_sleeves
//!
//! category_processing_markers      sleeve_snapshots
//! ```
//!
//! JSON columns are TEXT/LONGTEXT rather than native JSON because the sqlx
//! `Any` driver has no JSON type mapping. Booleans are integers.
//! Child constituent rows are deleted explicitly before their parent; SQLite
//! foreign keys are off by default so no cascade is relied on.

pub(crate) const SQLITE: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS clash_zones (
        content_guid TEXT PRIMARY KEY,
        mep_category TEXT NOT NULL,
        mep_element_id INTEGER NOT NULL DEFAULT 0,
        host_element_id INTEGER NOT NULL DEFAULT 0,
        point_x REAL NOT NULL DEFAULT 0,
        point_y REAL NOT NULL DEFAULT 0,
        point_z REAL NOT NULL DEFAULT 0,
        is_resolved INTEGER NOT NULL DEFAULT 0,
        is_cluster_resolved INTEGER NOT NULL DEFAULT 0,
        is_combined_resolved INTEGER NOT NULL DEFAULT 0,
        is_current_clash INTEGER NOT NULL DEFAULT 1,
        sleeve_instance_id INTEGER NOT NULL DEFAULT -1,
        cluster_instance_id INTEGER NOT NULL DEFAULT -1,
        combined_instance_id INTEGER NOT NULL DEFAULT -1,
        c1_x REAL NOT NULL DEFAULT 0, c1_y REAL NOT NULL DEFAULT 0, c1_z REAL NOT NULL DEFAULT 0,
        c2_x REAL NOT NULL DEFAULT 0, c2_y REAL NOT NULL DEFAULT 0, c2_z REAL NOT NULL DEFAULT 0,
        c3_x REAL NOT NULL DEFAULT 0, c3_y REAL NOT NULL DEFAULT 0, c3_z REAL NOT NULL DEFAULT 0,
        c4_x REAL NOT NULL DEFAULT 0, c4_y REAL NOT NULL DEFAULT 0, c4_z REAL NOT NULL DEFAULT 0,
        width REAL NOT NULL DEFAULT 0,
        height REAL NOT NULL DEFAULT 0,
        diameter REAL NOT NULL DEFAULT 0,
        rotation REAL NOT NULL DEFAULT 0,
        created_at INTEGER NOT NULL DEFAULT 0,
        updated_at INTEGER NOT NULL DEFAULT 0
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_clash_zones_category ON clash_zones(mep_category)",
    "CREATE INDEX IF NOT EXISTS idx_clash_zones_sleeve ON clash_zones(sleeve_instance_id)",
    "CREATE INDEX IF NOT EXISTS idx_clash_zones_cluster ON clash_zones(cluster_instance_id)",
    r#"
    CREATE TABLE IF NOT EXISTS cluster_sleeves (
        cluster_sleeve_id INTEGER PRIMARY KEY AUTOINCREMENT,
        cluster_instance_id INTEGER NOT NULL DEFAULT -1,
        content_guid TEXT UNIQUE,
        combo_id INTEGER NOT NULL,
        filter_id INTEGER NOT NULL,
        category TEXT NOT NULL,
        bbox_min_x REAL NOT NULL DEFAULT 0, bbox_min_y REAL NOT NULL DEFAULT 0, bbox_min_z REAL NOT NULL DEFAULT 0,
        bbox_max_x REAL NOT NULL DEFAULT 0, bbox_max_y REAL NOT NULL DEFAULT 0, bbox_max_z REAL NOT NULL DEFAULT 0,
        width REAL NOT NULL DEFAULT 0,
        height REAL NOT NULL DEFAULT 0,
        depth REAL NOT NULL DEFAULT 0,
        rotation REAL NOT NULL DEFAULT 0,
        is_rotated INTEGER NOT NULL DEFAULT 0,
        placement_x REAL NOT NULL DEFAULT 0, placement_y REAL NOT NULL DEFAULT 0, placement_z REAL NOT NULL DEFAULT 0,
        c1_x REAL NOT NULL DEFAULT 0, c1_y REAL NOT NULL DEFAULT 0, c1_z REAL NOT NULL DEFAULT 0,
        c2_x REAL NOT NULL DEFAULT 0, c2_y REAL NOT NULL DEFAULT 0, c2_z REAL NOT NULL DEFAULT 0,
        c3_x REAL NOT NULL DEFAULT 0, c3_y REAL NOT NULL DEFAULT 0, c3_z REAL NOT NULL DEFAULT 0,
        c4_x REAL NOT NULL DEFAULT 0, c4_y REAL NOT NULL DEFAULT 0, c4_z REAL NOT NULL DEFAULT 0,
        constituent_guids_json TEXT NOT NULL DEFAULT '[]',
        created_at INTEGER NOT NULL DEFAULT 0,
        updated_at INTEGER NOT NULL DEFAULT 0
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_cluster_scope ON cluster_sleeves(combo_id, filter_id, category)",
    "CREATE INDEX IF NOT EXISTS idx_cluster_instance ON cluster_sleeves(cluster_instance_id)",
    r#"
    CREATE TABLE IF NOT EXISTS combined_sleeves (
        combined_sleeve_id INTEGER PRIMARY KEY AUTOINCREMENT,
        combined_instance_id INTEGER NOT NULL DEFAULT -1,
        content_hash TEXT UNIQUE,
        combo_id INTEGER NOT NULL,
        filter_id INTEGER NOT NULL,
        categories TEXT NOT NULL DEFAULT '',
        bbox_min_x REAL NOT NULL DEFAULT 0, bbox_min_y REAL NOT NULL DEFAULT 0, bbox_min_z REAL NOT NULL DEFAULT 0,
        bbox_max_x REAL NOT NULL DEFAULT 0, bbox_max_y REAL NOT NULL DEFAULT 0, bbox_max_z REAL NOT NULL DEFAULT 0,
        width REAL NOT NULL DEFAULT 0,
        height REAL NOT NULL DEFAULT 0,
        depth REAL NOT NULL DEFAULT 0,
        rotation REAL NOT NULL DEFAULT 0,
        is_rotated INTEGER NOT NULL DEFAULT 0,
        placement_x REAL NOT NULL DEFAULT 0, placement_y REAL NOT NULL DEFAULT 0, placement_z REAL NOT NULL DEFAULT 0,
        c1_x REAL NOT NULL DEFAULT 0, c1_y REAL NOT NULL DEFAULT 0, c1_z REAL NOT NULL DEFAULT 0,
        c2_x REAL NOT NULL DEFAULT 0, c2_y REAL NOT NULL DEFAULT 0, c2_z REAL NOT NULL DEFAULT 0,
        c3_x REAL NOT NULL DEFAULT 0, c3_y REAL NOT NULL DEFAULT 0, c3_z REAL NOT NULL DEFAULT 0,
        c4_x REAL NOT NULL DEFAULT 0, c4_y REAL NOT NULL DEFAULT 0, c4_z REAL NOT NULL DEFAULT 0,
        created_at INTEGER NOT NULL DEFAULT 0,
        updated_at INTEGER NOT NULL DEFAULT 0
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_combined_scope ON combined_sleeves(combo_id, filter_id)",
    r#"
    CREATE TABLE IF NOT EXISTS combined_sleeve_constituents (
        constituent_id INTEGER PRIMARY KEY AUTOINCREMENT,
        combined_sleeve_id INTEGER NOT NULL REFERENCES combined_sleeves(combined_sleeve_id),
        constituent_type TEXT NOT NULL,
        category TEXT NOT NULL DEFAULT '',
        clash_zone_guid TEXT,
        cluster_instance_id INTEGER,
        cluster_sleeve_id INTEGER
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_constituents_owner ON combined_sleeve_constituents(combined_sleeve_id)",
    r#"
    CREATE TABLE IF NOT EXISTS category_processing_markers (
        category TEXT PRIMARY KEY,
        last_processed_count INTEGER NOT NULL DEFAULT 0,
        last_processed_ids_sample TEXT,
        marked_at INTEGER NOT NULL DEFAULT 0,
        updated_at INTEGER NOT NULL DEFAULT 0
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS sleeve_snapshots (
        snapshot_id INTEGER PRIMARY KEY AUTOINCREMENT,
        sleeve_instance_id INTEGER,
        cluster_instance_id INTEGER,
        combined_instance_id INTEGER,
        clash_zone_guid TEXT,
        mep_parameters_json TEXT,
        host_parameters_json TEXT,
        source_doc_keys_json TEXT,
        mep_element_ids_json TEXT,
        host_element_ids_json TEXT,
        constituent_refs_json TEXT,
        captured_at INTEGER NOT NULL DEFAULT 0
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_snapshots_guid ON sleeve_snapshots(clash_zone_guid)",
];

pub(crate) const MYSQL: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS clash_zones (
        content_guid VARCHAR(36) PRIMARY KEY,
        mep_category VARCHAR(255) NOT NULL,
        mep_element_id BIGINT NOT NULL DEFAULT 0,
        host_element_id BIGINT NOT NULL DEFAULT 0,
        point_x DOUBLE NOT NULL DEFAULT 0,
        point_y DOUBLE NOT NULL DEFAULT 0,
        point_z DOUBLE NOT NULL DEFAULT 0,
        is_resolved TINYINT NOT NULL DEFAULT 0,
        is_cluster_resolved TINYINT NOT NULL DEFAULT 0,
        is_combined_resolved TINYINT NOT NULL DEFAULT 0,
        is_current_clash TINYINT NOT NULL DEFAULT 1,
        sleeve_instance_id BIGINT NOT NULL DEFAULT -1,
        cluster_instance_id BIGINT NOT NULL DEFAULT -1,
        combined_instance_id BIGINT NOT NULL DEFAULT -1,
        c1_x DOUBLE NOT NULL DEFAULT 0, c1_y DOUBLE NOT NULL DEFAULT 0, c1_z DOUBLE NOT NULL DEFAULT 0,
        c2_x DOUBLE NOT NULL DEFAULT 0, c2_y DOUBLE NOT NULL DEFAULT 0, c2_z DOUBLE NOT NULL DEFAULT 0,
        c3_x DOUBLE NOT NULL DEFAULT 0, c3_y DOUBLE NOT NULL DEFAULT 0, c3_z DOUBLE NOT NULL DEFAULT 0,
        c4_x DOUBLE NOT NULL DEFAULT 0, c4_y DOUBLE NOT NULL DEFAULT 0, c4_z DOUBLE NOT NULL DEFAULT 0,
        width DOUBLE NOT NULL DEFAULT 0,
        height DOUBLE NOT NULL DEFAULT 0,
        diameter DOUBLE NOT NULL DEFAULT 0,
        rotation DOUBLE NOT NULL DEFAULT 0,
        created_at BIGINT NOT NULL DEFAULT 0,
        updated_at BIGINT NOT NULL DEFAULT 0,
        INDEX idx_clash_zones_category (mep_category),
        INDEX idx_clash_zones_sleeve (sleeve_instance_id),
        INDEX idx_clash_zones_cluster (cluster_instance_id)
    ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS cluster_sleeves (
        cluster_sleeve_id BIGINT PRIMARY KEY AUTO_INCREMENT,
        cluster_instance_id BIGINT NOT NULL DEFAULT -1,
        content_guid VARCHAR(36) UNIQUE,
        combo_id BIGINT NOT NULL,
        filter_id BIGINT NOT NULL,
        category VARCHAR(255) NOT NULL,
        bbox_min_x DOUBLE NOT NULL DEFAULT 0, bbox_min_y DOUBLE NOT NULL DEFAULT 0, bbox_min_z DOUBLE NOT NULL DEFAULT 0,
        bbox_max_x DOUBLE NOT NULL DEFAULT 0, bbox_max_y DOUBLE NOT NULL DEFAULT 0, bbox_max_z DOUBLE NOT NULL DEFAULT 0,
        width DOUBLE NOT NULL DEFAULT 0,
        height DOUBLE NOT NULL DEFAULT 0,
        depth DOUBLE NOT NULL DEFAULT 0,
        rotation DOUBLE NOT NULL DEFAULT 0,
        is_rotated TINYINT NOT NULL DEFAULT 0,
        placement_x DOUBLE NOT NULL DEFAULT 0, placement_y DOUBLE NOT NULL DEFAULT 0, placement_z DOUBLE NOT NULL DEFAULT 0,
        c1_x DOUBLE NOT NULL DEFAULT 0, c1_y DOUBLE NOT NULL DEFAULT 0, c1_z DOUBLE NOT NULL DEFAULT 0,
        c2_x DOUBLE NOT NULL DEFAULT 0, c2_y DOUBLE NOT NULL DEFAULT 0, c2_z DOUBLE NOT NULL DEFAULT 0,
        c3_x DOUBLE NOT NULL DEFAULT 0, c3_y DOUBLE NOT NULL DEFAULT 0, c3_z DOUBLE NOT NULL DEFAULT 0,
        c4_x DOUBLE NOT NULL DEFAULT 0, c4_y DOUBLE NOT NULL DEFAULT 0, c4_z DOUBLE NOT NULL DEFAULT 0,
        constituent_guids_json LONGTEXT NOT NULL,
        created_at BIGINT NOT NULL DEFAULT 0,
        updated_at BIGINT NOT NULL DEFAULT 0,
        INDEX idx_cluster_scope (combo_id, filter_id, category),
        INDEX idx_cluster_instance (cluster_instance_id)
    ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS combined_sleeves (
        combined_sleeve_id BIGINT PRIMARY KEY AUTO_INCREMENT,
        combined_instance_id BIGINT NOT NULL DEFAULT -1,
        content_hash VARCHAR(64) UNIQUE,
        combo_id BIGINT NOT NULL,
        filter_id BIGINT NOT NULL,
        categories TEXT NOT NULL,
        bbox_min_x DOUBLE NOT NULL DEFAULT 0, bbox_min_y DOUBLE NOT NULL DEFAULT 0, bbox_min_z DOUBLE NOT NULL DEFAULT 0,
        bbox_max_x DOUBLE NOT NULL DEFAULT 0, bbox_max_y DOUBLE NOT NULL DEFAULT 0, bbox_max_z DOUBLE NOT NULL DEFAULT 0,
        width DOUBLE NOT NULL DEFAULT 0,
        height DOUBLE NOT NULL DEFAULT 0,
        depth DOUBLE NOT NULL DEFAULT 0,
        rotation DOUBLE NOT NULL DEFAULT 0,
        is_rotated TINYINT NOT NULL DEFAULT 0,
        placement_x DOUBLE NOT NULL DEFAULT 0, placement_y DOUBLE NOT NULL DEFAULT 0, placement_z DOUBLE NOT NULL DEFAULT 0,
        c1_x DOUBLE NOT NULL DEFAULT 0, c1_y DOUBLE NOT NULL DEFAULT 0, c1_z DOUBLE NOT NULL DEFAULT 0,
        c2_x DOUBLE NOT NULL DEFAULT 0, c2_y DOUBLE NOT NULL DEFAULT 0, c2_z DOUBLE NOT NULL DEFAULT 0,
        c3_x DOUBLE NOT NULL DEFAULT 0, c3_y DOUBLE NOT NULL DEFAULT 0, c3_z DOUBLE NOT NULL DEFAULT 0,
        c4_x DOUBLE NOT NULL DEFAULT 0, c4_y DOUBLE NOT NULL DEFAULT 0, c4_z DOUBLE NOT NULL DEFAULT 0,
        created_at BIGINT NOT NULL DEFAULT 0,
        updated_at BIGINT NOT NULL DEFAULT 0,
        INDEX idx_combined_scope (combo_id, filter_id)
    ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS combined_sleeve_constituents (
        constituent_id BIGINT PRIMARY KEY AUTO_INCREMENT,
        combined_sleeve_id BIGINT NOT NULL,
        constituent_type VARCHAR(16) NOT NULL,
        category VARCHAR(255) NOT NULL DEFAULT '',
        clash_zone_guid VARCHAR(36),
        cluster_instance_id BIGINT,
        cluster_sleeve_id BIGINT,
        INDEX idx_constituents_owner (combined_sleeve_id),
        FOREIGN KEY (combined_sleeve_id) REFERENCES combined_sleeves(combined_sleeve_id)
    ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS category_processing_markers (
        category VARCHAR(255) PRIMARY KEY,
        last_processed_count BIGINT NOT NULL DEFAULT 0,
        last_processed_ids_sample TEXT,
        marked_at BIGINT NOT NULL DEFAULT 0,
        updated_at BIGINT NOT NULL DEFAULT 0
    ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS sleeve_snapshots (
        snapshot_id BIGINT PRIMARY KEY AUTO_INCREMENT,
        sleeve_instance_id BIGINT,
        cluster_instance_id BIGINT,
        combined_instance_id BIGINT,
        clash_zone_guid VARCHAR(36),
        mep_parameters_json LONGTEXT,
        host_parameters_json LONGTEXT,
        source_doc_keys_json LONGTEXT,
        mep_element_ids_json LONGTEXT,
        host_element_ids_json LONGTEXT,
        constituent_refs_json LONGTEXT,
        captured_at BIGINT NOT NULL DEFAULT 0,
        INDEX idx_snapshots_guid (clash_zone_guid)
    ) ENGINE=InnoDB DEFAULT CHARSET=utf8mb4
    "#,
];
