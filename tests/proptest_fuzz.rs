//! Property-based tests for content identities.
//!
//! Identities must depend only on the *set* of constituents: never on their
//! order, never on repeats, and must change when the set changes.
//!
//! Run with: `cargo test --test proptest_fuzz`

use proptest::prelude::*;
use uuid::Uuid;

use sleeve_engine::{
    clash_zone_guid, cluster_identity, combined_identity, ClusterRef, ClusterSleeve, CombinedConstituent,
    CombinedScope, CombinedSleeve, ConstituentKey, ContentHash, Point3, ScopeKey,
};

// =============================================================================
// Strategies
// =============================================================================

fn uuid_strategy() -> impl Strategy<Value = Uuid> {
    any::<u128>().prop_map(Uuid::from_u128)
}

fn key_strategy() -> impl Strategy<Value = ConstituentKey> {
    prop_oneof![
        uuid_strategy().prop_map(ConstituentKey::Individual),
        (1i64..1_000_000).prop_map(|id| ConstituentKey::Cluster(ClusterRef::Instance(id))),
        (1i64..1_000_000).prop_map(|id| ConstituentKey::Cluster(ClusterRef::Row(id))),
    ]
}

fn coordinate() -> impl Strategy<Value = f64> {
    -10_000.0f64..10_000.0
}

// =============================================================================
// Cluster identity
// =============================================================================

proptest! {
    #[test]
    fn cluster_identity_ignores_order(ids in prop::collection::vec(uuid_strategy(), 1..20), seed in any::<u64>()) {
        let mut shuffled = ids.clone();
        let len = shuffled.len();
        shuffled.rotate_left((seed as usize) % len);
        shuffled.reverse();

        prop_assert_eq!(cluster_identity(&ids), cluster_identity(&shuffled));
    }

    #[test]
    fn cluster_identity_ignores_repeats(ids in prop::collection::vec(uuid_strategy(), 1..20)) {
        let mut doubled = ids.clone();
        doubled.extend(ids.iter().copied());

        prop_assert_eq!(cluster_identity(&ids), cluster_identity(&doubled));
    }

    #[test]
    fn cluster_identity_changes_with_membership(ids in prop::collection::vec(uuid_strategy(), 1..20), extra in uuid_strategy()) {
        prop_assume!(!ids.contains(&extra));
        let mut grown = ids.clone();
        grown.push(extra);

        prop_assert_ne!(cluster_identity(&ids), cluster_identity(&grown));
    }

    #[test]
    fn cluster_new_matches_free_function(ids in prop::collection::vec(uuid_strategy(), 0..20)) {
        let cluster = ClusterSleeve::new(ScopeKey::new(1, 1, "Pipes"), ids.clone());
        prop_assert_eq!(cluster.content_guid, cluster_identity(&ids));
        prop_assert!(cluster.constituents.windows(2).all(|w| w[0] < w[1]));
    }
}

// =============================================================================
// Combined identity
// =============================================================================

proptest! {
    #[test]
    fn combined_identity_ignores_order(keys in prop::collection::vec(key_strategy(), 1..20)) {
        let mut reversed = keys.clone();
        reversed.reverse();

        prop_assert_eq!(combined_identity(&keys), combined_identity(&reversed));
    }

    #[test]
    fn combined_identity_changes_with_membership(keys in prop::collection::vec(key_strategy(), 1..20), extra in key_strategy()) {
        prop_assume!(!keys.contains(&extra));
        let mut grown = keys.clone();
        grown.push(extra);

        prop_assert_ne!(combined_identity(&keys), combined_identity(&grown));
    }

    #[test]
    fn combined_sleeve_drops_repeated_constituents(keys in prop::collection::vec(key_strategy(), 1..10)) {
        let mut constituents: Vec<CombinedConstituent> = keys
            .iter()
            .map(|k| CombinedConstituent { key: *k, category: "Pipes".into() })
            .collect();
        constituents.extend(constituents.clone());

        let sleeve = CombinedSleeve::new(CombinedScope::new(1, 1), constituents);
        prop_assert_eq!(sleeve.content_hash, combined_identity(&keys));
        prop_assert_eq!(sleeve.categories.clone(), vec!["Pipes".to_string()]);
    }

    #[test]
    fn constituent_key_parses_its_canonical_form(key in key_strategy()) {
        let parsed: ConstituentKey = key.canonical().parse().unwrap();
        prop_assert_eq!(parsed, key);
    }

    #[test]
    fn content_hash_parse_never_panics(s in ".*") {
        let _ = ContentHash::from_hex(&s);
    }

    #[test]
    fn constituent_key_parse_never_panics(s in ".*") {
        let _ = s.parse::<ConstituentKey>();
    }
}

// =============================================================================
// Clash zone GUID
// =============================================================================

proptest! {
    #[test]
    fn zone_guid_absorbs_sub_rounding_jitter(
        x in coordinate(), y in coordinate(), z in coordinate(),
        mep in 1i64..1_000_000, host in 1i64..1_000_000,
    ) {
        // Snap to the grid centre so jitter can't cross a rounding boundary.
        let snap = |v: f64| (v * 1000.0).round() / 1000.0;
        let base = Point3::new(snap(x), snap(y), snap(z));
        let jittered = Point3::new(base.x + 0.0001, base.y - 0.0001, base.z + 0.0002);

        prop_assert_eq!(
            clash_zone_guid(base, mep, host, 3),
            clash_zone_guid(jittered, mep, host, 3)
        );
    }

    #[test]
    fn zone_guid_separates_element_pairs(
        x in coordinate(), y in coordinate(), z in coordinate(),
        mep in 1i64..1_000_000, host in 1i64..1_000_000,
    ) {
        let point = Point3::new(x, y, z);
        prop_assert_ne!(
            clash_zone_guid(point, mep, host, 3),
            clash_zone_guid(point, mep + 1, host, 3)
        );
    }
}
