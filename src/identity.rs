// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Content-derived identities for clash zones, clusters and combined sleeves.
//!
//! Host instance ids change every detection run, so every persisted record
//! that must be found again on the next run is keyed by a hash of what it
//! *is* rather than what the host called it:
//!
//! ```text
//! ClashZone      = H( round(x) | round(y) | round(z) | mep_id | host_id )  → UUID
//! ClusterSleeve  = H( sort(zone_guid...) joined by "|" )                 → UUID
//! CombinedSleeve = H( sort("I:<guid>" | "C:<instance>"...) joined by "|") → 256-bit hash
//! ```
//!
//! All functions are pure. An empty constituent set has **no identity**:
//! callers get `None` and must fall back to instance-id keying. A value is
//! never fabricated for the empty set.

use crate::model::Point3;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Separator between canonical members before hashing.
const JOIN: &str = "|";

/// 256-bit content hash identifying a combined sleeve.
///
/// Persisted as 64 lowercase hex chars.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse the 64-char hex form.
    pub fn from_hex(s: &str) -> Result<Self, IdentityParseError> {
        let bytes = hex::decode(s.trim()).map_err(|_| IdentityParseError::Hash(s.to_string()))?;
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| IdentityParseError::Hash(s.to_string()))?;
        Ok(Self(arr))
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", &self.to_hex()[..12])
    }
}

impl From<ContentHash> for String {
    fn from(h: ContentHash) -> Self {
        h.to_hex()
    }
}

impl TryFrom<String> for ContentHash {
    type Error = IdentityParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::from_hex(&s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentityParseError {
    #[error("invalid content hash '{0}'")]
    Hash(String),
    #[error("invalid constituent key '{0}'")]
    Key(String),
}

/// How a cluster is referenced from a combined sleeve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ClusterRef {
    /// Host instance id of the placed cluster sleeve. Stable for the session.
    Instance(i64),
    /// Row id of the cluster record. Used only while the cluster has no
    /// instance id; not stable across runs.
    Row(i64),
}

/// One member of a combined sleeve, in the form that feeds its identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ConstituentKey {
    Individual(Uuid),
    Cluster(ClusterRef),
}

impl ConstituentKey {
    /// Reference a cluster by instance id, falling back to its row id.
    ///
    /// Returns `None` when neither id is usable.
    #[must_use]
    pub fn cluster(instance_id: i64, row_id: Option<i64>) -> Option<Self> {
        if instance_id > 0 {
            return Some(Self::Cluster(ClusterRef::Instance(instance_id)));
        }
        row_id
            .filter(|id| *id > 0)
            .map(|id| Self::Cluster(ClusterRef::Row(id)))
    }

    /// Canonical string: `I:<guid>`, `C:<instance>` or `C:row:<id>`.
    #[must_use]
    pub fn canonical(&self) -> String {
        match self {
            Self::Individual(guid) => format!("I:{}", guid),
            Self::Cluster(ClusterRef::Instance(id)) => format!("C:{}", id),
            Self::Cluster(ClusterRef::Row(id)) => format!("C:row:{}", id),
        }
    }

    #[must_use]
    pub fn is_individual(&self) -> bool {
        matches!(self, Self::Individual(_))
    }

    /// True when the key depends on a row id and therefore won't survive a rerun.
    #[must_use]
    pub fn is_unstable(&self) -> bool {
        matches!(self, Self::Cluster(ClusterRef::Row(_)))
    }
}

impl fmt::Display for ConstituentKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

impl FromStr for ConstituentKey {
    type Err = IdentityParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || IdentityParseError::Key(s.to_string());
        let s = s.trim();
        if let Some(rest) = s.strip_prefix("I:") {
            return Uuid::parse_str(rest).map(Self::Individual).map_err(|_| bad());
        }
        if let Some(rest) = s.strip_prefix("C:row:") {
            return rest
                .parse::<i64>()
                .map(|id| Self::Cluster(ClusterRef::Row(id)))
                .map_err(|_| bad());
        }
        if let Some(rest) = s.strip_prefix("C:") {
            return rest
                .parse::<i64>()
                .map(|id| Self::Cluster(ClusterRef::Instance(id)))
                .map_err(|_| bad());
        }
        Err(bad())
    }
}

/// Hash a set of canonical members. Sorting and dedup come from the BTreeSet.
fn canonical_digest(members: &BTreeSet<String>) -> Option<[u8; 32]> {
    if members.is_empty() {
        return None;
    }
    let mut hasher = Sha256::new();
    for (i, member) in members.iter().enumerate() {
        if i > 0 {
            hasher.update(JOIN.as_bytes());
        }
        hasher.update(member.as_bytes());
    }
    Some(hasher.finalize().into())
}

fn uuid_from_digest(digest: [u8; 32]) -> Uuid {
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&digest[..16]);
    Uuid::from_bytes(bytes)
}

/// Identity of a cluster from its constituent clash zone GUIDs.
///
/// Order and duplicates in the input don't matter.
///
/// ```
/// use sleeve_engine::identity::cluster_identity;
/// use uuid::Uuid;
///
/// let a = Uuid::from_u128(1);
/// let b = Uuid::from_u128(2);
/// assert_eq!(cluster_identity(&[a, b]), cluster_identity(&[b, a, a]));
/// assert_eq!(cluster_identity(&[]), None);
/// ```
#[must_use]
pub fn cluster_identity<'a, I>(ids: I) -> Option<Uuid>
where
    I: IntoIterator<Item = &'a Uuid>,
{
    let members: BTreeSet<String> = ids.into_iter().map(Uuid::to_string).collect();
    canonical_digest(&members).map(uuid_from_digest)
}

/// Identity of a combined sleeve from its constituent keys.
#[must_use]
pub fn combined_identity<'a, I>(keys: I) -> Option<ContentHash>
where
    I: IntoIterator<Item = &'a ConstituentKey>,
{
    let members: BTreeSet<String> = keys.into_iter().map(ConstituentKey::canonical).collect();
    canonical_digest(&members).map(ContentHash)
}

/// Round a coordinate for hashing. Negative zero collapses to zero so that
/// `-0.0001` and `0.0001` land on the same key.
fn rounded(value: f64, digits: u32) -> String {
    let scale = 10f64.powi(digits as i32);
    let mut r = (value * scale).round() / scale;
    if r == 0.0 {
        r = 0.0;
    }
    format!("{:.*}", digits as usize, r)
}

/// Stable GUID of a clash zone.
///
/// Two detections of the same MEP/host pair at the same (rounded) point
/// produce the same GUID whatever instance ids the host assigned.
#[must_use]
pub fn clash_zone_guid(point: Point3, mep_element_id: i64, host_element_id: i64, digits: u32) -> Uuid {
    let key = format!(
        "{}|{}|{}|{}|{}",
        rounded(point.x, digits),
        rounded(point.y, digits),
        rounded(point.z, digits),
        mep_element_id,
        host_element_id
    );
    let digest: [u8; 32] = Sha256::digest(key.as_bytes()).into();
    uuid_from_digest(digest)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn g(n: u128) -> Uuid {
        Uuid::from_u128(n)
    }

    #[test]
    fn test_empty_sets_have_no_identity() {
        assert_eq!(cluster_identity(&[]), None);
        assert_eq!(combined_identity(&[]), None);
    }

    #[test]
    fn test_cluster_identity_order_independent() {
        let forward = cluster_identity(&[g(1), g(2), g(3)]);
        let backward = cluster_identity(&[g(3), g(2), g(1)]);
        assert!(forward.is_some());
        assert_eq!(forward, backward);
    }

    #[test]
    fn test_cluster_identity_sensitive_to_membership() {
        let abc = cluster_identity(&[g(1), g(2), g(3)]);
        let ab = cluster_identity(&[g(1), g(2)]);
        let abcd = cluster_identity(&[g(1), g(2), g(3), g(4)]);
        assert_ne!(abc, ab);
        assert_ne!(abc, abcd);
    }

    #[test]
    fn test_cluster_identity_ignores_duplicates() {
        assert_eq!(
            cluster_identity(&[g(7), g(8)]),
            cluster_identity(&[g(8), g(7), g(7), g(8)])
        );
    }

    #[test]
    fn test_combined_identity_distinguishes_types() {
        // "I:" and "C:" prefixes keep an individual and a cluster apart
        let individual = ConstituentKey::Individual(g(5));
        let cluster = ConstituentKey::Cluster(ClusterRef::Instance(5));
        assert_ne!(combined_identity(&[individual]), combined_identity(&[cluster]));
    }

    #[test]
    fn test_combined_identity_order_independent() {
        let keys = [
            ConstituentKey::Individual(g(1)),
            ConstituentKey::Cluster(ClusterRef::Instance(42)),
            ConstituentKey::Individual(g(9)),
        ];
        let mut reversed = keys;
        reversed.reverse();
        assert_eq!(combined_identity(&keys), combined_identity(&reversed));
    }

    #[test]
    fn test_cluster_key_fallback() {
        assert_eq!(
            ConstituentKey::cluster(12, Some(3)),
            Some(ConstituentKey::Cluster(ClusterRef::Instance(12)))
        );
        assert_eq!(
            ConstituentKey::cluster(-1, Some(3)),
            Some(ConstituentKey::Cluster(ClusterRef::Row(3)))
        );
        assert_eq!(ConstituentKey::cluster(-1, None), None);
        assert!(ConstituentKey::cluster(-1, Some(3)).unwrap().is_unstable());
    }

    #[test]
    fn test_row_and_instance_keys_never_collide() {
        let by_instance = ConstituentKey::Cluster(ClusterRef::Instance(3));
        let by_row = ConstituentKey::Cluster(ClusterRef::Row(3));
        assert_ne!(by_instance.canonical(), by_row.canonical());
    }

    #[test]
    fn test_constituent_key_parse() {
        for key in [
            ConstituentKey::Individual(g(77)),
            ConstituentKey::Cluster(ClusterRef::Instance(1001)),
            ConstituentKey::Cluster(ClusterRef::Row(4)),
        ] {
            assert_eq!(key.canonical().parse::<ConstituentKey>().unwrap(), key);
        }
        assert!("X:12".parse::<ConstituentKey>().is_err());
        assert!("I:not-a-guid".parse::<ConstituentKey>().is_err());
    }

    #[test]
    fn test_content_hash_hex() {
        let hash = combined_identity(&[ConstituentKey::Individual(g(1))]).unwrap();
        let hex = hash.to_hex();
        assert_eq!(hex.len(), 64);
        assert_eq!(ContentHash::from_hex(&hex).unwrap(), hash);
        assert!(ContentHash::from_hex("abc").is_err());
    }

    #[test]
    fn test_clash_zone_guid_rounding() {
        let a = clash_zone_guid(Point3::new(1.00004, 2.0, 3.0), 10, 20, 3);
        let b = clash_zone_guid(Point3::new(1.0, 2.00001, 3.0), 10, 20, 3);
        assert_eq!(a, b);

        let moved = clash_zone_guid(Point3::new(1.01, 2.0, 3.0), 10, 20, 3);
        assert_ne!(a, moved);
    }

    #[test]
    fn test_clash_zone_guid_negative_zero() {
        let a = clash_zone_guid(Point3::new(-0.0001, 0.0, 0.0), 1, 2, 3);
        let b = clash_zone_guid(Point3::new(0.0001, 0.0, 0.0), 1, 2, 3);
        assert_eq!(a, b);
    }

    #[test]
    fn test_clash_zone_guid_depends_on_elements() {
        let p = Point3::new(5.0, 5.0, 5.0);
        assert_ne!(clash_zone_guid(p, 1, 2, 3), clash_zone_guid(p, 2, 1, 3));
    }
}
