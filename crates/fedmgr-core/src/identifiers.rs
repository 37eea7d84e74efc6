//! `ClusterId`, `FedJobId`, and sibling-bitmask arithmetic.
//!
//! A federation has at most 63 peers, each assigned a dense 1-based
//! `ClusterId`; a job id packs `(ClusterId << 26) | LocalId`.

use crate::errors::FedCoreError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum number of peers in a federation. Bounded by the 64-bit sibling
/// bitmask (one bit per peer, 1-indexed) and by `FedJobId`'s 6 high bits.
pub const MAX_CLUSTERS: usize = 63;

/// `FedJobId`'s local-id field is 26 bits wide.
pub const LOCAL_ID_BITS: u32 = 26;
const LOCAL_ID_MASK: u32 = (1 << LOCAL_ID_BITS) - 1;

/// A 1-based, dense peer identifier in `1..=MAX_CLUSTERS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClusterId(u8);

impl ClusterId {
    /// Build a `ClusterId`, rejecting 0 and anything above `MAX_CLUSTERS`.
    pub fn new(id: u32) -> Result<Self, FedCoreError> {
        if id == 0 || id as usize > MAX_CLUSTERS {
            return Err(FedCoreError::ClusterIdOutOfRange(id));
        }
        Ok(Self(id as u8))
    }

    /// The raw 1-based integer.
    pub fn get(self) -> u8 {
        self.0
    }

    /// Zero-based bit position for this id within a `SiblingMask`.
    fn bit_index(self) -> u32 {
        (self.0 - 1) as u32
    }
}

impl fmt::Display for ClusterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<u32> for ClusterId {
    type Error = FedCoreError;
    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

/// `bit(peer) = 1u64 << (peer.id - 1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SiblingMask(pub u64);

impl SiblingMask {
    /// The empty mask.
    pub const EMPTY: SiblingMask = SiblingMask(0);

    /// A mask containing only `id`.
    pub fn single(id: ClusterId) -> Self {
        SiblingMask(1u64 << id.bit_index())
    }

    /// Build a mask from an iterator of ids.
    pub fn from_ids(ids: impl IntoIterator<Item = ClusterId>) -> Self {
        ids.into_iter().fold(SiblingMask::EMPTY, |acc, id| acc.with(id))
    }

    /// Mask with `id`'s bit set.
    pub fn with(self, id: ClusterId) -> Self {
        SiblingMask(self.0 | Self::single(id).0)
    }

    /// Mask with `id`'s bit cleared.
    pub fn without(self, id: ClusterId) -> Self {
        SiblingMask(self.0 & !Self::single(id).0)
    }

    /// Whether `id`'s bit is set.
    pub fn contains(self, id: ClusterId) -> bool {
        self.0 & Self::single(id).0 != 0
    }

    /// Whether no bits are set.
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Number of peers represented in the mask.
    pub fn len(self) -> u32 {
        self.0.count_ones()
    }

    /// Bitwise union.
    pub fn union(self, other: SiblingMask) -> SiblingMask {
        SiblingMask(self.0 | other.0)
    }

    /// Bitwise intersection.
    pub fn intersect(self, other: SiblingMask) -> SiblingMask {
        SiblingMask(self.0 & other.0)
    }

    /// Set difference: members of `self` not in `other`.
    pub fn difference(self, other: SiblingMask) -> SiblingMask {
        SiblingMask(self.0 & !other.0)
    }

    /// Iterate cluster ids ascending, as the revocation walk requires.
    pub fn iter_ascending(self) -> impl Iterator<Item = ClusterId> {
        let mask = self.0;
        (1..=MAX_CLUSTERS as u32).filter_map(move |i| {
            if mask & (1u64 << (i - 1)) != 0 {
                // `i` is always in `1..=MAX_CLUSTERS`, constructed from a valid bit position.
                Some(ClusterId(i as u8))
            } else {
                None
            }
        })
    }
}

/// `FedJobId = (ClusterId << 26) | LocalId`. The origin cluster is derivable
/// from the id alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FedJobId(u32);

impl FedJobId {
    /// Pack an origin cluster id and a locally-allocated id into a `FedJobId`.
    pub fn new(origin: ClusterId, local_id: u32) -> Result<Self, FedCoreError> {
        if local_id > LOCAL_ID_MASK {
            return Err(FedCoreError::LocalIdOverflow(local_id));
        }
        Ok(Self(((origin.get() as u32) << LOCAL_ID_BITS) | local_id))
    }

    /// Reinterpret a raw 32-bit value as a `FedJobId`. Used when decoding
    /// wire messages and snapshots, where the value is assumed already valid.
    pub fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// The raw 32-bit encoding.
    pub fn as_u32(self) -> u32 {
        self.0
    }

    /// `local = id & 0x03FFFFFF`.
    pub fn local_id(self) -> u32 {
        self.0 & LOCAL_ID_MASK
    }

    /// `cluster = id >> 26`. Does not validate the range; a
    /// `FedJobId` built through `new` always carries a valid `ClusterId`.
    pub fn origin_raw(self) -> u32 {
        self.0 >> LOCAL_ID_BITS
    }

    /// The origin cluster, re-validated against `1..=MAX_CLUSTERS`.
    pub fn origin(self) -> Result<ClusterId, FedCoreError> {
        ClusterId::new(self.origin_raw())
    }
}

impl fmt::Display for FedJobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cluster_id_rejects_zero_and_overflow() {
        assert!(ClusterId::new(0).is_err());
        assert!(ClusterId::new(64).is_err());
        assert!(ClusterId::new(63).is_ok());
    }

    #[test]
    fn fed_job_id_roundtrip() {
        let a = ClusterId::new(1).unwrap();
        let id = FedJobId::new(a, 5).unwrap();
        assert_eq!(id.origin().unwrap(), a);
        assert_eq!(id.local_id(), 5);
        assert_eq!(id.as_u32(), (1u32 << 26) | 5);
    }

    #[test]
    fn fed_job_id_rejects_local_id_overflow() {
        let a = ClusterId::new(1).unwrap();
        assert!(FedJobId::new(a, 1 << 26).is_err());
        assert!(FedJobId::new(a, (1 << 26) - 1).is_ok());
    }

    #[test]
    fn sibling_mask_bit_layout() {
        let c1 = ClusterId::new(1).unwrap();
        let c2 = ClusterId::new(2).unwrap();
        let c63 = ClusterId::new(63).unwrap();
        assert_eq!(SiblingMask::single(c1).0, 1);
        assert_eq!(SiblingMask::single(c2).0, 2);
        assert_eq!(SiblingMask::single(c63).0, 1u64 << 62);
    }

    #[test]
    fn sibling_mask_set_ops() {
        let c1 = ClusterId::new(1).unwrap();
        let c2 = ClusterId::new(2).unwrap();
        let c3 = ClusterId::new(3).unwrap();
        let a = SiblingMask::from_ids([c1, c2]);
        let b = SiblingMask::from_ids([c2, c3]);
        assert_eq!(a.union(b), SiblingMask::from_ids([c1, c2, c3]));
        assert_eq!(a.intersect(b), SiblingMask::single(c2));
        assert_eq!(a.difference(b), SiblingMask::single(c1));
        assert!(!a.is_empty());
        assert!(SiblingMask::EMPTY.is_empty());
    }

    #[test]
    fn sibling_mask_ascending_iteration() {
        let c1 = ClusterId::new(1).unwrap();
        let c5 = ClusterId::new(5).unwrap();
        let c3 = ClusterId::new(3).unwrap();
        let mask = SiblingMask::from_ids([c5, c1, c3]);
        let ids: Vec<u8> = mask.iter_ascending().map(|c| c.get()).collect();
        assert_eq!(ids, vec![1, 3, 5]);
    }
}
