//! `FedJobInfo`: one per active federated job.

use crate::identifiers::{ClusterId, FedJobId, SiblingMask, MAX_CLUSTERS};
use serde::{Deserialize, Serialize};

/// Window within which an in-flight `UPDATE` to a peer is considered live
/// for the purpose of blocking lock acquisition.
pub const UPDATE_STALE_SECONDS: i64 = 60;

/// In-memory metadata for one federated job, keyed by `FedJobId`.
///
/// `updating_sibs`/`updating_time` are indexed `[1..=MAX_CLUSTERS]`; index 0
/// is unused, matching the 1-based `ClusterId` space and the snapshot wire
/// layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FedJobInfo {
    pub job_id: FedJobId,
    /// `ClusterId | 0`; `None` means unlocked.
    pub cluster_lock: Option<ClusterId>,
    pub siblings_active: SiblingMask,
    pub siblings_viable: SiblingMask,
    #[serde(with = "updating_array")]
    pub updating_sibs: [u32; MAX_CLUSTERS + 1],
    #[serde(with = "updating_time_array")]
    pub updating_time: [Option<i64>; MAX_CLUSTERS + 1],
}

impl FedJobInfo {
    pub fn new(job_id: FedJobId) -> Self {
        Self {
            job_id,
            cluster_lock: None,
            siblings_active: SiblingMask::EMPTY,
            siblings_viable: SiblingMask::EMPTY,
            updating_sibs: [0; MAX_CLUSTERS + 1],
            updating_time: [None; MAX_CLUSTERS + 1],
        }
    }

    /// Origin cluster, derived from the job id.
    pub fn origin(&self) -> Result<ClusterId, crate::errors::FedCoreError> {
        self.job_id.origin()
    }

    /// Whether any peer has an update in flight within the staleness window,
    /// as checked by `Lock`. Stale entries (older than
    /// `UPDATE_STALE_SECONDS`) are treated as if cleared and do not count.
    pub fn has_pending_updates(&self, now: i64) -> bool {
        (1..=MAX_CLUSTERS).any(|i| {
            self.updating_sibs[i] > 0
                && self.updating_time[i]
                    .map(|t| now - t <= UPDATE_STALE_SECONDS)
                    .unwrap_or(false)
        })
    }

    /// Record that an update was just sent to `peer`.
    pub fn mark_update_sent(&mut self, peer: ClusterId, now: i64) {
        let idx = peer.get() as usize;
        self.updating_sibs[idx] += 1;
        self.updating_time[idx] = Some(now);
    }

    /// Decrement the in-flight update counter for `peer`
    /// (`UPDATE_RESPONSE` handler).
    pub fn ack_update(&mut self, peer: ClusterId) {
        let idx = peer.get() as usize;
        self.updating_sibs[idx] = self.updating_sibs[idx].saturating_sub(1);
    }

    /// True when the local peer holds an active copy but someone else holds
    /// the lock — the origin's "tracker job" kept alive for status/forwarding.
    pub fn is_tracker_only(&self, local: ClusterId) -> bool {
        self.siblings_active.contains(local)
            && self.cluster_lock.map(|l| l != local).unwrap_or(false)
    }

    /// Whether `hold_code` matches the `REQUEUE_FED` hold-code table used by
    /// both `COMPLETE` and `Revoke` to decide whether to finalize a requeue
    /// instead of a plain revoke.
    pub fn matches_requeue_hold(hold_code: RequeueHold) -> bool {
        matches!(hold_code, RequeueHold::RequeueFed)
    }
}

/// Hold-code classification consulted by `matches_requeue_hold`. The
/// original source tests a specific job-state hold bit
/// (`JOB_REQUEUE_FED`); we model it as an enum rather than threading the
/// scheduler's raw state bits through this crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequeueHold {
    RequeueFed,
    Other,
}

// Serde helpers: arrays longer than 32 elements aren't natively supported by
// `serde_derive` without a crate like `serde-big-array`; since we already
// hand-roll the external wire format in `snapshot.rs`, we do the same here
// with a thin `Vec`-backed bridge rather than pulling in another dependency.
mod updating_array {
    use super::MAX_CLUSTERS;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(
        arr: &[u32; MAX_CLUSTERS + 1],
        s: S,
    ) -> Result<S::Ok, S::Error> {
        arr.to_vec().serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        d: D,
    ) -> Result<[u32; MAX_CLUSTERS + 1], D::Error> {
        let v = Vec::<u32>::deserialize(d)?;
        let mut arr = [0u32; MAX_CLUSTERS + 1];
        let n = v.len().min(arr.len());
        arr[..n].copy_from_slice(&v[..n]);
        Ok(arr)
    }
}

mod updating_time_array {
    use super::MAX_CLUSTERS;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(
        arr: &[Option<i64>; MAX_CLUSTERS + 1],
        s: S,
    ) -> Result<S::Ok, S::Error> {
        arr.to_vec().serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        d: D,
    ) -> Result<[Option<i64>; MAX_CLUSTERS + 1], D::Error> {
        let v = Vec::<Option<i64>>::deserialize(d)?;
        let mut arr = [None; MAX_CLUSTERS + 1];
        let n = v.len().min(arr.len());
        arr[..n].copy_from_slice(&v[..n]);
        Ok(arr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(local: u32, origin: u32) -> FedJobInfo {
        let origin = ClusterId::new(origin).unwrap();
        FedJobInfo::new(FedJobId::new(origin, local).unwrap())
    }

    #[test]
    fn pending_updates_respects_staleness_window() {
        let mut j = job(1, 1);
        let peer = ClusterId::new(2).unwrap();
        j.mark_update_sent(peer, 1_000);
        assert!(j.has_pending_updates(1_000));
        assert!(j.has_pending_updates(1_059));
        assert!(!j.has_pending_updates(1_061));
    }

    #[test]
    fn ack_update_decrements_without_underflow() {
        let mut j = job(1, 1);
        let peer = ClusterId::new(2).unwrap();
        j.ack_update(peer);
        assert_eq!(j.updating_sibs[2], 0);
        j.mark_update_sent(peer, 10);
        j.ack_update(peer);
        j.ack_update(peer);
        assert_eq!(j.updating_sibs[2], 0);
    }

    #[test]
    fn tracker_only_job_detection() {
        let mut j = job(1, 1);
        let origin = ClusterId::new(1).unwrap();
        let other = ClusterId::new(2).unwrap();
        j.siblings_active = SiblingMask::single(origin);
        j.cluster_lock = Some(other);
        assert!(j.is_tracker_only(origin));
        assert!(!j.is_tracker_only(other));
    }
}
