//! Binary codec for the `fed_mgr_state` snapshot file.
//!
//! ```text
//! u16  protocol_version
//! time64 written_at
//! federation_record (opaque to this spec; delegated codec)
//! u32  fed_job_count        // NO_VAL32 ⇒ no table
//!   u32 cluster_lock
//!   u32 job_id
//!   u64 siblings_active
//!   u64 siblings_viable
//!   u32 updating_sibs[MAX+1]
//!   time64 updating_time[MAX+1]
//! ```
//!
//! The federation record itself is opaque to this layer — callers pass its
//! already-serialized bytes in (and get them back out) so this module never
//! needs to know the federation's own encoding. Atomic replacement of the
//! file on disk is a transport-layer concern
//! (`fedmgr-transport::StateSaveEffects`); this module only turns in-memory
//! state into bytes and back.

use crate::errors::FedCoreError;
use crate::identifiers::{ClusterId, FedJobId, SiblingMask, MAX_CLUSTERS};
use crate::job::FedJobInfo;

/// Current wire protocol version for the snapshot format.
pub const SNAPSHOT_PROTOCOL_VERSION: u16 = 1;

/// Sentinel marking "no job table present" for `fed_job_count`.
pub const NO_VAL32: u32 = u32::MAX;

/// Decoded snapshot contents.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub protocol_version: u16,
    pub written_at: i64,
    pub federation_record: Vec<u8>,
    pub jobs: Option<Vec<FedJobInfo>>,
}

struct Writer(Vec<u8>);

impl Writer {
    fn new() -> Self {
        Self(Vec::new())
    }
    fn u16(&mut self, v: u16) {
        self.0.extend_from_slice(&v.to_be_bytes());
    }
    fn u32(&mut self, v: u32) {
        self.0.extend_from_slice(&v.to_be_bytes());
    }
    fn u64(&mut self, v: u64) {
        self.0.extend_from_slice(&v.to_be_bytes());
    }
    fn i64(&mut self, v: i64) {
        self.0.extend_from_slice(&v.to_be_bytes());
    }
    fn bytes(&mut self, v: &[u8]) {
        self.u32(v.len() as u32);
        self.0.extend_from_slice(v);
    }
    fn into_inner(self) -> Vec<u8> {
        self.0
    }
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], FedCoreError> {
        if self.pos + n > self.buf.len() {
            return Err(FedCoreError::MalformedSnapshot(format!(
                "expected {n} more bytes at offset {}, have {}",
                self.pos,
                self.buf.len() - self.pos
            )));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u16(&mut self) -> Result<u16, FedCoreError> {
        Ok(u16::from_be_bytes(self.take(2)?.try_into().unwrap()))
    }
    fn u32(&mut self) -> Result<u32, FedCoreError> {
        Ok(u32::from_be_bytes(self.take(4)?.try_into().unwrap()))
    }
    fn u64(&mut self) -> Result<u64, FedCoreError> {
        Ok(u64::from_be_bytes(self.take(8)?.try_into().unwrap()))
    }
    fn i64(&mut self) -> Result<i64, FedCoreError> {
        Ok(i64::from_be_bytes(self.take(8)?.try_into().unwrap()))
    }
    fn bytes(&mut self) -> Result<Vec<u8>, FedCoreError> {
        let len = self.u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }
}

/// Encode a snapshot. `federation_record` is whatever the caller's
/// federation codec already produced; it is embedded verbatim.
pub fn encode_snapshot(
    written_at: i64,
    federation_record: &[u8],
    jobs: Option<&[FedJobInfo]>,
) -> Vec<u8> {
    let mut w = Writer::new();
    w.u16(SNAPSHOT_PROTOCOL_VERSION);
    w.i64(written_at);
    w.bytes(federation_record);
    match jobs {
        None => w.u32(NO_VAL32),
        Some(jobs) => {
            w.u32(jobs.len() as u32);
            for job in jobs {
                encode_job(&mut w, job);
            }
        }
    }
    w.into_inner()
}

fn encode_job(w: &mut Writer, job: &FedJobInfo) {
    w.u32(job.cluster_lock.map(|c| c.get() as u32).unwrap_or(0));
    w.u32(job.job_id.as_u32());
    w.u64(job.siblings_active.0);
    w.u64(job.siblings_viable.0);
    for i in 1..=MAX_CLUSTERS {
        w.u32(job.updating_sibs[i]);
    }
    for i in 1..=MAX_CLUSTERS {
        w.i64(job.updating_time[i].unwrap_or(0));
    }
}

/// Decode a snapshot previously produced by `encode_snapshot`.
pub fn decode_snapshot(bytes: &[u8]) -> Result<Snapshot, FedCoreError> {
    let mut r = Reader::new(bytes);
    let protocol_version = r.u16()?;
    if protocol_version != SNAPSHOT_PROTOCOL_VERSION {
        return Err(FedCoreError::MalformedSnapshot(format!(
            "unsupported snapshot protocol version {protocol_version}"
        )));
    }
    let written_at = r.i64()?;
    let federation_record = r.bytes()?;
    let count = r.u32()?;
    let jobs = if count == NO_VAL32 {
        None
    } else {
        let mut jobs = Vec::with_capacity(count as usize);
        for _ in 0..count {
            jobs.push(decode_job(&mut r)?);
        }
        Some(jobs)
    };

    Ok(Snapshot {
        protocol_version,
        written_at,
        federation_record,
        jobs,
    })
}

fn decode_job(r: &mut Reader<'_>) -> Result<FedJobInfo, FedCoreError> {
    let cluster_lock_raw = r.u32()?;
    let job_id = FedJobId::from_raw(r.u32()?);
    let siblings_active = SiblingMask(r.u64()?);
    let siblings_viable = SiblingMask(r.u64()?);

    let mut updating_sibs = [0u32; MAX_CLUSTERS + 1];
    for slot in updating_sibs.iter_mut().take(MAX_CLUSTERS + 1).skip(1) {
        *slot = r.u32()?;
    }
    let mut updating_time = [None; MAX_CLUSTERS + 1];
    for slot in updating_time.iter_mut().take(MAX_CLUSTERS + 1).skip(1) {
        let t = r.i64()?;
        *slot = if t == 0 { None } else { Some(t) };
    }

    let cluster_lock = if cluster_lock_raw == 0 {
        None
    } else {
        Some(ClusterId::new(cluster_lock_raw)?)
    };

    Ok(FedJobInfo {
        job_id,
        cluster_lock,
        siblings_active,
        siblings_viable,
        updating_sibs,
        updating_time,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_empty_job_table() {
        let bytes = encode_snapshot(1_700_000_000, b"federation-blob", None);
        let snap = decode_snapshot(&bytes).unwrap();
        assert_eq!(snap.protocol_version, SNAPSHOT_PROTOCOL_VERSION);
        assert_eq!(snap.written_at, 1_700_000_000);
        assert_eq!(snap.federation_record, b"federation-blob");
        assert!(snap.jobs.is_none());
    }

    #[test]
    fn roundtrip_job_table() {
        let origin = ClusterId::new(1).unwrap();
        let peer = ClusterId::new(2).unwrap();
        let mut job = FedJobInfo::new(FedJobId::new(origin, 5).unwrap());
        job.cluster_lock = Some(origin);
        job.siblings_active = SiblingMask::single(origin);
        job.siblings_viable = SiblingMask::from_ids([origin, peer]);
        job.mark_update_sent(peer, 1_699_999_999);

        let bytes = encode_snapshot(42, b"fed", Some(&[job.clone()]));
        let snap = decode_snapshot(&bytes).unwrap();
        let jobs = snap.jobs.unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].job_id, job.job_id);
        assert_eq!(jobs[0].cluster_lock, job.cluster_lock);
        assert_eq!(jobs[0].siblings_active, job.siblings_active);
        assert_eq!(jobs[0].siblings_viable, job.siblings_viable);
        assert_eq!(jobs[0].updating_sibs[2], 1);
        assert_eq!(jobs[0].updating_time[2], Some(1_699_999_999));
    }

    #[test]
    fn rejects_truncated_bytes() {
        let bytes = encode_snapshot(1, b"fed", None);
        let truncated = &bytes[..bytes.len() - 2];
        assert!(decode_snapshot(truncated).is_err());
    }

    #[test]
    fn rejects_unsupported_version() {
        let mut bytes = encode_snapshot(1, b"fed", None);
        bytes[0..2].copy_from_slice(&99u16.to_be_bytes());
        assert!(decode_snapshot(&bytes).is_err());
    }

    proptest::proptest! {
        #[test]
        fn encode_decode_roundtrip_arbitrary_job(
            local_id in 0u32..(1 << 26),
            origin_id in 1u32..=63,
            active in 0u64..=u64::MAX,
            viable in 0u64..=u64::MAX,
        ) {
            let origin = ClusterId::new(origin_id).unwrap();
            let mut job = FedJobInfo::new(FedJobId::new(origin, local_id).unwrap());
            job.siblings_active = SiblingMask(active);
            job.siblings_viable = SiblingMask(viable);
            let bytes = encode_snapshot(7, b"f", Some(&[job.clone()]));
            let snap = decode_snapshot(&bytes).unwrap();
            let decoded = &snap.jobs.unwrap()[0];
            prop_assert_eq!(decoded.job_id, job.job_id);
            prop_assert_eq!(decoded.siblings_active, job.siblings_active);
            prop_assert_eq!(decoded.siblings_viable, job.siblings_viable);
        }
    }
}
