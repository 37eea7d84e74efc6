//! `SIB_MSG`: the envelope that wraps every cross-peer message so it can be
//! tunneled over `REQUEST_SIB_MSG`.
//!
//! The envelope itself doesn't interpret `inner_buffer` — that's whatever
//! scheduler RPC payload `sib_msg_type` says it is. This crate only knows how
//! to pack and unpack the envelope shell and its discriminator.

use crate::errors::WireError;
use fedmgr_core::{ClusterId, FedJobId, SiblingMask};
use serde::{Deserialize, Serialize};

/// Current wire schema version stamped into every envelope's `inner_version`
/// field by default; a receiver may still accept older versions it knows how
/// to decode.
pub const SIB_WIRE_VERSION: u16 = 1;

/// Discriminator for the kind of message tunneled inside an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SibMsgType {
    SubmitBatch,
    SubmitInt,
    SubmitResp,
    Start,
    Complete,
    Cancel,
    Requeue,
    Update,
    UpdateResponse,
    RemoveActiveSibBit,
    Sync,
    SendJobSync,
    LockRequest,
    UnlockRequest,
    Revoke,
}

/// Coarse run-state of a job as reported in a `SYNC` payload;
/// mirrors `fedmgr_transport::JobRunState` but lives in this crate since the
/// wire envelope must not depend on the scheduler-effects crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncJobRunState {
    Pending,
    Running,
    Completed,
    Other,
}

/// One job entry in a `SYNC` payload: the sender's view of a job it still
/// tracks, with enough state for the receiver's reconciliation table
/// to distinguish "still running" from "already finished."
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncJobRecord {
    pub job_id: FedJobId,
    pub state: SyncJobRunState,
    pub exit_code: i32,
}

/// The peer envelope: `SIB_MSG { sib_msg_type, inner_type,
/// inner_version, inner_buffer, job_id, cluster_id?, start_time?,
/// return_code?, fed_siblings?, req_uid?, resp_host? }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SibMsg {
    pub sib_msg_type: SibMsgType,
    /// Discriminator for the scheduler RPC packed into `inner_buffer`; opaque
    /// to this crate, interpreted by the scheduler effects layer.
    pub inner_type: u16,
    pub inner_version: u16,
    pub inner_buffer: Vec<u8>,
    pub job_id: FedJobId,
    pub cluster_id: Option<ClusterId>,
    pub start_time: Option<i64>,
    pub return_code: Option<i32>,
    pub fed_siblings: Option<SiblingMask>,
    pub req_uid: Option<u32>,
    pub resp_host: Option<String>,
}

impl SibMsg {
    fn base(sib_msg_type: SibMsgType, job_id: FedJobId, inner_type: u16, inner_buffer: Vec<u8>) -> Self {
        Self {
            sib_msg_type,
            inner_type,
            inner_version: SIB_WIRE_VERSION,
            inner_buffer,
            job_id,
            cluster_id: None,
            start_time: None,
            return_code: None,
            fed_siblings: None,
            req_uid: None,
            resp_host: None,
        }
    }

    /// A `SUBMIT_BATCH`/`SUBMIT_INT` envelope: a peer asks us to instantiate
    /// a sibling job, carrying the packed job descriptor and the viable
    /// sibling bitmask.
    pub fn submit(
        batched: bool,
        job_id: FedJobId,
        req_uid: u32,
        fed_siblings: SiblingMask,
        inner_type: u16,
        inner_buffer: Vec<u8>,
    ) -> Self {
        let mut msg = Self::base(
            if batched {
                SibMsgType::SubmitBatch
            } else {
                SibMsgType::SubmitInt
            },
            job_id,
            inner_type,
            inner_buffer,
        );
        msg.req_uid = Some(req_uid);
        msg.fed_siblings = Some(fed_siblings);
        msg
    }

    /// `SUBMIT_RESP(peer, jobId, rc)`.
    pub fn submit_resp(job_id: FedJobId, from: ClusterId, rc: i32) -> Self {
        let mut msg = Self::base(SibMsgType::SubmitResp, job_id, 0, Vec::new());
        msg.cluster_id = Some(from);
        msg.return_code = Some(rc);
        msg
    }

    /// `START(jobId, startTime, lockHolder)`.
    pub fn start(job_id: FedJobId, lock_holder: ClusterId, start_time: i64) -> Self {
        let mut msg = Self::base(SibMsgType::Start, job_id, 0, Vec::new());
        msg.cluster_id = Some(lock_holder);
        msg.start_time = Some(start_time);
        msg
    }

    /// `COMPLETE(jobId, rc, startTime)`.
    pub fn complete(job_id: FedJobId, rc: i32, start_time: i64) -> Self {
        let mut msg = Self::base(SibMsgType::Complete, job_id, 0, Vec::new());
        msg.return_code = Some(rc);
        msg.start_time = Some(start_time);
        msg
    }

    /// `REVOKE(rc, startTime)`, sent as the `COMPLETE` message class by the
    /// revocation walk that tears down sibling copies once a winner is
    /// decided.
    pub fn revoke(job_id: FedJobId, rc: i32, start_time: i64) -> Self {
        let mut msg = Self::base(SibMsgType::Revoke, job_id, 0, Vec::new());
        msg.return_code = Some(rc);
        msg.start_time = Some(start_time);
        msg
    }

    /// `UPDATE(jobId, jobDesc, submitter, uid)`.
    pub fn update(job_id: FedJobId, req_uid: u32, inner_type: u16, inner_buffer: Vec<u8>) -> Self {
        let mut msg = Self::base(SibMsgType::Update, job_id, inner_type, inner_buffer);
        msg.req_uid = Some(req_uid);
        msg
    }

    /// `UPDATE_RESPONSE(jobId, peer, rc)`.
    pub fn update_response(job_id: FedJobId, from: ClusterId, rc: i32) -> Self {
        let mut msg = Self::base(SibMsgType::UpdateResponse, job_id, 0, Vec::new());
        msg.cluster_id = Some(from);
        msg.return_code = Some(rc);
        msg
    }

    /// `REMOVE_ACTIVE_SIB_BIT(jobId, peerName)`; `peerName` is resolved to a
    /// host string on the wire and to a `ClusterId` by the receiver.
    pub fn remove_active_sib_bit(job_id: FedJobId, peer: ClusterId, resp_host: String) -> Self {
        let mut msg = Self::base(SibMsgType::RemoveActiveSibBit, job_id, 0, Vec::new());
        msg.cluster_id = Some(peer);
        msg.resp_host = Some(resp_host);
        msg
    }

    /// `SEND_JOB_SYNC(peer)`: the trigger sent internally, not on the wire;
    /// the wire form is the `SYNC` envelope below, built once the sender has
    /// assembled its job list. Kept here as the zero-payload placeholder
    /// that requests one be built.
    pub fn send_job_sync_request(peer: ClusterId) -> Self {
        let mut msg = Self::base(SibMsgType::SendJobSync, FedJobId::from_raw(0), 0, Vec::new());
        msg.cluster_id = Some(peer);
        msg
    }

    /// `SYNC(peer, remoteJobs[], syncTime)`. `inner_buffer`
    /// carries the bincode-encoded job record list (id, run-state, exit
    /// code); `start_time` carries `syncTime`.
    pub fn sync(from: ClusterId, sync_time: i64, remote_jobs: &[SyncJobRecord]) -> Result<Self, WireError> {
        let inner_buffer = bincode::serialize(remote_jobs).map_err(WireError::codec)?;
        let mut msg = Self::base(SibMsgType::Sync, FedJobId::from_raw(0), 0, inner_buffer);
        msg.cluster_id = Some(from);
        msg.start_time = Some(sync_time);
        Ok(msg)
    }

    /// Decode the job record list packed by `sync`.
    pub fn sync_job_records(&self) -> Result<Vec<SyncJobRecord>, WireError> {
        bincode::deserialize(&self.inner_buffer).map_err(WireError::codec)
    }

    /// Synchronous `REQUEST_SIB_JOB_LOCK`.
    pub fn lock_request(job_id: FedJobId, requester: ClusterId) -> Self {
        let mut msg = Self::base(SibMsgType::LockRequest, job_id, 0, Vec::new());
        msg.cluster_id = Some(requester);
        msg
    }

    /// Synchronous `REQUEST_SIB_JOB_UNLOCK`.
    pub fn unlock_request(job_id: FedJobId, requester: ClusterId) -> Self {
        let mut msg = Self::base(SibMsgType::UnlockRequest, job_id, 0, Vec::new());
        msg.cluster_id = Some(requester);
        msg
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, WireError> {
        bincode::serialize(self).map_err(WireError::codec)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        bincode::deserialize(bytes).map_err(WireError::codec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn submit_envelope_carries_siblings_and_uid() {
        let origin = ClusterId::new(1).unwrap();
        let peer = ClusterId::new(2).unwrap();
        let job_id = FedJobId::new(origin, 5).unwrap();
        let mask = SiblingMask::from_ids([origin, peer]);
        let msg = SibMsg::submit(true, job_id, 1000, mask, 7, vec![1, 2, 3]);
        assert_eq!(msg.sib_msg_type, SibMsgType::SubmitBatch);
        assert_eq!(msg.req_uid, Some(1000));
        assert_eq!(msg.fed_siblings, Some(mask));
        assert_eq!(msg.inner_type, 7);
    }

    #[test]
    fn sync_roundtrips_job_record_list() {
        let origin = ClusterId::new(1).unwrap();
        let records = vec![
            SyncJobRecord {
                job_id: FedJobId::new(origin, 1).unwrap(),
                state: SyncJobRunState::Running,
                exit_code: 0,
            },
            SyncJobRecord {
                job_id: FedJobId::new(origin, 2).unwrap(),
                state: SyncJobRunState::Completed,
                exit_code: 9,
            },
        ];
        let msg = SibMsg::sync(origin, 5000, &records).unwrap();
        assert_eq!(msg.sync_job_records().unwrap(), records);
    }

    #[test]
    fn wire_roundtrip() {
        let origin = ClusterId::new(1).unwrap();
        let job_id = FedJobId::new(origin, 5).unwrap();
        let msg = SibMsg::start(job_id, origin, 123);
        let bytes = msg.to_bytes().unwrap();
        let back = SibMsg::from_bytes(&bytes).unwrap();
        assert_eq!(back.job_id, msg.job_id);
        assert_eq!(back.start_time, msg.start_time);
        assert_eq!(back.cluster_id, msg.cluster_id);
    }
}
