//! Batched outbound RPC envelope: `REQUEST_CTLD_MULT_MSG`
//! carries a list of `SIB_MSG`s in one round trip; the reply
//! `RESPONSE_CTLD_MULT_MSG` carries one `RESPONSE_SLURM_RC` per sub-request,
//! positional and in the same order as the request.

use crate::envelope::SibMsg;
use crate::errors::WireError;
use serde::{Deserialize, Serialize};

/// A SLURM-style return code: zero is success, nonzero is an error code
/// opaque to this crate (interpreted by scheduler effects).
pub type SlurmRc = i32;

pub const SLURM_SUCCESS: SlurmRc = 0;

/// `REQUEST_CTLD_MULT_MSG`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiMsgRequest {
    pub msgs: Vec<SibMsg>,
}

impl MultiMsgRequest {
    pub fn new(msgs: Vec<SibMsg>) -> Self {
        Self { msgs }
    }

    pub fn len(&self) -> usize {
        self.msgs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.msgs.is_empty()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, WireError> {
        bincode::serialize(self).map_err(WireError::codec)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        bincode::deserialize(bytes).map_err(WireError::codec)
    }
}

/// `RESPONSE_CTLD_MULT_MSG`: one `RESPONSE_SLURM_RC` per sub-request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MultiMsgResponse {
    pub return_codes: Vec<SlurmRc>,
}

impl MultiMsgResponse {
    pub fn new(return_codes: Vec<SlurmRc>) -> Self {
        Self { return_codes }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, WireError> {
        bincode::serialize(self).map_err(WireError::codec)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
        bincode::deserialize(bytes).map_err(WireError::codec)
    }

    /// Pair this response's return codes with the request's sub-messages in
    /// order, as the agent loop needs to retire successes and leave failures
    /// on the queue.
    pub fn zip_with_request<'a>(
        &'a self,
        request: &'a MultiMsgRequest,
    ) -> Result<impl Iterator<Item = (&'a SibMsg, SlurmRc)> + 'a, WireError> {
        if self.return_codes.len() != request.msgs.len() {
            return Err(WireError::BatchLengthMismatch {
                expected: request.msgs.len(),
                got: self.return_codes.len(),
            });
        }
        Ok(request.msgs.iter().zip(self.return_codes.iter().copied()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::SibMsg;
    use fedmgr_core::{ClusterId, FedJobId};

    fn msg(local: u32) -> SibMsg {
        let origin = ClusterId::new(1).unwrap();
        SibMsg::start(FedJobId::new(origin, local).unwrap(), origin, 0)
    }

    #[test]
    fn zip_pairs_return_codes_positionally() {
        let req = MultiMsgRequest::new(vec![msg(1), msg(2), msg(3)]);
        let resp = MultiMsgResponse::new(vec![0, 1, 0]);
        let paired: Vec<_> = resp.zip_with_request(&req).unwrap().collect();
        assert_eq!(paired.len(), 3);
        assert_eq!(paired[1].1, 1);
    }

    #[test]
    fn zip_rejects_length_mismatch() {
        let req = MultiMsgRequest::new(vec![msg(1), msg(2)]);
        let resp = MultiMsgResponse::new(vec![0]);
        assert!(resp.zip_with_request(&req).is_err());
    }

    #[test]
    fn multi_msg_wire_roundtrip() {
        let req = MultiMsgRequest::new(vec![msg(1), msg(2)]);
        let bytes = req.to_bytes().unwrap();
        let back = MultiMsgRequest::from_bytes(&bytes).unwrap();
        assert_eq!(back.len(), 2);
    }
}
