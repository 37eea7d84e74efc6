//! Wire envelopes for cross-peer messages: the `SIB_MSG` envelope and the
//! batched RPC request/response pair it travels in.

pub mod envelope;
pub mod errors;
pub mod rpc;

pub use envelope::{SibMsg, SibMsgType, SyncJobRecord, SyncJobRunState, SIB_WIRE_VERSION};
pub use errors::WireError;
pub use rpc::{MultiMsgRequest, MultiMsgResponse, SlurmRc, SLURM_SUCCESS};
