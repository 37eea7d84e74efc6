//! `TransportEffects`: the persistent peer-connection contract. Out of scope; only its contract appears here.

use crate::errors::TransportError;
use async_trait::async_trait;
use fedmgr_core::ClusterId;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

/// One piece of inbound traffic handed from the transport's recv side to the
/// manager. `reply`, if present, must be
/// fulfilled with the encoded response bytes — batched `REQUEST_CTLD_MULT_MSG`
/// envelopes expect a `RESPONSE_CTLD_MULT_MSG`; the synchronous
/// `REQUEST_SIB_JOB_LOCK`/`UNLOCK` envelopes expect a bare return code.
pub struct InboundMessage {
    pub peer: ClusterId,
    pub bytes: Vec<u8>,
    pub reply: Option<oneshot::Sender<Vec<u8>>>,
}

#[async_trait]
pub trait TransportEffects: Send + Sync {
    /// Establish (or confirm already-established) the send connection to a
    /// peer. Idempotent: returns immediately if already open.
    async fn open(&self, peer: ClusterId, host: &str, port: u16) -> Result<(), TransportError>;

    /// Tear down the send side for a peer. The returned future resolves only
    /// once teardown is confirmed — the recv side is owned by the
    /// transport's recv pool and is not affected.
    async fn close(&self, peer: ClusterId) -> Result<(), TransportError>;

    /// Fire a message at a peer without waiting for a reply; used by the
    /// Agent Loop for batched RPCs.
    async fn send(&self, peer: ClusterId, bytes: Vec<u8>) -> Result<(), TransportError>;

    /// Send a message and block for the synchronous reply, used by the
    /// cluster-lock RPCs that bypass the agent queue.
    async fn send_recv(
        &self,
        peer: ClusterId,
        bytes: Vec<u8>,
        timeout: Duration,
    ) -> Result<Vec<u8>, TransportError>;

    /// Start accepting inbound peer connections. Each accepted connection
    /// should trigger reconciliation.
    async fn start_recv_server(&self) -> Result<(), TransportError>;

    /// Stop accepting inbound peer connections, part of full shutdown.
    async fn stop_recv_server(&self) -> Result<(), TransportError>;

    /// Channel of inbound envelopes (batched `REQUEST_CTLD_MULT_MSG` and
    /// synchronous lock/unlock requests) received from any peer. Must be
    /// called once; the manager holds the single consumer for the process
    /// lifetime.
    fn subscribe_inbound(&self) -> mpsc::Receiver<InboundMessage>;

    /// Channel of peers whose recv connection was just (re-)accepted,
    /// driving `SEND_JOB_SYNC`.
    fn subscribe_new_connections(&self) -> mpsc::Receiver<ClusterId>;
}
