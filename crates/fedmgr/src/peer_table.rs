//! Per-peer connection and queue state.
//!
//! Each peer carries its own mutex, guarding only that peer's connection
//! flags and pending-RPC queue; the table itself is guarded by a coarser
//! `RwLock` so membership changes can take a write lock while the Agent
//! Loop only ever needs a read lock to snapshot the peer list.

use fedmgr_core::{ClusterId, ClusterState, FedJobId};
use fedmgr_messages::SibMsgType;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{Mutex, Notify, RwLock};

/// One queued outbound RPC.
#[derive(Debug, Clone)]
pub struct PendingRpc {
    pub buffer: Vec<u8>,
    pub job_id: FedJobId,
    pub msg_type: SibMsgType,
    pub last_try: i64,
    pub defer_seconds: u64,
    /// Set once the 128-second boundary has been logged, so the warning
    /// fires only once per RPC.
    pub warned_at_cap: bool,
}

impl PendingRpc {
    pub fn new(job_id: FedJobId, msg_type: SibMsgType, buffer: Vec<u8>) -> Self {
        Self {
            buffer,
            job_id,
            msg_type,
            last_try: 0,
            defer_seconds: 0,
            warned_at_cap: false,
        }
    }

    pub fn is_due(&self, now: i64) -> bool {
        self.last_try + self.defer_seconds as i64 <= now
    }
}

/// A peer's connection and queue state.
pub struct PeerRecord {
    pub id: ClusterId,
    pub name: String,
    pub host: String,
    pub port: u16,
    pub protocol_version: u16,
    pub state: ClusterState,
    /// Whether the send-side connection is currently open.
    pub send_open: bool,
    pub pending: VecDeque<PendingRpc>,
    /// Last time a comm-fail was logged for this peer, for the 600-second
    /// rate gate.
    pub comm_fail_last_logged: Option<i64>,
}

impl PeerRecord {
    pub fn new(id: ClusterId, name: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            id,
            name: name.into(),
            host: host.into(),
            port,
            protocol_version: 1,
            state: ClusterState::ACTIVE,
            send_open: false,
            pending: VecDeque::new(),
            comm_fail_last_logged: None,
        }
    }

    /// Whether a comm-fail for this peer may be logged right now, and if so
    /// marks the gate as just-logged.
    pub fn should_log_comm_fail(&mut self, now: i64, window_secs: i64) -> bool {
        let due = self
            .comm_fail_last_logged
            .map(|t| now - t >= window_secs)
            .unwrap_or(true);
        if due {
            self.comm_fail_last_logged = Some(now);
        }
        due
    }
}

/// The full peer table, plus the cross-peer synchronization primitives that
/// aren't scoped to a single peer.
pub struct PeerTable {
    peers: RwLock<HashMap<ClusterId, Arc<Mutex<PeerRecord>>>>,
    /// Serializes the fan-out of opens across peers so concurrent inbound
    /// opens from the same peers do not deadlock.
    open_send_mutex: Mutex<()>,
    /// Wakes the Agent Loop on new enqueue, standing in for the original's
    /// condition-variable broadcast.
    pub agent_notify: Notify,
}

impl Default for PeerTable {
    fn default() -> Self {
        Self::new()
    }
}

impl PeerTable {
    pub fn new() -> Self {
        Self {
            peers: RwLock::new(HashMap::new()),
            open_send_mutex: Mutex::new(()),
            agent_notify: Notify::new(),
        }
    }

    /// Build a table pre-populated with `records`, for manager construction
    /// before any task has started (no lock contention is possible yet, so
    /// this is plain synchronous setup).
    pub fn with_peers(records: Vec<PeerRecord>) -> Self {
        let peers = records.into_iter().map(|r| (r.id, Arc::new(Mutex::new(r)))).collect();
        Self {
            peers: RwLock::new(peers),
            open_send_mutex: Mutex::new(()),
            agent_notify: Notify::new(),
        }
    }

    /// Snapshot of peer ids under a read lock.
    pub async fn peer_ids(&self) -> Vec<ClusterId> {
        self.peers.read().await.keys().copied().collect()
    }

    pub async fn get(&self, id: ClusterId) -> Option<Arc<Mutex<PeerRecord>>> {
        self.peers.read().await.get(&id).cloned()
    }

    /// Insert or replace a peer record.
    pub async fn insert(&self, record: PeerRecord) {
        let id = record.id;
        self.peers.write().await.insert(id, Arc::new(Mutex::new(record)));
    }

    /// Remove a peer record, handing back its connection state for the
    /// caller to transfer into a replacement record if this is a rejoin
    /// rather than a true departure.
    pub async fn remove(&self, id: ClusterId) -> Option<Arc<Mutex<PeerRecord>>> {
        self.peers.write().await.remove(&id)
    }

    /// Enqueue an outbound RPC for a peer and wake the Agent Loop.
    pub async fn enqueue(&self, peer: ClusterId, rpc: PendingRpc) -> bool {
        let Some(record) = self.get(peer).await else {
            return false;
        };
        record.lock().await.pending.push_back(rpc);
        self.agent_notify.notify_one();
        true
    }

    /// `Open(peer)`: idempotent; takes the global open-send mutex across the
    /// call so concurrent opens serialize.
    pub async fn open<T: fedmgr_transport::TransportEffects + ?Sized>(
        &self,
        peer: ClusterId,
        transport: &T,
    ) -> Result<(), fedmgr_transport::TransportError> {
        let _guard = self.open_send_mutex.lock().await;
        let Some(record) = self.get(peer).await else {
            return Ok(());
        };
        let (already_open, host, port) = {
            let r = record.lock().await;
            (r.send_open, r.host.clone(), r.port)
        };
        if already_open {
            return Ok(());
        }
        transport.open(peer, &host, port).await?;
        record.lock().await.send_open = true;
        Ok(())
    }

    /// Open sends to every peer on initial federation join.
    pub async fn open_all<T: fedmgr_transport::TransportEffects + ?Sized>(
        &self,
        transport: &T,
    ) -> Result<(), fedmgr_transport::TransportError> {
        let ids = self.peer_ids().await;
        for id in ids {
            self.open(id, transport).await?;
        }
        Ok(())
    }

    /// `Close(peer)`: tears down only the send side.
    pub async fn close_send<T: fedmgr_transport::TransportEffects + ?Sized>(
        &self,
        peer: ClusterId,
        transport: &T,
    ) -> Result<(), fedmgr_transport::TransportError> {
        let Some(record) = self.get(peer).await else {
            return Ok(());
        };
        transport.close(peer).await?;
        record.lock().await.send_open = false;
        Ok(())
    }

    /// Close every peer's send connection, for full manager shutdown.
    pub async fn close_all<T: fedmgr_transport::TransportEffects + ?Sized>(
        &self,
        transport: &T,
    ) -> Result<(), fedmgr_transport::TransportError> {
        let ids = self.peer_ids().await;
        for id in ids {
            self.close_send(id, transport).await?;
        }
        Ok(())
    }
}
