//! In-memory fakes of the four effect traits, for unit and integration
//! tests elsewhere in the workspace.

use crate::config_store::{ClusterModification, ConfigStoreEffects, ConfigUpdate, FederationModification};
use crate::errors::{ConfigStoreError, SchedulerError, StateSaveError, TransportError};
use crate::scheduler::{AllocateOutcome, JobRunState, SchedulerEffects};
use crate::state_save::StateSaveEffects;
use crate::transport::{InboundMessage, TransportEffects};
use async_trait::async_trait;
use fedmgr_core::{ClusterId, FedJobId, Federation, RequeueHold};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;

/// A scheduler fake that always succeeds, handing out sequential local ids
/// and recording every call for assertions.
#[derive(Default)]
pub struct FakeScheduler {
    next_id: AtomicU32,
    local_jobs: Mutex<HashMap<FedJobId, bool>>,
    run_states: Mutex<HashMap<FedJobId, (JobRunState, i32)>>,
    requeue_holds: Mutex<HashMap<FedJobId, RequeueHold>>,
    pub calls: Mutex<Vec<String>>,
}

impl FakeScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_existing_job(self, job_id: FedJobId) -> Self {
        self.local_jobs.lock().unwrap().insert(job_id, true);
        self
    }

    /// Seed the run-state `job_run_state` reports for `job_id`, for tests
    /// exercising the `SYNC` reconciliation paths.
    pub fn set_run_state(&self, job_id: FedJobId, state: JobRunState, exit_code: i32) {
        self.run_states.lock().unwrap().insert(job_id, (state, exit_code));
    }

    /// Seed the hold-code `requeue_hold` reports for `job_id`, for tests
    /// exercising the inbound `COMPLETE`/`REVOKE` requeue-finalization path.
    pub fn set_requeue_hold(&self, job_id: FedJobId, hold: RequeueHold) {
        self.requeue_holds.lock().unwrap().insert(job_id, hold);
    }
}

#[async_trait]
impl SchedulerEffects for FakeScheduler {
    async fn next_local_id(&self) -> Result<u32, SchedulerError> {
        Ok(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    async fn allocate(
        &self,
        job_id: FedJobId,
        _descriptor: &[u8],
        _submitter_uid: u32,
    ) -> Result<AllocateOutcome, SchedulerError> {
        self.calls.lock().unwrap().push(format!("allocate({job_id})"));
        self.local_jobs.lock().unwrap().insert(job_id, true);
        Ok(AllocateOutcome::Allocated)
    }

    async fn update(
        &self,
        job_id: FedJobId,
        _descriptor: &[u8],
        _submitter_uid: u32,
        _requester_uid: u32,
    ) -> Result<(), SchedulerError> {
        self.calls.lock().unwrap().push(format!("update({job_id})"));
        Ok(())
    }

    async fn requeue(&self, job_id: FedJobId, _state: u32, _requester_uid: u32) -> Result<(), SchedulerError> {
        self.calls.lock().unwrap().push(format!("requeue({job_id})"));
        Ok(())
    }

    async fn revoke(
        &self,
        job_id: FedJobId,
        _is_complete: bool,
        _return_code: i32,
        _start_time: i64,
    ) -> Result<(), SchedulerError> {
        self.calls.lock().unwrap().push(format!("revoke({job_id})"));
        Ok(())
    }

    async fn find_job(&self, job_id: FedJobId) -> Result<bool, SchedulerError> {
        Ok(self.local_jobs.lock().unwrap().contains_key(&job_id))
    }

    async fn kill_step(&self, job_id: FedJobId, _requester_uid: u32) -> Result<(), SchedulerError> {
        self.calls.lock().unwrap().push(format!("kill_step({job_id})"));
        Ok(())
    }

    async fn purge_job(&self, job_id: FedJobId) -> Result<(), SchedulerError> {
        self.calls.lock().unwrap().push(format!("purge_job({job_id})"));
        self.local_jobs.lock().unwrap().remove(&job_id);
        Ok(())
    }

    async fn job_run_state(&self, job_id: FedJobId) -> Result<Option<(JobRunState, i32)>, SchedulerError> {
        Ok(self.run_states.lock().unwrap().get(&job_id).copied().or_else(|| {
            self.local_jobs
                .lock()
                .unwrap()
                .contains_key(&job_id)
                .then_some((JobRunState::Running, 0))
        }))
    }

    async fn requeue_hold(&self, job_id: FedJobId) -> Result<RequeueHold, SchedulerError> {
        Ok(self
            .requeue_holds
            .lock()
            .unwrap()
            .get(&job_id)
            .copied()
            .unwrap_or(RequeueHold::Other))
    }
}

/// A transport fake backed by in-process channels; `send` records the bytes
/// per peer instead of crossing any real network.
#[derive(Default)]
pub struct FakeTransport {
    open_peers: Mutex<HashMap<ClusterId, (String, u16)>>,
    pub sent: Mutex<Vec<(ClusterId, Vec<u8>)>>,
    pub recv_server_running: Mutex<bool>,
    inbound_tx: Mutex<Option<mpsc::Sender<InboundMessage>>>,
    new_conn_tx: Mutex<Option<mpsc::Sender<ClusterId>>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_open(&self, peer: ClusterId) -> bool {
        self.open_peers.lock().unwrap().contains_key(&peer)
    }

    /// Simulate a peer's inbound envelope arriving, for tests of the
    /// manager's inbound dispatch.
    pub async fn push_inbound(&self, msg: InboundMessage) {
        if let Some(tx) = self.inbound_tx.lock().unwrap().clone() {
            let _ = tx.send(msg).await;
        }
    }

    /// Simulate accepting a new recv connection from `peer`.
    pub async fn push_new_connection(&self, peer: ClusterId) {
        if let Some(tx) = self.new_conn_tx.lock().unwrap().clone() {
            let _ = tx.send(peer).await;
        }
    }
}

#[async_trait]
impl TransportEffects for FakeTransport {
    async fn open(&self, peer: ClusterId, host: &str, port: u16) -> Result<(), TransportError> {
        self.open_peers
            .lock()
            .unwrap()
            .insert(peer, (host.to_string(), port));
        Ok(())
    }

    async fn close(&self, peer: ClusterId) -> Result<(), TransportError> {
        self.open_peers.lock().unwrap().remove(&peer);
        Ok(())
    }

    async fn send(&self, peer: ClusterId, bytes: Vec<u8>) -> Result<(), TransportError> {
        if !self.is_open(peer) {
            return Err(TransportError::NotOpen);
        }
        self.sent.lock().unwrap().push((peer, bytes));
        Ok(())
    }

    async fn send_recv(
        &self,
        peer: ClusterId,
        bytes: Vec<u8>,
        _timeout: Duration,
    ) -> Result<Vec<u8>, TransportError> {
        self.send(peer, bytes.clone()).await?;
        Ok(bytes)
    }

    async fn start_recv_server(&self) -> Result<(), TransportError> {
        *self.recv_server_running.lock().unwrap() = true;
        Ok(())
    }

    async fn stop_recv_server(&self) -> Result<(), TransportError> {
        *self.recv_server_running.lock().unwrap() = false;
        Ok(())
    }

    fn subscribe_inbound(&self) -> mpsc::Receiver<InboundMessage> {
        let (tx, rx) = mpsc::channel(64);
        *self.inbound_tx.lock().unwrap() = Some(tx);
        rx
    }

    fn subscribe_new_connections(&self) -> mpsc::Receiver<ClusterId> {
        let (tx, rx) = mpsc::channel(64);
        *self.new_conn_tx.lock().unwrap() = Some(tx);
        rx
    }
}

/// A config-store fake seeded with a fixed federation; `subscribe_updates`
/// hands back a channel the test can push `ConfigUpdate`s into.
pub struct FakeConfigStore {
    federations: Mutex<Vec<Federation>>,
    update_tx: mpsc::Sender<ConfigUpdate>,
    update_rx: Mutex<Option<mpsc::Receiver<ConfigUpdate>>>,
}

impl FakeConfigStore {
    pub fn new(federations: Vec<Federation>) -> Self {
        let (tx, rx) = mpsc::channel(32);
        Self {
            federations: Mutex::new(federations),
            update_tx: tx,
            update_rx: Mutex::new(Some(rx)),
        }
    }

    /// Push a config-store update as if it arrived from outside.
    pub async fn push_update(&self, update: ConfigUpdate) {
        let _ = self.update_tx.send(update).await;
    }
}

#[async_trait]
impl ConfigStoreEffects for FakeConfigStore {
    async fn get_federations(&self) -> Result<Vec<Federation>, ConfigStoreError> {
        Ok(self.federations.lock().unwrap().clone())
    }

    async fn modify_clusters(&self, _change: ClusterModification) -> Result<(), ConfigStoreError> {
        Ok(())
    }

    async fn modify_federations(&self, _change: FederationModification) -> Result<(), ConfigStoreError> {
        Ok(())
    }

    async fn remove_self_from_federation(
        &self,
        federation_name: &str,
        local: ClusterId,
    ) -> Result<(), ConfigStoreError> {
        let mut feds = self.federations.lock().unwrap();
        if let Some(fed) = feds.iter_mut().find(|f| f.name == federation_name) {
            fed.clusters.retain(|c| c.id != local);
            Ok(())
        } else {
            Err(ConfigStoreError::UnknownFederation(federation_name.to_string()))
        }
    }

    fn subscribe_updates(&self) -> mpsc::Receiver<ConfigUpdate> {
        self.update_rx
            .lock()
            .unwrap()
            .take()
            .expect("subscribe_updates called more than once on FakeConfigStore")
    }
}

/// An in-memory state-save directory.
#[derive(Default)]
pub struct FakeStateSave {
    files: Mutex<HashMap<String, Vec<u8>>>,
}

impl FakeStateSave {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateSaveEffects for FakeStateSave {
    async fn atomic_replace(&self, filename: &str, bytes: &[u8]) -> Result<(), StateSaveError> {
        self.files
            .lock()
            .unwrap()
            .insert(filename.to_string(), bytes.to_vec());
        Ok(())
    }

    async fn read(&self, filename: &str) -> Result<Option<Vec<u8>>, StateSaveError> {
        Ok(self.files.lock().unwrap().get(filename).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fake_scheduler_hands_out_sequential_ids() {
        let sched = FakeScheduler::new();
        assert_eq!(sched.next_local_id().await.unwrap(), 0);
        assert_eq!(sched.next_local_id().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn fake_transport_rejects_send_before_open() {
        let transport = FakeTransport::new();
        let peer = ClusterId::new(2).unwrap();
        assert!(transport.send(peer, vec![1]).await.is_err());
        transport.open(peer, "host", 6820).await.unwrap();
        assert!(transport.send(peer, vec![1]).await.is_ok());
    }

    #[tokio::test]
    async fn fake_config_store_removes_self() {
        let mut fed = Federation::new("fed1");
        let local = ClusterId::new(1).unwrap();
        fed.clusters.push(fedmgr_core::ClusterRecord {
            id: local,
            name: "a".into(),
            host: "h".into(),
            port: 1,
            features: Default::default(),
            state: Default::default(),
        });
        let store = FakeConfigStore::new(vec![fed]);
        store.remove_self_from_federation("fed1", local).await.unwrap();
        let feds = store.get_federations().await.unwrap();
        assert!(feds[0].by_id(local).is_none());
    }
}
