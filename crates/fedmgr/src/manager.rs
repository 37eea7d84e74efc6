//! `FedManager`: wires the peer table, job registry, federation record, and
//! worker loops together, and owns their lifetime.

use crate::agent_loop::AgentLoop;
use crate::config::FedMgrConfig;
use crate::drain_watcher::DrainWatcher;
use crate::error::FedMgrError;
use crate::inbound::InboundLoop;
use crate::job_registry::JobRegistry;
use crate::job_update_loop::{JobUpdate, JobUpdateLoop};
use crate::membership::MembershipController;
use crate::peer_table::{PeerRecord, PeerTable};
use crate::ping_loop::PingLoop;
use fedmgr_core::{ClusterId, Federation};
use fedmgr_transport::{ConfigStoreEffects, SchedulerEffects, StateSaveEffects, TransportEffects};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const STATE_FILE: &str = "fed_mgr_state";

/// The running manager: holds the shared state plus the handles of every
/// spawned worker task, so `shutdown` can cancel and join them in order.
pub struct FedManager<S, T, C, St> {
    pub local: ClusterId,
    pub registry: Arc<JobRegistry>,
    pub peer_table: Arc<PeerTable>,
    pub federation: Arc<RwLock<Federation>>,
    pub config: FedMgrConfig,
    pub scheduler: Arc<S>,
    pub transport: Arc<T>,
    pub config_store: Arc<C>,
    pub state_save: Arc<St>,
    job_update_tx: mpsc::UnboundedSender<JobUpdate>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl<S, T, C, St> FedManager<S, T, C, St>
where
    S: SchedulerEffects + Send + Sync + 'static,
    T: TransportEffects + Send + Sync + 'static,
    C: ConfigStoreEffects + Send + Sync + 'static,
    St: StateSaveEffects + Send + Sync + 'static,
{
    /// Build a manager from a freshly fetched federation record and restored
    /// (or empty) job table, but do not yet spawn its worker loops. Returns
    /// the job-update receiver `start` needs, since the sender is retained
    /// on `self` for `enqueue_job_update`.
    pub fn new(
        local: ClusterId,
        config: FedMgrConfig,
        federation: Federation,
        restored_jobs: Vec<fedmgr_core::FedJobInfo>,
        scheduler: S,
        transport: T,
        config_store: C,
        state_save: St,
    ) -> (Self, mpsc::UnboundedReceiver<JobUpdate>) {
        let peers = federation
            .clusters
            .iter()
            .filter(|c| c.id != local)
            .map(|c| PeerRecord::new(c.id, c.name.clone(), c.host.clone(), c.port))
            .collect();
        let peer_table = PeerTable::with_peers(peers);
        let registry = JobRegistry::with_jobs(restored_jobs);

        let (job_update_tx, job_update_rx) = mpsc::unbounded_channel();
        let manager = Self {
            local,
            registry: Arc::new(registry),
            peer_table: Arc::new(peer_table),
            federation: Arc::new(RwLock::new(federation)),
            config,
            scheduler: Arc::new(scheduler),
            transport: Arc::new(transport),
            config_store: Arc::new(config_store),
            state_save: Arc::new(state_save),
            job_update_tx,
            cancel: CancellationToken::new(),
            tasks: Vec::new(),
        };
        (manager, job_update_rx)
    }

    /// Queue a job-update event onto the ordered FIFO; the
    /// caller-facing scheduler RPC handlers use this to hand work to the one
    /// consuming task.
    pub fn enqueue_job_update(&self, update: JobUpdate) -> Result<(), FedMgrError> {
        self.job_update_tx
            .send(update)
            .map_err(|_| FedMgrError::policy("job update loop has shut down"))
    }

    /// Spawn every worker task and start running. Opens sends to every peer
    /// first.
    pub async fn start(&mut self, job_update_rx: mpsc::UnboundedReceiver<JobUpdate>) -> Result<(), FedMgrError> {
        self.peer_table.open_all(self.transport.as_ref()).await?;
        self.transport.start_recv_server().await?;

        let job_update_loop = JobUpdateLoop {
            registry: self.registry.clone(),
            peer_table: self.peer_table.clone(),
            local: self.local,
            scheduler: ArcScheduler(self.scheduler.clone()),
            update_retry_max: self.config.update_retry_max,
            update_retry_delay_ms: self.config.update_retry_delay_ms,
            update_stale_secs: self.config.update_stale_secs,
        };
        self.tasks.push(tokio::spawn(async move {
            job_update_loop.run(job_update_rx).await;
        }));

        let agent_loop = AgentLoop {
            peer_table: self.peer_table.clone(),
            transport: self.transport.clone(),
            tick: Duration::from_secs(self.config.agent_tick_secs),
            rpc_timeout: Duration::from_millis(self.config.protocol_timeout_ms),
            comm_fail_log_window_secs: self.config.comm_fail_log_window_secs as i64,
            backoff_warn_at_secs: self.config.backoff_warn_at_secs,
        };
        let agent_cancel = self.cancel.clone();
        self.tasks.push(tokio::spawn(async move {
            agent_loop.run(agent_cancel).await;
        }));

        let ping_loop = PingLoop {
            peer_table: self.peer_table.clone(),
            transport: self.transport.clone(),
            interval: Duration::from_secs(self.config.ping_interval_secs),
            timeout: Duration::from_millis(self.config.protocol_timeout_ms),
        };
        let ping_cancel = self.cancel.clone();
        self.tasks.push(tokio::spawn(async move {
            ping_loop.run(ping_cancel).await;
        }));

        let drain_watcher = DrainWatcher {
            registry: self.registry.clone(),
            config_store: self.config_store.clone(),
            federation: self.federation.clone(),
            local: self.local,
            interval: Duration::from_secs(self.config.drain_watch_interval_secs),
        };
        let drain_cancel = self.cancel.clone();
        self.tasks.push(tokio::spawn(async move {
            drain_watcher.run(drain_cancel).await;
        }));

        let inbound_loop = InboundLoop {
            registry: self.registry.clone(),
            local: self.local,
            job_update_tx: self.job_update_tx.clone(),
            lock_stale_secs: self.config.update_stale_secs,
            scheduler: self.scheduler.clone(),
        };
        let inbound_transport = self.transport.clone();
        let inbound_cancel = self.cancel.clone();
        self.tasks.push(tokio::spawn(async move {
            inbound_loop.run(inbound_transport.as_ref(), inbound_cancel).await;
        }));

        let membership = MembershipController::new(
            self.peer_table.clone(),
            self.federation.clone(),
            self.local,
            self.config_store.clone(),
            self.transport.clone(),
        );
        let config_updates = self.config_store.subscribe_updates();
        self.tasks.push(tokio::spawn(async move {
            membership.run(config_updates).await;
        }));

        Ok(())
    }

    /// Persist the current job table and federation record to the state-save
    /// directory.
    pub async fn save_snapshot(&self, written_at: i64) -> Result<(), FedMgrError> {
        let federation = self.federation.read().await.clone();
        let federation_record = bincode::serialize(&federation).map_err(fedmgr_messages::WireError::codec)?;
        let jobs = self.registry.snapshot_all().await;
        let bytes = fedmgr_core::encode_snapshot(written_at, &federation_record, Some(&jobs));
        self.state_save.atomic_replace(STATE_FILE, &bytes).await?;
        Ok(())
    }

    /// Cancel every worker task, close every peer connection, and wait for
    /// tasks to finish.
    pub async fn shutdown(mut self) -> Result<(), FedMgrError> {
        self.cancel.cancel();
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
        self.peer_table.close_all(self.transport.as_ref()).await?;
        self.transport.stop_recv_server().await?;
        Ok(())
    }
}

/// `JobUpdateLoop` is generic over `SchedulerEffects` by value; this adapter
/// lets the manager hand it an `Arc<S>` without requiring `S: Clone`.
struct ArcScheduler<S>(Arc<S>);

#[async_trait::async_trait]
impl<S: SchedulerEffects> SchedulerEffects for ArcScheduler<S> {
    async fn next_local_id(&self) -> Result<u32, fedmgr_transport::SchedulerError> {
        self.0.next_local_id().await
    }
    async fn allocate(
        &self,
        job_id: fedmgr_core::FedJobId,
        descriptor: &[u8],
        submitter_uid: u32,
    ) -> Result<fedmgr_transport::AllocateOutcome, fedmgr_transport::SchedulerError> {
        self.0.allocate(job_id, descriptor, submitter_uid).await
    }
    async fn update(
        &self,
        job_id: fedmgr_core::FedJobId,
        descriptor: &[u8],
        submitter_uid: u32,
        requester_uid: u32,
    ) -> Result<(), fedmgr_transport::SchedulerError> {
        self.0.update(job_id, descriptor, submitter_uid, requester_uid).await
    }
    async fn requeue(
        &self,
        job_id: fedmgr_core::FedJobId,
        state: u32,
        requester_uid: u32,
    ) -> Result<(), fedmgr_transport::SchedulerError> {
        self.0.requeue(job_id, state, requester_uid).await
    }
    async fn revoke(
        &self,
        job_id: fedmgr_core::FedJobId,
        is_complete: bool,
        return_code: i32,
        start_time: i64,
    ) -> Result<(), fedmgr_transport::SchedulerError> {
        self.0.revoke(job_id, is_complete, return_code, start_time).await
    }
    async fn find_job(&self, job_id: fedmgr_core::FedJobId) -> Result<bool, fedmgr_transport::SchedulerError> {
        self.0.find_job(job_id).await
    }
    async fn kill_step(&self, job_id: fedmgr_core::FedJobId, requester_uid: u32) -> Result<(), fedmgr_transport::SchedulerError> {
        self.0.kill_step(job_id, requester_uid).await
    }
    async fn purge_job(&self, job_id: fedmgr_core::FedJobId) -> Result<(), fedmgr_transport::SchedulerError> {
        self.0.purge_job(job_id).await
    }
    async fn job_run_state(
        &self,
        job_id: fedmgr_core::FedJobId,
    ) -> Result<Option<(fedmgr_transport::JobRunState, i32)>, fedmgr_transport::SchedulerError> {
        self.0.job_run_state(job_id).await
    }
    async fn requeue_hold(
        &self,
        job_id: fedmgr_core::FedJobId,
    ) -> Result<fedmgr_core::RequeueHold, fedmgr_transport::SchedulerError> {
        self.0.requeue_hold(job_id).await
    }
}
