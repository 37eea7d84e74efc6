//! The Ping Loop. Pure I/O liveness
//! check against each open peer, independent of the agent queue.

use crate::peer_table::PeerTable;
use fedmgr_transport::TransportEffects;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub struct PingLoop<T> {
    pub peer_table: Arc<PeerTable>,
    pub transport: Arc<T>,
    pub interval: Duration,
    pub timeout: Duration,
}

impl<T: TransportEffects> PingLoop<T> {
    pub async fn run(&self, cancel: CancellationToken) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(self.interval) => {}
            }
            self.ping_all().await;
        }
    }

    pub async fn ping_all(&self) {
        for peer in self.peer_table.peer_ids().await {
            let Some(record) = self.peer_table.get(peer).await else { continue };
            let open = record.lock().await.send_open;
            if !open {
                continue;
            }
            // An empty send_recv round trip stands in for the original's
            // keepalive RPC; a real transport answers with a zero-length ack.
            if let Err(err) = self.transport.send_recv(peer, Vec::new(), self.timeout).await {
                tracing::warn!(peer = %peer, error = %err, "ping failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::peer_table::PeerRecord;
    use fedmgr_core::ClusterId;
    use fedmgr_transport::fakes::FakeTransport;

    #[tokio::test]
    async fn ping_skips_peers_without_open_send() {
        let table = Arc::new(PeerTable::new());
        let peer = ClusterId::new(1).unwrap();
        table.insert(PeerRecord::new(peer, "a", "h", 1)).await;
        let transport = Arc::new(FakeTransport::new());
        let loop_ = PingLoop {
            peer_table: table,
            transport: transport.clone(),
            interval: Duration::from_secs(5),
            timeout: Duration::from_secs(1),
        };
        loop_.ping_all().await;
        assert!(transport.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn ping_pings_open_peers() {
        let table = Arc::new(PeerTable::new());
        let peer = ClusterId::new(1).unwrap();
        table.insert(PeerRecord::new(peer, "a", "h", 1)).await;
        let transport = Arc::new(FakeTransport::new());
        table.open(peer, transport.as_ref()).await.unwrap();
        let loop_ = PingLoop {
            peer_table: table,
            transport: transport.clone(),
            interval: Duration::from_secs(5),
            timeout: Duration::from_secs(1),
        };
        loop_.ping_all().await;
        assert_eq!(transport.sent.lock().unwrap().len(), 1);
    }
}
