//! A complete retrieval stack over in-memory sessions.

use crate::{
    error::ConnectionRejected,
    pool::{CandidateInfo, PoolAction, PoolHandle, PoolManager},
    test_utils::TestPeer,
    Distributor, DistributorHandle, PeerRegistry, RetrievalManager,
};
use futures::StreamExt;
use les_network_p2p::MemoryCandidateStore;
use les_network_types::{DistributorConfig, PeerId, PoolConfig, RetrievalConfig};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tracing::trace;

/// Registry, pool, distributor and retrieval manager wired together.
///
/// The pool runs on its own task. [`TestPeer`]s connect as incoming sessions; outbound dials
/// requested by the pool fail immediately.
#[derive(Debug)]
pub struct Testnet {
    registry: PeerRegistry,
    pool: PoolHandle,
    distributor: DistributorHandle,
    retrieval: RetrievalManager,
    store: Arc<MemoryCandidateStore>,
    to_pool: mpsc::UnboundedSender<DriverCommand>,
    actions: Arc<parking_lot::Mutex<Vec<PoolAction>>>,
    tasks: Vec<JoinHandle<()>>,
}

impl Testnet {
    /// Spawns a stack with test presets.
    ///
    /// The pool is configured not to dial on its own.
    pub fn spawn() -> Self {
        Self::spawn_with(
            PoolConfig::test().with_target_peers(0),
            DistributorConfig::test(),
            RetrievalConfig::test(),
        )
    }

    /// Spawns a stack with the given configs.
    pub fn spawn_with(
        pool_config: PoolConfig,
        distributor_config: DistributorConfig,
        retrieval_config: RetrievalConfig,
    ) -> Self {
        let registry = PeerRegistry::new();
        let store = Arc::new(MemoryCandidateStore::default());
        let pool = PoolManager::new(pool_config, registry.clone(), store.clone());
        let pool_handle = pool.handle();

        let (distributor, distributor_handle) =
            Distributor::new(registry.clone(), Arc::new(pool_handle.clone()), distributor_config);
        let retrieval = RetrievalManager::new(distributor_handle.clone(), retrieval_config);

        let (to_pool, from_testnet) = mpsc::unbounded_channel();
        let actions = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let driver = PoolDriver { pool, commands: from_testnet, actions: actions.clone() };

        let tasks = vec![tokio::spawn(distributor), tokio::spawn(driver.run())];

        Self {
            registry,
            pool: pool_handle,
            distributor: distributor_handle,
            retrieval,
            store,
            to_pool,
            actions,
            tasks,
        }
    }

    /// The live peer set.
    pub const fn registry(&self) -> &PeerRegistry {
        &self.registry
    }

    /// Handle to the pool.
    pub const fn pool(&self) -> &PoolHandle {
        &self.pool
    }

    /// Handle to the distributor.
    pub const fn distributor(&self) -> &DistributorHandle {
        &self.distributor
    }

    /// The retrieval entry point.
    pub const fn retrieval(&self) -> &RetrievalManager {
        &self.retrieval
    }

    /// Where the pool persists candidates.
    pub const fn store(&self) -> &Arc<MemoryCandidateStore> {
        &self.store
    }

    /// All actions the pool emitted so far.
    pub fn actions(&self) -> Vec<PoolAction> {
        self.actions.lock().clone()
    }

    /// Connects `peer` as an incoming session.
    pub async fn connect(&self, peer: &TestPeer) -> Result<(), ConnectionRejected> {
        let (tx, rx) = oneshot::channel();
        let sender = peer.spawn_session(self.distributor.clone());
        let _ = self.to_pool.send(DriverCommand::Connect {
            peer_id: peer.id(),
            addr: SocketAddr::from(([127, 0, 0, 1], 30303)),
            capabilities: peer.capabilities().clone(),
            sender,
            tx,
        });
        rx.await.unwrap_or(Err(ConnectionRejected::NotDialing))
    }

    /// Ends the session to `peer_id`.
    pub fn disconnect(&self, peer_id: PeerId) {
        let _ = self.to_pool.send(DriverCommand::Disconnect(peer_id));
    }

    /// Waits until the pool reports `peer_id` in a state matching `f`, for at most a second.
    pub async fn wait_for_candidate(
        &self,
        peer_id: PeerId,
        f: impl Fn(&CandidateInfo) -> bool,
    ) -> Option<CandidateInfo> {
        let poll = async {
            loop {
                if let Some(info) = self.pool.candidate(peer_id).await {
                    if f(&info) {
                        return info
                    }
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        };
        tokio::time::timeout(Duration::from_secs(1), poll).await.ok()
    }
}

impl Drop for Testnet {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

enum DriverCommand {
    Connect {
        peer_id: PeerId,
        addr: SocketAddr,
        capabilities: les_network_types::PeerCapabilities,
        sender: les_network_p2p::PeerRequestSender,
        tx: oneshot::Sender<Result<(), ConnectionRejected>>,
    },
    Disconnect(PeerId),
}

/// Owns the [`PoolManager`] and plays the network layer for it.
struct PoolDriver {
    pool: PoolManager,
    commands: mpsc::UnboundedReceiver<DriverCommand>,
    actions: Arc<parking_lot::Mutex<Vec<PoolAction>>>,
}

impl PoolDriver {
    async fn run(mut self) {
        loop {
            tokio::select! {
                cmd = self.commands.recv() => match cmd {
                    Some(DriverCommand::Connect { peer_id, addr, capabilities, sender, tx }) => {
                        let res =
                            self.pool.on_incoming_session(peer_id, addr, capabilities, sender);
                        let _ = tx.send(res);
                    }
                    Some(DriverCommand::Disconnect(peer_id)) => {
                        self.pool.on_session_closed(&peer_id)
                    }
                    None => return,
                },
                Some(action) = self.pool.next() => {
                    trace!(target: "net::test", ?action, "pool action");
                    if let PoolAction::Dial { peer_id, .. } = action {
                        self.pool.on_dial_failed(&peer_id);
                    }
                    self.actions.lock().push(action);
                }
            }
        }
    }
}
