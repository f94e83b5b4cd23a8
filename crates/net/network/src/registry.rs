//! The set of currently connected peers.

use crate::{error::RegistryError, flow::FlowEstimator};
use les_network_p2p::{LesMessage, PeerRequestSender, RequestError, RequestResult};
use les_network_types::{PeerCapabilities, PeerId, RequestClass};
use parking_lot::RwLock;
use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};
use tokio::sync::watch;
use tracing::{debug, trace};

/// Weight of a new round trip sample in the rolling average.
const SAMPLE_IMPACT: f64 = 0.1;

/// Amount of round trips before a request times out.
const TIMEOUT_SCALING: u32 = 3;

/// Round trip assumed for peers that have not answered anything yet.
pub const UNKNOWN_RTT: Duration = Duration::from_millis(100);

/// Tracks all connected peers.
///
/// This is the single source of truth for whether a peer is usable. Cloning is cheap, all clones
/// share the same set. Every mutation goes through one of the accessors below and is atomic with
/// respect to all other accessors; none of them block on anything but the internal lock.
#[derive(Debug, Clone, Default)]
pub struct PeerRegistry {
    inner: Arc<RegistryInner>,
}

#[derive(Debug)]
struct RegistryInner {
    peers: RwLock<HashMap<PeerId, ConnectedPeer>>,
    /// Bumped whenever a peer is added or removed.
    generation: watch::Sender<u64>,
}

impl Default for RegistryInner {
    fn default() -> Self {
        Self { peers: Default::default(), generation: watch::Sender::new(0) }
    }
}

// === impl PeerRegistry ===

impl PeerRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a connected peer.
    pub fn register(
        &self,
        capabilities: PeerCapabilities,
        sender: PeerRequestSender,
    ) -> Result<(), RegistryError> {
        let peer_id = sender.peer_id;
        {
            let mut peers = self.inner.peers.write();
            if peers.contains_key(&peer_id) {
                return Err(RegistryError::DuplicatePeer(peer_id))
            }
            debug!(target: "net::registry", ?peer_id, kind=?capabilities.kind, version=%capabilities.version, head=capabilities.head.number, "registered peer");
            peers.insert(peer_id, ConnectedPeer::new(capabilities, sender));
        }
        self.notify();
        Ok(())
    }

    /// Removes a peer, returning its last state.
    pub fn unregister(&self, peer_id: &PeerId) -> Option<PeerInfo> {
        let removed = self.inner.peers.write().remove(peer_id);
        let info = removed.map(|peer| peer.info(*peer_id));
        if info.is_some() {
            debug!(target: "net::registry", ?peer_id, "unregistered peer");
            self.notify();
        }
        info
    }

    /// Returns a receiver that observes a new value whenever the set of peers changes.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.inner.generation.subscribe()
    }

    /// Returns the peer with the lowest cost weighted responsiveness among those matching
    /// `predicate`.
    ///
    /// Ties are broken in favour of the peer that most recently delivered a useful response.
    pub fn best_peer(&self, mut predicate: impl FnMut(&PeerInfo) -> bool) -> Option<PeerInfo> {
        let peers = self.inner.peers.read();
        let mut best: Option<(u128, Option<Instant>, PeerInfo)> = None;
        for (id, peer) in peers.iter() {
            let info = peer.info(*id);
            if !predicate(&info) {
                continue
            }
            let score = info.score();
            let better = match &best {
                None => true,
                Some((best_score, best_success, _)) => {
                    score < *best_score ||
                        (score == *best_score && info.last_success > *best_success)
                }
            };
            if better {
                best = Some((score, info.last_success, info));
            }
        }
        best.map(|(_, _, info)| info)
    }

    /// Calls `visitor` for a snapshot of every connected peer.
    pub fn for_each(&self, mut visitor: impl FnMut(&PeerInfo)) {
        let peers = self.inner.peers.read();
        for (id, peer) in peers.iter() {
            visitor(&peer.info(*id));
        }
    }

    /// Returns a snapshot of the peer, if connected.
    pub fn get(&self, peer_id: &PeerId) -> Option<PeerInfo> {
        self.inner.peers.read().get(peer_id).map(|peer| peer.info(*peer_id))
    }

    /// Returns `true` if the peer is connected.
    pub fn contains(&self, peer_id: &PeerId) -> bool {
        self.inner.peers.read().contains_key(peer_id)
    }

    /// Number of connected peers.
    pub fn len(&self) -> usize {
        self.inner.peers.read().len()
    }

    /// Returns `true` if no peer is connected.
    pub fn is_empty(&self) -> bool {
        self.inner.peers.read().is_empty()
    }

    /// Ids of all connected peers.
    pub fn peer_ids(&self) -> Vec<PeerId> {
        self.inner.peers.read().keys().copied().collect()
    }

    /// Sends a request to a connected peer and accounts for it.
    ///
    /// Liveness is re-resolved here: a peer that disconnected since it was selected yields
    /// [`RequestError::ConnectionDropped`].
    pub fn send(&self, peer_id: &PeerId, message: LesMessage, flow_cost: u64) -> RequestResult<()> {
        let mut peers = self.inner.peers.write();
        let peer = peers.get_mut(peer_id).ok_or(RequestError::ConnectionDropped)?;
        let request_id = message.request_id;
        peer.sender.try_send(message)?;
        peer.on_request_sent(flow_cost);
        trace!(target: "net::registry", ?peer_id, request_id, inflight=peer.inflight, "sent request");
        Ok(())
    }

    /// Accounts for a request sent to the peer outside of [`Self::send`].
    pub fn on_request_sent(&self, peer_id: &PeerId, flow_cost: u64) {
        if let Some(peer) = self.inner.peers.write().get_mut(peer_id) {
            peer.on_request_sent(flow_cost);
        }
    }

    /// Records a useful response: updates the rolling round trip estimate and clears the
    /// degradation of the request class.
    pub fn on_response(
        &self,
        peer_id: &PeerId,
        class: RequestClass,
        rtt: Duration,
        buffer_value: Option<u64>,
    ) {
        if let Some(peer) = self.inner.peers.write().get_mut(peer_id) {
            peer.finish_request();
            peer.avg_rtt = Some(match peer.avg_rtt {
                Some(avg) => avg.mul_f64(1.0 - SAMPLE_IMPACT) + rtt.mul_f64(SAMPLE_IMPACT),
                None => rtt,
            });
            peer.recent_failures = peer.recent_failures.saturating_sub(1);
            peer.degraded.remove(&class);
            peer.last_success = Some(Instant::now());
            if let (Some(flow), Some(value)) = (peer.flow.as_mut(), buffer_value) {
                flow.on_buffer_value(value, Instant::now());
            }
        }
    }

    /// Records a failed request: counts the failure and degrades the peer for the class.
    pub fn on_request_failed(&self, peer_id: &PeerId, class: RequestClass) {
        if let Some(peer) = self.inner.peers.write().get_mut(peer_id) {
            peer.finish_request();
            peer.recent_failures = peer.recent_failures.saturating_add(1);
            *peer.degraded.entry(class).or_default() += 1;
            trace!(target: "net::registry", ?peer_id, %class, failures=peer.recent_failures, "request failed");
        }
    }

    /// Releases the in-flight slot of a request whose outcome no longer matters.
    pub fn on_request_abandoned(&self, peer_id: &PeerId) {
        if let Some(peer) = self.inner.peers.write().get_mut(peer_id) {
            peer.finish_request();
        }
    }

    /// Adopts a flow control buffer value reported by the peer.
    pub fn update_flow_buffer(&self, peer_id: &PeerId, value: u64) {
        let mut peers = self.inner.peers.write();
        if let Some(flow) = peers.get_mut(peer_id).and_then(|peer| peer.flow.as_mut()) {
            flow.on_buffer_value(value, Instant::now());
        }
    }

    fn notify(&self) {
        self.inner.generation.send_modify(|generation| *generation += 1);
    }
}

/// A registered peer.
#[derive(Debug)]
struct ConnectedPeer {
    capabilities: Arc<PeerCapabilities>,
    sender: PeerRequestSender,
    connected_at: Instant,
    avg_rtt: Option<Duration>,
    recent_failures: u32,
    last_success: Option<Instant>,
    last_used: Option<Instant>,
    inflight: usize,
    degraded: HashMap<RequestClass, u32>,
    flow: Option<FlowEstimator>,
}

impl ConnectedPeer {
    fn new(capabilities: PeerCapabilities, sender: PeerRequestSender) -> Self {
        let flow = capabilities.flow.map(FlowEstimator::new);
        Self {
            capabilities: Arc::new(capabilities),
            sender,
            connected_at: Instant::now(),
            avg_rtt: None,
            recent_failures: 0,
            last_success: None,
            last_used: None,
            inflight: 0,
            degraded: HashMap::new(),
            flow,
        }
    }

    fn on_request_sent(&mut self, flow_cost: u64) {
        let now = Instant::now();
        self.inflight += 1;
        self.last_used = Some(now);
        if let Some(flow) = self.flow.as_mut() {
            flow.consume(flow_cost, now);
        }
    }

    fn finish_request(&mut self) {
        self.inflight = self.inflight.saturating_sub(1);
    }

    fn info(&self, id: PeerId) -> PeerInfo {
        PeerInfo {
            id,
            capabilities: self.capabilities.clone(),
            connected_at: self.connected_at,
            avg_rtt: self.avg_rtt,
            recent_failures: self.recent_failures,
            last_success: self.last_success,
            last_used: self.last_used,
            inflight: self.inflight,
            degraded: self.degraded.clone(),
            flow: self.flow,
        }
    }
}

/// A snapshot of a connected peer.
#[derive(Debug, Clone)]
pub struct PeerInfo {
    /// The peer's id.
    pub id: PeerId,
    /// What the peer declared in the handshake.
    pub capabilities: Arc<PeerCapabilities>,
    /// When the peer was registered.
    pub connected_at: Instant,
    /// Rolling average round trip of useful responses.
    pub avg_rtt: Option<Duration>,
    /// Failures not yet offset by successes.
    pub recent_failures: u32,
    /// When the peer last delivered a useful response.
    pub last_success: Option<Instant>,
    /// When the peer was last sent a request.
    pub last_used: Option<Instant>,
    /// Requests currently outstanding at the peer.
    pub inflight: usize,
    /// Failures per request class since the last success of that class.
    pub degraded: HashMap<RequestClass, u32>,
    /// The estimated flow control buffer, if the peer announced flow control.
    pub flow: Option<FlowEstimator>,
}

impl PeerInfo {
    /// Failures of the given class since its last success.
    pub fn degradation(&self, class: RequestClass) -> u32 {
        self.degraded.get(&class).copied().unwrap_or_default()
    }

    /// The round trip estimate, or [`UNKNOWN_RTT`] without samples.
    pub fn rtt(&self) -> Duration {
        self.avg_rtt.unwrap_or(UNKNOWN_RTT)
    }

    /// How long to wait for a response before giving up on the peer.
    pub fn request_timeout(&self, min: Duration, max: Duration) -> Duration {
        match self.avg_rtt {
            Some(rtt) => (rtt * TIMEOUT_SCALING).clamp(min, max),
            None => max,
        }
    }

    /// How long until the peer's flow control buffer covers a request of `cost`.
    ///
    /// Returns `None` if it never will.
    pub fn flow_wait(&self, cost: u64) -> Option<Duration> {
        match &self.flow {
            Some(flow) => flow.wait_time(cost, Instant::now()),
            None => Some(Duration::ZERO),
        }
    }

    /// Cost weighted responsiveness, lower is better.
    fn score(&self) -> u128 {
        self.capabilities.cost_weight() as u128 *
            self.rtt().as_micros().max(1) *
            (1 + self.recent_failures as u128)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use les_network_types::{HeadInfo, ProtocolVersion, RequestCost};
    use tokio::sync::mpsc;

    fn peer(weight: u64) -> (PeerCapabilities, PeerRequestSender, mpsc::Receiver<LesMessage>) {
        let (tx, rx) = mpsc::channel(8);
        let caps = PeerCapabilities::les_server(ProtocolVersion::Lpv2, HeadInfo::default())
            .with_cost(RequestClass::Headers, RequestCost { base: weight, per_item: 0 });
        (caps, PeerRequestSender::new(PeerId::random(), tx), rx)
    }

    #[test]
    fn rejects_duplicates() {
        let registry = PeerRegistry::new();
        let (caps, sender, _rx) = peer(1);
        let id = sender.peer_id;
        registry.register(caps.clone(), sender.clone()).unwrap();
        assert_eq!(registry.register(caps, sender), Err(RegistryError::DuplicatePeer(id)));
        assert_eq!(registry.len(), 1);

        assert!(registry.unregister(&id).is_some());
        assert!(registry.unregister(&id).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn best_peer_prefers_cheap_and_responsive() {
        let registry = PeerRegistry::new();
        let (caps, cheap, _rx1) = peer(1);
        registry.register(caps, cheap.clone()).unwrap();
        let (caps, pricey, _rx2) = peer(10);
        registry.register(caps, pricey.clone()).unwrap();

        assert_eq!(registry.best_peer(|_| true).unwrap().id, cheap.peer_id);

        // a slow cheap peer loses against a fast expensive one
        registry.on_response(&cheap.peer_id, RequestClass::Headers, Duration::from_secs(5), None);
        let fast = Duration::from_millis(10);
        registry.on_response(&pricey.peer_id, RequestClass::Headers, fast, None);
        assert_eq!(registry.best_peer(|_| true).unwrap().id, pricey.peer_id);

        assert_eq!(
            registry.best_peer(|p| p.id != pricey.peer_id).unwrap().id,
            cheap.peer_id
        );
        assert!(registry.best_peer(|_| false).is_none());
    }

    #[test]
    fn ties_break_by_most_recent_success() {
        let registry = PeerRegistry::new();
        let (caps, a, _rx1) = peer(1);
        registry.register(caps, a.clone()).unwrap();
        let (caps, b, _rx2) = peer(1);
        registry.register(caps, b.clone()).unwrap();

        let rtt = Duration::from_millis(50);
        registry.on_response(&a.peer_id, RequestClass::Headers, rtt, None);
        std::thread::sleep(Duration::from_millis(2));
        registry.on_response(&b.peer_id, RequestClass::Headers, rtt, None);
        assert_eq!(registry.best_peer(|_| true).unwrap().id, b.peer_id);
    }

    #[test]
    fn tracks_inflight_and_degradation() {
        let registry = PeerRegistry::new();
        let (caps, sender, mut rx) = peer(1);
        let id = sender.peer_id;
        registry.register(caps, sender).unwrap();

        let message = les_network_p2p::OdrRequest::Header { number: 0 }
            .to_message(ProtocolVersion::Lpv2, 7)
            .unwrap();
        registry.send(&id, message, 0).unwrap();
        assert_eq!(rx.try_recv().unwrap().request_id, 7);
        assert_eq!(registry.get(&id).unwrap().inflight, 1);

        registry.on_request_failed(&id, RequestClass::Headers);
        let info = registry.get(&id).unwrap();
        assert_eq!(info.inflight, 0);
        assert_eq!(info.degradation(RequestClass::Headers), 1);
        assert_eq!(info.degradation(RequestClass::Bodies), 0);

        registry.on_response(&id, RequestClass::Headers, Duration::from_millis(20), None);
        assert_eq!(registry.get(&id).unwrap().degradation(RequestClass::Headers), 0);
    }

    #[test]
    fn send_to_missing_peer_is_dropped_connection() {
        let registry = PeerRegistry::new();
        let message = les_network_p2p::OdrRequest::Header { number: 0 }
            .to_message(ProtocolVersion::Lpv2, 1)
            .unwrap();
        assert_eq!(
            registry.send(&PeerId::random(), message, 0),
            Err(RequestError::ConnectionDropped)
        );
    }

    #[test]
    fn adaptive_timeout_is_clamped() {
        let registry = PeerRegistry::new();
        let (caps, sender, _rx) = peer(1);
        let id = sender.peer_id;
        registry.register(caps, sender).unwrap();
        let (min, max) = (Duration::from_millis(500), Duration::from_secs(10));

        assert_eq!(registry.get(&id).unwrap().request_timeout(min, max), max);
        registry.on_response(&id, RequestClass::Headers, Duration::from_millis(10), None);
        assert_eq!(registry.get(&id).unwrap().request_timeout(min, max), min);
        registry.on_response(&id, RequestClass::Headers, Duration::from_secs(100), None);
        assert_eq!(registry.get(&id).unwrap().request_timeout(min, max), max);
    }

    #[tokio::test]
    async fn notifies_on_changes() {
        let registry = PeerRegistry::new();
        let mut updates = registry.subscribe();
        let (caps, sender, _rx) = peer(1);
        let id = sender.peer_id;
        registry.register(caps, sender).unwrap();
        updates.changed().await.unwrap();
        registry.unregister(&id);
        updates.changed().await.unwrap();
        assert_eq!(*updates.borrow(), 2);
    }
}
