use crate::{
    error::ConnectionRejected,
    feedback::{AttemptOutcome, PeerFeedback},
    pool::{
        candidate::{Candidate, CandidateInfo, CandidateState, Direction},
        PoolAction,
    },
    registry::PeerRegistry,
};
use futures::{stream::BoxStream, Stream, StreamExt};
use les_network_p2p::{CandidateStore, PeerRequestSender};
use les_network_types::{
    BackoffKind, CandidateTier, ConnectionsConfig, NodeRecord, PeerBackoffDurations,
    PeerCapabilities, PeerId, PoolConfig, Reputation, ReputationChangeKind,
    ReputationChangeOutcome, ReputationChangeWeights, RequestClass,
};
use std::{
    collections::{hash_map::Entry, HashMap, VecDeque},
    fmt,
    net::SocketAddr,
    pin::Pin,
    task::{Context, Poll},
    time::{Duration, Instant},
};
use tokio::{
    sync::{mpsc, oneshot},
    time::Interval,
};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info, trace, warn};

/// A communication channel to the [`PoolManager`] to apply manual changes to the candidate set.
///
/// It is also the [`PeerFeedback`] the distributor reports attempt outcomes to.
#[derive(Clone, Debug)]
pub struct PoolHandle {
    /// Sender half of command channel back to the [`PoolManager`]
    manager_tx: mpsc::UnboundedSender<PoolCommand>,
}

// === impl PoolHandle ===

impl PoolHandle {
    fn send(&self, cmd: PoolCommand) {
        let _ = self.manager_tx.send(cmd);
    }

    /// Adds a dial candidate.
    pub fn add_candidate(&self, record: NodeRecord) {
        self.send(PoolCommand::Add(record));
    }

    /// Adds a trusted candidate, or promotes a known one.
    pub fn add_trusted(&self, record: NodeRecord) {
        self.send(PoolCommand::AddTrusted(record));
    }

    /// Send a reputation change for the given candidate.
    pub fn reputation_change(&self, peer_id: PeerId, kind: ReputationChangeKind) {
        self.send(PoolCommand::ReputationChange(peer_id, kind));
    }

    /// Returns a candidate by its [`PeerId`], or `None` if it is unknown.
    pub async fn candidate(&self, peer_id: PeerId) -> Option<CandidateInfo> {
        let (tx, rx) = oneshot::channel();
        self.send(PoolCommand::GetCandidate(peer_id, tx));

        rx.await.unwrap_or(None)
    }

    /// Returns all known candidates.
    pub async fn all_candidates(&self) -> Vec<CandidateInfo> {
        let (tx, rx) = oneshot::channel();
        self.send(PoolCommand::GetCandidates(tx));

        rx.await.unwrap_or_default()
    }
}

impl PeerFeedback for PoolHandle {
    fn on_attempt(&self, peer_id: PeerId, class: RequestClass, outcome: AttemptOutcome) {
        self.send(PoolCommand::Feedback { peer_id, class, outcome });
    }
}

/// Maintains the set of _all_ dial candidates and turns them into connected peers.
///
/// The manager decides whom to dial, see [`PoolAction`]; the surrounding network layer performs
/// the dial and reports back through the session hooks. Connected peers are registered with the
/// [`PeerRegistry`], banned ones removed from it. Every reputation update is written to the
/// [`CandidateStore`].
#[must_use = "the pool does nothing unless polled"]
pub struct PoolManager {
    /// All known candidates
    candidates: HashMap<PeerId, Candidate>,
    /// The live peer set, written on connect, disconnect and ban.
    registry: PeerRegistry,
    /// Where candidate records are persisted.
    store: Box<dyn CandidateStore>,
    /// Copy of the sender half, so new [`PoolHandle`] can be created on demand.
    manager_tx: mpsc::UnboundedSender<PoolCommand>,
    /// Receiver half of the command channel.
    handle_rx: UnboundedReceiverStream<PoolCommand>,
    /// Feed of newly discovered candidates, if attached.
    discovery: Option<BoxStream<'static, NodeRecord>>,
    /// Buffered actions until the manager is polled.
    queued_actions: VecDeque<PoolAction>,
    /// Interval for triggering dials if there are free slots.
    refill_slots_interval: Interval,
    /// Interval at which backoffs are released and stuck dials expired.
    release_interval: Interval,
    /// How to weigh reputation changes
    reputation_weights: ReputationChangeWeights,
    /// Tracks current slot stats.
    connection_info: ConnectionInfo,
    /// Tracks currently backed off candidates.
    backed_off_candidates: HashMap<PeerId, Instant>,
    /// How long candidates are put in timeout after failures.
    backoff_durations: PeerBackoffDurations,
    /// How long a dial may take before it counts as failed.
    dial_timeout: Duration,
    /// The connection lifetime at which a drop costs half the full penalty.
    target_connection_time: Duration,
    /// Candidates below this reputation are not dialed, unless trusted.
    min_dial_reputation: Reputation,
    /// Consecutive validation failures that get a candidate banned.
    max_invalid_responses: u32,
    /// Dial failures before the backoff escalates.
    short_retry_count: u32,
    /// If non-trusted candidates should be connected to
    trusted_nodes_only: bool,
    /// Timestamp of the last reputation decay.
    last_tick: Instant,
}

impl PoolManager {
    /// Create a new instance with the given config.
    ///
    /// Candidates persisted in `store` are restored; bootnodes and trusted nodes from the config
    /// are added on top.
    pub fn new(
        config: PoolConfig,
        registry: PeerRegistry,
        store: impl CandidateStore + 'static,
    ) -> Self {
        let PoolConfig {
            refill_slots_interval,
            release_interval,
            dial_timeout,
            target_connection_time,
            trusted_nodes,
            trusted_nodes_only,
            bootnodes,
            min_dial_reputation,
            max_invalid_responses,
            short_retry_count,
            connection_info,
            reputation_weights,
            backoff_durations,
        } = config;
        let (manager_tx, handle_rx) = mpsc::unbounded_channel();
        let now = Instant::now();

        let mut candidates = match store.load() {
            Ok(records) => {
                info!(target: "net::pool", candidates=records.len(), "restored candidates");
                records
                    .into_iter()
                    .map(|(id, record)| (id, Candidate::from_record(record)))
                    .collect::<HashMap<_, _>>()
            }
            Err(err) => {
                warn!(target: "net::pool", %err, "failed to load candidates, starting empty");
                HashMap::new()
            }
        };

        for NodeRecord { id, address } in bootnodes {
            candidates.entry(id).or_insert_with(|| Candidate::new(address));
        }

        for NodeRecord { id, address } in trusted_nodes {
            candidates.entry(id).or_insert_with(|| Candidate::trusted(address)).tier =
                CandidateTier::Trusted;
        }

        Self {
            candidates,
            registry,
            store: Box::new(store),
            manager_tx,
            handle_rx: UnboundedReceiverStream::new(handle_rx),
            discovery: None,
            queued_actions: Default::default(),
            refill_slots_interval: tokio::time::interval_at(
                tokio::time::Instant::from_std(now + refill_slots_interval),
                refill_slots_interval,
            ),
            release_interval: tokio::time::interval_at(
                tokio::time::Instant::from_std(now + release_interval),
                release_interval,
            ),
            reputation_weights,
            connection_info: ConnectionInfo::new(connection_info),
            backed_off_candidates: Default::default(),
            backoff_durations,
            dial_timeout,
            target_connection_time,
            min_dial_reputation,
            max_invalid_responses,
            short_retry_count,
            trusted_nodes_only,
            last_tick: now,
        }
    }

    /// Attaches a discovery feed. Every record it yields is added as a candidate.
    pub fn with_discovery(
        mut self,
        discovery: impl Stream<Item = NodeRecord> + Send + 'static,
    ) -> Self {
        self.discovery = Some(discovery.boxed());
        self
    }

    /// Returns a new [`PoolHandle`] that can send commands to this type.
    pub fn handle(&self) -> PoolHandle {
        PoolHandle { manager_tx: self.manager_tx.clone() }
    }

    /// The registry this pool feeds.
    pub const fn registry(&self) -> &PeerRegistry {
        &self.registry
    }

    /// Returns the number of known candidates
    #[inline]
    pub fn num_candidates(&self) -> usize {
        self.candidates.len()
    }

    /// Returns the number of currently connected candidates.
    #[inline]
    pub const fn num_connected(&self) -> usize {
        self.connection_info.num_inbound + self.connection_info.num_outbound
    }

    /// Returns the number of dials in progress.
    #[inline]
    pub const fn num_dialing(&self) -> usize {
        self.connection_info.num_dialing
    }

    /// Returns the number of currently backed off candidates.
    #[inline]
    pub fn num_backed_off(&self) -> usize {
        self.backed_off_candidates.len()
    }

    /// Returns a snapshot of a candidate.
    pub fn candidate(&self, peer_id: &PeerId) -> Option<CandidateInfo> {
        self.candidates.get(peer_id).map(|candidate| candidate.info(*peer_id))
    }

    /// Returns the reputation of a candidate.
    pub fn reputation(&self, peer_id: &PeerId) -> Option<Reputation> {
        self.candidates.get(peer_id).map(|candidate| candidate.reputation)
    }

    /// Adds a dial candidate, if not yet known.
    pub fn add_candidate(&mut self, record: NodeRecord) {
        let NodeRecord { id, address } = record;
        match self.candidates.entry(id) {
            Entry::Occupied(mut entry) => {
                // refresh the address of candidates we are not connected to
                let candidate = entry.get_mut();
                if !candidate.state.is_connected() && !candidate.is_banned() {
                    candidate.addr = address;
                }
            }
            Entry::Vacant(entry) => {
                trace!(target: "net::pool", peer_id=?id, ?address, "discovered candidate");
                entry.insert(Candidate::new(address));
                self.queued_actions.push_back(PoolAction::CandidateAdded(id));
            }
        }
    }

    /// Adds a trusted candidate, or promotes a known one.
    pub fn add_trusted(&mut self, record: NodeRecord) {
        let NodeRecord { id, address } = record;
        match self.candidates.entry(id) {
            Entry::Occupied(mut entry) => {
                let candidate = entry.get_mut();
                candidate.tier = CandidateTier::Trusted;
            }
            Entry::Vacant(entry) => {
                entry.insert(Candidate::trusted(address));
                self.queued_actions.push_back(PoolAction::CandidateAdded(id));
            }
        }
    }

    /// Apply the corresponding reputation change to the given candidate and persist it.
    pub fn apply_reputation_change(&mut self, peer_id: &PeerId, rep: ReputationChangeKind) {
        let outcome = if let Some(candidate) = self.candidates.get_mut(peer_id) {
            if rep.is_reset() {
                candidate.reset_reputation()
            } else {
                let mut change = self.reputation_weights.change(rep);
                if candidate.is_trusted() {
                    change = change.capped_for_trusted();
                }
                candidate.apply_reputation(change.as_i32())
            }
        } else {
            return
        };

        self.persist(peer_id);

        match outcome {
            ReputationChangeOutcome::None => {}
            ReputationChangeOutcome::Ban | ReputationChangeOutcome::DisconnectAndBan => {
                self.ban_candidate(*peer_id)
            }
        }
    }

    /// Handles the outcome of a request attempt reported by the distributor.
    ///
    /// Invalid responses count as strikes; the candidate is banned once it collects
    /// `max_invalid_responses` of them without a success in between.
    pub fn on_attempt(&mut self, peer_id: PeerId, class: RequestClass, outcome: AttemptOutcome) {
        let strikes = {
            let Some(candidate) = self.candidates.get_mut(&peer_id) else { return };
            match outcome {
                AttemptOutcome::Success { .. } => candidate.invalid_strikes = 0,
                AttemptOutcome::Invalid => candidate.invalid_strikes += 1,
                AttemptOutcome::Timeout | AttemptOutcome::Malformed => {}
            }
            candidate.invalid_strikes
        };
        trace!(target: "net::pool", ?peer_id, %class, ?outcome, strikes, "attempt feedback");

        self.apply_reputation_change(&peer_id, outcome.reputation_change());

        if strikes >= self.max_invalid_responses {
            self.ban_candidate(peer_id);
        }
    }

    /// Bans a candidate for the lifetime of the pool: it is disconnected, removed from the
    /// registry and never dialed or accepted again.
    ///
    /// Trusted candidates are never banned.
    fn ban_candidate(&mut self, peer_id: PeerId) {
        let Some(candidate) = self.candidates.get_mut(&peer_id) else { return };
        if candidate.is_trusted() || candidate.is_banned() {
            return
        }
        let previous = candidate.state;
        candidate.state = CandidateState::Banned;
        candidate.backed_off = false;
        debug!(target: "net::pool", ?peer_id, reputation=candidate.reputation, "banned candidate");

        self.connection_info.decr_state(previous);
        self.backed_off_candidates.remove(&peer_id);
        if previous.is_connected() {
            self.registry.unregister(&peer_id);
            self.queued_actions.push_back(PoolAction::Disconnect { peer_id });
        }
        self.queued_actions.push_back(PoolAction::Ban { peer_id });
    }

    /// Temporarily puts the candidate in timeout
    fn backoff_candidate_until(&mut self, peer_id: PeerId, until: Instant) {
        trace!(target: "net::pool", ?peer_id, "backing off");

        if let Some(candidate) = self.candidates.get_mut(&peer_id) {
            candidate.backed_off = true;
            self.backed_off_candidates.insert(peer_id, until);
        }
    }

    /// Writes the candidate's record to the store.
    fn persist(&self, peer_id: &PeerId) {
        let Some(candidate) = self.candidates.get(peer_id) else { return };
        if let Err(err) = self.store.store(*peer_id, candidate.record()) {
            warn!(target: "net::pool", ?peer_id, %err, "failed to persist candidate");
        }
    }

    /// Called when a dial scheduled by a [`PoolAction::Dial`] completed the handshake.
    ///
    /// Registers the peer with the registry. Fails if the dial is no longer pending, in which case
    /// the connection should be closed.
    pub fn on_dial_succeeded(
        &mut self,
        peer_id: PeerId,
        capabilities: PeerCapabilities,
        sender: PeerRequestSender,
    ) -> Result<(), ConnectionRejected> {
        let Some(candidate) = self.candidates.get_mut(&peer_id) else {
            return Err(ConnectionRejected::NotDialing)
        };
        match candidate.state {
            CandidateState::Dialing { .. } => {}
            CandidateState::Banned => return Err(ConnectionRejected::Banned),
            _ => return Err(ConnectionRejected::NotDialing),
        }
        self.connection_info.decr_dialing();

        if let Err(err) = self.registry.register(capabilities, sender) {
            candidate.state = CandidateState::Discovered;
            return Err(err.into())
        }

        // start a new tick, so the peer is not immediately rewarded for the time since last tick
        self.tick();

        if let Some(candidate) = self.candidates.get_mut(&peer_id) {
            candidate.state =
                CandidateState::Connected { direction: Direction::Outgoing, since: Instant::now() };
            candidate.fail_streak = 0;
            candidate.touch();
        }
        self.connection_info.inc_out();
        debug!(target: "net::pool", ?peer_id, "dial succeeded");
        self.persist(&peer_id);
        Ok(())
    }

    /// Called when a dial scheduled by a [`PoolAction::Dial`] failed.
    pub fn on_dial_failed(&mut self, peer_id: &PeerId) {
        self.on_dial_failure(peer_id, None)
    }

    /// Penalizes a failed dial and backs the candidate off, for longer the more often it failed.
    ///
    /// `kind` overrides the backoff kind derived from the failure streak.
    fn on_dial_failure(&mut self, peer_id: &PeerId, kind: Option<BackoffKind>) {
        let until = {
            let Some(candidate) = self.candidates.get_mut(peer_id) else { return };
            if !candidate.state.is_dialing() {
                return
            }
            candidate.state = CandidateState::Discovered;
            candidate.fail_streak = candidate.fail_streak.saturating_add(1);
            let streak = candidate.fail_streak;
            let kind = kind
                .unwrap_or_else(|| BackoffKind::for_dial_failure(streak, self.short_retry_count));
            debug!(target: "net::pool", ?peer_id, streak, ?kind, "dial failed");
            self.backoff_durations.backoff_until(kind, streak)
        };
        self.connection_info.decr_dialing();
        self.backoff_candidate_until(*peer_id, until);
        self.apply_reputation_change(peer_id, ReputationChangeKind::FailedToDial);
    }

    /// Called when a remote established a session with us.
    ///
    /// Banned candidates are rejected, as is everyone once the inbound slots are taken. Unknown
    /// remotes become candidates.
    pub fn on_incoming_session(
        &mut self,
        peer_id: PeerId,
        addr: SocketAddr,
        capabilities: PeerCapabilities,
        sender: PeerRequestSender,
    ) -> Result<(), ConnectionRejected> {
        let known = self.candidates.get(&peer_id);
        if let Some(candidate) = known {
            if candidate.is_banned() {
                trace!(target: "net::pool", ?peer_id, "rejected banned incoming");
                return Err(ConnectionRejected::Banned)
            }
            if candidate.state.is_connected() {
                return Err(ConnectionRejected::AlreadyConnected)
            }
        }
        if self.trusted_nodes_only && !known.is_some_and(|candidate| candidate.is_trusted()) {
            return Err(ConnectionRejected::TrustedOnly)
        }
        if !self.connection_info.has_in_capacity() {
            return Err(ConnectionRejected::ExceedsCapacity(self.connection_info.config.max_inbound))
        }

        self.registry.register(capabilities, sender)?;

        // start a new tick, so the peer is not immediately rewarded for the time since last tick
        self.tick();

        let candidate = match self.candidates.entry(peer_id) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                self.queued_actions.push_back(PoolAction::CandidateAdded(peer_id));
                entry.insert(Candidate::new(addr))
            }
        };
        if candidate.state.is_dialing() {
            // the remote was faster than our own dial
            self.connection_info.decr_dialing();
        }
        candidate.state =
            CandidateState::Connected { direction: Direction::Incoming, since: Instant::now() };
        candidate.touch();
        self.connection_info.inc_in();
        debug!(target: "net::pool", ?peer_id, ?addr, "accepted incoming session");
        self.persist(&peer_id);
        Ok(())
    }

    /// Called when the session to a connected peer ended.
    ///
    /// The peer is removed from the registry and penalized for the drop. The penalty shrinks with
    /// the connection's uptime; a peer that drops right after connecting is also backed off.
    pub fn on_session_closed(&mut self, peer_id: &PeerId) {
        let (direction, uptime) = {
            let Some(candidate) = self.candidates.get_mut(peer_id) else { return };
            let CandidateState::Connected { direction, since } = candidate.state else { return };
            candidate.state = CandidateState::Discovered;
            candidate.touch();
            (direction, since.elapsed())
        };
        self.registry.unregister(peer_id);
        match direction {
            Direction::Incoming => self.connection_info.decr_in(),
            Direction::Outgoing => self.connection_info.decr_out(),
        }
        debug!(target: "net::pool", ?peer_id, ?uptime, "session closed");

        if uptime < self.backoff_durations.low {
            let until = self.backoff_durations.backoff_until(BackoffKind::High, 1);
            self.backoff_candidate_until(*peer_id, until);
        }
        let penalty = self.reputation_weights.dropped_after(uptime, self.target_connection_time);
        self.apply_reputation_change(peer_id, ReputationChangeKind::Other(penalty.as_i32()));

        self.fill_outbound_slots();
    }

    /// Moves the reputation of all candidates towards the default, one unit per elapsed second.
    fn tick(&mut self) {
        let now = Instant::now();
        let secs = now.saturating_duration_since(self.last_tick).as_secs();
        if secs == 0 {
            return
        }
        // keep the fraction for the next tick
        self.last_tick += Duration::from_secs(secs);
        let secs = secs.min(Reputation::MAX as u64) as Reputation;

        let decayed = self
            .candidates
            .iter_mut()
            .filter(|(_, candidate)| !candidate.is_banned())
            .filter_map(|(peer_id, candidate)| candidate.decay(secs).then_some(*peer_id))
            .collect::<Vec<_>>();
        for peer_id in decayed {
            self.persist(&peer_id);
        }
    }

    /// Returns the dialable candidate with the highest reputation.
    ///
    /// Trusted candidates are prioritized as long as they're not backed off. If
    /// `trusted_nodes_only` is enabled, see [`PoolConfig`], then this will only consider trusted
    /// candidates.
    ///
    /// Returns `None` if no candidate is available.
    fn best_dialable(&mut self) -> Option<(PeerId, &mut Candidate)> {
        let min_dial_reputation = self.min_dial_reputation;
        let trusted_nodes_only = self.trusted_nodes_only;
        let mut dialable = self.candidates.iter_mut().filter(|(_, candidate)| {
            candidate.state == CandidateState::Discovered &&
                !candidate.backed_off &&
                (!trusted_nodes_only || candidate.is_trusted()) &&
                (candidate.is_trusted() || candidate.reputation >= min_dial_reputation)
        });

        // keep track of the best candidate, if there's one
        let mut best = dialable.next()?;

        if best.1.is_trusted() {
            return Some((*best.0, best.1))
        }

        for maybe_better in dialable {
            // if the candidate is trusted, return it immediately
            if maybe_better.1.is_trusted() {
                return Some((*maybe_better.0, maybe_better.1))
            }

            // otherwise we keep track of the best candidate using the reputation
            if maybe_better.1.reputation > best.1.reputation {
                best = maybe_better;
            }
        }
        Some((*best.0, best.1))
    }

    /// If there's capacity for new outbound connections, this will queue new
    /// [`PoolAction::Dial`] actions.
    fn fill_outbound_slots(&mut self) {
        self.tick();

        // as long as there are slots available try to fill them with the best candidates
        while self.connection_info.has_out_capacity() {
            let action = {
                let Some((peer_id, candidate)) = self.best_dialable() else { break };

                trace!(target: "net::pool", ?peer_id, addr=?candidate.addr, "schedule dial");

                candidate.state = CandidateState::Dialing { since: Instant::now() };
                PoolAction::Dial { peer_id, remote_addr: candidate.addr }
            };

            self.connection_info.inc_dialing();
            self.queued_actions.push_back(action);
        }
    }

    /// Releases expired backoffs and fails dials that exceeded the dial timeout.
    fn on_release_tick(&mut self) {
        let now = Instant::now();

        // clear the backoff list of expired backoffs, and mark the relevant candidates as
        // ready to be dialed
        let candidates = &mut self.candidates;
        self.backed_off_candidates.retain(|peer_id, until| {
            if now > *until {
                if let Some(candidate) = candidates.get_mut(peer_id) {
                    candidate.backed_off = false;
                }
                return false
            }
            true
        });

        let dial_timeout = self.dial_timeout;
        let expired = self
            .candidates
            .iter()
            .filter(|(_, candidate)| match candidate.state {
                CandidateState::Dialing { since } => since.elapsed() > dial_timeout,
                _ => false,
            })
            .map(|(peer_id, _)| *peer_id)
            .collect::<Vec<_>>();
        for peer_id in expired {
            trace!(target: "net::pool", ?peer_id, "dial timed out");
            self.on_dial_failure(&peer_id, Some(BackoffKind::Medium));
        }
    }

    fn on_command(&mut self, cmd: PoolCommand) {
        match cmd {
            PoolCommand::Add(record) => self.add_candidate(record),
            PoolCommand::AddTrusted(record) => self.add_trusted(record),
            PoolCommand::ReputationChange(peer_id, rep) => {
                self.apply_reputation_change(&peer_id, rep)
            }
            PoolCommand::Feedback { peer_id, class, outcome } => {
                self.on_attempt(peer_id, class, outcome)
            }
            PoolCommand::GetCandidate(peer_id, tx) => {
                let _ = tx.send(self.candidate(&peer_id));
            }
            PoolCommand::GetCandidates(tx) => {
                let _ = tx.send(
                    self.candidates.iter().map(|(id, candidate)| candidate.info(*id)).collect(),
                );
            }
        }
    }

    /// Advances the state.
    ///
    /// Event hooks invoked externally may trigger a new [`PoolAction`] that are buffered until
    /// [`PoolManager`] is polled.
    pub fn poll(&mut self, cx: &mut Context<'_>) -> Poll<PoolAction> {
        loop {
            // drain buffered actions
            if let Some(action) = self.queued_actions.pop_front() {
                return Poll::Ready(action)
            }

            while let Poll::Ready(Some(cmd)) = self.handle_rx.poll_next_unpin(cx) {
                self.on_command(cmd);
            }

            while let Some(discovery) = self.discovery.as_mut() {
                match discovery.poll_next_unpin(cx) {
                    Poll::Ready(Some(record)) => self.add_candidate(record),
                    Poll::Ready(None) => {
                        debug!(target: "net::pool", "discovery feed ended");
                        self.discovery = None;
                    }
                    Poll::Pending => break,
                }
            }

            if self.release_interval.poll_tick(cx).is_ready() {
                self.on_release_tick();
            }

            if self.refill_slots_interval.poll_tick(cx).is_ready() {
                // this ensures the manager will be polled periodically, see [Interval::poll_tick]
                let _ = self.refill_slots_interval.poll_tick(cx);
                self.fill_outbound_slots();
            }

            if self.queued_actions.is_empty() {
                return Poll::Pending
            }
        }
    }
}

impl Stream for PoolManager {
    type Item = PoolAction;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().poll(cx).map(Some)
    }
}

impl fmt::Debug for PoolManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolManager")
            .field("candidates", &self.candidates.len())
            .field("connection_info", &self.connection_info)
            .field("backed_off", &self.backed_off_candidates.len())
            .field("queued_actions", &self.queued_actions)
            .finish_non_exhaustive()
    }
}

/// Tracks occupied connection slots
#[derive(Debug, Clone, PartialEq, Eq)]
struct ConnectionInfo {
    /// Counter for currently occupied slots for active outbound connections.
    num_outbound: usize,
    /// Counter for currently occupied slots for active inbound connections.
    num_inbound: usize,
    /// Counter for dials in progress.
    num_dialing: usize,
    /// The configured limits.
    config: ConnectionsConfig,
}

// === impl ConnectionInfo ===

impl ConnectionInfo {
    const fn new(config: ConnectionsConfig) -> Self {
        Self { num_outbound: 0, num_inbound: 0, num_dialing: 0, config }
    }

    ///  Returns `true` if there's still capacity for a new dial.
    const fn has_out_capacity(&self) -> bool {
        self.num_dialing < self.config.max_concurrent_dials &&
            self.num_outbound + self.num_dialing < self.config.target_peers
    }

    ///  Returns `true` if there's still capacity for a new incoming connection.
    const fn has_in_capacity(&self) -> bool {
        self.num_inbound < self.config.max_inbound
    }

    fn decr_state(&mut self, state: CandidateState) {
        match state {
            CandidateState::Discovered | CandidateState::Banned => {}
            CandidateState::Dialing { .. } => self.decr_dialing(),
            CandidateState::Connected { direction: Direction::Incoming, .. } => self.decr_in(),
            CandidateState::Connected { direction: Direction::Outgoing, .. } => self.decr_out(),
        }
    }

    fn decr_out(&mut self) {
        self.num_outbound = self.num_outbound.saturating_sub(1);
    }

    fn inc_out(&mut self) {
        self.num_outbound += 1;
    }

    fn inc_in(&mut self) {
        self.num_inbound += 1;
    }

    fn decr_in(&mut self) {
        self.num_inbound = self.num_inbound.saturating_sub(1);
    }

    fn inc_dialing(&mut self) {
        self.num_dialing += 1;
    }

    fn decr_dialing(&mut self) {
        self.num_dialing = self.num_dialing.saturating_sub(1);
    }
}

/// Commands the [`PoolManager`] listens for.
enum PoolCommand {
    /// Add a dial candidate
    Add(NodeRecord),
    /// Add or promote a trusted candidate
    AddTrusted(NodeRecord),
    /// Change the reputation of a candidate
    ReputationChange(PeerId, ReputationChangeKind),
    /// Outcome of a request attempt
    Feedback { peer_id: PeerId, class: RequestClass, outcome: AttemptOutcome },
    /// Get information about a candidate
    GetCandidate(PeerId, oneshot::Sender<Option<CandidateInfo>>),
    /// Get all candidates
    GetCandidates(oneshot::Sender<Vec<CandidateInfo>>),
}
