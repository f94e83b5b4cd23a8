//! Distribution of requests to the best available peer.
//!
//! The [`Distributor`] is a future that owns the queue of pending requests. It is driven by
//! commands from [`DistributorHandle`]s, changes of the [`PeerRegistry`], expiring timers and a
//! bounded polling interval that catches peers whose flow control buffer recharged.

use crate::{
    error::DistributeError,
    feedback::{AttemptOutcome, PeerFeedback},
    registry::{PeerInfo, PeerRegistry},
};
use futures::{ready, StreamExt};
use les_network_p2p::{LesMessage, LesResponse, RequestId, RequestResult};
use les_network_types::{DistributorConfig, PeerId, RequestClass};
use parking_lot::Mutex;
use std::{
    collections::{HashMap, HashSet},
    fmt,
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    task::{Context, Poll},
    time::Instant,
};
use tokio::{
    sync::{mpsc, oneshot},
    time::{Interval, MissedTickBehavior},
};
use tokio_stream::wrappers::{UnboundedReceiverStream, WatchStream};
use tokio_util::time::{delay_queue, DelayQueue};
use tracing::{debug, trace};

/// Identifies a distributed request across all of its attempts.
pub type DistId = u64;

/// Ids of requests canceled by a handle but not yet withdrawn by the [`Distributor`].
///
/// Filled synchronously on cancellation, so a response that is already queued behind the cancel
/// command is discarded instead of judged.
type Canceled = Arc<Mutex<HashSet<DistId>>>;

/// Result of a distributed request.
pub type DistResult = Result<Delivered, DistributeError>;

/// What a request makes of a response to one of its attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseVerdict {
    /// The response completes the request.
    Accept,
    /// The response does not answer the request.
    Malformed,
    /// The response answers the request with wrong data.
    Invalid,
}

/// A request that can be sent to any of several peers.
pub trait DistRequest: Send + 'static {
    /// The class of the request, used to track per class degradation.
    fn class(&self) -> RequestClass;

    /// The cost of serving the request from `peer`, lower is better.
    ///
    /// Returns `None` if the peer can't structurally serve the request.
    fn cost(&self, peer: &PeerInfo) -> Option<u64>;

    /// The amount the request drains from the peer's flow control buffer.
    fn flow_cost(&self, peer: &PeerInfo) -> u64;

    /// Creates the message sent to `peer`, carrying `request_id`.
    fn request_message(
        &mut self,
        peer: &PeerInfo,
        request_id: RequestId,
    ) -> RequestResult<LesMessage>;

    /// Judges a response `peer_id` sent to the current attempt.
    fn on_response(&mut self, peer_id: PeerId, response: &LesResponse) -> ResponseVerdict;
}

/// An accepted response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivered {
    /// The peer that served the request.
    pub peer_id: PeerId,
    /// The accepted response.
    pub response: LesResponse,
    /// Number of peers the request was dispatched to, including the one that served it.
    pub attempts: u32,
}

/// Commands the [`Distributor`] listens for.
enum DistCommand {
    /// Queue a new request.
    Distribute {
        id: DistId,
        request: Box<dyn DistRequest>,
        deadline: Instant,
        tx: oneshot::Sender<DistResult>,
    },
    /// Withdraw a request.
    Cancel(DistId),
    /// A response arrived from a peer.
    Deliver { peer_id: PeerId, response: LesResponse },
}

/// Timers tracked in the [`DelayQueue`].
#[derive(Debug, Clone, Copy)]
enum Expiry {
    /// The attempt with this correlation id timed out.
    Attempt(RequestId),
    /// The request's deadline elapsed.
    Deadline(DistId),
}

/// A queued request.
struct PendingRequest {
    request: Box<dyn DistRequest>,
    deadline: Instant,
    deadline_key: delay_queue::Key,
    /// Peers this request was dispatched to, never selected again.
    excluded: HashSet<PeerId>,
    attempts: u32,
    /// The attempt currently outstanding, at most one.
    inflight: Option<RequestId>,
    tx: oneshot::Sender<DistResult>,
}

/// An outstanding attempt, keyed by its correlation id.
#[derive(Debug)]
struct Attempt {
    dist_id: DistId,
    peer_id: PeerId,
    class: RequestClass,
    sent_at: Instant,
    timeout_key: delay_queue::Key,
}

/// Outcome of a peer selection for a request.
#[derive(Debug)]
enum Selection {
    /// Dispatch to the peer at this index of the snapshot.
    Peer(usize),
    /// There are candidates, but all are busy right now.
    Busy,
    /// No peer left that could serve the request.
    Exhausted,
}

/// Schedules pending requests onto connected peers.
///
/// Each request is dispatched to the peer with the lowest finite cost, one attempt at a time.
/// A failed attempt excludes the peer for that request and re-queues it, until a response is
/// accepted, no candidate is left or the deadline elapses.
#[must_use = "the distributor does nothing unless polled"]
pub struct Distributor {
    registry: PeerRegistry,
    feedback: Arc<dyn PeerFeedback>,
    config: DistributorConfig,
    commands: UnboundedReceiverStream<DistCommand>,
    commands_closed: bool,
    peer_updates: WatchStream<u64>,
    canceled: Canceled,
    pending: HashMap<DistId, PendingRequest>,
    attempts: HashMap<RequestId, Attempt>,
    expiries: DelayQueue<Expiry>,
    poll_interval: Interval,
    next_request_id: RequestId,
    /// Set if a dispatch failed and the queue should be rescanned right away.
    reschedule: bool,
}

// === impl Distributor ===

impl Distributor {
    /// Creates a new distributor and the handle to talk to it.
    pub fn new(
        registry: PeerRegistry,
        feedback: Arc<dyn PeerFeedback>,
        config: DistributorConfig,
    ) -> (Self, DistributorHandle) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let peer_updates = WatchStream::new(registry.subscribe());
        let canceled = Canceled::default();
        let mut poll_interval = tokio::time::interval(config.poll_interval);
        poll_interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let distributor = Self {
            registry,
            feedback,
            config,
            commands: UnboundedReceiverStream::new(command_rx),
            commands_closed: false,
            peer_updates,
            canceled: canceled.clone(),
            pending: HashMap::new(),
            attempts: HashMap::new(),
            expiries: DelayQueue::new(),
            poll_interval,
            next_request_id: 1,
            reschedule: false,
        };
        let handle =
            DistributorHandle { command_tx, canceled, next_id: Arc::new(AtomicU64::new(1)) };
        (distributor, handle)
    }

    /// Number of queued requests, including those with an attempt in flight.
    pub fn num_pending(&self) -> usize {
        self.pending.len()
    }

    /// Number of attempts in flight.
    pub fn num_inflight(&self) -> usize {
        self.attempts.len()
    }

    fn next_request_id(&mut self) -> RequestId {
        let id = self.next_request_id;
        self.next_request_id = self.next_request_id.wrapping_add(1);
        id
    }

    fn on_command(&mut self, cmd: DistCommand) {
        match cmd {
            DistCommand::Distribute { id, request, deadline, tx } => {
                let deadline_key = self
                    .expiries
                    .insert_at(Expiry::Deadline(id), tokio::time::Instant::from_std(deadline));
                trace!(target: "net::dist", id, class=%request.class(), "queued request");
                self.pending.insert(
                    id,
                    PendingRequest {
                        request,
                        deadline,
                        deadline_key,
                        excluded: HashSet::new(),
                        attempts: 0,
                        inflight: None,
                        tx,
                    },
                );
            }
            DistCommand::Cancel(id) => self.on_cancel(id),
            DistCommand::Deliver { peer_id, response } => self.on_response(peer_id, response),
        }
    }

    /// Removes a request. Canceling an unknown or finished request is a no-op.
    fn on_cancel(&mut self, id: DistId) {
        self.canceled.lock().remove(&id);
        let Some(mut pending) = self.pending.remove(&id) else { return };
        self.expiries.remove(&pending.deadline_key);
        self.abandon_inflight(&mut pending);
        debug!(target: "net::dist", id, attempts=pending.attempts, "canceled request");
        let _ = pending.tx.send(Err(DistributeError::Canceled));
    }

    /// Forgets the outstanding attempt of a request: its response will be discarded.
    fn abandon_inflight(&mut self, pending: &mut PendingRequest) {
        if let Some(attempt) = pending.inflight.take().and_then(|id| self.attempts.remove(&id)) {
            self.expiries.remove(&attempt.timeout_key);
            self.registry.on_request_abandoned(&attempt.peer_id);
        }
    }

    fn on_response(&mut self, peer_id: PeerId, response: LesResponse) {
        let request_id = response.request_id;
        match self.attempts.get(&request_id) {
            Some(attempt) if self.canceled.lock().contains(&attempt.dist_id) => {
                let id = attempt.dist_id;
                trace!(target: "net::dist", id, request_id, ?peer_id, "discarding response to canceled request");
                self.on_cancel(id);
                return
            }
            Some(attempt) if attempt.peer_id == peer_id => {}
            Some(attempt) => {
                trace!(target: "net::dist", request_id, ?peer_id, expected=?attempt.peer_id, "discarding response from unexpected peer");
                return
            }
            None => {
                trace!(target: "net::dist", request_id, ?peer_id, "discarding late or unsolicited response");
                return
            }
        }
        let Some(attempt) = self.attempts.remove(&request_id) else { return };
        self.expiries.remove(&attempt.timeout_key);
        let rtt = attempt.sent_at.elapsed();

        let Some(pending) = self.pending.get_mut(&attempt.dist_id) else {
            self.registry.on_request_abandoned(&peer_id);
            return
        };
        pending.inflight = None;
        let verdict = pending.request.on_response(peer_id, &response);
        let attempts = pending.attempts;

        let outcome = match verdict {
            ResponseVerdict::Accept => {
                debug!(target: "net::dist", id=attempt.dist_id, request_id, ?peer_id, ?rtt, attempts, "request served");
                self.registry.on_response(&peer_id, attempt.class, rtt, response.buffer_value);
                self.feedback.on_attempt(peer_id, attempt.class, AttemptOutcome::Success { rtt });
                if let Some(pending) = self.pending.remove(&attempt.dist_id) {
                    self.expiries.remove(&pending.deadline_key);
                    let _ = pending.tx.send(Ok(Delivered { peer_id, response, attempts }));
                }
                return
            }
            ResponseVerdict::Malformed => AttemptOutcome::Malformed,
            ResponseVerdict::Invalid => AttemptOutcome::Invalid,
        };

        debug!(target: "net::dist", id=attempt.dist_id, request_id, ?peer_id, ?outcome, "rejected response");
        if let Some(value) = response.buffer_value {
            self.registry.update_flow_buffer(&peer_id, value);
        }
        self.registry.on_request_failed(&peer_id, attempt.class);
        self.feedback.on_attempt(peer_id, attempt.class, outcome);
    }

    fn on_timeout(&mut self, request_id: RequestId) {
        let Some(attempt) = self.attempts.remove(&request_id) else { return };
        debug!(target: "net::dist", id=attempt.dist_id, request_id, peer_id=?attempt.peer_id, "request timed out");
        self.registry.on_request_failed(&attempt.peer_id, attempt.class);
        self.feedback.on_attempt(attempt.peer_id, attempt.class, AttemptOutcome::Timeout);
        if let Some(pending) = self.pending.get_mut(&attempt.dist_id) {
            pending.inflight = None;
        }
    }

    fn on_deadline(&mut self, id: DistId) {
        // the deadline key was consumed by the queue
        let Some(mut pending) = self.pending.remove(&id) else { return };
        self.abandon_inflight(&mut pending);
        debug!(target: "net::dist", id, attempts=pending.attempts, "deadline elapsed");
        let err = DistributeError::DeadlineElapsed { attempts: pending.attempts };
        let _ = pending.tx.send(Err(err));
    }

    /// Fails attempts in flight to peers that are gone, so their requests are re-queued without
    /// waiting for the timeout.
    fn on_peers_changed(&mut self) {
        let dropped = self
            .attempts
            .iter()
            .filter(|(_, attempt)| !self.registry.contains(&attempt.peer_id))
            .map(|(request_id, _)| *request_id)
            .collect::<Vec<_>>();

        for request_id in dropped {
            let Some(attempt) = self.attempts.remove(&request_id) else { continue };
            self.expiries.remove(&attempt.timeout_key);
            debug!(target: "net::dist", id=attempt.dist_id, request_id, peer_id=?attempt.peer_id, "peer disconnected with request in flight");
            if let Some(pending) = self.pending.get_mut(&attempt.dist_id) {
                pending.inflight = None;
            }
        }
    }

    /// One scheduling pass over all requests without an attempt in flight.
    ///
    /// Requests whose deadline falls into the urgent window go first, ordered by deadline. All
    /// others are served in submission order.
    fn schedule(&mut self) {
        let now = Instant::now();
        let urgent_before = now + self.config.urgent_deadline_window;
        let mut queue = self
            .pending
            .iter()
            .filter(|(_, pending)| pending.inflight.is_none())
            .map(|(id, pending)| {
                let urgent = pending.deadline <= urgent_before;
                (!urgent, if urgent { pending.deadline } else { now }, *id)
            })
            .collect::<Vec<_>>();
        if queue.is_empty() {
            return
        }
        queue.sort_unstable();

        let mut peers = Vec::with_capacity(self.registry.len());
        self.registry.for_each(|peer| peers.push(peer.clone()));

        for (_, _, id) in queue {
            if self.attempts.len() >= self.config.max_inflight {
                trace!(target: "net::dist", inflight=self.attempts.len(), "in-flight cap reached");
                break
            }
            match self.select_peer(id, &peers) {
                Selection::Peer(index) => self.dispatch(id, &mut peers[index]),
                Selection::Busy => {}
                Selection::Exhausted => {
                    let Some(pending) = self.pending.remove(&id) else { continue };
                    self.expiries.remove(&pending.deadline_key);
                    let err = if pending.attempts == 0 {
                        DistributeError::NoEligiblePeer
                    } else {
                        DistributeError::PeersExhausted { attempts: pending.attempts }
                    };
                    debug!(target: "net::dist", id, %err, "request failed");
                    let _ = pending.tx.send(Err(err));
                }
            }
        }
    }

    /// Picks the peer with the lowest cost, preferring the least recently used among equals.
    fn select_peer(&self, id: DistId, peers: &[PeerInfo]) -> Selection {
        let Some(pending) = self.pending.get(&id) else { return Selection::Busy };
        let mut has_candidates = false;
        let mut best: Option<(u64, Option<Instant>, usize)> = None;

        for (index, peer) in peers.iter().enumerate() {
            if pending.excluded.contains(&peer.id) {
                continue
            }
            let Some(cost) = pending.request.cost(peer) else { continue };
            let Some(wait) = peer.flow_wait(pending.request.flow_cost(peer)) else { continue };
            has_candidates = true;

            if peer.inflight >= self.config.max_inflight_per_peer || !wait.is_zero() {
                continue
            }
            let better = match best {
                None => true,
                Some((best_cost, best_used, _)) => {
                    cost < best_cost || (cost == best_cost && peer.last_used < best_used)
                }
            };
            if better {
                best = Some((cost, peer.last_used, index));
            }
        }

        match best {
            Some((_, _, index)) => Selection::Peer(index),
            None if has_candidates => Selection::Busy,
            None => Selection::Exhausted,
        }
    }

    fn dispatch(&mut self, id: DistId, peer: &mut PeerInfo) {
        let request_id = self.next_request_id();
        let Some(pending) = self.pending.get_mut(&id) else { return };

        let class = pending.request.class();
        let flow_cost = pending.request.flow_cost(peer);
        let message = match pending.request.request_message(peer, request_id) {
            Ok(message) => message,
            Err(err) => {
                // the peer can't be asked this request at all
                debug!(target: "net::dist", id, peer_id=?peer.id, %err, "failed to encode request");
                pending.excluded.insert(peer.id);
                self.reschedule = true;
                return
            }
        };
        if let Err(err) = self.registry.send(&peer.id, message, flow_cost) {
            // a full session channel or a peer that is about to be unregistered, retried on the
            // next pass
            trace!(target: "net::dist", id, peer_id=?peer.id, %err, "peer unavailable");
            peer.inflight = peer.inflight.max(self.config.max_inflight_per_peer);
            return
        }

        pending.excluded.insert(peer.id);
        pending.attempts += 1;
        pending.inflight = Some(request_id);
        let timeout =
            peer.request_timeout(self.config.min_request_timeout, self.config.max_request_timeout);
        let timeout_key = self.expiries.insert(Expiry::Attempt(request_id), timeout);
        let now = Instant::now();
        self.attempts.insert(
            request_id,
            Attempt { dist_id: id, peer_id: peer.id, class, sent_at: now, timeout_key },
        );

        // keep the snapshot current for the rest of the pass
        peer.inflight += 1;
        peer.last_used = Some(now);
        if let Some(flow) = peer.flow.as_mut() {
            flow.consume(flow_cost, now);
        }

        debug!(target: "net::dist", id, request_id, peer_id=?peer.id, %class, ?timeout, attempt=pending.attempts, "dispatched request");
    }
}

impl Future for Distributor {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        loop {
            let mut progress = std::mem::take(&mut this.reschedule);

            loop {
                match this.commands.poll_next_unpin(cx) {
                    Poll::Ready(Some(cmd)) => {
                        this.on_command(cmd);
                        progress = true;
                    }
                    Poll::Ready(None) => {
                        this.commands_closed = true;
                        break
                    }
                    Poll::Pending => break,
                }
            }

            while let Poll::Ready(Some(_)) = this.peer_updates.poll_next_unpin(cx) {
                this.on_peers_changed();
                progress = true;
            }

            while let Poll::Ready(Some(expired)) = this.expiries.poll_expired(cx) {
                match expired.into_inner() {
                    Expiry::Attempt(request_id) => this.on_timeout(request_id),
                    Expiry::Deadline(id) => this.on_deadline(id),
                }
                progress = true;
            }

            if this.poll_interval.poll_tick(cx).is_ready() {
                progress = true;
            }

            if this.commands_closed && this.pending.is_empty() {
                debug!(target: "net::dist", "all handles dropped, shutting down");
                return Poll::Ready(())
            }

            if !progress {
                return Poll::Pending
            }

            // state changed, rescan the queue and poll the sources again so new timers are
            // registered with the waker
            this.schedule();
        }
    }
}

impl fmt::Debug for Distributor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Distributor")
            .field("config", &self.config)
            .field("pending", &self.pending.len())
            .field("inflight", &self.attempts.len())
            .field("commands_closed", &self.commands_closed)
            .finish_non_exhaustive()
    }
}

/// A cloneable handle to the [`Distributor`].
#[derive(Debug, Clone)]
pub struct DistributorHandle {
    command_tx: mpsc::UnboundedSender<DistCommand>,
    canceled: Canceled,
    next_id: Arc<AtomicU64>,
}

// === impl DistributorHandle ===

impl DistributorHandle {
    /// Queues a request. It fails with [`DistributeError::DeadlineElapsed`] if no accepted
    /// response arrived by `deadline`.
    ///
    /// Dropping the returned handle cancels the request.
    pub fn distribute(&self, request: impl DistRequest, deadline: Instant) -> DistHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        // if the distributor is gone the sender is dropped and the handle resolves to shutdown
        let _ = self.command_tx.send(DistCommand::Distribute {
            id,
            request: Box::new(request),
            deadline,
            tx,
        });
        DistHandle { id, rx, distributor: self.clone(), terminated: false }
    }

    /// Cancels a request. Canceling a finished request is a no-op.
    ///
    /// Takes effect immediately: no response is judged for the request after this returns, even
    /// one that was handed to the distributor before.
    pub fn cancel(&self, id: DistId) {
        self.canceled.lock().insert(id);
        if self.command_tx.send(DistCommand::Cancel(id)).is_err() {
            self.canceled.lock().remove(&id);
        }
    }

    /// Hands a response received from `peer_id` to the distributor.
    ///
    /// Responses that don't match an attempt in flight to that peer are discarded.
    pub fn deliver(&self, peer_id: PeerId, response: LesResponse) {
        let _ = self.command_tx.send(DistCommand::Deliver { peer_id, response });
    }

    /// Returns `true` if the distributor is gone.
    pub fn is_closed(&self) -> bool {
        self.command_tx.is_closed()
    }
}

/// Resolves to the outcome of a distributed request.
#[derive(Debug)]
#[must_use = "dropping the handle cancels the request"]
pub struct DistHandle {
    id: DistId,
    rx: oneshot::Receiver<DistResult>,
    distributor: DistributorHandle,
    terminated: bool,
}

impl DistHandle {
    /// The id of the request.
    pub const fn id(&self) -> DistId {
        self.id
    }

    /// Cancels the request.
    pub fn cancel(self) {
        drop(self)
    }
}

impl Future for DistHandle {
    type Output = DistResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let result = ready!(Pin::new(&mut self.rx).poll(cx));
        self.terminated = true;
        Poll::Ready(result.unwrap_or(Err(DistributeError::Shutdown)))
    }
}

impl Drop for DistHandle {
    fn drop(&mut self) {
        if !self.terminated {
            self.distributor.cancel(self.id);
        }
    }
}
