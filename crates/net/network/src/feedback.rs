//! One-directional channel for peer penalties, from the request path to the pool.

use les_network_types::{PeerId, ReputationChangeKind, RequestClass};
use std::time::Duration;

/// How an attempt against a peer ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// The peer delivered an accepted response.
    Success {
        /// Time between dispatch and response.
        rtt: Duration,
    },
    /// The peer did not answer in time.
    Timeout,
    /// The response did not match the request.
    Malformed,
    /// The response failed validation.
    Invalid,
}

impl AttemptOutcome {
    /// The reputation change the outcome merits.
    pub const fn reputation_change(&self) -> ReputationChangeKind {
        match self {
            Self::Success { .. } => ReputationChangeKind::UsefulResponse,
            Self::Timeout => ReputationChangeKind::Timeout,
            Self::Malformed => ReputationChangeKind::MalformedResponse,
            Self::Invalid => ReputationChangeKind::InvalidResponse,
        }
    }
}

/// Receives the outcome of every attempt the distributor makes.
///
/// Implementations must not block: this is called from the distributor's task.
#[auto_impl::auto_impl(&, Arc, Box)]
pub trait PeerFeedback: Send + Sync {
    /// Reports how an attempt against `peer_id` ended.
    fn on_attempt(&self, peer_id: PeerId, class: RequestClass, outcome: AttemptOutcome);
}

/// A [`PeerFeedback`] that drops all reports.
#[derive(Debug, Clone, Copy, Default)]
#[non_exhaustive]
pub struct NoopFeedback;

impl PeerFeedback for NoopFeedback {
    fn on_attempt(&self, _peer_id: PeerId, _class: RequestClass, _outcome: AttemptOutcome) {}
}
