//! Possible errors of the retrieval stack.

use les_network_types::PeerId;

/// Errors of the [`PeerRegistry`](crate::PeerRegistry).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// A peer with this id is already registered.
    #[error("peer {0} is already registered")]
    DuplicatePeer(PeerId),
}

/// Reasons the pool refuses a connection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionRejected {
    /// The candidate is banned.
    #[error("candidate is banned")]
    Banned,
    /// The candidate is already connected.
    #[error("candidate is already connected")]
    AlreadyConnected,
    /// No dial to the candidate is pending, e.g. because it timed out.
    #[error("no dial pending to the candidate")]
    NotDialing,
    /// Only trusted nodes are accepted.
    #[error("only trusted nodes are accepted")]
    TrustedOnly,
    /// All inbound slots are taken.
    #[error("inbound connection limit of {0} reached")]
    ExceedsCapacity(usize),
    /// The peer registry refused the peer.
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Terminal outcomes of a distributed request that did not produce an accepted response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DistributeError {
    /// No connected peer can structurally serve the request.
    #[error("no connected peer can serve the request")]
    NoEligiblePeer,
    /// Every eligible peer was tried and failed.
    #[error("all {attempts} eligible peers failed")]
    PeersExhausted {
        /// Number of peers the request was dispatched to.
        attempts: u32,
    },
    /// The deadline elapsed before a peer delivered an accepted response.
    #[error("deadline elapsed after {attempts} attempts")]
    DeadlineElapsed {
        /// Number of peers the request was dispatched to.
        attempts: u32,
    },
    /// The request was canceled.
    #[error("request canceled")]
    Canceled,
    /// The distributor is gone.
    #[error("distributor shut down")]
    Shutdown,
}

impl DistributeError {
    /// Number of peers the request was dispatched to before it failed.
    pub const fn attempts(&self) -> u32 {
        match self {
            Self::PeersExhausted { attempts } | Self::DeadlineElapsed { attempts } => *attempts,
            Self::NoEligiblePeer | Self::Canceled | Self::Shutdown => 0,
        }
    }
}

/// The only errors a caller of the [`RetrievalManager`](crate::RetrievalManager) sees.
///
/// Timeouts, malformed and invalid responses of individual peers are absorbed and retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RetrieveError {
    /// No validated response could be obtained.
    #[error("retrieval exhausted after {attempts} attempts: {reason}")]
    Exhausted {
        /// Number of peers the request was dispatched to.
        attempts: u32,
        /// Why the distribution ended.
        reason: DistributeError,
    },
    /// The caller withdrew interest.
    #[error("retrieval canceled")]
    Canceled,
}

impl RetrieveError {
    /// Returns `true` if the request could not be sent anywhere because no connected peer can
    /// serve it.
    pub const fn is_no_eligible_peer(&self) -> bool {
        matches!(self, Self::Exhausted { reason: DistributeError::NoEligiblePeer, .. })
    }
}

impl From<DistributeError> for RetrieveError {
    fn from(err: DistributeError) -> Self {
        match err {
            DistributeError::Canceled | DistributeError::Shutdown => Self::Canceled,
            reason => Self::Exhausted { attempts: reason.attempts(), reason },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn only_terminal_errors_cross_the_caller_boundary() {
        let err = RetrieveError::from(DistributeError::NoEligiblePeer);
        assert!(err.is_no_eligible_peer());
        assert_matches!(err, RetrieveError::Exhausted { attempts: 0, .. });

        let err = RetrieveError::from(DistributeError::DeadlineElapsed { attempts: 2 });
        assert!(!err.is_no_eligible_peer());
        assert_matches!(err, RetrieveError::Exhausted { attempts: 2, .. });

        assert_eq!(RetrieveError::from(DistributeError::Shutdown), RetrieveError::Canceled);
    }
}
