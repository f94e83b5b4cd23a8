//! State the pool tracks per dial candidate.

use les_network_p2p::CandidateRecord;
use les_network_types::{
    is_banned_reputation, CandidateTier, PeerId, Reputation, ReputationChangeOutcome,
    DEFAULT_REPUTATION,
};
use std::{net::SocketAddr, time::Instant};
use tracing::trace;

/// The direction of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// The remote dialed us.
    Incoming,
    /// We dialed the remote.
    Outgoing,
}

/// Where a candidate stands in its lifecycle.
///
/// `Discovered → Dialing → Connected → Discovered` for candidates that come and go, any state
/// moves to `Banned` once the candidate proved to serve invalid data. `Banned` is final for the
/// lifetime of the pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CandidateState {
    /// Known but not connected.
    #[default]
    Discovered,
    /// A dial is in progress.
    Dialing {
        /// When the dial was scheduled.
        since: Instant,
    },
    /// Registered with the peer registry.
    Connected {
        /// Who initiated the connection.
        direction: Direction,
        /// When the connection was established.
        since: Instant,
    },
    /// Excluded from dialing and inbound connections.
    Banned,
}

// === impl CandidateState ===

impl CandidateState {
    /// Returns `true` if the candidate is connected.
    #[inline]
    pub const fn is_connected(&self) -> bool {
        matches!(self, Self::Connected { .. })
    }

    /// Returns `true` if a dial is in progress.
    #[inline]
    pub const fn is_dialing(&self) -> bool {
        matches!(self, Self::Dialing { .. })
    }

    /// Returns `true` if the candidate is banned.
    #[inline]
    pub const fn is_banned(&self) -> bool {
        matches!(self, Self::Banned)
    }
}

/// Tracks a single dial candidate.
#[derive(Debug, Clone)]
pub(crate) struct Candidate {
    /// Where to reach the candidate.
    pub(crate) addr: SocketAddr,
    /// Current reputation.
    pub(crate) reputation: Reputation,
    /// Lifecycle state.
    pub(crate) state: CandidateState,
    /// Whether the operator configured this candidate.
    pub(crate) tier: CandidateTier,
    /// Consecutive dial failures.
    pub(crate) fail_streak: u32,
    /// Consecutive responses that failed validation.
    pub(crate) invalid_strikes: u32,
    /// Whether the candidate is currently backed off.
    pub(crate) backed_off: bool,
    /// Unix timestamp in seconds of the last successful connection.
    pub(crate) last_seen: Option<u64>,
}

// === impl Candidate ===

impl Candidate {
    pub(crate) fn new(addr: SocketAddr) -> Self {
        Self::from_record(CandidateRecord::new(addr))
    }

    pub(crate) fn trusted(addr: SocketAddr) -> Self {
        Self { tier: CandidateTier::Trusted, ..Self::new(addr) }
    }

    /// Restores a candidate from its persisted record.
    pub(crate) fn from_record(record: CandidateRecord) -> Self {
        Self {
            addr: record.address,
            reputation: record.reputation,
            state: CandidateState::Discovered,
            tier: CandidateTier::Basic,
            fail_streak: record.fail_streak,
            invalid_strikes: 0,
            backed_off: false,
            last_seen: record.last_seen,
        }
    }

    /// The record to persist.
    pub(crate) fn record(&self) -> CandidateRecord {
        CandidateRecord {
            address: self.addr,
            last_seen: self.last_seen,
            fail_streak: self.fail_streak,
            reputation: self.reputation,
        }
    }

    /// Marks the candidate as seen now.
    pub(crate) fn touch(&mut self) {
        let mut record = self.record();
        record.touch();
        self.last_seen = record.last_seen;
    }

    /// Resets the reputation of the candidate to the default value. This always returns
    /// [`ReputationChangeOutcome::None`].
    pub(crate) fn reset_reputation(&mut self) -> ReputationChangeOutcome {
        self.reputation = DEFAULT_REPUTATION;
        ReputationChangeOutcome::None
    }

    /// Applies a reputation change to the candidate and returns what action should be taken.
    pub(crate) fn apply_reputation(&mut self, change: Reputation) -> ReputationChangeOutcome {
        // we add reputation since negative reputation change decrease total reputation
        self.reputation = self.reputation.saturating_add(change);

        trace!(target: "net::pool", reputation=%self.reputation, "applied reputation change");

        if self.is_trusted() || self.is_banned() || !is_banned_reputation(self.reputation) {
            return ReputationChangeOutcome::None
        }
        if self.state.is_connected() {
            ReputationChangeOutcome::DisconnectAndBan
        } else {
            ReputationChangeOutcome::Ban
        }
    }

    /// Moves the reputation `secs` units towards the default.
    ///
    /// Penalties wear off for every candidate. Rewards only wear off while disconnected, so peers
    /// keep what they earned as long as they stay.
    pub(crate) fn decay(&mut self, secs: Reputation) -> bool {
        let previous = self.reputation;
        if self.reputation < DEFAULT_REPUTATION {
            self.reputation = self.reputation.saturating_add(secs).min(DEFAULT_REPUTATION);
        } else if !self.state.is_connected() {
            self.reputation = self.reputation.saturating_sub(secs).max(DEFAULT_REPUTATION);
        }
        self.reputation != previous
    }

    /// Returns `true` if the candidate is banned.
    #[inline]
    pub(crate) const fn is_banned(&self) -> bool {
        self.state.is_banned()
    }

    /// Returns whether this candidate is trusted.
    #[inline]
    pub(crate) const fn is_trusted(&self) -> bool {
        self.tier.is_trusted()
    }

    /// A snapshot for callers outside the pool.
    pub(crate) fn info(&self, id: PeerId) -> CandidateInfo {
        CandidateInfo {
            id,
            address: self.addr,
            reputation: self.reputation,
            state: self.state,
            tier: self.tier,
            fail_streak: self.fail_streak,
            backed_off: self.backed_off,
            last_seen: self.last_seen,
        }
    }
}

/// A snapshot of a dial candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateInfo {
    /// The candidate's id.
    pub id: PeerId,
    /// Where to reach the candidate.
    pub address: SocketAddr,
    /// Current reputation.
    pub reputation: Reputation,
    /// Lifecycle state.
    pub state: CandidateState,
    /// Whether the operator configured this candidate.
    pub tier: CandidateTier,
    /// Consecutive dial failures.
    pub fail_streak: u32,
    /// Whether the candidate is currently backed off.
    pub backed_off: bool,
    /// Unix timestamp in seconds of the last successful connection.
    pub last_seen: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use les_network_types::BANNED_REPUTATION;
    use std::net::{IpAddr, Ipv4Addr};

    fn addr() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 30303)
    }

    #[test]
    fn ban_outcome_depends_on_connection() {
        let mut candidate = Candidate::new(addr());
        assert_eq!(candidate.apply_reputation(BANNED_REPUTATION - 1), ReputationChangeOutcome::Ban);

        let mut candidate = Candidate::new(addr());
        candidate.state = CandidateState::Connected {
            direction: Direction::Outgoing,
            since: Instant::now(),
        };
        assert_eq!(
            candidate.apply_reputation(BANNED_REPUTATION - 1),
            ReputationChangeOutcome::DisconnectAndBan
        );

        let mut trusted = Candidate::trusted(addr());
        assert_eq!(trusted.apply_reputation(BANNED_REPUTATION - 1), ReputationChangeOutcome::None);
    }

    #[test]
    fn decays_towards_default() {
        let mut candidate = Candidate::new(addr());
        candidate.reputation = -10;
        candidate.decay(4);
        assert_eq!(candidate.reputation, -6);
        candidate.decay(100);
        assert_eq!(candidate.reputation, DEFAULT_REPUTATION);

        candidate.reputation = 10;
        candidate.decay(4);
        assert_eq!(candidate.reputation, 6);

        candidate.state = CandidateState::Connected {
            direction: Direction::Incoming,
            since: Instant::now(),
        };
        candidate.decay(4);
        assert_eq!(candidate.reputation, 6);
    }

    #[test]
    fn record_roundtrip() {
        let mut candidate = Candidate::new(addr());
        candidate.fail_streak = 2;
        candidate.reputation = -42;
        candidate.touch();
        let restored = Candidate::from_record(candidate.record());
        assert_eq!(restored.fail_streak, 2);
        assert_eq!(restored.reputation, -42);
        assert!(restored.last_seen.is_some());
        assert_eq!(restored.state, CandidateState::Discovered);
    }
}
