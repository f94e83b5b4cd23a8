//! Peer reputation management

use std::time::Duration;

/// The default reputation of a peer
pub const DEFAULT_REPUTATION: Reputation = 0;

/// The minimal unit we're measuring reputation
const REPUTATION_UNIT: i32 = -1024;

/// The reputation value below which a candidate is banned.
pub const BANNED_REPUTATION: i32 = 50 * REPUTATION_UNIT;

/// The reputation change to apply to a peer that dropped the connection.
///
/// Scaled down for peers that stayed connected for a long time, see
/// [`ReputationChangeWeights::dropped_after`].
const REMOTE_DISCONNECT_REPUTATION_CHANGE: i32 = 4 * REPUTATION_UNIT;

/// The reputation change to apply to a candidate that we failed to dial.
const FAILED_TO_DIAL_REPUTATION_CHANGE: i32 = 4 * REPUTATION_UNIT;

/// The reputation change to apply to a peer that failed to respond in time.
const TIMEOUT_REPUTATION_CHANGE: i32 = 4 * REPUTATION_UNIT;

/// The reputation change to apply to a peer that sent a response we could not make sense of.
const MALFORMED_RESPONSE_REPUTATION_CHANGE: i32 = 8 * REPUTATION_UNIT;

/// The reputation change to apply to a peer whose response failed validation.
const INVALID_RESPONSE_REPUTATION_CHANGE: i32 = 20 * REPUTATION_UNIT;

/// The reputation change to apply to a peer that delivered a validated response.
const USEFUL_RESPONSE_REPUTATION_CHANGE: i32 = -REPUTATION_UNIT / 4;

/// The maximum reputation change that can be applied to a trusted peer.
/// This is used to prevent a single bad message from a trusted peer to cause a significant change.
pub const MAX_TRUSTED_PEER_REPUTATION_CHANGE: Reputation = 2 * REPUTATION_UNIT;

/// Returns `true` if the given reputation is below the [`BANNED_REPUTATION`] threshold
#[inline]
pub const fn is_banned_reputation(reputation: i32) -> bool {
    reputation < BANNED_REPUTATION
}

/// The type that tracks the reputation score.
pub type Reputation = i32;

/// Various kinds of reputation changes.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ReputationChangeKind {
    /// Peer delivered a response that passed validation.
    UsefulResponse,
    /// Peer failed to respond in time.
    Timeout,
    /// Peer sent a response that does not match the request it answers.
    MalformedResponse,
    /// Peer sent a response that failed the caller's validation.
    InvalidResponse,
    /// Failed to establish a connection to the candidate.
    FailedToDial,
    /// Connection dropped by peer.
    Dropped,
    /// Reset the reputation to the default value.
    Reset,
    /// Apply a reputation change by value
    Other(Reputation),
}

impl ReputationChangeKind {
    /// Returns true if the reputation change is a [`ReputationChangeKind::Reset`].
    pub const fn is_reset(&self) -> bool {
        matches!(self, Self::Reset)
    }

    /// Returns true if the reputation change is [`ReputationChangeKind::Dropped`].
    pub const fn is_dropped(&self) -> bool {
        matches!(self, Self::Dropped)
    }

    /// Returns true if the change is evidence of misbehaviour rather than unreliability.
    pub const fn is_misbehaviour(&self) -> bool {
        matches!(self, Self::InvalidResponse)
    }
}

/// How the [`ReputationChangeKind`] are weighted.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ReputationChangeWeights {
    /// Weight for [`ReputationChangeKind::UsefulResponse`]
    pub useful_response: Reputation,
    /// Weight for [`ReputationChangeKind::Timeout`]
    pub timeout: Reputation,
    /// Weight for [`ReputationChangeKind::MalformedResponse`]
    pub malformed_response: Reputation,
    /// Weight for [`ReputationChangeKind::InvalidResponse`]
    pub invalid_response: Reputation,
    /// Weight for [`ReputationChangeKind::FailedToDial`]
    pub failed_to_dial: Reputation,
    /// Weight for [`ReputationChangeKind::Dropped`]
    pub dropped: Reputation,
}

// === impl ReputationChangeWeights ===

impl ReputationChangeWeights {
    /// Creates a new instance that doesn't penalize any kind of reputation change.
    pub const fn zero() -> Self {
        Self {
            useful_response: 0,
            timeout: 0,
            malformed_response: 0,
            invalid_response: 0,
            failed_to_dial: 0,
            dropped: 0,
        }
    }

    /// Returns the quantifiable [`ReputationChange`] for the given [`ReputationChangeKind`] using
    /// the configured weights
    pub fn change(&self, kind: ReputationChangeKind) -> ReputationChange {
        match kind {
            ReputationChangeKind::UsefulResponse => self.useful_response.into(),
            ReputationChangeKind::Timeout => self.timeout.into(),
            ReputationChangeKind::MalformedResponse => self.malformed_response.into(),
            ReputationChangeKind::InvalidResponse => self.invalid_response.into(),
            ReputationChangeKind::FailedToDial => self.failed_to_dial.into(),
            ReputationChangeKind::Dropped => self.dropped.into(),
            ReputationChangeKind::Reset => DEFAULT_REPUTATION.into(),
            ReputationChangeKind::Other(val) => val.into(),
        }
    }

    /// Returns the penalty for a connection that dropped after `uptime`.
    ///
    /// The full [`ReputationChangeKind::Dropped`] weight applies to a connection that dropped
    /// immediately, half of it to one that lasted `target`, and it keeps shrinking from there.
    pub fn dropped_after(&self, uptime: Duration, target: Duration) -> ReputationChange {
        let target = target.as_millis().max(1);
        let uptime = uptime.as_millis();
        let scaled = self.dropped as i128 * target as i128 / (target + uptime) as i128;
        (scaled as Reputation).into()
    }
}

impl Default for ReputationChangeWeights {
    fn default() -> Self {
        Self {
            useful_response: USEFUL_RESPONSE_REPUTATION_CHANGE,
            timeout: TIMEOUT_REPUTATION_CHANGE,
            malformed_response: MALFORMED_RESPONSE_REPUTATION_CHANGE,
            invalid_response: INVALID_RESPONSE_REPUTATION_CHANGE,
            failed_to_dial: FAILED_TO_DIAL_REPUTATION_CHANGE,
            dropped: REMOTE_DISCONNECT_REPUTATION_CHANGE,
        }
    }
}

/// Represents a change in a peer's reputation.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct ReputationChange(Reputation);

// === impl ReputationChange ===

impl ReputationChange {
    /// Helper type for easier conversion
    #[inline]
    pub const fn as_i32(self) -> Reputation {
        self.0
    }

    /// Caps a negative change to [`MAX_TRUSTED_PEER_REPUTATION_CHANGE`].
    #[inline]
    pub const fn capped_for_trusted(self) -> Self {
        if self.0 < MAX_TRUSTED_PEER_REPUTATION_CHANGE {
            Self(MAX_TRUSTED_PEER_REPUTATION_CHANGE)
        } else {
            self
        }
    }
}

impl From<ReputationChange> for Reputation {
    fn from(value: ReputationChange) -> Self {
        value.0
    }
}

impl From<Reputation> for ReputationChange {
    fn from(value: Reputation) -> Self {
        Self(value)
    }
}

/// Outcomes when a reputation change is applied to a candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReputationChangeOutcome {
    /// Nothing to do.
    None,
    /// Ban the candidate.
    Ban,
    /// Ban and disconnect
    DisconnectAndBan,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn penalties_are_ordered_by_severity() {
        let weights = ReputationChangeWeights::default();
        let success = weights.change(ReputationChangeKind::UsefulResponse).as_i32();
        let timeout = weights.change(ReputationChangeKind::Timeout).as_i32();
        let invalid = weights.change(ReputationChangeKind::InvalidResponse).as_i32();
        assert!(invalid < timeout);
        assert!(timeout < 0);
        assert!(success > 0);
    }

    #[test]
    fn three_invalid_responses_reach_ban() {
        let weights = ReputationChangeWeights::default();
        let invalid = weights.change(ReputationChangeKind::InvalidResponse).as_i32();
        assert!(!is_banned_reputation(2 * invalid));
        assert!(is_banned_reputation(3 * invalid));
    }

    #[test]
    fn long_lived_drops_are_cheaper() {
        let weights = ReputationChangeWeights::default();
        let target = Duration::from_secs(600);
        let immediate = weights.dropped_after(Duration::ZERO, target).as_i32();
        let at_target = weights.dropped_after(target, target).as_i32();
        let long = weights.dropped_after(target * 10, target).as_i32();

        assert_eq!(immediate, weights.dropped);
        assert_eq!(at_target, weights.dropped / 2);
        assert!(long > at_target);
        assert!(long < 0);
    }

    #[test]
    fn trusted_cap() {
        let change = ReputationChange::from(INVALID_RESPONSE_REPUTATION_CHANGE);
        assert_eq!(change.capped_for_trusted().as_i32(), MAX_TRUSTED_PEER_REPUTATION_CHANGE);
        let reward = ReputationChange::from(USEFUL_RESPONSE_REPUTATION_CHANGE);
        assert_eq!(reward.capped_for_trusted(), reward);
    }
}
