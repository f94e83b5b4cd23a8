//! Configuration for the peer pool.

use std::{collections::HashSet, time::Duration};

use crate::{
    peers::reputation::{Reputation, ReputationChangeWeights},
    BackoffKind, NodeRecord,
};

/// Number of connected servers the pool aims for.
pub const DEFAULT_TARGET_PEERS: usize = 5;

/// Maximum number of available slots for inbound sessions.
pub const DEFAULT_MAX_COUNT_PEERS_INBOUND: usize = 10;

/// Maximum number of available slots for concurrent outgoing dials.
///
/// This restricts how many outbound dials can be performed concurrently.
pub const DEFAULT_MAX_COUNT_CONCURRENT_OUTBOUND_DIALS: usize = 3;

/// Candidates below this reputation are not dialed until their reputation recovers.
pub const DEFAULT_MIN_DIAL_REPUTATION: Reputation = -25 * 1024;

/// The durations to use when a dial backoff should be applied to a candidate.
///
/// See also [`BackoffKind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PeerBackoffDurations {
    /// Applies to dial problems where there is a chance that they will be resolved after the
    /// short duration.
    #[cfg_attr(feature = "serde", serde(with = "humantime_serde"))]
    pub low: Duration,
    /// Applies to more severe dial problems where there is a lower chance that they will be
    /// resolved.
    #[cfg_attr(feature = "serde", serde(with = "humantime_serde"))]
    pub medium: Duration,
    /// Intended for candidates that connect and immediately drop.
    #[cfg_attr(feature = "serde", serde(with = "humantime_serde"))]
    pub high: Duration,
    /// Maximum total backoff duration.
    #[cfg_attr(feature = "serde", serde(with = "humantime_serde"))]
    pub max: Duration,
}

impl PeerBackoffDurations {
    /// Returns the corresponding [`Duration`]
    pub const fn backoff(&self, kind: BackoffKind) -> Duration {
        match kind {
            BackoffKind::Low => self.low,
            BackoffKind::Medium => self.medium,
            BackoffKind::High => self.high,
        }
    }

    /// Returns how long to back off after `fail_streak` consecutive failures.
    ///
    /// The duration doubles with every failure in the streak and is capped by the configured
    /// maximum backoff duration.
    pub fn backoff_for(&self, kind: BackoffKind, fail_streak: u32) -> Duration {
        let exponent = fail_streak.saturating_sub(1).min(16);
        self.backoff(kind).saturating_mul(1 << exponent).min(self.max)
    }

    /// Returns the timestamp until which we should backoff.
    pub fn backoff_until(&self, kind: BackoffKind, fail_streak: u32) -> std::time::Instant {
        std::time::Instant::now() + self.backoff_for(kind, fail_streak)
    }

    /// Returns durations for testing.
    #[cfg(any(test, feature = "test-utils"))]
    pub const fn test() -> Self {
        Self {
            low: Duration::from_millis(50),
            medium: Duration::from_millis(100),
            high: Duration::from_millis(200),
            max: Duration::from_millis(400),
        }
    }
}

impl Default for PeerBackoffDurations {
    fn default() -> Self {
        Self {
            low: Duration::from_secs(5),
            // 1min
            medium: Duration::from_secs(60),
            // 5min
            high: Duration::from_secs(60 * 5),
            // 10min
            max: Duration::from_secs(60 * 10),
        }
    }
}

/// Restrictions on the number of connections.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize), serde(default))]
pub struct ConnectionsConfig {
    /// Number of outbound connections the pool tries to keep.
    pub target_peers: usize,
    /// Maximum allowed inbound connections.
    pub max_inbound: usize,
    /// Maximum allowed concurrent outbound dials.
    pub max_concurrent_dials: usize,
}

impl Default for ConnectionsConfig {
    fn default() -> Self {
        Self {
            target_peers: DEFAULT_TARGET_PEERS,
            max_inbound: DEFAULT_MAX_COUNT_PEERS_INBOUND,
            max_concurrent_dials: DEFAULT_MAX_COUNT_CONCURRENT_OUTBOUND_DIALS,
        }
    }
}

/// Config type for initiating a peer pool.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PoolConfig {
    /// How often to recheck free slots for outbound connections.
    #[cfg_attr(feature = "serde", serde(with = "humantime_serde"))]
    pub refill_slots_interval: Duration,
    /// How often backoffs and dial timeouts are swept, and reputation decays.
    #[cfg_attr(feature = "serde", serde(with = "humantime_serde"))]
    pub release_interval: Duration,
    /// How long a dial may take before it counts as failed.
    #[cfg_attr(feature = "serde", serde(with = "humantime_serde"))]
    pub dial_timeout: Duration,
    /// Uptime after which a dropped connection costs half the usual penalty.
    #[cfg_attr(feature = "serde", serde(with = "humantime_serde"))]
    pub target_connection_time: Duration,
    /// Trusted nodes to connect to or accept from.
    pub trusted_nodes: HashSet<NodeRecord>,
    /// Connect to or accept from trusted nodes only?
    pub trusted_nodes_only: bool,
    /// Nodes available at launch.
    pub bootnodes: HashSet<NodeRecord>,
    /// Candidates below this reputation are not dialed.
    pub min_dial_reputation: Reputation,
    /// Number of consecutive invalid responses after which a peer is banned.
    pub max_invalid_responses: u32,
    /// Number of consecutive dial failures backed off with [`BackoffKind::Low`] before
    /// escalating to [`BackoffKind::Medium`].
    pub short_retry_count: u32,
    /// Restrictions on connections.
    pub connection_info: ConnectionsConfig,
    /// How to weigh reputation changes.
    pub reputation_weights: ReputationChangeWeights,
    /// How long to backoff candidates that we failed to dial.
    ///
    /// The backoff duration increases with the failure streak.
    pub backoff_durations: PeerBackoffDurations,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            refill_slots_interval: Duration::from_millis(1_000),
            release_interval: Duration::from_millis(1_000),
            dial_timeout: Duration::from_secs(10),
            // 10min
            target_connection_time: Duration::from_secs(60 * 10),
            trusted_nodes: Default::default(),
            trusted_nodes_only: false,
            bootnodes: Default::default(),
            min_dial_reputation: DEFAULT_MIN_DIAL_REPUTATION,
            max_invalid_responses: 3,
            short_retry_count: 5,
            connection_info: Default::default(),
            reputation_weights: Default::default(),
            backoff_durations: Default::default(),
        }
    }
}

impl PoolConfig {
    /// Number of outbound connections the pool tries to keep.
    pub const fn with_target_peers(mut self, target_peers: usize) -> Self {
        self.connection_info.target_peers = target_peers;
        self
    }

    /// Maximum allowed inbound connections.
    pub const fn with_max_inbound(mut self, max_inbound: usize) -> Self {
        self.connection_info.max_inbound = max_inbound;
        self
    }

    /// Maximum allowed concurrent outbound dials.
    pub const fn with_max_concurrent_dials(mut self, max_concurrent_dials: usize) -> Self {
        self.connection_info.max_concurrent_dials = max_concurrent_dials;
        self
    }

    /// Nodes to always connect to.
    pub fn with_trusted_nodes(mut self, nodes: HashSet<NodeRecord>) -> Self {
        self.trusted_nodes = nodes;
        self
    }

    /// Connect only to trusted nodes.
    pub const fn with_trusted_nodes_only(mut self, trusted_only: bool) -> Self {
        self.trusted_nodes_only = trusted_only;
        self
    }

    /// Nodes available at launch.
    pub fn with_bootnodes(mut self, nodes: HashSet<NodeRecord>) -> Self {
        self.bootnodes = nodes;
        self
    }

    /// Configures after how many consecutive invalid responses a peer is banned.
    pub const fn with_max_invalid_responses(mut self, max_invalid_responses: u32) -> Self {
        self.max_invalid_responses = max_invalid_responses;
        self
    }

    /// Configures the reputation floor for dialing.
    pub const fn with_min_dial_reputation(mut self, min_dial_reputation: Reputation) -> Self {
        self.min_dial_reputation = min_dial_reputation;
        self
    }

    /// Configures how long a dial may take.
    pub const fn with_dial_timeout(mut self, dial_timeout: Duration) -> Self {
        self.dial_timeout = dial_timeout;
        self
    }

    /// Configures the uptime after which a dropped session costs half the drop penalty.
    pub const fn with_target_connection_time(mut self, target_connection_time: Duration) -> Self {
        self.target_connection_time = target_connection_time;
        self
    }

    /// Configures how to weigh reputation changes.
    pub const fn with_reputation_weights(
        mut self,
        reputation_weights: ReputationChangeWeights,
    ) -> Self {
        self.reputation_weights = reputation_weights;
        self
    }

    /// Configures how long to backoff candidates that we failed to dial.
    pub const fn with_backoff_durations(mut self, backoff_durations: PeerBackoffDurations) -> Self {
        self.backoff_durations = backoff_durations;
        self
    }

    /// Returns settings for testing
    #[cfg(any(test, feature = "test-utils"))]
    pub fn test() -> Self {
        Self {
            refill_slots_interval: Duration::from_millis(50),
            release_interval: Duration::from_millis(20),
            dial_timeout: Duration::from_millis(200),
            backoff_durations: PeerBackoffDurations::test(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_with_streak() {
        let durations = PeerBackoffDurations::default();
        assert_eq!(durations.backoff_for(BackoffKind::Low, 1), Duration::from_secs(5));
        assert_eq!(durations.backoff_for(BackoffKind::Low, 2), Duration::from_secs(10));
        assert_eq!(durations.backoff_for(BackoffKind::Low, 3), Duration::from_secs(20));
        // capped
        assert_eq!(durations.backoff_for(BackoffKind::Low, 20), durations.max);
        assert_eq!(durations.backoff_for(BackoffKind::High, 3), durations.max);
    }

    #[test]
    fn zero_streak_uses_base() {
        let durations = PeerBackoffDurations::test();
        assert_eq!(durations.backoff_for(BackoffKind::Medium, 0), durations.medium);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn pool_config_serde_roundtrip() {
        let config = PoolConfig::default().with_target_peers(9);
        let json = serde_json::to_string(&config).unwrap();
        let decoded: PoolConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, config);
    }
}
