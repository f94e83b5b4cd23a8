//! Configuration of the request path: distribution and retrieval.

use std::time::Duration;

/// Interval between two scheduling passes if nothing else wakes the distributor.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Lower bound of the adaptive per-peer request timeout.
pub const DEFAULT_MIN_REQUEST_TIMEOUT: Duration = Duration::from_millis(500);

/// Upper bound of the adaptive per-peer request timeout.
pub const DEFAULT_MAX_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Deadline of a retrieval if the caller does not set one.
pub const DEFAULT_RETRIEVAL_DEADLINE: Duration = Duration::from_secs(15);

/// Configures the request distributor.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct DistributorConfig {
    /// How often the queue is rescanned if no other event arrives.
    #[cfg_attr(feature = "serde", serde(with = "humantime_serde"))]
    pub poll_interval: Duration,
    /// Maximum number of requests in flight across all peers.
    pub max_inflight: usize,
    /// Maximum number of requests in flight to a single peer.
    pub max_inflight_per_peer: usize,
    /// Lower bound of the adaptive request timeout.
    #[cfg_attr(feature = "serde", serde(with = "humantime_serde"))]
    pub min_request_timeout: Duration,
    /// Upper bound of the adaptive request timeout.
    #[cfg_attr(feature = "serde", serde(with = "humantime_serde"))]
    pub max_request_timeout: Duration,
    /// Requests whose deadline is closer than this are scheduled before older ones.
    #[cfg_attr(feature = "serde", serde(with = "humantime_serde"))]
    pub urgent_deadline_window: Duration,
}

impl Default for DistributorConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_inflight: 64,
            max_inflight_per_peer: 4,
            min_request_timeout: DEFAULT_MIN_REQUEST_TIMEOUT,
            max_request_timeout: DEFAULT_MAX_REQUEST_TIMEOUT,
            urgent_deadline_window: Duration::from_secs(1),
        }
    }
}

impl DistributorConfig {
    /// Sets the maximum number of requests in flight across all peers.
    pub const fn with_max_inflight(mut self, max_inflight: usize) -> Self {
        self.max_inflight = max_inflight;
        self
    }

    /// Sets the maximum number of requests in flight to a single peer.
    pub const fn with_max_inflight_per_peer(mut self, max_inflight_per_peer: usize) -> Self {
        self.max_inflight_per_peer = max_inflight_per_peer;
        self
    }

    /// Sets the bounds of the adaptive request timeout.
    pub const fn with_request_timeout_bounds(mut self, min: Duration, max: Duration) -> Self {
        self.min_request_timeout = min;
        self.max_request_timeout = max;
        self
    }

    /// Returns settings for testing
    #[cfg(any(test, feature = "test-utils"))]
    pub fn test() -> Self {
        Self {
            poll_interval: Duration::from_millis(10),
            min_request_timeout: Duration::from_millis(100),
            max_request_timeout: Duration::from_millis(300),
            urgent_deadline_window: Duration::from_millis(200),
            ..Default::default()
        }
    }
}

/// Configures the retrieval manager.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct RetrievalConfig {
    /// Deadline applied when the caller does not pass one.
    #[cfg_attr(feature = "serde", serde(with = "humantime_serde"))]
    pub deadline: Duration,
    /// Extra cost, in percent, charged for a peer that recently failed the same request class.
    pub degraded_class_penalty_percent: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self { deadline: DEFAULT_RETRIEVAL_DEADLINE, degraded_class_penalty_percent: 100 }
    }
}

impl RetrievalConfig {
    /// Sets the default deadline.
    pub const fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    /// Returns settings for testing
    #[cfg(any(test, feature = "test-utils"))]
    pub fn test() -> Self {
        Self { deadline: Duration::from_secs(2), ..Default::default() }
    }
}
