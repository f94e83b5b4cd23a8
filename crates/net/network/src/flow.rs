//! Client side estimate of a server's flow control buffer.

use les_network_types::FlowParams;
use std::time::{Duration, Instant};

/// Tracks what we believe the server's buffer for us currently holds.
///
/// The server drains the buffer by the cost of every request it serves and recharges it at a
/// fixed rate. Sending a request the buffer can't cover gets us disconnected, so the estimate is
/// conservative: it's charged when a request leaves and only corrected upwards by the value the
/// server echoes in its responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowEstimator {
    params: FlowParams,
    /// Buffer value at `updated_at`.
    buffer: u64,
    updated_at: Instant,
}

impl FlowEstimator {
    /// A full buffer, as announced in the handshake.
    pub fn new(params: FlowParams) -> Self {
        Self { params, buffer: params.buffer_limit, updated_at: Instant::now() }
    }

    /// The announced parameters.
    pub const fn params(&self) -> FlowParams {
        self.params
    }

    /// The estimated buffer value at `now`.
    pub fn buffer_at(&self, now: Instant) -> u64 {
        let elapsed = now.saturating_duration_since(self.updated_at).as_millis() as u64;
        self.buffer
            .saturating_add(elapsed.saturating_mul(self.params.min_recharge))
            .min(self.params.buffer_limit)
    }

    /// Returns how long to wait until a request of `cost` can be sent.
    ///
    /// Returns `None` if the buffer can never cover the cost.
    pub fn wait_time(&self, cost: u64, now: Instant) -> Option<Duration> {
        if cost > self.params.buffer_limit {
            return None
        }
        let buffer = self.buffer_at(now);
        if buffer >= cost {
            return Some(Duration::ZERO)
        }
        if self.params.min_recharge == 0 {
            return None
        }
        let missing = cost - buffer;
        Some(Duration::from_millis(missing.div_ceil(self.params.min_recharge)))
    }

    /// Charges the buffer with the cost of a request sent at `now`.
    pub fn consume(&mut self, cost: u64, now: Instant) {
        self.buffer = self.buffer_at(now).saturating_sub(cost);
        self.updated_at = now;
    }

    /// Adopts the buffer value the server reported.
    pub fn on_buffer_value(&mut self, value: u64, now: Instant) {
        self.buffer = value.min(self.params.buffer_limit);
        self.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PARAMS: FlowParams = FlowParams { buffer_limit: 1_000, min_recharge: 10 };

    #[test]
    fn drains_and_recharges() {
        let now = Instant::now();
        let mut flow =
            FlowEstimator { params: PARAMS, buffer: PARAMS.buffer_limit, updated_at: now };
        assert_eq!(flow.wait_time(600, now), Some(Duration::ZERO));

        flow.consume(600, now);
        assert_eq!(flow.buffer_at(now), 400);
        // 200 missing at 10 per ms
        assert_eq!(flow.wait_time(600, now), Some(Duration::from_millis(20)));
        assert_eq!(flow.buffer_at(now + Duration::from_millis(20)), 600);
        assert_eq!(flow.buffer_at(now + Duration::from_secs(10)), PARAMS.buffer_limit);
    }

    #[test]
    fn rejects_costs_above_limit() {
        let flow = FlowEstimator::new(PARAMS);
        assert_eq!(flow.wait_time(1_001, Instant::now()), None);
    }

    #[test]
    fn adopts_server_value() {
        let now = Instant::now();
        let mut flow = FlowEstimator { params: PARAMS, buffer: 0, updated_at: now };
        flow.on_buffer_value(5_000, now);
        assert_eq!(flow.buffer_at(now), PARAMS.buffer_limit);
        flow.on_buffer_value(100, now);
        assert_eq!(flow.buffer_at(now), 100);
    }
}
