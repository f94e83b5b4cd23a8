//! Dial backoff classification.

/// Describes the type of backoff should be applied after a failed dial.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffKind {
    /// Use the lowest configured backoff duration.
    ///
    /// This applies to dial failures where there is a chance that they will be resolved
    /// after the short duration, e.g. a refused connection.
    Low,
    /// Use a slightly higher duration to put a candidate in timeout.
    ///
    /// This applies to dials that did not complete within the dial timeout and to candidates
    /// that kept failing for longer than the short retry window.
    Medium,
    /// Use the max configured backoff duration.
    ///
    /// This is intended for candidates that dropped shortly after being connected.
    High,
}

// === impl BackoffKind ===

impl BackoffKind {
    /// Returns true if the backoff is considered severe.
    pub const fn is_severe(&self) -> bool {
        matches!(self, Self::Medium | Self::High)
    }

    /// Picks the backoff kind for a dial failure, escalating once the failure streak leaves the
    /// short retry window.
    pub const fn for_dial_failure(fail_streak: u32, short_retry_count: u32) -> Self {
        if fail_streak > short_retry_count {
            Self::Medium
        } else {
            Self::Low
        }
    }
}
