use les_network_types::ReputationChangeKind;
use tokio::sync::{mpsc, oneshot};

/// Result alias for result of a request.
pub type RequestResult<T> = Result<T, RequestError>;

/// Error variants that can happen on a single attempt against a single peer.
///
/// These errors never cross the caller boundary of a retrieval: they are absorbed by the
/// distributor, which penalizes the peer and retries elsewhere.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum RequestError {
    /// Closed channel to the peer.
    #[error("closed channel to the peer")]
    ChannelClosed,
    /// Connection to a peer dropped while handling the request.
    #[error("connection to a peer dropped while handling the request")]
    ConnectionDropped,
    /// The request can not be expressed in the protocol version negotiated with the peer.
    #[error("message is not supported by the remote peer")]
    UnsupportedCapability,
    /// Request timed out while awaiting response.
    #[error("request timed out while awaiting response")]
    Timeout,
    /// The response does not match the request it answers.
    #[error("received malformed response")]
    Malformed,
    /// The response failed the caller's validation.
    #[error("response failed validation: {0}")]
    ValidationFailed(ValidationError),
}

// === impl RequestError ===

impl RequestError {
    /// Indicates whether another peer may succeed where this attempt failed.
    pub const fn is_retryable(&self) -> bool {
        !matches!(self, Self::ChannelClosed)
    }

    /// Whether the error happened because the channel was closed.
    pub const fn is_channel_closed(&self) -> bool {
        matches!(self, Self::ChannelClosed)
    }

    /// Returns the reputation change the failure merits, if any.
    ///
    /// [`RequestError::ConnectionDropped`] and [`RequestError::ChannelClosed`] are handled when
    /// the dropped connection is cleaned up, [`RequestError::UnsupportedCapability`] is our own
    /// selection mistake.
    pub const fn reputation_change(&self) -> Option<ReputationChangeKind> {
        match self {
            Self::Timeout => Some(ReputationChangeKind::Timeout),
            Self::Malformed => Some(ReputationChangeKind::MalformedResponse),
            Self::ValidationFailed(_) => Some(ReputationChangeKind::InvalidResponse),
            Self::ChannelClosed | Self::ConnectionDropped | Self::UnsupportedCapability => None,
        }
    }
}

impl<T> From<mpsc::error::SendError<T>> for RequestError {
    fn from(_: mpsc::error::SendError<T>) -> Self {
        Self::ChannelClosed
    }
}

impl<T> From<mpsc::error::TrySendError<T>> for RequestError {
    fn from(err: mpsc::error::TrySendError<T>) -> Self {
        match err {
            mpsc::error::TrySendError::Full(_) => Self::Timeout,
            mpsc::error::TrySendError::Closed(_) => Self::ConnectionDropped,
        }
    }
}

impl From<oneshot::error::RecvError> for RequestError {
    fn from(_: oneshot::error::RecvError) -> Self {
        Self::ChannelClosed
    }
}

/// A response was decoded but rejected by the caller's semantic or cryptographic check.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
#[error("{0}")]
pub struct ValidationError(String);

impl ValidationError {
    /// Creates a new validation error with the given reason.
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }

    /// The reason the response was rejected.
    pub fn reason(&self) -> &str {
        &self.0
    }
}

/// Errors of the candidate persistence boundary.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Reading or writing the backing file failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// The backing file holds invalid data.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn penalties_follow_failure_kind() {
        assert_eq!(RequestError::Timeout.reputation_change(), Some(ReputationChangeKind::Timeout));
        assert_eq!(
            RequestError::ValidationFailed(ValidationError::new("bad root")).reputation_change(),
            Some(ReputationChangeKind::InvalidResponse)
        );
        assert_eq!(RequestError::ConnectionDropped.reputation_change(), None);
        assert!(!RequestError::ChannelClosed.is_retryable());
        assert!(RequestError::Malformed.is_retryable());
    }

    #[tokio::test]
    async fn closed_channels_map_to_channel_closed() {
        let (tx, rx) = oneshot::channel::<()>();
        drop(tx);
        let err = rx.await.unwrap_err();
        assert_eq!(RequestError::from(err), RequestError::ChannelClosed);

        let (tx, rx) = mpsc::channel::<()>(1);
        drop(rx);
        let err = tx.try_send(()).unwrap_err();
        assert_eq!(RequestError::from(err), RequestError::ConnectionDropped);
    }
}
