use crate::{error::RequestResult, message::LesMessage};
use les_network_types::PeerId;
use tokio::sync::mpsc;

/// A channel to send requests to the session of a connected peer.
///
/// The session owns the connection, frames the message and routes the response back, keyed by
/// the message's correlation id.
#[derive(Clone, Debug)]
pub struct PeerRequestSender {
    /// id of the remote node.
    pub peer_id: PeerId,
    /// The Sender half connected to a session.
    pub to_session_tx: mpsc::Sender<LesMessage>,
}

// === impl PeerRequestSender ===

impl PeerRequestSender {
    /// Constructs a new sender instance that's wired to a session
    pub const fn new(peer_id: PeerId, to_session_tx: mpsc::Sender<LesMessage>) -> Self {
        Self { peer_id, to_session_tx }
    }

    /// Attempts to immediately send a message on this Sender.
    ///
    /// A full channel is reported as [`RequestError::Timeout`](crate::RequestError::Timeout), a
    /// closed one as [`RequestError::ConnectionDropped`](crate::RequestError::ConnectionDropped).
    pub fn try_send(&self, msg: LesMessage) -> RequestResult<()> {
        Ok(self.to_session_tx.try_send(msg)?)
    }

    /// Returns the peer id of the remote peer.
    pub const fn peer_id(&self) -> &PeerId {
        &self.peer_id
    }

    /// Returns `true` if the session is gone.
    pub fn is_closed(&self) -> bool {
        self.to_session_tx.is_closed()
    }
}
