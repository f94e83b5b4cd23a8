//! Candidate pool: decides whom to connect to and whom to ban.
//!
//! The [`PoolManager`] owns every known dial candidate. It is driven by the network layer, which
//! performs the dials the pool asks for and reports session events back, and by the distributor,
//! which reports the outcome of every request attempt through the [`PoolHandle`].

mod candidate;
mod manager;

pub use candidate::{CandidateInfo, CandidateState, Direction};
pub use manager::{PoolHandle, PoolManager};

use les_network_types::PeerId;
use std::net::SocketAddr;

/// Actions the network layer should take on behalf of the [`PoolManager`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolAction {
    /// Dial the candidate and report the outcome through
    /// [`PoolManager::on_dial_succeeded`] or [`PoolManager::on_dial_failed`].
    Dial {
        /// The candidate to dial.
        peer_id: PeerId,
        /// Where to reach it.
        remote_addr: SocketAddr,
    },
    /// Close the session to the peer.
    Disconnect {
        /// The peer to disconnect.
        peer_id: PeerId,
    },
    /// The candidate was banned. Block it on the transport, if supported.
    Ban {
        /// The banned candidate.
        peer_id: PeerId,
    },
    /// A new candidate was added.
    CandidateAdded(PeerId),
}
