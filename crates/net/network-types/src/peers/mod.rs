pub mod config;
pub mod reputation;

use std::{fmt, net::SocketAddr};

/// The `PeerId` type, the uncompressed public key of the remote node.
pub type PeerId = alloy_primitives::B512;

/// The address of a dialable node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NodeRecord {
    /// The identity of the node.
    pub id: PeerId,
    /// Where to reach the node.
    pub address: SocketAddr,
}

impl NodeRecord {
    /// Creates a new record.
    pub const fn new(address: SocketAddr, id: PeerId) -> Self {
        Self { id, address }
    }
}

impl fmt::Display for NodeRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "les://{:x}@{}", self.id, self.address)
    }
}

/// The tier a dial candidate belongs to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CandidateTier {
    /// Candidate learned from the bootstrap list or discovery.
    #[default]
    Basic,
    /// Candidate configured by the operator. Dialed first and never banned.
    Trusted,
}

impl CandidateTier {
    /// Returns `true` if the candidate is trusted.
    pub const fn is_trusted(&self) -> bool {
        matches!(self, Self::Trusted)
    }
}
