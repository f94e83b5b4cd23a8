//! Capabilities a remote peer announces during the handshake.

use alloy_primitives::B256;
use std::{collections::HashMap, fmt};

/// Cost charged for a request class if the peer did not announce a cost table.
pub const DEFAULT_REQUEST_COST: RequestCost = RequestCost { base: 150, per_item: 30 };

/// The negotiated light protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ProtocolVersion {
    /// First light protocol version.
    Lpv1 = 1,
    /// Second light protocol version, adds tx status and helper trie proofs.
    Lpv2 = 2,
}

impl ProtocolVersion {
    /// Returns the number of the version.
    pub const fn as_u8(&self) -> u8 {
        *self as u8
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lpv{}", self.as_u8())
    }
}

/// What kind of node sits on the other side of the connection.
///
/// The set is closed: every peer is one of these variants and the variant decides which request
/// classes the peer can structurally answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PeerKind {
    /// A light protocol server, serves every request class.
    LesServer,
    /// A plain full node, serves chain data but no proofs.
    EthFull,
}

impl PeerKind {
    /// Returns `true` if a peer of this kind can serve the given class at all.
    pub const fn serves(&self, class: RequestClass) -> bool {
        match self {
            Self::LesServer => true,
            Self::EthFull => {
                matches!(
                    class,
                    RequestClass::Headers | RequestClass::Bodies | RequestClass::Receipts
                )
            }
        }
    }
}

/// The class of a request.
///
/// Degradation after failures is tracked per `(peer, class)`: a peer can be bad at serving one
/// class of data and fine at another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum RequestClass {
    /// Block headers.
    Headers,
    /// Block bodies.
    Bodies,
    /// Block receipts.
    Receipts,
    /// Merkle proofs of account and storage trie entries.
    Proofs,
    /// Contract code.
    Code,
    /// Proofs against the canonical hash trie and the bloom trie.
    HelperTrieProofs,
    /// Transaction inclusion status.
    TxStatus,
}

impl RequestClass {
    /// All request classes.
    pub const ALL: [Self; 7] = [
        Self::Headers,
        Self::Bodies,
        Self::Receipts,
        Self::Proofs,
        Self::Code,
        Self::HelperTrieProofs,
        Self::TxStatus,
    ];
}

impl fmt::Display for RequestClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Headers => "headers",
            Self::Bodies => "bodies",
            Self::Receipts => "receipts",
            Self::Proofs => "proofs",
            Self::Code => "code",
            Self::HelperTrieProofs => "helper-trie-proofs",
            Self::TxStatus => "tx-status",
        };
        f.write_str(name)
    }
}

/// Announced cost of serving a request class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RequestCost {
    /// Fixed cost per request.
    pub base: u64,
    /// Additional cost per requested item.
    pub per_item: u64,
}

impl RequestCost {
    /// Returns the cost of a request for `items` items.
    pub const fn cost(&self, items: u64) -> u64 {
        self.base.saturating_add(self.per_item.saturating_mul(items))
    }
}

/// Flow control parameters announced by a server.
///
/// The server keeps a buffer per client that is drained by the cost of every request and
/// recharged at `min_recharge` units per millisecond up to `buffer_limit`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FlowParams {
    /// Maximum buffer value.
    pub buffer_limit: u64,
    /// Recharge rate in units per millisecond.
    pub min_recharge: u64,
}

/// The head a peer announced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct HeadInfo {
    /// Number of the head block.
    pub number: u64,
    /// Hash of the head block.
    pub hash: B256,
}

/// Everything a peer declared about itself during the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerCapabilities {
    /// The kind of node.
    pub kind: PeerKind,
    /// The negotiated protocol version.
    pub version: ProtocolVersion,
    /// The announced head.
    pub head: HeadInfo,
    /// Whether the peer serves headers at all.
    pub serve_headers: bool,
    /// The oldest block whose chain data (headers, bodies, receipts) is served.
    ///
    /// `None` if chain data is not served.
    pub serve_chain_since: Option<u64>,
    /// The oldest block whose state is served.
    ///
    /// `None` if state is not served.
    pub serve_state_since: Option<u64>,
    /// The number of recent blocks whose state is kept, if the peer prunes state.
    pub serve_recent_state: Option<u64>,
    /// Announced cost table, per request class.
    pub cost_table: HashMap<RequestClass, RequestCost>,
    /// Announced flow control parameters.
    pub flow: Option<FlowParams>,
}

impl PeerCapabilities {
    /// Capabilities of a light server that serves everything from genesis.
    pub fn les_server(version: ProtocolVersion, head: HeadInfo) -> Self {
        Self {
            kind: PeerKind::LesServer,
            version,
            head,
            serve_headers: true,
            serve_chain_since: Some(0),
            serve_state_since: Some(0),
            serve_recent_state: None,
            cost_table: HashMap::new(),
            flow: None,
        }
    }

    /// Capabilities of a full node that serves chain data from genesis.
    pub fn eth_full(head: HeadInfo) -> Self {
        Self {
            kind: PeerKind::EthFull,
            version: ProtocolVersion::Lpv1,
            head,
            serve_headers: true,
            serve_chain_since: Some(0),
            serve_state_since: None,
            serve_recent_state: None,
            cost_table: HashMap::new(),
            flow: None,
        }
    }

    /// Sets the announced cost of a request class.
    pub fn with_cost(mut self, class: RequestClass, cost: RequestCost) -> Self {
        self.cost_table.insert(class, cost);
        self
    }

    /// Sets the flow control parameters.
    pub fn with_flow(mut self, flow: FlowParams) -> Self {
        self.flow = Some(flow);
        self
    }

    /// Sets the pruning horizon of chain data and state.
    pub fn with_history(mut self, chain_since: Option<u64>, state_since: Option<u64>) -> Self {
        self.serve_chain_since = chain_since;
        self.serve_state_since = state_since;
        self
    }

    /// Returns the announced cost of a request for `items` items of `class`.
    pub fn request_cost(&self, class: RequestClass, items: u64) -> u64 {
        self.cost_table.get(&class).unwrap_or(&DEFAULT_REQUEST_COST).cost(items)
    }

    /// The relative weight of this peer's costs, used to rank peers regardless of request class.
    pub fn cost_weight(&self) -> u64 {
        self.request_cost(RequestClass::Headers, 1).max(1)
    }

    /// Returns `true` if the peer can structurally answer a request of `class` that needs data
    /// of block `number`, optionally including that block's state.
    pub fn can_serve(&self, class: RequestClass, number: Option<u64>, needs_state: bool) -> bool {
        if !self.kind.serves(class) {
            return false
        }
        if class == RequestClass::Headers && !self.serve_headers {
            return false
        }
        let Some(number) = number else { return true };
        if number > self.head.number {
            return false
        }
        match self.serve_chain_since {
            Some(since) if number >= since => {}
            _ => return false,
        }
        if needs_state {
            match self.serve_state_since {
                Some(since) if number >= since => {}
                _ => return false,
            }
            if let Some(recent) = self.serve_recent_state {
                if self.head.number.saturating_sub(number) > recent {
                    return false
                }
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn head(number: u64) -> HeadInfo {
        HeadInfo { number, hash: B256::ZERO }
    }

    #[test]
    fn full_node_serves_chain_data_only() {
        let caps = PeerCapabilities::eth_full(head(100));
        assert!(caps.can_serve(RequestClass::Headers, Some(50), false));
        assert!(caps.can_serve(RequestClass::Receipts, Some(50), false));
        assert!(!caps.can_serve(RequestClass::Proofs, Some(50), true));
        assert!(!caps.can_serve(RequestClass::TxStatus, None, false));
    }

    #[test]
    fn rejects_blocks_past_head() {
        let caps = PeerCapabilities::les_server(ProtocolVersion::Lpv2, head(50));
        assert!(caps.can_serve(RequestClass::Headers, Some(50), false));
        assert!(!caps.can_serve(RequestClass::Headers, Some(100), false));
    }

    #[test]
    fn respects_pruning_horizon() {
        let mut caps = PeerCapabilities::les_server(ProtocolVersion::Lpv2, head(10_000))
            .with_history(Some(1_000), Some(9_000));
        assert!(!caps.can_serve(RequestClass::Bodies, Some(999), false));
        assert!(caps.can_serve(RequestClass::Bodies, Some(1_000), false));
        assert!(!caps.can_serve(RequestClass::Proofs, Some(8_999), true));
        assert!(caps.can_serve(RequestClass::Proofs, Some(9_500), true));

        caps.serve_recent_state = Some(128);
        assert!(!caps.can_serve(RequestClass::Proofs, Some(9_500), true));
        assert!(caps.can_serve(RequestClass::Proofs, Some(9_900), true));
    }

    #[test]
    fn cost_table_lookup() {
        let caps = PeerCapabilities::les_server(ProtocolVersion::Lpv2, head(1))
            .with_cost(RequestClass::Headers, RequestCost { base: 10, per_item: 2 });
        assert_eq!(caps.request_cost(RequestClass::Headers, 5), 20);
        assert_eq!(caps.request_cost(RequestClass::Bodies, 1), DEFAULT_REQUEST_COST.cost(1));
        assert_eq!(caps.cost_weight(), 12);
    }
}
