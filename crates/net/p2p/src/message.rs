//! Messages exchanged with a light protocol server.
//!
//! Framing and encoding are owned by the session layer; these types only carry the content and
//! the correlation id every request echoes back in its response.

use alloy_primitives::{Bytes, B256};
use les_network_types::RequestClass;

/// Correlation id of a single request attempt.
pub type RequestId = u64;

/// Either a block hash _or_ a block number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockHashOrNumber {
    /// A block hash
    Hash(B256),
    /// A block number
    Number(u64),
}

impl From<B256> for BlockHashOrNumber {
    fn from(value: B256) -> Self {
        Self::Hash(value)
    }
}

impl From<u64> for BlockHashOrNumber {
    fn from(value: u64) -> Self {
        Self::Number(value)
    }
}

/// A request for a merkle proof of an account, or of a storage slot of that account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProofRequest {
    /// The block whose state root the proof is against.
    pub block_hash: B256,
    /// Hashed address of the account.
    pub account_key: B256,
    /// Hashed storage key, `None` for the account proof itself.
    pub key: Option<B256>,
    /// Trie level the proof starts at.
    pub from_level: u32,
}

/// A request for contract code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeRequest {
    /// The block whose state the code is looked up in.
    pub block_hash: B256,
    /// Hashed address of the contract.
    pub account_key: B256,
}

/// The helper tries a server maintains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HelperTrie {
    /// Canonical hash trie.
    Cht = 0,
    /// Bloom bits trie.
    BloomBits = 1,
}

/// A lpv1 request for a header and its canonical hash trie proof.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChtRequest {
    /// Index of the trie section.
    pub cht_number: u64,
    /// Number of the requested header.
    pub block_number: u64,
    /// Trie level the proof starts at.
    pub from_level: u32,
}

/// A lpv2 request for a helper trie entry and its proof.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelperTrieRequest {
    /// The trie to look into.
    pub trie: HelperTrie,
    /// Index of the trie section.
    pub section: u64,
    /// Key of the trie entry.
    pub key: Bytes,
    /// Trie level the proof starts at.
    pub from_level: u32,
    /// Auxiliary data to attach, e.g. the header for a canonical hash trie entry.
    pub aux_req: u32,
}

/// The content of an outbound request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestBody {
    /// Request a range of block headers.
    GetBlockHeaders {
        /// First block of the range.
        start: BlockHashOrNumber,
        /// Maximum number of headers.
        limit: u64,
        /// Blocks to skip between two headers.
        skip: u64,
        /// Walk towards genesis.
        reverse: bool,
    },
    /// Request block bodies by hash.
    GetBlockBodies(Vec<B256>),
    /// Request block receipts by hash.
    GetReceipts(Vec<B256>),
    /// Request state proofs, one proof per item.
    GetProofsV1(Vec<ProofRequest>),
    /// Request state proofs, all items merged into one node set.
    GetProofsV2(Vec<ProofRequest>),
    /// Request contract code.
    GetCode(Vec<CodeRequest>),
    /// Request canonical hash trie proofs.
    GetHeaderProofs(Vec<ChtRequest>),
    /// Request helper trie proofs.
    GetHelperTrieProofs(Vec<HelperTrieRequest>),
    /// Request the inclusion status of transactions.
    GetTxStatus(Vec<B256>),
}

impl RequestBody {
    /// The request class the message belongs to.
    pub const fn class(&self) -> RequestClass {
        match self {
            Self::GetBlockHeaders { .. } => RequestClass::Headers,
            Self::GetBlockBodies(_) => RequestClass::Bodies,
            Self::GetReceipts(_) => RequestClass::Receipts,
            Self::GetProofsV1(_) | Self::GetProofsV2(_) => RequestClass::Proofs,
            Self::GetCode(_) => RequestClass::Code,
            Self::GetHeaderProofs(_) | Self::GetHelperTrieProofs(_) => {
                RequestClass::HelperTrieProofs
            }
            Self::GetTxStatus(_) => RequestClass::TxStatus,
        }
    }
}

/// An outbound request with its correlation id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LesMessage {
    /// Correlation id echoed by the response.
    pub request_id: RequestId,
    /// The request.
    pub body: RequestBody,
}

/// The content of an inbound response.
///
/// Items stay encoded: interpreting them is up to the validator of the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseBody {
    /// Encoded block headers.
    BlockHeaders(Vec<Bytes>),
    /// Encoded block bodies.
    BlockBodies(Vec<Bytes>),
    /// Encoded receipt lists.
    Receipts(Vec<Bytes>),
    /// Proof nodes.
    Proofs(Vec<Bytes>),
    /// Contract code.
    Code(Vec<Bytes>),
    /// Helper trie proof nodes and auxiliary data.
    HelperTrieProofs(Vec<Bytes>),
    /// Encoded transaction status entries.
    TxStatus(Vec<Bytes>),
}

impl ResponseBody {
    /// The request class the response answers.
    pub const fn class(&self) -> RequestClass {
        match self {
            Self::BlockHeaders(_) => RequestClass::Headers,
            Self::BlockBodies(_) => RequestClass::Bodies,
            Self::Receipts(_) => RequestClass::Receipts,
            Self::Proofs(_) => RequestClass::Proofs,
            Self::Code(_) => RequestClass::Code,
            Self::HelperTrieProofs(_) => RequestClass::HelperTrieProofs,
            Self::TxStatus(_) => RequestClass::TxStatus,
        }
    }

    /// The items of the response.
    pub fn items(&self) -> &[Bytes] {
        match self {
            Self::BlockHeaders(items) |
            Self::BlockBodies(items) |
            Self::Receipts(items) |
            Self::Proofs(items) |
            Self::Code(items) |
            Self::HelperTrieProofs(items) |
            Self::TxStatus(items) => items,
        }
    }

    /// Returns `true` if the response carries no items.
    pub fn is_empty(&self) -> bool {
        self.items().is_empty()
    }
}

/// An inbound response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LesResponse {
    /// Correlation id of the request this answers.
    pub request_id: RequestId,
    /// The flow control buffer value the server reported after serving the request.
    pub buffer_value: Option<u64>,
    /// The response.
    pub body: ResponseBody,
}

impl LesResponse {
    /// Creates a response without a flow control update.
    pub const fn new(request_id: RequestId, body: ResponseBody) -> Self {
        Self { request_id, buffer_value: None, body }
    }
}
