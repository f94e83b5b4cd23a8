//! Typed on-demand retrieval requests.

use crate::{
    error::{RequestError, RequestResult},
    message::{
        BlockHashOrNumber, ChtRequest, CodeRequest, HelperTrie, HelperTrieRequest, LesMessage,
        ProofRequest, RequestBody, RequestId, ResponseBody,
    },
};
use alloy_primitives::{keccak256, Address, Bytes, B256};
use les_network_types::{PeerCapabilities, ProtocolVersion, RequestClass};

/// Auxiliary data requested with a canonical hash trie proof: the header itself.
const HELPER_TRIE_AUX_HEADER: u32 = 2;

/// A piece of chain data to fetch from the network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OdrRequest {
    /// The canonical header at the given height.
    Header {
        /// Block number.
        number: u64,
    },
    /// The header with the given hash.
    HeaderByHash {
        /// Block hash.
        hash: B256,
    },
    /// A block body.
    BlockBody {
        /// Block hash.
        hash: B256,
        /// Block number, used to find peers that still serve the block.
        number: u64,
    },
    /// The receipts of a block.
    Receipts {
        /// Block hash.
        hash: B256,
        /// Block number.
        number: u64,
    },
    /// A merkle proof of an account.
    AccountProof {
        /// The block whose state is proven.
        block_hash: B256,
        /// Number of that block.
        number: u64,
        /// The state root the proof has to verify against.
        state_root: B256,
        /// The account.
        address: Address,
    },
    /// A merkle proof of a storage slot.
    StorageProof {
        /// The block whose state is proven.
        block_hash: B256,
        /// Number of that block.
        number: u64,
        /// The account owning the storage.
        address: Address,
        /// The storage slot.
        key: B256,
    },
    /// Contract code.
    Code {
        /// The block whose state the code is looked up in.
        block_hash: B256,
        /// Number of that block.
        number: u64,
        /// The contract.
        address: Address,
        /// Hash the returned code has to match.
        code_hash: B256,
    },
    /// A header proven against the canonical hash trie.
    ChtProof {
        /// Index of the trie section.
        cht_number: u64,
        /// Number of the requested header.
        block_number: u64,
    },
    /// Bloom bits of several sections, proven against the bloom trie.
    BloomBits {
        /// Index of the bloom bit.
        bit: u16,
        /// Sections to fetch.
        sections: Vec<u64>,
    },
    /// Inclusion status of transactions.
    TxStatus {
        /// Transaction hashes.
        hashes: Vec<B256>,
    },
}

impl OdrRequest {
    /// The request class of the request.
    pub const fn class(&self) -> RequestClass {
        match self {
            Self::Header { .. } | Self::HeaderByHash { .. } => RequestClass::Headers,
            Self::BlockBody { .. } => RequestClass::Bodies,
            Self::Receipts { .. } => RequestClass::Receipts,
            Self::AccountProof { .. } | Self::StorageProof { .. } => RequestClass::Proofs,
            Self::Code { .. } => RequestClass::Code,
            Self::ChtProof { .. } | Self::BloomBits { .. } => RequestClass::HelperTrieProofs,
            Self::TxStatus { .. } => RequestClass::TxStatus,
        }
    }

    /// Number of items requested, used to compute the request cost.
    pub fn items(&self) -> u64 {
        match self {
            Self::BloomBits { sections, .. } => sections.len() as u64,
            Self::TxStatus { hashes } => hashes.len() as u64,
            _ => 1,
        }
    }

    /// The block whose data is requested, if the request is tied to one.
    pub const fn block_number(&self) -> Option<u64> {
        match self {
            Self::Header { number } |
            Self::BlockBody { number, .. } |
            Self::Receipts { number, .. } |
            Self::AccountProof { number, .. } |
            Self::StorageProof { number, .. } |
            Self::Code { number, .. } => Some(*number),
            Self::ChtProof { block_number, .. } => Some(*block_number),
            Self::HeaderByHash { .. } | Self::BloomBits { .. } | Self::TxStatus { .. } => None,
        }
    }

    /// Returns `true` if serving the request needs the state of [`Self::block_number`].
    pub const fn needs_state(&self) -> bool {
        matches!(self, Self::AccountProof { .. } | Self::StorageProof { .. } | Self::Code { .. })
    }

    /// The lowest protocol version the request can be expressed in.
    pub const fn min_version(&self) -> ProtocolVersion {
        match self {
            Self::BloomBits { .. } | Self::TxStatus { .. } => ProtocolVersion::Lpv2,
            _ => ProtocolVersion::Lpv1,
        }
    }

    /// Returns `true` if a peer with the given capabilities can structurally answer the request.
    pub fn is_servable_by(&self, capabilities: &PeerCapabilities) -> bool {
        capabilities.version >= self.min_version() &&
            capabilities.can_serve(self.class(), self.block_number(), self.needs_state())
    }

    /// Encodes the request into the message appropriate for the negotiated `version`.
    pub fn to_message(
        &self,
        version: ProtocolVersion,
        request_id: RequestId,
    ) -> RequestResult<LesMessage> {
        if version < self.min_version() {
            return Err(RequestError::UnsupportedCapability)
        }

        let body = match self {
            Self::Header { number } => RequestBody::GetBlockHeaders {
                start: BlockHashOrNumber::Number(*number),
                limit: 1,
                skip: 0,
                reverse: false,
            },
            Self::HeaderByHash { hash } => RequestBody::GetBlockHeaders {
                start: BlockHashOrNumber::Hash(*hash),
                limit: 1,
                skip: 0,
                reverse: false,
            },
            Self::BlockBody { hash, .. } => RequestBody::GetBlockBodies(vec![*hash]),
            Self::Receipts { hash, .. } => RequestBody::GetReceipts(vec![*hash]),
            Self::AccountProof { block_hash, address, .. } => proofs(
                version,
                ProofRequest {
                    block_hash: *block_hash,
                    account_key: keccak256(address),
                    key: None,
                    from_level: 0,
                },
            ),
            Self::StorageProof { block_hash, address, key, .. } => proofs(
                version,
                ProofRequest {
                    block_hash: *block_hash,
                    account_key: keccak256(address),
                    key: Some(keccak256(key)),
                    from_level: 0,
                },
            ),
            Self::Code { block_hash, address, .. } => RequestBody::GetCode(vec![CodeRequest {
                block_hash: *block_hash,
                account_key: keccak256(address),
            }]),
            Self::ChtProof { cht_number, block_number } => match version {
                ProtocolVersion::Lpv1 => RequestBody::GetHeaderProofs(vec![ChtRequest {
                    cht_number: *cht_number,
                    block_number: *block_number,
                    from_level: 0,
                }]),
                ProtocolVersion::Lpv2 => {
                    RequestBody::GetHelperTrieProofs(vec![HelperTrieRequest {
                        trie: HelperTrie::Cht,
                        section: *cht_number,
                        key: Bytes::copy_from_slice(&block_number.to_be_bytes()),
                        from_level: 0,
                        aux_req: HELPER_TRIE_AUX_HEADER,
                    }])
                }
            },
            Self::BloomBits { bit, sections } => RequestBody::GetHelperTrieProofs(
                sections
                    .iter()
                    .map(|section| {
                        let mut key = Vec::with_capacity(10);
                        key.extend_from_slice(&bit.to_be_bytes());
                        key.extend_from_slice(&section.to_be_bytes());
                        HelperTrieRequest {
                            trie: HelperTrie::BloomBits,
                            section: *section,
                            key: key.into(),
                            from_level: 0,
                            aux_req: 0,
                        }
                    })
                    .collect(),
            ),
            Self::TxStatus { hashes } => RequestBody::GetTxStatus(hashes.clone()),
        };

        Ok(LesMessage { request_id, body })
    }

    /// Checks that a response has the shape of an answer to this request.
    ///
    /// This is not validation: a well formed response may still carry wrong data.
    pub fn check_response(&self, response: &ResponseBody) -> RequestResult<()> {
        if response.class() != self.class() || response.is_empty() {
            return Err(RequestError::Malformed)
        }
        // proofs are node sets of arbitrary size
        let bounded =
            !matches!(self.class(), RequestClass::Proofs | RequestClass::HelperTrieProofs);
        if bounded && response.items().len() as u64 > self.items() {
            return Err(RequestError::Malformed)
        }
        Ok(())
    }
}

fn proofs(version: ProtocolVersion, request: ProofRequest) -> RequestBody {
    match version {
        ProtocolVersion::Lpv1 => RequestBody::GetProofsV1(vec![request]),
        ProtocolVersion::Lpv2 => RequestBody::GetProofsV2(vec![request]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use les_network_types::HeadInfo;

    #[test]
    fn proofs_follow_protocol_version() {
        let request = OdrRequest::AccountProof {
            block_hash: B256::ZERO,
            number: 10,
            state_root: B256::ZERO,
            address: Address::ZERO,
        };
        let v1 = request.to_message(ProtocolVersion::Lpv1, 1).unwrap();
        assert_matches!(v1.body, RequestBody::GetProofsV1(_));
        let v2 = request.to_message(ProtocolVersion::Lpv2, 2).unwrap();
        assert_matches!(v2.body, RequestBody::GetProofsV2(ref items) if items[0].key.is_none());
        assert_eq!(v2.request_id, 2);
    }

    #[test]
    fn cht_proofs_follow_protocol_version() {
        let request = OdrRequest::ChtProof { cht_number: 3, block_number: 100_000 };
        assert_matches!(
            request.to_message(ProtocolVersion::Lpv1, 1).unwrap().body,
            RequestBody::GetHeaderProofs(_)
        );
        assert_matches!(
            request.to_message(ProtocolVersion::Lpv2, 1).unwrap().body,
            RequestBody::GetHelperTrieProofs(ref items) if items[0].trie == HelperTrie::Cht
        );
    }

    #[test]
    fn lpv2_only_requests() {
        let request = OdrRequest::TxStatus { hashes: vec![B256::ZERO] };
        assert_eq!(
            request.to_message(ProtocolVersion::Lpv1, 1),
            Err(RequestError::UnsupportedCapability)
        );

        let request = OdrRequest::BloomBits { bit: 7, sections: vec![1, 2] };
        let message = request.to_message(ProtocolVersion::Lpv2, 1).unwrap();
        assert_matches!(
            message.body,
            RequestBody::GetHelperTrieProofs(ref items)
                if items.len() == 2 && items[0].key.len() == 10
        );

        let caps = PeerCapabilities::les_server(ProtocolVersion::Lpv1, HeadInfo::default());
        assert!(!request.is_servable_by(&caps));
    }

    #[test]
    fn response_shape() {
        let request = OdrRequest::Header { number: 1 };
        let header = Bytes::from_static(&[0xc0]);
        assert!(request.check_response(&ResponseBody::BlockHeaders(vec![header.clone()])).is_ok());
        assert_eq!(
            request.check_response(&ResponseBody::BlockHeaders(vec![])),
            Err(RequestError::Malformed)
        );
        assert_eq!(
            request.check_response(&ResponseBody::BlockBodies(vec![header.clone()])),
            Err(RequestError::Malformed)
        );
        assert_eq!(
            request.check_response(&ResponseBody::BlockHeaders(vec![header.clone(), header])),
            Err(RequestError::Malformed)
        );
    }
}
