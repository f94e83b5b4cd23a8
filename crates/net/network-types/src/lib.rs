//! Commonly used networking types for the light client retrieval stack.
//!
//! ## Feature Flags
//!
//! - `serde`: Enable serde support for the configuration types.
//! - `test-utils`: Export configuration presets with short durations for tests.

#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![cfg_attr(not(test), warn(unused_crate_dependencies))]

/// Types related to peering.
pub mod peers;
pub use peers::{
    config::{ConnectionsConfig, PeerBackoffDurations, PoolConfig},
    reputation::{
        is_banned_reputation, Reputation, ReputationChange, ReputationChangeKind,
        ReputationChangeOutcome, ReputationChangeWeights, BANNED_REPUTATION, DEFAULT_REPUTATION,
        MAX_TRUSTED_PEER_REPUTATION_CHANGE,
    },
    CandidateTier, NodeRecord, PeerId,
};

pub mod backoff;
pub use backoff::BackoffKind;

pub mod capability;
pub use capability::{
    FlowParams, HeadInfo, PeerCapabilities, PeerKind, ProtocolVersion, RequestClass, RequestCost,
    DEFAULT_REQUEST_COST,
};

pub mod request;
pub use request::{DistributorConfig, RetrievalConfig};
