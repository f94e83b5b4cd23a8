//! On-demand retrieval of chain data from untrusted light protocol servers.
//!
//! A light client holds no state of its own. Every header, body, receipt, proof or contract code
//! it needs is requested from one of its connected peers, verified and handed to the caller. This
//! crate implements the machinery between the caller and the peer sessions:
//!
//! - [`PeerRegistry`]: the set of connected peers with their capabilities, flow control budget
//!   and round trip statistics.
//! - [`Distributor`]: a queue of pending requests that dispatches each one to the cheapest peer
//!   able to serve it, and retries with the next best peer on timeouts and bad responses.
//! - [`RetrievalManager`]: the caller facing entry point that turns an
//!   [`OdrRequest`](les_network_p2p::OdrRequest) into a validated response.
//! - [`PoolManager`]: the candidate pool that decides whom to dial, tracks reputation, backs off
//!   failing candidates and bans misbehaving ones.
//!
//! The only link from the request path back to the pool is the [`PeerFeedback`] the distributor
//! reports attempt outcomes to.
//!
//! ## Usage
//!
//! ```ignore
//! let registry = PeerRegistry::new();
//! let pool = PoolManager::new(config.peers, registry.clone(), FileCandidateStore::open(path)?);
//! let (distributor, handle) =
//!     Distributor::new(registry.clone(), Arc::new(pool.handle()), config.distributor);
//! tokio::spawn(distributor);
//!
//! let retrieval = RetrievalManager::new(handle, config.retrieval);
//! let header = retrieval.retrieve(OdrRequest::Header { number }, verify_header, None).await?;
//! ```
//!
//! ## Feature Flags
//!
//! - `test-utils`: Export scripted peers and an in-memory test network.

#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![cfg_attr(not(test), warn(unused_crate_dependencies))]

/// Common helpers for retrieval testing.
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub mod distributor;
pub mod error;
mod feedback;
pub mod flow;
pub mod pool;
pub mod registry;
mod retrieve;

pub use distributor::{
    Delivered, DistHandle, DistId, DistRequest, DistResult, Distributor, DistributorHandle,
    ResponseVerdict,
};
pub use error::{ConnectionRejected, DistributeError, RegistryError, RetrieveError};
pub use feedback::{AttemptOutcome, NoopFeedback, PeerFeedback};
pub use pool::{CandidateInfo, CandidateState, Direction, PoolAction, PoolHandle, PoolManager};
pub use registry::{PeerInfo, PeerRegistry};
pub use retrieve::{ResponseValidator, RetrievalManager};

pub use les_network_types as types;
