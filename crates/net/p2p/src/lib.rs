//! Boundary types of the light client retrieval stack.
//!
//! This crate holds everything the retrieval core exchanges with its surroundings: the messages
//! sent to and received from a peer session, the typed on-demand requests callers submit, the
//! error taxonomy of a single request attempt and the persistence of dial candidates.
//!
//! ## Feature Flags
//!
//! - `test-utils`: Export utilities for testing

#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![cfg_attr(not(test), warn(unused_crate_dependencies))]

/// Error types of a single request attempt and of candidate persistence.
pub mod error;
pub use error::{RequestError, RequestResult, StoreError, ValidationError};

/// Messages exchanged with a peer.
pub mod message;
pub use message::{LesMessage, LesResponse, RequestBody, RequestId, ResponseBody};

/// Typed on-demand requests.
pub mod odr;
pub use odr::OdrRequest;

mod sender;
pub use sender::PeerRequestSender;

/// Persistence of dial candidates.
pub mod store;
pub use store::{CandidateRecord, CandidateStore, FileCandidateStore, MemoryCandidateStore};
