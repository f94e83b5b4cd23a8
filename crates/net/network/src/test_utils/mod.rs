//! Common helpers for retrieval testing.

mod peer;
mod testnet;

pub use peer::{answer, reject_invalid_payload, Behaviour, TestPeer, INVALID_PAYLOAD};
pub use testnet::Testnet;
