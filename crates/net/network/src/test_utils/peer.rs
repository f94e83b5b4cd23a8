//! Scripted peers that answer requests over an in-memory session.

use crate::distributor::DistributorHandle;
use alloy_primitives::{Bytes, B256};
use les_network_p2p::{
    LesMessage, LesResponse, OdrRequest, PeerRequestSender, RequestBody, ResponseBody,
    ValidationError,
};
use les_network_types::{HeadInfo, PeerCapabilities, PeerId, ProtocolVersion};
use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::sync::mpsc;
use tracing::trace;

/// The item an [`Behaviour::Invalid`] peer answers with.
pub const INVALID_PAYLOAD: Bytes = Bytes::from_static(b"invalid");

/// How a [`TestPeer`] answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behaviour {
    /// Answers every request correctly.
    Honest,
    /// Never answers.
    Silent,
    /// Answers with well formed data that fails validation.
    Invalid,
    /// Answers with a response of the wrong kind.
    Malformed,
}

/// A peer whose answers are scripted by its [`Behaviour`].
#[derive(Debug, Clone)]
pub struct TestPeer {
    id: PeerId,
    behaviour: Behaviour,
    latency: Duration,
    capabilities: PeerCapabilities,
    requests: Arc<AtomicUsize>,
}

impl TestPeer {
    /// A light protocol server on head 1000 with a random id.
    pub fn new(behaviour: Behaviour) -> Self {
        Self {
            id: PeerId::random(),
            behaviour,
            latency: Duration::ZERO,
            capabilities: PeerCapabilities::les_server(
                ProtocolVersion::Lpv2,
                HeadInfo { number: 1_000, hash: B256::ZERO },
            ),
            requests: Default::default(),
        }
    }

    /// Delays every answer by `latency`.
    pub const fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Sets the capabilities the peer announces.
    pub fn with_capabilities(mut self, capabilities: PeerCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// The peer's id.
    pub const fn id(&self) -> PeerId {
        self.id
    }

    /// The capabilities the peer announces.
    pub const fn capabilities(&self) -> &PeerCapabilities {
        &self.capabilities
    }

    /// Number of requests the peer received so far.
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }

    /// Opens a session: returns the sender to register and spawns the task that answers on it.
    ///
    /// Answers are delivered to `distributor`. The task ends once the sender is dropped.
    pub fn spawn_session(&self, distributor: DistributorHandle) -> PeerRequestSender {
        let (tx, mut rx) = mpsc::channel::<LesMessage>(32);
        let peer = self.clone();
        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                peer.requests.fetch_add(1, Ordering::SeqCst);
                trace!(target: "net::test", peer_id=?peer.id, request_id=msg.request_id, "received request");
                let Some(body) = answer(&msg.body, peer.behaviour) else { continue };
                let response = LesResponse::new(msg.request_id, body);
                let (peer_id, latency, distributor) = (peer.id, peer.latency, distributor.clone());
                tokio::spawn(async move {
                    tokio::time::sleep(latency).await;
                    distributor.deliver(peer_id, response);
                });
            }
        });
        PeerRequestSender::new(self.id, tx)
    }
}

/// The response a peer with `behaviour` sends for `request`, if any.
pub fn answer(request: &RequestBody, behaviour: Behaviour) -> Option<ResponseBody> {
    let item = match behaviour {
        Behaviour::Silent => return None,
        Behaviour::Malformed => {
            let wrong = vec![Bytes::from_static(b"wrong")];
            return Some(match request {
                RequestBody::GetTxStatus(_) => ResponseBody::Code(wrong),
                _ => ResponseBody::TxStatus(wrong),
            })
        }
        Behaviour::Invalid => INVALID_PAYLOAD,
        Behaviour::Honest => Bytes::from_static(b"valid"),
    };
    let items = |n: usize| vec![item.clone(); n.max(1)];
    Some(match request {
        RequestBody::GetBlockHeaders { limit, .. } => {
            ResponseBody::BlockHeaders(items(*limit as usize))
        }
        RequestBody::GetBlockBodies(hashes) => ResponseBody::BlockBodies(items(hashes.len())),
        RequestBody::GetReceipts(hashes) => ResponseBody::Receipts(items(hashes.len())),
        RequestBody::GetProofsV1(_) | RequestBody::GetProofsV2(_) => ResponseBody::Proofs(items(1)),
        RequestBody::GetCode(codes) => ResponseBody::Code(items(codes.len())),
        RequestBody::GetHeaderProofs(_) | RequestBody::GetHelperTrieProofs(_) => {
            ResponseBody::HelperTrieProofs(items(1))
        }
        RequestBody::GetTxStatus(hashes) => ResponseBody::TxStatus(items(hashes.len())),
    })
}

/// Rejects responses carrying [`INVALID_PAYLOAD`].
pub fn reject_invalid_payload(
    _request: &OdrRequest,
    response: &ResponseBody,
) -> Result<(), ValidationError> {
    if response.items().contains(&INVALID_PAYLOAD) {
        return Err(ValidationError::new("invalid payload"))
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn answers_match_behaviour() {
        let request = OdrRequest::Header { number: 7 };
        let msg = request.to_message(ProtocolVersion::Lpv2, 1).unwrap();

        let honest = answer(&msg.body, Behaviour::Honest).unwrap();
        assert!(request.check_response(&honest).is_ok());
        assert!(reject_invalid_payload(&request, &honest).is_ok());

        let invalid = answer(&msg.body, Behaviour::Invalid).unwrap();
        assert!(request.check_response(&invalid).is_ok());
        assert!(reject_invalid_payload(&request, &invalid).is_err());

        let malformed = answer(&msg.body, Behaviour::Malformed).unwrap();
        assert!(request.check_response(&malformed).is_err());

        assert_eq!(answer(&msg.body, Behaviour::Silent), None);
    }
}
