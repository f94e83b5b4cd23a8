//! Typed on-demand retrieval on top of request distribution.

use crate::{
    distributor::{DistRequest, DistributorHandle, ResponseVerdict},
    error::RetrieveError,
    registry::PeerInfo,
};
use les_network_p2p::{
    LesMessage, LesResponse, OdrRequest, RequestId, RequestResult, ResponseBody, ValidationError,
};
use les_network_types::{PeerId, RequestClass, RetrievalConfig};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// Checks a well formed response against what the caller knows to be true.
///
/// This is where proofs are verified against trusted roots. A response that fails validation is
/// evidence of misbehaviour and moves the serving peer towards a ban.
pub trait ResponseValidator: Send + Sync + 'static {
    /// Returns an error if the response does not answer the request correctly.
    fn validate(&self, request: &OdrRequest, response: &ResponseBody)
        -> Result<(), ValidationError>;
}

impl<F> ResponseValidator for F
where
    F: Fn(&OdrRequest, &ResponseBody) -> Result<(), ValidationError> + Send + Sync + 'static,
{
    fn validate(
        &self,
        request: &OdrRequest,
        response: &ResponseBody,
    ) -> Result<(), ValidationError> {
        self(request, response)
    }
}

/// The caller facing entry point: turns typed requests into validated responses.
///
/// Cloning is cheap and every clone submits to the same distributor. Independent retrievals run
/// concurrently, bounded only by the connected peers and the distributor's in-flight caps.
#[derive(Debug, Clone)]
pub struct RetrievalManager {
    distributor: DistributorHandle,
    config: RetrievalConfig,
}

impl RetrievalManager {
    /// Creates a manager submitting to the given distributor.
    pub const fn new(distributor: DistributorHandle, config: RetrievalConfig) -> Self {
        Self { distributor, config }
    }

    /// The configuration of this manager.
    pub const fn config(&self) -> &RetrievalConfig {
        &self.config
    }

    /// Retrieves `request` from the network.
    ///
    /// Resolves to the first response that is well formed and passes `validator`. Peers that
    /// time out or answer wrongly are penalized and the request moves on to the next best peer,
    /// until none is left or `deadline` (the configured default if `None`) elapses.
    ///
    /// Dropping the returned future cancels the retrieval.
    pub async fn retrieve(
        &self,
        request: OdrRequest,
        validator: impl ResponseValidator,
        deadline: Option<Duration>,
    ) -> Result<ResponseBody, RetrieveError> {
        let deadline = Instant::now() + deadline.unwrap_or(self.config.deadline);
        trace!(target: "net::retrieve", ?request, "retrieving");

        let dist = OdrDistRequest {
            request,
            validator,
            degraded_class_penalty_percent: self.config.degraded_class_penalty_percent,
        };
        match self.distributor.distribute(dist, deadline).await {
            Ok(delivered) => {
                debug!(target: "net::retrieve", peer_id=?delivered.peer_id, attempts=delivered.attempts, "retrieved");
                Ok(delivered.response.body)
            }
            Err(err) => {
                debug!(target: "net::retrieve", %err, "retrieval failed");
                Err(err.into())
            }
        }
    }

    /// Like [`Self::retrieve`], but resolves to [`RetrieveError::Canceled`] as soon as `token`
    /// is cancelled.
    ///
    /// Child tokens of one parent token cancel a whole group of retrievals at once, for example
    /// all lookups made on behalf of a reorged block.
    pub async fn retrieve_with_cancel(
        &self,
        request: OdrRequest,
        validator: impl ResponseValidator,
        deadline: Option<Duration>,
        token: &CancellationToken,
    ) -> Result<ResponseBody, RetrieveError> {
        tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!(target: "net::retrieve", "retrieval canceled");
                Err(RetrieveError::Canceled)
            }
            res = self.retrieve(request, validator, deadline) => res,
        }
    }
}

/// Adapts an [`OdrRequest`] and its validator to the distributor.
struct OdrDistRequest<V> {
    request: OdrRequest,
    validator: V,
    degraded_class_penalty_percent: u64,
}

impl<V: ResponseValidator> DistRequest for OdrDistRequest<V> {
    fn class(&self) -> RequestClass {
        self.request.class()
    }

    /// Flow cost scaled by the peer's responsiveness and by how often it recently failed this
    /// class of request.
    fn cost(&self, peer: &PeerInfo) -> Option<u64> {
        if !self.request.is_servable_by(&peer.capabilities) {
            return None
        }
        let rtt = (peer.rtt().as_millis() as u64).max(1);
        let degradation = peer.degradation(self.class()) as u64;
        let penalty = 100 + degradation.saturating_mul(self.degraded_class_penalty_percent);
        Some(self.flow_cost(peer).max(1).saturating_mul(rtt).saturating_mul(penalty) / 100)
    }

    fn flow_cost(&self, peer: &PeerInfo) -> u64 {
        peer.capabilities.request_cost(self.class(), self.request.items())
    }

    fn request_message(
        &mut self,
        peer: &PeerInfo,
        request_id: RequestId,
    ) -> RequestResult<LesMessage> {
        self.request.to_message(peer.capabilities.version, request_id)
    }

    fn on_response(&mut self, peer_id: PeerId, response: &LesResponse) -> ResponseVerdict {
        if let Err(err) = self.request.check_response(&response.body) {
            debug!(target: "net::retrieve", ?peer_id, %err, "malformed response");
            return ResponseVerdict::Malformed
        }
        match self.validator.validate(&self.request, &response.body) {
            Ok(()) => ResponseVerdict::Accept,
            Err(err) => {
                debug!(target: "net::retrieve", ?peer_id, %err, "response failed validation");
                ResponseVerdict::Invalid
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PeerRegistry;
    use alloy_primitives::{Address, Bytes, B256};
    use les_network_p2p::PeerRequestSender;
    use les_network_types::{
        HeadInfo, PeerCapabilities, ProtocolVersion, RequestCost, DEFAULT_REQUEST_COST,
    };
    use tokio::sync::mpsc;

    fn accept_all(_: &OdrRequest, _: &ResponseBody) -> Result<(), ValidationError> {
        Ok(())
    }

    type Validator = fn(&OdrRequest, &ResponseBody) -> Result<(), ValidationError>;

    fn dist(request: OdrRequest) -> OdrDistRequest<Validator> {
        OdrDistRequest { request, validator: accept_all, degraded_class_penalty_percent: 100 }
    }

    fn connected(registry: &PeerRegistry, caps: PeerCapabilities) -> PeerInfo {
        let (tx, _rx) = mpsc::channel(1);
        let sender = PeerRequestSender::new(PeerId::random(), tx);
        let id = sender.peer_id;
        registry.register(caps, sender).unwrap();
        registry.get(&id).unwrap()
    }

    fn head(number: u64) -> HeadInfo {
        HeadInfo { number, hash: B256::ZERO }
    }

    #[test]
    fn rejects_peers_that_cannot_serve() {
        let registry = PeerRegistry::new();
        let short =
            connected(&registry, PeerCapabilities::les_server(ProtocolVersion::Lpv2, head(50)));
        let full = connected(&registry, PeerCapabilities::eth_full(head(1_000)));

        assert_eq!(dist(OdrRequest::Header { number: 100 }).cost(&short), None);
        assert!(dist(OdrRequest::Header { number: 10 }).cost(&short).is_some());

        let proof = OdrRequest::AccountProof {
            block_hash: B256::ZERO,
            number: 10,
            state_root: B256::ZERO,
            address: Address::ZERO,
        };
        assert_eq!(dist(proof.clone()).cost(&full), None);
        assert!(dist(proof).cost(&short).is_some());

        let v1 =
            connected(&registry, PeerCapabilities::les_server(ProtocolVersion::Lpv1, head(50)));
        assert_eq!(dist(OdrRequest::TxStatus { hashes: vec![B256::ZERO] }).cost(&v1), None);
    }

    #[test]
    fn cost_follows_cost_table_and_degradation() {
        let registry = PeerRegistry::new();
        let caps = PeerCapabilities::les_server(ProtocolVersion::Lpv2, head(100))
            .with_cost(RequestClass::Headers, RequestCost { base: 10, per_item: 0 });
        let mut peer = connected(&registry, caps);
        let request = dist(OdrRequest::Header { number: 1 });

        let base = request.cost(&peer).unwrap();
        assert_eq!(base, 10 * crate::registry::UNKNOWN_RTT.as_millis() as u64);

        peer.degraded.insert(RequestClass::Headers, 1);
        assert_eq!(request.cost(&peer), Some(base * 2));
        // degradation is per class
        let body = dist(OdrRequest::BlockBody { hash: B256::ZERO, number: 1 });
        assert_eq!(
            body.cost(&peer),
            Some(DEFAULT_REQUEST_COST.cost(1) * crate::registry::UNKNOWN_RTT.as_millis() as u64)
        );
    }

    #[test]
    fn judges_responses() {
        let mut request = OdrDistRequest {
            request: OdrRequest::Header { number: 1 },
            validator: |_: &OdrRequest, body: &ResponseBody| {
                if body.items().iter().any(|item| item.is_empty()) {
                    return Err(ValidationError::new("empty header"))
                }
                Ok(())
            },
            degraded_class_penalty_percent: 100,
        };
        let peer = PeerId::random();

        let ok = LesResponse::new(1, ResponseBody::BlockHeaders(vec![Bytes::from_static(b"h")]));
        assert_eq!(request.on_response(peer, &ok), ResponseVerdict::Accept);

        let invalid = LesResponse::new(1, ResponseBody::BlockHeaders(vec![Bytes::new()]));
        assert_eq!(request.on_response(peer, &invalid), ResponseVerdict::Invalid);

        let wrong_kind =
            LesResponse::new(1, ResponseBody::Receipts(vec![Bytes::from_static(b"r")]));
        assert_eq!(request.on_response(peer, &wrong_kind), ResponseVerdict::Malformed);

        let empty = LesResponse::new(1, ResponseBody::BlockHeaders(vec![]));
        assert_eq!(request.on_response(peer, &empty), ResponseVerdict::Malformed);
    }
}
