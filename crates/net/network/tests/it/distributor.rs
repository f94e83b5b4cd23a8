//! Raw request distribution, without retrieval semantics.

use assert_matches::assert_matches;
use les_network::{
    test_utils::{reject_invalid_payload, Behaviour, TestPeer, Testnet},
    DistRequest, DistributeError, PeerInfo, ResponseVerdict,
};
use les_network_p2p::{
    message::BlockHashOrNumber, LesMessage, LesResponse, OdrRequest, RequestBody, RequestId,
    RequestResult, ResponseBody,
};
use les_network_types::{PeerId, RequestClass};
use std::time::{Duration, Instant};

/// Asks for a header range and accepts any non empty header response.
struct HeaderRange {
    start: u64,
    limit: u64,
}

impl DistRequest for HeaderRange {
    fn class(&self) -> RequestClass {
        RequestClass::Headers
    }

    fn cost(&self, peer: &PeerInfo) -> Option<u64> {
        let last = self.start + self.limit - 1;
        (peer.capabilities.head.number >= last).then(|| peer.rtt().as_millis() as u64)
    }

    fn flow_cost(&self, peer: &PeerInfo) -> u64 {
        peer.capabilities.request_cost(RequestClass::Headers, self.limit)
    }

    fn request_message(
        &mut self,
        _peer: &PeerInfo,
        request_id: RequestId,
    ) -> RequestResult<LesMessage> {
        let body = RequestBody::GetBlockHeaders {
            start: BlockHashOrNumber::Number(self.start),
            limit: self.limit,
            skip: 0,
            reverse: false,
        };
        Ok(LesMessage { request_id, body })
    }

    fn on_response(&mut self, _peer_id: PeerId, response: &LesResponse) -> ResponseVerdict {
        match &response.body {
            ResponseBody::BlockHeaders(headers) if !headers.is_empty() => ResponseVerdict::Accept,
            _ => ResponseVerdict::Malformed,
        }
    }
}

fn deadline() -> Instant {
    Instant::now() + Duration::from_secs(5)
}

#[tokio::test]
async fn test_distribute_raw_request() {
    let net = Testnet::spawn();
    let peer = TestPeer::new(Behaviour::Honest);
    net.connect(&peer).await.unwrap();

    let delivered =
        net.distributor()
            .distribute(HeaderRange { start: 10, limit: 4 }, deadline())
            .await
            .unwrap();
    assert_eq!(delivered.peer_id, peer.id());
    assert_eq!(delivered.attempts, 1);
    assert_matches!(
        delivered.response.body,
        ResponseBody::BlockHeaders(ref headers) if headers.len() == 4
    );

    // beyond the peer's head
    let err = net
        .distributor()
        .distribute(HeaderRange { start: 999, limit: 4 }, deadline())
        .await
        .unwrap_err();
    assert_eq!(err, DistributeError::NoEligiblePeer);
}

#[tokio::test]
async fn test_cancel_pending_distribution() {
    let net = Testnet::spawn();
    let peer = TestPeer::new(Behaviour::Honest).with_latency(Duration::from_millis(100));
    net.connect(&peer).await.unwrap();

    let handle = net.distributor().distribute(HeaderRange { start: 1, limit: 1 }, deadline());
    tokio::time::sleep(Duration::from_millis(20)).await;
    handle.cancel();
    tokio::time::sleep(Duration::from_millis(150)).await;

    // the peer got the request and is free again
    assert_eq!(peer.requests(), 1);
    let info = net.registry().get(&peer.id()).unwrap();
    assert_eq!(info.inflight, 0);
    assert_eq!(info.avg_rtt, None);
}

#[tokio::test]
async fn test_one_attempt_in_flight() {
    let net = Testnet::spawn();
    let peers = [TestPeer::new(Behaviour::Silent), TestPeer::new(Behaviour::Silent)];
    for peer in &peers {
        net.connect(peer).await.unwrap();
    }
    let retrieval = net.retrieval().clone();
    let task = tokio::spawn(async move {
        retrieval
            .retrieve(OdrRequest::Header { number: 1 }, reject_invalid_payload, None)
            .await
    });

    // the second peer is only asked once the first timed out
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(peers.iter().map(TestPeer::requests).sum::<usize>(), 1);
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(peers.iter().map(TestPeer::requests).sum::<usize>(), 2);

    assert!(task.await.unwrap().is_err());
}

#[tokio::test]
async fn test_distributor_waits_for_busy_peers() {
    let net = Testnet::spawn();
    let peer = TestPeer::new(Behaviour::Honest).with_latency(Duration::from_millis(30));
    net.connect(&peer).await.unwrap();

    // more requests than the peer takes at once
    let handles = (0..10)
        .map(|start| net.distributor().distribute(HeaderRange { start, limit: 1 }, deadline()))
        .collect::<Vec<_>>();
    for delivered in futures::future::join_all(handles).await {
        assert_eq!(delivered.unwrap().peer_id, peer.id());
    }
    assert_eq!(peer.requests(), 10);
}
