//! End to end retrieval through registry, distributor and pool.

use assert_matches::assert_matches;
use les_network::{
    test_utils::{reject_invalid_payload, Behaviour, TestPeer, Testnet},
    CandidateState, DistributeError, RetrieveError,
};
use les_network_p2p::{OdrRequest, ResponseBody, ValidationError};
use les_network_types::{
    HeadInfo, PeerCapabilities, ProtocolVersion, RequestClass, RequestCost, DEFAULT_REPUTATION,
};
use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};
use tokio_util::sync::CancellationToken;

/// A server on head 1000 charging `base` per header request.
pub(crate) fn server(base: u64) -> PeerCapabilities {
    let head = HeadInfo { number: 1_000, ..Default::default() };
    PeerCapabilities::les_server(ProtocolVersion::Lpv2, head)
        .with_cost(RequestClass::Headers, RequestCost { base, per_item: 0 })
}

fn header(number: u64) -> OdrRequest {
    OdrRequest::Header { number }
}

const DEADLINE: Option<Duration> = Some(Duration::from_secs(5));

#[tokio::test(flavor = "multi_thread")]
async fn test_skips_silent_and_invalid_peers() {
    les_tracing::init_test_tracing();
    let net = Testnet::spawn();

    // cost order: silent, invalid, honest
    let silent = TestPeer::new(Behaviour::Silent).with_capabilities(server(1));
    let invalid = TestPeer::new(Behaviour::Invalid).with_capabilities(server(10));
    let honest = TestPeer::new(Behaviour::Honest).with_capabilities(server(100));
    for peer in [&silent, &invalid, &honest] {
        net.connect(peer).await.unwrap();
    }

    let start = Instant::now();
    let body =
        net.retrieval().retrieve(header(100), reject_invalid_payload, DEADLINE).await.unwrap();
    assert_matches!(body, ResponseBody::BlockHeaders(ref headers) if headers.len() == 1);
    // one request timeout plus two round trips
    assert!(start.elapsed() < Duration::from_secs(2));

    assert_eq!(silent.requests(), 1);
    assert_eq!(invalid.requests(), 1);
    assert_eq!(honest.requests(), 1);

    // penalties apply although the retrieval succeeded
    let reputation = |peer: TestPeer| {
        let net = &net;
        async move {
            net.wait_for_candidate(peer.id(), |info| info.reputation != DEFAULT_REPUTATION)
                .await
                .unwrap()
                .reputation
        }
    };
    let silent = reputation(silent).await;
    let invalid = reputation(invalid).await;
    let honest = reputation(honest).await;
    assert!(invalid < silent);
    assert!(silent < DEFAULT_REPUTATION);
    assert!(honest > DEFAULT_REPUTATION);
}

#[tokio::test]
async fn test_no_peers_fails_fast() {
    let net = Testnet::spawn();

    let start = Instant::now();
    let err =
        net.retrieval().retrieve(header(1), reject_invalid_payload, DEADLINE).await.unwrap_err();
    assert!(err.is_no_eligible_peer());
    assert!(start.elapsed() < Duration::from_secs(1));
}

#[tokio::test]
async fn test_peer_behind_is_never_asked() {
    let net = Testnet::spawn();
    let caps = PeerCapabilities::les_server(
        ProtocolVersion::Lpv2,
        HeadInfo { number: 50, ..Default::default() },
    );
    let peer = TestPeer::new(Behaviour::Honest).with_capabilities(caps);
    net.connect(&peer).await.unwrap();

    let err =
        net.retrieval().retrieve(header(100), reject_invalid_payload, DEADLINE).await.unwrap_err();
    assert_eq!(
        err,
        RetrieveError::Exhausted { attempts: 0, reason: DistributeError::NoEligiblePeer }
    );
    assert_eq!(peer.requests(), 0);

    // within its history it serves
    net.retrieval().retrieve(header(50), reject_invalid_payload, DEADLINE).await.unwrap();
    assert_eq!(peer.requests(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_late_response_after_cancel_is_discarded() {
    let net = Testnet::spawn();
    let peer = TestPeer::new(Behaviour::Honest).with_latency(Duration::from_millis(200));
    net.connect(&peer).await.unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    let validator = {
        let calls = calls.clone();
        move |_: &OdrRequest, _: &ResponseBody| -> Result<(), ValidationError> {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    };

    let token = CancellationToken::new();
    let cancel = {
        let token = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            token.cancel();
        })
    };
    let res = net.retrieval().retrieve_with_cancel(header(1), validator, DEADLINE, &token).await;
    assert_eq!(res, Err(RetrieveError::Canceled));
    cancel.await.unwrap();
    assert_eq!(peer.requests(), 1);

    // the answer arrives after the cancellation
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    // the peer was not blamed for answering late
    let info = net.pool().candidate(peer.id()).await.unwrap();
    assert_eq!(info.reputation, DEFAULT_REPUTATION);
}

#[tokio::test]
async fn test_cancel_after_completion_is_noop() {
    let net = Testnet::spawn();
    let peer = TestPeer::new(Behaviour::Honest);
    net.connect(&peer).await.unwrap();

    let token = CancellationToken::new();
    net.retrieval()
        .retrieve_with_cancel(header(1), reject_invalid_payload, DEADLINE, &token)
        .await
        .unwrap();
    token.cancel();

    // the manager is unaffected
    net.retrieval().retrieve(header(2), reject_invalid_payload, DEADLINE).await.unwrap();
    assert_eq!(peer.requests(), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_repeated_validation_failures_ban_peer() {
    let net = Testnet::spawn();
    // the liar stays the cheapest peer while it degrades
    let liar = TestPeer::new(Behaviour::Invalid).with_capabilities(server(1));
    let honest = TestPeer::new(Behaviour::Honest)
        .with_capabilities(server(1_000))
        .with_latency(Duration::from_millis(20));
    net.connect(&liar).await.unwrap();
    net.connect(&honest).await.unwrap();

    for number in 1..=3 {
        net.retrieval().retrieve(header(number), reject_invalid_payload, DEADLINE).await.unwrap();
        assert_eq!(liar.requests(), number as usize);
    }

    let info = net
        .wait_for_candidate(liar.id(), |info| info.state == CandidateState::Banned)
        .await
        .unwrap();
    assert!(info.reputation < DEFAULT_REPUTATION);
    assert!(!net.registry().contains(&liar.id()));

    for number in 4..=6 {
        net.retrieval().retrieve(header(number), reject_invalid_payload, DEADLINE).await.unwrap();
    }
    assert_eq!(liar.requests(), 3);
    assert_eq!(honest.requests(), 6);

    // and it can't come back
    assert!(net.connect(&liar).await.is_err());
}

#[tokio::test]
async fn test_every_peer_is_tried_once() {
    let net = Testnet::spawn();
    let peers = [
        TestPeer::new(Behaviour::Invalid),
        TestPeer::new(Behaviour::Malformed),
        TestPeer::new(Behaviour::Invalid),
    ];
    for peer in &peers {
        net.connect(peer).await.unwrap();
    }

    let err =
        net.retrieval().retrieve(header(1), reject_invalid_payload, DEADLINE).await.unwrap_err();
    assert_eq!(
        err,
        RetrieveError::Exhausted {
            attempts: 3,
            reason: DistributeError::PeersExhausted { attempts: 3 }
        }
    );
    for peer in &peers {
        assert_eq!(peer.requests(), 1);
    }
}

#[tokio::test]
async fn test_silent_peers_exhaust_before_deadline() {
    let net = Testnet::spawn();
    let peers = [TestPeer::new(Behaviour::Silent), TestPeer::new(Behaviour::Silent)];
    for peer in &peers {
        net.connect(peer).await.unwrap();
    }

    // two request timeouts
    let start = Instant::now();
    let err =
        net.retrieval().retrieve(header(1), reject_invalid_payload, DEADLINE).await.unwrap_err();
    assert_matches!(err, RetrieveError::Exhausted { attempts: 2, .. });
    assert!(start.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn test_deadline_bounds_retrieval() {
    let net = Testnet::spawn();
    let peers = [TestPeer::new(Behaviour::Silent), TestPeer::new(Behaviour::Silent)];
    for peer in &peers {
        net.connect(peer).await.unwrap();
    }

    let start = Instant::now();
    let deadline = Some(Duration::from_millis(150));
    let err =
        net.retrieval().retrieve(header(1), reject_invalid_payload, deadline).await.unwrap_err();
    assert_eq!(
        err,
        RetrieveError::Exhausted {
            attempts: 1,
            reason: DistributeError::DeadlineElapsed { attempts: 1 }
        }
    );
    assert!(start.elapsed() < Duration::from_secs(1));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_concurrent_retrievals() {
    let net = Testnet::spawn();
    let peers = [
        TestPeer::new(Behaviour::Honest).with_latency(Duration::from_millis(20)),
        TestPeer::new(Behaviour::Honest).with_latency(Duration::from_millis(20)),
    ];
    for peer in &peers {
        net.connect(peer).await.unwrap();
    }

    let retrievals = (1..=8).map(|number| {
        let retrieval = net.retrieval().clone();
        async move { retrieval.retrieve(header(number), reject_invalid_payload, DEADLINE).await }
    });
    let results = futures::future::join_all(retrievals).await;
    assert!(results.iter().all(Result::is_ok));
    assert_eq!(peers.iter().map(TestPeer::requests).sum::<usize>(), 8);
}
