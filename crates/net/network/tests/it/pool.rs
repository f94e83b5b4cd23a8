//! Candidate pool driven by retrieval outcomes.

use crate::retrieval::server;
use les_network::{
    test_utils::{reject_invalid_payload, Behaviour, TestPeer, Testnet},
    CandidateState, ConnectionRejected, PoolAction,
};
use les_network_p2p::OdrRequest;
use les_network_types::{
    DistributorConfig, NodeRecord, PoolConfig, RetrievalConfig, DEFAULT_REPUTATION,
    MAX_TRUSTED_PEER_REPUTATION_CHANGE,
};
use std::{collections::HashSet, net::SocketAddr, time::Duration};

const DEADLINE: Option<Duration> = Some(Duration::from_secs(5));

#[tokio::test]
async fn test_session_close_is_penalized_and_persisted() {
    let net = Testnet::spawn();
    let peer = TestPeer::new(Behaviour::Honest);
    net.connect(&peer).await.unwrap();
    assert!(net.registry().contains(&peer.id()));

    net.disconnect(peer.id());
    let info = net
        .wait_for_candidate(peer.id(), |info| info.state == CandidateState::Discovered)
        .await
        .unwrap();
    assert!(!net.registry().contains(&peer.id()));
    assert!(info.reputation < DEFAULT_REPUTATION);
    assert!(info.last_seen.is_some());

    let record = net.store().get(&peer.id()).unwrap();
    assert_eq!(record.reputation, info.reputation);

    // it may come back
    net.connect(&peer).await.unwrap();
}

#[tokio::test]
async fn test_duplicate_session_rejected() {
    let net = Testnet::spawn();
    let peer = TestPeer::new(Behaviour::Honest);
    net.connect(&peer).await.unwrap();
    assert_eq!(net.connect(&peer).await, Err(ConnectionRejected::AlreadyConnected));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_trusted_liar_is_never_banned() {
    let liar = TestPeer::new(Behaviour::Invalid).with_capabilities(server(1));
    let honest = TestPeer::new(Behaviour::Honest)
        .with_capabilities(server(1_000))
        .with_latency(Duration::from_millis(20));
    let trusted = NodeRecord::new(SocketAddr::from(([127, 0, 0, 1], 30303)), liar.id());
    let config = PoolConfig::test()
        .with_target_peers(0)
        .with_trusted_nodes(HashSet::from([trusted]));
    let net = Testnet::spawn_with(config, DistributorConfig::test(), RetrievalConfig::test());
    net.connect(&liar).await.unwrap();
    net.connect(&honest).await.unwrap();

    for number in 1..=5 {
        net.retrieval()
            .retrieve(OdrRequest::Header { number }, reject_invalid_payload, DEADLINE)
            .await
            .unwrap();
    }
    assert_eq!(liar.requests(), 5);

    let info = net
        .wait_for_candidate(liar.id(), |info| {
            info.reputation < 4 * MAX_TRUSTED_PEER_REPUTATION_CHANGE
        })
        .await
        .unwrap();
    assert!(info.state.is_connected());
    assert!(net.registry().contains(&liar.id()));
}

#[tokio::test]
async fn test_pool_does_not_dial_without_slots() {
    let net = Testnet::spawn();
    let peer = TestPeer::new(Behaviour::Honest);
    net.connect(&peer).await.unwrap();
    net.disconnect(peer.id());
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(net.actions().iter().all(|action| !matches!(action, PoolAction::Dial { .. })));
}
