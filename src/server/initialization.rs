// src/server/initialization.rs

//! Startup sequence: load configuration, build the `Runtime`, seed the
//! registry from the static node list, bind the listen addresses, and
//! spawn the accept loop plus the multicast discovery task. Grounded on
//! the teacher's `server/initialization.rs` bootstrap ordering.

use crate::config::{Config, Transport};
use crate::connection::handler;
use crate::core::cluster::gossip;
use crate::core::fsm::PeerSignal;
use crate::core::registry::{Location, Node};
use crate::core::runtime::Runtime;
use crate::server::context::ServerContext;
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

pub async fn run(config_path: &str) -> Result<()> {
    let config = Config::load(config_path)
        .with_context(|| format!("loading configuration from {config_path}"))?;
    let runtime = Arc::new(Runtime::new(config));

    seed_registry(&runtime);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let ctx = ServerContext::new(runtime.clone(), shutdown_rx);

    let tcp_addr = listen_addr(&runtime, Transport::Tcp, crate::core::constants::TCP_LISTEN_PORT);
    let listener = TcpListener::bind(tcp_addr)
        .await
        .with_context(|| format!("binding TCP listener on {tcp_addr}"))?;
    info!(addr = %tcp_addr, "listening for client connections");

    let mcast_addr = listen_addr(
        &runtime,
        Transport::Multicast,
        crate::core::constants::MCAST_COMM_PORT,
    );
    if let Ok(socket) = UdpSocket::bind(("0.0.0.0", mcast_addr.port())).await {
        let socket = Arc::new(socket);
        let runtime_mcast = runtime.clone();
        let send_socket = socket.clone();
        tokio::spawn(async move {
            run_multicast_tick(runtime_mcast, send_socket, mcast_addr).await;
        });
        let runtime_listen = runtime.clone();
        tokio::spawn(async move {
            run_multicast_listen(runtime_listen, socket).await;
        });
    } else {
        warn!(addr = %mcast_addr, "could not bind multicast discovery socket");
    }

    tokio::spawn(accept_loop(ctx.clone(), listener));

    tokio::signal::ctrl_c().await.ok();
    let _ = shutdown_tx.send(true);
    info!("shutdown signal received");
    Ok(())
}

fn seed_registry(runtime: &Arc<Runtime>) {
    runtime
        .registry
        .add_location(Location::new(runtime.self_hw_id(), runtime.config.node_heartbeat.period_ms));

    for seed in &runtime.config.nodes {
        let mut node = Node::new(seed.index, seed.group, seed.role, runtime.self_hw_id(), true);
        node.name = seed.name.clone();
        node.keepalive_period_ms = runtime.config.node_heartbeat.period_ms;
        if let Err(err) = runtime.registry.add_node(node) {
            error!(%err, node = seed.index, "failed to seed static node from config");
        }
    }
    for sub in &runtime.config.subscriptions {
        // Startup-time subscriptions have no transport to deliver to yet;
        // the pending/active placement happens the same as any other
        // subscribe call, just without a live sink attached.
        let (_tx, _rx) = tokio::sync::mpsc::channel(1);
        runtime.registry.subscribe(sub.kind, sub.value, 0, _tx);
    }
}

fn listen_addr(runtime: &Runtime, transport: Transport, default_port: u16) -> SocketAddr {
    runtime
        .config
        .instance
        .addresses
        .iter()
        .find(|a| a.transport == transport)
        .map(|a| a.addr)
        .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], default_port)))
}

async fn accept_loop(ctx: ServerContext, listener: TcpListener) {
    let mut shutdown = ctx.shutdown.clone();
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((socket, peer_addr)) => {
                        let runtime = ctx.runtime.clone();
                        tokio::spawn(async move {
                            handler::run(runtime, socket, peer_addr).await;
                        });
                    }
                    Err(err) => {
                        warn!(%err, "accept() failed, continuing");
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}

async fn run_multicast_tick(runtime: Arc<Runtime>, socket: Arc<UdpSocket>, mcast_addr: SocketAddr) {
    let mut interval = tokio::time::interval(std::time::Duration::from_millis(
        runtime.config.cluster_heartbeat.period_ms,
    ));
    loop {
        interval.tick().await;
        let now = runtime.now_ms();
        if let Err(err) =
            gossip::multicast_tick(&socket, mcast_addr, runtime.self_hw_id(), now).await
        {
            warn!(%err, "multicast keepalive send failed");
        }
    }
}

/// Multicast discovery receive side (§6.3): a KEEPALIVE (or any peer
/// message) from an unknown `hw_id` spins up a `PeerSession` and feeds it
/// CONNECT; every further datagram from that `hw_id` is then handed to the
/// session's normal inbound handling. Sessions are tracked locally to this
/// task since it is the sole reader of the shared socket.
async fn run_multicast_listen(runtime: Arc<Runtime>, socket: Arc<UdpSocket>) {
    use crate::core::protocol::PeerCodec;
    use bytes::BytesMut;
    use tokio_util::codec::Decoder;

    let mut sessions: HashMap<u32, gossip::PeerSession> = HashMap::new();
    let mut buf = vec![0u8; 2048];
    loop {
        let (n, _from) = match socket.recv_from(&mut buf).await {
            Ok(pair) => pair,
            Err(err) => {
                warn!(%err, "multicast recv failed");
                continue;
            }
        };
        let mut frame = BytesMut::from(&buf[..n]);
        let mut codec = PeerCodec;
        let msg = match codec.decode(&mut frame) {
            Ok(Some(msg)) => msg,
            Ok(None) => continue,
            Err(err) => {
                warn!(%err, "malformed peer datagram, dropped");
                continue;
            }
        };

        let hw_id = gossip::hw_id_of(&msg);
        if hw_id == runtime.self_hw_id() {
            continue;
        }
        let now = runtime.now_ms();

        if let std::collections::hash_map::Entry::Vacant(entry) = sessions.entry(hw_id) {
            let (tx, rx) = mpsc::channel(64);
            tokio::spawn(drain_peer_outbound(hw_id, rx));
            let mut session = runtime.new_peer_session(hw_id, tx);
            session.feed(PeerSignal::Connect, now).await;
            info!(hw_id, "peer discovered via multicast");
            entry.insert(session);
        }
        if let Some(session) = sessions.get_mut(&hw_id) {
            session.handle_inbound(msg, now).await;
        }
    }
}

/// No peer TCP transport is wired up yet, so outbound gossip destined for a
/// freshly discovered peer has nowhere real to go; drain the channel so
/// senders never block on it, logging what would have gone out.
async fn drain_peer_outbound(
    hw_id: u32,
    mut rx: mpsc::Receiver<crate::core::protocol::PeerMessage>,
) {
    while let Some(msg) = rx.recv().await {
        debug!(hw_id, ?msg, "outbound peer message has no transport, dropped");
    }
}
