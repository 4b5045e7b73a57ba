// src/connection/handler.rs

//! Per-client-connection task: owns one Node FSM instance, translating
//! wire messages (§6.1) into FSM signals and FSM actions into registry
//! mutations. Grounded on the teacher's per-connection handler loop: a
//! `Framed` read/write split driven by `tokio::select!` against the
//! socket and a keepalive interval.

use crate::connection::guard::ConnectionGuard;
use crate::core::cluster::ha;
use crate::core::constants;
use crate::core::fsm::{node_fsm, NodeAction, NodeSignal, NodeState};
use crate::core::notify::NotifySink;
use crate::core::protocol::{ClientCodec, ClientMessage, HaRole};
use crate::core::registry::{Node, Process, Role};
use crate::core::runtime::Runtime;
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::{debug, error, info, warn};

pub async fn run(runtime: Arc<Runtime>, socket: TcpStream, peer_addr: std::net::SocketAddr) {
    let mut framed = Framed::new(socket, ClientCodec);
    let mut guard = ConnectionGuard::new(runtime.registry.clone());
    let mut state = NodeState::Null;
    let mut node_index: Option<u32> = None;
    let mut sink: Option<NotifySink> = None;
    let mut keepalive_ms = constants::DEFAULT_NODE_TICK_MS;

    state = match node_fsm::transition(state, NodeSignal::Create) {
        Ok((next, _arm_timer)) => next,
        Err(err) => {
            error!(%err, %peer_addr, "node FSM rejected CREATE, closing");
            return;
        }
    };

    let mut ticker = tokio::time::interval(Duration::from_millis(keepalive_ms));

    loop {
        tokio::select! {
            frame = framed.next() => {
                match frame {
                    Some(Ok(msg)) => {
                        if !handle_message(
                            &runtime,
                            &mut framed,
                            &mut guard,
                            &mut state,
                            &mut node_index,
                            &mut sink,
                            &mut keepalive_ms,
                            &mut ticker,
                            msg,
                        ).await {
                            break;
                        }
                    }
                    Some(Err(err)) => {
                        warn!(%err, %peer_addr, "protocol violation, closing connection");
                        feed(&mut state, NodeSignal::Close, node_index, &runtime);
                        break;
                    }
                    None => {
                        debug!(%peer_addr, "connection closed by peer");
                        feed(&mut state, NodeSignal::Term, node_index, &runtime);
                        break;
                    }
                }
            }
            _ = ticker.tick() => {
                let (next, action) = match node_fsm::transition(state, NodeSignal::TimerPop) {
                    Ok(pair) => pair,
                    Err(err) => { warn!(%err, "illegal TimerPop, dropped"); continue; }
                };
                state = next;
                if matches!(action, NodeAction::IncrementMissed) {
                    if let Some(index) = node_index {
                        let missed = {
                            let mut n = runtime.registry.nodes.get_mut(&index);
                            n.as_deref_mut().map(|n| { n.keepalive_missed += 1; n.keepalive_missed })
                        };
                        if let Some(missed) = missed {
                            if missed >= runtime.config.node_heartbeat.threshold {
                                let (next, action) = match node_fsm::transition(state, NodeSignal::Timeout) {
                                    Ok(pair) => pair,
                                    Err(_) => continue,
                                };
                                state = next;
                                if matches!(action, NodeAction::Teardown) {
                                    break;
                                }
                            }
                        }
                    }
                }
            }
        }
    }

    let _ = guard; // dropped here, tearing down the Node row if one was bound
}

fn feed(state: &mut NodeState, signal: NodeSignal, node_index: Option<u32>, _runtime: &Runtime) {
    match node_fsm::transition(*state, signal) {
        Ok((next, _action)) => *state = next,
        Err(err) => warn!(%err, ?node_index, "illegal node signal, dropped"),
    }
}

#[allow(clippy::too_many_arguments)]
async fn handle_message(
    runtime: &Arc<Runtime>,
    framed: &mut Framed<TcpStream, ClientCodec>,
    guard: &mut ConnectionGuard,
    state: &mut NodeState,
    node_index: &mut Option<u32>,
    sink: &mut Option<NotifySink>,
    keepalive_ms: &mut u64,
    ticker: &mut tokio::time::Interval,
    msg: ClientMessage,
) -> bool {
    match msg {
        ClientMessage::Init {
            msg_id,
            index,
            group,
            keepalive_period_ms,
        } => {
            let (next, action) = match node_fsm::transition(*state, NodeSignal::Init) {
                Ok(pair) => pair,
                Err(err) => {
                    warn!(%err, "duplicate or out-of-order INIT, closing");
                    return false;
                }
            };
            *state = next;
            if !matches!(action, NodeAction::PublishAndResolveHa) {
                return true;
            }

            *keepalive_ms = keepalive_period_ms.max(1) as u64;
            *ticker = tokio::time::interval(Duration::from_millis(*keepalive_ms));

            let mut node = Node::new(index, group, Role::Active, runtime.self_hw_id(), true);
            node.keepalive_period_ms = *keepalive_ms;
            match runtime.registry.add_node(node) {
                Ok(notes) => {
                    runtime.registry.dispatch(notes);
                    guard.bind(index);
                    *node_index = Some(index);
                    *sink = Some(NotifySink::new(runtime.registry.clone(), index));
                }
                Err(err) => {
                    error!(%err, "failed to register node, closing");
                    return false;
                }
            }

            if let Ok(outcome) = ha::resolve(&runtime.registry, index) {
                runtime.registry.dispatch(outcome.notifications);
            }

            let response = ClientMessage::InitResponse {
                msg_id,
                response_ok: true,
                hardware_num: runtime.self_hw_id(),
            };
            if framed.send(response).await.is_err() {
                return false;
            }
            info!(node = index, group, "node initialized");
            true
        }

        ClientMessage::Keepalive { .. } => {
            if let Some(index) = node_index {
                if let Some(mut n) = runtime.registry.nodes.get_mut(index) {
                    n.keepalive_missed = 0;
                }
            }
            let (next, _action) = match node_fsm::transition(*state, NodeSignal::Data) {
                Ok(pair) => pair,
                Err(err) => {
                    warn!(%err, "keepalive before INIT, dropped");
                    return true;
                }
            };
            *state = next;
            true
        }

        ClientMessage::ProcessCreate {
            msg_id,
            pid,
            proc_type,
            name,
            interfaces,
        } => {
            let Some(index) = *node_index else {
                warn!("PROCESS_CREATE before INIT, closing");
                return false;
            };
            let proc = Process {
                pid,
                proc_type,
                name,
                node_index: index,
                role: Role::None,
                partner: None,
                running: true,
                interfaces: Vec::new(),
            };
            let ok = match runtime.registry.add_process(proc) {
                Ok(notes) => {
                    runtime.registry.dispatch(notes);
                    for iface_id in interfaces {
                        let iface = crate::core::registry::Interface {
                            id: iface_id,
                            process_pid: pid,
                            node_index: index,
                        };
                        match runtime.registry.add_interface(iface) {
                            Ok(notes) => runtime.registry.dispatch(notes),
                            Err(err) => warn!(%err, interface = iface_id, "interface advertisement rejected"),
                        }
                    }
                    true
                }
                Err(err) => {
                    warn!(%err, "PROCESS_CREATE rejected");
                    false
                }
            };
            let ack = ClientMessage::Ack {
                msg_id,
                msg_type: crate::core::protocol::ClientMsgType::ProcessCreate as u32,
                response_ok: ok,
            };
            framed.send(ack).await.is_ok()
        }

        ClientMessage::ProcessDestroy { msg_id, pid } => {
            if let Some(index) = *node_index {
                let notes = runtime.registry.remove_process(index, pid);
                runtime.registry.dispatch(notes);
            }
            let ack = ClientMessage::Ack {
                msg_id,
                msg_type: crate::core::protocol::ClientMsgType::ProcessDestroy as u32,
                response_ok: true,
            };
            framed.send(ack).await.is_ok()
        }

        ClientMessage::Register { msg_id, sub_type, ids } => {
            if let Some(sink) = sink.as_mut() {
                for id in ids {
                    sink.subscribe(sub_type, id);
                }
            }
            let ack = ClientMessage::Ack {
                msg_id,
                msg_type: crate::core::protocol::ClientMsgType::Register as u32,
                response_ok: true,
            };
            framed.send(ack).await.is_ok()
        }

        ClientMessage::Unregister { msg_id, sub_type, ids } => {
            let _ = sub_type;
            if let Some(sink) = sink.as_mut() {
                // Subscription ids are opaque to the client per the wire
                // format (it only ever names the watched row), so we treat
                // `ids` here as subscription ids it previously learned of
                // via out-of-band means; nothing to do if it didn't.
                for id in ids {
                    sink.unsubscribe(id as u64);
                }
            }
            let ack = ClientMessage::Ack {
                msg_id,
                msg_type: crate::core::protocol::ClientMsgType::Unregister as u32,
                response_ok: true,
            };
            framed.send(ack).await.is_ok()
        }

        ClientMessage::HaUpdate { msg_id, node_id, role } => {
            let partner = runtime
                .registry
                .nodes
                .get(&node_id)
                .and_then(|n| n.partner);
            let desired = match role {
                HaRole::Active => Role::Active,
                HaRole::Passive => Role::Passive,
                HaRole::None => Role::None,
            };
            let outcome = ha::apply_client_update(&runtime.registry, node_id, partner, desired);
            let ok = outcome.is_ok();
            if let Ok(notes) = outcome {
                runtime.registry.dispatch(notes);
            }
            if ok {
                if let Some(partner_index) = partner {
                    runtime
                        .gossip(
                            crate::core::protocol::PeerMessage::HaUpdate {
                                hw_id: runtime.self_hw_id(),
                                timestamp: runtime.now_ms(),
                                group: runtime
                                    .registry
                                    .nodes
                                    .get(&node_id)
                                    .map(|n| n.group)
                                    .unwrap_or(0),
                                master_node: node_id,
                                slave_node: partner_index,
                            },
                            None,
                        )
                        .await;
                }
            }
            let ack = ClientMessage::Ack {
                msg_id,
                msg_type: crate::core::protocol::ClientMsgType::HaUpdate as u32,
                response_ok: ok,
            };
            framed.send(ack).await.is_ok()
        }

        ClientMessage::HaNotify { msg_id, .. } => {
            let ack = ClientMessage::Ack {
                msg_id,
                msg_type: crate::core::protocol::ClientMsgType::HaNotify as u32,
                response_ok: true,
            };
            framed.send(ack).await.is_ok()
        }

        ClientMessage::InitResponse { .. } | ClientMessage::Ack { .. } => {
            warn!("client sent a server-only message type, ignoring");
            true
        }
    }
}
