// src/core/protocol/peer.rs

//! Peer (HM↔HM) wire codec (§6.2). Explicit network byte order throughout —
//! grounded on `hmha.c`'s `hm_cluster_send_ha_update()`, which hand-rolls
//! `HM_PUT_LONG`/`hm_hton64` for every field it puts on the wire. The
//! original's matching read side (`HM_GET_LONG`) always reads big-endian
//! regardless of which branch of its own endianness `#ifdef` is active;
//! that asymmetry is a bug in the source, not a format requirement, so the
//! encoder and decoder below are kept consistent big-endian on both sides.

use crate::core::errors::HmError;
use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

const HEADER_LEN: usize = 16; // msg_type:u32 + hw_id:u32 + timestamp:u64
const NUM_TLVS: usize = 5;
const TLV_LEN: usize = 6 * 4;
const REPLAY_BODY_LEN: usize = 8 + NUM_TLVS * TLV_LEN;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum PeerMsgType {
    Init = 4626,
    Keepalive = 2,
    ProcessUpdate = 3,
    NodeUpdate = 4,
    HaUpdate = 5,
    Replay = 6,
}

impl PeerMsgType {
    fn from_u32(v: u32) -> Option<Self> {
        Some(match v {
            4626 => Self::Init,
            2 => Self::Keepalive,
            3 => Self::ProcessUpdate,
            4 => Self::NodeUpdate,
            5 => Self::HaUpdate,
            6 => Self::Replay,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayTlv {
    pub update_type: u32,
    pub node_id: u32,
    pub pid: u32,
    pub group: u32,
    pub role: u32,
    pub running: u32,
}

impl ReplayTlv {
    const ZERO: ReplayTlv = ReplayTlv {
        update_type: 0,
        node_id: 0,
        pid: 0,
        group: 0,
        role: 0,
        running: 0,
    };
}

#[derive(Debug, Clone)]
pub enum PeerMessage {
    Init {
        hw_id: u32,
        timestamp: u64,
    },
    Keepalive {
        hw_id: u32,
        timestamp: u64,
    },
    ProcessUpdate {
        hw_id: u32,
        timestamp: u64,
        node_id: u32,
        pid: u32,
        running: bool,
    },
    NodeUpdate {
        hw_id: u32,
        timestamp: u64,
        node_id: u32,
        group: u32,
        role: u32,
        active: bool,
    },
    HaUpdate {
        hw_id: u32,
        timestamp: u64,
        group: u32,
        master_node: u32,
        slave_node: u32,
    },
    /// `last` true marks the final message of a replay stream; an empty
    /// `tlvs` vec with `last = true` is itself a legal terminator.
    Replay {
        hw_id: u32,
        timestamp: u64,
        last: bool,
        tlvs: Vec<ReplayTlv>,
    },
}

impl PeerMessage {
    fn header(&self) -> (PeerMsgType, u32, u64) {
        match *self {
            PeerMessage::Init { hw_id, timestamp } => (PeerMsgType::Init, hw_id, timestamp),
            PeerMessage::Keepalive { hw_id, timestamp } => (PeerMsgType::Keepalive, hw_id, timestamp),
            PeerMessage::ProcessUpdate { hw_id, timestamp, .. } => {
                (PeerMsgType::ProcessUpdate, hw_id, timestamp)
            }
            PeerMessage::NodeUpdate { hw_id, timestamp, .. } => {
                (PeerMsgType::NodeUpdate, hw_id, timestamp)
            }
            PeerMessage::HaUpdate { hw_id, timestamp, .. } => (PeerMsgType::HaUpdate, hw_id, timestamp),
            PeerMessage::Replay { hw_id, timestamp, .. } => (PeerMsgType::Replay, hw_id, timestamp),
        }
    }
}

pub struct PeerCodec;

impl Decoder for PeerCodec {
    type Item = PeerMessage;
    type Error = HmError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }
        let msg_type_raw = u32::from_be_bytes(src[0..4].try_into().unwrap());
        let msg_type = PeerMsgType::from_u32(msg_type_raw)
            .ok_or_else(|| HmError::Protocol(format!("unknown peer msg_type {msg_type_raw}")))?;

        let body_len = match msg_type {
            PeerMsgType::Init | PeerMsgType::Keepalive => 0,
            PeerMsgType::ProcessUpdate => 12,
            PeerMsgType::NodeUpdate => 16,
            PeerMsgType::HaUpdate => 12,
            PeerMsgType::Replay => REPLAY_BODY_LEN,
        };
        let total = HEADER_LEN + body_len;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        let mut frame = src.split_to(total);
        let _msg_type = frame.get_u32();
        let hw_id = frame.get_u32();
        let timestamp = frame.get_u64();

        let msg = match msg_type {
            PeerMsgType::Init => PeerMessage::Init { hw_id, timestamp },
            PeerMsgType::Keepalive => PeerMessage::Keepalive { hw_id, timestamp },
            PeerMsgType::ProcessUpdate => PeerMessage::ProcessUpdate {
                hw_id,
                timestamp,
                node_id: frame.get_u32(),
                pid: frame.get_u32(),
                running: frame.get_u32() != 0,
            },
            PeerMsgType::NodeUpdate => PeerMessage::NodeUpdate {
                hw_id,
                timestamp,
                node_id: frame.get_u32(),
                group: frame.get_u32(),
                role: frame.get_u32(),
                active: frame.get_u32() != 0,
            },
            PeerMsgType::HaUpdate => PeerMessage::HaUpdate {
                hw_id,
                timestamp,
                group: frame.get_u32(),
                master_node: frame.get_u32(),
                slave_node: frame.get_u32(),
            },
            PeerMsgType::Replay => {
                let last = frame.get_u32() != 0;
                let num_tlvs = frame.get_u32() as usize;
                if num_tlvs > NUM_TLVS {
                    return Err(HmError::Protocol(format!("replay num_tlvs {num_tlvs} exceeds {NUM_TLVS}")));
                }
                let mut tlvs = Vec::with_capacity(num_tlvs);
                for i in 0..NUM_TLVS {
                    let tlv = ReplayTlv {
                        update_type: frame.get_u32(),
                        node_id: frame.get_u32(),
                        pid: frame.get_u32(),
                        group: frame.get_u32(),
                        role: frame.get_u32(),
                        running: frame.get_u32(),
                    };
                    if i < num_tlvs {
                        tlvs.push(tlv);
                    }
                }
                PeerMessage::Replay {
                    hw_id,
                    timestamp,
                    last,
                    tlvs,
                }
            }
        };
        Ok(Some(msg))
    }
}

impl Encoder<PeerMessage> for PeerCodec {
    type Error = HmError;

    fn encode(&mut self, item: PeerMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let (msg_type, hw_id, timestamp) = item.header();
        dst.put_u32(msg_type as u32);
        dst.put_u32(hw_id);
        dst.put_u64(timestamp);

        match item {
            PeerMessage::Init { .. } | PeerMessage::Keepalive { .. } => {}
            PeerMessage::ProcessUpdate {
                node_id, pid, running, ..
            } => {
                dst.put_u32(node_id);
                dst.put_u32(pid);
                dst.put_u32(running as u32);
            }
            PeerMessage::NodeUpdate {
                node_id,
                group,
                role,
                active,
                ..
            } => {
                dst.put_u32(node_id);
                dst.put_u32(group);
                dst.put_u32(role);
                dst.put_u32(active as u32);
            }
            PeerMessage::HaUpdate {
                group,
                master_node,
                slave_node,
                ..
            } => {
                dst.put_u32(group);
                dst.put_u32(master_node);
                dst.put_u32(slave_node);
            }
            PeerMessage::Replay { last, tlvs, .. } => {
                if tlvs.len() > NUM_TLVS {
                    return Err(HmError::Protocol("too many replay tlvs for one message".into()));
                }
                dst.put_u32(last as u32);
                dst.put_u32(tlvs.len() as u32);
                for i in 0..NUM_TLVS {
                    let tlv = tlvs.get(i).copied().unwrap_or(ReplayTlv::ZERO);
                    dst.put_u32(tlv.update_type);
                    dst.put_u32(tlv.node_id);
                    dst.put_u32(tlv.pid);
                    dst.put_u32(tlv.group);
                    dst.put_u32(tlv.role);
                    dst.put_u32(tlv.running);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keepalive_round_trips_big_endian() {
        let mut codec = PeerCodec;
        let mut buf = BytesMut::new();
        codec
            .encode(
                PeerMessage::Keepalive {
                    hw_id: 1,
                    timestamp: 123456,
                },
                &mut buf,
            )
            .unwrap();
        assert_eq!(&buf[0..4], &(PeerMsgType::Keepalive as u32).to_be_bytes());
        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        match decoded {
            PeerMessage::Keepalive { hw_id, timestamp } => {
                assert_eq!(hw_id, 1);
                assert_eq!(timestamp, 123456);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn replay_pads_unused_tlv_slots_with_zero() {
        let mut codec = PeerCodec;
        let mut buf = BytesMut::new();
        let tlv = ReplayTlv {
            update_type: 1,
            node_id: 10,
            pid: 0,
            group: 1,
            role: 1,
            running: 1,
        };
        codec
            .encode(
                PeerMessage::Replay {
                    hw_id: 2,
                    timestamp: 1,
                    last: false,
                    tlvs: vec![tlv],
                },
                &mut buf,
            )
            .unwrap();
        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        match decoded {
            PeerMessage::Replay { tlvs, last, .. } => {
                assert!(!last);
                assert_eq!(tlvs.len(), 1);
                assert_eq!(tlvs[0].node_id, 10);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn empty_last_replay_is_legal_terminator() {
        let mut codec = PeerCodec;
        let mut buf = BytesMut::new();
        codec
            .encode(
                PeerMessage::Replay {
                    hw_id: 2,
                    timestamp: 1,
                    last: true,
                    tlvs: vec![],
                },
                &mut buf,
            )
            .unwrap();
        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        match decoded {
            PeerMessage::Replay { tlvs, last, .. } => {
                assert!(last);
                assert!(tlvs.is_empty());
            }
            _ => panic!("wrong variant"),
        }
    }
}
