// src/core/protocol/client.rs

//! Client (node→HM) wire codec (§6.1). Host byte order on the wire — unlike
//! the peer codec, nothing here byte-swizzles (see the endianness note in
//! the peer module and DESIGN.md for why the two differ).

use crate::core::errors::HmError;
use crate::core::registry::SubsType;
use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

const HEADER_LEN: usize = 20;
const MAX_NAME_LEN: usize = 24;
const MAX_FRAME_LEN: usize = 1 << 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ClientMsgType {
    Init = 1,
    Keepalive = 2,
    ProcessCreate = 3,
    ProcessDestroy = 4,
    Register = 5,
    Unregister = 6,
    HaUpdate = 7,
    HaNotify = 8,
}

impl ClientMsgType {
    fn from_u32(v: u32) -> Option<Self> {
        Some(match v {
            1 => Self::Init,
            2 => Self::Keepalive,
            3 => Self::ProcessCreate,
            4 => Self::ProcessDestroy,
            5 => Self::Register,
            6 => Self::Unregister,
            7 => Self::HaUpdate,
            8 => Self::HaNotify,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HaRole {
    None,
    Active,
    Passive,
}

impl HaRole {
    fn from_u32(v: u32) -> HaRole {
        match v {
            1 => HaRole::Active,
            2 => HaRole::Passive,
            _ => HaRole::None,
        }
    }
    fn as_u32(self) -> u32 {
        match self {
            HaRole::None => 0,
            HaRole::Active => 1,
            HaRole::Passive => 2,
        }
    }
}

/// A decoded client message, header fields folded in as `msg_id`/`request`
/// on every variant since every reply echoes them.
#[derive(Debug, Clone)]
pub enum ClientMessage {
    Init {
        msg_id: u32,
        index: u32,
        group: u32,
        keepalive_period_ms: u32,
    },
    InitResponse {
        msg_id: u32,
        response_ok: bool,
        hardware_num: u32,
    },
    Keepalive {
        msg_id: u32,
    },
    ProcessCreate {
        msg_id: u32,
        pid: u32,
        proc_type: u32,
        name: String,
        /// Slave interface ids advertised alongside this process (mirrors
        /// `HM_PROCESS_UPDATE_MSG`'s `num_if`-prefixed trailing array).
        interfaces: Vec<u32>,
    },
    ProcessDestroy {
        msg_id: u32,
        pid: u32,
    },
    Register {
        msg_id: u32,
        sub_type: SubsType,
        ids: Vec<u32>,
    },
    Unregister {
        msg_id: u32,
        sub_type: SubsType,
        ids: Vec<u32>,
    },
    HaUpdate {
        msg_id: u32,
        node_id: u32,
        role: HaRole,
    },
    HaNotify {
        msg_id: u32,
        node_id: u32,
        current_role: HaRole,
    },
    Ack {
        msg_id: u32,
        msg_type: u32,
        response_ok: bool,
    },
}

fn sub_type_from_u32(v: u32) -> Result<SubsType, HmError> {
    Ok(match v {
        12 => SubsType::Group,
        13 => SubsType::Proc,
        14 => SubsType::If,
        15 => SubsType::Location,
        16 => SubsType::Node,
        _ => return Err(HmError::Protocol(format!("unknown subscription type {v}"))),
    })
}

fn sub_type_to_u32(t: SubsType) -> u32 {
    match t {
        SubsType::Group => 12,
        SubsType::Proc => 13,
        SubsType::If => 14,
        SubsType::Location => 15,
        SubsType::Node => 16,
    }
}

fn read_fixed_name(buf: &mut BytesMut) -> String {
    let raw = buf.split_to(MAX_NAME_LEN);
    let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    String::from_utf8_lossy(&raw[..end]).into_owned()
}

fn put_fixed_name(dst: &mut BytesMut, name: &str) {
    let bytes = name.as_bytes();
    let n = bytes.len().min(MAX_NAME_LEN);
    dst.put_slice(&bytes[..n]);
    dst.put_bytes(0, MAX_NAME_LEN - n);
}

pub struct ClientCodec;

impl Decoder for ClientCodec {
    type Item = ClientMessage;
    type Error = HmError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < HEADER_LEN {
            return Ok(None);
        }
        let msg_len = u32::from_ne_bytes(src[4..8].try_into().unwrap()) as usize;
        if msg_len > MAX_FRAME_LEN {
            return Err(HmError::Protocol(format!("frame too large: {msg_len}")));
        }
        if src.len() < msg_len {
            src.reserve(msg_len - src.len());
            return Ok(None);
        }

        let mut frame = src.split_to(msg_len);
        let msg_type_raw = frame.get_u32_ne();
        let _msg_len_field = frame.get_u32_ne();
        let msg_id = frame.get_u32_ne();
        let _request = frame.get_u32_ne();
        let response_ok = frame.get_u32_ne() != 0;

        let msg_type = ClientMsgType::from_u32(msg_type_raw)
            .ok_or_else(|| HmError::Protocol(format!("unknown client msg_type {msg_type_raw}")))?;

        let msg = match msg_type {
            ClientMsgType::Init => ClientMessage::Init {
                msg_id,
                index: frame.get_u32_ne(),
                group: frame.get_u32_ne(),
                keepalive_period_ms: frame.get_u32_ne(),
            },
            ClientMsgType::Keepalive => ClientMessage::Keepalive { msg_id },
            ClientMsgType::ProcessCreate => {
                let pid = frame.get_u32_ne();
                let proc_type = frame.get_u32_ne();
                let name = read_fixed_name(&mut frame);
                let num_if = frame.get_u32_ne() as usize;
                if frame.len() < num_if * 4 {
                    return Err(HmError::Protocol("truncated interface id list".into()));
                }
                let interfaces = (0..num_if).map(|_| frame.get_u32_ne()).collect();
                ClientMessage::ProcessCreate {
                    msg_id,
                    pid,
                    proc_type,
                    name,
                    interfaces,
                }
            }
            ClientMsgType::ProcessDestroy => ClientMessage::ProcessDestroy {
                msg_id,
                pid: frame.get_u32_ne(),
            },
            ClientMsgType::Register | ClientMsgType::Unregister => {
                let sub_type = sub_type_from_u32(frame.get_u32_ne())?;
                let count = frame.get_u32_ne() as usize;
                if frame.len() < count * 4 {
                    return Err(HmError::Protocol("truncated id list".into()));
                }
                let ids = (0..count).map(|_| frame.get_u32_ne()).collect();
                if matches!(msg_type, ClientMsgType::Register) {
                    ClientMessage::Register {
                        msg_id,
                        sub_type,
                        ids,
                    }
                } else {
                    ClientMessage::Unregister {
                        msg_id,
                        sub_type,
                        ids,
                    }
                }
            }
            ClientMsgType::HaUpdate => ClientMessage::HaUpdate {
                msg_id,
                node_id: frame.get_u32_ne(),
                role: HaRole::from_u32(frame.get_u32_ne()),
            },
            ClientMsgType::HaNotify => ClientMessage::HaNotify {
                msg_id,
                node_id: frame.get_u32_ne(),
                current_role: HaRole::from_u32(frame.get_u32_ne()),
            },
        };
        let _ = response_ok;
        Ok(Some(msg))
    }
}

impl Encoder<ClientMessage> for ClientCodec {
    type Error = HmError;

    fn encode(&mut self, item: ClientMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let body_start = dst.len();
        dst.put_u32_ne(0); // msg_type, patched below
        dst.put_u32_ne(0); // msg_len, patched below
        let (msg_type, msg_id, request, response_ok) = match &item {
            ClientMessage::Init { msg_id, .. } => (ClientMsgType::Init as u32, *msg_id, 1u32, 0u32),
            ClientMessage::InitResponse { msg_id, response_ok, .. } => {
                (ClientMsgType::Init as u32, *msg_id, 0, *response_ok as u32)
            }
            ClientMessage::Keepalive { msg_id } => (ClientMsgType::Keepalive as u32, *msg_id, 1, 0),
            ClientMessage::ProcessCreate { msg_id, .. } => {
                (ClientMsgType::ProcessCreate as u32, *msg_id, 1, 0)
            }
            ClientMessage::ProcessDestroy { msg_id, .. } => {
                (ClientMsgType::ProcessDestroy as u32, *msg_id, 1, 0)
            }
            ClientMessage::Register { msg_id, .. } => (ClientMsgType::Register as u32, *msg_id, 1, 0),
            ClientMessage::Unregister { msg_id, .. } => {
                (ClientMsgType::Unregister as u32, *msg_id, 1, 0)
            }
            ClientMessage::HaUpdate { msg_id, .. } => (ClientMsgType::HaUpdate as u32, *msg_id, 1, 0),
            ClientMessage::HaNotify { msg_id, .. } => (ClientMsgType::HaNotify as u32, *msg_id, 0, 0),
            ClientMessage::Ack {
                msg_id,
                msg_type,
                response_ok,
            } => (*msg_type, *msg_id, 0, *response_ok as u32),
        };
        dst.put_u32_ne(msg_id);
        dst.put_u32_ne(request);
        dst.put_u32_ne(response_ok);

        match item {
            ClientMessage::Init {
                index,
                group,
                keepalive_period_ms,
                ..
            } => {
                dst.put_u32_ne(index);
                dst.put_u32_ne(group);
                dst.put_u32_ne(keepalive_period_ms);
            }
            ClientMessage::InitResponse { hardware_num, .. } => {
                dst.put_u32_ne(hardware_num);
            }
            ClientMessage::Keepalive { .. } => {}
            ClientMessage::ProcessCreate {
                pid,
                proc_type,
                name,
                interfaces,
                ..
            } => {
                dst.put_u32_ne(pid);
                dst.put_u32_ne(proc_type);
                put_fixed_name(dst, &name);
                dst.put_u32_ne(interfaces.len() as u32);
                for id in interfaces {
                    dst.put_u32_ne(id);
                }
            }
            ClientMessage::ProcessDestroy { pid, .. } => dst.put_u32_ne(pid),
            ClientMessage::Register { sub_type, ids, .. }
            | ClientMessage::Unregister { sub_type, ids, .. } => {
                dst.put_u32_ne(sub_type_to_u32(sub_type));
                dst.put_u32_ne(ids.len() as u32);
                for id in ids {
                    dst.put_u32_ne(id);
                }
            }
            ClientMessage::HaUpdate { node_id, role, .. } => {
                dst.put_u32_ne(node_id);
                dst.put_u32_ne(role.as_u32());
            }
            ClientMessage::HaNotify {
                node_id,
                current_role,
                ..
            } => {
                dst.put_u32_ne(node_id);
                dst.put_u32_ne(current_role.as_u32());
            }
            ClientMessage::Ack { .. } => {}
        }

        let total_len = (dst.len() - body_start) as u32;
        dst[body_start..body_start + 4].copy_from_slice(&msg_type.to_ne_bytes());
        dst[body_start + 4..body_start + 8].copy_from_slice(&total_len.to_ne_bytes());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_round_trips() {
        let mut codec = ClientCodec;
        let mut buf = BytesMut::new();
        codec
            .encode(
                ClientMessage::Init {
                    msg_id: 1,
                    index: 7,
                    group: 2,
                    keepalive_period_ms: 1000,
                },
                &mut buf,
            )
            .unwrap();
        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        match decoded {
            ClientMessage::Init {
                index,
                group,
                keepalive_period_ms,
                ..
            } => {
                assert_eq!(index, 7);
                assert_eq!(group, 2);
                assert_eq!(keepalive_period_ms, 1000);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn register_round_trips_id_list() {
        let mut codec = ClientCodec;
        let mut buf = BytesMut::new();
        codec
            .encode(
                ClientMessage::Register {
                    msg_id: 5,
                    sub_type: SubsType::Group,
                    ids: vec![5, 6, 7],
                },
                &mut buf,
            )
            .unwrap();
        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        match decoded {
            ClientMessage::Register { sub_type, ids, .. } => {
                assert_eq!(sub_type, SubsType::Group);
                assert_eq!(ids, vec![5, 6, 7]);
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn partial_frame_returns_none() {
        let mut codec = ClientCodec;
        let mut buf = BytesMut::new();
        buf.put_u32_ne(ClientMsgType::Keepalive as u32);
        buf.put_u32_ne(HEADER_LEN as u32);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }
}
