// src/core/protocol/mod.rs

//! Wire codecs: client traffic is native byte order (§6.1), peer traffic is
//! explicit network byte order (§6.2). Kept as separate modules because the
//! two formats share no framing logic worth abstracting over.

pub mod client;
pub mod peer;

pub use client::{ClientCodec, ClientMessage, ClientMsgType, HaRole};
pub use peer::{PeerCodec, PeerMessage, PeerMsgType, ReplayTlv};
