//! Frame definitions for the tunnel protocol.
//!
//! Every datagram carries a single message in a common envelope. All
//! multi-byte integers, in the envelope and in message bodies alike, are
//! network byte order (big-endian).
//!
//! # Envelope (8 bytes)
//! ```text
//! +--------+--------+--------+--------+--------+--------+--------+--------+
//! |          checksum (4 bytes)       |            type (4 bytes)        |
//! +--------+--------+--------+--------+--------+--------+--------+--------+
//! ```
//!
//! - checksum: Adler-32 over the bytes following this field (type + body).
//! - type: message type tag, see [`MsgType`].

pub use crate::codec::errors::FrameError;
use std::fmt::Display;

/// Protocol identifier exchanged during handshake.
pub const PROTOCOL_ID: u32 = 0xBEEF_CAFE;
/// Protocol version exchanged during handshake.
pub const PROTOCOL_VERSION: u8 = 1;

/// Envelope header length in bytes (checksum + type).
pub const HDR_LEN: usize = 8;

/// Number of cipher ids advertised in a handshake message.
const CIPHER_SLOTS: usize = 8;

/// Message type tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsgType {
    Invalid = 0,
    Ping = 1,
    Pong = 2,
    ClientHandshake = 3,
    ServerHandshake = 4,
    ClientReconnect = 5,
    ServerReconnect = 6,
    Disconnect = 7,
    Data = 8,
}

impl TryFrom<u32> for MsgType {
    type Error = FrameError;

    fn try_from(v: u32) -> Result<Self, Self::Error> {
        match v {
            0 => Ok(MsgType::Invalid),
            1 => Ok(MsgType::Ping),
            2 => Ok(MsgType::Pong),
            3 => Ok(MsgType::ClientHandshake),
            4 => Ok(MsgType::ServerHandshake),
            5 => Ok(MsgType::ClientReconnect),
            6 => Ok(MsgType::ServerReconnect),
            7 => Ok(MsgType::Disconnect),
            8 => Ok(MsgType::Data),
            _ => Err(FrameError::Invalid),
        }
    }
}

/// Protocol frame enum. One variant per [`MsgType`].
#[derive(Debug, Clone)]
pub enum Frame {
    Ping(PingFrame),
    Pong(PingFrame),
    ClientHandshake(HandshakeFrame),
    ServerHandshake(HandshakeFrame),
    ClientReconnect(ReconnectFrame),
    ServerReconnect(ReconnectFrame),
    Disconnect(DisconnectFrame),
    Data(DataFrame),
}

impl Display for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Frame::Ping(p) => write!(f, "ping sent at {}", p.send_time),
            Frame::Pong(p) => write!(f, "pong for {} recv at {}", p.send_time, p.recv_time),
            Frame::ClientHandshake(h) => write!(f, "client handshake proto {:#x}", h.protocol),
            Frame::ServerHandshake(h) => write!(f, "server handshake proto {:#x}", h.protocol),
            Frame::ClientReconnect(r) => write!(f, "client reconnect id {}", r.id),
            Frame::ServerReconnect(r) => write!(f, "server reconnect id {}", r.id),
            Frame::Disconnect(d) => write!(f, "disconnect reason {}", d.reason),
            Frame::Data(d) => write!(f, "data with payload size {}", d.payload.len()),
        }
    }
}

/// Keep-alive ping/pong body. `recv_time` is zero on a Ping.
#[derive(Debug, Clone, Default)]
pub struct PingFrame {
    pub send_time: u64,
    pub recv_time: u64,
}

/// Handshake body, identical layout for client and server directions.
#[derive(Debug, Clone)]
pub struct HandshakeFrame {
    pub protocol: u32,
    pub version: u8,
    pub preferred_cipher: u8,
    pub ciphers: Vec<u32>,
}

impl HandshakeFrame {
    pub fn new(preferred_cipher: u8, ciphers: Vec<u32>) -> Self {
        Self {
            protocol: PROTOCOL_ID,
            version: PROTOCOL_VERSION,
            preferred_cipher,
            ciphers,
        }
    }

    pub fn is_compatible(&self) -> bool {
        self.protocol == PROTOCOL_ID && self.version == PROTOCOL_VERSION
    }
}

/// Reconnect body, identical layout for client and server directions.
#[derive(Debug, Clone)]
pub struct ReconnectFrame {
    pub id: u8,
    pub secret: u64,
}

/// Disconnect notice. `reason` is advisory only.
#[derive(Debug, Clone)]
pub struct DisconnectFrame {
    pub reason: u8,
}

/// Tunneled IP packet.
#[derive(Debug, Clone)]
pub struct DataFrame {
    pub payload: Vec<u8>,
}

impl DataFrame {
    /// True if too short to be a valid IPv4 header.
    pub fn invalid(&self) -> bool {
        self.payload.len() < 20
    }

    /// IP version read from the top nibble of the first byte.
    pub fn version(&self) -> u8 {
        self.payload[0] >> 4
    }
}

pub const PING_BODY_LEN: usize = 16;
pub const HANDSHAKE_BODY_LEN: usize = 4 + 1 + 1 + 1 + CIPHER_SLOTS * 4;
pub const RECONNECT_BODY_LEN: usize = 1 + 8;

pub fn encode_ping(f: &PingFrame) -> Vec<u8> {
    let mut buf = Vec::with_capacity(PING_BODY_LEN);
    buf.extend_from_slice(&f.send_time.to_be_bytes());
    buf.extend_from_slice(&f.recv_time.to_be_bytes());
    buf
}

pub fn decode_ping(body: &[u8]) -> Result<PingFrame, FrameError> {
    if body.len() < PING_BODY_LEN {
        return Err(FrameError::TooShort);
    }
    Ok(PingFrame {
        send_time: u64::from_be_bytes(body[0..8].try_into().unwrap()),
        recv_time: u64::from_be_bytes(body[8..16].try_into().unwrap()),
    })
}

pub fn encode_handshake(f: &HandshakeFrame) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HANDSHAKE_BODY_LEN);
    buf.extend_from_slice(&f.protocol.to_be_bytes());
    buf.push(f.version);
    buf.push(f.preferred_cipher);
    buf.push(f.ciphers.len() as u8);
    for i in 0..CIPHER_SLOTS {
        let cipher = f.ciphers.get(i).copied().unwrap_or(0);
        buf.extend_from_slice(&cipher.to_be_bytes());
    }
    buf
}

pub fn decode_handshake(body: &[u8]) -> Result<HandshakeFrame, FrameError> {
    if body.len() < HANDSHAKE_BODY_LEN {
        return Err(FrameError::TooShort);
    }
    let protocol = u32::from_be_bytes(body[0..4].try_into().unwrap());
    let version = body[4];
    let preferred_cipher = body[5];
    let cipher_count = (body[6] as usize).min(CIPHER_SLOTS);
    let mut ciphers = Vec::with_capacity(cipher_count);
    for i in 0..cipher_count {
        let offset = 7 + i * 4;
        ciphers.push(u32::from_be_bytes(body[offset..offset + 4].try_into().unwrap()));
    }
    Ok(HandshakeFrame {
        protocol,
        version,
        preferred_cipher,
        ciphers,
    })
}

pub fn encode_reconnect(f: &ReconnectFrame) -> Vec<u8> {
    let mut buf = Vec::with_capacity(RECONNECT_BODY_LEN);
    buf.push(f.id);
    buf.extend_from_slice(&f.secret.to_be_bytes());
    buf
}

pub fn decode_reconnect(body: &[u8]) -> Result<ReconnectFrame, FrameError> {
    if body.len() < RECONNECT_BODY_LEN {
        return Err(FrameError::TooShort);
    }
    Ok(ReconnectFrame {
        id: body[0],
        secret: u64::from_be_bytes(body[1..9].try_into().unwrap()),
    })
}

pub fn encode_disconnect(f: &DisconnectFrame) -> Vec<u8> {
    vec![f.reason]
}

pub fn decode_disconnect(body: &[u8]) -> Result<DisconnectFrame, FrameError> {
    if body.is_empty() {
        return Err(FrameError::TooShort);
    }
    Ok(DisconnectFrame { reason: body[0] })
}
