//! Frame marshaling and unmarshaling.
//!
//! Grounded on `protocol_send`/`protocol_receive` from the reference
//! implementation's `protocol.c`.
//!
//! Send pipeline: encode type + body, write the Adler-32 checksum over
//! everything following it, compress, then encrypt.
//!
//! Receive pipeline: decrypt, decompress, then verify the checksum before
//! the type/body are parsed.

use crate::codec::checksum::adler32;
use crate::codec::frame::*;
use crate::crypto::{Block, Compressor};

pub struct Parser;

impl Parser {
    /// Serializes `frame` into a ready-to-send datagram.
    pub fn marshal(
        frame: &Frame,
        compressor: &dyn Compressor,
        block: &dyn Block,
    ) -> crate::Result<Vec<u8>> {
        let (msg_type, body) = match frame {
            Frame::Ping(p) => (MsgType::Ping, encode_ping(p)),
            Frame::Pong(p) => (MsgType::Pong, encode_ping(p)),
            Frame::ClientHandshake(h) => (MsgType::ClientHandshake, encode_handshake(h)),
            Frame::ServerHandshake(h) => (MsgType::ServerHandshake, encode_handshake(h)),
            Frame::ClientReconnect(r) => (MsgType::ClientReconnect, encode_reconnect(r)),
            Frame::ServerReconnect(r) => (MsgType::ServerReconnect, encode_reconnect(r)),
            Frame::Disconnect(d) => (MsgType::Disconnect, encode_disconnect(d)),
            Frame::Data(d) => (MsgType::Data, d.payload.clone()),
        };

        let mut buf = Vec::with_capacity(HDR_LEN + body.len());
        buf.extend_from_slice(&0u32.to_be_bytes());
        buf.extend_from_slice(&(msg_type as u32).to_be_bytes());
        buf.extend_from_slice(&body);

        let checksum = adler32(&buf[4..]);
        buf[0..4].copy_from_slice(&checksum.to_be_bytes());

        let mut payload = buf.split_off(4);
        compressor.compress(&mut payload)?;
        block.encrypt(&mut payload)?;

        let mut out = Vec::with_capacity(4 + payload.len());
        out.extend_from_slice(&buf);
        out.extend_from_slice(&payload);
        Ok(out)
    }

    /// Recovers a [`Frame`] from a received datagram.
    pub fn unmarshal(
        datagram: &[u8],
        compressor: &dyn Compressor,
        block: &dyn Block,
    ) -> crate::Result<Frame> {
        if datagram.len() < 4 {
            return Err(FrameError::TooShort.into());
        }
        let checksum = u32::from_be_bytes(datagram[0..4].try_into().unwrap());

        let mut payload = datagram[4..].to_vec();
        block.decrypt(&mut payload).map_err(FrameError::DecryptionFailed)?;
        compressor.decompress(&mut payload)?;

        if payload.len() < HDR_LEN - 4 {
            return Err(FrameError::TooShort.into());
        }
        if adler32(&payload) != checksum {
            return Err(FrameError::ChecksumMismatch.into());
        }

        let msg_type = MsgType::try_from(u32::from_be_bytes(payload[0..4].try_into().unwrap()))?;
        let body = &payload[4..];

        Ok(match msg_type {
            MsgType::Invalid => return Err(FrameError::Invalid.into()),
            MsgType::Ping => Frame::Ping(decode_ping(body)?),
            MsgType::Pong => Frame::Pong(decode_ping(body)?),
            MsgType::ClientHandshake => Frame::ClientHandshake(decode_handshake(body)?),
            MsgType::ServerHandshake => Frame::ServerHandshake(decode_handshake(body)?),
            MsgType::ClientReconnect => Frame::ClientReconnect(decode_reconnect(body)?),
            MsgType::ServerReconnect => Frame::ServerReconnect(decode_reconnect(body)?),
            MsgType::Disconnect => Frame::Disconnect(decode_disconnect(body)?),
            MsgType::Data => Frame::Data(DataFrame { payload: body.to_vec() }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{IdentityCompressor, new_block, CryptoConfig};

    fn roundtrip(frame: Frame) -> Frame {
        let block = new_block(&CryptoConfig::Plain);
        let compressor = IdentityCompressor;
        let datagram = Parser::marshal(&frame, &compressor, block.as_ref()).unwrap();
        Parser::unmarshal(&datagram, &compressor, block.as_ref()).unwrap()
    }

    #[test]
    fn ping_roundtrips() {
        let frame = Frame::Ping(PingFrame { send_time: 42, recv_time: 0 });
        match roundtrip(frame) {
            Frame::Ping(p) => assert_eq!(p.send_time, 42),
            other => panic!("unexpected frame: {other}"),
        }
    }

    #[test]
    fn data_roundtrips() {
        let payload = vec![0x45, 0x00, 0x00, 0x14, 1, 2, 3];
        let frame = Frame::Data(DataFrame { payload: payload.clone() });
        match roundtrip(frame) {
            Frame::Data(d) => assert_eq!(d.payload, payload),
            other => panic!("unexpected frame: {other}"),
        }
    }

    #[test]
    fn handshake_roundtrips() {
        let frame = Frame::ClientHandshake(HandshakeFrame::new(1, vec![1, 2]));
        match roundtrip(frame) {
            Frame::ClientHandshake(h) => {
                assert!(h.is_compatible());
                assert_eq!(h.ciphers, vec![1, 2]);
            }
            other => panic!("unexpected frame: {other}"),
        }
    }

    #[test]
    fn corrupted_datagram_fails_checksum() {
        let block = new_block(&CryptoConfig::Plain);
        let compressor = IdentityCompressor;
        let frame = Frame::Disconnect(DisconnectFrame { reason: 1 });
        let mut datagram = Parser::marshal(&frame, &compressor, block.as_ref()).unwrap();
        let last = datagram.len() - 1;
        datagram[last] ^= 0xFF;
        let err = Parser::unmarshal(&datagram, &compressor, block.as_ref()).unwrap_err();
        assert!(err.to_string().contains("checksum"));
    }
}
