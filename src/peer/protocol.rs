//! Message dispatch and state transitions.
//!
//! Grounded on the reference implementation's `protocol_handshake_client`/
//! `protocol_handshake_server`, `protocol_reconnect_client`/
//! `protocol_reconnect_server`, `protocol_ping`, and
//! `protocol_disconnect_request`/`protocol_disconnect` in `protocol.c`.
//!
//! Unlike the reference implementation, [`on_client_reconnect`] walks the
//! peer table with a plain index scan rather than an intrusive linked list,
//! so it has no equivalent of its always-advance-from-head traversal bug.

use crate::codec::frame::{DisconnectFrame, Frame, HandshakeFrame, PingFrame, ReconnectFrame};
use crate::peer::state::{PeerState, PeerTable, RemotePeer};
use std::net::{Ipv4Addr, SocketAddr};

/// The only cipher id this build advertises during handshake; negotiation
/// beyond "do our protocol/version match" is not implemented.
const PREFERRED_CIPHER: u8 = 1;

pub(crate) fn build_client_handshake() -> Frame {
    Frame::ClientHandshake(HandshakeFrame::new(PREFERRED_CIPHER, vec![PREFERRED_CIPHER as u32]))
}

pub(crate) fn build_server_handshake() -> Frame {
    Frame::ServerHandshake(HandshakeFrame::new(PREFERRED_CIPHER, vec![PREFERRED_CIPHER as u32]))
}

/// Server-side: accepts (or rejects) an incoming client handshake.
///
/// A repeated handshake from an address already on file is treated as a
/// no-op that returns the existing peer, rather than allocating a second
/// identity for the same client.
pub(crate) fn on_client_handshake(
    table: &mut PeerTable,
    tunnel_block: Ipv4Addr,
    from: SocketAddr,
    hs: &HandshakeFrame,
) -> Option<usize> {
    if !hs.is_compatible() {
        return None;
    }
    if let Some(idx) = table.find_by_address(&from) {
        return Some(idx);
    }
    let secret: u64 = rand::random();
    table.insert_server_peer(from, tunnel_block, secret)
}

/// Client-side: accepts the server's handshake reply.
pub(crate) fn on_server_handshake(peer: &mut RemotePeer, hs: &HandshakeFrame) -> bool {
    if !hs.is_compatible() {
        return false;
    }
    peer.state = PeerState::Connected;
    true
}

pub(crate) fn build_server_reconnect(peer: &RemotePeer) -> Frame {
    Frame::ServerReconnect(ReconnectFrame { id: peer.id, secret: peer.secret })
}

pub(crate) fn build_client_reconnect(peer: &RemotePeer) -> Frame {
    Frame::ClientReconnect(ReconnectFrame { id: peer.id, secret: peer.secret })
}

/// Client-side: learns its assigned id and/or refreshed secret from the
/// server. An id of zero means "not yet assigned"; once assigned it is
/// adopted permanently and only the secret is refreshed thereafter.
pub(crate) fn on_server_reconnect(peer: &mut RemotePeer, msg: &ReconnectFrame) {
    if peer.id == 0 {
        peer.id = msg.id;
    }
    if peer.id == msg.id {
        peer.secret = msg.secret;
        peer.state = PeerState::Connected;
    }
}

/// Server-side: rebinds a known peer's outer address after it reconnects
/// from a new one, identified by id+secret rather than by address. Rotates
/// the secret on every successful match; the caller echoes it back in a
/// ServerReconnect.
pub(crate) fn on_client_reconnect(
    table: &mut PeerTable,
    from: SocketAddr,
    msg: &ReconnectFrame,
) -> Option<usize> {
    let idx = table
        .iter()
        .position(|p| p.id == msg.id && p.secret == msg.secret)?;
    let peer = table.get_mut(idx).unwrap();
    peer.real_address = from;
    peer.state = PeerState::Connected;
    peer.secret = rand::random();
    Some(idx)
}

pub(crate) fn build_ping(send_time: u64) -> Frame {
    Frame::Ping(PingFrame { send_time, recv_time: 0 })
}

/// Answers a received ping with a pong carrying its original send time.
pub(crate) fn on_ping(msg: &PingFrame, now: u64) -> Frame {
    Frame::Pong(PingFrame { send_time: msg.send_time, recv_time: now })
}

/// Updates round-trip time from a received pong.
pub(crate) fn on_pong(peer: &mut RemotePeer, msg: &PingFrame, now: u64) {
    peer.rtt = now.saturating_sub(msg.send_time) as u32;
}

pub(crate) fn build_disconnect(reason: u8) -> Frame {
    Frame::Disconnect(DisconnectFrame { reason })
}

pub(crate) fn on_disconnect(peer: &mut RemotePeer) {
    peer.state = PeerState::Disconnected;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn client_handshake_creates_one_peer_per_address() {
        let mut table = PeerTable::new();
        let block = Ipv4Addr::new(10, 9, 8, 0);
        let hs = HandshakeFrame::new(PREFERRED_CIPHER, vec![1]);
        let first = on_client_handshake(&mut table, block, addr(1), &hs).unwrap();
        let repeat = on_client_handshake(&mut table, block, addr(1), &hs).unwrap();
        assert_eq!(first, repeat);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn incompatible_handshake_is_rejected() {
        let mut table = PeerTable::new();
        let block = Ipv4Addr::new(10, 9, 8, 0);
        let hs = HandshakeFrame { protocol: 0xDEAD, version: 1, preferred_cipher: 1, ciphers: vec![] };
        assert!(on_client_handshake(&mut table, block, addr(1), &hs).is_none());
    }

    #[test]
    fn server_reconnect_adopts_id_once_then_only_refreshes_secret() {
        let mut peer = RemotePeer {
            id: 0,
            state: PeerState::Handshaking,
            secret: 0,
            real_address: addr(1),
            vpn_address: None,
            last_recv_time: std::time::Instant::now(),
            last_send_time: std::time::Instant::now(),
            last_ping_time: std::time::Instant::now(),
            rtt: 0,
        };
        on_server_reconnect(&mut peer, &ReconnectFrame { id: 5, secret: 10 });
        assert_eq!(peer.id, 5);
        assert_eq!(peer.secret, 10);

        on_server_reconnect(&mut peer, &ReconnectFrame { id: 5, secret: 20 });
        assert_eq!(peer.secret, 20);

        // A reconnect for a different id than already adopted is ignored.
        on_server_reconnect(&mut peer, &ReconnectFrame { id: 9, secret: 99 });
        assert_eq!(peer.id, 5);
        assert_eq!(peer.secret, 20);
    }

    #[test]
    fn client_reconnect_rebinds_by_id_and_secret_not_address() {
        let mut table = PeerTable::new();
        let block = Ipv4Addr::new(10, 9, 8, 0);
        let idx = table.insert_server_peer(addr(1), block, 777).unwrap();
        let id = table.get(idx).unwrap().id;

        let found = on_client_reconnect(&mut table, addr(2), &ReconnectFrame { id, secret: 777 }).unwrap();
        assert_eq!(found, idx);
        assert_eq!(table.get(idx).unwrap().real_address, addr(2));
    }

    /// Mirrors the server's `Frame::ClientReconnect` dispatch arm in
    /// `endpoint.rs`: a successful match must rotate the secret and the
    /// `ServerReconnect` built in response must carry the new one, or the
    /// client (which only leaves `Disconnected` on a matching id) can never
    /// re-converge.
    #[test]
    fn client_reconnect_rotates_secret_and_reply_carries_it() {
        let mut table = PeerTable::new();
        let block = Ipv4Addr::new(10, 9, 8, 0);
        let idx = table.insert_server_peer(addr(1), block, 777).unwrap();
        let id = table.get(idx).unwrap().id;

        let found = on_client_reconnect(&mut table, addr(2), &ReconnectFrame { id, secret: 777 }).unwrap();
        let peer = table.get(found).unwrap();
        assert_ne!(peer.secret, 777, "secret must rotate on a successful reconnect match");

        let reply = build_server_reconnect(peer);
        match reply {
            Frame::ServerReconnect(r) => {
                assert_eq!(r.id, id);
                assert_eq!(r.secret, peer.secret);
                assert_ne!(r.secret, 777);
            }
            other => panic!("expected server reconnect, got {other}"),
        }
    }

    #[test]
    fn pong_updates_rtt() {
        let mut peer = RemotePeer {
            id: 1,
            state: PeerState::Connected,
            secret: 0,
            real_address: addr(1),
            vpn_address: None,
            last_recv_time: std::time::Instant::now(),
            last_send_time: std::time::Instant::now(),
            last_ping_time: std::time::Instant::now(),
            rtt: 0,
        };
        on_pong(&mut peer, &PingFrame { send_time: 100, recv_time: 150 }, 150);
        assert_eq!(peer.rtt, 50);
    }
}
