//! Wire-protocol integration tests.
//!
//! Exercises the marshal/unmarshal pipeline over real UDP sockets on
//! loopback, covering the handshake/reconnect/keepalive/data exchanges a
//! client and server actually perform on the wire. The TUN device and the
//! full [`Endpoint`] service loop need elevated privileges to exercise
//! end-to-end, so these tests stay at the protocol layer, the same way the
//! rest of this crate's tests avoid requiring a real network interface.

use rustun::codec::frame::{DataFrame, DisconnectFrame, Frame, HandshakeFrame, PingFrame, ReconnectFrame};
use rustun::codec::parser::Parser;
use rustun::crypto::{CryptoConfig, IdentityCompressor, new_block};
use std::net::UdpSocket;
use std::time::Duration;

fn bind_loopback() -> UdpSocket {
    let socket = UdpSocket::bind("127.0.0.1:0").expect("bind loopback socket");
    socket
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();
    socket
}

fn recv_frame(socket: &UdpSocket) -> Frame {
    let compressor = IdentityCompressor;
    let block = new_block(&CryptoConfig::Plain);
    let mut buf = vec![0u8; 2048];
    let (n, _from) = socket.recv_from(&mut buf).expect("recv datagram");
    Parser::unmarshal(&buf[..n], &compressor, block.as_ref()).expect("unmarshal frame")
}

fn send_frame(socket: &UdpSocket, frame: &Frame, to: std::net::SocketAddr) {
    let compressor = IdentityCompressor;
    let block = new_block(&CryptoConfig::Plain);
    let datagram = Parser::marshal(frame, &compressor, block.as_ref()).expect("marshal frame");
    socket.send_to(&datagram, to).expect("send datagram");
}

#[test]
fn client_handshake_completes_with_server_handshake_and_reconnect() {
    let client = bind_loopback();
    let server = bind_loopback();
    let server_addr = server.local_addr().unwrap();

    let handshake = Frame::ClientHandshake(HandshakeFrame::new(1, vec![1]));
    send_frame(&client, &handshake, server_addr);

    match recv_frame(&server) {
        Frame::ClientHandshake(hs) => assert!(hs.is_compatible()),
        other => panic!("expected client handshake, got {other}"),
    }

    let client_addr = client.local_addr().unwrap();
    send_frame(&server, &Frame::ServerHandshake(HandshakeFrame::new(1, vec![1])), client_addr);
    send_frame(&server, &Frame::ServerReconnect(ReconnectFrame { id: 3, secret: 4242 }), client_addr);

    match recv_frame(&client) {
        Frame::ServerHandshake(hs) => assert!(hs.is_compatible()),
        other => panic!("expected server handshake, got {other}"),
    }
    match recv_frame(&client) {
        Frame::ServerReconnect(r) => {
            assert_eq!(r.id, 3);
            assert_eq!(r.secret, 4242);
        }
        other => panic!("expected server reconnect, got {other}"),
    }
}

#[test]
fn keepalive_ping_pong_round_trips() {
    let a = bind_loopback();
    let b = bind_loopback();
    let b_addr = b.local_addr().unwrap();

    send_frame(&a, &Frame::Ping(PingFrame { send_time: 1000, recv_time: 0 }), b_addr);
    let ping = match recv_frame(&b) {
        Frame::Ping(p) => p,
        other => panic!("expected ping, got {other}"),
    };
    assert_eq!(ping.send_time, 1000);

    let a_addr = a.local_addr().unwrap();
    send_frame(&b, &Frame::Pong(PingFrame { send_time: ping.send_time, recv_time: 1010 }), a_addr);
    match recv_frame(&a) {
        Frame::Pong(p) => {
            assert_eq!(p.send_time, 1000);
            assert_eq!(p.recv_time, 1010);
        }
        other => panic!("expected pong, got {other}"),
    }
}

#[test]
fn client_reconnect_after_address_change_carries_id_and_secret() {
    let old_client = bind_loopback();
    let server = bind_loopback();
    let server_addr = server.local_addr().unwrap();

    // Simulate the client rebinding to a new local port (e.g. after its
    // network address changed) by just using a second socket.
    let new_client = bind_loopback();
    drop(old_client);

    send_frame(&new_client, &Frame::ClientReconnect(ReconnectFrame { id: 7, secret: 555 }), server_addr);
    match recv_frame(&server) {
        Frame::ClientReconnect(r) => {
            assert_eq!(r.id, 7);
            assert_eq!(r.secret, 555);
        }
        other => panic!("expected client reconnect, got {other}"),
    }
}

#[test]
fn data_frame_carries_ip_payload_unmodified_over_the_wire() {
    let client = bind_loopback();
    let server = bind_loopback();
    let server_addr = server.local_addr().unwrap();

    let payload = vec![0x45, 0x00, 0x00, 0x1c, 0, 0, 0, 0, 64, 17, 0, 0, 10, 9, 8, 3, 8, 8, 8, 8];
    send_frame(&client, &Frame::Data(DataFrame { payload: payload.clone() }), server_addr);

    match recv_frame(&server) {
        Frame::Data(d) => assert_eq!(d.payload, payload),
        other => panic!("expected data frame, got {other}"),
    }
}

#[test]
fn disconnect_notice_round_trips() {
    let client = bind_loopback();
    let server = bind_loopback();
    let server_addr = server.local_addr().unwrap();

    send_frame(&client, &Frame::Disconnect(DisconnectFrame { reason: 1 }), server_addr);
    match recv_frame(&server) {
        Frame::Disconnect(d) => assert_eq!(d.reason, 1),
        other => panic!("expected disconnect, got {other}"),
    }
}

#[test]
fn encrypted_transport_round_trips_with_matching_keys() {
    let client = bind_loopback();
    let server = bind_loopback();
    let server_addr = server.local_addr().unwrap();
    let client_addr = client.local_addr().unwrap();

    let compressor = IdentityCompressor;
    let cipher = new_block(&CryptoConfig::Xor("shared-secret".to_string()));

    let frame = Frame::Data(DataFrame { payload: vec![1, 2, 3, 4, 5] });
    let datagram = Parser::marshal(&frame, &compressor, cipher.as_ref()).unwrap();
    client.send_to(&datagram, server_addr).unwrap();

    let mut buf = vec![0u8; 2048];
    let (n, from) = server.recv_from(&mut buf).unwrap();
    assert_eq!(from, client_addr);
    let decoded = Parser::unmarshal(&buf[..n], &compressor, cipher.as_ref()).unwrap();
    match decoded {
        Frame::Data(d) => assert_eq!(d.payload, vec![1, 2, 3, 4, 5]),
        other => panic!("expected data frame, got {other}"),
    }
}
