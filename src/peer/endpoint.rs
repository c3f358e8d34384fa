//! The single-threaded, non-blocking service loop.
//!
//! Grounded on `peer_service_client`'s do/while ingress-then-egress shape in
//! the reference implementation's `peer.c`. That file's server-side loop is
//! an empty stub (`peer_service_server` just `return true;`), so the server
//! body below is original: it follows the same three-phase shape — timers,
//! then bounded ingress, then bounded egress — generalized from one peer to
//! a table of them.

use crate::codec::frame::{DataFrame, Frame};
use crate::codec::parser::Parser;
use crate::crypto::{Block, Compressor, CryptoConfig, new_block};
use crate::net::udp::UdpDriver;
use crate::net::tun::TunDriver;
use crate::net::DriverResult;
use crate::peer::rewriter::{self, Origin};
use crate::peer::state::{PeerState, PeerTable};
use crate::peer::protocol;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Matches the reference implementation's `DEFAULT_BUFFER_SIZE`.
pub const DEFAULT_BUFFER_SIZE: usize = 1400;
pub const DEFAULT_KEEPALIVE_TIMEOUT: Duration = Duration::from_millis(2000);
pub const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_millis(10_000);
pub const DEFAULT_RELIABLE_RETRY: Duration = Duration::from_millis(1000);

/// Disconnect reason sent when a peer is torn down locally (idle shutdown,
/// config reload). There is no wire-level meaning beyond "goodbye".
const DISCONNECT_REASON_LOCAL: u8 = 0;

/// Caps how much ingress/egress work a single `tick()` drains, so one noisy
/// peer or a packet storm can't starve the timer pass or other peers.
const MAX_MESSAGES_PER_TICK: usize = 64;

pub enum Mode {
    Server { bind: SocketAddr },
    Client { remote: SocketAddr },
}

pub struct EndpointConfig {
    pub mode: Mode,
    pub tunnel_block: Ipv4Addr,
    pub tunnel_netmask: Ipv4Addr,
    pub mtu: u16,
    pub interface_name: Option<String>,
    pub persistent: bool,
    pub crypto: CryptoConfig,
    pub keepalive_timeout: Duration,
    pub connection_timeout: Duration,
    pub reliable_retry: Duration,
}

/// Owns the TUN device, the UDP socket, and the peer table, and drives one
/// non-blocking tick at a time. Never blocks: every external call either
/// completes immediately or reports [`DriverResult::Pending`].
pub struct Endpoint {
    is_server: bool,
    tunnel_block: Ipv4Addr,
    tunnel_local_address: Ipv4Addr,
    tun: TunDriver,
    udp: UdpDriver,
    table: PeerTable,
    cipher: Box<dyn Block>,
    compressor: Box<dyn Compressor>,
    keepalive_timeout: Duration,
    connection_timeout: Duration,
    reliable_retry: Duration,
    buffer_size: usize,
    server_address: Option<SocketAddr>,
}

impl Endpoint {
    pub fn new(config: EndpointConfig) -> crate::Result<Self> {
        let is_server = matches!(config.mode, Mode::Server { .. });

        let tun = TunDriver::open(
            config.interface_name.as_deref(),
            config.tunnel_block,
            config.tunnel_netmask,
            config.mtu,
            config.persistent,
        )?;
        let tunnel_local_address = tun.local_address()?;
        // The driver may round the requested MTU to whatever the platform
        // actually assigned; size the buffer off the real value.
        let buffer_size = tun.mtu()? as usize + 64;

        let udp = UdpDriver::open(false)?;
        let mut table = PeerTable::new();
        let server_address = match config.mode {
            Mode::Server { bind } => {
                udp.bind(bind)?;
                None
            }
            Mode::Client { remote } => {
                udp.connect(remote)?;
                table.insert_client_peer(remote);
                Some(remote)
            }
        };

        Ok(Self {
            is_server,
            tunnel_block: config.tunnel_block,
            tunnel_local_address,
            tun,
            udp,
            table,
            cipher: new_block(&config.crypto),
            compressor: Box::new(crate::crypto::IdentityCompressor),
            keepalive_timeout: config.keepalive_timeout,
            connection_timeout: config.connection_timeout,
            reliable_retry: config.reliable_retry,
            buffer_size,
            server_address,
        })
    }

    /// Runs one pass: timers, then bounded ingress, then bounded egress.
    pub fn tick(&mut self) -> crate::Result<()> {
        self.run_timers()?;
        self.drain_ingress()?;
        self.drain_egress()?;
        Ok(())
    }

    /// Number of peers currently in [`PeerState::Connected`]. Used by the
    /// debug smoke test to detect handshake completion without reaching
    /// into the peer table directly.
    pub fn connected_peer_count(&self) -> usize {
        self.table.iter().filter(|p| p.state == PeerState::Connected).count()
    }

    fn send_frame(&self, frame: &Frame, to: SocketAddr) -> crate::Result<()> {
        let datagram = Parser::marshal(frame, self.compressor.as_ref(), self.cipher.as_ref())?;
        match self.udp.send(&datagram, to)? {
            DriverResult::Success(_) | DriverResult::Pending => Ok(()),
        }
    }

    fn run_timers(&mut self) -> crate::Result<()> {
        let now = Instant::now();
        if self.is_server {
            self.run_server_timers(now)?;
            self.table.evict_disconnected();
        } else {
            self.run_client_timers(now)?;
        }
        Ok(())
    }

    /// Servers never originate keepalive pings; they only time peers out
    /// and answer pings a client sends them.
    fn run_server_timers(&mut self, now: Instant) -> crate::Result<()> {
        for peer in self.table.iter_mut() {
            if peer.state != PeerState::Connected {
                continue;
            }
            if now.duration_since(peer.last_recv_time) > self.connection_timeout {
                peer.state = PeerState::Disconnected;
            }
        }
        Ok(())
    }

    fn run_client_timers(&mut self, now: Instant) -> crate::Result<()> {
        let Some(server) = self.server_address else {
            return Ok(());
        };
        let Some(peer) = self.table.get_mut(0) else {
            return Ok(());
        };
        match peer.state {
            PeerState::Handshaking => {
                if now.duration_since(peer.last_send_time) >= self.reliable_retry {
                    peer.last_send_time = now;
                    self.send_frame(&protocol::build_client_handshake(), server)?;
                }
            }
            // A peer that already has an id has handshaken before; recover
            // with a cheap reconnect instead of a full handshake.
            PeerState::Disconnected if peer.id != 0 => {
                if now.duration_since(peer.last_send_time) >= self.reliable_retry {
                    peer.last_send_time = now;
                    let frame = protocol::build_client_reconnect(peer);
                    self.send_frame(&frame, server)?;
                }
            }
            PeerState::Disconnected => {
                if now.duration_since(peer.last_send_time) >= self.reliable_retry {
                    peer.state = PeerState::Handshaking;
                    peer.last_send_time = now;
                    self.send_frame(&protocol::build_client_handshake(), server)?;
                }
            }
            PeerState::Connected => {
                if now.duration_since(peer.last_recv_time) > self.connection_timeout {
                    peer.state = PeerState::Disconnected;
                } else if now.duration_since(peer.last_recv_time) > self.keepalive_timeout
                    && now.duration_since(peer.last_ping_time) > self.keepalive_timeout
                {
                    peer.last_send_time = now;
                    peer.last_ping_time = now;
                    self.send_frame(&protocol::build_ping(now_millis()), server)?;
                }
            }
        }
        Ok(())
    }

    fn drain_ingress(&mut self) -> crate::Result<()> {
        let mut buf = vec![0u8; self.buffer_size];
        for _ in 0..MAX_MESSAGES_PER_TICK {
            let (n, from) = match self.udp.receive(&mut buf)? {
                DriverResult::Success(v) => v,
                DriverResult::Pending => break,
            };
            if let Err(e) = self.handle_datagram(&buf[..n], from) {
                tracing::warn!("dropping malformed datagram from {from}: {e}");
            }
        }
        Ok(())
    }

    fn handle_datagram(&mut self, datagram: &[u8], from: SocketAddr) -> crate::Result<()> {
        let frame = Parser::unmarshal(datagram, self.compressor.as_ref(), self.cipher.as_ref())?;
        let now = Instant::now();

        if self.is_server {
            self.handle_server_frame(frame, from, now)
        } else {
            self.handle_client_frame(frame, now)
        }
    }

    fn handle_server_frame(&mut self, frame: Frame, from: SocketAddr, now: Instant) -> crate::Result<()> {
        match frame {
            Frame::ClientHandshake(hs) => {
                let Some(idx) = protocol::on_client_handshake(&mut self.table, self.tunnel_block, from, &hs) else {
                    tracing::warn!("rejecting handshake from {from}: incompatible protocol or ids exhausted ({} peers known)", self.table.len());
                    return Ok(());
                };
                self.touch_recv(idx, now);
                let reconnect = protocol::build_server_reconnect(self.table.get(idx).unwrap());
                self.send_frame(&protocol::build_server_handshake(), from)?;
                self.send_frame(&reconnect, from)?;
            }
            Frame::ClientReconnect(msg) => {
                if let Some(idx) = protocol::on_client_reconnect(&mut self.table, from, &msg) {
                    self.touch_recv(idx, now);
                    let reconnect = protocol::build_server_reconnect(self.table.get(idx).unwrap());
                    self.send_frame(&reconnect, from)?;
                }
            }
            Frame::Ping(msg) => {
                if let Some(idx) = self.table.find_by_address(&from) {
                    self.touch_recv(idx, now);
                }
                self.send_frame(&protocol::on_ping(&msg, now_millis()), from)?;
            }
            Frame::Pong(msg) => {
                if let Some(idx) = self.table.find_by_address(&from) {
                    self.touch_recv(idx, now);
                    protocol::on_pong(self.table.get_mut(idx).unwrap(), &msg, now_millis());
                }
            }
            Frame::Disconnect(_) => {
                if let Some(idx) = self.table.find_by_address(&from) {
                    protocol::on_disconnect(self.table.get_mut(idx).unwrap());
                }
            }
            Frame::Data(data) => {
                self.handle_server_data(data, from, now)?;
            }
            Frame::ServerHandshake(_) | Frame::ServerReconnect(_) => {
                // A server never receives its own reply message types.
            }
        }
        Ok(())
    }

    fn handle_server_data(&mut self, mut data: DataFrame, from: SocketAddr, now: Instant) -> crate::Result<()> {
        let Some(idx) = self.table.find_by_address(&from) else {
            return Ok(());
        };
        self.touch_recv(idx, now);
        if data.invalid() || data.version() != 4 {
            // IPv6 checksum recomputation is unsupported; such packets
            // can't be NAT'd correctly, so they're dropped rather than
            // forwarded with a stale address.
            return Ok(());
        }
        let vpn_address = self.table.get(idx).unwrap().vpn_address;
        if let Some(vpn_address) = vpn_address {
            rewriter::replace_address(&mut data.payload, Origin::Outgoing, vpn_address);
        }
        self.tun.write(&data.payload)?;
        Ok(())
    }

    fn handle_client_frame(&mut self, frame: Frame, now: Instant) -> crate::Result<()> {
        let Some(server) = self.server_address else {
            return Ok(());
        };
        match frame {
            Frame::ServerHandshake(hs) => {
                if let Some(peer) = self.table.get_mut(0) {
                    protocol::on_server_handshake(peer, &hs);
                    peer.last_recv_time = now;
                }
            }
            Frame::ServerReconnect(msg) => {
                if let Some(peer) = self.table.get_mut(0) {
                    protocol::on_server_reconnect(peer, &msg);
                    peer.last_recv_time = now;
                }
            }
            Frame::Ping(msg) => {
                if let Some(peer) = self.table.get_mut(0) {
                    peer.last_recv_time = now;
                }
                self.send_frame(&protocol::on_ping(&msg, now_millis()), server)?;
            }
            Frame::Pong(msg) => {
                if let Some(peer) = self.table.get_mut(0) {
                    peer.last_recv_time = now;
                    protocol::on_pong(peer, &msg, now_millis());
                }
            }
            Frame::Disconnect(_) => {
                if let Some(peer) = self.table.get_mut(0) {
                    protocol::on_disconnect(peer);
                }
            }
            Frame::Data(mut data) => {
                if let Some(peer) = self.table.get_mut(0) {
                    peer.last_recv_time = now;
                }
                if !data.invalid() && data.version() == 4 {
                    rewriter::replace_address(&mut data.payload, Origin::Incoming, self.tunnel_local_address);
                    self.tun.write(&data.payload)?;
                }
            }
            Frame::ClientHandshake(_) | Frame::ClientReconnect(_) => {
                // A client never receives its own request message types.
            }
        }
        Ok(())
    }

    fn touch_recv(&mut self, idx: usize, now: Instant) {
        if let Some(peer) = self.table.get_mut(idx) {
            peer.last_recv_time = now;
        }
    }

    fn drain_egress(&mut self) -> crate::Result<()> {
        if self.is_server {
            self.drain_egress_server()
        } else {
            self.drain_egress_client()
        }
    }

    fn drain_egress_server(&mut self) -> crate::Result<()> {
        let mut buf = vec![0u8; self.buffer_size];
        for _ in 0..MAX_MESSAGES_PER_TICK {
            let n = match self.tun.read(&mut buf)? {
                DriverResult::Success(n) => n,
                DriverResult::Pending => break,
            };
            let packet = &buf[..n];
            if packet.len() < 20 || packet[0] >> 4 != 4 {
                continue;
            }
            let dest = Ipv4Addr::new(packet[16], packet[17], packet[18], packet[19]);
            let Some(idx) = self.table.find_by_vpn_address(&dest) else {
                continue;
            };
            let peer = self.table.get(idx).unwrap();
            if peer.state != PeerState::Connected {
                continue;
            }
            let frame = Frame::Data(DataFrame { payload: packet.to_vec() });
            self.send_frame(&frame, peer.real_address)?;
        }
        Ok(())
    }

    fn drain_egress_client(&mut self) -> crate::Result<()> {
        let Some(server) = self.server_address else {
            return Ok(());
        };
        let connected = self.table.get(0).map(|p| p.state == PeerState::Connected).unwrap_or(false);
        if !connected {
            return Ok(());
        }
        let mut buf = vec![0u8; self.buffer_size];
        for _ in 0..MAX_MESSAGES_PER_TICK {
            let n = match self.tun.read(&mut buf)? {
                DriverResult::Success(n) => n,
                DriverResult::Pending => break,
            };
            let frame = Frame::Data(DataFrame { payload: buf[..n].to_vec() });
            self.send_frame(&frame, server)?;
        }
        Ok(())
    }

    /// Sends a disconnect notice to every connected peer and marks them
    /// disconnected first, matching the reference implementation's
    /// mark-before-send ordering so a failed send can't leave state out of
    /// sync with what was attempted.
    pub fn shutdown(&mut self) -> crate::Result<()> {
        let targets: Vec<SocketAddr> = self
            .table
            .iter_mut()
            .filter(|p| p.state == PeerState::Connected)
            .map(|p| {
                p.state = PeerState::Disconnected;
                p.real_address
            })
            .collect();
        let frame = protocol::build_disconnect(DISCONNECT_REASON_LOCAL);
        for addr in targets {
            self.send_frame(&frame, addr)?;
        }
        Ok(())
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}
