//! Remote peer records and the table that owns them.
//!
//! Grounded on `remote_peer_t` and `remotepeer_create`/`peer_find_remote`
//! from the reference implementation's `peer.h`/`peer.c`, with the intrusive
//! doubly linked list replaced by a flat `Vec` owned by the endpoint — the
//! design notes explicitly sanction this substitution, and there are at most
//! 252 peers (`id` is bounded to `[3, 254]`), so a linear scan is plenty.

use std::net::{Ipv4Addr, SocketAddr};
use std::time::Instant;

/// Smallest id the server will hand out. `0` means "unassigned", `1`/`2` are
/// reserved for the tunnel's own point-to-point addresses.
pub(crate) const MIN_PEER_ID: u8 = 3;
/// Largest id the server will hand out (fits the last IPv4 octet).
pub(crate) const MAX_PEER_ID: u8 = 254;

/// Lifecycle state of a remote peer. The reference implementation's
/// `PS_Reconnecting` is subsumed here by `Handshaking`: both describe "no
/// confirmed data path yet, handshake/reconnect retries in flight".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PeerState {
    Disconnected,
    Handshaking,
    Connected,
}

/// Local state kept for one remote endpoint of the tunnel.
pub(crate) struct RemotePeer {
    pub id: u8,
    pub state: PeerState,
    pub secret: u64,
    pub real_address: SocketAddr,
    /// Server-only: the fake tunnel address assigned to this client, last
    /// octet equal to `id`.
    pub vpn_address: Option<Ipv4Addr>,
    pub last_recv_time: Instant,
    pub last_send_time: Instant,
    pub last_ping_time: Instant,
    pub rtt: u32,
}

impl RemotePeer {
    fn new(state: PeerState, real_address: SocketAddr) -> Self {
        let now = Instant::now();
        Self {
            id: 0,
            state,
            secret: 0,
            real_address,
            vpn_address: None,
            last_recv_time: now,
            last_send_time: now,
            last_ping_time: now,
            rtt: 0,
        }
    }
}

/// Owns every [`RemotePeer`] known to an endpoint.
#[derive(Default)]
pub(crate) struct PeerTable {
    peers: Vec<RemotePeer>,
    next_id: u8,
}

impl PeerTable {
    pub fn new() -> Self {
        Self {
            peers: Vec::new(),
            next_id: MIN_PEER_ID,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &RemotePeer> {
        self.peers.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut RemotePeer> {
        self.peers.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    /// Finds the peer whose outer UDP address matches `addr`.
    pub fn find_by_address(&self, addr: &SocketAddr) -> Option<usize> {
        self.peers.iter().position(|p| &p.real_address == addr)
    }

    /// Finds the peer whose inner tunnel address matches `addr` (server only).
    pub fn find_by_vpn_address(&self, addr: &Ipv4Addr) -> Option<usize> {
        self.peers.iter().position(|p| p.vpn_address.as_ref() == Some(addr))
    }

    pub fn get(&self, index: usize) -> Option<&RemotePeer> {
        self.peers.get(index)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut RemotePeer> {
        self.peers.get_mut(index)
    }

    /// Registers a brand-new client on the server, deriving its tunnel
    /// address from `block` with the last octet replaced by the assigned id.
    /// Returns `None` once ids are exhausted (`peer.c`'s "IDs exhausted"
    /// failsafe).
    pub fn insert_server_peer(&mut self, real_address: SocketAddr, block: Ipv4Addr, secret: u64) -> Option<usize> {
        if self.next_id > MAX_PEER_ID {
            return None;
        }
        let id = self.next_id;
        self.next_id += 1;

        let mut peer = RemotePeer::new(PeerState::Connected, real_address);
        peer.id = id;
        peer.secret = secret;
        let [a, b, c, _] = block.octets();
        peer.vpn_address = Some(Ipv4Addr::new(a, b, c, id));

        self.peers.push(peer);
        Some(self.peers.len() - 1)
    }

    /// Registers the single remote the client maintains (the server).
    pub fn insert_client_peer(&mut self, real_address: SocketAddr) -> usize {
        self.peers.push(RemotePeer::new(PeerState::Handshaking, real_address));
        self.peers.len() - 1
    }

    /// Drops every peer marked disconnected (server cleanup; the client
    /// re-arms its single peer instead of removing it, see `endpoint.rs`).
    pub fn evict_disconnected(&mut self) {
        self.peers.retain(|p| p.state != PeerState::Disconnected);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn ids_are_monotonic_and_bounded() {
        let mut table = PeerTable::new();
        let block = Ipv4Addr::new(10, 9, 7, 0);
        let first = table.insert_server_peer(addr(1), block, 1).unwrap();
        let second = table.insert_server_peer(addr(2), block, 2).unwrap();
        assert_eq!(table.get(first).unwrap().id, 3);
        assert_eq!(table.get(second).unwrap().id, 4);
        assert_eq!(table.get(first).unwrap().vpn_address, Some(Ipv4Addr::new(10, 9, 7, 3)));
    }

    #[test]
    fn ids_exhaust_past_max() {
        let mut table = PeerTable::new();
        let block = Ipv4Addr::new(10, 9, 7, 0);
        for _ in MIN_PEER_ID..=MAX_PEER_ID {
            assert!(table.insert_server_peer(addr(1), block, 0).is_some());
        }
        assert!(table.insert_server_peer(addr(1), block, 0).is_none());
    }

    #[test]
    fn lookup_by_vpn_address_matches_derived_octet() {
        let mut table = PeerTable::new();
        let block = Ipv4Addr::new(10, 9, 7, 0);
        let idx = table.insert_server_peer(addr(5), block, 0).unwrap();
        let found = table.find_by_vpn_address(&Ipv4Addr::new(10, 9, 7, 3)).unwrap();
        assert_eq!(found, idx);
    }

    #[test]
    fn evict_disconnected_removes_only_dead_peers() {
        let mut table = PeerTable::new();
        let block = Ipv4Addr::new(10, 9, 7, 0);
        let keep = table.insert_server_peer(addr(1), block, 0).unwrap();
        let drop = table.insert_server_peer(addr(2), block, 0).unwrap();
        table.get_mut(drop).unwrap().state = PeerState::Disconnected;
        let keep_id = table.get(keep).unwrap().id;
        table.evict_disconnected();
        assert_eq!(table.len(), 1);
        assert_eq!(table.get(0).unwrap().id, keep_id);
    }
}
