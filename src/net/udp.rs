//! Non-blocking UDP datagram driver.
//!
//! Grounded on `socket_open`/`socket_bind`/`socket_connect`/`socket_set_mark`/
//! `socket_receive`/`socket_send` from the reference implementation's socket
//! wrapper: a thin layer over a single UDP socket that turns `EAGAIN`/
//! `EWOULDBLOCK` into [`DriverResult::Pending`] rather than blocking.

use crate::net::DriverResult;
use socket2::{Domain, SockAddr, Socket, Type};
use std::io;
use std::mem::MaybeUninit;
use std::net::SocketAddr;

/// Firewall mark applied to every socket so host routing can steer traffic
/// away from the TUN device and avoid routing loops.
pub const FIREWALL_MARK: u32 = 0x0DD6;

pub(crate) struct UdpDriver {
    socket: Socket,
}

impl UdpDriver {
    /// Opens a non-blocking UDP socket of the requested address family.
    pub fn open(ipv6: bool) -> crate::Result<Self> {
        let domain = if ipv6 { Domain::IPV6 } else { Domain::IPV4 };
        let socket = Socket::new(domain, Type::DGRAM, None)?;
        socket.set_reuse_address(true)?;
        socket.set_nonblocking(true)?;
        #[cfg(target_os = "linux")]
        socket.set_mark(FIREWALL_MARK)?;
        Ok(Self { socket })
    }

    /// Allows incoming packets from unknown addresses (server mode).
    pub fn bind(&self, addr: SocketAddr) -> crate::Result<()> {
        self.socket.bind(&addr.into())?;
        Ok(())
    }

    /// Restricts the socket to a single remote (client mode).
    pub fn connect(&self, addr: SocketAddr) -> crate::Result<()> {
        match self.socket.connect(&addr.into()) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Non-blocking receive. Returns the sender's address alongside the
    /// datagram so the caller can look up (or create) the owning peer.
    pub fn receive(&self, buf: &mut [u8]) -> crate::Result<DriverResult<(usize, SocketAddr)>> {
        let uninit = unsafe {
            std::slice::from_raw_parts_mut(buf.as_mut_ptr() as *mut MaybeUninit<u8>, buf.len())
        };
        match self.socket.recv_from(uninit) {
            Ok((n, from)) => {
                let addr = from
                    .as_socket()
                    .ok_or("received datagram from a non-IP address")?;
                Ok(DriverResult::Success((n, addr)))
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(DriverResult::Pending),
            Err(e) => Err(e.into()),
        }
    }

    /// Non-blocking send to `to`. `EAGAIN` is reported as pending; the
    /// datagram is dropped, matching the reference's best-effort
    /// `protocol_send`.
    pub fn send(&self, buf: &[u8], to: SocketAddr) -> crate::Result<DriverResult<usize>> {
        let addr: SockAddr = to.into();
        match self.socket.send_to(buf, &addr) {
            Ok(n) => Ok(DriverResult::Success(n)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(DriverResult::Pending),
            Err(e) => Err(e.into()),
        }
    }
}
