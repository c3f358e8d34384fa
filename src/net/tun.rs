//! Non-blocking TUN device driver.
//!
//! Grounded on `tunnel_open`/`tunnel_close`/`tunnel_up`/`tunnel_down`/
//! `tunnel_set_addresses`/`tunnel_set_network_mask`/`tunnel_set_mtu` from the
//! reference implementation's tunnel wrapper, built on the `tun` crate's
//! synchronous device instead of its own raw `ioctl`s.

use crate::net::DriverResult;
use std::io;
use std::net::Ipv4Addr;
use tun::AbstractDevice;

pub(crate) struct TunDriver {
    device: tun::Device,
}

impl TunDriver {
    /// Opens (or attaches to) a TUN interface, named `name` if given.
    ///
    /// The device's local address is `block + .2`, its point-to-point
    /// destination is `block + .1`, matching the convention the peer table
    /// uses for a /24 tunnel block (§4.6).
    pub fn open(
        name: Option<&str>,
        block: Ipv4Addr,
        netmask: Ipv4Addr,
        mtu: u16,
        persistent: bool,
    ) -> crate::Result<Self> {
        let local = last_octet(block, 2);
        let remote = last_octet(block, 1);

        let mut config = tun::Configuration::default();
        config
            .address(local)
            .destination(remote)
            .netmask(netmask)
            .mtu(mtu)
            .up();
        if let Some(name) = name {
            config.tun_name(name);
        }

        #[cfg(target_os = "linux")]
        config.platform_config(|cfg| {
            cfg.ensure_root_privileges(true);
        });

        let mut device = tun::create(&config)?;
        device.set_nonblock()?;
        #[cfg(target_os = "linux")]
        if persistent {
            let _ = device.persist();
        }
        #[cfg(not(target_os = "linux"))]
        let _ = persistent;

        Ok(Self { device })
    }

    pub fn local_address(&self) -> crate::Result<Ipv4Addr> {
        match self.device.address()? {
            std::net::IpAddr::V4(v4) => Ok(v4),
            std::net::IpAddr::V6(_) => Err("tunnel device has no IPv4 address".into()),
        }
    }

    pub fn mtu(&self) -> crate::Result<u16> {
        Ok(self.device.mtu()?)
    }

    /// Non-blocking read of one packet from the device.
    pub fn read(&self, buf: &mut [u8]) -> crate::Result<DriverResult<usize>> {
        match self.device.recv(buf) {
            Ok(n) => Ok(DriverResult::Success(n)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(DriverResult::Pending),
            Err(e) => Err(e.into()),
        }
    }

    /// Non-blocking write of one packet to the device.
    pub fn write(&self, buf: &[u8]) -> crate::Result<DriverResult<usize>> {
        match self.device.send(buf) {
            Ok(n) => Ok(DriverResult::Success(n)),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(DriverResult::Pending),
            Err(e) => Err(e.into()),
        }
    }
}

fn last_octet(block: Ipv4Addr, octet: u8) -> Ipv4Addr {
    let [a, b, c, _] = block.octets();
    Ipv4Addr::new(a, b, c, octet)
}
