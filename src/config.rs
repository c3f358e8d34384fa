//! Startup option parsing.
//!
//! Grounded on `StartupOptions`/`parse_startup_options`/`show_help` from the
//! reference implementation's `main.c`, rebuilt on `clap`'s derive API
//! instead of hand-rolled `getopt_long`.

use clap::Parser;
use std::net::Ipv4Addr;

const MIN_MTU: u16 = 576;
const DEFAULT_TUNNEL_BLOCK: &str = "10.9.8.0";
const DEFAULT_TUNNEL_NETMASK: &str = "255.255.255.0";
const DEFAULT_MTU: u16 = 1400;
const MAX_INTERFACE_NAME_LEN: usize = 15;

/// A userspace tunnel endpoint: either a server accepting many clients, or a
/// client connecting to one server.
#[derive(Debug, Parser)]
#[command(name = "rustun", version, about)]
pub struct StartupOptions {
    /// Run as a server, optionally binding to a specific local address
    /// (`host:port`). Mutually exclusive with `--client`.
    #[arg(short = 's', long = "server", value_name = "BIND", num_args = 0..=1)]
    pub server: Option<Option<String>>,

    /// Run as a client, connecting to the given server address
    /// (`host:port`). Mutually exclusive with `--server`.
    #[arg(short = 'c', long = "client", value_name = "REMOTE")]
    pub client: Option<String>,

    /// Base address of the tunnel's /24 address block.
    #[arg(short = 'a', long = "address", default_value = DEFAULT_TUNNEL_BLOCK)]
    pub tunnel_block: Ipv4Addr,

    /// Netmask applied to the tunnel interface.
    #[arg(short = 'm', long = "netmask", default_value = DEFAULT_TUNNEL_NETMASK)]
    pub tunnel_netmask: Ipv4Addr,

    /// Maximum transmission unit of the tunnel interface.
    #[arg(short = 'l', long = "mtu", default_value_t = DEFAULT_MTU)]
    pub mtu: u16,

    /// Name of the TUN interface to create or attach to.
    #[arg(short = 'i', long = "interface")]
    pub interface: Option<String>,

    /// Leave the TUN device attached after the process exits
    /// (`TUNSETPERSIST`, Linux only).
    #[arg(short = 'p', long = "persistent")]
    pub persistent: bool,

    /// Run a loopback smoke test instead of opening a real TUN device.
    #[arg(short = 'd', long = "debug")]
    pub debug: bool,
}

#[derive(Debug)]
pub enum ModeOptions {
    Server { bind: Option<std::net::SocketAddr> },
    Client { remote: std::net::SocketAddr },
}

impl StartupOptions {
    /// Validates the raw CLI input and resolves it into a concrete mode,
    /// matching `parse_startup_options`'s checks: `-s`/`-c` are mutually
    /// exclusive and exactly one is required, the MTU must be at least
    /// [`MIN_MTU`], and the interface name (if given) must fit a kernel
    /// `ifreq`.
    pub fn resolve(&self) -> crate::Result<ModeOptions> {
        if self.server.is_some() && self.client.is_some() {
            return Err("--server and --client are mutually exclusive".into());
        }
        if self.mtu < MIN_MTU {
            return Err(format!("mtu must be at least {MIN_MTU}").into());
        }
        if let Some(name) = &self.interface
            && name.len() > MAX_INTERFACE_NAME_LEN
        {
            return Err(format!("interface name must be at most {MAX_INTERFACE_NAME_LEN} characters").into());
        }

        match (&self.server, &self.client) {
            (Some(bind), None) => {
                let bind = match bind {
                    Some(addr) => Some(addr.parse().map_err(|_| "invalid bind address")?),
                    None => None,
                };
                Ok(ModeOptions::Server { bind })
            }
            (None, Some(remote)) => {
                let remote = remote.parse().map_err(|_| "invalid remote address")?;
                Ok(ModeOptions::Client { remote })
            }
            _ => Err("one of --server or --client is required".into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn parse(args: &[&str]) -> StartupOptions {
        let mut full = vec!["rustun"];
        full.extend_from_slice(args);
        StartupOptions::parse_from(full)
    }

    #[test]
    fn server_and_client_together_is_rejected() {
        let opts = parse(&["--server", "--client", "1.2.3.4:9"]);
        assert!(opts.resolve().is_err());
    }

    #[test]
    fn neither_mode_is_rejected() {
        let opts = parse(&[]);
        assert!(opts.resolve().is_err());
    }

    #[test]
    fn client_requires_valid_address() {
        let opts = parse(&["--client", "1.2.3.4:9000"]);
        match opts.resolve().unwrap() {
            ModeOptions::Client { remote } => assert_eq!(remote.port(), 9000),
            _ => panic!("expected client mode"),
        }
    }

    #[test]
    fn mtu_below_minimum_is_rejected() {
        let opts = parse(&["--server", "--mtu", "500"]);
        assert!(opts.resolve().is_err());
    }

    #[test]
    fn interface_name_too_long_is_rejected() {
        let opts = parse(&["--server", "--interface", "this-name-is-way-too-long"]);
        assert!(opts.resolve().is_err());
    }

    #[test]
    fn server_without_bind_address_is_allowed() {
        let opts = parse(&["--server"]);
        match opts.resolve().unwrap() {
            ModeOptions::Server { bind } => assert!(bind.is_none()),
            _ => panic!("expected server mode"),
        }
    }
}
