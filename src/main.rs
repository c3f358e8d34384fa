use clap::Parser;
use rustun::config::{ModeOptions, StartupOptions};
use rustun::crypto::CryptoConfig;
use rustun::peer::{Endpoint, EndpointConfig, Mode};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

fn init_logging() {
    tracing::subscriber::set_global_default(
        tracing_subscriber::FmtSubscriber::builder()
            .with_env_filter(
                EnvFilter::builder()
                    .with_default_directive(LevelFilter::INFO.into())
                    .from_env_lossy(),
            )
            .with_line_number(true)
            .with_file(true)
            .finish(),
    )
    .expect("logging subscriber already set");
}

/// Runs a server and a client endpoint against each other over loopback,
/// ticking both until the handshake completes or a bounded number of ticks
/// passes. Exercises the same [`Endpoint`] the integration tests drive, for
/// manual smoke testing during development.
fn run_debug_smoke_test() {
    let bind: std::net::SocketAddr = "127.0.0.1:10980".parse().unwrap();

    let server_config = EndpointConfig {
        mode: Mode::Server { bind },
        tunnel_block: "10.9.7.0".parse().unwrap(),
        tunnel_netmask: "255.255.255.0".parse().unwrap(),
        mtu: 1400,
        interface_name: None,
        persistent: false,
        crypto: CryptoConfig::Plain,
        keepalive_timeout: rustun::peer::endpoint::DEFAULT_KEEPALIVE_TIMEOUT,
        connection_timeout: rustun::peer::endpoint::DEFAULT_CONNECTION_TIMEOUT,
        reliable_retry: rustun::peer::endpoint::DEFAULT_RELIABLE_RETRY,
    };
    let client_config = EndpointConfig {
        mode: Mode::Client { remote: bind },
        tunnel_block: "10.9.6.0".parse().unwrap(),
        tunnel_netmask: "255.255.255.0".parse().unwrap(),
        mtu: 1400,
        interface_name: None,
        persistent: false,
        crypto: CryptoConfig::Plain,
        keepalive_timeout: rustun::peer::endpoint::DEFAULT_KEEPALIVE_TIMEOUT,
        connection_timeout: rustun::peer::endpoint::DEFAULT_CONNECTION_TIMEOUT,
        reliable_retry: rustun::peer::endpoint::DEFAULT_RELIABLE_RETRY,
    };

    let mut server = Endpoint::new(server_config).unwrap_or_else(|e| {
        tracing::error!("debug: failed to start server endpoint: {e}");
        std::process::exit(1);
    });
    let mut client = Endpoint::new(client_config).unwrap_or_else(|e| {
        tracing::error!("debug: failed to start client endpoint: {e}");
        std::process::exit(1);
    });

    let max_ticks = 3 * rustun::peer::endpoint::DEFAULT_RELIABLE_RETRY.as_millis() / 10 + 100;
    for _ in 0..max_ticks {
        if let Err(e) = server.tick() {
            tracing::error!("debug: server tick error: {e}");
        }
        if let Err(e) = client.tick() {
            tracing::error!("debug: client tick error: {e}");
        }
        if server.connected_peer_count() == 1 && client.connected_peer_count() == 1 {
            tracing::info!("debug: handshake completed, both endpoints connected");
            return;
        }
        std::thread::sleep(std::time::Duration::from_millis(10));
    }

    tracing::error!("debug: handshake did not complete within the smoke test window");
    std::process::exit(1);
}

fn main() {
    init_logging();

    let options = StartupOptions::parse();
    if options.debug {
        run_debug_smoke_test();
        return;
    }

    let resolved = match options.resolve() {
        Ok(resolved) => resolved,
        Err(e) => {
            tracing::error!("invalid startup options: {e}");
            std::process::exit(1);
        }
    };

    let mode = match resolved {
        ModeOptions::Server { bind } => Mode::Server {
            bind: bind.unwrap_or_else(|| "0.0.0.0:0".parse().unwrap()),
        },
        ModeOptions::Client { remote } => Mode::Client { remote },
    };

    let config = EndpointConfig {
        mode,
        tunnel_block: options.tunnel_block,
        tunnel_netmask: options.tunnel_netmask,
        mtu: options.mtu,
        interface_name: options.interface.clone(),
        persistent: options.persistent,
        crypto: CryptoConfig::Plain,
        keepalive_timeout: rustun::peer::endpoint::DEFAULT_KEEPALIVE_TIMEOUT,
        connection_timeout: rustun::peer::endpoint::DEFAULT_CONNECTION_TIMEOUT,
        reliable_retry: rustun::peer::endpoint::DEFAULT_RELIABLE_RETRY,
    };

    let mut endpoint = match Endpoint::new(config) {
        Ok(endpoint) => endpoint,
        Err(e) => {
            tracing::error!("failed to start tunnel endpoint: {e}");
            std::process::exit(1);
        }
    };

    tracing::info!("tunnel endpoint running");
    loop {
        if let Err(e) = endpoint.tick() {
            tracing::error!("service loop error: {e}");
        }
        std::thread::sleep(std::time::Duration::from_millis(10));
    }
}
