//! Runtime configuration of the kiosk proxy.

use std::{net::SocketAddr, path::PathBuf, time::Duration};

use clap::Parser;
use secrecy::SecretString;

/// The configuration for the kiosk proxy.
///
/// Each field is settable as a CLI flag or through its environment
/// variable.
#[derive(Parser, Debug)]
pub struct ProxyConfig {
    /// The WebSocket URL of the tunnel server (e.g. `wss://example.com/ws`).
    #[clap(long, env = "TUNNEL_PROXY_SERVER_URL")]
    pub server_url: String,

    /// The bearer credential issued for this kiosk.
    #[clap(long, env = "TUNNEL_PROXY_TOKEN")]
    pub token: SecretString,

    /// Path to the routing configuration file.
    #[clap(
        long,
        env = "TUNNEL_PROXY_ROUTING_CONFIG",
        default_value = "routing_config.yaml"
    )]
    pub routing_config: PathBuf,

    /// The bind addr of the loopback health endpoint.
    #[clap(
        long,
        env = "TUNNEL_PROXY_HEALTH_BIND_ADDR",
        default_value = "127.0.0.1:9091"
    )]
    pub health_bind_addr: SocketAddr,

    /// Max time to wait for the WebSocket handshake to complete.
    #[clap(
        long,
        env = "TUNNEL_PROXY_CONNECT_TIMEOUT",
        default_value = "15s",
        value_parser = humantime::parse_duration
    )]
    pub connect_timeout: Duration,

    /// Interval of transport keep-alive pings.
    #[clap(
        long,
        env = "TUNNEL_PROXY_PING_INTERVAL",
        default_value = "20s",
        value_parser = humantime::parse_duration
    )]
    pub ping_interval: Duration,

    /// Max time to wait for a pong before the connection counts as stale.
    #[clap(
        long,
        env = "TUNNEL_PROXY_PONG_TIMEOUT",
        default_value = "10s",
        value_parser = humantime::parse_duration
    )]
    pub pong_timeout: Duration,

    /// Initial reconnect delay. Doubles on each consecutive failure.
    #[clap(
        long,
        env = "TUNNEL_PROXY_RECONNECT_MIN_DELAY",
        default_value = "1s",
        value_parser = humantime::parse_duration
    )]
    pub reconnect_min_delay: Duration,

    /// Upper bound of the reconnect delay.
    #[clap(
        long,
        env = "TUNNEL_PROXY_RECONNECT_MAX_DELAY",
        default_value = "60s",
        value_parser = humantime::parse_duration
    )]
    pub reconnect_max_delay: Duration,

    /// Interval of the periodic statistics log line.
    #[clap(
        long,
        env = "TUNNEL_PROXY_STATS_INTERVAL",
        default_value = "1h",
        value_parser = humantime::parse_duration
    )]
    pub stats_interval: Duration,

    /// How long shutdown waits for the health server and stats task before
    /// abandoning them.
    #[clap(
        long,
        env = "TUNNEL_PROXY_MAX_WAIT_TIME_SHUTDOWN",
        default_value = "10s",
        value_parser = humantime::parse_duration
    )]
    pub max_wait_time_shutdown: Duration,
}
