//! Runtime configuration of the tunnel server.
//!
//! A hosting application with extra knobs of its own can embed
//! [`ServerConfig`] via `#[clap(flatten)]`.

use std::{net::SocketAddr, time::Duration};

use clap::Parser;
use secrecy::SecretString;

/// The configuration for the tunnel server.
///
/// Every field doubles as a CLI flag and an environment variable.
#[derive(Parser, Debug)]
pub struct ServerConfig {
    /// Address the HTTP listener binds to.
    #[clap(long, env = "TUNNEL_SERVER_BIND_ADDR", default_value = "0.0.0.0:8000")]
    pub bind_addr: SocketAddr,

    /// The secret used to verify kiosk credentials.
    #[clap(long, env = "TUNNEL_SERVER_JWT_SECRET")]
    pub jwt_secret: SecretString,

    /// Max time to wait for a kiosk to answer a tunnelled request.
    ///
    /// Generous because kiosks wait on external payment modules themselves.
    #[clap(
        long,
        env = "TUNNEL_SERVER_KIOSK_RESPONSE_TIMEOUT",
        default_value = "45s",
        value_parser = humantime::parse_duration
    )]
    pub kiosk_response_timeout: Duration,

    /// Allow a second connection from an already-connected kiosk to replace
    /// the existing one. When disabled, the newcomer is rejected while the
    /// existing socket is alive.
    #[clap(long, env = "TUNNEL_SERVER_ALLOW_DUPLICATE_CONNECTIONS")]
    pub allow_duplicate_connections: bool,

    /// Largest WebSocket frame accepted from a kiosk, in bytes (1 MiB).
    #[clap(
        long,
        env = "TUNNEL_SERVER_WS_MAX_MESSAGE_SIZE",
        default_value = "1048576"
    )]
    pub ws_max_message_size: usize,

    /// Interval of the background sweep that reconciles registry status with
    /// the connection table.
    #[clap(
        long,
        env = "TUNNEL_SERVER_STATUS_SWEEP_INTERVAL",
        default_value = "30s",
        value_parser = humantime::parse_duration
    )]
    pub status_sweep_interval: Duration,

    /// How long shutdown waits for background workers before giving up on
    /// them.
    #[clap(
        long,
        env = "TUNNEL_SERVER_MAX_WAIT_TIME_SHUTDOWN",
        default_value = "10s",
        value_parser = humantime::parse_duration
    )]
    pub max_wait_time_shutdown: Duration,
}
