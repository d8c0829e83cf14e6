use std::net::SocketAddr;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use thiserror::Error;

use crate::coordinator::CoordinatorSettings;
use crate::signaling::RelayTypes;

#[derive(Debug, Parser)]
#[command(
    name = "beach-jetty",
    author,
    version,
    about = "Beach Jetty two-peer signaling server and debug client",
    args_conflicts_with_subcommands = true
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    #[command(flatten)]
    pub server: ServerArgs,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Join an address and print every frame the server sends.
    Watch(WatchArgs),
}

#[derive(Debug, Clone, Args)]
pub struct ServerArgs {
    /// Address to bind the websocket listener to.
    #[arg(long, env = "BEACH_JETTY_LISTEN_ADDR", default_value = "0.0.0.0:8080")]
    pub listen_addr: String,

    /// Seconds between liveness sweeps.
    #[arg(long, env = "BEACH_JETTY_HEARTBEAT_INTERVAL_SECS", default_value_t = 25)]
    pub heartbeat_interval_secs: u64,

    /// Default grace window granted to an obstructed peer.
    #[arg(long, env = "BEACH_JETTY_OBSTRUCTION_GRACE_SECS", default_value_t = 10)]
    pub obstruction_grace_secs: u64,

    /// Upper bound for grace windows requested by peers.
    #[arg(long, env = "BEACH_JETTY_MAX_GRACE_SECS", default_value_t = 60)]
    pub max_grace_secs: u64,

    /// Candidates held per peer before its descriptor has been relayed.
    #[arg(long, env = "BEACH_JETTY_MAX_PENDING_CANDIDATES", default_value_t = 256)]
    pub max_pending_candidates: usize,

    /// Frames queued per connection before new ones are dropped.
    #[arg(long, env = "BEACH_JETTY_OUTBOUND_BUFFER", default_value_t = 256)]
    pub outbound_buffer: usize,

    /// Longest accepted session address, in bytes.
    #[arg(long, env = "BEACH_JETTY_MAX_ADDRESS_LEN", default_value_t = 128)]
    pub max_address_len: usize,

    /// Free-form message types relayed verbatim between peers.
    #[arg(
        long,
        env = "BEACH_JETTY_RELAY_TYPES",
        value_delimiter = ',',
        default_value = "text,chat,reaction,cursor,ui"
    )]
    pub relay_types: Vec<String>,

    /// Serve Prometheus metrics on this address.
    #[arg(long, env = "BEACH_JETTY_METRICS_ADDR")]
    pub metrics_addr: Option<String>,

    /// Grace period applied during shutdown.
    #[arg(long, env = "BEACH_JETTY_SHUTDOWN_GRACE_SECS", default_value_t = 2)]
    pub shutdown_grace_secs: u64,
}

#[derive(Debug, Clone, Args)]
pub struct WatchArgs {
    /// Server URL (e.g., ws://localhost:8080)
    #[arg(short, long, default_value = "ws://localhost:8080")]
    pub url: String,

    /// Session address to join
    #[arg(short, long)]
    pub address: String,

    /// Seconds between heartbeats
    #[arg(long, default_value_t = 10)]
    pub heartbeat_secs: u64,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid {field} address `{value}`")]
    InvalidAddr { field: &'static str, value: String },
    #[error("{0} must be greater than zero")]
    Zero(&'static str),
    #[error("max grace ({max}s) is shorter than the default grace ({default}s)")]
    GraceBounds { default: u64, max: u64 },
    #[error("relay type `{0}` collides with a core message type")]
    ShadowedRelayType(String),
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    pub heartbeat_interval: Duration,
    pub obstruction_grace: Duration,
    pub max_grace: Duration,
    pub max_pending_candidates: usize,
    pub outbound_buffer: usize,
    pub max_address_len: usize,
    pub relay_types: RelayTypes,
    pub metrics_addr: Option<SocketAddr>,
    pub shutdown_grace: Duration,
}

impl ServerConfig {
    pub fn coordinator_settings(&self) -> CoordinatorSettings {
        CoordinatorSettings {
            obstruction_grace: self.obstruction_grace,
            max_grace: self.max_grace,
            max_pending_candidates: self.max_pending_candidates,
            max_address_len: self.max_address_len,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            heartbeat_interval: Duration::from_secs(25),
            obstruction_grace: Duration::from_secs(10),
            max_grace: Duration::from_secs(60),
            max_pending_candidates: 256,
            outbound_buffer: 256,
            max_address_len: 128,
            relay_types: RelayTypes::default(),
            metrics_addr: None,
            shutdown_grace: Duration::from_secs(2),
        }
    }
}

fn parse_addr(field: &'static str, value: &str) -> Result<SocketAddr, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidAddr {
        field,
        value: value.to_string(),
    })
}

fn non_zero(field: &'static str, value: u64) -> Result<u64, ConfigError> {
    if value == 0 {
        Err(ConfigError::Zero(field))
    } else {
        Ok(value)
    }
}

impl TryFrom<ServerArgs> for ServerConfig {
    type Error = ConfigError;

    fn try_from(args: ServerArgs) -> Result<Self, Self::Error> {
        let listen_addr = parse_addr("listen", &args.listen_addr)?;
        let metrics_addr = args
            .metrics_addr
            .as_deref()
            .map(|value| parse_addr("metrics", value))
            .transpose()?;

        let heartbeat = non_zero("heartbeat interval", args.heartbeat_interval_secs)?;
        let grace = non_zero("obstruction grace", args.obstruction_grace_secs)?;
        non_zero("outbound buffer", args.outbound_buffer as u64)?;
        non_zero("max address length", args.max_address_len as u64)?;
        if args.max_grace_secs < grace {
            return Err(ConfigError::GraceBounds {
                default: grace,
                max: args.max_grace_secs,
            });
        }

        let relay_types = RelayTypes::new(args.relay_types);
        if let Some(kind) = relay_types.shadowed_core_type() {
            return Err(ConfigError::ShadowedRelayType(kind.to_string()));
        }

        Ok(ServerConfig {
            listen_addr,
            heartbeat_interval: Duration::from_secs(heartbeat),
            obstruction_grace: Duration::from_secs(grace),
            max_grace: Duration::from_secs(args.max_grace_secs),
            max_pending_candidates: args.max_pending_candidates,
            outbound_buffer: args.outbound_buffer,
            max_address_len: args.max_address_len,
            relay_types,
            metrics_addr,
            shutdown_grace: Duration::from_secs(args.shutdown_grace_secs),
        })
    }
}
