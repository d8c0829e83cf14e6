//! Rendezvous and relay for two-peer WebRTC signaling.
//!
//! Peers connect over WebSocket, `join` a shared address, receive `ready` with
//! an initiator/polite role once both seats are taken, and from then on have
//! their negotiation traffic relayed verbatim. One coordinator task owns every
//! session; liveness sweeps and grace timers feed it events like any peer does.

pub mod cli;
pub mod config;
pub mod coordinator;
pub mod liveness;
pub mod registry;
pub mod relay;
pub mod server;
pub mod signaling;
pub mod table;
pub mod teardown;
pub mod telemetry;
pub mod websocket;

pub use config::{Cli, Commands, ServerConfig};
pub use coordinator::{Coordinator, CoordinatorHandle, CoordinatorSettings, Event, Snapshot};
pub use registry::{Connection, ConnectionId, Outbound};
pub use signaling::{ClientMessage, RelayTypes, Role, ServerMessage};
