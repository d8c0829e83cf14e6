use std::collections::HashMap;
use std::fmt;

use metrics::counter;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::oneshot;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::signaling::{Frame, ServerMessage};
use crate::table::SessionKey;

/// Identifier minted when the transport accepts a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// What the writer task of a connection should put on the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Frame(Frame),
    /// Transport-level liveness probe (a WebSocket ping).
    Probe,
    /// Close the channel with the given code and reason.
    Close { code: u16, reason: &'static str },
}

/// Resolves once the core has dropped the connection. The transport must tear
/// the socket down then, even if the close frame never made it into the queue.
pub type Eviction = oneshot::Receiver<()>;

/// Handle the transport gives the core for a freshly accepted channel.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    sender: mpsc::Sender<Outbound>,
    evict: oneshot::Sender<()>,
}

impl Connection {
    pub fn new(sender: mpsc::Sender<Outbound>) -> (Self, Eviction) {
        let (evict, eviction) = oneshot::channel();
        let connection = Self {
            id: ConnectionId::new(),
            sender,
            evict,
        };
        (connection, eviction)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

#[derive(Debug)]
struct ConnectionRecord {
    sender: mpsc::Sender<Outbound>,
    // Never sent on; dropping the record is what resolves the eviction.
    _evict: oneshot::Sender<()>,
    alive: bool,
    session: Option<SessionKey>,
}

/// Live connections keyed by identifier, with their liveness flag and the
/// session they sit in.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: HashMap<ConnectionId, ConnectionRecord>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// New connections start fresh, so they get a full interval before the
    /// first probe can count against them.
    pub fn register(&mut self, connection: Connection) -> ConnectionId {
        let Connection { id, sender, evict } = connection;
        self.connections.insert(
            id,
            ConnectionRecord {
                sender,
                _evict: evict,
                alive: true,
                session: None,
            },
        );
        id
    }

    /// Forget the connection and evict its transport.
    pub fn deregister(&mut self, id: ConnectionId) -> Option<SessionKey> {
        self.connections.remove(&id).and_then(|record| record.session)
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Mark the connection as having answered the current probe window.
    pub fn touch(&mut self, id: ConnectionId) -> bool {
        match self.connections.get_mut(&id) {
            Some(record) => {
                record.alive = true;
                true
            }
            None => false,
        }
    }

    /// Close the previous probe window and open the next one.
    ///
    /// Returns every connection that was not touched since the last sweep, plus
    /// any whose channel is already gone. Everyone else is reset to unconfirmed
    /// and probed. Stale connections are not probed; the caller tears them down.
    pub fn sweep(&mut self) -> Vec<ConnectionId> {
        let mut stale = Vec::new();
        for (id, record) in self.connections.iter_mut() {
            if !record.alive || record.sender.is_closed() {
                stale.push(*id);
                continue;
            }
            record.alive = false;
            if let Err(TrySendError::Closed(_)) = record.sender.try_send(Outbound::Probe) {
                stale.push(*id);
            }
        }
        stale.sort();
        stale
    }

    pub fn session_of(&self, id: ConnectionId) -> Option<&SessionKey> {
        self.connections
            .get(&id)
            .and_then(|record| record.session.as_ref())
    }

    pub fn set_session(&mut self, id: ConnectionId, session: Option<SessionKey>) {
        if let Some(record) = self.connections.get_mut(&id) {
            record.session = session;
        }
    }

    /// Queue a frame for the connection. Unknown, closed or congested
    /// connections swallow the frame; the return value only says whether it
    /// was queued.
    pub fn send(&self, id: ConnectionId, outbound: Outbound) -> bool {
        let Some(record) = self.connections.get(&id) else {
            debug!(connection_id = %id, "dropping frame for unknown connection");
            counter!("beach_jetty_send_dropped_total", 1, "reason" => "unknown");
            return false;
        };

        match record.sender.try_send(outbound) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(connection_id = %id, "outbound queue full; dropping frame");
                counter!("beach_jetty_send_dropped_total", 1, "reason" => "full");
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!(connection_id = %id, "dropping frame for closed connection");
                counter!("beach_jetty_send_dropped_total", 1, "reason" => "closed");
                false
            }
        }
    }

    pub fn send_message(&self, id: ConnectionId, message: &ServerMessage) -> bool {
        match message.to_frame() {
            Ok(frame) => self.send(id, Outbound::Frame(frame)),
            Err(err) => {
                warn!(connection_id = %id, error = %err, kind = message.kind(), "failed to encode message");
                false
            }
        }
    }

    pub fn close(&self, id: ConnectionId, code: u16, reason: &'static str) -> bool {
        self.send(id, Outbound::Close { code, reason })
    }
}
