//! The single task that owns every session and connection record.
//!
//! Transport tasks and timers talk to it only through [`Event`]s, so each event
//! is applied to the registry and table before the next one is looked at. Two
//! peers racing for the last seat of a session are linearised by the channel.

use std::time::Duration;

use metrics::{counter, gauge};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::registry::{Connection, ConnectionId, ConnectionRegistry, Outbound};
use crate::relay::{
    DropReason, RelayEngine, RelayOutcome, Relayable, DEFAULT_MAX_PENDING_CANDIDATES,
};
use crate::signaling::{ClientMessage, Role, ServerMessage};
use crate::table::{JoinOutcome, SessionKey, SessionTable};
use crate::teardown::CollapseReason;

/// Close code sent with a rejection (1008, policy violation).
pub const CLOSE_POLICY: u16 = 1008;
/// Close code sent to connections dropped by the liveness sweep (1001, going away).
pub const CLOSE_GOING_AWAY: u16 = 1001;

#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub obstruction_grace: Duration,
    pub max_grace: Duration,
    pub max_pending_candidates: usize,
    pub max_address_len: usize,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            obstruction_grace: Duration::from_secs(10),
            max_grace: Duration::from_secs(60),
            max_pending_candidates: DEFAULT_MAX_PENDING_CANDIDATES,
            max_address_len: 128,
        }
    }
}

impl CoordinatorSettings {
    /// Peers may ask for a specific grace window, capped at `max_grace`.
    pub fn grace_for(&self, requested_secs: Option<u64>) -> Duration {
        match requested_secs {
            Some(secs) if secs > 0 => Duration::from_secs(secs).min(self.max_grace),
            _ => self.obstruction_grace,
        }
    }
}

#[derive(Debug)]
pub enum Event {
    Connected(Connection),
    Inbound {
        connection: ConnectionId,
        message: ClientMessage,
    },
    /// Transport-level pong, or any other proof of life without a payload.
    Alive(ConnectionId),
    Disconnected(ConnectionId),
    Sweep,
    GraceElapsed {
        connection: ConnectionId,
        generation: u64,
    },
}

pub struct Coordinator {
    pub(crate) registry: ConnectionRegistry,
    pub(crate) table: SessionTable,
    pub(crate) relay: RelayEngine,
    pub(crate) settings: CoordinatorSettings,
    pub(crate) events: mpsc::Sender<Event>,
    pub(crate) generation: u64,
}

impl Coordinator {
    /// `events` is where timers report back; it should feed [`Coordinator::run`].
    pub fn new(settings: CoordinatorSettings, events: mpsc::Sender<Event>) -> Self {
        Self {
            registry: ConnectionRegistry::new(),
            table: SessionTable::new(),
            relay: RelayEngine::new(settings.max_pending_candidates),
            settings,
            events,
            generation: 0,
        }
    }

    pub async fn run(mut self, mut events: mpsc::Receiver<Event>) {
        while let Some(event) = events.recv().await {
            self.handle(event);
        }
        debug!("coordinator event channel closed");
    }

    pub fn handle(&mut self, event: Event) {
        match event {
            Event::Connected(connection) => self.on_connected(connection),
            Event::Inbound {
                connection,
                message,
            } => self.on_inbound(connection, message),
            Event::Alive(connection) => {
                self.registry.touch(connection);
            }
            Event::Disconnected(connection) => self.on_disconnected(connection),
            Event::Sweep => {
                self.sweep();
            }
            Event::GraceElapsed {
                connection,
                generation,
            } => {
                self.grace_elapsed(connection, generation);
            }
        }
    }

    fn on_connected(&mut self, connection: Connection) {
        let id = self.registry.register(connection);
        debug!(connection_id = %id, "connection registered");
        counter!("beach_jetty_connections_total", 1);
        gauge!("beach_jetty_connections_active", self.registry.len() as f64);
    }

    fn on_disconnected(&mut self, connection: ConnectionId) {
        self.collapse(connection, CollapseReason::PeerLost);
        if self.registry.contains(connection) {
            self.registry.deregister(connection);
            debug!(connection_id = %connection, "connection deregistered");
        }
        gauge!("beach_jetty_connections_active", self.registry.len() as f64);
    }

    fn on_inbound(&mut self, connection: ConnectionId, message: ClientMessage) {
        if !self.registry.touch(connection) {
            debug!(connection_id = %connection, "message from unknown connection dropped");
            return;
        }

        match message {
            ClientMessage::Join { address } => self.join(connection, address),
            ClientMessage::Descriptor { kind, frame } => {
                self.relay_payload(connection, Relayable::Descriptor(kind, frame))
            }
            ClientMessage::Candidate { frame } => {
                self.relay_payload(connection, Relayable::Candidate(frame))
            }
            ClientMessage::Relay { kind, frame } => {
                debug!(connection_id = %connection, kind = %kind, "relaying free-form payload");
                self.relay_payload(connection, Relayable::Opaque(frame))
            }
            ClientMessage::Heartbeat { foreground } => {
                self.registry.send_message(connection, &ServerMessage::Pong);
                match foreground {
                    Some(false) => {
                        self.obstruct(connection, "backgrounded".to_string(), None);
                    }
                    Some(true) => {
                        self.restore(connection, "foregrounded".to_string());
                    }
                    None => {}
                }
            }
            ClientMessage::PeerObstructed { reason, seconds } => {
                let Some(peer) = self.peer_of(connection) else {
                    debug!(connection_id = %connection, "peer_obstructed without a peer ignored");
                    return;
                };
                let reason = reason.unwrap_or_else(|| "peer_reported".to_string());
                self.obstruct(peer, reason, seconds);
            }
            ClientMessage::PeerRestored { reason } => {
                let reason = reason.unwrap_or_else(|| "restored".to_string());
                let target = match self.peer_of(connection) {
                    Some(peer) if self.is_obstructed(peer) => peer,
                    _ => connection,
                };
                self.restore(target, reason);
            }
            ClientMessage::Collapse { reason } => {
                let reason = reason.unwrap_or_else(|| "peer_collapsed".to_string());
                self.collapse(connection, CollapseReason::Requested(reason));
            }
            ClientMessage::Unrecognized { kind } => {
                debug!(connection_id = %connection, kind = %kind, "ignoring unrecognized message type");
            }
        }
    }

    fn join(&mut self, connection: ConnectionId, address: String) {
        if address.is_empty() || address.len() > self.settings.max_address_len {
            debug!(
                connection_id = %connection,
                len = address.len(),
                "join with invalid address dropped"
            );
            return;
        }

        if let Some(current) = self.registry.session_of(connection) {
            if current.as_str() == address {
                debug!(connection_id = %connection, address = %address, "duplicate join ignored");
            } else {
                warn!(
                    connection_id = %connection,
                    current = %current,
                    requested = %address,
                    "join for a second session ignored"
                );
            }
            return;
        }

        let key = SessionKey::new(address);
        match self.table.join(&key, connection) {
            JoinOutcome::Seated { role } => {
                self.registry.set_session(connection, Some(key.clone()));
                info!(
                    connection_id = %connection,
                    address = %key,
                    role = role.as_str(),
                    "seated; waiting for peer"
                );
                gauge!("beach_jetty_sessions_active", self.table.len() as f64);
            }
            JoinOutcome::Paired { role, peer } => {
                self.registry.set_session(connection, Some(key.clone()));
                let peer_role = match role {
                    Role::Initiator => Role::Polite,
                    Role::Polite => Role::Initiator,
                };
                self.registry.send_message(
                    peer,
                    &ServerMessage::Ready {
                        role: peer_role,
                        address: key.to_string(),
                    },
                );
                self.registry.send_message(
                    connection,
                    &ServerMessage::Ready {
                        role,
                        address: key.to_string(),
                    },
                );
                info!(
                    connection_id = %connection,
                    peer_id = %peer,
                    address = %key,
                    "session paired"
                );
                counter!("beach_jetty_pairings_total", 1);
            }
            JoinOutcome::AlreadySeated => {
                debug!(connection_id = %connection, address = %key, "already seated");
            }
            JoinOutcome::Rejected { reason } => {
                warn!(
                    connection_id = %connection,
                    address = %key,
                    reason = reason.as_str(),
                    "join rejected"
                );
                counter!("beach_jetty_joins_rejected_total", 1, "reason" => reason.as_str());
                self.registry.send_message(
                    connection,
                    &ServerMessage::Rejected {
                        reason: reason.as_str().to_string(),
                    },
                );
                self.registry.close(connection, CLOSE_POLICY, reason.as_str());
            }
        }
    }

    fn relay_payload(&mut self, connection: ConnectionId, payload: Relayable) {
        let label = payload.metric_label();
        let outcome = match self.registry.session_of(connection) {
            Some(key) => match self.table.get_mut(key.as_str()) {
                Some(session) => self.relay.relay(session, connection, payload),
                None => RelayOutcome::Dropped(DropReason::NotSeated),
            },
            None => RelayOutcome::Dropped(DropReason::NotSeated),
        };

        match outcome {
            RelayOutcome::Delivered(deliveries) => {
                counter!(
                    "beach_jetty_relayed_total",
                    deliveries.len() as u64,
                    "kind" => label
                );
                for delivery in deliveries {
                    self.registry.send(delivery.to, Outbound::Frame(delivery.frame));
                }
            }
            RelayOutcome::Buffered { pending } => {
                debug!(connection_id = %connection, pending, "candidate buffered");
                counter!("beach_jetty_candidates_buffered_total", 1);
            }
            RelayOutcome::Dropped(DropReason::QueueFull) => {
                warn!(connection_id = %connection, "candidate outbox full; dropping candidate");
                counter!("beach_jetty_candidates_dropped_total", 1);
            }
            RelayOutcome::Dropped(reason) => {
                debug!(
                    connection_id = %connection,
                    kind = label,
                    reason = reason.as_str(),
                    "payload dropped"
                );
            }
        }
    }

    pub(crate) fn peer_of(&self, connection: ConnectionId) -> Option<ConnectionId> {
        let key = self.registry.session_of(connection)?;
        self.table.get(key.as_str())?.peer_of(connection)
    }

    pub fn snapshot(&self) -> Snapshot {
        let mut sessions: Vec<SessionSnapshot> = self
            .table
            .iter()
            .map(|session| SessionSnapshot {
                address: session.key().to_string(),
                occupants: session
                    .occupants()
                    .map(|(slot, occupant)| OccupantSnapshot {
                        connection: occupant.id(),
                        role: slot.role(),
                        descriptor_sent: occupant.descriptor_sent(),
                        pending_candidates: occupant.pending_candidates(),
                        obstructed: occupant.is_obstructed(),
                        grace_remaining: occupant.grace_remaining(),
                    })
                    .collect(),
            })
            .collect();
        sessions.sort_by(|a, b| a.address.cmp(&b.address));

        Snapshot {
            connections: self.registry.len(),
            sessions,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub connections: usize,
    pub sessions: Vec<SessionSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub address: String,
    pub occupants: Vec<OccupantSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OccupantSnapshot {
    pub connection: ConnectionId,
    pub role: Role,
    pub descriptor_sent: bool,
    pub pending_candidates: usize,
    pub obstructed: bool,
    pub grace_remaining: Option<Duration>,
}

/// Cloneable front door to a running [`Coordinator`].
#[derive(Clone)]
pub struct CoordinatorHandle {
    events: mpsc::Sender<Event>,
}

impl CoordinatorHandle {
    pub fn spawn(settings: CoordinatorSettings, capacity: usize) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity);
        let coordinator = Coordinator::new(settings, tx.clone());
        let task = tokio::spawn(coordinator.run(rx));
        (Self { events: tx }, task)
    }

    pub fn events(&self) -> mpsc::Sender<Event> {
        self.events.clone()
    }

    async fn submit(&self, event: Event) -> bool {
        self.events.send(event).await.is_ok()
    }

    pub async fn connected(&self, connection: Connection) -> bool {
        self.submit(Event::Connected(connection)).await
    }

    pub async fn inbound(&self, connection: ConnectionId, message: ClientMessage) -> bool {
        self.submit(Event::Inbound {
            connection,
            message,
        })
        .await
    }

    pub async fn alive(&self, connection: ConnectionId) -> bool {
        self.submit(Event::Alive(connection)).await
    }

    pub async fn disconnected(&self, connection: ConnectionId) -> bool {
        self.submit(Event::Disconnected(connection)).await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::registry::Eviction;
    use crate::signaling::{decode_text, RelayTypes};
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use tokio::sync::oneshot::error::TryRecvError;

    pub(crate) struct Harness {
        pub(crate) coordinator: Coordinator,
        events: mpsc::Receiver<Event>,
        relay_types: RelayTypes,
        evictions: HashMap<ConnectionId, Eviction>,
    }

    impl Harness {
        pub(crate) fn new() -> Self {
            Self::with_settings(CoordinatorSettings::default())
        }

        pub(crate) fn with_settings(settings: CoordinatorSettings) -> Self {
            let (tx, rx) = mpsc::channel(64);
            Self {
                coordinator: Coordinator::new(settings, tx),
                events: rx,
                relay_types: RelayTypes::default(),
                evictions: HashMap::new(),
            }
        }

        pub(crate) fn connect(&mut self) -> (ConnectionId, mpsc::Receiver<Outbound>) {
            self.connect_with_depth(64)
        }

        pub(crate) fn connect_with_depth(
            &mut self,
            depth: usize,
        ) -> (ConnectionId, mpsc::Receiver<Outbound>) {
            let (tx, rx) = mpsc::channel(depth);
            let (connection, eviction) = Connection::new(tx);
            let id = connection.id();
            self.evictions.insert(id, eviction);
            self.coordinator.handle(Event::Connected(connection));
            (id, rx)
        }

        /// Whether the coordinator has let go of the connection's transport.
        pub(crate) fn evicted(&mut self, id: ConnectionId) -> bool {
            self.evictions
                .get_mut(&id)
                .map(|eviction| !matches!(eviction.try_recv(), Err(TryRecvError::Empty)))
                .unwrap_or(false)
        }

        pub(crate) fn send(&mut self, connection: ConnectionId, value: Value) {
            let message = decode_text(&value.to_string(), &self.relay_types)
                .expect("test frames decode");
            self.coordinator.handle(Event::Inbound {
                connection,
                message,
            });
        }

        pub(crate) fn pair(&mut self, address: &str, first: ConnectionId, second: ConnectionId) {
            self.send(first, json!({"type": "join", "address": address}));
            self.send(second, json!({"type": "join", "address": address}));
        }

        /// Wait for the next timer event and apply it.
        pub(crate) async fn next_event(&mut self) {
            let event = self.events.recv().await.expect("event channel open");
            self.coordinator.handle(event);
        }

        /// Apply whatever timer events are already queued, without waiting.
        pub(crate) async fn drain_events(&mut self) {
            tokio::task::yield_now().await;
            while let Ok(event) = self.events.try_recv() {
                self.coordinator.handle(event);
            }
        }
    }

    pub(crate) fn drain(rx: &mut mpsc::Receiver<Outbound>) -> Vec<Outbound> {
        let mut out = Vec::new();
        while let Ok(item) = rx.try_recv() {
            out.push(item);
        }
        out
    }

    /// JSON frames queued for a connection; probes and close frames are skipped.
    pub(crate) fn frames(rx: &mut mpsc::Receiver<Outbound>) -> Vec<Value> {
        drain(rx)
            .into_iter()
            .filter_map(|item| match item {
                Outbound::Frame(frame) => {
                    Some(serde_json::from_str(&frame).expect("frames are JSON"))
                }
                _ => None,
            })
            .collect()
    }

    #[test_timeout::tokio_timeout_test]
    async fn first_join_is_silent_second_join_readies_both() {
        let mut h = Harness::new();
        let (x, mut x_rx) = h.connect();
        let (y, mut y_rx) = h.connect();

        h.send(x, json!({"type": "join", "address": "ABCD"}));
        assert!(frames(&mut x_rx).is_empty());
        let snapshot = h.coordinator.snapshot();
        assert_eq!(snapshot.sessions.len(), 1);
        assert_eq!(snapshot.sessions[0].occupants.len(), 1);
        assert_eq!(snapshot.sessions[0].occupants[0].connection, x);

        h.send(y, json!({"type": "join", "address": "ABCD"}));
        assert_eq!(
            frames(&mut x_rx),
            vec![json!({"type": "ready", "role": "initiator", "address": "ABCD"})]
        );
        assert_eq!(
            frames(&mut y_rx),
            vec![json!({"type": "ready", "role": "polite", "address": "ABCD"})]
        );
    }

    #[test_timeout::tokio_timeout_test]
    async fn third_join_is_rejected_and_closed() {
        let mut h = Harness::new();
        let (x, mut x_rx) = h.connect();
        let (y, mut y_rx) = h.connect();
        let (z, mut z_rx) = h.connect();
        h.pair("ABCD", x, y);
        frames(&mut x_rx);
        frames(&mut y_rx);

        h.send(z, json!({"type": "join", "address": "ABCD"}));
        assert_eq!(
            drain(&mut z_rx),
            vec![
                Outbound::Frame(
                    ServerMessage::Rejected {
                        reason: "session_full".into()
                    }
                    .to_frame()
                    .unwrap()
                ),
                Outbound::Close {
                    code: CLOSE_POLICY,
                    reason: "session_full"
                },
            ]
        );
        assert!(frames(&mut x_rx).is_empty(), "ready is not re-emitted");
        assert!(frames(&mut y_rx).is_empty(), "ready is not re-emitted");

        let snapshot = h.coordinator.snapshot();
        let session = &snapshot.sessions[0];
        let seated: Vec<_> = session.occupants.iter().map(|o| o.connection).collect();
        assert_eq!(seated, vec![x, y]);

        // The rejected socket closing must not disturb the session.
        h.coordinator.handle(Event::Disconnected(z));
        assert!(frames(&mut x_rx).is_empty());
        assert_eq!(h.coordinator.snapshot().sessions.len(), 1);
    }

    #[test_timeout::tokio_timeout_test]
    async fn second_membership_is_refused() {
        let mut h = Harness::new();
        let (x, mut x_rx) = h.connect();

        h.send(x, json!({"type": "join", "address": "one"}));
        h.send(x, json!({"type": "join", "address": "two"}));
        h.send(x, json!({"type": "join", "address": "one"}));

        let snapshot = h.coordinator.snapshot();
        assert_eq!(snapshot.sessions.len(), 1);
        assert_eq!(snapshot.sessions[0].address, "one");
        assert!(frames(&mut x_rx).is_empty());
    }

    #[test_timeout::tokio_timeout_test]
    async fn invalid_addresses_are_dropped() {
        let mut h = Harness::with_settings(CoordinatorSettings {
            max_address_len: 4,
            ..CoordinatorSettings::default()
        });
        let (x, _x_rx) = h.connect();

        h.send(x, json!({"type": "join", "address": ""}));
        h.send(x, json!({"type": "join", "address": "toolong"}));
        assert!(h.coordinator.snapshot().sessions.is_empty());

        h.send(x, json!({"type": "join", "address": "ok"}));
        assert_eq!(h.coordinator.snapshot().sessions.len(), 1);
    }

    #[test_timeout::tokio_timeout_test]
    async fn offer_releases_early_candidates_then_disconnect_collapses() {
        let mut h = Harness::new();
        let (x, mut x_rx) = h.connect();
        let (y, mut y_rx) = h.connect();
        h.pair("ABCD", x, y);
        frames(&mut x_rx);
        frames(&mut y_rx);

        h.send(x, json!({"type": "ice", "candidate": "c1"}));
        assert!(frames(&mut y_rx).is_empty());
        assert_eq!(h.coordinator.snapshot().sessions[0].occupants[0].pending_candidates, 1);

        h.send(x, json!({"type": "offer", "sdp": "v=0"}));
        assert_eq!(
            frames(&mut y_rx),
            vec![
                json!({"type": "offer", "sdp": "v=0"}),
                json!({"type": "ice", "candidate": "c1"}),
            ]
        );

        h.coordinator.handle(Event::Disconnected(y));
        assert_eq!(
            frames(&mut x_rx),
            vec![json!({"type": "collapse", "reason": "peer_lost"})]
        );
        let snapshot = h.coordinator.snapshot();
        assert!(snapshot.sessions.is_empty());
        assert_eq!(snapshot.connections, 1);

        // The survivor is unseated and may start over.
        h.send(x, json!({"type": "join", "address": "ABCD"}));
        assert_eq!(h.coordinator.snapshot().sessions.len(), 1);
    }

    #[test_timeout::tokio_timeout_test]
    async fn collapse_leaves_other_sessions_untouched() {
        let mut h = Harness::new();
        let (a1, mut a1_rx) = h.connect();
        let (a2, mut a2_rx) = h.connect();
        let (b1, mut b1_rx) = h.connect();
        let (b2, mut b2_rx) = h.connect();
        h.pair("alpha", a1, a2);
        h.pair("beta", b1, b2);
        h.send(b1, json!({"type": "ice", "candidate": "held"}));
        for rx in [&mut a1_rx, &mut a2_rx, &mut b1_rx, &mut b2_rx] {
            frames(rx);
        }
        let beta_before = h
            .coordinator
            .snapshot()
            .sessions
            .into_iter()
            .find(|session| session.address == "beta")
            .expect("beta exists");

        h.coordinator.handle(Event::Disconnected(a2));
        assert_eq!(
            frames(&mut a1_rx),
            vec![json!({"type": "collapse", "reason": "peer_lost"})]
        );
        assert!(frames(&mut b1_rx).is_empty());
        assert!(frames(&mut b2_rx).is_empty());

        let snapshot = h.coordinator.snapshot();
        assert_eq!(snapshot.sessions, vec![beta_before]);

        h.send(b1, json!({"type": "offer", "sdp": "v=0"}));
        assert_eq!(
            frames(&mut b2_rx),
            vec![
                json!({"type": "offer", "sdp": "v=0"}),
                json!({"type": "ice", "candidate": "held"}),
            ]
        );
    }

    #[test_timeout::tokio_timeout_test]
    async fn lone_occupant_disconnect_removes_session() {
        let mut h = Harness::new();
        let (x, _x_rx) = h.connect();
        h.send(x, json!({"type": "join", "address": "Z1"}));

        h.coordinator.handle(Event::Disconnected(x));
        h.coordinator.handle(Event::Disconnected(x));
        let snapshot = h.coordinator.snapshot();
        assert!(snapshot.sessions.is_empty());
        assert_eq!(snapshot.connections, 0);
    }

    #[test_timeout::tokio_timeout_test]
    async fn free_form_relay_preserves_order() {
        let mut h = Harness::new();
        let (x, mut x_rx) = h.connect();
        let (y, mut y_rx) = h.connect();

        h.send(x, json!({"type": "join", "address": "room"}));
        h.send(x, json!({"type": "chat", "body": "lost"}));
        h.send(y, json!({"type": "join", "address": "room"}));
        frames(&mut x_rx);
        frames(&mut y_rx);

        for n in 0..5 {
            h.send(x, json!({"type": "chat", "n": n}));
        }
        let received: Vec<Value> = frames(&mut y_rx);
        assert_eq!(
            received,
            (0..5).map(|n| json!({"type": "chat", "n": n})).collect::<Vec<_>>()
        );
    }

    #[test_timeout::tokio_timeout_test]
    async fn unseated_and_unknown_traffic_is_ignored() {
        let mut h = Harness::new();
        let (x, mut x_rx) = h.connect();

        h.send(x, json!({"type": "offer", "sdp": "v=0"}));
        h.send(x, json!({"type": "ice", "candidate": "c1"}));
        h.send(x, json!({"type": "collapse"}));
        h.send(x, json!({"type": "teleport"}));
        h.send(x, json!({"type": "peer_restored"}));
        assert!(frames(&mut x_rx).is_empty());

        h.coordinator.handle(Event::Inbound {
            connection: ConnectionId::new(),
            message: ClientMessage::Join {
                address: "ghost".into(),
            },
        });
        assert!(h.coordinator.snapshot().sessions.is_empty());
    }

    #[test_timeout::tokio_timeout_test]
    async fn ping_is_answered_with_pong() {
        let mut h = Harness::new();
        let (x, mut x_rx) = h.connect();
        h.send(x, json!({"type": "ping"}));
        assert_eq!(frames(&mut x_rx), vec![json!({"type": "pong"})]);
    }

    #[test_timeout::tokio_timeout_test]
    async fn handle_feeds_running_coordinator() {
        let (handle, task) = CoordinatorHandle::spawn(CoordinatorSettings::default(), 16);
        let (tx, mut rx) = mpsc::channel(8);
        let (connection, _eviction) = Connection::new(tx);
        let id = connection.id();

        assert!(handle.connected(connection).await);
        assert!(
            handle
                .inbound(id, ClientMessage::Heartbeat { foreground: None })
                .await
        );
        let pong = rx.recv().await.expect("pong queued");
        assert_eq!(
            pong,
            Outbound::Frame(ServerMessage::Pong.to_frame().unwrap())
        );
        assert!(handle.disconnected(id).await);
        task.abort();
    }

    #[test_timeout::timeout]
    fn grace_requests_are_clamped() {
        let settings = CoordinatorSettings::default();
        assert_eq!(settings.grace_for(None), Duration::from_secs(10));
        assert_eq!(settings.grace_for(Some(0)), Duration::from_secs(10));
        assert_eq!(settings.grace_for(Some(5)), Duration::from_secs(5));
        assert_eq!(settings.grace_for(Some(600)), Duration::from_secs(60));
    }
}
