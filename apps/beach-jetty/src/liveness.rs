use std::time::Duration;

use metrics::{counter, gauge};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

use crate::coordinator::{Coordinator, Event, CLOSE_GOING_AWAY};
use crate::registry::ConnectionId;
use crate::teardown::CollapseReason;

/// Ask the coordinator to sweep once per `interval`. The first sweep happens
/// one full interval after start-up.
pub fn spawn_heartbeat(interval: Duration, events: mpsc::Sender<Event>) -> JoinHandle<()> {
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    tokio::spawn(async move {
        loop {
            ticker.tick().await;
            if events.send(Event::Sweep).await.is_err() {
                debug!("coordinator gone; heartbeat stopped");
                break;
            }
        }
    })
}

impl Coordinator {
    /// Evaluate the window that just ended and probe for the next one.
    ///
    /// Connections that never answered are closed, their session is collapsed
    /// with `heartbeat_timeout` and they are dropped from the registry.
    pub(crate) fn sweep(&mut self) -> Vec<ConnectionId> {
        let stale = self.registry.sweep();
        for id in &stale {
            warn!(connection_id = %id, "heartbeat timeout; closing connection");
            counter!("beach_jetty_heartbeat_timeouts_total", 1);
            self.registry.close(*id, CLOSE_GOING_AWAY, "heartbeat_timeout");
            self.collapse(*id, CollapseReason::HeartbeatTimeout);
            self.registry.deregister(*id);
        }

        if !stale.is_empty() {
            gauge!("beach_jetty_connections_active", self.registry.len() as f64);
        }
        debug!(
            connections = self.registry.len(),
            sessions = self.table.len(),
            stale = stale.len(),
            "heartbeat sweep complete"
        );
        stale
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::tests::{drain, frames, Harness};
    use crate::registry::Outbound;
    use serde_json::json;

    #[test_timeout::tokio_timeout_test(paused)]
    async fn silent_occupant_times_out_after_two_sweeps() {
        let mut h = Harness::new();
        let (x, mut x_rx) = h.connect();
        h.send(x, json!({"type": "join", "address": "Z1"}));

        assert!(h.coordinator.sweep().is_empty());
        assert_eq!(drain(&mut x_rx), vec![Outbound::Probe]);

        assert_eq!(h.coordinator.sweep(), vec![x]);
        assert_eq!(
            drain(&mut x_rx),
            vec![Outbound::Close {
                code: CLOSE_GOING_AWAY,
                reason: "heartbeat_timeout"
            }]
        );
        let snapshot = h.coordinator.snapshot();
        assert!(snapshot.sessions.is_empty());
        assert_eq!(snapshot.connections, 0);
    }

    #[test_timeout::tokio_timeout_test(paused)]
    async fn backlogged_connection_is_still_evicted() {
        let mut h = Harness::new();
        let (x, mut x_rx) = h.connect_with_depth(4);
        for _ in 0..4 {
            h.send(x, json!({"type": "ping"}));
        }

        assert!(h.coordinator.sweep().is_empty(), "probe does not fit");
        assert!(!h.evicted(x));
        assert_eq!(h.coordinator.sweep(), vec![x]);

        // The close frame had no room; the eviction still reaches the transport.
        let queued = drain(&mut x_rx);
        assert_eq!(queued.len(), 4);
        assert!(queued.iter().all(|item| matches!(item, Outbound::Frame(_))));
        assert!(h.evicted(x));
        assert_eq!(h.coordinator.snapshot().connections, 0);
    }

    #[test_timeout::tokio_timeout_test(paused)]
    async fn timeout_notifies_surviving_peer() {
        let mut h = Harness::new();
        let (x, mut x_rx) = h.connect();
        let (y, mut y_rx) = h.connect();
        h.pair("ABCD", x, y);
        frames(&mut x_rx);
        frames(&mut y_rx);

        h.coordinator.sweep();
        h.coordinator.handle(Event::Alive(x));
        assert_eq!(h.coordinator.sweep(), vec![y]);

        assert_eq!(
            frames(&mut x_rx),
            vec![json!({"type": "collapse", "reason": "heartbeat_timeout"})]
        );
        assert!(frames(&mut y_rx).is_empty());
        assert!(h.coordinator.snapshot().sessions.is_empty());

        // The late socket close for y is a no-op.
        h.coordinator.handle(Event::Disconnected(y));
        assert!(frames(&mut x_rx).is_empty());
    }

    #[test_timeout::tokio_timeout_test(paused)]
    async fn heartbeat_messages_refresh_liveness() {
        let mut h = Harness::new();
        let (x, mut x_rx) = h.connect();

        for _ in 0..4 {
            assert!(h.coordinator.sweep().is_empty());
            h.send(x, json!({"type": "heartbeat"}));
        }
        assert!(drain(&mut x_rx).contains(&Outbound::Probe));
    }

    #[test_timeout::tokio_timeout_test(paused)]
    async fn ticker_requests_sweeps_each_interval() {
        let (tx, mut rx) = mpsc::channel(4);
        let ticker = spawn_heartbeat(Duration::from_secs(25), tx);

        tokio::time::advance(Duration::from_secs(24)).await;
        assert!(rx.try_recv().is_err());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert!(matches!(rx.recv().await, Some(Event::Sweep)));

        tokio::time::advance(Duration::from_secs(25)).await;
        assert!(matches!(rx.recv().await, Some(Event::Sweep)));
        ticker.abort();
    }
}
