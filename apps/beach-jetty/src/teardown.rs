//! Soft obstruction and hard collapse.
//!
//! An occupant is `stable`, `obstructed` (a grace timer is armed on it) or
//! `gone` (no longer seated). Obstruction is recoverable until the timer fires;
//! collapse is terminal, ends the session for both seats and is idempotent.

use std::time::Duration;

use metrics::{counter, gauge};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::coordinator::{Coordinator, Event};
use crate::registry::ConnectionId;
use crate::signaling::ServerMessage;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollapseReason {
    /// The socket closed or errored.
    PeerLost,
    /// The liveness sweep found the connection unresponsive.
    HeartbeatTimeout,
    /// An obstruction was not restored in time.
    GraceExpired,
    /// The peer sent `collapse` with its own reason.
    Requested(String),
}

impl CollapseReason {
    pub fn as_str(&self) -> &str {
        match self {
            CollapseReason::PeerLost => "peer_lost",
            CollapseReason::HeartbeatTimeout => "heartbeat_timeout",
            CollapseReason::GraceExpired => "grace_expired",
            CollapseReason::Requested(reason) => reason,
        }
    }

    pub fn metric_label(&self) -> &'static str {
        match self {
            CollapseReason::PeerLost => "peer_lost",
            CollapseReason::HeartbeatTimeout => "heartbeat_timeout",
            CollapseReason::GraceExpired => "grace_expired",
            CollapseReason::Requested(_) => "requested",
        }
    }

    /// The obstructed side may still be connected when its grace runs out.
    fn notifies_subject(&self) -> bool {
        matches!(self, CollapseReason::GraceExpired)
    }
}

/// A pending grace countdown on one occupant. Dropping it cancels the countdown.
#[derive(Debug)]
pub struct ObstructionTimer {
    generation: u64,
    armed_at: Instant,
    grace: Duration,
    task: JoinHandle<()>,
}

impl ObstructionTimer {
    pub(crate) fn arm(
        subject: ConnectionId,
        generation: u64,
        grace: Duration,
        events: mpsc::Sender<Event>,
    ) -> Self {
        let armed_at = Instant::now();
        let deadline = armed_at + grace;
        let task = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let _ = events
                .send(Event::GraceElapsed {
                    connection: subject,
                    generation,
                })
                .await;
        });
        Self {
            generation,
            armed_at,
            grace,
            task,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn remaining(&self) -> Duration {
        self.grace.saturating_sub(self.armed_at.elapsed())
    }
}

impl Drop for ObstructionTimer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl Coordinator {
    /// `stable -> obstructed` for `subject`. The subject's counterpart is told
    /// how long the grace window is. Ignored when the subject is unseated,
    /// unpaired or already obstructed.
    pub(crate) fn obstruct(
        &mut self,
        subject: ConnectionId,
        reason: String,
        requested_secs: Option<u64>,
    ) -> bool {
        let grace = self.settings.grace_for(requested_secs);
        self.generation += 1;
        let generation = self.generation;

        let Some(key) = self.registry.session_of(subject).cloned() else {
            debug!(connection_id = %subject, "obstruction ignored; connection not seated");
            return false;
        };
        let Some(session) = self.table.get_mut(key.as_str()) else {
            return false;
        };
        let Some(counterpart) = session.peer_of(subject) else {
            debug!(connection_id = %subject, address = %key, "obstruction ignored; session not paired");
            return false;
        };
        let Some(occupant) = session.occupant_of_mut(subject) else {
            return false;
        };
        if occupant.obstruction.is_some() {
            debug!(connection_id = %subject, address = %key, "already obstructed; keeping existing timer");
            return false;
        }

        occupant.obstruction = Some(ObstructionTimer::arm(
            subject,
            generation,
            grace,
            self.events.clone(),
        ));

        info!(
            connection_id = %subject,
            address = %key,
            reason = %reason,
            grace_secs = grace.as_secs(),
            "occupant obstructed"
        );
        counter!("beach_jetty_obstructions_total", 1);
        self.registry.send_message(
            counterpart,
            &ServerMessage::PeerObstructed {
                reason,
                seconds: grace.as_secs(),
            },
        );
        true
    }

    /// `obstructed -> stable`. Cancels the timer and tells the counterpart.
    pub(crate) fn restore(&mut self, subject: ConnectionId, reason: String) -> bool {
        let Some(key) = self.registry.session_of(subject).cloned() else {
            return false;
        };
        let Some(session) = self.table.get_mut(key.as_str()) else {
            return false;
        };
        let counterpart = session.peer_of(subject);
        let Some(timer) = session
            .occupant_of_mut(subject)
            .and_then(|occupant| occupant.obstruction.take())
        else {
            debug!(connection_id = %subject, "restore ignored; not obstructed");
            return false;
        };
        drop(timer);

        info!(connection_id = %subject, address = %key, reason = %reason, "occupant restored");
        counter!("beach_jetty_restorations_total", 1);
        if let Some(counterpart) = counterpart {
            self.registry
                .send_message(counterpart, &ServerMessage::PeerRestored { reason });
        }
        true
    }

    pub(crate) fn is_obstructed(&self, subject: ConnectionId) -> bool {
        self.registry
            .session_of(subject)
            .and_then(|key| self.table.get(key.as_str()))
            .and_then(|session| session.slot_of(subject).and_then(|slot| session.occupant(slot)))
            .map(|occupant| occupant.is_obstructed())
            .unwrap_or(false)
    }

    /// `obstructed -> gone` once the grace timer fires. Expiries from timers
    /// that were cancelled or replaced are ignored.
    pub(crate) fn grace_elapsed(&mut self, subject: ConnectionId, generation: u64) -> bool {
        let Some(key) = self.registry.session_of(subject).cloned() else {
            return false;
        };
        let Some(occupant) = self
            .table
            .get_mut(key.as_str())
            .and_then(|session| session.occupant_of_mut(subject))
        else {
            return false;
        };
        match &occupant.obstruction {
            Some(timer) if timer.generation() == generation => {}
            _ => {
                debug!(connection_id = %subject, generation, "ignoring stale grace expiry");
                return false;
            }
        }
        occupant.obstruction = None;

        info!(connection_id = %subject, address = %key, "obstruction grace elapsed");
        self.collapse(subject, CollapseReason::GraceExpired)
    }

    /// Terminal teardown of the session `subject` sits in.
    ///
    /// The surviving occupant gets `collapse { reason }` and is unseated, every
    /// timer is cancelled and the session entry is removed in the same step.
    /// Returns `false` (and does nothing) when `subject` is not seated.
    pub(crate) fn collapse(&mut self, subject: ConnectionId, reason: CollapseReason) -> bool {
        let Some(key) = self.registry.session_of(subject).cloned() else {
            debug!(connection_id = %subject, reason = reason.as_str(), "collapse ignored; not seated");
            return false;
        };
        self.registry.set_session(subject, None);
        let Some(session) = self.table.remove(key.as_str()) else {
            return false;
        };

        let notice = ServerMessage::Collapse {
            reason: reason.as_str().to_string(),
        };
        for occupant in session.into_occupants() {
            let id = occupant.id();
            self.registry.set_session(id, None);
            if id != subject || reason.notifies_subject() {
                self.registry.send_message(id, &notice);
            }
        }

        info!(
            connection_id = %subject,
            address = %key,
            reason = reason.as_str(),
            "session collapsed"
        );
        counter!("beach_jetty_collapses_total", 1, "reason" => reason.metric_label());
        gauge!("beach_jetty_sessions_active", self.table.len() as f64);
        true
    }
}
