//! Forwarding between the two occupants of a session.
//!
//! Descriptors and free-form payloads go straight through. Candidates wait in
//! the sender's outbox until that sender's descriptor has reached the peer, and
//! are then flushed right behind it in arrival order.

use crate::registry::ConnectionId;
use crate::signaling::{DescriptorKind, Frame};
use crate::table::Session;

pub const DEFAULT_MAX_PENDING_CANDIDATES: usize = 256;

#[derive(Debug, Clone)]
pub enum Relayable {
    Descriptor(DescriptorKind, Frame),
    Candidate(Frame),
    Opaque(Frame),
}

impl Relayable {
    pub fn metric_label(&self) -> &'static str {
        match self {
            Relayable::Descriptor(kind, _) => kind.as_str(),
            Relayable::Candidate(_) => "ice",
            Relayable::Opaque(_) => "free_form",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub to: ConnectionId,
    pub frame: Frame,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    /// Frames to hand to the transport, in order.
    Delivered(Vec<Delivery>),
    /// Candidate held until the sender's descriptor goes out.
    Buffered { pending: usize },
    Dropped(DropReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    NotSeated,
    PeerAbsent,
    QueueFull,
}

impl DropReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DropReason::NotSeated => "not_seated",
            DropReason::PeerAbsent => "peer_absent",
            DropReason::QueueFull => "queue_full",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RelayEngine {
    max_pending_candidates: usize,
}

impl Default for RelayEngine {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PENDING_CANDIDATES)
    }
}

impl RelayEngine {
    pub fn new(max_pending_candidates: usize) -> Self {
        Self {
            max_pending_candidates,
        }
    }

    pub fn relay(
        &self,
        session: &mut Session,
        sender: ConnectionId,
        payload: Relayable,
    ) -> RelayOutcome {
        let Some(slot) = session.slot_of(sender) else {
            return RelayOutcome::Dropped(DropReason::NotSeated);
        };
        let peer = session.occupant(slot.other()).map(|occupant| occupant.id());
        let Some(occupant) = session.occupant_mut(slot) else {
            return RelayOutcome::Dropped(DropReason::NotSeated);
        };

        match payload {
            Relayable::Descriptor(_, frame) => {
                let Some(peer) = peer else {
                    return RelayOutcome::Dropped(DropReason::PeerAbsent);
                };
                occupant.descriptor_sent = true;
                let mut deliveries = Vec::with_capacity(1 + occupant.outbox.len());
                deliveries.push(Delivery { to: peer, frame });
                deliveries.extend(
                    occupant
                        .outbox
                        .drain(..)
                        .map(|frame| Delivery { to: peer, frame }),
                );
                RelayOutcome::Delivered(deliveries)
            }
            Relayable::Candidate(frame) if occupant.descriptor_sent => match peer {
                Some(peer) => RelayOutcome::Delivered(vec![Delivery { to: peer, frame }]),
                None => RelayOutcome::Dropped(DropReason::PeerAbsent),
            },
            Relayable::Candidate(frame) => {
                if occupant.outbox.len() >= self.max_pending_candidates {
                    return RelayOutcome::Dropped(DropReason::QueueFull);
                }
                occupant.outbox.push_back(frame);
                RelayOutcome::Buffered {
                    pending: occupant.outbox.len(),
                }
            }
            Relayable::Opaque(frame) => match peer {
                Some(peer) => RelayOutcome::Delivered(vec![Delivery { to: peer, frame }]),
                None => RelayOutcome::Dropped(DropReason::PeerAbsent),
            },
        }
    }
}
