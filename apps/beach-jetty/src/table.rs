use std::borrow::Borrow;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::time::Duration;

use crate::registry::ConnectionId;
use crate::signaling::{Frame, Role};
use crate::teardown::ObstructionTimer;

/// Opaque rendezvous address shared by the two peers of a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionKey(String);

impl SessionKey {
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for SessionKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SessionKey {
    fn from(address: &str) -> Self {
        Self(address.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    A,
    B,
}

impl Slot {
    pub fn other(self) -> Slot {
        match self {
            Slot::A => Slot::B,
            Slot::B => Slot::A,
        }
    }

    /// Slot A always negotiates as the initiator, slot B as the polite side.
    pub fn role(self) -> Role {
        match self {
            Slot::A => Role::Initiator,
            Slot::B => Role::Polite,
        }
    }

    fn index(self) -> usize {
        match self {
            Slot::A => 0,
            Slot::B => 1,
        }
    }
}

/// Per-seat state: who sits there, whether their descriptor has reached the
/// peer, the candidates they produced before that, and any grace timer.
#[derive(Debug)]
pub struct Occupant {
    pub(crate) id: ConnectionId,
    pub(crate) descriptor_sent: bool,
    pub(crate) outbox: VecDeque<Frame>,
    pub(crate) obstruction: Option<ObstructionTimer>,
}

impl Occupant {
    fn new(id: ConnectionId) -> Self {
        Self {
            id,
            descriptor_sent: false,
            outbox: VecDeque::new(),
            obstruction: None,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn descriptor_sent(&self) -> bool {
        self.descriptor_sent
    }

    pub fn pending_candidates(&self) -> usize {
        self.outbox.len()
    }

    pub fn is_obstructed(&self) -> bool {
        self.obstruction.is_some()
    }

    /// Time left before an armed grace timer collapses the session.
    pub fn grace_remaining(&self) -> Option<Duration> {
        self.obstruction.as_ref().map(ObstructionTimer::remaining)
    }
}

#[derive(Debug)]
pub struct Session {
    key: SessionKey,
    slots: [Option<Occupant>; 2],
}

impl Session {
    fn new(key: SessionKey) -> Self {
        Self {
            key,
            slots: [None, None],
        }
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    pub fn occupant(&self, slot: Slot) -> Option<&Occupant> {
        self.slots[slot.index()].as_ref()
    }

    pub(crate) fn occupant_mut(&mut self, slot: Slot) -> Option<&mut Occupant> {
        self.slots[slot.index()].as_mut()
    }

    pub fn slot_of(&self, id: ConnectionId) -> Option<Slot> {
        [Slot::A, Slot::B]
            .into_iter()
            .find(|slot| self.occupant(*slot).map(Occupant::id) == Some(id))
    }

    pub fn peer_of(&self, id: ConnectionId) -> Option<ConnectionId> {
        let slot = self.slot_of(id)?;
        self.occupant(slot.other()).map(Occupant::id)
    }

    pub(crate) fn occupant_of_mut(&mut self, id: ConnectionId) -> Option<&mut Occupant> {
        let slot = self.slot_of(id)?;
        self.occupant_mut(slot)
    }

    pub fn occupancy(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_paired(&self) -> bool {
        self.occupancy() == 2
    }

    pub fn occupants(&self) -> impl Iterator<Item = (Slot, &Occupant)> {
        [Slot::A, Slot::B]
            .into_iter()
            .filter_map(|slot| self.occupant(slot).map(|occupant| (slot, occupant)))
    }

    pub(crate) fn into_occupants(self) -> impl Iterator<Item = Occupant> {
        self.slots.into_iter().flatten()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    /// First seat taken; waiting for a peer.
    Seated { role: Role },
    /// Second seat filled. Both occupants must be told their roles.
    Paired { role: Role, peer: ConnectionId },
    /// The connection already sits in this session.
    AlreadySeated,
    /// Both seats belong to other connections.
    Rejected { reason: RejectReason },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    SessionFull,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::SessionFull => "session_full",
        }
    }
}

/// Address-keyed sessions. A key is present only while at least one seat is taken.
#[derive(Debug, Default)]
pub struct SessionTable {
    sessions: HashMap<SessionKey, Session>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seat `id` in the session for `key`, creating the session on first use.
    ///
    /// The first free slot is taken, so whichever join is processed first
    /// becomes slot A. A full session is left untouched.
    pub fn join(&mut self, key: &SessionKey, id: ConnectionId) -> JoinOutcome {
        let session = self
            .sessions
            .entry(key.clone())
            .or_insert_with(|| Session::new(key.clone()));

        if session.slot_of(id).is_some() {
            return JoinOutcome::AlreadySeated;
        }

        let Some(slot) = [Slot::A, Slot::B]
            .into_iter()
            .find(|slot| session.occupant(*slot).is_none())
        else {
            return JoinOutcome::Rejected {
                reason: RejectReason::SessionFull,
            };
        };

        session.slots[slot.index()] = Some(Occupant::new(id));
        match session.occupant(slot.other()) {
            Some(peer) => JoinOutcome::Paired {
                role: slot.role(),
                peer: peer.id(),
            },
            None => JoinOutcome::Seated { role: slot.role() },
        }
    }

    pub fn get(&self, key: &str) -> Option<&Session> {
        self.sessions.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Session> {
        self.sessions.get_mut(key)
    }

    /// Drop the whole session, returning it so callers can notify its occupants.
    pub fn remove(&mut self, key: &str) -> Option<Session> {
        self.sessions.remove(key)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Session> {
        self.sessions.values()
    }
}
