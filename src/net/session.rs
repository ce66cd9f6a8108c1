//! Player sessions as seen by the simulation
//!
//! A [`SessionHandle`] is the outbound side of one connected player: a bounded
//! channel of typed events that the connection task drains and encodes. The
//! [`SessionDirectory`] maps player ids to live handles.

use std::time::Instant;

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use hashbrown::HashMap;
use parking_lot::RwLock;
use rustc_hash::FxBuildHasher;
use tracing::debug;

use crate::field::{AoiEvent, CombatEvent, EntityId, EntityState, StatSnapshot};

/// Event queued for delivery to one player's connection
#[derive(Debug, Clone, PartialEq)]
pub enum OutboundEvent {
    Visibility(AoiEvent),
    State { subject: EntityId, state: EntityState },
    Stat { subject: EntityId, stat: StatSnapshot },
    Combat(CombatEvent),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    #[error("no session for player")]
    NotFound,
    #[error("session outbound queue is full")]
    Full,
    #[error("session is closed")]
    Closed,
}

/// Clonable outbound handle for one player connection
#[derive(Debug, Clone)]
pub struct SessionHandle {
    player_id: EntityId,
    sender: Sender<OutboundEvent>,
    created_at: Instant,
}

impl SessionHandle {
    /// Create a handle plus the receiver the connection task drains
    pub fn new(player_id: EntityId, capacity: usize) -> (Self, Receiver<OutboundEvent>) {
        let (sender, receiver) = bounded(capacity.max(1));
        (
            Self {
                player_id,
                sender,
                created_at: Instant::now(),
            },
            receiver,
        )
    }

    #[inline]
    pub fn player_id(&self) -> EntityId {
        self.player_id
    }

    /// Non-blocking enqueue
    #[inline]
    pub fn try_deliver(&self, event: OutboundEvent) -> Result<(), DeliveryError> {
        self.sender.try_send(event).map_err(|e| match e {
            TrySendError::Full(_) => DeliveryError::Full,
            TrySendError::Disconnected(_) => DeliveryError::Closed,
        })
    }

    #[inline]
    pub fn pending(&self) -> usize {
        self.sender.len()
    }

    pub fn age_secs(&self) -> u64 {
        self.created_at.elapsed().as_secs()
    }
}

/// Player id -> live session, shared by network threads and field threads
#[derive(Debug, Default)]
pub struct SessionDirectory {
    sessions: RwLock<HashMap<EntityId, SessionHandle, FxBuildHasher>>,
}

impl SessionDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session, returning the one it replaced
    pub fn register(&self, handle: SessionHandle) -> Option<SessionHandle> {
        let player_id = handle.player_id;
        let replaced = self.sessions.write().insert(player_id, handle);
        if let Some(old) = &replaced {
            debug!(player_id, age_secs = old.age_secs(), "Replaced existing session");
        }
        replaced
    }

    pub fn unregister(&self, player_id: EntityId) -> Option<SessionHandle> {
        self.sessions.write().remove(&player_id)
    }

    pub fn find(&self, player_id: EntityId) -> Option<SessionHandle> {
        self.sessions.read().get(&player_id).cloned()
    }

    /// Resolve `player_id` and enqueue `event` without cloning the handle
    pub fn deliver(&self, player_id: EntityId, event: OutboundEvent) -> Result<(), DeliveryError> {
        match self.sessions.read().get(&player_id) {
            Some(handle) => handle.try_deliver(event),
            None => Err(DeliveryError::NotFound),
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}
