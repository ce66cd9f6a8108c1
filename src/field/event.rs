//! Visibility events and the downstream notification seam

use super::EntityId;
use crate::util::vec2::Vec2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AoiEventKind {
    /// Subject became visible because it arrived in a watched sector
    Enter,
    /// Subject is no longer visible
    Leave,
    /// Subject moved inside the watcher's view
    Move,
    /// Subject was already present in a sector the watcher just subscribed to
    Snapshot,
}

/// One visibility change, addressed to a single watcher by the sink call
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AoiEvent {
    pub kind: AoiEventKind,
    pub subject: EntityId,
    pub position: Vec2,
}

impl AoiEvent {
    #[inline]
    pub fn enter(subject: EntityId, position: Vec2) -> Self {
        Self { kind: AoiEventKind::Enter, subject, position }
    }

    #[inline]
    pub fn leave(subject: EntityId, position: Vec2) -> Self {
        Self { kind: AoiEventKind::Leave, subject, position }
    }

    #[inline]
    pub fn moved(subject: EntityId, position: Vec2) -> Self {
        Self { kind: AoiEventKind::Move, subject, position }
    }

    #[inline]
    pub fn snapshot(subject: EntityId, position: Vec2) -> Self {
        Self { kind: AoiEventKind::Snapshot, subject, position }
    }
}

/// Receiver of visibility events, invoked synchronously on the field thread
pub trait AoiSink {
    fn on_event(&mut self, watcher: EntityId, event: &AoiEvent);
}

impl<F> AoiSink for F
where
    F: FnMut(EntityId, &AoiEvent),
{
    #[inline]
    fn on_event(&mut self, watcher: EntityId, event: &AoiEvent) {
        self(watcher, event)
    }
}

/// Coarse AI / life state broadcast to watchers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EntityState {
    #[default]
    Idle,
    Moving,
    Chase,
    Attack,
    Dead,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatSnapshot {
    pub hp: i32,
    pub max_hp: i32,
}

/// Damage dealt to a target, delivered to the target only
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CombatEvent {
    pub attacker: EntityId,
    pub target: EntityId,
    pub damage: i32,
    pub remaining_hp: i32,
}

/// Everything a field sends out of the simulation.
///
/// Implementations resolve the destination id to a session; an unknown
/// destination is silently dropped.
pub trait Notifier: Send {
    fn visibility(&mut self, watcher: EntityId, event: &AoiEvent);
    fn state_changed(&mut self, watcher: EntityId, subject: EntityId, state: EntityState);
    fn stat_changed(&mut self, watcher: EntityId, subject: EntityId, stat: StatSnapshot);
    fn combat(&mut self, target: EntityId, event: &CombatEvent);
}

/// Drops every notification. Used for headless fields and benchmarks.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn visibility(&mut self, _watcher: EntityId, _event: &AoiEvent) {}
    fn state_changed(&mut self, _watcher: EntityId, _subject: EntityId, _state: EntityState) {}
    fn stat_changed(&mut self, _watcher: EntityId, _subject: EntityId, _stat: StatSnapshot) {}
    fn combat(&mut self, _target: EntityId, _event: &CombatEvent) {}
}
