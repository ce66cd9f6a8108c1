//! Test doubles shared by the field and worker tests

use std::sync::Arc;

use parking_lot::Mutex;

use super::event::{AoiEvent, CombatEvent, EntityState, Notifier, StatSnapshot};
use super::EntityId;

#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    Visibility(EntityId, AoiEvent),
    State(EntityId, EntityId, EntityState),
    Stat(EntityId, EntityId, StatSnapshot),
    Combat(EntityId, CombatEvent),
}

/// Notifier that records everything into a shared log
#[derive(Debug, Clone, Default)]
pub struct RecordingNotifier {
    log: Arc<Mutex<Vec<Notification>>>,
}

impl RecordingNotifier {
    pub fn take(&self) -> Vec<Notification> {
        std::mem::take(&mut *self.log.lock())
    }

    pub fn visibility_for(&self, watcher: EntityId) -> Vec<AoiEvent> {
        self.log
            .lock()
            .iter()
            .filter_map(|n| match n {
                Notification::Visibility(w, e) if *w == watcher => Some(*e),
                _ => None,
            })
            .collect()
    }
}

impl Notifier for RecordingNotifier {
    fn visibility(&mut self, watcher: EntityId, event: &AoiEvent) {
        self.log.lock().push(Notification::Visibility(watcher, *event));
    }

    fn state_changed(&mut self, watcher: EntityId, subject: EntityId, state: EntityState) {
        self.log.lock().push(Notification::State(watcher, subject, state));
    }

    fn stat_changed(&mut self, watcher: EntityId, subject: EntityId, stat: StatSnapshot) {
        self.log.lock().push(Notification::Stat(watcher, subject, stat));
    }

    fn combat(&mut self, target: EntityId, event: &CombatEvent) {
        self.log.lock().push(Notification::Combat(target, *event));
    }
}
