//! Production notifier: field events to session outbound queues

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tracing::debug;

use super::session::{DeliveryError, OutboundEvent, SessionDirectory};
use crate::field::{AoiEvent, CombatEvent, EntityId, EntityState, FieldId, Notifier, StatSnapshot};
use crate::metrics::Metrics;
use crate::worker::registry::NotifierFactory;

pub struct SessionNotifier {
    field_id: FieldId,
    directory: Arc<SessionDirectory>,
    metrics: Arc<Metrics>,
}

impl SessionNotifier {
    pub fn new(field_id: FieldId, directory: Arc<SessionDirectory>, metrics: Arc<Metrics>) -> Self {
        Self { field_id, directory, metrics }
    }

    fn send(&self, player_id: EntityId, event: OutboundEvent) {
        match self.directory.deliver(player_id, event) {
            Ok(()) => {
                self.metrics.events_delivered.fetch_add(1, Ordering::Relaxed);
            }
            // Watchers without a connection (bots, mid-logout) are expected
            Err(DeliveryError::NotFound) => {}
            Err(e) => {
                self.metrics.events_dropped.fetch_add(1, Ordering::Relaxed);
                debug!(field_id = self.field_id, player_id, "Dropped outbound event: {}", e);
            }
        }
    }
}

impl Notifier for SessionNotifier {
    fn visibility(&mut self, watcher: EntityId, event: &AoiEvent) {
        self.send(watcher, OutboundEvent::Visibility(*event));
    }

    fn state_changed(&mut self, watcher: EntityId, subject: EntityId, state: EntityState) {
        self.send(watcher, OutboundEvent::State { subject, state });
    }

    fn stat_changed(&mut self, watcher: EntityId, subject: EntityId, stat: StatSnapshot) {
        self.send(watcher, OutboundEvent::Stat { subject, stat });
    }

    fn combat(&mut self, target: EntityId, event: &CombatEvent) {
        self.send(target, OutboundEvent::Combat(*event));
    }
}

/// Builds one [`SessionNotifier`] per field
pub struct SessionNotifierFactory {
    directory: Arc<SessionDirectory>,
    metrics: Arc<Metrics>,
}

impl SessionNotifierFactory {
    pub fn new(directory: Arc<SessionDirectory>, metrics: Arc<Metrics>) -> Self {
        Self { directory, metrics }
    }
}

impl NotifierFactory for SessionNotifierFactory {
    fn create(&self, field_id: FieldId) -> Box<dyn Notifier> {
        Box::new(SessionNotifier::new(field_id, self.directory.clone(), self.metrics.clone()))
    }
}
