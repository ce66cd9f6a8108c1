//! Reverse watcher index and the field-facing AOI adapter
//!
//! [`WatcherIndex`] is derived purely from emitted visibility events and answers
//! "who currently sees entity X" for broadcasts that are not position driven
//! (AI state, stats). [`AoiSystem`] wires the AOI engine, the index and the
//! downstream [`Notifier`] together.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use hashbrown::HashMap;
use rustc_hash::FxBuildHasher;

use super::aoi::{AoiWorld, Entity};
use super::event::{AoiEvent, AoiEventKind, AoiSink, CombatEvent, EntityState, Notifier, StatSnapshot};
use super::EntityId;
use crate::metrics::Metrics;
use crate::util::vec2::Vec2;

/// Subject id -> ordered, duplicate-free watcher ids
#[derive(Debug, Default)]
pub struct WatcherIndex {
    watchers: HashMap<EntityId, Vec<EntityId>, FxBuildHasher>,
}

impl WatcherIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one emitted event into the index
    pub fn observe(&mut self, watcher: EntityId, event: &AoiEvent) {
        match event.kind {
            AoiEventKind::Enter | AoiEventKind::Move | AoiEventKind::Snapshot => {
                let list = self.watchers.entry(event.subject).or_default();
                if !list.contains(&watcher) {
                    list.push(watcher);
                }
            }
            AoiEventKind::Leave => {
                if let Some(list) = self.watchers.get_mut(&event.subject) {
                    list.retain(|w| *w != watcher);
                    if list.is_empty() {
                        self.watchers.remove(&event.subject);
                    }
                }
            }
        }
    }

    pub fn for_each_watcher(&self, subject: EntityId, mut f: impl FnMut(EntityId)) {
        for &watcher in self.watchers_of(subject) {
            f(watcher);
        }
    }

    pub fn watchers_of(&self, subject: EntityId) -> &[EntityId] {
        self.watchers.get(&subject).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Drop everything known about `id`, as a subject and as a watcher
    pub fn forget(&mut self, id: EntityId) {
        self.watchers.remove(&id);
        self.watchers.retain(|_, list| {
            list.retain(|w| *w != id);
            !list.is_empty()
        });
    }

    pub fn len(&self) -> usize {
        self.watchers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.watchers.is_empty()
    }
}

/// Sink handed to the engine for one call: index first, then (if the field is
/// live) the notifier.
struct IndexingSink<'a> {
    index: &'a mut WatcherIndex,
    notifier: Option<&'a mut dyn Notifier>,
    emitted: u64,
}

impl AoiSink for IndexingSink<'_> {
    fn on_event(&mut self, watcher: EntityId, event: &AoiEvent) {
        self.index.observe(watcher, event);
        self.emitted += 1;
        if let Some(notifier) = self.notifier.as_deref_mut() {
            notifier.visibility(watcher, event);
        }
    }
}

/// AOI engine + watcher index + notifier for one field.
///
/// Until [`AoiSystem::set_initialized`] is called (field bootstrap), events
/// still maintain the index but nothing is sent downstream.
pub struct AoiSystem {
    world: AoiWorld,
    index: WatcherIndex,
    notifier: Box<dyn Notifier>,
    initialized: bool,
    metrics: Arc<Metrics>,
}

impl AoiSystem {
    pub fn new(sector_size: f32, view_radius: i32, notifier: Box<dyn Notifier>, metrics: Arc<Metrics>) -> Self {
        Self {
            world: AoiWorld::new(sector_size, view_radius),
            index: WatcherIndex::new(),
            notifier,
            initialized: false,
            metrics,
        }
    }

    fn with_sink<R>(&mut self, f: impl FnOnce(&mut AoiWorld, &mut dyn AoiSink) -> R) -> R {
        let notifier: Option<&mut dyn Notifier> = if self.initialized {
            Some(self.notifier.as_mut())
        } else {
            None
        };
        let mut sink = IndexingSink {
            index: &mut self.index,
            notifier,
            emitted: 0,
        };
        let out = f(&mut self.world, &mut sink);
        if sink.emitted > 0 {
            self.metrics.aoi_events.fetch_add(sink.emitted, Ordering::Relaxed);
        }
        out
    }

    /// Re-adding a live id goes through a full removal first, so its old
    /// watcher relations are forgotten before the new ones are built.
    pub fn add_entity(&mut self, id: EntityId, is_player: bool, pos: Vec2) {
        if self.world.get_entity(id).is_some() {
            self.remove_entity(id);
        }
        self.with_sink(|world, sink| world.add_entity(id, is_player, pos, sink));
    }

    pub fn move_entity(&mut self, id: EntityId, pos: Vec2) {
        self.with_sink(|world, sink| world.move_entity(id, pos, sink));
    }

    pub fn remove_entity(&mut self, id: EntityId) {
        self.with_sink(|world, sink| world.remove_entity(id, sink));
        self.index.forget(id);
    }

    pub fn update_player_aoi(&mut self, player_id: EntityId) {
        self.with_sink(|world, sink| world.update_player_aoi(player_id, sink));
    }

    pub fn set_player_view_radius(&mut self, player_id: EntityId, radius: i32) {
        self.with_sink(|world, sink| world.set_player_view_radius(player_id, radius, sink));
    }

    pub fn set_view_radius(&mut self, radius: i32) {
        self.with_sink(|world, sink| world.set_view_radius(radius, sink));
    }

    /// Deliver an event about `id` to `id` itself (field entry snapshot)
    pub fn notify_self(&mut self, id: EntityId, event: &AoiEvent) {
        self.with_sink(|_, sink| sink.on_event(id, event));
    }

    pub fn for_each_watcher(&self, subject: EntityId, f: impl FnMut(EntityId)) {
        self.index.for_each_watcher(subject, f);
    }

    pub fn broadcast_state(&mut self, subject: EntityId, state: EntityState) {
        if !self.initialized {
            return;
        }
        for &watcher in self.index.watchers_of(subject) {
            self.notifier.state_changed(watcher, subject, state);
        }
    }

    pub fn broadcast_stat(&mut self, subject: EntityId, stat: StatSnapshot) {
        if !self.initialized {
            return;
        }
        for &watcher in self.index.watchers_of(subject) {
            self.notifier.stat_changed(watcher, subject, stat);
        }
    }

    pub fn send_combat(&mut self, event: &CombatEvent) {
        if self.initialized {
            self.notifier.combat(event.target, event);
        }
    }

    pub fn set_initialized(&mut self, initialized: bool) {
        self.initialized = initialized;
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn get_entity(&self, id: EntityId) -> Option<&Entity> {
        self.world.get_entity(id)
    }

    pub fn world(&self) -> &AoiWorld {
        &self.world
    }

    pub fn index(&self) -> &WatcherIndex {
        &self.index
    }
}
