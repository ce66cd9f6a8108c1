//! Sector-based area of interest engine
//!
//! Tracks which sector every entity lives in and which sectors every player
//! subscribes to, and turns each mutation into per-watcher visibility events.
//!
//! Visibility rule: entity E is visible to player P iff E's current sector is
//! in P's subscribed set. The subscribed set of a player is always exactly the
//! clamped `(2R+1)^2` neighbourhood of its current sector.
//!
//! The engine is single-threaded; it is owned by one field actor and every
//! call emits its events through the supplied sink before returning.

use hashbrown::HashMap;
use rustc_hash::FxBuildHasher;
use smallvec::SmallVec;

use super::event::{AoiEvent, AoiSink};
use super::sector::{Sector, SectorCoord, SectorGrid, SectorMap, SectorSet, ViewSectors};
use super::EntityId;
use crate::util::vec2::Vec2;

/// AOI record of one entity
#[derive(Debug, Clone)]
pub struct Entity {
    pub id: EntityId,
    pub is_player: bool,
    pub pos: Vec2,
    pub sector: SectorCoord,
    /// View radius in sectors (players only)
    pub view_radius: i32,
    /// Sectors this player currently watches (empty for NPCs)
    pub subscribed: SectorSet,
}

pub struct AoiWorld {
    grid: SectorGrid,
    view_radius: i32,
    entities: HashMap<EntityId, Entity, FxBuildHasher>,
    sectors: SectorMap,
}

impl AoiWorld {
    /// Create an empty world. A radius below 1 falls back to 1.
    pub fn new(sector_size: f32, view_radius: i32) -> Self {
        Self {
            grid: SectorGrid::new(sector_size),
            view_radius: view_radius.max(1),
            entities: HashMap::default(),
            sectors: SectorMap::default(),
        }
    }

    /// Insert an entity at `pos`.
    ///
    /// Players get their initial subscription (Snapshot for every resident of
    /// each newly watched sector); then every existing watcher of the entity's
    /// sector receives Enter. An id that is already present is removed first.
    pub fn add_entity(&mut self, id: EntityId, is_player: bool, pos: Vec2, sink: &mut dyn AoiSink) {
        if self.entities.contains_key(&id) {
            self.remove_entity(id, sink);
        }

        let sector = self.grid.world_to_sector(pos);
        self.entities.insert(
            id,
            Entity {
                id,
                is_player,
                pos,
                sector,
                view_radius: self.view_radius,
                subscribed: SectorSet::default(),
            },
        );
        self.sectors.entry(sector).or_default().entities.insert(id);

        if is_player {
            self.rebuild_subscriptions(id, sink);
        }

        self.broadcast_to_sector(sector, id, &AoiEvent::enter(id, pos), sink);
    }

    /// Remove an entity. Leave goes to the pre-removal watchers of its sector.
    /// Unknown ids are ignored.
    pub fn remove_entity(&mut self, id: EntityId, sink: &mut dyn AoiSink) {
        let Some(entity) = self.entities.get(&id) else {
            return;
        };
        let (sector, pos) = (entity.sector, entity.pos);

        self.broadcast_to_sector(sector, id, &AoiEvent::leave(id, pos), sink);

        if let Some(s) = self.sectors.get_mut(&sector) {
            s.entities.remove(&id);
        }

        if let Some(entity) = self.entities.remove(&id) {
            for coord in &entity.subscribed {
                if let Some(s) = self.sectors.get_mut(coord) {
                    s.watchers.remove(&id);
                }
            }
        }
    }

    /// Move an entity to `new_pos`. Unknown ids are ignored.
    ///
    /// On a sector change, watchers only of the old sector get Leave and
    /// watchers only of the new sector get Enter. Every watcher of the current
    /// sector then gets Move, and a moving player also gets its own Move.
    pub fn move_entity(&mut self, id: EntityId, new_pos: Vec2, sink: &mut dyn AoiSink) {
        let Some(entity) = self.entities.get_mut(&id) else {
            return;
        };
        let old_sector = entity.sector;
        let new_sector = self.grid.world_to_sector(new_pos);
        let is_player = entity.is_player;
        entity.pos = new_pos;

        if old_sector != new_sector {
            entity.sector = new_sector;
            if let Some(s) = self.sectors.get_mut(&old_sector) {
                s.entities.remove(&id);
            }
            self.sectors.entry(new_sector).or_default().entities.insert(id);

            if is_player {
                self.rebuild_subscriptions(id, sink);
            }

            if let (Some(old), Some(new)) = (self.sectors.get(&old_sector), self.sectors.get(&new_sector)) {
                let leave = AoiEvent::leave(id, new_pos);
                for &watcher in old.watchers.iter().filter(|w| **w != id) {
                    if !new.watchers.contains(&watcher) {
                        sink.on_event(watcher, &leave);
                    }
                }
                let enter = AoiEvent::enter(id, new_pos);
                for &watcher in new.watchers.iter().filter(|w| **w != id) {
                    if !old.watchers.contains(&watcher) {
                        sink.on_event(watcher, &enter);
                    }
                }
            }
        }

        let moved = AoiEvent::moved(id, new_pos);
        self.broadcast_to_sector(new_sector, id, &moved, sink);
        if is_player {
            sink.on_event(id, &moved);
        }
    }

    /// Force a subscription rebuild without moving (radius/config changes)
    pub fn update_player_aoi(&mut self, player_id: EntityId, sink: &mut dyn AoiSink) {
        self.rebuild_subscriptions(player_id, sink);
    }

    /// Change one player's view radius (min 1) and rebuild its subscriptions
    pub fn set_player_view_radius(&mut self, player_id: EntityId, radius: i32, sink: &mut dyn AoiSink) {
        match self.entities.get_mut(&player_id) {
            Some(entity) if entity.is_player => entity.view_radius = radius.max(1),
            _ => return,
        }
        self.rebuild_subscriptions(player_id, sink);
    }

    /// Change the default view radius (min 1) and apply it to every player
    pub fn set_view_radius(&mut self, radius: i32, sink: &mut dyn AoiSink) {
        self.view_radius = radius.max(1);

        let mut players: Vec<EntityId> = self
            .entities
            .values()
            .filter(|e| e.is_player)
            .map(|e| e.id)
            .collect();
        players.sort_unstable();

        for id in players {
            self.set_player_view_radius(id, radius, sink);
        }
    }

    #[inline]
    pub fn get_entity(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(&id)
    }

    #[inline]
    pub fn sector(&self, coord: SectorCoord) -> Option<&Sector> {
        self.sectors.get(&coord)
    }

    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    #[inline]
    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    #[inline]
    pub fn sector_count(&self) -> usize {
        self.sectors.len()
    }

    #[inline]
    pub fn view_radius(&self) -> i32 {
        self.view_radius
    }

    #[inline]
    pub fn world_to_sector(&self, pos: Vec2) -> SectorCoord {
        self.grid.world_to_sector(pos)
    }

    /// Neighbourhood of `center` at the default view radius
    pub fn view_sectors(&self, center: SectorCoord) -> ViewSectors {
        self.grid.view_sectors(center, self.view_radius)
    }

    /// Bring a player's subscription in line with its current sector.
    ///
    /// Dropped sectors: Leave for each resident whose current sector is not
    /// part of the new target set, then unregister the watcher.
    /// Added sectors: register the watcher, then Snapshot for each resident.
    fn rebuild_subscriptions(&mut self, player_id: EntityId, sink: &mut dyn AoiSink) {
        let Some(player) = self.entities.get_mut(&player_id) else {
            return;
        };
        if !player.is_player {
            return;
        }

        let target_order = self.grid.view_sectors(player.sector, player.view_radius);
        let target: SectorSet = target_order.iter().copied().collect();
        let previous = std::mem::take(&mut player.subscribed);

        let mut removed: SmallVec<[SectorCoord; 16]> =
            previous.iter().filter(|c| !target.contains(*c)).copied().collect();
        removed.sort_unstable();

        for coord in &removed {
            let Some(sector) = self.sectors.get_mut(coord) else {
                continue;
            };
            for &other in sector.entities.iter().filter(|e| **e != player_id) {
                let Some(entity) = self.entities.get(&other) else {
                    continue;
                };
                if target.contains(&entity.sector) {
                    continue;
                }
                sink.on_event(player_id, &AoiEvent::leave(other, entity.pos));
            }
            sector.watchers.remove(&player_id);
        }

        for coord in target_order.iter().filter(|c| !previous.contains(*c)) {
            let sector = self.sectors.entry(*coord).or_default();
            sector.watchers.insert(player_id);
            for &other in sector.entities.iter().filter(|e| **e != player_id) {
                if let Some(entity) = self.entities.get(&other) {
                    sink.on_event(player_id, &AoiEvent::snapshot(other, entity.pos));
                }
            }
        }

        if let Some(player) = self.entities.get_mut(&player_id) {
            player.subscribed = target;
        }
    }

    /// Deliver `event` to every watcher of `coord` except `exclude`
    fn broadcast_to_sector(
        &self,
        coord: SectorCoord,
        exclude: EntityId,
        event: &AoiEvent,
        sink: &mut dyn AoiSink,
    ) {
        if let Some(sector) = self.sectors.get(&coord) {
            for &watcher in sector.watchers.iter().filter(|w| **w != exclude) {
                sink.on_event(watcher, event);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::event::AoiEventKind;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    const A: EntityId = 1;
    const B: EntityId = 2;
    const C: EntityId = 3;
    const D: EntityId = 4;

    #[derive(Default)]
    struct RecordingSink {
        events: Vec<(EntityId, AoiEvent)>,
    }

    impl AoiSink for RecordingSink {
        fn on_event(&mut self, watcher: EntityId, event: &AoiEvent) {
            self.events.push((watcher, *event));
        }
    }

    impl RecordingSink {
        fn received(&self, watcher: EntityId) -> Vec<(AoiEventKind, EntityId)> {
            self.events
                .iter()
                .filter(|(w, _)| *w == watcher)
                .map(|(_, e)| (e.kind, e.subject))
                .collect()
        }

        fn count(&self, watcher: EntityId, kind: AoiEventKind, subject: EntityId) -> usize {
            self.received(watcher)
                .iter()
                .filter(|(k, s)| *k == kind && *s == subject)
                .count()
        }

        fn clear(&mut self) {
            self.events.clear();
        }
    }

    fn world() -> AoiWorld {
        AoiWorld::new(10.0, 1)
    }

    fn subscribed_sorted(world: &AoiWorld, id: EntityId) -> Vec<SectorCoord> {
        let mut out: Vec<_> = world.get_entity(id).unwrap().subscribed.iter().copied().collect();
        out.sort();
        out
    }

    /// Checks membership, subscription and watcher consistency for the whole world
    fn assert_invariants(world: &AoiWorld) {
        for entity in world.entities() {
            let sector = world.sector(entity.sector).expect("entity sector exists");
            assert!(sector.entities.contains(&entity.id), "entity {} missing from its sector", entity.id);

            if entity.is_player {
                let expected: SectorSet = world
                    .grid
                    .view_sectors(entity.sector, entity.view_radius)
                    .into_iter()
                    .collect();
                assert_eq!(entity.subscribed, expected, "player {} subscription drifted", entity.id);
                for coord in &entity.subscribed {
                    assert!(world.sector(*coord).unwrap().watchers.contains(&entity.id));
                }
            } else {
                assert!(entity.subscribed.is_empty());
            }
        }

        for (coord, sector) in &world.sectors {
            for id in &sector.entities {
                assert_eq!(world.get_entity(*id).map(|e| e.sector), Some(*coord));
            }
            for id in &sector.watchers {
                let watcher = world.get_entity(*id).expect("watcher exists");
                assert!(watcher.is_player);
                assert!(watcher.subscribed.contains(coord));
            }
        }
    }

    #[test]
    fn test_new_clamps_radius() {
        assert_eq!(AoiWorld::new(10.0, 0).view_radius(), 1);
        assert_eq!(AoiWorld::new(10.0, -4).view_radius(), 1);
        assert_eq!(AoiWorld::new(10.0, 3).view_radius(), 3);
    }

    #[test]
    fn test_player_at_origin_subscribes_clamped_neighbourhood() {
        let mut world = world();
        let mut sink = RecordingSink::default();

        world.add_entity(A, true, Vec2::new(5.0, 5.0), &mut sink);

        let a = world.get_entity(A).unwrap();
        assert_eq!(a.sector, SectorCoord::new(0, 0));
        assert_eq!(
            subscribed_sorted(&world, A),
            vec![
                SectorCoord::new(0, 0),
                SectorCoord::new(0, 1),
                SectorCoord::new(1, 0),
                SectorCoord::new(1, 1),
            ]
        );
        assert!(sink.events.is_empty());
        assert_invariants(&world);
    }

    #[test]
    fn test_player_joining_sees_existing_npc_as_snapshot() {
        let mut world = world();
        let mut sink = RecordingSink::default();

        world.add_entity(B, false, Vec2::new(15.0, 5.0), &mut sink);
        world.add_entity(A, true, Vec2::new(5.0, 5.0), &mut sink);

        assert_eq!(sink.received(A), vec![(AoiEventKind::Snapshot, B)]);
        assert_invariants(&world);
    }

    #[test]
    fn test_npc_spawning_in_view_is_enter() {
        let mut world = world();
        let mut sink = RecordingSink::default();

        world.add_entity(A, true, Vec2::new(5.0, 5.0), &mut sink);
        world.add_entity(B, false, Vec2::new(15.0, 5.0), &mut sink);

        assert_eq!(sink.received(A), vec![(AoiEventKind::Enter, B)]);
        assert!(sink.received(B).is_empty());
    }

    #[test]
    fn test_move_out_of_range_emits_leave() {
        let mut world = world();
        let mut sink = RecordingSink::default();
        world.add_entity(B, false, Vec2::new(15.0, 5.0), &mut sink);
        world.add_entity(A, true, Vec2::new(5.0, 5.0), &mut sink);
        sink.clear();

        // (2,0) still covers (1,0) at radius 1
        world.move_entity(A, Vec2::new(25.0, 5.0), &mut sink);
        assert_eq!(sink.count(A, AoiEventKind::Leave, B), 0);
        assert_eq!(sink.count(A, AoiEventKind::Move, A), 1);
        sink.clear();

        world.move_entity(A, Vec2::new(35.0, 5.0), &mut sink);
        assert_eq!(world.get_entity(A).unwrap().sector, SectorCoord::new(3, 0));
        assert_eq!(sink.count(A, AoiEventKind::Leave, B), 1);
        assert_invariants(&world);
    }

    #[test]
    fn test_move_back_resubscribes_with_snapshot() {
        let mut world = world();
        let mut sink = RecordingSink::default();
        world.add_entity(B, false, Vec2::new(15.0, 5.0), &mut sink);
        world.add_entity(A, true, Vec2::new(5.0, 5.0), &mut sink);
        world.move_entity(A, Vec2::new(35.0, 5.0), &mut sink);
        sink.clear();

        world.move_entity(A, Vec2::new(15.0, 5.0), &mut sink);

        assert_eq!(sink.count(A, AoiEventKind::Snapshot, B), 1);
        assert_eq!(sink.count(A, AoiEventKind::Enter, B), 0);
        assert_invariants(&world);
    }

    #[test]
    fn test_radius_shrink_keeps_entities_in_retained_sectors() {
        let mut world = AoiWorld::new(10.0, 2);
        let mut sink = RecordingSink::default();

        // A at (2,0) watches x 0..=4 at radius 2
        world.add_entity(A, true, Vec2::new(25.0, 5.0), &mut sink);
        world.add_entity(B, true, Vec2::new(15.0, 5.0), &mut sink);
        world.set_player_view_radius(B, 1, &mut sink);
        world.add_entity(C, false, Vec2::new(15.0, 6.0), &mut sink);
        world.add_entity(D, false, Vec2::new(45.0, 5.0), &mut sink);
        assert_eq!(sink.count(A, AoiEventKind::Enter, C), 1);
        assert_eq!(sink.count(B, AoiEventKind::Enter, C), 1);
        sink.clear();

        world.set_player_view_radius(A, 1, &mut sink);

        assert_eq!(sink.count(A, AoiEventKind::Leave, C), 0);
        assert_eq!(sink.count(A, AoiEventKind::Leave, D), 1);
        assert!(sink.received(B).is_empty());
        assert!(world.sector(SectorCoord::new(1, 0)).unwrap().watchers.contains(&B));
        assert_invariants(&world);
    }

    #[test]
    fn test_remove_npc_notifies_each_watcher_once() {
        let mut world = world();
        let mut sink = RecordingSink::default();
        world.add_entity(A, true, Vec2::new(5.0, 5.0), &mut sink);
        world.add_entity(B, true, Vec2::new(25.0, 5.0), &mut sink);
        world.add_entity(C, false, Vec2::new(15.0, 5.0), &mut sink);
        sink.clear();

        world.remove_entity(C, &mut sink);

        assert_eq!(sink.received(A), vec![(AoiEventKind::Leave, C)]);
        assert_eq!(sink.received(B), vec![(AoiEventKind::Leave, C)]);
        assert!(!world.sector(SectorCoord::new(1, 0)).unwrap().entities.contains(&C));
        assert!(world.get_entity(C).is_none());
    }

    #[test]
    fn test_remove_unknown_is_noop() {
        let mut world = world();
        let mut sink = RecordingSink::default();
        world.add_entity(A, true, Vec2::new(5.0, 5.0), &mut sink);

        world.remove_entity(99, &mut sink);
        world.remove_entity(A, &mut sink);
        world.remove_entity(A, &mut sink);
        world.move_entity(A, Vec2::new(1.0, 1.0), &mut sink);
        world.update_player_aoi(A, &mut sink);

        assert!(sink.events.is_empty());
        assert_eq!(world.entity_count(), 0);
        for sector in world.sectors.values() {
            assert!(sector.watchers.is_empty());
        }
    }

    #[test]
    fn test_remove_player_clears_watchers() {
        let mut world = world();
        let mut sink = RecordingSink::default();
        world.add_entity(A, true, Vec2::new(5.0, 5.0), &mut sink);
        world.add_entity(B, true, Vec2::new(6.0, 6.0), &mut sink);
        sink.clear();

        world.remove_entity(A, &mut sink);

        assert_eq!(sink.received(B), vec![(AoiEventKind::Leave, A)]);
        assert!(sink.received(A).is_empty());
        assert_invariants(&world);
    }

    #[test]
    fn test_move_within_sector_only_broadcasts_move() {
        let mut world = world();
        let mut sink = RecordingSink::default();
        world.add_entity(A, true, Vec2::new(5.0, 5.0), &mut sink);
        world.add_entity(B, false, Vec2::new(12.0, 5.0), &mut sink);
        sink.clear();

        world.move_entity(B, Vec2::new(18.0, 8.0), &mut sink);

        assert_eq!(sink.received(A), vec![(AoiEventKind::Move, B)]);
        assert!(sink.received(B).is_empty());
        assert_eq!(sink.events[0].1.position, Vec2::new(18.0, 8.0));
    }

    #[test]
    fn test_npc_crossing_view_edge() {
        let mut world = world();
        let mut sink = RecordingSink::default();
        world.add_entity(A, true, Vec2::new(5.0, 5.0), &mut sink);
        world.add_entity(B, false, Vec2::new(15.0, 5.0), &mut sink);
        sink.clear();

        world.move_entity(B, Vec2::new(25.0, 5.0), &mut sink);
        assert_eq!(sink.received(A), vec![(AoiEventKind::Leave, B)]);
        sink.clear();

        world.move_entity(B, Vec2::new(15.0, 5.0), &mut sink);
        assert_eq!(
            sink.received(A),
            vec![(AoiEventKind::Enter, B), (AoiEventKind::Move, B)]
        );
    }

    #[test]
    fn test_readd_replaces_previous_record() {
        let mut world = world();
        let mut sink = RecordingSink::default();
        world.add_entity(A, true, Vec2::new(5.0, 5.0), &mut sink);
        world.add_entity(B, false, Vec2::new(15.0, 5.0), &mut sink);
        sink.clear();

        world.add_entity(B, false, Vec2::new(5.0, 15.0), &mut sink);

        assert_eq!(
            sink.received(A),
            vec![(AoiEventKind::Leave, B), (AoiEventKind::Enter, B)]
        );
        assert_eq!(world.entity_count(), 2);
        assert_invariants(&world);
    }

    #[test]
    fn test_set_view_radius_applies_to_all_players() {
        let mut world = world();
        let mut sink = RecordingSink::default();
        world.add_entity(A, true, Vec2::new(55.0, 55.0), &mut sink);
        world.add_entity(B, true, Vec2::new(5.0, 5.0), &mut sink);
        world.add_entity(C, false, Vec2::new(75.0, 55.0), &mut sink);
        assert!(sink.received(A).is_empty());

        world.set_view_radius(2, &mut sink);

        assert_eq!(world.view_radius(), 2);
        assert_eq!(world.get_entity(A).unwrap().subscribed.len(), 25);
        assert_eq!(world.get_entity(B).unwrap().subscribed.len(), 9);
        assert_eq!(sink.count(A, AoiEventKind::Snapshot, C), 1);
        assert_invariants(&world);
    }

    #[test]
    fn test_negative_positions_collapse_onto_origin_sector() {
        let mut world = world();
        let mut sink = RecordingSink::default();
        world.add_entity(A, true, Vec2::new(5.0, 5.0), &mut sink);
        world.add_entity(B, false, Vec2::new(-900.0, -900.0), &mut sink);

        assert_eq!(world.get_entity(B).unwrap().sector, SectorCoord::new(0, 0));
        assert_eq!(sink.received(A), vec![(AoiEventKind::Enter, B)]);
    }

    #[test]
    fn test_random_walk_preserves_invariants() {
        let mut rng = StdRng::seed_from_u64(0x5EC7_0A01);
        let mut world = AoiWorld::new(16.0, 2);
        let mut sink = RecordingSink::default();

        for id in 0..40u64 {
            let pos = Vec2::new(rng.gen_range(-20.0..300.0), rng.gen_range(-20.0..300.0));
            world.add_entity(id, id % 3 == 0, pos, &mut sink);
        }
        assert_invariants(&world);

        for step in 0..600 {
            let id = rng.gen_range(0..48u64);
            match step % 10 {
                0 => world.remove_entity(id, &mut sink),
                1 => {
                    let pos = Vec2::new(rng.gen_range(0.0..300.0), rng.gen_range(0.0..300.0));
                    world.add_entity(id, id % 2 == 0, pos, &mut sink);
                }
                2 if id % 3 == 0 => world.set_player_view_radius(id, rng.gen_range(1..4), &mut sink),
                _ => {
                    let pos = Vec2::new(rng.gen_range(-20.0..300.0), rng.gen_range(-20.0..300.0));
                    world.move_entity(id, pos, &mut sink);
                }
            }
            assert_invariants(&world);
        }

        // Only the explicit self-move delivery may address a player about itself
        for (watcher, event) in &sink.events {
            if *watcher == event.subject {
                assert_eq!(event.kind, AoiEventKind::Move);
            }
        }
    }
}
