//! NPC (monster) world of one field
//!
//! Holds NPC records and runs their fixed-step update: respawn timers, the
//! pluggable [`NpcBrain`] decision, movement integration and attack cooldowns.
//! It never touches the AOI directly; everything visible comes back as
//! [`NpcOutcome`]s that the field applies.

use hashbrown::HashMap;
use rustc_hash::FxBuildHasher;

use super::event::EntityState;
use super::EntityId;
use crate::util::vec2::Vec2;

/// NPC ids live above this value so they never collide with player ids
pub const NPC_ID_BASE: EntityId = 1 << 48;

/// Fallback chase speed when a brain does not pick one
const DEFAULT_CHASE_SPEED: f32 = 6.0;
const DEFAULT_ATTACK_COOLDOWN: f32 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NpcTemplate {
    pub name: &'static str,
    pub max_hp: i32,
    pub max_sp: i32,
    pub atk: i32,
    pub def: i32,
}

const fn template(name: &'static str) -> NpcTemplate {
    NpcTemplate { name, max_hp: 200, max_sp: 100, atk: 7, def: 3 }
}

pub const NPC_TEMPLATES: [NpcTemplate; 9] = [
    template("BowAndArrow1"),
    template("BowAndArrow2"),
    template("BowAndArrow3"),
    template("DoubleSwords1"),
    template("DoubleSwords2"),
    template("DoubleSwords3"),
    template("MagicWand1"),
    template("MagicWand2"),
    template("MagicWand3"),
];

/// Layout of the initial even spawn grid
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpawnGrid {
    pub cols: u32,
    pub rows: u32,
    pub min: Vec2,
    pub max: Vec2,
}

impl Default for SpawnGrid {
    fn default() -> Self {
        Self {
            cols: 10,
            rows: 10,
            min: Vec2::ZERO,
            max: Vec2::new(500.0, 500.0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NpcStats {
    pub hp: i32,
    pub max_hp: i32,
    pub sp: i32,
    pub max_sp: i32,
    pub atk: i32,
    pub def: i32,
}

impl From<&NpcTemplate> for NpcStats {
    fn from(t: &NpcTemplate) -> Self {
        Self {
            hp: t.max_hp,
            max_hp: t.max_hp,
            sp: t.max_sp,
            max_sp: t.max_sp,
            atk: t.atk,
            def: t.def,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RespawnTimer {
    pub delay: f32,
    pub elapsed: f32,
    pub pending: bool,
}

#[derive(Debug, Clone)]
pub struct Npc {
    pub id: EntityId,
    pub template: &'static str,
    pub pos: Vec2,
    pub spawn_point: Vec2,
    pub stats: NpcStats,
    pub state: EntityState,
    pub target: Option<EntityId>,
    pub move_dir: Vec2,
    pub move_speed: f32,
    pub attack_cooldown: f32,
    pub attack_timer: f32,
    pub respawn: RespawnTimer,
}

impl Npc {
    #[inline]
    pub fn is_alive(&self) -> bool {
        self.stats.hp > 0
    }
}

/// What a brain wants an NPC to do this step
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NpcIntent {
    Hold,
    Wander { dir: Vec2, speed: f32 },
    Chase { target: EntityId, speed: f32 },
    Attack { target: EntityId },
}

/// Read-only view of the field's players, offered to brains
pub trait NpcView {
    fn player_position(&self, id: EntityId) -> Option<Vec2>;
    fn closest_player(&self, pos: Vec2, range: f32) -> Option<(EntityId, Vec2)>;
}

/// NPC decision logic. Runs on the field thread once per NPC step.
pub trait NpcBrain: Send {
    fn think(&mut self, npc: &Npc, view: &dyn NpcView) -> NpcIntent;
}

/// Keeps every NPC standing still
#[derive(Debug, Default, Clone, Copy)]
pub struct IdleBrain;

impl NpcBrain for IdleBrain {
    fn think(&mut self, _npc: &Npc, _view: &dyn NpcView) -> NpcIntent {
        NpcIntent::Hold
    }
}

/// Visible consequences of an NPC step, applied by the field
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NpcOutcome {
    StateChanged { id: EntityId, state: EntityState },
    Moved { id: EntityId, pos: Vec2 },
    Attacked { npc: EntityId, target: EntityId, damage: i32 },
    Respawned { id: EntityId, pos: Vec2 },
}

/// Result of damaging a live NPC
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DamageResult {
    pub remaining_hp: i32,
    pub died: bool,
}

pub struct NpcWorld {
    npcs: Vec<Npc>,
    index: HashMap<EntityId, usize, FxBuildHasher>,
    next_id: EntityId,
    respawn_delay: f32,
}

impl NpcWorld {
    pub fn new(respawn_delay: f32) -> Self {
        Self {
            npcs: Vec::new(),
            index: HashMap::default(),
            next_id: NPC_ID_BASE,
            respawn_delay,
        }
    }

    /// Create a live NPC from `template` at `pos` and return its id
    pub fn spawn(&mut self, template: &NpcTemplate, pos: Vec2) -> EntityId {
        self.next_id += 1;
        let id = self.next_id;
        self.index.insert(id, self.npcs.len());
        self.npcs.push(Npc {
            id,
            template: template.name,
            pos,
            spawn_point: pos,
            stats: NpcStats::from(template),
            state: EntityState::Idle,
            target: None,
            move_dir: Vec2::ZERO,
            move_speed: 0.0,
            attack_cooldown: DEFAULT_ATTACK_COOLDOWN,
            attack_timer: 0.0,
            respawn: RespawnTimer {
                delay: self.respawn_delay,
                elapsed: 0.0,
                pending: false,
            },
        });
        id
    }

    /// One NPC at the centre of every grid cell, cycling through the templates
    pub fn spawn_even_grid(&mut self, grid: &SpawnGrid) -> Vec<(EntityId, Vec2)> {
        let cols = grid.cols.max(1);
        let rows = grid.rows.max(1);
        let cell_w = (grid.max.x - grid.min.x) / cols as f32;
        let cell_h = (grid.max.y - grid.min.y) / rows as f32;

        (0..cols * rows)
            .map(|i| {
                let (r, c) = (i / cols, i % cols);
                let pos = Vec2::new(
                    (grid.min.x + (c as f32 + 0.5) * cell_w).clamp(grid.min.x, grid.max.x),
                    (grid.min.y + (r as f32 + 0.5) * cell_h).clamp(grid.min.y, grid.max.y),
                );
                let template = &NPC_TEMPLATES[i as usize % NPC_TEMPLATES.len()];
                (self.spawn(template, pos), pos)
            })
            .collect()
    }

    /// Damage a live NPC. Returns None for unknown or already dead NPCs.
    pub fn apply_damage(&mut self, id: EntityId, damage: i32) -> Option<DamageResult> {
        let npc = self.get_mut(id)?;
        if !npc.is_alive() {
            return None;
        }

        npc.stats.hp = npc.stats.hp.saturating_sub(damage.max(0)).max(0);
        let died = npc.stats.hp == 0;
        if died {
            npc.state = EntityState::Dead;
            npc.target = None;
            npc.move_speed = 0.0;
            npc.attack_timer = 0.0;
            npc.respawn.pending = true;
            npc.respawn.elapsed = 0.0;
        }
        Some(DamageResult {
            remaining_hp: npc.stats.hp,
            died,
        })
    }

    /// Advance every NPC by one fixed step
    pub fn update(&mut self, step: f32, brain: &mut dyn NpcBrain, view: &dyn NpcView) -> Vec<NpcOutcome> {
        let mut outcomes = Vec::new();

        for npc in &mut self.npcs {
            if !npc.is_alive() {
                if Self::tick_respawn(npc, step) {
                    outcomes.push(NpcOutcome::Respawned { id: npc.id, pos: npc.pos });
                }
                continue;
            }

            let intent = brain.think(npc, view);
            let (state, dir, speed) = Self::resolve_intent(npc, intent, view);

            if state != npc.state {
                npc.state = state;
                outcomes.push(NpcOutcome::StateChanged { id: npc.id, state });
            }
            npc.move_dir = dir;
            npc.move_speed = speed;

            if speed > 0.0 {
                npc.pos += dir * (speed * step);
                outcomes.push(NpcOutcome::Moved { id: npc.id, pos: npc.pos });
            }

            if npc.state == EntityState::Attack {
                npc.attack_timer += step;
                if npc.attack_timer >= npc.attack_cooldown {
                    if let Some(target) = npc.target.filter(|t| view.player_position(*t).is_some()) {
                        outcomes.push(NpcOutcome::Attacked {
                            npc: npc.id,
                            target,
                            damage: npc.stats.atk,
                        });
                        npc.attack_timer = 0.0;
                    }
                }
            } else {
                npc.attack_timer = 0.0;
            }
        }

        outcomes
    }

    fn resolve_intent(npc: &mut Npc, intent: NpcIntent, view: &dyn NpcView) -> (EntityState, Vec2, f32) {
        match intent {
            NpcIntent::Hold => {
                npc.target = None;
                (EntityState::Idle, Vec2::ZERO, 0.0)
            }
            NpcIntent::Wander { dir, speed } => {
                npc.target = None;
                if !dir.is_finite() || dir.length_sq() < 1e-6 || speed <= 0.0 {
                    (EntityState::Idle, Vec2::ZERO, 0.0)
                } else {
                    (EntityState::Moving, dir.normalize(), speed)
                }
            }
            NpcIntent::Chase { target, speed } => {
                let Some(goal) = view.player_position(target) else {
                    npc.target = None;
                    return (EntityState::Idle, Vec2::ZERO, 0.0);
                };
                npc.target = Some(target);
                let delta = goal - npc.pos;
                if delta.length_sq() < 1e-6 {
                    return (EntityState::Chase, Vec2::ZERO, 0.0);
                }
                let speed = if speed > 0.0 { speed } else { DEFAULT_CHASE_SPEED };
                (EntityState::Chase, delta.normalize(), speed)
            }
            NpcIntent::Attack { target } => {
                npc.target = Some(target);
                (EntityState::Attack, Vec2::ZERO, 0.0)
            }
        }
    }

    /// Returns true when the NPC came back this step
    fn tick_respawn(npc: &mut Npc, step: f32) -> bool {
        if !npc.respawn.pending || npc.respawn.delay <= 0.0 {
            return false;
        }
        npc.respawn.elapsed += step;
        if npc.respawn.elapsed < npc.respawn.delay {
            return false;
        }

        npc.respawn.pending = false;
        npc.respawn.elapsed = 0.0;
        npc.stats.hp = npc.stats.max_hp;
        npc.pos = npc.spawn_point;
        npc.state = EntityState::Idle;
        npc.target = None;
        npc.move_dir = Vec2::ZERO;
        npc.move_speed = 0.0;
        npc.attack_timer = 0.0;
        true
    }

    pub fn get(&self, id: EntityId) -> Option<&Npc> {
        self.index.get(&id).and_then(|&i| self.npcs.get(i))
    }

    fn get_mut(&mut self, id: EntityId) -> Option<&mut Npc> {
        let i = *self.index.get(&id)?;
        self.npcs.get_mut(i)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Npc> {
        self.npcs.iter()
    }

    pub fn len(&self) -> usize {
        self.npcs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.npcs.is_empty()
    }

    pub fn alive_count(&self) -> usize {
        self.npcs.iter().filter(|n| n.is_alive()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Players(Vec<(EntityId, Vec2)>);

    impl NpcView for Players {
        fn player_position(&self, id: EntityId) -> Option<Vec2> {
            self.0.iter().find(|(p, _)| *p == id).map(|(_, pos)| *pos)
        }

        fn closest_player(&self, pos: Vec2, range: f32) -> Option<(EntityId, Vec2)> {
            self.0
                .iter()
                .filter(|(_, p)| p.distance_sq_to(pos) <= range * range)
                .min_by(|a, b| a.1.distance_sq_to(pos).total_cmp(&b.1.distance_sq_to(pos)))
                .copied()
        }
    }

    /// Chases the closest player, attacks when within 2 units
    struct Aggressive;

    impl NpcBrain for Aggressive {
        fn think(&mut self, npc: &Npc, view: &dyn NpcView) -> NpcIntent {
            match view.closest_player(npc.pos, 100.0) {
                Some((id, pos)) if pos.distance_sq_to(npc.pos) <= 4.0 => NpcIntent::Attack { target: id },
                Some((id, _)) => NpcIntent::Chase { target: id, speed: 0.0 },
                None => NpcIntent::Hold,
            }
        }
    }

    #[test]
    fn test_spawn_even_grid() {
        let mut world = NpcWorld::new(5.0);
        let spawned = world.spawn_even_grid(&SpawnGrid::default());

        assert_eq!(spawned.len(), 100);
        assert_eq!(world.len(), 100);
        assert_eq!(spawned[0].1, Vec2::new(25.0, 25.0));
        assert_eq!(spawned[11].1, Vec2::new(75.0, 75.0));
        assert_eq!(spawned[99].1, Vec2::new(475.0, 475.0));

        let first = world.get(spawned[0].0).unwrap();
        assert_eq!(first.template, "BowAndArrow1");
        assert_eq!(first.stats.hp, 200);
        assert_eq!(first.stats.atk, 7);
        assert_eq!(world.get(spawned[9].0).unwrap().template, "BowAndArrow1");
        assert_eq!(world.get(spawned[8].0).unwrap().template, "MagicWand3");
        assert!(spawned.iter().all(|(id, _)| *id > NPC_ID_BASE));
    }

    #[test]
    fn test_damage_until_death() {
        let mut world = NpcWorld::new(5.0);
        let id = world.spawn(&NPC_TEMPLATES[0], Vec2::new(10.0, 10.0));

        for _ in 0..19 {
            let result = world.apply_damage(id, 10).unwrap();
            assert!(!result.died);
        }
        let last = world.apply_damage(id, 10).unwrap();
        assert_eq!(last, DamageResult { remaining_hp: 0, died: true });

        let npc = world.get(id).unwrap();
        assert_eq!(npc.state, EntityState::Dead);
        assert!(npc.respawn.pending);
        assert_eq!(world.apply_damage(id, 10), None);
        assert_eq!(world.apply_damage(12345, 10), None);
        assert_eq!(world.alive_count(), 0);
    }

    #[test]
    fn test_respawn_after_delay() {
        let mut world = NpcWorld::new(1.0);
        let id = world.spawn(&NPC_TEMPLATES[4], Vec2::new(40.0, 40.0));
        world.apply_damage(id, 1000);
        let view = Players::default();

        let mut outcomes = Vec::new();
        for _ in 0..9 {
            outcomes.extend(world.update(0.1, &mut IdleBrain, &view));
        }
        assert!(outcomes.is_empty());

        // float accumulation may need one extra step
        for _ in 0..2 {
            outcomes.extend(world.update(0.1, &mut IdleBrain, &view));
        }
        assert_eq!(outcomes, vec![NpcOutcome::Respawned { id, pos: Vec2::new(40.0, 40.0) }]);

        let npc = world.get(id).unwrap();
        assert_eq!(npc.stats.hp, npc.stats.max_hp);
        assert_eq!(npc.state, EntityState::Idle);
    }

    #[test]
    fn test_idle_brain_produces_nothing() {
        let mut world = NpcWorld::new(5.0);
        world.spawn_even_grid(&SpawnGrid::default());
        let view = Players(vec![(1, Vec2::new(25.0, 25.0))]);

        assert!(world.update(0.1, &mut IdleBrain, &view).is_empty());
    }

    #[test]
    fn test_chase_then_attack() {
        let mut world = NpcWorld::new(5.0);
        let id = world.spawn(&NPC_TEMPLATES[0], Vec2::new(0.0, 0.0));
        let view = Players(vec![(1, Vec2::new(3.0, 0.0))]);

        let first = world.update(0.1, &mut Aggressive, &view);
        assert_eq!(first[0], NpcOutcome::StateChanged { id, state: EntityState::Chase });
        match first[1] {
            NpcOutcome::Moved { pos, .. } => assert!(pos.approx_eq(Vec2::new(0.6, 0.0), 1e-5)),
            other => panic!("unexpected outcome {:?}", other),
        }

        // Close the gap to within attack range
        for _ in 0..2 {
            world.update(0.1, &mut Aggressive, &view);
        }
        assert_eq!(world.get(id).unwrap().state, EntityState::Attack);

        let mut attacks = 0;
        for _ in 0..20 {
            for outcome in world.update(0.1, &mut Aggressive, &view) {
                if let NpcOutcome::Attacked { target, damage, .. } = outcome {
                    assert_eq!((target, damage), (1, 7));
                    attacks += 1;
                }
            }
        }
        assert!((1..=2).contains(&attacks), "attacks = {attacks}");
    }

    #[test]
    fn test_chase_lost_target_goes_idle() {
        let mut world = NpcWorld::new(5.0);
        let id = world.spawn(&NPC_TEMPLATES[0], Vec2::new(0.0, 0.0));

        struct ChaseGhost;
        impl NpcBrain for ChaseGhost {
            fn think(&mut self, _npc: &Npc, _view: &dyn NpcView) -> NpcIntent {
                NpcIntent::Chase { target: 77, speed: 5.0 }
            }
        }

        let outcomes = world.update(0.1, &mut ChaseGhost, &Players::default());
        assert!(outcomes.is_empty());
        assert_eq!(world.get(id).unwrap().target, None);
    }
}
