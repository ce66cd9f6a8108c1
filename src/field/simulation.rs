//! Simulation state of one field
//!
//! A [`Field`] is owned by exactly one actor thread. It applies queued
//! messages, integrates player movement at a fixed step, runs the NPC world
//! at its own fixed step and pushes every visible consequence through the
//! field's [`AoiSystem`].

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

use hashbrown::HashMap;
use rustc_hash::FxBuildHasher;
use smallvec::SmallVec;
use tracing::{debug, info, warn};

use super::event::{AoiEvent, CombatEvent, EntityState, Notifier, StatSnapshot};
use super::npc::{IdleBrain, Npc, NpcBrain, NpcOutcome, NpcTemplate, NpcView, NpcWorld, SpawnGrid};
use super::player::{Player, PlayerInit};
use super::watchers::AoiSystem;
use super::{EntityId, FieldId};
use crate::config::FieldConfig;
use crate::metrics::Metrics;
use crate::net::session::SessionHandle;
use crate::util::vec2::Vec2;
use crate::worker::codec::{self, CodecError, Envelope, MoveCmd, SkillCmd};
use crate::worker::message::FieldMessage;

type PlayerTable = HashMap<EntityId, Player, FxBuildHasher>;

/// Players of a field as seen by NPC brains
struct PlayerView<'a> {
    players: &'a PlayerTable,
}

impl NpcView for PlayerView<'_> {
    fn player_position(&self, id: EntityId) -> Option<Vec2> {
        self.players.get(&id).map(|p| p.pos)
    }

    fn closest_player(&self, pos: Vec2, range: f32) -> Option<(EntityId, Vec2)> {
        let range_sq = range * range;
        self.players
            .values()
            .map(|p| (p.id, p.pos, p.pos.distance_sq_to(pos)))
            .filter(|(_, _, d)| *d <= range_sq)
            .min_by(|a, b| a.2.total_cmp(&b.2))
            .map(|(id, p, _)| (id, p))
    }
}

pub struct Field {
    id: FieldId,
    config: FieldConfig,
    aoi: AoiSystem,
    players: PlayerTable,
    npcs: NpcWorld,
    brain: Box<dyn NpcBrain>,
    world_time: f64,
    player_acc: f32,
    npc_acc: f32,
    player_steps: u64,
    npc_steps: u64,
    metrics: Arc<Metrics>,
}

impl Field {
    pub fn new(id: FieldId, config: FieldConfig, notifier: Box<dyn Notifier>, metrics: Arc<Metrics>) -> Self {
        let aoi = AoiSystem::new(config.sector_size, config.view_radius, notifier, metrics.clone());
        let npcs = NpcWorld::new(config.npc_respawn_secs);
        Self {
            id,
            config,
            aoi,
            players: PlayerTable::default(),
            npcs,
            brain: Box::new(IdleBrain),
            world_time: 0.0,
            player_acc: 0.0,
            npc_acc: 0.0,
            player_steps: 0,
            npc_steps: 0,
            metrics,
        }
    }

    /// Replace the NPC decision logic
    pub fn with_brain(mut self, brain: Box<dyn NpcBrain>) -> Self {
        self.brain = brain;
        self
    }

    /// Apply one queued message to completion
    pub fn handle_message(&mut self, msg: FieldMessage) {
        match msg {
            FieldMessage::NetEnvelope { session, payload } => self.on_net_envelope(&session, &payload),
            FieldMessage::EnterField { player } => self.add_player(player),
            FieldMessage::LeaveField { player_id } => self.remove_player(player_id),
            FieldMessage::MoveInput { session, payload } => match codec::decode::<MoveCmd>(&payload) {
                Ok(cmd) => self.on_move_input(session.player_id(), cmd),
                Err(e) => self.drop_malformed("move", e),
            },
            FieldMessage::SkillCmd { session, payload } => match codec::decode::<SkillCmd>(&payload) {
                Ok(cmd) => self.on_skill(session.player_id(), cmd),
                Err(e) => self.drop_malformed("skill", e),
            },
            FieldMessage::Tick { dt } => self.step(dt),
            FieldMessage::SetViewRadius { radius } => self.set_view_radius(radius),
            FieldMessage::Exec(job) => job(self),
        }
    }

    fn on_net_envelope(&mut self, session: &SessionHandle, payload: &[u8]) {
        match codec::decode::<Envelope>(payload) {
            Ok(Envelope::Move(cmd)) => self.on_move_input(session.player_id(), cmd),
            Ok(Envelope::Skill(cmd)) => self.on_skill(session.player_id(), cmd),
            Ok(Envelope::Leave) => self.remove_player(session.player_id()),
            Err(e) => self.drop_malformed("envelope", e),
        }
    }

    fn drop_malformed(&self, kind: &str, error: CodecError) {
        self.metrics.messages_malformed.fetch_add(1, Ordering::Relaxed);
        warn!(field_id = self.id, "Dropping malformed {} payload: {}", kind, error);
    }

    /// Bring a player into the field: AOI registration (Snapshot of everything
    /// already in view), then a Snapshot of itself.
    pub fn add_player(&mut self, init: PlayerInit) {
        let id = init.id;
        let pos = init.pos;
        if self.players.insert(id, Player::new(init)).is_none() {
            self.metrics.players_active.fetch_add(1, Ordering::Relaxed);
        }

        self.aoi.set_initialized(true);
        self.aoi.add_entity(id, true, pos);
        self.aoi.notify_self(id, &AoiEvent::snapshot(id, pos));

        info!(field_id = self.id, player_id = id, "Player entered field at ({:.1}, {:.1})", pos.x, pos.y);
    }

    pub fn remove_player(&mut self, player_id: EntityId) {
        self.aoi.remove_entity(player_id);
        if self.players.remove(&player_id).is_some() {
            self.metrics.players_active.fetch_sub(1, Ordering::Relaxed);
            info!(field_id = self.id, player_id, "Player left field");
        }
    }

    /// Movement input. Only the session owning `cmd.entity_id` may steer it.
    pub fn on_move_input(&mut self, session_player: EntityId, cmd: MoveCmd) {
        if session_player != cmd.entity_id {
            warn!(
                field_id = self.id,
                session_player,
                entity_id = cmd.entity_id,
                "Move input for a foreign entity rejected"
            );
            return;
        }
        let Some(player) = self.players.get_mut(&cmd.entity_id) else {
            debug!(field_id = self.id, player_id = cmd.entity_id, "Move input for unknown player");
            return;
        };
        player.apply_input(cmd.dir, self.config.player_speed, self.world_time);
    }

    /// Player skill hit on an NPC: flat damage, death removes it from view
    pub fn on_skill(&mut self, attacker: EntityId, cmd: SkillCmd) {
        if !self.players.contains_key(&attacker) {
            debug!(field_id = self.id, attacker, "Skill from a player not in this field");
            return;
        }
        let Some(result) = self.npcs.apply_damage(cmd.target_id, self.config.skill_damage) else {
            debug!(field_id = self.id, attacker, target = cmd.target_id, "Skill target not alive");
            return;
        };

        if result.died {
            self.metrics.npcs_alive.fetch_sub(1, Ordering::Relaxed);
            self.aoi.broadcast_state(cmd.target_id, EntityState::Dead);
            self.aoi.remove_entity(cmd.target_id);
            debug!(
                field_id = self.id,
                attacker,
                npc = cmd.target_id,
                alive = self.npcs.alive_count(),
                "NPC died"
            );
        } else if let Some(npc) = self.npcs.get(cmd.target_id) {
            let stat = StatSnapshot {
                hp: npc.stats.hp,
                max_hp: npc.stats.max_hp,
            };
            self.aoi.broadcast_stat(cmd.target_id, stat);
        }
    }

    pub fn set_view_radius(&mut self, radius: i32) {
        self.config.view_radius = radius.max(1);
        self.aoi.set_view_radius(radius);
    }

    pub fn spawn_npc(&mut self, template: &NpcTemplate, pos: Vec2) -> EntityId {
        let id = self.npcs.spawn(template, pos);
        self.aoi.add_entity(id, false, pos);
        self.metrics.npcs_alive.fetch_add(1, Ordering::Relaxed);
        id
    }

    /// Populate the field with the initial NPC grid
    pub fn spawn_npc_grid(&mut self, grid: &SpawnGrid) -> usize {
        let spawned = self.npcs.spawn_even_grid(grid);
        for (id, pos) in &spawned {
            self.aoi.add_entity(*id, false, *pos);
        }
        self.metrics.npcs_alive.fetch_add(spawned.len() as u64, Ordering::Relaxed);
        info!(field_id = self.id, count = spawned.len(), "Spawned NPC grid");
        spawned.len()
    }

    /// Advance the field by `dt` seconds of wall time.
    ///
    /// Player and NPC updates run at their own fixed steps with bounded
    /// catch-up; leftover time stays in the accumulators.
    pub fn step(&mut self, dt: f32) {
        if !dt.is_finite() || dt <= 0.0 {
            return;
        }
        let started = Instant::now();
        self.world_time += dt as f64;

        let player_step = self.config.player_step_secs;
        self.player_acc += dt;
        let mut loops = 0;
        while self.player_acc >= player_step && loops < self.config.max_player_steps {
            self.tick_players(player_step);
            self.player_acc -= player_step;
            loops += 1;
        }

        let npc_step = self.config.npc_step_secs;
        self.npc_acc += dt;
        let mut loops = 0;
        while self.npc_acc >= npc_step && loops < self.config.max_npc_steps {
            self.tick_npcs(npc_step);
            self.npc_acc -= npc_step;
            loops += 1;
        }

        self.metrics.record_tick_time(started.elapsed());
    }

    fn tick_players(&mut self, step: f32) {
        self.player_steps += 1;
        let now = self.world_time;
        let timeout = self.config.idle_input_timeout_secs as f64;

        let mut moved: SmallVec<[(EntityId, Vec2); 16]> = SmallVec::new();
        for player in self.players.values_mut() {
            if player.input_timed_out(now, timeout) {
                player.stop();
                continue;
            }
            if !player.movement.moving {
                continue;
            }
            let next = player.next_position(step);
            if !Self::is_walkable(player.pos, next) {
                continue;
            }
            player.pos = next;
            moved.push((player.id, next));
        }

        for (id, pos) in moved {
            self.aoi.move_entity(id, pos);
        }
    }

    fn tick_npcs(&mut self, step: f32) {
        self.npc_steps += 1;
        let view = PlayerView { players: &self.players };
        let outcomes = self.npcs.update(step, self.brain.as_mut(), &view);

        for outcome in outcomes {
            match outcome {
                NpcOutcome::StateChanged { id, state } => self.aoi.broadcast_state(id, state),
                NpcOutcome::Moved { id, pos } => self.aoi.move_entity(id, pos),
                NpcOutcome::Attacked { npc, target, damage } => self.npc_hits_player(npc, target, damage),
                NpcOutcome::Respawned { id, pos } => {
                    self.metrics.npcs_alive.fetch_add(1, Ordering::Relaxed);
                    self.aoi.add_entity(id, false, pos);
                    self.aoi.broadcast_state(id, EntityState::Idle);
                }
            }
        }
    }

    fn npc_hits_player(&mut self, npc: EntityId, target: EntityId, damage: i32) {
        let Some(player) = self.players.get_mut(&target) else {
            return;
        };
        let remaining_hp = player.take_damage(damage);
        let stat = player.stat.snapshot();

        self.aoi.send_combat(&CombatEvent {
            attacker: npc,
            target,
            damage,
            remaining_hp,
        });
        self.aoi.broadcast_stat(target, stat);
    }

    /// Map collision hook. There is no map data yet, so only non-finite
    /// positions are refused.
    fn is_walkable(_from: Vec2, to: Vec2) -> bool {
        to.is_finite()
    }

    pub fn id(&self) -> FieldId {
        self.id
    }

    pub fn world_time(&self) -> f64 {
        self.world_time
    }

    pub fn player(&self, id: EntityId) -> Option<&Player> {
        self.players.get(&id)
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    pub fn npc(&self, id: EntityId) -> Option<&Npc> {
        self.npcs.get(id)
    }

    pub fn npcs(&self) -> &NpcWorld {
        &self.npcs
    }

    pub fn aoi(&self) -> &AoiSystem {
        &self.aoi
    }

    /// (player steps, NPC steps) run so far
    pub fn steps_run(&self) -> (u64, u64) {
        (self.player_steps, self.npc_steps)
    }
}
