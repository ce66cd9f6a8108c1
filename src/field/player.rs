//! Server-authoritative player state held by a field

use super::event::StatSnapshot;
use super::EntityId;
use crate::util::vec2::Vec2;

/// Inputs shorter than this are treated as "stop"
const MIN_INPUT_LEN_SQ: f32 = 1e-4;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MoveState {
    /// Last normalized input direction
    pub dir: Vec2,
    pub moving: bool,
    /// World units per second
    pub speed: f32,
    /// Field time (seconds) of the last accepted input
    pub last_input_time: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayerStat {
    pub hp: i32,
    pub max_hp: i32,
}

impl Default for PlayerStat {
    fn default() -> Self {
        Self { hp: 100, max_hp: 100 }
    }
}

impl PlayerStat {
    /// Set hp, clamped to `0..=max_hp`
    pub fn set_hp(&mut self, hp: i32) {
        self.hp = hp.clamp(0, self.max_hp.max(0));
    }

    pub fn snapshot(&self) -> StatSnapshot {
        StatSnapshot {
            hp: self.hp,
            max_hp: self.max_hp,
        }
    }
}

/// Data needed to bring a player into a field
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerInit {
    pub id: EntityId,
    pub name: String,
    pub pos: Vec2,
    pub stat: PlayerStat,
}

impl PlayerInit {
    pub fn new(id: EntityId, name: impl Into<String>, pos: Vec2) -> Self {
        Self {
            id,
            name: name.into(),
            pos,
            stat: PlayerStat::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Player {
    pub id: EntityId,
    pub name: String,
    pub pos: Vec2,
    pub movement: MoveState,
    pub stat: PlayerStat,
}

impl Player {
    pub fn new(init: PlayerInit) -> Self {
        Self {
            id: init.id,
            name: init.name,
            pos: init.pos,
            movement: MoveState::default(),
            stat: init.stat,
        }
    }

    /// Apply a client move input. Returns false when the input stopped the player.
    pub fn apply_input(&mut self, dir: Vec2, speed: f32, now: f64) -> bool {
        self.movement.last_input_time = now;
        if !dir.is_finite() || dir.length_sq() < MIN_INPUT_LEN_SQ {
            self.stop();
            return false;
        }
        self.movement.dir = dir.normalize();
        self.movement.speed = speed;
        self.movement.moving = true;
        true
    }

    pub fn stop(&mut self) {
        self.movement.moving = false;
        self.movement.dir = Vec2::ZERO;
        self.movement.speed = 0.0;
    }

    /// True if the player is moving but has not sent input for `timeout` seconds
    pub fn input_timed_out(&self, now: f64, timeout: f64) -> bool {
        self.movement.moving && now - self.movement.last_input_time > timeout
    }

    /// Position after one step of `step` seconds at the current heading
    pub fn next_position(&self, step: f32) -> Vec2 {
        self.pos + self.movement.dir * (self.movement.speed * step)
    }

    /// Subtract `damage` from hp, returning the remaining hp
    pub fn take_damage(&mut self, damage: i32) -> i32 {
        self.stat.set_hp(self.stat.hp.saturating_sub(damage));
        self.stat.hp
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn player() -> Player {
        Player::new(PlayerInit::new(1, "tester", Vec2::new(10.0, 10.0)))
    }

    #[test]
    fn test_apply_input_normalizes() {
        let mut p = player();
        assert!(p.apply_input(Vec2::new(0.0, 3.0), 10.0, 1.5));
        assert!(p.movement.moving);
        assert_eq!(p.movement.dir, Vec2::new(0.0, 1.0));
        assert_eq!(p.movement.last_input_time, 1.5);
        assert!(p.next_position(0.05).approx_eq(Vec2::new(10.0, 10.5), 1e-5));
    }

    #[test]
    fn test_tiny_input_stops() {
        let mut p = player();
        p.apply_input(Vec2::new(1.0, 0.0), 10.0, 0.0);
        assert!(!p.apply_input(Vec2::new(0.001, 0.001), 10.0, 0.1));
        assert!(!p.movement.moving);
        assert!(!p.apply_input(Vec2::new(f32::NAN, 1.0), 10.0, 0.2));
    }

    #[test]
    fn test_input_timeout() {
        let mut p = player();
        p.apply_input(Vec2::new(1.0, 0.0), 10.0, 1.0);
        assert!(!p.input_timed_out(1.4, 0.5));
        assert!(p.input_timed_out(1.6, 0.5));
        p.stop();
        assert!(!p.input_timed_out(5.0, 0.5));
    }

    #[test]
    fn test_hp_clamped() {
        let mut p = player();
        assert_eq!(p.take_damage(30), 70);
        assert_eq!(p.take_damage(500), 0);
        p.stat.set_hp(1000);
        assert_eq!(p.stat.hp, 100);
        assert_eq!(p.stat.snapshot(), StatSnapshot { hp: 100, max_hp: 100 });
    }
}
