//! Field simulation: sector-grid AOI, watcher tracking, players and NPCs

pub mod aoi;
pub mod event;
pub mod npc;
pub mod player;
pub mod sector;
pub mod simulation;
pub mod watchers;

#[cfg(test)]
pub(crate) mod testing;

/// Identifies one field (map instance)
pub type FieldId = u32;
/// Identifies a player or NPC; unique across the whole server
pub type EntityId = u64;

pub use aoi::{AoiWorld, Entity};
pub use event::{
    AoiEvent, AoiEventKind, AoiSink, CombatEvent, EntityState, Notifier, NullNotifier, StatSnapshot,
};
pub use npc::{IdleBrain, Npc, NpcBrain, NpcIntent, NpcOutcome, NpcTemplate, NpcView, NpcWorld, SpawnGrid};
pub use player::{Player, PlayerInit, PlayerStat};
pub use sector::{SectorCoord, SectorGrid};
pub use simulation::Field;
pub use watchers::{AoiSystem, WatcherIndex};
