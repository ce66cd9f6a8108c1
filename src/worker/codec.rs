//! Inbound field command payloads
//!
//! Uses bincode legacy config (fixed-size little-endian integers) so the
//! layout stays stable for non-Rust clients.

use serde::{Deserialize, Serialize};

use crate::field::EntityId;
use crate::util::vec2::Vec2;

/// Client movement input. `dir` is a raw direction, normalized server side.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MoveCmd {
    pub entity_id: EntityId,
    pub dir: Vec2,
}

/// Client skill use against a target entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillCmd {
    pub skill: u8,
    pub target_id: EntityId,
}

/// Generic client frame routed to a field without a pre-decoded kind
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Envelope {
    Move(MoveCmd),
    Skill(SkillCmd),
    /// Leave the field the session is currently in
    Leave,
}

#[derive(Debug, thiserror::Error)]
#[error("Codec error: {0}")]
pub struct CodecError(String);

pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>, CodecError> {
    bincode::serde::encode_to_vec(message, bincode::config::legacy())
        .map_err(|e| CodecError(e.to_string()))
}

pub fn decode<T: for<'de> Deserialize<'de>>(data: &[u8]) -> Result<T, CodecError> {
    bincode::serde::decode_from_slice(data, bincode::config::legacy())
        .map(|(msg, _)| msg)
        .map_err(|e| CodecError(e.to_string()))
}
