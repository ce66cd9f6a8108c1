use std::fmt;

use crate::field::{EntityId, Field, PlayerInit};
use crate::net::session::SessionHandle;

/// Closure executed on a field's own thread
pub type FieldJob = Box<dyn FnOnce(&mut Field) + Send + 'static>;

/// Everything a field actor can be asked to do
pub enum FieldMessage {
    /// Undecoded client frame; routed further by its decoded kind
    NetEnvelope { session: SessionHandle, payload: Vec<u8> },
    EnterField { player: PlayerInit },
    LeaveField { player_id: EntityId },
    /// Encoded `MoveCmd`
    MoveInput { session: SessionHandle, payload: Vec<u8> },
    /// Encoded `SkillCmd`
    SkillCmd { session: SessionHandle, payload: Vec<u8> },
    /// Advance the simulation by `dt` seconds of wall time
    Tick { dt: f32 },
    SetViewRadius { radius: i32 },
    Exec(FieldJob),
}

impl FieldMessage {
    pub fn exec(job: impl FnOnce(&mut Field) + Send + 'static) -> Self {
        Self::Exec(Box::new(job))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::NetEnvelope { .. } => "net_envelope",
            Self::EnterField { .. } => "enter_field",
            Self::LeaveField { .. } => "leave_field",
            Self::MoveInput { .. } => "move_input",
            Self::SkillCmd { .. } => "skill_cmd",
            Self::Tick { .. } => "tick",
            Self::SetViewRadius { .. } => "set_view_radius",
            Self::Exec(_) => "exec",
        }
    }
}

impl fmt::Debug for FieldMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NetEnvelope { session, payload }
            | Self::MoveInput { session, payload }
            | Self::SkillCmd { session, payload } => f
                .debug_struct(self.kind())
                .field("player_id", &session.player_id())
                .field("payload_len", &payload.len())
                .finish(),
            Self::EnterField { player } => f.debug_struct("enter_field").field("player_id", &player.id).finish(),
            Self::LeaveField { player_id } => f.debug_struct("leave_field").field("player_id", player_id).finish(),
            Self::Tick { dt } => f.debug_struct("tick").field("dt", dt).finish(),
            Self::SetViewRadius { radius } => f.debug_struct("set_view_radius").field("radius", radius).finish(),
            Self::Exec(_) => f.write_str("exec"),
        }
    }
}
