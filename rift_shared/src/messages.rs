//! Message schema.
//!
//! The payload of every datagram is one tagged union: [`ClientMessage`]
//! upstream, [`ServerMessage`] downstream. Tags share the discriminator
//! space with the header's message-type field; the receive path verifies the
//! two agree before anything gameplay-facing runs.
//!
//! Bodies are bincode (little-endian, fixed-width ints, length-limited,
//! trailing bytes rejected), so a payload either verifies completely or the
//! datagram is discarded.

use bincode::Options;
use serde::{Deserialize, Serialize};

use crate::math::{Quat, Vec3};
use crate::wire::WireError;

/// Upper bound on an encoded payload body. Anything larger fails decode
/// before allocation.
pub const MAX_PAYLOAD_LEN: usize = 8 * 1024;

// ─── Shared gameplay types ───

/// Damage typing; resistances key off this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DamageType {
    Physical,
    Radiant,
    Frost,
    Shock,
    Necrotic,
    Void,
    Cosmic,
    Poison,
    Nature,
    Aetherial,
}

/// One resolved packet of damage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DamageInstance {
    pub amount: i32,
    pub damage_type: DamageType,
    pub is_crit: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StunSeverity {
    Light,
    Medium,
    Heavy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StunInstance {
    pub severity: StunSeverity,
    pub duration_ms: u32,
}

/// Broad status-effect buckets as the client renders them. The server keeps
/// the authoritative set per player and ships the active categories in every
/// state update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatusEffectCategory {
    Stunned,
    Rooted,
    Slowed,
    Burning,
    Chilled,
    Shocked,
    Poisoned,
    Regenerating,
    Hastened,
    Shielded,
}

/// Animation ids carried as plain u32 on the wire.
pub mod animation {
    pub const IDLE: u32 = 0;
    pub const WALKING: u32 = 1;
    pub const RUNNING: u32 = 2;
    pub const RIFTING_START: u32 = 3;
    pub const RIFTING_END: u32 = 4;
    pub const ATTACKING: u32 = 5;
    pub const CASTING: u32 = 6;
    pub const DEATH: u32 = 7;
}

/// Client's directional intent for a rift step, resolved against the
/// player's orientation basis on the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiftStepIntent {
    /// No explicit direction held; steps backward.
    DefaultBackward,
    Forward,
    Backward,
    Left,
    Right,
}

/// Gameplay effect attached to a rift step's entry or exit point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RiftStepEffect {
    AreaDamage {
        center: Vec3,
        radius: f32,
        damage: DamageInstance,
    },
    AreaStun {
        center: Vec3,
        radius: f32,
        stun: StunInstance,
    },
    PersistentAreaHeal {
        center: Vec3,
        radius: f32,
        heal_per_second: i32,
        duration_ms: u32,
    },
    ApplyBuff {
        category: StatusEffectCategory,
        duration_ms: u32,
    },
}

/// Combat outcomes broadcast to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CombatEvent {
    DamageDealt {
        source: u64,
        target: u64,
        damage: DamageInstance,
        is_kill: bool,
        is_basic_attack: bool,
    },
    ProjectileSpawned {
        projectile_id: u64,
        owner: u64,
        start: Vec3,
        direction: Vec3,
        speed: f32,
        max_range: f32,
    },
}

// ─── C2S ───

/// Client → server payloads. Tags occupy 0x0001..=0x0007.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClientMessage {
    Ping {
        client_ts_ms: u64,
    },
    JoinRequest {
        character_id: Option<String>,
    },
    MovementInput {
        client_ts_ms: u64,
        /// Client-local direction; client forward is +Y.
        local_direction: Vec3,
        is_sprinting: bool,
    },
    TurnIntent {
        client_ts_ms: u64,
        /// Yaw delta around world up, degrees.
        delta_degrees: f32,
    },
    RiftStepActivation {
        client_ts_ms: u64,
        intent: RiftStepIntent,
    },
    BasicAttackIntent {
        client_ts_ms: u64,
        /// World-space aim direction.
        aim_direction: Vec3,
        target_entity: Option<u64>,
    },
    UseAbility {
        client_ts_ms: u64,
        ability_id: u32,
        target_entity: Option<u64>,
        target_position: Option<Vec3>,
    },
}

impl ClientMessage {
    pub const TAG_PING: u16 = 0x0001;
    pub const TAG_JOIN_REQUEST: u16 = 0x0002;
    pub const TAG_MOVEMENT_INPUT: u16 = 0x0003;
    pub const TAG_TURN_INTENT: u16 = 0x0004;
    pub const TAG_RIFT_STEP: u16 = 0x0005;
    pub const TAG_BASIC_ATTACK: u16 = 0x0006;
    pub const TAG_USE_ABILITY: u16 = 0x0007;

    /// Wire tag; mirrored in the packet header's message-type field.
    pub fn tag(&self) -> u16 {
        match self {
            Self::Ping { .. } => Self::TAG_PING,
            Self::JoinRequest { .. } => Self::TAG_JOIN_REQUEST,
            Self::MovementInput { .. } => Self::TAG_MOVEMENT_INPUT,
            Self::TurnIntent { .. } => Self::TAG_TURN_INTENT,
            Self::RiftStepActivation { .. } => Self::TAG_RIFT_STEP,
            Self::BasicAttackIntent { .. } => Self::TAG_BASIC_ATTACK,
            Self::UseAbility { .. } => Self::TAG_USE_ABILITY,
        }
    }
}

// ─── S2C ───

/// Server → client payloads. Tags occupy 0x8001..=0x8007.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ServerMessage {
    Pong {
        client_ts_ms: u64,
        server_ts_ms: u64,
    },
    JoinSuccess {
        player_id: u64,
        welcome_text: String,
        tick_rate_hz: u32,
    },
    JoinFailed {
        reason: String,
        /// 0 = malformed, 1 = already logged in, 2 = server error.
        code: i16,
    },
    EntityStateUpdate {
        player_id: u64,
        position: Vec3,
        orientation: Quat,
        health: i32,
        max_health: i32,
        will: i32,
        max_will: i32,
        server_ts_ms: u64,
        animation_state: u32,
        active_effects: Vec<StatusEffectCategory>,
    },
    RiftStepInitiated {
        player_id: u64,
        start_position: Vec3,
        /// Where the step aimed before collision.
        intended_position: Vec3,
        /// Where the player actually landed.
        actual_position: Vec3,
        /// Client cosmetic only; the server resolves the move instantly.
        travel_duration_sec: f32,
        entry_effects: Vec<RiftStepEffect>,
        exit_effects: Vec<RiftStepEffect>,
    },
    CombatEvent(CombatEvent),
    SystemBroadcast {
        message: String,
    },
}

impl ServerMessage {
    pub const TAG_PONG: u16 = 0x8001;
    pub const TAG_JOIN_SUCCESS: u16 = 0x8002;
    pub const TAG_JOIN_FAILED: u16 = 0x8003;
    pub const TAG_ENTITY_STATE_UPDATE: u16 = 0x8004;
    pub const TAG_RIFT_STEP_INITIATED: u16 = 0x8005;
    pub const TAG_COMBAT_EVENT: u16 = 0x8006;
    pub const TAG_SYSTEM_BROADCAST: u16 = 0x8007;

    /// Wire tag; mirrored in the packet header's message-type field.
    pub fn tag(&self) -> u16 {
        match self {
            Self::Pong { .. } => Self::TAG_PONG,
            Self::JoinSuccess { .. } => Self::TAG_JOIN_SUCCESS,
            Self::JoinFailed { .. } => Self::TAG_JOIN_FAILED,
            Self::EntityStateUpdate { .. } => Self::TAG_ENTITY_STATE_UPDATE,
            Self::RiftStepInitiated { .. } => Self::TAG_RIFT_STEP_INITIATED,
            Self::CombatEvent(_) => Self::TAG_COMBAT_EVENT,
            Self::SystemBroadcast { .. } => Self::TAG_SYSTEM_BROADCAST,
        }
    }
}

// ─── Codec ───

fn encode_options() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .with_little_endian()
}

fn decode_options() -> impl Options {
    // Decode additionally bounds allocation against hostile length prefixes.
    encode_options().with_limit(MAX_PAYLOAD_LEN as u64)
}

pub fn encode_client(msg: &ClientMessage) -> Vec<u8> {
    encode_options()
        .serialize(msg)
        .expect("serializing to a vec cannot fail")
}

pub fn encode_server(msg: &ServerMessage) -> Vec<u8> {
    encode_options()
        .serialize(msg)
        .expect("serializing to a vec cannot fail")
}

/// Verifies and decodes a C2S payload against the header tag. Trailing bytes
/// or a union/header tag disagreement reject the datagram.
pub fn decode_client(header_tag: u16, payload: &[u8]) -> Result<ClientMessage, WireError> {
    let msg: ClientMessage = decode_options()
        .deserialize(payload)
        .map_err(|e| WireError::BadPayload(e.to_string()))?;
    if msg.tag() != header_tag {
        return Err(WireError::TagMismatch {
            header: header_tag,
            payload: msg.tag(),
        });
    }
    Ok(msg)
}

/// Verifies and decodes an S2C payload against the header tag.
pub fn decode_server(header_tag: u16, payload: &[u8]) -> Result<ServerMessage, WireError> {
    let msg: ServerMessage = decode_options()
        .deserialize(payload)
        .map_err(|e| WireError::BadPayload(e.to_string()))?;
    if msg.tag() != header_tag {
        return Err(WireError::TagMismatch {
            header: header_tag,
            payload: msg.tag(),
        });
    }
    Ok(msg)
}
