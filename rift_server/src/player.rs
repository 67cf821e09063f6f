//! Player state and registry.
//!
//! `PlayerState` is mutated only on the simulation task; the registry mutex
//! exists so the dispatch path can answer existence queries without touching
//! gameplay fields. The dirty flag is atomic because it is the one field the
//! broadcast step reads-and-clears.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use rift_shared::math::{Quat, Vec3};
use rift_shared::messages::{animation, DamageType, StatusEffectCategory};

use crate::content::{RiftStepDefinition, WeaponCategory};
use crate::physics::ControllerHandle;

/// Cooldown-map key for the rift step.
pub const RIFTSTEP_ABILITY_ID: u32 = 1;
/// Cooldown-map key for the basic attack.
pub const BASIC_ATTACK_ABILITY_ID: u32 = 2;

pub const DEFAULT_CAPSULE_RADIUS: f32 = 0.3;
pub const DEFAULT_CAPSULE_HALF_HEIGHT: f32 = 0.9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MovementState {
    Idle,
    Walking,
    Sprinting,
    Stunned,
    Rooted,
    Dead,
    AbilityInUse,
}

/// Flat-then-percent mitigation for one damage type.
#[derive(Debug, Clone, Copy, Default)]
pub struct Resistance {
    pub flat: i32,
    pub percent: f32,
}

#[derive(Debug, Clone, Copy)]
pub struct DamageOutcome {
    pub final_damage: i32,
    pub was_kill: bool,
}

/// Authoritative per-player state.
#[derive(Debug)]
pub struct PlayerState {
    pub id: u64,
    /// Character the session asked to load, if any.
    pub character_id: Option<String>,
    pub position: Vec3,
    pub orientation: Quat,
    pub capsule_radius: f32,
    pub capsule_half_height: f32,

    pub health: i32,
    pub max_health: i32,
    pub will: i32,
    pub max_will: i32,
    pub resistances: HashMap<DamageType, Resistance>,

    pub movement_state: MovementState,
    pub animation_state: u32,
    pub status_effects: Vec<StatusEffectCategory>,

    /// Ability id → deadline. Entries are pruned lazily on query.
    cooldowns: HashMap<u32, Instant>,
    /// Global multiplier applied to every cooldown duration.
    pub cooldown_modifier: f32,

    pub rift_step: RiftStepDefinition,
    pub weapon_category: WeaponCategory,
    pub weapon_id: u32,

    pub controller: Option<ControllerHandle>,

    dirty: AtomicBool,
}

impl PlayerState {
    pub fn new(id: u64, spawn: Vec3) -> Self {
        Self {
            id,
            character_id: None,
            position: spawn,
            orientation: Quat::IDENTITY,
            capsule_radius: DEFAULT_CAPSULE_RADIUS,
            capsule_half_height: DEFAULT_CAPSULE_HALF_HEIGHT,
            health: 100,
            max_health: 100,
            will: 100,
            max_will: 100,
            resistances: HashMap::new(),
            movement_state: MovementState::Idle,
            animation_state: animation::IDLE,
            status_effects: Vec::new(),
            cooldowns: HashMap::new(),
            cooldown_modifier: 1.0,
            rift_step: RiftStepDefinition::standard(),
            weapon_category: WeaponCategory::MeleeSword,
            weapon_id: crate::content::DEFAULT_WEAPON_ID,
            controller: None,
            dirty: AtomicBool::new(true),
        }
    }

    pub fn set_position(&mut self, pos: Vec3) {
        self.position = pos;
        self.mark_dirty();
    }

    /// Orientation stays a unit quaternion regardless of input.
    pub fn set_orientation(&mut self, orientation: Quat) {
        self.orientation = orientation.normalized();
        self.mark_dirty();
    }

    pub fn set_health(&mut self, value: i32) {
        self.health = value.clamp(0, self.max_health);
        self.mark_dirty();
    }

    pub fn heal(&mut self, amount: i32) {
        self.set_health(self.health.saturating_add(amount.max(0)));
    }

    /// Applies typed damage through this player's mitigation. Lethal damage
    /// flips the movement state to Dead.
    pub fn take_damage(&mut self, raw: i32, damage_type: DamageType) -> DamageOutcome {
        let res = self.resistances.get(&damage_type).copied().unwrap_or_default();
        let after_flat = (raw - res.flat).max(0);
        let mitigated = (after_flat as f32 * (1.0 - res.percent.clamp(0.0, 1.0))) as i32;
        let final_damage = mitigated.max(0);

        self.health = (self.health - final_damage).max(0);
        let was_kill = self.health == 0 && final_damage > 0;
        if was_kill {
            self.movement_state = MovementState::Dead;
            self.animation_state = animation::DEATH;
        }
        self.mark_dirty();
        DamageOutcome {
            final_damage,
            was_kill,
        }
    }

    pub fn set_will(&mut self, value: i32) {
        self.will = value.clamp(0, self.max_will);
        self.mark_dirty();
    }

    pub fn deduct_will(&mut self, amount: i32) {
        self.set_will(self.will - amount.max(0));
    }

    pub fn set_movement_state(&mut self, state: MovementState) {
        self.movement_state = state;
        self.mark_dirty();
    }

    pub fn set_animation_state(&mut self, state: u32) {
        self.animation_state = state;
        self.mark_dirty();
    }

    pub fn add_status_effects(&mut self, effects: &[StatusEffectCategory]) {
        for e in effects {
            if !self.status_effects.contains(e) {
                self.status_effects.push(*e);
            }
        }
        self.mark_dirty();
    }

    pub fn remove_status_effects(&mut self, effects: &[StatusEffectCategory]) {
        self.status_effects.retain(|e| !effects.contains(e));
        self.mark_dirty();
    }

    pub fn is_on_cooldown(&self, ability_id: u32, now: Instant) -> bool {
        self.cooldowns
            .get(&ability_id)
            .is_some_and(|deadline| *deadline > now)
    }

    /// Starts a cooldown of `duration_sec`, scaled by the player's global
    /// cooldown modifier.
    pub fn set_cooldown(&mut self, ability_id: u32, duration_sec: f32, now: Instant) {
        let scaled = (duration_sec * self.cooldown_modifier).max(0.0);
        self.cooldowns
            .insert(ability_id, now + Duration::from_secs_f32(scaled));
    }

    /// Movement-gating check shared by movement and ability paths.
    pub fn is_incapacitated(&self) -> bool {
        matches!(
            self.movement_state,
            MovementState::Stunned | MovementState::Rooted | MovementState::Dead
        )
    }

    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Reads and clears the dirty flag; the broadcast step is the only
    /// caller.
    pub fn take_dirty(&self) -> bool {
        self.dirty.swap(false, Ordering::AcqRel)
    }
}

/// Id-keyed player storage. Ids are allocated monotonically and never
/// reused, so stale handles can only miss, not alias.
#[derive(Debug, Default)]
pub struct PlayerRegistry {
    players: Mutex<HashMap<u64, PlayerState>>,
    next_id: AtomicU64,
}

impl PlayerRegistry {
    pub fn new() -> Self {
        Self {
            players: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn allocate_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn insert(&self, player: PlayerState) {
        self.lock().insert(player.id, player);
    }

    pub fn remove(&self, id: u64) -> Option<PlayerState> {
        self.lock().remove(&id)
    }

    pub fn contains(&self, id: u64) -> bool {
        self.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Runs `f` with the whole table locked. The simulation task uses this
    /// for command processing and the dirty-broadcast enumeration.
    pub fn with_table<R>(&self, f: impl FnOnce(&mut HashMap<u64, PlayerState>) -> R) -> R {
        f(&mut self.lock())
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<u64, PlayerState>> {
        self.players.lock().unwrap_or_else(|e| e.into_inner())
    }
}
