//! Gameplay engine.
//!
//! Movement integration, turning, rift steps, attacks, abilities. Runs only
//! on the simulation task, with the player table locked and exclusive access
//! to the physics world. Commands arriving slightly out of order are safe
//! here: positions and orientations are last-write-wins, and every ability
//! path re-checks its cooldown.

use std::collections::HashMap;
use std::time::Instant;

use rift_shared::math::Vec3;
use rift_shared::messages::{animation, CombatEvent, DamageInstance, RiftStepEffect, RiftStepIntent};
use tracing::{debug, error};

use crate::content::{self, AbilityKind};
use crate::physics::{filter, FilterData, FilterVerdict, PhysicsWorld, ProjectileProps, ShapeInfo};
use crate::player::{
    MovementState, PlayerState, BASIC_ATTACK_ABILITY_ID, RIFTSTEP_ABILITY_ID,
};

pub const BASE_WALK_SPEED_MPS: f32 = 3.0;
pub const SPRINT_SPEED_MULTIPLIER: f32 = 1.5;
pub const RIFTSTEP_MIN_COOLDOWN_SEC: f32 = 0.25;

/// Why a player action was refused. Refusals are normal traffic, not errors;
/// callers log at debug and move on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionRefusal {
    Incapacitated,
    AbilityInUse,
    OnCooldown,
    InsufficientWill,
    UnknownContent,
    NoSuchPlayer,
}

/// Resolved rift step, ready to broadcast.
#[derive(Debug, Clone)]
pub struct RiftStepOutcome {
    pub start: Vec3,
    pub intended: Vec3,
    pub actual: Vec3,
    pub travel_duration_sec: f32,
    pub entry_effects: Vec<RiftStepEffect>,
    pub exit_effects: Vec<RiftStepEffect>,
}

#[derive(Debug, Default)]
pub struct GameplayEngine {
    next_projectile_id: u64,
}

impl GameplayEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Integrates one movement input through the character controller.
    pub fn process_movement(
        &mut self,
        player: &mut PlayerState,
        physics: &mut dyn PhysicsWorld,
        local_direction: Vec3,
        is_sprinting: bool,
        dt_sec: f32,
    ) {
        if player.is_incapacitated() {
            return;
        }
        let world_dir = player.orientation.rotate(local_direction).normalized();
        if world_dir == Vec3::ZERO {
            return;
        }

        let speed = BASE_WALK_SPEED_MPS
            * if is_sprinting {
                SPRINT_SPEED_MULTIPLIER
            } else {
                1.0
            };
        let displacement = world_dir * (speed * dt_sec);

        let new_pos = match player.controller {
            Some(handle) => {
                physics.move_character(handle, displacement, dt_sec);
                match physics.get_position(handle) {
                    Some(pos) => pos,
                    None => {
                        error!(player_id = player.id, "character controller missing; skipping move");
                        return;
                    }
                }
            }
            None => player.position + displacement,
        };

        player.set_position(new_pos);
        player.set_movement_state(if is_sprinting {
            MovementState::Sprinting
        } else {
            MovementState::Walking
        });
        player.set_animation_state(if is_sprinting {
            animation::RUNNING
        } else {
            animation::WALKING
        });
    }

    /// Applies a yaw delta and propagates the pose to the controller.
    pub fn turn_player(
        &mut self,
        player: &mut PlayerState,
        physics: &mut dyn PhysicsWorld,
        delta_degrees: f32,
    ) {
        let delta = rift_shared::math::Quat::from_yaw_degrees(delta_degrees);
        player.set_orientation(delta.mul(player.orientation));
        if let Some(handle) = player.controller {
            physics.set_pose(handle, player.position, player.orientation);
        }
    }

    /// Resolves a rift step: direction from intent, capsule sweep against
    /// blocking geometry, instant position update, cooldown, effects.
    pub fn execute_rift_step(
        &mut self,
        player: &mut PlayerState,
        physics: &mut dyn PhysicsWorld,
        intent: RiftStepIntent,
        now: Instant,
    ) -> Result<RiftStepOutcome, ActionRefusal> {
        if player.is_incapacitated() {
            return Err(ActionRefusal::Incapacitated);
        }
        if player.movement_state == MovementState::AbilityInUse {
            return Err(ActionRefusal::AbilityInUse);
        }
        if player.is_on_cooldown(RIFTSTEP_ABILITY_ID, now) {
            return Err(ActionRefusal::OnCooldown);
        }

        let forward = player.orientation.forward();
        let right = player.orientation.right();
        let dir = match intent {
            RiftStepIntent::Forward => forward,
            RiftStepIntent::Backward | RiftStepIntent::DefaultBackward => -forward,
            RiftStepIntent::Left => -right,
            RiftStepIntent::Right => right,
        }
        .normalized();

        let def = player.rift_step;
        let start = player.position;
        let intended = start + dir * def.distance;

        // Dense geometry blocks the step; minor clutter does not.
        let step_filter = |info: &ShapeInfo| {
            if info.filter.0[0] & filter::DENSE != 0 {
                FilterVerdict::Block
            } else {
                FilterVerdict::Ignore
            }
        };
        let actual = match physics.sweep_capsule(
            start,
            player.orientation,
            player.capsule_radius,
            player.capsule_half_height,
            dir,
            def.distance,
            player.id,
            FilterData::default(),
            Some(&step_filter),
        ) {
            Some(hit) => start + dir * hit.distance,
            None => intended,
        };

        player.set_position(actual);
        if let Some(handle) = player.controller {
            physics.set_pose(handle, actual, player.orientation);
        }

        let cooldown_sec = def.cooldown_sec.max(RIFTSTEP_MIN_COOLDOWN_SEC);
        player.set_cooldown(RIFTSTEP_ABILITY_ID, cooldown_sec, now);
        // Actionable immediately; the travel time is cosmetic.
        player.set_movement_state(MovementState::Idle);
        player.set_animation_state(animation::RIFTING_END);

        Ok(RiftStepOutcome {
            start,
            intended,
            actual,
            travel_duration_sec: def.travel_duration_sec,
            entry_effects: def.entry_effects(start),
            exit_effects: def.exit_effects(actual),
        })
    }

    /// Basic attack: melee sweep or projectile spawn per the equipped
    /// weapon. Returns the combat events to broadcast.
    pub fn basic_attack(
        &mut self,
        players: &mut HashMap<u64, PlayerState>,
        physics: &mut dyn PhysicsWorld,
        attacker_id: u64,
        aim_direction: Vec3,
        _target_entity: Option<u64>,
        now: Instant,
    ) -> Result<Vec<CombatEvent>, ActionRefusal> {
        let attacker = players.get(&attacker_id).ok_or(ActionRefusal::NoSuchPlayer)?;
        if attacker.is_incapacitated() {
            return Err(ActionRefusal::Incapacitated);
        }
        if attacker.is_on_cooldown(BASIC_ATTACK_ABILITY_ID, now) {
            return Err(ActionRefusal::OnCooldown);
        }
        let weapon = content::weapon(attacker.weapon_id).ok_or(ActionRefusal::UnknownContent)?;

        let origin = attacker.position;
        let orientation = attacker.orientation;
        let radius = attacker.capsule_radius;
        let half_height = attacker.capsule_half_height;
        let aim = {
            let a = aim_direction.normalized();
            if a == Vec3::ZERO {
                orientation.forward()
            } else {
                a
            }
        };

        let mut events = Vec::new();
        if weapon.category.is_melee() {
            let hit = physics.sweep_capsule(
                origin,
                orientation,
                radius,
                half_height,
                aim,
                weapon.attack_range,
                attacker_id,
                FilterData::class(filter::CHARACTER),
                None,
            );
            if let Some(hit) = hit {
                if let Some(target) = players.get_mut(&hit.entity_id) {
                    let outcome = target.take_damage(weapon.damage.amount, weapon.damage.damage_type);
                    events.push(CombatEvent::DamageDealt {
                        source: attacker_id,
                        target: hit.entity_id,
                        damage: DamageInstance {
                            amount: outcome.final_damage,
                            damage_type: weapon.damage.damage_type,
                            is_crit: false,
                        },
                        is_kill: outcome.was_kill,
                        is_basic_attack: true,
                    });
                }
            }
        } else if let Some(spec) = weapon.projectile {
            events.push(self.spawn_projectile(physics, attacker_id, origin, aim, spec));
        } else {
            debug!(weapon_id = weapon.id, "ranged weapon without projectile spec");
        }

        if let Some(attacker) = players.get_mut(&attacker_id) {
            attacker.set_cooldown(BASIC_ATTACK_ABILITY_ID, weapon.cooldown_sec, now);
            attacker.set_animation_state(animation::ATTACKING);
        }
        Ok(events)
    }

    /// Executes an ability from the content table.
    pub fn use_ability(
        &mut self,
        players: &mut HashMap<u64, PlayerState>,
        physics: &mut dyn PhysicsWorld,
        caster_id: u64,
        ability_id: u32,
        target_entity: Option<u64>,
        target_position: Option<Vec3>,
        now: Instant,
    ) -> Result<Vec<CombatEvent>, ActionRefusal> {
        let ability = content::ability(ability_id).ok_or(ActionRefusal::UnknownContent)?;

        let caster = players.get(&caster_id).ok_or(ActionRefusal::NoSuchPlayer)?;
        if caster.is_incapacitated() {
            return Err(ActionRefusal::Incapacitated);
        }
        if caster.is_on_cooldown(ability_id, now) {
            return Err(ActionRefusal::OnCooldown);
        }
        if caster.will < ability.will_cost {
            return Err(ActionRefusal::InsufficientWill);
        }

        let origin = caster.position;
        let facing = caster.orientation.forward();
        // Aim preference: explicit position, then target entity, then the
        // caster's facing.
        let aim = target_position
            .map(|p| (p - origin).normalized())
            .filter(|d| *d != Vec3::ZERO)
            .or_else(|| {
                target_entity
                    .and_then(|id| players.get(&id))
                    .map(|t| (t.position - origin).normalized())
                    .filter(|d| *d != Vec3::ZERO)
            })
            .unwrap_or(facing);

        let mut events = Vec::new();
        match ability.kind {
            AbilityKind::Projectile(spec) => {
                events.push(self.spawn_projectile(physics, caster_id, origin, aim, spec));
            }
            AbilityKind::SelfBuff {
                category,
                duration_ms: _,
            } => {
                if let Some(caster) = players.get_mut(&caster_id) {
                    caster.add_status_effects(&[category]);
                }
            }
        }

        if let Some(caster) = players.get_mut(&caster_id) {
            caster.deduct_will(ability.will_cost);
            caster.set_cooldown(ability_id, ability.cooldown_sec, now);
            caster.set_animation_state(animation::CASTING);
        }
        Ok(events)
    }

    fn spawn_projectile(
        &mut self,
        physics: &mut dyn PhysicsWorld,
        owner: u64,
        origin: Vec3,
        aim: Vec3,
        spec: content::ProjectileSpec,
    ) -> CombatEvent {
        self.next_projectile_id += 1;
        let projectile_id = self.next_projectile_id;
        physics.create_dynamic_projectile(
            ProjectileProps {
                radius: 0.1,
                speed: spec.speed,
                max_range: spec.max_range,
            },
            projectile_id,
            origin,
            aim * spec.speed,
        );
        CombatEvent::ProjectileSpawned {
            projectile_id,
            owner,
            start: origin,
            direction: aim,
            speed: spec.speed,
            max_range: spec.max_range,
        }
    }
}
