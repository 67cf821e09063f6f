//! Static gameplay content.
//!
//! Weapon, ability, and rift-step definitions live outside the core in the
//! full game; this module is the lookup surface the engine programs against,
//! with a small built-in table standing in for the content pipeline.

use rift_shared::math::Vec3;
use rift_shared::messages::{
    DamageInstance, DamageType, RiftStepEffect, StatusEffectCategory, StunInstance, StunSeverity,
};

pub const DEFAULT_WEAPON_ID: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WeaponCategory {
    Unarmed,
    MeleeSword,
    MeleeAxe,
    MeleeMaul,
    RangedBow,
    RangedGun,
    MagicStaff,
    MagicWand,
}

impl WeaponCategory {
    pub fn is_melee(self) -> bool {
        matches!(
            self,
            Self::Unarmed | Self::MeleeSword | Self::MeleeAxe | Self::MeleeMaul
        )
    }
}

/// Properties of a spawned projectile.
#[derive(Debug, Clone, Copy)]
pub struct ProjectileSpec {
    pub speed: f32,
    pub max_range: f32,
    pub damage: DamageInstance,
}

#[derive(Debug, Clone, Copy)]
pub struct WeaponDef {
    pub id: u32,
    pub category: WeaponCategory,
    pub damage: DamageInstance,
    /// Sweep reach for melee; ignored for projectile weapons.
    pub attack_range: f32,
    pub cooldown_sec: f32,
    pub projectile: Option<ProjectileSpec>,
}

const fn physical(amount: i32) -> DamageInstance {
    DamageInstance {
        amount,
        damage_type: DamageType::Physical,
        is_crit: false,
    }
}

static WEAPONS: &[WeaponDef] = &[
    WeaponDef {
        id: DEFAULT_WEAPON_ID,
        category: WeaponCategory::MeleeSword,
        damage: physical(25),
        attack_range: 2.5,
        cooldown_sec: 0.8,
        projectile: None,
    },
    WeaponDef {
        id: 2,
        category: WeaponCategory::MeleeMaul,
        damage: physical(40),
        attack_range: 2.8,
        cooldown_sec: 1.4,
        projectile: None,
    },
    WeaponDef {
        id: 101,
        category: WeaponCategory::RangedBow,
        damage: physical(0),
        attack_range: 0.0,
        cooldown_sec: 1.0,
        projectile: Some(ProjectileSpec {
            speed: 40.0,
            max_range: 60.0,
            damage: physical(22),
        }),
    },
    WeaponDef {
        id: 201,
        category: WeaponCategory::MagicStaff,
        damage: physical(0),
        attack_range: 0.0,
        cooldown_sec: 1.2,
        projectile: Some(ProjectileSpec {
            speed: 25.0,
            max_range: 45.0,
            damage: DamageInstance {
                amount: 30,
                damage_type: DamageType::Radiant,
                is_crit: false,
            },
        }),
    },
];

pub fn weapon(id: u32) -> Option<&'static WeaponDef> {
    WEAPONS.iter().find(|w| w.id == id)
}

#[derive(Debug, Clone, Copy)]
pub enum AbilityKind {
    Projectile(ProjectileSpec),
    SelfBuff {
        category: StatusEffectCategory,
        duration_ms: u32,
    },
}

#[derive(Debug, Clone, Copy)]
pub struct AbilityDef {
    pub id: u32,
    pub will_cost: i32,
    pub cooldown_sec: f32,
    pub kind: AbilityKind,
}

static ABILITIES: &[AbilityDef] = &[
    AbilityDef {
        id: 10,
        will_cost: 15,
        cooldown_sec: 3.0,
        kind: AbilityKind::Projectile(ProjectileSpec {
            speed: 30.0,
            max_range: 50.0,
            damage: DamageInstance {
                amount: 45,
                damage_type: DamageType::Shock,
                is_crit: false,
            },
        }),
    },
    AbilityDef {
        id: 11,
        will_cost: 20,
        cooldown_sec: 8.0,
        kind: AbilityKind::SelfBuff {
            category: StatusEffectCategory::Hastened,
            duration_ms: 4000,
        },
    },
];

pub fn ability(id: u32) -> Option<&'static AbilityDef> {
    ABILITIES.iter().find(|a| a.id == id)
}

/// Flavor of the player's active rift step; decides the entry/exit effects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiftStepType {
    Standard,
    /// Stuns around the departure point, detonates at the arrival point.
    SolarDetonation,
    /// Leaves a healing field at the arrival point.
    VerdantBloom,
    /// Hastens the traveler on arrival.
    TempestSurge,
}

/// The player's active step definition; authoritative over any numeric
/// modifier id.
#[derive(Debug, Clone, Copy)]
pub struct RiftStepDefinition {
    pub step_type: RiftStepType,
    pub distance: f32,
    pub cooldown_sec: f32,
    /// Client cosmetic only.
    pub travel_duration_sec: f32,
}

impl RiftStepDefinition {
    pub fn standard() -> Self {
        Self {
            step_type: RiftStepType::Standard,
            distance: 5.0,
            cooldown_sec: 1.25,
            travel_duration_sec: 0.25,
        }
    }

    pub fn solar_detonation() -> Self {
        Self {
            step_type: RiftStepType::SolarDetonation,
            ..Self::standard()
        }
    }

    /// Effects anchored at the departure point.
    pub fn entry_effects(&self, start: Vec3) -> Vec<RiftStepEffect> {
        match self.step_type {
            RiftStepType::SolarDetonation => vec![RiftStepEffect::AreaStun {
                center: start,
                radius: 3.0,
                stun: StunInstance {
                    severity: StunSeverity::Medium,
                    duration_ms: 2000,
                },
            }],
            _ => Vec::new(),
        }
    }

    /// Effects anchored at the arrival point.
    pub fn exit_effects(&self, end: Vec3) -> Vec<RiftStepEffect> {
        match self.step_type {
            RiftStepType::Standard => Vec::new(),
            RiftStepType::SolarDetonation => vec![RiftStepEffect::AreaDamage {
                center: end,
                radius: 5.0,
                damage: DamageInstance {
                    amount: 150,
                    damage_type: DamageType::Radiant,
                    is_crit: false,
                },
            }],
            RiftStepType::VerdantBloom => vec![RiftStepEffect::PersistentAreaHeal {
                center: end,
                radius: 4.0,
                heal_per_second: 25,
                duration_ms: 5000,
            }],
            RiftStepType::TempestSurge => vec![RiftStepEffect::ApplyBuff {
                category: StatusEffectCategory::Hastened,
                duration_ms: 3000,
            }],
        }
    }
}
