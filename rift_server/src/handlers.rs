//! Command handlers.
//!
//! Thin adapters between queued wire commands and the gameplay engine, run
//! on the simulation task while it holds the player table. Each returns the
//! outbound traffic the command produced; refusals and missing players are
//! logged and swallowed so one bad command never disturbs the tick.

use std::collections::HashMap;
use std::time::Instant;

use rift_shared::messages::ServerMessage;
use tracing::debug;

use crate::dispatch::{Command, Outbound, QueuedCommand};
use crate::gameplay::GameplayEngine;
use crate::physics::PhysicsWorld;
use crate::player::PlayerState;

/// Applies one queued command. `dt_sec` is the current tick delta, used by
/// movement integration.
pub fn apply_command(
    engine: &mut GameplayEngine,
    players: &mut HashMap<u64, PlayerState>,
    physics: &mut dyn PhysicsWorld,
    queued: QueuedCommand,
    dt_sec: f32,
    now: Instant,
) -> Vec<Outbound> {
    let player_id = queued.player_id;
    match queued.command {
        Command::Movement {
            local_direction,
            is_sprinting,
        } => {
            if let Some(player) = players.get_mut(&player_id) {
                engine.process_movement(player, physics, local_direction, is_sprinting, dt_sec);
            }
            Vec::new()
        }

        Command::Turn { delta_degrees } => {
            if let Some(player) = players.get_mut(&player_id) {
                engine.turn_player(player, physics, delta_degrees);
            }
            Vec::new()
        }

        Command::RiftStep { intent } => {
            let Some(player) = players.get_mut(&player_id) else {
                return Vec::new();
            };
            match engine.execute_rift_step(player, physics, intent, now) {
                Ok(outcome) => vec![Outbound::Broadcast {
                    message: ServerMessage::RiftStepInitiated {
                        player_id,
                        start_position: outcome.start,
                        intended_position: outcome.intended,
                        actual_position: outcome.actual,
                        travel_duration_sec: outcome.travel_duration_sec,
                        entry_effects: outcome.entry_effects,
                        exit_effects: outcome.exit_effects,
                    },
                    reliable: true,
                }],
                Err(refusal) => {
                    debug!(player_id, ?refusal, "rift step refused");
                    Vec::new()
                }
            }
        }

        Command::BasicAttack {
            aim_direction,
            target_entity,
        } => {
            match engine.basic_attack(players, physics, player_id, aim_direction, target_entity, now)
            {
                Ok(events) => events
                    .into_iter()
                    .map(|event| Outbound::Broadcast {
                        message: ServerMessage::CombatEvent(event),
                        reliable: true,
                    })
                    .collect(),
                Err(refusal) => {
                    debug!(player_id, ?refusal, "basic attack refused");
                    Vec::new()
                }
            }
        }

        Command::UseAbility {
            ability_id,
            target_entity,
            target_position,
        } => {
            match engine.use_ability(
                players,
                physics,
                player_id,
                ability_id,
                target_entity,
                target_position,
                now,
            ) {
                Ok(events) => events
                    .into_iter()
                    .map(|event| Outbound::Broadcast {
                        message: ServerMessage::CombatEvent(event),
                        reliable: true,
                    })
                    .collect(),
                Err(refusal) => {
                    debug!(player_id, ability_id, ?refusal, "ability refused");
                    Vec::new()
                }
            }
        }
    }
}
