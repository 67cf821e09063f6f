//! Simulation loop.
//!
//! One task owns all gameplay mutation. Per tick, in order: drain joins,
//! drain disconnects, drain commands, step physics, broadcast dirty state.
//! The end-of-tick sleep is shutdown-aware; an overrunning tick logs and
//! proceeds immediately rather than trying to catch up.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use rift_shared::config::ServerConfig;
use rift_shared::math::Vec3;
use rift_shared::messages::ServerMessage;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::dispatch::{wall_clock_ms, QueuedCommand};
use crate::gameplay::GameplayEngine;
use crate::handlers::apply_command;
use crate::packet_handler::PacketHandler;
use crate::physics::PhysicsWorld;
use crate::player::{PlayerRegistry, PlayerState};
use crate::session::{JoinRequest, SessionRegistry};
use crate::shutdown::Shutdown;

/// Everything the simulation task owns or shares.
pub struct SimulationContext {
    pub cfg: ServerConfig,
    pub sessions: Arc<SessionRegistry>,
    pub players: Arc<PlayerRegistry>,
    pub packet_handler: Arc<PacketHandler>,
    pub physics: Box<dyn PhysicsWorld>,
    pub engine: GameplayEngine,
    pub joins: mpsc::UnboundedReceiver<JoinRequest>,
    pub disconnects: mpsc::UnboundedReceiver<SocketAddr>,
    pub commands: mpsc::UnboundedReceiver<QueuedCommand>,
    pub shutdown: Arc<Shutdown>,
    /// Where joining players appear.
    pub spawn_point: Vec3,
}

/// Runs the fixed-rate loop until shutdown.
pub async fn run(mut ctx: SimulationContext) {
    let interval = ctx.cfg.tick_interval();
    info!(tick_hz = ctx.cfg.tick_hz, "simulation loop started");
    let mut last_tick = Instant::now();

    while !ctx.shutdown.is_triggered() {
        let tick_start = Instant::now();
        let dt_sec = tick_start.duration_since(last_tick).as_secs_f32();
        last_tick = tick_start;

        tick(&mut ctx, dt_sec, tick_start).await;

        let elapsed = tick_start.elapsed();
        if elapsed >= interval {
            warn!(
                elapsed_ms = elapsed.as_millis() as u64,
                budget_ms = interval.as_millis() as u64,
                "tick overran its interval"
            );
        } else {
            tokio::select! {
                _ = tokio::time::sleep(interval - elapsed) => {}
                _ = ctx.shutdown.wait() => break,
            }
        }
    }
    info!("simulation loop stopped");
}

/// One full tick; exposed for tests that drive the loop manually.
pub async fn tick(ctx: &mut SimulationContext, dt_sec: f32, now: Instant) {
    process_joins(ctx).await;
    process_disconnects(ctx).await;
    process_commands(ctx, dt_sec, now).await;
    ctx.physics.step(dt_sec);
    broadcast_dirty_state(ctx).await;
}

async fn process_joins(ctx: &mut SimulationContext) {
    while let Ok(request) = ctx.joins.try_recv() {
        let endpoint = request.endpoint;

        if ctx.sessions.player_for_endpoint(endpoint).is_some() {
            // Raced a second request in before the first was processed.
            ctx.packet_handler
                .send_reliable(
                    endpoint,
                    &ServerMessage::JoinFailed {
                        reason: "already logged in".to_string(),
                        code: 1,
                    },
                )
                .await;
            continue;
        }
        if ctx.sessions.len() >= ctx.cfg.max_clients {
            warn!(%endpoint, "join refused: server full");
            ctx.packet_handler
                .send_reliable(
                    endpoint,
                    &ServerMessage::JoinFailed {
                        reason: "server full".to_string(),
                        code: 2,
                    },
                )
                .await;
            continue;
        }

        let player_id = ctx.players.allocate_id();
        let mut player = PlayerState::new(player_id, ctx.spawn_point);
        player.character_id = request.character_id.clone();
        let controller = ctx.physics.create_character_controller(
            player_id,
            player.position,
            player.capsule_radius,
            player.capsule_half_height,
        );
        player.controller = Some(controller);

        if !ctx.sessions.insert(endpoint, player_id) {
            error!(%endpoint, player_id, "session insert failed; rolling back join");
            ctx.physics.release_character_controller(controller);
            ctx.packet_handler
                .send_reliable(
                    endpoint,
                    &ServerMessage::JoinFailed {
                        reason: "internal error".to_string(),
                        code: 2,
                    },
                )
                .await;
            continue;
        }
        ctx.players.insert(player);

        info!(player_id, %endpoint, character = ?request.character_id, "player joined");
        ctx.packet_handler
            .send_reliable(
                endpoint,
                &ServerMessage::JoinSuccess {
                    player_id,
                    welcome_text: ctx.cfg.welcome_text.clone(),
                    tick_rate_hz: ctx.cfg.tick_hz,
                },
            )
            .await;
    }
}

async fn process_disconnects(ctx: &mut SimulationContext) {
    while let Ok(endpoint) = ctx.disconnects.try_recv() {
        match ctx.sessions.remove_endpoint(endpoint) {
            Some(player_id) => {
                if let Some(player) = ctx.players.remove(player_id) {
                    if let Some(controller) = player.controller {
                        ctx.physics.release_character_controller(controller);
                    }
                }
                info!(player_id, %endpoint, "player disconnected");
            }
            None => debug!(%endpoint, "disconnect for unmapped endpoint"),
        }
        // Reliability state may or may not still exist; either way it goes.
        ctx.packet_handler.remove_peer(endpoint);
    }
}

async fn process_commands(ctx: &mut SimulationContext, dt_sec: f32, now: Instant) {
    let mut outbound = Vec::new();
    while let Ok(queued) = ctx.commands.try_recv() {
        let engine = &mut ctx.engine;
        let physics = ctx.physics.as_mut();
        let produced = ctx
            .players
            .with_table(|table| apply_command(engine, table, physics, queued, dt_sec, now));
        outbound.extend(produced);
    }
    for out in &outbound {
        ctx.packet_handler.send_outbound(out).await;
    }
}

/// Sends an `EntityStateUpdate` to every player whose dirty flag is set,
/// clearing the flag. Updates go unicast to the owning session only.
async fn broadcast_dirty_state(ctx: &mut SimulationContext) {
    let server_ts_ms = wall_clock_ms();
    let updates: Vec<(SocketAddr, ServerMessage)> = ctx.players.with_table(|table| {
        table
            .values()
            .filter(|player| player.take_dirty())
            .filter_map(|player| {
                let endpoint = ctx.sessions.endpoint_for_player(player.id)?;
                Some((
                    endpoint,
                    ServerMessage::EntityStateUpdate {
                        player_id: player.id,
                        position: player.position,
                        orientation: player.orientation,
                        health: player.health,
                        max_health: player.max_health,
                        will: player.will,
                        max_will: player.max_will,
                        server_ts_ms,
                        animation_state: player.animation_state,
                        active_effects: player.status_effects.clone(),
                    },
                ))
            })
            .collect()
    });

    for (endpoint, update) in updates {
        ctx.packet_handler.send_unreliable(endpoint, &update).await;
    }
}
