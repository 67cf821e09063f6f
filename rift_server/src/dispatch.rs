//! Typed message dispatch.
//!
//! Sits between the reliability layer and gameplay: verifies the payload
//! against the schema, checks the header/union tag agreement, resolves the
//! endpoint to a player, and routes. Gameplay commands are queued for the
//! simulation task; only connection-level traffic (ping, join refusals) is
//! answered inline on the receive path.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use rift_shared::math::Vec3;
use rift_shared::messages::{decode_client, ClientMessage, RiftStepIntent, ServerMessage};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::session::{JoinRequest, SessionRegistry};

/// A gameplay command bound for the simulation task.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Movement {
        local_direction: Vec3,
        is_sprinting: bool,
    },
    Turn {
        delta_degrees: f32,
    },
    RiftStep {
        intent: RiftStepIntent,
    },
    BasicAttack {
        aim_direction: Vec3,
        target_entity: Option<u64>,
    },
    UseAbility {
        ability_id: u32,
        target_entity: Option<u64>,
        target_position: Option<Vec3>,
    },
}

/// Command plus the player it came from; one tick of lifetime.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedCommand {
    pub player_id: u64,
    pub command: Command,
}

/// An outbound message with its addressing.
#[derive(Debug, Clone)]
pub enum Outbound {
    Unicast {
        endpoint: SocketAddr,
        message: ServerMessage,
        reliable: bool,
    },
    /// Sent to every active session.
    Broadcast {
        message: ServerMessage,
        reliable: bool,
    },
}

/// Current wall clock in milliseconds, as stamped into S2C messages.
pub fn wall_clock_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Routes verified payloads. Owned by the packet handler; runs on the
/// socket-receive task.
pub struct Dispatcher {
    sessions: Arc<SessionRegistry>,
    joins: mpsc::UnboundedSender<JoinRequest>,
    commands: mpsc::UnboundedSender<QueuedCommand>,
}

impl Dispatcher {
    pub fn new(
        sessions: Arc<SessionRegistry>,
        joins: mpsc::UnboundedSender<JoinRequest>,
        commands: mpsc::UnboundedSender<QueuedCommand>,
    ) -> Self {
        Self {
            sessions,
            joins,
            commands,
        }
    }

    /// Handles one delivered payload. Returns the response to send back, if
    /// the message warrants an inline one.
    pub fn dispatch(
        &self,
        endpoint: SocketAddr,
        header_tag: u16,
        payload: &[u8],
    ) -> Option<Outbound> {
        let msg = match decode_client(header_tag, payload) {
            Ok(msg) => msg,
            Err(err) => {
                warn!(%endpoint, header_tag, %err, "discarding undecodable payload");
                return None;
            }
        };

        let player = self.sessions.player_for_endpoint(endpoint);

        match msg {
            // Connection-level echo; answered pre- or post-join.
            ClientMessage::Ping { client_ts_ms } => Some(Outbound::Unicast {
                endpoint,
                message: ServerMessage::Pong {
                    client_ts_ms,
                    server_ts_ms: wall_clock_ms(),
                },
                reliable: false,
            }),

            ClientMessage::JoinRequest { character_id } => {
                if player.is_some() {
                    debug!(%endpoint, "join from an already-joined endpoint");
                    return Some(Outbound::Unicast {
                        endpoint,
                        message: ServerMessage::JoinFailed {
                            reason: "already logged in".to_string(),
                            code: 1,
                        },
                        reliable: true,
                    });
                }
                if self
                    .joins
                    .send(JoinRequest {
                        endpoint,
                        character_id,
                    })
                    .is_err()
                {
                    warn!(%endpoint, "join queue closed; dropping request");
                }
                None
            }

            // Everything else requires a session.
            other => {
                let Some(player_id) = player else {
                    debug!(%endpoint, tag = header_tag, "command from unknown endpoint dropped");
                    return None;
                };
                let Some(command) = to_command(other) else {
                    return None;
                };
                trace!(player_id, ?command, "command queued");
                if self
                    .commands
                    .send(QueuedCommand { player_id, command })
                    .is_err()
                {
                    warn!(player_id, "command queue closed; dropping command");
                }
                None
            }
        }
    }
}

/// Maps a gameplay message onto its queued command. Connection-level
/// messages (ping, join) have no command form.
fn to_command(msg: ClientMessage) -> Option<Command> {
    match msg {
        ClientMessage::MovementInput {
            local_direction,
            is_sprinting,
            ..
        } => Some(Command::Movement {
            local_direction,
            is_sprinting,
        }),
        ClientMessage::TurnIntent { delta_degrees, .. } => Some(Command::Turn { delta_degrees }),
        ClientMessage::RiftStepActivation { intent, .. } => Some(Command::RiftStep { intent }),
        ClientMessage::BasicAttackIntent {
            aim_direction,
            target_entity,
            ..
        } => Some(Command::BasicAttack {
            aim_direction,
            target_entity,
        }),
        ClientMessage::UseAbility {
            ability_id,
            target_entity,
            target_position,
            ..
        } => Some(Command::UseAbility {
            ability_id,
            target_entity,
            target_position,
        }),
        ClientMessage::Ping { .. } | ClientMessage::JoinRequest { .. } => None,
    }
}
