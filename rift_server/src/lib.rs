//! `rift_server`
//!
//! The authoritative server core:
//! - UDP reliability layer (sequence/ack/bitfield, adaptive RTO)
//! - session registry and typed message dispatch
//! - fixed-rate simulation loop over the gameplay engine
//! - physics contract with a deterministic software backend

pub mod content;
pub mod dispatch;
pub mod gameplay;
pub mod handlers;
pub mod packet_handler;
pub mod physics;
pub mod player;
pub mod reliability;
pub mod server;
pub mod session;
pub mod shutdown;
pub mod simulation;

pub use server::{bind_ephemeral, bind_ephemeral_with_physics, GameServer};
