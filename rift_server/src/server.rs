//! Server assembly.
//!
//! Binds the socket, wires the queues between the network tasks and the
//! simulation task, and owns task lifecycle. `start`/`stop` are idempotent;
//! `stop` waits for every task to observe the shutdown signal and exit.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use anyhow::Context;
use rift_shared::config::ServerConfig;
use rift_shared::math::Vec3;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

use crate::dispatch::Dispatcher;
use crate::gameplay::GameplayEngine;
use crate::packet_handler::PacketHandler;
use crate::physics::{KinematicWorld, PhysicsWorld};
use crate::player::PlayerRegistry;
use crate::session::SessionRegistry;
use crate::shutdown::Shutdown;
use crate::simulation::{self, SimulationContext};

/// Pieces consumed when the tasks are spawned.
struct Pending {
    dispatcher: Dispatcher,
    sim: SimulationContext,
}

/// The assembled game server.
pub struct GameServer {
    cfg: ServerConfig,
    local_addr: SocketAddr,
    packet_handler: Arc<PacketHandler>,
    sessions: Arc<SessionRegistry>,
    players: Arc<PlayerRegistry>,
    shutdown: Arc<Shutdown>,
    pending: Option<Pending>,
    tasks: Vec<JoinHandle<()>>,
}

impl GameServer {
    /// Binds with the default software physics backend.
    pub async fn bind(cfg: ServerConfig) -> anyhow::Result<Self> {
        Self::bind_with_physics(cfg, Box::new(KinematicWorld::new())).await
    }

    /// Binds the UDP socket and assembles the pipeline around the given
    /// physics backend. Bind failure is fatal and surfaces here.
    pub async fn bind_with_physics(
        cfg: ServerConfig,
        physics: Box<dyn PhysicsWorld>,
    ) -> anyhow::Result<Self> {
        let addr: SocketAddr = cfg.bind_addr.parse().context("parse bind_addr")?;
        let socket = Arc::new(UdpSocket::bind(addr).await.context("udp bind")?);
        let local_addr = socket.local_addr().context("local addr")?;

        let sessions = Arc::new(SessionRegistry::new());
        let players = Arc::new(PlayerRegistry::new());
        let shutdown = Shutdown::new();

        let (join_tx, join_rx) = mpsc::unbounded_channel();
        let (disconnect_tx, disconnect_rx) = mpsc::unbounded_channel();
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        let packet_handler = PacketHandler::new(
            socket,
            &cfg,
            sessions.clone(),
            disconnect_tx,
            shutdown.clone(),
        );
        let dispatcher = Dispatcher::new(sessions.clone(), join_tx, command_tx);

        let sim = SimulationContext {
            cfg: cfg.clone(),
            sessions: sessions.clone(),
            players: players.clone(),
            packet_handler: packet_handler.clone(),
            physics,
            engine: GameplayEngine::new(),
            joins: join_rx,
            disconnects: disconnect_rx,
            commands: command_rx,
            shutdown: shutdown.clone(),
            spawn_point: Vec3::ZERO,
        };

        Ok(Self {
            cfg,
            local_addr,
            packet_handler,
            sessions,
            players,
            shutdown,
            pending: Some(Pending { dispatcher, sim }),
            tasks: Vec::new(),
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.cfg
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    pub fn players(&self) -> &Arc<PlayerRegistry> {
        &self.players
    }

    pub fn packet_handler(&self) -> &Arc<PacketHandler> {
        &self.packet_handler
    }

    /// Spawns the receive, maintenance, and simulation tasks. Calling twice
    /// is a no-op.
    pub fn start(&mut self) {
        let Some(pending) = self.pending.take() else {
            return;
        };
        info!(addr = %self.local_addr, tick_hz = self.cfg.tick_hz, "server starting");
        self.tasks.push(tokio::spawn(
            self.packet_handler.clone().recv_loop(pending.dispatcher),
        ));
        self.tasks
            .push(tokio::spawn(self.packet_handler.clone().maintenance_loop()));
        self.tasks.push(tokio::spawn(simulation::run(pending.sim)));
    }

    /// Signals shutdown and waits for the tasks. Safe to call repeatedly.
    pub async fn stop(&mut self) {
        self.shutdown.trigger();
        for task in self.tasks.drain(..) {
            let _ = task.await;
        }
        info!("server stopped");
    }

    pub fn shutdown_handle(&self) -> Arc<Shutdown> {
        self.shutdown.clone()
    }
}

/// Test helper: bind to an ephemeral localhost port.
pub async fn bind_ephemeral(mut cfg: ServerConfig) -> anyhow::Result<GameServer> {
    cfg.bind_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0).to_string();
    GameServer::bind(cfg).await
}

/// Test helper: ephemeral bind with a staged physics world.
pub async fn bind_ephemeral_with_physics(
    mut cfg: ServerConfig,
    physics: Box<dyn PhysicsWorld>,
) -> anyhow::Result<GameServer> {
    cfg.bind_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0).to_string();
    GameServer::bind_with_physics(cfg, physics).await
}
