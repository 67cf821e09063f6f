//! Shared helpers for the socket-based integration tests.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use rift_server::reliability::{prepare_outgoing, process_incoming, ReliableConnectionState};
use rift_shared::config::ServerConfig;
use rift_shared::messages::{decode_server, encode_client, ClientMessage, ServerMessage};
use rift_shared::wire::{PacketFlags, PacketHeader, HEADER_LEN};
use tokio::net::UdpSocket;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_test_writer()
        .try_init();
}

/// Fast-reacting config for tests; individual tests override what they probe.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        tick_hz: 100,
        ..ServerConfig::default()
    }
}

/// A minimal client speaking the wire protocol, driving the same reliability
/// state machine the server uses.
pub struct TestClient {
    pub socket: UdpSocket,
    pub state: ReliableConnectionState,
}

impl TestClient {
    pub async fn connect(server: SocketAddr) -> anyhow::Result<Self> {
        let socket = UdpSocket::bind("127.0.0.1:0").await?;
        socket.connect(server).await?;
        Ok(Self {
            socket,
            state: ReliableConnectionState::new(Instant::now()),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.socket.local_addr().expect("local addr")
    }

    /// Builds a datagram without sending it (for reorder/replay tests).
    pub fn build(&mut self, msg: &ClientMessage, flags: PacketFlags) -> Vec<u8> {
        let payload = encode_client(msg);
        prepare_outgoing(&mut self.state, msg.tag(), &payload, flags, Instant::now())
    }

    pub async fn send_reliable(&mut self, msg: &ClientMessage) -> anyhow::Result<()> {
        let bytes = self.build(msg, PacketFlags::RELIABLE);
        self.socket.send(&bytes).await?;
        Ok(())
    }

    pub async fn send_unreliable(&mut self, msg: &ClientMessage) -> anyhow::Result<()> {
        let bytes = self.build(msg, PacketFlags::empty());
        self.socket.send(&bytes).await?;
        Ok(())
    }

    pub async fn send_bytes(&self, bytes: &[u8]) -> anyhow::Result<()> {
        self.socket.send(bytes).await?;
        Ok(())
    }

    /// Sends a standalone ack carrying the client's current ack state.
    pub async fn flush_ack(&mut self) -> anyhow::Result<()> {
        let bytes = prepare_outgoing(
            &mut self.state,
            0,
            &[],
            PacketFlags::ACK_ONLY,
            Instant::now(),
        );
        self.socket.send(&bytes).await?;
        Ok(())
    }

    /// Receives one datagram, runs it through the client-side reliability
    /// state, and decodes any payload.
    pub async fn recv(
        &mut self,
        timeout: Duration,
    ) -> anyhow::Result<Option<(PacketHeader, Option<ServerMessage>)>> {
        let mut buf = vec![0u8; 64 * 1024];
        let n = match tokio::time::timeout(timeout, self.socket.recv(&mut buf)).await {
            Ok(Ok(n)) => n,
            Ok(Err(e)) => return Err(e.into()),
            Err(_) => return Ok(None),
        };
        let header = PacketHeader::decode(&buf[..n])?;
        let payload = &buf[HEADER_LEN..n];
        let deliver = process_incoming(&mut self.state, &header, payload.len(), Instant::now());
        let msg = if deliver && !payload.is_empty() {
            Some(decode_server(header.message_type, payload)?)
        } else {
            None
        };
        Ok(Some((header, msg)))
    }

    /// Receives until a payload matching `pred` arrives or the deadline
    /// passes.
    pub async fn recv_until<F>(
        &mut self,
        deadline: Duration,
        mut pred: F,
    ) -> anyhow::Result<Option<ServerMessage>>
    where
        F: FnMut(&ServerMessage) -> bool,
    {
        let end = Instant::now() + deadline;
        loop {
            let remaining = end.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            if let Some((_, Some(msg))) = self.recv(remaining).await? {
                if pred(&msg) {
                    return Ok(Some(msg));
                }
            }
        }
    }

    /// Joins and returns the assigned player id, acking the response.
    pub async fn join(&mut self, character_id: Option<&str>) -> anyhow::Result<u64> {
        self.send_reliable(&ClientMessage::JoinRequest {
            character_id: character_id.map(str::to_string),
        })
        .await?;
        let msg = self
            .recv_until(Duration::from_secs(2), |m| {
                matches!(
                    m,
                    ServerMessage::JoinSuccess { .. } | ServerMessage::JoinFailed { .. }
                )
            })
            .await?;
        match msg {
            Some(ServerMessage::JoinSuccess { player_id, .. }) => {
                // Carry the ack for JoinSuccess back to the server.
                self.flush_ack().await?;
                Ok(player_id)
            }
            other => anyhow::bail!("join did not succeed: {other:?}"),
        }
    }
}
