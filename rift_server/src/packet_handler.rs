//! Packet handler.
//!
//! Owns the per-peer reliability state map and bridges the UDP socket to the
//! dispatcher. Two tasks run against it:
//!
//! - the receive loop, turning datagrams into reliability updates and
//!   dispatched payloads;
//! - the maintenance loop (~20 ms), collecting retransmissions, flushing
//!   standalone acks, and reaping dead peers.
//!
//! Locking is two-level: the outer map mutex is held only for lookup,
//! insert, and erase; each peer's state has its own mutex for the protocol
//! functions.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use rift_shared::config::ServerConfig;
use rift_shared::messages::{encode_server, ServerMessage};
use rift_shared::wire::{PacketFlags, PacketHeader, HEADER_LEN};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

use crate::dispatch::{Dispatcher, Outbound};
use crate::reliability::{
    collect_retransmits, pending_ack_due, prepare_ack_only, prepare_outgoing, process_incoming,
    ReliableConnectionState,
};
use crate::session::SessionRegistry;
use crate::shutdown::Shutdown;

type PeerMap = HashMap<SocketAddr, Arc<Mutex<ReliableConnectionState>>>;

pub struct PacketHandler {
    socket: Arc<UdpSocket>,
    peers: Mutex<PeerMap>,
    sessions: Arc<SessionRegistry>,
    maintenance_interval: Duration,
    stale_timeout: Duration,
    /// Reliability states are created lazily per endpoint; beyond this many
    /// the inbound datagram is dropped instead.
    peer_cap: usize,
    disconnects: mpsc::UnboundedSender<SocketAddr>,
    shutdown: Arc<Shutdown>,
}

impl PacketHandler {
    pub fn new(
        socket: Arc<UdpSocket>,
        cfg: &ServerConfig,
        sessions: Arc<SessionRegistry>,
        disconnects: mpsc::UnboundedSender<SocketAddr>,
        shutdown: Arc<Shutdown>,
    ) -> Arc<Self> {
        Arc::new(Self {
            socket,
            peers: Mutex::new(HashMap::new()),
            sessions,
            maintenance_interval: Duration::from_millis(cfg.reliability_interval_ms.max(1)),
            stale_timeout: Duration::from_millis(cfg.stale_timeout_ms),
            peer_cap: cfg.max_clients.saturating_mul(4).max(16),
            disconnects,
            shutdown,
        })
    }

    /// Receive loop; runs until shutdown. Socket errors are transient: log
    /// and keep reading.
    pub async fn recv_loop(self: Arc<Self>, dispatcher: Dispatcher) {
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            tokio::select! {
                _ = self.shutdown.wait() => break,
                res = self.socket.recv_from(&mut buf) => match res {
                    Ok((n, from)) => {
                        if let Some(response) = self.on_raw_datagram(from, &buf[..n], &dispatcher) {
                            self.send_outbound(&response).await;
                        }
                    }
                    Err(err) => {
                        warn!(%err, "udp recv error");
                    }
                },
            }
        }
        debug!("receive loop stopped");
    }

    /// Processes one raw datagram. Returns the dispatcher's inline response,
    /// if any.
    pub fn on_raw_datagram(
        &self,
        from: SocketAddr,
        datagram: &[u8],
        dispatcher: &Dispatcher,
    ) -> Option<Outbound> {
        let header = match PacketHeader::decode(datagram) {
            Ok(header) => header,
            Err(err) => {
                trace!(%from, %err, "dropping malformed datagram");
                return None;
            }
        };
        let payload = &datagram[HEADER_LEN..];
        let now = Instant::now();

        if header.flags.contains(PacketFlags::DISCONNECT) {
            info!(%from, "peer disconnected voluntarily");
            self.remove_peer(from);
            let _ = self.disconnects.send(from);
            return None;
        }

        let state = self.peer_state(from, true)?;
        let deliver = {
            let mut st = lock_state(&state);
            process_incoming(&mut st, &header, payload.len(), now)
        };

        if header.flags.contains(PacketFlags::HEARTBEAT) {
            trace!(%from, "heartbeat");
            return None;
        }
        if !deliver || payload.is_empty() {
            return None;
        }
        dispatcher.dispatch(from, header.message_type, payload)
    }

    /// Sends a message with reliability tracking.
    pub async fn send_reliable(&self, endpoint: SocketAddr, message: &ServerMessage) {
        self.send_message(endpoint, message, PacketFlags::RELIABLE).await;
    }

    /// Fire-and-forget send; still piggybacks ack state.
    pub async fn send_unreliable(&self, endpoint: SocketAddr, message: &ServerMessage) {
        self.send_message(endpoint, message, PacketFlags::empty()).await;
    }

    async fn send_message(&self, endpoint: SocketAddr, message: &ServerMessage, flags: PacketFlags) {
        let Some(state) = self.peer_state(endpoint, true) else {
            return;
        };
        let payload = encode_server(message);
        let bytes = {
            let mut st = lock_state(&state);
            prepare_outgoing(&mut st, message.tag(), &payload, flags, Instant::now())
        };
        if let Err(err) = self.socket.send_to(&bytes, endpoint).await {
            warn!(%endpoint, %err, "udp send failed; reliability layer will retry");
        }
    }

    /// Resolves addressing and sends.
    pub async fn send_outbound(&self, outbound: &Outbound) {
        match outbound {
            Outbound::Unicast {
                endpoint,
                message,
                reliable,
            } => {
                if *reliable {
                    self.send_reliable(*endpoint, message).await;
                } else {
                    self.send_unreliable(*endpoint, message).await;
                }
            }
            Outbound::Broadcast { message, reliable } => {
                for endpoint in self.sessions.all_endpoints() {
                    if *reliable {
                        self.send_reliable(endpoint, message).await;
                    } else {
                        self.send_unreliable(endpoint, message).await;
                    }
                }
            }
        }
    }

    /// Maintenance loop; runs until shutdown.
    pub async fn maintenance_loop(self: Arc<Self>) {
        let mut ticker = tokio::time::interval(self.maintenance_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = self.shutdown.wait() => break,
                _ = ticker.tick() => {}
            }
            self.maintenance_pass(Instant::now()).await;
        }
        debug!("maintenance loop stopped");
    }

    /// One sweep: retransmissions, standalone acks, stale/exhausted reaping.
    /// Public so tests can drive it with a synthetic clock.
    pub async fn maintenance_pass(&self, now: Instant) {
        let ack_threshold = self.maintenance_interval * 3 / 2;
        let snapshot: Vec<(SocketAddr, Arc<Mutex<ReliableConnectionState>>)> = {
            let peers = self.lock_peers();
            peers.iter().map(|(k, v)| (*k, v.clone())).collect()
        };

        let mut to_send: Vec<(SocketAddr, Vec<Vec<u8>>)> = Vec::new();
        let mut to_drop: Vec<SocketAddr> = Vec::new();

        for (endpoint, state) in snapshot {
            let mut st = lock_state(&state);
            let mut packets = collect_retransmits(&mut st, now);
            if st.dropped_by_max_retries {
                warn!(%endpoint, "peer unresponsive past retry budget");
                to_drop.push(endpoint);
                continue;
            }
            if st.is_stale(now, self.stale_timeout) {
                info!(%endpoint, "peer stale; reaping");
                to_drop.push(endpoint);
                continue;
            }
            if pending_ack_due(&st, now, ack_threshold) {
                packets.push(prepare_ack_only(&mut st, now));
            }
            if !packets.is_empty() {
                to_send.push((endpoint, packets));
            }
        }

        {
            let mut peers = self.lock_peers();
            for endpoint in &to_drop {
                peers.remove(endpoint);
            }
        }
        for endpoint in to_drop {
            let _ = self.disconnects.send(endpoint);
        }

        for (endpoint, packets) in to_send {
            for bytes in packets {
                if let Err(err) = self.socket.send_to(&bytes, endpoint).await {
                    warn!(%endpoint, %err, "retransmit send failed");
                }
            }
        }
    }

    /// Erases a peer's reliability state (session teardown path).
    pub fn remove_peer(&self, endpoint: SocketAddr) {
        self.lock_peers().remove(&endpoint);
    }

    pub fn peer_count(&self) -> usize {
        self.lock_peers().len()
    }

    /// Unacked reliable packets outstanding toward `endpoint`.
    pub fn unacked_count(&self, endpoint: SocketAddr) -> usize {
        self.peer_state(endpoint, false)
            .map(|st| lock_state(&st).unacked.len())
            .unwrap_or(0)
    }

    fn peer_state(
        &self,
        endpoint: SocketAddr,
        create: bool,
    ) -> Option<Arc<Mutex<ReliableConnectionState>>> {
        let mut peers = self.lock_peers();
        if let Some(state) = peers.get(&endpoint) {
            return Some(state.clone());
        }
        if !create {
            return None;
        }
        if peers.len() >= self.peer_cap {
            error!(%endpoint, cap = self.peer_cap, "peer table full; dropping datagram");
            return None;
        }
        let state = Arc::new(Mutex::new(ReliableConnectionState::new(Instant::now())));
        peers.insert(endpoint, state.clone());
        Some(state)
    }

    fn lock_peers(&self) -> MutexGuard<'_, PeerMap> {
        self.peers.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn lock_state(state: &Arc<Mutex<ReliableConnectionState>>) -> MutexGuard<'_, ReliableConnectionState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rift_shared::messages::{encode_client, ClientMessage};

    async fn fixture() -> (
        Arc<PacketHandler>,
        Dispatcher,
        mpsc::UnboundedReceiver<SocketAddr>,
    ) {
        let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
        let sessions = Arc::new(SessionRegistry::new());
        let (disc_tx, disc_rx) = mpsc::unbounded_channel();
        let (join_tx, _join_rx) = mpsc::unbounded_channel();
        let (cmd_tx, _cmd_rx) = mpsc::unbounded_channel();
        let handler = PacketHandler::new(
            socket,
            &ServerConfig::default(),
            sessions.clone(),
            disc_tx,
            Shutdown::new(),
        );
        let dispatcher = Dispatcher::new(sessions, join_tx, cmd_tx);
        (handler, dispatcher, disc_rx)
    }

    fn ep(port: u16) -> SocketAddr {
        format!("127.0.0.1:{port}").parse().unwrap()
    }

    #[tokio::test]
    async fn garbage_datagrams_are_dropped_without_state() {
        let (handler, dispatcher, _disc) = fixture().await;
        assert!(handler.on_raw_datagram(ep(9000), &[1, 2, 3], &dispatcher).is_none());
        assert_eq!(handler.peer_count(), 0);
    }

    #[tokio::test]
    async fn ping_datagram_produces_inline_pong() {
        let (handler, dispatcher, _disc) = fixture().await;
        let msg = ClientMessage::Ping { client_ts_ms: 42 };
        let payload = encode_client(&msg);
        let header = PacketHeader::new(PacketFlags::empty(), 0, 0, 0, msg.tag());
        let mut datagram = header.encode_to_vec();
        datagram.extend_from_slice(&payload);

        let out = handler.on_raw_datagram(ep(9001), &datagram, &dispatcher);
        match out {
            Some(Outbound::Unicast {
                message: ServerMessage::Pong { client_ts_ms, .. },
                ..
            }) => assert_eq!(client_ts_ms, 42),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(handler.peer_count(), 1);
    }

    #[tokio::test]
    async fn heartbeat_refreshes_state_but_never_dispatches() {
        let (handler, dispatcher, _disc) = fixture().await;
        let header = PacketHeader::new(PacketFlags::HEARTBEAT, 0, 0, 0, 0);
        let out = handler.on_raw_datagram(ep(9002), &header.encode_to_vec(), &dispatcher);
        assert!(out.is_none());
        assert_eq!(handler.peer_count(), 1);
    }

    #[tokio::test]
    async fn disconnect_flag_tears_down_and_notifies() {
        let (handler, dispatcher, mut disc) = fixture().await;
        // Establish state first.
        let header = PacketHeader::new(PacketFlags::HEARTBEAT, 0, 0, 0, 0);
        handler.on_raw_datagram(ep(9003), &header.encode_to_vec(), &dispatcher);
        assert_eq!(handler.peer_count(), 1);

        let bye = PacketHeader::new(PacketFlags::DISCONNECT, 0, 0, 0, 0);
        handler.on_raw_datagram(ep(9003), &bye.encode_to_vec(), &dispatcher);
        assert_eq!(handler.peer_count(), 0);
        assert_eq!(disc.try_recv().unwrap(), ep(9003));
    }

    #[tokio::test]
    async fn stale_peer_is_reaped_on_maintenance() {
        let (handler, dispatcher, mut disc) = fixture().await;
        let header = PacketHeader::new(PacketFlags::HEARTBEAT, 0, 0, 0, 0);
        handler.on_raw_datagram(ep(9004), &header.encode_to_vec(), &dispatcher);

        // Well past the 60 s default with nothing in flight.
        let future = Instant::now() + Duration::from_secs(61);
        handler.maintenance_pass(future).await;
        assert_eq!(handler.peer_count(), 0);
        assert_eq!(disc.try_recv().unwrap(), ep(9004));
    }
}
