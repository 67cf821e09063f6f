use std::collections::VecDeque;
use std::time::Instant;

use super::rtt::RttEstimator;

/// A reliable packet is retransmitted at most this many times before the
/// connection is declared dead.
pub const MAX_PACKET_RETRIES: u32 = 10;

/// Width of the received-sequence history window.
pub const ACK_BITFIELD_WIDTH: u32 = 32;

/// Wrap-safe sequence ordering: `s1` is newer than `s2` iff the wrapping
/// difference lands in (0, 2³¹). The transition `0xFFFF_FFFF → 0` behaves
/// like any other +1 step.
pub fn seq_greater(s1: u32, s2: u32) -> bool {
    let diff = s1.wrapping_sub(s2);
    diff != 0 && diff < 0x8000_0000
}

/// A reliable packet we sent and still expect an ack for.
#[derive(Debug, Clone)]
pub struct SentPacketRecord {
    pub sequence: u32,
    /// Full serialized datagram, header included, for retransmission.
    pub bytes: Vec<u8>,
    pub send_time: Instant,
    pub retries: u32,
    pub ack_only: bool,
}

/// Per-peer reliability state.
///
/// One of these exists per remote endpoint, created lazily on first contact.
/// The owning map wraps each in its own mutex; the protocol functions in
/// [`super::protocol`] assume the caller holds that lock.
#[derive(Debug)]
pub struct ReliableConnectionState {
    /// Sequence the next outbound reliable packet takes.
    pub next_outbound_seq: u32,
    /// Sent-but-unacked reliable packets, ordered by send time.
    pub unacked: VecDeque<SentPacketRecord>,
    /// Highest sequence seen from the remote; 0 until the first reliable
    /// packet arrives.
    pub highest_received_seq: u32,
    /// Bit i set ⇔ `highest_received_seq - (i + 1)` was received.
    pub received_bitfield: u32,
    /// Ack information accrued that no outbound packet has carried yet.
    pub pending_ack: bool,
    pub last_send_time: Instant,
    pub last_recv_time: Instant,
    pub rtt: RttEstimator,
    pub connected: bool,
    /// Set by the retransmit sweep when a packet burns through
    /// [`MAX_PACKET_RETRIES`]; the owner tears the session down.
    pub dropped_by_max_retries: bool,
}

impl ReliableConnectionState {
    pub fn new(now: Instant) -> Self {
        Self {
            next_outbound_seq: 1,
            unacked: VecDeque::new(),
            highest_received_seq: 0,
            received_bitfield: 0,
            pending_ack: false,
            last_send_time: now,
            last_recv_time: now,
            rtt: RttEstimator::new(),
            connected: true,
            dropped_by_max_retries: false,
        }
    }

    /// True when the peer has gone quiet: nothing received for
    /// `stale_timeout` and nothing of ours left in flight.
    pub fn is_stale(&self, now: Instant, stale_timeout: std::time::Duration) -> bool {
        self.unacked.is_empty() && now.duration_since(self.last_recv_time) >= stale_timeout
    }
}
