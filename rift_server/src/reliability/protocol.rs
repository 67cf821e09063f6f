//! Reliability protocol.
//!
//! Free functions that mutate one peer's [`ReliableConnectionState`] on
//! packet egress/ingress and on the maintenance sweep. The caller holds the
//! per-peer lock; everything here takes `now` explicitly so tests can drive
//! the clock without sleeping.

use std::time::{Duration, Instant};

use rift_shared::wire::{PacketFlags, PacketHeader, HEADER_LEN};
use tracing::{trace, warn};

use super::state::{
    seq_greater, ReliableConnectionState, SentPacketRecord, ACK_BITFIELD_WIDTH, MAX_PACKET_RETRIES,
};

/// Message-type tag for packets that carry no payload (acks, heartbeats).
pub const MSG_TYPE_NONE: u16 = 0;

/// Builds the serialized datagram for an outbound packet and updates the
/// connection state. Reliable packets claim the next sequence number and
/// enter the unacked queue; every packet piggybacks the current ack state.
pub fn prepare_outgoing(
    state: &mut ReliableConnectionState,
    message_type: u16,
    payload: &[u8],
    flags: PacketFlags,
    now: Instant,
) -> Vec<u8> {
    let mut payload = payload;
    if flags.contains(PacketFlags::ACK_ONLY) && !payload.is_empty() {
        warn!(message_type, len = payload.len(), "ack-only packet carried a payload; stripping");
        payload = &[];
    }

    let sequence = if flags.contains(PacketFlags::RELIABLE) {
        let seq = state.next_outbound_seq;
        state.next_outbound_seq = state.next_outbound_seq.wrapping_add(1);
        seq
    } else {
        0
    };

    let header = PacketHeader::new(
        flags,
        sequence,
        state.highest_received_seq,
        state.received_bitfield,
        message_type,
    );
    let mut bytes = Vec::with_capacity(HEADER_LEN + payload.len());
    header.encode(&mut bytes);
    bytes.extend_from_slice(payload);

    if flags.contains(PacketFlags::RELIABLE) {
        state.unacked.push_back(SentPacketRecord {
            sequence,
            bytes: bytes.clone(),
            send_time: now,
            retries: 0,
            ack_only: flags.contains(PacketFlags::ACK_ONLY),
        });
    }

    // This packet carries the ack state we owed the peer.
    state.pending_ack = false;
    state.last_send_time = now;
    bytes
}

/// Processes an inbound header against the connection state: acknowledges
/// our sent packets, then runs the inbound-sequence bookkeeping. Returns
/// whether the payload should be delivered to the dispatcher.
pub fn process_incoming(
    state: &mut ReliableConnectionState,
    header: &PacketHeader,
    payload_len: usize,
    now: Instant,
) -> bool {
    state.last_recv_time = now;

    process_remote_acks(state, header.ack, header.ack_bitfield, now);

    let ack_only = header.flags.contains(PacketFlags::ACK_ONLY);

    if !header.flags.contains(PacketFlags::RELIABLE) {
        // Unreliable: no sequence bookkeeping; payloads deliver as-is.
        return !ack_only && payload_len > 0;
    }

    let accepted = accept_reliable_sequence(state, header.sequence);
    accepted && !ack_only
}

/// Removes every unacked record the remote has acknowledged, feeding the RTT
/// estimator per removal. A record is acked by a direct `ack` match or by
/// the history bit covering its distance behind `ack`.
fn process_remote_acks(state: &mut ReliableConnectionState, ack: u32, ack_bitfield: u32, now: Instant) {
    if state.unacked.is_empty() {
        return;
    }
    let mut samples = Vec::new();
    state.unacked.retain(|record| {
        let acked = if record.sequence == ack {
            true
        } else if seq_greater(ack, record.sequence) {
            let diff = ack.wrapping_sub(record.sequence);
            (1..=ACK_BITFIELD_WIDTH).contains(&diff) && (ack_bitfield >> (diff - 1)) & 1 == 1
        } else {
            false
        };
        if acked {
            trace!(seq = record.sequence, retries = record.retries, "acked");
            samples.push(now.duration_since(record.send_time));
        }
        !acked
    });
    for sample in samples {
        state.rtt.update(sample);
    }
}

/// Inbound-sequence bookkeeping for a reliable packet. Returns true when the
/// sequence is new (deliver), false for duplicates and packets older than
/// the 32-wide history window.
fn accept_reliable_sequence(state: &mut ReliableConnectionState, incoming: u32) -> bool {
    let highest = state.highest_received_seq;

    if incoming == highest {
        trace!(seq = incoming, "duplicate of highest received");
        return false;
    }

    if seq_greater(incoming, highest) {
        let diff = incoming.wrapping_sub(highest);
        // Shift history forward; a jump past the window clears it entirely.
        state.received_bitfield = if diff >= ACK_BITFIELD_WIDTH {
            0
        } else {
            state.received_bitfield << diff
        };
        // Record the old head in the history it just vacated. highest == 0
        // means nothing was received yet, so there is nothing to record.
        if (1..=ACK_BITFIELD_WIDTH).contains(&diff) && highest > 0 {
            state.received_bitfield |= 1 << (diff - 1);
        }
        state.highest_received_seq = incoming;
        state.pending_ack = true;
        return true;
    }

    // Older than the head: deliverable once if it falls inside the window
    // and its bit is still clear.
    let diff = highest.wrapping_sub(incoming);
    if (1..=ACK_BITFIELD_WIDTH).contains(&diff) {
        let bit = 1u32 << (diff - 1);
        if state.received_bitfield & bit == 0 {
            state.received_bitfield |= bit;
            state.pending_ack = true;
            return true;
        }
        trace!(seq = incoming, "duplicate inside history window");
    } else {
        trace!(seq = incoming, highest, "older than history window");
    }
    false
}

/// Selects packets whose RTO expired. Each selected record is stamped with a
/// fresh send time and refreshed ack fields; a record out of retries is
/// dropped instead and the connection flagged for teardown.
pub fn collect_retransmits(state: &mut ReliableConnectionState, now: Instant) -> Vec<Vec<u8>> {
    let rto = state.rtt.rto();
    let mut out = Vec::new();
    let mut exhausted = false;
    let ack = state.highest_received_seq;
    let ack_bitfield = state.received_bitfield;

    state.unacked.retain_mut(|record| {
        if now.duration_since(record.send_time) < rto {
            return true;
        }
        if record.retries >= MAX_PACKET_RETRIES {
            warn!(seq = record.sequence, retries = record.retries, "packet out of retries");
            exhausted = true;
            return false;
        }
        record.retries += 1;
        record.send_time = now;
        refresh_ack_fields(&mut record.bytes, ack, ack_bitfield);
        trace!(seq = record.sequence, retry = record.retries, "retransmit");
        out.push(record.bytes.clone());
        true
    });

    if exhausted {
        state.dropped_by_max_retries = true;
    }
    if !out.is_empty() {
        state.last_send_time = now;
    }
    out
}

/// A re-sent packet should carry current ack information, not the snapshot
/// from its first transmission.
fn refresh_ack_fields(bytes: &mut [u8], ack: u32, ack_bitfield: u32) {
    if bytes.len() >= HEADER_LEN {
        bytes[9..13].copy_from_slice(&ack.to_le_bytes());
        bytes[13..17].copy_from_slice(&ack_bitfield.to_le_bytes());
    }
}

/// Whether the peer is owed a standalone ack: something accrued and nothing
/// outbound has carried it for `threshold` (~1.5× the maintenance period).
pub fn pending_ack_due(state: &ReliableConnectionState, now: Instant, threshold: Duration) -> bool {
    state.pending_ack && now.duration_since(state.last_send_time) >= threshold
}

/// Builds the standalone ack packet for [`pending_ack_due`].
pub fn prepare_ack_only(state: &mut ReliableConnectionState, now: Instant) -> Vec<u8> {
    prepare_outgoing(
        state,
        MSG_TYPE_NONE,
        &[],
        PacketFlags::RELIABLE | PacketFlags::ACK_ONLY,
        now,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh(now: Instant) -> ReliableConnectionState {
        ReliableConnectionState::new(now)
    }

    fn reliable_header(seq: u32) -> PacketHeader {
        PacketHeader::new(PacketFlags::RELIABLE, seq, 0, 0, 7)
    }

    #[test]
    fn reliable_send_assigns_monotonic_sequences_and_queues() {
        let now = Instant::now();
        let mut st = fresh(now);
        let p1 = prepare_outgoing(&mut st, 7, b"a", PacketFlags::RELIABLE, now);
        let p2 = prepare_outgoing(&mut st, 7, b"b", PacketFlags::RELIABLE, now);
        assert_eq!(PacketHeader::decode(&p1).unwrap().sequence, 1);
        assert_eq!(PacketHeader::decode(&p2).unwrap().sequence, 2);
        assert_eq!(st.unacked.len(), 2);
    }

    #[test]
    fn unreliable_send_uses_sequence_zero_and_skips_queue() {
        let now = Instant::now();
        let mut st = fresh(now);
        let p = prepare_outgoing(&mut st, 1, b"ping", PacketFlags::empty(), now);
        assert_eq!(PacketHeader::decode(&p).unwrap().sequence, 0);
        assert!(st.unacked.is_empty());
    }

    #[test]
    fn direct_ack_removes_record_once() {
        let now = Instant::now();
        let mut st = fresh(now);
        prepare_outgoing(&mut st, 7, b"a", PacketFlags::RELIABLE, now);
        let ack = PacketHeader::new(PacketFlags::empty(), 0, 1, 0, MSG_TYPE_NONE);
        process_incoming(&mut st, &ack, 0, now + Duration::from_millis(40));
        assert!(st.unacked.is_empty());
        assert!(st.rtt.srtt().is_some());
        // Re-delivered ack has nothing left to remove.
        process_incoming(&mut st, &ack, 0, now + Duration::from_millis(80));
        assert!(st.unacked.is_empty());
    }

    #[test]
    fn bitfield_ack_removes_older_records() {
        let now = Instant::now();
        let mut st = fresh(now);
        for _ in 0..3 {
            prepare_outgoing(&mut st, 7, b"x", PacketFlags::RELIABLE, now);
        }
        // Remote acks seq 3 directly, seqs 1 and 2 via history bits.
        let ack = PacketHeader::new(PacketFlags::empty(), 0, 3, 0b11, MSG_TYPE_NONE);
        process_incoming(&mut st, &ack, 0, now + Duration::from_millis(10));
        assert!(st.unacked.is_empty());
    }

    #[test]
    fn in_order_sequences_build_history() {
        let now = Instant::now();
        let mut st = fresh(now);
        for seq in 1..=3 {
            assert!(process_incoming(&mut st, &reliable_header(seq), 4, now));
        }
        assert_eq!(st.highest_received_seq, 3);
        assert_eq!(st.received_bitfield, 0b11);
        assert!(st.pending_ack);
    }

    #[test]
    fn duplicates_are_discarded_everywhere_in_window() {
        let now = Instant::now();
        let mut st = fresh(now);
        assert!(process_incoming(&mut st, &reliable_header(1), 4, now));
        assert!(process_incoming(&mut st, &reliable_header(2), 4, now));
        // Duplicate of head.
        assert!(!process_incoming(&mut st, &reliable_header(2), 4, now));
        // Duplicate inside the window.
        assert!(!process_incoming(&mut st, &reliable_header(1), 4, now));
    }

    #[test]
    fn out_of_order_within_window_delivers_late_packet() {
        let now = Instant::now();
        let mut st = fresh(now);
        assert!(process_incoming(&mut st, &reliable_header(100), 4, now));
        assert!(process_incoming(&mut st, &reliable_header(102), 4, now));
        // 101 arrives late: delivered, not treated as duplicate.
        assert!(process_incoming(&mut st, &reliable_header(101), 4, now));
        assert!(!process_incoming(&mut st, &reliable_header(101), 4, now));
        assert_eq!(st.highest_received_seq, 102);
        assert_eq!(st.received_bitfield, 0b11);
    }

    #[test]
    fn jump_of_window_width_clears_history() {
        let now = Instant::now();
        let mut st = fresh(now);
        assert!(process_incoming(&mut st, &reliable_header(1), 4, now));
        assert!(process_incoming(&mut st, &reliable_header(2), 4, now));
        // diff = 34 ≥ 32: every prior history bit is gone.
        assert!(process_incoming(&mut st, &reliable_header(36), 4, now));
        assert_eq!(st.highest_received_seq, 36);
        assert_eq!(st.received_bitfield, 0);
        // Packets that fell off the window are now undeliverable.
        assert!(!process_incoming(&mut st, &reliable_header(3), 4, now));
    }

    #[test]
    fn sequence_wrap_behaves_like_any_increment() {
        let now = Instant::now();
        let mut st = fresh(now);
        st.highest_received_seq = u32::MAX;
        assert!(process_incoming(&mut st, &reliable_header(0), 4, now));
        assert_eq!(st.highest_received_seq, 0);
        assert_eq!(st.received_bitfield, 0b1);
    }

    #[test]
    fn ack_only_never_delivers() {
        let now = Instant::now();
        let mut st = fresh(now);
        let hdr = PacketHeader::new(
            PacketFlags::RELIABLE | PacketFlags::ACK_ONLY,
            5,
            0,
            0,
            MSG_TYPE_NONE,
        );
        assert!(!process_incoming(&mut st, &hdr, 0, now));
        // The sequence is still acked.
        assert_eq!(st.highest_received_seq, 5);
        assert!(st.pending_ack);
    }

    #[test]
    fn retransmits_fire_after_rto_and_refresh_acks() {
        let now = Instant::now();
        let mut st = fresh(now);
        prepare_outgoing(&mut st, 7, b"pay", PacketFlags::RELIABLE, now);

        // Give the peer something to ack so the refresh is observable.
        st.highest_received_seq = 9;
        st.received_bitfield = 0b101;

        assert!(collect_retransmits(&mut st, now + Duration::from_millis(10)).is_empty());
        let later = now + st.rtt.rto() + Duration::from_millis(1);
        let resent = collect_retransmits(&mut st, later);
        assert_eq!(resent.len(), 1);
        let hdr = PacketHeader::decode(&resent[0]).unwrap();
        assert_eq!(hdr.sequence, 1);
        assert_eq!(hdr.ack, 9);
        assert_eq!(hdr.ack_bitfield, 0b101);
        assert_eq!(st.unacked[0].retries, 1);
    }

    #[test]
    fn max_retries_drops_connection() {
        let mut now = Instant::now();
        let mut st = fresh(now);
        prepare_outgoing(&mut st, 7, b"pay", PacketFlags::RELIABLE, now);

        for attempt in 0..MAX_PACKET_RETRIES {
            now += st.rtt.rto() + Duration::from_millis(1);
            let resent = collect_retransmits(&mut st, now);
            assert_eq!(resent.len(), 1, "attempt {attempt}");
            assert!(!st.dropped_by_max_retries);
        }
        // The next expiry exceeds the retry budget.
        now += st.rtt.rto() + Duration::from_millis(1);
        assert!(collect_retransmits(&mut st, now).is_empty());
        assert!(st.dropped_by_max_retries);
        assert!(st.unacked.is_empty());
    }

    #[test]
    fn standalone_ack_emitted_only_when_idle() {
        let now = Instant::now();
        let mut st = fresh(now);
        assert!(process_incoming(&mut st, &reliable_header(1), 4, now));
        let threshold = Duration::from_millis(30);
        assert!(!pending_ack_due(&st, now + Duration::from_millis(10), threshold));
        assert!(pending_ack_due(&st, now + Duration::from_millis(31), threshold));

        let ack = prepare_ack_only(&mut st, now + Duration::from_millis(31));
        let hdr = PacketHeader::decode(&ack).unwrap();
        assert_eq!(ack.len(), HEADER_LEN);
        assert!(hdr.flags.contains(PacketFlags::RELIABLE | PacketFlags::ACK_ONLY));
        assert_eq!(hdr.ack, 1);
        assert!(!st.pending_ack);
    }
}
