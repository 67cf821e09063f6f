//! Reliability layer over raw datagrams.
//!
//! Sequence/ack/bitfield protocol with per-peer state:
//! - every header carries the sender's ack state (piggyback),
//! - a 32-wide history bitfield suppresses duplicates and acks stragglers,
//! - RFC 6298 RTO drives retransmission, capped at
//!   [`state::MAX_PACKET_RETRIES`] attempts.
//!
//! Out-of-order delivery inside the window is permitted by design; handlers
//! are last-write-wins and cooldown-checked, so slightly stale commands are
//! harmless.

pub mod protocol;
pub mod rtt;
pub mod state;

pub use protocol::{
    collect_retransmits, pending_ack_due, prepare_ack_only, prepare_outgoing, process_incoming,
    MSG_TYPE_NONE,
};
pub use rtt::RttEstimator;
pub use state::{seq_greater, ReliableConnectionState, SentPacketRecord, MAX_PACKET_RETRIES};
