//! Sender-side reliability state: sequence allocation and the in-flight set.
//!
//! The async machinery around this state (window admission, retransmission
//! timer tasks, ACK processing) lives in the client endpoint; this module
//! owns the bookkeeping those paths share.

use bytes::Bytes;
use std::collections::HashMap;
use tokio::sync::OwnedSemaphorePermit;
use tokio::task::AbortHandle;

/// One reliable packet awaiting acknowledgement.
///
/// The payload is retained for retransmission. An entry exists iff the seq
/// has been transmitted at least once, has not been ACKed, and has not
/// exhausted its attempts.
#[derive(Debug)]
pub struct InFlight {
    pub payload: Bytes,
    /// Timestamp of the first transmission; RTT is measured against this.
    pub first_sent_ms: u32,
    /// Timestamp of the most recent (re)transmission.
    pub last_sent_ms: u32,
    /// Retransmissions performed so far (0 after the initial send).
    pub retx_count: u32,
    /// Handle to this seq's retransmission timer task.
    pub timer: AbortHandle,
    /// Window slot held for the lifetime of the entry; dropping the entry
    /// releases it and wakes one blocked reliable send.
    _permit: OwnedSemaphorePermit,
}

impl InFlight {
    pub fn new(
        payload: Bytes,
        sent_ms: u32,
        timer: AbortHandle,
        permit: OwnedSemaphorePermit,
    ) -> Self {
        Self {
            payload,
            first_sent_ms: sent_ms,
            last_sent_ms: sent_ms,
            retx_count: 0,
            timer,
            _permit: permit,
        }
    }
}

/// Per-endpoint sender state for both channels.
#[derive(Debug, Default)]
pub struct SendWindow {
    next_seq: u16,
    unrel_seq: u16,
    in_flight: HashMap<u16, InFlight>,
}

impl SendWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates the next reliable sequence number, wrapping modulo 2^16.
    pub fn alloc_reliable_seq(&mut self) -> u16 {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        seq
    }

    /// Allocates the next unreliable sequence number, wrapping modulo 2^16.
    pub fn alloc_unreliable_seq(&mut self) -> u16 {
        let seq = self.unrel_seq;
        self.unrel_seq = self.unrel_seq.wrapping_add(1);
        seq
    }

    /// Starts tracking a transmitted reliable packet.
    pub fn track(&mut self, seq: u16, entry: InFlight) {
        self.in_flight.insert(seq, entry);
    }

    pub fn get_mut(&mut self, seq: u16) -> Option<&mut InFlight> {
        self.in_flight.get_mut(&seq)
    }

    /// Removes a tracked packet, whether acknowledged or abandoned. The
    /// caller decides whether to abort the entry's timer.
    pub fn untrack(&mut self, seq: u16) -> Option<InFlight> {
        self.in_flight.remove(&seq)
    }

    /// Number of unacked reliable packets in flight.
    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }

    /// Empties the in-flight set, handing entries back so the caller can
    /// abort their timers (used by `close`).
    pub fn drain(&mut self) -> Vec<(u16, InFlight)> {
        self.in_flight.drain().collect()
    }
}
