//! Application-facing callback surface: delivered payloads and protocol
//! events.

use crate::protocol::Channel;
use bytes::Bytes;
use std::net::SocketAddr;

/// A payload handed to the application.
///
/// Reliable deliveries arrive in strict sequence order per peer; `skipped`
/// marks the first delivery after a gap-skip advance. Unreliable deliveries
/// arrive in whatever order the network produced, always with
/// `skipped = false`.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub channel: Channel,
    pub seq: u16,
    /// Sender timestamp from the packet header, preserved through the
    /// reorder buffer.
    pub ts_ms: u32,
    pub payload: Bytes,
    pub skipped: bool,
    /// Source address the packet arrived from.
    pub peer: SocketAddr,
}

/// Internal protocol activity, surfaced for logging, metrics and tests.
#[derive(Debug, Clone)]
pub enum Event {
    /// A data packet was handed to the socket for the first time.
    TxData { channel: Channel, seq: u16, len: usize },
    /// A data packet arrived and decoded cleanly.
    RxData { channel: Channel, seq: u16, len: usize, peer: SocketAddr },
    /// An acknowledgement was emitted for a reliable packet.
    AckTx { seq: u16, peer: SocketAddr },
    /// An acknowledgement arrived for an in-flight reliable packet.
    AckRx { seq: u16, rtt_ms: u32 },
    /// A reliable packet was retransmitted.
    Retx { seq: u16, attempt: u32 },
    /// A reliable packet exhausted its transmission attempts.
    DropMaxRetx { seq: u16, attempts: u32 },
    /// A stalled head-of-line gap was skipped for `peer`.
    SkipGap { peer: SocketAddr, from_seq: u16, to_seq: u16 },
    /// A payload was released to the application.
    Deliver { channel: Channel, seq: u16, skipped: bool, peer: SocketAddr },
    /// A recoverable I/O failure on the socket.
    Error { detail: String },
}

/// Sink for deliveries and events.
///
/// Callbacks run on the endpoint's driver tasks: they must return quickly
/// and must not block or call back into the endpoint.
pub trait Handler: Send + Sync + 'static {
    fn on_receive(&self, delivery: Delivery);

    fn on_event(&self, event: Event) {
        let _ = event;
    }
}

/// Discards everything; useful when only the counters matter.
#[derive(Debug, Default)]
pub struct NullHandler;

impl Handler for NullHandler {
    fn on_receive(&self, _delivery: Delivery) {}
}
