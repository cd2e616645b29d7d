//! Endpoint plumbing shared by the client and server: socket construction
//! with best-effort OS buffer tuning, and the inbound data paths both sides
//! run per peer.

mod client;
mod server;

pub use client::Client;
pub use server::Server;

use crate::clock::Clock;
use crate::events::{Delivery, Event, Handler};
use crate::protocol::{make_ack, Channel, Packet};
use crate::reliability::{Accept, ReceiveWindow, Released};
use crate::stats::TransportStats;
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tracing::{debug, trace, warn};

/// Gap-skip scan period while an endpoint is open.
pub(crate) const GAP_SCAN_INTERVAL_MS: u64 = 50;

/// Receive buffer sized for the largest possible UDP payload rather than the
/// configured MTU, so a peer with a larger MTU is never silently truncated.
pub(crate) const RECV_BUFFER_LEN: usize = 65535;

/// Consecutive receive failures after which the socket is treated as
/// unrecoverable and the endpoint tears itself down.
pub(crate) const MAX_CONSECUTIVE_IO_ERRORS: u32 = 16;

/// Binds a UDP socket at `addr`, requesting the configured OS buffer sizes.
/// Buffer sizing is best effort: refusal is logged, not fatal.
pub(crate) fn bind_socket(
    addr: SocketAddr,
    rcvbuf: usize,
    sndbuf: usize,
) -> io::Result<UdpSocket> {
    let domain = Domain::for_address(addr);
    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;
    if let Err(e) = socket.set_recv_buffer_size(rcvbuf) {
        debug!(requested = rcvbuf, error = %e, "SO_RCVBUF request not honored");
    }
    if let Err(e) = socket.set_send_buffer_size(sndbuf) {
        debug!(requested = sndbuf, error = %e, "SO_SNDBUF request not honored");
    }
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    UdpSocket::from_std(socket.into())
}

/// Handles an inbound unreliable data packet: immediate delivery plus
/// one-way transit sampling.
pub(crate) fn process_unreliable(
    handler: &Arc<dyn Handler>,
    clock: &Clock,
    stats: &mut TransportStats,
    peer: SocketAddr,
    packet: Packet,
) {
    stats.rx_total += 1;
    stats.rx_unreliable += 1;
    // Relative only: the sender's clock is not synchronized with ours.
    let transit = clock.now_ms().wrapping_sub(packet.ts_ms);
    stats.record_transit(transit);

    handler.on_event(Event::RxData {
        channel: Channel::Unreliable,
        seq: packet.seq,
        len: packet.payload.len(),
        peer,
    });
    handler.on_event(Event::Deliver {
        channel: Channel::Unreliable,
        seq: packet.seq,
        skipped: false,
        peer,
    });
    handler.on_receive(Delivery {
        channel: Channel::Unreliable,
        seq: packet.seq,
        ts_ms: packet.ts_ms,
        payload: packet.payload,
        skipped: false,
        peer,
    });
}

/// Handles an inbound reliable data packet: re-ACK unconditionally (the
/// previous ACK may have been lost), then offer it to the peer's reorder
/// window and release whatever became contiguous.
pub(crate) async fn process_reliable(
    socket: &UdpSocket,
    handler: &Arc<dyn Handler>,
    clock: &Clock,
    window: &mut ReceiveWindow,
    stats: &mut TransportStats,
    peer: SocketAddr,
    packet: Packet,
) {
    stats.rx_total += 1;
    stats.rx_reliable += 1;
    handler.on_event(Event::RxData {
        channel: Channel::Reliable,
        seq: packet.seq,
        len: packet.payload.len(),
        peer,
    });

    let ack = make_ack(packet.seq, clock.now_ms());
    match socket.send_to(&ack, peer).await {
        Ok(_) => {
            stats.tx_total += 1;
            handler.on_event(Event::AckTx { seq: packet.seq, peer });
        }
        Err(e) => {
            warn!(%peer, seq = packet.seq, error = %e, "failed to send ack");
            handler.on_event(Event::Error { detail: format!("ack send to {peer}: {e}") });
        }
    }

    let mut released = Vec::new();
    let now = clock.now_ms();
    match window.offer(packet.seq, packet.ts_ms, packet.payload, now, &mut released) {
        Accept::Buffered => {}
        Accept::OutOfWindow => {
            trace!(%peer, seq = packet.seq, "dropping out-of-window reliable packet");
        }
        Accept::Duplicate => {
            trace!(%peer, seq = packet.seq, "dropping duplicate reliable packet");
        }
    }
    dispatch_released(handler, peer, released);
}

/// One gap-skip tick for one peer's window.
pub(crate) fn scan_window(
    handler: &Arc<dyn Handler>,
    window: &mut ReceiveWindow,
    stats: &mut TransportStats,
    peer: SocketAddr,
    now_ms: u32,
    timeout_ms: u32,
) {
    let mut released = Vec::new();
    if let Some(skip) = window.skip_stalled(now_ms, timeout_ms, &mut released) {
        stats.skip_count += 1;
        debug!(
            %peer,
            from_seq = skip.from_seq,
            to_seq = skip.to_seq,
            "skipping stalled gap"
        );
        handler.on_event(Event::SkipGap {
            peer,
            from_seq: skip.from_seq,
            to_seq: skip.to_seq,
        });
        dispatch_released(handler, peer, released);
    }
}

fn dispatch_released(handler: &Arc<dyn Handler>, peer: SocketAddr, released: Vec<Released>) {
    for r in released {
        handler.on_event(Event::Deliver {
            channel: Channel::Reliable,
            seq: r.seq,
            skipped: r.skipped,
            peer,
        });
        handler.on_receive(Delivery {
            channel: Channel::Reliable,
            seq: r.seq,
            ts_ms: r.ts_ms,
            payload: r.payload,
            skipped: r.skipped,
            peer,
        });
    }
}
