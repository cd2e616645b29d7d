//! Client endpoint: one remote peer, a full send engine (window admission,
//! per-seq retransmission timers, ACK processing) plus a receive engine.

use super::{
    bind_socket, process_reliable, process_unreliable, scan_window, GAP_SCAN_INTERVAL_MS,
    RECV_BUFFER_LEN,
};
use crate::clock::Clock;
use crate::config::TransportConfig;
use crate::error::{HudpError, Result};
use crate::events::{Event, Handler};
use crate::protocol::{Channel, Packet, HEADER_SIZE};
use crate::reliability::{InFlight, ReceiveWindow, SendWindow};
use crate::stats::TransportStats;
use bytes::Bytes;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::AbortHandle;
use tracing::{debug, error, info, trace, warn};

/// Engine state serialized behind the endpoint mutex.
struct EngineState {
    send: SendWindow,
    recv: ReceiveWindow,
    stats: TransportStats,
    driver_tasks: Vec<AbortHandle>,
}

struct Shared {
    socket: UdpSocket,
    remote: SocketAddr,
    config: TransportConfig,
    handler: Arc<dyn Handler>,
    clock: Clock,
    /// One permit per free slot in the reliable send window.
    window: Arc<Semaphore>,
    closed: AtomicBool,
    state: Mutex<EngineState>,
}

/// Client side of the transport, bound to a single server address.
///
/// Construct with [`Client::connect`], then call [`Client::start`] to spawn
/// the receive loop and gap-skip scan. Reliable sends suspend while the send
/// window is full and resume as ACKs (or abandonments) free slots.
pub struct Client {
    shared: Arc<Shared>,
}

impl Client {
    /// Binds an ephemeral local socket facing `remote`.
    pub async fn connect(
        remote: SocketAddr,
        config: TransportConfig,
        handler: Arc<dyn Handler>,
    ) -> Result<Self> {
        config.validate()?;
        let bind_addr: SocketAddr = if remote.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = bind_socket(bind_addr, config.socket_rcvbuf, config.socket_sndbuf)?;
        info!(%remote, local = %socket.local_addr()?, "client endpoint bound");

        let window = Arc::new(Semaphore::new(usize::from(config.send_window_size)));
        let recv_window = config.recv_window_size;
        Ok(Self {
            shared: Arc::new(Shared {
                socket,
                remote,
                config,
                handler,
                clock: Clock::new(),
                window,
                closed: AtomicBool::new(false),
                state: Mutex::new(EngineState {
                    send: SendWindow::new(),
                    recv: ReceiveWindow::new(recv_window),
                    stats: TransportStats::default(),
                    driver_tasks: Vec::new(),
                }),
            }),
        })
    }

    /// Spawns the receive loop and the gap-skip scan. Idempotent.
    pub async fn start(&self) {
        let mut state = self.shared.state.lock().await;
        if !state.driver_tasks.is_empty() || self.shared.closed.load(Ordering::SeqCst) {
            return;
        }
        let recv = tokio::spawn(recv_loop(self.shared.clone()));
        let scan = tokio::spawn(scan_loop(self.shared.clone()));
        state.driver_tasks.push(recv.abort_handle());
        state.driver_tasks.push(scan.abort_handle());
        debug!(remote = %self.shared.remote, "client endpoint started");
    }

    /// Sends a best-effort packet. Never blocks on the window.
    pub async fn send_unreliable(&self, payload: Bytes) -> Result<()> {
        self.check_size(payload.len())?;
        if self.shared.closed.load(Ordering::SeqCst) {
            return Ok(());
        }
        let shared = &self.shared;
        let mut state = shared.state.lock().await;
        let seq = state.send.alloc_unreliable_seq();
        let len = payload.len();
        let wire = Packet::data(Channel::Unreliable, seq, shared.clock.now_ms(), payload).encode();
        state.stats.tx_total += 1;
        state.stats.tx_unreliable += 1;
        shared.handler.on_event(Event::TxData { channel: Channel::Unreliable, seq, len });
        if let Err(e) = shared.socket.send_to(&wire, shared.remote).await {
            warn!(seq, error = %e, "unreliable send failed");
            shared.handler.on_event(Event::Error { detail: format!("send: {e}") });
        }
        trace!(seq, len, "unreliable packet sent");
        Ok(())
    }

    /// Sends a reliable packet, suspending while the send window is full.
    ///
    /// Returns once the initial transmission has been handed to the socket;
    /// retransmission then runs on a per-seq timer until the packet is ACKed
    /// or abandoned after `max_retx` attempts. If the endpoint closes while
    /// this call is waiting for window space, it returns without error and
    /// without transmitting.
    pub async fn send_reliable(&self, payload: Bytes) -> Result<()> {
        self.check_size(payload.len())?;
        let shared = &self.shared;
        if shared.closed.load(Ordering::SeqCst) {
            return Ok(());
        }
        let Ok(permit) = shared.window.clone().acquire_owned().await else {
            // Window semaphore closed: the endpoint shut down while we waited.
            return Ok(());
        };

        let mut state = shared.state.lock().await;
        if shared.closed.load(Ordering::SeqCst) {
            return Ok(());
        }
        let seq = state.send.alloc_reliable_seq();
        let now = shared.clock.now_ms();
        let len = payload.len();
        let wire = Packet::data(Channel::Reliable, seq, now, payload.clone()).encode();
        let timer = tokio::spawn(retx_loop(shared.clone(), seq)).abort_handle();
        state.send.track(seq, InFlight::new(payload, now, timer, permit));
        state.stats.tx_total += 1;
        state.stats.tx_reliable += 1;
        shared.handler.on_event(Event::TxData { channel: Channel::Reliable, seq, len });
        if let Err(e) = shared.socket.send_to(&wire, shared.remote).await {
            // The retransmission timer covers a failed first transmission.
            warn!(seq, error = %e, "reliable send failed");
            shared.handler.on_event(Event::Error { detail: format!("send: {e}") });
        }
        trace!(seq, len, "reliable packet sent");
        Ok(())
    }

    /// Snapshot of the endpoint counters and sample series.
    pub async fn stats(&self) -> TransportStats {
        self.shared.state.lock().await.stats.clone()
    }

    /// Number of unacked reliable packets currently in flight.
    pub async fn in_flight(&self) -> usize {
        self.shared.state.lock().await.send.in_flight_len()
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.shared.socket.local_addr()?)
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.shared.remote
    }

    /// Shuts the endpoint down: cancels the driver tasks and every
    /// retransmission timer, then wakes any sender blocked on the window
    /// (it returns without error). Idempotent.
    pub async fn close(&self) {
        shutdown(&self.shared).await;
    }

    fn check_size(&self, len: usize) -> Result<()> {
        let mtu = self.shared.config.mtu;
        if len + HEADER_SIZE > mtu {
            return Err(HudpError::PayloadTooLarge { len, mtu });
        }
        Ok(())
    }
}

/// Tears the endpoint down: driver tasks, retransmission timers, window
/// waiters. Safe to call from the endpoint's own driver tasks.
async fn shutdown(shared: &Arc<Shared>) {
    if shared.closed.swap(true, Ordering::SeqCst) {
        return;
    }
    let mut state = shared.state.lock().await;
    for task in state.driver_tasks.drain(..) {
        task.abort();
    }
    for (_, entry) in state.send.drain() {
        entry.timer.abort();
    }
    shared.window.close();
    info!(remote = %shared.remote, "client endpoint closed");
}

/// Per-seq retransmission timer. Each expiry retransmits once with the RETX
/// flag and a fresh timestamp, until the packet is ACKed (entry gone) or
/// `max_retx` attempts are exhausted.
async fn retx_loop(shared: Arc<Shared>, seq: u16) {
    let period = Duration::from_millis(shared.config.retx_timeout_ms);
    loop {
        tokio::time::sleep(period).await;
        let mut state = shared.state.lock().await;

        let exhausted = match state.send.get_mut(seq) {
            // ACK won the race with this expiry.
            None => return,
            Some(entry) => entry.retx_count >= shared.config.max_retx,
        };
        if exhausted {
            if let Some(entry) = state.send.untrack(seq) {
                let attempts = entry.retx_count;
                debug!(seq, attempts, "abandoning reliable packet after max retransmissions");
                shared.handler.on_event(Event::DropMaxRetx { seq, attempts });
            }
            // Dropping the entry released its window permit.
            return;
        }

        let now = shared.clock.now_ms();
        let wire;
        let attempt;
        match state.send.get_mut(seq) {
            None => return,
            Some(entry) => {
                entry.retx_count += 1;
                entry.last_sent_ms = now;
                attempt = entry.retx_count;
                wire = Packet::retx(seq, now, entry.payload.clone()).encode();
            }
        }
        state.stats.retx_count += 1;
        state.stats.tx_total += 1;
        trace!(seq, attempt, "retransmitting");
        shared.handler.on_event(Event::Retx { seq, attempt });
        if let Err(e) = shared.socket.send_to(&wire, shared.remote).await {
            warn!(seq, error = %e, "retransmission failed");
            shared.handler.on_event(Event::Error { detail: format!("retx send: {e}") });
        }
    }
}

/// Processes an ACK against the in-flight set: record RTT (measured from the
/// first transmission), cancel the timer, free the window slot.
async fn handle_ack(shared: &Arc<Shared>, seq: u16) {
    let mut state = shared.state.lock().await;
    state.stats.rx_total += 1;
    let Some(entry) = state.send.untrack(seq) else {
        trace!(seq, "ignoring stray ack");
        return;
    };
    entry.timer.abort();
    let rtt = shared.clock.now_ms().wrapping_sub(entry.first_sent_ms);
    state.stats.record_rtt(rtt);
    trace!(seq, rtt_ms = rtt, "ack received");
    shared.handler.on_event(Event::AckRx { seq, rtt_ms: rtt });
}

async fn recv_loop(shared: Arc<Shared>) {
    let mut buf = vec![0u8; RECV_BUFFER_LEN];
    let mut consecutive_errors = 0u32;
    loop {
        let (len, from) = match shared.socket.recv_from(&mut buf).await {
            Ok(v) => {
                consecutive_errors = 0;
                v
            }
            Err(e) => {
                if shared.closed.load(Ordering::SeqCst) {
                    return;
                }
                warn!(error = %e, "socket receive failed");
                shared.handler.on_event(Event::Error { detail: format!("recv: {e}") });
                consecutive_errors += 1;
                if consecutive_errors >= super::MAX_CONSECUTIVE_IO_ERRORS {
                    error!("socket unrecoverable, closing endpoint");
                    shutdown(&shared).await;
                    return;
                }
                continue;
            }
        };
        if from != shared.remote {
            trace!(%from, "ignoring datagram from unexpected source");
            continue;
        }
        // Malformed datagrams drop silently, counters untouched.
        let Some(packet) = Packet::decode(Bytes::copy_from_slice(&buf[..len])) else {
            continue;
        };
        if packet.is_ack() {
            handle_ack(&shared, packet.seq).await;
            continue;
        }
        let mut state = shared.state.lock().await;
        let state = &mut *state;
        match packet.channel {
            Channel::Unreliable => {
                process_unreliable(&shared.handler, &shared.clock, &mut state.stats, from, packet);
            }
            Channel::Reliable => {
                process_reliable(
                    &shared.socket,
                    &shared.handler,
                    &shared.clock,
                    &mut state.recv,
                    &mut state.stats,
                    from,
                    packet,
                )
                .await;
            }
        }
    }
}

async fn scan_loop(shared: Arc<Shared>) {
    let mut tick = tokio::time::interval(Duration::from_millis(GAP_SCAN_INTERVAL_MS));
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let timeout = shared.config.gap_skip_timeout_ms as u32;
    loop {
        tick.tick().await;
        let mut state = shared.state.lock().await;
        let state = &mut *state;
        let now = shared.clock.now_ms();
        scan_window(
            &shared.handler,
            &mut state.recv,
            &mut state.stats,
            shared.remote,
            now,
            timeout,
        );
    }
}
