//! Server endpoint: one bound socket, lazily-created per-peer receive
//! engines, and signal-driven shutdown.
//!
//! The server carries no reliable send engine; the reliable direction is
//! client to server only. The unreliable reverse path is available for
//! state broadcast.

use super::{
    bind_socket, process_reliable, process_unreliable, scan_window, GAP_SCAN_INTERVAL_MS,
    RECV_BUFFER_LEN,
};
use crate::clock::Clock;
use crate::config::TransportConfig;
use crate::error::{HudpError, Result};
use crate::events::{Event, Handler};
use crate::protocol::{Channel, Packet, HEADER_SIZE};
use crate::reliability::ReceiveWindow;
use crate::stats::TransportStats;
use bytes::Bytes;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::Mutex;
use tokio::task::AbortHandle;
use tracing::{debug, error, info, trace, warn};

/// Receive-side state for one remote peer. Created on the first datagram
/// from its address and kept for the endpoint lifetime.
struct Peer {
    window: ReceiveWindow,
    /// Sequence counter for unreliable packets sent back to this peer.
    unrel_seq: u16,
}

struct EngineState {
    peers: HashMap<SocketAddr, Peer>,
    stats: TransportStats,
    driver_tasks: Vec<AbortHandle>,
}

struct Shared {
    socket: UdpSocket,
    config: TransportConfig,
    handler: Arc<dyn Handler>,
    clock: Clock,
    closed: AtomicBool,
    state: Mutex<EngineState>,
}

/// Server side of the transport.
///
/// Bind with [`Server::bind`], then either call [`Server::start`] and drive
/// shutdown yourself, or let [`Server::run_until_shutdown`] block until an
/// OS termination signal arrives.
pub struct Server {
    shared: Arc<Shared>,
}

impl Server {
    pub async fn bind(
        addr: SocketAddr,
        config: TransportConfig,
        handler: Arc<dyn Handler>,
    ) -> Result<Self> {
        config.validate()?;
        let socket = bind_socket(addr, config.socket_rcvbuf, config.socket_sndbuf)?;
        info!(local = %socket.local_addr()?, "server endpoint bound");
        Ok(Self {
            shared: Arc::new(Shared {
                socket,
                config,
                handler,
                clock: Clock::new(),
                closed: AtomicBool::new(false),
                state: Mutex::new(EngineState {
                    peers: HashMap::new(),
                    stats: TransportStats::default(),
                    driver_tasks: Vec::new(),
                }),
            }),
        })
    }

    /// Spawns the receive loop and the per-peer gap-skip scan. Idempotent.
    pub async fn start(&self) {
        let mut state = self.shared.state.lock().await;
        if !state.driver_tasks.is_empty() || self.shared.closed.load(Ordering::SeqCst) {
            return;
        }
        let recv = tokio::spawn(recv_loop(self.shared.clone()));
        let scan = tokio::spawn(scan_loop(self.shared.clone()));
        state.driver_tasks.push(recv.abort_handle());
        state.driver_tasks.push(scan.abort_handle());
        debug!("server endpoint started");
    }

    /// Starts the endpoint and blocks until an interrupt or termination
    /// signal arrives, then closes it.
    pub async fn run_until_shutdown(&self) -> Result<()> {
        self.start().await;
        wait_for_shutdown_signal().await?;
        info!("shutdown signal received");
        self.close().await;
        Ok(())
    }

    /// Sends a best-effort packet to `peer`, creating its state if this is
    /// the first contact.
    pub async fn send_unreliable(&self, peer: SocketAddr, payload: Bytes) -> Result<()> {
        let mtu = self.shared.config.mtu;
        if payload.len() + HEADER_SIZE > mtu {
            return Err(HudpError::PayloadTooLarge { len: payload.len(), mtu });
        }
        if self.shared.closed.load(Ordering::SeqCst) {
            return Ok(());
        }
        let shared = &self.shared;
        let mut state = shared.state.lock().await;
        let recv_window = shared.config.recv_window_size;
        let entry = state.peers.entry(peer).or_insert_with(|| Peer {
            window: ReceiveWindow::new(recv_window),
            unrel_seq: 0,
        });
        let seq = entry.unrel_seq;
        entry.unrel_seq = entry.unrel_seq.wrapping_add(1);

        let len = payload.len();
        let wire = Packet::data(Channel::Unreliable, seq, shared.clock.now_ms(), payload).encode();
        state.stats.tx_total += 1;
        state.stats.tx_unreliable += 1;
        shared.handler.on_event(Event::TxData { channel: Channel::Unreliable, seq, len });
        if let Err(e) = shared.socket.send_to(&wire, peer).await {
            warn!(%peer, seq, error = %e, "unreliable send failed");
            shared.handler.on_event(Event::Error { detail: format!("send to {peer}: {e}") });
        }
        trace!(%peer, seq, len, "unreliable packet sent");
        Ok(())
    }

    /// Snapshot of the endpoint counters and sample series.
    pub async fn stats(&self) -> TransportStats {
        self.shared.state.lock().await.stats.clone()
    }

    /// Number of peers seen so far.
    pub async fn peer_count(&self) -> usize {
        self.shared.state.lock().await.peers.len()
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.shared.socket.local_addr()?)
    }

    /// Shuts the endpoint down and cancels its driver tasks. Idempotent.
    pub async fn close(&self) {
        shutdown(&self.shared).await;
    }
}

/// Tears the endpoint down. Safe to call from the endpoint's own driver
/// tasks.
async fn shutdown(shared: &Arc<Shared>) {
    if shared.closed.swap(true, Ordering::SeqCst) {
        return;
    }
    let mut state = shared.state.lock().await;
    for task in state.driver_tasks.drain(..) {
        task.abort();
    }
    info!("server endpoint closed");
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};
    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result?,
        _ = terminate.recv() => {}
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() -> Result<()> {
    tokio::signal::ctrl_c().await?;
    Ok(())
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
        // Malformed datagrams drop silently, counters untouched.
        let Some(packet) = Packet::decode(Bytes::copy_from_slice(&buf[..len])) else {
            continue;
        };
        if packet.is_ack() {
            // No reliable traffic flows toward clients, so nothing here is
            // ever awaiting an ACK.
            trace!(%from, seq = packet.seq, "ignoring ack at server");
            continue;
        }

        let mut state = shared.state.lock().await;
        let state = &mut *state;
        let recv_window = shared.config.recv_window_size;
        let peer = state.peers.entry(from).or_insert_with(|| {
            debug!(%from, "new peer");
            Peer { window: ReceiveWindow::new(recv_window), unrel_seq: 0 }
        });
        match packet.channel {
            Channel::Unreliable => {
                process_unreliable(&shared.handler, &shared.clock, &mut state.stats, from, packet);
            }
            Channel::Reliable => {
                process_reliable(
                    &shared.socket,
                    &shared.handler,
                    &shared.clock,
                    &mut peer.window,
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
        for (&peer, entry) in state.peers.iter_mut() {
            scan_window(
                &shared.handler,
                &mut entry.window,
                &mut state.stats,
                peer,
                now,
                timeout,
            );
        }
    }
}
