//! Shared harness for the end-to-end suite: a UDP relay with a programmable
//! drop policy standing in for the lossy network, plus a recording handler.

use bytes::Bytes;
use hudp::events::{Delivery, Event, Handler};
use hudp::protocol::Packet;
use hudp::{Client, Server, TransportConfig};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

/// Which way a datagram is crossing the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    ToServer,
    ToClient,
}

/// A userspace "network" between one client and one server: every datagram
/// passes through the policy, which returns `false` to drop it.
pub struct Relay {
    pub addr: SocketAddr,
    task: JoinHandle<()>,
}

impl Relay {
    pub async fn spawn<F>(server_addr: SocketAddr, policy: F) -> Self
    where
        F: FnMut(Direction, &Packet) -> bool + Send + 'static,
    {
        let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = socket.local_addr().unwrap();
        let task = tokio::spawn(relay_loop(socket, server_addr, policy));
        Self { addr, task }
    }
}

impl Drop for Relay {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn relay_loop<F>(socket: UdpSocket, server: SocketAddr, mut policy: F)
where
    F: FnMut(Direction, &Packet) -> bool + Send + 'static,
{
    let mut client: Option<SocketAddr> = None;
    let mut buf = vec![0u8; 65535];
    loop {
        let Ok((len, from)) = socket.recv_from(&mut buf).await else {
            return;
        };
        let data = &buf[..len];
        let (direction, dest) = if from == server {
            let Some(client) = client else { continue };
            (Direction::ToClient, client)
        } else {
            client = Some(from);
            (Direction::ToServer, server)
        };
        let forward = match Packet::decode(Bytes::copy_from_slice(data)) {
            Some(packet) => policy(direction, &packet),
            None => true,
        };
        if forward {
            let _ = socket.send_to(data, dest).await;
        }
    }
}

/// Handler that records everything for later assertions.
#[derive(Default)]
pub struct Recorder {
    deliveries: Mutex<Vec<Delivery>>,
    events: Mutex<Vec<Event>>,
}

impl Handler for Recorder {
    fn on_receive(&self, delivery: Delivery) {
        self.deliveries.lock().unwrap().push(delivery);
    }

    fn on_event(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn deliveries(&self) -> Vec<Delivery> {
        self.deliveries.lock().unwrap().clone()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn count_events(&self, pred: impl Fn(&Event) -> bool) -> usize {
        self.events.lock().unwrap().iter().filter(|e| pred(e)).count()
    }

    /// Polls until at least `n` deliveries arrived, then returns them all.
    pub async fn wait_for_deliveries(&self, n: usize, timeout: Duration) -> Vec<Delivery> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let current = self.deliveries();
            if current.len() >= n {
                return current;
            }
            if tokio::time::Instant::now() >= deadline {
                panic!(
                    "timed out waiting for {n} deliveries, got {}: {:?}",
                    current.len(),
                    current.iter().map(|d| d.seq).collect::<Vec<_>>()
                );
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

/// Polls `cond` until it holds, panicking with `what` on timeout.
pub async fn wait_until(what: &str, timeout: Duration, mut cond: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + timeout;
    while !cond() {
        if tokio::time::Instant::now() >= deadline {
            panic!("timed out waiting for {what}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Server and client talking directly over loopback.
pub async fn spawn_pair(
    config: TransportConfig,
) -> (Server, Arc<Recorder>, Client, Arc<Recorder>) {
    let server_rec = Recorder::new();
    let server = Server::bind("127.0.0.1:0".parse().unwrap(), config.clone(), server_rec.clone())
        .await
        .unwrap();
    server.start().await;

    let client_rec = Recorder::new();
    let client = Client::connect(server.local_addr().unwrap(), config, client_rec.clone())
        .await
        .unwrap();
    client.start().await;

    (server, server_rec, client, client_rec)
}

/// Server and client talking through a relay applying `policy`.
pub async fn spawn_pair_via<F>(
    config: TransportConfig,
    policy: F,
) -> (Server, Arc<Recorder>, Client, Arc<Recorder>, Relay)
where
    F: FnMut(Direction, &Packet) -> bool + Send + 'static,
{
    let server_rec = Recorder::new();
    let server = Server::bind("127.0.0.1:0".parse().unwrap(), config.clone(), server_rec.clone())
        .await
        .unwrap();
    server.start().await;

    let relay = Relay::spawn(server.local_addr().unwrap(), policy).await;

    let client_rec = Recorder::new();
    let client = Client::connect(relay.addr, config, client_rec.clone())
        .await
        .unwrap();
    client.start().await;

    (server, server_rec, client, client_rec, relay)
}
