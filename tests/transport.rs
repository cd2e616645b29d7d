//! End-to-end scenarios: client and server on loopback, with loss injected
//! by the relay harness where a scenario calls for it.

mod common;

use bytes::Bytes;
use common::{spawn_pair, spawn_pair_via, wait_until, Direction, Recorder};
use hudp::protocol::{Channel, Packet};
use hudp::{Event, HudpError, Server, TransportConfig};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;

const WAIT: Duration = Duration::from_secs(5);

fn is_ack_rx(event: &Event) -> bool {
    matches!(event, Event::AckRx { .. })
}

#[tokio::test]
async fn loss_free_reliable_burst_delivers_in_order() {
    let (server, server_rec, client, client_rec) = spawn_pair(TransportConfig::default()).await;

    for i in 0..10 {
        client
            .send_reliable(Bytes::from(format!("r_{i}")))
            .await
            .unwrap();
    }

    let deliveries = server_rec.wait_for_deliveries(10, WAIT).await;
    assert_eq!(deliveries.len(), 10);
    for (i, delivery) in deliveries.iter().enumerate() {
        assert_eq!(delivery.seq, i as u16);
        assert_eq!(delivery.payload, format!("r_{i}").as_bytes());
        assert_eq!(delivery.channel, Channel::Reliable);
        assert_eq!(delivery.channel.as_str(), "RELIABLE");
        assert!(!delivery.skipped);
    }

    wait_until("10 acks on the client", WAIT, || {
        client_rec.count_events(is_ack_rx) == 10
    })
    .await;

    let stats = client.stats().await;
    assert_eq!(stats.tx_reliable, 10);
    assert_eq!(stats.retx_count, 0);
    assert_eq!(stats.rtt.len(), 10);
    assert_eq!(client.in_flight().await, 0);

    client.close().await;
    server.close().await;
}

#[tokio::test]
async fn single_dropped_packet_is_recovered_by_retransmission() {
    let config = TransportConfig {
        retx_timeout_ms: 100,
        // Generous, so the recovery path is exercised without a skip racing it.
        gap_skip_timeout_ms: 2000,
        ..TransportConfig::default()
    };
    let mut dropped = false;
    let (server, server_rec, client, client_rec, _relay) =
        spawn_pair_via(config, move |direction, packet| {
            let is_first_tx_of_3 = direction == Direction::ToServer
                && packet.channel == Channel::Reliable
                && !packet.is_ack()
                && packet.seq == 3
                && !dropped;
            if is_first_tx_of_3 {
                dropped = true;
                return false;
            }
            true
        })
        .await;

    for i in 0..10 {
        client
            .send_reliable(Bytes::from(format!("r_{i}")))
            .await
            .unwrap();
    }

    let deliveries = server_rec.wait_for_deliveries(10, WAIT).await;
    let seqs: Vec<u16> = deliveries.iter().map(|d| d.seq).collect();
    assert_eq!(seqs, (0..10).collect::<Vec<u16>>());
    assert!(deliveries.iter().all(|d| !d.skipped));

    let retx_for_3 = client_rec.count_events(|e| matches!(e, Event::Retx { seq: 3, .. }));
    assert!(retx_for_3 >= 1, "expected a retransmission of seq 3");
    let skips = server_rec.count_events(|e| matches!(e, Event::SkipGap { .. }));
    assert_eq!(skips, 0);

    client.close().await;
    server.close().await;
}

#[tokio::test]
async fn persistent_loss_triggers_drop_and_gap_skip() {
    let config = TransportConfig {
        retx_timeout_ms: 100,
        gap_skip_timeout_ms: 300,
        max_retx: 3,
        ..TransportConfig::default()
    };
    let (server, server_rec, client, client_rec, _relay) =
        spawn_pair_via(config, |direction, packet| {
            // Seq 5 never reaches the server, initial send or retransmission.
            !(direction == Direction::ToServer
                && packet.channel == Channel::Reliable
                && !packet.is_ack()
                && packet.seq == 5)
        })
        .await;

    for i in 0..10 {
        client
            .send_reliable(Bytes::from(format!("r_{i}")))
            .await
            .unwrap();
    }

    let deliveries = server_rec.wait_for_deliveries(9, WAIT).await;
    let seqs: Vec<u16> = deliveries.iter().map(|d| d.seq).collect();
    assert_eq!(seqs, vec![0, 1, 2, 3, 4, 6, 7, 8, 9]);
    for delivery in &deliveries {
        // Only the first delivery after the skip is flagged.
        assert_eq!(delivery.skipped, delivery.seq == 6);
    }

    wait_until("drop_max_retx for seq 5 on the client", WAIT, || {
        client_rec.count_events(|e| matches!(e, Event::DropMaxRetx { seq: 5, .. })) == 1
    })
    .await;
    let retx_for_5 = client_rec.count_events(|e| matches!(e, Event::Retx { seq: 5, .. }));
    assert!(retx_for_5 <= 3, "retransmissions exceeded max_retx: {retx_for_5}");
    assert_eq!(
        server_rec.count_events(|e| matches!(e, Event::SkipGap { from_seq: 5, to_seq: 6, .. })),
        1
    );
    assert_eq!(server.stats().await.skip_count, 1);

    client.close().await;
    server.close().await;
}

#[tokio::test]
async fn duplicate_data_is_reacked_but_not_redelivered() {
    let server_rec = Recorder::new();
    let server = Server::bind(
        "127.0.0.1:0".parse().unwrap(),
        TransportConfig::default(),
        server_rec.clone(),
    )
    .await
    .unwrap();
    server.start().await;
    let server_addr = server.local_addr().unwrap();

    // Raw socket standing in for a client, so the same datagram can be
    // replayed byte for byte.
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let wire = Packet::data(Channel::Reliable, 0, 1, Bytes::from_static(b"dup")).encode();

    let mut ack_buf = [0u8; 64];
    for _ in 0..2 {
        socket.send_to(&wire, server_addr).await.unwrap();
        let (len, _) = tokio::time::timeout(WAIT, socket.recv_from(&mut ack_buf))
            .await
            .expect("no ack before timeout")
            .unwrap();
        let ack = Packet::decode(Bytes::copy_from_slice(&ack_buf[..len])).unwrap();
        assert!(ack.is_ack());
        assert_eq!(ack.seq, 0);
    }

    let deliveries = server_rec.deliveries();
    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0].payload, &b"dup"[..]);
    assert_eq!(
        server_rec.count_events(|e| matches!(e, Event::AckTx { seq: 0, .. })),
        2
    );

    server.close().await;
}

#[tokio::test]
async fn mixed_channels_interleaved() {
    let (server, server_rec, client, _client_rec) = spawn_pair(TransportConfig::default()).await;

    for i in 0..10 {
        client
            .send_reliable(Bytes::from(format!("r_{i}")))
            .await
            .unwrap();
        client
            .send_unreliable(Bytes::from(format!("u_{i}")))
            .await
            .unwrap();
    }

    let deliveries = server_rec.wait_for_deliveries(20, WAIT).await;
    let reliable: Vec<_> = deliveries
        .iter()
        .filter(|d| d.channel == Channel::Reliable)
        .collect();
    let unreliable: Vec<_> = deliveries
        .iter()
        .filter(|d| d.channel == Channel::Unreliable)
        .collect();

    assert_eq!(reliable.len(), 10);
    for (i, delivery) in reliable.iter().enumerate() {
        assert_eq!(delivery.seq, i as u16);
        assert_eq!(delivery.payload, format!("r_{i}").as_bytes());
    }

    assert_eq!(unreliable.len(), 10);
    for delivery in &unreliable {
        assert_eq!(delivery.channel.as_str(), "UNRELIABLE");
        assert!(!delivery.skipped);
    }

    // Only reliable data is acknowledged.
    assert_eq!(
        server_rec.count_events(|e| matches!(e, Event::AckTx { .. })),
        10
    );

    let stats = server.stats().await;
    assert_eq!(stats.rx_reliable, 10);
    assert_eq!(stats.rx_unreliable, 10);
    assert_eq!(stats.transit.len(), 10);

    client.close().await;
    server.close().await;
}

#[tokio::test]
async fn window_backpressure_bounds_in_flight() {
    let config = TransportConfig {
        send_window_size: 4,
        ..TransportConfig::default()
    };
    let (server, server_rec, client, _client_rec) = spawn_pair(config).await;
    let client = Arc::new(client);

    let mut joins = Vec::new();
    for i in 0..10 {
        let client = client.clone();
        joins.push(tokio::spawn(async move {
            client
                .send_reliable(Bytes::from(format!("w_{i}")))
                .await
                .unwrap();
        }));
    }

    // Sample the in-flight gauge while the sends drain through the window.
    for _ in 0..40 {
        assert!(client.in_flight().await <= 4, "send window exceeded");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    for join in joins {
        join.await.unwrap();
    }

    let deliveries = server_rec.wait_for_deliveries(10, WAIT).await;
    let seqs: Vec<u16> = deliveries.iter().map(|d| d.seq).collect();
    assert_eq!(seqs, (0..10).collect::<Vec<u16>>());

    // Concurrent senders may be admitted in any order; every payload must
    // still arrive exactly once.
    let mut payloads: Vec<_> = deliveries
        .iter()
        .map(|d| String::from_utf8(d.payload.to_vec()).unwrap())
        .collect();
    payloads.sort();
    let mut expected: Vec<_> = (0..10).map(|i| format!("w_{i}")).collect();
    expected.sort();
    assert_eq!(payloads, expected);

    client.close().await;
    server.close().await;
}

#[tokio::test]
async fn random_loss_is_recovered_by_retransmission() {
    let config = TransportConfig {
        retx_timeout_ms: 50,
        max_retx: 200,
        // Retransmission, not skipping, must close every hole here.
        gap_skip_timeout_ms: 60_000,
        ..TransportConfig::default()
    };
    let (server, server_rec, client, _client_rec, _relay) =
        spawn_pair_via(config, |_, _| !rand::rng().random_bool(0.3)).await;

    for i in 0..20 {
        client
            .send_reliable(Bytes::from(format!("r_{i}")))
            .await
            .unwrap();
    }

    let deliveries = server_rec
        .wait_for_deliveries(20, Duration::from_secs(20))
        .await;
    let seqs: Vec<u16> = deliveries.iter().map(|d| d.seq).collect();
    assert_eq!(seqs, (0..20).collect::<Vec<u16>>());
    assert!(deliveries.iter().all(|d| !d.skipped));

    client.close().await;
    server.close().await;
}

#[tokio::test]
async fn server_unreliable_reverse_path_reaches_the_client() {
    let (server, server_rec, client, client_rec) = spawn_pair(TransportConfig::default()).await;

    client
        .send_unreliable(Bytes::from_static(b"hello"))
        .await
        .unwrap();
    let deliveries = server_rec.wait_for_deliveries(1, WAIT).await;
    let client_addr = deliveries[0].peer;

    server
        .send_unreliable(client_addr, Bytes::from_static(b"state tick"))
        .await
        .unwrap();
    let deliveries = client_rec.wait_for_deliveries(1, WAIT).await;
    assert_eq!(deliveries[0].channel, Channel::Unreliable);
    assert_eq!(deliveries[0].payload, &b"state tick"[..]);
    assert!(!deliveries[0].skipped);

    client.close().await;
    server.close().await;
}

#[tokio::test]
async fn oversized_payloads_are_rejected_synchronously() {
    let (server, _server_rec, client, _client_rec) = spawn_pair(TransportConfig::default()).await;

    let oversized = Bytes::from(vec![0u8; 1193]); // 1193 + 8 > 1200
    let err = client.send_reliable(oversized.clone()).await.unwrap_err();
    assert!(matches!(err, HudpError::PayloadTooLarge { len: 1193, mtu: 1200 }));
    let err = client.send_unreliable(oversized).await.unwrap_err();
    assert!(matches!(err, HudpError::PayloadTooLarge { .. }));

    // The boundary case still fits.
    client
        .send_unreliable(Bytes::from(vec![0u8; 1192]))
        .await
        .unwrap();

    client.close().await;
    server.close().await;
}

#[tokio::test]
async fn close_wakes_blocked_senders_without_error() {
    let config = TransportConfig {
        send_window_size: 1,
        retx_timeout_ms: 100,
        max_retx: 1000,
        ..TransportConfig::default()
    };
    // No server listening: nothing will ever be ACKed, so the second send
    // blocks on the full window until close.
    let client_rec = Recorder::new();
    let client = hudp::Client::connect(
        "127.0.0.1:9".parse().unwrap(),
        config,
        client_rec.clone(),
    )
    .await
    .unwrap();
    client.start().await;
    let client = Arc::new(client);

    client
        .send_reliable(Bytes::from_static(b"first"))
        .await
        .unwrap();
    assert_eq!(client.in_flight().await, 1);

    let blocked = {
        let client = client.clone();
        tokio::spawn(async move { client.send_reliable(Bytes::from_static(b"second")).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!blocked.is_finished(), "send should be blocked on the window");

    client.close().await;
    let result = tokio::time::timeout(WAIT, blocked)
        .await
        .expect("blocked sender not woken by close")
        .unwrap();
    assert!(result.is_ok());
    assert_eq!(client.in_flight().await, 0);
}
