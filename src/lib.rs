//! # hudp
//!
//! A hybrid UDP transport for real-time games. One socket carries two
//! logical channels: an UNRELIABLE best-effort channel for frequent state
//! updates where stale data is worthless, and a RELIABLE channel offering
//! in-order, deduplicated delivery via Selective Repeat ARQ with a
//! *gap-skip* policy that trades completeness for bounded latency.
//!
//! The reliable direction runs client to server. Each reliable packet is
//! acknowledged individually; unacked packets are retransmitted on per-seq
//! timers up to `max_retx` attempts, and sends suspend while the fixed send
//! window is full. On the receive side, packets drain to the application in
//! strict sequence order; a head-of-line hole that stalls longer than
//! `gap_skip_timeout_ms` is abandoned so later traffic keeps flowing, with
//! the first delivery after the jump marked `skipped`.
//!
//! ```no_run
//! use bytes::Bytes;
//! use hudp::{Client, Handler, Delivery, Server, TransportConfig};
//! use std::sync::Arc;
//!
//! struct Printer;
//!
//! impl Handler for Printer {
//!     fn on_receive(&self, delivery: Delivery) {
//!         println!(
//!             "{} seq={} {} bytes",
//!             delivery.channel.as_str(),
//!             delivery.seq,
//!             delivery.payload.len()
//!         );
//!     }
//! }
//!
//! # async fn run() -> hudp::Result<()> {
//! let server = Server::bind(
//!     "0.0.0.0:9999".parse().unwrap(),
//!     TransportConfig::default(),
//!     Arc::new(Printer),
//! )
//! .await?;
//! server.start().await;
//!
//! let client = Client::connect(
//!     "127.0.0.1:9999".parse().unwrap(),
//!     TransportConfig::default(),
//!     Arc::new(Printer),
//! )
//! .await?;
//! client.start().await;
//! client.send_reliable(Bytes::from_static(b"player action: jump")).await?;
//! client.send_unreliable(Bytes::from_static(b"pos x=100 y=200")).await?;
//! # Ok(())
//! # }
//! ```

pub mod clock;
pub mod config;
pub mod endpoint;
pub mod error;
pub mod events;
pub mod protocol;
pub mod reliability;
pub mod stats;

pub use config::{ConfigError, TransportConfig};
pub use endpoint::{Client, Server};
pub use error::{HudpError, Result};
pub use events::{Delivery, Event, Handler, NullHandler};
pub use protocol::{Channel, Packet};
pub use stats::{SampleSeries, TransportStats};
