//! Error taxonomy for the transport surface.
//!
//! Wire-level anomalies (malformed datagrams, duplicates, loss) are handled
//! inside the engines and never reach callers; only send-time validation and
//! endpoint setup can fail.

use crate::config::ConfigError;
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HudpError {
    /// The payload plus the 8-byte header does not fit in one datagram.
    #[error("payload of {len} bytes exceeds mtu {mtu} (header included)")]
    PayloadTooLarge { len: usize, mtu: usize },

    /// An I/O error occurred, typically while binding or tuning the socket.
    #[error("network I/O error: {0}")]
    Io(#[from] io::Error),

    /// The supplied configuration failed validation or could not be read.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for transport operations.
pub type Result<T> = std::result::Result<T, HudpError>;
