//! Transport configuration with TOML file support.

use crate::protocol::HEADER_SIZE;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::Path;
use thiserror::Error;

/// Largest window either direction may use; beyond half the sequence space
/// the modular window test becomes ambiguous.
pub const MAX_WINDOW: u16 = 1 << 15;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("TOML deserialization error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("configuration validation failed: {0}")]
    Validation(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Tunables for one endpoint. Every field has a default, so a TOML file may
/// override any subset.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Max datagram size in bytes, header included.
    pub mtu: usize,
    /// Retransmission timer period for unacked reliable packets.
    pub retx_timeout_ms: u64,
    /// Max unacked reliable packets in flight; reliable sends block when full.
    pub send_window_size: u16,
    /// Width of the receive acceptance window starting at the next expected seq.
    pub recv_window_size: u16,
    /// Transmission attempts before a reliable packet is abandoned.
    pub max_retx: u32,
    /// Reserved for ACK coalescing; ACKs are currently emitted per packet.
    pub ack_batch_ms: u64,
    /// Age after which a stalled head-of-line gap is skipped.
    pub gap_skip_timeout_ms: u64,
    /// Requested OS receive-buffer size (best effort).
    pub socket_rcvbuf: usize,
    /// Requested OS send-buffer size (best effort).
    pub socket_sndbuf: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            mtu: 1200,
            retx_timeout_ms: 200,
            send_window_size: 64,
            recv_window_size: 64,
            max_retx: 10,
            ack_batch_ms: 5,
            gap_skip_timeout_ms: 200,
            socket_rcvbuf: 1 << 20,
            socket_sndbuf: 1 << 20,
        }
    }
}

impl TransportConfig {
    /// Largest payload that fits in one datagram under this config.
    pub fn max_payload(&self) -> usize {
        self.mtu.saturating_sub(HEADER_SIZE)
    }

    pub fn validate(&self) -> Result<()> {
        if self.mtu <= HEADER_SIZE {
            return Err(ConfigError::Validation(format!(
                "mtu {} leaves no room for the {}-byte header",
                self.mtu, HEADER_SIZE
            )));
        }
        if self.send_window_size == 0 || self.send_window_size > MAX_WINDOW {
            return Err(ConfigError::Validation(format!(
                "send_window_size {} out of range 1..={}",
                self.send_window_size, MAX_WINDOW
            )));
        }
        if self.recv_window_size == 0 || self.recv_window_size > MAX_WINDOW {
            return Err(ConfigError::Validation(format!(
                "recv_window_size {} out of range 1..={}",
                self.recv_window_size, MAX_WINDOW
            )));
        }
        if self.retx_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "retx_timeout_ms must be greater than 0".to_string(),
            ));
        }
        if self.gap_skip_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "gap_skip_timeout_ms must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Reads and validates a config from a TOML file. Missing keys fall back
    /// to their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }
}
