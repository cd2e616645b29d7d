//! Counters and timing telemetry for one endpoint.

use std::collections::VecDeque;

/// Samples retained per series; the oldest is evicted first.
const SAMPLE_CAPACITY: usize = 100;

/// A bounded FIFO of millisecond samples with an RFC 3550 jitter estimate.
///
/// Jitter follows the recurrence `J += (|D| - J) / 16` where `D` is the
/// delta between consecutive samples: an exponentially weighted mean
/// absolute deviation.
#[derive(Debug, Clone, Default)]
pub struct SampleSeries {
    samples: VecDeque<u32>,
    last: Option<u32>,
    jitter: f64,
}

impl SampleSeries {
    pub fn record(&mut self, sample_ms: u32) {
        if let Some(last) = self.last {
            let delta = f64::from(sample_ms) - f64::from(last);
            self.jitter += (delta.abs() - self.jitter) / 16.0;
        }
        self.last = Some(sample_ms);
        if self.samples.len() == SAMPLE_CAPACITY {
            self.samples.pop_front();
        }
        self.samples.push_back(sample_ms);
    }

    /// Smoothed jitter in milliseconds.
    pub fn jitter_ms(&self) -> f64 {
        self.jitter
    }

    /// Most recent sample, if any.
    pub fn last_ms(&self) -> Option<u32> {
        self.last
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Mean of the retained samples.
    pub fn mean_ms(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        let sum: u64 = self.samples.iter().map(|&s| u64::from(s)).sum();
        Some(sum as f64 / self.samples.len() as f64)
    }

    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.samples.iter().copied()
    }
}

/// Endpoint counters and sample series.
///
/// `tx_total` / `rx_total` count every datagram handed to or decoded from
/// the socket, ACKs and retransmissions included; the per-channel counters
/// count data packets only.
#[derive(Debug, Clone, Default)]
pub struct TransportStats {
    pub tx_total: u64,
    pub tx_reliable: u64,
    pub tx_unreliable: u64,
    pub rx_total: u64,
    pub rx_reliable: u64,
    pub rx_unreliable: u64,
    pub retx_count: u64,
    pub skip_count: u64,
    /// Round-trip times measured from first transmission to ACK.
    pub rtt: SampleSeries,
    /// One-way transit of unreliable packets; sender and receiver clocks are
    /// unsynchronized, so the series is meaningful only relatively (jitter).
    pub transit: SampleSeries,
}

impl TransportStats {
    pub fn record_rtt(&mut self, rtt_ms: u32) {
        self.rtt.record(rtt_ms);
    }

    pub fn record_transit(&mut self, transit_ms: u32) {
        self.transit.record(transit_ms);
    }
}
