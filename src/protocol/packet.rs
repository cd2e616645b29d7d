//! Wire codec for the fixed 8-byte header plus opaque payload.
//!
//! Layout (network byte order):
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |    Channel    |     Flags     |        Sequence Number        |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                     Timestamp (milliseconds)                  |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                         Payload (variable)                    |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Size of the fixed header preceding every payload.
pub const HEADER_SIZE: usize = 8;

/// Header flag bits.
pub mod flags {
    /// The seq field acknowledges a previously received reliable packet.
    pub const ACK: u8 = 0b0000_0001;
    /// Reserved for negative acknowledgements.
    pub const NACK: u8 = 0b0000_0010;
    /// The packet is a retransmission of an earlier reliable transmission.
    pub const RETX: u8 = 0b0000_0100;
}

/// The logical sub-stream a packet belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Channel {
    /// Best effort, no ARQ: stale data is worthless, so nothing is resent.
    Unreliable = 0,
    /// In-order, deduplicated delivery via Selective Repeat ARQ.
    Reliable = 1,
}

impl Channel {
    /// Maps the wire byte back to a channel; anything else is invalid.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Channel::Unreliable),
            1 => Some(Channel::Reliable),
            _ => None,
        }
    }

    /// Uppercase label used in deliveries and logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Channel::Unreliable => "UNRELIABLE",
            Channel::Reliable => "RELIABLE",
        }
    }
}

/// A decoded datagram: header fields plus the (possibly empty) payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub channel: Channel,
    pub flags: u8,
    pub seq: u16,
    pub ts_ms: u32,
    pub payload: Bytes,
}

impl Packet {
    /// A data packet with no flags set.
    pub fn data(channel: Channel, seq: u16, ts_ms: u32, payload: Bytes) -> Self {
        Self { channel, flags: 0, seq, ts_ms, payload }
    }

    /// A retransmission: same seq and payload, fresh timestamp, RETX set.
    pub fn retx(seq: u16, ts_ms: u32, payload: Bytes) -> Self {
        Self { channel: Channel::Reliable, flags: flags::RETX, seq, ts_ms, payload }
    }

    pub fn is_ack(&self) -> bool {
        self.flags & flags::ACK != 0
    }

    pub fn is_retx(&self) -> bool {
        self.flags & flags::RETX != 0
    }

    /// Packs the header big-endian and appends the payload.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_SIZE + self.payload.len());
        buf.put_u8(self.channel as u8);
        buf.put_u8(self.flags);
        buf.put_u16(self.seq);
        buf.put_u32(self.ts_ms);
        buf.put_slice(&self.payload);
        buf.freeze()
    }

    /// Decodes a datagram. Returns `None` for short buffers or an unknown
    /// channel byte; callers drop such datagrams silently.
    pub fn decode(mut data: Bytes) -> Option<Self> {
        if data.len() < HEADER_SIZE {
            return None;
        }
        let channel = Channel::from_u8(data.get_u8())?;
        let flags = data.get_u8();
        let seq = data.get_u16();
        let ts_ms = data.get_u32();
        Some(Self { channel, flags, seq, ts_ms, payload: data })
    }
}

/// Encodes an acknowledgement for `seq`: reliable channel, ACK flag, empty
/// payload.
pub fn make_ack(seq: u16, ts_ms: u32) -> Bytes {
    Packet {
        channel: Channel::Reliable,
        flags: flags::ACK,
        seq,
        ts_ms,
        payload: Bytes::new(),
    }
    .encode()
}
