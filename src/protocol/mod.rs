//! Wire format and sequence arithmetic shared by both ends of the transport.

pub mod packet;
pub mod seq;

pub use packet::{flags, make_ack, Channel, Packet, HEADER_SIZE};
pub use seq::{seq_in_window, seq_lt};
