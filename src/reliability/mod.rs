//! Selective Repeat ARQ state machines: the sender's in-flight window and
//! the receiver's reorder/gap-skip window.

pub mod receive_window;
pub mod send_window;

pub use receive_window::{Accept, ReceiveWindow, Released, Skip};
pub use send_window::{InFlight, SendWindow};
