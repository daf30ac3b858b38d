//! TCP over the module's own IP stack.
//!
//! The module is run with a single multiplexed connection, id `0`, and with
//! manual receive (`AT+CIPRXGET=1`), so payload only ever arrives in answer
//! to an explicit read request.

pub mod tcp;

pub use tcp::{SendStatus, State as TcpState, TcpSocket};

/// Largest payload requested per `AT+CIPRXGET=2` read.
pub const RX_CHUNK: usize = 128;
