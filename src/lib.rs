//! Host-side driver for the robot controller board.
//!
//! The board speaks a fixed packet protocol over a serial link:
//!
//! ```plain
//! +------+------+----------+--------+-------------+-------+
//! | 0xAA | 0x55 | function | length | payload ... | crc8  |
//! +------+------+----------+--------+-------------+-------+
//! ```
//!
//! The layers, bottom up: [`protocol`] encodes and parses frames,
//! [`mailbox`] keeps the freshest payload per function code,
//! [`transport`] owns the serial device and its receive thread,
//! [`controller`] turns all of this into blocking request/response calls and
//! [`board`] exposes the board's command set with typed arguments.

pub mod board;
pub mod controller;
mod error;
pub mod mailbox;
pub mod port;
pub mod protocol;
pub mod transport;

pub use board::Board;
pub use controller::{CallPolicy, CommandController};
pub use error::{Error, Result};
pub use port::PortConfig;
pub use protocol::{Frame, FunctionCode, ProtocolError};
pub use transport::{Transport, TransportError};
