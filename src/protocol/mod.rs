mod codec;
mod receiver;

use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::FromPrimitive;
use std::fmt::Display;
use thiserror::Error;

pub use codec::{checksum, decode, encode, HEADER, MAX_PAYLOAD};
pub use receiver::{FrameReceiver, Frames};

/// Peripheral addressed by a frame. Requests and reports share the same code.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, FromPrimitive, ToPrimitive)]
#[repr(u8)]
pub enum FunctionCode {
    Sys = 0,
    Led = 1,
    Buzzer = 2,
    Motor = 3,
    PwmServo = 4,
    BusServo = 5,
    Key = 6,
    Imu = 7,
    Gamepad = 8,
    Sbus = 9,
    Oled = 10,
    Rgb = 11,
}

impl FunctionCode {
    pub const COUNT: usize = 12;

    pub const ALL: [FunctionCode; Self::COUNT] = [
        FunctionCode::Sys,
        FunctionCode::Led,
        FunctionCode::Buzzer,
        FunctionCode::Motor,
        FunctionCode::PwmServo,
        FunctionCode::BusServo,
        FunctionCode::Key,
        FunctionCode::Imu,
        FunctionCode::Gamepad,
        FunctionCode::Sbus,
        FunctionCode::Oled,
        FunctionCode::Rgb,
    ];
}

impl Display for FunctionCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}({})", self, *self as u8)
    }
}

impl From<FunctionCode> for u8 {
    fn from(code: FunctionCode) -> u8 {
        code as u8
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("payload of {0} bytes does not fit the length field")]
    PayloadTooLarge(usize),
    #[error("missing 0xAA 0x55 frame header")]
    BadHeader,
    #[error("frame truncated or padded: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },
    #[error("checksum mismatch: expected {expected:#04x}, got {actual:#04x}")]
    ChecksumMismatch { expected: u8, actual: u8 },
}

/// One validated frame. The function code is kept raw so that codes unknown
/// to this crate still round-trip through the codec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub function: u8,
    pub payload: Vec<u8>,
}

impl Frame {
    pub fn new(function: impl Into<u8>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            function: function.into(),
            payload: payload.into(),
        }
    }

    pub fn function_code(&self) -> Option<FunctionCode> {
        FunctionCode::from_u8(self.function)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, ProtocolError> {
        encode(self.function, &self.payload)
    }
}
