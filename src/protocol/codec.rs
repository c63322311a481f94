use super::{Frame, ProtocolError};
use crc::{Crc, CRC_8_MAXIM_DOW};

pub const HEADER: [u8; 2] = [0xAA, 0x55];
pub const MAX_PAYLOAD: usize = u8::MAX as usize;

// Header, function, length and checksum bytes.
const OVERHEAD: usize = 5;

// Same reflected 0x31 table the board firmware uses (0, 94, 188, 226, ...).
const CRC8: Crc<u8> = Crc::<u8>::new(&CRC_8_MAXIM_DOW);

/// CRC8 over `[function, length, payload...]`.
pub fn checksum(function: u8, payload: &[u8]) -> u8 {
    let mut digest = CRC8.digest();
    digest.update(&[function, payload.len() as u8]);
    digest.update(payload);
    digest.finalize()
}

pub fn encode(function: impl Into<u8>, payload: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    if payload.len() > MAX_PAYLOAD {
        return Err(ProtocolError::PayloadTooLarge(payload.len()));
    }

    let function = function.into();
    let mut buffer = Vec::with_capacity(OVERHEAD + payload.len());
    buffer.extend_from_slice(&HEADER);
    buffer.push(function);
    buffer.push(payload.len() as u8);
    buffer.extend_from_slice(payload);
    buffer.push(checksum(function, payload));
    Ok(buffer)
}

/// Validates a buffer holding exactly one frame, header through checksum.
pub fn decode(buffer: &[u8]) -> Result<Frame, ProtocolError> {
    if buffer.len() < OVERHEAD {
        return Err(ProtocolError::Truncated {
            expected: OVERHEAD,
            actual: buffer.len(),
        });
    }

    if buffer[0..2] != HEADER {
        return Err(ProtocolError::BadHeader);
    }

    let function = buffer[2];
    let length = buffer[3] as usize;
    if buffer.len() != OVERHEAD + length {
        return Err(ProtocolError::Truncated {
            expected: OVERHEAD + length,
            actual: buffer.len(),
        });
    }

    let payload = &buffer[4..4 + length];
    let expected = checksum(function, payload);
    let actual = buffer[4 + length];
    if expected != actual {
        return Err(ProtocolError::ChecksumMismatch { expected, actual });
    }

    Ok(Frame::new(function, payload))
}
