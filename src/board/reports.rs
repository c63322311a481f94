use num_derive::FromPrimitive;
use num_traits::FromPrimitive;

const SYS_BATTERY: u8 = 0x04;

fn f32_at(payload: &[u8], offset: usize) -> f32 {
    f32::from_le_bytes([
        payload[offset],
        payload[offset + 1],
        payload[offset + 2],
        payload[offset + 3],
    ])
}

fn i16_at(payload: &[u8], offset: usize) -> i16 {
    i16::from_le_bytes([payload[offset], payload[offset + 1]])
}

/// Battery voltage in millivolts from a system report.
pub fn parse_battery(payload: &[u8]) -> Option<u16> {
    match payload {
        [SYS_BATTERY, lo, hi, ..] => Some(u16::from_le_bytes([*lo, *hi])),
        _ => None,
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, FromPrimitive)]
#[repr(u8)]
pub enum KeyEvent {
    Pressed = 0x01,
    LongPress = 0x02,
    LongPressRepeat = 0x04,
    ReleasedFromLongPress = 0x08,
    Clicked = 0x10,
    DoubleClicked = 0x20,
    TripleClicked = 0x40,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct KeyReport {
    pub key_id: u8,
    pub event: KeyEvent,
}

impl KeyReport {
    pub fn from_payload(payload: &[u8]) -> Option<Self> {
        match payload {
            [key_id, event, ..] => Some(Self {
                key_id: *key_id,
                event: KeyEvent::from_u8(*event)?,
            }),
            _ => None,
        }
    }
}

/// Accelerometer (m/s^2) and gyroscope (rad/s) readings.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ImuSample {
    pub accel: [f32; 3],
    pub gyro: [f32; 3],
}

impl ImuSample {
    const SIZE: usize = 24;

    pub fn from_payload(payload: &[u8]) -> Option<Self> {
        if payload.len() < Self::SIZE {
            return None;
        }

        Some(Self {
            accel: [f32_at(payload, 0), f32_at(payload, 4), f32_at(payload, 8)],
            gyro: [
                f32_at(payload, 12),
                f32_at(payload, 16),
                f32_at(payload, 20),
            ],
        })
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GamepadState {
    /// One bit per button.
    pub buttons: u16,
    /// Direction pad, 0 when released.
    pub hat: u8,
    pub lx: i8,
    pub ly: i8,
    pub rx: i8,
    pub ry: i8,
}

impl GamepadState {
    const SIZE: usize = 7;

    pub fn from_payload(payload: &[u8]) -> Option<Self> {
        if payload.len() < Self::SIZE {
            return None;
        }

        Some(Self {
            buttons: u16::from_le_bytes([payload[0], payload[1]]),
            hat: payload[2],
            lx: payload[3] as i8,
            ly: payload[4] as i8,
            rx: payload[5] as i8,
            ry: payload[6] as i8,
        })
    }

    pub fn is_pressed(&self, button: u8) -> bool {
        button < 16 && self.buttons & (1 << button) != 0
    }

    /// Stick axis scaled to -1.0..=1.0.
    pub fn axis(value: i8) -> f32 {
        (value as f32 / 127.0).clamp(-1.0, 1.0)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SbusFrame {
    pub channels: [i16; 16],
    pub ch17: bool,
    pub ch18: bool,
    pub signal_loss: bool,
    pub fail_safe: bool,
}

impl SbusFrame {
    const SIZE: usize = 36;

    pub fn from_payload(payload: &[u8]) -> Option<Self> {
        if payload.len() < Self::SIZE {
            return None;
        }

        let mut channels = [0i16; 16];
        for (i, channel) in channels.iter_mut().enumerate() {
            *channel = i16_at(payload, i * 2);
        }

        Some(Self {
            channels,
            ch17: payload[32] != 0,
            ch18: payload[33] != 0,
            signal_loss: payload[34] != 0,
            fail_safe: payload[35] != 0,
        })
    }

    /// Whether the receiver has a live link to the transmitter.
    pub fn is_valid(&self) -> bool {
        !self.signal_loss && !self.fail_safe
    }
}
