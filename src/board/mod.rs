//! Typed commands for the controller board.
//!
//! Setters are fire-and-forget. Servo reads go through
//! [`CommandController::call_matching`] and only accept a reply that echoes
//! the requested servo id and sub-command. Sensor getters return the freshest
//! unsolicited report, or `None` when nothing new arrived since the last
//! read.

mod reports;

pub use reports::{parse_battery, GamepadState, ImuSample, KeyEvent, KeyReport, SbusFrame};

use log::debug;
use std::sync::Arc;
use std::time::Duration;

use crate::controller::{CallPolicy, CommandController};
use crate::port::PortConfig;
use crate::protocol::{FunctionCode, MAX_PAYLOAD};
use crate::transport::Transport;
use crate::{Error, Result};

/// Servo id every bus servo answers to.
pub const BROADCAST_ID: u8 = 254;

const SET_POSITION: u8 = 0x01;
const BUS_SERVO_STOP: u8 = 0x03;
const PWM_READ_POSITION: u8 = 0x05;
const PWM_SET_OFFSET: u8 = 0x07;
const PWM_READ_OFFSET: u8 = 0x09;
const MOTOR_SPEED: u8 = 0x01;
const MOTOR_DUTY: u8 = 0x05;
const RGB_SET: u8 = 0x01;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
enum BusServoCmd {
    ReadPosition = 0x05,
    ReadVin = 0x07,
    ReadTemp = 0x09,
    TorqueOn = 0x0B,
    TorqueOff = 0x0C,
    ReadTorque = 0x0D,
    SetId = 0x10,
    ReadId = 0x12,
    SetOffset = 0x20,
    ReadOffset = 0x22,
    SaveOffset = 0x24,
    SetAngleLimit = 0x30,
    ReadAngleLimit = 0x32,
    SetVinLimit = 0x34,
    ReadVinLimit = 0x36,
    SetTempLimit = 0x38,
    ReadTempLimit = 0x3A,
}

fn millis(duration: Duration) -> u16 {
    duration.as_millis().min(u16::MAX as u128) as u16
}

fn count(len: usize, what: &str) -> Result<u8> {
    u8::try_from(len)
        .map_err(|_| Error::InvalidArgument(format!("{} {} in one command", len, what)))
}

fn u16_le(value: &[u8]) -> Option<u16> {
    match value {
        [lo, hi, ..] => Some(u16::from_le_bytes([*lo, *hi])),
        _ => None,
    }
}

fn limits(value: &[u8]) -> Option<(u16, u16)> {
    Some((u16_le(value)?, u16_le(value.get(2..)?)?))
}

pub struct Board {
    controller: CommandController,
}

impl Board {
    pub fn open(config: &PortConfig, policy: CallPolicy) -> Result<Self> {
        let transport = Transport::open(config)?;
        Ok(Self::new(CommandController::new(Arc::new(transport), policy)))
    }

    pub fn new(controller: CommandController) -> Self {
        Self { controller }
    }

    pub fn controller(&self) -> &CommandController {
        &self.controller
    }

    pub fn set_reception(&self, enable: bool) {
        self.controller.transport().set_reception(enable);
    }

    pub fn set_led(&self, led_id: u8, on: Duration, off: Duration, repeat: u16) -> Result<()> {
        let mut payload = vec![led_id];
        payload.extend_from_slice(&millis(on).to_le_bytes());
        payload.extend_from_slice(&millis(off).to_le_bytes());
        payload.extend_from_slice(&repeat.to_le_bytes());
        self.controller.send(FunctionCode::Led, &payload)
    }

    pub fn set_buzzer(&self, freq: u16, on: Duration, off: Duration, repeat: u16) -> Result<()> {
        let mut payload = freq.to_le_bytes().to_vec();
        payload.extend_from_slice(&millis(on).to_le_bytes());
        payload.extend_from_slice(&millis(off).to_le_bytes());
        payload.extend_from_slice(&repeat.to_le_bytes());
        self.controller.send(FunctionCode::Buzzer, &payload)
    }

    /// Sets motor speeds in revolutions per second. Motor ids start at 1.
    pub fn set_motor_speed(&self, speeds: &[(u8, f32)]) -> Result<()> {
        self.motor_command(MOTOR_SPEED, speeds)
    }

    /// Sets raw motor duty cycles (-100.0..=100.0). Motor ids start at 1.
    pub fn set_motor_duty(&self, duties: &[(u8, f32)]) -> Result<()> {
        self.motor_command(MOTOR_DUTY, duties)
    }

    fn motor_command(&self, sub: u8, values: &[(u8, f32)]) -> Result<()> {
        let mut payload = vec![sub, count(values.len(), "motors")?];
        for &(id, value) in values {
            payload.push(id.wrapping_sub(1));
            payload.extend_from_slice(&value.to_le_bytes());
        }
        self.controller.send(FunctionCode::Motor, &payload)
    }

    /// `text` may hold at most 253 bytes of UTF-8.
    pub fn set_oled_text(&self, line: u8, text: &str) -> Result<()> {
        if text.len() > MAX_PAYLOAD - 2 {
            return Err(Error::InvalidArgument(format!(
                "{} bytes of text on one OLED line",
                text.len()
            )));
        }

        let mut payload = vec![line, text.len() as u8];
        payload.extend_from_slice(text.as_bytes());
        self.controller.send(FunctionCode::Oled, &payload)
    }

    /// Sets RGB pixels given as `(id, [r, g, b])`. Pixel ids start at 1.
    pub fn set_rgb(&self, pixels: &[(u8, [u8; 3])]) -> Result<()> {
        let mut payload = vec![RGB_SET, count(pixels.len(), "pixels")?];
        for &(id, rgb) in pixels {
            payload.push(id.wrapping_sub(1));
            payload.extend_from_slice(&rgb);
        }
        self.controller.send(FunctionCode::Rgb, &payload)
    }

    /// Moves PWM servos to pulse widths in microseconds (500-2500).
    pub fn pwm_servo_set_position(
        &self,
        duration: Duration,
        positions: &[(u8, u16)],
    ) -> Result<()> {
        let payload = position_payload(duration, positions)?;
        self.controller.send(FunctionCode::PwmServo, &payload)
    }

    pub fn pwm_servo_set_offset(&self, servo_id: u8, offset: i8) -> Result<()> {
        self.controller.send(
            FunctionCode::PwmServo,
            &[PWM_SET_OFFSET, servo_id, offset as u8],
        )
    }

    pub fn pwm_servo_read_position(&self, servo_id: u8) -> Result<Option<u16>> {
        Ok(self
            .pwm_servo_read(servo_id, PWM_READ_POSITION)?
            .as_deref()
            .and_then(u16_le))
    }

    pub fn pwm_servo_read_offset(&self, servo_id: u8) -> Result<Option<i8>> {
        Ok(self
            .pwm_servo_read(servo_id, PWM_READ_OFFSET)?
            .and_then(|value| value.first().map(|&b| b as i8)))
    }

    // Reply layout: sub-command, servo id, value.
    fn pwm_servo_read(&self, servo_id: u8, sub: u8) -> Result<Option<Vec<u8>>> {
        let reply = self
            .controller
            .call_matching(FunctionCode::PwmServo, &[sub, servo_id], |p| {
                p.len() > 2 && p[0] == sub && p[1] == servo_id
            })?;
        Ok(reply.map(|mut p| p.split_off(2)))
    }

    /// Moves bus servos to positions given in servo units.
    pub fn bus_servo_set_position(
        &self,
        duration: Duration,
        positions: &[(u8, u16)],
    ) -> Result<()> {
        let payload = position_payload(duration, positions)?;
        self.controller.send(FunctionCode::BusServo, &payload)
    }

    pub fn bus_servo_stop(&self, servo_ids: &[u8]) -> Result<()> {
        let mut payload = vec![BUS_SERVO_STOP, count(servo_ids.len(), "servos")?];
        payload.extend_from_slice(servo_ids);
        self.controller.send(FunctionCode::BusServo, &payload)
    }

    pub fn bus_servo_enable_torque(&self, servo_id: u8, enable: bool) -> Result<()> {
        let cmd = if enable {
            BusServoCmd::TorqueOn
        } else {
            BusServoCmd::TorqueOff
        };
        self.bus_servo_send(cmd, servo_id, &[])
    }

    pub fn bus_servo_set_id(&self, servo_id: u8, new_id: u8) -> Result<()> {
        self.bus_servo_send(BusServoCmd::SetId, servo_id, &[new_id])
    }

    pub fn bus_servo_set_offset(&self, servo_id: u8, offset: i8) -> Result<()> {
        self.bus_servo_send(BusServoCmd::SetOffset, servo_id, &[offset as u8])
    }

    pub fn bus_servo_save_offset(&self, servo_id: u8) -> Result<()> {
        self.bus_servo_send(BusServoCmd::SaveOffset, servo_id, &[])
    }

    pub fn bus_servo_set_angle_limit(&self, servo_id: u8, limit: (u16, u16)) -> Result<()> {
        self.bus_servo_send(
            BusServoCmd::SetAngleLimit,
            servo_id,
            &[limit.0.to_le_bytes(), limit.1.to_le_bytes()].concat(),
        )
    }

    /// Input voltage limits in millivolts.
    pub fn bus_servo_set_vin_limit(&self, servo_id: u8, limit: (u16, u16)) -> Result<()> {
        self.bus_servo_send(
            BusServoCmd::SetVinLimit,
            servo_id,
            &[limit.0.to_le_bytes(), limit.1.to_le_bytes()].concat(),
        )
    }

    pub fn bus_servo_set_temp_limit(&self, servo_id: u8, limit: i8) -> Result<()> {
        self.bus_servo_send(BusServoCmd::SetTempLimit, servo_id, &[limit as u8])
    }

    /// Reads the id of a servo. Use [`BROADCAST_ID`] when only one servo is
    /// attached and its id is unknown.
    pub fn bus_servo_read_id(&self, servo_id: u8) -> Result<Option<u8>> {
        Ok(self
            .bus_servo_read(BusServoCmd::ReadId, servo_id)?
            .and_then(|value| value.first().copied()))
    }

    pub fn bus_servo_read_offset(&self, servo_id: u8) -> Result<Option<i8>> {
        Ok(self
            .bus_servo_read(BusServoCmd::ReadOffset, servo_id)?
            .and_then(|value| value.first().map(|&b| b as i8)))
    }

    pub fn bus_servo_read_position(&self, servo_id: u8) -> Result<Option<i16>> {
        Ok(self
            .bus_servo_read(BusServoCmd::ReadPosition, servo_id)?
            .as_deref()
            .and_then(u16_le)
            .map(|v| v as i16))
    }

    /// Input voltage in millivolts.
    pub fn bus_servo_read_vin(&self, servo_id: u8) -> Result<Option<u16>> {
        Ok(self
            .bus_servo_read(BusServoCmd::ReadVin, servo_id)?
            .as_deref()
            .and_then(u16_le))
    }

    /// Temperature in degrees Celsius.
    pub fn bus_servo_read_temp(&self, servo_id: u8) -> Result<Option<u8>> {
        Ok(self
            .bus_servo_read(BusServoCmd::ReadTemp, servo_id)?
            .and_then(|value| value.first().copied()))
    }

    pub fn bus_servo_read_temp_limit(&self, servo_id: u8) -> Result<Option<u8>> {
        Ok(self
            .bus_servo_read(BusServoCmd::ReadTempLimit, servo_id)?
            .and_then(|value| value.first().copied()))
    }

    pub fn bus_servo_read_angle_limit(&self, servo_id: u8) -> Result<Option<(u16, u16)>> {
        Ok(self
            .bus_servo_read(BusServoCmd::ReadAngleLimit, servo_id)?
            .as_deref()
            .and_then(limits))
    }

    pub fn bus_servo_read_vin_limit(&self, servo_id: u8) -> Result<Option<(u16, u16)>> {
        Ok(self
            .bus_servo_read(BusServoCmd::ReadVinLimit, servo_id)?
            .as_deref()
            .and_then(limits))
    }

    pub fn bus_servo_read_torque_state(&self, servo_id: u8) -> Result<Option<bool>> {
        Ok(self
            .bus_servo_read(BusServoCmd::ReadTorque, servo_id)?
            .and_then(|value| value.first().map(|&b| b != 0)))
    }

    fn bus_servo_send(&self, cmd: BusServoCmd, servo_id: u8, args: &[u8]) -> Result<()> {
        let mut payload = vec![cmd as u8, servo_id];
        payload.extend_from_slice(args);
        self.controller.send(FunctionCode::BusServo, &payload)
    }

    // Reply layout: servo id, sub-command, status, value.
    fn bus_servo_read(&self, cmd: BusServoCmd, servo_id: u8) -> Result<Option<Vec<u8>>> {
        let cmd = cmd as u8;
        let reply = self
            .controller
            .call_matching(FunctionCode::BusServo, &[cmd, servo_id], |p| {
                p.len() > 2 && p[1] == cmd && (servo_id == BROADCAST_ID || p[0] == servo_id)
            })?;

        Ok(reply.and_then(|mut p| {
            let status = p[2] as i8;
            if status != 0 {
                debug!("bus servo {} cmd {:#04x}: status {}", servo_id, cmd, status);
                return None;
            }
            Some(p.split_off(3))
        }))
    }

    /// Battery voltage in millivolts, when a new report arrived.
    pub fn battery(&self) -> Option<u16> {
        self.controller
            .latest(FunctionCode::Sys)
            .as_deref()
            .and_then(parse_battery)
    }

    pub fn key_event(&self) -> Option<KeyReport> {
        self.controller
            .latest(FunctionCode::Key)
            .as_deref()
            .and_then(KeyReport::from_payload)
    }

    pub fn imu(&self) -> Option<ImuSample> {
        self.controller
            .latest(FunctionCode::Imu)
            .as_deref()
            .and_then(ImuSample::from_payload)
    }

    /// Blocks until the next IMU report or `timeout`.
    pub fn wait_imu(&self, timeout: Duration) -> Option<ImuSample> {
        self.controller
            .wait_report(FunctionCode::Imu, timeout)
            .as_deref()
            .and_then(ImuSample::from_payload)
    }

    pub fn gamepad(&self) -> Option<GamepadState> {
        self.controller
            .latest(FunctionCode::Gamepad)
            .as_deref()
            .and_then(GamepadState::from_payload)
    }

    pub fn sbus(&self) -> Option<SbusFrame> {
        self.controller
            .latest(FunctionCode::Sbus)
            .as_deref()
            .and_then(SbusFrame::from_payload)
    }
}

fn position_payload(duration: Duration, positions: &[(u8, u16)]) -> Result<Vec<u8>> {
    let mut payload = vec![SET_POSITION];
    payload.extend_from_slice(&millis(duration).to_le_bytes());
    payload.push(count(positions.len(), "servos")?);
    for &(id, position) in positions {
        payload.push(id);
        payload.extend_from_slice(&position.to_le_bytes());
    }
    Ok(payload)
}
