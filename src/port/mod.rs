#[cfg(target_os = "linux")]
mod linux;

#[cfg(target_os = "linux")]
use linux::is_port_open;

pub use serialport::SerialPort;

use anyhow::Result;
use core::time::Duration;
use log::{debug, warn};
use serialport::{self, SerialPortType};
use thiserror::Error;

pub const DEFAULT_PORT: &str = "/dev/ttyAMA0";
pub const DEFAULT_BAUDRATE: u32 = 1_000_000;

#[derive(Error, Debug)]
pub enum OpenPortError {
    #[error("no controller board ports found")]
    NoCompatiblePort,
    #[error("{port_name:?} busy")]
    PortBusy { port_name: String },
}

/// Serial link settings. `port_name` may be `auto` to probe USB bridges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortConfig {
    pub port_name: String,
    pub baudrate: u32,
    /// Skip the check for another process holding the device.
    pub force: bool,
    /// Read timeout of the receive thread, bounds its shutdown latency.
    pub read_timeout: Duration,
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            port_name: DEFAULT_PORT.to_string(),
            baudrate: DEFAULT_BAUDRATE,
            force: false,
            read_timeout: Duration::from_millis(10),
        }
    }
}

impl PortConfig {
    pub fn new(port_name: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            ..Self::default()
        }
    }
}

#[derive(PartialEq)]
struct UsbId(u16, u16);

static COMPATIBLE_IDS: &[UsbId] = &[
    UsbId(0x1a86, 0x7523), // QinHeng Electronics HL-340 USB-Serial adapter
    UsbId(0x1a86, 0x55d4), // QinHeng Electronics CH9102 USB-Serial adapter
    UsbId(0x0483, 0x5740), // STMicroelectronics Virtual COM Port
];

pub fn open_port(config: &PortConfig) -> Result<Box<dyn SerialPort>> {
    let true_name: String = if config.port_name == "auto" {
        guess_port()?
    } else {
        config.port_name.clone()
    };

    if !config.force && is_port_open(&true_name) {
        return Err(OpenPortError::PortBusy {
            port_name: true_name,
        }
        .into());
    }

    let mut port = serialport::new(&true_name, config.baudrate)
        .timeout(config.read_timeout)
        .open()?;

    // The board expects both control lines deasserted.
    if let Err(e) = port
        .write_request_to_send(false)
        .and_then(|_| port.write_data_terminal_ready(false))
    {
        warn!("{}: cannot clear RTS/DTR: {}", &true_name, e);
    }

    debug!("open_port OK: {} @ {} baud", &true_name, config.baudrate);
    Ok(port)
}

fn guess_port() -> Result<String> {
    serialport::available_ports()?
        .into_iter()
        .filter(|info| match &info.port_type {
            SerialPortType::UsbPort(usb_info) => {
                COMPATIBLE_IDS.contains(&UsbId(usb_info.vid, usb_info.pid))
                    && !is_port_open(&info.port_name)
            }
            SerialPortType::Unknown
            | SerialPortType::PciPort
            | SerialPortType::BluetoothPort => false,
        })
        .map(|info| info.port_name)
        .next()
        .ok_or_else(|| OpenPortError::NoCompatiblePort.into())
}

#[cfg(not(target_os = "linux"))]
fn is_port_open(_port_name: &str) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_board() {
        let config = PortConfig::default();
        assert_eq!(config.port_name, "/dev/ttyAMA0");
        assert_eq!(config.baudrate, 1_000_000);
        assert!(!config.force);
    }

    #[test]
    fn missing_device_fails() {
        let config = PortConfig {
            force: true,
            ..PortConfig::new("/dev/rrc-lib-no-such-device")
        };
        assert!(open_port(&config).is_err());
    }
}
