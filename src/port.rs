//! Serial link abstraction.
//!
//! The acquisition code only needs a handful of port primitives, so it talks
//! to a [`SerialLink`] instead of a concrete port. [`SerialPortLink`] backs it
//! with the `serialport` crate; tests plug in a simulated sensor.

use std::io::{ErrorKind, Read, Write};
use std::time::Duration;

use log::debug;
use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};

use crate::errors::{DriverError, Result};

/// Default baud rate of TriOS sensors.
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Default read timeout; reads are only issued for bytes already waiting.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(10);

/// Port primitives used by the command layer.
///
/// Reads are non-blocking in practice: callers ask how many bytes are waiting
/// and then read at most that many.
pub trait SerialLink {
    /// Human readable name of the link, used in log and error messages.
    fn name(&self) -> &str;
    fn is_open(&self) -> bool;
    fn open(&mut self) -> Result<()>;
    fn close(&mut self);
    fn write(&mut self, bytes: &[u8]) -> Result<()>;
    /// Number of bytes received and not yet read.
    fn bytes_available(&mut self) -> Result<usize>;
    /// Read up to `n` bytes.
    fn read(&mut self, n: usize) -> Result<Vec<u8>>;
    /// Discard everything received and not yet read.
    fn flush_input(&mut self) -> Result<()>;
}

impl<L: SerialLink + ?Sized> SerialLink for Box<L> {
    fn name(&self) -> &str {
        (**self).name()
    }
    fn is_open(&self) -> bool {
        (**self).is_open()
    }
    fn open(&mut self) -> Result<()> {
        (**self).open()
    }
    fn close(&mut self) {
        (**self).close()
    }
    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        (**self).write(bytes)
    }
    fn bytes_available(&mut self) -> Result<usize> {
        (**self).bytes_available()
    }
    fn read(&mut self, n: usize) -> Result<Vec<u8>> {
        (**self).read(n)
    }
    fn flush_input(&mut self) -> Result<()> {
        (**self).flush_input()
    }
}

/// Line settings for a physical port.
#[derive(Debug, Clone, PartialEq)]
pub struct PortSettings {
    pub path: String,
    pub baud_rate: u32,
    pub parity: Parity,
    pub stop_bits: StopBits,
    pub data_bits: DataBits,
    pub flow_control: FlowControl,
    pub timeout: Duration,
}

impl PortSettings {
    /// 9600 baud, 8N1, no flow control.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            baud_rate: DEFAULT_BAUD_RATE,
            parity: Parity::None,
            stop_bits: StopBits::One,
            data_bits: DataBits::Eight,
            flow_control: FlowControl::None,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Parse a parity letter (`N`, `E` or `O`).
    pub fn parity_from_str(value: &str) -> anyhow::Result<Parity> {
        match value.trim().to_ascii_uppercase().as_str() {
            "N" | "NONE" => Ok(Parity::None),
            "E" | "EVEN" => Ok(Parity::Even),
            "O" | "ODD" => Ok(Parity::Odd),
            _ => anyhow::bail!("Invalid parity {value:?}. Supported: N, E, O."),
        }
    }

    pub fn stop_bits_from_u8(value: u8) -> anyhow::Result<StopBits> {
        match value {
            1 => Ok(StopBits::One),
            2 => Ok(StopBits::Two),
            _ => anyhow::bail!("Invalid stop bits {value}. Supported: 1, 2."),
        }
    }

    pub fn data_bits_from_u8(value: u8) -> anyhow::Result<DataBits> {
        match value {
            5 => Ok(DataBits::Five),
            6 => Ok(DataBits::Six),
            7 => Ok(DataBits::Seven),
            8 => Ok(DataBits::Eight),
            _ => anyhow::bail!("Invalid byte size {value}. Supported: 5, 6, 7, 8."),
        }
    }

    /// Software (XON/XOFF) flow control when `xonxoff` is set.
    pub fn with_xonxoff(mut self, xonxoff: bool) -> Self {
        self.flow_control = if xonxoff {
            FlowControl::Software
        } else {
            FlowControl::None
        };
        self
    }
}

/// A [`SerialLink`] on a real serial device.
pub struct SerialPortLink {
    settings: PortSettings,
    port: Option<Box<dyn SerialPort>>,
}

impl SerialPortLink {
    /// Create a closed link; [`SerialLink::open`] configures and opens it.
    pub fn new(settings: PortSettings) -> Self {
        Self {
            settings,
            port: None,
        }
    }

    pub fn settings(&self) -> &PortSettings {
        &self.settings
    }

    fn port(&mut self) -> Result<&mut Box<dyn SerialPort>> {
        self.port
            .as_mut()
            .ok_or_else(|| DriverError::NotReady(format!("{} is not open", self.settings.path)))
    }
}

impl SerialLink for SerialPortLink {
    fn name(&self) -> &str {
        &self.settings.path
    }

    fn is_open(&self) -> bool {
        self.port.is_some()
    }

    fn open(&mut self) -> Result<()> {
        if self.port.is_some() {
            return Ok(());
        }
        let s = &self.settings;
        let port = serialport::new(s.path.as_str(), s.baud_rate)
            .parity(s.parity)
            .stop_bits(s.stop_bits)
            .data_bits(s.data_bits)
            .flow_control(s.flow_control)
            .timeout(s.timeout)
            .open()?;
        debug!(
            "Opened {} at {} baud ({:?}, {:?}, {:?})",
            s.path, s.baud_rate, s.data_bits, s.parity, s.stop_bits
        );
        self.port = Some(port);
        Ok(())
    }

    fn close(&mut self) {
        if self.port.take().is_some() {
            debug!("Closed {}", self.settings.path);
        }
    }

    fn write(&mut self, bytes: &[u8]) -> Result<()> {
        let port = self.port()?;
        port.write_all(bytes)?;
        port.flush()?;
        Ok(())
    }

    fn bytes_available(&mut self) -> Result<usize> {
        Ok(self.port()?.bytes_to_read()? as usize)
    }

    fn read(&mut self, n: usize) -> Result<Vec<u8>> {
        let port = self.port()?;
        let mut buf = vec![0u8; n];
        match port.read(&mut buf) {
            Ok(read) => {
                buf.truncate(read);
                Ok(buf)
            }
            Err(e) if e.kind() == ErrorKind::TimedOut || e.kind() == ErrorKind::WouldBlock => {
                Ok(Vec::new())
            }
            Err(e) => Err(e.into()),
        }
    }

    fn flush_input(&mut self) -> Result<()> {
        self.port()?.clear(ClearBuffer::Input)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_9600_8n1() {
        let s = PortSettings::new("/dev/ttyO1");
        assert_eq!(s.baud_rate, 9600);
        assert_eq!(s.parity, Parity::None);
        assert_eq!(s.stop_bits, StopBits::One);
        assert_eq!(s.data_bits, DataBits::Eight);
        assert_eq!(s.flow_control, FlowControl::None);
        assert_eq!(s.with_xonxoff(true).flow_control, FlowControl::Software);
    }

    #[test]
    fn parses_line_options() {
        assert_eq!(PortSettings::parity_from_str("n").unwrap(), Parity::None);
        assert_eq!(PortSettings::parity_from_str("E").unwrap(), Parity::Even);
        assert!(PortSettings::parity_from_str("M").is_err());
        assert_eq!(PortSettings::stop_bits_from_u8(2).unwrap(), StopBits::Two);
        assert!(PortSettings::data_bits_from_u8(9).is_err());
    }

    #[test]
    fn closed_link_is_not_ready() {
        let mut link = SerialPortLink::new(PortSettings::new("/dev/null-trios"));
        assert!(!link.is_open());
        assert!(matches!(link.write(&[0x23]), Err(DriverError::NotReady(_))));
        assert!(matches!(link.bytes_available(), Err(DriverError::NotReady(_))));
        link.close();
    }
}
