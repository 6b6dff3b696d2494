use std::{io::Write, time::Duration};

use crate::UploadError;

/// Fallback serial device used when neither the command line nor the
/// environment names one.
pub const DEFAULT_PORT: &str = "/dev/ttyUSB0";
pub const DEFAULT_BAUD_RATE: u32 = 9600;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);
/// Opening the port toggles DTR, which resets the board. The loader needs
/// roughly this long before it listens again.
pub const DEFAULT_RESET_DELAY: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    pub port: String,
    pub baud_rate: u32,
    pub timeout: Duration,
    pub reset_delay: Duration,
}

impl TransportConfig {
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            ..Self::default()
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT.to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
            timeout: DEFAULT_TIMEOUT,
            reset_delay: DEFAULT_RESET_DELAY,
        }
    }
}

/// A point to point byte channel to the device.
pub trait Transport {
    /// Writes exactly one byte.
    fn send_byte(&mut self, byte: u8) -> Result<(), UploadError>;

    /// Releases the underlying connection.
    fn close(&mut self) -> Result<(), UploadError>;

    /// Sends a single character. Anything other than exactly one byte is a
    /// usage error and nothing is written.
    fn transmit(&mut self, character: &[u8]) -> Result<(), UploadError> {
        match character {
            [byte] => self.send_byte(*byte),
            _ => Err(UploadError::ProtocolUsage(character.len())),
        }
    }
}

impl<T: Transport + ?Sized> Transport for &mut T {
    fn send_byte(&mut self, byte: u8) -> Result<(), UploadError> {
        (**self).send_byte(byte)
    }

    fn close(&mut self) -> Result<(), UploadError> {
        (**self).close()
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn send_byte(&mut self, byte: u8) -> Result<(), UploadError> {
        (**self).send_byte(byte)
    }

    fn close(&mut self) -> Result<(), UploadError> {
        (**self).close()
    }
}

/// Writes the wire stream to any `io::Write` instead of a device. The result
/// can be replayed through a terminal program when the serial link is not
/// usable directly.
#[derive(Debug)]
pub struct TraceTransport<W: Write> {
    inner: W,
    closed: bool,
}

impl<W: Write> TraceTransport<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            closed: false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn get_ref(&self) -> &W {
        &self.inner
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Transport for TraceTransport<W> {
    fn send_byte(&mut self, byte: u8) -> Result<(), UploadError> {
        self.inner
            .write_all(&[byte])
            .map_err(UploadError::ConnectionLost)
    }

    fn close(&mut self) -> Result<(), UploadError> {
        self.closed = true;
        self.inner.flush().map_err(UploadError::ConnectionLost)
    }
}

#[cfg(feature = "serial")]
pub use serial::SerialTransport;

#[cfg(feature = "serial")]
mod serial {
    use std::{io::Write, thread};

    use log::{debug, info};
    use serialport::SerialPort;

    use super::{Transport, TransportConfig};
    use crate::UploadError;

    pub struct SerialTransport {
        port: Option<Box<dyn SerialPort>>,
        name: String,
    }

    impl SerialTransport {
        /// Opens the port and waits for the board to come back from the reset
        /// that opening the port triggers.
        pub fn open(config: &TransportConfig) -> Result<Self, UploadError> {
            let port = serialport::new(&config.port, config.baud_rate)
                .timeout(config.timeout)
                .flow_control(serialport::FlowControl::None)
                .open()
                .map_err(|err| UploadError::Connection {
                    port: config.port.clone(),
                    source: err.into(),
                })?;

            info!("Opened {} at {} baud", config.port, config.baud_rate);

            if !config.reset_delay.is_zero() {
                debug!("Waiting {:?} for the device to reset", config.reset_delay);
                thread::sleep(config.reset_delay);
            }

            Ok(Self {
                port: Some(port),
                name: config.port.clone(),
            })
        }

        pub fn name(&self) -> &str {
            &self.name
        }
    }

    impl Transport for SerialTransport {
        fn send_byte(&mut self, byte: u8) -> Result<(), UploadError> {
            let port = self.port.as_mut().ok_or_else(|| {
                UploadError::ConnectionLost(std::io::Error::new(
                    std::io::ErrorKind::NotConnected,
                    "serial port already closed",
                ))
            })?;
            port.write_all(&[byte]).map_err(UploadError::ConnectionLost)
        }

        fn close(&mut self) -> Result<(), UploadError> {
            if let Some(mut port) = self.port.take() {
                port.flush().map_err(UploadError::ConnectionLost)?;
                debug!("Closed {}", self.name);
            }
            Ok(())
        }
    }
}
