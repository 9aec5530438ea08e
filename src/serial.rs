//! `Transport` adapter over the `serialport` crate.

use crate::base::{Error, Result, Transport};
use log::{debug, info};
use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::{self, Read, Write};
use std::time::{Duration, Instant};

const SERIAL_OPEN_TIMEOUT: Duration = Duration::from_millis(10);

/// Serial line to the sensor (8N1, no flow control).
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
    timeout: Duration,
}

impl SerialTransport {
    /// Wraps an already opened port.
    pub fn new(port: Box<dyn SerialPort>) -> SerialTransport {
        let timeout = port.timeout();
        SerialTransport { port, timeout }
    }

    pub fn name(&self) -> Option<String> {
        self.port.name()
    }

    pub fn baud_rate(&self) -> Option<u32> {
        self.port.baud_rate().ok()
    }
}

impl std::fmt::Debug for SerialTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialTransport")
            .field("name", &self.port.name())
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Opens `path` at `baud_rate`.
pub fn open(path: &str, baud_rate: u32) -> Result<SerialTransport> {
    let started = Instant::now();
    let port = serialport::new(path, baud_rate)
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .flow_control(FlowControl::None)
        .timeout(SERIAL_OPEN_TIMEOUT)
        .open()
        .map_err(|e| Error::ConnectionError {
            operation: "open_serial",
            elapsed: started.elapsed(),
            description: format!("failed to open {} at {} baud: {}", path, baud_rate, e),
        })?;
    info!("Opened serial port: {} at {} baud", path, baud_rate);
    Ok(SerialTransport::new(port))
}

impl Transport for SerialTransport {
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize> {
        // serialport rejects a zero timeout on some platforms
        let timeout = timeout.max(Duration::from_millis(1));
        if timeout != self.timeout {
            self.port.set_timeout(timeout)?;
            self.timeout = timeout;
        }
        match Read::read(&mut *self.port, buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(e),
        }
    }

    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        Write::write_all(&mut *self.port, bytes)?;
        Write::flush(&mut *self.port)
    }

    fn set_dtr(&mut self, level: bool) -> io::Result<()> {
        debug!("Setting DTR to {}", level);
        self.port.write_data_terminal_ready(level)?;
        Ok(())
    }

    fn clear_input(&mut self) -> io::Result<()> {
        self.port.clear(ClearBuffer::Input)?;
        Ok(())
    }
}
