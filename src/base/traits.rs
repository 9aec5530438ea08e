use crate::base::error::Result;
use crate::base::message::{Answer, Message};
use std::io;
use std::time::Duration;

/// Decodes the byte stream coming from the device into `Answer`s.
pub trait ProtocolDecoder {
    /// Attempts to decode an `Answer` from the provided buffer.
    ///
    /// Returns the number of bytes consumed and the answer, if one was completed.
    /// Bytes following a completed answer are left untouched.
    fn decode(&mut self, buf: &[u8]) -> Result<(usize, Option<Answer>)>;

    /// Resets the internal state of the decoder.
    /// This is typically called after a communication error or when starting a new exchange.
    fn reset_decoder(&mut self);
}

/// Encodes host commands into bytes.
pub trait ProtocolEncoder {
    /// Encodes a `Message` into a freshly allocated frame.
    fn encode(&mut self, msg: &Message) -> Result<Vec<u8>>;

    /// Encodes a `Message` and writes it to a `Transport`.
    ///
    /// Returns the number of bytes written.
    fn write_to(&mut self, msg: &Message, dest: &mut dyn Transport) -> Result<usize> {
        let frame = self.encode(msg)?;
        dest.write_all(&frame)?;
        Ok(frame.len())
    }
}

/// A duplex byte stream connected to the sensor.
///
/// Implementations must be `Send`: while scanning, the transport lives on the
/// background worker thread.
pub trait Transport: Send {
    /// Reads up to `buf.len()` bytes, waiting at most `timeout` for the first byte.
    ///
    /// Returns `Ok(0)` when nothing arrived in time.
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize>;

    /// Writes the whole buffer and flushes it to the device.
    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Drives the DTR line. Models without a motor controller use it as motor enable.
    fn set_dtr(&mut self, _level: bool) -> io::Result<()> {
        Ok(())
    }

    /// Discards any bytes received but not yet read.
    fn clear_input(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize> {
        (**self).read(buf, timeout)
    }

    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        (**self).write_all(bytes)
    }

    fn set_dtr(&mut self, level: bool) -> io::Result<()> {
        (**self).set_dtr(level)
    }

    fn clear_input(&mut self) -> io::Result<()> {
        (**self).clear_input()
    }
}
