use crate::base::error::Result;
use crate::base::message::{Answer, Message};
use crate::base::traits::{ProtocolDecoder, ProtocolEncoder, Transport};
use log::{error, trace, warn};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

const DEFAULT_CHANNEL_READ_BUFFER_SIZE: usize = 1024;

/// Channel encodes commands and decodes answers with a protocol, and moves the
/// bytes through a `Transport`.
///
/// # Examples
/// ```ignore
/// let mut channel = Channel::new(HostProtocol::new(), serial_transport);
/// let answer = channel.invoke(&Message::new(RPLIDAR_CMD_GET_DEVICE_INFO), Duration::from_secs(1))?;
/// ```
#[derive(Debug)]
pub struct Channel<P, T> {
    protocol: P,
    transport: T,
    read_buffer: VecDeque<u8>,
    scratch: Vec<u8>,
}

impl<P, T> Channel<P, T>
where
    P: ProtocolDecoder + ProtocolEncoder,
    T: Transport,
{
    /// Create a new `Channel` to read and write messages
    pub fn new(protocol: P, transport: T) -> Channel<P, T> {
        Channel::with_read_buffer_size(protocol, transport, DEFAULT_CHANNEL_READ_BUFFER_SIZE)
    }

    /// Create a new `Channel` reading at most `read_buffer_size` bytes per transport read
    pub fn with_read_buffer_size(
        protocol: P,
        transport: T,
        read_buffer_size: usize,
    ) -> Channel<P, T> {
        trace!("Creating new Channel with buffer size {}", read_buffer_size);
        let mut chn = Channel {
            protocol,
            transport,
            read_buffer: VecDeque::with_capacity(read_buffer_size),
            scratch: vec![0; read_buffer_size.max(1)],
        };
        chn.reset();
        chn
    }

    /// Reset the protocol decoder, usually after a communication error
    pub fn reset(&mut self) {
        trace!("Resetting Channel protocol decoder");
        self.protocol.reset_decoder();
    }

    /// Drop every buffered byte, on the host side and in the transport
    pub fn flush_input(&mut self) -> Result<()> {
        trace!(
            "Flushing channel input ({} bytes buffered)",
            self.read_buffer.len()
        );
        self.read_buffer.clear();
        self.protocol.reset_decoder();
        self.transport.clear_input()?;
        Ok(())
    }

    /// Number of received bytes not consumed yet
    pub fn buffered_len(&self) -> usize {
        self.read_buffer.len()
    }

    /// Mutable access to the underlying transport (DTR control)
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Read once from the transport into the read buffer
    fn fill(&mut self, timeout: Duration) -> Result<usize> {
        let read = match self.transport.read(&mut self.scratch, timeout) {
            Ok(read) => read,
            Err(e) => {
                error!("IO error reading from transport: {}", e);
                return Err(e.into());
            }
        };
        self.read_buffer.extend(&self.scratch[..read]);
        trace!(
            "Read {} bytes from transport (buffer len: {})",
            read,
            self.read_buffer.len()
        );
        Ok(read)
    }

    /// Try to decode an answer from the bytes already buffered
    fn decode_buffered(&mut self) -> Result<Option<Answer>> {
        if self.read_buffer.is_empty() {
            return Ok(None);
        }
        let buffer_slice = self.read_buffer.make_contiguous();
        match self.protocol.decode(buffer_slice) {
            Ok((decoded_bytes, answer)) => {
                self.read_buffer.drain(..decoded_bytes);
                if let Some(answer) = &answer {
                    trace!(
                        "Decoded answer: type={:02X}, single={}, data_len={}",
                        answer.header.data_type,
                        answer.header.is_single,
                        answer.data.len()
                    );
                }
                Ok(answer)
            }
            Err(e) => {
                warn!("Protocol decode error: {:?}", e);
                self.protocol.reset_decoder();
                Err(e)
            }
        }
    }

    /// Read an answer, waiting at most `timeout`.
    ///
    /// Returns `Ok(None)` if no complete answer arrived in time.
    pub fn read_until(&mut self, timeout: Duration) -> Result<Option<Answer>> {
        trace!("Channel read_until called with timeout {:?}", timeout);
        let start = Instant::now();

        loop {
            if let Some(answer) = self.decode_buffered()? {
                return Ok(Some(answer));
            }

            let elapsed = start.elapsed();
            if elapsed >= timeout {
                trace!("read_until timeout reached ({:?})", elapsed);
                return Ok(None);
            }

            self.fill(timeout - elapsed)?;
        }
    }

    /// Read raw stream bytes, serving buffered bytes first.
    ///
    /// Used in continuous mode after the answer descriptor has been decoded.
    pub fn read_stream(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        if !self.read_buffer.is_empty() {
            let n = self.read_buffer.len().min(buf.len());
            for (dst, src) in buf.iter_mut().zip(self.read_buffer.drain(..n)) {
                *dst = src;
            }
            return Ok(n);
        }
        match self.transport.read(buf, timeout) {
            Ok(read) => Ok(read),
            Err(e) => {
                error!("IO error reading stream from transport: {}", e);
                Err(e.into())
            }
        }
    }

    /// Write a command to the channel
    pub fn write(&mut self, msg: &Message) -> Result<usize> {
        trace!(
            "Channel write called: cmd={:02X}, data_len={}",
            msg.cmd,
            msg.data.len()
        );
        let written = self.protocol.write_to(msg, &mut self.transport)?;
        trace!("Wrote {} bytes", written);
        Ok(written)
    }

    /// Send a request and wait for its answer
    pub fn invoke(&mut self, request: &Message, timeout: Duration) -> Result<Option<Answer>> {
        trace!(
            "Channel invoke called: cmd={:02X}, timeout={:?}",
            request.cmd,
            timeout
        );
        self.protocol.reset_decoder();
        self.write(request)?;
        let result = self.read_until(timeout);
        if let Ok(None) = &result {
            warn!("Invoke: timed out waiting for answer to {:02X}", request.cmd);
        }
        result
    }
}
