//! Scripted in-memory transport used by the unit tests.

use crate::base::{Message, Transport};
use crate::protocol::decode_command;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::io;
use std::sync::Arc;
use std::time::Duration;

const MOCK_POLL_INTERVAL: Duration = Duration::from_millis(2);

#[derive(Debug, Default)]
struct MockState {
    incoming: VecDeque<u8>,
    written: Vec<u8>,
    // One script per command code; the last entry of a script keeps answering.
    responders: HashMap<u8, VecDeque<Vec<u8>>>,
    failing: bool,
    dtr: Option<bool>,
}

/// Cloneable handle: the test keeps one clone, the session owns the other.
#[derive(Debug, Clone, Default)]
pub(crate) struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    pub(crate) fn new() -> MockTransport {
        MockTransport::default()
    }

    /// Answer every `cmd` frame with `bytes`.
    pub(crate) fn respond_to(&self, cmd: u8, bytes: &[u8]) {
        self.respond_sequence(cmd, vec![bytes.to_vec()]);
    }

    /// Answer successive `cmd` frames with successive entries; the last one repeats.
    pub(crate) fn respond_sequence(&self, cmd: u8, script: Vec<Vec<u8>>) {
        self.state.lock().responders.insert(cmd, script.into());
    }

    pub(crate) fn push_incoming(&self, bytes: &[u8]) {
        self.state.lock().incoming.extend(bytes);
    }

    pub(crate) fn written(&self) -> Vec<u8> {
        self.state.lock().written.clone()
    }

    /// Every command frame written so far, decoded.
    pub(crate) fn commands(&self) -> Vec<Message> {
        let written = self.written();
        let mut commands = Vec::new();
        let mut rest = written.as_slice();
        while rest.len() >= 2 {
            let len = if rest[1] & 0x80 != 0 && rest.len() > 2 {
                4 + rest[2] as usize
            } else {
                2
            };
            let len = len.min(rest.len());
            if let Ok(msg) = decode_command(&rest[..len]) {
                commands.push(msg);
            }
            rest = &rest[len..];
        }
        commands
    }

    pub(crate) fn command_codes(&self) -> Vec<u8> {
        self.commands().iter().map(|msg| msg.cmd).collect()
    }

    pub(crate) fn fail_io(&self) {
        self.state.lock().failing = true;
    }

    pub(crate) fn dtr(&self) -> Option<bool> {
        self.state.lock().dtr
    }
}

impl Transport for MockTransport {
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> io::Result<usize> {
        for attempt in 0..2 {
            {
                let mut state = self.state.lock();
                if state.failing {
                    return Err(io::Error::new(io::ErrorKind::BrokenPipe, "mock unplugged"));
                }
                if !state.incoming.is_empty() {
                    let n = state.incoming.len().min(buf.len());
                    for (dst, src) in buf.iter_mut().zip(state.incoming.drain(..n)) {
                        *dst = src;
                    }
                    return Ok(n);
                }
            }
            if attempt == 0 {
                std::thread::sleep(timeout.min(MOCK_POLL_INTERVAL));
            }
        }
        Ok(0)
    }

    fn write_all(&mut self, bytes: &[u8]) -> io::Result<()> {
        let mut state = self.state.lock();
        if state.failing {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "mock unplugged"));
        }
        state.written.extend_from_slice(bytes);
        if bytes.len() >= 2 && bytes[0] == 0xA5 {
            let cmd = bytes[1];
            let reply = state.responders.get_mut(&cmd).and_then(|script| {
                if script.len() > 1 {
                    script.pop_front()
                } else {
                    script.front().cloned()
                }
            });
            if let Some(reply) = reply {
                state.incoming.extend(reply);
            }
        }
        Ok(())
    }

    fn set_dtr(&mut self, level: bool) -> io::Result<()> {
        self.state.lock().dtr = Some(level);
        Ok(())
    }

    fn clear_input(&mut self) -> io::Result<()> {
        self.state.lock().incoming.clear();
        Ok(())
    }
}

pub(crate) fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}
