use crate::answers::RPLIDAR_ANS_LENGTH_MEASUREMENT;
use crate::base::{Channel, Error, Result, Transport};
use crate::protocol::{decode_range_sample, HostProtocol};
use crate::snapshot::ScanSnapshot;
use crate::types::{RangeSample, Scan};
use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError};
use log::{debug, trace, warn};
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Name of the background thread reading the measurement stream.
pub const SCAN_WORKER_THREAD_NAME: &str = "rplidar-scan";

/// Cuts the raw measurement stream into 5-byte records.
///
/// A record failing the start flag or check bit tests means the stream is
/// misaligned; the framer then drops a single byte and tries again.
#[derive(Debug, Default)]
pub struct SampleFramer {
    buffer: VecDeque<u8>,
    discarded: u64,
}

impl SampleFramer {
    pub fn new() -> SampleFramer {
        SampleFramer::default()
    }

    pub fn extend(&mut self, bytes: &[u8]) {
        self.buffer.extend(bytes);
    }

    /// Next valid record, or `None` until more bytes arrive.
    pub fn next_sample(&mut self) -> Option<RangeSample> {
        while self.buffer.len() >= RPLIDAR_ANS_LENGTH_MEASUREMENT {
            let head = &self.buffer.make_contiguous()[..RPLIDAR_ANS_LENGTH_MEASUREMENT];
            match decode_range_sample(head) {
                Ok(sample) => {
                    self.buffer.drain(..RPLIDAR_ANS_LENGTH_MEASUREMENT);
                    return Some(sample);
                }
                Err(e) => {
                    trace!("Skipping one byte: {}", e);
                    self.buffer.pop_front();
                    self.discarded += 1;
                }
            }
        }
        None
    }

    /// Bytes buffered but not framed yet.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Discarded byte count since the last call.
    pub fn take_discarded(&mut self) -> u64 {
        std::mem::take(&mut self.discarded)
    }
}

/// Groups samples into rotations on the start flag.
#[derive(Debug)]
pub struct ScanAccumulator {
    current: Vec<RangeSample>,
    synced: bool,
    min_quality: u8,
    max_samples: usize,
}

impl ScanAccumulator {
    pub fn new(min_quality: u8, max_samples: usize) -> ScanAccumulator {
        ScanAccumulator {
            current: Vec::new(),
            synced: false,
            min_quality,
            max_samples: max_samples.max(1),
        }
    }

    /// Adds one sample, returning the rotation it closes, if any.
    ///
    /// Samples before the first start flag belong to a partial rotation and are dropped.
    pub fn push(&mut self, mut sample: RangeSample) -> Option<Scan> {
        if sample.quality < self.min_quality {
            sample.distance = 0.0;
        }

        if sample.start_flag {
            let completed = if self.synced && !self.current.is_empty() {
                Some(Scan {
                    sequence: 0,
                    samples: std::mem::take(&mut self.current),
                })
            } else {
                None
            };
            self.synced = true;
            self.current.push(sample);
            return completed;
        }

        if !self.synced {
            return None;
        }

        if self.current.len() >= self.max_samples {
            warn!(
                "Scan exceeded {} samples without a start flag, dropping it",
                self.max_samples
            );
            self.current.clear();
            self.synced = false;
            return None;
        }

        self.current.push(sample);
        None
    }

    /// Samples of the rotation in progress.
    pub fn in_progress(&self) -> usize {
        self.current.len()
    }
}

/// What the worker hands back when it ends: the channel, and the transport
/// failure that ended it, if any.
pub(crate) struct WorkerExit<T> {
    pub(crate) channel: Channel<HostProtocol, T>,
    pub(crate) fault: Option<Error>,
}

/// Handle on the background thread reading the measurement stream.
pub(crate) struct ScanWorker<T> {
    stop_tx: Sender<()>,
    handle: Option<JoinHandle<WorkerExit<T>>>,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct WorkerSettings {
    pub(crate) read_timeout: Duration,
    pub(crate) read_buffer_size: usize,
    pub(crate) min_quality: u8,
    pub(crate) max_samples: usize,
}

impl<T: Transport + 'static> ScanWorker<T> {
    /// Moves `channel` to a new worker thread publishing into `snapshot`.
    pub(crate) fn spawn(
        channel: Channel<HostProtocol, T>,
        snapshot: Arc<ScanSnapshot>,
        settings: WorkerSettings,
    ) -> Result<ScanWorker<T>> {
        let (stop_tx, stop_rx) = bounded(1);
        let handle = thread::Builder::new()
            .name(SCAN_WORKER_THREAD_NAME.to_owned())
            .spawn(move || run_scan_worker(channel, snapshot, stop_rx, settings))
            .map_err(|e| Error::OperationFail {
                description: format!("failed to spawn scan worker: {}", e),
            })?;
        debug!("Scan worker started");
        Ok(ScanWorker {
            stop_tx,
            handle: Some(handle),
        })
    }

    pub(crate) fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// Signals the worker and waits for it to hand the channel back.
    pub(crate) fn stop(mut self) -> Result<WorkerExit<T>> {
        let handle = match self.handle.take() {
            Some(handle) => handle,
            None => {
                return Err(Error::OperationFail {
                    description: "scan worker already joined".to_owned(),
                })
            }
        };
        // The worker may already have exited on a fault and dropped the receiver.
        let _ = self.stop_tx.try_send(());
        let exit = handle.join().map_err(|_| Error::OperationFail {
            description: "scan worker panicked".to_owned(),
        })?;
        debug!("Scan worker joined");
        Ok(exit)
    }
}

impl<T> Drop for ScanWorker<T> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = self.stop_tx.try_send(());
            let _ = handle.join();
        }
    }
}

fn run_scan_worker<T: Transport>(
    mut channel: Channel<HostProtocol, T>,
    snapshot: Arc<ScanSnapshot>,
    stop_rx: Receiver<()>,
    settings: WorkerSettings,
) -> WorkerExit<T> {
    let mut framer = SampleFramer::new();
    let mut accumulator = ScanAccumulator::new(settings.min_quality, settings.max_samples);
    let mut buf = vec![0u8; settings.read_buffer_size.max(RPLIDAR_ANS_LENGTH_MEASUREMENT)];

    loop {
        match stop_rx.try_recv() {
            Ok(()) | Err(TryRecvError::Disconnected) => break,
            Err(TryRecvError::Empty) => {}
        }

        let read = match channel.read_stream(&mut buf, settings.read_timeout) {
            Ok(read) => read,
            Err(e) => {
                snapshot.record_fault(e.to_string());
                return WorkerExit {
                    channel,
                    fault: Some(e),
                };
            }
        };
        if read == 0 {
            continue;
        }

        framer.extend(&buf[..read]);
        let mut decoded = 0;
        while let Some(sample) = framer.next_sample() {
            decoded += 1;
            if let Some(scan) = accumulator.push(sample) {
                snapshot.publish(scan);
            }
        }
        snapshot.add_samples(decoded);
        let discarded = framer.take_discarded();
        if discarded > 0 {
            warn!("Discarded {} bytes while resynchronising", discarded);
            snapshot.add_discarded(discarded);
        }
    }

    debug!(
        "Scan worker stopping, {} samples of an unfinished scan and {} unframed bytes dropped",
        accumulator.in_progress(),
        framer.pending()
    );
    WorkerExit {
        channel,
        fault: None,
    }
}
