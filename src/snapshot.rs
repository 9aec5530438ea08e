use crate::base::{Error, Result};
use crate::types::{Point2D, Scan};
use arc_swap::ArcSwapOption;
use log::{debug, error, trace};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Counters kept by a `ScanSnapshot`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ScanStats {
    pub scans_published: u64,
    pub samples_decoded: u64,
    /// Bytes skipped while realigning on the 5-byte record boundary.
    pub bytes_discarded: u64,
}

#[derive(Debug, Default)]
struct Published {
    sequence: u64,
    fault: Option<String>,
}

/// The most recent complete scan, shared between the scan worker and consumers.
///
/// Readers load the current `Arc<Scan>` without locking. The mutex only guards the
/// publication counter used to wake blocked waiters, and is never held across I/O.
#[derive(Debug, Default)]
pub struct ScanSnapshot {
    latest: ArcSwapOption<Scan>,
    published: Mutex<Published>,
    updated: Condvar,
    samples_decoded: AtomicU64,
    bytes_discarded: AtomicU64,
}

impl ScanSnapshot {
    pub fn new() -> ScanSnapshot {
        ScanSnapshot::default()
    }

    /// The latest complete scan, if any.
    #[inline]
    pub fn latest(&self) -> Option<Arc<Scan>> {
        self.latest.load_full()
    }

    /// Publishes a completed scan, assigning the next sequence number.
    pub fn publish(&self, mut scan: Scan) -> Arc<Scan> {
        let mut published = self.published.lock();
        published.sequence += 1;
        scan.sequence = published.sequence;
        let scan = Arc::new(scan);
        self.latest.store(Some(scan.clone()));
        drop(published);
        self.updated.notify_all();
        trace!("Published scan {} ({} samples)", scan.sequence, scan.len());
        scan
    }

    /// Forgets the published scan and any recorded fault. Sequence numbers keep increasing.
    pub fn clear(&self) {
        let mut published = self.published.lock();
        published.fault = None;
        self.latest.store(None);
    }

    /// Records a worker failure and wakes every waiter.
    pub(crate) fn record_fault(&self, description: String) {
        error!("Scan worker fault: {}", description);
        self.published.lock().fault = Some(description);
        self.updated.notify_all();
    }

    /// The recorded worker failure, if any.
    pub fn fault(&self) -> Option<String> {
        self.published.lock().fault.clone()
    }

    pub(crate) fn add_samples(&self, count: u64) {
        self.samples_decoded.fetch_add(count, Ordering::Relaxed);
    }

    pub(crate) fn add_discarded(&self, count: u64) {
        self.bytes_discarded.fetch_add(count, Ordering::Relaxed);
    }

    pub fn stats(&self) -> ScanStats {
        ScanStats {
            scans_published: self.published.lock().sequence,
            samples_decoded: self.samples_decoded.load(Ordering::Relaxed),
            bytes_discarded: self.bytes_discarded.load(Ordering::Relaxed),
        }
    }

    /// Returns the latest scan, waiting up to `timeout` for the first one.
    ///
    /// A zero timeout never blocks.
    pub fn get_latest_scan(&self, timeout: Duration) -> Result<Arc<Scan>> {
        self.wait_for("get_latest_scan", timeout, |_| true)
    }

    /// Waits up to `timeout` for a scan with a sequence number above `after_sequence`.
    pub fn wait_newer(&self, after_sequence: u64, timeout: Duration) -> Result<Arc<Scan>> {
        self.wait_for("wait_newer", timeout, |scan| scan.sequence > after_sequence)
    }

    fn wait_for<F>(&self, operation: &'static str, timeout: Duration, accept: F) -> Result<Arc<Scan>>
    where
        F: Fn(&Scan) -> bool,
    {
        let started = Instant::now();
        // None means the timeout is too large to represent, so wait without a deadline
        let deadline = started.checked_add(timeout);

        if let Some(scan) = self.latest().filter(|scan| accept(&**scan)) {
            return Ok(scan);
        }

        let mut published = self.published.lock();
        loop {
            if let Some(scan) = self.latest().filter(|scan| accept(&**scan)) {
                return Ok(scan);
            }
            if let Some(fault) = &published.fault {
                return Err(Error::ConnectionError {
                    operation,
                    elapsed: started.elapsed(),
                    description: fault.clone(),
                });
            }
            match deadline {
                Some(deadline) if Instant::now() >= deadline => {
                    debug!("{} gave up after {:?}", operation, started.elapsed());
                    return Err(Error::OperationTimeout {
                        operation,
                        elapsed: started.elapsed(),
                    });
                }
                Some(deadline) => {
                    self.updated.wait_until(&mut published, deadline);
                }
                None => self.updated.wait(&mut published),
            }
        }
    }
}

/// Converts polar samples to Cartesian points, keeping input order.
///
/// `x = d * cos(angle)` and `y = d * sin(angle)`. Samples with zero distance are
/// dropped when `filter_invalid` is set and mapped to the origin otherwise.
pub fn to_points(scan: &Scan, filter_invalid: bool) -> Vec<Point2D> {
    scan.samples
        .iter()
        .filter(|sample| !filter_invalid || sample.is_valid())
        .map(|sample| {
            let (sin, cos) = sample.angle_radians().sin_cos();
            Point2D {
                x: sample.distance * cos,
                y: sample.distance * sin,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RangeSample;
    use approx::assert_abs_diff_eq;
    use std::thread;

    fn sample(angle: f32, distance: f32, start_flag: bool) -> RangeSample {
        RangeSample {
            angle,
            distance,
            quality: 47,
            start_flag,
        }
    }

    fn scan(samples: Vec<RangeSample>) -> Scan {
        Scan {
            sequence: 0,
            samples,
        }
    }

    #[test]
    fn points_follow_polar_convention() {
        let scan = scan(vec![
            sample(0.0, 1000.0, true),
            sample(90.0, 2000.0, false),
            sample(180.0, 0.0, false),
            sample(270.0, 3000.0, false),
        ]);
        let points = to_points(&scan, true);
        assert_eq!(points.len(), 3);
        assert_abs_diff_eq!(points[0].x, 1000.0, epsilon = 1e-2);
        assert_abs_diff_eq!(points[0].y, 0.0, epsilon = 1e-2);
        assert_abs_diff_eq!(points[1].x, 0.0, epsilon = 1e-2);
        assert_abs_diff_eq!(points[1].y, 2000.0, epsilon = 1e-2);
        assert_abs_diff_eq!(points[2].x, 0.0, epsilon = 1e-2);
        assert_abs_diff_eq!(points[2].y, -3000.0, epsilon = 1e-2);

        let unfiltered = to_points(&scan, false);
        assert_eq!(unfiltered.len(), 4);
        assert_eq!(unfiltered[2], Point2D { x: 0.0, y: 0.0 });
    }

    #[test]
    fn points_stay_within_range() {
        let samples = (0..360)
            .map(|i| sample(i as f32, 500.0 + i as f32, i == 0))
            .collect();
        let scan = scan(samples);
        for (point, sample) in to_points(&scan, true).iter().zip(&scan.samples) {
            let radius = (point.x * point.x + point.y * point.y).sqrt();
            assert!(radius <= sample.distance + 1e-2);
        }
    }

    #[test]
    fn zero_timeout_without_scan_fails_immediately() {
        let snapshot = ScanSnapshot::new();
        let started = Instant::now();
        let err = snapshot.get_latest_scan(Duration::ZERO).unwrap_err();
        assert!(matches!(
            err,
            Error::OperationTimeout {
                operation: "get_latest_scan",
                ..
            }
        ));
        assert!(started.elapsed() < Duration::from_millis(50));
    }

    #[test]
    fn publish_assigns_increasing_sequence() {
        let snapshot = ScanSnapshot::new();
        let first = snapshot.publish(scan(vec![sample(0.0, 1.0, true)]));
        let second = snapshot.publish(scan(vec![sample(0.0, 2.0, true)]));
        assert_eq!(first.sequence, 1);
        assert_eq!(second.sequence, 2);
        assert_eq!(snapshot.latest().unwrap().sequence, 2);
        assert_eq!(snapshot.stats().scans_published, 2);

        // a held scan is unaffected by later publications
        assert_eq!(first.samples[0].distance, 1.0);
    }

    #[test]
    fn waiter_wakes_on_publish() {
        let snapshot = Arc::new(ScanSnapshot::new());
        let publisher = {
            let snapshot = snapshot.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                snapshot.publish(scan(vec![sample(10.0, 100.0, true)]));
            })
        };
        let scan = snapshot.get_latest_scan(Duration::from_secs(2)).unwrap();
        assert_eq!(scan.sequence, 1);
        publisher.join().unwrap();

        assert!(matches!(
            snapshot.wait_newer(1, Duration::from_millis(10)),
            Err(Error::OperationTimeout { .. })
        ));
    }

    #[test]
    fn unbounded_timeout_waits_for_publish() {
        let snapshot = Arc::new(ScanSnapshot::new());
        let publisher = {
            let snapshot = snapshot.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                snapshot.publish(scan(vec![sample(0.0, 100.0, true)]));
                thread::sleep(Duration::from_millis(20));
                snapshot.publish(scan(vec![sample(0.0, 200.0, true)]));
            })
        };
        let first = snapshot.get_latest_scan(Duration::MAX).unwrap();
        assert_eq!(first.sequence, 1);
        let second = snapshot.wait_newer(first.sequence, Duration::MAX).unwrap();
        assert_eq!(second.sequence, 2);
        assert_eq!(second.samples[0].distance, 200.0);
        publisher.join().unwrap();
    }

    #[test]
    fn fault_wakes_waiters_with_connection_error() {
        let snapshot = Arc::new(ScanSnapshot::new());
        let worker = {
            let snapshot = snapshot.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                snapshot.record_fault("serial port unplugged".to_owned());
            })
        };
        let err = snapshot.get_latest_scan(Duration::from_secs(2)).unwrap_err();
        assert!(matches!(err, Error::ConnectionError { .. }));
        worker.join().unwrap();

        snapshot.clear();
        assert!(snapshot.fault().is_none());
        assert!(snapshot.latest().is_none());
    }
}
