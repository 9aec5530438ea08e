use crate::types::{RangeSample, Scan};
use log::trace;

/// Returns a copy of `scan` sorted by ascending angle.
///
/// Invalid samples (distance 0) carry no trustworthy angle, so before sorting each
/// one gets the angle expected from its position: the nominal increment of
/// `360 / len` degrees, counted from the nearest preceding valid sample (or
/// backwards from the first valid one). If no sample is valid the angles are
/// sorted as they are.
pub fn ascend_scan(scan: &Scan) -> Scan {
    trace!("ascend_scan called with {} samples", scan.len());

    let mut samples: Vec<RangeSample> = scan.samples.clone();
    if samples.is_empty() {
        return scan.clone();
    }

    if let Some(first_valid) = samples.iter().position(|s| s.is_valid()) {
        let increment = 360.0 / samples.len() as f32;
        let anchor = samples[first_valid].angle;

        for i in (0..first_valid).rev() {
            samples[i].angle = (anchor - (first_valid - i) as f32 * increment).rem_euclid(360.0);
        }
        for i in first_valid + 1..samples.len() {
            if !samples[i].is_valid() {
                samples[i].angle = (samples[i - 1].angle + increment).rem_euclid(360.0);
            }
        }
    } else {
        trace!("No valid samples, sorting raw angles");
    }

    samples.sort_by(|a, b| a.angle.total_cmp(&b.angle));
    Scan {
        sequence: scan.sequence,
        samples,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn sample(angle: f32, distance: f32) -> RangeSample {
        RangeSample {
            angle,
            distance,
            quality: 20,
            start_flag: false,
        }
    }

    #[test]
    fn sorts_wrapped_rotation() {
        let scan = Scan {
            sequence: 7,
            samples: vec![
                sample(270.0, 10.0),
                sample(0.0, 20.0),
                sample(90.0, 30.0),
                sample(180.0, 40.0),
            ],
        };
        let sorted = ascend_scan(&scan);
        assert_eq!(sorted.sequence, 7);
        let angles: Vec<f32> = sorted.samples.iter().map(|s| s.angle).collect();
        assert_eq!(angles, vec![0.0, 90.0, 180.0, 270.0]);
        assert_eq!(sorted.samples[0].distance, 20.0);
    }

    #[test]
    fn invalid_samples_get_expected_angles() {
        let scan = Scan {
            sequence: 1,
            samples: vec![
                sample(123.0, 0.0),
                sample(100.0, 5.0),
                sample(0.0, 0.0),
                sample(280.0, 5.0),
            ],
        };
        let sorted = ascend_scan(&scan);
        let angles: Vec<f32> = sorted.samples.iter().map(|s| s.angle).collect();
        assert_relative_eq!(angles[0], 10.0);
        assert_relative_eq!(angles[1], 100.0);
        assert_relative_eq!(angles[2], 190.0);
        assert_relative_eq!(angles[3], 280.0);
    }

    #[test]
    fn all_invalid_keeps_raw_angles() {
        let scan = Scan {
            sequence: 1,
            samples: vec![sample(30.0, 0.0), sample(10.0, 0.0)],
        };
        let sorted = ascend_scan(&scan);
        assert_eq!(sorted.samples[0].angle, 10.0);
        assert_eq!(sorted.samples[1].angle, 30.0);
    }
}
