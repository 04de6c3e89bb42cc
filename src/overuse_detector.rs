//! Self-adaptive threshold comparator converting the Kalman-filtered
//! `offset` into a `BandwidthUsage` hypothesis.
//!
//! Ported from this codebase's webrtc.org lineage
//! (`modules/remote_bitrate_estimator/overuse_detector`): asymmetric
//! adaptation gains make the threshold rise quickly under sustained
//! overuse and fall slowly, which is what gives the detector its
//! hysteresis.

use crate::bandwidth_usage::BandwidthUsage;

pub const MIN_NUM_DELTAS: u32 = 60;
pub const MAX_ADAPT_OFFSET_MS: f64 = 15.0;

const K_UP: f64 = 0.0087;
const K_DOWN: f64 = 0.039;
const OVERUSE_TIME_THRESHOLD_MS: f64 = 10.0;
const THRESHOLD_MIN: f64 = 6.0;
const THRESHOLD_MAX: f64 = 600.0;

pub struct OveruseDetector {
    hypothesis: BandwidthUsage,
    threshold: f64,
    previous_offset: f64,
    overuse_counter: u32,
    overuse_time_ms: Option<f64>,
    last_update_ms: Option<u64>,
}

impl Default for OveruseDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl OveruseDetector {
    pub fn new() -> Self {
        Self {
            hypothesis: BandwidthUsage::Normal,
            threshold: 12.5,
            previous_offset: 0.0,
            overuse_counter: 0,
            overuse_time_ms: None,
            last_update_ms: None,
        }
    }

    pub fn state(&self) -> BandwidthUsage {
        self.hypothesis
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn detect(
        &mut self,
        offset: f64,
        timestamp_delta_ms: f64,
        num_of_deltas: u32,
        now_ms: u64,
    ) -> BandwidthUsage {
        if num_of_deltas < 2 {
            return BandwidthUsage::Normal;
        }

        let t = num_of_deltas.min(MIN_NUM_DELTAS) as f64 * offset;
        if t > self.threshold {
            match self.overuse_time_ms {
                None => self.overuse_time_ms = Some(timestamp_delta_ms / 2.0),
                Some(ref mut overuse_time_ms) => *overuse_time_ms += timestamp_delta_ms,
            }
            self.overuse_counter += 1;

            if self.overuse_time_ms.unwrap() > OVERUSE_TIME_THRESHOLD_MS
                && self.overuse_counter > 1
                && offset >= self.previous_offset
            {
                self.overuse_counter = 0;
                self.overuse_time_ms = Some(0.0);
                self.hypothesis = BandwidthUsage::Overusing;
            }
        } else if t < -self.threshold {
            self.overuse_counter = 0;
            self.overuse_time_ms = None;
            self.hypothesis = BandwidthUsage::Underusing;
        } else {
            self.overuse_counter = 0;
            self.overuse_time_ms = None;
            self.hypothesis = BandwidthUsage::Normal;
        }

        self.previous_offset = offset;
        self.update_threshold(t, now_ms);
        self.hypothesis
    }

    fn update_threshold(&mut self, modified_offset: f64, now_ms: u64) {
        let Some(last_update_ms) = self.last_update_ms else {
            self.last_update_ms = Some(now_ms);
            return;
        };

        if modified_offset.abs() > self.threshold + MAX_ADAPT_OFFSET_MS {
            self.last_update_ms = Some(now_ms);
            return;
        }

        let k = if modified_offset.abs() < self.threshold {
            K_DOWN
        } else {
            K_UP
        };
        let dt = now_ms.saturating_sub(last_update_ms).min(100) as f64;
        self.threshold += k * (modified_offset.abs() - self.threshold) * dt;
        self.threshold = self.threshold.clamp(THRESHOLD_MIN, THRESHOLD_MAX);
        self.last_update_ms = Some(now_ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_normal() {
        let detector = OveruseDetector::new();
        assert_eq!(detector.state(), BandwidthUsage::Normal);
    }

    #[test]
    fn fewer_than_two_deltas_stays_normal_without_mutation() {
        let mut detector = OveruseDetector::new();
        let threshold_before = detector.threshold();
        let state = detector.detect(1000.0, 33.0, 1, 1000);
        assert_eq!(state, BandwidthUsage::Normal);
        assert_eq!(detector.threshold(), threshold_before);
    }

    #[test]
    fn large_sustained_positive_offset_triggers_overuse() {
        let mut detector = OveruseDetector::new();
        let mut now = 0u64;
        let mut state = BandwidthUsage::Normal;
        for _ in 0..20 {
            now += 33;
            state = detector.detect(1.0, 33.0, 60, now);
            if state == BandwidthUsage::Overusing {
                break;
            }
        }
        assert_eq!(state, BandwidthUsage::Overusing);
    }

    #[test]
    fn large_negative_offset_is_underuse() {
        let mut detector = OveruseDetector::new();
        let state = detector.detect(-5.0, 33.0, 60, 1000);
        assert_eq!(state, BandwidthUsage::Underusing);
    }

    #[test]
    fn threshold_stays_within_bounds() {
        let mut detector = OveruseDetector::new();
        let mut now = 0u64;
        for i in 0..2000 {
            now += 33;
            let offset = if i % 2 == 0 { 50.0 } else { -50.0 };
            detector.detect(offset, 33.0, 60, now);
            assert!(detector.threshold() >= 6.0 && detector.threshold() <= 600.0);
        }
    }

    #[test]
    fn outlier_beyond_max_adapt_offset_leaves_threshold_unchanged() {
        let mut detector = OveruseDetector::new();
        // Seed `last_update_ms`.
        detector.detect(0.0, 33.0, 60, 1000);
        let threshold_before = detector.threshold();
        // |offset| * num_of_deltas is far beyond threshold + 15.
        detector.detect(1000.0, 33.0, 60, 1033);
        assert_eq!(detector.threshold(), threshold_before);
    }
}
