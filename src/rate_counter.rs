//! Sliding, millisecond-bucketed rate counter.
//!
//! Ported from this codebase's webrtc.org lineage
//! (`modules/remote_bitrate_estimator`): a ring of 1 ms buckets plus a
//! rolling total avoids both per-sample timestamp storage and allocation on
//! the hot path, at the cost of bounding arithmetic error to one bucket.

use crate::data_rate::DataRate;

const DEFAULT_SCALE: u64 = 8000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct RateBucket {
    count: u32,
    value: u64,
}

/// Rate counter, storing the amount received in 1 ms buckets over a fixed
/// window.
pub struct RateCounter {
    scale: u64,
    window_size: u64,
    buckets: Vec<RateBucket>,
    origin_index: usize,
    origin_ms: Option<u64>,
    total: RateBucket,
}

impl RateCounter {
    pub fn new(window_size_ms: u64, scale: u64) -> Self {
        Self {
            scale,
            window_size: window_size_ms,
            buckets: vec![RateBucket::default(); window_size_ms as usize],
            origin_index: 0,
            origin_ms: None,
            total: RateBucket::default(),
        }
    }

    pub fn with_default_scale(window_size_ms: u64) -> Self {
        Self::new(window_size_ms, DEFAULT_SCALE)
    }

    /// Adds `value` (typically a payload size in bytes) at `now_ms`.
    ///
    /// `now_ms` must be monotonically non-decreasing across calls; callers
    /// guarantee this (arrival times only move forward). Behavior on
    /// backwards time is undefined outside of debug builds.
    pub fn add(&mut self, value: u64, now_ms: u64) {
        match self.origin_ms {
            None => self.origin_ms = Some(now_ms),
            Some(origin_ms) => {
                debug_assert!(now_ms >= origin_ms, "RateCounter::add saw time go backwards");
                self.erase_old(now_ms);
            }
        }
        let origin_ms = self.origin_ms.unwrap();
        let index =
            (self.origin_index as u64 + now_ms - origin_ms) % self.window_size;
        let bucket = &mut self.buckets[index as usize];
        bucket.count += 1;
        bucket.value += value;
        self.total.count += 1;
        self.total.value += value;
    }

    /// Returns the current rate, scaled by `scale`, or `None` if there is
    /// not yet enough history to form a meaningful estimate.
    pub fn rate(&mut self, now_ms: u64) -> Option<DataRate> {
        let origin_ms = self.origin_ms?;
        self.erase_old(now_ms);
        let active_window_ms = now_ms - origin_ms + 1;
        if self.total.count > 0 && active_window_ms > 1 {
            let scaled = (self.scale as f64 * self.total.value as f64) / active_window_ms as f64;
            Some(DataRate::from_bits_per_sec(scaled.round() as i64))
        } else {
            None
        }
    }

    /// Clears all buckets and forgets the window origin.
    pub fn reset(&mut self) {
        for bucket in &mut self.buckets {
            *bucket = RateBucket::default();
        }
        self.origin_index = 0;
        self.origin_ms = None;
        self.total = RateBucket::default();
    }

    fn erase_old(&mut self, now_ms: u64) {
        let Some(mut origin_ms) = self.origin_ms else {
            return;
        };
        let new_origin_ms = now_ms.saturating_sub(self.window_size - 1);
        while origin_ms < new_origin_ms {
            let bucket = &mut self.buckets[self.origin_index];
            self.total.count -= bucket.count;
            self.total.value -= bucket.value;
            *bucket = RateBucket::default();
            self.origin_index = (self.origin_index + 1) % self.window_size as usize;
            origin_ms += 1;
        }
        self.origin_ms = Some(origin_ms);
    }
}
