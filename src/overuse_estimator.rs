//! Two-state Kalman filter tracking `[slope, offset]` of the one-way delay
//! gradient, observing `y = arrival_delta_ms - timestamp_delta_ms` against
//! measurement vector `h = [size_delta, 1]`.
//!
//! Ported from this codebase's webrtc.org lineage
//! (`modules/remote_bitrate_estimator/overuse_estimator`). The covariance
//! is a stack-allocated 2x2 array, matching how the rest of this codebase
//! avoids pulling in a matrix crate for fixed, tiny shapes.

use std::collections::VecDeque;

use crate::bandwidth_usage::BandwidthUsage;

const DELTA_COUNTER_MAX: u32 = 1000;
const MIN_FRAME_PERIOD_HISTORY_LENGTH: usize = 60;

const CHI_SQUARE_VAR_NOISE_FACTOR: f64 = 3.0;

pub struct OveruseEstimator {
    /// 2x2 state covariance, `[[E00, E01], [E10, E11]]`.
    e: [[f64; 2]; 2],
    process_noise: [f64; 2],
    slope: f64,
    offset: f64,
    previous_offset: f64,
    num_of_deltas: u32,
    avg_noise: f64,
    var_noise: f64,
    ts_delta_hist: VecDeque<f64>,
}

impl Default for OveruseEstimator {
    fn default() -> Self {
        Self::new()
    }
}

impl OveruseEstimator {
    pub fn new() -> Self {
        Self {
            e: [[100.0, 0.0], [0.0, 0.1]],
            process_noise: [1e-13, 1e-3],
            slope: 1.0 / 64.0,
            offset: 0.0,
            previous_offset: 0.0,
            num_of_deltas: 0,
            avg_noise: 0.0,
            var_noise: 50.0,
            ts_delta_hist: VecDeque::with_capacity(MIN_FRAME_PERIOD_HISTORY_LENGTH),
        }
    }

    pub fn offset(&self) -> f64 {
        self.offset
    }

    pub fn num_of_deltas(&self) -> u32 {
        self.num_of_deltas
    }

    /// Feeds one inter-group delta through the filter.
    ///
    /// `current_hypothesis` must be the detector's hypothesis *before* this
    /// update (see the facade's ordering requirement); using the
    /// post-update hypothesis here defeats the anti-oscillation covariance
    /// boost below.
    pub fn update(
        &mut self,
        arrival_time_delta_ms: f64,
        timestamp_delta_ms: f64,
        size_delta: f64,
        current_hypothesis: BandwidthUsage,
    ) {
        let min_frame_period = self.update_min_frame_period(timestamp_delta_ms);
        let t_ts_delta = arrival_time_delta_ms - timestamp_delta_ms;

        self.num_of_deltas = (self.num_of_deltas + 1).min(DELTA_COUNTER_MAX);

        self.e[0][0] += self.process_noise[0];
        self.e[1][1] += self.process_noise[1];
        if (current_hypothesis == BandwidthUsage::Overusing && self.offset < self.previous_offset)
            || (current_hypothesis == BandwidthUsage::Underusing
                && self.offset > self.previous_offset)
        {
            self.e[1][1] += 10.0 * self.process_noise[1];
        }

        let h = [size_delta, 1.0];
        let eh = [
            self.e[0][0] * h[0] + self.e[0][1] * h[1],
            self.e[1][0] * h[0] + self.e[1][1] * h[1],
        ];

        let residual = t_ts_delta - self.slope * h[0] - self.offset;

        if current_hypothesis == BandwidthUsage::Normal {
            let max_residual = CHI_SQUARE_VAR_NOISE_FACTOR * self.var_noise.sqrt();
            let clamped = residual.clamp(-max_residual, max_residual);
            self.update_noise_estimate(clamped, min_frame_period);
        }

        let denom = self.var_noise + h[0] * eh[0] + h[1] * eh[1];
        let k = [eh[0] / denom, eh[1] / denom];

        let ikh = [
            [1.0 - k[0] * h[0], -k[0] * h[1]],
            [-k[1] * h[0], 1.0 - k[1] * h[1]],
        ];
        let e00 = self.e[0][0];
        let e01 = self.e[0][1];
        self.e[0][0] = e00 * ikh[0][0] + self.e[1][0] * ikh[0][1];
        self.e[0][1] = e01 * ikh[0][0] + self.e[1][1] * ikh[0][1];
        self.e[1][0] = e00 * ikh[1][0] + self.e[1][0] * ikh[1][1];
        self.e[1][1] = e01 * ikh[1][0] + self.e[1][1] * ikh[1][1];

        self.previous_offset = self.offset;
        self.slope += k[0] * residual;
        self.offset += k[1] * residual;
    }

    fn update_min_frame_period(&mut self, timestamp_delta_ms: f64) -> f64 {
        if self.ts_delta_hist.len() >= MIN_FRAME_PERIOD_HISTORY_LENGTH {
            self.ts_delta_hist.pop_front();
        }
        let min_frame_period = self
            .ts_delta_hist
            .iter()
            .copied()
            .fold(timestamp_delta_ms, f64::min);
        self.ts_delta_hist.push_back(timestamp_delta_ms);
        min_frame_period
    }

    fn update_noise_estimate(&mut self, residual: f64, ts_delta: f64) {
        let alpha = if self.num_of_deltas > 10 * 30 {
            0.002
        } else {
            0.01
        };
        let beta = (1.0 - alpha).powf(ts_delta * 30.0 / 1000.0);
        self.avg_noise = beta * self.avg_noise + (1.0 - beta) * residual;
        self.var_noise = beta * self.var_noise
            + (1.0 - beta) * (self.avg_noise - residual) * (self.avg_noise - residual);
        if self.var_noise < 1.0 {
            self.var_noise = 1.0;
        }
    }
}
