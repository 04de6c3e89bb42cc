//! Top-level facade wiring `RateCounter`, `InterArrival`, `OveruseEstimator`
//! and `OveruseDetector` into the receive-side bandwidth estimator.
//!
//! Ported from this codebase's webrtc.org lineage
//! (`modules/remote_bitrate_estimator/remote_bitrate_estimator_abs_send_time`).

use std::collections::HashMap;

use crate::bandwidth_usage::BandwidthUsage;
use crate::data_rate::DataRate;
use crate::error::ConfigError;
use crate::inter_arrival::InterArrival;
use crate::overuse_detector::OveruseDetector;
use crate::overuse_estimator::OveruseEstimator;
use crate::rate_counter::RateCounter;
use crate::timestamp::RtpTimestamp;

/// Bits of the 24-bit abs-send-time extension are left-shifted by this many
/// bits to recover a 32-bit send timestamp in 1/(2^26) s units.
const INTER_ARRIVAL_SHIFT: u32 = 26;
const TIMESTAMP_GROUP_LENGTH_MS: u64 = 5;
const TIMESTAMP_TO_MS: f64 = 1000.0 / (1u64 << INTER_ARRIVAL_SHIFT) as f64;

const DEFAULT_INCOMING_BITRATE_WINDOW_MS: u64 = 1000;
const DEFAULT_INCOMING_BITRATE_SCALE: u64 = 8000;

/// Tunables that are legitimately configurable, as opposed to the
/// calibrated detector/estimator constants, which are fixed for
/// interoperability (see the crate's module docs).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RemoteBitrateEstimatorConfig {
    /// Width, in ms, of the incoming-bitrate sliding window.
    pub rate_window_ms: u64,
    /// Scale applied to `rate_window_ms`'s accumulated bytes to produce
    /// bits/s (8000 converts bytes/ms to bits/s).
    pub rate_scale: u64,
    /// Width, in ms, of an inter-arrival timestamp group.
    pub group_length_ms: u64,
}

impl Default for RemoteBitrateEstimatorConfig {
    fn default() -> Self {
        Self {
            rate_window_ms: DEFAULT_INCOMING_BITRATE_WINDOW_MS,
            rate_scale: DEFAULT_INCOMING_BITRATE_SCALE,
            group_length_ms: TIMESTAMP_GROUP_LENGTH_MS,
        }
    }
}

impl RemoteBitrateEstimatorConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.rate_window_ms == 0 {
            return Err(ConfigError::WindowSizeZero);
        }
        if self.rate_scale == 0 {
            return Err(ConfigError::ScaleZero);
        }
        if self.group_length_ms == 0 {
            return Err(ConfigError::GroupLengthZero);
        }
        Ok(())
    }

    fn group_length_units(&self) -> u32 {
        (((self.group_length_ms as u128) << INTER_ARRIVAL_SHIFT) / 1000) as u32
    }
}

/// Receive-side bandwidth estimator for the abs-send-time header extension.
///
/// Owns all state needed to turn a stream of packet arrivals into a
/// bandwidth-usage hypothesis; see the crate's module docs for the overall
/// data flow. One instance measures one aggregate stream (it does not fan
/// out per-SSRC state, matching the single-stream design of the
/// implementation it is ported from).
pub struct RemoteBitrateEstimator {
    incoming_bitrate: RateCounter,
    incoming_bitrate_initialized: bool,
    inter_arrival: InterArrival,
    estimator: OveruseEstimator,
    detector: OveruseDetector,
    ssrcs: HashMap<u32, u64>,
}

impl Default for RemoteBitrateEstimator {
    fn default() -> Self {
        Self::new()
    }
}

impl RemoteBitrateEstimator {
    pub fn new() -> Self {
        Self::with_config(RemoteBitrateEstimatorConfig::default())
            .expect("default config is always valid")
    }

    pub fn with_config(config: RemoteBitrateEstimatorConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            incoming_bitrate: RateCounter::new(config.rate_window_ms, config.rate_scale),
            incoming_bitrate_initialized: true,
            inter_arrival: InterArrival::new(config.group_length_units(), TIMESTAMP_TO_MS),
            estimator: OveruseEstimator::new(),
            detector: OveruseDetector::new(),
            ssrcs: HashMap::new(),
        })
    }

    /// Accounts for one packet's arrival and advances the estimator.
    ///
    /// `abs_send_time` carries only its low 24 bits of meaning, per the
    /// header extension's wire format.
    pub fn add(&mut self, arrival_time_ms: u64, abs_send_time: u32, payload_size: u32, ssrc: u32) {
        let timestamp = RtpTimestamp::new((abs_send_time & 0x00ff_ffff) << 8);

        self.ssrcs.insert(ssrc, arrival_time_ms);

        match self.incoming_bitrate.rate(arrival_time_ms) {
            Some(_) => self.incoming_bitrate_initialized = true,
            None if self.incoming_bitrate_initialized => {
                log::debug!("incoming bitrate counter lost its window, resetting");
                self.incoming_bitrate.reset();
                self.incoming_bitrate_initialized = false;
            }
            None => {}
        }
        self.incoming_bitrate.add(payload_size as u64, arrival_time_ms);

        let Some(delta) = self.inter_arrival.compute_deltas(
            timestamp,
            arrival_time_ms as i64,
            payload_size as i64,
        ) else {
            return;
        };

        let timestamp_delta_ms = (delta.timestamp as f64 * TIMESTAMP_TO_MS).trunc();
        let hypothesis_before = self.detector.state();
        self.estimator.update(
            delta.arrival_time_ms as f64,
            timestamp_delta_ms,
            delta.size as f64,
            hypothesis_before,
        );
        let hypothesis_after = self.detector.detect(
            self.estimator.offset(),
            timestamp_delta_ms,
            self.estimator.num_of_deltas(),
            arrival_time_ms,
        );
        if hypothesis_after != hypothesis_before {
            log::debug!("bandwidth hypothesis {hypothesis_before:?} -> {hypothesis_after:?}");
        }
    }

    pub fn state(&self) -> BandwidthUsage {
        self.detector.state()
    }

    pub fn offset(&self) -> f64 {
        self.estimator.offset()
    }

    pub fn num_of_deltas(&self) -> u32 {
        self.estimator.num_of_deltas()
    }

    pub fn incoming_bitrate(&mut self, now_ms: u64) -> Option<DataRate> {
        self.incoming_bitrate.rate(now_ms)
    }

    /// SSRCs seen so far and the arrival time (ms) of their most recent
    /// packet.
    pub fn ssrcs(&self) -> impl Iterator<Item = (u32, u64)> + '_ {
        self.ssrcs.iter().map(|(&ssrc, &ms)| (ssrc, ms))
    }
}
