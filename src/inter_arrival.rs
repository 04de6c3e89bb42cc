//! Groups packets into short "timestamp groups" and emits the inter-group
//! deltas the Kalman filter in `overuse_estimator` consumes.
//!
//! Ported from this codebase's webrtc.org lineage
//! (`modules/remote_bitrate_estimator/inter_arrival`), the classic
//! abs-send-time variant that reasons in 32-bit modular RTP-timestamp
//! units rather than the newer `Timestamp`/`TimeDelta` microsecond domain
//! used by the trendline-based estimator shipped alongside it.

use crate::timestamp::RtpTimestamp;

/// A packet whose inter-timestamp-group delta is less than this (in ms) is
/// considered part of the same burst as the group it is "catching up" to.
pub const BURST_DELTA_THRESHOLD_MS: i64 = 5;

#[derive(Debug, Clone)]
struct TimestampGroup {
    first_timestamp: RtpTimestamp,
    last_timestamp: RtpTimestamp,
    arrival_time_ms: Option<i64>,
    size: i64,
}

impl TimestampGroup {
    fn new(timestamp: RtpTimestamp) -> Self {
        Self {
            first_timestamp: timestamp,
            last_timestamp: timestamp,
            arrival_time_ms: None,
            size: 0,
        }
    }
}

/// The (timestamp-delta, arrival-delta, size-delta) triple measured between
/// two consecutive timestamp groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterArrivalDelta {
    pub timestamp: u32,
    pub arrival_time_ms: i64,
    pub size: i64,
}

/// Inter-arrival time and size filter.
pub struct InterArrival {
    group_length: u32,
    timestamp_to_ms: f64,
    current_group: Option<TimestampGroup>,
    previous_group: Option<TimestampGroup>,
}

impl InterArrival {
    pub fn new(group_length: u32, timestamp_to_ms: f64) -> Self {
        Self {
            group_length,
            timestamp_to_ms,
            current_group: None,
            previous_group: None,
        }
    }

    /// Accounts for one packet's arrival, returning the inter-group delta
    /// if this packet closed out a group.
    pub fn compute_deltas(
        &mut self,
        timestamp: RtpTimestamp,
        arrival_time_ms: i64,
        packet_size: i64,
    ) -> Option<InterArrivalDelta> {
        let mut deltas = None;

        if self.current_group.is_none() {
            self.current_group = Some(TimestampGroup::new(timestamp));
        } else if self.packet_out_of_order(timestamp) {
            log::trace!("dropping out-of-order packet (send timestamp {})", timestamp.0);
            return None;
        } else if self.new_timestamp_group(timestamp, arrival_time_ms) {
            let current = self.current_group.as_ref().unwrap();
            if let Some(previous) = &self.previous_group {
                deltas = Some(InterArrivalDelta {
                    timestamp: current.last_timestamp.wrapping_sub(previous.last_timestamp),
                    arrival_time_ms: current.arrival_time_ms.unwrap()
                        - previous.arrival_time_ms.unwrap(),
                    size: current.size - previous.size,
                });
            }
            self.previous_group = self.current_group.take();
            self.current_group = Some(TimestampGroup::new(timestamp));
        } else if let Some(current) = &mut self.current_group {
            if timestamp.modular_gt(current.last_timestamp) {
                current.last_timestamp = timestamp;
            }
        }

        let current = self.current_group.as_mut().unwrap();
        current.size += packet_size;
        current.arrival_time_ms = Some(arrival_time_ms);

        deltas
    }

    fn belongs_to_burst(&self, timestamp: RtpTimestamp, arrival_time_ms: i64) -> bool {
        let current = self.current_group.as_ref().unwrap();
        let Some(group_arrival_time_ms) = current.arrival_time_ms else {
            return false;
        };
        let timestamp_delta = timestamp.wrapping_sub(current.last_timestamp);
        let timestamp_delta_ms = (self.timestamp_to_ms * timestamp_delta as f64).round() as i64;
        if timestamp_delta_ms == 0 {
            return true;
        }
        let arrival_time_delta_ms = arrival_time_ms - group_arrival_time_ms;
        arrival_time_delta_ms < timestamp_delta_ms
            && arrival_time_delta_ms <= BURST_DELTA_THRESHOLD_MS
    }

    fn new_timestamp_group(&self, timestamp: RtpTimestamp, arrival_time_ms: i64) -> bool {
        if self.belongs_to_burst(timestamp, arrival_time_ms) {
            false
        } else {
            let current = self.current_group.as_ref().unwrap();
            let timestamp_delta = timestamp.wrapping_sub(current.first_timestamp);
            timestamp_delta > self.group_length
        }
    }

    fn packet_out_of_order(&self, timestamp: RtpTimestamp) -> bool {
        let current = self.current_group.as_ref().unwrap();
        timestamp.is_out_of_order_after(current.first_timestamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group_length_units() -> u32 {
        // 5 ms expressed in 1/2^26 s units, as the abs-send-time facade does.
        ((5u64 << 26) / 1000) as u32
    }
    const TIMESTAMP_TO_MS: f64 = 1000.0 / (1u64 << 26) as f64;

    /// Builds a 32-bit send timestamp for a virtual millisecond count that
    /// may run past the ~64 s wraparound point; the cast to `u32` truncates
    /// to the low 32 bits, i.e. reduces mod 2^32, exactly like the real
    /// wire value would.
    fn send_units(ms: i64) -> RtpTimestamp {
        RtpTimestamp::new((((ms as i128) << 26) / 1000) as u64 as u32)
    }

    #[test]
    fn single_packet_never_emits_a_delta() {
        let mut ia = InterArrival::new(group_length_units(), TIMESTAMP_TO_MS);
        let delta = ia.compute_deltas(send_units(0), 0, 500);
        assert!(delta.is_none());
    }

    #[test]
    fn two_packets_same_group_never_emit_a_delta() {
        let mut ia = InterArrival::new(group_length_units(), TIMESTAMP_TO_MS);
        assert!(ia.compute_deltas(send_units(0), 0, 500).is_none());
        assert!(ia.compute_deltas(send_units(2), 2, 500).is_none());
    }

    #[test]
    fn three_packets_each_6ms_apart_emit_exactly_one_delta() {
        // Three singleton groups, each 6 ms after the last: the third
        // packet's arrival closes the first group against the second.
        let mut ia = InterArrival::new(group_length_units(), TIMESTAMP_TO_MS);
        assert!(ia.compute_deltas(send_units(0), 0, 500).is_none());
        assert!(ia.compute_deltas(send_units(6), 6, 500).is_none());
        let delta = ia.compute_deltas(send_units(12), 12, 500);
        assert!(delta.is_some());
    }

    #[test]
    fn burst_coalesces_into_one_group() {
        let mut ia = InterArrival::new(group_length_units(), TIMESTAMP_TO_MS);
        let mut last_delta = None;
        for i in 0..5u64 {
            last_delta = ia.compute_deltas(send_units(0), i as i64, 200);
        }
        assert!(last_delta.is_none());
    }

    #[test]
    fn out_of_order_packet_is_dropped() {
        // p1(ts=1000ms), p2(ts=1200ms), p3(ts=900ms, behind p1): p3 must be
        // silently discarded, leaving state identical to having only fed
        // p1 and p2.
        let mut with_p3 = InterArrival::new(group_length_units(), TIMESTAMP_TO_MS);
        with_p3.compute_deltas(send_units(1000), 1000, 500);
        with_p3.compute_deltas(send_units(1200), 1200, 500);
        let delta = with_p3.compute_deltas(send_units(900), 900, 500);
        assert!(delta.is_none());

        let mut without_p3 = InterArrival::new(group_length_units(), TIMESTAMP_TO_MS);
        without_p3.compute_deltas(send_units(1000), 1000, 500);
        without_p3.compute_deltas(send_units(1200), 1200, 500);

        assert_eq!(
            with_p3.current_group.unwrap().size,
            without_p3.current_group.unwrap().size
        );
        assert_eq!(
            with_p3.previous_group.is_some(),
            without_p3.previous_group.is_some()
        );
    }

    #[test]
    fn wraparound_produces_positive_deltas() {
        // Three singleton groups, each 6 ms apart, straddling the ~64 s
        // 32-bit rollover. The non-wrapped equivalent of this is exactly
        // `three_packets_each_6ms_apart_emit_exactly_one_delta`.
        let mut ia = InterArrival::new(group_length_units(), TIMESTAMP_TO_MS);
        let t1 = send_units(64_045);
        let t2 = send_units(64_051);
        let t3 = send_units(64_057);

        assert!(ia.compute_deltas(t1, 64_045, 500).is_none());
        assert!(ia.compute_deltas(t2, 64_051, 500).is_none());
        let delta = ia.compute_deltas(t3, 64_057, 500).unwrap();

        // (t2 - t1) mod 2^32: positive and small, even though the raw u32
        // values themselves straddle the wraparound point.
        assert_eq!(delta.timestamp, t2.wrapping_sub(t1));
        assert_eq!(delta.arrival_time_ms, 6);
        assert!((delta.timestamp as i64) < 10 * group_length_units() as i64);
    }
}
