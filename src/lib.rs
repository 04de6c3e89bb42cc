//! Receive-side bandwidth estimator for the abs-send-time RTP header
//! extension.
//!
//! Ported from the webrtc.org `modules/remote_bitrate_estimator` tree: a
//! Kalman-filtered delay-gradient estimator feeding a hysteretic,
//! self-tuning overuse detector, fed in turn by an inter-arrival grouping
//! stage that reasons about 32-bit wrap-around RTP timestamps. This crate
//! is a pure measurement component, classifying the network path as
//! `Normal`, `Underusing` or `Overusing` and tracks an incoming-bitrate
//! estimate; it does not pick a send-side target bitrate or emit feedback
//! messages.
//!
//! [`RemoteBitrateEstimator`] is the entry point: feed it packet arrivals
//! with [`RemoteBitrateEstimator::add`] and read back its hypothesis with
//! [`RemoteBitrateEstimator::state`].

mod bandwidth_usage;
mod data_rate;
mod error;
mod inter_arrival;
mod overuse_detector;
mod overuse_estimator;
mod rate_counter;
mod remote_bitrate_estimator;
#[cfg(test)]
mod test_support;
mod timestamp;

pub use bandwidth_usage::BandwidthUsage;
pub use data_rate::DataRate;
pub use error::ConfigError;
pub use remote_bitrate_estimator::{RemoteBitrateEstimator, RemoteBitrateEstimatorConfig};
