use thiserror::Error;

/// Rejected at construction time; `RemoteBitrateEstimator::add` itself is
/// total and never fails.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("rate counter window size must be greater than zero")]
    WindowSizeZero,
    #[error("rate counter scale must be greater than zero")]
    ScaleZero,
    #[error("timestamp group length must be greater than zero")]
    GroupLengthZero,
}
