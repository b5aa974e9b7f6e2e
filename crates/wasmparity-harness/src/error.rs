use thiserror::Error;

use crate::config::ConfigError;
use crate::discovery::DiscoveryError;
use crate::results::AggregateError;
use crate::staging::StagingError;

/// Errors that abort a run. Per-test toolchain failures never surface here;
/// they become verdicts.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("contract violation: {0}")]
    Contract(String),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Discovery(#[from] DiscoveryError),
    #[error("run setup failed: {0}")]
    Setup(#[source] StagingError),
    #[error(transparent)]
    Aggregate(#[from] AggregateError),
    #[error("invalid reference pattern: {0}")]
    Pattern(#[from] regex::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
