//! Error types for policy loading and workload termination.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("unknown tier: {0}")]
    UnknownTier(String),

    #[error("tier {0} is listed in more than one cap pool")]
    DuplicateTier(String),

    #[error("cap pool {0:?} has no tiers")]
    EmptyPool(String),

    #[error("classification rule for tier {0} has an empty pattern")]
    EmptyPattern(String),

    #[error("policy TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("policy io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure reported by a termination capability for one identity.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TerminationError {
    #[error("termination failed: {0}")]
    Failed(String),

    #[error("termination timed out after {0}ms")]
    TimedOut(u64),
}
