//! Configuration errors.
//!
//! Everything that can be rejected at the command boundary (unknown names) or
//! while validating generator parameters ends up as a [`ConfigError`]. Asset
//! and I/O failures use `anyhow` instead and are recovered where they occur.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("unknown scenery `{0}`")]
    UnknownScenery(String),
    #[error("unknown weather `{0}`")]
    UnknownWeather(String),
    #[error("unknown style `{0}` (expected `smooth` or `voxel`)")]
    UnknownStyle(String),
    #[error("unknown event `{0}`")]
    UnknownEvent(String),
    #[error("invalid {field} for {owner}: {reason}")]
    InvalidParameter {
        owner: String,
        field: &'static str,
        reason: String,
    },
    #[error("registry is missing a configuration for {0}")]
    MissingEntry(String),
    #[error("registry has more than one configuration for {0}")]
    DuplicateEntry(String),
}

impl ConfigError {
    pub(crate) fn invalid(owner: impl ToString, field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::InvalidParameter {
            owner: owner.to_string(),
            field,
            reason: reason.into(),
        }
    }
}
