//! Error types for Spotwise

use thiserror::Error;

/// Core result type for fleet operations
pub type Result<T> = std::result::Result<T, FleetError>;

/// Errors that can occur while driving the fleet
#[derive(Error, Debug)]
pub enum FleetError {
    /// Cloud provider rejected or failed an operation
    #[error("Provider error: {0}")]
    Provider(String),

    /// Performance/accounting store error
    #[error("Store error: {0}")]
    Store(String),

    /// No price sample exists for a (type, zone) pair
    #[error("No price available for {instance_type} in {zone}")]
    PriceUnavailable {
        /// Worker type queried
        instance_type: String,
        /// Availability zone queried
        zone: String,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl FleetError {
    /// Create a provider error from any displayable source
    pub fn provider(msg: impl std::fmt::Display) -> Self {
        Self::Provider(msg.to_string())
    }

    /// Create a store error
    pub fn store(msg: impl std::fmt::Display) -> Self {
        Self::Store(msg.to_string())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}
