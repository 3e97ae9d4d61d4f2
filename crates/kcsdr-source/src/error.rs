//! Error types for the acquisition source.

use thiserror::Error;

/// Result type alias for source operations.
pub type Result<T> = std::result::Result<T, SourceError>;

/// Errors surfaced to the control surface and the host.
///
/// A transient read miss is deliberately absent: the device reports it by
/// returning `false` from `read`, and the acquisition loop absorbs it.
#[derive(Error, Debug)]
pub enum SourceError {
    /// No attached device matches the requested id. Re-list and retry.
    #[error("Device '{id}' not found")]
    DeviceNotFound { id: String },

    /// A setpoint or tune command was issued with no device selected.
    #[error("Invalid configuration: {message}")]
    InvalidConfiguration { message: String },

    /// A configuration value is out of its valid domain.
    #[error("Bad configuration value: {message}")]
    BadConfigValue { message: String },

    /// The operation needs an idle source.
    #[error("Source '{name}' is busy (acquisition running)")]
    DeviceBusy { name: String },

    /// The device driver reported a failure.
    #[error("Hardware error: {message}")]
    Hardware { message: String },

    /// The consuming pipeline has been torn down.
    #[error("Consumer closed")]
    ConsumerClosed,

    /// Reads kept missing past the configured escalation limit.
    #[error("Device read stalled after {misses} consecutive misses")]
    ReadStalled { misses: u64 },

    /// I/O error from the operating system (thread spawn)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SourceError {
    pub(crate) fn no_device(operation: &str) -> Self {
        Self::InvalidConfiguration {
            message: format!("{operation} requires a selected device"),
        }
    }

    /// Check if this is a "device not found" error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::DeviceNotFound { .. })
    }

    /// Check if this is a recoverable configuration error.
    pub fn is_invalid_configuration(&self) -> bool {
        matches!(self, Self::InvalidConfiguration { .. })
    }

    /// Check if a configuration value was rejected.
    pub fn is_bad_config_value(&self) -> bool {
        matches!(self, Self::BadConfigValue { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SourceError::DeviceNotFound {
            id: "KC0001".to_string(),
        };
        assert!(err.to_string().contains("KC0001"));
        assert!(err.is_not_found());

        let err = SourceError::ReadStalled { misses: 42 };
        assert!(err.to_string().contains("42"));
    }

    #[test]
    fn test_bad_config_value_is_distinct() {
        let err = SourceError::BadConfigValue {
            message: "block_samples must be greater than 0".to_string(),
        };
        assert!(err.is_bad_config_value());
        assert!(!err.is_invalid_configuration());
        assert!(err.to_string().starts_with("Bad configuration value"));
        assert!(!SourceError::no_device("tune").is_bad_config_value());
    }

    #[test]
    fn test_no_device_is_invalid_configuration() {
        let err = SourceError::no_device("tune");
        assert!(err.is_invalid_configuration());
        assert!(err.to_string().contains("tune"));
    }
}
