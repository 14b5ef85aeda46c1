//! Error types for the watcher.
//!
//! Module-level errors (`ConfigError`, `DeliveryError`) stay close to the
//! code that raises them; this module rolls them up into the crate-wide
//! [`MonitorError`] used at the binary boundary.

use thiserror::Error;

use crate::config::ConfigError;
use crate::dispatch::DeliveryError;

/// Errors that can occur while assembling or running the watcher.
#[derive(Error, Debug)]
pub enum MonitorError {
    /// Configuration-related error.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// File system I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Notification delivery error.
    #[error("delivery error: {0}")]
    Delivery(#[from] DeliveryError),
}

/// A specialized `Result` type for watcher operations.
pub type Result<T> = std::result::Result<T, MonitorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_conversion() {
        let err: MonitorError = ConfigError::NoHomeDirectory.into();
        assert!(matches!(err, MonitorError::Config(_)));
        assert_eq!(
            err.to_string(),
            "configuration error: could not determine the home directory"
        );
    }

    #[test]
    fn io_error_conversion_preserves_source() {
        use std::error::Error;

        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "log file vanished");
        let err: MonitorError = io_err.into();
        assert!(matches!(err, MonitorError::Io(_)));
        assert!(err.source().is_some());
    }

    #[test]
    fn delivery_error_conversion() {
        let err: MonitorError = DeliveryError::AuthFailed.into();
        assert_eq!(
            err.to_string(),
            "delivery error: push endpoint rejected the token"
        );
    }

    #[test]
    fn result_alias_works() {
        fn ok() -> Result<u32> {
            Ok(7)
        }
        assert_eq!(ok().unwrap(), 7);
    }
}
