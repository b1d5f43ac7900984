// Data source error types and constants

use std::fmt;
use std::io;

use log::error;

use crate::error::ErrorCode;

/// Data source error code constants.
///
/// Error code range: 3001-3009
pub struct DataSourceErrorCodes {}

impl DataSourceErrorCodes {
    /// Underlying I/O failed
    pub const IO: i32 = 3001;

    /// `cancel()` was requested on the handle
    pub const CANCELLED: i32 = 3002;

    /// Operation issued after `close()`
    pub const CLOSED: i32 = 3003;

    /// Seek target outside the addressable range
    pub const SEEK_OUT_OF_RANGE: i32 = 3004;

    /// Backend cannot report a total length
    pub const SIZE_UNKNOWN: i32 = 3005;

    /// A `datasource://` URI was resolved before any factory was registered
    pub const FACTORY_NOT_REGISTERED: i32 = 3006;

    /// A factory is already registered for this scope
    pub const FACTORY_ALREADY_REGISTERED: i32 = 3007;

    /// URI does not carry the data source scheme
    pub const INVALID_URI: i32 = 3008;

    /// The factory has no resource for the locator
    pub const NOT_FOUND: i32 = 3009;
}

/// Log a data source error with structured context
pub fn log_data_source_error(err: &DataSourceError, context: &str) {
    error!(
        "Data source error in {}: code={}, component=DataSource, message={}",
        context,
        err.code(),
        err.message()
    );
}

/// Errors raised by data source backends and the factory registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataSourceError {
    /// Underlying I/O failed
    Io { kind: io::ErrorKind, details: String },

    /// `cancel()` interrupted the operation
    Cancelled,

    /// The handle was already closed
    Closed,

    /// Seek target beyond the end of the resource
    SeekOutOfRange { offset: u64, size: u64 },

    /// Total length is not known
    SizeUnknown,

    /// No factory registered when a URI had to be resolved
    FactoryNotRegistered,

    /// A factory was already registered
    FactoryAlreadyRegistered,

    /// URI is missing the scheme prefix
    InvalidUri { uri: String },

    /// Factory has nothing for this locator
    NotFound { locator: String },
}

impl DataSourceError {
    /// True for configuration errors that must not be retried.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            DataSourceError::FactoryNotRegistered | DataSourceError::FactoryAlreadyRegistered
        )
    }
}

impl ErrorCode for DataSourceError {
    fn code(&self) -> i32 {
        match self {
            DataSourceError::Io { .. } => DataSourceErrorCodes::IO,
            DataSourceError::Cancelled => DataSourceErrorCodes::CANCELLED,
            DataSourceError::Closed => DataSourceErrorCodes::CLOSED,
            DataSourceError::SeekOutOfRange { .. } => DataSourceErrorCodes::SEEK_OUT_OF_RANGE,
            DataSourceError::SizeUnknown => DataSourceErrorCodes::SIZE_UNKNOWN,
            DataSourceError::FactoryNotRegistered => DataSourceErrorCodes::FACTORY_NOT_REGISTERED,
            DataSourceError::FactoryAlreadyRegistered => {
                DataSourceErrorCodes::FACTORY_ALREADY_REGISTERED
            }
            DataSourceError::InvalidUri { .. } => DataSourceErrorCodes::INVALID_URI,
            DataSourceError::NotFound { .. } => DataSourceErrorCodes::NOT_FOUND,
        }
    }

    fn message(&self) -> String {
        match self {
            DataSourceError::Io { kind, details } => format!("I/O error ({:?}): {}", kind, details),
            DataSourceError::Cancelled => "operation cancelled".to_string(),
            DataSourceError::Closed => "data source already closed".to_string(),
            DataSourceError::SeekOutOfRange { offset, size } => {
                format!("seek to {} outside resource of {} bytes", offset, size)
            }
            DataSourceError::SizeUnknown => "size of the resource is unknown".to_string(),
            DataSourceError::FactoryNotRegistered => {
                "No data source factory registered. Call set_data_source_factory() first."
                    .to_string()
            }
            DataSourceError::FactoryAlreadyRegistered => {
                "A data source factory is already registered".to_string()
            }
            DataSourceError::InvalidUri { uri } => format!("not a data source URI: {}", uri),
            DataSourceError::NotFound { locator } => format!("no resource for locator {}", locator),
        }
    }
}

impl fmt::Display for DataSourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "DataSourceError::{:?} (code {}): {}",
            self,
            self.code(),
            self.message()
        )
    }
}

impl std::error::Error for DataSourceError {}

/// Convert from std::io::Error to DataSourceError
impl From<io::Error> for DataSourceError {
    fn from(err: io::Error) -> Self {
        DataSourceError::Io {
            kind: err.kind(),
            details: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_source_error_codes() {
        assert_eq!(DataSourceError::Cancelled.code(), 3002);
        assert_eq!(DataSourceError::Closed.code(), 3003);
        assert_eq!(
            DataSourceError::SeekOutOfRange { offset: 5, size: 4 }.code(),
            3004
        );
        assert_eq!(DataSourceError::FactoryNotRegistered.code(), 3006);
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "missing file");
        let err: DataSourceError = io_err.into();

        match err {
            DataSourceError::Io { kind, details } => {
                assert_eq!(kind, io::ErrorKind::NotFound);
                assert!(details.contains("missing file"));
            }
            _ => panic!("Expected Io variant"),
        }
    }

    #[test]
    fn test_configuration_classification() {
        assert!(DataSourceError::FactoryNotRegistered.is_configuration());
        assert!(!DataSourceError::Cancelled.is_configuration());
    }

    #[test]
    fn test_message_mentions_registration_call() {
        let msg = DataSourceError::FactoryNotRegistered.message();
        assert!(msg.contains("set_data_source_factory"));
    }
}
