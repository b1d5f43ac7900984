// Error types for the mpv bridge
//
// This module defines the error types for engine and data source operations,
// providing structured error handling with numeric codes that stay stable
// across the native boundary.

mod data_source;
mod engine;

pub use data_source::{log_data_source_error, DataSourceError, DataSourceErrorCodes};
pub use engine::{check, log_engine_error, status, MpvError, MpvErrorCodes};

/// Error codes for structured error reporting
///
/// This trait provides a standard way to get error codes and messages
/// from custom error types, enabling consistent error handling across
/// the FFI boundary.
pub trait ErrorCode {
    /// Get the numeric error code
    fn code(&self) -> i32;

    /// Get the human-readable error message
    fn message(&self) -> String;
}
