// Engine error types and constants

use std::fmt;

use log::error;
use serde::Serialize;

use crate::error::ErrorCode;

/// Engine error code constants shared with the native side.
///
/// Values -1..-20 mirror the engine's own enumeration; `CONTEXT_CLOSED`
/// belongs to the boundary and is never produced by the engine itself.
pub struct MpvErrorCodes {}

impl MpvErrorCodes {
    pub const SUCCESS: i32 = 0;
    pub const EVENT_QUEUE_FULL: i32 = -1;
    pub const NOMEM: i32 = -2;
    pub const UNINITIALIZED: i32 = -3;
    pub const INVALID_PARAMETER: i32 = -4;
    pub const OPTION_NOT_FOUND: i32 = -5;
    pub const OPTION_FORMAT: i32 = -6;
    pub const OPTION_ERROR: i32 = -7;
    pub const PROPERTY_NOT_FOUND: i32 = -8;
    pub const PROPERTY_FORMAT: i32 = -9;
    pub const PROPERTY_UNAVAILABLE: i32 = -10;
    pub const PROPERTY_ERROR: i32 = -11;
    pub const COMMAND: i32 = -12;
    pub const LOADING_FAILED: i32 = -13;
    pub const AO_INIT_FAILED: i32 = -14;
    pub const VO_INIT_FAILED: i32 = -15;
    pub const NOTHING_TO_PLAY: i32 = -16;
    pub const UNKNOWN_FORMAT: i32 = -17;
    pub const UNSUPPORTED: i32 = -18;
    pub const NOT_IMPLEMENTED: i32 = -19;
    pub const GENERIC: i32 = -20;

    /// The handle was used after `destroy`
    pub const CONTEXT_CLOSED: i32 = -1000;
}

/// Failure reasons reported by engine operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum MpvError {
    EventQueueFull,
    NoMemory,
    Uninitialized,
    InvalidParameter,
    OptionNotFound,
    OptionFormat,
    OptionError,
    PropertyNotFound,
    PropertyFormat,
    PropertyUnavailable,
    PropertyError,
    Command,
    LoadingFailed,
    AoInitFailed,
    VoInitFailed,
    NothingToPlay,
    UnknownFormat,
    Unsupported,
    NotImplemented,
    Generic,
    /// Operation issued on a handle after `destroy`
    ContextClosed,
    /// A negative code this crate does not know about
    Unknown { code: i32 },
}

impl MpvError {
    /// Every known variant, in code order. Used for code tables.
    pub const ALL: [MpvError; 21] = [
        MpvError::EventQueueFull,
        MpvError::NoMemory,
        MpvError::Uninitialized,
        MpvError::InvalidParameter,
        MpvError::OptionNotFound,
        MpvError::OptionFormat,
        MpvError::OptionError,
        MpvError::PropertyNotFound,
        MpvError::PropertyFormat,
        MpvError::PropertyUnavailable,
        MpvError::PropertyError,
        MpvError::Command,
        MpvError::LoadingFailed,
        MpvError::AoInitFailed,
        MpvError::VoInitFailed,
        MpvError::NothingToPlay,
        MpvError::UnknownFormat,
        MpvError::Unsupported,
        MpvError::NotImplemented,
        MpvError::Generic,
        MpvError::ContextClosed,
    ];

    /// Map a native status code to an error. Returns `None` for success
    /// (zero or any positive value).
    pub fn from_code(code: i32) -> Option<Self> {
        let err = match code {
            c if c >= 0 => return None,
            MpvErrorCodes::EVENT_QUEUE_FULL => MpvError::EventQueueFull,
            MpvErrorCodes::NOMEM => MpvError::NoMemory,
            MpvErrorCodes::UNINITIALIZED => MpvError::Uninitialized,
            MpvErrorCodes::INVALID_PARAMETER => MpvError::InvalidParameter,
            MpvErrorCodes::OPTION_NOT_FOUND => MpvError::OptionNotFound,
            MpvErrorCodes::OPTION_FORMAT => MpvError::OptionFormat,
            MpvErrorCodes::OPTION_ERROR => MpvError::OptionError,
            MpvErrorCodes::PROPERTY_NOT_FOUND => MpvError::PropertyNotFound,
            MpvErrorCodes::PROPERTY_FORMAT => MpvError::PropertyFormat,
            MpvErrorCodes::PROPERTY_UNAVAILABLE => MpvError::PropertyUnavailable,
            MpvErrorCodes::PROPERTY_ERROR => MpvError::PropertyError,
            MpvErrorCodes::COMMAND => MpvError::Command,
            MpvErrorCodes::LOADING_FAILED => MpvError::LoadingFailed,
            MpvErrorCodes::AO_INIT_FAILED => MpvError::AoInitFailed,
            MpvErrorCodes::VO_INIT_FAILED => MpvError::VoInitFailed,
            MpvErrorCodes::NOTHING_TO_PLAY => MpvError::NothingToPlay,
            MpvErrorCodes::UNKNOWN_FORMAT => MpvError::UnknownFormat,
            MpvErrorCodes::UNSUPPORTED => MpvError::Unsupported,
            MpvErrorCodes::NOT_IMPLEMENTED => MpvError::NotImplemented,
            MpvErrorCodes::GENERIC => MpvError::Generic,
            MpvErrorCodes::CONTEXT_CLOSED => MpvError::ContextClosed,
            other => MpvError::Unknown { code: other },
        };
        Some(err)
    }

    /// True for the two codes a property read reports as "absent".
    pub fn is_absent(&self) -> bool {
        matches!(
            self,
            MpvError::PropertyNotFound | MpvError::PropertyUnavailable
        )
    }
}

/// Convert a raw native status into a `Result`.
pub fn check(code: i32) -> Result<(), MpvError> {
    match MpvError::from_code(code) {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

/// Convert a `Result` back into the flat status code used on the wire.
pub fn status<T>(result: &Result<T, MpvError>) -> i32 {
    match result {
        Ok(_) => MpvErrorCodes::SUCCESS,
        Err(err) => err.code(),
    }
}

/// Log an engine error with structured context
///
/// The logging is non-blocking and will not panic on failure.
pub fn log_engine_error(err: &MpvError, context: &str) {
    error!(
        "Engine error in {}: code={}, component=EngineHandle, message={}",
        context,
        err.code(),
        err.message()
    );
}

impl ErrorCode for MpvError {
    fn code(&self) -> i32 {
        match self {
            MpvError::EventQueueFull => MpvErrorCodes::EVENT_QUEUE_FULL,
            MpvError::NoMemory => MpvErrorCodes::NOMEM,
            MpvError::Uninitialized => MpvErrorCodes::UNINITIALIZED,
            MpvError::InvalidParameter => MpvErrorCodes::INVALID_PARAMETER,
            MpvError::OptionNotFound => MpvErrorCodes::OPTION_NOT_FOUND,
            MpvError::OptionFormat => MpvErrorCodes::OPTION_FORMAT,
            MpvError::OptionError => MpvErrorCodes::OPTION_ERROR,
            MpvError::PropertyNotFound => MpvErrorCodes::PROPERTY_NOT_FOUND,
            MpvError::PropertyFormat => MpvErrorCodes::PROPERTY_FORMAT,
            MpvError::PropertyUnavailable => MpvErrorCodes::PROPERTY_UNAVAILABLE,
            MpvError::PropertyError => MpvErrorCodes::PROPERTY_ERROR,
            MpvError::Command => MpvErrorCodes::COMMAND,
            MpvError::LoadingFailed => MpvErrorCodes::LOADING_FAILED,
            MpvError::AoInitFailed => MpvErrorCodes::AO_INIT_FAILED,
            MpvError::VoInitFailed => MpvErrorCodes::VO_INIT_FAILED,
            MpvError::NothingToPlay => MpvErrorCodes::NOTHING_TO_PLAY,
            MpvError::UnknownFormat => MpvErrorCodes::UNKNOWN_FORMAT,
            MpvError::Unsupported => MpvErrorCodes::UNSUPPORTED,
            MpvError::NotImplemented => MpvErrorCodes::NOT_IMPLEMENTED,
            MpvError::Generic => MpvErrorCodes::GENERIC,
            MpvError::ContextClosed => MpvErrorCodes::CONTEXT_CLOSED,
            MpvError::Unknown { code } => *code,
        }
    }

    fn message(&self) -> String {
        match self {
            MpvError::EventQueueFull => "event queue full".to_string(),
            MpvError::NoMemory => "memory allocation failed".to_string(),
            MpvError::Uninitialized => "the mpv core wasn't configured and initialized yet".to_string(),
            MpvError::InvalidParameter => "invalid parameter".to_string(),
            MpvError::OptionNotFound => "option not found".to_string(),
            MpvError::OptionFormat => "unsupported format for accessing option".to_string(),
            MpvError::OptionError => "error setting option".to_string(),
            MpvError::PropertyNotFound => "property not found".to_string(),
            MpvError::PropertyFormat => "unsupported format for accessing property".to_string(),
            MpvError::PropertyUnavailable => "property unavailable".to_string(),
            MpvError::PropertyError => "error accessing property".to_string(),
            MpvError::Command => "error running command".to_string(),
            MpvError::LoadingFailed => "loading failed".to_string(),
            MpvError::AoInitFailed => "audio output initialization failed".to_string(),
            MpvError::VoInitFailed => "video output initialization failed".to_string(),
            MpvError::NothingToPlay => "no audio or video data played".to_string(),
            MpvError::UnknownFormat => "unrecognized file format".to_string(),
            MpvError::Unsupported => "not supported".to_string(),
            MpvError::NotImplemented => "operation not implemented".to_string(),
            MpvError::Generic => "something happened".to_string(),
            MpvError::ContextClosed => {
                "engine handle already destroyed. Create a new one first.".to_string()
            }
            MpvError::Unknown { code } => format!("unknown error (code {})", code),
        }
    }
}

impl fmt::Display for MpvError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MpvError::{:?} (code {}): {}",
            self,
            self.code(),
            self.message()
        )
    }
}

impl std::error::Error for MpvError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_roundtrip_through_from_code() {
        for err in MpvError::ALL {
            assert_eq!(MpvError::from_code(err.code()), Some(err));
        }
    }

    #[test]
    fn test_native_code_table() {
        assert_eq!(MpvError::EventQueueFull.code(), -1);
        assert_eq!(MpvError::PropertyNotFound.code(), -8);
        assert_eq!(MpvError::PropertyUnavailable.code(), -10);
        assert_eq!(MpvError::LoadingFailed.code(), -13);
        assert_eq!(MpvError::Generic.code(), -20);
        assert_eq!(MpvError::ContextClosed.code(), -1000);
    }

    #[test]
    fn test_success_and_unknown_codes() {
        assert_eq!(MpvError::from_code(0), None);
        assert_eq!(MpvError::from_code(3), None);
        assert_eq!(
            MpvError::from_code(-21),
            Some(MpvError::Unknown { code: -21 })
        );
        assert!(check(0).is_ok());
        assert_eq!(status(&check(-9)), -9);
        assert_eq!(status(&Ok::<_, MpvError>(5u8)), 0);
    }

    #[test]
    fn test_absent_classification() {
        assert!(MpvError::PropertyNotFound.is_absent());
        assert!(MpvError::PropertyUnavailable.is_absent());
        assert!(!MpvError::PropertyFormat.is_absent());
    }

    #[test]
    fn test_display_contains_code() {
        let text = MpvError::ContextClosed.to_string();
        assert!(text.contains("-1000"));
        assert!(text.contains("destroyed"));
    }
}
