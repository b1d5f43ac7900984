//! Event identifiers and payloads delivered from the engine.
//!
//! Numeric values of [`EventId`], [`EndFileReason`] and [`LogLevel`] are the
//! engine's own and must stay stable.

use serde::{Deserialize, Serialize};

use crate::error::MpvError;
use crate::property::{Format, Node};

/// Engine event identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum EventId {
    None = 0,
    Shutdown = 1,
    LogMessage = 2,
    GetPropertyReply = 3,
    SetPropertyReply = 4,
    CommandReply = 5,
    StartFile = 6,
    EndFile = 7,
    FileLoaded = 8,
    ClientMessage = 16,
    VideoReconfig = 17,
    AudioReconfig = 18,
    Seek = 20,
    PlaybackRestart = 21,
    PropertyChange = 22,
    QueueOverflow = 24,
    Hook = 25,
}

impl EventId {
    pub const ALL: [EventId; 17] = [
        EventId::None,
        EventId::Shutdown,
        EventId::LogMessage,
        EventId::GetPropertyReply,
        EventId::SetPropertyReply,
        EventId::CommandReply,
        EventId::StartFile,
        EventId::EndFile,
        EventId::FileLoaded,
        EventId::ClientMessage,
        EventId::VideoReconfig,
        EventId::AudioReconfig,
        EventId::Seek,
        EventId::PlaybackRestart,
        EventId::PropertyChange,
        EventId::QueueOverflow,
        EventId::Hook,
    ];

    /// Map a raw id. Deprecated ids (IDLE=11, TICK=14) and unknown values
    /// yield `None`.
    pub fn from_raw(raw: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|id| *id as i32 == raw)
    }

    pub fn as_raw(self) -> i32 {
        self as i32
    }

    /// Engine-style event name, e.g. `end-file`.
    pub fn name(self) -> &'static str {
        match self {
            EventId::None => "none",
            EventId::Shutdown => "shutdown",
            EventId::LogMessage => "log-message",
            EventId::GetPropertyReply => "get-property-reply",
            EventId::SetPropertyReply => "set-property-reply",
            EventId::CommandReply => "command-reply",
            EventId::StartFile => "start-file",
            EventId::EndFile => "end-file",
            EventId::FileLoaded => "file-loaded",
            EventId::ClientMessage => "client-message",
            EventId::VideoReconfig => "video-reconfig",
            EventId::AudioReconfig => "audio-reconfig",
            EventId::Seek => "seek",
            EventId::PlaybackRestart => "playback-restart",
            EventId::PropertyChange => "property-change",
            EventId::QueueOverflow => "event-queue-overflow",
            EventId::Hook => "hook",
        }
    }
}

/// Why playback of a file ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(i32)]
pub enum EndFileReason {
    Eof = 0,
    Stop = 2,
    Quit = 3,
    Error = 4,
    Redirect = 5,
}

impl EndFileReason {
    pub fn from_raw(raw: i32) -> Option<Self> {
        match raw {
            0 => Some(EndFileReason::Eof),
            2 => Some(EndFileReason::Stop),
            3 => Some(EndFileReason::Quit),
            4 => Some(EndFileReason::Error),
            5 => Some(EndFileReason::Redirect),
            _ => None,
        }
    }

    pub fn as_raw(self) -> i32 {
        self as i32
    }
}

/// Engine log verbosity; larger values are more verbose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(i32)]
pub enum LogLevel {
    None = 0,
    Fatal = 10,
    Error = 20,
    Warn = 30,
    Info = 40,
    V = 50,
    Debug = 60,
    Trace = 70,
}

impl LogLevel {
    pub const ALL: [LogLevel; 8] = [
        LogLevel::None,
        LogLevel::Fatal,
        LogLevel::Error,
        LogLevel::Warn,
        LogLevel::Info,
        LogLevel::V,
        LogLevel::Debug,
        LogLevel::Trace,
    ];

    pub fn from_raw(raw: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|level| *level as i32 == raw)
    }

    pub fn as_raw(self) -> i32 {
        self as i32
    }

    /// Name understood by the engine's `request_log_messages`.
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::None => "no",
            LogLevel::Fatal => "fatal",
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::V => "v",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|level| level.as_str() == name)
    }
}

/// Value slot of a property change; populated according to its format.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum PropertyValue {
    None,
    Long(i64),
    Flag(bool),
    Double(f64),
    Str(String),
}

/// Notification for a watched property.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PropertyChange {
    pub name: String,
    pub format: Format,
    pub token: u64,
    pub value: PropertyValue,
}

impl PropertyChange {
    /// Build a notification from the engine's node payload. Formats without
    /// a scalar slot (and values that do not match the format) leave the
    /// slot empty.
    pub fn from_node(name: impl Into<String>, format: Format, token: u64, node: &Node) -> Self {
        let value = match (format, node) {
            (Format::Flag, Node::Flag(v)) => PropertyValue::Flag(*v),
            (Format::Int64, Node::Int64(v)) => PropertyValue::Long(*v),
            (Format::Double, Node::Double(v)) => PropertyValue::Double(*v),
            (Format::String | Format::OsdString, Node::String(v)) => PropertyValue::Str(v.clone()),
            (Format::None, _) => PropertyValue::None,
            (other, _) => {
                tracing::trace!(
                    format = ?other,
                    "property update format without a value slot"
                );
                PropertyValue::None
            }
        };
        Self {
            name: name.into(),
            format,
            token,
            value,
        }
    }

    pub fn long_val(&self) -> i64 {
        match self.value {
            PropertyValue::Long(v) => v,
            _ => 0,
        }
    }

    pub fn bool_val(&self) -> bool {
        matches!(self.value, PropertyValue::Flag(true))
    }

    pub fn double_val(&self) -> f64 {
        match self.value {
            PropertyValue::Double(v) => v,
            _ => 0.0,
        }
    }

    pub fn str_val(&self) -> Option<&str> {
        match &self.value {
            PropertyValue::Str(v) => Some(v),
            _ => None,
        }
    }
}

/// END_FILE payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EndFile {
    pub reason: EndFileReason,
    /// Set when `reason` is `Error`
    pub error: Option<MpvError>,
    pub token: u64,
}

/// Asynchronous outcome of a command accepted by `command_with_token`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandReply {
    pub token: u64,
    pub result: Result<(), MpvError>,
}

/// One engine log line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LogLine {
    pub prefix: String,
    pub level: LogLevel,
    pub text: String,
}

impl LogLine {
    pub fn new(prefix: impl Into<String>, level: LogLevel, text: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            level,
            text: text.into(),
        }
    }

    /// Build a log line from raw engine bytes. Lines that are not valid
    /// UTF-8 are dropped.
    pub fn from_raw_bytes(prefix: &[u8], level: i32, text: &[u8]) -> Option<Self> {
        let text = std::str::from_utf8(text).ok()?;
        let prefix = String::from_utf8_lossy(prefix);
        let level = LogLevel::from_raw(level).unwrap_or(LogLevel::Trace);
        Some(Self::new(prefix, level, text))
    }
}

/// Owned event as delivered through an `EventSubscription`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Event {
    Basic { id: EventId, token: u64 },
    PropertyChange(PropertyChange),
    EndFile(EndFile),
    CommandReply(CommandReply),
    Log(LogLine),
}

impl Event {
    pub fn id(&self) -> EventId {
        match self {
            Event::Basic { id, .. } => *id,
            Event::PropertyChange(_) => EventId::PropertyChange,
            Event::EndFile(_) => EventId::EndFile,
            Event::CommandReply(_) => EventId::CommandReply,
            Event::Log(_) => EventId::LogMessage,
        }
    }
}
