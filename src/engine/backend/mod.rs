//! Backend abstractions for the engine core.
//!
//! A [`NativeBackend`] is the player engine on the other side of the
//! boundary. [`EngineHandle`](crate::engine::EngineHandle) serializes all
//! access to it and drives its event queue from a dedicated thread.

use std::sync::Arc;
use std::time::Duration;

use crate::data_source::StreamHandle;
use crate::engine::thumbnail::Frame;
use crate::error::MpvError;
use crate::events::{CommandReply, EndFile, EventId, LogLevel, LogLine, PropertyChange};
use crate::property::{Format, Node};

/// Payload attached to a native event.
#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    None,
    Log(LogLine),
    Property(PropertyChange),
    EndFile(EndFile),
    CommandReply(CommandReply),
}

/// One entry from the engine's event queue.
#[derive(Debug, Clone, PartialEq)]
pub struct NativeEvent {
    pub id: EventId,
    pub reply_token: u64,
    pub payload: EventPayload,
}

impl NativeEvent {
    /// Timeout or wakeup marker.
    pub fn none() -> Self {
        Self::basic(EventId::None, 0)
    }

    pub fn basic(id: EventId, reply_token: u64) -> Self {
        Self {
            id,
            reply_token,
            payload: EventPayload::None,
        }
    }

    pub fn log(line: LogLine) -> Self {
        Self {
            id: EventId::LogMessage,
            reply_token: 0,
            payload: EventPayload::Log(line),
        }
    }

    pub fn property(change: PropertyChange) -> Self {
        Self {
            id: EventId::PropertyChange,
            reply_token: change.token,
            payload: EventPayload::Property(change),
        }
    }

    pub fn end_file(end: EndFile) -> Self {
        Self {
            id: EventId::EndFile,
            reply_token: end.token,
            payload: EventPayload::EndFile(end),
        }
    }

    pub fn command_reply(reply: CommandReply) -> Self {
        Self {
            id: EventId::CommandReply,
            reply_token: reply.token,
            payload: EventPayload::CommandReply(reply),
        }
    }
}

/// Opens a stream for a URI of a registered protocol. Invoked on the
/// engine's demux thread.
pub type StreamOpener = Arc<dyn Fn(&str) -> Result<Arc<StreamHandle>, MpvError> + Send + Sync>;

/// Trait implemented by player engine backends.
///
/// Mirrors the native client API: options before `initialize`, asynchronous
/// commands answered through COMMAND_REPLY, property access by format, and
/// a pull-based event queue consumed by exactly one thread.
pub trait NativeBackend: Send + Sync {
    fn name(&self) -> &'static str;

    fn initialize(&self) -> Result<(), MpvError>;

    fn set_option(&self, name: &str, value: &Node) -> Result<(), MpvError>;

    /// Validate and queue a command. Its outcome arrives later as a
    /// COMMAND_REPLY carrying `token`.
    fn command_async(&self, token: u64, args: &[&str]) -> Result<(), MpvError>;

    fn get_property(&self, name: &str, format: Format) -> Result<Node, MpvError>;

    fn set_property(&self, name: &str, value: &Node) -> Result<(), MpvError>;

    fn observe_property(&self, token: u64, name: &str, format: Format) -> Result<(), MpvError>;

    fn unobserve_property(&self, token: u64) -> Result<(), MpvError>;

    fn request_log_messages(&self, level: LogLevel) -> Result<(), MpvError>;

    fn register_stream_protocol(&self, scheme: &str, opener: StreamOpener)
        -> Result<(), MpvError>;

    /// Next event, or an `EventId::None` event on timeout or wakeup.
    /// `None` waits indefinitely.
    fn wait_event(&self, timeout: Option<Duration>) -> NativeEvent;

    /// Make a blocked `wait_event` return.
    fn wakeup(&self);

    /// Current video frame, if one is being displayed.
    fn grab_frame(&self) -> Result<Frame, MpvError>;

    /// Stop playback and release native resources. Called once, after the
    /// event thread has exited.
    fn terminate(&self);
}

mod stub;
pub use stub::StubBackend;

#[cfg(feature = "libmpv")]
mod libmpv;
#[cfg(feature = "libmpv")]
pub use libmpv::LibmpvBackend;

/// Backend used by `EngineHandle::create`.
pub fn default_backend() -> Result<Arc<dyn NativeBackend>, MpvError> {
    cfg_if::cfg_if! {
        if #[cfg(feature = "libmpv")] {
            Ok(Arc::new(LibmpvBackend::new()?))
        } else {
            Ok(Arc::new(StubBackend::new()))
        }
    }
}
