use crate::events::{CommandReply, EndFile, EventId, LogLine, PropertyChange};

/// Receiver of engine events.
///
/// Every method has a default, so implementors only override the
/// callbacks they care about. Callbacks run on the engine's event thread
/// and are expected to return promptly: a slow observer delays delivery of
/// the current event to everyone registered after it.
pub trait EventObserver: Send + Sync {
    /// Any event without a dedicated callback, plus the default routing of
    /// END_FILE and COMMAND_REPLY.
    fn on_event(&self, _id: EventId, _token: u64) {}

    fn on_property_change(&self, _change: &PropertyChange) {}

    fn on_end_file(&self, end: &EndFile) {
        self.on_event(EventId::EndFile, end.token);
    }

    fn on_command_reply(&self, reply: &CommandReply) {
        self.on_event(EventId::CommandReply, reply.token);
    }
}

/// Receiver of engine log lines.
pub trait LogObserver: Send + Sync {
    fn on_log(&self, line: &LogLine);
}

impl<F> LogObserver for F
where
    F: Fn(&LogLine) + Send + Sync,
{
    fn on_log(&self, line: &LogLine) {
        self(line)
    }
}
