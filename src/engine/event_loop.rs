//! Event thread: drains the backend's event queue into the dispatcher.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crate::dispatch::EventDispatcher;
use crate::engine::backend::{EventPayload, NativeBackend, NativeEvent};
use crate::events::{EventId, LogLevel, LogLine};

pub(crate) struct EventLoop {
    backend: Arc<dyn NativeBackend>,
    dispatcher: Arc<EventDispatcher>,
    shutdown: Arc<AtomicBool>,
    forward_logs: bool,
}

impl EventLoop {
    pub(crate) fn new(
        backend: Arc<dyn NativeBackend>,
        dispatcher: Arc<EventDispatcher>,
        shutdown: Arc<AtomicBool>,
        forward_logs: bool,
    ) -> Self {
        Self {
            backend,
            dispatcher,
            shutdown,
            forward_logs,
        }
    }

    pub(crate) fn spawn(self, name: &str) -> io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name(name.to_string())
            .spawn(move || self.run())
    }

    /// Wait, check for destruction, dispatch. Returns once the handle is
    /// destroyed or the engine reports SHUTDOWN.
    ///
    /// Once teardown has begun nothing more is delivered: an event dequeued
    /// after the shutdown flag was raised, SHUTDOWN included, is dropped.
    /// Observers never run against an engine that is being terminated.
    pub(crate) fn run(&self) {
        tracing::debug!(backend = self.backend.name(), "event thread started");
        while !self.is_shutting_down() {
            let event = self.backend.wait_event(None);
            // Destruction may have started while we were blocked.
            if self.is_shutting_down() {
                tracing::trace!(event = ?event.id, "dropping event dequeued during teardown");
                break;
            }
            if event.id == EventId::None {
                continue;
            }
            let finished = event.id == EventId::Shutdown;
            self.route(event);
            if finished {
                break;
            }
        }
        tracing::debug!("event thread exiting");
    }

    fn is_shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    fn route(&self, event: NativeEvent) {
        match event.payload {
            EventPayload::Log(line) => {
                if self.forward_logs {
                    forward_to_tracing(&line);
                }
                self.dispatcher.dispatch_log(&line);
            }
            EventPayload::Property(change) => self.dispatcher.dispatch_property_change(&change),
            EventPayload::EndFile(end) => self.dispatcher.dispatch_end_file(&end),
            EventPayload::CommandReply(reply) => self.dispatcher.dispatch_command_reply(&reply),
            EventPayload::None if event.id == EventId::LogMessage => {
                tracing::trace!("dropped engine log line that is not valid UTF-8");
            }
            EventPayload::None => self.dispatcher.dispatch_event(event.id, event.reply_token),
        }
    }
}

/// Re-emit an engine log line under the `mpv` target.
pub fn forward_to_tracing(line: &LogLine) {
    let text = line.text.trim_end();
    let prefix = line.prefix.as_str();
    match line.level {
        LogLevel::Fatal | LogLevel::Error => tracing::error!(target: "mpv", prefix, "{}", text),
        LogLevel::Warn => tracing::warn!(target: "mpv", prefix, "{}", text),
        LogLevel::Info => tracing::info!(target: "mpv", prefix, "{}", text),
        LogLevel::V | LogLevel::Debug => tracing::debug!(target: "mpv", prefix, "{}", text),
        LogLevel::Trace => tracing::trace!(target: "mpv", prefix, "{}", text),
        LogLevel::None => {}
    }
}
