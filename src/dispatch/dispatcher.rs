//! EventDispatcher: fault-isolating fan-out of engine callbacks.
//!
//! Each dispatch takes a snapshot of the registry and invokes every
//! observer in it on the calling thread. A panic inside one observer is
//! caught, logged and counted; the remaining observers still run and the
//! caller (usually the engine's event thread) never sees the failure.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

use super::observer::{EventObserver, LogObserver};
use super::registry::{ObserverId, ObserverRegistry};
use crate::events::{CommandReply, EndFile, Event, EventId, LogLine, PropertyChange};

/// Delivery counters since the dispatcher was created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchStats {
    /// Observer invocations that returned normally
    pub delivered: u64,
    /// Observer invocations that panicked
    pub failed: u64,
}

pub struct EventDispatcher {
    observers: ObserverRegistry<dyn EventObserver>,
    log_observers: ObserverRegistry<dyn LogObserver>,
    delivered: AtomicU64,
    failed: AtomicU64,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self {
            observers: ObserverRegistry::new(),
            log_observers: ObserverRegistry::new(),
            delivered: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    // ========================================================================
    // REGISTRATION
    // ========================================================================

    pub fn add_observer(&self, observer: Arc<dyn EventObserver>) -> ObserverId {
        self.observers.add(observer)
    }

    pub fn remove_observer(&self, id: ObserverId) -> bool {
        self.observers.remove(id)
    }

    /// Remove by instance identity rather than by id.
    pub fn remove_observer_instance(&self, observer: &Arc<dyn EventObserver>) -> bool {
        self.observers.remove_instance(observer)
    }

    pub fn add_log_observer(&self, observer: Arc<dyn LogObserver>) -> ObserverId {
        self.log_observers.add(observer)
    }

    pub fn remove_log_observer(&self, id: ObserverId) -> bool {
        self.log_observers.remove(id)
    }

    pub fn remove_log_observer_instance(&self, observer: &Arc<dyn LogObserver>) -> bool {
        self.log_observers.remove_instance(observer)
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    pub fn log_observer_count(&self) -> usize {
        self.log_observers.len()
    }

    pub fn clear(&self) {
        self.observers.clear();
        self.log_observers.clear();
    }

    pub fn stats(&self) -> DispatchStats {
        DispatchStats {
            delivered: self.delivered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }

    // ========================================================================
    // DISPATCH
    // ========================================================================

    pub fn dispatch_event(&self, id: EventId, token: u64) {
        self.fan_out(&self.observers, "event", |observer| {
            observer.on_event(id, token)
        });
    }

    pub fn dispatch_property_change(&self, change: &PropertyChange) {
        self.fan_out(&self.observers, "property_change", |observer| {
            observer.on_property_change(change)
        });
    }

    pub fn dispatch_end_file(&self, end: &EndFile) {
        self.fan_out(&self.observers, "end_file", |observer| {
            observer.on_end_file(end)
        });
    }

    pub fn dispatch_command_reply(&self, reply: &CommandReply) {
        self.fan_out(&self.observers, "command_reply", |observer| {
            observer.on_command_reply(reply)
        });
    }

    pub fn dispatch_log(&self, line: &LogLine) {
        self.fan_out(&self.log_observers, "log", |observer| observer.on_log(line));
    }

    /// Route an owned event to the matching callback.
    pub fn dispatch(&self, event: &Event) {
        match event {
            Event::Basic { id, token } => self.dispatch_event(*id, *token),
            Event::PropertyChange(change) => self.dispatch_property_change(change),
            Event::EndFile(end) => self.dispatch_end_file(end),
            Event::CommandReply(reply) => self.dispatch_command_reply(reply),
            Event::Log(line) => self.dispatch_log(line),
        }
    }

    fn fan_out<T: ?Sized>(
        &self,
        registry: &ObserverRegistry<T>,
        callback: &'static str,
        call: impl Fn(&T),
    ) {
        let snapshot = registry.snapshot();
        for entry in snapshot.iter() {
            let observer = &*entry.observer;
            match panic::catch_unwind(AssertUnwindSafe(|| call(observer))) {
                Ok(()) => {
                    self.delivered.fetch_add(1, Ordering::Relaxed);
                }
                Err(payload) => {
                    self.failed.fetch_add(1, Ordering::Relaxed);
                    tracing::error!(
                        observer = entry.id.as_u64(),
                        callback,
                        "observer callback panicked: {}",
                        panic_message(payload.as_ref())
                    );
                }
            }
        }
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
