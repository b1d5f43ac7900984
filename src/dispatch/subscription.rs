// EventSubscription: channel-backed observer for async consumers
//
// Bridges the synchronous observer callbacks onto an unbounded tokio
// channel so consumers can await events or treat them as a Stream.
// Unbounded: the event thread never waits for a slow consumer
// and no event is dropped.

use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use futures::Stream;
use tokio::sync::mpsc;

use super::dispatcher::EventDispatcher;
use super::observer::{EventObserver, LogObserver};
use super::registry::ObserverId;
use crate::events::{CommandReply, EndFile, Event, EventId, LogLine, PropertyChange};

struct ChannelObserver {
    tx: mpsc::UnboundedSender<Event>,
}

impl ChannelObserver {
    fn forward(&self, event: Event) {
        // Receiver gone means the subscription is being dropped.
        let _ = self.tx.send(event);
    }
}

impl EventObserver for ChannelObserver {
    fn on_event(&self, id: EventId, token: u64) {
        self.forward(Event::Basic { id, token });
    }

    fn on_property_change(&self, change: &PropertyChange) {
        self.forward(Event::PropertyChange(change.clone()));
    }

    fn on_end_file(&self, end: &EndFile) {
        self.forward(Event::EndFile(end.clone()));
    }

    fn on_command_reply(&self, reply: &CommandReply) {
        self.forward(Event::CommandReply(reply.clone()));
    }
}

impl LogObserver for ChannelObserver {
    fn on_log(&self, line: &LogLine) {
        self.forward(Event::Log(line.clone()));
    }
}

/// Receiving end of a dispatcher subscription.
///
/// Unregisters its observer when dropped.
pub struct EventSubscription {
    rx: mpsc::UnboundedReceiver<Event>,
    observer_id: ObserverId,
    log_observer_id: Option<ObserverId>,
    dispatcher: Weak<EventDispatcher>,
}

impl EventSubscription {
    /// Wait for the next event. Returns `None` once the dispatcher is gone.
    pub async fn recv(&mut self) -> Option<Event> {
        self.rx.recv().await
    }

    /// Next queued event, if any, without waiting.
    pub fn try_recv(&mut self) -> Option<Event> {
        self.rx.try_recv().ok()
    }

    /// Blocking variant for non-async callers. Must not be called from
    /// inside a tokio runtime.
    pub fn blocking_recv(&mut self) -> Option<Event> {
        self.rx.blocking_recv()
    }

    pub fn observer_id(&self) -> ObserverId {
        self.observer_id
    }
}

impl Stream for EventSubscription {
    type Item = Event;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Event>> {
        self.rx.poll_recv(cx)
    }
}

impl Drop for EventSubscription {
    fn drop(&mut self) {
        if let Some(dispatcher) = self.dispatcher.upgrade() {
            dispatcher.remove_observer(self.observer_id);
            if let Some(id) = self.log_observer_id {
                dispatcher.remove_log_observer(id);
            }
        }
    }
}

impl EventDispatcher {
    /// Subscribe to events (not log lines).
    pub fn subscribe(self: &Arc<Self>) -> EventSubscription {
        self.subscribe_inner(false)
    }

    /// Subscribe to events and log lines on one channel, in arrival order.
    pub fn subscribe_with_logs(self: &Arc<Self>) -> EventSubscription {
        self.subscribe_inner(true)
    }

    fn subscribe_inner(self: &Arc<Self>, with_logs: bool) -> EventSubscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let observer = Arc::new(ChannelObserver { tx });
        let observer_id = self.add_observer(observer.clone());
        let log_observer_id = with_logs.then(|| self.add_log_observer(observer));

        EventSubscription {
            rx,
            observer_id,
            log_observer_id,
            dispatcher: Arc::downgrade(self),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{EndFileReason, LogLevel};

    #[test]
    fn test_subscription_receives_in_order() {
        let dispatcher = Arc::new(EventDispatcher::new());
        let mut sub = dispatcher.subscribe();

        dispatcher.dispatch_event(EventId::StartFile, 0);
        dispatcher.dispatch_end_file(&EndFile {
            reason: EndFileReason::Stop,
            error: None,
            token: 0,
        });

        assert_eq!(sub.try_recv().map(|e| e.id()), Some(EventId::StartFile));
        assert_eq!(sub.try_recv().map(|e| e.id()), Some(EventId::EndFile));
        assert!(sub.try_recv().is_none());
    }

    #[test]
    fn test_logs_only_with_logs_subscription() {
        let dispatcher = Arc::new(EventDispatcher::new());
        let mut events_only = dispatcher.subscribe();
        let mut with_logs = dispatcher.subscribe_with_logs();

        dispatcher.dispatch_log(&LogLine::new("ffmpeg", LogLevel::Warn, "w"));

        assert!(events_only.try_recv().is_none());
        assert!(matches!(with_logs.try_recv(), Some(Event::Log(_))));
    }

    #[test]
    fn test_drop_unregisters() {
        let dispatcher = Arc::new(EventDispatcher::new());
        let sub = dispatcher.subscribe_with_logs();
        assert_eq!(dispatcher.observer_count(), 1);
        assert_eq!(dispatcher.log_observer_count(), 1);

        drop(sub);
        assert_eq!(dispatcher.observer_count(), 0);
        assert_eq!(dispatcher.log_observer_count(), 0);
    }

    #[tokio::test]
    async fn test_stream_interface() {
        use futures::StreamExt;

        let dispatcher = Arc::new(EventDispatcher::new());
        let mut sub = dispatcher.subscribe();
        dispatcher.dispatch_event(EventId::Seek, 3);

        let event = sub.next().await;
        assert_eq!(event, Some(Event::Basic { id: EventId::Seek, token: 3 }));
    }
}
