//! Shared helpers for the integration tests.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use mpv_bridge::{
    CommandReply, DataSource, DataSourceError, EndFile, EventId, EventObserver, LogLine,
    LogObserver, PropertyChange,
};

pub const WAIT: Duration = Duration::from_secs(5);

/// One observed callback.
#[derive(Debug, Clone, PartialEq)]
pub enum Seen {
    Event(EventId, u64),
    Property(PropertyChange),
    EndFile(EndFile),
    Reply(CommandReply),
    Log(LogLine),
}

/// Observer recording every callback, with a blocking wait.
#[derive(Default)]
pub struct Recorder {
    seen: Mutex<Vec<Seen>>,
    changed: Condvar,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn push(&self, item: Seen) {
        self.seen.lock().unwrap().push(item);
        self.changed.notify_all();
    }

    pub fn seen(&self) -> Vec<Seen> {
        self.seen.lock().unwrap().clone()
    }

    /// Block until `pred` holds for the recorded callbacks, or panic after
    /// [`WAIT`].
    pub fn wait_for(&self, what: &str, pred: impl Fn(&[Seen]) -> bool) -> Vec<Seen> {
        let deadline = Instant::now() + WAIT;
        let mut seen = self.seen.lock().unwrap();
        while !pred(&seen) {
            let now = Instant::now();
            if now >= deadline {
                panic!("timed out waiting for {}: {:?}", what, *seen);
            }
            seen = self.changed.wait_timeout(seen, deadline - now).unwrap().0;
        }
        seen.clone()
    }

    pub fn wait_end_file(&self) -> EndFile {
        let seen = self.wait_for("END_FILE", |seen| {
            seen.iter().any(|item| matches!(item, Seen::EndFile(_)))
        });
        seen.into_iter()
            .find_map(|item| match item {
                Seen::EndFile(end) => Some(end),
                _ => None,
            })
            .unwrap()
    }

    pub fn event_ids(&self) -> Vec<EventId> {
        self.seen()
            .iter()
            .filter_map(|item| match item {
                Seen::Event(id, _) => Some(*id),
                Seen::Property(_) => Some(EventId::PropertyChange),
                Seen::EndFile(_) => Some(EventId::EndFile),
                Seen::Reply(_) => Some(EventId::CommandReply),
                Seen::Log(_) => None,
            })
            .collect()
    }
}

impl EventObserver for Recorder {
    fn on_event(&self, id: EventId, token: u64) {
        self.push(Seen::Event(id, token));
    }

    fn on_property_change(&self, change: &PropertyChange) {
        self.push(Seen::Property(change.clone()));
    }

    fn on_end_file(&self, end: &EndFile) {
        self.push(Seen::EndFile(end.clone()));
    }

    fn on_command_reply(&self, reply: &CommandReply) {
        self.push(Seen::Reply(reply.clone()));
    }
}

impl LogObserver for Recorder {
    fn on_log(&self, line: &LogLine) {
        self.push(Seen::Log(line.clone()));
    }
}

/// Observer that panics on every callback.
pub struct Panicker;

impl EventObserver for Panicker {
    fn on_event(&self, id: EventId, _token: u64) {
        panic!("observer failure on {:?}", id);
    }

    fn on_property_change(&self, change: &PropertyChange) {
        panic!("observer failure on {}", change.name);
    }
}

/// Source whose reads block until cancelled. Serves `size` as its length.
pub struct BlockingSource {
    size: u64,
    cancelled: Mutex<bool>,
    wake: Condvar,
    pub reads_started: AtomicUsize,
    pub closes: AtomicUsize,
    pub closed: AtomicBool,
}

impl BlockingSource {
    pub fn new(size: u64) -> Arc<Self> {
        Arc::new(Self {
            size,
            cancelled: Mutex::new(false),
            wake: Condvar::new(),
            reads_started: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        })
    }

    /// Block until a read is in progress.
    pub fn wait_reading(&self) {
        let deadline = Instant::now() + WAIT;
        while self.reads_started.load(Ordering::SeqCst) == 0 {
            assert!(Instant::now() < deadline, "no read started");
            std::thread::sleep(Duration::from_millis(5));
        }
    }
}

impl DataSource for BlockingSource {
    fn size(&self) -> Result<u64, DataSourceError> {
        Ok(self.size)
    }

    fn read(&self, _buf: &mut [u8]) -> Result<usize, DataSourceError> {
        self.reads_started.fetch_add(1, Ordering::SeqCst);
        let mut cancelled = self.cancelled.lock().unwrap();
        while !*cancelled {
            cancelled = self.wake.wait(cancelled).unwrap();
        }
        Err(DataSourceError::Cancelled)
    }

    fn seek(&self, _offset: u64) -> Result<(), DataSourceError> {
        Ok(())
    }

    fn cancel(&self) {
        *self.cancelled.lock().unwrap() = true;
        self.wake.notify_all();
    }

    fn close(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Lets a test keep an `Arc` to a source while the engine owns a box of it.
pub struct Shared<S: DataSource>(pub Arc<S>);

impl<S: DataSource> DataSource for Shared<S> {
    fn size(&self) -> Result<u64, DataSourceError> {
        self.0.size()
    }

    fn read(&self, buf: &mut [u8]) -> Result<usize, DataSourceError> {
        self.0.read(buf)
    }

    fn seek(&self, offset: u64) -> Result<(), DataSourceError> {
        self.0.seek(offset)
    }

    fn cancel(&self) {
        self.0.cancel()
    }

    fn close(&self) {
        self.0.close()
    }
}

/// Write `contents` to a fresh file under the temp dir.
pub fn temp_file(tag: &str, name: &str, contents: &[u8]) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("mpv_bridge_{}_{}", tag, std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    std::fs::write(&path, contents).unwrap();
    path
}
