//! StreamHandle: the engine-facing side of an open data source.
//!
//! Speaks the native stream callback conventions (byte counts and negative
//! status codes instead of `Result`), batches large reads, and makes sure a
//! panic inside application I/O code never unwinds into the engine.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

use super::{DataSource, FactorySlot};
use crate::dispatch::dispatcher::panic_message;
use crate::error::{log_data_source_error, DataSourceError, ErrorCode, MpvError, MpvErrorCodes};

/// Default batch size for a single `DataSource::read` call
pub const DEFAULT_READ_CHUNK_SIZE: usize = 1024 * 1024;

static NEXT_STREAM_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StreamId(u64);

impl StreamId {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stream#{}", self.0)
    }
}

pub struct StreamHandle {
    id: StreamId,
    uri: String,
    source: Box<dyn DataSource>,
    read_chunk_size: usize,
    cancelled: AtomicBool,
    closed: AtomicBool,
}

impl StreamHandle {
    pub fn new(uri: impl Into<String>, source: Box<dyn DataSource>, read_chunk_size: usize) -> Self {
        Self {
            id: StreamId(NEXT_STREAM_ID.fetch_add(1, Ordering::Relaxed)),
            uri: uri.into(),
            source,
            read_chunk_size: read_chunk_size.max(1),
            cancelled: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> StreamId {
        self.id
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Fill `buf` from the source.
    ///
    /// Returns the number of bytes read, 0 at end of stream, or -1 on
    /// failure. Reads are issued in batches of at most `read_chunk_size` and
    /// stop early at EOF, on a short batch, or on cancellation. Bytes already
    /// read are returned even if a later batch fails.
    pub fn read_into(&self, buf: &mut [u8]) -> i64 {
        if buf.is_empty() {
            return 0;
        }
        if self.is_closed() || self.is_cancelled() {
            return -1;
        }

        let mut filled = 0usize;
        while filled < buf.len() {
            if self.is_cancelled() {
                break;
            }
            let end = (filled + self.read_chunk_size).min(buf.len());
            let requested = end - filled;
            let chunk = &mut buf[filled..end];

            match self.guarded("read", || self.source.read(chunk)) {
                Ok(0) => break,
                Ok(n) if n > requested => {
                    tracing::error!(
                        stream = %self.id,
                        requested,
                        returned = n,
                        "data source reported more bytes than requested"
                    );
                    return if filled > 0 { filled as i64 } else { -1 };
                }
                Ok(n) => {
                    filled += n;
                    if n < requested {
                        break;
                    }
                }
                Err(err) => {
                    if err != DataSourceError::Cancelled {
                        log_data_source_error(&err, "read");
                    }
                    return if filled > 0 { filled as i64 } else { -1 };
                }
            }
        }

        if filled == 0 && self.is_cancelled() {
            return -1;
        }
        filled as i64
    }

    /// Reposition to `offset`. Returns the new offset or a negative status.
    pub fn seek(&self, offset: i64) -> i64 {
        if offset < 0 || self.is_closed() || self.is_cancelled() {
            return i64::from(MpvErrorCodes::GENERIC);
        }
        match self.guarded("seek", || self.source.seek(offset as u64)) {
            Ok(()) => offset,
            Err(err) => {
                if err != DataSourceError::Cancelled {
                    log_data_source_error(&err, "seek");
                }
                i64::from(MpvErrorCodes::GENERIC)
            }
        }
    }

    /// Total size, or UNSUPPORTED when the source cannot tell.
    pub fn size(&self) -> i64 {
        if self.is_closed() {
            return i64::from(MpvErrorCodes::UNSUPPORTED);
        }
        match self.guarded("size", || self.source.size()) {
            Ok(size) => i64::try_from(size).unwrap_or(i64::MAX),
            Err(err) => {
                tracing::debug!(stream = %self.id, code = err.code(), "size unavailable: {}", err);
                i64::from(MpvErrorCodes::UNSUPPORTED)
            }
        }
    }

    /// Ask the source to unblock. Only the first call reaches the source.
    pub fn cancel(&self) {
        if self.closed.load(Ordering::SeqCst) || self.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::debug!(stream = %self.id, uri = %self.uri, "cancelling stream");
        let _ = self.guarded("cancel", || {
            self.source.cancel();
            Ok(())
        });
    }

    /// Release the source. Only the first call reaches the source.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::debug!(stream = %self.id, uri = %self.uri, "closing stream");
        let _ = self.guarded("close", || {
            self.source.close();
            Ok(())
        });
    }

    fn guarded<T>(
        &self,
        operation: &'static str,
        call: impl FnOnce() -> Result<T, DataSourceError>,
    ) -> Result<T, DataSourceError> {
        match panic::catch_unwind(AssertUnwindSafe(call)) {
            Ok(result) => result,
            Err(payload) => {
                let details = panic_message(payload.as_ref());
                tracing::error!(
                    stream = %self.id,
                    operation,
                    "data source panicked: {}",
                    details
                );
                Err(DataSourceError::Io {
                    kind: std::io::ErrorKind::Other,
                    details,
                })
            }
        }
    }
}

impl fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamHandle")
            .field("id", &self.id)
            .field("uri", &self.uri)
            .field("cancelled", &self.is_cancelled())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Streams opened on behalf of one engine, tracked weakly so destroy can
/// cancel and close whatever the engine still holds.
#[derive(Default)]
pub struct OpenStreams {
    streams: Mutex<Vec<Weak<StreamHandle>>>,
}

impl OpenStreams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve `uri` through `factories` and track the resulting stream.
    pub fn open(
        &self,
        factories: &FactorySlot,
        scheme: &str,
        uri: &str,
        read_chunk_size: usize,
    ) -> Result<Arc<StreamHandle>, MpvError> {
        let source = factories.open(scheme, uri).map_err(|err| {
            log_data_source_error(&err, uri);
            MpvError::LoadingFailed
        })?;
        let handle = Arc::new(StreamHandle::new(uri, source, read_chunk_size));
        tracing::debug!(stream = %handle.id(), uri, "stream opened");

        let mut streams = self.streams.lock().unwrap_or_else(PoisonError::into_inner);
        streams.retain(|stream| stream.strong_count() > 0);
        streams.push(Arc::downgrade(&handle));
        Ok(handle)
    }

    pub fn live(&self) -> Vec<Arc<StreamHandle>> {
        let streams = self.streams.lock().unwrap_or_else(PoisonError::into_inner);
        streams
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|stream| !stream.is_closed())
            .collect()
    }

    /// Cancel every live stream. The lock is released before any source
    /// code runs.
    pub fn cancel_all(&self) -> usize {
        let live = self.live();
        for stream in &live {
            stream.cancel();
        }
        live.len()
    }

    /// Close every live stream and forget all of them.
    pub fn close_all(&self) -> usize {
        let live = self.live();
        self.streams
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        for stream in &live {
            stream.close();
        }
        live.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_source::MemoryDataSource;
    use std::sync::atomic::AtomicUsize;

    struct CountingSource {
        inner: MemoryDataSource,
        reads: AtomicUsize,
        closes: AtomicUsize,
    }

    impl CountingSource {
        fn new(len: usize) -> Self {
            Self {
                inner: MemoryDataSource::new((0..len).map(|i| i as u8).collect::<Vec<u8>>()),
                reads: AtomicUsize::new(0),
                closes: AtomicUsize::new(0),
            }
        }
    }

    impl DataSource for Arc<CountingSource> {
        fn size(&self) -> Result<u64, DataSourceError> {
            self.inner.size()
        }
        fn read(&self, buf: &mut [u8]) -> Result<usize, DataSourceError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.inner.read(buf)
        }
        fn seek(&self, offset: u64) -> Result<(), DataSourceError> {
            self.inner.seek(offset)
        }
        fn cancel(&self) {
            self.inner.cancel()
        }
        fn close(&self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Liar;

    impl DataSource for Liar {
        fn size(&self) -> Result<u64, DataSourceError> {
            Err(DataSourceError::SizeUnknown)
        }
        fn read(&self, buf: &mut [u8]) -> Result<usize, DataSourceError> {
            Ok(buf.len() + 1)
        }
        fn seek(&self, _offset: u64) -> Result<(), DataSourceError> {
            panic!("seek exploded");
        }
        fn cancel(&self) {}
        fn close(&self) {}
    }

    #[test]
    fn test_reads_are_batched_by_chunk_size() {
        let source = Arc::new(CountingSource::new(10));
        let handle = StreamHandle::new("datasource://x", Box::new(Arc::clone(&source)), 4);

        let mut buf = [0u8; 10];
        assert_eq!(handle.read_into(&mut buf), 10);
        assert_eq!(buf, [0, 1, 2, 3, 4, 5, 6, 7, 8, 9]);
        assert_eq!(source.reads.load(Ordering::SeqCst), 3);
        assert_eq!(handle.read_into(&mut buf), 0);
    }

    #[test]
    fn test_seek_and_size_conventions() {
        let handle = StreamHandle::new("m", Box::new(MemoryDataSource::new(vec![7u8; 100])), 16);
        assert_eq!(handle.size(), 100);
        assert_eq!(handle.seek(40), 40);
        assert_eq!(handle.seek(-1), i64::from(MpvErrorCodes::GENERIC));
        assert_eq!(handle.seek(101), i64::from(MpvErrorCodes::GENERIC));
    }

    #[test]
    fn test_misbehaving_source_is_contained() {
        let handle = StreamHandle::new("liar", Box::new(Liar), 8);
        let mut buf = [0u8; 8];
        assert_eq!(handle.read_into(&mut buf), -1);
        assert_eq!(handle.seek(0), i64::from(MpvErrorCodes::GENERIC));
        assert_eq!(handle.size(), i64::from(MpvErrorCodes::UNSUPPORTED));
    }

    #[test]
    fn test_close_reaches_source_once() {
        let source = Arc::new(CountingSource::new(4));
        let handle = StreamHandle::new("x", Box::new(Arc::clone(&source)), 4);
        handle.cancel();
        handle.close();
        handle.close();
        handle.cancel();
        assert_eq!(source.closes.load(Ordering::SeqCst), 1);

        let mut buf = [0u8; 4];
        assert_eq!(handle.read_into(&mut buf), -1);
    }

    #[test]
    fn test_open_streams_tracks_live_handles() {
        let slot = FactorySlot::new();
        slot.set(Arc::new(
            |_: &str| -> Result<Box<dyn DataSource>, DataSourceError> {
                Ok(Box::new(MemoryDataSource::new(vec![0u8; 8])))
            },
        ))
        .unwrap();

        let streams = OpenStreams::new();
        let kept = streams.open(&slot, "datasource", "datasource://a", 4).unwrap();
        let dropped = streams.open(&slot, "datasource", "datasource://b", 4).unwrap();
        drop(dropped);

        assert_eq!(streams.cancel_all(), 1);
        assert!(kept.is_cancelled());
        assert_eq!(streams.close_all(), 1);
        assert!(kept.is_closed());
        assert!(streams.live().is_empty());
    }

    #[test]
    fn test_open_without_factory_is_loading_failure() {
        let streams = OpenStreams::new();
        let err = streams
            .open(&FactorySlot::new(), "datasource", "datasource://a", 4)
            .err();
        assert_eq!(err, Some(MpvError::LoadingFailed));
    }
}
