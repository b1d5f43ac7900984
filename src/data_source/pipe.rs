//! Progressively fed source.
//!
//! A [`PipeWriter`] appends bytes as they arrive (from a network fetch, a
//! decoder, a test) while the engine reads from the paired
//! [`PipeDataSource`]. Reads and seeks past the received data block until
//! more arrives, the writer finishes or fails, or the source is cancelled.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

use super::DataSource;
use crate::error::DataSourceError;

#[derive(Default)]
struct PipeState {
    buffer: Vec<u8>,
    position: usize,
    expected_size: Option<u64>,
    finished: bool,
    failure: Option<DataSourceError>,
    cancelled: bool,
    closed: bool,
}

impl PipeState {
    fn interrupted(&self) -> Option<DataSourceError> {
        if self.closed {
            Some(DataSourceError::Closed)
        } else if self.cancelled {
            Some(DataSourceError::Cancelled)
        } else {
            None
        }
    }
}

#[derive(Default)]
struct PipeShared {
    state: Mutex<PipeState>,
    changed: Condvar,
}

impl PipeShared {
    fn lock(&self) -> MutexGuard<'_, PipeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn update(&self, mutate: impl FnOnce(&mut PipeState)) {
        let mut state = self.lock();
        mutate(&mut state);
        drop(state);
        self.changed.notify_all();
    }

    /// Block until `ready` holds or the pipe is interrupted.
    fn wait_until<'a>(
        &'a self,
        mut state: MutexGuard<'a, PipeState>,
        ready: impl Fn(&PipeState) -> bool,
    ) -> Result<MutexGuard<'a, PipeState>, DataSourceError> {
        loop {
            if let Some(err) = state.interrupted() {
                return Err(err);
            }
            if ready(&state) {
                return Ok(state);
            }
            state = self
                .changed
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

/// Create a connected writer/source pair.
pub fn pipe() -> (PipeWriter, PipeDataSource) {
    let shared = Arc::new(PipeShared::default());
    (
        PipeWriter {
            shared: Arc::clone(&shared),
        },
        PipeDataSource { shared },
    )
}

/// Like [`pipe`], with the total length known up front so `size` answers
/// before all bytes have arrived.
pub fn pipe_with_size(size: u64) -> (PipeWriter, PipeDataSource) {
    let (writer, source) = pipe();
    writer.shared.update(|state| state.expected_size = Some(size));
    (writer, source)
}

/// Producer half. Dropping it finishes the stream.
pub struct PipeWriter {
    shared: Arc<PipeShared>,
}

impl PipeWriter {
    /// Append bytes. Fails once the reader has closed.
    pub fn write(&self, data: &[u8]) -> Result<(), DataSourceError> {
        let mut state = self.shared.lock();
        if state.closed {
            return Err(DataSourceError::Closed);
        }
        state.buffer.extend_from_slice(data);
        drop(state);
        self.shared.changed.notify_all();
        Ok(())
    }

    /// Mark end of stream. Readers drain the buffer and then see EOF.
    pub fn finish(&self) {
        self.shared.update(|state| state.finished = true);
    }

    /// End the stream with an error. Readers drain the buffer and then get
    /// `error` instead of EOF.
    pub fn fail(&self, error: DataSourceError) {
        self.shared.update(|state| {
            state.failure = Some(error);
            state.finished = true;
        });
    }

    pub fn is_closed(&self) -> bool {
        self.shared.lock().closed
    }
}

impl Drop for PipeWriter {
    fn drop(&mut self) {
        self.finish();
    }
}

/// Consumer half handed to the engine.
pub struct PipeDataSource {
    shared: Arc<PipeShared>,
}

impl PipeDataSource {
    pub fn buffered(&self) -> usize {
        self.shared.lock().buffer.len()
    }
}

impl DataSource for PipeDataSource {
    fn size(&self) -> Result<u64, DataSourceError> {
        let state = self.shared.lock();
        if let Some(err) = state.interrupted() {
            return Err(err);
        }
        match (state.expected_size, state.finished, &state.failure) {
            (Some(size), _, _) => Ok(size),
            (None, true, None) => Ok(state.buffer.len() as u64),
            _ => Err(DataSourceError::SizeUnknown),
        }
    }

    fn read(&self, buf: &mut [u8]) -> Result<usize, DataSourceError> {
        if buf.is_empty() {
            return Ok(0);
        }
        let state = self.shared.lock();
        let mut state = self
            .shared
            .wait_until(state, |s| s.position < s.buffer.len() || s.finished)?;

        let available = state.buffer.len() - state.position;
        if available == 0 {
            return match &state.failure {
                Some(err) => Err(err.clone()),
                None => Ok(0),
            };
        }
        let n = available.min(buf.len());
        let start = state.position;
        buf[..n].copy_from_slice(&state.buffer[start..start + n]);
        state.position += n;
        Ok(n)
    }

    fn seek(&self, offset: u64) -> Result<(), DataSourceError> {
        if let Some(size) = self.shared.lock().expected_size {
            if offset > size {
                return Err(DataSourceError::SeekOutOfRange { offset, size });
            }
        }
        let target = usize::try_from(offset).unwrap_or(usize::MAX);
        let state = self.shared.lock();
        let mut state = self
            .shared
            .wait_until(state, |s| target <= s.buffer.len() || s.finished)?;

        if target > state.buffer.len() {
            return Err(DataSourceError::SeekOutOfRange {
                offset,
                size: state.buffer.len() as u64,
            });
        }
        state.position = target;
        Ok(())
    }

    fn cancel(&self) {
        self.shared.update(|state| state.cancelled = true);
    }

    fn close(&self) {
        self.shared.update(|state| {
            state.closed = true;
            state.buffer = Vec::new();
        });
    }
}
