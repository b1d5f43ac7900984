//! Data sources: application-provided byte streams for `datasource://` URIs.
//!
//! The engine's demux thread opens a URI through the registered
//! [`DataSourceFactory`], then calls `read`/`seek`/`size` on the returned
//! [`DataSource`] from that thread. `cancel` may arrive from any other thread
//! while a call is blocked and must make it return promptly. `close` is
//! always called exactly once through [`StreamHandle`], even after cancel.

mod file;
mod memory;
mod pipe;
mod registry;
mod stream;

pub use file::{FileDataSource, FileDataSourceFactory};
pub use memory::{MemoryDataSource, MemoryDataSourceFactory};
pub use pipe::{pipe, pipe_with_size, PipeDataSource, PipeWriter};
pub use registry::{global_factory, set_global_factory, FactorySlot};
pub use stream::{OpenStreams, StreamHandle, StreamId, DEFAULT_READ_CHUNK_SIZE};

use crate::error::DataSourceError;

/// URI scheme served by the registered factory
pub const DATA_SOURCE_SCHEME: &str = "datasource";

/// Full prefix of a data source URI
pub const DATA_SOURCE_PREFIX: &str = "datasource://";

/// A random-access byte source.
///
/// All methods take `&self`: the handle is shared between the thread doing
/// I/O and the thread that may cancel it.
pub trait DataSource: Send + Sync {
    /// Total length in bytes. Fails when unknown, never returns a guess.
    fn size(&self) -> Result<u64, DataSourceError>;

    /// Read up to `buf.len()` bytes at the current position.
    ///
    /// `Ok(0)` signals end of stream. Failures are errors, never a short
    /// count pretending to be EOF.
    fn read(&self, buf: &mut [u8]) -> Result<usize, DataSourceError>;

    /// Absolute reposition. Offsets in `[0, size)` must succeed.
    fn seek(&self, offset: u64) -> Result<(), DataSourceError>;

    /// Unblock pending and future reads/seeks. Idempotent.
    fn cancel(&self);

    /// Release the resource. Idempotent, never fails.
    fn close(&self);
}

/// Resolves a locator (the URI with its scheme prefix removed) to a source.
pub trait DataSourceFactory: Send + Sync {
    fn open(&self, locator: &str) -> Result<Box<dyn DataSource>, DataSourceError>;
}

impl<F> DataSourceFactory for F
where
    F: Fn(&str) -> Result<Box<dyn DataSource>, DataSourceError> + Send + Sync,
{
    fn open(&self, locator: &str) -> Result<Box<dyn DataSource>, DataSourceError> {
        self(locator)
    }
}

/// Remove `<scheme>://` from `uri`, returning the verbatim locator.
pub fn strip_scheme<'a>(uri: &'a str, scheme: &str) -> Result<&'a str, DataSourceError> {
    uri.strip_prefix(scheme)
        .and_then(|rest| rest.strip_prefix("://"))
        .ok_or_else(|| DataSourceError::InvalidUri {
            uri: uri.to_string(),
        })
}

/// True if `uri` uses `scheme`.
pub fn has_scheme(uri: &str, scheme: &str) -> bool {
    strip_scheme(uri, scheme).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_scheme_keeps_locator_verbatim() {
        assert_eq!(
            strip_scheme("datasource://a/b?c=d://e", DATA_SOURCE_SCHEME),
            Ok("a/b?c=d://e")
        );
        assert_eq!(strip_scheme("datasource://", DATA_SOURCE_SCHEME), Ok(""));
    }

    #[test]
    fn test_strip_scheme_rejects_other_uris() {
        assert_eq!(
            strip_scheme("file:///tmp/x", DATA_SOURCE_SCHEME),
            Err(DataSourceError::InvalidUri {
                uri: "file:///tmp/x".to_string()
            })
        );
        assert!(!has_scheme("datasource:/x", DATA_SOURCE_SCHEME));
        assert!(has_scheme("custom://x", "custom"));
    }

    #[test]
    fn test_prefix_matches_scheme() {
        assert_eq!(DATA_SOURCE_PREFIX, format!("{}://", DATA_SOURCE_SCHEME));
    }
}
