use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use super::{DataSource, DataSourceFactory};
use crate::error::DataSourceError;

/// In-memory source over a shared byte buffer.
pub struct MemoryDataSource {
    data: Arc<[u8]>,
    position: Mutex<u64>,
    cancelled: AtomicBool,
    closed: AtomicBool,
}

impl MemoryDataSource {
    pub fn new(data: impl Into<Arc<[u8]>>) -> Self {
        Self {
            data: data.into(),
            position: Mutex::new(0),
            cancelled: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    pub fn position(&self) -> u64 {
        *self.position.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_open(&self) -> Result<(), DataSourceError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DataSourceError::Closed);
        }
        if self.cancelled.load(Ordering::SeqCst) {
            return Err(DataSourceError::Cancelled);
        }
        Ok(())
    }
}

impl DataSource for MemoryDataSource {
    fn size(&self) -> Result<u64, DataSourceError> {
        self.check_open()?;
        Ok(self.data.len() as u64)
    }

    fn read(&self, buf: &mut [u8]) -> Result<usize, DataSourceError> {
        self.check_open()?;
        let mut position = self.position.lock().unwrap_or_else(PoisonError::into_inner);
        let start = usize::try_from(*position)
            .unwrap_or(usize::MAX)
            .min(self.data.len());
        let n = buf.len().min(self.data.len() - start);
        buf[..n].copy_from_slice(&self.data[start..start + n]);
        *position += n as u64;
        Ok(n)
    }

    /// Seeking to exactly the end is allowed and reads EOF.
    fn seek(&self, offset: u64) -> Result<(), DataSourceError> {
        self.check_open()?;
        let size = self.data.len() as u64;
        if offset > size {
            return Err(DataSourceError::SeekOutOfRange { offset, size });
        }
        *self.position.lock().unwrap_or_else(PoisonError::into_inner) = offset;
        Ok(())
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

/// Factory serving named in-memory buffers. The locator is the name.
#[derive(Default)]
pub struct MemoryDataSourceFactory {
    entries: RwLock<HashMap<String, Arc<[u8]>>>,
}

impl MemoryDataSourceFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a buffer. Streams already open keep the old bytes.
    pub fn insert(&self, locator: impl Into<String>, data: impl Into<Arc<[u8]>>) {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(locator.into(), data.into());
    }

    pub fn remove(&self, locator: &str) -> bool {
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(locator)
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DataSourceFactory for MemoryDataSourceFactory {
    fn open(&self, locator: &str) -> Result<Box<dyn DataSource>, DataSourceError> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let data = entries
            .get(locator)
            .cloned()
            .ok_or_else(|| DataSourceError::NotFound {
                locator: locator.to_string(),
            })?;
        Ok(Box::new(MemoryDataSource::new(data)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_advances_position() {
        let source = MemoryDataSource::new(b"abcdef".to_vec());
        let mut buf = [0u8; 4];
        assert_eq!(source.read(&mut buf), Ok(4));
        assert_eq!(&buf, b"abcd");
        assert_eq!(source.read(&mut buf), Ok(2));
        assert_eq!(&buf[..2], b"ef");
        assert_eq!(source.read(&mut buf), Ok(0));
        assert_eq!(source.position(), 6);
    }

    #[test]
    fn test_seek_bounds() {
        let source = MemoryDataSource::new(vec![0u8; 10]);
        assert_eq!(source.seek(10), Ok(()));
        assert_eq!(
            source.seek(11),
            Err(DataSourceError::SeekOutOfRange {
                offset: 11,
                size: 10
            })
        );
        // Failed seek leaves the position alone.
        assert_eq!(source.position(), 10);
    }

    #[test]
    fn test_cancel_and_close_fail_subsequent_calls() {
        let source = MemoryDataSource::new(vec![1u8; 4]);
        source.cancel();
        let mut buf = [0u8; 4];
        assert_eq!(source.read(&mut buf), Err(DataSourceError::Cancelled));
        source.close();
        source.close();
        assert_eq!(source.size(), Err(DataSourceError::Closed));
    }

    #[test]
    fn test_factory_lookup() {
        let factory = MemoryDataSourceFactory::new();
        factory.insert("intro", b"hello".to_vec());
        assert_eq!(factory.len(), 1);

        let source = factory.open("intro").unwrap();
        assert_eq!(source.size(), Ok(5));
        assert!(matches!(
            factory.open("outro").err(),
            Some(DataSourceError::NotFound { .. })
        ));
        assert!(factory.remove("intro"));
        assert!(factory.is_empty());
    }
}
