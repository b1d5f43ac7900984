use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use log::{debug, warn};

use super::{DataSource, DataSourceFactory};
use crate::error::DataSourceError;

/// Filesystem-backed source.
pub struct FileDataSource {
    path: PathBuf,
    file: Mutex<Option<File>>,
    cancelled: AtomicBool,
}

impl FileDataSource {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DataSourceError> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|err| match err.kind() {
            io::ErrorKind::NotFound => DataSourceError::NotFound {
                locator: path.display().to_string(),
            },
            _ => DataSourceError::from(err),
        })?;
        debug!("Opened file data source {}", path.display());
        Ok(Self {
            path,
            file: Mutex::new(Some(file)),
            cancelled: AtomicBool::new(false),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn with_file<T>(
        &self,
        op: impl FnOnce(&mut File) -> io::Result<T>,
    ) -> Result<T, DataSourceError> {
        if self.cancelled.load(Ordering::SeqCst) {
            return Err(DataSourceError::Cancelled);
        }
        let mut guard = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        let file = guard.as_mut().ok_or(DataSourceError::Closed)?;
        Ok(op(file)?)
    }
}

impl DataSource for FileDataSource {
    fn size(&self) -> Result<u64, DataSourceError> {
        self.with_file(|file| Ok(file.metadata()?.len()))
    }

    fn read(&self, buf: &mut [u8]) -> Result<usize, DataSourceError> {
        self.with_file(|file| loop {
            match file.read(buf) {
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                result => return result,
            }
        })
    }

    fn seek(&self, offset: u64) -> Result<(), DataSourceError> {
        let size = self.size()?;
        if offset > size {
            return Err(DataSourceError::SeekOutOfRange { offset, size });
        }
        self.with_file(|file| file.seek(SeekFrom::Start(offset)).map(|_| ()))
    }

    fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    fn close(&self) {
        let file = self
            .file
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if file.is_some() {
            debug!("Closed file data source {}", self.path.display());
        }
    }
}

/// Factory treating the locator as a filesystem path, optionally relative
/// to a root directory.
#[derive(Debug, Clone, Default)]
pub struct FileDataSourceFactory {
    root: Option<PathBuf>,
}

impl FileDataSourceFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve locators under `root`. Locators that try to leave it are
    /// rejected.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: Some(root.into()),
        }
    }

    fn resolve(&self, locator: &str) -> Result<PathBuf, DataSourceError> {
        let Some(root) = &self.root else {
            return Ok(PathBuf::from(locator));
        };
        let relative = Path::new(locator);
        let escapes = relative.is_absolute()
            || relative
                .components()
                .any(|c| matches!(c, std::path::Component::ParentDir));
        if escapes {
            warn!("Rejected data source locator outside root: {}", locator);
            return Err(DataSourceError::NotFound {
                locator: locator.to_string(),
            });
        }
        Ok(root.join(relative))
    }
}

impl DataSourceFactory for FileDataSourceFactory {
    fn open(&self, locator: &str) -> Result<Box<dyn DataSource>, DataSourceError> {
        let path = self.resolve(locator)?;
        Ok(Box::new(FileDataSource::open(path)?))
    }
}
