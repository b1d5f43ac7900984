//! Factory registration.
//!
//! Each engine owns a [`FactorySlot`] that can be filled once. A
//! process-wide factory, also init-once, serves engines whose slot is empty;
//! it exists for hosts that only ever run a single engine. Neither can be
//! replaced or torn down once set.

use std::fmt;
use std::sync::Arc;

use once_cell::sync::OnceCell;

use super::{strip_scheme, DataSource, DataSourceFactory};
use crate::error::DataSourceError;

static GLOBAL_FACTORY: OnceCell<Arc<dyn DataSourceFactory>> = OnceCell::new();

/// Register the process-wide fallback factory.
pub fn set_global_factory(factory: Arc<dyn DataSourceFactory>) -> Result<(), DataSourceError> {
    GLOBAL_FACTORY
        .set(factory)
        .map_err(|_| DataSourceError::FactoryAlreadyRegistered)?;
    log::info!("Process-wide data source factory registered");
    Ok(())
}

pub fn global_factory() -> Option<Arc<dyn DataSourceFactory>> {
    GLOBAL_FACTORY.get().cloned()
}

/// Per-engine factory registration.
#[derive(Default)]
pub struct FactorySlot {
    local: OnceCell<Arc<dyn DataSourceFactory>>,
}

impl FactorySlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register this engine's factory. A second call fails.
    pub fn set(&self, factory: Arc<dyn DataSourceFactory>) -> Result<(), DataSourceError> {
        self.local
            .set(factory)
            .map_err(|_| DataSourceError::FactoryAlreadyRegistered)
    }

    /// The engine's own factory, else the process-wide one.
    pub fn resolve(&self) -> Option<Arc<dyn DataSourceFactory>> {
        self.local.get().cloned().or_else(global_factory)
    }

    pub fn is_resolvable(&self) -> bool {
        self.local.get().is_some() || GLOBAL_FACTORY.get().is_some()
    }

    /// Resolve `uri` to a source. Missing registration is a configuration
    /// error reported before the URI is even inspected.
    pub fn open(&self, scheme: &str, uri: &str) -> Result<Box<dyn DataSource>, DataSourceError> {
        let factory = self.resolve().ok_or(DataSourceError::FactoryNotRegistered)?;
        let locator = strip_scheme(uri, scheme)?;
        factory.open(locator)
    }
}

impl fmt::Debug for FactorySlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FactorySlot")
            .field("local", &self.local.get().is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_source::{MemoryDataSource, DATA_SOURCE_SCHEME};

    fn echo_factory() -> Arc<dyn DataSourceFactory> {
        Arc::new(|locator: &str| -> Result<Box<dyn DataSource>, DataSourceError> {
            Ok(Box::new(MemoryDataSource::new(locator.as_bytes().to_vec())))
        })
    }

    #[test]
    fn test_second_registration_fails() {
        let slot = FactorySlot::new();
        assert!(slot.set(echo_factory()).is_ok());
        assert_eq!(
            slot.set(echo_factory()),
            Err(DataSourceError::FactoryAlreadyRegistered)
        );
    }

    #[test]
    fn test_open_passes_locator_without_prefix() {
        let slot = FactorySlot::new();
        slot.set(echo_factory()).unwrap();

        let source = slot.open(DATA_SOURCE_SCHEME, "datasource://track-7").unwrap();
        let mut buf = [0u8; 16];
        let n = source.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"track-7");
    }

    #[test]
    fn test_open_rejects_foreign_scheme() {
        let slot = FactorySlot::new();
        slot.set(echo_factory()).unwrap();
        let err = slot.open(DATA_SOURCE_SCHEME, "http://x").err();
        assert!(matches!(err, Some(DataSourceError::InvalidUri { .. })));
    }
}
