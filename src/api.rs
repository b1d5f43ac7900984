// Process-wide facade over a single engine instance
//
// Mirrors the static player API that platform glue code calls: one engine at a
// time, observer lists that survive engine re-creation, and one data source
// factory registered for the life of the process.

use std::sync::{Arc, PoisonError, RwLock};

use once_cell::sync::Lazy;

use crate::config::EngineConfig;
use crate::data_source::{set_global_factory, DataSourceFactory};
use crate::dispatch::{EventDispatcher, EventObserver, EventSubscription, LogObserver, ObserverId};
use crate::engine::{AppContext, EngineHandle, RenderSurface, Thumbnail};
use crate::error::{log_engine_error, DataSourceError, MpvError};
use crate::events::LogLevel;
use crate::property::{Format, Node};

// Re-export error code constants for FFI exposure
pub use crate::error::{DataSourceErrorCodes, MpvErrorCodes};

/// Observers registered through this module. Shared by every engine the
/// facade creates.
static DISPATCHER: Lazy<Arc<EventDispatcher>> = Lazy::new(|| Arc::new(EventDispatcher::new()));

/// The current engine, if `create` has been called and `destroy` has not.
static ENGINE: Lazy<RwLock<Option<Arc<EngineHandle>>>> = Lazy::new(|| RwLock::new(None));

fn current() -> Result<Arc<EngineHandle>, MpvError> {
    ENGINE
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
        .ok_or(MpvError::ContextClosed)
}

// ============================================================================
// LIFECYCLE
// ============================================================================

/// Create the process-wide engine. Fails with `InvalidParameter` while one
/// already exists.
pub fn create(app: &AppContext) -> Result<(), MpvError> {
    create_with_config(app, EngineConfig::load())
}

pub fn create_with_config(app: &AppContext, config: EngineConfig) -> Result<(), MpvError> {
    let mut slot = ENGINE.write().unwrap_or_else(PoisonError::into_inner);
    if slot.is_some() {
        log::warn!("[api] create called while an engine exists");
        return Err(MpvError::InvalidParameter);
    }
    let engine = EngineHandle::create_shared(app, config, Arc::clone(&DISPATCHER))?;
    *slot = Some(Arc::new(engine));
    Ok(())
}

pub fn init() -> Result<(), MpvError> {
    current()?.init()
}

/// Destroy the engine and clear the slot. Without an engine this is `Ok`.
pub fn destroy() -> Result<(), MpvError> {
    let engine = ENGINE
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .take();
    match engine {
        Some(engine) => engine.destroy(),
        None => Ok(()),
    }
}

pub fn is_created() -> bool {
    ENGINE
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .is_some()
}

pub fn attach_surface(surface: Arc<dyn RenderSurface>) -> Result<(), MpvError> {
    current()?.attach_surface(surface)
}

pub fn detach_surface() -> Result<(), MpvError> {
    current()?.detach_surface()
}

// ============================================================================
// COMMANDS, OPTIONS, PROPERTIES
// ============================================================================

pub fn command(args: &[&str]) -> Result<(), MpvError> {
    current()?.command(args)
}

pub fn set_option_string(name: &str, value: &str) -> Result<(), MpvError> {
    current()?.set_option_string(name, value)
}

pub fn set_option_string_array_single(name: &str, value: &str) -> Result<(), MpvError> {
    current()?.set_option_string_array_single(name, value)
}

/// `None` when the property is absent or unavailable; other failures are
/// logged and also reported as `None`.
fn absent_as_none<T>(name: &str, result: Result<T, MpvError>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(err) if err.is_absent() => None,
        Err(err) => {
            log_engine_error(&err, &format!("get property {}", name));
            None
        }
    }
}

pub fn get_property_int(name: &str) -> Option<i64> {
    absent_as_none(name, current().and_then(|engine| engine.get_property_int(name)))
}

pub fn get_property_double(name: &str) -> Option<f64> {
    absent_as_none(name, current().and_then(|engine| engine.get_property_double(name)))
}

pub fn get_property_boolean(name: &str) -> Option<bool> {
    absent_as_none(name, current().and_then(|engine| engine.get_property_bool(name)))
}

pub fn get_property_string(name: &str) -> Option<String> {
    absent_as_none(name, current().and_then(|engine| engine.get_property_string(name)))
}

pub fn get_property_node(name: &str) -> Option<Node> {
    absent_as_none(name, current().and_then(|engine| engine.get_property_node(name)))
}

pub fn set_property_int(name: &str, value: i64) -> Result<(), MpvError> {
    current()?.set_property_int(name, value)
}

pub fn set_property_double(name: &str, value: f64) -> Result<(), MpvError> {
    current()?.set_property_double(name, value)
}

pub fn set_property_boolean(name: &str, value: bool) -> Result<(), MpvError> {
    current()?.set_property_bool(name, value)
}

pub fn set_property_string(name: &str, value: &str) -> Result<(), MpvError> {
    current()?.set_property_string(name, value)
}

pub fn observe_property(name: &str, format: Format, token: u64) -> Result<(), MpvError> {
    current()?.observe_property(name, format, token)
}

pub fn unobserve_property(token: u64) -> Result<(), MpvError> {
    current()?.unobserve_property(token)
}

pub fn request_log_messages(level: LogLevel) -> Result<(), MpvError> {
    current()?.request_log_messages(level)
}

pub fn grab_thumbnail(max_dimension: u32) -> Option<Thumbnail> {
    current().ok()?.grab_thumbnail(max_dimension)
}

// ============================================================================
// DATA SOURCES AND OBSERVERS
// ============================================================================

/// Register the process-wide data source factory. Only the first call
/// succeeds.
pub fn set_data_source_factory(factory: Arc<dyn DataSourceFactory>) -> Result<(), DataSourceError> {
    set_global_factory(factory)
}

pub fn add_observer(observer: Arc<dyn EventObserver>) -> ObserverId {
    DISPATCHER.add_observer(observer)
}

pub fn remove_observer(id: ObserverId) -> bool {
    DISPATCHER.remove_observer(id)
}

pub fn add_log_observer(observer: Arc<dyn LogObserver>) -> ObserverId {
    DISPATCHER.add_log_observer(observer)
}

pub fn remove_log_observer(id: ObserverId) -> bool {
    DISPATCHER.remove_log_observer(id)
}

pub fn subscribe() -> EventSubscription {
    DISPATCHER.subscribe()
}
