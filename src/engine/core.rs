//! EngineHandle: owns one engine instance and serializes every call into it.
//!
//! The backend lives behind an `RwLock<Option<..>>`. Operations take the read
//! side and fail with `ContextClosed` once `destroy` has taken the backend
//! out, so nothing touches a terminated engine. Native callbacks flow through
//! the event thread (`EventLoop`) into the shared [`EventDispatcher`], and
//! stream opens go through the per-instance [`FactorySlot`].

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::thread::{self, JoinHandle};

use crate::config::EngineConfig;
use crate::data_source::{has_scheme, DataSourceFactory, FactorySlot, OpenStreams};
use crate::dispatch::{
    DispatchStats, EventDispatcher, EventObserver, EventSubscription, LogObserver, ObserverId,
};
use crate::engine::backend::{default_backend, NativeBackend, StreamOpener};
use crate::engine::event_loop::EventLoop;
use crate::engine::thumbnail::{scale_to_fit, Thumbnail};
use crate::error::{log_data_source_error, log_engine_error, DataSourceError, MpvError};
use crate::events::LogLevel;
use crate::property::{Format, Node, PropertyCodec};

/// Most arguments a single command may carry.
pub const MAX_COMMAND_ARGS: usize = 128;

/// Application directories handed to the engine at `create`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppContext {
    pub config_dir: Option<PathBuf>,
    pub cache_dir: Option<PathBuf>,
}

impl AppContext {
    pub fn new(config_dir: impl Into<PathBuf>, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: Some(config_dir.into()),
            cache_dir: Some(cache_dir.into()),
        }
    }

    /// Options derived from the directories, in the order they are applied.
    fn options(&self) -> Vec<(&'static str, String)> {
        let mut options = Vec::new();
        if let Some(dir) = &self.config_dir {
            options.push(("config", "yes".to_string()));
            options.push(("config-dir", dir.display().to_string()));
        }
        if let Some(dir) = &self.cache_dir {
            options.push(("gpu-shader-cache-dir", dir.display().to_string()));
            options.push(("icc-cache-dir", dir.display().to_string()));
        }
        options
    }
}

/// A platform rendering target. Kept alive for as long as it is attached.
pub trait RenderSurface: Send + Sync {
    /// Native window id passed to the engine as option `wid`.
    fn window_id(&self) -> i64;
}

#[derive(Default)]
struct Lifecycle {
    initialized: bool,
    destroyed: bool,
    event_thread: Option<JoinHandle<()>>,
}

/// Handle bound 1:1 to an engine instance.
pub struct EngineHandle {
    backend: RwLock<Option<Arc<dyn NativeBackend>>>,
    lifecycle: Mutex<Lifecycle>,
    dispatcher: Arc<EventDispatcher>,
    factories: Arc<FactorySlot>,
    streams: Arc<OpenStreams>,
    surface: Mutex<Option<Arc<dyn RenderSurface>>>,
    shutdown: Arc<AtomicBool>,
    next_token: AtomicU64,
    config: EngineConfig,
}

impl EngineHandle {
    // ========================================================================
    // CONSTRUCTION
    // ========================================================================

    /// Create an engine with the configuration from `MPV_BRIDGE_CONFIG` (or
    /// defaults) and the default backend.
    pub fn create(app: &AppContext) -> Result<Self, MpvError> {
        Self::create_with_config(app, EngineConfig::load())
    }

    pub fn create_with_config(app: &AppContext, config: EngineConfig) -> Result<Self, MpvError> {
        let backend = default_backend().map_err(|err| {
            log_engine_error(&err, "create");
            err
        })?;
        Self::with_backend(app, config, backend)
    }

    /// Wire an already constructed backend. Registering the stream protocol
    /// is the only step whose failure aborts creation; option failures are
    /// logged and skipped.
    pub fn with_backend(
        app: &AppContext,
        config: EngineConfig,
        backend: Arc<dyn NativeBackend>,
    ) -> Result<Self, MpvError> {
        Self::build(app, config, backend, Arc::new(EventDispatcher::new()))
    }

    /// Create with the default backend, delivering into an existing
    /// dispatcher whose observers outlive this instance.
    pub(crate) fn create_shared(
        app: &AppContext,
        config: EngineConfig,
        dispatcher: Arc<EventDispatcher>,
    ) -> Result<Self, MpvError> {
        let backend = default_backend().map_err(|err| {
            log_engine_error(&err, "create");
            err
        })?;
        Self::build(app, config, backend, dispatcher)
    }

    fn build(
        app: &AppContext,
        config: EngineConfig,
        backend: Arc<dyn NativeBackend>,
        dispatcher: Arc<EventDispatcher>,
    ) -> Result<Self, MpvError> {
        let factories = Arc::new(FactorySlot::new());
        let streams = Arc::new(OpenStreams::new());

        let opener: StreamOpener = {
            let factories = Arc::clone(&factories);
            let streams = Arc::clone(&streams);
            let scheme = config.data_source.scheme.clone();
            let chunk = config.data_source.read_chunk_size;
            Arc::new(move |uri: &str| streams.open(&factories, &scheme, uri, chunk))
        };
        backend
            .register_stream_protocol(&config.data_source.scheme, opener)
            .map_err(|err| {
                log_engine_error(&err, "create: register stream protocol");
                err
            })?;

        if let Err(err) = backend.request_log_messages(config.log.request_level) {
            log_engine_error(&err, "create: request log messages");
        }

        let mut options = vec![("msg-level", config.log.msg_level.clone())];
        options.extend(app.options());
        for (name, value) in options {
            apply_option(backend.as_ref(), name, &value);
        }
        for (name, value) in &config.options {
            apply_option(backend.as_ref(), name, value);
        }

        tracing::info!(
            backend = backend.name(),
            scheme = %config.data_source.scheme,
            "engine created"
        );

        Ok(Self {
            backend: RwLock::new(Some(backend)),
            lifecycle: Mutex::new(Lifecycle::default()),
            dispatcher,
            factories,
            streams,
            surface: Mutex::new(None),
            shutdown: Arc::new(AtomicBool::new(false)),
            next_token: AtomicU64::new(1),
            config,
        })
    }

    // ========================================================================
    // LIFECYCLE
    // ========================================================================

    /// Initialize the engine and start the event thread. Calling it again
    /// is a no-op.
    pub fn init(&self) -> Result<(), MpvError> {
        let mut lifecycle = self.lock_lifecycle();
        if lifecycle.destroyed {
            return Err(MpvError::ContextClosed);
        }
        if lifecycle.initialized {
            return Ok(());
        }

        let backend = self.backend_arc()?;
        backend.initialize().map_err(|err| {
            log_engine_error(&err, "init");
            err
        })?;

        let event_loop = EventLoop::new(
            Arc::clone(&backend),
            Arc::clone(&self.dispatcher),
            Arc::clone(&self.shutdown),
            self.config.log.forward_to_tracing,
        );
        let thread = event_loop
            .spawn(&self.config.event_thread_name)
            .map_err(|err| {
                tracing::error!("failed to spawn event thread: {}", err);
                MpvError::NoMemory
            })?;

        lifecycle.event_thread = Some(thread);
        lifecycle.initialized = true;
        tracing::info!("engine initialized");
        Ok(())
    }

    /// Tear the engine down. Pending stream reads are cancelled first so the
    /// event and demux threads can be joined; every open stream is closed
    /// last. A second call returns `Ok`.
    pub fn destroy(&self) -> Result<(), MpvError> {
        let mut lifecycle = self.lock_lifecycle();
        let backend = self
            .backend
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(backend) = backend else {
            return Ok(());
        };

        let event_thread = lifecycle.event_thread.take();
        lifecycle.destroyed = true;
        // Observers on the event thread may query the handle while we join.
        drop(lifecycle);

        let cancelled = self.streams.cancel_all();
        self.shutdown.store(true, Ordering::SeqCst);
        backend.wakeup();

        if let Some(thread) = event_thread {
            if thread.thread().id() == thread::current().id() {
                // Destroyed from an observer; the loop sees the flag and exits.
                tracing::debug!("destroy called on the event thread, not joining");
            } else if thread.join().is_err() {
                tracing::error!("event thread panicked");
            }
        }

        self.surface
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        backend.terminate();
        let closed = self.streams.close_all();

        tracing::info!(cancelled, closed, "engine destroyed");
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.lock_lifecycle().initialized
    }

    pub fn is_destroyed(&self) -> bool {
        self.lock_lifecycle().destroyed
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Name of the backend, or `None` once destroyed.
    pub fn backend_name(&self) -> Option<&'static str> {
        self.with_live_backend(|backend| Ok(backend.name())).ok()
    }

    /// Number of data source streams currently open.
    pub fn open_stream_count(&self) -> usize {
        self.streams.live().len()
    }

    // ========================================================================
    // SURFACE
    // ========================================================================

    pub fn attach_surface(&self, surface: Arc<dyn RenderSurface>) -> Result<(), MpvError> {
        let wid = surface.window_id();
        self.with_live_backend(|backend| backend.set_option("wid", &Node::Int64(wid)))
            .map_err(|err| {
                log_engine_error(&err, "attach_surface");
                err
            })?;
        *self.surface.lock().unwrap_or_else(PoisonError::into_inner) = Some(surface);
        tracing::debug!(wid, "surface attached");
        Ok(())
    }

    pub fn detach_surface(&self) -> Result<(), MpvError> {
        let mut surface = self.surface.lock().unwrap_or_else(PoisonError::into_inner);
        if surface.is_none() {
            return self.with_live_backend(|_| Ok(()));
        }
        self.with_live_backend(|backend| backend.set_option("wid", &Node::Int64(0)))?;
        surface.take();
        tracing::debug!("surface detached");
        Ok(())
    }

    pub fn has_surface(&self) -> bool {
        self.surface
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    // ========================================================================
    // COMMANDS AND OPTIONS
    // ========================================================================

    /// Queue a command. `Ok` only means it was accepted; the outcome arrives
    /// as a COMMAND_REPLY event with token 0.
    pub fn command(&self, args: &[&str]) -> Result<(), MpvError> {
        self.command_with_token(args, 0)
    }

    /// Like [`command`](Self::command), with a caller-chosen reply token.
    pub fn command_with_token(&self, args: &[&str], token: u64) -> Result<(), MpvError> {
        let result = self.with_live_backend(|backend| {
            if args.is_empty() || args.len() >= MAX_COMMAND_ARGS {
                return Err(MpvError::InvalidParameter);
            }
            let scheme = self.config.data_source.scheme.as_str();
            if args.iter().any(|arg| has_scheme(arg, scheme)) && !self.factories.is_resolvable() {
                log_data_source_error(&DataSourceError::FactoryNotRegistered, "command");
                return Err(MpvError::LoadingFailed);
            }
            backend.command_async(token, args)
        });
        if let Err(err) = &result {
            log_engine_error(err, &format!("command {:?}", args.first()));
        }
        result
    }

    /// Queue a command with a fresh reply token and return that token.
    pub fn command_tracked(&self, args: &[&str]) -> Result<u64, MpvError> {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        self.command_with_token(args, token)?;
        Ok(token)
    }

    pub fn set_option_string(&self, name: &str, value: &str) -> Result<(), MpvError> {
        self.with_live_backend(|backend| backend.set_option(name, &Node::String(value.to_string())))
    }

    /// Set an option to a one-element list so `value` is never split on
    /// `,` or `:`.
    pub fn set_option_string_array_single(&self, name: &str, value: &str) -> Result<(), MpvError> {
        let list = Node::Array(vec![Node::String(value.to_string())]);
        self.with_live_backend(|backend| backend.set_option(name, &list))
    }

    // ========================================================================
    // PROPERTIES
    // ========================================================================

    pub fn get_property<T: PropertyCodec>(&self, name: &str) -> Result<T, MpvError> {
        let node = self.with_live_backend(|backend| backend.get_property(name, T::FORMAT))?;
        T::from_node(node)
    }

    pub fn set_property<T: PropertyCodec>(&self, name: &str, value: T) -> Result<(), MpvError> {
        let node = value.into_node();
        self.with_live_backend(|backend| backend.set_property(name, &node))
    }

    pub fn get_property_int(&self, name: &str) -> Result<i64, MpvError> {
        self.get_property(name)
    }

    pub fn get_property_double(&self, name: &str) -> Result<f64, MpvError> {
        self.get_property(name)
    }

    pub fn get_property_bool(&self, name: &str) -> Result<bool, MpvError> {
        self.get_property(name)
    }

    pub fn get_property_string(&self, name: &str) -> Result<String, MpvError> {
        self.get_property(name)
    }

    pub fn get_property_node(&self, name: &str) -> Result<Node, MpvError> {
        self.get_property(name)
    }

    pub fn set_property_int(&self, name: &str, value: i64) -> Result<(), MpvError> {
        self.set_property(name, value)
    }

    pub fn set_property_double(&self, name: &str, value: f64) -> Result<(), MpvError> {
        self.set_property(name, value)
    }

    pub fn set_property_bool(&self, name: &str, value: bool) -> Result<(), MpvError> {
        self.set_property(name, value)
    }

    pub fn set_property_string(&self, name: &str, value: &str) -> Result<(), MpvError> {
        self.set_property(name, value.to_string())
    }

    /// Watch `name`; changes arrive as PROPERTY_CHANGE events carrying
    /// `token`, starting with the current value.
    pub fn observe_property(&self, name: &str, format: Format, token: u64) -> Result<(), MpvError> {
        self.with_live_backend(|backend| backend.observe_property(token, name, format))
    }

    pub fn unobserve_property(&self, token: u64) -> Result<(), MpvError> {
        self.with_live_backend(|backend| backend.unobserve_property(token))
    }

    pub fn request_log_messages(&self, level: LogLevel) -> Result<(), MpvError> {
        self.with_live_backend(|backend| backend.request_log_messages(level))
    }

    /// Current frame scaled to fit `max_dimension`. Returns `None` on any
    /// failure.
    pub fn grab_thumbnail(&self, max_dimension: u32) -> Option<Thumbnail> {
        match self.with_live_backend(|backend| backend.grab_frame()) {
            Ok(frame) => {
                let thumbnail = scale_to_fit(&frame, max_dimension);
                if thumbnail.is_none() {
                    tracing::debug!(max_dimension, "frame could not be scaled");
                }
                thumbnail
            }
            Err(err) => {
                tracing::debug!(code = ?err, "no frame for thumbnail");
                None
            }
        }
    }

    // ========================================================================
    // DATA SOURCES
    // ========================================================================

    /// Register the factory serving `datasource://` URIs for this instance.
    /// Without one, the process-wide factory is used.
    pub fn set_data_source_factory(
        &self,
        factory: Arc<dyn DataSourceFactory>,
    ) -> Result<(), DataSourceError> {
        if self.is_destroyed() {
            return Err(DataSourceError::Closed);
        }
        self.factories.set(factory).map_err(|err| {
            log_data_source_error(&err, "set_data_source_factory");
            err
        })
    }

    // ========================================================================
    // OBSERVERS
    // ========================================================================

    pub fn add_observer(&self, observer: Arc<dyn EventObserver>) -> ObserverId {
        self.dispatcher.add_observer(observer)
    }

    pub fn remove_observer(&self, id: ObserverId) -> bool {
        self.dispatcher.remove_observer(id)
    }

    pub fn add_log_observer(&self, observer: Arc<dyn LogObserver>) -> ObserverId {
        self.dispatcher.add_log_observer(observer)
    }

    pub fn remove_log_observer(&self, id: ObserverId) -> bool {
        self.dispatcher.remove_log_observer(id)
    }

    pub fn dispatcher(&self) -> &Arc<EventDispatcher> {
        &self.dispatcher
    }

    pub fn subscribe(&self) -> EventSubscription {
        self.dispatcher.subscribe()
    }

    pub fn subscribe_with_logs(&self) -> EventSubscription {
        self.dispatcher.subscribe_with_logs()
    }

    pub fn dispatch_stats(&self) -> DispatchStats {
        self.dispatcher.stats()
    }

    // ========================================================================
    // HELPERS
    // ========================================================================

    /// Run `f` against the live backend. The read guard is held for the
    /// whole call so `destroy` cannot terminate the engine underneath it.
    fn with_live_backend<T>(
        &self,
        f: impl FnOnce(&Arc<dyn NativeBackend>) -> Result<T, MpvError>,
    ) -> Result<T, MpvError> {
        let guard = self.backend.read().unwrap_or_else(PoisonError::into_inner);
        match guard.as_ref() {
            Some(backend) => f(backend),
            None => Err(MpvError::ContextClosed),
        }
    }

    fn backend_arc(&self) -> Result<Arc<dyn NativeBackend>, MpvError> {
        self.with_live_backend(|backend| Ok(Arc::clone(backend)))
    }

    fn lock_lifecycle(&self) -> std::sync::MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for EngineHandle {
    fn drop(&mut self) {
        if let Err(err) = self.destroy() {
            log_engine_error(&err, "drop");
        }
    }
}

fn apply_option(backend: &dyn NativeBackend, name: &str, value: &str) {
    if let Err(err) = backend.set_option(name, &Node::String(value.to_string())) {
        tracing::warn!(option = name, value, code = ?err, "engine rejected option");
    }
}
