// mpv bridge core - boundary between an application and the mpv player engine
// Event dispatch, typed properties and application-supplied data sources

// Module declarations
pub mod api;
pub mod config;
pub mod data_source;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod events;
pub mod property;

// Re-exports for convenience
pub use config::EngineConfig;
pub use data_source::{DataSource, DataSourceFactory, DATA_SOURCE_PREFIX, DATA_SOURCE_SCHEME};
pub use dispatch::{EventDispatcher, EventObserver, EventSubscription, LogObserver, ObserverId};
pub use engine::{AppContext, EngineHandle, RenderSurface, Thumbnail};
pub use error::{DataSourceError, ErrorCode, MpvError};
pub use events::{
    CommandReply, EndFile, EndFileReason, Event, EventId, LogLevel, LogLine, PropertyChange,
    PropertyValue,
};
pub use property::{Format, Node, PropertyCodec};

/// Install the logging subscriber (logcat on Android)
///
/// Safe to call more than once; only the first call installs anything.
#[cfg(target_os = "android")]
pub fn init_logging() {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    match tracing_android::layer("MpvBridge") {
        Ok(layer) => {
            let _ = tracing_subscriber::registry().with(layer).try_init();
        }
        Err(err) => eprintln!("failed to open logcat: {}", err),
    }
}

/// Install the logging subscriber (stderr on desktop)
///
/// Safe to call more than once; only the first call installs anything.
#[cfg(not(target_os = "android"))]
pub fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_writer(std::io::stderr)
        .try_init();
}
