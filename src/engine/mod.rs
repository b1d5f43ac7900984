//! Engine module housing the boundary core.
//!
//! This module exposes trait-based backends (`backend`), the `EngineHandle`
//! lifecycle layer (`core`), the event thread feeding the dispatcher and
//! thumbnail scaling.

pub mod backend;
pub mod core;
mod event_loop;
pub mod thumbnail;

#[cfg(feature = "libmpv")]
pub use backend::LibmpvBackend;
pub use backend::{
    default_backend, EventPayload, NativeBackend, NativeEvent, StreamOpener, StubBackend,
};
pub use self::core::{AppContext, EngineHandle, RenderSurface, MAX_COMMAND_ARGS};
pub use event_loop::forward_to_tracing;
pub use thumbnail::{fit_dimensions, scale_to_fit, Frame, PixelFormat, Thumbnail};
