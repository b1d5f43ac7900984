// Dispatch Module
//
// Delivery of engine callbacks to application observers:
// - ObserverRegistry: copy-on-write membership, safe against concurrent change
// - EventDispatcher: fault-isolating fan-out over a registry snapshot
// - EventSubscription: channel/Stream adapter for async consumers

pub mod dispatcher;
pub mod observer;
pub mod registry;
pub mod subscription;

pub use dispatcher::{DispatchStats, EventDispatcher};
pub use observer::{EventObserver, LogObserver};
pub use registry::{ObserverId, ObserverRegistry};
pub use subscription::EventSubscription;
