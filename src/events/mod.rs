//! Event system for resolution runs

pub mod event_bus;

// Re-export main types
pub use event_bus::{
    EventBus, EventHandler, LoggingEventHandler, MetricsEventHandler, ResolutionEvent,
};
