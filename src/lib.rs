// Switchyard - hierarchical in-process publish/subscribe for Rust
//
// This library re-exports the event bus and, with the `log` feature, the
// environment-driven logging setup.

// Re-export core functionality
pub use switchyard_events::*;

#[cfg(feature = "log")]
pub use switchyard_log;

/// Install the `SWITCHYARD_*`-configured tracing subscriber.
#[cfg(feature = "log")]
pub fn init_logging() {
    switchyard_log::init();
}

// Prelude for common imports
pub mod prelude {
    pub use crate::{
        EmitOptions,
        Event,
        EventBus,
        EventBusBuilder,
        EventBusConfig,
        EventBusError,
        EventError,
        EventListener,
        EventMiddleware,
        HandlerError,
        HandlerResult,
        Listener,
        ListenerOptions,
        MiddlewareContext,
        Next,
        PatternError,
    };

    pub use async_trait::async_trait;
    pub use serde_json::{Value, json};
    pub use std::sync::Arc;
}
