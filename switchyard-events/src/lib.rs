//! Hierarchical publish/subscribe for Switchyard
//!
//! This crate provides an in-process event bus keyed by colon-delimited
//! topics, with wildcard subscriptions and a per-listener middleware chain.
//!
//! ## Features
//!
//! - **Wildcard patterns** - `*` (one segment), `**` (zero or more), `++` (one or more)
//! - **Middleware** - Onion-ordered interceptors that can annotate or short-circuit
//! - **Lifecycle** - Listeners that expire after N calls or after a timeout
//! - **Error isolation** - Failures and timeouts land on the event, never abort `emit`
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use switchyard_events::*;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let bus = EventBus::new();
//!
//!     bus.register("user:*:updated", |event: Arc<Event>| async move {
//!         println!("user updated: {}", event.data());
//!         Ok(Some(json!("ack")))
//!     }, ListenerOptions::default())?;
//!
//!     let event = bus.emit("user:42:updated", json!({"name": "Alice"}))?.await;
//!     assert_eq!(event.responses(), vec![json!("ack")]);
//!     Ok(())
//! }
//! ```
//!
//! ## Middleware
//!
//! ```rust,ignore
//! bus.add_middleware("admin:**", |ctx: MiddlewareContext, next: Next| async move {
//!     if ctx.event.data()["token"].is_null() {
//!         ctx.event.respond(json!({"denied": true}));
//!         return Ok(()); // listener never runs
//!     }
//!     next().await;
//!     Ok(())
//! })?;
//! ```
//!
//! ## Lifecycle
//!
//! ```rust,ignore
//! bus.register_once("app:ready", on_ready)?;
//! bus.register("poll:tick", on_tick, ListenerOptions::new().max_calls(3))?;
//! bus.register("session:**", on_session, ListenerOptions::new().ttl_ms(30_000))?;
//! ```
//!
//! ## Configuration
//!
//! ```rust,ignore
//! let bus = EventBusBuilder::new()
//!     .default_timeout(Duration::from_secs(2))  // Per-listener settle bound
//!     .pattern_cache_capacity(500)              // Compiled pattern ceiling
//!     .enable_logging(true)                     // Log events
//!     .build();
//! ```

pub mod bus;
pub mod config;
pub mod error;
pub mod event;
pub mod listener;
pub mod middleware;
pub mod pattern;

pub use bus::{EventBus, EventBusBuilder};
pub use config::{ConfigError, EventBusConfig};
pub use error::{EventBusError, EventError, HandlerError, PatternError};
pub use event::{EmitOptions, Event, EventContext};
pub use listener::{AutoDestroy, EventListener, HandlerResult, Listener, ListenerOptions};
pub use middleware::{EventMiddleware, Middleware, MiddlewareContext, Next};
pub use pattern::{Matcher, compile, validate_pattern, validate_topic};
