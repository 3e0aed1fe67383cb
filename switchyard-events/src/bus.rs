//! Event Bus implementation

use crate::config::EventBusConfig;
use crate::error::{EventBusError, EventError, HandlerError, PatternError, Result};
use crate::event::{EmitOptions, Event};
use crate::listener::{EventListener, Listener, ListenerOptions, ListenerRegistry};
use crate::middleware::{EventMiddleware, Middleware, MiddlewareRegistry};
use crate::pattern::{self, PatternCache};
use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// Hierarchical topic event bus
///
/// Cloning is cheap; clones share registries and the pattern cache.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

struct BusInner {
    listeners: Arc<ListenerRegistry>,
    middleware: Arc<MiddlewareRegistry>,
    patterns: PatternCache,
    config: EventBusConfig,
}

impl EventBus {
    /// Create new event bus
    pub fn new() -> Self {
        Self::with_config(EventBusConfig::default())
    }

    /// Create event bus with custom config
    pub fn with_config(config: EventBusConfig) -> Self {
        Self {
            inner: Arc::new(BusInner {
                listeners: ListenerRegistry::new(),
                middleware: MiddlewareRegistry::new(),
                patterns: PatternCache::new(config.pattern_cache_capacity),
                config,
            }),
        }
    }

    pub fn config(&self) -> &EventBusConfig {
        &self.inner.config
    }

    fn logging(&self) -> bool {
        self.inner.config.enable_logging
    }

    /// Register a listener on a pattern
    ///
    /// # Examples
    ///
    /// ```rust,ignore
    /// let bus = EventBus::new();
    /// bus.register("user:*:updated", |event: Arc<Event>| async move {
    ///     Ok(Some(event.data().clone()))
    /// }, ListenerOptions::default())?;
    /// ```
    pub fn register<L>(&self, pattern: &str, listener: L, options: ListenerOptions) -> Result<Arc<Listener>>
    where
        L: EventListener + 'static,
    {
        self.inner.patterns.get_or_compile(pattern)?;
        if options.autodestroy.timeout.is_some() && tokio::runtime::Handle::try_current().is_err() {
            return Err(EventBusError::NoRuntime);
        }

        let listener = self.inner.listeners.insert(pattern, Box::new(listener), options);

        if self.logging() {
            debug!(
                pattern,
                listener_id = %listener.id(),
                call_limit = ?options.call_limit(),
                ttl_ms = ?options.autodestroy.timeout.map(|t| t.as_millis()),
                "Registered listener"
            );
        }

        Ok(listener)
    }

    /// Register a listener that is destroyed after its first invocation
    pub fn register_once<L>(&self, pattern: &str, listener: L) -> Result<Arc<Listener>>
    where
        L: EventListener + 'static,
    {
        self.register(pattern, listener, ListenerOptions::once())
    }

    /// Append a middleware scoped to a pattern
    ///
    /// Middleware runs in registration order for every listener invocation
    /// whose topic matches `pattern`.
    pub fn add_middleware<M>(&self, pattern: &str, middleware: M) -> Result<Arc<Middleware>>
    where
        M: EventMiddleware + 'static,
    {
        self.inner.patterns.get_or_compile(pattern)?;
        let middleware = self.inner.middleware.push(pattern, Box::new(middleware));

        if self.logging() {
            debug!(pattern, middleware_id = middleware.id(), "Added middleware");
        }

        Ok(middleware)
    }

    /// Emit with default options
    pub fn emit(&self, topic: &str, data: Value) -> Result<BoxFuture<'static, Arc<Event>>> {
        self.emit_with(topic, data, EmitOptions::default())
    }

    /// Emit an event
    ///
    /// The topic is validated before anything is scheduled, so an invalid
    /// topic is returned directly rather than from the future. The future
    /// runs every listener whose pattern matches `topic` through its own
    /// middleware chain concurrently, each raced against the timeout.
    /// Listener failures, middleware failures and timeouts are recorded on
    /// the resolved event.
    ///
    /// # Examples
    ///
    /// ```rust,ignore
    /// let event = bus.emit("user:42:updated", json!({"name": "Alice"}))?.await;
    /// for response in event.responses() { /* ... */ }
    /// ```
    pub fn emit_with(
        &self,
        topic: &str,
        data: Value,
        options: EmitOptions,
    ) -> Result<BoxFuture<'static, Arc<Event>>> {
        pattern::validate_topic(topic)?;

        let bus = self.clone();
        let topic = topic.to_string();
        Ok(async move { bus.deliver(&topic, data, options).await }.boxed())
    }

    async fn deliver(&self, topic: &str, data: Value, options: EmitOptions) -> Arc<Event> {
        let timeout = options
            .timeout
            .unwrap_or_else(|| self.inner.config.default_timeout());
        let listeners = self.inner.listeners.resolve(topic, &self.inner.patterns);
        let event = Arc::new(Event::new(topic, data, options));

        if listeners.is_empty() {
            if self.logging() {
                trace!(topic, "No listeners registered for topic");
            }
            event.seal();
            return event;
        }

        if self.logging() {
            debug!(
                topic,
                event_id = %event.id(),
                listener_count = listeners.len(),
                "Emitting event"
            );
        }

        let races = listeners
            .into_iter()
            .map(|listener| self.dispatch(event.clone(), listener, timeout));
        futures::future::join_all(races).await;

        event.seal();

        if self.logging() {
            debug!(
                topic,
                responses = event.responses().len(),
                errors = event.errors().len(),
                "Event settled"
            );
        }

        event
    }

    /// Spawn one listener's chain and race it against the timeout.
    ///
    /// On timeout the task is left running; its call accounting still
    /// happens when it finishes.
    async fn dispatch(&self, event: Arc<Event>, listener: Arc<Listener>, timeout: Duration) {
        let chain = self
            .inner
            .middleware
            .chain_for(event.topic(), &self.inner.patterns);
        let mut task = tokio::spawn(chain.run(event.clone(), self.clone(), listener.clone()));

        match tokio::time::timeout(timeout, &mut task).await {
            Ok(Ok(())) => {}
            Ok(Err(join_error)) => {
                error!(
                    topic = %event.topic(),
                    listener_id = %listener.id(),
                    "Listener task failed: {}",
                    join_error
                );
                event.error(EventError::Listener {
                    pattern: listener.pattern().to_string(),
                    listener_id: listener.id(),
                    source: HandlerError::HandlerFailed(join_error.to_string()),
                });
            }
            Err(_) => {
                warn!(
                    topic = %event.topic(),
                    pattern = %listener.pattern(),
                    timeout_ms = timeout.as_millis() as u64,
                    "Listener timed out"
                );
                event.error(EventError::Timeout {
                    topic: event.topic().to_string(),
                    pattern: listener.pattern().to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
        }
    }

    /// Remove every listener registered under this exact pattern string
    pub fn unregister_pattern(&self, pattern: &str) {
        let removed = self.inner.listeners.remove_pattern(pattern);
        if self.logging() {
            debug!(pattern, removed, "Unregistered pattern");
        }
    }

    /// Remove all listeners
    pub fn unregister_all(&self) {
        let removed = self.inner.listeners.clear();
        if self.logging() {
            info!(removed, "Cleared all listeners");
        }
    }

    /// Remove all middleware
    pub fn clear_middleware_all(&self) {
        let removed = self.inner.middleware.clear();
        if self.logging() {
            info!(removed, "Cleared all middleware");
        }
    }

    /// Drop every compiled matcher
    pub fn clear_pattern_cache(&self) {
        self.inner.patterns.clear();
    }

    /// Test a topic against a pattern using the bus's pattern cache
    pub fn matches_pattern(&self, topic: &str, pattern: &str) -> std::result::Result<bool, PatternError> {
        self.inner.patterns.matches(topic, pattern)
    }

    /// Total registered listeners
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.len()
    }

    /// Listeners registered under this exact pattern string
    pub fn listener_count_for(&self, pattern: &str) -> usize {
        self.inner.listeners.count_for(pattern)
    }

    pub fn has_listeners(&self, pattern: &str) -> bool {
        self.listener_count_for(pattern) > 0
    }

    /// Registered patterns in registration order
    pub fn patterns(&self) -> Vec<String> {
        self.inner.listeners.patterns()
    }

    pub fn middleware_count(&self) -> usize {
        self.inner.middleware.len()
    }

    pub fn pattern_cache_len(&self) -> usize {
        self.inner.patterns.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Event bus builder
pub struct EventBusBuilder {
    config: EventBusConfig,
}

impl EventBusBuilder {
    /// Create new event bus builder
    pub fn new() -> Self {
        Self {
            config: EventBusConfig::default(),
        }
    }

    /// Start from an existing configuration
    pub fn from_config(config: EventBusConfig) -> Self {
        Self { config }
    }

    /// Default per-listener timeout
    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.config.default_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Compiled-pattern cache ceiling
    pub fn pattern_cache_capacity(mut self, capacity: usize) -> Self {
        self.config.pattern_cache_capacity = capacity;
        self
    }

    /// Enable/disable logging
    pub fn enable_logging(mut self, enabled: bool) -> Self {
        self.config.enable_logging = enabled;
        self
    }

    /// Build the event bus
    pub fn build(self) -> EventBus {
        EventBus::with_config(self.config)
    }
}

impl Default for EventBusBuilder {
    fn default() -> Self {
        Self::new()
    }
}
