// Middleware system for per-listener event processing

use crate::bus::EventBus;
use crate::error::{EventError, HandlerError};
use crate::event::Event;
use crate::listener::Listener;
use crate::pattern::PatternCache;
use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, trace, warn};

/// The rest of the chain. Awaiting `next()` runs the remaining middleware
/// and then the listener; failures downstream are recorded on the event at
/// the frame that raised them, so `next()` itself cannot fail.
pub type Next = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

/// What a middleware sees for one listener invocation.
#[derive(Clone)]
pub struct MiddlewareContext {
    pub event: Arc<Event>,
    pub bus: EventBus,
    pub listener: Arc<Listener>,
}

/// Middleware trait for intercepting an event before a listener sees it.
///
/// Not calling `next()` stops the chain for this listener.
#[async_trait]
pub trait EventMiddleware: Send + Sync {
    async fn handle(&self, ctx: MiddlewareContext, next: Next) -> Result<(), HandlerError>;
}

#[async_trait]
impl<F, Fut> EventMiddleware for F
where
    F: Fn(MiddlewareContext, Next) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    async fn handle(&self, ctx: MiddlewareContext, next: Next) -> Result<(), HandlerError> {
        (self)(ctx, next).await
    }
}

/// A registered middleware entry.
pub struct Middleware {
    id: u64,
    pattern: String,
    handler: Box<dyn EventMiddleware>,
    destroyed: AtomicBool,
    registry: Weak<MiddlewareRegistry>,
}

impl std::fmt::Debug for Middleware {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Middleware")
            .field("id", &self.id)
            .field("pattern", &self.pattern)
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

impl Middleware {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Remove from the registry. Returns `false` if already destroyed.
    pub fn destroy(&self) -> bool {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return false;
        }
        if let Some(registry) = self.registry.upgrade() {
            registry.entries.write().retain(|m| m.id != self.id);
        }
        debug!(middleware_id = self.id, pattern = %self.pattern, "Middleware destroyed");
        true
    }
}

/// Ordered list of pattern-scoped middleware.
#[derive(Default)]
pub struct MiddlewareRegistry {
    entries: RwLock<Vec<Arc<Middleware>>>,
    next_id: AtomicU64,
}

impl MiddlewareRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Append a middleware; the pattern must already be validated.
    pub(crate) fn push(
        self: &Arc<Self>,
        pattern: &str,
        handler: Box<dyn EventMiddleware>,
    ) -> Arc<Middleware> {
        let middleware = Arc::new(Middleware {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            pattern: pattern.to_string(),
            handler,
            destroyed: AtomicBool::new(false),
            registry: Arc::downgrade(self),
        });
        self.entries.write().push(middleware.clone());
        middleware
    }

    pub fn clear(&self) -> usize {
        let removed = std::mem::take(&mut *self.entries.write());
        for middleware in &removed {
            middleware.destroyed.store(true, Ordering::SeqCst);
        }
        removed.len()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Build the chain for one listener invocation on `topic`.
    pub fn chain_for(&self, topic: &str, patterns: &PatternCache) -> MiddlewareChain {
        let middlewares = self
            .entries
            .read()
            .iter()
            .filter(|m| match patterns.matches(topic, &m.pattern) {
                Ok(matched) => matched,
                Err(e) => {
                    warn!(pattern = %m.pattern, error = %e, "Skipping unmatchable middleware");
                    false
                }
            })
            .cloned()
            .collect();
        MiddlewareChain {
            middlewares: Arc::new(middlewares),
        }
    }
}

/// Middleware chain executor.
///
/// Runs matching middleware in registration order and bottoms out in the
/// listener callback. Each frame catches its own errors and panics and
/// records them on the event.
#[derive(Clone)]
pub struct MiddlewareChain {
    middlewares: Arc<Vec<Arc<Middleware>>>,
}

impl MiddlewareChain {
    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }

    /// Execute the chain for one listener.
    pub async fn run(self, event: Arc<Event>, bus: EventBus, listener: Arc<Listener>) {
        trace!(
            middleware_count = self.middlewares.len(),
            topic = %event.topic(),
            listener_id = %listener.id(),
            "Executing middleware chain"
        );
        let ctx = MiddlewareContext {
            event,
            bus,
            listener,
        };
        self.execute_from(0, ctx).await
    }

    fn execute_from(&self, index: usize, ctx: MiddlewareContext) -> BoxFuture<'static, ()> {
        if index >= self.middlewares.len() {
            return Box::pin(invoke_listener(ctx.event, ctx.listener));
        }

        let middleware = self.middlewares[index].clone();
        let chain = self.clone();
        Box::pin(async move {
            let event = ctx.event.clone();
            let downstream = ctx.clone();
            let next: Next = Box::new(move || chain.execute_from(index + 1, downstream));

            let outcome = AssertUnwindSafe(middleware.handler.handle(ctx, next))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| Err(HandlerError::from_panic(panic)));

            if let Err(source) = outcome {
                warn!(
                    topic = %event.topic(),
                    pattern = %middleware.pattern,
                    error = %source,
                    "Middleware failed"
                );
                event.error(EventError::Middleware {
                    pattern: middleware.pattern.clone(),
                    source,
                });
            }
        })
    }
}

/// Terminal frame: call the listener, record its outcome, count the call.
async fn invoke_listener(event: Arc<Event>, listener: Arc<Listener>) {
    if listener.is_destroyed() {
        trace!(listener_id = %listener.id(), "Skipping destroyed listener");
        return;
    }

    let outcome = AssertUnwindSafe(listener.invoke(event.clone()))
        .catch_unwind()
        .await
        .unwrap_or_else(|panic| Err(HandlerError::from_panic(panic)));

    match outcome {
        Ok(Some(value)) => event.respond(value),
        Ok(None) => {}
        Err(source) => {
            warn!(
                topic = %event.topic(),
                pattern = %listener.pattern(),
                error = %source,
                "Listener failed"
            );
            event.error(EventError::Listener {
                pattern: listener.pattern().to_string(),
                listener_id: listener.id(),
                source,
            });
        }
    }

    listener.record_call();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::{HandlerResult, ListenerOptions, ListenerRegistry};
    use parking_lot::Mutex;
    use serde_json::json;

    type CallOrder = Arc<Mutex<Vec<String>>>;

    fn recording(order: &CallOrder, name: &'static str) -> Box<dyn EventMiddleware> {
        let order = order.clone();
        Box::new(move |_ctx: MiddlewareContext, next: Next| {
            let order = order.clone();
            async move {
                order.lock().push(format!("{name}-pre"));
                next().await;
                order.lock().push(format!("{name}-post"));
                Ok::<(), HandlerError>(())
            }
        })
    }

    fn setup(order: &CallOrder) -> (EventBus, Arc<Listener>) {
        let bus = EventBus::new();
        let registry = ListenerRegistry::new();
        let order = order.clone();
        let listener = registry.insert(
            "a:*",
            Box::new(move |_event: Arc<Event>| {
                let order = order.clone();
                async move {
                    order.lock().push("L".to_string());
                    HandlerResult::Ok(Some(json!("done")))
                }
            }),
            ListenerOptions::default(),
        );
        (bus, listener)
    }

    #[tokio::test]
    async fn test_onion_ordering() {
        let order: CallOrder = Arc::default();
        let (bus, listener) = setup(&order);
        let registry = MiddlewareRegistry::new();
        registry.push("a:*", recording(&order, "M1"));
        registry.push("**", recording(&order, "M2"));
        registry.push("other", recording(&order, "M3"));

        let cache = PatternCache::default();
        let chain = registry.chain_for("a:b", &cache);
        assert_eq!(chain.len(), 2);

        let event = Arc::new(Event::new("a:b", json!(null), Default::default()));
        chain.run(event.clone(), bus, listener.clone()).await;

        assert_eq!(
            *order.lock(),
            vec!["M1-pre", "M2-pre", "L", "M2-post", "M1-post"]
        );
        assert_eq!(event.responses(), vec![json!("done")]);
        assert_eq!(listener.calls(), 1);
    }

    #[tokio::test]
    async fn test_failing_middleware_halts_its_chain() {
        let order: CallOrder = Arc::default();
        let (bus, listener) = setup(&order);
        let registry = MiddlewareRegistry::new();
        registry.push(
            "**",
            Box::new(|_ctx: MiddlewareContext, _next: Next| async {
                Err::<(), _>(HandlerError::failed("denied"))
            }),
        );
        registry.push("**", recording(&order, "M2"));

        let event = Arc::new(Event::new("a:b", json!(null), Default::default()));
        registry
            .chain_for("a:b", &PatternCache::default())
            .run(event.clone(), bus, listener.clone())
            .await;

        assert!(order.lock().is_empty());
        assert_eq!(listener.calls(), 0);
        let errors = event.errors();
        assert_eq!(errors.len(), 1);
        assert!(matches!(&errors[0], EventError::Middleware { pattern, .. } if pattern == "**"));
    }

    #[tokio::test]
    async fn test_panicking_middleware_is_recorded() {
        let order: CallOrder = Arc::default();
        let (bus, listener) = setup(&order);
        let registry = MiddlewareRegistry::new();
        registry.push(
            "**",
            Box::new(|_ctx: MiddlewareContext, _next: Next| async {
                if true {
                    panic!("middleware exploded");
                }
                Ok::<(), HandlerError>(())
            }),
        );

        let event = Arc::new(Event::new("a:b", json!(null), Default::default()));
        registry
            .chain_for("a:b", &PatternCache::default())
            .run(event.clone(), bus, listener)
            .await;

        let errors = event.errors();
        assert_eq!(errors.len(), 1);
        assert!(matches!(
            &errors[0],
            EventError::Middleware { source: HandlerError::Panicked(msg), .. } if msg == "middleware exploded"
        ));
    }

    #[test]
    fn test_destroy_and_clear() {
        let order: CallOrder = Arc::default();
        let registry = MiddlewareRegistry::new();
        let first = registry.push("**", recording(&order, "M1"));
        registry.push("**", recording(&order, "M2"));
        assert_eq!(registry.len(), 2);

        assert!(first.destroy());
        assert!(!first.destroy());
        assert_eq!(registry.len(), 1);

        assert_eq!(registry.clear(), 1);
        assert!(registry.is_empty());
    }
}
