//! Listeners, their lifecycle options, and the registry that owns them.

use crate::error::HandlerError;
use crate::event::Event;
use crate::pattern::PatternCache;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

/// What a listener returns: `Some(value)` is appended to the event's responses.
pub type HandlerResult = Result<Option<Value>, HandlerError>;

/// Listener callback.
///
/// Implemented for any `Fn(Arc<Event>) -> impl Future<Output = HandlerResult>`.
///
/// ```rust,ignore
/// bus.register("user:*:updated", |event: Arc<Event>| async move {
///     Ok(Some(json!({ "seen": event.topic() })))
/// }, ListenerOptions::default())?;
/// ```
#[async_trait]
pub trait EventListener: Send + Sync {
    async fn handle(&self, event: Arc<Event>) -> HandlerResult;
}

#[async_trait]
impl<F, Fut> EventListener for F
where
    F: Fn(Arc<Event>) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    async fn handle(&self, event: Arc<Event>) -> HandlerResult {
        (self)(event).await
    }
}

/// Automatic destruction thresholds; whichever is reached first wins.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AutoDestroy {
    /// Destroy after this many completed invocations; `Some(0)` means no limit
    pub calls: Option<u32>,
    /// Destroy this long after registration
    pub timeout: Option<Duration>,
}

/// Registration options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListenerOptions {
    /// Shorthand for `autodestroy.calls = 1`
    pub once: bool,
    pub autodestroy: AutoDestroy,
}

impl ListenerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn once() -> Self {
        Self {
            once: true,
            ..Self::default()
        }
    }

    pub fn max_calls(mut self, calls: u32) -> Self {
        self.autodestroy.calls = Some(calls);
        self
    }

    pub fn ttl(mut self, timeout: Duration) -> Self {
        self.autodestroy.timeout = Some(timeout);
        self
    }

    pub fn ttl_ms(self, ms: u64) -> Self {
        self.ttl(Duration::from_millis(ms))
    }

    /// Effective call limit after applying `once`.
    ///
    /// A zero limit is treated as no limit.
    pub fn call_limit(&self) -> Option<u32> {
        if self.once {
            Some(1)
        } else {
            self.autodestroy.calls.filter(|&calls| calls > 0)
        }
    }
}

/// A registered listener.
///
/// Holds a non-owning reference back to its registry so it can remove
/// itself on destruction.
pub struct Listener {
    id: Uuid,
    pattern: String,
    options: ListenerOptions,
    handler: Box<dyn EventListener>,
    calls: AtomicU32,
    destroyed: AtomicBool,
    timer: Mutex<Option<JoinHandle<()>>>,
    registry: Weak<ListenerRegistry>,
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener")
            .field("id", &self.id)
            .field("pattern", &self.pattern)
            .field("options", &self.options)
            .field("calls", &self.calls())
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

impl Listener {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn options(&self) -> &ListenerOptions {
        &self.options
    }

    /// Completed invocations so far.
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::SeqCst)
    }

    /// Remove this listener from its registry and cancel its timer.
    ///
    /// Returns `false` if it was already destroyed.
    pub fn destroy(&self) -> bool {
        if !self.detach() {
            return false;
        }
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self);
        }
        debug!(listener_id = %self.id, pattern = %self.pattern, "Listener destroyed");
        true
    }

    /// Mark destroyed and cancel the timer without touching the registry.
    fn detach(&self) -> bool {
        if self.destroyed.swap(true, Ordering::SeqCst) {
            return false;
        }
        if let Some(timer) = self.timer.lock().take() {
            timer.abort();
        }
        true
    }

    pub(crate) async fn invoke(&self, event: Arc<Event>) -> HandlerResult {
        self.handler.handle(event).await
    }

    /// Count one completed invocation and apply the call limit.
    pub(crate) fn record_call(&self) {
        let calls = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(limit) = self.options.call_limit() {
            if calls >= limit {
                debug!(
                    listener_id = %self.id,
                    calls,
                    "Listener reached its call limit"
                );
                self.destroy();
            }
        }
    }

    fn arm_timer(self: &Arc<Self>, timeout: Duration) {
        let weak = Arc::downgrade(self);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(listener) = weak.upgrade() {
                // drop our own handle first so destroy() doesn't abort this task
                listener.timer.lock().take();
                listener.destroy();
            }
        });
        *self.timer.lock() = Some(handle);
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.get_mut().take() {
            timer.abort();
        }
    }
}

struct Bucket {
    pattern: String,
    listeners: Vec<Arc<Listener>>,
}

/// Listeners grouped by their literal pattern string.
///
/// Buckets keep the order their pattern was first registered in; listeners
/// inside a bucket keep registration order.
#[derive(Default)]
pub struct ListenerRegistry {
    buckets: RwLock<Vec<Bucket>>,
}

impl ListenerRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Insert a listener under `pattern`.
    ///
    /// The pattern must already be validated. A timed auto-destroy is armed
    /// immediately, which needs a Tokio runtime.
    pub(crate) fn insert(
        self: &Arc<Self>,
        pattern: &str,
        handler: Box<dyn EventListener>,
        options: ListenerOptions,
    ) -> Arc<Listener> {
        let listener = Arc::new(Listener {
            id: Uuid::new_v4(),
            pattern: pattern.to_string(),
            options,
            handler,
            calls: AtomicU32::new(0),
            destroyed: AtomicBool::new(false),
            timer: Mutex::new(None),
            registry: Arc::downgrade(self),
        });

        {
            let mut buckets = self.buckets.write();
            match buckets.iter_mut().find(|b| b.pattern == pattern) {
                Some(bucket) => bucket.listeners.push(listener.clone()),
                None => buckets.push(Bucket {
                    pattern: pattern.to_string(),
                    listeners: vec![listener.clone()],
                }),
            }
        }

        if let Some(timeout) = options.autodestroy.timeout {
            listener.arm_timer(timeout);
        }

        listener
    }

    /// Remove a single listener, dropping its bucket once empty.
    fn remove(&self, listener: &Listener) {
        let mut buckets = self.buckets.write();
        if let Some(index) = buckets.iter().position(|b| b.pattern == listener.pattern) {
            buckets[index].listeners.retain(|l| l.id != listener.id);
            if buckets[index].listeners.is_empty() {
                buckets.remove(index);
            }
        }
    }

    /// Remove the whole bucket for this literal pattern string.
    pub fn remove_pattern(&self, pattern: &str) -> usize {
        let removed = {
            let mut buckets = self.buckets.write();
            match buckets.iter().position(|b| b.pattern == pattern) {
                Some(index) => buckets.remove(index).listeners,
                None => Vec::new(),
            }
        };
        for listener in &removed {
            listener.detach();
        }
        removed.len()
    }

    pub fn clear(&self) -> usize {
        let removed: Vec<Bucket> = std::mem::take(&mut *self.buckets.write());
        let mut count = 0;
        for bucket in removed {
            for listener in bucket.listeners {
                listener.detach();
                count += 1;
            }
        }
        count
    }

    /// Listeners whose pattern matches `topic`, bucket order then insertion order.
    pub fn resolve(&self, topic: &str, patterns: &PatternCache) -> Vec<Arc<Listener>> {
        let buckets = self.buckets.read();
        let mut resolved = Vec::new();
        for bucket in buckets.iter() {
            match patterns.matches(topic, &bucket.pattern) {
                Ok(true) => resolved.extend(
                    bucket
                        .listeners
                        .iter()
                        .filter(|l| !l.is_destroyed())
                        .cloned(),
                ),
                Ok(false) => {}
                Err(e) => warn!(pattern = %bucket.pattern, error = %e, "Skipping unmatchable pattern"),
            }
        }
        resolved
    }

    pub fn len(&self) -> usize {
        self.buckets.read().iter().map(|b| b.listeners.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.read().is_empty()
    }

    pub fn count_for(&self, pattern: &str) -> usize {
        self.buckets
            .read()
            .iter()
            .find(|b| b.pattern == pattern)
            .map(|b| b.listeners.len())
            .unwrap_or(0)
    }

    pub fn patterns(&self) -> Vec<String> {
        self.buckets.read().iter().map(|b| b.pattern.clone()).collect()
    }
}
