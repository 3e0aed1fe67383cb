//! Event definitions

use crate::error::EventError;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::trace;

/// Per-emission options.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmitOptions {
    /// Per-listener settle bound; the bus default applies when unset
    #[serde(default, with = "duration_ms")]
    pub timeout: Option<Duration>,

    /// Suppress `respond` and `error` writes
    #[serde(default)]
    pub silent: bool,

    /// Free-form identifier of the emitter
    #[serde(default)]
    pub source: Option<String>,
}

impl EmitOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn timeout_ms(self, ms: u64) -> Self {
        self.timeout(Duration::from_millis(ms))
    }

    pub fn silent(mut self, silent: bool) -> Self {
        self.silent = silent;
        self
    }

    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }
}

/// Private key-value store carried by an [`Event`].
///
/// Middleware and listeners use it as a side channel, e.g. a middleware
/// stamping `auth_user` for the listener to read.
#[derive(Debug, Clone, Default)]
pub struct EventContext {
    values: HashMap<String, Value>,
}

impl EventContext {
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn has(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn delete(&mut self, key: &str) -> bool {
        self.values.remove(key).is_some()
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// The record produced by one `emit` call.
///
/// A single `Event` is shared by every listener chain the emission reaches.
/// `responses`, `errors` and the context are visible to, and writable by, all
/// of those chains while they run concurrently; nothing isolates one chain's
/// writes from another's. Each write holds its lock for one insertion only.
///
/// Once `emit` returns the event is sealed and later `respond`/`error` calls
/// are dropped. A chain that timed out may still write while sibling chains
/// of the same emission are running; those writes are kept.
#[derive(Debug)]
pub struct Event {
    topic: String,
    data: Value,
    id: String,
    timestamp: DateTime<Utc>,
    options: EmitOptions,
    responses: Mutex<Vec<Value>>,
    errors: Mutex<Vec<EventError>>,
    context: Mutex<EventContext>,
    sealed: AtomicBool,
}

impl Event {
    pub fn new(topic: impl Into<String>, data: Value, options: EmitOptions) -> Self {
        let topic = topic.into();
        let timestamp = Utc::now();
        let id = format!("{}-{}", topic, timestamp.timestamp_millis());
        Self {
            topic,
            data,
            id,
            timestamp,
            options,
            responses: Mutex::new(Vec::new()),
            errors: Mutex::new(Vec::new()),
            context: Mutex::new(EventContext::default()),
            sealed: AtomicBool::new(false),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn data(&self) -> &Value {
        &self.data
    }

    /// Topic plus creation time in milliseconds; not globally unique.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn options(&self) -> &EmitOptions {
        &self.options
    }

    pub fn source(&self) -> Option<&str> {
        self.options.source.as_deref()
    }

    pub fn is_silent(&self) -> bool {
        self.options.silent
    }

    fn accepts_writes(&self, kind: &str) -> bool {
        if self.options.silent {
            return false;
        }
        if self.sealed.load(Ordering::Acquire) {
            trace!(topic = %self.topic, kind, "Dropping write to sealed event");
            return false;
        }
        true
    }

    /// Append a response.
    pub fn respond(&self, value: Value) {
        if self.accepts_writes("response") {
            self.responses.lock().push(value);
        }
    }

    /// Append a failure record.
    pub fn error(&self, err: impl Into<EventError>) {
        if self.accepts_writes("error") {
            self.errors.lock().push(err.into());
        }
    }

    /// Snapshot of the responses recorded so far.
    pub fn responses(&self) -> Vec<Value> {
        self.responses.lock().clone()
    }

    /// Snapshot of the failures recorded so far.
    pub fn errors(&self) -> Vec<EventError> {
        self.errors.lock().clone()
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.lock().is_empty()
    }

    pub fn set(&self, key: impl Into<String>, value: Value) {
        self.context.lock().set(key, value);
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.context.lock().get(key).cloned()
    }

    pub fn has(&self, key: &str) -> bool {
        self.context.lock().has(key)
    }

    pub fn delete(&self, key: &str) -> bool {
        self.context.lock().delete(key)
    }

    pub fn clear_context(&self) {
        self.context.lock().clear();
    }

    pub(crate) fn seal(&self) {
        self.sealed.store(true, Ordering::Release);
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HandlerError;
    use serde_json::json;

    #[test]
    fn test_event_fields() {
        let event = Event::new(
            "user:42:updated",
            json!({"x": 1}),
            EmitOptions::new().source("tests"),
        );

        assert_eq!(event.topic(), "user:42:updated");
        assert_eq!(event.data(), &json!({"x": 1}));
        assert!(event.id().starts_with("user:42:updated-"));
        assert_eq!(event.source(), Some("tests"));
        assert!(event.responses().is_empty());
        assert!(event.errors().is_empty());
    }

    #[test]
    fn test_respond_and_error_append_in_order() {
        let event = Event::new("a", Value::Null, EmitOptions::default());
        event.respond(json!(1));
        event.respond(json!(2));
        event.error(HandlerError::failed("bad"));

        assert_eq!(event.responses(), vec![json!(1), json!(2)]);
        assert_eq!(event.errors().len(), 1);
        assert!(event.has_errors());
    }

    #[test]
    fn test_silent_event_never_grows() {
        let event = Event::new("a", Value::Null, EmitOptions::new().silent(true));
        event.respond(json!("ignored"));
        event.error(HandlerError::failed("ignored"));

        assert!(event.responses().is_empty());
        assert!(event.errors().is_empty());
    }

    #[test]
    fn test_sealed_event_drops_writes() {
        let event = Event::new("a", Value::Null, EmitOptions::default());
        event.respond(json!(1));
        event.seal();
        event.respond(json!(2));
        event.error(HandlerError::failed("late"));

        assert!(event.is_sealed());
        assert_eq!(event.responses(), vec![json!(1)]);
        assert!(event.errors().is_empty());
    }

    #[test]
    fn test_context_store() {
        let event = Event::new("a", Value::Null, EmitOptions::default());
        assert!(!event.has("user"));

        event.set("user", json!("alice"));
        assert!(event.has("user"));
        assert_eq!(event.get("user"), Some(json!("alice")));

        assert!(event.delete("user"));
        assert!(!event.delete("user"));
        assert_eq!(event.get("user"), None);

        event.set("a", json!(1));
        event.set("b", json!(2));
        event.clear_context();
        assert!(!event.has("a"));
        assert!(!event.has("b"));
    }

    #[test]
    fn test_emit_options_deserialize() {
        let options: EmitOptions =
            serde_json::from_value(json!({"timeout": 250, "silent": true})).unwrap();
        assert_eq!(options.timeout, Some(Duration::from_millis(250)));
        assert!(options.silent);
        assert_eq!(options.source, None);
    }
}
