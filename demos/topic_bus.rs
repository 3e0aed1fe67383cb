//! Topic Bus Example
//!
//! Demonstrates wildcard listeners, middleware, lifecycles and timeouts.
//!
//! Run with `SWITCHYARD_LOG_FORMAT=pretty SWITCHYARD_DEBUG=1` to see the
//! bus's own tracing output.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use switchyard::prelude::*;

// Listener implemented as a type rather than a closure
struct AuditTrail {
    seen: AtomicU32,
}

#[async_trait]
impl EventListener for AuditTrail {
    async fn handle(&self, event: Arc<Event>) -> HandlerResult {
        let n = self.seen.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::info!(topic = %event.topic(), n, "audit");
        Ok(None)
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    switchyard::init_logging();

    let bus = EventBusBuilder::new()
        .default_timeout(Duration::from_millis(500))
        .build();

    println!("=== Switchyard Topic Bus Example ===\n");

    // Wildcard listeners
    bus.register(
        "user:*:updated",
        |event: Arc<Event>| async move {
            println!("  user updated -> {}", event.data());
            HandlerResult::Ok(Some(json!({"ack": event.topic()})))
        },
        ListenerOptions::default(),
    )?;
    bus.register("**", AuditTrail { seen: AtomicU32::new(0) }, ListenerOptions::default())?;

    // Middleware: stamp a request id, block anything under `admin` without a token
    bus.add_middleware("**", |ctx: MiddlewareContext, next: Next| async move {
        ctx.event.set("request_id", json!(ctx.event.id()));
        next().await;
        Ok::<(), HandlerError>(())
    })?;
    bus.add_middleware("admin:**", |ctx: MiddlewareContext, next: Next| async move {
        if ctx.event.data().get("token").is_none() {
            ctx.event.respond(json!({"denied": ctx.listener.pattern()}));
            return Ok(());
        }
        next().await;
        Ok::<(), HandlerError>(())
    })?;

    println!("1. Emitting user:42:updated");
    let event = bus.emit("user:42:updated", json!({"name": "Alice"}))?.await;
    println!("   responses: {:?}", event.responses());
    println!("   request id: {:?}\n", event.get("request_id"));

    println!("2. Emitting admin:purge without a token");
    let event = bus.emit("admin:purge", json!({}))?.await;
    println!("   responses: {:?}\n", event.responses());

    println!("3. Once-listener");
    bus.register_once("app:ready", |_event: Arc<Event>| async {
        println!("   ready fired");
        HandlerResult::Ok(None)
    })?;
    bus.emit("app:ready", json!({}))?.await;
    bus.emit("app:ready", json!({}))?.await;
    println!("   listeners left on app:ready: {}\n", bus.listener_count_for("app:ready"));

    println!("4. Slow listener against a 50ms timeout");
    bus.register(
        "reports:++",
        |_event: Arc<Event>| async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            HandlerResult::Ok(Some(json!("too late")))
        },
        ListenerOptions::default(),
    )?;
    let event = bus
        .emit_with("reports:daily:build", json!({}), EmitOptions::new().timeout_ms(50))?
        .await;
    for err in event.errors() {
        println!("   error: {}", err);
    }

    println!("\n5. Invalid topic");
    if let Err(e) = bus.emit("user:*", json!({})) {
        println!("   rejected: {}", e);
    }

    println!("\n=== Example Complete ===");
    Ok(())
}
