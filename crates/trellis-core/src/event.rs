//! Event channel connecting the engine to embedders.
//!
//! Three delivery contracts:
//! - [`EventChannel::publish`] — fire-and-forget notification; handler
//!   errors are logged and never propagated.
//! - [`EventChannel::publish_blocking`] — the engine waits until a
//!   handler marks the event handled (or the deadline passes); used for
//!   `node_input_required`.
//! - [`EventChannel::publish_deferred`] — returns a [`DeferredValue`]
//!   a handler resolves later; the engine awaits it only when a template
//!   actually references the binding.

use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::error::{Result, TrellisError};
use crate::types::ComponentPath;

#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub enum EventKind {
    NodeInputRequired,
    NodeExecutionStart,
    NodeExecutionComplete,
    ComponentExecutionStart,
    ComponentExecutionComplete,
    Custom(String),
}

impl EventKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::NodeInputRequired => "node_input_required",
            Self::NodeExecutionStart => "node_execution_start",
            Self::NodeExecutionComplete => "node_execution_complete",
            Self::ComponentExecutionStart => "component_execution_start",
            Self::ComponentExecutionComplete => "component_execution_complete",
            Self::Custom(name) => name,
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Resolves a deferred event value. Taken out of the event by whichever
/// handler chooses to answer.
#[derive(Debug)]
pub struct DeferredResolver {
    tx: oneshot::Sender<Value>,
}

impl DeferredResolver {
    pub fn resolve(self, value: Value) {
        // Receiver may have been dropped if the run was aborted.
        let _ = self.tx.send(value);
    }
}

/// A value promised by a deferred event, awaited lazily.
#[derive(Debug)]
pub struct DeferredValue {
    binding: String,
    rx: oneshot::Receiver<Value>,
}

impl DeferredValue {
    pub fn binding(&self) -> &str {
        &self.binding
    }

    pub async fn wait(self) -> Result<Value> {
        self.rx.await.map_err(|_| TrellisError::DeferredDropped {
            binding: self.binding,
        })
    }
}

/// One event in flight. The payload slot is mutable so a handler can
/// answer in place; `handled` stops blocking delivery.
#[derive(Debug)]
pub struct Event {
    pub path: ComponentPath,
    pub kind: EventKind,
    pub payload: Value,
    handled: bool,
    resolver: Option<DeferredResolver>,
}

impl Event {
    pub fn new(path: ComponentPath, kind: EventKind) -> Self {
        Self {
            path,
            kind,
            payload: Value::Null,
            handled: false,
            resolver: None,
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn is_handled(&self) -> bool {
        self.handled
    }

    /// Mark the event handled, optionally replacing the payload. In a
    /// blocking publish, later handlers are skipped.
    pub fn mark_handled(&mut self, payload: Option<Value>) {
        self.handled = true;
        if let Some(p) = payload {
            self.payload = p;
        }
    }

    /// Take the deferred resolver, if this event carries one.
    pub fn take_resolver(&mut self) -> Option<DeferredResolver> {
        self.resolver.take()
    }
}

/// Async event handler.
pub trait EventHandler: Send + Sync + 'static {
    fn handle<'a>(&'a self, event: &'a mut Event) -> BoxFuture<'a, Result<()>>;
}

/// Adapt an async closure into an [`EventHandler`].
pub fn handler_fn<F>(f: F) -> Arc<dyn EventHandler>
where
    F: for<'a> Fn(&'a mut Event) -> BoxFuture<'a, Result<()>> + Send + Sync + 'static,
{
    struct FnHandler<F>(F);

    impl<F> EventHandler for FnHandler<F>
    where
        F: for<'a> Fn(&'a mut Event) -> BoxFuture<'a, Result<()>> + Send + Sync + 'static,
    {
        fn handle<'a>(&'a self, event: &'a mut Event) -> BoxFuture<'a, Result<()>> {
            (self.0)(event)
        }
    }

    Arc::new(FnHandler(f))
}

#[derive(Clone)]
struct Subscription {
    kind: Option<EventKind>,
    handler: Arc<dyn EventHandler>,
}

/// Typed publish/subscribe channel. Handlers run in registration order;
/// wildcard subscribers see every kind.
#[derive(Default)]
pub struct EventChannel {
    subscriptions: RwLock<Vec<Subscription>>,
}

impl EventChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, kind: EventKind, handler: Arc<dyn EventHandler>) {
        self.subscriptions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(Subscription {
                kind: Some(kind),
                handler,
            });
    }

    pub fn subscribe_all(&self, handler: Arc<dyn EventHandler>) {
        self.subscriptions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(Subscription { kind: None, handler });
    }

    fn handlers_for(&self, kind: &EventKind) -> Vec<Arc<dyn EventHandler>> {
        self.subscriptions
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|s| s.kind.as_ref().map_or(true, |k| k == kind))
            .map(|s| s.handler.clone())
            .collect()
    }

    /// Notify every matching handler. Handler errors are logged, never
    /// propagated; the handled flag is ignored.
    pub async fn publish(&self, mut event: Event) {
        for handler in self.handlers_for(&event.kind) {
            if let Err(e) = handler.handle(&mut event).await {
                warn!(kind = %event.kind, path = %event.path, error = %e, "event handler failed");
            }
        }
    }

    /// Deliver to handlers in registration order until one marks the
    /// event handled. Returns the (possibly mutated) event; expiry of
    /// the deadline yields `EventTimeout`, which callers treat as
    /// "unhandled, proceed with defaults".
    pub async fn publish_blocking(
        &self,
        event: Event,
        deadline: Option<Duration>,
    ) -> Result<Event> {
        let started = Instant::now();
        let path = event.path.clone();
        let fut = self.deliver_until_handled(event);
        match deadline {
            Some(d) => match tokio::time::timeout(d, fut).await {
                Ok(event) => Ok(event),
                Err(_) => Err(TrellisError::EventTimeout {
                    path,
                    waited_ms: started.elapsed().as_millis() as u64,
                }),
            },
            None => Ok(fut.await),
        }
    }

    async fn deliver_until_handled(&self, mut event: Event) -> Event {
        for handler in self.handlers_for(&event.kind) {
            if let Err(e) = handler.handle(&mut event).await {
                warn!(kind = %event.kind, path = %event.path, error = %e, "event handler failed");
                continue;
            }
            if event.is_handled() {
                debug!(kind = %event.kind, path = %event.path, "event handled");
                break;
            }
        }
        event
    }

    /// Publish an event carrying a resolver and return the matching
    /// [`DeferredValue`]. Delivery happens on a background task so the
    /// caller never waits here.
    pub fn publish_deferred(self: &Arc<Self>, binding: impl Into<String>, mut event: Event) -> DeferredValue {
        let binding = binding.into();
        let (tx, rx) = oneshot::channel();
        event.resolver = Some(DeferredResolver { tx });

        let channel = Arc::clone(self);
        tokio::spawn(async move {
            channel.publish(event).await;
        });

        DeferredValue { binding, rx }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn path() -> ComponentPath {
        "agent.flow.node".parse().unwrap()
    }

    #[tokio::test]
    async fn publish_invokes_all_matching_handlers() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let channel = EventChannel::new();
        let hits = Arc::new(AtomicUsize::new(0));

        for _ in 0..2 {
            let hits = hits.clone();
            channel.subscribe(
                EventKind::NodeExecutionStart,
                handler_fn(move |_event| {
                    let hits = hits.clone();
                    Box::pin(async move {
                        hits.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    })
                }),
            );
        }
        // Different kind, must not fire.
        let hits2 = hits.clone();
        channel.subscribe(
            EventKind::NodeExecutionComplete,
            handler_fn(move |_event| {
                let hits2 = hits2.clone();
                Box::pin(async move {
                    hits2.fetch_add(100, Ordering::SeqCst);
                    Ok(())
                })
            }),
        );

        channel
            .publish(Event::new(path(), EventKind::NodeExecutionStart))
            .await;
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn blocking_publish_stops_at_first_handled() {
        let channel = EventChannel::new();
        channel.subscribe(
            EventKind::NodeInputRequired,
            handler_fn(|event| {
                Box::pin(async move {
                    event.mark_handled(Some(json!({"answer": 1})));
                    Ok(())
                })
            }),
        );
        channel.subscribe(
            EventKind::NodeInputRequired,
            handler_fn(|event| {
                Box::pin(async move {
                    event.mark_handled(Some(json!({"answer": 2})));
                    Ok(())
                })
            }),
        );

        let event = channel
            .publish_blocking(Event::new(path(), EventKind::NodeInputRequired), None)
            .await
            .unwrap();
        assert!(event.is_handled());
        assert_eq!(event.payload, json!({"answer": 1}));
    }

    #[tokio::test]
    async fn blocking_publish_times_out() {
        let channel = EventChannel::new();
        channel.subscribe(
            EventKind::NodeInputRequired,
            handler_fn(|_event| {
                Box::pin(async move {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(())
                })
            }),
        );

        let err = channel
            .publish_blocking(
                Event::new(path(), EventKind::NodeInputRequired),
                Some(Duration::from_millis(20)),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, TrellisError::EventTimeout { .. }));
    }

    #[tokio::test]
    async fn unhandled_blocking_publish_returns_event() {
        let channel = EventChannel::new();
        let event = channel
            .publish_blocking(Event::new(path(), EventKind::NodeInputRequired), None)
            .await
            .unwrap();
        assert!(!event.is_handled());
    }

    #[tokio::test]
    async fn deferred_value_resolves_from_handler() {
        let channel = Arc::new(EventChannel::new());
        channel.subscribe(
            EventKind::Custom("fetch".to_string()),
            handler_fn(|event| {
                Box::pin(async move {
                    if let Some(resolver) = event.take_resolver() {
                        resolver.resolve(json!("late answer"));
                    }
                    Ok(())
                })
            }),
        );

        let deferred = channel.publish_deferred(
            "answer",
            Event::new(path(), EventKind::Custom("fetch".to_string())),
        );
        assert_eq!(deferred.wait().await.unwrap(), json!("late answer"));
    }

    #[tokio::test]
    async fn deferred_value_reports_dropped_resolver() {
        let channel = Arc::new(EventChannel::new());
        // No subscriber takes the resolver, so it drops with the event.
        let deferred =
            channel.publish_deferred("answer", Event::new(path(), EventKind::Custom("x".into())));
        let err = deferred.wait().await.unwrap_err();
        assert!(matches!(err, TrellisError::DeferredDropped { .. }));
    }

    #[tokio::test]
    async fn wildcard_subscriber_sees_every_kind() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        let channel = EventChannel::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        channel.subscribe_all(handler_fn(move |_event| {
            let h = h.clone();
            Box::pin(async move {
                h.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        }));

        channel.publish(Event::new(path(), EventKind::NodeExecutionStart)).await;
        channel
            .publish(Event::new(path(), EventKind::Custom("other".into())))
            .await;
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }
}
