//! Event routing.
//!
//! The router matches an inbound [`LiveEvent`] against the bindings of the
//! subscriber it belongs to, runs the resolved handlers and hands their
//! messages to the [`DeliveryScheduler`].
//!
//! Dispatch runs on a bounded pool of tasks. When every permit is taken the
//! event is processed on the caller's task instead, so no event is dropped
//! under load.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::Semaphore;
use tracing::{debug, error, warn};

use crate::config::ConfigStore;
use crate::delivery::DeliveryScheduler;
use crate::domain::{Binding, LiveEvent, OutboundMessage};
use crate::extension::HandlerRegistry;
use crate::handler::HandlerContext;
use crate::Error;

/// Where a dispatch ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// On a pool task.
    Spawned,
    /// On the caller's task because the pool was saturated.
    Inline,
}

pub struct EventRouter {
    inner: Arc<RouterInner>,
    permits: Arc<Semaphore>,
    max_workers: usize,
}

struct RouterInner {
    store: Arc<ConfigStore>,
    handlers: Arc<HandlerRegistry>,
    scheduler: Arc<DeliveryScheduler>,
}

impl EventRouter {
    pub fn new(
        store: Arc<ConfigStore>,
        handlers: Arc<HandlerRegistry>,
        scheduler: Arc<DeliveryScheduler>,
        max_workers: usize,
    ) -> Self {
        let max_workers = max_workers.max(1);
        Self {
            inner: Arc::new(RouterInner {
                store,
                handlers,
                scheduler,
            }),
            permits: Arc::new(Semaphore::new(max_workers)),
            max_workers,
        }
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Dispatch `event` on the pool, or inline when the pool is saturated.
    pub async fn dispatch(&self, event: LiveEvent) -> DispatchMode {
        match self.permits.clone().try_acquire_owned() {
            Ok(permit) => {
                let inner = self.inner.clone();
                tokio::spawn(async move {
                    inner.route(&event).await;
                    drop(permit);
                });
                DispatchMode::Spawned
            }
            Err(_) => {
                debug!(
                    platform = %event.platform,
                    uid = event.source.uid,
                    "Router pool saturated, dispatching on caller"
                );
                self.inner.route(&event).await;
                DispatchMode::Inline
            }
        }
    }

    /// Route `event` on the current task and wait for all handlers.
    ///
    /// Returns the number of messages handed to the scheduler.
    pub async fn dispatch_now(&self, event: &LiveEvent) -> usize {
        self.inner.route(event).await
    }
}

impl RouterInner {
    async fn route(&self, event: &LiveEvent) -> usize {
        let Some(subscriber) = self
            .store
            .get_subscriber(&event.platform, event.source.uid)
            .await
        else {
            return 0;
        };

        let event_type = event.event_type();
        let mut queued = 0;

        for destination in subscriber.destinations.iter().filter(|d| d.enabled) {
            for binding in destination.bindings_for(event_type) {
                let ctx = HandlerContext {
                    subscriber: &subscriber,
                    destination,
                    binding,
                };
                if let Some(messages) = self.invoke(event, &ctx).await {
                    queued += self.forward(messages);
                }
            }
        }

        queued
    }

    /// Resolve and run the handler of one binding. Failures are logged and
    /// yield `None`.
    async fn invoke(&self, event: &LiveEvent, ctx: &HandlerContext<'_>) -> Option<Vec<OutboundMessage>> {
        let event_type = event.event_type();
        let binding: &Binding = ctx.binding;

        let handler = match self.handlers.resolve_handler(event_type, binding.handler_id()) {
            Ok(handler) => handler,
            Err(e) => {
                error!(
                    platform = %ctx.subscriber.platform,
                    uid = ctx.subscriber.uid,
                    destination = %ctx.destination.platform,
                    target = ctx.destination.id,
                    error = %e,
                    "Handler resolution failed for binding"
                );
                return None;
            }
        };

        let outcome = AssertUnwindSafe(handler.handle(event, ctx))
            .catch_unwind()
            .await;

        let failure = match outcome {
            Ok(Ok(messages)) => return Some(messages),
            Ok(Err(e)) => e.to_string(),
            Err(panic) => panic_message(panic.as_ref()),
        };

        let e = Error::HandlerExecution {
            handler: handler.id().to_string(),
            event_type: event_type.to_string(),
            message: failure,
        };
        error!(
            handler = handler.id(),
            event_type,
            uid = ctx.subscriber.uid,
            "{}",
            e
        );
        None
    }

    fn forward(&self, messages: Vec<OutboundMessage>) -> usize {
        let mut queued = 0;
        for message in messages {
            match self.scheduler.enqueue(message) {
                Ok(()) => queued += 1,
                Err(e) => warn!(error = %e, "Dropping outbound message"),
            }
        }
        queued
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panicked: {}", s)
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panicked: {}", s)
    } else {
        "panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CompleterRegistry, ConfigStore};
    use crate::delivery::{OutboundSender, SenderEndpoint};
    use crate::domain::{
        Destination, DestinationKind, LiveEventPayload, StreamerInfo, Subscriber,
    };
    use crate::extension::{ExtensionCatalog, ExtensionRegistry};
    use crate::handler::EventHandler;
    use crate::Result;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    struct CountingHandler {
        id: &'static str,
        calls: AtomicUsize,
        behaviour: Behaviour,
    }

    #[derive(Clone, Copy)]
    enum Behaviour {
        Reply,
        Fail,
        Panic,
    }

    impl CountingHandler {
        fn new(id: &'static str, behaviour: Behaviour) -> Arc<Self> {
            Arc::new(Self {
                id,
                calls: AtomicUsize::new(0),
                behaviour,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl EventHandler for CountingHandler {
        fn id(&self) -> &str {
            self.id
        }

        async fn handle(
            &self,
            _event: &LiveEvent,
            ctx: &HandlerContext<'_>,
        ) -> Result<Vec<OutboundMessage>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.behaviour {
                Behaviour::Reply => Ok(OutboundMessage::for_destination(ctx.destination, self.id)),
                Behaviour::Fail => Err(Error::Other("boom".into())),
                Behaviour::Panic => panic!("handler exploded"),
            }
        }
    }

    struct ChannelSender(mpsc::UnboundedSender<String>);

    #[async_trait]
    impl OutboundSender for ChannelSender {
        async fn send(&self, _endpoint: &SenderEndpoint, message: &OutboundMessage) -> Result<()> {
            let _ = self.0.send(message.content.clone());
            Ok(())
        }
    }

    struct Fixture {
        router: EventRouter,
        delivered: mpsc::UnboundedReceiver<String>,
    }

    async fn fixture(
        handlers: Vec<Arc<CountingHandler>>,
        subscriber: Subscriber,
        max_workers: usize,
    ) -> Fixture {
        let mut registry = ExtensionRegistry::new(ExtensionCatalog::new());
        for handler in handlers {
            registry.register_handler(handler, None);
        }

        let store = Arc::new(ConfigStore::new(CompleterRegistry::with_pass_through()));
        store.add(subscriber).await.unwrap();

        let (tx, delivered) = mpsc::unbounded_channel();
        let mut endpoints = HashMap::new();
        let mut endpoint = SenderEndpoint::new("http://qq");
        endpoint.delay_ms = 0;
        endpoints.insert("qq".to_string(), endpoint);
        let scheduler = Arc::new(DeliveryScheduler::new(endpoints, Arc::new(ChannelSender(tx))));

        Fixture {
            router: EventRouter::new(store, Arc::new(registry.freeze()), scheduler, max_workers),
            delivered,
        }
    }

    fn live_on(uid: i64) -> LiveEvent {
        LiveEvent::new("bilibili", StreamerInfo::new(uid), LiveEventPayload::LiveOn)
    }

    fn binding(handler: &str) -> crate::domain::Binding {
        crate::domain::Binding::new("live_on", Some(handler), json!({}))
    }

    #[tokio::test]
    async fn test_failing_binding_does_not_block_siblings() {
        let missing_then_ok = CountingHandler::new("t.Ok", Behaviour::Reply);
        let failing = CountingHandler::new("t.Fail", Behaviour::Fail);
        let panicking = CountingHandler::new("t.Panic", Behaviour::Panic);

        let subscriber = Subscriber::new("bilibili", 1)
            .with_destination(
                Destination::new("qq", DestinationKind::Group, 10)
                    .with_binding(binding("t.Missing"))
                    .with_binding(binding("t.Ok")),
            )
            .with_destination(
                Destination::new("qq", DestinationKind::Group, 20)
                    .with_binding(binding("t.Fail"))
                    .with_binding(binding("t.Panic"))
                    .with_binding(binding("t.Ok")),
            );

        let mut f = fixture(
            vec![missing_then_ok.clone(), failing.clone(), panicking.clone()],
            subscriber,
            4,
        )
        .await;

        let queued = f.router.dispatch_now(&live_on(1)).await;

        assert_eq!(queued, 2);
        assert_eq!(missing_then_ok.calls(), 2);
        assert_eq!(failing.calls(), 1);
        assert_eq!(panicking.calls(), 1);
        assert_eq!(f.delivered.recv().await.unwrap(), "t.Ok");
        assert_eq!(f.delivered.recv().await.unwrap(), "t.Ok");
    }

    #[tokio::test]
    async fn test_unknown_subscriber_and_other_events_are_ignored() {
        let handler = CountingHandler::new("t.Ok", Behaviour::Reply);
        let subscriber = Subscriber::new("bilibili", 1).with_destination(
            Destination::new("qq", DestinationKind::Group, 10).with_binding(binding("t.Ok")),
        );
        let f = fixture(vec![handler.clone()], subscriber, 4).await;

        assert_eq!(f.router.dispatch_now(&live_on(2)).await, 0);
        let live_off = LiveEvent::new("bilibili", StreamerInfo::new(1), LiveEventPayload::LiveOff);
        assert_eq!(f.router.dispatch_now(&live_off).await, 0);
        assert_eq!(handler.calls(), 0);
    }

    #[tokio::test]
    async fn test_saturated_pool_runs_inline() {
        let handler = CountingHandler::new("t.Ok", Behaviour::Reply);
        let subscriber = Subscriber::new("bilibili", 1).with_destination(
            Destination::new("qq", DestinationKind::Group, 10).with_binding(binding("t.Ok")),
        );
        let mut f = fixture(vec![handler.clone()], subscriber, 1).await;

        // Hold the only permit so the next dispatch cannot be spawned.
        let permit = f.router.permits.clone().try_acquire_owned().unwrap();
        assert_eq!(f.router.dispatch(live_on(1)).await, DispatchMode::Inline);
        assert_eq!(handler.calls(), 1);
        drop(permit);

        assert_eq!(f.router.dispatch(live_on(1)).await, DispatchMode::Spawned);
        assert_eq!(f.delivered.recv().await.unwrap(), "t.Ok");
        assert_eq!(f.delivered.recv().await.unwrap(), "t.Ok");
        assert_eq!(handler.calls(), 2);
    }
}
