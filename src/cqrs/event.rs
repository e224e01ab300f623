use super::{Event, EventHandler};
use crate::di::{ErasedInstance, Injectable, Resolver, TypeKey};
use crate::error::Result;
use dashmap::DashMap;
use futures::FutureExt;
use futures::future::BoxFuture;
use std::any::TypeId;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::broadcast;

/// Receives every published event regardless of its type.
pub type EventListener = Arc<dyn Fn(&ErasedInstance) + Send + Sync>;

type EventCall = Arc<dyn Fn(ErasedInstance) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

#[derive(Clone)]
struct Subscription {
    identity: usize,
    handler: TypeKey,
    call: EventCall,
}

/// In-memory event bus.
///
/// Typed handlers run on spawned tasks, so `publish` never waits for them.
/// Generic listeners (used by sagas) are called inline, and `subscribe`
/// hands out broadcast receivers for a single event type.
#[derive(Clone)]
pub struct EventBus {
    handlers: Arc<DashMap<TypeId, Vec<Subscription>>>,
    listeners: Arc<DashMap<usize, EventListener>>,
    next_listener: Arc<AtomicUsize>,
    // Map of Event Type -> Broadcast Sender
    channels: Arc<DashMap<TypeId, broadcast::Sender<ErasedInstance>>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Injectable for EventBus {
    fn inject(_: &Resolver<'_>) -> Result<Self> {
        Ok(Self::new())
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            handlers: Arc::new(DashMap::new()),
            listeners: Arc::new(DashMap::new()),
            next_listener: Arc::new(AtomicUsize::new(0)),
            channels: Arc::new(DashMap::new()),
        }
    }

    /// Register `handler` for `E`. Registering the same instance twice is a no-op.
    pub fn register<E: Event, H: EventHandler<E>>(&self, handler: Arc<H>) {
        let identity = Arc::as_ptr(&handler) as *const () as usize;
        let mut list = self.handlers.entry(TypeId::of::<E>()).or_default();
        if list.iter().any(|subscription| subscription.identity == identity) {
            return;
        }

        let call: EventCall = Arc::new(move |event: ErasedInstance| {
            let handler = handler.clone();
            async move {
                let event = event
                    .downcast::<E>()
                    .map_err(|_| anyhow::anyhow!("event is not a {}", std::any::type_name::<E>()))?;
                handler.handle(event).await
            }
            .boxed()
        });
        list.push(Subscription {
            identity,
            handler: TypeKey::of::<H>(),
            call,
        });
        tracing::info!(
            event = %TypeKey::of::<E>().short_name(),
            handler = %TypeKey::of::<H>().short_name(),
            "Registered event handler"
        );
    }

    pub fn handler_count<E: Event>(&self) -> usize {
        self.handlers
            .get(&TypeId::of::<E>())
            .map(|list| list.len())
            .unwrap_or(0)
    }

    /// Publish an event
    pub fn publish<E: Event>(&self, event: E) {
        let erased: ErasedInstance = Arc::new(event);

        let subscriptions = self
            .handlers
            .get(&TypeId::of::<E>())
            .map(|list| list.clone())
            .unwrap_or_default();
        for subscription in subscriptions {
            let event = erased.clone();
            tokio::spawn(async move {
                if let Err(err) = (subscription.call)(event).await {
                    tracing::error!(
                        handler = %subscription.handler.short_name(),
                        error = %err,
                        "Event handler failed"
                    );
                }
            });
        }

        let listeners: Vec<EventListener> = self
            .listeners
            .iter()
            .map(|listener| listener.value().clone())
            .collect();
        for listener in listeners {
            listener(&erased);
        }

        if let Some(sender) = self.channels.get(&TypeId::of::<E>()) {
            let _ = sender.send(erased.clone());
        }
    }

    /// Add a listener that sees every event. Returns an id for [`EventBus::unlisten`].
    pub fn listen(&self, listener: EventListener) -> usize {
        let id = self.next_listener.fetch_add(1, Ordering::Relaxed);
        self.listeners.insert(id, listener);
        id
    }

    pub fn unlisten(&self, id: usize) {
        self.listeners.remove(&id);
    }

    /// Subscribe to an event
    pub fn subscribe<E: Event>(&self) -> EventStream<E> {
        let sender = self
            .channels
            .entry(TypeId::of::<E>())
            .or_insert_with(|| {
                let (tx, _) = broadcast::channel(100);
                tx
            });
        EventStream {
            rx: sender.subscribe(),
            _marker: PhantomData,
        }
    }
}

/// Typed receiver returned by [`EventBus::subscribe`].
pub struct EventStream<E> {
    rx: broadcast::Receiver<ErasedInstance>,
    _marker: PhantomData<fn() -> E>,
}

impl<E: Event> EventStream<E> {
    /// Wait for the next event; `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<Arc<E>> {
        loop {
            match self.rx.recv().await {
                Ok(event) => {
                    if let Ok(event) = event.downcast::<E>() {
                        return Some(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

/// Identity set of sagas already subscribed, keyed by provider instance and saga name.
#[derive(Clone, Default)]
pub struct SagaRegistry {
    claimed: Arc<DashMap<(usize, &'static str), ()>>,
}

impl SagaRegistry {
    /// Returns `true` the first time a saga of `instance` is claimed.
    pub fn claim(&self, instance: &ErasedInstance, name: &'static str) -> bool {
        let identity = Arc::as_ptr(instance) as *const () as usize;
        self.claimed.insert((identity, name), ()).is_none()
    }

    pub fn len(&self) -> usize {
        self.claimed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.claimed.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use tokio::sync::mpsc;

    struct UserCreated {
        name: String,
    }

    impl Event for UserCreated {}

    struct Mailer {
        sent: mpsc::UnboundedSender<String>,
    }

    #[async_trait]
    impl EventHandler<UserCreated> for Mailer {
        async fn handle(&self, event: Arc<UserCreated>) -> anyhow::Result<()> {
            self.sent.send(event.name.clone())?;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_handlers_are_deduplicated_by_identity() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let bus = EventBus::new();
        let mailer = Arc::new(Mailer { sent: tx });
        bus.register::<UserCreated, _>(mailer.clone());
        bus.register::<UserCreated, _>(mailer);
        assert_eq!(bus.handler_count::<UserCreated>(), 1);

        bus.publish(UserCreated { name: "ada".into() });
        assert_eq!(rx.recv().await.unwrap(), "ada");
    }

    #[tokio::test]
    async fn test_listeners_and_subscribers_see_events() {
        let bus = EventBus::new();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        bus.listen(Arc::new(move |_: &ErasedInstance| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        let mut stream = bus.subscribe::<UserCreated>();

        bus.publish(UserCreated { name: "grace".into() });
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(stream.recv().await.unwrap().name, "grace");
    }

    #[test]
    fn test_saga_claim_is_idempotent() {
        let registry = SagaRegistry::default();
        let instance: ErasedInstance = Arc::new(1u8);
        assert!(registry.claim(&instance, "welcome"));
        assert!(!registry.claim(&instance, "welcome"));
        assert!(registry.claim(&instance, "audit"));
    }
}
