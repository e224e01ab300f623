//! Command, query and event buses plus sagas.
//!
//! Handlers are ordinary providers that opt in through
//! [`Provider::command_handler`](crate::di::Provider::command_handler) and friends.
//! When an application is created every compiled provider with such a role is
//! registered on the buses held by the global [`CqrsModule`].

mod bus;
mod event;

pub use bus::{CommandBus, QueryBus};
pub use event::{EventBus, EventListener, EventStream, SagaRegistry};

use crate::di::{ErasedInstance, downcast_instance};
use crate::error::{BunstoneError, Result};
use crate::module::{Module, ModuleDescriptor};
use async_trait::async_trait;
use std::sync::Arc;

pub trait Command: Send + Sync + 'static {
    type Output: Send + 'static;
}

pub trait Query: Send + Sync + 'static {
    type Output: Send + 'static;
}

pub trait Event: Send + Sync + 'static {}

#[async_trait]
pub trait CommandHandler<C: Command>: Send + Sync + 'static {
    async fn execute(&self, command: C) -> anyhow::Result<C::Output>;
}

#[async_trait]
pub trait QueryHandler<Q: Query>: Send + Sync + 'static {
    async fn execute(&self, query: Q) -> anyhow::Result<Q::Output>;
}

#[async_trait]
pub trait EventHandler<E: Event>: Send + Sync + 'static {
    async fn handle(&self, event: Arc<E>) -> anyhow::Result<()>;
}

/// The buses a provider's CQRS roles are registered on.
pub struct CqrsWiring<'a> {
    pub commands: Option<Arc<CommandBus>>,
    pub queries: Option<Arc<QueryBus>>,
    pub events: Option<Arc<EventBus>>,
    pub sagas: &'a SagaRegistry,
}

pub(crate) type CqrsHook =
    Arc<dyn Fn(&ErasedInstance, &CqrsWiring<'_>) -> Result<()> + Send + Sync>;

fn missing_bus(bus: &str) {
    tracing::warn!(
        bus,
        "CQRS handler declared but no {bus} is available; import CqrsModule to enable it"
    );
}

fn typed<T: Send + Sync + 'static>(instance: &ErasedInstance) -> Result<Arc<T>> {
    downcast_instance::<T>(instance.clone()).map_err(BunstoneError::from)
}

pub(crate) fn command_hook<T, C>() -> CqrsHook
where
    C: Command,
    T: CommandHandler<C>,
{
    Arc::new(|instance: &ErasedInstance, wiring: &CqrsWiring<'_>| {
        match &wiring.commands {
            Some(bus) => bus.register::<C, T>(typed::<T>(instance)?),
            None => missing_bus("CommandBus"),
        }
        Ok(())
    })
}

pub(crate) fn query_hook<T, Q>() -> CqrsHook
where
    Q: Query,
    T: QueryHandler<Q>,
{
    Arc::new(|instance: &ErasedInstance, wiring: &CqrsWiring<'_>| {
        match &wiring.queries {
            Some(bus) => bus.register::<Q, T>(typed::<T>(instance)?),
            None => missing_bus("QueryBus"),
        }
        Ok(())
    })
}

pub(crate) fn event_hook<T, E>() -> CqrsHook
where
    E: Event,
    T: EventHandler<E>,
{
    Arc::new(|instance: &ErasedInstance, wiring: &CqrsWiring<'_>| {
        match &wiring.events {
            Some(bus) => bus.register::<E, T>(typed::<T>(instance)?),
            None => missing_bus("EventBus"),
        }
        Ok(())
    })
}

pub(crate) fn saga_hook<T, E, C, F>(name: &'static str, map: F) -> CqrsHook
where
    T: Send + Sync + 'static,
    E: Event,
    C: Command,
    F: Fn(&T, &E) -> Option<C> + Send + Sync + 'static,
{
    let map = Arc::new(map);
    Arc::new(move |instance: &ErasedInstance, wiring: &CqrsWiring<'_>| {
        let (Some(events), Some(commands)) = (&wiring.events, &wiring.commands) else {
            missing_bus("EventBus/CommandBus");
            return Ok(());
        };
        if !wiring.sagas.claim(instance, name) {
            return Ok(());
        }

        let provider = typed::<T>(instance)?;
        let commands = commands.clone();
        let map = map.clone();
        events.listen(Arc::new(move |event: &ErasedInstance| {
            let Some(event) = event.downcast_ref::<E>() else {
                return;
            };
            let Some(command) = map(&provider, event) else {
                return;
            };
            let commands = commands.clone();
            tokio::spawn(async move {
                if let Err(err) = commands.execute(command).await {
                    tracing::error!(saga = name, error = %err, "Saga command failed");
                }
            });
        }));
        tracing::info!(saga = name, "Saga registered");
        Ok(())
    })
}

/// Global module providing the three buses.
pub struct CqrsModule;

impl Module for CqrsModule {
    fn descriptor() -> ModuleDescriptor {
        ModuleDescriptor::of::<Self>()
            .provide::<CommandBus>()
            .provide::<QueryBus>()
            .provide::<EventBus>()
            .export::<CommandBus>()
            .export::<QueryBus>()
            .export::<EventBus>()
            .global(true)
    }
}
