use crate::cqrs::{self, Command, CommandHandler, CqrsHook, Event, EventHandler, Query, QueryHandler};
use crate::di::pool::{ErasedInstance, TypeKey};
use crate::di::{Injectable, Resolver};
use crate::error::{BunstoneError, Result};
use crate::queue::{Job, JobProcessor, ProcessorOptions};
use crate::schedule::{CronTask, TimeoutTask};
use futures::FutureExt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

type Factory = Arc<dyn Fn(&Resolver<'_>) -> Result<ErasedInstance> + Send + Sync>;

/// Type-erased provider declaration consumed by the module compiler.
#[derive(Clone)]
pub struct ProviderDef {
    key: TypeKey,
    factory: Factory,
    pub(crate) timeouts: Vec<TimeoutTask>,
    pub(crate) crons: Vec<CronTask>,
    pub(crate) processors: Vec<JobProcessor>,
    pub(crate) cqrs: Vec<CqrsHook>,
}

impl ProviderDef {
    pub fn key(&self) -> TypeKey {
        self.key
    }

    pub fn create(&self, resolver: &Resolver<'_>) -> Result<ErasedInstance> {
        (self.factory)(resolver)
    }

    pub fn timeouts(&self) -> &[TimeoutTask] {
        &self.timeouts
    }

    pub fn crons(&self) -> &[CronTask] {
        &self.crons
    }

    pub fn processors(&self) -> &[JobProcessor] {
        &self.processors
    }
}

/// Typed builder for a [`ProviderDef`].
///
/// ```ignore
/// Provider::<ReportService>::new()
///     .cron("nightly", "0 0 3 * * *", |svc| async move { svc.nightly().await })
///     .timeout("warm_up", Duration::from_secs(5), |svc| async move { svc.warm_up().await })
/// ```
pub struct Provider<T> {
    def: ProviderDef,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Injectable> Provider<T> {
    pub fn new() -> Self {
        Self::from_factory(Arc::new(|resolver: &Resolver<'_>| {
            Ok(Arc::new(T::inject(resolver)?) as ErasedInstance)
        }))
    }
}

impl<T: Injectable> Default for Provider<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send + Sync + 'static> Provider<T> {
    /// Provide an already built instance.
    pub fn value(instance: T) -> Self {
        let instance: ErasedInstance = Arc::new(instance);
        Self::from_factory(Arc::new(move |_: &Resolver<'_>| Ok(instance.clone())))
    }

    pub fn factory<F>(factory: F) -> Self
    where
        F: Fn(&Resolver<'_>) -> Result<T> + Send + Sync + 'static,
    {
        Self::from_factory(Arc::new(move |resolver: &Resolver<'_>| {
            Ok(Arc::new(factory(resolver)?) as ErasedInstance)
        }))
    }

    fn from_factory(factory: Factory) -> Self {
        Self {
            def: ProviderDef {
                key: TypeKey::of::<T>(),
                factory,
                timeouts: Vec::new(),
                crons: Vec::new(),
                processors: Vec::new(),
                cqrs: Vec::new(),
            },
            _marker: PhantomData,
        }
    }

    /// Run `task` once, `delay` after the application starts.
    pub fn timeout<F, Fut>(mut self, method: &'static str, delay: Duration, task: F) -> Self
    where
        F: Fn(Arc<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.def
            .timeouts
            .push(TimeoutTask::new(method, delay, erase_task(task)));
        self
    }

    /// Run `task` on every tick of a cron expression. Both the five-field form
    /// and the seconds-first six-field form are accepted.
    pub fn cron<F, Fut>(mut self, method: &'static str, expression: &str, task: F) -> Self
    where
        F: Fn(Arc<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.def
            .crons
            .push(CronTask::new(method, expression, erase_task(task)));
        self
    }

    /// Process jobs from an in-process queue.
    pub fn process<F, Fut>(mut self, method: &'static str, options: ProcessorOptions, handler: F) -> Self
    where
        F: Fn(Arc<T>, Job) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let run = Arc::new(move |instance: ErasedInstance, job: Job| {
            let handler = handler.clone();
            async move {
                let provider = downcast_instance::<T>(instance)?;
                handler(provider, job).await
            }
            .boxed()
        });
        self.def
            .processors
            .push(JobProcessor::new(method, options, run));
        self
    }

    pub fn command_handler<C>(mut self) -> Self
    where
        C: Command,
        T: CommandHandler<C>,
    {
        self.def.cqrs.push(cqrs::command_hook::<T, C>());
        self
    }

    pub fn query_handler<Q>(mut self) -> Self
    where
        Q: Query,
        T: QueryHandler<Q>,
    {
        self.def.cqrs.push(cqrs::query_hook::<T, Q>());
        self
    }

    /// Handle `E`; call it once per event type the provider listens to.
    pub fn event_handler<E>(mut self) -> Self
    where
        E: Event,
        T: EventHandler<E>,
    {
        self.def.cqrs.push(cqrs::event_hook::<T, E>());
        self
    }

    /// Map every published `E` to an optional command executed on the command bus.
    pub fn saga<E, C, F>(mut self, name: &'static str, map: F) -> Self
    where
        E: Event,
        C: Command,
        F: Fn(&T, &E) -> Option<C> + Send + Sync + 'static,
    {
        self.def.cqrs.push(cqrs::saga_hook::<T, E, C, F>(name, map));
        self
    }
}

impl<T> From<Provider<T>> for ProviderDef {
    fn from(provider: Provider<T>) -> Self {
        provider.def
    }
}

pub(crate) fn downcast_instance<T: Send + Sync + 'static>(
    instance: ErasedInstance,
) -> anyhow::Result<Arc<T>> {
    instance.downcast::<T>().map_err(|_| {
        BunstoneError::DowncastFailed {
            type_name: std::any::type_name::<T>().to_string(),
        }
        .into()
    })
}

fn erase_task<T, F, Fut>(task: F) -> crate::schedule::TaskFn
where
    T: Send + Sync + 'static,
    F: Fn(Arc<T>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    let task = Arc::new(task);
    Arc::new(move |instance: ErasedInstance| {
        let task = task.clone();
        async move {
            let provider = downcast_instance::<T>(instance)?;
            task(provider).await
        }
        .boxed()
    })
}
