use super::{Command, CommandHandler, Query, QueryHandler};
use crate::di::{Injectable, Resolver, TypeKey};
use crate::error::{BunstoneError, Result};
use dashmap::DashMap;
use futures::FutureExt;
use futures::future::BoxFuture;
use std::any::{Any, TypeId};
use std::sync::Arc;

type Payload = Box<dyn Any + Send>;
type ErasedCall = Arc<dyn Fn(Payload) -> BoxFuture<'static, anyhow::Result<Payload>> + Send + Sync>;

#[derive(Clone)]
struct Registered {
    handler: TypeKey,
    call: ErasedCall,
}

/// One handler per message type; the last registration wins.
#[derive(Clone)]
struct HandlerTable {
    kind: &'static str,
    handlers: Arc<DashMap<TypeId, Registered>>,
}

impl HandlerTable {
    fn new(kind: &'static str) -> Self {
        Self {
            kind,
            handlers: Arc::new(DashMap::new()),
        }
    }

    fn insert(&self, message: TypeKey, registered: Registered) {
        tracing::info!(
            kind = self.kind,
            message = %message.short_name(),
            handler = %registered.handler.short_name(),
            "Registered handler"
        );
        if let Some(previous) = self.handlers.insert(message.id, registered) {
            tracing::debug!(
                message = %message.short_name(),
                replaced = %previous.handler.short_name(),
                "Handler replaced"
            );
        }
    }

    async fn dispatch<M: Send + 'static, O: Send + 'static>(&self, message: M) -> Result<O> {
        let key = TypeKey::of::<M>();
        let call = self
            .handlers
            .get(&key.id)
            .map(|registered| registered.call.clone())
            .ok_or_else(|| BunstoneError::Cqrs {
                message: format!("No handler registered for {} {}", self.kind, key.short_name()),
                suggestion: format!(
                    "Declare a provider with .{}_handler::<{}>() in a module that imports CqrsModule.",
                    self.kind,
                    key.short_name()
                ),
            })?;

        let output = call(Box::new(message) as Payload).await?;
        output
            .downcast::<O>()
            .map(|output| *output)
            .map_err(|_| BunstoneError::DowncastFailed {
                type_name: std::any::type_name::<O>().to_string(),
            })
    }

    fn contains(&self, id: TypeId) -> bool {
        self.handlers.contains_key(&id)
    }
}

fn erase<M, O, F, Fut>(call: F) -> ErasedCall
where
    M: Send + 'static,
    O: Send + 'static,
    F: Fn(M) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = anyhow::Result<O>> + Send + 'static,
{
    let call = Arc::new(call);
    Arc::new(move |payload: Payload| {
        let call = call.clone();
        async move {
            let message = payload.downcast::<M>().map_err(|_| {
                anyhow::anyhow!("payload is not a {}", std::any::type_name::<M>())
            })?;
            let output = call(*message).await?;
            Ok(Box::new(output) as Payload)
        }
        .boxed()
    })
}

#[derive(Clone)]
pub struct CommandBus {
    table: HandlerTable,
}

impl Default for CommandBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Injectable for CommandBus {
    fn inject(_: &Resolver<'_>) -> Result<Self> {
        Ok(Self::new())
    }
}

impl CommandBus {
    pub fn new() -> Self {
        Self {
            table: HandlerTable::new("command"),
        }
    }

    pub fn register<C: Command, H: CommandHandler<C>>(&self, handler: Arc<H>) {
        let call = erase(move |command: C| {
            let handler = handler.clone();
            async move { handler.execute(command).await }
        });
        self.table.insert(
            TypeKey::of::<C>(),
            Registered {
                handler: TypeKey::of::<H>(),
                call,
            },
        );
    }

    pub async fn execute<C: Command>(&self, command: C) -> Result<C::Output> {
        self.table.dispatch::<C, C::Output>(command).await
    }

    pub fn has_handler<C: Command>(&self) -> bool {
        self.table.contains(TypeId::of::<C>())
    }
}

#[derive(Clone)]
pub struct QueryBus {
    table: HandlerTable,
}

impl Default for QueryBus {
    fn default() -> Self {
        Self::new()
    }
}

impl Injectable for QueryBus {
    fn inject(_: &Resolver<'_>) -> Result<Self> {
        Ok(Self::new())
    }
}

impl QueryBus {
    pub fn new() -> Self {
        Self {
            table: HandlerTable::new("query"),
        }
    }

    pub fn register<Q: Query, H: QueryHandler<Q>>(&self, handler: Arc<H>) {
        let call = erase(move |query: Q| {
            let handler = handler.clone();
            async move { handler.execute(query).await }
        });
        self.table.insert(
            TypeKey::of::<Q>(),
            Registered {
                handler: TypeKey::of::<H>(),
                call,
            },
        );
    }

    pub async fn execute<Q: Query>(&self, query: Q) -> Result<Q::Output> {
        self.table.dispatch::<Q, Q::Output>(query).await
    }

    pub fn has_handler<Q: Query>(&self) -> bool {
        self.table.contains(TypeId::of::<Q>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CreateUser(String);

    impl Command for CreateUser {
        type Output = String;
    }

    struct Unregistered;

    impl Command for Unregistered {
        type Output = ();
    }

    #[derive(Default)]
    struct CreateUserHandler {
        calls: AtomicUsize,
        prefix: &'static str,
    }

    #[async_trait]
    impl CommandHandler<CreateUser> for CreateUserHandler {
        async fn execute(&self, command: CreateUser) -> anyhow::Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(format!("{}{}", self.prefix, command.0))
        }
    }

    struct CountUsers;

    impl Query for CountUsers {
        type Output = usize;
    }

    struct CountUsersHandler;

    #[async_trait]
    impl QueryHandler<CountUsers> for CountUsersHandler {
        async fn execute(&self, _: CountUsers) -> anyhow::Result<usize> {
            Ok(3)
        }
    }

    #[tokio::test]
    async fn test_command_round_trip() {
        let bus = CommandBus::new();
        let handler = Arc::new(CreateUserHandler {
            prefix: "created:",
            ..Default::default()
        });
        bus.register::<CreateUser, _>(handler.clone());

        let result = bus.execute(CreateUser("x".into())).await.unwrap();
        assert_eq!(result, "created:x");
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unregistered_command_is_cqrs_error() {
        let bus = CommandBus::new();
        let err = bus.execute(Unregistered).await.err().unwrap();
        assert!(matches!(err, BunstoneError::Cqrs { .. }));
        assert!(err.to_string().contains("Unregistered"));
    }

    #[tokio::test]
    async fn test_last_registration_wins() {
        let bus = CommandBus::new();
        bus.register::<CreateUser, _>(Arc::new(CreateUserHandler {
            prefix: "first:",
            ..Default::default()
        }));
        bus.register::<CreateUser, _>(Arc::new(CreateUserHandler {
            prefix: "second:",
            ..Default::default()
        }));
        assert_eq!(bus.execute(CreateUser("y".into())).await.unwrap(), "second:y");
    }

    #[tokio::test]
    async fn test_query_round_trip() {
        let bus = QueryBus::new();
        assert!(!bus.has_handler::<CountUsers>());
        bus.register::<CountUsers, _>(Arc::new(CountUsersHandler));
        assert_eq!(bus.execute(CountUsers).await.unwrap(), 3);
    }
}
