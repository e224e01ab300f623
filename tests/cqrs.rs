use bunstone::prelude::*;
use bunstone::testing::Test;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

struct CreateUser {
    name: String,
}

impl Command for CreateUser {
    type Output = usize;
}

struct SendWelcome {
    name: String,
}

impl Command for SendWelcome {
    type Output = ();
}

struct CountUsers;

impl Query for CountUsers {
    type Output = usize;
}

struct UserCreated {
    name: String,
}

impl Event for UserCreated {}

#[derive(Injectable)]
struct UserHandlers {
    events: Arc<EventBus>,
    users: Mutex<Vec<String>>,
    welcomed: Mutex<Vec<String>>,
}

#[async_trait]
impl CommandHandler<CreateUser> for UserHandlers {
    async fn execute(&self, command: CreateUser) -> anyhow::Result<usize> {
        let count = {
            let mut users = self.users.lock().unwrap();
            users.push(command.name.clone());
            users.len()
        };
        self.events.publish(UserCreated { name: command.name });
        Ok(count)
    }
}

#[async_trait]
impl CommandHandler<SendWelcome> for UserHandlers {
    async fn execute(&self, command: SendWelcome) -> anyhow::Result<()> {
        self.welcomed.lock().unwrap().push(command.name);
        Ok(())
    }
}

#[async_trait]
impl QueryHandler<CountUsers> for UserHandlers {
    async fn execute(&self, _: CountUsers) -> anyhow::Result<usize> {
        Ok(self.users.lock().unwrap().len())
    }
}

#[derive(Injectable)]
struct AuditLog {
    seen: AtomicUsize,
}

#[async_trait]
impl EventHandler<UserCreated> for AuditLog {
    async fn handle(&self, _: Arc<UserCreated>) -> anyhow::Result<()> {
        self.seen.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn users_module() -> ModuleDescriptor {
    ModuleDescriptor::anonymous("Users")
        .import::<CqrsModule>()
        .provider(
            Provider::<UserHandlers>::new()
                .command_handler::<CreateUser>()
                .command_handler::<SendWelcome>()
                .query_handler::<CountUsers>()
                .saga::<UserCreated, SendWelcome, _>("welcome", |_, event| {
                    Some(SendWelcome {
                        name: event.name.clone(),
                    })
                }),
        )
        .provider(Provider::<AuditLog>::new().event_handler::<UserCreated>())
}

async fn eventually<F: Fn() -> bool>(check: F) -> bool {
    for _ in 0..50 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}

#[tokio::test]
async fn test_command_query_and_event_round_trip() {
    let module = Test::create_testing_module(users_module()).compile().await.unwrap();
    let app = module.create_test_app().await.unwrap();
    let commands = app.app().get::<CommandBus>().unwrap();
    let queries = app.app().get::<QueryBus>().unwrap();

    assert_eq!(commands.execute(CreateUser { name: "ada".into() }).await.unwrap(), 1);
    assert_eq!(commands.execute(CreateUser { name: "alan".into() }).await.unwrap(), 2);
    assert_eq!(queries.execute(CountUsers).await.unwrap(), 2);

    let audit = module.get::<AuditLog>().unwrap();
    assert!(eventually(|| audit.seen.load(Ordering::SeqCst) == 2).await);

    let handlers = module.get::<UserHandlers>().unwrap();
    assert!(eventually(|| handlers.welcomed.lock().unwrap().len() == 2).await);
}

#[tokio::test]
async fn test_unregistered_command_is_a_cqrs_error() {
    struct Unknown;
    impl Command for Unknown {
        type Output = ();
    }

    let module = Test::create_testing_module(users_module()).compile().await.unwrap();
    let app = module.create_test_app().await.unwrap();
    let err = app
        .app()
        .get::<CommandBus>()
        .unwrap()
        .execute(Unknown)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "BNS-CQRS-001");
}

#[tokio::test]
async fn test_saga_registers_once_per_instance() {
    let module = Test::create_testing_module(users_module()).compile().await.unwrap();
    let first = module.create_test_app().await.unwrap();
    let _second = module.create_test_app().await.unwrap();

    let events = first.app().get::<EventBus>().unwrap();
    assert_eq!(events.handler_count::<UserCreated>(), 1);
    events.publish(UserCreated { name: "grace".into() });

    let handlers = module.get::<UserHandlers>().unwrap();
    assert!(eventually(|| !handlers.welcomed.lock().unwrap().is_empty()).await);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(*handlers.welcomed.lock().unwrap(), vec!["grace".to_string()]);
}
