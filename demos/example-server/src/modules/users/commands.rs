use super::repository::{User, UserRepository};
use bunstone::prelude::*;

pub struct CreateUser {
    pub name: String,
    pub email: String,
}

impl Command for CreateUser {
    type Output = User;
}

pub struct SendWelcome {
    pub email: String,
}

impl Command for SendWelcome {
    type Output = ();
}

pub struct UserCreated {
    pub email: String,
}

impl Event for UserCreated {}

#[derive(Injectable)]
pub struct UserCommands {
    users: Arc<dyn UserRepository>,
    events: Arc<EventBus>,
    queue: Arc<QueueService>,
}

impl UserCommands {
    pub async fn report(&self) {
        tracing::info!(users = self.users.all().len(), "User report");
    }
}

#[async_trait]
impl CommandHandler<CreateUser> for UserCommands {
    async fn execute(&self, command: CreateUser) -> anyhow::Result<User> {
        let user = self.users.insert(command.name, command.email);
        self.events.publish(UserCreated {
            email: user.email.clone(),
        });
        Ok(user)
    }
}

#[async_trait]
impl CommandHandler<SendWelcome> for UserCommands {
    async fn execute(&self, command: SendWelcome) -> anyhow::Result<()> {
        self.queue.add("mail", "welcome", json!(command.email))?;
        Ok(())
    }
}

#[derive(Injectable)]
pub struct WelcomeMailer;

impl WelcomeMailer {
    pub async fn deliver(&self, email: String) -> anyhow::Result<()> {
        tracing::info!(%email, "Sending welcome mail");
        Ok(())
    }
}
