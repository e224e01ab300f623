mod commands;
mod controller;
mod repository;

pub use commands::{CreateUser, UserCreated};
pub use controller::UserController;
pub use repository::{InMemoryUserRepository, User, UserRepository};

use bunstone::prelude::*;
use commands::{UserCommands, WelcomeMailer};
use std::time::Duration;

pub struct UsersModule;

impl Module for UsersModule {
    fn descriptor() -> ModuleDescriptor {
        ModuleDescriptor::of::<Self>()
            .provide::<ConfigService>()
            .bind::<dyn UserRepository, InMemoryUserRepository, _>(|repo| repo as Arc<dyn UserRepository>)
            .provider(
                Provider::<UserCommands>::new()
                    .command_handler::<CreateUser>()
                    .saga::<UserCreated, commands::SendWelcome, _>("welcome", |_, event| {
                        Some(commands::SendWelcome {
                            email: event.email.clone(),
                        })
                    })
                    .command_handler::<commands::SendWelcome>()
                    .timeout("report", Duration::from_secs(5), |commands| async move {
                        commands.report().await;
                        Ok(())
                    }),
            )
            .provider(Provider::<WelcomeMailer>::new().process(
                "deliver",
                ProcessorOptions::queue("mail").job("welcome"),
                |mailer, job| async move { mailer.deliver(job.data()?).await },
            ))
            .controller(controller::routes())
            .export::<dyn UserRepository>()
    }
}
