use crate::modules::{pages::PagesModule, users::UsersModule};
use bunstone::prelude::*;

pub struct AppModule;

impl Module for AppModule {
    fn descriptor() -> ModuleDescriptor {
        ModuleDescriptor::of::<Self>()
            .import::<CqrsModule>()
            .import::<QueueModule>()
            .import::<UsersModule>()
            .import::<PagesModule>()
    }
}
