//! # Bunstone
//!
//! A declarative web framework for Rust: modules with dependency injection,
//! controllers bound to axum, CQRS buses, scheduled tasks, and server-side
//! rendering with client hydration.
//!
//! ## Features
//!
//! - **Dependency Injection**: singleton providers per module, global modules,
//!   trait-object bindings, and cycle detection
//! - **Controllers**: explicit route builders with typed parameter extraction,
//!   validation, guards, rate limits and custom headers
//! - **Rendering**: element trees streamed as HTML, hydrated in the browser from
//!   bundles built at startup
//! - **CQRS**: command, query and event buses plus sagas
//! - **Scheduling**: timeouts, cron jobs and in-process job queues
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use bunstone::prelude::*;
//!
//! #[derive(Injectable)]
//! pub struct UserService;
//!
//! impl UserService {
//!     pub fn find_one(&self, id: &str) -> Value {
//!         json!({ "id": id })
//!     }
//! }
//!
//! #[derive(Injectable)]
//! pub struct UserController {
//!     users: Arc<UserService>,
//! }
//!
//! pub struct AppModule;
//!
//! impl Module for AppModule {
//!     fn descriptor() -> ModuleDescriptor {
//!         ModuleDescriptor::of::<Self>()
//!             .provide::<UserService>()
//!             .controller(Controller::<UserController>::new("users").route(
//!                 Route::get("find_one", ":id").param(ParamDescriptor::path_param().key("id")),
//!                 |ctrl, args| async move {
//!                     Ok::<_, RequestError>(ctrl.users.find_one(args.text(0).unwrap_or_default()))
//!                 },
//!             ))
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> bunstone::Result<()> {
//!     let app = Application::create::<AppModule>().await?;
//!     app.listen("0.0.0.0:3000".parse().unwrap()).await
//! }
//! ```

extern crate self as bunstone;

pub mod config;
pub mod controller;
pub mod cqrs;
pub mod di;
pub mod dispatch;
pub mod error;
pub mod exception;
pub mod guard;
pub mod lifecycle;
pub mod module;
pub mod pipe;
pub mod queue;
pub mod ratelimit;
pub mod render;
pub mod schedule;
pub mod ssr;
pub mod testing;

// Re-export core types
pub use di::{Injectable, Provider, Resolver};
pub use error::{BunstoneError, Result};
pub use lifecycle::{Application, ApplicationBuilder, ApplicationContext};
pub use module::{Module, ModuleDescriptor};

// Re-export macros
pub use bunstone_macro::Injectable as DeriveInjectable;

// Re-export commonly used types from dependencies
pub use async_trait::async_trait;
pub use axum;

/// Prelude module for convenient imports
///
/// ```ignore
/// use bunstone::prelude::*;
/// ```
pub mod prelude {
    pub use crate::DeriveInjectable as Injectable;
    pub use crate::config::{AppOptions, ConfigService};
    pub use crate::controller::{Arguments, Controller, ParamDescriptor, Route};
    pub use crate::cqrs::{
        Command, CommandBus, CommandHandler, CqrsModule, Event, EventBus, EventHandler, Query,
        QueryBus, QueryHandler,
    };
    pub use crate::di::{Injectable, Provider, Resolver};
    pub use crate::dispatch::{FormDataOptions, Reply, RequestContext};
    pub use crate::error::{BunstoneError, Result};
    pub use crate::exception::{HttpException, RequestError};
    pub use crate::guard::{Guard, GuardDef};
    pub use crate::lifecycle::{Application, ApplicationBuilder, ApplicationContext};
    pub use crate::module::{Module, ModuleDescriptor};
    pub use crate::pipe::{ParseFloatPipe, ParseIntPipe, ValidationPipe, ValidationSchema};
    pub use crate::queue::{Job, ProcessorOptions, QueueModule, QueueService};
    pub use crate::ratelimit::RateLimitConfig;
    pub use crate::render::{Component, Element, FnComponent};
    pub use async_trait::async_trait;
    pub use serde_json::{Value, json};
    pub use std::sync::Arc;
}
