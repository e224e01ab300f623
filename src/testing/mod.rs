//! In-process testing harness.
//!
//! ```rust,ignore
//! let module = Test::create_testing_module(
//!     ModuleDescriptor::anonymous("UsersTest").import::<UsersModule>(),
//! )
//! .override_provider::<UserRepository>()
//! .use_value(UserRepository::in_memory())
//! .compile()
//! .await?;
//!
//! let app = module.create_test_app().await?;
//! let response = app.get("/users/1").await?;
//! assert_eq!(response.status(), StatusCode::OK);
//! ```

mod app;

pub use app::{TestApp, TestResponse};

use crate::config::AppOptions;
use crate::di::TypeKey;
use crate::error::{BunstoneError, Result};
use crate::lifecycle::{Application, ApplicationContext};
use crate::module::{CompiledModule, ModuleCompiler, ModuleDescriptor};
use crate::ssr::Bundler;
use std::marker::PhantomData;
use std::sync::Arc;

pub struct Test;

impl Test {
    pub fn create_testing_module(descriptor: ModuleDescriptor) -> TestingModuleBuilder {
        TestingModuleBuilder {
            descriptor,
            context: ApplicationContext::new(),
            options: AppOptions::default(),
            bundler: None,
        }
    }
}

/// Collects provider overrides before the module is compiled.
///
/// Every builder gets a fresh [`ApplicationContext`], so overrides and
/// global providers never leak between tests.
pub struct TestingModuleBuilder {
    descriptor: ModuleDescriptor,
    context: ApplicationContext,
    options: AppOptions,
    bundler: Option<Arc<dyn Bundler>>,
}

impl TestingModuleBuilder {
    /// Replace `T` everywhere it would be resolved.
    pub fn override_provider<T: Send + Sync + 'static>(self) -> OverrideBuilder<T> {
        OverrideBuilder {
            builder: self,
            _marker: PhantomData,
        }
    }

    /// Replace the implementation behind a trait object.
    pub fn override_binding<T: ?Sized + Send + Sync + 'static>(self, instance: Arc<T>) -> Self {
        self.context.overrides().insert_trait(instance);
        self
    }

    pub fn options(mut self, options: AppOptions) -> Self {
        self.options = options;
        self
    }

    pub fn bundler(mut self, bundler: Arc<dyn Bundler>) -> Self {
        self.bundler = Some(bundler);
        self
    }

    pub async fn compile(self) -> Result<TestingModule> {
        let compiled = ModuleCompiler::new(&self.context)
            .compile(&self.descriptor)
            .inspect_err(BunstoneError::report)?;
        Ok(TestingModule {
            descriptor: self.descriptor,
            context: self.context,
            options: self.options,
            bundler: self.bundler,
            compiled,
        })
    }
}

pub struct OverrideBuilder<T> {
    builder: TestingModuleBuilder,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Send + Sync + 'static> OverrideBuilder<T> {
    pub fn use_value(self, value: T) -> TestingModuleBuilder {
        self.use_arc(Arc::new(value))
    }

    pub fn use_arc(self, value: Arc<T>) -> TestingModuleBuilder {
        self.builder.context.overrides().insert(value);
        self.builder
    }
}

/// A compiled test module.
pub struct TestingModule {
    descriptor: ModuleDescriptor,
    context: ApplicationContext,
    options: AppOptions,
    bundler: Option<Arc<dyn Bundler>>,
    compiled: Arc<CompiledModule>,
}

impl TestingModule {
    /// A resolved provider: the override if there is one, else the module's
    /// own instance, else a global one.
    pub fn get<T: Send + Sync + 'static>(&self) -> Result<Arc<T>> {
        self.context
            .overrides()
            .get::<T>()
            .or_else(|| self.compiled.pool.get::<T>())
            .or_else(|| self.context.global().get::<T>())
            .ok_or_else(|| not_found(TypeKey::of::<T>()))
    }

    pub fn get_trait<T: ?Sized + Send + Sync + 'static>(&self) -> Result<Arc<T>> {
        self.context
            .overrides()
            .get_trait::<T>()
            .or_else(|| self.compiled.pool.get_trait::<T>())
            .or_else(|| self.context.global().get_trait::<T>())
            .ok_or_else(|| not_found(TypeKey::of::<T>()))
    }

    pub fn compiled(&self) -> &Arc<CompiledModule> {
        &self.compiled
    }

    pub fn context(&self) -> &ApplicationContext {
        &self.context
    }

    /// Wire the module into an application that shares the compiled instances.
    pub async fn create_test_app(&self) -> Result<TestApp> {
        let mut builder = Application::builder()
            .descriptor(self.descriptor.clone())
            .context(self.context.clone())
            .options(self.options.clone());
        if let Some(bundler) = &self.bundler {
            builder = builder.bundler(bundler.clone());
        }
        Ok(TestApp::new(builder.build().await?))
    }
}

fn not_found(key: TypeKey) -> BunstoneError {
    BunstoneError::DependencyResolution {
        type_name: key.short_name(),
        message: "not found in the testing module".to_string(),
        suggestion: format!(
            "Provide {} in the module under test or override it with override_provider.",
            key.short_name()
        ),
    }
}
