//! Declarative modules and their compilation into resolved pools and routes.

mod compiler;

pub use compiler::{CompiledModule, CompiledRoute, ModuleCompiler};

use crate::controller::ControllerDef;
use crate::di::{Binding, Injectable, Provider, ProviderDef, TypeKey};
use std::any::TypeId;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Trait for application modules
///
/// A module describes its controllers, providers, imports and exports once;
/// the compiler turns that description into a resolved pool and route table.
///
/// # Example
/// ```ignore
/// struct UsersModule;
///
/// impl Module for UsersModule {
///     fn descriptor() -> ModuleDescriptor {
///         ModuleDescriptor::of::<Self>()
///             .controller(Controller::<UserController>::new("users"))
///             .provide::<UserService>()
///             .import::<DatabaseModule>()
///             .export::<UserService>()
///     }
/// }
/// ```
pub trait Module: 'static {
    fn descriptor() -> ModuleDescriptor;
}

/// Identity used to compile each module at most once per application context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModuleId {
    Type(TypeId),
    Anonymous(u64),
}

type ImportFn = Arc<dyn Fn() -> ModuleDescriptor + Send + Sync>;

static NEXT_ANONYMOUS: AtomicU64 = AtomicU64::new(1);

#[derive(Clone)]
pub struct ModuleDescriptor {
    pub(crate) id: ModuleId,
    pub(crate) name: String,
    pub(crate) controllers: Vec<ControllerDef>,
    pub(crate) providers: Vec<Arc<ProviderDef>>,
    pub(crate) imports: Vec<ImportFn>,
    pub(crate) exports: Vec<TypeKey>,
    pub(crate) bindings: Vec<Binding>,
    pub(crate) global: bool,
}

impl ModuleDescriptor {
    pub fn of<M: Module>() -> Self {
        let key = TypeKey::of::<M>();
        Self::with_id(ModuleId::Type(key.id), key.short_name())
    }

    /// A module without a backing type, such as one built inside a test.
    /// Each call yields a distinct identity.
    pub fn anonymous(name: impl Into<String>) -> Self {
        let id = NEXT_ANONYMOUS.fetch_add(1, Ordering::Relaxed);
        Self::with_id(ModuleId::Anonymous(id), name.into())
    }

    fn with_id(id: ModuleId, name: String) -> Self {
        Self {
            id,
            name,
            controllers: Vec::new(),
            providers: Vec::new(),
            imports: Vec::new(),
            exports: Vec::new(),
            bindings: Vec::new(),
            global: false,
        }
    }

    pub fn id(&self) -> ModuleId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_global(&self) -> bool {
        self.global
    }

    pub fn controller(mut self, controller: impl Into<ControllerDef>) -> Self {
        self.controllers.push(controller.into());
        self
    }

    pub fn provider(mut self, provider: impl Into<ProviderDef>) -> Self {
        self.providers.push(Arc::new(provider.into()));
        self
    }

    /// Shorthand for `.provider(Provider::<T>::new())`.
    pub fn provide<T: Injectable>(self) -> Self {
        self.provider(Provider::<T>::new())
    }

    pub fn import<M: Module>(mut self) -> Self {
        self.imports.push(Arc::new(M::descriptor));
        self
    }

    pub fn import_descriptor(mut self, descriptor: ModuleDescriptor) -> Self {
        self.imports.push(Arc::new(move || descriptor.clone()));
        self
    }

    pub fn export<T: ?Sized + 'static>(mut self) -> Self {
        self.exports.push(TypeKey::of::<T>());
        self
    }

    /// Bind a trait object to an implementation resolved from this module.
    ///
    /// ```ignore
    /// .bind::<dyn UserRepository, PgUserRepository, _>(|repo| repo)
    /// ```
    pub fn bind<Trait, Impl, F>(mut self, caster: F) -> Self
    where
        Trait: ?Sized + Send + Sync + 'static,
        Impl: Injectable,
        F: Fn(Arc<Impl>) -> Arc<Trait> + Send + Sync + 'static,
    {
        self.bindings.push(Binding::new::<Trait, Impl, F>(caster));
        self
    }

    pub fn global(mut self, global: bool) -> Self {
        self.global = global;
        self
    }
}

impl std::fmt::Debug for ModuleDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleDescriptor")
            .field("name", &self.name)
            .field("controllers", &self.controllers.len())
            .field("providers", &self.providers.len())
            .field("imports", &self.imports.len())
            .field("global", &self.global)
            .finish()
    }
}
