use crate::di::pool::{ErasedInstance, InjectablePool, TypeKey};
use crate::di::{Injectable, ProviderDef};
use crate::error::{BunstoneError, Result};
use std::any::TypeId;
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;

/// Resolves providers against a module pool.
///
/// Lookup order is the test-override pool, then the module pool, then the
/// process-global pool. Anything still missing is constructed, using the
/// module's declared provider factory when there is one, and stored in the
/// module pool before it is returned. A stack of the types currently under
/// construction turns dependency cycles into [`BunstoneError::CircularDependency`].
///
/// Lookups are by type identity only; there is no fallback on type names.
pub struct Resolver<'a> {
    pool: &'a InjectablePool,
    global: &'a InjectablePool,
    overrides: &'a InjectablePool,
    providers: HashMap<TypeId, Arc<ProviderDef>>,
    resolving: RefCell<Vec<TypeKey>>,
}

impl<'a> Resolver<'a> {
    pub fn new(
        pool: &'a InjectablePool,
        global: &'a InjectablePool,
        overrides: &'a InjectablePool,
    ) -> Self {
        Self {
            pool,
            global,
            overrides,
            providers: HashMap::new(),
            resolving: RefCell::new(Vec::new()),
        }
    }

    /// Declare the factories the module owns, so dependencies on them are built
    /// the way the module says rather than through [`Injectable::inject`].
    pub fn with_providers<I>(mut self, providers: I) -> Self
    where
        I: IntoIterator<Item = Arc<ProviderDef>>,
    {
        self.providers
            .extend(providers.into_iter().map(|def| (def.key().id, def)));
        self
    }

    pub fn pool(&self) -> &InjectablePool {
        self.pool
    }

    pub fn resolve<T: Injectable>(&self) -> Result<Arc<T>> {
        let key = TypeKey::of::<T>();
        let instance = match self.lookup(key.id) {
            Some(found) => found,
            None => match self.providers.get(&key.id).cloned() {
                Some(def) => self.construct(key, |resolver| def.create(resolver))?,
                None => self.construct(key, |resolver| {
                    Ok(Arc::new(T::inject(resolver)?) as ErasedInstance)
                })?,
            },
        };
        downcast(instance, key)
    }

    /// Like [`Resolver::resolve`] but never falls back to [`Injectable::inject`]:
    /// the type must already be resolved or be declared as a provider.
    pub fn get<T: Send + Sync + 'static>(&self) -> Result<Arc<T>> {
        let key = TypeKey::of::<T>();
        let instance = match self.lookup(key.id) {
            Some(found) => found,
            None => match self.providers.get(&key.id).cloned() {
                Some(def) => self.construct(key, |resolver| def.create(resolver))?,
                None => {
                    return Err(BunstoneError::DependencyResolution {
                        type_name: key.short_name(),
                        message: "no provider or instance is registered for this type".into(),
                        suggestion: format!(
                            "Add a provider for {} to the module or import a module that exports it.",
                            key.short_name()
                        ),
                    });
                }
            },
        };
        downcast(instance, key)
    }

    pub fn resolve_trait<T: ?Sized + Send + Sync + 'static>(&self) -> Result<Arc<T>> {
        let key = TypeKey::of::<T>();
        let instance = match self.lookup(key.id) {
            Some(found) => found,
            None => {
                let binding = self
                    .pool
                    .binding(key.id)
                    .or_else(|| self.global.binding(key.id))
                    .ok_or_else(|| BunstoneError::DependencyResolution {
                        type_name: key.short_name(),
                        message: "trait objects cannot be constructed without a binding".into(),
                        suggestion: format!(
                            "Bind an implementation with ModuleDescriptor::bind::<dyn {}, Impl, _>().",
                            key.short_name()
                        ),
                    })?;
                self.construct(key, |resolver| binding.resolve(resolver))?
            }
        };

        let wrapper = instance
            .downcast::<Arc<T>>()
            .map_err(|_| BunstoneError::DowncastFailed {
                type_name: key.name.to_string(),
            })?;
        Ok(wrapper.as_ref().clone())
    }

    /// Build a fresh `T` without memoizing it. Its dependencies are still
    /// resolved as singletons.
    pub fn instantiate<T: Injectable>(&self) -> Result<T> {
        self.guarded(TypeKey::of::<T>(), |resolver| T::inject(resolver))
    }

    pub fn resolve_def(&self, def: &ProviderDef) -> Result<ErasedInstance> {
        match self.lookup(def.key().id) {
            Some(found) => Ok(found),
            None => self.construct(def.key(), |resolver| def.create(resolver)),
        }
    }

    pub fn resolve_many(&self, defs: &[Arc<ProviderDef>]) -> Result<Vec<ErasedInstance>> {
        defs.iter().map(|def| self.resolve_def(def)).collect()
    }

    fn lookup(&self, id: TypeId) -> Option<ErasedInstance> {
        self.overrides
            .get_erased(id)
            .or_else(|| self.pool.get_erased(id))
            .or_else(|| self.global.get_erased(id))
    }

    fn construct<F>(&self, key: TypeKey, build: F) -> Result<ErasedInstance>
    where
        F: FnOnce(&Self) -> Result<ErasedInstance>,
    {
        let instance = self.guarded(key, build)?;
        self.pool.insert_erased(key, instance.clone());
        tracing::debug!(provider = key.name, "Resolved provider");
        Ok(instance)
    }

    fn guarded<R, F>(&self, key: TypeKey, build: F) -> Result<R>
    where
        F: FnOnce(&Self) -> Result<R>,
    {
        {
            let mut resolving = self.resolving.borrow_mut();
            if let Some(start) = resolving.iter().position(|k| *k == key) {
                let mut chain: Vec<String> =
                    resolving[start..].iter().map(TypeKey::short_name).collect();
                chain.push(key.short_name());
                return Err(BunstoneError::CircularDependency {
                    cycle: chain.join(" -> "),
                });
            }
            resolving.push(key);
        }

        let built = build(self);
        self.resolving.borrow_mut().pop();
        built
    }
}

fn downcast<T: Send + Sync + 'static>(instance: ErasedInstance, key: TypeKey) -> Result<Arc<T>> {
    instance
        .downcast::<T>()
        .map_err(|_| BunstoneError::DowncastFailed {
            type_name: key.name.to_string(),
        })
}
