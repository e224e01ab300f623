use crate::cqrs::SagaRegistry;
use crate::di::InjectablePool;
use crate::module::{CompiledModule, ModuleId};
use dashmap::DashMap;
use std::sync::Arc;

#[derive(Default)]
struct Inner {
    global: InjectablePool,
    overrides: InjectablePool,
    compiled: DashMap<ModuleId, Arc<CompiledModule>>,
    sagas: SagaRegistry,
}

/// Process-lifetime state shared by every compilation of an application.
///
/// Holds the global pool filled by `global` modules, the test-override
/// pool, the per-module compile cache, and the sagas already subscribed.
/// Cloning is cheap and shares the same state.
#[derive(Clone, Default)]
pub struct ApplicationContext {
    inner: Arc<Inner>,
}

impl ApplicationContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn global(&self) -> &InjectablePool {
        &self.inner.global
    }

    pub fn overrides(&self) -> &InjectablePool {
        &self.inner.overrides
    }

    pub fn sagas(&self) -> &SagaRegistry {
        &self.inner.sagas
    }

    pub fn compiled(&self, id: ModuleId) -> Option<Arc<CompiledModule>> {
        self.inner.compiled.get(&id).map(|entry| entry.value().clone())
    }

    pub(crate) fn store_compiled(&self, module: Arc<CompiledModule>) {
        self.inner.compiled.insert(module.id, module);
    }

    /// Forget compiled modules so the next create compiles from scratch.
    /// Global instances, overrides and saga registrations are kept.
    pub fn reset_compiled(&self) {
        self.inner.compiled.clear();
    }
}

impl std::fmt::Debug for ApplicationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApplicationContext")
            .field("global", &self.inner.global.len())
            .field("overrides", &self.inner.overrides.len())
            .field("compiled", &self.inner.compiled.len())
            .finish()
    }
}
