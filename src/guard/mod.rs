use crate::di::{Injectable, Resolver, TypeKey};
use crate::dispatch::RequestContext;
use crate::error::{BunstoneError, Result};
use async_trait::async_trait;
use std::sync::Arc;

/// The Guard trait
/// Implement this to protect routes; returning `false` rejects the request
/// before the handler runs.
#[async_trait]
pub trait Guard: Send + Sync + 'static {
    async fn validate(&self, request: &RequestContext) -> bool;
}

type GuardFactory = Arc<dyn Fn(&Resolver<'_>) -> Result<Arc<dyn Guard>> + Send + Sync>;

/// A guard declaration attached to a controller or a route.
///
/// The guard itself is built when routes are bound, with its dependencies
/// resolved from the owning module.
#[derive(Clone)]
pub struct GuardDef {
    key: TypeKey,
    build: GuardFactory,
}

impl GuardDef {
    pub fn of<G: Guard + Injectable>() -> Self {
        Self {
            key: TypeKey::of::<G>(),
            build: Arc::new(|resolver: &Resolver<'_>| {
                Ok(Arc::new(resolver.instantiate::<G>()?) as Arc<dyn Guard>)
            }),
        }
    }

    pub fn value<G: Guard>(guard: G) -> Self {
        let guard: Arc<dyn Guard> = Arc::new(guard);
        Self {
            key: TypeKey::of::<G>(),
            build: Arc::new(move |_: &Resolver<'_>| Ok(guard.clone())),
        }
    }

    pub fn key(&self) -> TypeKey {
        self.key
    }

    pub(crate) fn build(&self, resolver: &Resolver<'_>) -> Result<Arc<dyn Guard>> {
        (self.build)(resolver).map_err(|err| match err {
            BunstoneError::CircularDependency { .. } => err,
            other => BunstoneError::Guard {
                guard: self.key.short_name(),
                message: other.to_string(),
            },
        })
    }
}

impl std::fmt::Debug for GuardDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("GuardDef").field(&self.key.name).finish()
    }
}
