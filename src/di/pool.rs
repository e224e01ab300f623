use crate::di::{Injectable, Resolver};
use crate::error::Result;
use dashmap::DashMap;
use std::any::{Any, TypeId};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// A resolved instance with its concrete type erased.
///
/// Trait-object entries hold an `Arc<dyn Trait>` wrapped in a second `Arc`, so
/// the stored value is always `Sized`.
pub type ErasedInstance = Arc<dyn Any + Send + Sync>;

type BindingFn = Arc<dyn Fn(&Resolver<'_>) -> Result<ErasedInstance> + Send + Sync>;

/// Identity of a provider type together with a printable name.
#[derive(Clone, Copy, Debug)]
pub struct TypeKey {
    pub id: TypeId,
    pub name: &'static str,
}

impl TypeKey {
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    /// The type name without its module path, e.g. `UserService`.
    pub fn short_name(&self) -> String {
        let base = self.name.split('<').next().unwrap_or(self.name);
        let short = base.rsplit("::").next().unwrap_or(base);
        match base.strip_prefix("dyn ") {
            Some(_) if !short.starts_with("dyn ") => format!("dyn {short}"),
            _ => short.to_string(),
        }
    }
}

impl PartialEq for TypeKey {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeKey {}

impl Hash for TypeKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

/// Maps a trait object type to the implementation that backs it.
#[derive(Clone)]
pub struct Binding {
    key: TypeKey,
    implementation: TypeKey,
    resolve: BindingFn,
}

impl Binding {
    pub fn new<Trait, Impl, F>(caster: F) -> Self
    where
        Trait: ?Sized + Send + Sync + 'static,
        Impl: Injectable,
        F: Fn(Arc<Impl>) -> Arc<Trait> + Send + Sync + 'static,
    {
        let resolve: BindingFn = Arc::new(move |resolver: &Resolver<'_>| {
            let concrete = resolver.resolve::<Impl>()?;
            let trait_obj: Arc<Trait> = caster(concrete);
            Ok(Arc::new(trait_obj) as ErasedInstance)
        });

        Self {
            key: TypeKey::of::<Trait>(),
            implementation: TypeKey::of::<Impl>(),
            resolve,
        }
    }

    pub fn key(&self) -> TypeKey {
        self.key
    }

    pub fn implementation(&self) -> TypeKey {
        self.implementation
    }

    pub(crate) fn resolve(&self, resolver: &Resolver<'_>) -> Result<ErasedInstance> {
        (self.resolve)(resolver)
    }
}

#[derive(Clone)]
pub struct PoolEntry {
    pub key: TypeKey,
    pub instance: ErasedInstance,
}

/// Thread-safe map of resolved singletons, one per provider type.
///
/// Cloning a pool is cheap and yields a handle onto the same storage.
#[derive(Clone, Default)]
pub struct InjectablePool {
    instances: Arc<DashMap<TypeId, PoolEntry>>,
    bindings: Arc<DashMap<TypeId, Binding>>,
}

impl InjectablePool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<T: Send + Sync + 'static>(&self, instance: Arc<T>) {
        self.insert_erased(TypeKey::of::<T>(), instance);
    }

    /// Store a trait object under the trait's identity.
    pub fn insert_trait<T: ?Sized + Send + Sync + 'static>(&self, instance: Arc<T>) {
        self.insert_erased(TypeKey::of::<T>(), Arc::new(instance));
    }

    pub fn insert_erased(&self, key: TypeKey, instance: ErasedInstance) {
        self.instances.insert(key.id, PoolEntry { key, instance });
    }

    pub fn get<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.get_erased(TypeId::of::<T>())?.downcast::<T>().ok()
    }

    pub fn get_trait<T: ?Sized + Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        let wrapper = self.get_erased(TypeId::of::<T>())?.downcast::<Arc<T>>().ok()?;
        Some(wrapper.as_ref().clone())
    }

    pub fn get_erased(&self, id: TypeId) -> Option<ErasedInstance> {
        self.instances.get(&id).map(|entry| entry.instance.clone())
    }

    pub fn contains<T: ?Sized + 'static>(&self) -> bool {
        self.contains_id(TypeId::of::<T>())
    }

    pub fn contains_id(&self, id: TypeId) -> bool {
        self.instances.contains_key(&id) || self.bindings.contains_key(&id)
    }

    pub fn bind(&self, binding: Binding) {
        self.bindings.insert(binding.key.id, binding);
    }

    pub fn binding(&self, id: TypeId) -> Option<Binding> {
        self.bindings.get(&id).map(|binding| binding.clone())
    }

    /// Copy every instance and binding of `other` into this pool.
    pub fn merge_from(&self, other: &InjectablePool) {
        if Arc::ptr_eq(&self.instances, &other.instances) {
            return;
        }
        for entry in other.instances.iter() {
            self.instances.insert(*entry.key(), entry.value().clone());
        }
        for binding in other.bindings.iter() {
            self.bindings.insert(*binding.key(), binding.value().clone());
        }
    }

    pub fn entries(&self) -> Vec<PoolEntry> {
        self.instances
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    pub fn clear(&self) {
        self.instances.clear();
        self.bindings.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Counter {
        value: i32,
    }

    trait Named: Send + Sync {
        fn name(&self) -> &str;
    }

    struct Fixed;

    impl Named for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }
    }

    #[test]
    fn test_insert_and_get() {
        let pool = InjectablePool::new();
        pool.insert(Arc::new(Counter { value: 42 }));
        let counter = pool.get::<Counter>().unwrap();
        assert_eq!(counter.value, 42);
        assert!(pool.contains::<Counter>());
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_trait_objects_are_stored_by_trait_identity() {
        let pool = InjectablePool::new();
        pool.insert_trait::<dyn Named>(Arc::new(Fixed));
        assert_eq!(pool.get_trait::<dyn Named>().unwrap().name(), "fixed");
        assert!(pool.get::<Fixed>().is_none());
    }

    #[test]
    fn test_merge_shares_instances() {
        let source = InjectablePool::new();
        source.insert(Arc::new(Counter { value: 1 }));
        let target = InjectablePool::new();
        target.merge_from(&source);
        assert!(Arc::ptr_eq(
            &source.get::<Counter>().unwrap(),
            &target.get::<Counter>().unwrap()
        ));
    }

    #[test]
    fn test_short_name() {
        assert_eq!(TypeKey::of::<Counter>().short_name(), "Counter");
        assert_eq!(TypeKey::of::<String>().short_name(), "String");
    }
}
