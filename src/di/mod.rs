mod injectable;
mod pool;
mod provider;
mod resolver;

pub use injectable::Injectable;
pub use pool::{Binding, ErasedInstance, InjectablePool, PoolEntry, TypeKey};
pub use provider::{Provider, ProviderDef};
pub(crate) use provider::downcast_instance;
pub use resolver::Resolver;
