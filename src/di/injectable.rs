use crate::di::Resolver;
use crate::error::Result;

/// Trait for types the resolver can build from their dependencies
///
/// This trait is typically implemented automatically via the `#[derive(Injectable)]` macro.
///
/// # Example
/// ```ignore
/// use bunstone::prelude::*;
///
/// trait UserRepository: Send + Sync {}
///
/// #[derive(Injectable)]
/// pub struct UserService {
///     // resolved through the module's trait bindings
///     repository: Arc<dyn UserRepository>,
/// }
/// ```
pub trait Injectable: Sized + Send + Sync + 'static {
    /// Create an instance by resolving dependencies through the resolver
    ///
    /// # Errors
    /// Returns an error if any required dependency cannot be resolved.
    fn inject(resolver: &Resolver<'_>) -> Result<Self>;
}
