use proc_macro::TokenStream;

mod injectable;

/// Derive macro that lets the resolver build a struct from its dependencies.
///
/// Every `Arc<T>` field is resolved as a singleton from the module pool and every
/// `Arc<dyn Trait>` field through the module's trait bindings. Any other field is
/// initialised with `Default::default()`.
///
/// # Example
/// ```ignore
/// use bunstone::Injectable;
///
/// #[derive(Injectable)]
/// pub struct UserService {
///     repository: Arc<dyn UserRepository>,
///     events: Arc<EventBus>,
/// }
/// ```
#[proc_macro_derive(Injectable)]
pub fn derive_injectable(input: TokenStream) -> TokenStream {
    injectable::derive_injectable(input)
}
