//! Controllers: a route prefix plus handlers bound to HTTP methods.
//!
//! ```ignore
//! Controller::<UserController>::new("users")
//!     .guard::<AuthGuard>()
//!     .route(
//!         Route::get("find_one", ":id").param(ParamDescriptor::path_param().key("id")),
//!         |ctrl, args| async move { ctrl.find_one(args.text(0)).await },
//!     )
//! ```

mod params;
mod path;

pub use params::{Arguments, ParamDescriptor, ParamKind, ParamValue};
pub use path::{compose_path, to_axum_path};

use crate::di::{ErasedInstance, Injectable, Provider, ProviderDef, TypeKey, downcast_instance};
use crate::dispatch::Reply;
use crate::exception::RequestError;
use crate::guard::{Guard, GuardDef};
use crate::ratelimit::RateLimitConfig;
use crate::render::Component;
use futures::FutureExt;
use futures::future::BoxFuture;
use std::future::Future;
use std::marker::PhantomData;
use std::str::FromStr;
use std::sync::Arc;
use strum_macros::{Display, EnumString};

pub type HandlerResult = Result<Reply, RequestError>;

pub(crate) type ErasedHandler =
    Arc<dyn Fn(ErasedInstance, Arguments) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString)]
#[strum(ascii_case_insensitive, serialize_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Options,
    Head,
}

impl HttpMethod {
    pub fn parse(name: &str) -> Option<Self> {
        Self::from_str(name.trim()).ok()
    }

    pub fn filter(&self) -> axum::routing::MethodFilter {
        use axum::routing::MethodFilter;
        match self {
            Self::Get => MethodFilter::GET,
            Self::Post => MethodFilter::POST,
            Self::Put => MethodFilter::PUT,
            Self::Delete => MethodFilter::DELETE,
            Self::Patch => MethodFilter::PATCH,
            Self::Options => MethodFilter::OPTIONS,
            Self::Head => MethodFilter::HEAD,
        }
    }
}

/// Declaration of one route handler.
#[derive(Clone)]
pub struct Route {
    pub(crate) method: String,
    pub(crate) path: String,
    pub(crate) handler_name: &'static str,
    pub(crate) params: Vec<ParamDescriptor>,
    pub(crate) guard: Option<GuardDef>,
    pub(crate) render: Option<Arc<dyn Component>>,
    pub(crate) headers: Vec<(String, String)>,
    pub(crate) rate_limit: Option<RateLimitConfig>,
}

impl Route {
    /// A route for any method name. Names outside GET, POST, PUT, DELETE,
    /// PATCH, OPTIONS and HEAD are rejected when the module is compiled.
    pub fn method(method: impl Into<String>, handler_name: &'static str, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            handler_name,
            params: Vec::new(),
            guard: None,
            render: None,
            headers: Vec::new(),
            rate_limit: None,
        }
    }

    pub fn get(handler_name: &'static str, path: impl Into<String>) -> Self {
        Self::method("GET", handler_name, path)
    }

    pub fn post(handler_name: &'static str, path: impl Into<String>) -> Self {
        Self::method("POST", handler_name, path)
    }

    pub fn put(handler_name: &'static str, path: impl Into<String>) -> Self {
        Self::method("PUT", handler_name, path)
    }

    pub fn delete(handler_name: &'static str, path: impl Into<String>) -> Self {
        Self::method("DELETE", handler_name, path)
    }

    pub fn patch(handler_name: &'static str, path: impl Into<String>) -> Self {
        Self::method("PATCH", handler_name, path)
    }

    pub fn options(handler_name: &'static str, path: impl Into<String>) -> Self {
        Self::method("OPTIONS", handler_name, path)
    }

    pub fn head(handler_name: &'static str, path: impl Into<String>) -> Self {
        Self::method("HEAD", handler_name, path)
    }

    /// Add an argument. Without an explicit index it goes after the previous one.
    pub fn param(mut self, param: ParamDescriptor) -> Self {
        let param = match param.index {
            Some(_) => param,
            None => {
                let next = self
                    .params
                    .iter()
                    .filter_map(|p| p.index)
                    .max()
                    .map_or(0, |max| max + 1);
                param.at(next)
            }
        };
        self.params.push(param);
        self
    }

    pub fn guard<G: Guard + Injectable>(mut self) -> Self {
        self.guard = Some(GuardDef::of::<G>());
        self
    }

    pub fn guard_with(mut self, guard: GuardDef) -> Self {
        self.guard = Some(guard);
        self
    }

    /// Render the handler's return value through `component`, with hydration.
    pub fn render(mut self, component: Arc<dyn Component>) -> Self {
        self.render = Some(component);
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn rate_limit(mut self, config: RateLimitConfig) -> Self {
        self.rate_limit = Some(config);
        self
    }
}

#[derive(Clone)]
pub(crate) struct RouteDef {
    pub route: Route,
    pub handler: ErasedHandler,
}

/// Type-erased controller declaration consumed by the module compiler.
#[derive(Clone)]
pub struct ControllerDef {
    pub(crate) prefix: String,
    pub(crate) guard: Option<GuardDef>,
    pub(crate) rate_limit: Option<RateLimitConfig>,
    pub(crate) routes: Vec<RouteDef>,
    pub(crate) provider: Arc<ProviderDef>,
}

impl ControllerDef {
    pub fn key(&self) -> TypeKey {
        self.provider.key()
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }
}

/// Typed builder for a [`ControllerDef`].
pub struct Controller<C> {
    def: ControllerDef,
    _marker: PhantomData<fn() -> C>,
}

impl<C: Injectable> Controller<C> {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self::with_provider(prefix, Provider::<C>::new())
    }
}

impl<C: Send + Sync + 'static> Controller<C> {
    /// Build the controller instance through a custom provider declaration.
    pub fn with_provider(prefix: impl Into<String>, provider: Provider<C>) -> Self {
        Self {
            def: ControllerDef {
                prefix: prefix.into(),
                guard: None,
                rate_limit: None,
                routes: Vec::new(),
                provider: Arc::new(provider.into()),
            },
            _marker: PhantomData,
        }
    }

    /// Guard every route that does not declare its own.
    pub fn guard<G: Guard + Injectable>(mut self) -> Self {
        self.def.guard = Some(GuardDef::of::<G>());
        self
    }

    pub fn guard_with(mut self, guard: GuardDef) -> Self {
        self.def.guard = Some(guard);
        self
    }

    /// Rate limit every route that does not declare its own.
    pub fn rate_limit(mut self, config: RateLimitConfig) -> Self {
        self.def.rate_limit = Some(config);
        self
    }

    pub fn route<F, Fut, R>(mut self, route: Route, handler: F) -> Self
    where
        F: Fn(Arc<C>, Arguments) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, RequestError>> + Send + 'static,
        R: Into<Reply>,
    {
        let handler = Arc::new(handler);
        let erased: ErasedHandler = Arc::new(move |instance: ErasedInstance, args: Arguments| {
            let handler = handler.clone();
            async move {
                let controller = downcast_instance::<C>(instance)?;
                handler(controller, args).await.map(Into::into)
            }
            .boxed()
        });
        self.def.routes.push(RouteDef {
            route,
            handler: erased,
        });
        self
    }
}

impl<C> From<Controller<C>> for ControllerDef {
    fn from(controller: Controller<C>) -> Self {
        controller.def
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_method_names() {
        assert_eq!(HttpMethod::parse("get"), Some(HttpMethod::Get));
        assert_eq!(HttpMethod::parse("PATCH"), Some(HttpMethod::Patch));
        assert_eq!(HttpMethod::parse("PROPFIND"), None);
        assert_eq!(HttpMethod::Options.to_string(), "OPTIONS");
    }

    #[test]
    fn test_params_are_indexed_in_order() {
        let route = Route::post("create", "/")
            .param(ParamDescriptor::body())
            .param(ParamDescriptor::request().at(3))
            .param(ParamDescriptor::header("x-token"));
        let indexes: Vec<_> = route.params.iter().map(|p| p.index).collect();
        assert_eq!(indexes, vec![Some(0), Some(3), Some(4)]);
    }
}
