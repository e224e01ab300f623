use crate::controller::{
    ControllerDef, ErasedHandler, HttpMethod, ParamDescriptor, compose_path,
};
use crate::di::{ErasedInstance, InjectablePool, ProviderDef, Resolver, TypeKey};
use crate::error::{BunstoneError, Result};
use crate::guard::Guard;
use crate::lifecycle::ApplicationContext;
use crate::module::{ModuleDescriptor, ModuleId};
use crate::queue::BoundProcessor;
use crate::ratelimit::RateLimitConfig;
use crate::render::Component;
use crate::schedule::{CronTask, ProviderTasks, TimeoutTask};
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use std::collections::HashSet;
use std::sync::Arc;

/// A route with everything resolved except application-wide settings.
#[derive(Clone)]
pub struct CompiledRoute {
    pub method: HttpMethod,
    pub path: String,
    pub handler_name: &'static str,
    pub controller: TypeKey,
    pub guard: Option<TypeKey>,
    pub rate_limit: Option<RateLimitConfig>,
    pub(crate) instance: ErasedInstance,
    pub(crate) handler: ErasedHandler,
    pub(crate) params: Arc<[ParamDescriptor]>,
    pub(crate) guard_instance: Option<Arc<dyn Guard>>,
    pub(crate) render: Option<Arc<dyn Component>>,
    pub(crate) headers: HeaderMap,
}

impl std::fmt::Debug for CompiledRoute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledRoute")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("handler", &self.handler_name)
            .field("controller", &self.controller.name)
            .finish()
    }
}

/// Output of compiling one module.
pub struct CompiledModule {
    pub id: ModuleId,
    pub name: String,
    pub global: bool,
    pub imports: Vec<Arc<CompiledModule>>,
    pub routes: Vec<CompiledRoute>,
    pub timeouts: Vec<ProviderTasks<TimeoutTask>>,
    pub crons: Vec<ProviderTasks<CronTask>>,
    pub pool: InjectablePool,
    pub(crate) jobs: Vec<BoundProcessor>,
    pub(crate) providers: Vec<(Arc<ProviderDef>, ErasedInstance)>,
}

impl CompiledModule {
    /// This module and everything it imports, each module once, imports first.
    pub fn walk(self: &Arc<Self>) -> Vec<Arc<CompiledModule>> {
        fn visit(
            module: &Arc<CompiledModule>,
            seen: &mut HashSet<ModuleId>,
            out: &mut Vec<Arc<CompiledModule>>,
        ) {
            if !seen.insert(module.id) {
                return;
            }
            for import in &module.imports {
                visit(import, seen, out);
            }
            out.push(module.clone());
        }

        let mut seen = HashSet::new();
        let mut out = Vec::new();
        visit(self, &mut seen, &mut out);
        out
    }
}

/// Compiles module descriptors against one [`ApplicationContext`].
///
/// Each module is compiled once per context; a module imported from several
/// places shares the same compiled pool.
pub struct ModuleCompiler<'a> {
    context: &'a ApplicationContext,
    stack: Vec<(ModuleId, String)>,
}

impl<'a> ModuleCompiler<'a> {
    pub fn new(context: &'a ApplicationContext) -> Self {
        Self {
            context,
            stack: Vec::new(),
        }
    }

    pub fn compile(&mut self, descriptor: &ModuleDescriptor) -> Result<Arc<CompiledModule>> {
        if let Some(compiled) = self.context.compiled(descriptor.id) {
            return Ok(compiled);
        }
        if let Some(start) = self.stack.iter().position(|(id, _)| *id == descriptor.id) {
            let mut chain: Vec<&str> = self.stack[start..].iter().map(|(_, name)| name.as_str()).collect();
            chain.push(&descriptor.name);
            return Err(BunstoneError::configuration(
                format!("Circular module import: {}", chain.join(" -> ")),
                "Move the shared providers into a separate module imported by both.",
            ));
        }

        self.stack.push((descriptor.id, descriptor.name.clone()));
        let compiled = self.compile_uncached(descriptor);
        self.stack.pop();

        let compiled = Arc::new(compiled.map_err(|err| wrap(err, &descriptor.name))?);
        self.context.store_compiled(compiled.clone());
        tracing::debug!(
            module = %compiled.name,
            routes = compiled.routes.len(),
            providers = compiled.providers.len(),
            "Module compiled"
        );
        Ok(compiled)
    }

    fn compile_uncached(&mut self, descriptor: &ModuleDescriptor) -> Result<CompiledModule> {
        let imports = self.compile_imports(descriptor)?;

        let pool = InjectablePool::new();
        for import in &imports {
            pool.merge_from(&import.pool);
        }
        for binding in &descriptor.bindings {
            pool.bind(binding.clone());
        }

        let global = self.context.global();
        let overrides = self.context.overrides();
        let resolver = Resolver::new(&pool, global, overrides).with_providers(
            descriptor
                .providers
                .iter()
                .cloned()
                .chain(descriptor.controllers.iter().map(|c| c.provider.clone())),
        );

        let mut providers = Vec::with_capacity(descriptor.providers.len());
        let mut timeouts = Vec::new();
        let mut crons = Vec::new();
        let mut jobs = Vec::new();
        for def in &descriptor.providers {
            let key = def.key();
            let instance = resolver.resolve_def(def)?;

            if !def.timeouts.is_empty() {
                for task in &def.timeouts {
                    task.validate(&key)?;
                }
                timeouts.push(ProviderTasks {
                    provider: key,
                    instance: instance.clone(),
                    tasks: def.timeouts.clone(),
                });
            }
            if !def.crons.is_empty() {
                for task in &def.crons {
                    task.schedule()?;
                }
                crons.push(ProviderTasks {
                    provider: key,
                    instance: instance.clone(),
                    tasks: def.crons.clone(),
                });
            }
            jobs.extend(def.processors.iter().map(|processor| BoundProcessor {
                provider: key,
                instance: instance.clone(),
                processor: processor.clone(),
            }));
            providers.push((def.clone(), instance));
        }

        let routes = self.compile_controllers(descriptor, &resolver)?;

        for export in &descriptor.exports {
            let visible = [&pool, global]
                .iter()
                .any(|p| p.contains_id(export.id) || p.binding(export.id).is_some());
            if !visible {
                return Err(BunstoneError::configuration(
                    format!(
                        "{} exports {} but neither provides nor imports it",
                        descriptor.name,
                        export.short_name()
                    ),
                    format!(
                        "Add {} to the providers of {} or import a module that exports it.",
                        export.short_name(),
                        descriptor.name
                    ),
                ));
            }
        }

        if descriptor.global {
            global.merge_from(&pool);
            tracing::debug!(module = %descriptor.name, "Promoted module providers to the global pool");
        }

        Ok(CompiledModule {
            id: descriptor.id,
            name: descriptor.name.clone(),
            global: descriptor.global,
            imports,
            routes,
            timeouts,
            crons,
            pool,
            jobs,
            providers,
        })
    }

    /// Global imports first, then the rest in declaration order.
    fn compile_imports(&mut self, descriptor: &ModuleDescriptor) -> Result<Vec<Arc<CompiledModule>>> {
        let (global, local): (Vec<_>, Vec<_>) = descriptor
            .imports
            .iter()
            .map(|import| import())
            .partition(ModuleDescriptor::is_global);

        global
            .iter()
            .chain(local.iter())
            .map(|import| self.compile(import))
            .collect()
    }

    fn compile_controllers(
        &self,
        descriptor: &ModuleDescriptor,
        resolver: &Resolver<'_>,
    ) -> Result<Vec<CompiledRoute>> {
        let mut routes = Vec::new();
        let mut seen = HashSet::new();

        for controller in &descriptor.controllers {
            let instance = resolver.resolve_def(&controller.provider)?;
            for def in &controller.routes {
                let route = &def.route;
                let method = HttpMethod::parse(&route.method).ok_or_else(|| {
                    BunstoneError::configuration(
                        format!(
                            "Unsupported HTTP method {} on {}.{}",
                            route.method,
                            controller.key().short_name(),
                            route.handler_name
                        ),
                        "Use one of GET, POST, PUT, DELETE, PATCH, OPTIONS or HEAD.",
                    )
                })?;
                let path = compose_path(&controller.prefix, &route.path);
                if !seen.insert((method, path.clone())) {
                    return Err(BunstoneError::configuration(
                        format!("Duplicate route {method} {path} in {}", descriptor.name),
                        "Give each handler a distinct method and path.",
                    ));
                }

                let guard = route.guard.as_ref().or(controller.guard.as_ref());
                let guard_instance = guard.map(|g| g.build(resolver)).transpose()?;
                let rate_limit = route
                    .rate_limit
                    .clone()
                    .or_else(|| controller.rate_limit.clone());

                routes.push(CompiledRoute {
                    method,
                    path,
                    handler_name: route.handler_name,
                    controller: controller.key(),
                    guard: guard.map(|g| g.key()),
                    rate_limit,
                    instance: instance.clone(),
                    handler: def.handler.clone(),
                    params: route.params.clone().into(),
                    guard_instance,
                    render: route.render.clone(),
                    headers: parse_headers(controller, route.handler_name, &route.headers)?,
                });
            }
        }
        Ok(routes)
    }
}

fn parse_headers(
    controller: &ControllerDef,
    handler: &str,
    headers: &[(String, String)],
) -> Result<HeaderMap> {
    let mut map = HeaderMap::new();
    for (name, value) in headers {
        let parsed = HeaderName::try_from(name.as_str())
            .ok()
            .zip(HeaderValue::try_from(value.as_str()).ok());
        let Some((name, value)) = parsed else {
            return Err(BunstoneError::configuration(
                format!(
                    "Invalid response header {name}: {value} on {}.{handler}",
                    controller.key().short_name()
                ),
                "Header names must be valid tokens and values visible ASCII.",
            ));
        };
        map.insert(name, value);
    }
    Ok(map)
}

fn wrap(err: BunstoneError, module: &str) -> BunstoneError {
    if err.is_typed() {
        return err;
    }
    BunstoneError::ModuleInitialization {
        module: module.to_string(),
        message: "a provider failed while the module was compiled".to_string(),
        context: Some(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::{Controller, Route};
    use crate::di::{Injectable, Provider};
    use crate::exception::RequestError;
    use crate::module::Module;

    #[derive(Debug)]
    struct Counter;

    impl Injectable for Counter {
        fn inject(_: &Resolver<'_>) -> Result<Self> {
            Ok(Self)
        }
    }

    struct Shared;

    impl Module for Shared {
        fn descriptor() -> ModuleDescriptor {
            ModuleDescriptor::of::<Self>()
                .provide::<Counter>()
                .export::<Counter>()
        }
    }

    struct CycleA;
    struct CycleB;

    impl Module for CycleA {
        fn descriptor() -> ModuleDescriptor {
            ModuleDescriptor::of::<Self>().import::<CycleB>()
        }
    }

    impl Module for CycleB {
        fn descriptor() -> ModuleDescriptor {
            ModuleDescriptor::of::<Self>().import::<CycleA>()
        }
    }

    fn ok_handler(route: Route) -> Controller<Counter> {
        Controller::<Counter>::new("counter").route(route, |_, _| async {
            Ok::<_, RequestError>("ok")
        })
    }

    #[test]
    fn test_shared_import_compiles_once() {
        let context = ApplicationContext::new();
        let root = ModuleDescriptor::anonymous("Root")
            .import::<Shared>()
            .import_descriptor(ModuleDescriptor::anonymous("Other").import::<Shared>());

        let compiled = ModuleCompiler::new(&context).compile(&root).unwrap();
        let a = compiled.pool.get::<Counter>().unwrap();
        let b = compiled.imports[1].pool.get::<Counter>().unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(compiled.walk().len(), 3);
    }

    #[test]
    fn test_import_cycle_is_configuration_error() {
        let context = ApplicationContext::new();
        let err = ModuleCompiler::new(&context)
            .compile(&CycleA::descriptor())
            .err()
            .unwrap();
        assert_eq!(err.code(), "BNS-CFG-001");
        assert!(err.to_string().contains("CycleA -> CycleB -> CycleA"));
    }

    #[test]
    fn test_unknown_export_is_rejected() {
        let context = ApplicationContext::new();
        let module = ModuleDescriptor::anonymous("Broken").export::<Counter>();
        let err = ModuleCompiler::new(&context).compile(&module).err().unwrap();
        assert!(matches!(err, BunstoneError::Configuration { .. }));
    }

    #[test]
    fn test_unsupported_method_and_duplicates() {
        let context = ApplicationContext::new();
        let module = ModuleDescriptor::anonymous("Methods")
            .controller(ok_handler(Route::method("PROPFIND", "find", "/")));
        let err = ModuleCompiler::new(&context).compile(&module).err().unwrap();
        assert!(err.to_string().contains("PROPFIND"));

        let module = ModuleDescriptor::anonymous("Dupes").controller(
            ok_handler(Route::get("a", "/x")).route(Route::get("b", "x/"), |_, _| async {
                Ok::<_, RequestError>("dup")
            }),
        );
        let err = ModuleCompiler::new(&context).compile(&module).err().unwrap();
        assert!(err.to_string().contains("Duplicate route GET /counter/x"));
    }

    #[test]
    fn test_untyped_provider_errors_are_wrapped() {
        let context = ApplicationContext::new();
        let module = ModuleDescriptor::anonymous("Faulty").provider(Provider::<Counter>::factory(
            |_| Err(anyhow::anyhow!("database offline").into()),
        ));
        let err = ModuleCompiler::new(&context).compile(&module).err().unwrap();
        assert_eq!(err.code(), "BNS-MOD-001");
        assert!(err.context().unwrap().contains("database offline"));
    }

    #[test]
    fn test_global_module_promotes_pool() {
        let context = ApplicationContext::new();
        let module = ModuleDescriptor::anonymous("Global")
            .provide::<Counter>()
            .global(true);
        ModuleCompiler::new(&context).compile(&module).unwrap();
        assert!(context.global().contains::<Counter>());
    }
}
