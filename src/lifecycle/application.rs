//! Application bootstrap
//!
//! Compiles the root module, wires CQRS roles, starts timers and queue
//! workers, kicks off view bundling, and assembles the axum router.

use super::{ApplicationContext, shutdown_signal};
use crate::config::{AppOptions, ConfigService};
use crate::cqrs::{CommandBus, CqrsWiring, EventBus, QueryBus};
use crate::di::Injectable;
use crate::dispatch::{FormDataParser, MultipartParser, ReplyWriter, RouteBinding};
use crate::error::{BunstoneError, Result};
use crate::controller::to_axum_path;
use crate::module::{CompiledModule, Module, ModuleCompiler, ModuleDescriptor};
use crate::queue::{BoundProcessor, QueueService};
use crate::ratelimit::RateLimiter;
use crate::render::{RenderEngine, StaticRenderer};
use crate::schedule::Scheduler;
use crate::ssr::{Bundler, EsbuildBundler, HydrationBuilder, ViewBundleRegistry};
use axum::{
    Router,
    body::Body,
    http::Request,
    routing::MethodRouter,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

/// A compiled, wired application ready to serve.
///
/// # Example
///
/// ```rust,ignore
/// use bunstone::Application;
///
/// #[tokio::main]
/// async fn main() -> bunstone::Result<()> {
///     let app = Application::create::<AppModule>().await?;
///     app.listen("0.0.0.0:3000".parse().unwrap()).await
/// }
/// ```
pub struct Application {
    router: Router,
    context: ApplicationContext,
    root: Arc<CompiledModule>,
    bundles: ViewBundleRegistry,
    scheduler: Mutex<Scheduler>,
    views: Mutex<Option<JoinHandle<()>>>,
}

impl Application {
    pub fn builder() -> ApplicationBuilder {
        ApplicationBuilder::new()
    }

    /// Build an application for `M` with options read from the environment.
    pub async fn create<M: Module>() -> Result<Self> {
        Self::builder().module::<M>().build().await
    }

    /// The assembled router, for serving or for in-memory requests.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn context(&self) -> &ApplicationContext {
        &self.context
    }

    pub fn root(&self) -> &Arc<CompiledModule> {
        &self.root
    }

    /// A resolved provider, looked up in the override, root and global pools.
    pub fn get<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.context
            .overrides()
            .get::<T>()
            .or_else(|| self.root.pool.get::<T>())
            .or_else(|| self.context.global().get::<T>())
    }

    pub fn view_bundles(&self) -> &ViewBundleRegistry {
        &self.bundles
    }

    /// Wait until the background view bundling has finished.
    pub async fn views_ready(&self) {
        let handle = self.views.lock().await.take();
        if let Some(handle) = handle {
            if let Err(err) = handle.await {
                tracing::error!(error = %err, "View bundling task panicked");
            }
        }
    }

    /// Serve on `addr` until Ctrl+C or SIGTERM, then stop timers and workers.
    pub async fn listen(self, addr: SocketAddr) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        tracing::info!("App is running at http://{}", listener.local_addr()?);

        axum::serve(
            listener,
            self.router
                .clone()
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await?;
        self.shutdown().await;
        Ok(())
    }

    /// Abort scheduled tasks, queue workers and pending bundling.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down application...");
        self.scheduler.lock().await.shutdown();
        if let Some(handle) = self.views.lock().await.take() {
            handle.abort();
        }
        tracing::info!("Application shutdown complete");
    }
}

impl std::fmt::Debug for Application {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Application")
            .field("module", &self.root.name)
            .field("context", &self.context)
            .finish()
    }
}

/// Builder for [`Application`]
pub struct ApplicationBuilder {
    root: Option<ModuleDescriptor>,
    options: Option<AppOptions>,
    context: Option<ApplicationContext>,
    renderer: Arc<dyn RenderEngine>,
    bundler: Option<Arc<dyn Bundler>>,
    form_parser: Arc<dyn FormDataParser>,
    cors: Option<CorsLayer>,
}

impl Default for ApplicationBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ApplicationBuilder {
    pub fn new() -> Self {
        Self {
            root: None,
            options: None,
            context: None,
            renderer: Arc::new(StaticRenderer),
            bundler: None,
            form_parser: Arc::new(MultipartParser),
            cors: None,
        }
    }

    pub fn module<M: Module>(self) -> Self {
        self.descriptor(M::descriptor())
    }

    pub fn descriptor(mut self, descriptor: ModuleDescriptor) -> Self {
        self.root = Some(descriptor);
        self
    }

    /// Defaults to [`AppOptions::from_config`] over the environment.
    pub fn options(mut self, options: AppOptions) -> Self {
        self.options = Some(options);
        self
    }

    /// Reuse a context across builds; compiled modules and sagas are shared.
    pub fn context(mut self, context: ApplicationContext) -> Self {
        self.context = Some(context);
        self
    }

    pub fn renderer(mut self, renderer: Arc<dyn RenderEngine>) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn bundler(mut self, bundler: Arc<dyn Bundler>) -> Self {
        self.bundler = Some(bundler);
        self
    }

    pub fn form_data_parser(mut self, parser: Arc<dyn FormDataParser>) -> Self {
        self.form_parser = parser;
        self
    }

    pub fn cors(mut self, cors: CorsLayer) -> Self {
        self.cors = Some(cors);
        self
    }

    /// Compile and wire the application. Startup failures are reported
    /// through the log before they are returned.
    pub async fn build(self) -> Result<Application> {
        self.try_build().await.inspect_err(BunstoneError::report)
    }

    async fn try_build(self) -> Result<Application> {
        let root = self.root.ok_or_else(|| {
            BunstoneError::configuration(
                "no root module was given",
                "Call ApplicationBuilder::module::<AppModule>() before build().",
            )
        })?;
        let options = match self.options {
            Some(options) => options,
            None => AppOptions::from_config(&ConfigService::new())?,
        };
        let context = self.context.unwrap_or_default();

        tracing::info!(module = %root.name, "Starting application initialization...");
        let compiled = ModuleCompiler::new(&context).compile(&root)?;
        let modules = compiled.walk();

        wire_cqrs(&context, &compiled, &modules)?;

        let mut scheduler = Scheduler::new();
        for module in &modules {
            for group in &module.timeouts {
                scheduler.schedule_timeouts(group);
            }
            for group in &module.crons {
                scheduler.schedule_crons(group)?;
            }
        }
        start_workers(&context, &compiled, &modules, &mut scheduler);

        let bundles = ViewBundleRegistry::new();
        let views = options.views_dir.clone().map(|views_dir| {
            let bundler = self
                .bundler
                .clone()
                .unwrap_or_else(|| Arc::new(EsbuildBundler::new(options.bundler.clone())));
            let builder = HydrationBuilder::new(
                views_dir,
                options.public_dir.clone(),
                options.scratch_dir.clone(),
                bundler,
                bundles.clone(),
            );
            tokio::spawn(async move {
                match builder.build().await {
                    Ok(count) => tracing::info!(count, "View bundling finished"),
                    Err(err) => tracing::error!(error = %err, "Failed to auto-bundle views"),
                }
            })
        });

        let limiter = RateLimiter::new();
        let mut routes: BTreeMap<String, MethodRouter> = BTreeMap::new();
        let mut seen = HashSet::new();
        for module in &modules {
            for route in &module.routes {
                let axum_path = to_axum_path(&route.path);
                if !seen.insert((route.method, axum_path.clone())) {
                    return Err(BunstoneError::configuration(
                        format!("Route {} {} is declared more than once", route.method, route.path),
                        "Give each handler a distinct method and path across modules.",
                    ));
                }

                let binding = RouteBinding {
                    handler_name: route.handler_name,
                    controller: route.instance.clone(),
                    handler: route.handler.clone(),
                    params: route.params.clone(),
                    guard: route.guard_instance.clone(),
                    rate_limit: route.rate_limit.clone(),
                    limiter: limiter.clone(),
                    form_parser: self.form_parser.clone(),
                    writer: ReplyWriter {
                        render: route.render.clone(),
                        headers: route.headers.clone(),
                        renderer: self.renderer.clone(),
                        bundles: bundles.clone(),
                    },
                    body_limit: options.body_limit,
                };
                tracing::info!(
                    method = %route.method,
                    path = %route.path,
                    handler = %format!("{}.{}", route.controller.short_name(), route.handler_name),
                    "Mapped route"
                );

                let entry = routes.remove(&axum_path).unwrap_or_default();
                let entry = entry.on(route.method.filter(), move |request: Request<Body>| {
                    let binding = binding.clone();
                    async move { binding.dispatch(request).await }
                });
                routes.insert(axum_path, entry);
            }
        }

        let mut router = Router::new();
        for (path, method_router) in routes {
            router = router.route(&path, method_router);
        }
        router = router
            .nest_service("/public", ServeDir::new(&options.public_dir))
            .layer(TraceLayer::new_for_http());
        if let Some(cors) = self.cors {
            router = router.layer(cors);
        }

        tracing::info!("Application initialization complete");
        Ok(Application {
            router,
            context,
            root: compiled,
            bundles,
            scheduler: Mutex::new(scheduler),
            views: Mutex::new(views),
        })
    }
}

fn lookup<T: Injectable>(context: &ApplicationContext, root: &CompiledModule) -> Option<Arc<T>> {
    context
        .overrides()
        .get::<T>()
        .or_else(|| root.pool.get::<T>())
        .or_else(|| context.global().get::<T>())
}

fn wire_cqrs(
    context: &ApplicationContext,
    root: &CompiledModule,
    modules: &[Arc<CompiledModule>],
) -> Result<()> {
    let wiring = CqrsWiring {
        commands: lookup::<CommandBus>(context, root),
        queries: lookup::<QueryBus>(context, root),
        events: lookup::<EventBus>(context, root),
        sagas: context.sagas(),
    };
    for module in modules {
        for (def, instance) in &module.providers {
            for hook in &def.cqrs {
                hook(instance, &wiring)?;
            }
        }
    }
    Ok(())
}

fn start_workers(
    context: &ApplicationContext,
    root: &CompiledModule,
    modules: &[Arc<CompiledModule>],
    scheduler: &mut Scheduler,
) {
    let mut queues: HashMap<String, Vec<BoundProcessor>> = HashMap::new();
    for module in modules {
        for bound in &module.jobs {
            queues
                .entry(bound.processor.queue.clone())
                .or_default()
                .push(bound.clone());
        }
    }
    if queues.is_empty() {
        return;
    }

    let Some(service) = lookup::<QueueService>(context, root) else {
        tracing::warn!("Job processors declared but no QueueService is available; import QueueModule to enable them");
        return;
    };
    for (queue, processors) in queues {
        if let Some(handle) = service.start_worker(&queue, processors) {
            scheduler.track(handle);
        }
    }
}
