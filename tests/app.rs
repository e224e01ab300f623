use async_trait::async_trait;
use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::{Request, StatusCode, header};
use bunstone::dispatch::{FormData, FormDataParser, MultipartParser};
use bunstone::prelude::*;
use bunstone::testing::{Test, TestApp, TestingModule};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use validator::Validate;

#[derive(Injectable, Default)]
struct ItemService {
    created: AtomicUsize,
}

impl ItemService {
    fn find(&self, id: &str) -> Value {
        json!({ "id": id, "name": format!("item-{id}") })
    }
}

#[derive(Injectable)]
struct ItemController {
    items: Arc<ItemService>,
}

#[derive(Injectable)]
struct StatsController {
    items: Arc<ItemService>,
}

#[derive(Injectable)]
struct AdminGuard;

#[async_trait]
impl Guard for AdminGuard {
    async fn validate(&self, request: &RequestContext) -> bool {
        request.header("x-role") == Some("admin")
    }
}

#[derive(Injectable)]
struct OpenGuard;

#[async_trait]
impl Guard for OpenGuard {
    async fn validate(&self, _: &RequestContext) -> bool {
        true
    }
}

#[derive(Debug, Serialize, Deserialize, Validate)]
struct CreateItem {
    #[validate(length(min = 3, message = "name is too short"))]
    name: String,
    #[serde(default)]
    tags: Vec<String>,
}

fn catalog() -> ModuleDescriptor {
    let items = Controller::<ItemController>::new("/items")
        .guard::<AdminGuard>()
        .rate_limit(RateLimitConfig::new().max(100))
        .route(
            Route::get("find_one", ":id").param(ParamDescriptor::path_param().key("id")),
            |ctrl, args| async move { Ok::<_, RequestError>(ctrl.items.find(args.text(0).unwrap_or_default())) },
        )
        .route(
            Route::post("create", "/").param(ParamDescriptor::body().validate::<CreateItem>()),
            |ctrl, args| async move {
                let item: CreateItem = args.json(0)?;
                ctrl.items.created.fetch_add(1, Ordering::SeqCst);
                Ok::<_, RequestError>(json!({ "name": item.name, "tags": item.tags }))
            },
        )
        .route(
            Route::get("public_list", "public").guard::<OpenGuard>(),
            |_, _| async { Ok::<_, RequestError>(json!([])) },
        )
        .route(
            Route::get("limited", "limited")
                .guard::<OpenGuard>()
                .rate_limit(RateLimitConfig::new().max(2)),
            |_, _| async { Ok::<_, RequestError>("ok") },
        )
        .route(
            Route::get("missing", "missing/:id").guard::<OpenGuard>(),
            |_, _| async { Err::<Value, _>(HttpException::not_found(None).into()) },
        );

    let stats = Controller::<StatsController>::new("/").route(
        Route::get("profile", "profile")
            .render(FnComponent::new("Profile", |model: &Value| {
                Element::new("h1").text(model["name"].as_str().unwrap_or_default())
            }))
            .header("x-powered-by", "bunstone"),
        |_, _| async { Ok::<_, RequestError>(json!({ "name": "Ada" })) },
    );

    ModuleDescriptor::anonymous("Catalog")
        .provide::<ItemService>()
        .controller(items)
        .controller(stats)
}

async fn compile() -> (TestingModule, TestApp) {
    let module = Test::create_testing_module(catalog()).compile().await.unwrap();
    let app = module.create_test_app().await.unwrap();
    (module, app)
}

fn admin(request: axum::http::request::Builder) -> axum::http::request::Builder {
    request.header("x-role", "admin")
}

#[tokio::test]
async fn test_controllers_share_singleton_provider() {
    let (module, _) = compile().await;
    let items = module.get::<ItemController>().unwrap();
    let stats = module.get::<StatsController>().unwrap();
    let service = module.get::<ItemService>().unwrap();

    assert!(Arc::ptr_eq(&items.items, &stats.items));
    assert!(Arc::ptr_eq(&items.items, &service));
}

#[tokio::test]
async fn test_controller_guard_rejects_before_handler() {
    let (_, app) = compile().await;

    let response = app.get("/items/7").await.unwrap();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body: Value = response.json().unwrap();
    assert_eq!(body["message"], "Unauthorized");

    let request = admin(Request::get("/items/7")).body(Body::empty()).unwrap();
    let response = app.request(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.json::<Value>().unwrap(), json!({"id": "7", "name": "item-7"}));
}

#[tokio::test]
async fn test_route_guard_overrides_controller_guard() {
    let (_, app) = compile().await;
    let response = app.get("/items/public").await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_validation_round_trip() {
    let (module, app) = compile().await;

    let request = admin(Request::post("/items"))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(json!({"name": "ab"}).to_string()))
        .unwrap();
    let response = app.request(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        response.json::<Value>().unwrap(),
        json!({"status": 400, "errors": [{"field": "name", "message": "name is too short"}]})
    );
    assert_eq!(module.get::<ItemService>().unwrap().created.load(Ordering::SeqCst), 0);

    let request = admin(Request::post("/items"))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(json!({"name": "lamp"}).to_string()))
        .unwrap();
    let response = app.request(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.json::<Value>().unwrap(), json!({"name": "lamp", "tags": []}));
}

#[tokio::test]
async fn test_route_rate_limit_overrides_controller() {
    let (_, app) = compile().await;

    for remaining in ["1", "0"] {
        let response = app.get("/items/limited").await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.header("x-ratelimit-limit"), Some("2"));
        assert_eq!(response.header("x-ratelimit-remaining"), Some(remaining));
    }

    let response = app.get("/items/limited").await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert!(response.header("retry-after").is_some());
    let body: Value = response.json().unwrap();
    assert_eq!(body["statusCode"], 429);
}

#[tokio::test]
async fn test_rate_limit_buckets_per_peer_address() {
    let (_, app) = compile().await;
    let from = |peer: &str| {
        let mut request = Request::get("/items/limited").body(Body::empty()).unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo(peer.parse::<SocketAddr>().unwrap()));
        request
    };

    for _ in 0..2 {
        let response = app.request(from("10.1.0.1:40000")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
    let response = app.request(from("10.1.0.1:40001")).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);

    let response = app.request(from("10.1.0.2:40000")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.header("x-ratelimit-remaining"), Some("1"));
}

#[tokio::test]
async fn test_http_exception_status_and_body() {
    let (_, app) = compile().await;
    let response = app.get("/items/missing/1").await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(
        response.json::<Value>().unwrap(),
        json!({"statusCode": 404, "message": "Not Found"})
    );
}

#[tokio::test]
async fn test_render_without_bundle_falls_back_to_plain_html() {
    let (_, app) = compile().await;
    let response = app.get("/profile").await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.header("content-type"), Some("text/html; charset=utf-8"));
    assert_eq!(response.header("x-powered-by"), Some("bunstone"));
    let html = response.text();
    assert!(html.contains("<h1>Ada</h1>"));
    assert!(html.contains(r#"<script id="__BUNSTONE_DATA__" type="application/json">{"name":"Ada"}</script>"#));
    assert!(!html.contains(r#"<script type="module""#));
}

#[tokio::test]
async fn test_unknown_route_is_404() {
    let (_, app) = compile().await;
    let response = app.get("/nowhere").await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[derive(Injectable)]
struct UploadController;

#[derive(Default)]
struct CountingParser {
    calls: AtomicUsize,
}

#[async_trait]
impl FormDataParser for CountingParser {
    async fn parse(&self, request: &RequestContext) -> std::result::Result<FormData, RequestError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        MultipartParser.parse(request).await
    }
}

#[tokio::test]
async fn test_form_data_is_parsed_once_per_request() {
    let uploads = Controller::<UploadController>::new("uploads").route(
        Route::post("upload", "/")
            .param(ParamDescriptor::form_data(
                FormDataOptions::new().file_field("avatar").allowed_types(["image/png"]),
            ))
            .param(ParamDescriptor::form_data(FormDataOptions::new().json_field("meta"))),
        |_, args| async move {
            let files = args.form_data(0).map_or(0, |payload| payload.files.len());
            let meta = args.form_data(1).and_then(|payload| payload.json.clone());
            Ok::<_, RequestError>(json!({ "files": files, "meta": meta }))
        },
    );
    let parser = Arc::new(CountingParser::default());
    let app = Application::builder()
        .descriptor(ModuleDescriptor::anonymous("Uploads").controller(uploads))
        .options(AppOptions::default())
        .form_data_parser(parser.clone())
        .build()
        .await
        .unwrap();
    let app = TestApp::new(app);

    let boundary = "XBOUNDARY";
    let body = format!(
        "--{boundary}\r\nContent-Disposition: form-data; name=\"avatar\"; filename=\"me.png\"\r\nContent-Type: image/png\r\n\r\nPNGDATA\r\n\
         --{boundary}\r\nContent-Disposition: form-data; name=\"meta\"\r\n\r\n{{\"alt\":\"me\"}}\r\n\
         --{boundary}--\r\n"
    );
    let request = Request::post("/uploads")
        .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={boundary}"))
        .body(Body::from(body))
        .unwrap();
    let response = app.request(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.json::<Value>().unwrap(), json!({"files": 1, "meta": {"alt": "me"}}));
    assert_eq!(parser.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_override_wins_over_module_provider() {
    let module = Test::create_testing_module(catalog())
        .override_provider::<ItemService>()
        .use_value(ItemService {
            created: AtomicUsize::new(41),
        })
        .compile()
        .await
        .unwrap();

    let controller = module.get::<ItemController>().unwrap();
    assert_eq!(controller.items.created.load(Ordering::SeqCst), 41);
}

#[tokio::test]
async fn test_unsupported_method_fails_create() {
    let module = ModuleDescriptor::anonymous("Odd").controller(
        Controller::<UploadController>::new("odd").route(Route::method("TRACE", "trace", "/"), |_, _| async {
            Ok::<_, RequestError>(())
        }),
    );
    let err = Application::builder()
        .descriptor(module)
        .options(AppOptions::default())
        .build()
        .await
        .unwrap_err();
    assert_eq!(err.code(), "BNS-CFG-001");
}

#[derive(Injectable)]
struct Chicken {
    _egg: Arc<Egg>,
}

#[derive(Injectable)]
struct Egg {
    _chicken: Arc<Chicken>,
}

#[tokio::test]
async fn test_circular_dependency_is_reported() {
    let err = Application::builder()
        .descriptor(ModuleDescriptor::anonymous("Farm").provide::<Chicken>().provide::<Egg>())
        .options(AppOptions::default())
        .build()
        .await
        .unwrap_err();
    assert_eq!(err.code(), "BNS-DI-002");
    assert!(err.to_string().contains("Chicken -> Egg -> Chicken"));
}
