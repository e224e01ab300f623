use crate::exception::HttpException;
use crate::render::{self, Component, Element, RenderEngine};
use crate::ssr::ViewBundleRegistry;
use axum::{
    Json,
    body::Body,
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde_json::Value;
use std::sync::Arc;

const HTML_CONTENT_TYPE: &str = "text/html; charset=utf-8";
const TEXT_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

/// What a route handler hands back to the dispatcher.
#[derive(Debug)]
pub enum Reply {
    /// Plain data; becomes JSON, text, or the model of a render component.
    Value(Value),
    /// An element tree streamed as HTML without the hydration layout.
    Element(Element),
    /// A finished response passed through untouched.
    Response(Response),
}

impl From<Value> for Reply {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

impl From<String> for Reply {
    fn from(value: String) -> Self {
        Self::Value(Value::String(value))
    }
}

impl From<&str> for Reply {
    fn from(value: &str) -> Self {
        Self::Value(Value::String(value.to_string()))
    }
}

impl From<()> for Reply {
    fn from(_: ()) -> Self {
        Self::Value(Value::Null)
    }
}

impl From<Element> for Reply {
    fn from(element: Element) -> Self {
        Self::Element(element)
    }
}

impl From<Response> for Reply {
    fn from(response: Response) -> Self {
        Self::Response(response)
    }
}

impl From<HttpException> for Reply {
    fn from(exception: HttpException) -> Self {
        Self::Response(exception.into_response())
    }
}

/// Per-route response settings resolved when the route is bound.
#[derive(Clone)]
pub(crate) struct ReplyWriter {
    pub render: Option<Arc<dyn Component>>,
    pub headers: HeaderMap,
    pub renderer: Arc<dyn RenderEngine>,
    pub bundles: ViewBundleRegistry,
}

impl ReplyWriter {
    pub fn write(&self, reply: Reply) -> Response {
        let mut response = match reply {
            Reply::Response(response) => response,
            Reply::Value(model) if self.render.is_some() => self.render_view(model),
            Reply::Element(element) => self.stream_html(element),
            Reply::Value(value) if !self.headers.is_empty() => match value {
                Value::String(text) => text.into_response(),
                other => Json(other).into_response(),
            },
            Reply::Value(Value::String(text)) => {
                ([(header::CONTENT_TYPE, TEXT_CONTENT_TYPE)], text).into_response()
            }
            Reply::Value(value) => Json(value).into_response(),
        };

        for (name, value) in &self.headers {
            response.headers_mut().insert(name.clone(), value.clone());
        }
        response
    }

    fn render_view(&self, model: Value) -> Response {
        let Some(component) = &self.render else {
            return Json(model).into_response();
        };

        let name = component.name();
        let bundle = model
            .get("bundle")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| self.bundles.lookup(name));
        if bundle.is_none() {
            tracing::warn!(
                component = name,
                "No client bundle found; the page will render without hydration"
            );
        }

        let title = model
            .get("title")
            .and_then(Value::as_str)
            .unwrap_or(render::DEFAULT_TITLE)
            .to_string();
        let content = component.render(&model);
        self.stream_html(render::layout(&title, content, &model, bundle.as_deref()))
    }

    fn stream_html(&self, root: Element) -> Response {
        let mut response = Response::new(Body::from_stream(self.renderer.render_to_stream(root)));
        *response.status_mut() = StatusCode::OK;
        response
            .headers_mut()
            .insert(header::CONTENT_TYPE, HeaderValue::from_static(HTML_CONTENT_TYPE));
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::{FnComponent, StaticRenderer};
    use serde_json::json;

    fn writer(render: Option<Arc<dyn Component>>, headers: HeaderMap) -> ReplyWriter {
        ReplyWriter {
            render,
            headers,
            renderer: Arc::new(StaticRenderer),
            bundles: ViewBundleRegistry::new(),
        }
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn profile() -> Arc<dyn Component> {
        FnComponent::new("Profile", |model: &Value| {
            Element::new("h1").text(model["name"].as_str().unwrap_or_default())
        })
    }

    #[tokio::test]
    async fn test_plain_values() {
        let response = writer(None, HeaderMap::new()).write(json!({"ok": true}).into());
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/json");
        assert_eq!(body_text(response).await, r#"{"ok":true}"#);

        let response = writer(None, HeaderMap::new()).write("hello".into());
        assert_eq!(response.headers()[header::CONTENT_TYPE], TEXT_CONTENT_TYPE);
    }

    #[tokio::test]
    async fn test_render_with_registered_bundle() {
        let w = writer(Some(profile()), HeaderMap::new());
        w.bundles.register("Profile", "profile.bundle.js");
        let response = w.write(json!({"name": "Ada", "title": "Me"}).into());

        assert_eq!(response.headers()[header::CONTENT_TYPE], HTML_CONTENT_TYPE);
        let html = body_text(response).await;
        assert!(html.starts_with("<!DOCTYPE html>"));
        assert!(html.contains("<title>Me</title>"));
        assert!(html.contains("<h1>Ada</h1>"));
        assert!(html.contains(r#"src="/public/profile.bundle.js""#));
    }

    #[tokio::test]
    async fn test_render_without_bundle_still_serves_html() {
        let response = writer(Some(profile()), HeaderMap::new()).write(json!({"name": "Ada"}).into());
        assert_eq!(response.status(), StatusCode::OK);
        let html = body_text(response).await;
        assert!(html.contains("<title>Bunstone App</title>"));
        assert!(!html.contains(r#"<script type="module""#));
    }

    #[tokio::test]
    async fn test_custom_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("x-powered-by", HeaderValue::from_static("bunstone"));
        let response = writer(None, headers).write(json!([1, 2]).into());
        assert_eq!(response.headers()["x-powered-by"], "bunstone");
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/json");
    }

    #[tokio::test]
    async fn test_direct_element_has_no_payload() {
        let response = writer(None, HeaderMap::new()).write(Element::new("p").text("hi").into());
        let html = body_text(response).await;
        assert_eq!(html, "<p>hi</p>");
    }
}
