//! Server-side rendering of element trees.

mod element;

pub use element::{Element, Node, escape};

use axum::body::Bytes;
use futures::stream::{self, BoxStream};
use serde_json::Value;
use std::sync::Arc;

pub type HtmlStream = BoxStream<'static, Result<Bytes, std::io::Error>>;

pub const DATA_ELEMENT_ID: &str = "__BUNSTONE_DATA__";
pub const ROOT_ELEMENT_ID: &str = "root";
pub const DEFAULT_TITLE: &str = "Bunstone App";

const CHUNK_SIZE: usize = 8 * 1024;

/// React runtime packages kept out of view bundles; the layout maps them through an import map.
pub const RUNTIME_IMPORTS: &[(&str, &str)] = &[
    ("react", "https://esm.sh/react@19"),
    ("react-dom", "https://esm.sh/react-dom@19"),
    ("react-dom/client", "https://esm.sh/react-dom@19/client"),
    ("react/jsx-runtime", "https://esm.sh/react@19/jsx-runtime"),
    ("react/jsx-dev-runtime", "https://esm.sh/react@19/jsx-dev-runtime"),
];

/// A named view that turns a render model into an element tree.
pub trait Component: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn render(&self, model: &Value) -> Element;
}

/// A [`Component`] backed by a closure.
pub struct FnComponent<F> {
    name: String,
    render: F,
}

impl<F> FnComponent<F>
where
    F: Fn(&Value) -> Element + Send + Sync + 'static,
{
    pub fn new(name: impl Into<String>, render: F) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            render,
        })
    }
}

impl<F> Component for FnComponent<F>
where
    F: Fn(&Value) -> Element + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn render(&self, model: &Value) -> Element {
        (self.render)(model)
    }
}

pub trait RenderEngine: Send + Sync + 'static {
    fn render_to_stream(&self, root: Element) -> HtmlStream;
}

/// Serializes the tree up front and streams it in fixed-size chunks.
#[derive(Debug, Default, Clone, Copy)]
pub struct StaticRenderer;

impl RenderEngine for StaticRenderer {
    fn render_to_stream(&self, root: Element) -> HtmlStream {
        let mut html = String::new();
        if root.tag() == Some("html") {
            html.push_str("<!DOCTYPE html>");
        }
        html.push_str(&root.to_html());

        let bytes = Bytes::from(html);
        let chunks: Vec<Result<Bytes, std::io::Error>> = (0..bytes.len())
            .step_by(CHUNK_SIZE)
            .map(|start| Ok(bytes.slice(start..(start + CHUNK_SIZE).min(bytes.len()))))
            .collect();
        Box::pin(stream::iter(chunks))
    }
}

/// Wrap rendered content in the hydration page shell.
///
/// The model is embedded as JSON for the client entry; the bundle script is
/// only emitted when a bundle is known.
pub fn layout(title: &str, content: Element, model: &Value, bundle: Option<&str>) -> Element {
    let imports: serde_json::Map<String, Value> = RUNTIME_IMPORTS
        .iter()
        .map(|(name, url)| (name.to_string(), Value::String(url.to_string())))
        .collect();
    let import_map = serde_json::json!({ "imports": imports });

    let mut body = Element::new("body")
        .child(Element::new("main").attr("id", ROOT_ELEMENT_ID).child(content))
        .child(
            Element::new("script")
                .attr("id", DATA_ELEMENT_ID)
                .attr("type", "application/json")
                .raw(script_safe_json(model)),
        );
    if let Some(bundle) = bundle {
        body = body.child(
            Element::new("script")
                .attr("type", "module")
                .attr("src", format!("/public/{bundle}")),
        );
    }

    Element::new("html")
        .attr("lang", "en")
        .child(
            Element::new("head")
                .child(Element::new("meta").attr("charset", "utf-8"))
                .child(
                    Element::new("meta")
                        .attr("name", "viewport")
                        .attr("content", "width=device-width, initial-scale=1"),
                )
                .child(Element::new("title").text(title))
                .child(
                    Element::new("script")
                        .attr("type", "importmap")
                        .raw(script_safe_json(&import_map)),
                ),
        )
        .child(body)
}

/// JSON that cannot close the surrounding script tag.
fn script_safe_json(value: &Value) -> String {
    value.to_string().replace('<', "\\u003c")
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use serde_json::json;

    #[tokio::test]
    async fn test_stream_adds_doctype_for_documents() {
        let page = layout("Home", Element::new("h1").text("Hi"), &json!({}), None);
        let chunks: Vec<_> = StaticRenderer.render_to_stream(page).collect().await;
        let html: String = chunks
            .into_iter()
            .map(|chunk| String::from_utf8(chunk.unwrap().to_vec()).unwrap())
            .collect();
        assert!(html.starts_with("<!DOCTYPE html><html"));
        assert!(html.contains("<title>Home</title>"));
        assert!(!html.contains(r#"type="module""#));
    }

    #[test]
    fn test_payload_cannot_break_out_of_script() {
        let page = layout(
            "x",
            Element::fragment(),
            &json!({"bio": "</script><script>alert(1)"}),
            Some("profile.bundle.js"),
        );
        let html = page.to_html();
        assert!(html.contains("\\u003c/script>"));
        assert!(html.contains(r#"<script type="module" src="/public/profile.bundle.js"></script>"#));
    }

    #[tokio::test]
    async fn test_large_documents_are_chunked() {
        let text = "x".repeat(CHUNK_SIZE * 2 + 10);
        let chunks: Vec<_> = StaticRenderer
            .render_to_stream(Element::new("p").text(text))
            .collect()
            .await;
        assert_eq!(chunks.len(), 3);
    }
}
