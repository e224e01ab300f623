use crate::dispatch::form::{FormData, FormDataParser};
use crate::exception::RequestError;
use axum::{
    body::{Body, Bytes},
    extract::{ConnectInfo, FromRequestParts, Query, RawPathParams},
    http::{HeaderMap, Method, Request, Uri, header},
};
use serde_json::Value;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::OnceCell;

/// Everything a route needs to know about the incoming request.
///
/// The body is read once up front. JSON bodies are parsed eagerly, text
/// bodies become a string value, and form data is parsed lazily on first
/// use and cached for the rest of the request.
#[derive(Debug)]
pub struct RequestContext {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    path_params: HashMap<String, String>,
    query: HashMap<String, String>,
    body: Bytes,
    json: Option<Value>,
    form: OnceCell<Arc<FormData>>,
    peer: Option<SocketAddr>,
}

impl RequestContext {
    pub fn builder(method: Method, uri: &str) -> RequestContextBuilder {
        RequestContextBuilder {
            method,
            uri: uri.to_string(),
            headers: HeaderMap::new(),
            path_params: HashMap::new(),
            body: Bytes::new(),
            peer: None,
        }
    }

    pub(crate) async fn from_request(
        request: Request<Body>,
        body_limit: usize,
    ) -> Result<Self, RequestError> {
        let (mut parts, body) = request.into_parts();
        let path_params = match RawPathParams::from_request_parts(&mut parts, &()).await {
            Ok(raw) => raw
                .iter()
                .map(|(key, value)| (key.to_string(), value.to_string()))
                .collect(),
            Err(_) => HashMap::new(),
        };
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        let body = axum::body::to_bytes(body, body_limit)
            .await
            .map_err(|err| RequestError::bad_request(format!("Failed to read request body: {err}")))?;

        let mut ctx = Self::assemble(parts.method, parts.uri, parts.headers, path_params, body)?;
        ctx.peer = peer;
        Ok(ctx)
    }

    fn assemble(
        method: Method,
        uri: Uri,
        headers: HeaderMap,
        path_params: HashMap<String, String>,
        body: Bytes,
    ) -> Result<Self, RequestError> {
        let query = Query::<HashMap<String, String>>::try_from_uri(&uri)
            .map(|Query(query)| query)
            .unwrap_or_default();
        let json = parse_body(&headers, &body)?;

        Ok(Self {
            method,
            uri,
            headers,
            path_params,
            query,
            body,
            json,
            form: OnceCell::new(),
            peer: None,
        })
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn path(&self) -> &str {
        self.uri.path()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// The connected socket address, when served with connect info.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header(header::CONTENT_TYPE.as_str())
    }

    pub fn path_params(&self) -> &HashMap<String, String> {
        &self.path_params
    }

    pub fn path_param(&self, name: &str) -> Option<&str> {
        self.path_params.get(name).map(String::as_str)
    }

    pub fn query(&self) -> &HashMap<String, String> {
        &self.query
    }

    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }

    pub fn raw_body(&self) -> &Bytes {
        &self.body
    }

    /// The parsed body, when there is one.
    pub fn body(&self) -> Option<&Value> {
        self.json.as_ref()
    }

    /// Parse the body as form data, at most once per request.
    pub async fn form_data(&self, parser: &dyn FormDataParser) -> Result<Arc<FormData>, RequestError> {
        self.form
            .get_or_try_init(|| async { parser.parse(self).await.map(Arc::new) })
            .await
            .cloned()
    }
}

fn parse_body(headers: &HeaderMap, body: &Bytes) -> Result<Option<Value>, RequestError> {
    if body.is_empty() {
        return Ok(None);
    }
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_ascii_lowercase();

    if content_type.starts_with("application/json") || content_type.contains("+json") {
        return serde_json::from_slice(body)
            .map(Some)
            .map_err(|err| RequestError::bad_request(format!("Invalid JSON body: {err}")));
    }
    if content_type.starts_with("text/") {
        return Ok(Some(Value::String(String::from_utf8_lossy(body).into_owned())));
    }
    Ok(None)
}

/// Builds a [`RequestContext`] outside of a live server, mostly for tests.
pub struct RequestContextBuilder {
    method: Method,
    uri: String,
    headers: HeaderMap,
    path_params: HashMap<String, String>,
    body: Bytes,
    peer: Option<SocketAddr>,
}

impl RequestContextBuilder {
    pub fn peer_addr(mut self, addr: SocketAddr) -> Self {
        self.peer = Some(addr);
        self
    }

    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.headers.extend(headers);
        self
    }

    pub fn path_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.path_params.insert(key.into(), value.into());
        self
    }

    pub fn json(mut self, body: &Value) -> Self {
        self.headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );
        self.body = Bytes::from(body.to_string());
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn build(self) -> Result<RequestContext, RequestError> {
        let uri: Uri = self
            .uri
            .parse()
            .map_err(|err| RequestError::bad_request(format!("Invalid URI: {err}")))?;
        let mut ctx = RequestContext::assemble(self.method, uri, self.headers, self.path_params, self.body)?;
        ctx.peer = self.peer;
        Ok(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_query_and_json_are_parsed() {
        let ctx = RequestContext::builder(Method::POST, "/users?page=2&sort=name")
            .json(&json!({"name": "Bunstone"}))
            .build()
            .unwrap();
        assert_eq!(ctx.query_param("page"), Some("2"));
        assert_eq!(ctx.body().unwrap()["name"], "Bunstone");
        assert_eq!(ctx.path(), "/users");
    }

    #[test]
    fn test_malformed_json_is_bad_request() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, header::HeaderValue::from_static("application/json"));
        let err = RequestContext::builder(Method::POST, "/")
            .headers(headers)
            .body("{nope")
            .build()
            .unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_text_body_is_a_string() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, header::HeaderValue::from_static("text/plain"));
        let ctx = RequestContext::builder(Method::POST, "/")
            .headers(headers)
            .body("hello")
            .build()
            .unwrap();
        assert_eq!(ctx.body(), Some(&json!("hello")));
    }
}
