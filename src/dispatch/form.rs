use crate::dispatch::RequestContext;
use crate::exception::RequestError;
use async_trait::async_trait;
use axum::{
    body::{Body, Bytes},
    extract::{FromRequest, Multipart},
    http::Request,
};
use serde_json::Value;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub field: String,
    pub file_name: String,
    pub content_type: Option<String>,
    pub data: Bytes,
}

impl UploadedFile {
    pub fn extension(&self) -> Option<String> {
        self.file_name
            .rsplit_once('.')
            .map(|(_, extension)| extension.to_ascii_lowercase())
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[derive(Debug, Clone)]
pub enum FormValue {
    Text(String),
    File(UploadedFile),
}

/// Parsed form fields in arrival order. A name may appear more than once.
#[derive(Debug, Clone, Default)]
pub struct FormData {
    entries: Vec<(String, FormValue)>,
}

impl FormData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, name: impl Into<String>, value: FormValue) {
        self.entries.push((name.into(), value));
    }

    pub fn get(&self, name: &str) -> Option<&FormValue> {
        self.entries
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value)
    }

    pub fn get_all(&self, name: &str) -> Vec<&FormValue> {
        self.entries
            .iter()
            .filter(|(key, _)| key == name)
            .map(|(_, value)| value)
            .collect()
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        match self.get(name)? {
            FormValue::Text(text) => Some(text),
            FormValue::File(_) => None,
        }
    }

    pub fn values(&self) -> impl Iterator<Item = &FormValue> {
        self.entries.iter().map(|(_, value)| value)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Options of a form-data parameter.
#[derive(Debug, Clone, Default)]
pub struct FormDataOptions {
    /// Only take files from this field.
    pub file_field: Option<String>,
    /// Accepted MIME types or file extensions; empty accepts everything.
    pub allowed_types: Vec<String>,
    /// Field whose text value is parsed as embedded JSON.
    pub json_field: Option<String>,
}

impl FormDataOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn file_field(mut self, field: impl Into<String>) -> Self {
        self.file_field = Some(field.into());
        self
    }

    pub fn allowed_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_types = types.into_iter().map(Into::into).collect();
        self
    }

    pub fn json_field(mut self, field: impl Into<String>) -> Self {
        self.json_field = Some(field.into());
        self
    }
}

/// What a form-data parameter hands to the handler.
#[derive(Debug, Clone)]
pub struct FormDataPayload {
    pub files: Vec<UploadedFile>,
    pub json: Option<Value>,
    pub form: Arc<FormData>,
}

pub fn extract_payload(
    form: Arc<FormData>,
    options: &FormDataOptions,
) -> Result<FormDataPayload, RequestError> {
    let allowed: Vec<String> = options
        .allowed_types
        .iter()
        .map(|kind| kind.to_ascii_lowercase())
        .collect();

    let candidates: Vec<&FormValue> = match &options.file_field {
        Some(field) => form.get_all(field),
        None => form.values().collect(),
    };

    let mut files = Vec::new();
    for value in candidates {
        if let FormValue::File(file) = value {
            if !allowed.is_empty() && !is_allowed(file, &allowed) {
                return Err(RequestError::bad_request(format!(
                    "File type for \"{}\" is not allowed. Allowed: {}",
                    file.file_name,
                    allowed.join(", ")
                )));
            }
            files.push(file.clone());
        }
    }

    let json = match &options.json_field {
        Some(field) => match form.get(field) {
            Some(FormValue::Text(raw)) => Some(serde_json::from_str(raw).map_err(|_| {
                RequestError::bad_request(format!("Failed to parse JSON field \"{field}\"."))
            })?),
            Some(FormValue::File(_)) => {
                return Err(RequestError::bad_request(format!(
                    "JSON field \"{field}\" must be a string value."
                )));
            }
            None => None,
        },
        None => None,
    };

    Ok(FormDataPayload { files, json, form })
}

fn is_allowed(file: &UploadedFile, allowed: &[String]) -> bool {
    let mime = file
        .content_type
        .as_deref()
        .unwrap_or_default()
        .to_ascii_lowercase();
    if !mime.is_empty() && allowed.contains(&mime) {
        return true;
    }
    file.extension()
        .is_some_and(|extension| allowed.contains(&extension))
}

/// Turns a request body into [`FormData`].
#[async_trait]
pub trait FormDataParser: Send + Sync + 'static {
    async fn parse(&self, request: &RequestContext) -> Result<FormData, RequestError>;
}

/// Parses `multipart/form-data` bodies, and falls back to the fields of an
/// already parsed JSON object body.
#[derive(Debug, Default, Clone, Copy)]
pub struct MultipartParser;

#[async_trait]
impl FormDataParser for MultipartParser {
    async fn parse(&self, request: &RequestContext) -> Result<FormData, RequestError> {
        let is_multipart = request
            .content_type()
            .is_some_and(|kind| kind.to_ascii_lowercase().starts_with("multipart/form-data"));
        if !is_multipart {
            return from_body(request).ok_or_else(|| {
                RequestError::bad_request("Expected a multipart/form-data body")
            });
        }

        let mut builder = Request::builder()
            .method(request.method().clone())
            .uri(request.uri().clone());
        for (name, value) in request.headers() {
            builder = builder.header(name, value);
        }
        let rebuilt = builder
            .body(Body::from(request.raw_body().clone()))
            .map_err(|err| RequestError::Internal(err.into()))?;

        let mut multipart = Multipart::from_request(rebuilt, &())
            .await
            .map_err(|rejection| RequestError::bad_request(rejection.body_text()))?;

        let mut form = FormData::new();
        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|err| RequestError::bad_request(err.body_text()))?
        {
            let name = field.name().unwrap_or_default().to_string();
            let file_name = field.file_name().map(str::to_string);
            let content_type = field.content_type().map(str::to_string);
            let data = field
                .bytes()
                .await
                .map_err(|err| RequestError::bad_request(err.body_text()))?;

            let value = match file_name {
                Some(file_name) => FormValue::File(UploadedFile {
                    field: name.clone(),
                    file_name,
                    content_type,
                    data,
                }),
                None => FormValue::Text(String::from_utf8_lossy(&data).into_owned()),
            };
            form.append(name, value);
        }
        Ok(form)
    }
}

fn from_body(request: &RequestContext) -> Option<FormData> {
    let Value::Object(fields) = request.body()? else {
        return None;
    };
    let mut form = FormData::new();
    for (name, value) in fields {
        let text = match value {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        };
        form.append(name.clone(), FormValue::Text(text));
    }
    Some(form)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{HeaderMap, HeaderValue, Method, header};

    fn upload(name: &str, mime: &str) -> FormValue {
        FormValue::File(UploadedFile {
            field: "avatar".into(),
            file_name: name.into(),
            content_type: Some(mime.into()),
            data: Bytes::from_static(b"data"),
        })
    }

    fn form() -> Arc<FormData> {
        let mut form = FormData::new();
        form.append("avatar", upload("me.PNG", "image/png"));
        form.append("doc", upload("cv.pdf", "application/pdf"));
        form.append("meta", FormValue::Text(r#"{"title":"hi"}"#.into()));
        form.append("broken", FormValue::Text("{".into()));
        Arc::new(form)
    }

    #[test]
    fn test_allow_list_by_mime_or_extension() {
        let options = FormDataOptions::new()
            .file_field("avatar")
            .allowed_types(["png"]);
        let payload = extract_payload(form(), &options).unwrap();
        assert_eq!(payload.files.len(), 1);

        let options = FormDataOptions::new().allowed_types(["image/png"]);
        let err = extract_payload(form(), &options).unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_empty_allow_list_accepts_everything() {
        let payload = extract_payload(form(), &FormDataOptions::new()).unwrap();
        assert_eq!(payload.files.len(), 2);
    }

    #[test]
    fn test_json_field() {
        let payload = extract_payload(form(), &FormDataOptions::new().json_field("meta")).unwrap();
        assert_eq!(payload.json.unwrap()["title"], "hi");

        let err = extract_payload(form(), &FormDataOptions::new().json_field("broken")).unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::BAD_REQUEST);

        let err = extract_payload(form(), &FormDataOptions::new().json_field("doc")).unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_multipart_body_is_parsed() {
        let body = concat!(
            "--XYZ\r\n",
            "Content-Disposition: form-data; name=\"title\"\r\n\r\n",
            "hello\r\n",
            "--XYZ\r\n",
            "Content-Disposition: form-data; name=\"file\"; filename=\"a.txt\"\r\n",
            "Content-Type: text/plain\r\n\r\n",
            "content\r\n",
            "--XYZ--\r\n",
        );
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("multipart/form-data; boundary=XYZ"),
        );
        let ctx = RequestContext::builder(Method::POST, "/upload")
            .headers(headers)
            .body(body)
            .build()
            .unwrap();

        let form = MultipartParser.parse(&ctx).await.unwrap();
        assert_eq!(form.text("title"), Some("hello"));
        match form.get("file") {
            Some(FormValue::File(file)) => assert_eq!(file.file_name, "a.txt"),
            other => panic!("unexpected value: {other:?}"),
        }
    }
}
