use crate::dispatch::{FormDataOptions, FormDataPayload, RequestContext};
use crate::exception::RequestError;
use crate::pipe::{ValidationPipe, ValidationSchema};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use validator::Validate;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Body,
    Query,
    PathParam,
    Header,
    Request,
    FormData,
}

/// Where a handler argument comes from, and how it is validated.
#[derive(Clone)]
pub struct ParamDescriptor {
    pub(crate) index: Option<usize>,
    pub(crate) kind: ParamKind,
    pub(crate) key: Option<String>,
    pub(crate) schema: Option<Arc<dyn ValidationSchema>>,
    pub(crate) form_data: FormDataOptions,
}

impl ParamDescriptor {
    fn of(kind: ParamKind) -> Self {
        Self {
            index: None,
            kind,
            key: None,
            schema: None,
            form_data: FormDataOptions::default(),
        }
    }

    /// The parsed request body.
    pub fn body() -> Self {
        Self::of(ParamKind::Body)
    }

    /// The whole query map, or one key with [`ParamDescriptor::key`].
    pub fn query() -> Self {
        Self::of(ParamKind::Query)
    }

    /// The whole path-parameter map, or one key with [`ParamDescriptor::key`].
    pub fn path_param() -> Self {
        Self::of(ParamKind::PathParam)
    }

    pub fn header(name: impl Into<String>) -> Self {
        Self::of(ParamKind::Header).key(name.into().to_ascii_lowercase())
    }

    /// The raw [`RequestContext`].
    pub fn request() -> Self {
        Self::of(ParamKind::Request)
    }

    pub fn form_data(options: FormDataOptions) -> Self {
        Self {
            form_data: options,
            ..Self::of(ParamKind::FormData)
        }
    }

    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Place the argument at `index` instead of after the previous one.
    pub fn at(mut self, index: usize) -> Self {
        self.index = Some(index);
        self
    }

    pub fn schema(mut self, schema: impl ValidationSchema) -> Self {
        self.schema = Some(Arc::new(schema));
        self
    }

    /// Validate against `T`'s [`Validate`] rules.
    pub fn validate<T>(self) -> Self
    where
        T: DeserializeOwned + Serialize + Validate + 'static,
    {
        self.schema(ValidationPipe::<T>::new())
    }

    pub fn kind(&self) -> ParamKind {
        self.kind
    }

    pub fn index(&self) -> Option<usize> {
        self.index
    }

    /// Extract this argument from the request and apply the schema, if any.
    pub(crate) fn extract(&self, ctx: &RequestContext) -> Result<ParamValue, RequestError> {
        let raw = match self.kind {
            ParamKind::Body => ctx.body().cloned(),
            ParamKind::Query => lookup(ctx.query(), self.key.as_deref()),
            ParamKind::PathParam => lookup(ctx.path_params(), self.key.as_deref()),
            ParamKind::Header => self
                .key
                .as_deref()
                .and_then(|name| ctx.header(name))
                .map(|value| Value::String(value.to_string())),
            ParamKind::Request | ParamKind::FormData => return Ok(ParamValue::Missing),
        };

        let Some(schema) = &self.schema else {
            return Ok(raw.map(ParamValue::Value).unwrap_or(ParamValue::Missing));
        };
        schema
            .parse(raw.unwrap_or(Value::Null))
            .map(ParamValue::Value)
            .map_err(RequestError::Validation)
    }
}

fn lookup(map: &std::collections::HashMap<String, String>, key: Option<&str>) -> Option<Value> {
    match key {
        Some(key) => map.get(key).map(|value| Value::String(value.clone())),
        None => Some(Value::Object(
            map.iter()
                .map(|(key, value)| (key.clone(), Value::String(value.clone())))
                .collect(),
        )),
    }
}

impl std::fmt::Debug for ParamDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParamDescriptor")
            .field("index", &self.index)
            .field("kind", &self.kind)
            .field("key", &self.key)
            .field("schema", &self.schema.is_some())
            .finish()
    }
}

#[derive(Debug, Clone, Default)]
pub enum ParamValue {
    #[default]
    Missing,
    Value(Value),
    Request(Arc<RequestContext>),
    FormData(FormDataPayload),
}

/// The ordered argument list handed to a route handler.
#[derive(Debug, Clone, Default)]
pub struct Arguments {
    values: Vec<ParamValue>,
}

impl Arguments {
    pub fn new(values: Vec<ParamValue>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, index: usize) -> &ParamValue {
        const MISSING: &ParamValue = &ParamValue::Missing;
        self.values.get(index).unwrap_or(MISSING)
    }

    pub fn value(&self, index: usize) -> Option<&Value> {
        match self.get(index) {
            ParamValue::Value(value) => Some(value),
            _ => None,
        }
    }

    pub fn text(&self, index: usize) -> Option<&str> {
        self.value(index).and_then(Value::as_str)
    }

    /// Deserialize argument `index`; a missing argument reads as `null`.
    pub fn json<T: DeserializeOwned>(&self, index: usize) -> Result<T, RequestError> {
        let value = self.value(index).cloned().unwrap_or(Value::Null);
        serde_json::from_value(value)
            .map_err(|err| RequestError::bad_request(format!("Invalid argument {index}: {err}")))
    }

    pub fn request(&self, index: usize) -> Option<&Arc<RequestContext>> {
        match self.get(index) {
            ParamValue::Request(ctx) => Some(ctx),
            _ => None,
        }
    }

    pub fn form_data(&self, index: usize) -> Option<&FormDataPayload> {
        match self.get(index) {
            ParamValue::FormData(payload) => Some(payload),
            _ => None,
        }
    }
}
