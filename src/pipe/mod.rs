//! Schemas applied to extracted parameters before the handler runs.

use crate::exception::FieldError;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::marker::PhantomData;
use validator::{Validate, ValidationErrors, ValidationErrorsKind};

pub mod builtins;

pub use builtins::{ParseFloatPipe, ParseIntPipe};

pub type PipeResult<T> = Result<T, Vec<FieldError>>;

/// Parse-and-replace validation for a parameter value.
///
/// On success the returned value replaces the extracted one; on failure the
/// request is answered with a 400 listing every violation.
pub trait ValidationSchema: Send + Sync + 'static {
    fn parse(&self, value: Value) -> PipeResult<Value>;
}

/// Validates a value by deserializing it into `T` and running its
/// [`Validate`] rules. The replacement value is `T` serialized back, so
/// defaults and unknown-field filtering from serde apply.
pub struct ValidationPipe<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> ValidationPipe<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for ValidationPipe<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ValidationSchema for ValidationPipe<T>
where
    T: DeserializeOwned + Serialize + Validate + 'static,
{
    fn parse(&self, value: Value) -> PipeResult<Value> {
        let parsed: T = serde_json::from_value(value)
            .map_err(|err| vec![FieldError::new(serde_field(&err.to_string()), err.to_string())])?;

        parsed.validate().map_err(|errors| {
            let mut fields = Vec::new();
            collect_violations(&errors, "", &mut fields);
            fields.sort_by(|a, b| a.field.cmp(&b.field));
            fields
        })?;

        serde_json::to_value(&parsed)
            .map_err(|err| vec![FieldError::new("value", err.to_string())])
    }
}

/// Flatten nested struct and list errors into dotted paths such as
/// `address.city` and `items[0].name`.
fn collect_violations(errors: &ValidationErrors, prefix: &str, out: &mut Vec<FieldError>) {
    for (field, kind) in errors.errors() {
        let path = if prefix.is_empty() {
            field.to_string()
        } else {
            format!("{prefix}.{field}")
        };
        match kind {
            ValidationErrorsKind::Field(violations) => {
                out.extend(violations.iter().map(|violation| {
                    let message = violation
                        .message
                        .as_ref()
                        .map(|message| message.to_string())
                        .unwrap_or_else(|| format!("{path} failed {} validation", violation.code));
                    FieldError::new(path.clone(), message)
                }));
            }
            ValidationErrorsKind::Struct(inner) => collect_violations(inner, &path, out),
            ValidationErrorsKind::List(items) => {
                for (index, inner) in items {
                    collect_violations(inner, &format!("{path}[{index}]"), out);
                }
            }
        }
    }
}

/// Pull the field name out of serde messages such as "missing field `age`".
fn serde_field(message: &str) -> String {
    message
        .split_once("field `")
        .and_then(|(_, rest)| rest.split_once('`'))
        .map(|(field, _)| field.to_string())
        .unwrap_or_else(|| "body".to_string())
}
