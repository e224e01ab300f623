use crate::exception::FieldError;
use crate::pipe::{PipeResult, ValidationSchema};
use serde_json::{Number, Value};

/// Parses a string parameter into an integer.
///
/// Applied to a whole parameter map it converts the named key only.
pub struct ParseIntPipe {
    field: &'static str,
}

impl ParseIntPipe {
    pub fn field(field: &'static str) -> Self {
        Self { field }
    }
}

impl ValidationSchema for ParseIntPipe {
    fn parse(&self, value: Value) -> PipeResult<Value> {
        convert(value, self.field, |raw| {
            raw.trim()
                .parse::<i64>()
                .ok()
                .map(|number| Value::Number(number.into()))
        }, "must be an integer")
    }
}

/// Parses a string parameter into a floating point number.
pub struct ParseFloatPipe {
    field: &'static str,
}

impl ParseFloatPipe {
    pub fn field(field: &'static str) -> Self {
        Self { field }
    }
}

impl ValidationSchema for ParseFloatPipe {
    fn parse(&self, value: Value) -> PipeResult<Value> {
        convert(value, self.field, |raw| {
            raw.trim()
                .parse::<f64>()
                .ok()
                .and_then(Number::from_f64)
                .map(Value::Number)
        }, "must be a number")
    }
}

fn convert<F>(value: Value, field: &str, parse: F, message: &str) -> PipeResult<Value>
where
    F: Fn(&str) -> Option<Value>,
{
    let invalid = || vec![FieldError::new(field, format!("{field} {message}"))];
    match value {
        Value::Object(mut map) => {
            let converted = match map.get(field) {
                Some(Value::String(raw)) => parse(raw).ok_or_else(invalid)?,
                Some(Value::Number(number)) => Value::Number(number.clone()),
                _ => return Err(invalid()),
            };
            map.insert(field.to_string(), converted);
            Ok(Value::Object(map))
        }
        Value::String(raw) => parse(&raw).ok_or_else(invalid),
        Value::Number(number) => Ok(Value::Number(number)),
        _ => Err(invalid()),
    }
}
