//! Core types shared across the generated CLI
//!
//! Dynamic values (flag values, step outputs, event payloads) are
//! represented as `serde_json::Value`, which already carries the tagged
//! sum over bool/int/float/string/sequence/mapping/null. The coercions
//! the expression evaluator relies on live here so every subsystem
//! agrees on how a value becomes a bool or a display string.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

/// An HTTP request handed to the transport collaborator
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: String,
    pub url: String,
    pub headers: HashMap<String, String>,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
    pub timeout: Option<Duration>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self::new("GET", url)
    }

    pub fn new(method: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            url: url.into(),
            headers: HashMap::new(),
            query: Vec::new(),
            body: None,
            timeout: None,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }
}

/// An HTTP response as seen by the core
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: String,
}

impl HttpResponse {
    /// Parse the body as JSON, falling back to the raw string
    pub fn parsed_body(&self) -> Value {
        serde_json::from_str(&self.body).unwrap_or_else(|_| Value::String(self.body.clone()))
    }

    pub fn is_success(&self) -> bool {
        self.status < 400
    }
}

/// One operation from the parsed OpenAPI catalog
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationSpec {
    pub operation_id: String,
    pub method: String,
    pub path: String,
    #[serde(default)]
    pub parameters: Vec<ParameterSpec>,
    /// Command name override for the CLI surface
    pub cli_command: Option<String>,
    #[serde(default)]
    pub cli_flags: Vec<FlagSpec>,
    /// Declarative multi-step workflow attached to this operation
    pub workflow: Option<Value>,
    /// Progress hint: "spinner" or "bar"
    pub progress: Option<String>,
    /// Watch configuration attached to this operation
    pub watch: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub name: String,
    /// "path", "query", "header" or "body"
    pub location: String,
    #[serde(default)]
    pub required: bool,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlagSpec {
    pub name: String,
    pub description: Option<String>,
    pub default: Option<Value>,
}

/// Value coercions used by the expression evaluator and formatters
pub mod coerce {
    use serde_json::Value;

    /// Truthiness for condition contexts that received a non-boolean:
    /// null and empty containers are false, numbers compare against zero.
    pub fn truthy(value: &Value) -> bool {
        match value {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
            Value::String(s) => !s.is_empty(),
            Value::Array(items) => !items.is_empty(),
            Value::Object(map) => !map.is_empty(),
        }
    }

    /// Stringification used for `{...}` interpolation: strings render
    /// without quotes, everything else as compact JSON.
    pub fn display_string(value: &Value) -> String {
        match value {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }

    pub fn as_i64(value: &Value) -> Option<i64> {
        match value {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn as_f64(value: &Value) -> Option<f64> {
        match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Length of a string, sequence or mapping
    pub fn len(value: &Value) -> Option<usize> {
        match value {
            Value::String(s) => Some(s.chars().count()),
            Value::Array(items) => Some(items.len()),
            Value::Object(map) => Some(map.len()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::coerce;
    use serde_json::json;

    #[test]
    fn truthiness_of_common_values() {
        assert!(!coerce::truthy(&json!(null)));
        assert!(!coerce::truthy(&json!(0)));
        assert!(!coerce::truthy(&json!("")));
        assert!(!coerce::truthy(&json!([])));
        assert!(coerce::truthy(&json!(1)));
        assert!(coerce::truthy(&json!("x")));
        assert!(coerce::truthy(&json!({"a": 1})));
    }

    #[test]
    fn display_string_unquotes_strings() {
        assert_eq!(coerce::display_string(&json!("hello")), "hello");
        assert_eq!(coerce::display_string(&json!(42)), "42");
        assert_eq!(coerce::display_string(&json!(null)), "");
        assert_eq!(coerce::display_string(&json!([1, 2])), "[1,2]");
    }

    #[test]
    fn len_covers_containers() {
        assert_eq!(coerce::len(&json!("abc")), Some(3));
        assert_eq!(coerce::len(&json!([1, 2, 3, 4])), Some(4));
        assert_eq!(coerce::len(&json!({"a": 1})), Some(1));
        assert_eq!(coerce::len(&json!(7)), None);
    }
}
