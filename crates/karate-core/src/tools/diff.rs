//! Structural comparison of two JSON documents.

use super::{Result, ToolError};
use serde::Serialize;
use serde_json::Value;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffKind {
    TypeMismatch,
    ValueMismatch,
    MissingInFirst,
    MissingInSecond,
}

/// One difference between the documents.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Difference {
    /// `a.b[2].c`; empty for the document root.
    pub path: String,
    #[serde(rename = "type")]
    pub kind: DiffKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value1: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value2: Option<Value>,
}

impl fmt::Display for Difference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let path = if self.path.is_empty() { "$" } else { &self.path };
        let show = |v: &Option<Value>| v.as_ref().map_or_else(String::new, Value::to_string);
        match self.kind {
            DiffKind::TypeMismatch => write!(
                f,
                "Type mismatch at {path}: {} {} vs {} {}",
                type_name(self.value1.as_ref()),
                show(&self.value1),
                type_name(self.value2.as_ref()),
                show(&self.value2)
            ),
            DiffKind::ValueMismatch => write!(
                f,
                "Value mismatch at {path}: {} vs {}",
                show(&self.value1),
                show(&self.value2)
            ),
            DiffKind::MissingInFirst => {
                write!(f, "Missing in first response at {path}: {}", show(&self.value2))
            }
            DiffKind::MissingInSecond => {
                write!(f, "Missing in second response at {path}: {}", show(&self.value1))
            }
        }
    }
}

fn type_name(value: Option<&Value>) -> &'static str {
    match value {
        None | Some(Value::Null) => "null",
        Some(Value::Bool(_)) => "boolean",
        Some(Value::Number(_)) => "number",
        Some(Value::String(_)) => "string",
        Some(Value::Array(_)) => "array",
        Some(Value::Object(_)) => "object",
    }
}

/// Differences between two parsed documents, in document order.
///
/// Object keys of the first document come first, followed by keys only
/// present in the second.
pub fn diff_json(first: &Value, second: &Value) -> Vec<Difference> {
    let mut out = Vec::new();
    walk(first, second, String::new(), &mut out);
    out
}

/// Parse both inputs and diff them.
pub fn diff_json_str(first: &str, second: &str) -> Result<Vec<Difference>> {
    let a = serde_json::from_str(first).map_err(|source| ToolError::InvalidJson {
        input: "first document",
        source,
    })?;
    let b = serde_json::from_str(second).map_err(|source| ToolError::InvalidJson {
        input: "second document",
        source,
    })?;
    Ok(diff_json(&a, &b))
}

fn walk(a: &Value, b: &Value, path: String, out: &mut Vec<Difference>) {
    match (a, b) {
        (Value::Array(xs), Value::Array(ys)) => {
            for i in 0..xs.len().max(ys.len()) {
                let item_path = format!("{path}[{i}]");
                match (xs.get(i), ys.get(i)) {
                    (Some(x), Some(y)) => walk(x, y, item_path, out),
                    (None, y) => out.push(missing(item_path, DiffKind::MissingInFirst, None, y)),
                    (x, None) => out.push(missing(item_path, DiffKind::MissingInSecond, x, None)),
                }
            }
        }
        (Value::Object(xs), Value::Object(ys)) => {
            let keys = xs.keys().chain(ys.keys().filter(|k| !xs.contains_key(*k)));
            for key in keys {
                let key_path = if path.is_empty() {
                    key.clone()
                } else {
                    format!("{path}.{key}")
                };
                match (xs.get(key), ys.get(key)) {
                    (Some(x), Some(y)) => walk(x, y, key_path, out),
                    (None, y) => out.push(missing(key_path, DiffKind::MissingInFirst, None, y)),
                    (x, None) => out.push(missing(key_path, DiffKind::MissingInSecond, x, None)),
                }
            }
        }
        _ if type_name(Some(a)) != type_name(Some(b)) => out.push(Difference {
            path,
            kind: DiffKind::TypeMismatch,
            value1: Some(a.clone()),
            value2: Some(b.clone()),
        }),
        _ if a != b => out.push(Difference {
            path,
            kind: DiffKind::ValueMismatch,
            value1: Some(a.clone()),
            value2: Some(b.clone()),
        }),
        _ => {}
    }
}

fn missing(path: String, kind: DiffKind, a: Option<&Value>, b: Option<&Value>) -> Difference {
    Difference {
        path,
        kind,
        value1: a.cloned(),
        value2: b.cloned(),
    }
}
