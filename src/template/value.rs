//! The closed value model templates operate on.
//!
//! Instead of reflecting over arbitrary types, every value a template can
//! touch is one of a small set of tagged variants, with a single uniform
//! "get field by dotted key" capability and a comparable-string projection
//! used by the list functions (`sort`, `filter`).

use crate::source::{Source, meta_display};
use rustc_hash::FxHashMap;
use serde_json::{Value as Json, json};
use std::fmt;
use std::path::PathBuf;

/// A template value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Str(String),
    /// Structured data: frontmatter values, data-file contents
    Data(Json),
    /// Reference to a registry entry
    Source(SourceRef),
    /// Key/value pair produced by `select`
    Pair(Box<Pair>),
    List(Vec<Value>),
    /// Render context map
    Map(FxHashMap<String, Value>),
}

/// Cheap snapshot of a [`Source`] handed to templates.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceRef {
    pub name: String,
    pub local: PathBuf,
    pub path: String,
    pub page: usize,
    pub pages: usize,
    pub meta: Json,
}

impl SourceRef {
    pub fn from_source(source: &Source) -> Self {
        Self {
            name: source.name.clone(),
            local: source.local.clone(),
            path: source.path.clone(),
            page: source.page,
            pages: source.pages,
            meta: Json::Object(source.meta.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Pair {
    pub key: String,
    pub value: Json,
}

impl Value {
    /// Walk a dotted path, one segment at a time.
    pub fn lookup(&self, path: &[String]) -> Value {
        let mut current = self.clone();
        for key in path {
            current = current.step(key);
        }
        current
    }

    fn step(&self, key: &str) -> Value {
        match self {
            Value::Map(map) => map.get(key).cloned().unwrap_or(Value::Null),
            Value::Source(src) => match key {
                "Path" => Value::Str(src.path.clone()),
                "Local" => Value::Str(src.local.to_string_lossy().into_owned()),
                "Name" | "Filename" => Value::Str(src.name.clone()),
                "Page" => Value::Int(src.page as i64),
                "Pages" => Value::Int(src.pages as i64),
                "Meta" => Value::Data(src.meta.clone()),
                _ => Value::Null,
            },
            Value::Pair(pair) => match key {
                "Key" => Value::Str(pair.key.clone()),
                "Value" => Value::Data(pair.value.clone()),
                _ => Value::Null,
            },
            Value::Data(json) => json.get(key).cloned().map_or(Value::Null, Value::Data),
            _ => Value::Null,
        }
    }

    /// Dotted-key accessor returning a comparable string.
    ///
    /// This is the one projection `sort` and `filter` order and match on.
    pub fn field_str(&self, dotted: &str) -> String {
        if dotted.is_empty() || dotted == "." {
            return self.to_display_string();
        }
        let segments: Vec<String> = dotted.split('.').map(str::to_string).collect();
        self.lookup(&segments).to_display_string()
    }

    /// Truthiness for `if`: empty and zero values are false.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(n) => *n != 0,
            Value::Str(s) => !s.is_empty(),
            Value::Data(json) => match json {
                Json::Null => false,
                Json::Bool(b) => *b,
                Json::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
                Json::String(s) => !s.is_empty(),
                Json::Array(items) => !items.is_empty(),
                Json::Object(map) => !map.is_empty(),
            },
            Value::List(items) => !items.is_empty(),
            Value::Map(map) => !map.is_empty(),
            Value::Source(_) | Value::Pair(_) => true,
        }
    }

    /// Sequence view for `range` and the list functions.
    pub fn as_list(&self) -> Option<Vec<Value>> {
        match self {
            Value::List(items) => Some(items.clone()),
            Value::Data(Json::Array(items)) => {
                Some(items.iter().cloned().map(Value::Data).collect())
            }
            _ => None,
        }
    }

    /// Integer view for numeric arguments (`limit`, `offset`, `paginate`).
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            Value::Data(Json::Number(n)) => n.as_i64(),
            Value::Str(s) => s.parse().ok(),
            _ => None,
        }
    }

    pub fn to_display_string(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Int(n) => n.to_string(),
            Value::Str(s) => s.clone(),
            Value::Data(json) => meta_display(json),
            Value::Source(src) => src.path.clone(),
            Value::Pair(pair) => format!("{}: {}", pair.key, pair.value),
            Value::List(items) => items
                .iter()
                .map(Value::to_display_string)
                .collect::<Vec<_>>()
                .join(" "),
            Value::Map(_) => "[object]".to_string(),
        }
    }

    /// Convert to plain JSON, for the `json` template function.
    pub fn to_json(&self) -> Json {
        match self {
            Value::Null => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Int(n) => json!(n),
            Value::Str(s) => Json::String(s.clone()),
            Value::Data(json) => json.clone(),
            Value::Source(src) => json!({
                "Name": src.name,
                "Path": src.path,
                "Page": src.page,
                "Pages": src.pages,
                "Meta": src.meta,
            }),
            Value::Pair(pair) => json!({ "Key": pair.key, "Value": pair.value }),
            Value::List(items) => Json::Array(items.iter().map(Value::to_json).collect()),
            Value::Map(map) => {
                let mut obj = serde_json::Map::new();
                for (k, v) in map {
                    obj.insert(k.clone(), v.to_json());
                }
                Json::Object(obj)
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_display_string())
    }
}
