//! Polymorphic value tree manipulated by the map interpreter
//!
//! Map execution state, use-case input, and use-case results are all
//! [`Variable`] trees: scalars, binary blobs, ordered sequences, and
//! string-keyed maps. Merging follows a structural precedence rule where
//! only maps merge recursively and everything else is replaced wholesale.

use std::collections::BTreeMap;

use bytes::Bytes;
use serde_json::Value;

/// A string-keyed map of variables, the interpreter's working state.
pub type Variables = BTreeMap<String, Variable>;

/// A single value in the interpreter's value tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Variable {
    /// Absent / null value
    None,
    /// Boolean scalar
    Bool(bool),
    /// Numeric scalar (integer or float, JSON semantics)
    Number(serde_json::Number),
    /// String scalar
    String(String),
    /// Opaque binary blob, treated as a leaf by [`merge_variables`]
    Bytes(Bytes),
    /// Ordered sequence, treated as a leaf by [`merge_variables`]
    List(Vec<Variable>),
    /// String-keyed map; the only shape that merges recursively
    Map(Variables),
}

impl Variable {
    /// True when this value is a map whose entries can be merged into.
    pub fn is_non_primitive(&self) -> bool {
        matches!(self, Self::Map(_))
    }

    /// Return the inner map when this value is non-primitive.
    pub fn cast_to_non_primitive(&self) -> Option<&Variables> {
        match self {
            Self::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Consume the value, returning the inner map when non-primitive.
    pub fn into_non_primitive(self) -> Option<Variables> {
        match self {
            Self::Map(map) => Some(map),
            _ => None,
        }
    }

    /// JavaScript-like truthiness, used by conditioned statements.
    ///
    /// `null`, `false`, `0`, `NaN`, and the empty string are falsy; every
    /// map, list, and blob is truthy regardless of contents.
    pub fn is_truthy(&self) -> bool {
        match self {
            Self::None => false,
            Self::Bool(b) => *b,
            Self::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
            Self::String(s) => !s.is_empty(),
            Self::Bytes(_) | Self::List(_) | Self::Map(_) => true,
        }
    }

    /// Look up a direct child by key (maps) or decimal index (lists).
    pub fn get(&self, key: &str) -> Option<&Variable> {
        match self {
            Self::Map(map) => map.get(key),
            Self::List(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        }
    }

    /// Follow a dotted path (`a.b.0.c`) through maps and lists.
    pub fn get_path(&self, path: &str) -> Option<&Variable> {
        let mut current = self;
        for segment in path.split('.') {
            current = current.get(segment)?;
        }
        Some(current)
    }
}

impl From<Value> for Variable {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Self::None,
            Value::Bool(b) => Self::Bool(b),
            Value::Number(n) => Self::Number(n),
            Value::String(s) => Self::String(s),
            Value::Array(items) => Self::List(items.into_iter().map(Self::from).collect()),
            Value::Object(map) => Self::Map(
                map.into_iter()
                    .map(|(key, item)| (key, Self::from(item)))
                    .collect(),
            ),
        }
    }
}

impl From<&Variable> for Value {
    fn from(variable: &Variable) -> Self {
        match variable {
            Variable::None => Self::Null,
            Variable::Bool(b) => Self::Bool(*b),
            Variable::Number(n) => Self::Number(n.clone()),
            Variable::String(s) => Self::String(s.clone()),
            // Blobs have no JSON shape; the wire layer base64-encodes where needed
            Variable::Bytes(bytes) => Self::String(String::from_utf8_lossy(bytes).into_owned()),
            Variable::List(items) => Self::Array(items.iter().map(Self::from).collect()),
            Variable::Map(map) => Self::Object(
                map.iter()
                    .map(|(key, item)| (key.clone(), Self::from(item)))
                    .collect(),
            ),
        }
    }
}

impl From<Variable> for Value {
    fn from(variable: Variable) -> Self {
        Self::from(&variable)
    }
}

impl From<&str> for Variable {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for Variable {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<bool> for Variable {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for Variable {
    fn from(value: i64) -> Self {
        Self::Number(value.into())
    }
}

impl From<Variables> for Variable {
    fn from(value: Variables) -> Self {
        Self::Map(value)
    }
}

/// Convert a JSON object into [`Variables`]; non-objects yield `None`.
pub fn variables_from_json(value: Value) -> Option<Variables> {
    Variable::from(value).into_non_primitive()
}

/// Serialize variables back into a JSON object.
pub fn variables_to_json(variables: &Variables) -> Value {
    Value::from(&Variable::Map(variables.clone()))
}

/// Deep-merge `source` into `target`.
///
/// Same-keyed values are merged recursively when both sides are maps;
/// otherwise the incoming value replaces the existing one. Sequences and
/// binary blobs are leaves.
pub fn merge_variables(target: &mut Variables, source: Variables) {
    for (key, incoming) in source {
        match (target.get_mut(&key), incoming) {
            (Some(Variable::Map(existing)), Variable::Map(incoming)) => {
                merge_variables(existing, incoming);
            }
            (_, incoming) => {
                target.insert(key, incoming);
            }
        }
    }
}

/// Assign `value` at a dotted `key` path, creating intermediate maps.
///
/// `a.b.c = v` produces `{a: {b: {c: v}}}` merged into `target`; existing
/// sibling keys under `a` and `a.b` are preserved.
pub fn assign_path(target: &mut Variables, key: &str, value: Variable) {
    let mut segments = key.split('.').rev();
    let Some(leaf) = segments.next() else {
        return;
    };

    let mut nested = Variables::new();
    nested.insert(leaf.to_string(), value);
    for segment in segments {
        let mut outer = Variables::new();
        outer.insert(segment.to_string(), Variable::Map(nested));
        nested = outer;
    }

    merge_variables(target, nested);
}
