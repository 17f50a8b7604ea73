//! Decoded token claims

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single claim value
///
/// Numeric values, including the numeric dates used by `exp` and `iat`,
/// are held as floating-point seconds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(from = "Value", into = "Value")]
pub enum ClaimValue {
    /// JSON `null`
    Null,
    /// A boolean
    Bool(bool),
    /// A number
    Number(f64),
    /// A string
    String(String),
    /// An array of values
    Array(Vec<ClaimValue>),
    /// A nested object
    Object(BTreeMap<String, ClaimValue>),
}

impl ClaimValue {
    /// The value as a string slice, if it is a string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// The value as a number, if it is a number
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// The value as a boolean, if it is a boolean
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// A short name for the kind of value held
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::Array(_) => "array",
            Self::Object(_) => "object",
        }
    }
}

impl From<Value> for ClaimValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(b),
            Value::Number(n) => n.as_f64().map_or(Self::Null, Self::Number),
            Value::String(s) => Self::String(s),
            Value::Array(items) => Self::Array(items.into_iter().map(Self::from).collect()),
            Value::Object(map) => {
                Self::Object(map.into_iter().map(|(k, v)| (k, Self::from(v))).collect())
            }
        }
    }
}

impl From<ClaimValue> for Value {
    fn from(value: ClaimValue) -> Self {
        match value {
            ClaimValue::Null => Value::Null,
            ClaimValue::Bool(b) => Value::Bool(b),
            ClaimValue::Number(n) => serde_json::Number::from_f64(n).map_or(Value::Null, Value::Number),
            ClaimValue::String(s) => Value::String(s),
            ClaimValue::Array(items) => Value::Array(items.into_iter().map(Value::from).collect()),
            ClaimValue::Object(map) => {
                Value::Object(map.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl From<&str> for ClaimValue {
    fn from(s: &str) -> Self {
        Self::String(s.to_owned())
    }
}

impl From<String> for ClaimValue {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<f64> for ClaimValue {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<bool> for ClaimValue {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

/// The claims carried in a token payload, keyed by claim name
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClaimSet(BTreeMap<String, ClaimValue>);

impl ClaimSet {
    /// Constructs an empty claim set
    pub fn new() -> Self {
        Self::default()
    }

    /// Gets the claim with the given name
    pub fn get(&self, name: &str) -> Option<&ClaimValue> {
        self.0.get(name)
    }

    /// Gets the claim with the given name if it is a string
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(ClaimValue::as_str)
    }

    /// Gets the claim with the given name if it is a number
    pub fn get_f64(&self, name: &str) -> Option<f64> {
        self.get(name).and_then(ClaimValue::as_f64)
    }

    /// Whether a claim with the given name is present
    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    /// Adds or replaces a claim
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<ClaimValue>) {
        self.0.insert(name.into(), value.into());
    }

    /// Adds or replaces a claim, returning the updated set
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<ClaimValue>) -> Self {
        self.insert(name, value);
        self
    }

    /// Iterates over the claims in name order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ClaimValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// The number of claims
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the set holds no claims
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<ClaimValue>> FromIterator<(K, V)> for ClaimSet {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}
