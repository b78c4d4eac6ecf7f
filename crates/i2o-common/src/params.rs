//! Request parameter model.
//!
//! Incoming requests are reduced to a mapping of parameter names to values.
//! The mapping is kept in a `BTreeMap` so iteration (and therefore any
//! serialization of it) is independent of the order parameters arrived in.

use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{I2oError, I2oResult};

/// A single request parameter value.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl Serialize for ParamValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ParamValue::Null => serializer.serialize_unit(),
            ParamValue::Bool(b) => serializer.serialize_bool(*b),
            ParamValue::Int(i) => serializer.serialize_i64(*i),
            // JSON has no NaN/inf; keep them distinguishable from null
            ParamValue::Float(f) if !f.is_finite() => serializer.serialize_str(&f.to_string()),
            ParamValue::Float(f) => serializer.serialize_f64(*f),
            ParamValue::Str(s) => serializer.serialize_str(s),
        }
    }
}

impl ParamValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParamValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, ParamValue::Null)
    }
}

impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::Null => write!(f, "null"),
            ParamValue::Bool(b) => write!(f, "{}", b),
            ParamValue::Int(i) => write!(f, "{}", i),
            ParamValue::Float(x) => write!(f, "{}", x),
            ParamValue::Str(s) => write!(f, "{}", s),
        }
    }
}

impl From<&str> for ParamValue {
    fn from(s: &str) -> Self {
        ParamValue::Str(s.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(s: String) -> Self {
        ParamValue::Str(s)
    }
}

impl From<i64> for ParamValue {
    fn from(i: i64) -> Self {
        ParamValue::Int(i)
    }
}

impl From<f64> for ParamValue {
    fn from(x: f64) -> Self {
        ParamValue::Float(x)
    }
}

impl From<bool> for ParamValue {
    fn from(b: bool) -> Self {
        ParamValue::Bool(b)
    }
}

impl<T: Into<ParamValue>> From<Option<T>> for ParamValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(ParamValue::Null)
    }
}

/// Order-independent mapping of request parameter names to values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestParams(BTreeMap<String, ParamValue>);

impl RequestParams {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from query-string pairs. Every value is kept as a string.
    pub fn from_query<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), ParamValue::Str(v.into())))
                .collect(),
        )
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<ParamValue>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.0.get(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ParamValue)> {
        self.0.iter()
    }

    /// Canonical encoding: sorted keys, compact JSON.
    pub fn canonical_json(&self) -> String {
        // A BTreeMap<String, ParamValue> always serializes
        serde_json::to_string(&self.0).unwrap_or_default()
    }

    /// A present, non-null, non-empty parameter rendered as text.
    pub fn optional_str(&self, name: &str) -> Option<String> {
        match self.0.get(name) {
            None | Some(ParamValue::Null) => None,
            Some(ParamValue::Str(s)) if s.trim().is_empty() => None,
            Some(v) => Some(v.to_string()),
        }
    }

    pub fn required_str(&self, name: &str) -> I2oResult<String> {
        self.optional_str(name)
            .ok_or_else(|| I2oError::MissingParameter(name.to_string()))
    }

    pub fn optional_i64(&self, name: &str) -> I2oResult<Option<i64>> {
        match self.0.get(name) {
            None | Some(ParamValue::Null) => Ok(None),
            Some(ParamValue::Int(i)) => Ok(Some(*i)),
            Some(ParamValue::Str(s)) if s.trim().is_empty() => Ok(None),
            Some(ParamValue::Str(s)) => s
                .trim()
                .parse::<i64>()
                .map(Some)
                .map_err(|_| I2oError::invalid(name, format!("'{}' is not an integer", s))),
            Some(other) => Err(I2oError::invalid(
                name,
                format!("'{}' is not an integer", other),
            )),
        }
    }

    pub fn optional_i32(&self, name: &str) -> I2oResult<Option<i32>> {
        match self.optional_i64(name)? {
            None => Ok(None),
            Some(v) => i32::try_from(v)
                .map(Some)
                .map_err(|_| I2oError::invalid(name, format!("{} is out of range", v))),
        }
    }
}

impl<K: Into<String>, V: Into<ParamValue>> FromIterator<(K, V)> for RequestParams {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_json_ignores_insertion_order() {
        let a = RequestParams::new()
            .with("param", "roff")
            .with("year", "2014")
            .with("month", "3");
        let b = RequestParams::new()
            .with("month", "3")
            .with("param", "roff")
            .with("year", "2014");

        assert_eq!(a.canonical_json(), b.canonical_json());
        assert_eq!(
            a.canonical_json(),
            r#"{"month":"3","param":"roff","year":"2014"}"#
        );
    }

    #[test]
    fn test_value_types_are_distinguished() {
        let s = RequestParams::new().with("day", "10");
        let i = RequestParams::new().with("day", 10i64);
        let n = RequestParams::new().with("day", ParamValue::Null);
        let nan = RequestParams::new().with("day", f64::NAN);

        assert_ne!(s.canonical_json(), i.canonical_json());
        assert_ne!(n.canonical_json(), nan.canonical_json());
    }

    #[test]
    fn test_required_and_optional_accessors() {
        let p = RequestParams::from_query([("param", "roff"), ("year", "20x4"), ("cmap", " ")]);

        assert_eq!(p.required_str("param").unwrap(), "roff");
        assert!(matches!(
            p.required_str("table"),
            Err(I2oError::MissingParameter(_))
        ));
        assert_eq!(p.optional_str("cmap"), None);
        assert!(matches!(
            p.optional_i32("year"),
            Err(I2oError::InvalidParameter { .. })
        ));
        assert_eq!(p.optional_i32("month").unwrap(), None);
    }
}
