//! Case-insensitive header view shared by the request and response facades.
//!
//! Field names are normalized by [`http::HeaderName`], so `Content-Type`,
//! `content-type` and `CONTENT-TYPE` address the same entry. Reads never
//! fail: an absent (or non-UTF-8) field reads as the empty string. Writes take
//! a [`FieldValue`], one value or a list, and stop having any effect once the
//! headers have been sent.

use http::header::{HeaderMap, HeaderName, HeaderValue};
use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::error::Error;

// ── FieldValue ────────────────────────────────────────────────────────────────

/// A header value to write: a single value, or a list written as repeated
/// fields with the same name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FieldValue {
    One(String),
    Many(Vec<String>),
}

impl FieldValue {
    fn into_vec(self) -> Vec<String> {
        match self {
            Self::One(value)   => vec![value],
            Self::Many(values) => values,
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self { Self::One(value.to_owned()) }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self { Self::One(value) }
}

impl From<&String> for FieldValue {
    fn from(value: &String) -> Self { Self::One(value.clone()) }
}

impl From<Vec<String>> for FieldValue {
    fn from(values: Vec<String>) -> Self { Self::Many(values) }
}

impl From<Vec<&str>> for FieldValue {
    fn from(values: Vec<&str>) -> Self {
        Self::Many(values.into_iter().map(str::to_owned).collect())
    }
}

impl<const N: usize> From<[&str; N]> for FieldValue {
    fn from(values: [&str; N]) -> Self {
        Self::Many(values.into_iter().map(str::to_owned).collect())
    }
}

macro_rules! field_value_from_int {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for FieldValue {
                fn from(value: $ty) -> Self { Self::One(value.to_string()) }
            }
        )*
    };
}

field_value_from_int!(u16, u32, u64, usize, i32, i64);

// ── Headers ───────────────────────────────────────────────────────────────────

/// A header map with string-typed, case-insensitive accessors.
///
/// Once [sent](Headers::is_sent), every mutator returns without doing
/// anything: the bytes are already on the wire.
#[derive(Clone, Debug, Default)]
pub struct Headers {
    map: HeaderMap,
    sent: bool,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// First value of `field`, or `""` when absent.
    pub fn get(&self, field: &str) -> &str {
        self.map
            .get(field)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
    }

    /// Every value of `field`, in insertion order.
    pub fn get_all(&self, field: &str) -> Vec<&str> {
        self.map
            .get_all(field)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect()
    }

    pub fn has(&self, field: &str) -> bool {
        self.map.contains_key(field)
    }

    /// Number of distinct field names.
    pub fn len(&self) -> usize {
        self.map.keys_len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Replaces `field` with `value`.
    pub fn set(&mut self, field: &str, value: impl Into<FieldValue>) -> Result<(), Error> {
        if self.sent {
            return Ok(());
        }
        let (name, values) = encode(field, value.into())?;
        self.map.remove(&name);
        for value in values {
            self.map.append(&name, value);
        }
        Ok(())
    }

    /// Sets several fields at once. Stops at the first invalid one.
    pub fn set_all<I, K, V>(&mut self, fields: I) -> Result<(), Error>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<FieldValue>,
    {
        for (field, value) in fields {
            self.set(field.as_ref(), value)?;
        }
        Ok(())
    }

    /// Adds `value` after any existing values of `field`.
    pub fn append(&mut self, field: &str, value: impl Into<FieldValue>) -> Result<(), Error> {
        if self.sent {
            return Ok(());
        }
        let (name, values) = encode(field, value.into())?;
        for value in values {
            self.map.append(&name, value);
        }
        Ok(())
    }

    pub fn remove(&mut self, field: &str) {
        if self.sent {
            return;
        }
        self.map.remove(field);
    }

    /// Removes every field.
    pub fn clear(&mut self) {
        if !self.sent {
            self.map.clear();
        }
    }

    pub fn is_sent(&self) -> bool {
        self.sent
    }

    pub(crate) fn mark_sent(&mut self) {
        self.sent = true;
    }

    /// Typed insert for values the crate builds itself.
    pub(crate) fn insert(&mut self, name: HeaderName, value: HeaderValue) {
        if !self.sent {
            self.map.insert(name, value);
        }
    }

    pub fn as_map(&self) -> &HeaderMap {
        &self.map
    }

    /// `(name, value)` pairs; non-UTF-8 values read as `""`.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.map
            .iter()
            .map(|(name, value)| (name.as_str(), value.to_str().unwrap_or("")))
    }
}

impl From<HeaderMap> for Headers {
    fn from(map: HeaderMap) -> Self {
        Self { map, sent: false }
    }
}

/// Single-valued fields serialize as strings, repeated ones as arrays.
impl Serialize for Headers {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut out = serializer.serialize_map(Some(self.map.keys_len()))?;
        for name in self.map.keys() {
            let values = self.get_all(name.as_str());
            match values.as_slice() {
                [one] => out.serialize_entry(name.as_str(), one)?,
                _     => out.serialize_entry(name.as_str(), &values)?,
            }
        }
        out.end()
    }
}

fn encode(field: &str, value: FieldValue) -> Result<(HeaderName, Vec<HeaderValue>), Error> {
    let name = HeaderName::from_bytes(field.as_bytes()).map_err(|_| Error::invalid_header(field))?;
    let values = value
        .into_vec()
        .into_iter()
        .map(|v| HeaderValue::try_from(v).map_err(|_| Error::invalid_header(field)))
        .collect::<Result<Vec<_>, _>>()?;
    Ok((name, values))
}

/// Parses a `Content-Length` value. Empty means "not set"; anything that is
/// not a plain decimal integer is an error rather than a silent zero.
pub(crate) fn parse_length(value: &str) -> Result<Option<u64>, Error> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(None);
    }
    value
        .parse::<u64>()
        .map(Some)
        .map_err(|_| Error::invalid_length(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_ignores_case_and_defaults_to_empty() {
        let mut headers = Headers::new();
        headers.set("Content-Type", "text/plain").unwrap();
        assert_eq!(headers.get("content-type"), "text/plain");
        assert_eq!(headers.get("CONTENT-TYPE"), "text/plain");
        assert_eq!(headers.get("x-missing"), "");
        assert!(!headers.has("x-missing"));
    }

    #[test]
    fn set_replaces_and_accepts_lists() {
        let mut headers = Headers::new();
        headers.set("x-tag", "one").unwrap();
        headers.set("x-tag", ["two", "three"]).unwrap();
        assert_eq!(headers.get_all("x-tag"), vec!["two", "three"]);
        headers.set("content-length", 42u64).unwrap();
        assert_eq!(headers.get("content-length"), "42");
    }

    #[test]
    fn append_merges_with_existing_values() {
        let mut headers = Headers::new();
        headers.append("link", "<a>").unwrap();
        headers.append("link", vec!["<b>", "<c>"]).unwrap();
        assert_eq!(headers.get_all("link"), vec!["<a>", "<b>", "<c>"]);
        assert_eq!(headers.get("link"), "<a>");
    }

    #[test]
    fn bulk_set() {
        let mut headers = Headers::new();
        headers.set_all([("x-a", "1"), ("x-b", "2")]).unwrap();
        assert_eq!(headers.len(), 2);
        assert_eq!(headers.get("x-b"), "2");
    }

    #[test]
    fn mutations_after_send_are_ignored() {
        let mut headers = Headers::new();
        headers.set("x-before", "1").unwrap();
        headers.mark_sent();
        headers.set("x-after", "1").unwrap();
        headers.append("x-before", "2").unwrap();
        headers.remove("x-before");
        headers.clear();
        assert_eq!(headers.get_all("x-before"), vec!["1"]);
        assert!(!headers.has("x-after"));
    }

    #[test]
    fn invalid_fields_are_errors() {
        let mut headers = Headers::new();
        assert!(headers.set("bad header", "x").is_err());
        assert!(headers.set("x-ok", "line\nbreak").is_err());
    }

    #[test]
    fn serializes_repeated_fields_as_arrays() {
        let mut headers = Headers::new();
        headers.set("x-one", "1").unwrap();
        headers.set("x-many", ["a", "b"]).unwrap();
        let json = serde_json::to_value(&headers).unwrap();
        assert_eq!(json["x-one"], "1");
        assert_eq!(json["x-many"], serde_json::json!(["a", "b"]));
    }

    #[test]
    fn length_parsing_rejects_garbage() {
        assert_eq!(parse_length("").unwrap(), None);
        assert_eq!(parse_length(" 12 ").unwrap(), Some(12));
        assert!(parse_length("1.5").is_err());
        assert!(parse_length("abc").is_err());
    }
}
