//! Media type lookup and matching.
//!
//! Accepts the three spellings middleware tends to use for a type:
//! a short name (`json`), an extension or file name (`.png`, `report.pdf`)
//! or a full MIME type (`text/plain; charset=latin1`).

use mime_guess::mime::{self, Mime};

/// Result of matching a content type against a list of candidates.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TypeMatch {
    /// The message has no body, so it has no type to match.
    NoBody,
    /// There is a body, but none of the candidates matched.
    Mismatch,
    /// The first candidate that matched, or the actual type for wildcard and
    /// `+suffix` candidates.
    Type(String),
}

/// Resolves a short name or extension to a MIME essence.
pub fn lookup(name: &str) -> Option<String> {
    if name.contains('/') {
        return name.parse::<Mime>().ok().map(|m| m.essence_str().to_owned());
    }
    let ext = name.rsplit('.').next().unwrap_or(name).to_ascii_lowercase();
    let known = match ext.as_str() {
        "bin"         => Some("application/octet-stream"),
        "html"        => Some("text/html"),
        "json"        => Some("application/json"),
        "text" | "txt" => Some("text/plain"),
        "xml"         => Some("application/xml"),
        "urlencoded"  => Some("application/x-www-form-urlencoded"),
        ""            => return None,
        _             => None,
    };
    known
        .or_else(|| mime_guess::from_ext(&ext).first_raw())
        .map(str::to_owned)
}

/// A full `Content-Type` value for `input`, with `charset=utf-8` added for
/// textual types that do not name a charset.
pub fn content_type(input: &str) -> Option<String> {
    let value = if input.contains('/') {
        input.parse::<Mime>().ok()?;
        input.trim().to_owned()
    } else {
        lookup(input)?
    };
    let parsed: Mime = value.parse().ok()?;
    if parsed.get_param(mime::CHARSET).is_none() && is_textual(&parsed) {
        Some(format!("{value}; charset=utf-8"))
    } else {
        Some(value)
    }
}

fn is_textual(m: &Mime) -> bool {
    m.type_() == mime::TEXT
        || matches!(m.essence_str(), "application/json" | "application/javascript")
}

/// The essence of a `Content-Type` value: lowercased, parameters dropped.
pub fn essence(value: &str) -> Option<String> {
    let essence = value.split(';').next()?.trim().to_ascii_lowercase();
    let (ty, sub) = essence.split_once('/')?;
    if ty.is_empty() || sub.is_empty() {
        return None;
    }
    Some(essence)
}

/// Matches the `Content-Type` value `actual` against `types`.
///
/// With no candidates, returns the actual essence. Returns `None` when
/// `actual` is not a valid type or nothing matches.
pub fn type_is(actual: &str, types: &[&str]) -> Option<String> {
    let actual = essence(actual)?;
    if types.is_empty() {
        return Some(actual);
    }
    for &candidate in types {
        let Some(expected) = normalize(candidate) else { continue };
        if matches(&expected, &actual) {
            return Some(if candidate.starts_with('+') || candidate.contains('*') {
                actual
            } else {
                candidate.to_owned()
            });
        }
    }
    None
}

fn normalize(candidate: &str) -> Option<String> {
    match candidate {
        "urlencoded" => Some("application/x-www-form-urlencoded".to_owned()),
        "multipart"  => Some("multipart/*".to_owned()),
        c if c.starts_with('+') => Some(format!("*/*{c}")),
        c if c.contains('/') => Some(c.to_ascii_lowercase()),
        c => lookup(c),
    }
}

fn matches(expected: &str, actual: &str) -> bool {
    let (Some((ety, esub)), Some((aty, asub))) = (expected.split_once('/'), actual.split_once('/')) else {
        return false;
    };
    if ety != "*" && ety != aty {
        return false;
    }
    match esub.strip_prefix('*') {
        Some("") => true,
        Some(suffix) if suffix.starts_with('+') => asub.len() > suffix.len() && asub.ends_with(suffix),
        _ => esub == asub,
    }
}
