//! Response body variants.
//!
//! Each variant carries its own serialization rule, applied when the
//! response is finalized:
//!
//! | Variant  | Inferred type               | Length known up front |
//! |----------|-----------------------------|-----------------------|
//! | `Text`   | `text/html` or `text/plain` | yes                   |
//! | `Bytes`  | `application/octet-stream`  | yes                   |
//! | `Stream` | `application/octet-stream`  | no                    |
//! | `Json`   | `application/json`          | after serializing     |

use std::fmt;
use std::io;
use std::pin::Pin;

use bytes::Bytes;
use futures_util::Stream;
use serde::Serialize;

use crate::error::Error;

/// A boxed stream of body chunks.
pub type BodyStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send + 'static>>;

/// The body of an outgoing response.
#[derive(Default)]
pub enum Body {
    #[default]
    Empty,
    Text(String),
    Bytes(Bytes),
    Stream(BodyStream),
    Json(serde_json::Value),
}

impl Body {
    /// A streaming body; chunks are written as they arrive.
    pub fn stream<S>(stream: S) -> Self
    where
        S: Stream<Item = io::Result<Bytes>> + Send + 'static,
    {
        Self::Stream(Box::pin(stream))
    }

    /// A JSON body from any serializable value.
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self, Error> {
        Ok(Self::Json(serde_json::to_value(value)?))
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Raw bytes of a `Text` or `Bytes` body.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Text(text)   => Some(text.as_bytes()),
            Self::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }

    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Json(value) => Some(value),
            _ => None,
        }
    }

    /// Byte length where it can be known without consuming the body.
    pub(crate) fn byte_len(&self) -> Option<u64> {
        match self {
            Self::Text(text)   => Some(text.len() as u64),
            Self::Bytes(bytes) => Some(bytes.len() as u64),
            Self::Json(value)  => serde_json::to_vec(value).ok().map(|v| v.len() as u64),
            Self::Empty | Self::Stream(_) => None,
        }
    }

    /// Short type name used when no `Content-Type` has been set.
    pub(crate) fn inferred_type(&self) -> Option<&'static str> {
        match self {
            Self::Text(text) if looks_like_html(text) => Some("html"),
            Self::Text(_)                             => Some("text"),
            Self::Bytes(_) | Self::Stream(_)          => Some("bin"),
            Self::Json(_)                             => Some("json"),
            Self::Empty                               => None,
        }
    }

    /// Serialized payload for every variant except `Stream` and `Empty`.
    pub(crate) fn to_payload(&self) -> Result<Option<Bytes>, Error> {
        Ok(match self {
            Self::Text(text)   => Some(Bytes::from(text.clone())),
            Self::Bytes(bytes) => Some(bytes.clone()),
            Self::Json(value)  => Some(Bytes::from(serde_json::to_vec(value)?)),
            Self::Empty | Self::Stream(_) => None,
        })
    }
}

fn looks_like_html(text: &str) -> bool {
    text.trim_start().starts_with('<')
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty        => f.write_str("Empty"),
            Self::Text(text)   => f.debug_tuple("Text").field(text).finish(),
            Self::Bytes(bytes) => f.debug_tuple("Bytes").field(bytes).finish(),
            Self::Stream(_)    => f.write_str("Stream(..)"),
            Self::Json(value)  => f.debug_tuple("Json").field(value).finish(),
        }
    }
}

// ── Conversions ───────────────────────────────────────────────────────────────

impl From<&str> for Body {
    fn from(text: &str) -> Self { Self::Text(text.to_owned()) }
}

impl From<String> for Body {
    fn from(text: String) -> Self { Self::Text(text) }
}

impl From<Vec<u8>> for Body {
    fn from(bytes: Vec<u8>) -> Self { Self::Bytes(Bytes::from(bytes)) }
}

impl From<&'static [u8]> for Body {
    fn from(bytes: &'static [u8]) -> Self { Self::Bytes(Bytes::from_static(bytes)) }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self { Self::Bytes(bytes) }
}

impl From<serde_json::Value> for Body {
    fn from(value: serde_json::Value) -> Self { Self::Json(value) }
}

/// `None` is an empty body.
impl<T: Into<Body>> From<Option<T>> for Body {
    fn from(body: Option<T>) -> Self {
        body.map_or(Self::Empty, Into::into)
    }
}
