//! Unified error type.

use std::fmt;
use std::io;

pub(crate) type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// The error type returned by middleware and by strata's fallible operations.
///
/// An error built with [`Error::new`] or [`Error::from_status`] carries an
/// HTTP status and decides what the client sees once it reaches the root of
/// the pipeline. Every other kind (I/O, JSON, a broken middleware contract)
/// is answered with `500` and a bare reason phrase; its details only go to
/// the error channel.
#[derive(Debug)]
pub struct Error {
    kind: Kind,
    expose: bool,
    headers: Vec<(String, String)>,
}

#[derive(Debug)]
enum Kind {
    Http { status: u16, message: String },
    NextCalledTwice,
    InvalidStatus(u16),
    InvalidHeader(String),
    InvalidLength(String),
    Config(String),
    Closed,
    Panic(String),
    Io(io::Error),
    Json(serde_json::Error),
    Other(BoxError),
}

impl Error {
    /// An HTTP error with a status and a message.
    ///
    /// Client errors (status below 500) are exposed: their message becomes
    /// the response body. Server errors are not, unless overridden with
    /// [`Error::with_expose`].
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            kind: Kind::Http { status, message: message.into() },
            expose: status < 500,
            headers: Vec::new(),
        }
    }

    /// An HTTP error whose message is the standard reason phrase.
    pub fn from_status(status: u16) -> Self {
        match crate::status::reason(status) {
            Some(reason) => Self::new(status, reason),
            None => Self::new(status, status.to_string()),
        }
    }

    /// Wraps any other error. Reported as `500`, never exposed.
    pub fn other(err: impl Into<BoxError>) -> Self {
        Self::from_kind(Kind::Other(err.into()))
    }

    /// Adds a header to send along with the error response.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Overrides whether the message is safe to show to the client.
    pub fn with_expose(mut self, expose: bool) -> Self {
        self.expose = expose;
        self
    }

    pub(crate) fn next_called_twice() -> Self {
        Self::from_kind(Kind::NextCalledTwice)
    }

    pub(crate) fn invalid_status(code: u16) -> Self {
        Self::from_kind(Kind::InvalidStatus(code))
    }

    pub(crate) fn invalid_header(field: &str) -> Self {
        Self::from_kind(Kind::InvalidHeader(field.to_owned()))
    }

    pub(crate) fn invalid_length(value: &str) -> Self {
        Self::from_kind(Kind::InvalidLength(value.to_owned()))
    }

    pub(crate) fn config(message: impl Into<String>) -> Self {
        Self::from_kind(Kind::Config(message.into()))
    }

    pub(crate) fn closed() -> Self {
        Self::from_kind(Kind::Closed)
    }

    pub(crate) fn panic(message: impl Into<String>) -> Self {
        Self::from_kind(Kind::Panic(message.into()))
    }

    fn from_kind(kind: Kind) -> Self {
        Self { kind, expose: false, headers: Vec::new() }
    }

    /// The HTTP status this error asks for, if it carries one.
    pub fn status(&self) -> Option<u16> {
        match self.kind {
            Kind::Http { status, .. } => Some(status),
            _ => None,
        }
    }

    /// Whether the message may be written to the response body.
    pub fn expose(&self) -> bool {
        self.expose
    }

    /// Headers to set on the error response.
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }

    /// `true` when a middleware invoked its `next` continuation twice.
    pub fn is_next_called_twice(&self) -> bool {
        matches!(self.kind, Kind::NextCalledTwice)
    }

    /// `true` when the peer went away before the response was written.
    pub fn is_closed(&self) -> bool {
        matches!(self.kind, Kind::Closed)
    }

    /// `true` for an I/O error of kind `NotFound` (a missing file, usually).
    pub fn is_not_found(&self) -> bool {
        matches!(&self.kind, Kind::Io(e) if e.kind() == io::ErrorKind::NotFound)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            Kind::Http { message, .. } => f.write_str(message),
            Kind::NextCalledTwice      => f.write_str("next() called multiple times"),
            Kind::InvalidStatus(code)  => write!(f, "invalid status code: {code}"),
            Kind::InvalidHeader(field) => write!(f, "invalid header: {field}"),
            Kind::InvalidLength(value) => write!(f, "invalid content-length: {value:?}"),
            Kind::Config(message)      => write!(f, "config: {message}"),
            Kind::Closed               => f.write_str("connection closed before the response was written"),
            Kind::Panic(message)       => write!(f, "middleware panicked: {message}"),
            Kind::Io(e)                => write!(f, "io: {e}"),
            Kind::Json(e)              => write!(f, "json: {e}"),
            Kind::Other(e)             => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.kind {
            Kind::Io(e)    => Some(e),
            Kind::Json(e)  => Some(e),
            Kind::Other(e) => Some(e.as_ref()),
            _              => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Self::from_kind(Kind::Io(e))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::from_kind(Kind::Json(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_errors_are_exposed_server_errors_are_not() {
        assert!(Error::new(400, "bad input").expose());
        assert!(!Error::new(500, "db down").expose());
        assert!(Error::new(503, "maintenance").with_expose(true).expose());
    }

    #[test]
    fn from_status_uses_reason_phrase() {
        let err = Error::from_status(418);
        assert_eq!(err.status(), Some(418));
        assert_eq!(err.to_string(), "I'm a Teapot");
    }

    #[test]
    fn non_http_errors_have_no_status() {
        let err = Error::from(io::Error::new(io::ErrorKind::NotFound, "gone"));
        assert_eq!(err.status(), None);
        assert!(err.is_not_found());
        assert!(!err.expose());
    }

    #[test]
    fn next_called_twice_message() {
        let err = Error::next_called_twice();
        assert!(err.is_next_called_twice());
        assert_eq!(err.to_string(), "next() called multiple times");
    }
}
