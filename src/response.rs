//! The response facade.
//!
//! Status, body, `Content-Type` and `Content-Length` constrain each other.
//! [`Response`] keeps them consistent whichever one middleware touches:
//!
//! | Change                          | Also happens                                        |
//! |---------------------------------|-----------------------------------------------------|
//! | status set to 204, 205 or 304   | body emptied, type/length/transfer-encoding removed |
//! | empty body on any other status  | status becomes 204, same headers removed            |
//! | body set, status never set      | status becomes 200                                  |
//! | body set, no `Content-Type` yet | type inferred from the body                         |
//! | text or bytes body              | `Content-Length` set from the byte length           |
//! | JSON body                       | `Content-Length` removed until serialized           |
//!
//! Once the headers are on the wire every mutator silently does nothing.

use std::fmt;
use std::path::Path;
use std::time::SystemTime;

use http::header::{CONTENT_LENGTH, HeaderValue};
use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use serde::Serialize;

use crate::body::Body;
use crate::disposition::{self, AttachmentOptions};
use crate::error::Error;
use crate::header::{self, FieldValue, Headers};
use crate::media::{self, TypeMatch};
use crate::status;
use crate::transport::RawResponse;

/// Characters escaped in a `Location` header.
const LOCATION: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'<')
    .add(b'>')
    .add(b'\\')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// The response side of a [`Context`](crate::Context).
pub struct Response {
    raw: RawResponse,
    body: Body,
    explicit_status: bool,
    explicit_empty: bool,
}

impl Response {
    pub(crate) fn new(raw: RawResponse) -> Self {
        Self {
            raw,
            body: Body::Empty,
            explicit_status: false,
            explicit_empty: false,
        }
    }

    // ── Status ────────────────────────────────────────────────────────────────

    pub fn status(&self) -> u16 {
        self.raw.status()
    }

    /// Sets the status code and resets the reason phrase to the standard one.
    ///
    /// Codes outside `100..=999` are rejected.
    pub fn set_status(&mut self, code: u16) -> Result<(), Error> {
        if self.raw.headers_sent() {
            return Ok(());
        }
        if !(100..=999).contains(&code) {
            return Err(Error::invalid_status(code));
        }
        self.explicit_status = true;
        self.raw.set_status(code);
        self.raw.set_reason(None);
        if status::is_empty(code) {
            self.clear_body();
        }
        Ok(())
    }

    /// Status without marking it explicit; used for the initial 404.
    pub(crate) fn set_default_status(&mut self, code: u16) {
        self.raw.set_status(code);
    }

    /// `true` once middleware has set a status.
    pub fn explicit_status(&self) -> bool {
        self.explicit_status
    }

    /// The reason phrase: the custom one if set, else the standard one.
    pub fn message(&self) -> &str {
        self.raw
            .reason()
            .or_else(|| status::reason(self.status()))
            .unwrap_or("")
    }

    pub fn set_message(&mut self, message: impl Into<String>) {
        if !self.raw.headers_sent() {
            self.raw.set_reason(Some(message.into()));
        }
    }

    // ── Body ──────────────────────────────────────────────────────────────────

    pub fn body(&self) -> &Body {
        &self.body
    }

    /// Replaces the body, keeping status and headers consistent with it.
    pub fn set_body(&mut self, body: impl Into<Body>) {
        if self.raw.headers_sent() {
            return;
        }
        let body = body.into();

        if body.is_empty() {
            if !status::is_empty(self.status()) {
                self.explicit_status = true;
                self.raw.set_status(204);
                self.raw.set_reason(None);
            }
            self.clear_body();
            return;
        }

        // A body-forbidden status that was set on purpose wins over the body.
        if self.explicit_status && status::is_empty(self.status()) {
            self.clear_body();
            return;
        }

        let replacing = !self.body.is_empty();
        self.explicit_empty = false;
        if !self.explicit_status {
            self.explicit_status = true;
            self.raw.set_status(200);
            self.raw.set_reason(None);
        }

        if !self.has("content-type") {
            if let Some(kind) = body.inferred_type() {
                self.set_type(kind);
            }
        }
        match &body {
            Body::Text(_) | Body::Bytes(_) => {
                if let Some(len) = body.byte_len() {
                    self.set_length(len);
                }
            }
            Body::Stream(_) => {
                if replacing {
                    self.remove("content-length");
                }
            }
            Body::Json(_) => self.remove("content-length"),
            Body::Empty => {}
        }
        self.body = body;
    }

    /// Serializes `value` as the JSON body.
    pub fn set_json<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), Error> {
        self.set_body(Body::json(value)?);
        Ok(())
    }

    /// Takes the body out, leaving it empty without touching status or
    /// headers.
    pub fn take_body(&mut self) -> Body {
        std::mem::take(&mut self.body)
    }

    /// `true` when the body was emptied on purpose rather than never set.
    pub(crate) fn explicit_empty(&self) -> bool {
        self.explicit_empty
    }

    fn clear_body(&mut self) {
        self.body = Body::Empty;
        self.explicit_empty = true;
        self.remove("content-type");
        self.remove("content-length");
        self.remove("transfer-encoding");
    }

    // ── Length and type ───────────────────────────────────────────────────────

    /// `Content-Length` if set, else the body's byte length where it is
    /// known. A malformed header is an error.
    pub fn length(&self) -> Result<Option<u64>, Error> {
        if self.has("content-length") {
            return header::parse_length(self.get("content-length"));
        }
        Ok(self.body.byte_len())
    }

    /// Ignored while `Transfer-Encoding` is set.
    pub fn set_length(&mut self, len: u64) {
        if !self.has("transfer-encoding") {
            self.raw.headers_mut().insert(CONTENT_LENGTH, HeaderValue::from(len));
        }
    }

    /// The `Content-Type` without parameters, `""` when unset.
    pub fn content_type(&self) -> &str {
        self.get("content-type").split(';').next().unwrap_or("").trim()
    }

    /// Sets `Content-Type` from a short name (`json`), an extension
    /// (`.png`) or a MIME type. Input that resolves to nothing removes the
    /// header.
    pub fn set_type(&mut self, input: &str) {
        let applied = match media::content_type(input) {
            Some(value) => self.set("content-type", value).is_ok(),
            None => false,
        };
        if !applied {
            self.remove("content-type");
        }
    }

    /// Matches the response `Content-Type` against `types`.
    pub fn is(&self, types: &[&str]) -> TypeMatch {
        match media::type_is(self.get("content-type"), types) {
            Some(matched) => TypeMatch::Type(matched),
            None => TypeMatch::Mismatch,
        }
    }

    // ── Redirects and attachments ─────────────────────────────────────────────

    /// Points the client at `location`. The notice in the body is HTML when
    /// `html` is set, plain text otherwise.
    pub(crate) fn redirect(&mut self, location: &str, html: bool) -> Result<(), Error> {
        let encoded = utf8_percent_encode(location, LOCATION).to_string();
        self.set("location", encoded)?;
        if !status::is_redirect(self.status()) {
            self.set_status(302)?;
        }
        if html {
            let escaped = escape_html(location);
            self.set_type("text/html; charset=utf-8");
            self.set_body(format!("Redirecting to <a href=\"{escaped}\">{escaped}</a>."));
        } else {
            self.set_type("text/plain; charset=utf-8");
            self.set_body(format!("Redirecting to {location}."));
        }
        Ok(())
    }

    /// Marks the response as a download named `filename`, typed from its
    /// extension.
    pub fn attachment(&mut self, filename: Option<&str>, options: &AttachmentOptions) -> Result<(), Error> {
        if let Some(name) = filename {
            let ext = Path::new(name)
                .extension()
                .map(|ext| format!(".{}", ext.to_string_lossy()))
                .unwrap_or_default();
            self.set_type(&ext);
        }
        self.set("content-disposition", disposition::content_disposition(filename, options))
    }

    // ── Caching headers ───────────────────────────────────────────────────────

    /// Adds `field` to `Vary` unless it is already listed (or `Vary` is `*`).
    pub fn vary(&mut self, field: &str) -> Result<(), Error> {
        let mut fields: Vec<String> = self
            .get("vary")
            .split(',')
            .map(str::trim)
            .filter(|f| !f.is_empty())
            .map(str::to_owned)
            .collect();
        if fields.iter().any(|f| f == "*") {
            return Ok(());
        }
        for new in field.split(',').map(str::trim).filter(|f| !f.is_empty()) {
            if new == "*" {
                fields = vec!["*".to_owned()];
                break;
            }
            if !fields.iter().any(|f| f.eq_ignore_ascii_case(new)) {
                fields.push(new.to_owned());
            }
        }
        self.set("vary", fields.join(", "))
    }

    pub fn last_modified(&self) -> Option<SystemTime> {
        httpdate::parse_http_date(self.get("last-modified")).ok()
    }

    pub fn set_last_modified(&mut self, time: SystemTime) -> Result<(), Error> {
        self.set("last-modified", httpdate::fmt_http_date(time))
    }

    pub fn etag(&self) -> &str {
        self.get("etag")
    }

    /// Sets `ETag`, quoting a bare tag.
    pub fn set_etag(&mut self, tag: &str) -> Result<(), Error> {
        if tag.starts_with('"') || tag.starts_with("W/\"") {
            self.set("etag", tag)
        } else {
            self.set("etag", format!("\"{tag}\""))
        }
    }

    // ── Headers ───────────────────────────────────────────────────────────────

    pub fn get(&self, field: &str) -> &str {
        self.raw.headers().get(field)
    }

    pub fn has(&self, field: &str) -> bool {
        self.raw.headers().has(field)
    }

    pub fn set(&mut self, field: &str, value: impl Into<FieldValue>) -> Result<(), Error> {
        self.raw.headers_mut().set(field, value)
    }

    pub fn set_all<I, K, V>(&mut self, fields: I) -> Result<(), Error>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<FieldValue>,
    {
        self.raw.headers_mut().set_all(fields)
    }

    pub fn append(&mut self, field: &str, value: impl Into<FieldValue>) -> Result<(), Error> {
        self.raw.headers_mut().append(field, value)
    }

    pub fn remove(&mut self, field: &str) {
        self.raw.headers_mut().remove(field);
    }

    pub fn headers(&self) -> &Headers {
        self.raw.headers()
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        self.raw.headers_mut()
    }

    // ── Transport ─────────────────────────────────────────────────────────────

    pub fn headers_sent(&self) -> bool {
        self.raw.headers_sent()
    }

    pub fn writable(&self) -> bool {
        self.raw.writable()
    }

    /// Sends status and headers now; the body follows when the pipeline
    /// finishes.
    pub fn flush_headers(&mut self) -> Result<(), Error> {
        self.raw.flush_headers()
    }

    pub fn raw(&self) -> &RawResponse {
        &self.raw
    }

    pub fn raw_mut(&mut self) -> &mut RawResponse {
        &mut self.raw
    }

    /// A serializable summary: status, message and headers.
    pub fn snapshot(&self) -> ResponseSnapshot<'_> {
        ResponseSnapshot {
            status: self.status(),
            message: self.message(),
            header: self.headers(),
        }
    }
}

fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        match c {
            '&'  => out.push_str("&amp;"),
            '<'  => out.push_str("&lt;"),
            '>'  => out.push_str("&gt;"),
            '"'  => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c    => out.push(c),
        }
    }
    out
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status())
            .field("headers", self.headers())
            .field("body", &self.body)
            .finish()
    }
}

#[derive(Debug, Serialize)]
pub struct ResponseSnapshot<'a> {
    pub status: u16,
    pub message: &'a str,
    pub header: &'a Headers,
}
