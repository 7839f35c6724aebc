//! Raw request/response handles.
//!
//! These are the transport-level objects the facades wrap. A [`RawRequest`]
//! is plain data. A [`RawResponse`] is a small state machine around the
//! connection:
//!
//! ```text
//!   Pending ──flush_headers──▶ Streaming ──end──▶ (finished)
//!      │                          │
//!      └──────────end/pipe────────┴──────────────▶ (finished)
//! ```
//!
//! A response built with [`RawResponse::detached`] has no connection at all;
//! it accepts every write and discards the bytes, which is what tests and
//! in-process dispatch want.
//!
//! A completion hook installed with [`RawResponse::on_abort`] fires once if
//! the transport drops the body before its last frame, which is how a peer
//! hanging up mid-response is noticed.

use std::convert::Infallible;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::{StreamExt, TryStreamExt, stream};
use http::{Method, StatusCode, Version};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Empty, Full, StreamBody};
use hyper::body::{Body as _, Frame, SizeHint};
use hyper::ext::ReasonPhrase;
use tokio::sync::{mpsc, oneshot};

use crate::body::BodyStream;
use crate::error::Error;
use crate::header::{FieldValue, Headers};

/// Incoming request body.
pub type RequestBody = UnsyncBoxBody<Bytes, Box<dyn std::error::Error + Send + Sync>>;

/// Outgoing response body handed to the transport.
pub type ResponseBody = UnsyncBoxBody<Bytes, io::Error>;

/// Resolves with the response head (and body) once it is written.
pub type ResponseReceiver = oneshot::Receiver<http::Response<ResponseBody>>;

/// Runs its hook at most once, and never after being disarmed.
struct AbortHook {
    hook: Box<dyn Fn() + Send + Sync>,
    armed: AtomicBool,
}

impl AbortHook {
    fn fire(&self) {
        if self.armed.swap(false, Ordering::SeqCst) {
            (self.hook)();
        }
    }

    fn disarm(&self) {
        self.armed.store(false, Ordering::SeqCst);
    }
}

const CHANNEL_CAPACITY: usize = 16;

// ── RawRequest ────────────────────────────────────────────────────────────────

/// An incoming request as the transport delivered it.
pub struct RawRequest {
    pub(crate) method: Method,
    pub(crate) url: String,
    pub(crate) version: Version,
    pub(crate) headers: Headers,
    pub(crate) authority: Option<String>,
    pub(crate) remote_addr: Option<SocketAddr>,
    pub(crate) encrypted: bool,
    pub(crate) body: Option<RequestBody>,
}

impl RawRequest {
    /// An HTTP/1.1 request with no headers and no body.
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            version: Version::HTTP_11,
            headers: Headers::new(),
            authority: None,
            remote_addr: None,
            encrypted: false,
            body: None,
        }
    }

    /// Converts an `http::Request`.
    ///
    /// HTTP/2 requests carry the host in the `:authority` pseudo-header and an
    /// absolute URI; the URL keeps only the path and query, and the authority
    /// is kept separately.
    pub fn from_http<B>(req: http::Request<B>) -> Self
    where
        B: hyper::body::Body<Data = Bytes> + Send + 'static,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let (parts, body) = req.into_parts();
        let (url, authority) = if parts.version >= Version::HTTP_2 {
            let url = parts
                .uri
                .path_and_query()
                .map_or_else(|| "/".to_owned(), |pq| pq.as_str().to_owned());
            (url, parts.uri.authority().map(|a| a.as_str().to_owned()))
        } else {
            (parts.uri.to_string(), None)
        };

        Self {
            method: parts.method,
            url,
            version: parts.version,
            headers: Headers::from(parts.headers),
            authority,
            remote_addr: None,
            encrypted: parts.uri.scheme_str() == Some("https"),
            body: Some(body.map_err(Into::into).boxed_unsync()),
        }
    }

    /// Adds a header.
    ///
    /// # Panics
    ///
    /// Panics if the name or value is not a valid header field.
    pub fn with_header(mut self, field: &str, value: impl Into<FieldValue>) -> Self {
        self.headers.append(field, value).expect("invalid header");
        self
    }

    pub fn with_version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    /// Sets the HTTP/2 `:authority`.
    pub fn with_authority(mut self, authority: impl Into<String>) -> Self {
        self.authority = Some(authority.into());
        self
    }

    pub fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    /// Marks the request as received over TLS.
    pub fn with_encrypted(mut self, encrypted: bool) -> Self {
        self.encrypted = encrypted;
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        let body = Full::new(body.into())
            .map_err(|never: Infallible| -> Box<dyn std::error::Error + Send + Sync> { match never {} })
            .boxed_unsync();
        self.body = Some(body);
        self
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }
}

// ── RawResponse ───────────────────────────────────────────────────────────────

enum Conn {
    Detached,
    Pending(oneshot::Sender<http::Response<ResponseBody>>),
    Streaming(mpsc::Sender<io::Result<Frame<Bytes>>>),
    Closed,
}

/// An outgoing response and the connection it will be written to.
pub struct RawResponse {
    status: u16,
    reason: Option<String>,
    headers: Headers,
    finished: bool,
    conn: Conn,
    on_abort: Option<Arc<AbortHook>>,
}

impl RawResponse {
    /// A response with no connection. Every write succeeds and goes nowhere.
    pub fn detached() -> Self {
        Self::with_conn(Conn::Detached)
    }

    /// A response whose head and body are delivered through the returned
    /// receiver.
    pub fn channel() -> (Self, ResponseReceiver) {
        let (tx, rx) = oneshot::channel();
        (Self::with_conn(Conn::Pending(tx)), rx)
    }

    fn with_conn(conn: Conn) -> Self {
        Self {
            status: 200,
            reason: None,
            headers: Headers::new(),
            finished: false,
            conn,
            on_abort: None,
        }
    }

    /// Installs the hook run when the transport drops the body unfinished.
    ///
    /// With a hook in place, writes into a stream the peer has abandoned are
    /// discarded instead of failing; the hook reports the loss once.
    pub fn on_abort<F>(&mut self, hook: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_abort = Some(Arc::new(AbortHook { hook: Box::new(hook), armed: AtomicBool::new(true) }));
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    /// Callers validate the range.
    pub(crate) fn set_status(&mut self, status: u16) {
        self.status = status;
    }

    /// The custom reason phrase, if one was set.
    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    pub(crate) fn set_reason(&mut self, reason: Option<String>) {
        self.reason = reason;
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    pub fn headers_sent(&self) -> bool {
        self.headers.is_sent()
    }

    /// `true` once the response has been ended.
    pub fn finished(&self) -> bool {
        self.finished
    }

    /// Whether a write could still reach the peer.
    pub fn writable(&self) -> bool {
        if self.finished {
            return false;
        }
        match &self.conn {
            Conn::Detached      => true,
            Conn::Pending(tx)   => !tx.is_closed(),
            Conn::Streaming(tx) => !tx.is_closed(),
            Conn::Closed        => false,
        }
    }

    /// Sends the status line and headers now. The body follows through
    /// [`end`](Self::end) or [`pipe`](Self::pipe).
    pub fn flush_headers(&mut self) -> Result<(), Error> {
        if self.headers.is_sent() {
            return Ok(());
        }
        match std::mem::replace(&mut self.conn, Conn::Closed) {
            Conn::Pending(tx) => {
                let (chunks, rx) = mpsc::channel(CHANNEL_CAPACITY);
                let frames = stream::unfold(rx, |mut rx| async move {
                    rx.recv().await.map(|frame| (frame, rx))
                });
                let head = self.head(StreamBody::new(frames).boxed_unsync());
                self.headers.mark_sent();
                self.hand_over(tx, head)?;
                self.conn = Conn::Streaming(chunks);
                Ok(())
            }
            Conn::Detached => {
                self.headers.mark_sent();
                self.conn = Conn::Detached;
                Ok(())
            }
            other => {
                self.conn = other;
                Ok(())
            }
        }
    }

    /// Writes the last (or only) piece of the body and finishes the response.
    pub async fn end(&mut self, payload: Option<Bytes>) -> Result<(), Error> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        match std::mem::replace(&mut self.conn, Conn::Closed) {
            Conn::Detached => {
                self.headers.mark_sent();
                self.conn = Conn::Detached;
                Ok(())
            }
            Conn::Pending(tx) => {
                let body = match payload {
                    Some(bytes) => Full::new(bytes).map_err(never).boxed_unsync(),
                    None => Empty::new().map_err(never).boxed_unsync(),
                };
                let head = self.head(body);
                self.headers.mark_sent();
                self.hand_over(tx, head)
            }
            Conn::Streaming(chunks) => match payload {
                Some(bytes) => match chunks.send(Ok(Frame::data(bytes))).await {
                    Ok(()) => Ok(()),
                    Err(_) => self.peer_gone(),
                },
                None => Ok(()),
            },
            Conn::Closed => Err(Error::closed()),
        }
    }

    /// Streams `body` to the peer and finishes the response.
    ///
    /// A chunk error aborts the body. It is not returned here; wrap the stream
    /// to observe it.
    pub async fn pipe(&mut self, mut body: BodyStream) -> Result<(), Error> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        match std::mem::replace(&mut self.conn, Conn::Closed) {
            Conn::Detached => {
                self.headers.mark_sent();
                self.conn = Conn::Detached;
                while let Some(Ok(_)) = body.next().await {}
                Ok(())
            }
            Conn::Pending(tx) => {
                let head = self.head(StreamBody::new(body.map_ok(Frame::data)).boxed_unsync());
                self.headers.mark_sent();
                self.hand_over(tx, head)
            }
            Conn::Streaming(chunks) => {
                while let Some(chunk) = body.next().await {
                    let failed = chunk.is_err();
                    if chunks.send(chunk.map(Frame::data)).await.is_err() {
                        return self.peer_gone();
                    }
                    if failed {
                        break;
                    }
                }
                Ok(())
            }
            Conn::Closed => Err(Error::closed()),
        }
    }

    /// A head the transport never took has no body to watch, so the caller
    /// reports the failure instead of the hook.
    fn hand_over(
        &self,
        tx: oneshot::Sender<http::Response<ResponseBody>>,
        head: http::Response<ResponseBody>,
    ) -> Result<(), Error> {
        match tx.send(head) {
            Ok(()) => Ok(()),
            Err(head) => {
                if let Some(abort) = &self.on_abort {
                    abort.disarm();
                }
                drop(head);
                Err(Error::closed())
            }
        }
    }

    /// The abort hook already reports a vanished peer.
    fn peer_gone(&self) -> Result<(), Error> {
        match self.on_abort {
            Some(_) => Ok(()),
            None => Err(Error::closed()),
        }
    }

    fn head(&self, body: ResponseBody) -> http::Response<ResponseBody> {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        // The transport never polls a body for these, so there is nothing to watch.
        let bodiless = status.is_informational()
            || status == StatusCode::NO_CONTENT
            || status == StatusCode::NOT_MODIFIED;
        let body = match &self.on_abort {
            Some(abort) if !bodiless => Watched { inner: body, abort: Some(Arc::clone(abort)) }.boxed_unsync(),
            _ => body,
        };
        let mut res = http::Response::new(body);
        *res.status_mut() = status;
        *res.headers_mut() = self.headers.as_map().clone();
        if let Some(reason) = self.reason.as_ref().filter(|r| Some(r.as_str()) != status.canonical_reason()) {
            if let Ok(reason) = ReasonPhrase::try_from(reason.clone()) {
                res.extensions_mut().insert(reason);
            }
        }
        res
    }
}

impl Default for RawResponse {
    fn default() -> Self {
        Self::detached()
    }
}

fn never(never: Infallible) -> io::Error {
    match never {}
}

/// A response body that runs its hook when dropped before the end.
struct Watched {
    inner: ResponseBody,
    abort: Option<Arc<AbortHook>>,
}

impl hyper::body::Body for Watched {
    type Data = Bytes;
    type Error = io::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Bytes>, io::Error>>> {
        let this = self.get_mut();
        let polled = Pin::new(&mut this.inner).poll_frame(cx);
        // A chunk error is reported where the stream is read.
        if matches!(polled, Poll::Ready(None) | Poll::Ready(Some(Err(_)))) {
            this.abort = None;
        }
        polled
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl Drop for Watched {
    fn drop(&mut self) {
        if self.inner.is_end_stream() {
            return;
        }
        if let Some(abort) = self.abort.take() {
            abort.fire();
        }
    }
}
