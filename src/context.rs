//! The per-request context.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;
use tracing::warn;

use crate::app::Shared;
use crate::body::Body;
use crate::config::Config;
use crate::disposition::AttachmentOptions;
use crate::error::Error;
use crate::header::FieldValue;
use crate::request::{Request, RequestSnapshot};
use crate::response::{Response, ResponseSnapshot};
use crate::status;
use crate::transport::{RawRequest, RawResponse};

// ── State ─────────────────────────────────────────────────────────────────────

/// Values middleware hand to each other for the length of one request.
///
/// ```rust
/// # let mut state = strata::State::default();
/// state.insert("user", String::from("tobi"));
/// assert_eq!(state.get::<String>("user").map(String::as_str), Some("tobi"));
/// assert_eq!(state.get::<u32>("user"), None);
/// ```
#[derive(Default)]
pub struct State {
    values: HashMap<String, Box<dyn Any + Send + Sync>>,
}

impl State {
    /// Stores `value` under `key`, replacing whatever was there.
    pub fn insert<T: Any + Send + Sync>(&mut self, key: impl Into<String>, value: T) {
        self.values.insert(key.into(), Box::new(value));
    }

    /// The value under `key`, if there is one of type `T`.
    pub fn get<T: Any>(&self, key: &str) -> Option<&T> {
        self.values.get(key).and_then(|v| v.downcast_ref::<T>())
    }

    pub fn get_mut<T: Any>(&mut self, key: &str) -> Option<&mut T> {
        self.values.get_mut(key).and_then(|v| v.downcast_mut::<T>())
    }

    /// Removes and returns the value under `key` if it has type `T`.
    /// A value of another type stays where it is.
    pub fn remove<T: Any>(&mut self, key: &str) -> Option<T> {
        self.get::<T>(key)?;
        let value = self.values.remove(key)?;
        value.downcast::<T>().ok().map(|v| *v)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl fmt::Debug for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.values.keys()).finish()
    }
}

// ── Context ───────────────────────────────────────────────────────────────────

/// Everything one request's middleware share: the request, the response
/// being built, and a state bag.
///
/// Each request gets its own context; nothing in it is shared with other
/// requests except the read-only application [`Config`].
pub struct Context {
    pub request: Request,
    pub response: Response,
    pub state: State,
    /// When `false` the response is left alone after the pipeline finishes,
    /// for middleware that write to the raw response themselves.
    pub respond: bool,
    app: Arc<Shared>,
}

impl Context {
    pub(crate) fn new(req: RawRequest, res: RawResponse, app: Arc<Shared>) -> Self {
        Self {
            request: Request::new(req, Arc::clone(&app)),
            response: Response::new(res),
            state: State::default(),
            respond: true,
            app,
        }
    }

    pub(crate) fn shared(&self) -> &Arc<Shared> {
        &self.app
    }

    pub fn config(&self) -> &Config {
        &self.app.config
    }

    // ── Shorthands ────────────────────────────────────────────────────────────

    /// Request header value, `""` when absent.
    pub fn get(&self, field: &str) -> &str {
        self.request.get(field)
    }

    /// Sets a response header.
    pub fn set(&mut self, field: &str, value: impl Into<FieldValue>) -> Result<(), Error> {
        self.response.set(field, value)
    }

    pub fn method(&self) -> &http::Method {
        self.request.method()
    }

    pub fn url(&self) -> &str {
        self.request.url()
    }

    pub fn original_url(&self) -> &str {
        self.request.original_url()
    }

    pub fn path(&self) -> &str {
        self.request.path()
    }

    pub fn status(&self) -> u16 {
        self.response.status()
    }

    pub fn set_status(&mut self, code: u16) -> Result<(), Error> {
        self.response.set_status(code)
    }

    pub fn body(&self) -> &Body {
        self.response.body()
    }

    pub fn set_body(&mut self, body: impl Into<Body>) {
        self.response.set_body(body);
    }

    pub fn set_type(&mut self, input: &str) {
        self.response.set_type(input);
    }

    pub fn accepts(&self, types: &[&str]) -> Option<String> {
        self.request.accepts(types)
    }

    // ── Operations spanning request and response ─────────────────────────────

    /// `true` when the client's cached copy matches the response built so
    /// far.
    pub fn fresh(&self) -> bool {
        self.request.fresh(&self.response)
    }

    pub fn stale(&self) -> bool {
        !self.fresh()
    }

    /// Redirects to `location`. `"back"` means the `Referer`, else `alt`,
    /// else `/`. The notice is HTML when the client accepts it.
    pub fn redirect(&mut self, location: &str, alt: Option<&str>) -> Result<(), Error> {
        let target = if location == "back" {
            match self.request.get("referrer") {
                ""       => alt.unwrap_or("/").to_owned(),
                referrer => referrer.to_owned(),
            }
        } else {
            location.to_owned()
        };
        let html = self.request.accepts(&["html"]).is_some();
        self.response.redirect(&target, html)
    }

    pub fn attachment(&mut self, filename: Option<&str>, options: &AttachmentOptions) -> Result<(), Error> {
        self.response.attachment(filename, options)
    }

    /// `Ok` when `condition` holds, else an HTTP error to return with `?`.
    pub fn assert(&self, condition: bool, status: u16, message: &str) -> Result<(), Error> {
        if condition { Ok(()) } else { Err(Error::new(status, message)) }
    }

    /// Sends `err` to the error channel.
    pub fn emit(&self, err: &Error) {
        self.app.events.emit(err, Some(self));
    }

    /// Reports `err` and, if nothing has been sent yet, replaces the response
    /// with a plain-text error.
    ///
    /// The status comes from the error (a missing file is a 404, anything
    /// without a known status a 500). The body is the error message when it
    /// is safe to expose, else the standard reason phrase. Headers set by
    /// earlier middleware are dropped; headers carried by the error are kept.
    pub async fn on_error(&mut self, err: Error) {
        self.emit(&err);
        if self.response.headers_sent() || !self.response.writable() {
            return;
        }

        self.response.headers_mut().clear();
        for (field, value) in err.headers() {
            if let Err(e) = self.response.set(field, value.as_str()) {
                warn!(field = %field, "dropping error header: {e}");
            }
        }

        let code = match err.status() {
            Some(code) if status::reason(code).is_some() => code,
            None if err.is_not_found() => 404,
            _ => 500,
        };
        let message = if err.expose() {
            err.to_string()
        } else {
            status::reason(code).unwrap_or("").to_owned()
        };

        // `code` has a reason phrase, so it is in range.
        let _ = self.response.set_status(code);
        self.response.set_type("text");
        self.response.set_body(message.clone());
        let payload = (!status::is_empty(code)).then(|| Bytes::from(message));
        if let Err(e) = self.response.raw_mut().end(payload).await {
            self.emit(&e);
        }
    }

    /// A serializable summary of the request, the response and the app
    /// configuration.
    pub fn snapshot(&self) -> ContextSnapshot<'_> {
        ContextSnapshot {
            request: self.request.snapshot(),
            response: self.response.snapshot(),
            app: &self.app.config,
            original_url: self.request.original_url(),
        }
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("request", &self.request)
            .field("response", &self.response)
            .field("state", &self.state)
            .field("respond", &self.respond)
            .finish()
    }
}

#[derive(Debug, Serialize)]
pub struct ContextSnapshot<'a> {
    pub request: RequestSnapshot<'a>,
    pub response: ResponseSnapshot<'a>,
    pub app: &'a Config,
    pub original_url: &'a str,
}

#[cfg(test)]
pub(crate) fn test_context() -> Context {
    crate::App::new()
        .dispatcher()
        .context(RawRequest::new(http::Method::GET, "/"), RawResponse::detached())
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Method;

    fn context(raw: RawRequest) -> Context {
        crate::App::new().dispatcher().context(raw, RawResponse::detached())
    }

    #[test]
    fn state_is_typed() {
        let mut state = State::default();
        state.insert("count", 1u32);
        *state.get_mut::<u32>("count").unwrap() += 1;
        assert_eq!(state.get::<u32>("count"), Some(&2));
        assert_eq!(state.remove::<String>("count"), None);
        assert_eq!(state.remove::<u32>("count"), Some(2));
        assert!(state.is_empty());
    }

    #[test]
    fn new_context_defaults() {
        let ctx = test_context();
        assert_eq!(ctx.status(), 404);
        assert!(!ctx.response.explicit_status());
        assert!(ctx.respond);
        assert!(ctx.state.is_empty());
    }

    #[tokio::test]
    async fn error_with_a_bodiless_status_sends_no_body() {
        use http_body_util::BodyExt;

        let (res, rx) = RawResponse::channel();
        let mut ctx = crate::App::new()
            .on_error(|_, _| {})
            .dispatcher()
            .context(RawRequest::new(Method::GET, "/"), res);
        ctx.on_error(Error::new(304, "not modified")).await;

        let res = rx.await.unwrap();
        assert_eq!(res.status(), 304);
        assert!(res.headers().get("content-type").is_none());
        let body = res.into_body().collect().await.unwrap().to_bytes();
        assert!(body.is_empty());
    }

    #[test]
    fn redirect_back_falls_back() {
        let mut ctx = context(RawRequest::new(Method::GET, "/").with_header("accept", "text/plain"));
        ctx.redirect("back", Some("/home")).unwrap();
        assert_eq!(ctx.response.get("location"), "/home");
        assert_eq!(ctx.body().as_text(), Some("Redirecting to /home."));

        let mut ctx = context(RawRequest::new(Method::GET, "/"));
        ctx.redirect("back", None).unwrap();
        assert_eq!(ctx.response.get("location"), "/");
    }

    #[test]
    fn assert_builds_http_errors() {
        let ctx = test_context();
        assert!(ctx.assert(true, 401, "login").is_ok());
        let err = ctx.assert(false, 401, "login").unwrap_err();
        assert_eq!(err.status(), Some(401));
        assert!(err.expose());
    }

    #[tokio::test]
    async fn on_error_replaces_the_response() {
        let mut ctx = test_context();
        ctx.response.set("x-leftover", "1").unwrap();
        ctx.on_error(Error::new(422, "name is required").with_header("x-reason", "validation"))
            .await;

        assert_eq!(ctx.status(), 422);
        assert!(!ctx.response.has("x-leftover"));
        assert_eq!(ctx.response.get("x-reason"), "validation");
        assert_eq!(ctx.response.get("content-type"), "text/plain; charset=utf-8");
        assert_eq!(ctx.body().as_text(), Some("name is required"));
        assert!(ctx.response.raw().finished());
    }

    #[tokio::test]
    async fn on_error_hides_internal_messages() {
        let mut ctx = test_context();
        ctx.on_error(Error::other("database password is hunter2")).await;
        assert_eq!(ctx.status(), 500);
        assert_eq!(ctx.body().as_text(), Some("Internal Server Error"));
    }

    #[tokio::test]
    async fn on_error_maps_missing_files_and_unknown_codes() {
        let mut ctx = test_context();
        ctx.on_error(std::io::Error::new(std::io::ErrorKind::NotFound, "no such file").into())
            .await;
        assert_eq!(ctx.status(), 404);
        assert_eq!(ctx.body().as_text(), Some("Not Found"));

        let mut ctx = test_context();
        ctx.on_error(Error::new(299, "odd")).await;
        assert_eq!(ctx.status(), 500);
    }

    #[tokio::test]
    async fn on_error_after_headers_sent_only_reports() {
        let mut ctx = test_context();
        ctx.set_body("partial");
        ctx.response.flush_headers().unwrap();
        ctx.on_error(Error::new(500, "late")).await;
        assert_eq!(ctx.status(), 200);
        assert_eq!(ctx.body().as_text(), Some("partial"));
    }

    #[test]
    fn snapshot_serializes() {
        let ctx = context(RawRequest::new(Method::GET, "/x").with_header("accept", "*/*"));
        let json = serde_json::to_value(ctx.snapshot()).unwrap();
        assert_eq!(json["request"]["method"], "GET");
        assert_eq!(json["request"]["header"]["accept"], "*/*");
        assert_eq!(json["response"]["status"], 404);
        assert_eq!(json["original_url"], "/x");
        assert_eq!(json["app"]["env"], "development");
    }
}
