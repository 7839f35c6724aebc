//! Request dispatch and response finalization.
//!
//! One request, start to finish:
//!
//! 1. a fresh [`Context`] with status `404` (not yet explicit);
//! 2. the composed pipeline runs over it;
//! 3. on success [`respond`] writes whatever the pipeline left behind;
//! 4. on failure, or a panic, [`Context::on_error`] writes an error response;
//! 5. if the peer hangs up before the body is complete, a connection-closed
//!    error goes to the error channel.

use std::any::Any;
use std::io;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::{FutureExt, TryStreamExt};
use http::Version;
use tracing::debug;

use crate::app::Shared;
use crate::body::Body;
use crate::context::Context;
use crate::error::Error;
use crate::middleware::Composed;
use crate::status;
use crate::transport::{RawRequest, RawResponse};

/// Runs requests through one application's pipeline.
///
/// Cheap to clone; clones share the pipeline and the configuration.
#[derive(Clone)]
pub struct Dispatcher {
    pipeline: Composed,
    app: Arc<Shared>,
}

impl Dispatcher {
    pub(crate) fn new(pipeline: Composed, app: Arc<Shared>) -> Self {
        Self { pipeline, app }
    }

    /// A fresh context for one request, as the pipeline first sees it.
    pub fn context(&self, req: RawRequest, mut res: RawResponse) -> Context {
        // No body is sent for HEAD, so an unread body is not a hang-up.
        if *req.method() != http::Method::HEAD {
            let app = Arc::clone(&self.app);
            res.on_abort(move || app.events.emit(&Error::closed(), None));
        }
        let mut ctx = Context::new(req, res, Arc::clone(&self.app));
        ctx.response.set_default_status(404);
        ctx
    }

    /// Handles one request and returns its context for inspection.
    pub async fn handle(&self, req: RawRequest, res: RawResponse) -> Context {
        let mut ctx = self.context(req, res);
        self.handle_context(&mut ctx).await;
        ctx
    }

    /// Runs the pipeline over an existing context, then writes the response.
    ///
    /// A panic inside a middleware is caught and answered like any other
    /// error; it never takes down the connection task.
    pub async fn handle_context(&self, ctx: &mut Context) {
        let outcome = AssertUnwindSafe(self.pipeline.run(ctx))
            .catch_unwind()
            .await
            .unwrap_or_else(|payload| Err(Error::panic(panic_message(payload.as_ref()))));

        match outcome {
            Ok(()) => {
                if let Err(err) = respond(ctx).await {
                    ctx.on_error(err).await;
                }
            }
            Err(err) => ctx.on_error(err).await,
        }

        debug!(
            method = %ctx.request.method(),
            url = ctx.request.url(),
            status = ctx.response.status(),
            "request handled"
        );
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("pipeline", &self.pipeline)
            .field("config", &self.app.config)
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_owned()
    }
}

/// Writes the response the pipeline built.
///
/// Does nothing when `ctx.respond` is off or the response can no longer be
/// written. Otherwise:
///
/// | Situation                     | Written                                   |
/// |-------------------------------|-------------------------------------------|
/// | status 204, 205 or 304        | head only                                 |
/// | `HEAD` request                | head only, `Content-Length` from the body |
/// | body emptied on purpose       | head only, `Content-Length: 0`            |
/// | body never set                | the reason phrase as plain text           |
/// | text, bytes or JSON body      | the serialized body                       |
/// | stream body                   | each chunk as it arrives                  |
///
/// Chunk errors of a stream body go to the error channel.
pub async fn respond(ctx: &mut Context) -> Result<(), Error> {
    if !ctx.respond || !ctx.response.writable() {
        return Ok(());
    }

    let code = ctx.response.status();
    if status::is_empty(code) {
        ctx.response.set_body(Body::Empty);
        return ctx.response.raw_mut().end(None).await;
    }

    if *ctx.request.method() == http::Method::HEAD {
        let known = ctx.response.body().byte_len();
        if !ctx.response.headers_sent() && !ctx.response.has("content-length") {
            if let Some(len) = known {
                ctx.response.set_length(len);
            }
        }
        return ctx.response.raw_mut().end(None).await;
    }

    let (empty, streaming, json) = {
        let body = ctx.response.body();
        (body.is_empty(), matches!(body, Body::Stream(_)), matches!(body, Body::Json(_)))
    };

    if empty {
        if ctx.response.explicit_empty() {
            ctx.response.remove("content-type");
            ctx.response.remove("transfer-encoding");
            ctx.response.set_length(0);
            return ctx.response.raw_mut().end(None).await;
        }
        let text = if ctx.request.version() >= Version::HTTP_2 {
            code.to_string()
        } else {
            match ctx.response.message() {
                ""      => code.to_string(),
                message => message.to_owned(),
            }
        };
        if !ctx.response.headers_sent() {
            ctx.response.set_type("text");
            ctx.response.set_length(text.len() as u64);
        }
        return ctx.response.raw_mut().end(Some(text.into())).await;
    }

    if streaming {
        if let Body::Stream(stream) = ctx.response.take_body() {
            let app = Arc::clone(ctx.shared());
            let stream = stream.inspect_err(move |e| {
                app.events.emit(&Error::from(io::Error::new(e.kind(), e.to_string())), None);
            });
            return ctx.response.raw_mut().pipe(Box::pin(stream)).await;
        }
        return ctx.response.raw_mut().end(None).await;
    }

    let payload = ctx.response.body().to_payload()?;
    if json && !ctx.response.headers_sent() {
        if let Some(bytes) = &payload {
            ctx.response.set_length(bytes.len() as u64);
        }
    }
    ctx.response.raw_mut().end(payload).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::App;
    use bytes::Bytes;
    use futures_util::stream;
    use http::Method;
    use http_body_util::BodyExt;

    fn dispatcher(app: App) -> Dispatcher {
        app.dispatcher()
    }

    #[tokio::test]
    async fn unhandled_request_is_a_404_with_reason() {
        let (res, rx) = RawResponse::channel();
        let ctx = App::new().dispatcher().handle(RawRequest::new(Method::GET, "/"), res).await;
        assert_eq!(ctx.status(), 404);

        let res = rx.await.unwrap();
        assert_eq!(res.status(), 404);
        assert_eq!(res.headers()["content-type"], "text/plain; charset=utf-8");
        assert_eq!(res.headers()["content-length"], "9");
        let body = res.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body, Bytes::from_static(b"Not Found"));
    }

    #[tokio::test]
    async fn http2_fallback_body_is_the_code() {
        let req = RawRequest::new(Method::GET, "/").with_version(Version::HTTP_2);
        let (res, rx) = RawResponse::channel();
        App::new().dispatcher().handle(req, res).await;
        let body = rx.await.unwrap().into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body, Bytes::from_static(b"404"));
    }

    #[tokio::test]
    async fn head_sets_length_without_a_body() {
        let app = App::new().wrap_fn(|ctx, _next| Box::pin(async move {
            ctx.set_body(Body::json(&serde_json::json!({ "ok": true }))?);
            Ok(())
        }));
        let (res, rx) = RawResponse::channel();
        dispatcher(app).handle(RawRequest::new(Method::HEAD, "/"), res).await;

        let res = rx.await.unwrap();
        assert_eq!(res.status(), 200);
        assert_eq!(res.headers()["content-length"], "11");
        let body = res.into_body().collect().await.unwrap().to_bytes();
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn explicit_empty_body_has_zero_length() {
        let app = App::new().wrap_fn(|ctx, _next| Box::pin(async move {
            ctx.set_status(200)?;
            ctx.set_body("draft");
            ctx.set_body(Body::Empty);
            ctx.set_status(200)
        }));
        let (res, rx) = RawResponse::channel();
        dispatcher(app).handle(RawRequest::new(Method::GET, "/"), res).await;

        let res = rx.await.unwrap();
        assert_eq!(res.status(), 200);
        assert_eq!(res.headers()["content-length"], "0");
        assert!(res.headers().get("content-type").is_none());
    }

    #[tokio::test]
    async fn json_is_serialized_with_length() {
        let app = App::new().wrap_fn(|ctx, _next| Box::pin(async move {
            ctx.response.set_json(&serde_json::json!({ "id": 7 }))
        }));
        let (res, rx) = RawResponse::channel();
        dispatcher(app).handle(RawRequest::new(Method::GET, "/"), res).await;

        let res = rx.await.unwrap();
        assert_eq!(res.headers()["content-type"], "application/json; charset=utf-8");
        assert_eq!(res.headers()["content-length"], "8");
        let body = res.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body, Bytes::from_static(br#"{"id":7}"#));
    }

    #[tokio::test]
    async fn stream_errors_reach_the_error_channel() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let app = App::new()
            .on_error(move |err, _ctx| sink.lock().unwrap().push(err.to_string()))
            .wrap_fn(|ctx, _next| Box::pin(async move {
                let chunks: Vec<io::Result<Bytes>> = vec![
                    Ok(Bytes::from_static(b"partial")),
                    Err(io::Error::other("disk gone")),
                ];
                ctx.set_body(Body::stream(stream::iter(chunks)));
                Ok(())
            }));

        let ctx = dispatcher(app)
            .handle(RawRequest::new(Method::GET, "/"), RawResponse::detached())
            .await;
        assert!(ctx.response.raw().finished());
        assert_eq!(*seen.lock().unwrap(), ["io: disk gone"]);
    }

    fn recording(app: App) -> (App, Arc<std::sync::Mutex<Vec<String>>>) {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        (app.on_error(move |err, _ctx| sink.lock().unwrap().push(err.to_string())), seen)
    }

    fn endless(ctx: &mut Context) {
        use futures_util::StreamExt;
        let first = stream::once(async { Ok::<_, io::Error>(Bytes::from_static(b"first")) });
        ctx.set_body(Body::stream(first.chain(stream::pending())));
    }

    #[tokio::test]
    async fn abandoned_body_reports_a_closed_connection() {
        let (app, seen) = recording(App::new().wrap_fn(|ctx, _next| Box::pin(async move {
            endless(ctx);
            Ok(())
        })));
        let (res, rx) = RawResponse::channel();
        dispatcher(app).handle(RawRequest::new(Method::GET, "/"), res).await;

        let mut body = rx.await.unwrap().into_body();
        let first = body.frame().await.unwrap().unwrap().into_data().unwrap();
        assert_eq!(first, Bytes::from_static(b"first"));
        assert!(seen.lock().unwrap().is_empty());

        drop(body);
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0], Error::closed().to_string());
    }

    #[tokio::test]
    async fn finished_bodies_report_nothing() {
        let (app, seen) = recording(App::new().wrap_fn(|ctx, _next| Box::pin(async move {
            let chunks: Vec<io::Result<Bytes>> = vec![Ok(Bytes::from_static(b"all"))];
            ctx.set_body(Body::stream(stream::iter(chunks)));
            Ok(())
        })));
        let dispatcher = dispatcher(app);

        let (res, rx) = RawResponse::channel();
        dispatcher.handle(RawRequest::new(Method::GET, "/"), res).await;
        let body = rx.await.unwrap().into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body, Bytes::from_static(b"all"));

        // The transport never reads a HEAD body.
        let (res, rx) = RawResponse::channel();
        dispatcher.handle(RawRequest::new(Method::HEAD, "/"), res).await;
        drop(rx.await.unwrap());

        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn writes_after_a_hang_up_are_reported_once() {
        let (hung_up, wait) = tokio::sync::oneshot::channel::<()>();
        let wait = Arc::new(std::sync::Mutex::new(Some(wait)));
        let (app, seen) = recording(App::new().wrap_fn(move |ctx, _next| {
            let wait = Arc::clone(&wait);
            Box::pin(async move {
                ctx.set_status(200)?;
                ctx.response.flush_headers()?;
                let wait = wait.lock().unwrap().take();
                if let Some(wait) = wait {
                    let _ = wait.await;
                }
                ctx.response.raw_mut().end(Some(Bytes::from_static(b"late"))).await
            })
        }));
        let dispatcher = dispatcher(app);

        let (res, rx) = RawResponse::channel();
        let task = tokio::spawn(async move {
            dispatcher.handle(RawRequest::new(Method::GET, "/"), res).await.status()
        });
        drop(rx.await.unwrap());
        hung_up.send(()).unwrap();

        assert_eq!(task.await.unwrap(), 200);
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0], Error::closed().to_string());
    }

    #[tokio::test]
    async fn respond_off_leaves_the_response_alone() {
        let app = App::new().wrap_fn(|ctx, _next| Box::pin(async move {
            ctx.respond = false;
            ctx.set_body("unsent");
            Ok(())
        }));
        let ctx = dispatcher(app)
            .handle(RawRequest::new(Method::GET, "/"), RawResponse::detached())
            .await;
        assert!(!ctx.response.raw().finished());
    }

    #[tokio::test]
    async fn panics_become_500s() {
        let app = App::new()
            .on_error(|_, _| {})
            .wrap_fn(|ctx, _next| Box::pin(async move {
                if ctx.path() == "/" {
                    panic!("boom");
                }
                Ok(())
            }));
        let (res, rx) = RawResponse::channel();
        dispatcher(app).handle(RawRequest::new(Method::GET, "/"), res).await;

        let res = rx.await.unwrap();
        assert_eq!(res.status(), 500);
        let body = res.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body, Bytes::from_static(b"Internal Server Error"));
    }
}
