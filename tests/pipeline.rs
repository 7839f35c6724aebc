mod common;

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use common::run;
use strata::{App, Body, Context, Error, Method, Next, RawRequest, RawResponse, compose, from_fn, respond};
use strata::{BoxFuture, Middleware};

fn get(url: &str) -> RawRequest {
    RawRequest::new(Method::GET, url)
}

/// Records its name on the way in and on the way out.
struct Layer {
    name: &'static str,
    log: Arc<Mutex<Vec<String>>>,
}

impl Middleware for Layer {
    fn call<'a>(&'a self, ctx: &'a mut Context, next: Next<'a>) -> BoxFuture<'a, Result<(), Error>> {
        Box::pin(async move {
            self.log.lock().unwrap().push(format!("{} in", self.name));
            next.run(ctx).await?;
            self.log.lock().unwrap().push(format!("{} out", self.name));
            Ok(())
        })
    }
}

#[tokio::test]
async fn layers_run_in_onion_order() {
    common::init_tracing();
    let log = Arc::new(Mutex::new(Vec::new()));
    let app = ["one", "two", "three"]
        .into_iter()
        .fold(App::new(), |app, name| app.wrap(Layer { name, log: Arc::clone(&log) }));

    run(&app.dispatcher(), get("/")).await;
    assert_eq!(
        *log.lock().unwrap(),
        ["one in", "two in", "three in", "three out", "two out", "one out"]
    );
}

#[tokio::test]
async fn second_next_call_fails_the_request() {
    let errors = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&errors);
    let app = App::new()
        .on_error(move |err, _ctx| sink.lock().unwrap().push(err.is_next_called_twice()))
        .wrap_fn(|ctx, next| Box::pin(async move {
            next.run(ctx).await?;
            next.run(ctx).await
        }))
        .wrap_fn(|ctx, _next| Box::pin(async move {
            ctx.set_body("inner");
            Ok(())
        }));

    let (_, reply) = run(&app.dispatcher(), get("/")).await;
    let reply = reply.unwrap();
    assert_eq!(reply.status, 500);
    assert_eq!(reply.text(), "Internal Server Error");
    assert_eq!(*errors.lock().unwrap(), [true]);
}

#[tokio::test]
async fn body_forbidden_statuses_win_in_either_order() {
    for code in [204, 205, 304] {
        for body_first in [true, false] {
            let app = App::new().wrap_fn(move |ctx, _next| Box::pin(async move {
                if body_first {
                    ctx.set_body("hello");
                    ctx.set_status(code)?;
                } else {
                    ctx.set_status(code)?;
                    ctx.set_body("hello");
                }
                Ok(())
            }));

            let (ctx, reply) = run(&app.dispatcher(), get("/")).await;
            let reply = reply.unwrap();
            assert!(ctx.body().is_empty(), "{code} body_first={body_first}");
            assert_eq!(reply.status, code);
            assert!(reply.body.is_empty());
            for field in ["content-type", "content-length", "transfer-encoding"] {
                assert!(reply.header(field).is_none(), "{code} {field} body_first={body_first}");
            }
        }
    }
}

#[tokio::test]
async fn content_type_is_inferred_only_when_unset() {
    let cases = [
        (Body::from("plain words"), None, "text/plain; charset=utf-8"),
        (Body::from("  <p>markup</p>"), None, "text/html; charset=utf-8"),
        (Body::from(vec![0u8, 1, 2]), None, "application/octet-stream"),
        (Body::from("<svg/>"), Some("image/svg+xml"), "image/svg+xml"),
    ];

    for (body, preset, expected) in cases {
        let body = Arc::new(Mutex::new(Some(body)));
        let app = App::new().wrap_fn(move |ctx, _next| {
            let body = Arc::clone(&body);
            Box::pin(async move {
                if let Some(preset) = preset {
                    ctx.set_type(preset);
                }
                if let Some(body) = body.lock().unwrap().take() {
                    ctx.set_body(body);
                }
                Ok(())
            })
        });

        let (_, reply) = run(&app.dispatcher(), get("/")).await;
        assert_eq!(reply.unwrap().header("content-type"), Some(expected));
    }
}

#[tokio::test]
async fn path_rewrites_keep_the_query() {
    let app = App::new()
        .wrap_fn(|ctx, next| Box::pin(async move {
            ctx.request.set_path("/v2/items");
            ctx.request.set_querystring("page=2");
            ctx.request.set_querystring("page=2");
            next.run(ctx).await
        }))
        .wrap_fn(|ctx, _next| Box::pin(async move {
            let seen = format!("{} {}", ctx.path(), ctx.url());
            ctx.set_body(seen);
            Ok(())
        }));

    let (ctx, reply) = run(&app.dispatcher(), get("/items?page=2")).await;
    assert_eq!(reply.unwrap().text(), "/v2/items /v2/items?page=2");
    assert_eq!(ctx.original_url(), "/items?page=2");
}

#[tokio::test]
async fn responding_twice_is_a_no_op() {
    let app = App::new().wrap_fn(|ctx, _next| Box::pin(async move {
        ctx.set_body("once");
        Ok(())
    }));

    let (mut ctx, reply) = run(&app.dispatcher(), get("/")).await;
    assert_eq!(reply.unwrap().text(), "once");
    assert!(!ctx.response.writable());

    respond(&mut ctx).await.unwrap();
    assert_eq!(ctx.status(), 200);
    assert_eq!(ctx.response.get("content-length"), "4");
}

#[tokio::test]
async fn state_flows_downstream() {
    let app = App::new()
        .wrap_fn(|ctx, next| Box::pin(async move {
            ctx.state.insert("seen", true);
            next.run(ctx).await
        }))
        .wrap_fn(|ctx, _next| Box::pin(async move {
            let seen = ctx.state.get::<bool>("seen").copied();
            ctx.assert(seen == Some(true), 500, "state was not shared")?;
            ctx.set_body("ok");
            Ok(())
        }));

    let (ctx, reply) = run(&app.dispatcher(), get("/aaa?x=1")).await;
    let reply = reply.unwrap();
    assert_eq!(reply.status, 200);
    assert_eq!(reply.text(), "ok");
    assert_eq!(ctx.state.get::<bool>("seen"), Some(&true));
    assert_eq!(ctx.request.query().get("x"), Some("1"));
}

#[tokio::test]
async fn failing_layer_short_circuits_with_its_error() {
    let reached = Arc::new(Mutex::new(false));
    let flag = Arc::clone(&reached);

    let pipeline = compose([
        from_fn(|ctx, next| Box::pin(async move { next.run(ctx).await })).boxed(),
        from_fn(|_ctx, _next| Box::pin(async move {
            Err::<(), _>(Error::new(409, "version conflict"))
        }))
        .boxed(),
        from_fn(move |_ctx, _next| {
            let flag = Arc::clone(&flag);
            Box::pin(async move {
                *flag.lock().unwrap() = true;
                Ok(())
            })
        })
        .boxed(),
    ]);

    let mut ctx = App::new()
        .dispatcher()
        .context(get("/"), RawResponse::detached());
    let err = pipeline.run(&mut ctx).await.unwrap_err();
    assert_eq!(err.status(), Some(409));
    assert_eq!(err.to_string(), "version conflict");
    assert!(!*reached.lock().unwrap());
}

#[tokio::test]
async fn exposed_errors_reach_the_client() {
    let app = App::new()
        .on_error(|_, _| {})
        .wrap_fn(|_ctx, _next| Box::pin(async move {
            Err::<(), _>(Error::new(409, "version conflict").with_header("retry-after", "5"))
        }));

    let (_, reply) = run(&app.dispatcher(), get("/")).await;
    let reply = reply.unwrap();
    assert_eq!(reply.status, 409);
    assert_eq!(reply.text(), "version conflict");
    assert_eq!(reply.header("retry-after"), Some("5"));
    assert_eq!(reply.header("content-type"), Some("text/plain; charset=utf-8"));
}

#[tokio::test]
async fn redirect_back_to_the_referrer() {
    let app = App::new().wrap_fn(|ctx, _next| Box::pin(async move {
        ctx.redirect("back", Some("/index.html"))
    }));

    let req = get("/")
        .with_header("referer", "http://x")
        .with_header("accept", "text/html");
    let (_, reply) = run(&app.dispatcher(), req).await;
    let reply = reply.unwrap();
    assert_eq!(reply.status, 302);
    assert_eq!(reply.header("location"), Some("http://x"));
    assert_eq!(reply.header("content-type"), Some("text/html; charset=utf-8"));
    assert_eq!(
        reply.text(),
        r#"Redirecting to <a href="http://x">http://x</a>."#
    );
}

#[tokio::test]
async fn redirect_keeps_an_explicit_redirect_status() {
    let app = App::new().wrap_fn(|ctx, _next| Box::pin(async move {
        ctx.set_status(301)?;
        ctx.redirect("/new home", None)
    }));

    let req = get("/old").with_header("accept", "application/json, text/plain");
    let (_, reply) = run(&app.dispatcher(), req).await;
    let reply = reply.unwrap();
    assert_eq!(reply.status, 301);
    assert_eq!(reply.header("location"), Some("/new%20home"));
    assert_eq!(reply.header("content-type"), Some("text/plain; charset=utf-8"));
    assert_eq!(reply.text(), "Redirecting to /new home.");
}

#[tokio::test]
async fn early_flush_streams_the_rest() {
    let app = App::new().wrap_fn(|ctx, _next| Box::pin(async move {
        ctx.set_status(200)?;
        ctx.set_type("text");
        ctx.response.flush_headers()?;
        ctx.response.raw_mut().end(Some(Bytes::from_static(b"late"))).await
    }));

    let (ctx, reply) = run(&app.dispatcher(), get("/")).await;
    let reply = reply.unwrap();
    assert_eq!(reply.status, 200);
    assert_eq!(reply.text(), "late");
    assert!(ctx.response.headers_sent());
}
