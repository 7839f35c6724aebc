//! Shared helpers for the integration tests.

use bytes::Bytes;
use http_body_util::BodyExt;
use strata::{Context, Dispatcher, RawRequest, RawResponse, StatusCode};

/// What reached the transport for one request.
#[derive(Debug)]
pub struct Reply {
    pub status: StatusCode,
    pub headers: http::HeaderMap,
    pub body: Bytes,
}

impl Reply {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn text(&self) -> &str {
        std::str::from_utf8(&self.body).unwrap()
    }
}

/// Sends test output through the libtest capture. Safe to call from every
/// test.
#[allow(dead_code)]
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

/// Runs `req` through `dispatcher` and returns the finished context together
/// with whatever was written, if anything.
pub async fn run(dispatcher: &Dispatcher, req: RawRequest) -> (Context, Option<Reply>) {
    let (res, mut head) = RawResponse::channel();
    let ctx = dispatcher.handle(req, res).await;
    let reply = match head.try_recv() {
        Ok(res) => {
            let (parts, body) = res.into_parts();
            let body = body.collect().await.unwrap().to_bytes();
            Some(Reply { status: parts.status, headers: parts.headers, body })
        }
        Err(_) => None,
    };
    (ctx, reply)
}
