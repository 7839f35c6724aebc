//! # strata
//!
//! A minimal HTTP framework built around one idea: an application is an
//! ordered list of middleware, composed into a single onion-shaped pipeline.
//!
//! ## The contract
//!
//! Each middleware receives a [`Context`] (the request, the response being
//! built and a per-request state bag) and a [`Next`] continuation. Code
//! before `next.run(ctx).await` runs on the way in, code after it on the way
//! out. There is no router, no body parser and no template engine; those are
//! middleware you write or pull in.
//!
//! What strata does own:
//!
//! - **Composition**: [`compose`] nests pipelines, and calling `next` twice
//!   is an error, never a double dispatch.
//! - **Response consistency**: status, body, `Content-Type` and
//!   `Content-Length` are kept in step by [`Response`].
//! - **Finalization**: whatever the pipeline leaves behind is written once,
//!   and errors become plain-text responses that never leak internals.
//! - **Serving**: hyper over tokio, HTTP/1.1 and HTTP/2, graceful shutdown
//!   on SIGTERM / Ctrl-C.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use strata::{App, Server};
//!
//! #[tokio::main]
//! async fn main() {
//!     let app = App::new()
//!         .wrap_fn(|ctx, next| Box::pin(async move {
//!             let start = std::time::Instant::now();
//!             next.run(ctx).await?;
//!             let ms = start.elapsed().as_millis();
//!             ctx.response.set("x-response-time", format!("{ms}ms"))
//!         }))
//!         .wrap_fn(|ctx, _next| Box::pin(async move {
//!             match ctx.path() {
//!                 "/" => ctx.set_body("hello"),
//!                 "/old" => ctx.redirect("/", None)?,
//!                 _ => {}
//!             }
//!             Ok(())
//!         }));
//!
//!     Server::bind("0.0.0.0:3000").serve(app).await.unwrap();
//! }
//! ```

mod app;
mod body;
mod config;
mod context;
mod disposition;
mod dispatch;
mod error;
mod events;
mod fresh;
mod header;
mod media;
mod negotiate;
mod query;
mod request;
mod response;
mod server;
mod transport;

pub mod middleware;
pub mod status;

pub use app::App;
pub use body::{Body, BodyStream};
pub use config::Config;
pub use context::{Context, ContextSnapshot, State};
pub use disposition::{AttachmentOptions, Fallback, content_disposition};
pub use dispatch::{Dispatcher, respond};
pub use error::Error;
pub use events::{ErrorHandler, Events};
pub use fresh::is_fresh;
pub use header::{FieldValue, Headers};
pub use media::TypeMatch;
pub use middleware::{BoxFuture, BoxedMiddleware, Composed, Middleware, Next, compose, from_fn};
pub use query::Query;
pub use request::{Request, RequestSnapshot};
pub use response::{Response, ResponseSnapshot};
pub use server::Server;
pub use transport::{RawRequest, RawResponse, RequestBody, ResponseBody, ResponseReceiver};

pub use http::{Method, StatusCode, Version};
