//! Middleware and the onion execution model.
//!
//! # How a request travels through the stack
//!
//! Every middleware receives the request [`Context`] and a [`Next`]
//! continuation. Awaiting `next.run(ctx)` hands control to the rest of the
//! stack; whatever follows the `.await` runs on the way back out:
//!
//! ```text
//!   request ──▶ logger ──▶ auth ──▶ handler
//!                 │          │         │
//!   response ◀── logger ◀── auth ◀─────┘
//! ```
//!
//! A middleware that never calls `next` ends the request there. One that
//! returns `Err` skips everything downstream that has not run yet, and the
//! error travels outwards, where any outer layer may inspect it, recover from
//! it or replace it.
//!
//! # Writing middleware
//!
//! Closures go through [`from_fn`]. The future has to be boxed because it
//! borrows the context:
//!
//! ```rust
//! use strata::middleware::from_fn;
//!
//! let timing = from_fn(|ctx, next| Box::pin(async move {
//!     let start = std::time::Instant::now();
//!     next.run(ctx).await?;
//!     let ms = start.elapsed().as_millis().to_string();
//!     ctx.response.set("x-response-time", format!("{ms}ms"))?;
//!     Ok(())
//! }));
//! # let _ = timing;
//! ```
//!
//! Types with their own state implement [`Middleware`] directly.

mod compose;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::context::Context;
use crate::error::Error;

pub use compose::{Composed, Next, compose};

/// A heap-allocated, type-erased future borrowing from the request for `'a`.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A step in the request pipeline.
pub trait Middleware: Send + Sync + 'static {
    /// Handles `ctx`, calling `next` at most once to run the rest of the stack.
    fn call<'a>(&'a self, ctx: &'a mut Context, next: Next<'a>) -> BoxFuture<'a, Result<(), Error>>;

    /// Erases the concrete type so different middleware fit in one list.
    fn boxed(self) -> BoxedMiddleware
    where
        Self: Sized,
    {
        Arc::new(self)
    }
}

/// A type-erased middleware shared by every request.
pub type BoxedMiddleware = Arc<dyn Middleware>;

/// Wraps a closure as [`Middleware`].
pub fn from_fn<F>(f: F) -> FromFn<F>
where
    F: for<'a> Fn(&'a mut Context, Next<'a>) -> BoxFuture<'a, Result<(), Error>> + Send + Sync + 'static,
{
    FromFn(f)
}

/// Middleware built by [`from_fn`].
#[derive(Clone)]
pub struct FromFn<F>(F);

impl<F> Middleware for FromFn<F>
where
    F: for<'a> Fn(&'a mut Context, Next<'a>) -> BoxFuture<'a, Result<(), Error>> + Send + Sync + 'static,
{
    fn call<'a>(&'a self, ctx: &'a mut Context, next: Next<'a>) -> BoxFuture<'a, Result<(), Error>> {
        (self.0)(ctx, next)
    }
}
