//! Composition of a middleware list into one pipeline.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::{BoxFuture, BoxedMiddleware, Middleware};
use crate::context::Context;
use crate::error::Error;

/// Tracks how far one invocation of a pipeline has dispatched.
///
/// Holds one past the highest index entered so far. Entering an index below
/// that means some `next` ran twice.
#[derive(Debug, Default)]
struct Cursor(AtomicUsize);

impl Cursor {
    fn advance(&self, index: usize) -> Result<(), Error> {
        self.0
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |floor| {
                (index >= floor).then_some(index + 1)
            })
            .map(drop)
            .map_err(|_| Error::next_called_twice())
    }
}

/// The continuation handed to each middleware: "the rest of the stack".
pub struct Next<'a> {
    stack: &'a [BoxedMiddleware],
    index: usize,
    cursor: &'a Cursor,
    terminal: Option<&'a Next<'a>>,
}

impl<'a> Next<'a> {
    /// Runs the remaining middleware, then the enclosing pipeline's
    /// continuation if this stack is nested inside another.
    ///
    /// Fails with a "called multiple times" error when the same continuation
    /// is run twice.
    pub fn run<'c>(&'c self, ctx: &'c mut Context) -> BoxFuture<'c, Result<(), Error>> {
        Box::pin(async move {
            self.cursor.advance(self.index)?;
            match self.stack.get(self.index) {
                Some(middleware) => {
                    let next = Next {
                        stack: self.stack,
                        index: self.index + 1,
                        cursor: self.cursor,
                        terminal: self.terminal,
                    };
                    middleware.call(ctx, next).await
                }
                None => match self.terminal {
                    Some(terminal) => terminal.run(ctx).await,
                    None => Ok(()),
                },
            }
        })
    }
}

/// An ordered middleware list behaving as a single middleware.
#[derive(Clone)]
pub struct Composed {
    stack: Arc<[BoxedMiddleware]>,
}

/// Composes `middleware` into one pipeline, outermost first.
pub fn compose<I>(middleware: I) -> Composed
where
    I: IntoIterator<Item = BoxedMiddleware>,
{
    Composed { stack: middleware.into_iter().collect() }
}

impl Composed {
    /// Runs the whole pipeline over `ctx`, with nothing after the last
    /// middleware.
    pub async fn run(&self, ctx: &mut Context) -> Result<(), Error> {
        let cursor = Cursor::default();
        let first = Next { stack: &self.stack, index: 0, cursor: &cursor, terminal: None };
        first.run(ctx).await
    }

    pub fn len(&self) -> usize {
        self.stack.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }
}

/// Nested pipelines fall through to the outer `next` after their last layer.
impl Middleware for Composed {
    fn call<'a>(&'a self, ctx: &'a mut Context, next: Next<'a>) -> BoxFuture<'a, Result<(), Error>> {
        Box::pin(async move {
            let cursor = Cursor::default();
            let first = Next { stack: &self.stack, index: 0, cursor: &cursor, terminal: Some(&next) };
            first.run(ctx).await
        })
    }
}

impl std::fmt::Debug for Composed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Composed").field("len", &self.stack.len()).finish()
    }
}
