//! The application error channel.
//!
//! Every error that escapes the pipeline, and every transport failure met
//! while writing a response, is emitted here exactly once. That includes a
//! peer hanging up before the body was fully sent.

use std::fmt;
use std::sync::Arc;

use tracing::error;

use crate::context::Context;
use crate::error::Error;

/// A subscriber on the error channel.
pub type ErrorHandler = Arc<dyn Fn(&Error, Option<&Context>) + Send + Sync>;

#[derive(Clone, Default)]
pub struct Events {
    handlers: Vec<ErrorHandler>,
    silent: bool,
}

impl Events {
    /// A channel with no subscribers. `silent` turns off the default log.
    pub fn new(silent: bool) -> Self {
        Self { handlers: Vec::new(), silent }
    }

    /// Adds a subscriber. Once any subscriber exists the default log is off.
    pub fn on_error<F>(&mut self, handler: F)
    where
        F: Fn(&Error, Option<&Context>) + Send + Sync + 'static,
    {
        self.handlers.push(Arc::new(handler));
    }

    pub fn has_handlers(&self) -> bool {
        !self.handlers.is_empty()
    }

    pub fn emit(&self, err: &Error, ctx: Option<&Context>) {
        if self.handlers.is_empty() {
            self.log(err, ctx);
            return;
        }
        for handler in &self.handlers {
            handler(err, ctx);
        }
    }

    /// Client errors the response already explains are not logged.
    fn should_log(&self, err: &Error) -> bool {
        !(self.silent || err.expose() || err.status() == Some(404))
    }

    fn log(&self, err: &Error, ctx: Option<&Context>) {
        if !self.should_log(err) {
            return;
        }
        match ctx {
            Some(ctx) => error!(
                method = %ctx.request.method(),
                url = ctx.request.url(),
                status = err.status(),
                "request failed: {err}"
            ),
            None => error!(status = err.status(), "{err}"),
        }
    }
}

impl fmt::Debug for Events {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Events")
            .field("handlers", &self.handlers.len())
            .field("silent", &self.silent)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn subscribers_see_every_error() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut events = Events::default();
        let sink = Arc::clone(&seen);
        events.on_error(move |err, ctx| {
            sink.lock().unwrap().push((err.to_string(), ctx.is_some()));
        });

        events.emit(&Error::new(404, "nope"), None);
        events.emit(&Error::new(500, "boom"), None);

        let seen = seen.lock().unwrap();
        assert_eq!(*seen, vec![("nope".to_owned(), false), ("boom".to_owned(), false)]);
    }

    #[test]
    fn default_log_skips_what_the_client_already_sees() {
        let events = Events::default();
        assert!(!events.should_log(&Error::new(404, "missing")));
        assert!(!events.should_log(&Error::new(409, "version conflict")));
        assert!(events.should_log(&Error::new(500, "boom")));
        assert!(events.should_log(&Error::closed()));

        let silent = Events::new(true);
        assert!(!silent.should_log(&Error::new(500, "boom")));
        assert!(!silent.should_log(&Error::closed()));
    }

    #[test]
    fn default_log_does_not_panic() {
        let events = Events::new(true);
        assert!(!events.has_handlers());
        events.emit(&Error::new(500, "quiet"), None);
    }
}
