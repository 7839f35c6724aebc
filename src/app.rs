//! The application: configuration, middleware list and error channel.

use std::fmt;
use std::sync::Arc;

use crate::config::Config;
use crate::context::Context;
use crate::dispatch::Dispatcher;
use crate::error::Error;
use crate::events::Events;
use crate::middleware::{BoxFuture, BoxedMiddleware, Middleware, Next, compose, from_fn};

/// What every request of one application shares, read-only.
pub(crate) struct Shared {
    pub(crate) config: Config,
    pub(crate) events: Events,
}

/// An application under construction.
///
/// Build it once at startup; every registration returns `self` so calls
/// chain. Hand it to [`Server::serve`](crate::Server::serve), or call
/// [`dispatcher`](App::dispatcher) to run requests in-process.
///
/// ```rust
/// use strata::App;
///
/// let app = App::new()
///     .wrap_fn(|ctx, next| Box::pin(async move {
///         next.run(ctx).await?;
///         ctx.response.set("x-powered-by", "strata")
///     }))
///     .wrap_fn(|ctx, _next| Box::pin(async move {
///         ctx.set_body("hello");
///         Ok(())
///     }));
/// assert_eq!(app.len(), 2);
/// ```
pub struct App {
    config: Config,
    middleware: Vec<BoxedMiddleware>,
    events: Events,
}

impl App {
    /// An empty application with the default [`Config`].
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        let events = Events::new(config.silent);
        Self { config, middleware: Vec::new(), events }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Appends `middleware` to the pipeline. Earlier registrations wrap later
    /// ones.
    pub fn wrap(mut self, middleware: impl Middleware) -> Self {
        self.middleware.push(middleware.boxed());
        self
    }

    /// Appends a closure to the pipeline. See [`from_fn`].
    pub fn wrap_fn<F>(self, f: F) -> Self
    where
        F: for<'a> Fn(&'a mut Context, Next<'a>) -> BoxFuture<'a, Result<(), Error>> + Send + Sync + 'static,
    {
        self.wrap(from_fn(f))
    }

    /// Subscribes to the error channel. The first subscriber turns off the
    /// default error log.
    pub fn on_error<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Error, Option<&Context>) + Send + Sync + 'static,
    {
        self.events.on_error(handler);
        self
    }

    /// Number of registered middleware.
    pub fn len(&self) -> usize {
        self.middleware.len()
    }

    pub fn is_empty(&self) -> bool {
        self.middleware.is_empty()
    }

    /// Freezes the middleware list into a request handler.
    ///
    /// The app stays usable; later registrations do not affect dispatchers
    /// already built.
    pub fn dispatcher(&self) -> Dispatcher {
        let shared = Arc::new(Shared {
            config: self.config.clone(),
            events: self.events.clone(),
        });
        Dispatcher::new(compose(self.middleware.iter().cloned()), shared)
    }
}

impl Default for App {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for App {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("App")
            .field("config", &self.config)
            .field("middleware", &self.middleware.len())
            .field("events", &self.events)
            .finish()
    }
}
