//! Minimal strata example: logging, timing, a JSON endpoint and redirects.
//!
//! Run with:
//!   STRATA_ENV=development cargo run --example basic
//!
//! Try:
//!   curl -i http://localhost:3000/
//!   curl -i http://localhost:3000/users/42
//!   curl -i -X POST http://localhost:3000/users \
//!        -H 'content-type: application/json' \
//!        -d '{"name":"alice"}'
//!   curl -i http://localhost:3000/old-home
//!   curl -i http://localhost:3000/missing

use std::time::Instant;

use serde::{Deserialize, Serialize};
use strata::{App, Config, Context, Error, Server, TypeMatch};
use tracing::info;

#[derive(Serialize)]
struct User {
    id: u64,
    name: String,
}

#[derive(Deserialize)]
struct CreateUser {
    name: String,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let config = Config::from_env().expect("invalid STRATA_* configuration");

    let app = App::with_config(config)
        // Access log, outermost so it sees the final status.
        .wrap_fn(|ctx, next| Box::pin(async move {
            let start = Instant::now();
            let result = next.run(ctx).await;
            info!(
                method = %ctx.method(),
                url = ctx.url(),
                status = ctx.status(),
                elapsed_ms = start.elapsed().as_millis() as u64,
                "request"
            );
            result
        }))
        .wrap_fn(|ctx, next| Box::pin(async move {
            let start = Instant::now();
            next.run(ctx).await?;
            let ms = start.elapsed().as_millis();
            ctx.set("x-response-time", format!("{ms}ms"))
        }))
        .wrap_fn(|ctx, next| Box::pin(async move {
            let id = ctx.get("x-request-id").to_owned();
            if !id.is_empty() {
                ctx.state.insert("request_id", id);
            }
            next.run(ctx).await
        }))
        .wrap_fn(|ctx, _next| Box::pin(async move { route(ctx).await }));

    Server::bind("0.0.0.0:3000")
        .serve(app)
        .await
        .expect("server error");
}

async fn route(ctx: &mut Context) -> Result<(), Error> {
    let method = ctx.method().clone();
    let path = ctx.path().to_owned();
    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();

    match (method.as_str(), segments.as_slice()) {
        ("GET", [""]) => ctx.set_body("<h1>strata</h1>"),
        ("GET", ["old-home"]) => ctx.redirect("/", None)?,
        ("GET", ["users", id]) => {
            let id = id.parse().map_err(|_| Error::new(400, "user id must be a number"))?;
            ctx.response.set_json(&User { id, name: "alice".to_owned() })?;
        }
        ("POST", ["users"]) => {
            if !matches!(ctx.request.is(&["json"]), TypeMatch::Type(_)) {
                return Err(Error::from_status(415));
            }
            let raw = ctx.request.bytes().await?;
            let input: CreateUser = serde_json::from_slice(&raw)
                .map_err(|e| Error::new(400, format!("invalid body: {e}")))?;
            ctx.set_status(201)?;
            ctx.set("location", "/users/99")?;
            ctx.response.set_json(&User { id: 99, name: input.name })?;
        }
        _ => {}
    }
    Ok(())
}
