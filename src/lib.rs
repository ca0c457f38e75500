//! trellis - an embeddable HTTP server with an explicit lifecycle.
//!
//! A [`RestServer`] owns a listen prefix, a router and an ordered list of static
//! roots. Every request is offered to the router first, then to each static root
//! in registration order, and answered with `404 Not Found` when nobody claims
//! it. The server moves through `Stopped -> Starting -> Running -> Stopping`
//! and back, firing ordered hooks around each transition. Configuration that
//! shapes dispatch can only change while the server is stopped.
//!
//! # Quick Example
//! ```no_run
//! use std::sync::Arc;
//!
//! use axum::body::Body;
//! use hyper::{Request, Response};
//! use trellis::{RestServer, adapters::RouteTable, ports::router::HandlerError};
//!
//! # fn main() -> eyre::Result<()> {
//! let mut routes = RouteTable::new();
//! routes.get("/hello", |_req: Request<Body>| async {
//!     Ok::<_, HandlerError>(Response::new(Body::from("hello")))
//! })?;
//!
//! let server = RestServer::with_prefix("http://localhost:8080/")?;
//! server.set_router(Arc::new(routes))?;
//! server.on_after_start(|server| {
//!     tracing::info!("listening on {}", server.listener_prefix());
//!     Ok(())
//! });
//! server.start()?;
//! // ...
//! server.stop()?;
//! # Ok(()) }
//! ```
//!
//! # Architecture
//! The crate separates **ports** (traits) from **adapters** (implementations) while keeping
//! the lifecycle and dispatch logic inside `core`. The default adapters are a hyper-based
//! listener, a matchit route table and a filesystem-backed public folder; any of them can
//! be swapped for a custom implementation of the matching port.
//!
//! # Error Handling
//! Library operations return [`ServerResult`]. Faults raised by route handlers and
//! lifecycle hooks are logged and answered with `500` by default; with
//! [`ExceptionPolicy::Rethrow`] they are handed back to the caller instead.
pub mod config;
pub mod error;
pub mod ports;
pub mod tracing_setup;
pub mod utils;

pub mod adapters;
pub mod core;

pub use crate::{
    adapters::{HyperListener, PublicFolder, RouteTable},
    core::{
        ExceptionPolicy, LifecycleEvent, ListenerPrefix, RestServer, ServerSettings, ServerState,
    },
    error::{ServerError, ServerResult},
};
