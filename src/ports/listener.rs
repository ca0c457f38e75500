use std::{net::SocketAddr, sync::Arc};

use async_trait::async_trait;
use axum::body::Body as AxumBody;
use hyper::{Request, Response};
use thiserror::Error;

use crate::{core::prefix::ListenerPrefix, error::ServerError};

/// Error type for listener operations
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ListenerError {
    /// The socket could not be bound (address in use, permission denied, ...)
    #[error("Failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// The prefix host did not resolve to any socket address
    #[error("Could not resolve listen address '{0}'")]
    Unresolvable(String),

    /// The listener cannot serve this kind of prefix
    #[error("Unsupported listener prefix: {0}")]
    Unsupported(String),

    /// `bind` was called on a listener that already holds a socket
    #[error("Listener is already bound to {0}")]
    AlreadyBound(SocketAddr),

    /// `begin_accept` was called without a successful `bind`
    #[error("Listener is not bound")]
    NotBound,

    /// The async runtime backing the listener could not be created
    #[error("Listener runtime error: {0}")]
    Runtime(#[source] std::io::Error),

    /// A listener call panicked
    #[error("Listener panicked: {0}")]
    Panicked(String),
}

/// Result type for listener operations
pub type ListenerResult<T> = Result<T, ListenerError>;

/// Per-request callback handed to a listener by [`ListenerAdapter::begin_accept`].
///
/// Returning an error tells the listener the request faulted and should not be
/// answered; the listener drops the connection and logs the fault.
#[async_trait]
pub trait RequestHandler: Send + Sync + 'static {
    async fn handle(&self, req: Request<AxumBody>) -> Result<Response<AxumBody>, ServerError>;
}

/// ListenerAdapter defines the port for the socket-level accept/parse primitive.
///
/// All methods are synchronous so the lifecycle controller can drive them from
/// any thread; implementations run their accept loop on their own workers.
pub trait ListenerAdapter: Send + Sync + 'static {
    /// Bind the socket for `prefix` without accepting connections yet.
    ///
    /// # Returns
    /// The bound local address (useful when the prefix asks for port 0)
    fn bind(&self, prefix: &ListenerPrefix) -> ListenerResult<SocketAddr>;

    /// Start the accept loop. `handler` is invoked once per request.
    fn begin_accept(&self, handler: Arc<dyn RequestHandler>) -> ListenerResult<()>;

    /// Stop accepting new connections. In-flight requests keep running.
    fn unbind(&self);

    /// Whether the listener currently holds a bound socket
    fn is_listening(&self) -> bool;

    /// The bound address, if any
    fn local_addr(&self) -> Option<SocketAddr>;

    /// Number of requests currently being processed
    fn active_requests(&self) -> u64 {
        0
    }
}
