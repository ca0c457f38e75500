use async_trait::async_trait;
use axum::body::Body as AxumBody;
use hyper::{Request, Response, StatusCode};
use thiserror::Error;

/// Error raised by a route handler while producing a response
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum HandlerError {
    /// Handler-defined failure
    #[error("Request handling error: {0}")]
    RequestError(String),

    #[error("Internal server error: {0}")]
    InternalError(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    /// The handler panicked; the payload message is preserved when it is a string
    #[error("Handler panicked: {0}")]
    Panicked(String),

    #[error(transparent)]
    Other(#[from] eyre::Report),
}

impl HandlerError {
    /// Status code to use when the fault is turned into a response
    pub fn status_code(&self) -> StatusCode {
        match self {
            HandlerError::BadRequest(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Result of asking a router to handle a request.
///
/// A declined request is handed back so the caller can pass it on to the next
/// stage of the dispatch chain.
#[derive(Debug)]
pub enum RouteOutcome {
    /// A route matched and produced a terminal response
    Handled(Response<AxumBody>),
    /// No route matched; the request is returned untouched
    Declined(Request<AxumBody>),
}

impl RouteOutcome {
    pub fn is_handled(&self) -> bool {
        matches!(self, RouteOutcome::Handled(_))
    }
}

/// Router defines the port for matching requests to handlers
#[async_trait]
pub trait Router: Send + Sync + 'static {
    /// Try to route a request
    ///
    /// # Returns
    /// `Handled` with the handler's response, `Declined` when nothing matched,
    /// or an error when the matched handler faulted
    async fn try_route(&self, req: Request<AxumBody>) -> Result<RouteOutcome, HandlerError>;
}
