//! Request dispatch chain.
//!
//! A request is offered to the router first. When the router declines, the
//! static roots are tried in registration order. When nothing answers, the
//! chain produces a `404 Not Found`.
use std::{fmt, panic::AssertUnwindSafe, sync::Arc};

use async_trait::async_trait;
use axum::body::Body as AxumBody;
use futures_util::FutureExt;
use hyper::{Method, Request, Response, StatusCode, header};
use tracing::{Instrument, Span};

use crate::{
    core::{
        panic_message,
        settings::{ExceptionPolicy, PolicySwitch, ServerSettings},
    },
    error::{ServerError, ServerResult},
    ports::{
        listener::RequestHandler,
        router::{HandlerError, RouteOutcome, Router},
        static_content::StaticContent,
    },
};

/// Immutable snapshot of everything needed to answer requests
#[derive(Clone)]
pub struct DispatchChain {
    router: Arc<dyn Router>,
    roots: Vec<Arc<dyn StaticContent>>,
    policy: PolicySwitch,
    span: Span,
}

impl DispatchChain {
    pub fn new(
        router: Arc<dyn Router>,
        roots: Vec<Arc<dyn StaticContent>>,
        policy: PolicySwitch,
        span: Span,
    ) -> Self {
        Self {
            router,
            roots,
            policy,
            span,
        }
    }

    /// Snapshot the router and static roots of `settings`. The policy stays
    /// live through `policy`.
    pub fn from_settings(settings: &ServerSettings, policy: PolicySwitch) -> Self {
        Self::new(
            settings.router(),
            settings.public_folders().to_vec(),
            policy,
            settings.logger().clone(),
        )
    }

    /// Produce the response for one request
    pub async fn dispatch(&self, req: Request<AxumBody>) -> ServerResult<Response<AxumBody>> {
        let method = req.method().clone();
        let path = req.uri().path().to_string();

        let routed = AssertUnwindSafe(self.router.try_route(req))
            .catch_unwind()
            .await;

        let req = match routed {
            Ok(Ok(RouteOutcome::Handled(response))) => {
                tracing::debug!(
                    %method,
                    %path,
                    status = %response.status(),
                    "Request handled by router"
                );
                return Ok(response);
            }
            Ok(Ok(RouteOutcome::Declined(req))) => req,
            Ok(Err(fault)) => return self.handle_fault(&method, &path, fault),
            Err(payload) => {
                let fault = HandlerError::Panicked(panic_message(payload.as_ref()));
                return self.handle_fault(&method, &path, fault);
            }
        };

        // the body is not Sync; static roots only need the head
        let head = Request::from_parts(req.into_parts().0, ());
        for root in &self.roots {
            match root.try_resolve(&head).await {
                Ok(Some(response)) => {
                    tracing::debug!(
                        %method,
                        %path,
                        root = %root.describe(),
                        "Request served from static root"
                    );
                    return Ok(response);
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(
                        %method,
                        %path,
                        root = %root.describe(),
                        error = %e,
                        "Static root failed to resolve request"
                    );
                }
            }
        }

        tracing::debug!(%method, %path, "No route or static content matched");
        Ok(not_found())
    }

    fn handle_fault(
        &self,
        method: &Method,
        path: &str,
        fault: HandlerError,
    ) -> ServerResult<Response<AxumBody>> {
        let origin = format!("{method} {path}");
        match self.policy.get() {
            ExceptionPolicy::Rethrow => Err(ServerError::fault(origin, fault)),
            ExceptionPolicy::LogAndContinue => {
                tracing::error!(%method, %path, error = %fault, "Route handler failed");
                Ok(error_response(fault.status_code()))
            }
        }
    }
}

#[async_trait]
impl RequestHandler for DispatchChain {
    async fn handle(&self, req: Request<AxumBody>) -> Result<Response<AxumBody>, ServerError> {
        let span = self.span.clone();
        self.dispatch(req).instrument(span).await
    }
}

impl fmt::Debug for DispatchChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let roots: Vec<String> = self.roots.iter().map(|r| r.describe()).collect();
        f.debug_struct("DispatchChain")
            .field("roots", &roots)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

/// Standard response for a request nothing could answer
pub fn not_found() -> Response<AxumBody> {
    error_response(StatusCode::NOT_FOUND)
}

/// Plain-text response carrying the canonical reason phrase of `status`
pub fn error_response(status: StatusCode) -> Response<AxumBody> {
    let reason = status.canonical_reason().unwrap_or("Error");
    let mut response = Response::new(AxumBody::from(reason.to_string()));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}
