//! Method + path route table, the default [`Router`].
//!
//! Patterns use matchit syntax: `/users/{id}` captures one segment and
//! `/files/{*rest}` captures the remainder. Captured values are placed in the
//! request extensions as [`PathParams`].
use std::{collections::HashMap, future::Future, sync::Arc};

use async_trait::async_trait;
use axum::body::Body as AxumBody;
use hyper::{Method, Request, Response};
use thiserror::Error;

use crate::ports::router::{HandlerError, RouteOutcome, Router};

/// Error returned when a route cannot be registered
#[derive(Error, Debug)]
pub enum RouteTableError {
    #[error("Invalid route '{pattern}': {source}")]
    Insert {
        pattern: String,
        #[source]
        source: matchit::InsertError,
    },
}

/// Handler bound to a route
#[async_trait]
pub trait RouteHandler: Send + Sync + 'static {
    async fn call(&self, req: Request<AxumBody>) -> Result<Response<AxumBody>, HandlerError>;
}

#[async_trait]
impl<F, Fut> RouteHandler for F
where
    F: Fn(Request<AxumBody>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Response<AxumBody>, HandlerError>> + Send + 'static,
{
    async fn call(&self, req: Request<AxumBody>) -> Result<Response<AxumBody>, HandlerError> {
        (self)(req).await
    }
}

/// Path parameters captured by the matched route
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathParams(pub HashMap<String, String>);

impl PathParams {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }
}

type HandlerTree = matchit::Router<Arc<dyn RouteHandler>>;

/// Routes keyed by method, with an extra tree for method-agnostic routes
#[derive(Default)]
pub struct RouteTable {
    by_method: HashMap<Method, HandlerTree>,
    any_method: HandlerTree,
    len: usize,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for `method` (or every method when `None`)
    pub fn add<H>(
        &mut self,
        method: Option<Method>,
        pattern: &str,
        handler: H,
    ) -> Result<(), RouteTableError>
    where
        H: RouteHandler,
    {
        let tree = match method {
            Some(method) => self.by_method.entry(method).or_default(),
            None => &mut self.any_method,
        };
        tree.insert(pattern, Arc::new(handler) as Arc<dyn RouteHandler>)
            .map_err(|source| RouteTableError::Insert {
                pattern: pattern.to_string(),
                source,
            })?;
        self.len += 1;
        Ok(())
    }

    pub fn get<H>(&mut self, pattern: &str, handler: H) -> Result<(), RouteTableError>
    where
        H: RouteHandler,
    {
        self.add(Some(Method::GET), pattern, handler)
    }

    pub fn post<H>(&mut self, pattern: &str, handler: H) -> Result<(), RouteTableError>
    where
        H: RouteHandler,
    {
        self.add(Some(Method::POST), pattern, handler)
    }

    pub fn put<H>(&mut self, pattern: &str, handler: H) -> Result<(), RouteTableError>
    where
        H: RouteHandler,
    {
        self.add(Some(Method::PUT), pattern, handler)
    }

    pub fn delete<H>(&mut self, pattern: &str, handler: H) -> Result<(), RouteTableError>
    where
        H: RouteHandler,
    {
        self.add(Some(Method::DELETE), pattern, handler)
    }

    /// Register a handler for every method
    pub fn any<H>(&mut self, pattern: &str, handler: H) -> Result<(), RouteTableError>
    where
        H: RouteHandler,
    {
        self.add(None, pattern, handler)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn lookup(&self, method: &Method, path: &str) -> Option<(Arc<dyn RouteHandler>, PathParams)> {
        let mut trees = vec![self.by_method.get(method)];
        if method == Method::HEAD {
            trees.push(self.by_method.get(&Method::GET));
        }
        trees.push(Some(&self.any_method));

        trees.into_iter().flatten().find_map(|tree| {
            tree.at(path).ok().map(|matched| {
                let params = matched
                    .params
                    .iter()
                    .map(|(key, value)| (key.to_string(), value.to_string()))
                    .collect();
                (matched.value.clone(), PathParams(params))
            })
        })
    }
}

impl std::fmt::Debug for RouteTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteTable")
            .field("routes", &self.len)
            .field("methods", &self.by_method.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[async_trait]
impl Router for RouteTable {
    async fn try_route(&self, mut req: Request<AxumBody>) -> Result<RouteOutcome, HandlerError> {
        let Some((handler, params)) = self.lookup(req.method(), req.uri().path()) else {
            return Ok(RouteOutcome::Declined(req));
        };
        tracing::trace!(method = %req.method(), path = %req.uri().path(), "Route matched");
        req.extensions_mut().insert(params);
        handler.call(req).await.map(RouteOutcome::Handled)
    }
}
