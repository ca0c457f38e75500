use async_trait::async_trait;
use axum::body::Body as AxumBody;
use hyper::{Request, Response};
use thiserror::Error;

/// Error type for file system operations
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum FileSystemError {
    /// Error when encountering an IO issue
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Error when path is invalid
    #[error("Invalid path: {0}")]
    InvalidPath(String),
}

/// Result type for file system operations
pub type FileSystemResult<T> = Result<T, FileSystemError>;

/// StaticContent defines the port for a fallback source of static responses
#[async_trait]
pub trait StaticContent: Send + Sync + 'static {
    /// Resolve the request against this content root. Only the request head
    /// is passed; the body has already been released by the time static roots
    /// are consulted.
    ///
    /// # Returns
    /// `Some(response)` when the root can serve the request path, `None` when it
    /// has nothing for it
    async fn try_resolve(&self, req: &Request<()>) -> FileSystemResult<Option<Response<AxumBody>>>;

    /// Human readable description used in logs
    fn describe(&self) -> String;
}
