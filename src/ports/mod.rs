pub mod listener;
pub mod router;
pub mod static_content;

pub use listener::{ListenerAdapter, ListenerError, ListenerResult, RequestHandler};
pub use router::{HandlerError, RouteOutcome, Router};
pub use static_content::{FileSystemError, FileSystemResult, StaticContent};
