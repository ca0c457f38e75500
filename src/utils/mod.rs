pub mod graceful_shutdown;
pub mod request_tracker;

pub use graceful_shutdown::{GracefulShutdown, ShutdownReason, ShutdownToken};
pub use request_tracker::{ConnectionInfo, ConnectionStats, RequestGuard, RequestTracker};
