pub mod hyper_listener;
pub mod public_folder;
pub mod route_table;

/// Re-export commonly used types from adapters
pub use hyper_listener::HyperListener;
pub use public_folder::PublicFolder;
pub use route_table::{PathParams, RouteHandler, RouteTable, RouteTableError};
