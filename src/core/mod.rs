use std::any::Any;

pub mod dispatch;
pub mod events;
pub mod prefix;
pub mod server;
pub mod settings;
pub mod state;

pub use dispatch::DispatchChain;
pub use events::{EventSlot, LifecycleEvent, LifecycleEvents, ServerEventHandler};
pub use prefix::{DEFAULT_LISTENER_PREFIX, ListenerPrefix, PrefixError};
pub use server::RestServer;
pub use settings::{ExceptionPolicy, PolicySwitch, ServerSettings};
pub use state::ServerState;

/// Best-effort text of a panic payload
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
