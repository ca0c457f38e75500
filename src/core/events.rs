//! Lifecycle event slots.
//!
//! Each of the four lifecycle points keeps an explicit ordered list of
//! callback handles. Invocation walks the list front to back; cloning onto
//! another set appends in the same order.
use std::{fmt, panic::AssertUnwindSafe, sync::Arc};

use crate::{
    core::{panic_message, server::RestServer},
    ports::router::HandlerError,
};

/// A lifecycle hook. It receives the server whose transition fired it.
pub type ServerEventHandler = Arc<dyn Fn(&RestServer) -> eyre::Result<()> + Send + Sync>;

/// The four lifecycle points a hook can be registered on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleEvent {
    BeforeStart,
    AfterStart,
    BeforeStop,
    AfterStop,
}

impl LifecycleEvent {
    pub const ALL: [LifecycleEvent; 4] = [
        LifecycleEvent::BeforeStart,
        LifecycleEvent::AfterStart,
        LifecycleEvent::BeforeStop,
        LifecycleEvent::AfterStop,
    ];
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleEvent::BeforeStart => "before_start",
            LifecycleEvent::AfterStart => "after_start",
            LifecycleEvent::BeforeStop => "before_stop",
            LifecycleEvent::AfterStop => "after_stop",
        };
        f.write_str(name)
    }
}

/// Ordered list of hooks for one lifecycle point
#[derive(Clone, Default)]
pub struct EventSlot {
    handlers: Vec<ServerEventHandler>,
}

impl EventSlot {
    pub fn push(&mut self, handler: ServerEventHandler) {
        self.handlers.push(handler);
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn handlers(&self) -> &[ServerEventHandler] {
        &self.handlers
    }

    /// Append every handler of `other` after the ones already registered here
    pub fn append_from(&mut self, other: &EventSlot) {
        self.handlers.extend(other.handlers.iter().cloned());
    }

    /// Run every hook in registration order.
    ///
    /// A failing or panicking hook is logged and does not stop the remaining
    /// hooks. The first fault is returned so the caller can apply its policy.
    pub fn invoke(&self, event: LifecycleEvent, server: &RestServer) -> Result<(), HandlerError> {
        let mut first_fault = None;

        for (index, handler) in self.handlers.iter().enumerate() {
            let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| handler(server)));
            let fault = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(report)) => HandlerError::Other(report),
                Err(payload) => HandlerError::Panicked(panic_message(payload.as_ref())),
            };

            tracing::error!(%event, hook = index, error = %fault, "Lifecycle hook failed");
            if first_fault.is_none() {
                first_fault = Some(fault);
            }
        }

        match first_fault {
            Some(fault) => Err(fault),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for EventSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSlot")
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

/// The full set of lifecycle hooks for a server
#[derive(Debug, Clone, Default)]
pub struct LifecycleEvents {
    before_start: EventSlot,
    after_start: EventSlot,
    before_stop: EventSlot,
    after_stop: EventSlot,
}

impl LifecycleEvents {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn slot(&self, event: LifecycleEvent) -> &EventSlot {
        match event {
            LifecycleEvent::BeforeStart => &self.before_start,
            LifecycleEvent::AfterStart => &self.after_start,
            LifecycleEvent::BeforeStop => &self.before_stop,
            LifecycleEvent::AfterStop => &self.after_stop,
        }
    }

    fn slot_mut(&mut self, event: LifecycleEvent) -> &mut EventSlot {
        match event {
            LifecycleEvent::BeforeStart => &mut self.before_start,
            LifecycleEvent::AfterStart => &mut self.after_start,
            LifecycleEvent::BeforeStop => &mut self.before_stop,
            LifecycleEvent::AfterStop => &mut self.after_stop,
        }
    }

    pub fn register(&mut self, event: LifecycleEvent, handler: ServerEventHandler) {
        self.slot_mut(event).push(handler);
    }

    /// Append all four slots onto `target`, keeping order and existing entries
    pub fn append_to(&self, target: &mut LifecycleEvents) {
        for event in LifecycleEvent::ALL {
            target.slot_mut(event).append_from(self.slot(event));
        }
    }

    pub fn total(&self) -> usize {
        LifecycleEvent::ALL
            .iter()
            .map(|event| self.slot(*event).len())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    fn recorder(log: &Arc<Mutex<Vec<&'static str>>>, name: &'static str) -> ServerEventHandler {
        let log = log.clone();
        Arc::new(move |_server: &RestServer| {
            log.lock().unwrap().push(name);
            Ok(())
        })
    }

    #[test]
    fn test_invoke_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut events = LifecycleEvents::new();
        events.register(LifecycleEvent::BeforeStart, recorder(&log, "a"));
        events.register(LifecycleEvent::BeforeStart, recorder(&log, "b"));
        events.register(LifecycleEvent::BeforeStart, recorder(&log, "c"));

        let server = RestServer::new();
        events
            .slot(LifecycleEvent::BeforeStart)
            .invoke(LifecycleEvent::BeforeStart, &server)
            .unwrap();

        assert_eq!(*log.lock().unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_clone_appends_after_existing() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut source = LifecycleEvents::new();
        source.register(LifecycleEvent::AfterStop, recorder(&log, "s1"));
        source.register(LifecycleEvent::AfterStop, recorder(&log, "s2"));

        let mut target = LifecycleEvents::new();
        target.register(LifecycleEvent::AfterStop, recorder(&log, "t1"));

        source.append_to(&mut target);
        source.append_to(&mut target);
        assert_eq!(target.slot(LifecycleEvent::AfterStop).len(), 5);
        assert_eq!(source.slot(LifecycleEvent::AfterStop).len(), 2);

        let server = RestServer::new();
        target
            .slot(LifecycleEvent::AfterStop)
            .invoke(LifecycleEvent::AfterStop, &server)
            .unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["t1", "s1", "s2", "s1", "s2"]);
    }

    #[test]
    fn test_faulting_hook_does_not_skip_the_rest() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut slot = EventSlot::default();
        slot.push(Arc::new(|_server: &RestServer| Err(eyre::eyre!("boom"))));
        slot.push(Arc::new(|_server: &RestServer| panic!("hook panic")));
        slot.push(recorder(&log, "after"));

        let server = RestServer::new();
        let fault = slot
            .invoke(LifecycleEvent::BeforeStop, &server)
            .unwrap_err();

        assert!(fault.to_string().contains("boom"));
        assert_eq!(*log.lock().unwrap(), vec!["after"]);
    }
}
