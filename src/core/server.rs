//! Lifecycle controller.
//!
//! `RestServer` owns the settings store, the server state and a listener. All
//! start/stop transitions run behind a single mutex gate so only one of them is
//! ever in flight per instance. The gate is never touched on the request path:
//! requests are answered by a [`DispatchChain`] snapshot taken at start.
//!
//! ```text
//! Stopped -> Starting -> Running -> Stopping -> Stopped
//!               |
//!               +-> Stopped   (bind failure, rethrown start hook fault)
//! ```
use std::{
    fmt,
    net::SocketAddr,
    panic::{self, AssertUnwindSafe},
    sync::{
        Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard,
        TryLockError,
    },
    thread::{self, JoinHandle, ThreadId},
};

use tracing::Span;

use crate::{
    adapters::HyperListener,
    core::{
        dispatch::DispatchChain,
        events::{EventSlot, LifecycleEvent, ServerEventHandler},
        panic_message,
        prefix::ListenerPrefix,
        settings::{ExceptionPolicy, PolicySwitch, ServerSettings},
        state::{ServerState, StateCell},
    },
    error::{ServerError, ServerResult},
    ports::{
        listener::{ListenerAdapter, ListenerError, ListenerResult},
        router::{HandlerError, Router},
        static_content::StaticContent,
    },
};

/// How a caller waits for the transition gate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GateMode {
    /// Fail with a state violation if another transition holds the gate
    Try,
    /// Block until the gate is free
    Wait,
}

/// Held for the duration of a transition or a guarded settings write
struct TransitionGuard<'a> {
    owner: &'a Mutex<Option<ThreadId>>,
    _gate: MutexGuard<'a, ()>,
}

impl Drop for TransitionGuard<'_> {
    fn drop(&mut self) {
        *self.owner.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

/// An embeddable HTTP server with routing, static content and lifecycle hooks
pub struct RestServer {
    settings: RwLock<ServerSettings>,
    policy: PolicySwitch,
    state: StateCell,
    gate: Mutex<()>,
    transition_owner: Mutex<Option<ThreadId>>,
    listener: Box<dyn ListenerAdapter>,
}

impl RestServer {
    /// Server on the default prefix `http://localhost:1234/`
    pub fn new() -> Self {
        Self::with_settings(ServerSettings::new())
    }

    /// Server on a custom prefix
    pub fn with_prefix(prefix: &str) -> ServerResult<Self> {
        let mut settings = ServerSettings::new();
        settings.set_listener_prefix(ListenerPrefix::parse(prefix)?);
        Ok(Self::with_settings(settings))
    }

    /// Server using the bundled hyper listener
    pub fn with_settings(settings: ServerSettings) -> Self {
        Self::with_listener(settings, HyperListener::new())
    }

    /// Server using a custom listener implementation
    pub fn with_listener(settings: ServerSettings, listener: impl ListenerAdapter) -> Self {
        Self {
            policy: PolicySwitch::new(settings.exception_policy()),
            settings: RwLock::new(settings),
            state: StateCell::new(),
            gate: Mutex::new(()),
            transition_owner: Mutex::new(None),
            listener: Box::new(listener),
        }
    }

    /// Current lifecycle state
    pub fn state(&self) -> ServerState {
        self.state.get()
    }

    /// Whether the listener holds a bound socket
    pub fn is_listening(&self) -> bool {
        self.listener.is_listening()
    }

    /// Bound address while listening; resolves port 0 prefixes
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.local_addr()
    }

    /// Requests the listener is processing right now
    pub fn active_requests(&self) -> u64 {
        self.listener.active_requests()
    }

    /// Start listening.
    ///
    /// Fires BeforeStart, binds, fires AfterStart and only then starts
    /// accepting. Fails with a state violation if the server is not stopped or
    /// another thread is mid-transition, and with a bind failure if the socket
    /// cannot be bound. In both failure cases the server is left stopped.
    pub fn start(&self) -> ServerResult<()> {
        let span = self.logger();
        let _entered = span.enter();

        let _guard = self.acquire_gate("start", GateMode::Try)?;
        let state = self.state.get();
        if state != ServerState::Stopped {
            return Err(ServerError::state_violation("start", state));
        }
        self.state.transition(ServerState::Starting);

        let (policy, prefix) = {
            let settings = self.read_settings();
            let policy = settings.exception_policy();
            self.policy.set(policy);
            (policy, settings.listener_prefix().clone())
        };
        tracing::info!(%prefix, "Starting server");

        if let Err(fault) = self.fire(LifecycleEvent::BeforeStart) {
            if policy.rethrows() {
                self.state.transition(ServerState::Stopped);
                return Err(ServerError::fault("before_start hook", fault));
            }
        }

        let chain = {
            let mut settings = self.write_settings();
            if settings.ensure_default_public_folder() {
                tracing::debug!("No static root configured, installed the default public folder");
            }
            DispatchChain::from_settings(&settings, self.policy.clone())
        };

        let local_addr = match self.call_listener(|listener| listener.bind(&prefix)) {
            Ok(addr) => addr,
            Err(e) => {
                tracing::error!(%prefix, error = %e, "Failed to bind listener");
                self.state.transition(ServerState::Stopped);
                return Err(ServerError::BindFailure(e));
            }
        };

        if let Err(fault) = self.fire(LifecycleEvent::AfterStart) {
            if policy.rethrows() {
                self.unbind_listener();
                self.state.transition(ServerState::Stopped);
                return Err(ServerError::fault("after_start hook", fault));
            }
        }

        let handler = Arc::new(chain);
        if let Err(e) = self.call_listener(|listener| listener.begin_accept(handler)) {
            tracing::error!(%prefix, error = %e, "Failed to start accept loop");
            self.unbind_listener();
            self.state.transition(ServerState::Stopped);
            return Err(ServerError::BindFailure(e));
        }

        self.state.transition(ServerState::Running);
        tracing::info!(%prefix, %local_addr, "Server is listening");
        Ok(())
    }

    /// Stop listening.
    ///
    /// A no-op on a server that is not running. When a start is in progress on
    /// another thread, waits for it to settle first. Hook faults never abort
    /// shutdown; under [`ExceptionPolicy::Rethrow`] the first one is returned
    /// once the server is stopped.
    pub fn stop(&self) -> ServerResult<()> {
        let span = self.logger();
        let _entered = span.enter();

        let _guard = self.acquire_gate("stop", GateMode::Wait)?;
        let state = self.state.get();
        if state != ServerState::Running {
            tracing::debug!(%state, "Stop requested on a server that is not running");
            return Ok(());
        }
        self.state.transition(ServerState::Stopping);

        let policy = self.read_settings().exception_policy();
        tracing::info!("Stopping server");

        let mut first_fault = None;
        if let Err(fault) = self.fire(LifecycleEvent::BeforeStop) {
            first_fault.get_or_insert(ServerError::fault("before_stop hook", fault));
        }

        self.unbind_listener();
        self.state.transition(ServerState::Stopped);

        if let Err(fault) = self.fire(LifecycleEvent::AfterStop) {
            first_fault.get_or_insert(ServerError::fault("after_stop hook", fault));
        }

        tracing::info!(in_flight = self.active_requests(), "Server stopped");
        match first_fault {
            Some(fault) if policy.rethrows() => Err(fault),
            _ => Ok(()),
        }
    }

    /// Stop the server from a dedicated thread.
    ///
    /// Safe to call from a request handler or lifecycle hook of this server.
    /// Join the returned handle to observe the result.
    pub fn thread_safe_stop(self: &Arc<Self>) -> JoinHandle<ServerResult<()>> {
        let server = Arc::clone(self);
        thread::spawn(move || server.stop())
    }

    /// The configured listen prefix
    pub fn listener_prefix(&self) -> ListenerPrefix {
        self.read_settings().listener_prefix().clone()
    }

    /// Change the listen prefix. Only allowed while stopped.
    pub fn set_listener_prefix(&self, prefix: &str) -> ServerResult<()> {
        let prefix = ListenerPrefix::parse(prefix)?;
        self.update_guarded("change the listener prefix", |settings| {
            settings.set_listener_prefix(prefix)
        })
    }

    /// The router requests are offered to first
    pub fn router(&self) -> Arc<dyn Router> {
        self.read_settings().router()
    }

    /// Replace the router. Only allowed while stopped.
    pub fn set_router(&self, router: Arc<dyn Router>) -> ServerResult<()> {
        self.update_guarded("replace the router", |settings| settings.set_router(router))
    }

    /// Static roots in lookup order
    pub fn public_folders(&self) -> Vec<Arc<dyn StaticContent>> {
        self.read_settings().public_folders().to_vec()
    }

    /// The first static root, if any is configured
    pub fn public_folder(&self) -> Option<Arc<dyn StaticContent>> {
        self.read_settings().public_folder().cloned()
    }

    /// Replace the default static root. Only allowed while stopped.
    pub fn set_public_folder(&self, folder: Arc<dyn StaticContent>) -> ServerResult<()> {
        self.update_guarded("change static content roots", |settings| {
            settings.set_public_folder(folder)
        })
    }

    /// Append a static root. Only allowed while stopped.
    pub fn add_public_folder(&self, folder: Arc<dyn StaticContent>) -> ServerResult<()> {
        self.update_guarded("change static content roots", |settings| {
            settings.add_public_folder(folder)
        })
    }

    /// Replace all static roots. Only allowed while stopped.
    pub fn set_public_folders(&self, folders: Vec<Arc<dyn StaticContent>>) -> ServerResult<()> {
        self.update_guarded("change static content roots", |settings| {
            settings.set_public_folders(folders)
        })
    }

    /// Apply several guarded changes at once. Only allowed while stopped.
    pub fn configure<T>(&self, apply: impl FnOnce(&mut ServerSettings) -> T) -> ServerResult<T> {
        self.update_guarded("reconfigure", apply)
    }

    pub fn exception_policy(&self) -> ExceptionPolicy {
        self.read_settings().exception_policy()
    }

    /// Change how handler and hook faults are treated.
    ///
    /// Allowed in any state. On a running server the next request already
    /// follows the new policy.
    pub fn set_exception_policy(&self, policy: ExceptionPolicy) {
        let mut settings = self.write_settings();
        settings.set_exception_policy(policy);
        self.policy.set(policy);
    }

    /// Whether faults are handed back to the caller
    pub fn enable_throwing_exceptions(&self) -> bool {
        self.read_settings().enable_throwing_exceptions()
    }

    /// Flag form of [`RestServer::set_exception_policy`]
    pub fn set_enable_throwing_exceptions(&self, enabled: bool) {
        self.set_exception_policy(ExceptionPolicy::from_flag(enabled));
    }

    /// Span all lifecycle and dispatch logging of this server runs in
    pub fn logger(&self) -> Span {
        self.read_settings().logger().clone()
    }

    /// Replace the logging span. Takes effect at the next start.
    pub fn set_logger(&self, logger: Span) {
        self.write_settings().set_logger(logger);
    }

    /// Snapshot of the current settings
    pub fn settings(&self) -> ServerSettings {
        self.read_settings().clone()
    }

    /// Register a hook on one of the lifecycle points
    pub fn on(&self, event: LifecycleEvent, handler: ServerEventHandler) {
        self.write_settings().on(event, handler);
    }

    /// Run `hook` before the listener is bound
    pub fn on_before_start<F>(&self, hook: F)
    where
        F: Fn(&RestServer) -> eyre::Result<()> + Send + Sync + 'static,
    {
        self.on(LifecycleEvent::BeforeStart, Arc::new(hook));
    }

    /// Run `hook` once bound, before requests are accepted
    pub fn on_after_start<F>(&self, hook: F)
    where
        F: Fn(&RestServer) -> eyre::Result<()> + Send + Sync + 'static,
    {
        self.on(LifecycleEvent::AfterStart, Arc::new(hook));
    }

    /// Run `hook` before the listener is released
    pub fn on_before_stop<F>(&self, hook: F)
    where
        F: Fn(&RestServer) -> eyre::Result<()> + Send + Sync + 'static,
    {
        self.on(LifecycleEvent::BeforeStop, Arc::new(hook));
    }

    /// Run `hook` after the server reached the stopped state
    pub fn on_after_stop<F>(&self, hook: F)
    where
        F: Fn(&RestServer) -> eyre::Result<()> + Send + Sync + 'static,
    {
        self.on(LifecycleEvent::AfterStop, Arc::new(hook));
    }

    /// Append every hook of this server onto `other`, keeping order and
    /// leaving the hooks already registered there in front
    pub fn clone_event_handlers_to(&self, other: &RestServer) {
        let events = self.read_settings().events().clone();
        events.append_to(other.write_settings().events_mut());
    }

    fn fire(&self, event: LifecycleEvent) -> Result<(), HandlerError> {
        // snapshot so hooks may register further hooks without deadlocking
        let slot: EventSlot = self.read_settings().events().slot(event).clone();
        if slot.is_empty() {
            return Ok(());
        }
        tracing::debug!(%event, hooks = slot.len(), "Firing lifecycle hooks");
        slot.invoke(event, self)
    }

    /// Call into the listener, turning a panic into an error so a failed
    /// start still returns the server to the stopped state
    fn call_listener<T>(
        &self,
        call: impl FnOnce(&dyn ListenerAdapter) -> ListenerResult<T>,
    ) -> ListenerResult<T> {
        panic::catch_unwind(AssertUnwindSafe(|| call(&*self.listener))).unwrap_or_else(
            |payload| Err(ListenerError::Panicked(panic_message(payload.as_ref()))),
        )
    }

    fn unbind_listener(&self) {
        let unbound = self.call_listener(|listener| {
            listener.unbind();
            Ok(())
        });
        if let Err(e) = unbound {
            tracing::error!(error = %e, "Listener failed to unbind");
        }
    }

    fn update_guarded<T>(
        &self,
        operation: &'static str,
        apply: impl FnOnce(&mut ServerSettings) -> T,
    ) -> ServerResult<T> {
        let _guard = self.acquire_gate(operation, GateMode::Wait)?;
        let state = self.state.get();
        if state != ServerState::Stopped {
            tracing::warn!(
                %state,
                operation,
                "Rejected configuration change on an active server"
            );
            return Err(ServerError::state_violation(operation, state));
        }
        Ok(apply(&mut self.write_settings()))
    }

    fn acquire_gate(
        &self,
        operation: &'static str,
        mode: GateMode,
    ) -> ServerResult<TransitionGuard<'_>> {
        let current = thread::current().id();
        if *self.owner() == Some(current) {
            // a hook of this server calling back into it
            return Err(ServerError::state_violation(operation, self.state.get()));
        }

        let gate = match mode {
            GateMode::Wait => self.gate.lock().unwrap_or_else(PoisonError::into_inner),
            GateMode::Try => match self.gate.try_lock() {
                Ok(gate) => gate,
                Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
                Err(TryLockError::WouldBlock) => {
                    return Err(ServerError::state_violation(operation, self.state.get()));
                }
            },
        };

        *self.owner() = Some(current);
        Ok(TransitionGuard {
            owner: &self.transition_owner,
            _gate: gate,
        })
    }

    fn owner(&self) -> MutexGuard<'_, Option<ThreadId>> {
        self.transition_owner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn read_settings(&self) -> RwLockReadGuard<'_, ServerSettings> {
        self.settings.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_settings(&self) -> RwLockWriteGuard<'_, ServerSettings> {
        self.settings.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for RestServer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for RestServer {
    fn drop(&mut self) {
        if self.state.get() == ServerState::Running {
            if let Err(e) = self.stop() {
                tracing::warn!(error = %e, "Error while stopping server on drop");
            }
        }
    }
}

impl fmt::Debug for RestServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RestServer")
            .field("state", &self.state.get())
            .field("listening", &self.listener.is_listening())
            .field("settings", &*self.read_settings())
            .finish_non_exhaustive()
    }
}
