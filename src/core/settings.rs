//! Settings store for a server instance.
//!
//! `ServerSettings` is plain storage. It does not know whether a server is
//! running; the state guard lives in [`RestServer`](crate::RestServer), which
//! owns the store once the settings are handed over.
use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use tracing::Span;

use crate::{
    adapters::{PublicFolder, RouteTable},
    config::models::ServerConfig,
    core::{
        events::{LifecycleEvent, LifecycleEvents, ServerEventHandler},
        prefix::ListenerPrefix,
    },
    error::ServerResult,
    ports::{router::Router, static_content::StaticContent},
    tracing_setup::create_server_span,
};

/// What happens to a fault raised by a route handler or lifecycle hook
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExceptionPolicy {
    /// Log the fault; requests get a 500 response and transitions carry on
    #[default]
    LogAndContinue,
    /// Hand the fault back to whoever called into the server
    Rethrow,
}

impl ExceptionPolicy {
    pub fn from_flag(enable_throwing_exceptions: bool) -> Self {
        if enable_throwing_exceptions {
            ExceptionPolicy::Rethrow
        } else {
            ExceptionPolicy::LogAndContinue
        }
    }

    pub fn rethrows(self) -> bool {
        self == ExceptionPolicy::Rethrow
    }
}

/// Exception policy shared between a server and its running dispatch chain.
///
/// Clones observe the same value, so flipping the policy on a running server
/// affects the next request.
#[derive(Clone, Default)]
pub struct PolicySwitch(Arc<AtomicBool>);

impl PolicySwitch {
    pub fn new(policy: ExceptionPolicy) -> Self {
        Self(Arc::new(AtomicBool::new(policy.rethrows())))
    }

    pub fn get(&self) -> ExceptionPolicy {
        ExceptionPolicy::from_flag(self.0.load(Ordering::Acquire))
    }

    pub fn set(&self, policy: ExceptionPolicy) {
        self.0.store(policy.rethrows(), Ordering::Release);
    }
}

impl fmt::Debug for PolicySwitch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PolicySwitch").field(&self.get()).finish()
    }
}

/// Configuration of a single server
#[derive(Clone)]
pub struct ServerSettings {
    listener_prefix: ListenerPrefix,
    router: Arc<dyn Router>,
    public_folders: Vec<Arc<dyn StaticContent>>,
    logger: Span,
    exception_policy: ExceptionPolicy,
    events: LifecycleEvents,
}

impl ServerSettings {
    pub fn new() -> Self {
        let listener_prefix = ListenerPrefix::default();
        Self {
            logger: create_server_span(listener_prefix.as_str()),
            listener_prefix,
            router: Arc::new(RouteTable::new()),
            public_folders: Vec::new(),
            exception_policy: ExceptionPolicy::default(),
            events: LifecycleEvents::new(),
        }
    }

    /// Build settings from a deserialized configuration file
    pub fn from_config(config: &ServerConfig) -> ServerResult<Self> {
        let mut settings = Self::new();
        settings.listener_prefix = ListenerPrefix::parse(&config.listener_prefix)?;
        settings.logger = create_server_span(settings.listener_prefix.as_str());
        settings.exception_policy = ExceptionPolicy::from_flag(config.enable_throwing_exceptions);
        settings.public_folders = config
            .public_folders
            .iter()
            .map(|folder| Arc::new(PublicFolder::from_config(folder)) as Arc<dyn StaticContent>)
            .collect();
        Ok(settings)
    }

    pub fn listener_prefix(&self) -> &ListenerPrefix {
        &self.listener_prefix
    }

    pub fn set_listener_prefix(&mut self, prefix: ListenerPrefix) {
        self.listener_prefix = prefix;
    }

    pub fn router(&self) -> Arc<dyn Router> {
        self.router.clone()
    }

    pub fn set_router(&mut self, router: Arc<dyn Router>) {
        self.router = router;
    }

    /// All static roots in lookup order
    pub fn public_folders(&self) -> &[Arc<dyn StaticContent>] {
        &self.public_folders
    }

    pub fn set_public_folders(&mut self, folders: Vec<Arc<dyn StaticContent>>) {
        self.public_folders = folders;
    }

    /// The default static root, i.e. the first one in lookup order
    pub fn public_folder(&self) -> Option<&Arc<dyn StaticContent>> {
        self.public_folders.first()
    }

    /// Replace the default static root, or install it when there is none
    pub fn set_public_folder(&mut self, folder: Arc<dyn StaticContent>) {
        match self.public_folders.first_mut() {
            Some(slot) => *slot = folder,
            None => self.public_folders.push(folder),
        }
    }

    /// Append a static root after the existing ones
    pub fn add_public_folder(&mut self, folder: Arc<dyn StaticContent>) {
        self.public_folders.push(folder);
    }

    /// Install a [`PublicFolder::default`] when no static root is configured.
    ///
    /// Returns whether a folder was added.
    pub fn ensure_default_public_folder(&mut self) -> bool {
        if !self.public_folders.is_empty() {
            return false;
        }
        self.public_folders.push(Arc::new(PublicFolder::default()));
        true
    }

    pub fn logger(&self) -> &Span {
        &self.logger
    }

    pub fn set_logger(&mut self, logger: Span) {
        self.logger = logger;
    }

    pub fn exception_policy(&self) -> ExceptionPolicy {
        self.exception_policy
    }

    pub fn set_exception_policy(&mut self, policy: ExceptionPolicy) {
        self.exception_policy = policy;
    }

    pub fn enable_throwing_exceptions(&self) -> bool {
        self.exception_policy.rethrows()
    }

    pub fn set_enable_throwing_exceptions(&mut self, enabled: bool) {
        self.exception_policy = ExceptionPolicy::from_flag(enabled);
    }

    pub fn events(&self) -> &LifecycleEvents {
        &self.events
    }

    pub(crate) fn events_mut(&mut self) -> &mut LifecycleEvents {
        &mut self.events
    }

    pub fn on(&mut self, event: LifecycleEvent, handler: ServerEventHandler) {
        self.events.register(event, handler);
    }

    /// Append this store's hooks onto another store, preserving order
    pub fn clone_event_handlers(&self, target: &mut ServerSettings) {
        self.events.append_to(&mut target.events);
    }
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ServerSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let folders: Vec<String> = self.public_folders.iter().map(|f| f.describe()).collect();
        f.debug_struct("ServerSettings")
            .field("listener_prefix", &self.listener_prefix.as_str())
            .field("public_folders", &folders)
            .field("exception_policy", &self.exception_policy)
            .field("events", &self.events)
            .finish_non_exhaustive()
    }
}
