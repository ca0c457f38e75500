//! Default [`ListenerAdapter`] built on hyper 1.x and hyper-util.
//!
//! Binding is done with a blocking std socket so `bind` can report errors
//! synchronously from any thread. The accept loop and every connection run as
//! tasks on a tokio runtime, either one owned by the listener (built lazily on
//! first bind) or one supplied by the caller.
use std::{
    net::SocketAddr,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, Ordering},
        mpsc,
    },
    time::{Duration, Instant},
};

use axum::body::Body as AxumBody;
use hyper::{Request, Response, body::Incoming, service::service_fn};
use hyper_util::{
    rt::{TokioExecutor, TokioIo},
    server::{conn::auto, graceful},
};
use tokio::{
    net::{TcpListener, TcpStream},
    runtime::{Builder, Handle, Runtime},
};
use tracing::Instrument;

use crate::{
    core::{dispatch::not_found, prefix::ListenerPrefix},
    error::ServerError,
    ports::listener::{ListenerAdapter, ListenerError, ListenerResult, RequestHandler},
    tracing_setup::create_request_span,
    utils::{
        graceful_shutdown::{GracefulShutdown, ShutdownReason, ShutdownToken},
        request_tracker::{ConnectionInfo, RequestTracker},
    },
};

/// How long `unbind` waits for the accept loop to release the socket
const UNBIND_TIMEOUT: Duration = Duration::from_secs(2);

enum ListenerRuntime {
    Owned(Mutex<Option<Runtime>>),
    Shared(Handle),
}

struct Binding {
    prefix: ListenerPrefix,
    local_addr: SocketAddr,
    pending: Option<TcpListener>,
    shutdown: Option<GracefulShutdown>,
    closed: Option<mpsc::Receiver<()>>,
}

/// TCP listener serving HTTP/1.1 and HTTP/2 (cleartext) through hyper
pub struct HyperListener {
    runtime: ListenerRuntime,
    binding: Mutex<Option<Binding>>,
    listening: AtomicBool,
    tracker: RequestTracker,
}

impl HyperListener {
    /// Listener with its own multi-threaded runtime, created on first bind
    pub fn new() -> Self {
        Self::with_runtime(ListenerRuntime::Owned(Mutex::new(None)))
    }

    /// Listener that spawns its tasks on an existing runtime
    pub fn with_handle(handle: Handle) -> Self {
        Self::with_runtime(ListenerRuntime::Shared(handle))
    }

    fn with_runtime(runtime: ListenerRuntime) -> Self {
        Self {
            runtime,
            binding: Mutex::new(None),
            listening: AtomicBool::new(false),
            tracker: RequestTracker::new(),
        }
    }

    pub fn tracker(&self) -> &RequestTracker {
        &self.tracker
    }

    fn handle(&self) -> ListenerResult<Handle> {
        match &self.runtime {
            ListenerRuntime::Shared(handle) => Ok(handle.clone()),
            ListenerRuntime::Owned(slot) => {
                let mut slot = slot.lock().unwrap_or_else(PoisonError::into_inner);
                if let Some(runtime) = slot.as_ref() {
                    return Ok(runtime.handle().clone());
                }
                let runtime = Builder::new_multi_thread()
                    .enable_all()
                    .thread_name("trellis-worker")
                    .build()
                    .map_err(ListenerError::Runtime)?;
                let handle = runtime.handle().clone();
                *slot = Some(runtime);
                Ok(handle)
            }
        }
    }

    fn lock_binding(&self) -> MutexGuard<'_, Option<Binding>> {
        self.binding.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for HyperListener {
    fn default() -> Self {
        Self::new()
    }
}

impl ListenerAdapter for HyperListener {
    fn bind(&self, prefix: &ListenerPrefix) -> ListenerResult<SocketAddr> {
        if prefix.is_secure() {
            return Err(ListenerError::Unsupported(format!(
                "{prefix} requires TLS, which this listener does not terminate"
            )));
        }

        let mut binding = self.lock_binding();
        if let Some(existing) = binding.as_ref() {
            return Err(ListenerError::AlreadyBound(existing.local_addr));
        }

        let handle = self.handle()?;
        let bind_error = |source: std::io::Error| ListenerError::Bind {
            address: prefix.to_string(),
            source,
        };

        let addrs = prefix.socket_addrs().map_err(bind_error)?;
        if addrs.is_empty() {
            return Err(ListenerError::Unresolvable(prefix.to_string()));
        }

        let std_listener = std::net::TcpListener::bind(&addrs[..]).map_err(bind_error)?;
        std_listener.set_nonblocking(true).map_err(bind_error)?;
        let local_addr = std_listener.local_addr().map_err(bind_error)?;
        let listener = {
            let _runtime = handle.enter();
            TcpListener::from_std(std_listener).map_err(bind_error)?
        };

        tracing::debug!(%prefix, %local_addr, "Listener bound");
        *binding = Some(Binding {
            prefix: prefix.clone(),
            local_addr,
            pending: Some(listener),
            shutdown: None,
            closed: None,
        });
        self.listening.store(true, Ordering::Release);
        Ok(local_addr)
    }

    fn begin_accept(&self, handler: Arc<dyn RequestHandler>) -> ListenerResult<()> {
        let handle = self.handle()?;
        let mut guard = self.lock_binding();
        let binding = guard.as_mut().ok_or(ListenerError::NotBound)?;
        let listener = binding.pending.take().ok_or(ListenerError::NotBound)?;

        let shutdown = GracefulShutdown::new();
        let token = shutdown.shutdown_token();
        let (closed_tx, closed_rx) = mpsc::channel();
        binding.shutdown = Some(shutdown);
        binding.closed = Some(closed_rx);

        handle.spawn(accept_loop(
            listener,
            handler,
            binding.prefix.clone(),
            token,
            self.tracker.clone(),
            closed_tx,
        ));
        Ok(())
    }

    fn unbind(&self) {
        let binding = self.lock_binding().take();
        self.listening.store(false, Ordering::Release);

        let Some(binding) = binding else {
            return;
        };
        if let Some(shutdown) = &binding.shutdown {
            shutdown.trigger_shutdown(ShutdownReason::Requested);
        }
        if let Some(closed) = &binding.closed {
            if closed.recv_timeout(UNBIND_TIMEOUT).is_err() {
                tracing::warn!(
                    local_addr = %binding.local_addr,
                    "Accept loop did not confirm shutdown within {:?}",
                    UNBIND_TIMEOUT
                );
            }
        }
        tracing::debug!(local_addr = %binding.local_addr, "Listener unbound");
    }

    fn is_listening(&self) -> bool {
        self.listening.load(Ordering::Acquire)
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        self.lock_binding().as_ref().map(|binding| binding.local_addr)
    }

    fn active_requests(&self) -> u64 {
        self.tracker.total_active_requests()
    }
}

impl Drop for HyperListener {
    fn drop(&mut self) {
        self.unbind();
        if let ListenerRuntime::Owned(slot) = &self.runtime {
            let runtime = slot.lock().unwrap_or_else(PoisonError::into_inner).take();
            if let Some(runtime) = runtime {
                // blocking shutdown would panic when dropped from async code
                runtime.shutdown_background();
            }
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    handler: Arc<dyn RequestHandler>,
    prefix: ListenerPrefix,
    mut token: ShutdownToken,
    tracker: RequestTracker,
    closed: mpsc::Sender<()>,
) {
    let graceful = graceful::GracefulShutdown::new();

    loop {
        tokio::select! {
            reason = token.wait_for_shutdown() => {
                tracing::debug!("Accept loop stopping: {:?}", reason);
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, remote_addr)) => {
                    serve_connection(
                        stream,
                        remote_addr,
                        &handler,
                        &prefix,
                        &tracker,
                        graceful.watcher(),
                    );
                }
                Err(e) => tracing::debug!("Accept error: {}", e),
            },
        }
    }

    drop(listener);
    let _ = closed.send(());

    let in_flight = tracker.total_active_requests();
    if in_flight > 0 {
        tracing::info!("Listener closed, {} in-flight requests left to finish", in_flight);
    }
    graceful.shutdown().await;
    tracing::debug!("All connections of {} drained", prefix);
}

fn serve_connection(
    stream: TcpStream,
    remote_addr: SocketAddr,
    handler: &Arc<dyn RequestHandler>,
    prefix: &ListenerPrefix,
    tracker: &RequestTracker,
    watcher: graceful::Watcher,
) {
    let connection = tracker.register_connection(remote_addr);

    let service = {
        let handler = handler.clone();
        let prefix = prefix.clone();
        let connection = connection.clone();
        service_fn(move |req: Request<Incoming>| {
            respond(
                handler.clone(),
                prefix.clone(),
                connection.clone(),
                req,
            )
        })
    };

    let tracker = tracker.clone();
    tokio::spawn(async move {
        let builder = auto::Builder::new(TokioExecutor::new());
        let conn = builder.serve_connection(TokioIo::new(stream), service);
        if let Err(e) = watcher.watch(conn).await {
            tracing::debug!(%remote_addr, "Connection closed with error: {}", e);
        }
        tracker.unregister_connection(connection.id);
    });
}

async fn respond(
    handler: Arc<dyn RequestHandler>,
    prefix: ListenerPrefix,
    connection: Arc<ConnectionInfo>,
    req: Request<Incoming>,
) -> Result<Response<AxumBody>, ServerError> {
    let method = req.method().to_string();
    let path = req.uri().path().to_string();
    if !prefix.covers(&path) {
        return Ok(not_found());
    }

    let request_id = uuid::Uuid::new_v4().to_string();
    let span = create_request_span(&method, &path, &request_id);
    let _in_flight = connection.begin_request();
    let started = Instant::now();

    let result = handler
        .handle(req.map(AxumBody::new))
        .instrument(span.clone())
        .await;

    span.record("duration_ms", started.elapsed().as_millis() as u64);
    match &result {
        Ok(response) => {
            span.record("http.status_code", response.status().as_u16());
        }
        Err(e) => {
            tracing::error!(
                parent: &span,
                remote_addr = %connection.remote_addr,
                error = %e,
                "Request faulted, closing connection"
            );
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};

    use async_trait::async_trait;

    use super::*;

    struct Echo;

    #[async_trait]
    impl RequestHandler for Echo {
        async fn handle(&self, req: Request<AxumBody>) -> Result<Response<AxumBody>, ServerError> {
            Ok(Response::new(AxumBody::from(format!("echo {}", req.uri().path()))))
        }
    }

    fn ephemeral() -> ListenerPrefix {
        ListenerPrefix::parse("http://127.0.0.1:0/").unwrap()
    }

    fn get(addr: SocketAddr, path: &str) -> String {
        let mut stream = std::net::TcpStream::connect(addr).unwrap();
        write!(
            stream,
            "GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n"
        )
        .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).unwrap();
        response
    }

    #[test]
    fn test_bind_accept_unbind() {
        let listener = HyperListener::new();
        assert!(!listener.is_listening());

        let addr = listener.bind(&ephemeral()).unwrap();
        assert_ne!(addr.port(), 0);
        assert!(listener.is_listening());
        assert_eq!(listener.local_addr(), Some(addr));

        listener.begin_accept(Arc::new(Echo)).unwrap();
        let response = get(addr, "/hello");
        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.ends_with("echo /hello"));

        listener.unbind();
        assert!(!listener.is_listening());
        assert!(listener.local_addr().is_none());
        assert!(std::net::TcpStream::connect(addr).is_err());
    }

    #[test]
    fn test_bind_conflict_is_reported() {
        let first = HyperListener::new();
        let addr = first.bind(&ephemeral()).unwrap();

        let taken = ListenerPrefix::parse(&format!("http://127.0.0.1:{}/", addr.port())).unwrap();
        let second = HyperListener::new();
        let err = second.bind(&taken).unwrap_err();
        assert!(matches!(err, ListenerError::Bind { .. }));
        assert!(!second.is_listening());
    }

    #[test]
    fn test_secure_prefix_is_unsupported() {
        let listener = HyperListener::new();
        let prefix = ListenerPrefix::parse("https://127.0.0.1:0/").unwrap();
        assert!(matches!(
            listener.bind(&prefix),
            Err(ListenerError::Unsupported(_))
        ));
    }

    #[test]
    fn test_requests_outside_prefix_path_are_not_found() {
        let listener = HyperListener::new();
        let prefix = ListenerPrefix::parse("http://127.0.0.1:0/api/").unwrap();
        let addr = listener.bind(&prefix).unwrap();
        listener.begin_accept(Arc::new(Echo)).unwrap();

        assert!(get(addr, "/api/items").starts_with("HTTP/1.1 200"));
        assert!(get(addr, "/elsewhere").starts_with("HTTP/1.1 404"));
        listener.unbind();
    }

    #[test]
    fn test_begin_accept_requires_bind() {
        let listener = HyperListener::new();
        assert!(matches!(
            listener.begin_accept(Arc::new(Echo)),
            Err(ListenerError::NotBound)
        ));
    }
}
