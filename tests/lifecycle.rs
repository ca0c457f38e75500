mod common;

use std::{
    sync::{Arc, Mutex, mpsc},
    thread,
    time::Duration,
};

use axum::body::Body;
use common::{EPHEMERAL_PREFIX, get, wait_until};
use hyper::{Request, Response};
use tempfile::TempDir;
use trellis::{
    ExceptionPolicy, PublicFolder, RestServer, RouteTable, ServerState,
    ports::router::HandlerError,
};

fn ephemeral_server() -> (RestServer, TempDir) {
    let root = TempDir::new().unwrap();
    let server = RestServer::with_prefix(EPHEMERAL_PREFIX).unwrap();
    server
        .set_public_folder(Arc::new(PublicFolder::new(root.path())))
        .unwrap();
    (server, root)
}

#[test]
fn test_start_listen_and_thread_safe_stop() {
    let (server, _root) = ephemeral_server();
    let server = Arc::new(server);

    server.start().unwrap();
    assert!(server.is_listening());
    assert_eq!(server.state(), ServerState::Running);
    let addr = server.local_addr().unwrap();
    assert_ne!(addr.port(), 0);

    let response = get(addr, "/nothing-here").unwrap();
    assert_eq!(response.status, 404);

    let _stopping = server.thread_safe_stop();
    assert!(wait_until(Duration::from_millis(300), || !server.is_listening()));
    assert!(wait_until(Duration::from_millis(300), || server.state()
        == ServerState::Stopped));
}

#[test]
fn test_bind_failure_then_successful_restart() {
    let occupied = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = occupied.local_addr().unwrap().port();

    let (server, _root) = ephemeral_server();
    server
        .set_listener_prefix(&format!("http://127.0.0.1:{port}/"))
        .unwrap();

    let fired = Arc::new(Mutex::new(Vec::new()));
    let log = fired.clone();
    server.on_after_start(move |_| {
        log.lock().unwrap().push("after_start");
        Ok(())
    });

    let err = server.start().unwrap_err();
    assert!(err.is_bind_failure(), "{err}");
    assert_eq!(server.state(), ServerState::Stopped);
    assert!(!server.is_listening());
    assert!(fired.lock().unwrap().is_empty());

    server.set_listener_prefix(EPHEMERAL_PREFIX).unwrap();
    server.start().unwrap();
    assert!(server.is_listening());
    assert_eq!(*fired.lock().unwrap(), vec!["after_start"]);
    server.stop().unwrap();
}

#[test]
fn test_state_violations_while_running() {
    let (server, _root) = ephemeral_server();
    server.start().unwrap();

    assert!(server.start().unwrap_err().is_state_violation());
    assert!(
        server
            .set_listener_prefix("http://127.0.0.1:8081/")
            .unwrap_err()
            .is_state_violation()
    );
    assert!(
        server
            .set_router(Arc::new(RouteTable::new()))
            .unwrap_err()
            .is_state_violation()
    );
    assert_eq!(server.listener_prefix().as_str(), EPHEMERAL_PREFIX);

    server.stop().unwrap();
    server.stop().unwrap();
    assert_eq!(server.state(), ServerState::Stopped);
}

#[test]
fn test_in_flight_request_completes_after_stop() {
    let (started_tx, started_rx) = mpsc::channel::<()>();
    let started_tx = Mutex::new(started_tx);

    let mut routes = RouteTable::new();
    routes
        .get("/slow", move |_req: Request<Body>| {
            let _ = started_tx.lock().unwrap().send(());
            async {
                tokio::time::sleep(Duration::from_millis(300)).await;
                Ok::<_, HandlerError>(Response::new(Body::from("done")))
            }
        })
        .unwrap();

    let (server, _root) = ephemeral_server();
    server.set_router(Arc::new(routes)).unwrap();
    server.start().unwrap();
    let addr = server.local_addr().unwrap();

    let client = thread::spawn(move || get(addr, "/slow"));
    started_rx.recv_timeout(Duration::from_secs(5)).unwrap();

    server.stop().unwrap();
    assert!(!server.is_listening());

    let response = client.join().unwrap().unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(response.body, "done");
}

#[test]
fn test_handler_fault_follows_policy() {
    let mut routes = RouteTable::new();
    routes
        .get("/boom", |_req: Request<Body>| async {
            Err::<Response<Body>, _>(HandlerError::InternalError("boom".to_string()))
        })
        .unwrap();
    let routes = Arc::new(routes);

    let (server, _root) = ephemeral_server();
    server.set_router(routes.clone()).unwrap();
    server.start().unwrap();
    let response = get(server.local_addr().unwrap(), "/boom").unwrap();
    assert_eq!(response.status, 500);
    server.stop().unwrap();

    // rethrown faults drop the connection without an answer
    server.set_exception_policy(ExceptionPolicy::Rethrow);
    server.start().unwrap();
    assert!(get(server.local_addr().unwrap(), "/boom").is_none());
    server.stop().unwrap();
}

#[test]
fn test_policy_change_applies_to_running_server() {
    let mut routes = RouteTable::new();
    routes
        .get("/boom", |_req: Request<Body>| async {
            Err::<Response<Body>, _>(HandlerError::InternalError("boom".to_string()))
        })
        .unwrap();

    let (server, _root) = ephemeral_server();
    server.set_router(Arc::new(routes)).unwrap();
    server.start().unwrap();
    let addr = server.local_addr().unwrap();
    assert_eq!(get(addr, "/boom").unwrap().status, 500);

    server.set_exception_policy(ExceptionPolicy::Rethrow);
    assert_eq!(server.exception_policy(), ExceptionPolicy::Rethrow);
    assert!(get(addr, "/boom").is_none());

    server.set_enable_throwing_exceptions(false);
    assert_eq!(get(addr, "/boom").unwrap().status, 500);
    server.stop().unwrap();
}

#[test]
fn test_stop_from_request_handler() {
    let server_slot: Arc<Mutex<Option<Arc<RestServer>>>> = Arc::new(Mutex::new(None));
    let slot = server_slot.clone();

    let mut routes = RouteTable::new();
    routes
        .post("/shutdown", move |_req: Request<Body>| {
            let server = slot.lock().unwrap().clone();
            async move {
                if let Some(server) = server {
                    let _ = server.thread_safe_stop();
                }
                Ok::<_, HandlerError>(Response::new(Body::from("bye")))
            }
        })
        .unwrap();

    let (server, _root) = ephemeral_server();
    let server = Arc::new(server);
    server.set_router(Arc::new(routes)).unwrap();
    *server_slot.lock().unwrap() = Some(server.clone());
    server.start().unwrap();

    let response = common::send(server.local_addr().unwrap(), "POST", "/shutdown").unwrap();
    assert_eq!(response.body, "bye");
    assert!(wait_until(Duration::from_secs(3), || server.state()
        == ServerState::Stopped));
    assert!(!server.is_listening());

    // break the cycle through the route table
    server_slot.lock().unwrap().take();
}
