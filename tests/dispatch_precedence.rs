mod common;

use std::{path::Path, sync::Arc};

use axum::body::Body;
use common::{EPHEMERAL_PREFIX, get, send};
use hyper::{Request, Response};
use tempfile::TempDir;
use trellis::{
    PublicFolder, RestServer, RouteTable, adapters::PathParams, ports::router::HandlerError,
};

fn write_files(root: &Path, files: &[(&str, &str)]) {
    for (path, content) in files {
        let full_path = root.join(path);
        if let Some(parent) = full_path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(full_path, content).unwrap();
    }
}

struct Site {
    server: RestServer,
    _first: TempDir,
    _second: TempDir,
}

fn site() -> Site {
    let first = TempDir::new().unwrap();
    let second = TempDir::new().unwrap();
    write_files(
        first.path(),
        &[
            ("shared", "first shared"),
            ("both.txt", "first both"),
            ("docs/default.htm", "first default"),
            ("docs/index.html", "first index"),
        ],
    );
    write_files(
        second.path(),
        &[
            ("both.txt", "second both"),
            ("only-second.txt", "second only"),
            ("assets/app.js", "js"),
        ],
    );

    let mut routes = RouteTable::new();
    routes
        .get("/shared", |_req: Request<Body>| async {
            Ok::<_, HandlerError>(Response::new(Body::from("router")))
        })
        .unwrap();
    routes
        .get("/items/{id}", |req: Request<Body>| async move {
            let id = req
                .extensions()
                .get::<PathParams>()
                .and_then(|params| params.get("id").map(str::to_string))
                .unwrap_or_default();
            Ok::<_, HandlerError>(Response::new(Body::from(format!("item {id}"))))
        })
        .unwrap();

    let server = RestServer::with_prefix(EPHEMERAL_PREFIX).unwrap();
    server.set_router(Arc::new(routes)).unwrap();
    server
        .add_public_folder(Arc::new(
            PublicFolder::new(first.path()).with_default_documents(["default.htm", "index.html"]),
        ))
        .unwrap();
    server
        .add_public_folder(Arc::new(PublicFolder::new(second.path())))
        .unwrap();
    server.start().unwrap();

    Site {
        server,
        _first: first,
        _second: second,
    }
}

#[test]
fn test_router_beats_static_root() {
    let site = site();
    let addr = site.server.local_addr().unwrap();

    let response = get(addr, "/shared").unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(response.body, "router");

    assert_eq!(get(addr, "/items/7").unwrap().body, "item 7");
    site.server.stop().unwrap();
}

#[test]
fn test_first_static_root_wins() {
    let site = site();
    let addr = site.server.local_addr().unwrap();

    assert_eq!(get(addr, "/both.txt").unwrap().body, "first both");
    assert_eq!(get(addr, "/only-second.txt").unwrap().body, "second only");
    assert_eq!(get(addr, "/assets/app.js").unwrap().body, "js");
    site.server.stop().unwrap();
}

#[test]
fn test_default_documents_tried_in_order() {
    let site = site();
    let addr = site.server.local_addr().unwrap();

    assert_eq!(get(addr, "/docs/").unwrap().body, "first default");
    site.server.stop().unwrap();
}

#[test]
fn test_unmatched_requests_are_not_found() {
    let site = site();
    let addr = site.server.local_addr().unwrap();

    let response = get(addr, "/missing.txt").unwrap();
    assert_eq!(response.status, 404);
    assert_eq!(response.body, "Not Found");

    // static roots only answer GET and HEAD
    assert_eq!(send(addr, "DELETE", "/both.txt").unwrap().status, 404);
    site.server.stop().unwrap();
}

#[test]
fn test_traversal_outside_root_is_a_miss() {
    let site = site();
    let addr = site.server.local_addr().unwrap();

    assert_eq!(get(addr, "/../Cargo.toml").unwrap().status, 404);
    assert_eq!(get(addr, "/%2e%2e/%2e%2e/etc/passwd").unwrap().status, 404);
    site.server.stop().unwrap();
}
