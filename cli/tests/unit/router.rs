//! HTTP surface: subdomain dispatch, forwarding, control-plane envelope and auth.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::extract::{ConnectInfo, Request};
use axum::http::{Method, StatusCode, Version, header};
use axum::routing::get;
use codepass::application::{Registry, WorkspaceManager};
use codepass::domain::RoutePattern;
use codepass::server;
use http_body_util::BodyExt;
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tower::ServiceExt;

use crate::helpers::{FakeHypervisor, ScriptRunner, manager};

const ROOT: &str = "example.com";

fn get_req(host: &str, uri: &str) -> Request {
    Request::builder()
        .method(Method::GET)
        .uri(uri)
        .header(header::HOST, host)
        .body(Body::empty())
        .unwrap()
}

async fn body_text(resp: axum::response::Response) -> String {
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn body_json(resp: axum::response::Response) -> Value {
    serde_json::from_str(&body_text(resp).await).unwrap()
}

fn app_with(mgr: &WorkspaceManager, backend_port: u16, token: Option<&str>) -> Router {
    server::app(
        mgr.clone(),
        RoutePattern::new(ROOT).unwrap(),
        backend_port,
        token.map(str::to_string),
    )
}

/// Echo backend reporting what the proxy sent.
async fn spawn_backend() -> SocketAddr {
    let app = Router::new().fallback(|req: Request| async move {
        let h = |name: &str| {
            req.headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                .to_string()
        };
        axum::Json(serde_json::json!({
            "path": req.uri().path_and_query().map(ToString::to_string),
            "host": h("host"),
            "real_ip": h("x-real-ip"),
            "forwarded_for": h("x-forwarded-for"),
        }))
    });
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
    addr
}

async fn closed_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

#[tokio::test]
async fn test_root_host_reaches_control_plane() {
    let dir = tempfile::tempdir().unwrap();
    let hv = FakeHypervisor::new();
    let mgr = manager(dir.path(), hv.clone(), ScriptRunner::succeeding(hv.clone()));

    let resp = app_with(&mgr, 55123, None)
        .oneshot(get_req(ROOT, "/health"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_unmatched_hosts_use_injected_control_plane() {
    let hv = FakeHypervisor::new();
    let registry = Arc::new(Registry::new(hv));
    let control = Router::new().route("/", get(|| async { "control" }));
    let app = server::with_control_plane(registry, RoutePattern::new(ROOT).unwrap(), 55123, control);

    for host in ["example.com", "example.com:443", "other.net", "dev-code.example.org"] {
        let resp = app.clone().oneshot(get_req(host, "/")).await.unwrap();
        assert_eq!(body_text(resp).await, "control", "{host}");
    }
}

#[tokio::test]
async fn test_unknown_workspace_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let hv = FakeHypervisor::new();
    let mgr = manager(dir.path(), hv.clone(), ScriptRunner::succeeding(hv.clone()));
    let app = app_with(&mgr, 55123, None);

    let resp = app
        .clone()
        .oneshot(get_req("ghost-code.example.com", "/"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_text(resp).await, "ghost not found");

    let resp = app
        .oneshot(get_req("8080-ghost-code.example.com", "/"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_text(resp).await, "ghost(8080) not found");
}

#[tokio::test]
async fn test_out_of_range_port_prefix_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let hv = FakeHypervisor::new();
    hv.add("dev", &["127.0.0.1"]);
    let mgr = manager(dir.path(), hv.clone(), ScriptRunner::succeeding(hv.clone()));
    mgr.registry().refresh().await.unwrap();

    let resp = app_with(&mgr, 55123, None)
        .oneshot(get_req("70000-dev-code.example.com", "/"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_text(resp).await, "dev(70000) not found");
}

#[tokio::test]
async fn test_forwards_to_default_port_with_client_address() {
    let backend = spawn_backend().await;
    let dir = tempfile::tempdir().unwrap();
    let hv = FakeHypervisor::new();
    hv.add("dev", &["127.0.0.1"]);
    let mgr = manager(dir.path(), hv.clone(), ScriptRunner::succeeding(hv.clone()));
    mgr.registry().refresh().await.unwrap();

    let mut req = get_req("dev-code.example.com", "/static/app.js?v=3");
    req.extensions_mut()
        .insert(ConnectInfo(SocketAddr::from(([203, 0, 113, 7], 50000))));
    let resp = app_with(&mgr, backend.port(), None)
        .oneshot(req)
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let echoed = body_json(resp).await;
    assert_eq!(echoed["path"], "/static/app.js?v=3");
    assert_eq!(echoed["host"], "dev-code.example.com");
    assert_eq!(echoed["real_ip"], "203.0.113.7");
    assert_eq!(echoed["forwarded_for"], "203.0.113.7");
}

#[tokio::test]
async fn test_port_prefix_selects_backend_port() {
    let backend = spawn_backend().await;
    let dir = tempfile::tempdir().unwrap();
    let hv = FakeHypervisor::new();
    hv.add("dev", &["127.0.0.1"]);
    let mgr = manager(dir.path(), hv.clone(), ScriptRunner::succeeding(hv.clone()));
    mgr.registry().refresh().await.unwrap();

    let host = format!("{}-dev-code.example.com", backend.port());
    let resp = app_with(&mgr, closed_port().await, None)
        .oneshot(get_req(&host, "/"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(body_json(resp).await["path"], "/");
}

#[tokio::test]
async fn test_http2_request_is_forwarded_as_http1_with_host() {
    let backend = spawn_backend().await;
    let dir = tempfile::tempdir().unwrap();
    let hv = FakeHypervisor::new();
    hv.add("dev", &["127.0.0.1"]);
    let mgr = manager(dir.path(), hv.clone(), ScriptRunner::succeeding(hv.clone()));
    mgr.registry().refresh().await.unwrap();

    // h2 requests carry the host in the URI authority, not in a header.
    let req = Request::builder()
        .version(Version::HTTP_2)
        .uri("https://dev-code.example.com/hello?x=1")
        .body(Body::empty())
        .unwrap();
    let resp = app_with(&mgr, backend.port(), None)
        .oneshot(req)
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let echoed = body_json(resp).await;
    assert_eq!(echoed["path"], "/hello?x=1");
    assert_eq!(echoed["host"], "dev-code.example.com");
}

/// Read an HTTP head byte by byte so nothing after it is consumed.
async fn read_head(stream: &mut TcpStream) -> String {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        stream.read_exact(&mut byte).await.unwrap();
        head.push(byte[0]);
    }
    String::from_utf8(head).unwrap()
}

/// Backend that accepts one WebSocket-style upgrade and echoes raw bytes.
async fn spawn_upgrade_backend() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let head = read_head(&mut stream).await.to_ascii_lowercase();
        if !head.contains("upgrade: websocket") {
            stream
                .write_all(b"HTTP/1.1 400 Bad Request\r\ncontent-length: 0\r\n\r\n")
                .await
                .unwrap();
            return;
        }
        stream
            .write_all(
                b"HTTP/1.1 101 Switching Protocols\r\nconnection: upgrade\r\nupgrade: websocket\r\n\r\n",
            )
            .await
            .unwrap();
        let mut buf = [0u8; 64];
        loop {
            let n = stream.read(&mut buf).await.unwrap();
            if n == 0 {
                break;
            }
            stream.write_all(&buf[..n]).await.unwrap();
        }
    });
    addr
}

#[tokio::test]
async fn test_websocket_upgrade_is_spliced_to_backend() {
    let backend = spawn_upgrade_backend().await;
    let dir = tempfile::tempdir().unwrap();
    let hv = FakeHypervisor::new();
    hv.add("dev", &["127.0.0.1"]);
    let mgr = manager(dir.path(), hv.clone(), ScriptRunner::succeeding(hv.clone()));
    mgr.registry().refresh().await.unwrap();

    // Upgrades need a real connection on the inbound side.
    let app = app_with(&mgr, backend.port(), None);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let proxy = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    let mut client = TcpStream::connect(proxy).await.unwrap();
    client
        .write_all(
            b"GET /socket HTTP/1.1\r\nhost: dev-code.example.com\r\nconnection: Upgrade\r\nupgrade: websocket\r\n\r\n",
        )
        .await
        .unwrap();
    let head = read_head(&mut client).await;
    assert!(head.starts_with("HTTP/1.1 101"), "{head}");

    client.write_all(b"ping over the tunnel").await.unwrap();
    let mut echoed = [0u8; 20];
    tokio::time::timeout(
        std::time::Duration::from_secs(5),
        client.read_exact(&mut echoed),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(&echoed, b"ping over the tunnel");
}

#[tokio::test]
async fn test_unreachable_backend_is_bad_gateway() {
    let dir = tempfile::tempdir().unwrap();
    let hv = FakeHypervisor::new();
    hv.add("dev", &["127.0.0.1"]);
    let mgr = manager(dir.path(), hv.clone(), ScriptRunner::succeeding(hv.clone()));
    mgr.registry().refresh().await.unwrap();

    let resp = app_with(&mgr, closed_port().await, None)
        .oneshot(get_req("dev-code.example.com", "/"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn test_api_create_then_state() {
    let dir = tempfile::tempdir().unwrap();
    let hv = FakeHypervisor::new();
    let mgr = manager(dir.path(), hv.clone(), ScriptRunner::succeeding(hv.clone()));
    let app = app_with(&mgr, 55123, None);

    let req = Request::builder()
        .method(Method::POST)
        .uri("/api/workspaces/create?name=dev&pass=pw_1&cpus=2")
        .header(header::HOST, ROOT)
        .body(Body::empty())
        .unwrap();
    let resp = app.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    assert_eq!(body["ret"], 1);
    assert_eq!(body["data"]["name"], "dev");
    assert_eq!(body["data"]["pass"], "pw_1");

    mgr.wait_for_provisioning().await;
    let resp = app
        .clone()
        .oneshot(get_req(ROOT, "/api/workspaces/state?name=dev"))
        .await
        .unwrap();
    let body = body_json(resp).await;
    assert_eq!(body["data"]["state"], "ready");

    let resp = app
        .oneshot(get_req(ROOT, "/api/workspaces/log?name=dev&tail=abc"))
        .await
        .unwrap();
    let body = body_json(resp).await;
    assert_eq!(body["ret"], 1);
    assert!(body["data"]["log"].as_str().unwrap().contains("launching dev"));
}

#[tokio::test]
async fn test_api_errors_map_to_status_codes() {
    let dir = tempfile::tempdir().unwrap();
    let hv = FakeHypervisor::new();
    let mgr = manager(dir.path(), hv.clone(), ScriptRunner::succeeding(hv.clone()));
    let app = app_with(&mgr, 55123, None);

    let post = |uri: &str| {
        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(header::HOST, ROOT)
            .body(Body::empty())
            .unwrap()
    };

    let resp = app
        .clone()
        .oneshot(post("/api/workspaces/create?name=9bad"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(resp).await["ret"], 0);

    app.clone()
        .oneshot(post("/api/workspaces/create?name=dev"))
        .await
        .unwrap();
    let resp = app
        .clone()
        .oneshot(post("/api/workspaces/create?name=dev"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CONFLICT);

    let resp = app
        .clone()
        .oneshot(get_req(ROOT, "/api/workspaces/info?name=ghost"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let resp = app
        .oneshot(get_req(ROOT, "/api/workspaces/log?name=ghost"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    mgr.wait_for_provisioning().await;
}

#[tokio::test]
async fn test_api_list_empty_and_delete() {
    let dir = tempfile::tempdir().unwrap();
    let hv = FakeHypervisor::new();
    let mgr = manager(dir.path(), hv.clone(), ScriptRunner::succeeding(hv.clone()));
    let app = app_with(&mgr, 55123, None);

    let resp = app
        .clone()
        .oneshot(get_req(ROOT, "/api/workspaces/list"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body_json(resp).await;
    assert_eq!(body["ret"], 0);
    assert_eq!(body["msg"], "no workspaces");

    let req = Request::builder()
        .method(Method::POST)
        .uri("/api/workspaces/delete?name=ghost")
        .header(header::HOST, ROOT)
        .body(Body::empty())
        .unwrap();
    let body = body_json(app.oneshot(req).await.unwrap()).await;
    assert_eq!(body["ret"], 1);
    assert_eq!(body["data"]["instance_purged"], false);
}

#[tokio::test]
async fn test_bearer_token_gates_api_but_not_health() {
    let dir = tempfile::tempdir().unwrap();
    let hv = FakeHypervisor::new();
    let mgr = manager(dir.path(), hv.clone(), ScriptRunner::succeeding(hv.clone()));
    let app = app_with(&mgr, 55123, Some("s3cret"));

    let resp = app
        .clone()
        .oneshot(get_req(ROOT, "/api/workspaces/list"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(resp).await["ret"], 0);

    let mut req = get_req(ROOT, "/api/workspaces/list");
    req.headers_mut()
        .insert(header::AUTHORIZATION, "Bearer wrong".parse().unwrap());
    let resp = app.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let mut req = get_req(ROOT, "/api/workspaces/list");
    req.headers_mut()
        .insert(header::AUTHORIZATION, "Bearer s3cret".parse().unwrap());
    let resp = app.clone().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = app.oneshot(get_req(ROOT, "/health")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}
