//! Subdomain dispatch: workspace hosts are reverse-proxied to the instance,
//! everything else goes to the control-plane router.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};
use axum::http::{StatusCode, Uri, Version};
use axum::response::{IntoResponse, Response};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::{TokioExecutor, TokioIo};
use tower::ServiceExt;

use crate::application::Registry;
use crate::domain::{RoutePattern, RouteTarget};

/// Pooled HTTP/1 client used for every forwarded request.
pub type HttpClient = Client<HttpConnector, Body>;

const X_REAL_IP: HeaderName = HeaderName::from_static("x-real-ip");
const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");

/// Headers that describe a single transport hop and are not forwarded.
const HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    HeaderName::from_static("proxy-connection"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
];

/// State shared by the dispatcher.
#[derive(Clone)]
pub struct ProxyState {
    pub registry: Arc<Registry>,
    pub pattern: RoutePattern,
    pub backend_port: u16,
    pub client: HttpClient,
    pub control: Router,
}

impl ProxyState {
    #[must_use]
    pub fn new(registry: Arc<Registry>, pattern: RoutePattern, backend_port: u16, control: Router) -> Self {
        Self {
            registry,
            pattern,
            backend_port,
            client: Client::builder(TokioExecutor::new()).build_http(),
            control,
        }
    }
}

/// Top-level handler for every inbound request.
pub async fn dispatch(State(state): State<ProxyState>, req: Request) -> Response {
    let target = request_host(&req).and_then(|host| state.pattern.match_host(host));
    match target {
        Some(target) => forward(&state, target, req).await,
        None => match state.control.clone().oneshot(req).await {
            Ok(response) => response,
            Err(never) => match never {},
        },
    }
}

fn request_host(req: &Request) -> Option<&str> {
    req.headers()
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .or_else(|| req.uri().host())
}

async fn forward(state: &ProxyState, target: RouteTarget, mut req: Request) -> Response {
    let Some(entry) = state.registry.lookup(&target.name) else {
        return not_found(&target);
    };
    let Some(authority) = target.backend_authority(&entry.address, state.backend_port) else {
        return not_found(&target);
    };

    let path = req.uri().path_and_query().map_or("/", |p| p.as_str());
    let uri: Uri = match format!("http://{authority}{path}").parse() {
        Ok(uri) => uri,
        Err(e) => {
            tracing::warn!(workspace = %target.name, error = %e, "cannot build backend uri");
            return bad_gateway(&target);
        }
    };

    // HTTP/2 clients carry the host in `:authority` only.
    let host = request_host(&req).and_then(|h| HeaderValue::from_str(h).ok());
    let upgrade = is_upgrade(req.headers());
    let client_upgrade = upgrade.then(|| hyper::upgrade::on(&mut req));
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());

    let (mut parts, body) = req.into_parts();
    parts.uri = uri;
    // Backends only speak HTTP/1.1 whatever the inbound protocol.
    parts.version = Version::HTTP_11;
    if let Some(host) = host {
        parts.headers.entry(header::HOST).or_insert(host);
    }
    if !upgrade {
        strip_hop_by_hop(&mut parts.headers);
    }
    if let Some(ip) = peer.and_then(|ip| HeaderValue::from_str(&ip.to_string()).ok()) {
        parts.headers.insert(X_REAL_IP, ip.clone());
        parts.headers.insert(X_FORWARDED_FOR, ip);
    }

    let outbound = axum::http::Request::from_parts(parts, body);
    let mut response = match state.client.request(outbound).await {
        Ok(response) => response,
        Err(e) => {
            tracing::warn!(workspace = %target.name, backend = %authority, error = %e, "backend request failed");
            return bad_gateway(&target);
        }
    };

    if response.status() == StatusCode::SWITCHING_PROTOCOLS {
        if let Some(client_upgrade) = client_upgrade {
            let backend_upgrade = hyper::upgrade::on(&mut response);
            let name = target.name.clone();
            tokio::spawn(async move {
                match tokio::try_join!(client_upgrade, backend_upgrade) {
                    Ok((client, backend)) => {
                        let mut client = TokioIo::new(client);
                        let mut backend = TokioIo::new(backend);
                        if let Err(e) = tokio::io::copy_bidirectional(&mut client, &mut backend).await {
                            tracing::debug!(workspace = %name, error = %e, "upgraded connection closed");
                        }
                    }
                    Err(e) => tracing::warn!(workspace = %name, error = %e, "protocol upgrade failed"),
                }
            });
        }
        return response.map(Body::new);
    }

    let (mut parts, body) = response.into_parts();
    strip_hop_by_hop(&mut parts.headers);
    axum::http::Response::from_parts(parts, Body::new(body))
}

fn is_upgrade(headers: &HeaderMap) -> bool {
    headers.contains_key(header::UPGRADE)
        && headers
            .get_all(header::CONNECTION)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .any(|token| token.trim().eq_ignore_ascii_case("upgrade"))
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let named: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|token| HeaderName::from_bytes(token.trim().as_bytes()).ok())
        .collect();
    for name in named {
        headers.remove(name);
    }
    for name in HOP_BY_HOP {
        headers.remove(name);
    }
    headers.remove(header::UPGRADE);
}

fn not_found(target: &RouteTarget) -> Response {
    (StatusCode::NOT_FOUND, target.not_found_message()).into_response()
}

fn bad_gateway(target: &RouteTarget) -> Response {
    (
        StatusCode::BAD_GATEWAY,
        format!("{} is not reachable", target.name),
    )
        .into_response()
}
