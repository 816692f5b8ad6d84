//! HTTP surface: subdomain reverse proxy in front of the control-plane API.
//!
//! Imports from `crate::domain` and `crate::application` are allowed.
//! Imports from `crate::infra` are forbidden; adapters are injected.

pub mod api;
pub mod auth;
pub mod error;
pub mod proxy;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::Router;
use axum_server::tls_rustls::RustlsConfig;
use codepass_common::ServiceConfig;
use tokio_util::sync::CancellationToken;

use crate::application::{Registry, WorkspaceManager};
use crate::domain::RoutePattern;
use crate::server::proxy::ProxyState;

/// Time in-flight connections get to finish once shutdown starts.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Full application: workspace hosts are proxied, all others hit the API.
pub fn app(
    manager: WorkspaceManager,
    pattern: RoutePattern,
    backend_port: u16,
    api_token: Option<String>,
) -> Router {
    let registry = Arc::clone(manager.registry());
    let control = api::router(manager, api_token);
    with_control_plane(registry, pattern, backend_port, control)
}

/// Put the subdomain dispatcher in front of an arbitrary control-plane router.
pub fn with_control_plane(
    registry: Arc<Registry>,
    pattern: RoutePattern,
    backend_port: u16,
    control: Router,
) -> Router {
    Router::new()
        .fallback(proxy::dispatch)
        .with_state(ProxyState::new(registry, pattern, backend_port, control))
}

/// Serve `router` until `shutdown` fires. TLS is used when both a
/// certificate and a key are configured.
///
/// # Errors
///
/// Returns an error if the listener cannot be bound, the TLS material cannot
/// be loaded, or the server fails.
pub async fn serve(router: Router, config: &ServiceConfig, shutdown: CancellationToken) -> Result<()> {
    let addr = config.listen_addr();
    let service = router.into_make_service_with_connect_info::<SocketAddr>();

    if let (Some(crt), Some(key)) = (&config.crt, &config.key) {
        let tls = RustlsConfig::from_pem_file(crt, key)
            .await
            .context("failed to load TLS certificates")?;

        let handle = axum_server::Handle::new();
        let on_shutdown = handle.clone();
        tokio::spawn(async move {
            shutdown.cancelled().await;
            on_shutdown.graceful_shutdown(Some(SHUTDOWN_GRACE));
        });

        tracing::info!("codepass ready at https://{addr}");
        axum_server::bind_rustls(addr, tls)
            .handle(handle)
            .serve(service)
            .await
            .context("HTTPS server error")?;
    } else {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;

        tracing::info!("codepass ready at http://{addr} (TLS disabled)");
        axum::serve(listener, service)
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            .context("HTTP server error")?;
    }
    Ok(())
}
