//! `codepass service`: run the workspace gateway.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use codepass_common::ServiceConfig;
use tokio_util::sync::CancellationToken;

use crate::application::{Hypervisor, Registry, WorkspaceManager};
use crate::domain::RoutePattern;
use crate::domain::platform::check_platform;
use crate::infra::command_runner::TokioCommandRunner;
use crate::infra::multipass::MultipassHypervisor;
use crate::infra::store::FsWorkspaceStore;
use crate::server;

/// Run startup checks, then serve until Ctrl-C or SIGTERM.
///
/// # Errors
///
/// Returns an error if a startup check fails or the server cannot run.
pub async fn run(config: ServiceConfig) -> Result<()> {
    check_tls_files(&config)?;
    check_platform()?;

    let hypervisor: Arc<dyn Hypervisor> =
        Arc::new(MultipassHypervisor::with_timeout(config.hypervisor_timeout()));
    check_multipass(hypervisor.as_ref()).await?;
    write_service_marker(&config.service_marker_path())?;

    let registry = Arc::new(Registry::new(Arc::clone(&hypervisor)));
    match registry.refresh().await {
        Ok(routes) => tracing::info!(routes, "route table loaded"),
        Err(e) => tracing::warn!(error = %format!("{e:#}"), "initial route refresh failed"),
    }

    let manager = WorkspaceManager::new(
        Arc::new(FsWorkspaceStore::new(config.workspaces_dir())),
        hypervisor,
        Arc::new(TokioCommandRunner::unbounded()),
        Arc::clone(&registry),
    )
    .with_provision_timeout(config.provision_timeout());
    let pattern = RoutePattern::new(&config.host)?;
    let router = server::app(
        manager.clone(),
        pattern,
        config.backend_port,
        config.api_token.clone(),
    );
    if config.api_token.is_none() {
        tracing::warn!("no API token configured; the control plane is open");
    }
    if config.tls_enabled() {
        // Fails only if a provider is already installed.
        let _ = rustls::crypto::ring::default_provider().install_default();
    }

    let shutdown = CancellationToken::new();
    if let Some(every) = config.refresh_interval() {
        tokio::spawn(Arc::clone(&registry).run_periodic(every, shutdown.child_token()));
    }
    tokio::spawn(cancel_on_signal(shutdown.clone()));

    tracing::info!(
        host = %config.host,
        data_dir = %config.data_dir.display(),
        tls_enabled = config.tls_enabled(),
        "codepass starting",
    );
    let served = server::serve(router, &config, shutdown.clone()).await;

    shutdown.cancel();
    manager.shutdown().await;
    tracing::info!("codepass shut down");
    served
}

/// Certificate and key must be configured together and point at files.
///
/// # Errors
///
/// Returns an error naming the invalid path.
pub fn check_tls_files(config: &ServiceConfig) -> Result<()> {
    match (&config.crt, &config.key) {
        (None, None) => Ok(()),
        (Some(crt), Some(key)) => {
            anyhow::ensure!(
                crt.is_file(),
                "TLS certificate path is invalid: {}",
                crt.display()
            );
            anyhow::ensure!(
                key.is_file(),
                "TLS private key path is invalid: {}",
                key.display()
            );
            Ok(())
        }
        (Some(_), None) => anyhow::bail!("TLS private key path is invalid: --key is required with --crt"),
        (None, Some(_)) => anyhow::bail!("TLS certificate path is invalid: --crt is required with --key"),
    }
}

/// The hypervisor CLI must be installed and answering.
///
/// # Errors
///
/// Returns an error if `multipass version` cannot run or exits non-zero.
pub async fn check_multipass(hypervisor: &dyn Hypervisor) -> Result<()> {
    match hypervisor.version().await {
        Ok(output) if output.status.success() => {
            let version = String::from_utf8_lossy(&output.stdout);
            tracing::debug!(version = %version.trim(), "multipass found");
            Ok(())
        }
        Ok(_) | Err(_) => anyhow::bail!("multipass is not installed"),
    }
}

/// Record the service start time under the data directory.
///
/// # Errors
///
/// Returns an error if the data directory or marker cannot be written.
pub fn write_service_marker(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating directory {}", parent.display()))?;
    }
    let started = chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
    std::fs::write(path, started).with_context(|| format!("writing {}", path.display()))
}

async fn cancel_on_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "cannot listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
        () = shutdown.cancelled() => return,
    }
    tracing::info!("received shutdown signal");
    shutdown.cancel();
}
