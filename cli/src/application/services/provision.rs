//! Background execution of a workspace provisioning script.
//!
//! Imports only from `crate::domain` and `crate::application`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use codepass_common::{CreationState, StateRecord};
use tokio_util::sync::CancellationToken;

use crate::application::ports::{CommandRunner, WorkspaceStore};
use crate::application::services::registry::Registry;

/// Shell used to run provisioning scripts.
pub const SHELL: &str = "/bin/sh";

/// One provisioning run.
#[derive(Debug, Clone)]
pub struct ProvisionJob {
    pub name: String,
    pub script: PathBuf,
    pub log: PathBuf,
    /// Upper bound on script runtime; `None` waits indefinitely.
    pub deadline: Option<Duration>,
}

/// Run the provisioning script to completion and record the outcome.
///
/// Exit status 0 moves the workspace to [`CreationState::Ready`]; anything
/// else, including cancellation and timeout, moves it to
/// [`CreationState::Failed`]. The registry is refreshed in every case.
pub async fn run(
    job: ProvisionJob,
    runner: Arc<dyn CommandRunner>,
    store: Arc<dyn WorkspaceStore>,
    registry: Arc<Registry>,
    cancel: CancellationToken,
) -> CreationState {
    let script = job.script.to_string_lossy().into_owned();
    let result = runner
        .run_logged(SHELL, &[&script], &job.log, job.deadline, &cancel)
        .await;

    let record = match result {
        Ok(status) if status.success() => {
            tracing::info!(workspace = %job.name, "provisioning finished");
            StateRecord::finished(CreationState::Ready, status.code())
        }
        Ok(status) => {
            tracing::warn!(workspace = %job.name, %status, "provisioning script failed");
            StateRecord::finished(CreationState::Failed, status.code())
        }
        Err(e) => {
            tracing::warn!(workspace = %job.name, error = %format!("{e:#}"), "provisioning aborted");
            StateRecord::finished(CreationState::Failed, None)
        }
    };

    if let Err(e) = store.write_state(&job.name, &record).await {
        // Workspace deleted while provisioning; nothing left to update.
        tracing::info!(workspace = %job.name, error = %format!("{e:#}"), "provisioning outcome not recorded");
    }
    if let Err(e) = registry.refresh().await {
        tracing::warn!(error = %format!("{e:#}"), "route refresh after provisioning failed");
    }
    record.state
}
