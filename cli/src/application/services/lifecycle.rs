//! Workspace lifecycle: create, creation log, list, info, state, delete.
//!
//! Imports only from `crate::domain` and `crate::application`.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use codepass_common::{
    CreatedWorkspace, CreationLog, CreationState, InstanceInfo, MultipassInfo, StateRecord,
    WorkspaceInfo, WorkspaceSummary,
};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::application::ports::{CommandRunner, Hypervisor, WorkspaceStore};
use crate::application::services::provision::{self, ProvisionJob};
use crate::application::services::registry::Registry;
use crate::domain::{ResourceSpec, WorkspaceError, clamp_tail, resolve_password, validate_name};

/// Parameters of a create request.
#[derive(Debug, Clone, Default)]
pub struct CreateRequest {
    pub name: String,
    /// Empty or absent means generate one.
    pub password: Option<String>,
    pub resources: ResourceSpec,
}

/// Result of a delete that did not fail outright.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteOutcome {
    /// `true` when a hypervisor instance existed and was purged.
    pub instance_purged: bool,
    /// Set when the workspace directory could not be removed.
    pub directory_error: Option<String>,
}

/// Orchestrates workspace operations over the store, hypervisor and registry.
///
/// Cheap to clone; clones share the same provisioning tasks.
#[derive(Clone)]
pub struct WorkspaceManager {
    store: Arc<dyn WorkspaceStore>,
    hypervisor: Arc<dyn Hypervisor>,
    runner: Arc<dyn CommandRunner>,
    registry: Arc<Registry>,
    provision_timeout: Option<Duration>,
    shutdown: CancellationToken,
    tasks: TaskTracker,
}

impl WorkspaceManager {
    #[must_use]
    pub fn new(
        store: Arc<dyn WorkspaceStore>,
        hypervisor: Arc<dyn Hypervisor>,
        runner: Arc<dyn CommandRunner>,
        registry: Arc<Registry>,
    ) -> Self {
        Self {
            store,
            hypervisor,
            runner,
            registry,
            provision_timeout: None,
            shutdown: CancellationToken::new(),
            tasks: TaskTracker::new(),
        }
    }

    /// Abort provisioning scripts that run longer than `timeout`.
    #[must_use]
    pub fn with_provision_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.provision_timeout = timeout;
        self
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Reserve a workspace and start provisioning it in the background.
    ///
    /// Returns as soon as the task is started; the response carries the
    /// password in effect.
    ///
    /// # Errors
    ///
    /// - Validation errors for a bad name, password or resource value
    /// - [`WorkspaceError::AlreadyExists`] if the workspace directory exists
    /// - [`WorkspaceError::Io`] if the workspace files cannot be written
    pub async fn create(&self, request: CreateRequest) -> Result<CreatedWorkspace, WorkspaceError> {
        let CreateRequest {
            name,
            password,
            resources,
        } = request;
        validate_name(&name)?;
        let password = resolve_password(password.as_deref())?;
        resources.validate()?;

        let reserved = self
            .store
            .reserve(&name)
            .await
            .map_err(|e| WorkspaceError::io(&e))?;
        if !reserved {
            return Err(WorkspaceError::AlreadyExists(name));
        }

        let script = match self.prepare(&name, &resources, &password).await {
            Ok(script) => script,
            Err(e) => {
                self.release(&name).await;
                return Err(e);
            }
        };
        let job = ProvisionJob {
            name: name.clone(),
            script,
            log: self.store.log_path(&name),
            deadline: self.provision_timeout,
        };
        self.tasks.spawn(provision::run(
            job,
            Arc::clone(&self.runner),
            Arc::clone(&self.store),
            Arc::clone(&self.registry),
            self.shutdown.child_token(),
        ));
        tracing::info!(workspace = %name, resources = %resources.describe(), "provisioning started");

        Ok(CreatedWorkspace {
            name,
            pass: password,
        })
    }

    /// Last lines of the provisioning output with the creation marker and state.
    ///
    /// `tail` is clamped: absent or non-positive means 200, at most 10 000.
    ///
    /// # Errors
    ///
    /// Returns [`WorkspaceError::LogNotFound`] if no log exists for `name`.
    pub async fn creation_log(
        &self,
        name: &str,
        tail: Option<i64>,
    ) -> Result<CreationLog, WorkspaceError> {
        validate_name(name)?;
        let lines = clamp_tail(tail);
        let log = self
            .store
            .read_creation_log(name, lines)
            .await
            .map_err(|e| WorkspaceError::io(&e))?
            .ok_or_else(|| WorkspaceError::LogNotFound(name.to_string()))?;
        let metadata = self.store.read_metadata(name).await;
        Ok(CreationLog {
            create: metadata.created,
            log,
            state: self.recorded_state(name).await,
        })
    }

    /// Summaries of all workspaces sorted by name, `None` when there are none.
    ///
    /// Hypervisor detail is attached when available; a failing hypervisor
    /// only removes that detail.
    ///
    /// # Errors
    ///
    /// Returns [`WorkspaceError::Io`] if the workspaces directory cannot be read.
    pub async fn list(&self) -> Result<Option<Vec<WorkspaceSummary>>, WorkspaceError> {
        let names = self
            .store
            .list()
            .await
            .map_err(|e| WorkspaceError::io(&e))?;
        if names.is_empty() {
            return Ok(None);
        }

        let instances = self.instances().await;
        let mut summaries = Vec::with_capacity(names.len());
        for name in names {
            let metadata = self.store.read_metadata(&name).await;
            let state = self.recorded_state(&name).await;
            let instance = instances.get(&name);
            summaries.push(WorkspaceSummary {
                create: metadata.created,
                state,
                instance_state: instance.map(|i| i.state.clone()),
                ipv4: instance.and_then(|i| i.primary_ipv4().map(str::to_string)),
                name,
            });
        }
        Ok(Some(summaries))
    }

    /// Full workspace detail including the hypervisor's view of the instance.
    ///
    /// # Errors
    ///
    /// - [`WorkspaceError::NotFound`] if the workspace directory is absent
    /// - [`WorkspaceError::Upstream`] if the hypervisor query or parse fails
    pub async fn info(&self, name: &str) -> Result<WorkspaceInfo, WorkspaceError> {
        validate_name(name)?;
        if !self.store.exists(name).await {
            return Err(WorkspaceError::NotFound(name.to_string()));
        }

        let output = self
            .hypervisor
            .instance_info(name)
            .await
            .map_err(|e| WorkspaceError::upstream(&e))?;
        if !output.status.success() {
            return Err(WorkspaceError::Upstream(failure_detail(
                "multipass info",
                &output,
            )));
        }
        let mut doc: MultipassInfo = serde_json::from_slice(&output.stdout)
            .map_err(|e| WorkspaceError::Upstream(format!("parsing multipass info: {e}")))?;
        let info = doc.info.remove(name).ok_or_else(|| {
            WorkspaceError::Upstream(format!("multipass returned no detail for '{name}'"))
        })?;

        let metadata = self.store.read_metadata(name).await;
        Ok(WorkspaceInfo {
            create: metadata.created,
            pass: metadata.password,
            state: self.recorded_state(name).await,
            info,
        })
    }

    /// Current creation state of a workspace.
    ///
    /// A directory without a state record reads as [`CreationState::Requested`].
    ///
    /// # Errors
    ///
    /// Returns [`WorkspaceError::NotFound`] if the workspace directory is absent.
    pub async fn state(&self, name: &str) -> Result<CreationState, WorkspaceError> {
        validate_name(name)?;
        if !self.store.exists(name).await {
            return Err(WorkspaceError::NotFound(name.to_string()));
        }
        let record = self
            .store
            .read_state(name)
            .await
            .map_err(|e| WorkspaceError::io(&e))?;
        Ok(record.map_or(CreationState::Requested, |r| r.state))
    }

    /// Remove the workspace directory, purge the instance if it exists, and
    /// refresh the registry.
    ///
    /// A directory that cannot be removed is reported in the outcome rather
    /// than failing the call. In-flight provisioning is not interrupted.
    ///
    /// # Errors
    ///
    /// Returns [`WorkspaceError::Upstream`] if the instance exists but cannot
    /// be purged.
    pub async fn delete(&self, name: &str) -> Result<DeleteOutcome, WorkspaceError> {
        validate_name(name)?;

        let directory_error = match self.store.remove(name).await {
            Ok(()) => None,
            Err(e) => {
                let detail = format!("{e:#}");
                tracing::warn!(workspace = %name, error = %detail, "workspace directory not removed");
                Some(detail)
            }
        };

        let instance_exists = self
            .hypervisor
            .instance_info(name)
            .await
            .is_ok_and(|o| o.status.success());
        let purged = if instance_exists {
            self.purge(name).await.map(|()| true)
        } else {
            Ok(false)
        };

        if let Err(e) = self.registry.refresh().await {
            tracing::warn!(error = %format!("{e:#}"), "route refresh after delete failed");
        }

        let instance_purged = purged?;
        tracing::info!(workspace = %name, instance_purged, "workspace deleted");
        Ok(DeleteOutcome {
            instance_purged,
            directory_error,
        })
    }

    /// Cancel running provisioning tasks and wait for them to record their outcome.
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.tasks.close();
        self.tasks.wait().await;
    }

    /// Wait until every provisioning task started so far has finished.
    pub async fn wait_for_provisioning(&self) {
        self.tasks.close();
        self.tasks.wait().await;
        self.tasks.reopen();
    }

    /// Write the workspace files and the initial state records.
    ///
    /// `Provisioning` is recorded here, before the task exists, so a fast task's
    /// terminal state is never overwritten.
    async fn prepare(
        &self,
        name: &str,
        resources: &ResourceSpec,
        password: &str,
    ) -> Result<PathBuf, WorkspaceError> {
        let script = self
            .store
            .write_provisioning_script(name, resources, password)
            .await
            .map_err(|e| WorkspaceError::io(&e))?;
        self.record(name, CreationState::Requested).await?;
        self.record(name, CreationState::Provisioning).await?;
        Ok(script)
    }

    async fn purge(&self, name: &str) -> Result<(), WorkspaceError> {
        let output = self
            .hypervisor
            .purge(name)
            .await
            .map_err(|e| WorkspaceError::upstream(&e))?;
        if output.status.success() {
            Ok(())
        } else {
            Err(WorkspaceError::Upstream(failure_detail(
                "multipass delete",
                &output,
            )))
        }
    }

    async fn record(&self, name: &str, state: CreationState) -> Result<(), WorkspaceError> {
        self.store
            .write_state(name, &StateRecord::new(state))
            .await
            .map_err(|e| WorkspaceError::io(&e))
    }

    async fn recorded_state(&self, name: &str) -> Option<CreationState> {
        match self.store.read_state(name).await {
            Ok(record) => record.map(|r| r.state),
            Err(e) => {
                tracing::debug!(workspace = %name, error = %format!("{e:#}"), "state record unreadable");
                None
            }
        }
    }

    async fn release(&self, name: &str) {
        if let Err(e) = self.store.remove(name).await {
            tracing::warn!(workspace = %name, error = %format!("{e:#}"), "reserved workspace not released");
        }
    }

    async fn instances(&self) -> BTreeMap<String, InstanceInfo> {
        let output = match self.hypervisor.list_instances().await {
            Ok(o) if o.status.success() => o,
            Ok(o) => {
                tracing::warn!(detail = %failure_detail("multipass info", &o), "listing without instance detail");
                return BTreeMap::new();
            }
            Err(e) => {
                tracing::warn!(error = %format!("{e:#}"), "listing without instance detail");
                return BTreeMap::new();
            }
        };
        match serde_json::from_slice::<MultipassInfo>(&output.stdout) {
            Ok(doc) => doc.info,
            Err(e) => {
                tracing::warn!(error = %e, "listing without instance detail");
                BTreeMap::new()
            }
        }
    }
}

fn failure_detail(command: &str, output: &std::process::Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stderr = stderr.trim();
    if stderr.is_empty() {
        format!("{command} exited with {}", output.status)
    } else {
        format!("{command}: {stderr}")
    }
}
