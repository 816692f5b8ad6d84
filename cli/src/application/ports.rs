//! Port trait definitions for the Application layer.
//!
//! Ports are the interfaces (contracts) that infrastructure must fulfill.
//! This file imports only from `crate::domain` and shared wire types; never
//! from `crate::infra` or `crate::server`.
//!
//! Ports are object-safe and `Send + Sync` so the server can hold them as
//! `Arc<dyn Port>` and drive them from spawned tasks.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Output};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use codepass_common::StateRecord;
use tokio_util::sync::CancellationToken;

use crate::domain::ResourceSpec;

// ── Command Runner Port ───────────────────────────────────────────────────────

/// Abstracts process execution so infrastructure can be swapped or mocked.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run a program and capture its output.
    async fn run(&self, program: &str, args: &[&str]) -> Result<Output>;

    /// Run a program with stdout and stderr written to the file at `log`.
    ///
    /// # Errors
    ///
    /// Returns an error if the process cannot be spawned, outlives `deadline`,
    /// or `cancel` fires first. In the last two cases the child is killed.
    async fn run_logged(
        &self,
        program: &str,
        args: &[&str],
        log: &Path,
        deadline: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<ExitStatus>;
}

// ── Hypervisor Port ───────────────────────────────────────────────────────────

/// Hypervisor operations on named VM instances.
///
/// Methods return raw process output; parsing belongs to the services.
#[async_trait]
pub trait Hypervisor: Send + Sync {
    /// Detail of every instance as JSON.
    async fn list_instances(&self) -> Result<Output>;
    /// Detail of one instance as JSON. A non-zero exit means the instance is absent.
    async fn instance_info(&self, name: &str) -> Result<Output>;
    /// Delete and purge one instance.
    async fn purge(&self, name: &str) -> Result<Output>;
    /// Hypervisor version; fails when the tool is not installed.
    async fn version(&self) -> Result<Output>;
}

// ── Workspace Store Port ──────────────────────────────────────────────────────

/// Auxiliary files stored with a workspace. Missing files read as empty strings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkspaceMetadata {
    pub created: String,
    pub password: String,
}

/// Durable on-disk representation of workspaces. No business rules.
#[async_trait]
pub trait WorkspaceStore: Send + Sync {
    /// `true` iff the workspace directory exists.
    async fn exists(&self, name: &str) -> bool;

    /// Atomically create the workspace directory.
    ///
    /// Returns `false` when the directory already existed.
    async fn reserve(&self, name: &str) -> Result<bool>;

    /// Render the provisioning script and persist it with the creation marker
    /// and password. Returns the script path.
    async fn write_provisioning_script(
        &self,
        name: &str,
        spec: &ResourceSpec,
        password: &str,
    ) -> Result<PathBuf>;

    /// File receiving the provisioning output.
    fn log_path(&self, name: &str) -> PathBuf;

    /// Last `tail` lines of the creation log, or `None` if no log exists yet.
    async fn read_creation_log(&self, name: &str, tail: usize) -> Result<Option<String>>;

    /// Best-effort read of the creation marker and password.
    async fn read_metadata(&self, name: &str) -> WorkspaceMetadata;

    /// Persist the lifecycle record. Fails if the workspace directory is gone.
    async fn write_state(&self, name: &str, record: &StateRecord) -> Result<()>;

    /// Load the lifecycle record, `None` if none was written yet.
    async fn read_state(&self, name: &str) -> Result<Option<StateRecord>>;

    /// Names of all workspace directories, sorted.
    async fn list(&self) -> Result<Vec<String>>;

    /// Recursively delete the workspace directory. Absent directories are not an error.
    async fn remove(&self, name: &str) -> Result<()>;
}
